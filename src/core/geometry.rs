//! Affine transform between world ground-plane and image pixel coordinates
//!
//! `pixel = M · (world_x, world_z) + t`, where `M = [[a, b], [c, d]]` and
//! `t = (tx, ty)`. World height never takes part in the mapping.

use serde::{Deserialize, Serialize};

use crate::core::constants::SINGULAR_DETERMINANT_EPSILON;
use crate::error::GeometryError;

/// World ground-plane to pixel affine transform
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AffineTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub tx: f64,
    pub ty: f64,
}

impl AffineTransform {
    pub fn new(a: f64, b: f64, c: f64, d: f64, tx: f64, ty: f64) -> Self {
        Self { a, b, c, d, tx, ty }
    }

    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 1.0, 0.0, 0.0)
    }

    /// Determinant of the linear part
    pub fn determinant(&self) -> f64 {
        self.a * self.d - self.b * self.c
    }

    pub fn is_invertible(&self) -> bool {
        self.determinant().abs() > SINGULAR_DETERMINANT_EPSILON
    }

    /// Map a world ground-plane position to image pixels
    #[inline]
    pub fn forward(&self, world_x: f64, world_z: f64) -> (f64, f64) {
        (
            self.a * world_x + self.b * world_z + self.tx,
            self.c * world_x + self.d * world_z + self.ty,
        )
    }

    /// Map an image pixel back to the world ground plane
    pub fn inverse(&self, pixel_x: f64, pixel_y: f64) -> Result<(f64, f64), GeometryError> {
        let det = self.determinant();
        if det.abs() <= SINGULAR_DETERMINANT_EPSILON {
            return Err(GeometryError::Singular { det });
        }

        let px = pixel_x - self.tx;
        let py = pixel_y - self.ty;
        Ok((
            (self.d * px - self.b * py) / det,
            (-self.c * px + self.a * py) / det,
        ))
    }

    /// Project a world heading onto the image.
    ///
    /// World headings are degrees with 0 along +Z, turning clockwise towards
    /// +X. Image headings are degrees with 0 pointing up (towards -pixel_y),
    /// turning clockwise. The result is normalized to [0, 360).
    pub fn map_heading(&self, world_heading_deg: f64) -> f64 {
        let rad = world_heading_deg.to_radians();
        let (wx, wz) = (rad.sin(), rad.cos());
        let dx = self.a * wx + self.b * wz;
        let dy = self.c * wx + self.d * wz;
        dx.atan2(-dy).to_degrees().rem_euclid(360.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn sample_transform() -> AffineTransform {
        AffineTransform::new(0.8, -0.3, 0.25, 1.1, 512.0, -40.0)
    }

    #[test]
    fn test_forward_applies_linear_part_and_offset() {
        let t = AffineTransform::new(2.0, 0.0, 0.0, 3.0, 10.0, 20.0);
        assert_eq!(t.forward(1.0, 1.0), (12.0, 23.0));
        assert_eq!(t.forward(0.0, 0.0), (10.0, 20.0));
    }

    #[test]
    fn test_inverse_of_forward_returns_world_point() {
        let t = sample_transform();
        let (px, py) = t.forward(-123.5, 88.25);
        let (wx, wz) = t.inverse(px, py).unwrap();
        assert_relative_eq!(wx, -123.5, epsilon = 1e-9);
        assert_relative_eq!(wz, 88.25, epsilon = 1e-9);
    }

    #[test]
    fn test_inverse_rejects_singular_transform() {
        // Second row is a multiple of the first
        let t = AffineTransform::new(1.0, 2.0, 2.0, 4.0, 0.0, 0.0);
        assert!(!t.is_invertible());
        assert!(matches!(
            t.inverse(10.0, 10.0),
            Err(GeometryError::Singular { .. })
        ));
    }

    #[test]
    fn test_inverse_threshold_is_inclusive() {
        let t = AffineTransform::new(1e-4, 0.0, 0.0, 1.0, 0.0, 0.0);
        assert!(t.inverse(1.0, 1.0).is_err());

        let t = AffineTransform::new(2e-4, 0.0, 0.0, 1.0, 0.0, 0.0);
        assert!(t.inverse(1.0, 1.0).is_ok());
    }

    #[test]
    fn test_map_heading_with_flipped_vertical_axis() {
        // +Z up the image, +X to the right
        let t = AffineTransform::new(1.0, 0.0, 0.0, -1.0, 0.0, 0.0);
        assert_relative_eq!(t.map_heading(0.0), 0.0, epsilon = 1e-9);
        assert_relative_eq!(t.map_heading(90.0), 90.0, epsilon = 1e-9);
        assert_relative_eq!(t.map_heading(180.0), 180.0, epsilon = 1e-9);
        assert_relative_eq!(t.map_heading(-90.0), 270.0, epsilon = 1e-9);
    }

    #[test]
    fn test_map_heading_with_rotated_map() {
        // Image rotated a quarter turn: +Z points right on the image
        let t = AffineTransform::new(0.0, 1.0, 1.0, 0.0, 0.0, 0.0);
        assert_relative_eq!(t.map_heading(0.0), 90.0, epsilon = 1e-9);
    }

    proptest! {
        #[test]
        fn prop_forward_inverse_round_trip(
            a in 0.2f64..3.0,
            b in -1.0f64..1.0,
            c in -1.0f64..1.0,
            d in 0.2f64..3.0,
            tx in -2000.0f64..2000.0,
            ty in -2000.0f64..2000.0,
            x in -1500.0f64..1500.0,
            z in -1500.0f64..1500.0,
        ) {
            let t = AffineTransform::new(a, b, c, d, tx, ty);
            prop_assume!(t.determinant().abs() > 0.05);

            let (px, py) = t.forward(x, z);
            let (wx, wz) = t.inverse(px, py).unwrap();
            prop_assert!((wx - x).abs() < 1e-6);
            prop_assert!((wz - z).abs() < 1e-6);
        }
    }
}
