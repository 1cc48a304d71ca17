//! Calibration solver
//!
//! Fits an [`AffineTransform`] from world/pixel landmark pairs by least
//! squares. The two pixel axes are independent linear models over
//! `(world_x, world_z, 1)`; both share the same normal matrix, which is solved
//! on centred coordinates for numerical stability.

use nalgebra::{Matrix2, Vector2};
use tracing::{debug, info, warn};

use crate::core::constants::{COLLINEARITY_TOLERANCE, MIN_CALIBRATION_POINTS};
use crate::core::geometry::AffineTransform;
use crate::core::map_registry::MapProfile;
use crate::core::types::CalibrationPoint;
use crate::error::CalibrationError;

// =============================================================================
// FIT REPORT
// =============================================================================

/// Outcome of a successful fit
#[derive(Clone, Debug, PartialEq)]
pub struct FitReport {
    pub transform: AffineTransform,
    /// Root mean square pixel distance between fitted and observed pixels
    pub rms_error: f64,
    /// Largest pixel distance between fitted and observed pixels
    pub max_error: f64,
    pub point_count: usize,
}

// =============================================================================
// FITTING
// =============================================================================

/// Fit an affine transform to the given correspondences.
///
/// With exactly three non-collinear points the fit is exact; with more it
/// minimizes the total squared pixel error.
pub fn fit(points: &[CalibrationPoint]) -> Result<AffineTransform, CalibrationError> {
    if points.len() < MIN_CALIBRATION_POINTS {
        return Err(CalibrationError::InsufficientPoints {
            found: points.len(),
        });
    }

    let n = points.len() as f64;
    let (mut mx, mut mz, mut mu, mut mv) = (0.0, 0.0, 0.0, 0.0);
    for p in points {
        mx += p.world_x;
        mz += p.world_z;
        mu += p.pixel_x;
        mv += p.pixel_y;
    }
    mx /= n;
    mz /= n;
    mu /= n;
    mv /= n;

    let mut normal = Matrix2::<f64>::zeros();
    let mut rhs_u = Vector2::<f64>::zeros();
    let mut rhs_v = Vector2::<f64>::zeros();
    for p in points {
        let w = Vector2::new(p.world_x - mx, p.world_z - mz);
        normal += w * w.transpose();
        rhs_u += w * (p.pixel_x - mu);
        rhs_v += w * (p.pixel_y - mv);
    }

    // det / trace^2 lies in [0, 1/4]; it is 0 exactly when the points are collinear
    let trace = normal.trace();
    if trace <= f64::EPSILON || normal.determinant() <= COLLINEARITY_TOLERANCE * trace * trace {
        return Err(CalibrationError::Degenerate);
    }

    let inverse = normal.try_inverse().ok_or(CalibrationError::Degenerate)?;
    let row_x = inverse * rhs_u;
    let row_y = inverse * rhs_v;

    let (a, b) = (row_x[0], row_x[1]);
    let (c, d) = (row_y[0], row_y[1]);
    Ok(AffineTransform::new(
        a,
        b,
        c,
        d,
        mu - a * mx - b * mz,
        mv - c * mx - d * mz,
    ))
}

/// Pixel distance between each point's observed pixel and its fitted pixel
pub fn residuals(transform: &AffineTransform, points: &[CalibrationPoint]) -> Vec<f64> {
    points
        .iter()
        .map(|p| {
            let (px, py) = transform.forward(p.world_x, p.world_z);
            ((px - p.pixel_x).powi(2) + (py - p.pixel_y).powi(2)).sqrt()
        })
        .collect()
}

/// Fit the profile's points and install the result as its transform.
///
/// On failure the profile's existing transform is left untouched.
pub fn fit_profile(profile: &mut MapProfile) -> Result<FitReport, CalibrationError> {
    let transform = match fit(&profile.calibration_points) {
        Ok(t) => t,
        Err(e) => {
            warn!(map = %profile.key, error = %e, "[CALIB] Fit failed, keeping previous transform");
            return Err(e);
        }
    };

    let errors = residuals(&transform, &profile.calibration_points);
    let rms_error =
        (errors.iter().map(|e| e * e).sum::<f64>() / errors.len() as f64).sqrt();
    let max_error = errors.iter().cloned().fold(0.0, f64::max);

    profile.transform = Some(transform);
    info!(
        map = %profile.key,
        points = errors.len(),
        rms = rms_error,
        max = max_error,
        "[CALIB] Transform updated"
    );

    Ok(FitReport {
        transform,
        rms_error,
        max_error,
        point_count: errors.len(),
    })
}

// =============================================================================
// POINT EDITING
// =============================================================================

/// Insert or replace a point (by id). Returns whether the profile now has
/// enough points to calibrate. Never fits.
pub fn add_point(profile: &mut MapProfile, point: CalibrationPoint) -> bool {
    match profile
        .calibration_points
        .iter_mut()
        .find(|p| p.id == point.id)
    {
        Some(existing) => {
            debug!(map = %profile.key, id = %point.id, "[CALIB] Replacing point");
            *existing = point;
        }
        None => {
            debug!(map = %profile.key, id = %point.id, "[CALIB] Adding point");
            profile.calibration_points.push(point);
        }
    }
    profile.calibration_points.len() >= MIN_CALIBRATION_POINTS
}

/// Remove a point by id. Returns whether a point was removed.
///
/// A profile that drops below the minimum point count loses its transform.
pub fn remove_point(profile: &mut MapProfile, id: &str) -> bool {
    let before = profile.calibration_points.len();
    profile.calibration_points.retain(|p| p.id != id);
    let removed = profile.calibration_points.len() != before;

    if removed
        && profile.calibration_points.len() < MIN_CALIBRATION_POINTS
        && profile.transform.take().is_some()
    {
        info!(map = %profile.key, "[CALIB] Too few points left, transform cleared");
    }
    removed
}
