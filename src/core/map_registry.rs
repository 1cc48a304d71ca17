//! Map registry
//!
//! Static per-map configuration (image size, aliases, floors) loaded from a
//! TOML catalogue, plus the calibration each map accumulates at runtime.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::constants::MIN_CALIBRATION_POINTS;
use crate::core::geometry::AffineTransform;
use crate::core::types::CalibrationPoint;
use crate::error::CatalogueError;

/// Catalogue shipped with the crate
const BUNDLED_CATALOGUE: &str = include_str!("../../data/maps.toml");

// =============================================================================
// PROFILE TYPES
// =============================================================================

/// One selectable floor/layer of a map image
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Floor {
    pub layer_id: String,
    pub display_name: String,
    #[serde(default)]
    pub order: i32,
    #[serde(default)]
    pub is_default: bool,
}

/// A map image description plus its runtime calibration
#[derive(Clone, Debug, PartialEq)]
pub struct MapProfile {
    pub key: String,
    pub display_name: String,
    pub aliases: BTreeSet<String>,
    pub pixel_width: u32,
    pub pixel_height: u32,
    /// Sorted by `order`
    pub floors: Vec<Floor>,
    pub marker_scale: f64,
    pub calibration_points: Vec<CalibrationPoint>,
    pub transform: Option<AffineTransform>,
}

impl MapProfile {
    pub fn new(
        key: impl Into<String>,
        display_name: impl Into<String>,
        pixel_width: u32,
        pixel_height: u32,
    ) -> Self {
        Self {
            key: key.into(),
            display_name: display_name.into(),
            aliases: BTreeSet::new(),
            pixel_width,
            pixel_height,
            floors: Vec::new(),
            marker_scale: 1.0,
            calibration_points: Vec::new(),
            transform: None,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.insert(alias.into());
        self
    }

    pub fn is_calibrated(&self) -> bool {
        self.transform.is_some()
    }

    /// The floor flagged as default, else the lowest-ordered one
    pub fn default_floor(&self) -> Option<&Floor> {
        self.floors
            .iter()
            .find(|f| f.is_default)
            .or_else(|| self.floors.first())
    }

    /// Whether a pixel lies on the map image
    pub fn contains_pixel(&self, pixel_x: f64, pixel_y: f64) -> bool {
        pixel_x >= 0.0
            && pixel_y >= 0.0
            && pixel_x < self.pixel_width as f64
            && pixel_y < self.pixel_height as f64
    }
}

// =============================================================================
// CATALOGUE
// =============================================================================

/// Catalogue entry as written in TOML
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CatalogueEntry {
    pub key: String,
    pub display_name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub pixel_width: Option<u32>,
    #[serde(default)]
    pub pixel_height: Option<u32>,
    /// Map artwork, used to read the pixel size when it is not given
    #[serde(default)]
    pub image: Option<PathBuf>,
    #[serde(default = "default_marker_scale")]
    pub marker_scale: f64,
    #[serde(default)]
    pub floors: Vec<Floor>,
}

fn default_marker_scale() -> f64 {
    1.0
}

/// Static list of map skeletons
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct MapCatalogue {
    #[serde(default)]
    pub maps: Vec<CatalogueEntry>,
}

impl MapCatalogue {
    pub fn parse(contents: &str) -> Result<Self, CatalogueError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn bundled() -> Result<Self, CatalogueError> {
        Self::parse(BUNDLED_CATALOGUE)
    }

    pub fn load(path: &Path) -> Result<Self, CatalogueError> {
        let contents = fs::read_to_string(path)?;
        let catalogue = Self::parse(&contents)?;
        info!(
            path = %path.display(),
            maps = catalogue.maps.len(),
            "[MAPS] Loaded map catalogue"
        );
        Ok(catalogue)
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Lookup of map profiles by key, alias or display name
#[derive(Clone, Debug, Default)]
pub struct MapRegistry {
    profiles: Vec<MapProfile>,
}

impl MapRegistry {
    /// Build a registry from explicit profiles (keys must be unique)
    pub fn new(profiles: Vec<MapProfile>) -> Result<Self, CatalogueError> {
        let mut seen = HashSet::new();
        for profile in &profiles {
            if !seen.insert(fold(&profile.key)) {
                return Err(CatalogueError::DuplicateKey(profile.key.clone()));
            }
        }
        Ok(Self { profiles })
    }

    /// Build a registry from a catalogue. Relative image paths resolve
    /// against `image_dir`.
    pub fn from_catalogue(
        catalogue: MapCatalogue,
        image_dir: Option<&Path>,
    ) -> Result<Self, CatalogueError> {
        let mut profiles = Vec::with_capacity(catalogue.maps.len());
        for entry in catalogue.maps {
            let (pixel_width, pixel_height) = resolve_pixel_size(&entry, image_dir)?;

            let mut floors = entry.floors;
            floors.sort_by_key(|f| f.order);

            profiles.push(MapProfile {
                key: entry.key,
                display_name: entry.display_name,
                aliases: entry.aliases.into_iter().collect(),
                pixel_width,
                pixel_height,
                floors,
                marker_scale: entry.marker_scale,
                calibration_points: Vec::new(),
                transform: None,
            });
        }
        Self::new(profiles)
    }

    pub fn bundled() -> Result<Self, CatalogueError> {
        Self::from_catalogue(MapCatalogue::bundled()?, None)
    }

    /// All map keys, in catalogue order
    pub fn map_keys(&self) -> Vec<String> {
        self.profiles.iter().map(|p| p.key.clone()).collect()
    }

    pub fn profiles(&self) -> &[MapProfile] {
        &self.profiles
    }

    pub fn profile(&self, key: &str) -> Option<&MapProfile> {
        let key = fold(key);
        self.profiles.iter().find(|p| fold(&p.key) == key)
    }

    pub fn profile_mut(&mut self, key: &str) -> Option<&mut MapProfile> {
        let key = fold(key);
        self.profiles.iter_mut().find(|p| fold(&p.key) == key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.profile(key).is_some()
    }

    pub fn default_floor(&self, key: &str) -> Option<&Floor> {
        self.profile(key)?.default_floor()
    }

    /// Resolve a raw map name to a map key.
    ///
    /// Matches by key first, then alias, then display name; every comparison
    /// is case-insensitive.
    pub fn resolve(&self, name: &str) -> Option<&str> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        let name = fold(name);

        self.profiles
            .iter()
            .find(|p| fold(&p.key) == name)
            .or_else(|| {
                self.profiles
                    .iter()
                    .find(|p| p.aliases.iter().any(|a| fold(a) == name))
            })
            .or_else(|| {
                self.profiles
                    .iter()
                    .find(|p| fold(&p.display_name) == name)
            })
            .map(|p| p.key.as_str())
    }

    // -------------------------------------------------------------------------
    // Calibration persistence
    // -------------------------------------------------------------------------

    /// Seed profiles with persisted calibration. Unknown maps are skipped, and
    /// a stored transform is only installed if the map has enough points.
    pub fn apply_calibration(
        &mut self,
        points: &BTreeMap<String, Vec<CalibrationPoint>>,
        transforms: &BTreeMap<String, AffineTransform>,
    ) {
        for (key, map_points) in points {
            match self.profile_mut(key) {
                Some(profile) => profile.calibration_points = map_points.clone(),
                None => warn!(map = %key, "[MAPS] Ignoring calibration for unknown map"),
            }
        }

        for (key, transform) in transforms {
            let Some(profile) = self.profile_mut(key) else {
                warn!(map = %key, "[MAPS] Ignoring transform for unknown map");
                continue;
            };
            if profile.calibration_points.len() >= MIN_CALIBRATION_POINTS {
                profile.transform = Some(*transform);
                debug!(map = %key, "[MAPS] Restored transform");
            } else {
                warn!(
                    map = %key,
                    points = profile.calibration_points.len(),
                    "[MAPS] Stored transform has too few points, ignoring"
                );
            }
        }
    }

    /// Calibration points of every map that has any
    pub fn calibration_points(&self) -> BTreeMap<String, Vec<CalibrationPoint>> {
        self.profiles
            .iter()
            .filter(|p| !p.calibration_points.is_empty())
            .map(|p| (p.key.clone(), p.calibration_points.clone()))
            .collect()
    }

    /// Transforms of every calibrated map
    pub fn transforms(&self) -> BTreeMap<String, AffineTransform> {
        self.profiles
            .iter()
            .filter_map(|p| p.transform.map(|t| (p.key.clone(), t)))
            .collect()
    }
}

/// Case folding shared by every map name comparison
fn fold(name: &str) -> String {
    name.to_lowercase()
}

fn resolve_pixel_size(
    entry: &CatalogueEntry,
    image_dir: Option<&Path>,
) -> Result<(u32, u32), CatalogueError> {
    if let (Some(w), Some(h)) = (entry.pixel_width, entry.pixel_height) {
        return Ok((w, h));
    }

    let missing = |reason: String| CatalogueError::MissingSize {
        key: entry.key.clone(),
        reason,
    };

    let image = entry
        .image
        .as_ref()
        .ok_or_else(|| missing("no image configured".to_string()))?;
    let path = match image_dir {
        Some(dir) if image.is_relative() => dir.join(image),
        _ => image.clone(),
    };

    let (w, h) = image::image_dimensions(&path).map_err(|e| missing(e.to_string()))?;
    debug!(map = %entry.key, width = w, height = h, "[MAPS] Read size from image");
    Ok((w, h))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> MapRegistry {
        MapRegistry::new(vec![
            MapProfile::new("customs", "Customs", 1000, 800).with_alias("bigmap"),
            MapProfile::new("factory", "Factory", 500, 500)
                .with_alias("factory4_day")
                .with_alias("factory4_night"),
            // Display name collides with another map's key
            MapProfile::new("streets", "Customs Annex", 900, 900).with_alias("tarkovstreets"),
            MapProfile::new("annex", "Streets", 100, 100),
        ])
        .unwrap()
    }

    #[test]
    fn test_bundled_catalogue_loads() {
        let registry = MapRegistry::bundled().unwrap();
        assert!(registry.contains("customs"));
        assert_eq!(registry.resolve("bigmap"), Some("customs"));
        assert_eq!(registry.resolve("RezervBase"), Some("reserve"));
        assert_eq!(registry.resolve("sandbox_high"), Some("groundzero"));
        assert_eq!(registry.map_keys().first().map(String::as_str), Some("factory"));
    }

    #[test]
    fn test_resolve_priority_key_alias_display() {
        let registry = registry();
        // "streets" is the key of one map and the display name of another
        assert_eq!(registry.resolve("streets"), Some("streets"));
        assert_eq!(registry.resolve("FACTORY4_NIGHT"), Some("factory"));
        assert_eq!(registry.resolve("customs annex"), Some("streets"));
        assert_eq!(registry.resolve("  Customs "), Some("customs"));
        assert_eq!(registry.resolve("lighthouse"), None);
        assert_eq!(registry.resolve(""), None);
    }

    #[test]
    fn test_non_ascii_names_fold_the_same_everywhere() {
        let mut registry = MapRegistry::new(vec![
            MapProfile::new("église", "Église", 10, 10).with_alias("ÉGLISE_NIGHT")
        ])
        .unwrap();

        let key = registry.resolve("ÉGLISE").unwrap().to_string();
        assert_eq!(key, "église");
        assert_eq!(registry.resolve("église_night"), Some("église"));
        assert!(registry.profile("ÉGLISE").is_some());
        assert!(registry.profile_mut("Église").is_some());
        assert!(registry.contains("ÉGLISE"));

        let duplicate = MapRegistry::new(vec![
            MapProfile::new("église", "a", 1, 1),
            MapProfile::new("ÉGLISE", "b", 1, 1),
        ]);
        assert!(matches!(duplicate, Err(CatalogueError::DuplicateKey(_))));
    }

    #[test]
    fn test_duplicate_keys_rejected() {
        let result = MapRegistry::new(vec![
            MapProfile::new("woods", "Woods", 1, 1),
            MapProfile::new("Woods", "Woods again", 1, 1),
        ]);
        assert!(matches!(result, Err(CatalogueError::DuplicateKey(_))));
    }

    #[test]
    fn test_catalogue_floors_sorted_and_default() {
        let catalogue = MapCatalogue::parse(
            r#"
            [[maps]]
            key = "labs"
            display_name = "The Lab"
            pixel_width = 2000
            pixel_height = 1500

            [[maps.floors]]
            layer_id = "second"
            display_name = "2nd Floor"
            order = 2

            [[maps.floors]]
            layer_id = "basement"
            display_name = "Basement"
            order = -1

            [[maps.floors]]
            layer_id = "main"
            display_name = "Main"
            order = 0
            is_default = true
            "#,
        )
        .unwrap();
        let registry = MapRegistry::from_catalogue(catalogue, None).unwrap();
        let profile = registry.profile("labs").unwrap();

        let order: Vec<_> = profile.floors.iter().map(|f| f.layer_id.as_str()).collect();
        assert_eq!(order, vec!["basement", "main", "second"]);
        assert_eq!(registry.default_floor("labs").unwrap().layer_id, "main");
        assert_eq!(profile.marker_scale, 1.0);
    }

    #[test]
    fn test_catalogue_reads_size_from_image() {
        let dir = tempfile::tempdir().unwrap();
        image::RgbImage::new(64, 32)
            .save(dir.path().join("tiny.png"))
            .unwrap();

        let catalogue = MapCatalogue::parse(
            r#"
            [[maps]]
            key = "tiny"
            display_name = "Tiny"
            image = "tiny.png"
            "#,
        )
        .unwrap();
        let registry = MapRegistry::from_catalogue(catalogue, Some(dir.path())).unwrap();
        let profile = registry.profile("tiny").unwrap();
        assert_eq!((profile.pixel_width, profile.pixel_height), (64, 32));
    }

    #[test]
    fn test_catalogue_without_size_or_image_fails() {
        let catalogue = MapCatalogue::parse(
            r#"
            [[maps]]
            key = "void"
            display_name = "Void"
            "#,
        )
        .unwrap();
        assert!(matches!(
            MapRegistry::from_catalogue(catalogue, None),
            Err(CatalogueError::MissingSize { .. })
        ));
    }

    #[test]
    fn test_apply_calibration_requires_enough_points() {
        let mut registry = registry();
        let pts = |n: usize| -> Vec<CalibrationPoint> {
            (0..n)
                .map(|i| CalibrationPoint::new(i.to_string(), "", (i as f64, 0.0), (0.0, 0.0)))
                .collect()
        };

        let mut points = BTreeMap::new();
        points.insert("customs".to_string(), pts(3));
        points.insert("factory".to_string(), pts(2));
        points.insert("nowhere".to_string(), pts(5));

        let mut transforms = BTreeMap::new();
        transforms.insert("customs".to_string(), AffineTransform::identity());
        transforms.insert("factory".to_string(), AffineTransform::identity());

        registry.apply_calibration(&points, &transforms);

        assert!(registry.profile("customs").unwrap().is_calibrated());
        assert!(!registry.profile("factory").unwrap().is_calibrated());
        assert_eq!(registry.profile("factory").unwrap().calibration_points.len(), 2);

        assert_eq!(registry.transforms().len(), 1);
        assert_eq!(registry.calibration_points().len(), 2);
    }

    #[test]
    fn test_contains_pixel() {
        let profile = MapProfile::new("m", "M", 100, 50);
        assert!(profile.contains_pixel(0.0, 0.0));
        assert!(profile.contains_pixel(99.5, 49.5));
        assert!(!profile.contains_pixel(100.0, 10.0));
        assert!(!profile.contains_pixel(-1.0, 10.0));
    }
}
