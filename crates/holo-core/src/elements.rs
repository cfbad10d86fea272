//! Optical elements that feed the [`HologramComposer`](crate::hologram::HologramComposer).
//!
//! Each element keeps the parameters of its last generation in a [`Memo`]
//! and regenerates only when a parameter or the device settings change.

use std::path::{Path, PathBuf};

use image::ColorType;
use log::{debug, info};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::hologram::{ElementError, PatternSource};
use crate::memo::Memo;
use crate::pattern::PatternGenerator;
use crate::types::{GratingParameters, LensParameters, SlmSettings, ZernikeCoefficientSet};

/// Generation key: the element parameters plus the SLM resolution.
type Keyed<P> = (P, usize, usize);

// ─── Lens ───────────────────────────────────────────────────────────────

/// Fresnel lens with a focal length in millimetres.
pub struct LensElement {
    pub focus_mm: f64,
    pub offset_x: f64,
    pub offset_y: f64,
    pub active: bool,
    memo: Memo<Keyed<LensParameters>, Array2<f64>>,
}

impl LensElement {
    pub fn new(focus_mm: f64) -> Self {
        Self {
            focus_mm,
            offset_x: 0.0,
            offset_y: 0.0,
            active: true,
            memo: Memo::new(),
        }
    }

    pub fn generations(&self) -> usize {
        self.memo.misses()
    }
}

impl PatternSource for LensElement {
    fn name(&self) -> &str {
        "lens"
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn pattern(
        &mut self,
        settings: &SlmSettings,
        generator: &mut PatternGenerator,
    ) -> Result<Array2<f64>, ElementError> {
        let params = LensParameters::new(self.focus_mm, settings.wavelength_nm, settings.pixel_pitch_um)
            .with_offset(self.offset_x, self.offset_y);
        let key = (params, settings.res_x, settings.res_y);
        let lens = self.memo.get_or_try_insert(key, |(p, rx, ry)| {
            debug!("Regenerating lens f={} mm", p.focus_mm);
            generator.generate_lens(p, *rx, *ry)
        })?;
        Ok(lens.clone())
    }
}

// ─── Grating ────────────────────────────────────────────────────────────

/// Blazed grating. The angle is given in units of π radians.
pub struct GratingElement {
    pub lines_per_mm: f64,
    pub angle_pi: f64,
    pub active: bool,
    memo: Memo<Keyed<GratingParameters>, Array2<f64>>,
}

impl GratingElement {
    pub fn new(lines_per_mm: f64, angle_pi: f64) -> Self {
        Self {
            lines_per_mm,
            angle_pi,
            active: true,
            memo: Memo::new(),
        }
    }

    pub fn generations(&self) -> usize {
        self.memo.misses()
    }
}

impl PatternSource for GratingElement {
    fn name(&self) -> &str {
        "grating"
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn pattern(
        &mut self,
        settings: &SlmSettings,
        generator: &mut PatternGenerator,
    ) -> Result<Array2<f64>, ElementError> {
        let params = GratingParameters {
            wavelength_nm: settings.wavelength_nm,
            pixel_pitch_um: settings.pixel_pitch_um,
            lines_per_mm: self.lines_per_mm,
            angle_rad: self.angle_pi * std::f64::consts::PI,
        };
        let key = (params, settings.res_x, settings.res_y);
        let grating = self
            .memo
            .get_or_try_insert(key, |(p, rx, ry)| generator.generate_grating(p, *rx, *ry))?;
        Ok(grating.clone())
    }
}

// ─── Zernike ────────────────────────────────────────────────────────────

/// Aberration correction as a weighted sum of Zernike modes.
pub struct ZernikeElement {
    pub set: ZernikeCoefficientSet,
    pub active: bool,
    memo: Memo<Keyed<ZernikeCoefficientSet>, Array2<f64>>,
}

impl ZernikeElement {
    pub fn new(set: ZernikeCoefficientSet) -> Self {
        Self {
            set,
            active: true,
            memo: Memo::new(),
        }
    }
}

impl PatternSource for ZernikeElement {
    fn name(&self) -> &str {
        "zernike"
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn pattern(
        &mut self,
        settings: &SlmSettings,
        generator: &mut PatternGenerator,
    ) -> Result<Array2<f64>, ElementError> {
        let key = (self.set.clone(), settings.res_x, settings.res_y);
        let zernike = self
            .memo
            .get_or_try_insert(key, |(s, rx, ry)| generator.generate_zernike(s, *rx, *ry))?;
        Ok(zernike.clone())
    }
}

// ─── Flatness correction ────────────────────────────────────────────────

/// Manufacturer-supplied flatness correction bitmap.
///
/// The image must be 8-bit single channel and exactly the SLM resolution.
/// It is read from disk again only when the path or the resolution changes.
pub struct FlatnessCorrection {
    path: PathBuf,
    pub active: bool,
    memo: Memo<Keyed<PathBuf>, Array2<f64>>,
}

impl FlatnessCorrection {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            active: true,
            memo: Memo::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn set_path(&mut self, path: impl Into<PathBuf>) {
        self.path = path.into();
    }
}

/// Read an 8-bit grayscale correction image as a `(rows, cols)` grid.
pub fn load_correction_image(path: &Path) -> Result<Array2<f64>, ElementError> {
    let img = image::open(path)?;
    if img.color() != ColorType::L8 {
        return Err(ElementError::NotGrayscale(img.color()));
    }
    let gray = img.to_luma8();
    let (w, h) = gray.dimensions();
    info!("Loaded correction image {} ({}x{})", path.display(), w, h);
    Ok(Array2::from_shape_fn((h as usize, w as usize), |(i, j)| {
        gray.get_pixel(j as u32, i as u32).0[0] as f64
    }))
}

impl PatternSource for FlatnessCorrection {
    fn name(&self) -> &str {
        "flatness correction"
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn pattern(
        &mut self,
        settings: &SlmSettings,
        _generator: &mut PatternGenerator,
    ) -> Result<Array2<f64>, ElementError> {
        let key = (self.path.clone(), settings.res_x, settings.res_y);
        let correction = self.memo.get_or_try_insert(key, |(path, rx, ry)| {
            let grid = load_correction_image(path)?;
            if grid.dim() != (*ry, *rx) {
                return Err(ElementError::ShapeMismatch {
                    name: path.display().to_string(),
                    found_x: grid.ncols(),
                    found_y: grid.nrows(),
                    res_x: *rx,
                    res_y: *ry,
                });
            }
            Ok(grid)
        })?;
        Ok(correction.clone())
    }
}

/// Serialisable description of an element, as found in job files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ElementSpec {
    Lens {
        focus_mm: f64,
        #[serde(default)]
        offset_x: f64,
        #[serde(default)]
        offset_y: f64,
        #[serde(default = "active_by_default")]
        active: bool,
    },
    Grating {
        lines_per_mm: f64,
        #[serde(default)]
        angle_pi: f64,
        #[serde(default = "active_by_default")]
        active: bool,
    },
    Zernike {
        coefficients: Vec<f64>,
        #[serde(default)]
        center_x: f64,
        #[serde(default)]
        center_y: f64,
        #[serde(default = "active_by_default")]
        active: bool,
    },
    Flatness {
        path: PathBuf,
        #[serde(default = "active_by_default")]
        active: bool,
    },
}

fn active_by_default() -> bool {
    true
}

impl ElementSpec {
    /// Instantiate the element as a composer source.
    pub fn build(&self) -> Box<dyn PatternSource> {
        match self {
            Self::Lens {
                focus_mm,
                offset_x,
                offset_y,
                active,
            } => {
                let mut lens = LensElement::new(*focus_mm);
                lens.offset_x = *offset_x;
                lens.offset_y = *offset_y;
                lens.active = *active;
                Box::new(lens)
            }
            Self::Grating {
                lines_per_mm,
                angle_pi,
                active,
            } => {
                let mut grating = GratingElement::new(*lines_per_mm, *angle_pi);
                grating.active = *active;
                Box::new(grating)
            }
            Self::Zernike {
                coefficients,
                center_x,
                center_y,
                active,
            } => {
                let mut zernike = ZernikeElement::new(ZernikeCoefficientSet {
                    coefficients: coefficients.clone(),
                    center_x: *center_x,
                    center_y: *center_y,
                });
                zernike.active = *active;
                Box::new(zernike)
            }
            Self::Flatness { path, active } => {
                let mut flat = FlatnessCorrection::new(path.clone());
                flat.active = *active;
                Box::new(flat)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, RgbImage};

    fn small_settings() -> SlmSettings {
        SlmSettings {
            res_x: 16,
            res_y: 12,
            ..SlmSettings::default()
        }
    }

    #[test]
    fn test_lens_memoised_until_settings_change() {
        let mut gen = PatternGenerator::default();
        let mut lens = LensElement::new(300.0);
        let mut settings = small_settings();

        let a = lens.pattern(&settings, &mut gen).unwrap();
        let b = lens.pattern(&settings, &mut gen).unwrap();
        assert_eq!(a, b);
        assert_eq!(lens.generations(), 1);

        settings.wavelength_nm = 633.0;
        lens.pattern(&settings, &mut gen).unwrap();
        assert_eq!(lens.generations(), 2);
    }

    #[test]
    fn test_grating_angle_in_pi_units() {
        let mut gen = PatternGenerator::default();
        let settings = small_settings();
        let mut vertical = GratingElement::new(10.0, 0.5);
        let g = vertical.pattern(&settings, &mut gen).unwrap();
        // Varies along Y only
        for row in g.rows() {
            let first = row[0];
            assert!(row.iter().all(|&v| (v - first).abs() < 1e-9));
        }
        assert_eq!(vertical.generations(), 1);
    }

    #[test]
    fn test_piston_is_constant() {
        let mut gen = PatternGenerator::default();
        let mut zernike = ZernikeElement::new(ZernikeCoefficientSet {
            coefficients: vec![0.2],
            ..Default::default()
        });
        let z = zernike.pattern(&small_settings(), &mut gen).unwrap();
        assert!(z.iter().all(|&v| (v - 51.0).abs() < 1e-9));
    }

    #[test]
    fn test_flatness_loads_grayscale() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flat.png");
        GrayImage::from_fn(16, 12, |x, y| Luma([(x + y) as u8]))
            .save(&path)
            .unwrap();

        let mut flat = FlatnessCorrection::new(&path);
        let grid = flat
            .pattern(&small_settings(), &mut PatternGenerator::default())
            .unwrap();
        assert_eq!(grid.dim(), (12, 16));
        assert_eq!(grid[[3, 5]], 8.0);
    }

    #[test]
    fn test_flatness_rejects_colour_and_size() {
        let dir = tempfile::tempdir().unwrap();
        let colour = dir.path().join("rgb.png");
        RgbImage::new(16, 12).save(&colour).unwrap();
        let mut flat = FlatnessCorrection::new(&colour);
        let mut gen = PatternGenerator::default();
        assert!(matches!(
            flat.pattern(&small_settings(), &mut gen),
            Err(ElementError::NotGrayscale(_))
        ));

        let small = dir.path().join("small.png");
        GrayImage::new(8, 8).save(&small).unwrap();
        flat.set_path(&small);
        assert!(matches!(
            flat.pattern(&small_settings(), &mut gen),
            Err(ElementError::ShapeMismatch { found_x: 8, .. })
        ));
    }

    #[test]
    fn test_element_spec_from_json() {
        let spec: ElementSpec =
            serde_json::from_str(r#"{"kind":"grating","lines_per_mm":40.0}"#).unwrap();
        assert_eq!(
            spec,
            ElementSpec::Grating {
                lines_per_mm: 40.0,
                angle_pi: 0.0,
                active: true
            }
        );
        assert_eq!(spec.build().name(), "grating");
    }
}
