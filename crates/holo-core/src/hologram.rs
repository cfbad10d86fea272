//! Hologram composition.
//!
//! Every active [`PatternSource`] contributes an unwrapped phase map; the
//! [`HologramComposer`] sums them, wraps the sum `mod 256` and rescales it to
//! the device's phase-correction range:
//!
//! $$ h = \left\lfloor \frac{(\textstyle\sum_k p_k \bmod 256)\cdot M}{255} \right\rfloor $$
//!
//! where $M$ is the grey value producing a 2π shift at the operating
//! wavelength. The result is the 8-bit frame written to the SLM.

use std::io::Cursor;

use image::{ImageBuffer, ImageFormat, Luma};
use log::{debug, info};
use ndarray::Array2;
use thiserror::Error;

use crate::pattern::{PatternError, PatternGenerator};
use crate::types::SlmSettings;

/// Errors raised by optical elements and by composition.
#[derive(Debug, Error)]
pub enum ElementError {
    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Correction image must be 8-bit single channel, found {0:?}")]
    NotGrayscale(image::ColorType),

    #[error("Element '{name}' has shape {found_x}x{found_y}, SLM is {res_x}x{res_y}")]
    ShapeMismatch {
        name: String,
        found_x: usize,
        found_y: usize,
        res_x: usize,
        res_y: usize,
    },

    #[error("Element '{0}' has no pattern loaded")]
    NotLoaded(String),
}

/// A contributor to the composed hologram.
pub trait PatternSource: Send {
    /// Display name used in logs and errors.
    fn name(&self) -> &str;

    /// Whether the source takes part in composition.
    fn is_active(&self) -> bool;

    /// Unwrapped `(resY, resX)` phase map for the current device settings.
    fn pattern(
        &mut self,
        settings: &SlmSettings,
        generator: &mut PatternGenerator,
    ) -> Result<Array2<f64>, ElementError>;
}

/// Wrap `mod 256` and rescale to `[0, phase_correction]`, truncating to `u8`.
pub fn normalize(pattern: &Array2<f64>, phase_correction: f64) -> Array2<u8> {
    pattern.mapv(|p| (p.rem_euclid(256.0) * phase_correction / 255.0) as u8)
}

/// Encode an 8-bit frame as a grayscale PNG.
pub fn encode_png(frame: &Array2<u8>) -> Result<Vec<u8>, image::ImageError> {
    let (rows, cols) = frame.dim();
    let img: ImageBuffer<Luma<u8>, Vec<u8>> =
        ImageBuffer::from_fn(cols as u32, rows as u32, |x, y| {
            Luma([frame[[y as usize, x as usize]]])
        });
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

/// Sums active pattern sources into the frame displayed on the SLM.
pub struct HologramComposer {
    settings: SlmSettings,
    generator: PatternGenerator,
    sources: Vec<Box<dyn PatternSource>>,
    frame: Option<Array2<u8>>,
}

impl HologramComposer {
    pub fn new(settings: SlmSettings, generator: PatternGenerator) -> Self {
        Self {
            settings,
            generator,
            sources: Vec::new(),
            frame: None,
        }
    }

    pub fn settings(&self) -> &SlmSettings {
        &self.settings
    }

    pub fn add_source(&mut self, source: Box<dyn PatternSource>) {
        debug!("Adding pattern source '{}'", source.name());
        self.sources.push(source);
    }

    pub fn sources(&self) -> impl Iterator<Item = &dyn PatternSource> {
        self.sources.iter().map(|s| s.as_ref())
    }

    /// The last composed frame.
    pub fn frame(&self) -> Option<&Array2<u8>> {
        self.frame.as_ref()
    }

    /// Compose every active source.
    pub fn compose(&mut self) -> Result<Array2<u8>, ElementError> {
        let base = PatternGenerator::empty_pattern(self.settings.res_x, self.settings.res_y)?;
        self.finish(base, true)
    }

    /// Compose an externally generated pattern, optionally together with the
    /// active sources.
    pub fn render_algorithm_pattern(
        &mut self,
        pattern: &Array2<f64>,
        include_others: bool,
    ) -> Result<Array2<u8>, ElementError> {
        self.check_shape("algorithm", pattern)?;
        self.finish(pattern.clone(), include_others)
    }

    fn finish(&mut self, mut sum: Array2<f64>, include_sources: bool) -> Result<Array2<u8>, ElementError> {
        if include_sources {
            let settings = self.settings;
            let mut active = 0;
            for source in self.sources.iter_mut().filter(|s| s.is_active()) {
                let contribution = source.pattern(&settings, &mut self.generator)?;
                check_shape(&settings, source.name(), &contribution)?;
                sum += &contribution;
                active += 1;
            }
            debug!("Composed {} active sources", active);
        }
        let frame = normalize(&sum, self.settings.phase_correction);
        self.frame = Some(frame.clone());
        info!(
            "Hologram composed ({}x{})",
            self.settings.res_x, self.settings.res_y
        );
        Ok(frame)
    }

    fn check_shape(&self, name: &str, pattern: &Array2<f64>) -> Result<(), ElementError> {
        check_shape(&self.settings, name, pattern)
    }
}

fn check_shape<T>(settings: &SlmSettings, name: &str, pattern: &Array2<T>) -> Result<(), ElementError> {
    let (rows, cols) = pattern.dim();
    if rows != settings.res_y || cols != settings.res_x {
        return Err(ElementError::ShapeMismatch {
            name: name.to_string(),
            found_x: cols,
            found_y: rows,
            res_x: settings.res_x,
            res_y: settings.res_y,
        });
    }
    Ok(())
}
