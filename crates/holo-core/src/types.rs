//! Core types shared across the Holo workspace.
//!
//! This module defines the device description ([`SlmSettings`]), the physical
//! parameters of each synthesised pattern, and the [`ZonePartition`] produced
//! by the meshing engine.

use std::collections::BTreeSet;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier of a zone: the tag of the mesh element covering it.
pub type ZoneId = u64;

/// Device description of the SLM being driven.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SlmSettings {
    /// Horizontal resolution (pixels).
    #[serde(default = "default_res_x")]
    pub res_x: usize,
    /// Vertical resolution (pixels).
    #[serde(default = "default_res_y")]
    pub res_y: usize,
    /// Laser wavelength (nm).
    #[serde(default = "default_wavelength")]
    pub wavelength_nm: f64,
    /// Pixel pitch (µm).
    #[serde(default = "default_pixel_pitch")]
    pub pixel_pitch_um: f64,
    /// Raw grey value corresponding to a 2π phase shift at the operating
    /// wavelength, e.g. 255 → 226 at 760 nm for some devices.
    #[serde(default = "default_phase_correction")]
    pub phase_correction: f64,
}

fn default_res_x() -> usize {
    800
}
fn default_res_y() -> usize {
    600
}
fn default_wavelength() -> f64 {
    800.0
}
fn default_pixel_pitch() -> f64 {
    12.5
}
fn default_phase_correction() -> f64 {
    255.0
}

impl Default for SlmSettings {
    fn default() -> Self {
        Self {
            res_x: default_res_x(),
            res_y: default_res_y(),
            wavelength_nm: default_wavelength(),
            pixel_pitch_um: default_pixel_pitch(),
            phase_correction: default_phase_correction(),
        }
    }
}

/// Parameters of a Fresnel lens pattern.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LensParameters {
    /// Focal length (mm). Exactly 0 is treated as 1.
    pub focus_mm: f64,
    /// Wavelength (nm).
    pub wavelength_nm: f64,
    /// Pixel pitch (µm).
    pub pixel_pitch_um: f64,
    /// Lens centre offset from the SLM centre (pixels).
    #[serde(default)]
    pub offset_x: f64,
    #[serde(default)]
    pub offset_y: f64,
}

impl LensParameters {
    /// A lens centred on the SLM.
    pub fn new(focus_mm: f64, wavelength_nm: f64, pixel_pitch_um: f64) -> Self {
        Self {
            focus_mm,
            wavelength_nm,
            pixel_pitch_um,
            offset_x: 0.0,
            offset_y: 0.0,
        }
    }

    pub fn with_offset(mut self, offset_x: f64, offset_y: f64) -> Self {
        self.offset_x = offset_x;
        self.offset_y = offset_y;
        self
    }
}

/// Parameters of a blazed grating pattern.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GratingParameters {
    /// Wavelength (nm). Carried for cache keys; the grating period does not
    /// depend on it.
    pub wavelength_nm: f64,
    /// Pixel pitch (µm).
    pub pixel_pitch_um: f64,
    /// Line density (lines/mm). `0` means "no grating".
    pub lines_per_mm: f64,
    /// Grating orientation (radians).
    pub angle_rad: f64,
}

/// Zernike coefficients in OSA/ANSI single-index order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ZernikeCoefficientSet {
    pub coefficients: Vec<f64>,
    /// Pattern centre (pixels).
    #[serde(default)]
    pub center_x: f64,
    #[serde(default)]
    pub center_y: f64,
}

/// Errors raised when a zone grid and its identifier set disagree.
#[derive(Debug, Error, PartialEq)]
pub enum PartitionError {
    #[error("Zone grid is empty")]
    Empty,

    #[error("Identifier set does not match the zones present in the grid ({declared} declared, {found} found)")]
    IdMismatch { declared: usize, found: usize },
}

/// The SLM surface split into zones: one zone identifier per pixel plus the
/// set of distinct identifiers.
///
/// Once built a partition is immutable; it is shared with the optimiser
/// through an `Arc` rather than copied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PartitionWire", into = "PartitionWire")]
pub struct ZonePartition {
    zones: Array2<ZoneId>,
    ids: BTreeSet<ZoneId>,
}

/// Wire form of a partition: `(zoneGrid, distinctZoneIDs)` in that order.
#[derive(Serialize, Deserialize)]
struct PartitionWire {
    zones: Array2<ZoneId>,
    ids: Vec<ZoneId>,
}

impl ZonePartition {
    /// Build a partition from a `(resY, resX)` zone grid, collecting the
    /// distinct identifiers.
    pub fn from_grid(zones: Array2<ZoneId>) -> Result<Self, PartitionError> {
        if zones.is_empty() {
            return Err(PartitionError::Empty);
        }
        let ids = zones.iter().copied().collect();
        Ok(Self { zones, ids })
    }

    /// Rebuild a partition from its two parts, checking that `ids` is exactly
    /// the set of identifiers present in `zones`.
    pub fn from_parts(zones: Array2<ZoneId>, ids: Vec<ZoneId>) -> Result<Self, PartitionError> {
        let partition = Self::from_grid(zones)?;
        let declared: BTreeSet<ZoneId> = ids.into_iter().collect();
        if declared != partition.ids {
            return Err(PartitionError::IdMismatch {
                declared: declared.len(),
                found: partition.ids.len(),
            });
        }
        Ok(partition)
    }

    /// Zone identifier grid, shape `(resY, resX)`.
    pub fn zones(&self) -> &Array2<ZoneId> {
        &self.zones
    }

    /// Distinct zone identifiers.
    pub fn ids(&self) -> &BTreeSet<ZoneId> {
        &self.ids
    }

    /// Distinct zone identifiers in ascending order.
    pub fn ids_list(&self) -> Vec<ZoneId> {
        self.ids.iter().copied().collect()
    }

    pub fn contains(&self, id: ZoneId) -> bool {
        self.ids.contains(&id)
    }

    pub fn res_x(&self) -> usize {
        self.zones.ncols()
    }

    pub fn res_y(&self) -> usize {
        self.zones.nrows()
    }

    /// Number of pixels assigned to `id`.
    pub fn zone_area(&self, id: ZoneId) -> usize {
        self.zones.iter().filter(|&&z| z == id).count()
    }
}

impl TryFrom<PartitionWire> for ZonePartition {
    type Error = PartitionError;

    fn try_from(wire: PartitionWire) -> Result<Self, Self::Error> {
        Self::from_parts(wire.zones, wire.ids)
    }
}

impl From<ZonePartition> for PartitionWire {
    fn from(partition: ZonePartition) -> Self {
        let ids = partition.ids_list();
        Self {
            zones: partition.zones,
            ids,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_distinct_ids_collapse_duplicates() {
        let grid = array![[3, 3, 7], [7, 1, 3]];
        let partition = ZonePartition::from_grid(grid).unwrap();
        assert_eq!(partition.ids_list(), vec![1, 3, 7]);
        assert!(partition.ids().len() <= partition.res_x() * partition.res_y());
        assert_eq!(partition.zone_area(3), 3);
    }

    #[test]
    fn test_from_parts_rejects_wrong_ids() {
        let grid = array![[1, 2], [2, 2]];
        let err = ZonePartition::from_parts(grid, vec![1, 2, 5]).unwrap_err();
        assert_eq!(err, PartitionError::IdMismatch { declared: 3, found: 2 });
    }

    #[test]
    fn test_partition_json_round_trip_keeps_ids() {
        let partition = ZonePartition::from_grid(array![[4, 9], [9, 9]]).unwrap();
        let json = serde_json::to_string(&partition).unwrap();
        assert!(json.contains("\"ids\":[4,9]"));
        let back: ZonePartition = serde_json::from_str(&json).unwrap();
        assert_eq!(back, partition);
    }

    #[test]
    fn test_settings_defaults_from_empty_object() {
        let settings: SlmSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, SlmSettings::default());
        assert_eq!(settings.phase_correction, 255.0);
    }
}
