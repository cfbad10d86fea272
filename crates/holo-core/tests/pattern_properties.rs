//! Property-style checks of the pattern generator and zone partitions.

use std::sync::Arc;

use approx::assert_relative_eq;
use holo_compute::{CpuBackend, SerialBackend};
use ndarray::Array2;

use holo_core::pattern::{PatternError, PatternGenerator};
use holo_core::types::{GratingParameters, LensParameters, ZernikeCoefficientSet, ZonePartition};

const RESOLUTIONS: [(usize, usize); 4] = [(1, 1), (7, 3), (32, 24), (65, 40)];

#[test]
fn test_zero_density_grating_is_zero_for_any_parameters() {
    let mut gen = PatternGenerator::default();
    for &(rx, ry) in &RESOLUTIONS {
        for angle in [0.0, 0.3, -2.0] {
            for pitch in [4.0, 12.5] {
                let params = GratingParameters {
                    wavelength_nm: 633.0,
                    pixel_pitch_um: pitch,
                    lines_per_mm: 0.0,
                    angle_rad: angle,
                };
                let g = gen.generate_grating(&params, rx, ry).unwrap();
                assert_eq!(g.dim(), (ry, rx));
                assert!(g.iter().all(|&v| v == 0.0));
            }
        }
    }
}

#[test]
fn test_zero_focus_equals_unit_focus() {
    let mut gen = PatternGenerator::default();
    for &(rx, ry) in &RESOLUTIONS {
        let zero = gen
            .generate_lens(&LensParameters::new(0.0, 800.0, 12.5), rx, ry)
            .unwrap();
        let one = gen
            .generate_lens(&LensParameters::new(1.0, 800.0, 12.5), rx, ry)
            .unwrap();
        assert_eq!(zero, one);
    }
}

#[test]
fn test_backends_agree_on_lens() {
    let params = LensParameters::new(250.0, 1064.0, 8.0).with_offset(3.0, -2.0);
    let serial = PatternGenerator::new(Arc::new(SerialBackend))
        .generate_lens(&params, 48, 30)
        .unwrap();
    let parallel = PatternGenerator::new(Arc::new(CpuBackend::new()))
        .generate_lens(&params, 48, 30)
        .unwrap();
    for (a, b) in serial.iter().zip(parallel.iter()) {
        assert_relative_eq!(a, b, epsilon = 1e-12);
    }
}

#[test]
fn test_piston_is_constant() {
    let mut gen = PatternGenerator::default();
    let set = ZernikeCoefficientSet {
        coefficients: vec![0.4],
        center_x: 5.0,
        center_y: -3.0,
    };
    let z = gen.generate_zernike(&set, 20, 10).unwrap();
    assert!(z.iter().all(|&v| (v - 102.0).abs() < 1e-9));
}

#[test]
fn test_zernike_order_limit() {
    let mut gen = PatternGenerator::default();
    // Index 231 is the first mode with radial degree 21
    let mut coefficients = vec![0.0; 232];
    coefficients[230] = 0.1;
    let set = ZernikeCoefficientSet {
        coefficients: coefficients.clone(),
        ..Default::default()
    };
    assert!(gen.generate_zernike(&set, 8, 8).is_ok());

    coefficients[231] = 0.1;
    let set = ZernikeCoefficientSet {
        coefficients,
        ..Default::default()
    };
    assert!(matches!(
        gen.generate_zernike(&set, 8, 8),
        Err(PatternError::ZernikeOrderTooHigh { index: 231, n: 21, .. })
    ));
}

#[test]
fn test_distinct_ids_match_grid() {
    for &(rx, ry) in &RESOLUTIONS {
        let grid = Array2::from_shape_fn((ry, rx), |(i, j)| ((i * 7 + j * 3) % 5) as u64);
        let partition = ZonePartition::from_grid(grid.clone()).unwrap();
        let mut unique: Vec<u64> = grid.iter().copied().collect();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(partition.ids_list(), unique);
        assert!(partition.ids().len() <= rx * ry);
    }
}
