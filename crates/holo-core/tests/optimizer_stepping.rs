//! Integration tests for the step-driven wavefront optimiser.
//!
//! Frames are collected through a channel-backed sink; every test paces the
//! optimiser the way a remote client does: receive a frame, then ask for the
//! next one.

use std::sync::Arc;
use std::time::Duration;

use approx::assert_relative_eq;
use crossbeam_channel::{unbounded, Receiver};
use holo_compute::SerialBackend;
use ndarray::Array2;

use holo_core::optimizer::{GratingSpec, OptimizerError, WavefrontOptimizer};
use holo_core::pattern::PatternGenerator;
use holo_core::remote::{Body, RemoteControl};
use holo_core::types::{GratingParameters, SlmSettings, ZoneId, ZonePartition};

// ─────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────

const RES_X: usize = 16;
const RES_Y: usize = 8;
const TIMEOUT: Duration = Duration::from_secs(5);

type Frame = (Array2<f64>, f64);

fn settings() -> SlmSettings {
    SlmSettings {
        res_x: RES_X,
        res_y: RES_Y,
        wavelength_nm: 800.0,
        pixel_pitch_um: 12.5,
        phase_correction: 255.0,
    }
}

/// Four vertical bands, zones 1..=4.
fn zones() -> Array2<ZoneId> {
    Array2::from_shape_fn((RES_Y, RES_X), |(_, j)| (j / 4) as ZoneId + 1)
}

fn offset_grating() -> GratingSpec {
    GratingSpec::new(20.0, 0.0)
}

fn interference_grating() -> GratingSpec {
    GratingSpec::new(35.0, 0.25)
}

fn ready_optimizer() -> (Arc<WavefrontOptimizer>, Receiver<Frame>) {
    let (tx, rx) = unbounded();
    let sink = move |frame: &Array2<f64>, phase: f64| {
        let _ = tx.send((frame.clone(), phase));
    };
    let opt = WavefrontOptimizer::new(
        settings(),
        PatternGenerator::new(Arc::new(SerialBackend)),
        Arc::new(sink),
    );
    opt.set_partition(Arc::new(ZonePartition::from_grid(zones()).unwrap()))
        .unwrap();
    opt.activate(offset_grating(), interference_grating());
    opt.set_reference_zone(1).unwrap();
    opt.set_probe_zone(2).unwrap();
    (Arc::new(opt), rx)
}

fn recv(rx: &Receiver<Frame>) -> Frame {
    rx.recv_timeout(TIMEOUT).expect("optimiser produced no frame")
}

fn grating(spec: GratingSpec) -> Array2<f64> {
    let params = GratingParameters {
        wavelength_nm: 800.0,
        pixel_pitch_um: 12.5,
        lines_per_mm: spec.lines_per_mm,
        angle_rad: spec.angle_pi * std::f64::consts::PI,
    };
    PatternGenerator::default()
        .generate_grating(&params, RES_X, RES_Y)
        .unwrap()
}

// ─────────────────────────────────────────────────────────────
// Run to completion
// ─────────────────────────────────────────────────────────────

#[test]
fn test_full_run_phase_sequence() {
    let (opt, rx) = ready_optimizer();
    opt.set_phase_step(10.0).unwrap();
    opt.start().unwrap();

    let mut phases = Vec::new();
    loop {
        let (_, phase) = recv(&rx);
        phases.push(phase);
        if !opt.is_running() {
            break;
        }
        opt.next_step();
    }
    opt.join();

    // 0, 10, ..., 250; the next phase (260) exceeds 255
    let expected: Vec<f64> = (0..26).map(|k| k as f64 * 10.0).collect();
    assert_eq!(phases, expected);
    assert_eq!(opt.frames_produced(), 26);
    assert!(!opt.is_running());
    assert_eq!(opt.report().phase, None);
}

#[test]
fn test_resumes_from_preset_phase() {
    let (opt, rx) = ready_optimizer();
    opt.set_phase(200.0).unwrap();
    opt.set_phase_step(25.0).unwrap();
    opt.start().unwrap();

    let mut phases = Vec::new();
    loop {
        let (_, phase) = recv(&rx);
        phases.push(phase);
        if !opt.is_running() {
            break;
        }
        opt.next_step();
    }
    assert_eq!(phases, vec![200.0, 225.0, 250.0]);
}

#[test]
fn test_default_phase_step_is_tenth_of_range() {
    let (opt, rx) = ready_optimizer();
    opt.start().unwrap();
    recv(&rx);
    assert_eq!(opt.phase_step(), Some(25.5));
    assert_eq!(opt.report().phase, Some(25.5));
    opt.stop();
    opt.join();
}

// ─────────────────────────────────────────────────────────────
// Frame contents
// ─────────────────────────────────────────────────────────────

#[test]
fn test_consecutive_frames_differ_in_probe_zone_only() {
    let (opt, rx) = ready_optimizer();
    opt.start().unwrap();
    let (first, _) = recv(&rx);
    opt.next_step();
    let (second, _) = recv(&rx);
    opt.stop();
    opt.join();

    let zones = zones();
    for ((idx, a), b) in first.indexed_iter().zip(second.iter()) {
        if zones[idx] == 2 {
            assert_ne!(a, b, "probe pixel {:?} should change", idx);
        } else {
            assert_eq!(a.to_bits(), b.to_bits(), "pixel {:?} should be untouched", idx);
        }
    }
}

#[test]
fn test_first_frame_layout() {
    let (opt, rx) = ready_optimizer();
    opt.start().unwrap();
    let (frame, phase) = recv(&rx);
    opt.stop();
    opt.join();

    assert_eq!(phase, 0.0);
    let offset = grating(offset_grating());
    let interference = grating(interference_grating());
    for ((idx, &v), &zone) in frame.indexed_iter().zip(zones().iter()) {
        let expected = match zone {
            1 => interference[idx],
            2 => interference[idx].rem_euclid(256.0),
            _ => offset[idx],
        };
        assert_relative_eq!(v, expected, epsilon = 1e-9);
    }
}

#[test]
fn test_probe_change_rebuilds_pattern() {
    let (opt, rx) = ready_optimizer();
    opt.start().unwrap();
    recv(&rx);
    opt.next_step();
    recv(&rx);

    opt.set_probe_zone(3).unwrap();
    opt.next_step();
    let (frame, phase) = recv(&rx);
    opt.stop();
    opt.join();

    assert_eq!(phase, 51.0);
    let offset = grating(offset_grating());
    let interference = grating(interference_grating());
    for ((idx, &v), &zone) in frame.indexed_iter().zip(zones().iter()) {
        match zone {
            2 | 4 => assert_relative_eq!(v, offset[idx], epsilon = 1e-9),
            3 => assert_relative_eq!(v, (interference[idx] + 51.0).rem_euclid(256.0), epsilon = 1e-9),
            _ => assert_relative_eq!(v, interference[idx], epsilon = 1e-9),
        }
    }
}

#[test]
fn test_gratings_generated_once_per_parameter_set() {
    let (opt, rx) = ready_optimizer();
    opt.start().unwrap();
    for _ in 0..3 {
        recv(&rx);
        opt.next_step();
    }
    recv(&rx);
    opt.stop();
    opt.join();
    assert_eq!(opt.grating_generations(), (1, 1));

    opt.activate(GratingSpec::new(40.0, 0.0), interference_grating());
    opt.start().unwrap();
    recv(&rx);
    opt.stop();
    opt.join();
    assert_eq!(opt.grating_generations(), (2, 1));
}

// ─────────────────────────────────────────────────────────────
// Control flow
// ─────────────────────────────────────────────────────────────

#[test]
fn test_second_start_is_a_single_wake() {
    let (opt, rx) = ready_optimizer();
    opt.start().unwrap();
    recv(&rx);

    let report = opt.start().unwrap();
    assert_eq!(report.reference_zone, Some(1));
    recv(&rx);
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    assert_eq!(opt.frames_produced(), 2);
    assert!(opt.is_running());

    opt.stop();
    opt.join();
}

#[test]
fn test_stop_is_idempotent_and_unblocks() {
    let (opt, rx) = ready_optimizer();
    opt.start().unwrap();
    recv(&rx);

    let remote = Arc::clone(&opt);
    std::thread::spawn(move || remote.stop()).join().unwrap();
    opt.stop();
    opt.join();

    assert!(!opt.is_running());
    assert_eq!(opt.report().phase, None);
    opt.next_step();
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
}

#[test]
fn test_restart_after_stop_begins_new_run() {
    let (opt, rx) = ready_optimizer();
    opt.start().unwrap();
    recv(&rx);
    opt.next_step();
    recv(&rx);
    opt.stop();
    opt.start().unwrap();
    let (_, phase) = recv(&rx);
    assert_eq!(phase, 0.0);
    assert_eq!(opt.frames_produced(), 1);
    opt.stop();
    opt.join();
}

#[test]
fn test_failed_start_changes_nothing() {
    let (opt, rx) = ready_optimizer();
    assert!(matches!(
        opt.set_reference_zone(2),
        Err(OptimizerError::SameZones(2))
    ));
    opt.activate(offset_grating(), GratingSpec::new(0.0, 0.0));
    assert!(matches!(opt.start(), Err(OptimizerError::ZeroGratingDensity)));
    assert!(!opt.is_running());
    assert_eq!(opt.report().phase, None);
    assert!(opt.phase_pattern().is_none());
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
}

#[test]
fn test_partition_locked_while_running() {
    let (opt, rx) = ready_optimizer();
    opt.start().unwrap();
    recv(&rx);
    let partition = Arc::new(ZonePartition::from_grid(zones()).unwrap());
    assert!(matches!(
        opt.set_partition(partition),
        Err(OptimizerError::Busy)
    ));
    opt.stop();
    opt.join();
}

// ─────────────────────────────────────────────────────────────
// Remote control
// ─────────────────────────────────────────────────────────────

#[test]
fn test_remote_session() {
    let (opt, rx) = ready_optimizer();
    let remote = RemoteControl::new(Arc::clone(&opt));

    assert_eq!(remote.handle("/optimiser/phasePattern").status, 404);
    assert_eq!(remote.handle("/optimiser/phase/300").status, 400);
    assert_eq!(remote.handle("/optimiser/nowhere").status, 404);

    let ids = remote.handle("/optimiser/IDsList");
    assert_eq!(ids.json().unwrap()["IDsList"], serde_json::json!([1, 2, 3, 4]));

    let started = remote.handle("/optimiser/start");
    assert!(started.is_success());
    assert_eq!(started.json().unwrap()["RefZone"], 1);
    assert_eq!(started.json().unwrap()["ProbZone"], 2);
    recv(&rx);

    let status = remote.handle("/optimiser/refzone");
    assert_eq!(status.json().unwrap()["Optimizer"], true);

    let png = remote.handle("/optimiser/phasePattern");
    match png.body {
        Body::Png(bytes) => assert_eq!(&bytes[..4], b"\x89PNG"),
        Body::Json(v) => panic!("expected PNG, got {}", v),
    }

    let data = remote.handle("/optimiser/phasePatternData");
    let rows = data.json().unwrap()["PhasePattern"].as_array().unwrap().clone();
    assert_eq!(rows.len(), RES_Y);
    assert_eq!(rows[0].as_array().unwrap().len(), RES_X);

    let step = remote.handle("/optimiser/phaseStep/5");
    assert_eq!(step.json().unwrap()["PhaseStep"], 5.0);

    let next = remote.handle("/optimiser/nextStep");
    assert!(next.is_success());
    let (_, phase) = recv(&rx);
    assert_eq!(phase, 25.5);

    assert!(remote.handle("/optimiser/stop").is_success());
    opt.join();
    assert_eq!(remote.handle("/optimiser/phase").json().unwrap()["Phase"], serde_json::Value::Null);
}
