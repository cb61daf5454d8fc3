//! Integration test: precompressed-air ("Nomad") shots.
//!
//! 5.8 bar absolute in a 17.4 mL chamber behind a valve, 5 mL of barrel air
//! behind a 1.2 g dart, 300 mm barrel. Checks:
//! - valve sequence and muzzle numbers
//! - merged-gas bounds (energy, expansion trend)
//! - sensitivity to charge pressure
//! - event placement at coarse steps
//! - stalls, divergence and sweeps

use ag_sim::{
    Completion, Friction, Phase, PrecompressedAirConfig, SimError, SweepDefinition,
    SweepParameter, SweepType, ValveLaw, precompressed, run_sweep,
};

fn default_shot() -> ag_sim::ResultSeries {
    precompressed::simulate(&PrecompressedAirConfig::default())
        .expect("default shot should run")
}

#[test]
fn default_shot_runs_through_the_valve_phases() {
    let series = default_shot();

    assert_eq!(series.completion, Completion::Finished);
    assert_eq!(
        series.phase_sequence(),
        vec![
            Phase::Compressing,
            Phase::ValveOpen,
            Phase::Expanding,
            Phase::Exited
        ]
    );

    let config = PrecompressedAirConfig::default();
    let crack = &series.events[0];
    let expected = config.valve.crack_fraction * config.valve.opening_time_s;
    assert!((crack.time_s - expected).abs() < 1e-12);
    let full_lift = &series.events[1];
    assert!((full_lift.time_s - config.valve.opening_time_s).abs() < 1e-12);

    let v = series.summary.muzzle_velocity_mps.expect("dart exits");
    assert!(v > 70.0 && v < 95.0, "muzzle velocity {v}");
    let eff = series.summary.efficiency.unwrap();
    assert!(eff > 0.4 && eff < 1.0, "efficiency {eff}");
}

#[test]
fn peak_pressure_is_the_charge_pressure() {
    let series = default_shot();
    assert_eq!(series.summary.peak_pressure_pa, 583_633.0);
    assert_eq!(series.summary.peak_piston_velocity_mps, None);
}

#[test]
fn valve_open_snapshot_shows_merged_gas() {
    let series = default_shot();
    let open = series
        .snapshots
        .iter()
        .find(|s| s.phase == Phase::ValveOpen)
        .expect("valve-open snapshot");
    // P·V of chamber plus barrel air, spread over both volumes.
    let expected = (583_633.0 * 1.74e-5 + 101_325.0 * 0.5e-5) / 2.24e-5;
    assert!((open.pressure_pa - expected).abs() < 1e-6 * expected);
    assert!(open.valve_lift.unwrap() > 0.0);
}

#[test]
fn kinetic_energy_bounded_by_stored_energy() {
    let config = PrecompressedAirConfig::default();
    let series = precompressed::simulate(&config).unwrap();
    let stored = series.summary.stored_energy_j;
    for snap in &series.snapshots {
        assert!(snap.pressure_pa > 0.0 && snap.volume_m3 > 0.0);
        let ke = 0.5 * config.projectile_mass_kg * snap.projectile.velocity_mps.powi(2);
        assert!(ke <= stored * 1.001, "kinetic energy {ke} exceeds stored {stored}");
    }
}

#[test]
fn pressure_falls_while_expanding() {
    let series = default_shot();
    let expanding: Vec<_> = series
        .snapshots
        .iter()
        .filter(|s| s.phase == Phase::Expanding)
        .collect();
    assert!(expanding.len() > 10);
    for pair in expanding.windows(2) {
        assert!(pair[1].volume_m3 >= pair[0].volume_m3);
        assert!(pair[1].pressure_pa <= pair[0].pressure_pa);
    }
}

#[test]
fn doubling_charge_pressure_raises_energy() {
    let base = PrecompressedAirConfig::default();
    let doubled = PrecompressedAirConfig {
        chamber_pressure_pa: base.chamber_pressure_pa * 2.0,
        ..base.clone()
    };
    let a = precompressed::simulate(&base).unwrap().summary;
    let b = precompressed::simulate(&doubled).unwrap().summary;
    assert!(b.muzzle_energy_j.unwrap() > a.muzzle_energy_j.unwrap());
}

#[test]
fn repeated_runs_are_identical() {
    let config = PrecompressedAirConfig {
        valve: ag_sim::ValveConfig {
            law: ValveLaw::Quadratic,
            ..Default::default()
        },
        ..PrecompressedAirConfig::default()
    };
    assert_eq!(
        precompressed::simulate(&config).unwrap(),
        precompressed::simulate(&config).unwrap()
    );
}

#[test]
fn weak_charge_stalls_in_the_barrel() {
    let config = PrecompressedAirConfig {
        chamber_pressure_pa: 150_000.0,
        ..PrecompressedAirConfig::default()
    };
    let series = precompressed::simulate(&config).unwrap();
    assert_eq!(series.summary.final_phase, Phase::Stopped);
    assert_eq!(series.summary.muzzle_velocity_mps, None);
    assert!(series.summary.total_time_s < config.numerics.t_end);
    let last = series.snapshots.last().unwrap();
    assert!(last.projectile.position_m < config.barrel_length_m);
}

#[test]
fn coarse_step_diverges() {
    let mut config = PrecompressedAirConfig::default();
    config.numerics.dt = 0.01;
    let err = precompressed::simulate(&config).unwrap_err();
    assert!(
        matches!(err, SimError::NumericalDivergence { .. }),
        "unexpected: {err:?}"
    );
}

#[test]
fn coarse_step_still_exits_at_the_muzzle() {
    let fine = default_shot().summary;
    let mut config = PrecompressedAirConfig::default();
    config.numerics.dt = 1e-5;
    let series = precompressed::simulate(&config).unwrap();

    assert_eq!(
        series.phase_sequence(),
        vec![
            Phase::Compressing,
            Phase::ValveOpen,
            Phase::Expanding,
            Phase::Exited
        ]
    );
    let exit = series.snapshots.last().unwrap();
    assert_eq!(exit.phase, Phase::Exited);
    assert!(
        (exit.projectile.position_m - config.barrel_length_m).abs() < 1e-8,
        "exit at {}",
        exit.projectile.position_m
    );
    let (a, b) = (
        fine.muzzle_velocity_mps.unwrap(),
        series.summary.muzzle_velocity_mps.unwrap(),
    );
    assert!((a - b).abs() / a < 0.01, "dt 1us {a} vs dt 10us {b}");
}

#[test]
fn one_second_step_never_reports_a_wrong_exit() {
    let mut config = PrecompressedAirConfig {
        projectile_friction: Friction::NONE,
        ..PrecompressedAirConfig::default()
    };
    config.numerics.dt = 1.0;
    config.numerics.t_end = 1.0;

    match precompressed::simulate(&config) {
        Err(SimError::NumericalDivergence { last_state, .. }) => {
            assert!(last_state.is_finite());
        }
        Ok(series) => {
            let exit = series.snapshots.last().unwrap();
            assert_eq!(exit.phase, Phase::Exited);
            assert!((exit.projectile.position_m - config.barrel_length_m).abs() < 1e-6);
        }
        Err(other) => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn pressure_sweep_is_monotone() {
    let definition = SweepDefinition::new(
        SweepParameter::ChargePressure,
        3e5,
        9e5,
        4,
        SweepType::Linear,
    )
    .unwrap();
    let result = run_sweep(&PrecompressedAirConfig::default(), &definition).unwrap();

    assert_eq!(result.points.len(), 4);
    let energies: Vec<f64> = result
        .successes()
        .map(|(_, s)| s.muzzle_energy_j.expect("exits"))
        .collect();
    assert_eq!(energies.len(), 4);
    assert!(energies.windows(2).all(|w| w[1] > w[0]));
}

#[test]
fn sweep_rejects_foreign_parameter() {
    let definition =
        SweepDefinition::new(SweepParameter::SpringRate, 500.0, 900.0, 3, SweepType::Linear)
            .unwrap();
    assert!(matches!(
        run_sweep(&PrecompressedAirConfig::default(), &definition),
        Err(SimError::Configuration { .. })
    ));
}
