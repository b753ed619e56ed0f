//! Reference scenarios run through `cargo test`.

use crate::{
    validate_containment, validate_density, ContainmentCheck, DensityCheck, ExpectedResult, MomentumCheck,
    ReferenceTest, SpeedCheck,
};
use sph_kernel::ParticleBuffers;

/// Resolve a path relative to the workspace root (one level up from this crate)
fn project_path(relative: &str) -> String {
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    let project_root = std::path::Path::new(manifest_dir)
        .parent()
        .expect("Could not find workspace root");
    project_root.join(relative).to_string_lossy().to_string()
}

fn all_checks(momentum: Option<f32>) -> ExpectedResult {
    ExpectedResult {
        containment: Some(ContainmentCheck { tolerance: 1e-4 }),
        momentum: momentum.map(|max_mean_velocity| MomentumCheck { max_mean_velocity }),
        density: Some(DensityCheck { max_mean_error: 0.01 }),
        speed: Some(SpeedCheck { max_speed: 50.0 }),
    }
}

fn assert_passed(test: ReferenceTest) {
    let result = test.run().expect("scenario should run");
    result.print_summary();
    for check in &result.checks {
        assert!(check.passed, "{}: {:?}", check.name, check.message);
    }
    assert!(result.passed);
}

#[test]
fn cube_relaxation() {
    assert_passed(ReferenceTest {
        name: "Cube 512 Relaxation".to_string(),
        config_path: project_path("configs/cube-512.json"),
        steps: None,
        expected: all_checks(Some(1e-3)),
    });
}

#[test]
fn leapfrog_lattice_short_run() {
    let test = ReferenceTest {
        name: "Lattice 1000 Leapfrog".to_string(),
        config_path: project_path("configs/lattice-1000.json"),
        steps: Some(40),
        expected: all_checks(Some(1e-2)),
    };
    let result = test.run().unwrap();
    assert!(result.passed, "{:?}", result.checks);
    assert_eq!(result.steps, 40);
    assert_eq!(result.diagnostics.particle_count, 1000);
    assert!((result.sim_time - 0.04).abs() < 1e-6);
}

#[test]
fn drifting_sheet_short_run() {
    assert_passed(ReferenceTest {
        name: "Drifting Sheet".to_string(),
        config_path: project_path("configs/sheet-square.json"),
        steps: Some(30),
        expected: all_checks(None),
    });
}

#[test]
fn missing_config_fails_to_run() {
    let test = ReferenceTest {
        name: "Missing".to_string(),
        config_path: project_path("configs/does-not-exist.json"),
        steps: Some(1),
        expected: ExpectedResult::default(),
    };
    assert!(test.run().is_err());
}

#[test]
fn containment_flags_escaped_and_non_finite_particles() {
    let mut particles = ParticleBuffers::from_positions(&[[0.0, 0.0, 0.0], [1.0, 0.5, -0.5]], [0.0; 3]);
    let check = ContainmentCheck { tolerance: 1e-4 };
    assert!(validate_containment(&particles, 2.0, &check).passed);

    particles.position[1][0] = 2.5;
    assert!(!validate_containment(&particles, 2.0, &check).passed);

    particles.position[1][0] = f32::NAN;
    assert!(!validate_containment(&particles, 2.0, &check).passed);
}

#[test]
fn density_check_is_relative() {
    let check = DensityCheck { max_mean_error: 0.01 };
    assert!(validate_density(4.02, 4.0, &check).passed);
    assert!(!validate_density(4.1, 4.0, &check).passed);
}
