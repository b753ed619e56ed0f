//! Reference test binary entry point
//!
//! Runs every shipped scenario and checks the final state. Run from the
//! workspace root so the `configs/` paths resolve.

use reference_tests::{
    ContainmentCheck, DensityCheck, ExpectedResult, MomentumCheck, ReferenceTest, SpeedCheck, TestResult,
};
use tracing_subscriber::EnvFilter;

/// Symmetric cube at rest: no wall contact, momentum stays at round-off.
fn cube_test() -> ReferenceTest {
    ReferenceTest {
        name: "Cube 512 Relaxation".to_string(),
        config_path: "configs/cube-512.json".to_string(),
        steps: None,
        expected: ExpectedResult {
            containment: Some(ContainmentCheck { tolerance: 1e-4 }),
            momentum: Some(MomentumCheck { max_mean_velocity: 1e-3 }),
            density: Some(DensityCheck { max_mean_error: 0.01 }),
            speed: Some(SpeedCheck { max_speed: 50.0 }),
        },
    }
}

/// Off-center block with the leapfrog integrator and power-law pressure.
fn leapfrog_lattice_test() -> ReferenceTest {
    ReferenceTest {
        name: "Lattice 1000 Leapfrog".to_string(),
        config_path: "configs/lattice-1000.json".to_string(),
        steps: None,
        expected: ExpectedResult {
            containment: Some(ContainmentCheck { tolerance: 1e-4 }),
            momentum: Some(MomentumCheck { max_mean_velocity: 1e-2 }),
            density: Some(DensityCheck { max_mean_error: 0.01 }),
            speed: Some(SpeedCheck { max_speed: 50.0 }),
        },
    }
}

/// Drifting sheet with bounds-checked neighbor search. The drift carries
/// momentum, so only containment and speed are checked.
fn drifting_sheet_test() -> ReferenceTest {
    ReferenceTest {
        name: "Drifting Sheet".to_string(),
        config_path: "configs/sheet-square.json".to_string(),
        steps: None,
        expected: ExpectedResult {
            containment: Some(ContainmentCheck { tolerance: 1e-4 }),
            momentum: None,
            density: Some(DensityCheck { max_mean_error: 0.01 }),
            speed: Some(SpeedCheck { max_speed: 50.0 }),
        },
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("SPH Reference Test Suite");
    println!("{}", "=".repeat(80));

    let tests = vec![cube_test(), leapfrog_lattice_test(), drifting_sheet_test()];

    let mut results: Vec<TestResult> = Vec::new();
    let mut errors = 0;

    for test in &tests {
        match test.run() {
            Ok(result) => {
                result.print_summary();
                results.push(result);
            }
            Err(e) => {
                tracing::error!(name = %test.name, error = %format!("{e:#}"), "reference test failed to run");
                errors += 1;
            }
        }
    }

    let passed_count = results.iter().filter(|r| r.passed).count();
    let failed_count = results.len() - passed_count + errors;

    println!("\n{}", "=".repeat(80));
    println!("OVERALL SUMMARY");
    println!("{}", "=".repeat(80));
    println!("Total tests: {}", tests.len());
    println!("Passed: {}", passed_count);
    println!("Failed: {}", failed_count);
    println!("{}", "=".repeat(80));

    if failed_count > 0 {
        std::process::exit(1);
    }
}
