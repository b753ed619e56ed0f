//! GPU vs host parity.
//!
//! Runs the same lattice on `HostBackend` and `GpuBackend` and compares grid
//! tables, densities and positions. Skipped at runtime when no adapter is
//! present.

#![cfg(feature = "gpu")]

use sph_kernel::{
    gpu_available, ComputeContext, GpuBackend, HostBackend, IntegratorKind, ParticleBuffers, Simulation,
    SimulationParams,
};

fn lattice(side: usize, spacing: f32) -> ParticleBuffers {
    let half = 0.5 * (side - 1) as f32 * spacing;
    let mut positions = Vec::new();
    for z in 0..side {
        for y in 0..side {
            for x in 0..side {
                // Slight shear so the sort sees non-trivial keys.
                let jitter = 0.01 * ((x * 7 + y * 3 + z) % 5) as f32;
                positions.push([
                    x as f32 * spacing - half + jitter,
                    y as f32 * spacing - half,
                    z as f32 * spacing - half - jitter,
                ]);
            }
        }
    }
    ParticleBuffers::from_positions(&positions, [0.0; 3])
}

fn params(integrator: IntegratorKind) -> SimulationParams {
    SimulationParams {
        smoothing_radius: 0.5,
        rest_density: 4.0,
        stiffness: 50.0,
        viscosity: 0.1,
        box_half_size: 2.0,
        time_step: 0.001,
        integrator,
        ..Default::default()
    }
}

fn relative(a: f32, b: f32) -> f32 {
    (a - b).abs() / a.abs().max(b.abs()).max(1.0e-6)
}

#[test]
fn grid_tables_and_densities_match() {
    if !gpu_available() {
        eprintln!("no GPU adapter; skipping");
        return;
    }
    let particles = lattice(9, 0.38);
    let params = params(IntegratorKind::SymplecticEuler);

    let ctx = ComputeContext::new(None).unwrap();
    let mut host = Simulation::new(HostBackend::new(ctx, particles.clone(), &params).unwrap(), params.clone()).unwrap();
    let mut gpu = Simulation::new(GpuBackend::new(&particles, &params).unwrap(), params.clone()).unwrap();

    let host_rho = host.estimate_densities().unwrap();
    let gpu_rho = gpu.estimate_densities().unwrap();

    let (cells, sorted, offsets) = gpu.backend().read_tables().unwrap();
    let grid = host.backend().grid();
    assert_eq!(cells, grid.cell_index_of());
    assert_eq!(sorted, grid.particle_index());
    assert_eq!(offsets, grid.offsets());

    for (i, (a, b)) in host_rho.iter().zip(&gpu_rho).enumerate() {
        assert!(relative(*a, *b) < 1.0e-4, "density {i}: host {a}, gpu {b}");
    }
}

#[test]
fn trajectories_match_for_both_integrators() {
    if !gpu_available() {
        eprintln!("no GPU adapter; skipping");
        return;
    }
    for kind in [IntegratorKind::SymplecticEuler, IntegratorKind::Leapfrog] {
        let particles = lattice(8, 0.38);
        let params = params(kind);
        let ctx = ComputeContext::new(None).unwrap();
        let mut host =
            Simulation::new(HostBackend::new(ctx, particles.clone(), &params).unwrap(), params.clone()).unwrap();
        let mut gpu = Simulation::new(GpuBackend::new(&particles, &params).unwrap(), params.clone()).unwrap();

        for _ in 0..5 {
            host.update().unwrap();
            gpu.update().unwrap();
        }
        let a = host.snapshot().unwrap();
        let b = gpu.snapshot().unwrap();
        for (i, (x, y)) in a.position.iter().zip(&b.position).enumerate() {
            for k in 0..3 {
                assert!((x[k] - y[k]).abs() < 1.0e-4, "{kind:?} particle {i} axis {k}: {} vs {}", x[k], y[k]);
            }
        }
    }
}

#[test]
fn unacquired_dispatch_is_rejected() {
    use sph_kernel::{ComputeBackend, SimError, Stage};

    if !gpu_available() {
        return;
    }
    let particles = lattice(2, 0.3);
    let params = params(IntegratorKind::SymplecticEuler);
    let mut gpu = GpuBackend::new(&particles, &params).unwrap();
    let err = gpu.dispatch(Stage::Density).unwrap_err();
    assert!(matches!(err, SimError::BuffersNotAcquired { stage: "density" }));
}

#[test]
fn empty_set_runs_leapfrog_like_host() {
    if !gpu_available() {
        return;
    }
    let params = params(IntegratorKind::Leapfrog);
    let empty = ParticleBuffers::default();
    let ctx = ComputeContext::new(Some(1)).unwrap();
    let mut host = Simulation::new(HostBackend::new(ctx, empty.clone(), &params).unwrap(), params.clone()).unwrap();
    let mut gpu = Simulation::new(GpuBackend::new(&empty, &params).unwrap(), params.clone()).unwrap();

    for _ in 0..3 {
        host.update().unwrap();
        gpu.update().unwrap();
    }
    assert!(!gpu.is_poisoned());
    assert_eq!(gpu.iteration(), host.iteration());
    assert!(gpu.backend().half_step_valid());
    assert_eq!(gpu.snapshot().unwrap().len(), 0);
}

#[test]
fn backends_share_one_context() {
    use sph_kernel::GpuContext;

    if !gpu_available() {
        return;
    }
    let ctx = GpuContext::new().unwrap();
    let params = params(IntegratorKind::SymplecticEuler);
    let particles = lattice(3, 0.3);
    let mut a = Simulation::new(
        GpuBackend::with_context(ctx.clone(), &particles, &params).unwrap(),
        params.clone(),
    )
    .unwrap();
    let mut b = Simulation::new(GpuBackend::with_context(ctx, &particles, &params).unwrap(), params).unwrap();
    assert!(std::sync::Arc::ptr_eq(a.backend().context(), b.backend().context()));

    a.update().unwrap();
    b.update().unwrap();
    assert_eq!(a.snapshot().unwrap().position, b.snapshot().unwrap().position);
}
