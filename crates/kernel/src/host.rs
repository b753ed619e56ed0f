//! Host compute backend.
//!
//! Every stage is one data-parallel pass over the particle arrays, executed
//! on the rayon pool of a shared [`ComputeContext`]. Stages are synchronous,
//! so [`ComputeBackend::finish`] has nothing left to wait for.

use std::sync::Arc;

use rayon::prelude::*;

use crate::density::compute_densities;
use crate::device::{timed, ComputeBackend, ComputeContext, Stage, StepProfile};
use crate::error::{SimError, SimResult};
use crate::forces::compute_forces;
use crate::integrate::{integrate, IntegrationStep, Scheme};
use crate::interop::{BufferId, BufferOwner, GraphicsInterop, Headless, SharedBufferHandles};
use crate::neighbor::HashGrid;
use crate::params::{KernelSet, SimulationParams};
use crate::particle::{ParticleBuffers, Vec4};

/// Runs simulation stages on host threads.
pub struct HostBackend {
    ctx: Arc<ComputeContext>,
    particles: ParticleBuffers,
    /// Leapfrog half-step velocities.
    half_velocity: Vec<Vec4>,
    half_valid: bool,
    grid: HashGrid,
    kernels: Option<KernelSet>,
    interop: Box<dyn GraphicsInterop>,
    handles: SharedBufferHandles,
    owner: BufferOwner,
    profile: StepProfile,
}

impl HostBackend {
    /// Take ownership of `particles` and size the hash grid for them.
    pub fn new(ctx: Arc<ComputeContext>, particles: ParticleBuffers, params: &SimulationParams) -> SimResult<Self> {
        params.validate()?;
        if !particles.is_consistent() {
            return Err(SimError::Setup("particle arrays differ in length".into()));
        }
        let n = particles.len();
        let capacity = params.cell_capacity(n);
        if (capacity as usize) < n {
            tracing::warn!(capacity, particles = n, "hash table smaller than particle count; expect long runs");
        }
        tracing::info!(particles = n, capacity, threads = ctx.threads(), "host backend ready");
        Ok(Self {
            ctx,
            half_velocity: vec![[0.0; 4]; n],
            half_valid: false,
            grid: HashGrid::new(n, params.smoothing_radius, capacity),
            particles,
            kernels: None,
            interop: Box::new(Headless),
            handles: SharedBufferHandles {
                position: BufferId(0),
                velocity: BufferId(1),
            },
            owner: BufferOwner::Graphics,
            profile: StepProfile::default(),
        })
    }

    /// Attach renderer hooks.
    pub fn with_interop(mut self, interop: Box<dyn GraphicsInterop>) -> Self {
        self.interop = interop;
        self
    }

    /// Use renderer-assigned buffer ids.
    pub fn with_handles(mut self, handles: SharedBufferHandles) -> Self {
        self.handles = handles;
        self
    }

    /// Ids of the shared buffers.
    pub fn shared_handles(&self) -> SharedBufferHandles {
        self.handles
    }

    /// Current owner of the shared buffers.
    pub fn owner(&self) -> BufferOwner {
        self.owner
    }

    /// Positions for drawing. Only meaningful while the graphics side owns them.
    pub fn positions(&self) -> &[Vec4] {
        &self.particles.position
    }

    /// Velocities for drawing.
    pub fn velocities(&self) -> &[Vec4] {
        &self.particles.velocity
    }

    /// Densities from the last density stage.
    pub fn densities(&self) -> &[f32] {
        &self.particles.density
    }

    /// All particle arrays.
    pub fn particles(&self) -> &ParticleBuffers {
        &self.particles
    }

    /// Hash grid tables from the last rebuild.
    pub fn grid(&self) -> &HashGrid {
        &self.grid
    }

    /// Whether the half-step velocity buffer holds a valid leapfrog state.
    pub fn half_step_valid(&self) -> bool {
        self.half_valid
    }

    fn first_non_finite(&self) -> Option<usize> {
        self.particles
            .position
            .par_iter()
            .zip(self.particles.velocity.par_iter())
            .position_first(|(x, v)| x[..3].iter().chain(&v[..3]).any(|c| !c.is_finite()))
    }
}

impl ComputeBackend for HostBackend {
    fn label(&self) -> &str {
        "host"
    }

    fn particle_count(&self) -> usize {
        self.particles.len()
    }

    fn bind_kernels(&mut self, kernels: &KernelSet) -> SimResult<()> {
        if self.owner == BufferOwner::Compute {
            return Err(SimError::build("bind", "cannot rebind kernels during a step"));
        }
        self.grid.set_cell_size(kernels.h());
        self.kernels = Some(*kernels);
        tracing::debug!(h = kernels.h(), mass = kernels.particle_mass, eos = kernels.eos.name(), "kernels bound");
        Ok(())
    }

    fn acquire_shared(&mut self) -> SimResult<()> {
        if self.owner == BufferOwner::Compute {
            return Err(SimError::Interop("shared buffers already acquired".into()));
        }
        self.interop.acquire(&self.handles)?;
        self.owner = BufferOwner::Compute;
        self.profile.clear();
        Ok(())
    }

    fn release_shared(&mut self) -> SimResult<()> {
        if self.owner == BufferOwner::Graphics {
            return Ok(());
        }
        self.owner = BufferOwner::Graphics;
        self.interop.release(&self.handles)
    }

    fn dispatch(&mut self, stage: Stage) -> SimResult<()> {
        let name = stage.name();
        if self.owner != BufferOwner::Compute {
            return Err(SimError::BuffersNotAcquired { stage: name });
        }
        let kernels = self.kernels.ok_or_else(|| SimError::build(name, "no kernel set bound"))?;

        if let Stage::Integrate(IntegrationStep { scheme: Scheme::LeapfrogStep, .. }) = stage {
            if !self.half_valid {
                return Err(SimError::StaleHalfStep);
            }
        }

        let Self {
            ctx,
            particles,
            half_velocity,
            grid,
            profile,
            ..
        } = self;
        timed(profile, name, || {
            ctx.run(name, || match stage {
                Stage::CellIndex => grid.compute_cell_indices(&particles.position),
                Stage::ClearOffsets => grid.clear_offsets(),
                Stage::Sort => grid.sort(),
                Stage::CalcOffsets => grid.calc_offsets(),
                Stage::Density => compute_densities(grid, &kernels, &particles.position, &mut particles.density),
                Stage::Forces => compute_forces(
                    grid,
                    &kernels,
                    &particles.position,
                    &particles.velocity,
                    &particles.density,
                    &mut particles.force,
                ),
                Stage::Integrate(step) => integrate(
                    step,
                    &kernels,
                    &mut particles.position,
                    &mut particles.velocity,
                    half_velocity,
                    &particles.force,
                ),
            })
        })?;

        if let Stage::Integrate(step) = stage {
            match step.scheme {
                Scheme::SymplecticEuler => self.half_valid = false,
                Scheme::LeapfrogStart | Scheme::LeapfrogStep => self.half_valid = true,
            }
            if kernels.check_finite {
                if let Some(particle) = self.first_non_finite() {
                    return Err(SimError::NonFinite { stage: name, particle });
                }
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> SimResult<()> {
        Ok(())
    }

    fn read_densities(&mut self) -> SimResult<Vec<f32>> {
        Ok(self.particles.density.clone())
    }

    fn read_particles(&mut self) -> SimResult<ParticleBuffers> {
        Ok(self.particles.clone())
    }

    fn invalidate_half_step(&mut self) {
        self.half_valid = false;
    }

    fn profile(&self) -> &StepProfile {
        &self.profile
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(positions: &[[f32; 3]], params: &SimulationParams) -> HostBackend {
        let ctx = ComputeContext::new(Some(2)).unwrap();
        let mut b = HostBackend::new(ctx, ParticleBuffers::from_positions(positions, [0.0; 3]), params).unwrap();
        b.bind_kernels(&KernelSet::build(params).unwrap()).unwrap();
        b
    }

    #[test]
    fn stages_fill_densities_and_forces() {
        let params = SimulationParams::default();
        let mut b = backend(&[[0.0; 3], [0.4, 0.0, 0.0]], &params);
        b.acquire_shared().unwrap();
        for stage in Stage::GRID_BUILD {
            b.dispatch(stage).unwrap();
        }
        b.dispatch(Stage::Density).unwrap();
        b.dispatch(Stage::Forces).unwrap();
        b.release_shared().unwrap();
        assert!(b.densities().iter().all(|&d| d > 0.0));
        assert!(b.particles().force[0][0] != 0.0);
        assert_eq!(b.profile().stages.len(), 6);
    }

    #[test]
    fn non_finite_state_is_reported() {
        let params = SimulationParams::default();
        let mut b = backend(&[[0.0; 3]], &params);
        b.particles.force[0] = [f32::NAN, 0.0, 0.0, 0.0];
        b.acquire_shared().unwrap();
        let step = IntegrationStep { scheme: Scheme::SymplecticEuler, dt: 0.01 };
        match b.dispatch(Stage::Integrate(step)) {
            Err(SimError::NonFinite { stage, particle }) => {
                assert_eq!(stage, "integrate");
                assert_eq!(particle, 0);
            }
            other => panic!("expected NonFinite, got {other:?}"),
        }
    }

    #[test]
    fn leapfrog_start_validates_half_step() {
        let params = SimulationParams::default();
        let mut b = backend(&[[0.0; 3]], &params);
        assert!(!b.half_step_valid());
        b.acquire_shared().unwrap();
        let start = IntegrationStep { scheme: Scheme::LeapfrogStart, dt: 0.01 };
        b.dispatch(Stage::Integrate(start)).unwrap();
        assert!(b.half_step_valid());
        b.invalidate_half_step();
        let step = IntegrationStep { scheme: Scheme::LeapfrogStep, dt: 0.01 };
        assert!(matches!(b.dispatch(Stage::Integrate(step)), Err(SimError::StaleHalfStep)));
    }

    #[test]
    fn rebind_during_step_rejected() {
        let params = SimulationParams::default();
        let mut b = backend(&[[0.0; 3]], &params);
        b.acquire_shared().unwrap();
        assert!(b.bind_kernels(&KernelSet::build(&params).unwrap()).is_err());
    }

    #[test]
    fn mismatched_arrays_rejected() {
        let mut particles = ParticleBuffers::zeroed(3);
        particles.density.pop();
        let ctx = ComputeContext::new(Some(1)).unwrap();
        assert!(matches!(
            HostBackend::new(ctx, particles, &SimulationParams::default()),
            Err(SimError::Setup(_))
        ));
    }
}
