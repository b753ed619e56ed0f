//! Simulation driver.
//!
//! Owns the parameters, the bound kernel set and the integrator state, and
//! issues the fixed stage sequence of a step against a [`ComputeBackend`]:
//!
//! ```text
//! acquire -> cell_index -> clear_offsets -> sort -> calc_offsets
//!         -> density -> forces -> integrate -> finish -> release
//! ```
//!
//! A failed step poisons the driver; later calls to [`Simulation::update`]
//! return [`SimError::Poisoned`].

use crate::calibration::{mass_scale, mean_density, CalibrationReport};
use crate::device::{ComputeBackend, Stage, StepProfile};
use crate::diagnostics::Diagnostics;
use crate::error::{SimError, SimResult};
use crate::integrate::{IntegrationStep, IntegratorKind, IntegratorState, Scheme};
use crate::interop::ScopedBufferLease;
use crate::params::{KernelSet, SimulationParams};
use crate::particle::ParticleBuffers;

/// An SPH simulation bound to one compute backend.
pub struct Simulation<B: ComputeBackend> {
    backend: B,
    params: SimulationParams,
    kernels: KernelSet,
    integrator: IntegratorState,
    steps_taken: u64,
    poisoned: bool,
}

impl<B: ComputeBackend> Simulation<B> {
    /// Validate `params`, build the kernel set and bind it to `backend`.
    pub fn new(mut backend: B, params: SimulationParams) -> SimResult<Self> {
        let kernels = KernelSet::build(&params)?;
        backend.bind_kernels(&kernels)?;
        tracing::info!(
            backend = backend.label(),
            particles = backend.particle_count(),
            h = params.smoothing_radius,
            dt = params.time_step,
            integrator = ?params.integrator,
            "simulation created"
        );
        Ok(Self {
            backend,
            integrator: IntegratorState::new(params.integrator),
            params,
            kernels,
            steps_taken: 0,
            poisoned: false,
        })
    }

    // -----------------------------------------------------------------------
    // Stepping
    // -----------------------------------------------------------------------

    /// Advance the simulation by one time step.
    pub fn update(&mut self) -> SimResult<()> {
        if self.poisoned {
            return Err(SimError::Poisoned);
        }
        let step = IntegrationStep {
            scheme: self.integrator.next_scheme(),
            dt: self.params.time_step,
        };
        match run_step(&mut self.backend, step) {
            Ok(()) => {
                self.integrator.advance();
                self.steps_taken += 1;
                tracing::debug!(step = self.steps_taken, scheme = step.scheme.name(), "step complete");
                Ok(())
            }
            Err(e) => Err(self.poison(e)),
        }
    }

    /// Rebuild the grid and estimate densities without moving particles.
    pub fn estimate_densities(&mut self) -> SimResult<Vec<f32>> {
        if self.poisoned {
            return Err(SimError::Poisoned);
        }
        match run_density_pass(&mut self.backend) {
            Ok(()) => self.backend.read_densities(),
            Err(e) => Err(self.poison(e)),
        }
    }

    /// Rescale the particle mass so the mean initial density matches `rho0`.
    ///
    /// Skipped, leaving the mass unchanged, when the measured densities are
    /// degenerate.
    pub fn calibrate(&mut self) -> SimResult<CalibrationReport> {
        if self.steps_taken > 0 {
            tracing::warn!(steps = self.steps_taken, "calibrating a simulation that has already stepped");
        }
        let densities = self.estimate_densities()?;
        let mass = self.params.particle_mass;
        let mean = mean_density(&densities);
        let Some(scale) = mass_scale(&densities, self.params.rest_density) else {
            tracing::warn!(particles = densities.len(), mean_density = mean, "calibration skipped: degenerate densities");
            return Ok(CalibrationReport::skipped(mass, mean));
        };
        let mut params = self.params.clone();
        params.particle_mass = mass * scale;
        self.set_params(params)?;
        let report = CalibrationReport {
            scale: Some(scale),
            mass_before: mass,
            mass_after: self.params.particle_mass,
            mean_density_before: mean,
            mean_density_after: mean * scale,
        };
        tracing::info!(
            scale,
            mass = report.mass_after,
            mean_density = report.mean_density_after,
            rest_density = self.params.rest_density,
            "mass calibrated"
        );
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Tuning
    // -----------------------------------------------------------------------

    /// Replace the parameters and rebind the kernels.
    ///
    /// A change of integrator or time step restarts the integrator. The hash
    /// table capacity is fixed at setup and cannot be changed here.
    pub fn set_params(&mut self, mut params: SimulationParams) -> SimResult<()> {
        let kernels = KernelSet::build(&params)?;
        if params.cell_table_capacity != self.params.cell_table_capacity {
            tracing::warn!(
                requested = ?params.cell_table_capacity,
                "cell_table_capacity is fixed at setup; ignoring change"
            );
            params.cell_table_capacity = self.params.cell_table_capacity;
        }
        self.backend.bind_kernels(&kernels)?;
        let dt_changed = params.time_step != self.params.time_step;
        let integrator = params.integrator;
        self.kernels = kernels;
        self.params = params;
        if !self.select_integrator(integrator) && dt_changed {
            self.restart_integrator();
        }
        Ok(())
    }

    /// Edit a copy of the parameters with `f` and apply it.
    pub fn tune(&mut self, f: impl FnOnce(&mut SimulationParams)) -> SimResult<()> {
        let mut params = self.params.clone();
        f(&mut params);
        self.set_params(params)
    }

    /// Rebuild the kernel set from the current parameters and rebind it.
    pub fn rebuild_kernels(&mut self) -> SimResult<()> {
        let kernels = KernelSet::build(&self.params)?;
        self.backend.bind_kernels(&kernels)?;
        self.kernels = kernels;
        Ok(())
    }

    /// Switch integrators. Returns true when the selection changed, in which
    /// case the next step restarts from iteration 0.
    pub fn select_integrator(&mut self, kind: IntegratorKind) -> bool {
        self.params.integrator = kind;
        let changed = self.integrator.select(kind);
        if changed {
            self.backend.invalidate_half_step();
            tracing::info!(integrator = ?kind, "integrator switched");
        }
        changed
    }

    fn restart_integrator(&mut self) {
        self.integrator.reset();
        self.backend.invalidate_half_step();
        tracing::debug!("integrator restarted");
    }

    fn poison(&mut self, e: SimError) -> SimError {
        self.poisoned = true;
        tracing::error!(error = %e, step = self.steps_taken, "simulation step failed");
        e
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    /// Particle count `N`.
    pub fn particle_count(&self) -> usize {
        self.backend.particle_count()
    }

    /// Steps since the integrator was last (re)started.
    pub fn iteration(&self) -> u64 {
        self.integrator.iteration()
    }

    /// Successful steps since construction.
    pub fn steps_taken(&self) -> u64 {
        self.steps_taken
    }

    /// Integration variant the next step will use.
    pub fn next_scheme(&self) -> Scheme {
        self.integrator.next_scheme()
    }

    /// Current parameters.
    pub fn params(&self) -> &SimulationParams {
        &self.params
    }

    /// Currently bound kernel set.
    pub fn kernels(&self) -> &KernelSet {
        &self.kernels
    }

    /// True after a failed step.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// The backend, for renderer access to buffer handles.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Copy of all particle arrays.
    pub fn snapshot(&mut self) -> SimResult<ParticleBuffers> {
        self.backend.read_particles()
    }

    /// Metrics over the current particle state.
    pub fn diagnostics(&mut self) -> SimResult<Diagnostics> {
        let particles = self.backend.read_particles()?;
        Ok(Diagnostics::measure(&particles, self.params.particle_mass, self.params.rest_density))
    }

    /// Per-stage timings of the last step or density pass.
    pub fn last_profile(&self) -> &StepProfile {
        self.backend.profile()
    }
}

fn run_step<B: ComputeBackend + ?Sized>(backend: &mut B, step: IntegrationStep) -> SimResult<()> {
    let mut lease = ScopedBufferLease::acquire(backend)?;
    for stage in Stage::GRID_BUILD {
        lease.dispatch(stage)?;
    }
    lease.dispatch(Stage::Density)?;
    lease.dispatch(Stage::Forces)?;
    lease.dispatch(Stage::Integrate(step))?;
    lease.finish()?;
    lease.release()
}

fn run_density_pass<B: ComputeBackend + ?Sized>(backend: &mut B) -> SimResult<()> {
    let mut lease = ScopedBufferLease::acquire(backend)?;
    for stage in Stage::GRID_BUILD {
        lease.dispatch(stage)?;
    }
    lease.dispatch(Stage::Density)?;
    lease.finish()?;
    lease.release()
}
