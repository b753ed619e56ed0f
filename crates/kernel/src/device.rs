//! Compute context, stage identifiers and the backend seam.
//!
//! The driver issues the same stage sequence against any [`ComputeBackend`].
//! The host backend runs stages on the rayon pool owned by a
//! [`ComputeContext`]; the `gpu` feature adds a wgpu backend.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{SimError, SimResult};
use crate::integrate::IntegrationStep;
use crate::params::KernelSet;
use crate::particle::ParticleBuffers;

/// One dispatchable stage of a simulation step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Stage {
    /// Hashed cell index per particle.
    CellIndex,
    /// Reset every offset slot to empty.
    ClearOffsets,
    /// Sort particle ids by hashed cell.
    Sort,
    /// Record run starts into the offset table.
    CalcOffsets,
    /// Density estimation.
    Density,
    /// Pressure and viscosity forces.
    Forces,
    /// Time integration with the given variant and `dt`.
    Integrate(IntegrationStep),
}

impl Stage {
    /// Grid rebuild stages in dispatch order.
    pub const GRID_BUILD: [Stage; 4] = [Stage::CellIndex, Stage::ClearOffsets, Stage::Sort, Stage::CalcOffsets];

    /// Stable name used in errors, logs and profiles.
    pub fn name(&self) -> &'static str {
        match self {
            Stage::CellIndex => "cell_index",
            Stage::ClearOffsets => "clear_offsets",
            Stage::Sort => "sort",
            Stage::CalcOffsets => "calc_offsets",
            Stage::Density => "density",
            Stage::Forces => "forces",
            Stage::Integrate(_) => "integrate",
        }
    }
}

/// Wall-clock time spent in each stage of the last step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepProfile {
    /// `(stage name, elapsed)` in dispatch order.
    pub stages: Vec<(&'static str, Duration)>,
}

impl StepProfile {
    /// Drop all recorded timings.
    pub fn clear(&mut self) {
        self.stages.clear();
    }

    /// Append one timing.
    pub fn record(&mut self, stage: &'static str, elapsed: Duration) {
        self.stages.push((stage, elapsed));
    }

    /// Time spent in `stage`, summed if it ran more than once.
    pub fn get(&self, stage: &str) -> Option<Duration> {
        let mut hits = self.stages.iter().filter(|(s, _)| *s == stage).peekable();
        hits.peek()?;
        Some(hits.map(|(_, d)| *d).sum())
    }

    /// Total over all stages.
    pub fn total(&self) -> Duration {
        self.stages.iter().map(|(_, d)| *d).sum()
    }
}

/// Handle to the host compute device.
///
/// Built once at startup and shared by `Arc` with every backend that needs it.
pub struct ComputeContext {
    pool: rayon::ThreadPool,
}

impl std::fmt::Debug for ComputeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeContext")
            .field("threads", &self.threads())
            .finish()
    }
}

impl ComputeContext {
    /// Build a context with `threads` workers, or rayon's default when `None`.
    pub fn new(threads: Option<usize>) -> SimResult<Arc<Self>> {
        let mut builder = rayon::ThreadPoolBuilder::new().thread_name(|i| format!("sph-compute-{i}"));
        if let Some(n) = threads {
            builder = builder.num_threads(n);
        }
        let pool = builder
            .build()
            .map_err(|e| SimError::Setup(format!("failed to build compute thread pool: {e}")))?;
        tracing::info!(threads = pool.current_num_threads(), "compute context ready");
        Ok(Arc::new(Self { pool }))
    }

    /// Number of worker threads.
    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `f` on the pool. A panic inside `f` becomes a [`SimError::Dispatch`]
    /// naming `stage`.
    pub fn run<R, F>(&self, stage: &'static str, f: F) -> SimResult<R>
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        panic::catch_unwind(AssertUnwindSafe(|| self.pool.install(f)))
            .map_err(|payload| SimError::dispatch(stage, panic_message(payload.as_ref())))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "stage panicked".to_string()
    }
}

/// Executes the stages of a step on some compute device.
///
/// Stage dispatches are only valid between [`ComputeBackend::acquire_shared`]
/// and [`ComputeBackend::release_shared`]; outside that window they fail with
/// [`SimError::BuffersNotAcquired`].
pub trait ComputeBackend {
    /// Human-readable device name.
    fn label(&self) -> &str;

    /// Particle count `N`, fixed at construction.
    fn particle_count(&self) -> usize;

    /// Bind a freshly built kernel set. Replaces any previous binding.
    fn bind_kernels(&mut self, kernels: &KernelSet) -> SimResult<()>;

    /// Take ownership of the shared position and velocity buffers.
    fn acquire_shared(&mut self) -> SimResult<()>;

    /// Hand the shared buffers back to the graphics side.
    fn release_shared(&mut self) -> SimResult<()>;

    /// Run one stage.
    fn dispatch(&mut self, stage: Stage) -> SimResult<()>;

    /// Block until every dispatched stage has completed.
    fn finish(&mut self) -> SimResult<()>;

    /// Copy out the current densities.
    fn read_densities(&mut self) -> SimResult<Vec<f32>>;

    /// Copy out all particle arrays.
    fn read_particles(&mut self) -> SimResult<ParticleBuffers>;

    /// Mark the half-step velocity buffer stale.
    fn invalidate_half_step(&mut self);

    /// Per-stage timings of the most recent acquire/release window.
    fn profile(&self) -> &StepProfile;
}

/// Time `f` and record it under `stage` in `profile`.
pub(crate) fn timed<R>(profile: &mut StepProfile, stage: &'static str, f: impl FnOnce() -> R) -> R {
    let start = Instant::now();
    let out = f();
    let elapsed = start.elapsed();
    tracing::trace!(stage, elapsed_us = elapsed.as_micros() as u64, "stage complete");
    profile.record(stage, elapsed);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_returns_value() {
        let ctx = ComputeContext::new(Some(2)).unwrap();
        assert_eq!(ctx.threads(), 2);
        let v = ctx.run("density", || 40 + 2).unwrap();
        assert_eq!(v, 42);
    }

    #[test]
    fn panic_becomes_dispatch_error() {
        let ctx = ComputeContext::new(Some(1)).unwrap();
        let err = ctx.run("forces", || -> () { panic!("index out of range") }).unwrap_err();
        match err {
            SimError::Dispatch { stage, message } => {
                assert_eq!(stage, "forces");
                assert!(message.contains("index out of range"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn profile_sums_repeated_stages() {
        let mut p = StepProfile::default();
        p.record("sort", Duration::from_millis(2));
        p.record("density", Duration::from_millis(1));
        p.record("sort", Duration::from_millis(3));
        assert_eq!(p.get("sort"), Some(Duration::from_millis(5)));
        assert_eq!(p.get("forces"), None);
        assert_eq!(p.total(), Duration::from_millis(6));
    }

    #[test]
    fn stage_names_are_stable() {
        let names: Vec<_> = Stage::GRID_BUILD.iter().map(Stage::name).collect();
        assert_eq!(names, ["cell_index", "clear_offsets", "sort", "calc_offsets"]);
    }
}
