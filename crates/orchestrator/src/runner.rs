//! Simulation runner with lifecycle management
//!
//! `SimulationRunner` moves a [`Simulation`] onto a background thread and
//! controls it through shared state plus a command queue. Commands are
//! applied only between steps, so a step always runs against one fixed set
//! of parameters. After every step the runner publishes a [`FrameSnapshot`]
//! that a renderer thread can pick up without touching the simulation.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use sph_kernel::particle::Vec4;
use sph_kernel::{ComputeBackend, Diagnostics, IntegratorKind, Simulation, SimulationParams};

use crate::OrchestratorError;

/// Runner state enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    /// Simulation created but not yet started
    Created,
    /// Simulation actively running
    Running,
    /// Simulation paused
    Paused,
    /// Simulation finished (stopped or reached max_steps)
    Finished,
    /// Simulation encountered an error
    Error,
}

/// Latest particle state published for drawing.
#[derive(Debug, Clone)]
pub struct FrameSnapshot {
    /// Steps completed when the frame was taken.
    pub step: u64,
    /// Simulated time in seconds.
    pub sim_time: f64,
    /// Particle positions.
    pub positions: Vec<Vec4>,
    /// Aggregate metrics of this frame.
    pub diagnostics: Diagnostics,
}

type TuneFn = Box<dyn FnOnce(&mut SimulationParams) + Send>;

enum Command {
    Tune(TuneFn),
    SelectIntegrator(IntegratorKind),
}

/// Shared state between the runner thread and control interface
struct SharedState {
    state: RunnerState,
    sim_time: f64,
    step_count: u64,
    error_message: Option<String>,
    rejected_command: Option<String>,
    frame: Option<Arc<FrameSnapshot>>,
}

fn lock(shared: &Mutex<SharedState>) -> MutexGuard<'_, SharedState> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle for controlling and querying a running simulation
pub struct SimulationRunner {
    shared: Arc<Mutex<SharedState>>,
    commands: Sender<Command>,
    thread_handle: Option<thread::JoinHandle<()>>,
}

impl SimulationRunner {
    /// Spawn the runner thread for `sim`. It waits in `Created` until
    /// [`SimulationRunner::start`].
    ///
    /// With `max_steps` set the runner finishes after that many steps.
    pub fn new<B>(sim: Simulation<B>, max_steps: Option<u64>) -> Result<Self, OrchestratorError>
    where
        B: ComputeBackend + Send + 'static,
    {
        let shared = Arc::new(Mutex::new(SharedState {
            state: RunnerState::Created,
            sim_time: 0.0,
            step_count: 0,
            error_message: None,
            rejected_command: None,
            frame: None,
        }));
        let (tx, rx) = mpsc::channel();

        let shared_clone = Arc::clone(&shared);
        let thread_handle = thread::Builder::new()
            .name("sph-runner".into())
            .spawn(move || run_simulation_loop(sim, shared_clone, rx, max_steps))
            .map_err(|e| OrchestratorError::Spawn(e.to_string()))?;

        Ok(Self {
            shared,
            commands: tx,
            thread_handle: Some(thread_handle),
        })
    }

    /// Get current runner state
    pub fn state(&self) -> RunnerState {
        lock(&self.shared).state
    }

    /// Get current simulated time (seconds)
    pub fn sim_time(&self) -> f64 {
        lock(&self.shared).sim_time
    }

    /// Get number of completed steps
    pub fn step_count(&self) -> u64 {
        lock(&self.shared).step_count
    }

    /// Get error message if state is Error
    pub fn error_message(&self) -> Option<String> {
        lock(&self.shared).error_message.clone()
    }

    /// Reason the most recent rejected command was refused
    pub fn rejected_command(&self) -> Option<String> {
        lock(&self.shared).rejected_command.clone()
    }

    /// Most recently published frame
    pub fn latest_frame(&self) -> Option<Arc<FrameSnapshot>> {
        lock(&self.shared).frame.clone()
    }

    /// Start the simulation (transition from Created to Running)
    pub fn start(&self) {
        let mut state = lock(&self.shared);
        if state.state == RunnerState::Created {
            state.state = RunnerState::Running;
        }
    }

    /// Pause the simulation
    pub fn pause(&self) {
        let mut state = lock(&self.shared);
        if state.state == RunnerState::Running {
            state.state = RunnerState::Paused;
        }
    }

    /// Resume the simulation
    pub fn resume(&self) {
        let mut state = lock(&self.shared);
        if state.state == RunnerState::Paused {
            state.state = RunnerState::Running;
        }
    }

    /// Stop the simulation. The thread exits after the current step.
    pub fn stop(&self) {
        let mut state = lock(&self.shared);
        if matches!(state.state, RunnerState::Created | RunnerState::Running | RunnerState::Paused) {
            state.state = RunnerState::Finished;
        }
    }

    /// Edit the parameters before the next step.
    ///
    /// Invalid edits are refused and reported through
    /// [`SimulationRunner::rejected_command`]; the simulation keeps its
    /// previous parameters.
    pub fn tune(&self, f: impl FnOnce(&mut SimulationParams) + Send + 'static) {
        self.send(Command::Tune(Box::new(f)));
    }

    /// Switch integrators before the next step.
    pub fn select_integrator(&self, kind: IntegratorKind) {
        self.send(Command::SelectIntegrator(kind));
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::warn!("runner thread has exited; command dropped");
        }
    }

    /// Wait for the simulation thread to complete
    pub fn join(mut self) -> Result<RunnerState, OrchestratorError> {
        if let Some(handle) = self.thread_handle.take() {
            handle.join().map_err(|_| OrchestratorError::ThreadPanicked)?;
        }
        Ok(self.state())
    }
}

impl Drop for SimulationRunner {
    fn drop(&mut self) {
        // Signal the thread to exit
        self.stop();
    }
}

fn apply_commands<B: ComputeBackend>(sim: &mut Simulation<B>, rx: &Receiver<Command>, shared: &Mutex<SharedState>) {
    while let Ok(command) = rx.try_recv() {
        match command {
            Command::Tune(f) => {
                if let Err(e) = sim.tune(f) {
                    tracing::warn!(error = %e, "tuning rejected");
                    lock(shared).rejected_command = Some(e.to_string());
                }
            }
            Command::SelectIntegrator(kind) => {
                sim.select_integrator(kind);
            }
        }
    }
}

fn publish<B: ComputeBackend>(sim: &mut Simulation<B>, sim_time: f64) -> Result<FrameSnapshot, sph_kernel::SimError> {
    let particles = sim.snapshot()?;
    let params = sim.params();
    let diagnostics = Diagnostics::measure(&particles, params.particle_mass, params.rest_density);
    Ok(FrameSnapshot {
        step: sim.steps_taken(),
        sim_time,
        positions: particles.position,
        diagnostics,
    })
}

/// Main simulation loop executed in background thread
fn run_simulation_loop<B: ComputeBackend>(
    mut sim: Simulation<B>,
    shared: Arc<Mutex<SharedState>>,
    rx: Receiver<Command>,
    max_steps: Option<u64>,
) {
    // Wait for start signal
    loop {
        match lock(&shared).state {
            RunnerState::Created => thread::sleep(Duration::from_millis(10)),
            RunnerState::Running | RunnerState::Paused => break,
            RunnerState::Finished | RunnerState::Error => return,
        }
    }

    let start_wall_time = Instant::now();
    let mut sim_time = 0.0_f64;

    loop {
        let current_state = lock(&shared).state;
        match current_state {
            RunnerState::Running => {
                apply_commands(&mut sim, &rx, &shared);
                let dt = sim.params().time_step;

                let outcome = sim.update().and_then(|()| publish(&mut sim, sim_time + dt as f64));
                let frame = match outcome {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::error!(error = %e, step = sim.steps_taken(), "simulation failed");
                        let mut guard = lock(&shared);
                        guard.state = RunnerState::Error;
                        guard.error_message = Some(e.to_string());
                        break;
                    }
                };
                sim_time += dt as f64;
                let steps = frame.step;

                {
                    let mut guard = lock(&shared);
                    guard.sim_time = sim_time;
                    guard.step_count = steps;
                    guard.frame = Some(Arc::new(frame));
                }

                if max_steps.is_some_and(|max| steps >= max) {
                    tracing::info!(steps, "simulation finished: reached max_steps");
                    let mut guard = lock(&shared);
                    if guard.state == RunnerState::Running || guard.state == RunnerState::Paused {
                        guard.state = RunnerState::Finished;
                    }
                    break;
                }

                if steps % 100 == 0 {
                    tracing::debug!(
                        steps,
                        sim_time,
                        wall_time = start_wall_time.elapsed().as_secs_f64(),
                        "runner progress"
                    );
                }
            }
            RunnerState::Paused => {
                // Tuning is still applied while paused.
                apply_commands(&mut sim, &rx, &shared);
                thread::sleep(Duration::from_millis(20));
            }
            RunnerState::Finished | RunnerState::Error | RunnerState::Created => break,
        }
    }

    tracing::info!(
        steps = sim.steps_taken(),
        sim_time,
        wall_time = start_wall_time.elapsed().as_secs_f64(),
        "simulation thread exiting"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use sph_kernel::{ComputeContext, HostBackend, ParticleBuffers};

    fn small_sim(params: SimulationParams) -> Simulation<HostBackend> {
        let positions: Vec<[f32; 3]> = (0..27)
            .map(|i| [(i % 3) as f32 * 0.4, ((i / 3) % 3) as f32 * 0.4, (i / 9) as f32 * 0.4])
            .collect();
        let particles = ParticleBuffers::from_positions(&positions, [0.0; 3]);
        let ctx = ComputeContext::new(Some(1)).unwrap();
        let backend = HostBackend::new(ctx, particles, &params).unwrap();
        Simulation::new(backend, params).unwrap()
    }

    fn wait_for(runner: &SimulationRunner, state: RunnerState) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while runner.state() != state {
            assert!(Instant::now() < deadline, "runner stuck in {:?}", runner.state());
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn runner_lifecycle() {
        let runner = SimulationRunner::new(small_sim(SimulationParams::default()), Some(10)).unwrap();
        assert_eq!(runner.state(), RunnerState::Created);
        assert!(runner.latest_frame().is_none());

        runner.start();
        wait_for(&runner, RunnerState::Finished);

        assert_eq!(runner.step_count(), 10);
        let frame = runner.latest_frame().unwrap();
        assert_eq!(frame.step, 10);
        assert_eq!(frame.positions.len(), 27);
        assert!((runner.sim_time() - 0.01).abs() < 1.0e-6);
        assert_eq!(runner.join().unwrap(), RunnerState::Finished);
    }

    #[test]
    fn pause_holds_steps() {
        let runner = SimulationRunner::new(small_sim(SimulationParams::default()), None).unwrap();
        runner.start();
        thread::sleep(Duration::from_millis(30));

        runner.pause();
        wait_for(&runner, RunnerState::Paused);
        thread::sleep(Duration::from_millis(50));
        let paused_at = runner.step_count();
        thread::sleep(Duration::from_millis(100));
        // Allow for one step in flight when pause was requested.
        assert!(runner.step_count() <= paused_at + 1);

        runner.resume();
        assert_eq!(runner.state(), RunnerState::Running);
        runner.stop();
        assert_eq!(runner.join().unwrap(), RunnerState::Finished);
    }

    #[test]
    fn tuning_is_applied_between_steps() {
        let runner = SimulationRunner::new(small_sim(SimulationParams::default()), Some(5)).unwrap();
        runner.tune(|p| p.time_step = 0.002);
        runner.select_integrator(IntegratorKind::Leapfrog);
        runner.start();
        wait_for(&runner, RunnerState::Finished);

        assert_eq!(runner.step_count(), 5);
        assert!((runner.sim_time() - 0.01).abs() < 1.0e-6, "{}", runner.sim_time());
        assert!(runner.rejected_command().is_none());
        runner.join().unwrap();
    }

    #[test]
    fn invalid_tuning_is_rejected_and_run_continues() {
        let runner = SimulationRunner::new(small_sim(SimulationParams::default()), Some(3)).unwrap();
        runner.tune(|p| p.smoothing_radius = -1.0);
        runner.start();
        wait_for(&runner, RunnerState::Finished);
        assert!(runner.rejected_command().unwrap().contains("smoothing_radius"));
        assert_eq!(runner.step_count(), 3);
    }

    #[test]
    fn step_failure_moves_to_error() {
        let params = SimulationParams::default();
        let mut particles = ParticleBuffers::from_positions(&[[0.0; 3], [0.2, 0.0, 0.0]], [0.0; 3]);
        particles.velocity[0][1] = f32::INFINITY;
        let ctx = ComputeContext::new(Some(1)).unwrap();
        let backend = HostBackend::new(ctx, particles, &params).unwrap();
        let broken = Simulation::new(backend, params).unwrap();

        let runner = SimulationRunner::new(broken, None).unwrap();
        runner.start();
        wait_for(&runner, RunnerState::Error);
        assert!(runner.error_message().is_some());
        assert_eq!(runner.step_count(), 0);
        assert_eq!(runner.join().unwrap(), RunnerState::Error);
    }
}
