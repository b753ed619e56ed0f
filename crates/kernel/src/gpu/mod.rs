//! GPU (Metal/Vulkan via wgpu) compute backend.
//!
//! `GpuBackend` implements [`ComputeBackend`] with WGSL compute shaders. Each
//! stage is encoded into its own command buffer and submitted under a
//! validation error scope, so a failing dispatch is reported with the stage
//! that caused it. Particle data stays on the device; readback happens only
//! through [`ComputeBackend::read_particles`], [`ComputeBackend::read_densities`]
//! and the finite-value check in [`ComputeBackend::finish`].
//!
//! # Bind group layout
//! - Group 0: per-family inputs (params uniform plus particle arrays; the sort
//!   family binds one compare-exchange step through a dynamic offset).
//! - Group 1: hash grid tables `cell_index_of`, `particle_index`, `offsets`,
//!   shared by the grid, sort, density and forces families.
//!
//! Shader variants (equation of state, neighbor strategy, workgroup size) are
//! selected by rewriting constants in the WGSL source before compilation.

pub mod buffers;

use std::num::NonZeroU64;
use std::sync::Arc;

use buffers::{read_buffer, GpuBuffers, GpuSimParams, SORT_STEP_STRIDE};

use crate::device::{timed, ComputeBackend, Stage, StepProfile};
use crate::eos::EquationOfState;
use crate::error::{SimError, SimResult};
use crate::integrate::{IntegrationStep, Scheme};
use crate::interop::{BufferId, BufferOwner, GraphicsInterop, Headless, SharedBufferHandles};
use crate::neighbor::NeighborStrategy;
use crate::params::{KernelSet, SimulationParams};
use crate::particle::{ParticleBuffers, Vec4};

const COMMON_WGSL: &str = include_str!("shaders/common.wgsl");
const HASH_GRID_WGSL: &str = include_str!("shaders/hash_grid.wgsl");
const SORT_WGSL: &str = include_str!("shaders/sort.wgsl");
const DENSITY_WGSL: &str = include_str!("shaders/density.wgsl");
const FORCES_WGSL: &str = include_str!("shaders/forces.wgsl");
const INTEGRATE_WGSL: &str = include_str!("shaders/integrate.wgsl");

const DEFAULT_WORKGROUP_SIZE: u32 = 256;

fn request_adapter() -> Option<wgpu::Adapter> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });
    pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }))
}

/// Check whether a GPU adapter is available.
pub fn gpu_available() -> bool {
    request_adapter().is_some()
}

/// Handle to the GPU device and queue.
///
/// Built once at startup and shared by `Arc` with every backend (and a
/// renderer) that should run on the same device.
pub struct GpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_name: String,
}

impl std::fmt::Debug for GpuContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuContext")
            .field("adapter", &self.adapter_name)
            .finish()
    }
}

impl GpuContext {
    /// Request the high-performance adapter and a device on it.
    ///
    /// Fails with [`SimError::Setup`] when no adapter or device is available.
    pub fn new() -> SimResult<Arc<Self>> {
        let adapter = request_adapter().ok_or_else(|| SimError::Setup("no suitable GPU adapter found".into()))?;
        let adapter_name = adapter.get_info().name;

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("sph_device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        ))
        .map_err(|e| SimError::Setup(format!("failed to create device: {e}")))?;

        tracing::info!(adapter = %adapter_name, "gpu context ready");
        Ok(Arc::new(Self {
            device,
            queue,
            adapter_name,
        }))
    }

    /// Wrap a device and queue created elsewhere, e.g. by a renderer.
    pub fn from_device(device: wgpu::Device, queue: wgpu::Queue, adapter_name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            device,
            queue,
            adapter_name: adapter_name.into(),
        })
    }

    /// Device owning the buffers.
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Queue that receives the compute submissions.
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Adapter name reported by the driver.
    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }
}

/// Compile-time switches baked into the shader source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Variant {
    eos: EquationOfState,
    strategy: NeighborStrategy,
    workgroup_size: u32,
}

impl Variant {
    fn neighbor_mode(&self) -> u32 {
        match self.strategy {
            NeighborStrategy::Grid => 0,
            NeighborStrategy::GridChecked => 1,
            #[cfg(any(test, feature = "reference-search"))]
            NeighborStrategy::Naive => 2,
        }
    }

    fn source(&self, family: &str) -> String {
        let mut src = format!("{COMMON_WGSL}\n{family}");
        if self.eos == EquationOfState::PowerLaw {
            src = src.replace("const EOS_POWER_LAW: bool = false;", "const EOS_POWER_LAW: bool = true;");
        }
        src.replace(
            "const NEIGHBOR_MODE: u32 = 0u;",
            &format!("const NEIGHBOR_MODE: u32 = {}u;", self.neighbor_mode()),
        )
        .replace("@workgroup_size(256)", &format!("@workgroup_size({})", self.workgroup_size))
    }
}

struct Pipelines {
    variant: Variant,
    cell_index: wgpu::ComputePipeline,
    clear_offsets: wgpu::ComputePipeline,
    calc_offsets: wgpu::ComputePipeline,
    sort: wgpu::ComputePipeline,
    density: wgpu::ComputePipeline,
    forces: wgpu::ComputePipeline,
    integrate_euler: wgpu::ComputePipeline,
    integrate_leapfrog_start: wgpu::ComputePipeline,
    integrate_leapfrog_step: wgpu::ComputePipeline,
}

impl Pipelines {
    fn integrate(&self, scheme: Scheme) -> &wgpu::ComputePipeline {
        match scheme {
            Scheme::SymplecticEuler => &self.integrate_euler,
            Scheme::LeapfrogStart => &self.integrate_leapfrog_start,
            Scheme::LeapfrogStep => &self.integrate_leapfrog_step,
        }
    }
}

struct Layouts {
    grid: wgpu::PipelineLayout,
    sort: wgpu::PipelineLayout,
    density: wgpu::PipelineLayout,
    forces: wgpu::PipelineLayout,
    integrate: wgpu::PipelineLayout,
}

struct BindGroups {
    grid: wgpu::BindGroup,
    sort: wgpu::BindGroup,
    density: wgpu::BindGroup,
    forces: wgpu::BindGroup,
    integrate: wgpu::BindGroup,
    tables: wgpu::BindGroup,
}

/// Runs simulation stages as wgpu compute dispatches.
pub struct GpuBackend {
    ctx: Arc<GpuContext>,
    bufs: GpuBuffers,
    layouts: Layouts,
    groups: BindGroups,
    pipelines: Option<Pipelines>,
    workgroup_size: u32,
    kernels: Option<KernelSet>,
    uploaded_dt: f32,
    half_valid: bool,
    integrated: bool,
    interop: Box<dyn GraphicsInterop>,
    handles: SharedBufferHandles,
    owner: BufferOwner,
    profile: StepProfile,
}

impl std::fmt::Debug for GpuBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuBackend")
            .field("adapter", &self.ctx.adapter_name)
            .field("n_particles", &self.bufs.n_particles)
            .field("capacity", &self.bufs.capacity)
            .field("workgroup_size", &self.workgroup_size)
            .finish()
    }
}

impl GpuBackend {
    /// Upload `particles` to a new device.
    ///
    /// Fails with [`SimError::Setup`] when no adapter or device is available,
    /// allowing callers to fall back to the host backend.
    pub fn new(particles: &ParticleBuffers, params: &SimulationParams) -> SimResult<Self> {
        Self::with_context(GpuContext::new()?, particles, params)
    }

    /// Upload `particles` to the device of `ctx`.
    pub fn with_context(ctx: Arc<GpuContext>, particles: &ParticleBuffers, params: &SimulationParams) -> SimResult<Self> {
        params.validate()?;
        if !particles.is_consistent() {
            return Err(SimError::Setup("particle arrays differ in length".into()));
        }
        let device = &ctx.device;

        let n = particles.len();
        let capacity = params.cell_capacity(n);
        if (capacity as usize) < n {
            tracing::warn!(capacity, particles = n, "hash table smaller than particle count; expect long runs");
        }
        let bufs = GpuBuffers::new(device, particles, capacity);
        let bgl = BindGroupLayouts::new(device);
        let layouts = create_layouts(device, &bgl);
        let groups = create_bind_groups(device, &bgl, &bufs);

        tracing::info!(
            adapter = %ctx.adapter_name,
            particles = n,
            capacity,
            padded = bufs.n_padded,
            sort_steps = bufs.sort_step_count,
            "gpu backend ready"
        );

        Ok(Self {
            ctx,
            bufs,
            layouts,
            groups,
            pipelines: None,
            workgroup_size: DEFAULT_WORKGROUP_SIZE,
            kernels: None,
            uploaded_dt: 0.0,
            half_valid: false,
            integrated: false,
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

    /// Adapter name reported by the driver.
    pub fn adapter_name(&self) -> &str {
        &self.ctx.adapter_name
    }

    /// Device owning the particle buffers.
    pub fn device(&self) -> &wgpu::Device {
        &self.ctx.device
    }

    /// Shared device context.
    pub fn context(&self) -> &Arc<GpuContext> {
        &self.ctx
    }

    /// Position buffer for vertex input. Draw only while the graphics side owns it.
    pub fn position_buffer(&self) -> &wgpu::Buffer {
        &self.bufs.position
    }

    /// Velocity buffer for vertex input.
    pub fn velocity_buffer(&self) -> &wgpu::Buffer {
        &self.bufs.velocity
    }

    /// Current owner of the shared buffers.
    pub fn owner(&self) -> BufferOwner {
        self.owner
    }

    /// Whether the half-step velocity buffer holds a valid leapfrog state.
    pub fn half_step_valid(&self) -> bool {
        self.half_valid
    }

    /// Override the compute workgroup size (default 256).
    ///
    /// Rebuilds the bound pipelines when a kernel set is already bound.
    pub fn set_workgroup_size(&mut self, workgroup_size: u32) -> SimResult<()> {
        let max = self.ctx.device.limits().max_compute_workgroup_size_x;
        if workgroup_size == 0 || workgroup_size > max {
            return Err(SimError::build(
                "bind",
                format!("workgroup size {workgroup_size} outside 1..={max}"),
            ));
        }
        if self.owner == BufferOwner::Compute {
            return Err(SimError::build("bind", "cannot change workgroup size during a step"));
        }
        self.workgroup_size = workgroup_size;
        if let Some(kernels) = self.kernels {
            self.ensure_pipelines(&kernels)?;
        }
        Ok(())
    }

    /// Copy out the hash grid tables: `cell_index_of`, the sorted
    /// `particle_index` (both truncated to `N`) and `offsets`.
    pub fn read_tables(&self) -> SimResult<(Vec<u32>, Vec<u32>, Vec<u32>)> {
        let n = self.bufs.n_particles as usize;
        let cells = read_buffer::<u32>(&self.ctx.device, &self.ctx.queue, &self.bufs.cell_index_of, n)?;
        let sorted = read_buffer::<u32>(&self.ctx.device, &self.ctx.queue, &self.bufs.particle_index, n)?;
        let offsets = read_buffer::<u32>(
            &self.ctx.device,
            &self.ctx.queue,
            &self.bufs.offsets,
            self.bufs.capacity as usize,
        )?;
        Ok((cells, sorted, offsets))
    }

    fn upload_params(&mut self, kernels: &KernelSet, dt: f32) {
        let params = GpuSimParams::new(kernels, dt, self.bufs.n_particles, self.bufs.n_padded, self.bufs.capacity);
        self.bufs.update_params(&self.ctx.queue, &params);
        self.uploaded_dt = dt;
    }

    fn ensure_pipelines(&mut self, kernels: &KernelSet) -> SimResult<()> {
        let variant = Variant {
            eos: kernels.eos,
            strategy: kernels.neighbor_strategy,
            workgroup_size: self.workgroup_size,
        };
        if self.pipelines.as_ref().is_some_and(|p| p.variant == variant) {
            return Ok(());
        }
        let started = std::time::Instant::now();
        let pipelines = self.build_pipelines(variant)?;
        tracing::debug!(
            ?variant,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "compute pipelines built"
        );
        self.pipelines = Some(pipelines);
        Ok(())
    }

    fn build_pipelines(&self, variant: Variant) -> SimResult<Pipelines> {
        let mut grid = self.compile(
            "cell_index",
            &variant.source(HASH_GRID_WGSL),
            &self.layouts.grid,
            &["cell_index", "clear_offsets", "calc_offsets"],
        )?;
        let mut sort = self.compile("sort", &variant.source(SORT_WGSL), &self.layouts.sort, &["bitonic_step"])?;
        let mut density = self.compile(
            "density",
            &variant.source(DENSITY_WGSL),
            &self.layouts.density,
            &["compute_density"],
        )?;
        let mut forces = self.compile(
            "forces",
            &variant.source(FORCES_WGSL),
            &self.layouts.forces,
            &["compute_forces"],
        )?;
        let mut integrate = self.compile(
            "integrate",
            &variant.source(INTEGRATE_WGSL),
            &self.layouts.integrate,
            &[
                Scheme::SymplecticEuler.name(),
                Scheme::LeapfrogStart.name(),
                Scheme::LeapfrogStep.name(),
            ],
        )?;

        let missing = || SimError::build("bind", "pipeline list shorter than entry point list");
        let integrate_leapfrog_step = integrate.pop().ok_or_else(missing)?;
        let integrate_leapfrog_start = integrate.pop().ok_or_else(missing)?;
        let integrate_euler = integrate.pop().ok_or_else(missing)?;
        let calc_offsets = grid.pop().ok_or_else(missing)?;
        let clear_offsets = grid.pop().ok_or_else(missing)?;
        let cell_index = grid.pop().ok_or_else(missing)?;
        Ok(Pipelines {
            variant,
            cell_index,
            clear_offsets,
            calc_offsets,
            sort: sort.pop().ok_or_else(missing)?,
            density: density.pop().ok_or_else(missing)?,
            forces: forces.pop().ok_or_else(missing)?,
            integrate_euler,
            integrate_leapfrog_start,
            integrate_leapfrog_step,
        })
    }

    /// Compile one shader module and a pipeline per entry point. Validation
    /// errors become [`SimError::KernelBuild`] naming `stage`.
    fn compile(
        &self,
        stage: &'static str,
        source: &str,
        layout: &wgpu::PipelineLayout,
        entry_points: &[&str],
    ) -> SimResult<Vec<wgpu::ComputePipeline>> {
        self.ctx.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self.ctx.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(stage),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        let pipelines = entry_points
            .iter()
            .map(|&entry| {
                self.ctx.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(entry),
                    layout: Some(layout),
                    module: &module,
                    entry_point: Some(entry),
                    compilation_options: Default::default(),
                    cache: None,
                })
            })
            .collect();
        if let Some(err) = pollster::block_on(self.ctx.device.pop_error_scope()) {
            return Err(SimError::build(stage, err.to_string()));
        }
        Ok(pipelines)
    }

    /// Encode and submit one stage under a validation error scope.
    fn submit(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        stage: &'static str,
        encode: impl FnOnce(&mut wgpu::CommandEncoder),
    ) -> SimResult<()> {
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(stage) });
        encode(&mut encoder);
        queue.submit(Some(encoder.finish()));
        match pollster::block_on(device.pop_error_scope()) {
            Some(err) => Err(SimError::dispatch(stage, err.to_string())),
            None => Ok(()),
        }
    }

    fn first_non_finite(&self) -> SimResult<Option<usize>> {
        let n = self.bufs.n_particles as usize;
        let position = read_buffer::<Vec4>(&self.ctx.device, &self.ctx.queue, &self.bufs.position, n)?;
        let velocity = read_buffer::<Vec4>(&self.ctx.device, &self.ctx.queue, &self.bufs.velocity, n)?;
        Ok(position
            .iter()
            .zip(&velocity)
            .position(|(x, v)| x[..3].iter().chain(&v[..3]).any(|c| !c.is_finite())))
    }
}

impl GpuBackend {
    fn mark_integrated(&mut self, stage: Stage) {
        if let Stage::Integrate(step) = stage {
            self.half_valid = step.scheme != Scheme::SymplecticEuler;
            self.integrated = true;
        }
    }
}

impl ComputeBackend for GpuBackend {
    fn label(&self) -> &str {
        &self.ctx.adapter_name
    }

    fn particle_count(&self) -> usize {
        self.bufs.n_particles as usize
    }

    fn bind_kernels(&mut self, kernels: &KernelSet) -> SimResult<()> {
        if self.owner == BufferOwner::Compute {
            return Err(SimError::build("bind", "cannot rebind kernels during a step"));
        }
        self.ensure_pipelines(kernels)?;
        let dt = self.uploaded_dt;
        self.upload_params(kernels, dt);
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

        if let Stage::Integrate(IntegrationStep { scheme, dt }) = stage {
            if scheme == Scheme::LeapfrogStep && !self.half_valid {
                return Err(SimError::StaleHalfStep);
            }
            if dt != self.uploaded_dt {
                self.upload_params(&kernels, dt);
            }
        }

        let n = self.bufs.n_particles;
        if n == 0 {
            self.mark_integrated(stage);
            return Ok(());
        }
        let wg = self.workgroup_size;
        let Self {
            ctx,
            bufs,
            groups,
            pipelines,
            profile,
            ..
        } = self;
        let pipelines = pipelines
            .as_ref()
            .ok_or_else(|| SimError::build(name, "no pipelines built"))?;

        timed(profile, name, || {
            Self::submit(&ctx.device, &ctx.queue, name, |encoder| {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some(name),
                    timestamp_writes: None,
                });
                match stage {
                    Stage::CellIndex => {
                        pass.set_pipeline(&pipelines.cell_index);
                        pass.set_bind_group(0, &groups.grid, &[]);
                        pass.set_bind_group(1, &groups.tables, &[]);
                        pass.dispatch_workgroups(dispatch_size(bufs.n_padded, wg), 1, 1);
                    }
                    Stage::ClearOffsets => {
                        pass.set_pipeline(&pipelines.clear_offsets);
                        pass.set_bind_group(0, &groups.grid, &[]);
                        pass.set_bind_group(1, &groups.tables, &[]);
                        pass.dispatch_workgroups(dispatch_size(bufs.capacity, wg), 1, 1);
                    }
                    Stage::Sort => {
                        pass.set_pipeline(&pipelines.sort);
                        pass.set_bind_group(1, &groups.tables, &[]);
                        for idx in 0..bufs.sort_step_count {
                            let offset = idx * SORT_STEP_STRIDE as u32;
                            pass.set_bind_group(0, &groups.sort, &[offset]);
                            pass.dispatch_workgroups(dispatch_size(bufs.n_padded, wg), 1, 1);
                        }
                    }
                    Stage::CalcOffsets => {
                        pass.set_pipeline(&pipelines.calc_offsets);
                        pass.set_bind_group(0, &groups.grid, &[]);
                        pass.set_bind_group(1, &groups.tables, &[]);
                        pass.dispatch_workgroups(dispatch_size(n, wg), 1, 1);
                    }
                    Stage::Density => {
                        pass.set_pipeline(&pipelines.density);
                        pass.set_bind_group(0, &groups.density, &[]);
                        pass.set_bind_group(1, &groups.tables, &[]);
                        pass.dispatch_workgroups(dispatch_size(n, wg), 1, 1);
                    }
                    Stage::Forces => {
                        pass.set_pipeline(&pipelines.forces);
                        pass.set_bind_group(0, &groups.forces, &[]);
                        pass.set_bind_group(1, &groups.tables, &[]);
                        pass.dispatch_workgroups(dispatch_size(n, wg), 1, 1);
                    }
                    Stage::Integrate(step) => {
                        pass.set_pipeline(pipelines.integrate(step.scheme));
                        pass.set_bind_group(0, &groups.integrate, &[]);
                        pass.dispatch_workgroups(dispatch_size(n, wg), 1, 1);
                    }
                }
            })
        })?;

        self.mark_integrated(stage);
        Ok(())
    }

    fn finish(&mut self) -> SimResult<()> {
        timed(&mut self.profile, "finish", || self.ctx.device.poll(wgpu::Maintain::Wait));
        let check = self.integrated && self.kernels.is_some_and(|k| k.check_finite);
        self.integrated = false;
        if check {
            if let Some(particle) = self.first_non_finite()? {
                return Err(SimError::NonFinite { stage: "integrate", particle });
            }
        }
        Ok(())
    }

    fn read_densities(&mut self) -> SimResult<Vec<f32>> {
        read_buffer(&self.ctx.device, &self.ctx.queue, &self.bufs.density, self.bufs.n_particles as usize)
    }

    fn read_particles(&mut self) -> SimResult<ParticleBuffers> {
        let n = self.bufs.n_particles as usize;
        Ok(ParticleBuffers {
            position: read_buffer(&self.ctx.device, &self.ctx.queue, &self.bufs.position, n)?,
            velocity: read_buffer(&self.ctx.device, &self.ctx.queue, &self.bufs.velocity, n)?,
            density: read_buffer(&self.ctx.device, &self.ctx.queue, &self.bufs.density, n)?,
            force: read_buffer(&self.ctx.device, &self.ctx.queue, &self.bufs.force, n)?,
        })
    }

    fn invalidate_half_step(&mut self) {
        self.half_valid = false;
    }

    fn profile(&self) -> &StepProfile {
        &self.profile
    }
}

struct BindGroupLayouts {
    tables: wgpu::BindGroupLayout,
    grid: wgpu::BindGroupLayout,
    sort: wgpu::BindGroupLayout,
    density: wgpu::BindGroupLayout,
    forces: wgpu::BindGroupLayout,
    integrate: wgpu::BindGroupLayout,
}

impl BindGroupLayouts {
    fn new(device: &wgpu::Device) -> Self {
        let layout = |label: &str, entries: &[wgpu::BindGroupLayoutEntry]| {
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(label),
                entries,
            })
        };
        Self {
            tables: layout(
                "tables_bgl",
                &[
                    bgl_storage_rw(0), // cell_index_of
                    bgl_storage_rw(1), // particle_index
                    bgl_storage_rw(2), // offsets
                ],
            ),
            grid: layout("grid_bgl", &[bgl_uniform(0), bgl_storage_ro(1)]),
            sort: layout("sort_bgl", &[bgl_uniform_dynamic(0)]),
            density: layout("density_bgl", &[bgl_uniform(0), bgl_storage_ro(1), bgl_storage_rw(2)]),
            forces: layout(
                "forces_bgl",
                &[
                    bgl_uniform(0),
                    bgl_storage_ro(1), // position
                    bgl_storage_ro(2), // velocity
                    bgl_storage_ro(3), // density
                    bgl_storage_rw(4), // force
                ],
            ),
            integrate: layout(
                "integrate_bgl",
                &[
                    bgl_uniform(0),
                    bgl_storage_rw(1), // position
                    bgl_storage_rw(2), // velocity
                    bgl_storage_rw(3), // half_velocity
                    bgl_storage_ro(4), // force
                ],
            ),
        }
    }
}

fn create_layouts(device: &wgpu::Device, bgl: &BindGroupLayouts) -> Layouts {
    let pipeline_layout = |label: &str, groups: &[&wgpu::BindGroupLayout]| {
        device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: groups,
            push_constant_ranges: &[],
        })
    };
    Layouts {
        grid: pipeline_layout("grid_layout", &[&bgl.grid, &bgl.tables]),
        sort: pipeline_layout("sort_layout", &[&bgl.sort, &bgl.tables]),
        density: pipeline_layout("density_layout", &[&bgl.density, &bgl.tables]),
        forces: pipeline_layout("forces_layout", &[&bgl.forces, &bgl.tables]),
        integrate: pipeline_layout("integrate_layout", &[&bgl.integrate]),
    }
}

fn create_bind_groups(device: &wgpu::Device, layouts: &BindGroupLayouts, bufs: &GpuBuffers) -> BindGroups {
    let group = |label: &str, layout: &wgpu::BindGroupLayout, buffers: &[&wgpu::Buffer]| {
        let entries: Vec<_> = buffers
            .iter()
            .enumerate()
            .map(|(i, b)| wgpu::BindGroupEntry {
                binding: i as u32,
                resource: b.as_entire_binding(),
            })
            .collect();
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout,
            entries: &entries,
        })
    };

    let sort = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("sort_bg"),
        layout: &layouts.sort,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                buffer: &bufs.sort_steps,
                offset: 0,
                size: NonZeroU64::new(std::mem::size_of::<buffers::GpuSortStep>() as u64),
            }),
        }],
    });

    BindGroups {
        grid: group("grid_bg", &layouts.grid, &[&bufs.params, &bufs.position]),
        sort,
        density: group("density_bg", &layouts.density, &[&bufs.params, &bufs.position, &bufs.density]),
        forces: group(
            "forces_bg",
            &layouts.forces,
            &[&bufs.params, &bufs.position, &bufs.velocity, &bufs.density, &bufs.force],
        ),
        integrate: group(
            "integrate_bg",
            &layouts.integrate,
            &[&bufs.params, &bufs.position, &bufs.velocity, &bufs.half_velocity, &bufs.force],
        ),
        tables: group(
            "tables_bg",
            &layouts.tables,
            &[&bufs.cell_index_of, &bufs.particle_index, &bufs.offsets],
        ),
    }
}

/// Calculate dispatch workgroup count: ceil(total / workgroup_size).
fn dispatch_size(total: u32, workgroup_size: u32) -> u32 {
    total.div_ceil(workgroup_size)
}

// ---- Bind group layout entry helpers ----

fn bgl_buffer(binding: u32, ty: wgpu::BufferBindingType, has_dynamic_offset: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty,
            has_dynamic_offset,
            min_binding_size: None,
        },
        count: None,
    }
}

fn bgl_uniform(binding: u32) -> wgpu::BindGroupLayoutEntry {
    bgl_buffer(binding, wgpu::BufferBindingType::Uniform, false)
}

fn bgl_uniform_dynamic(binding: u32) -> wgpu::BindGroupLayoutEntry {
    bgl_buffer(binding, wgpu::BufferBindingType::Uniform, true)
}

fn bgl_storage_ro(binding: u32) -> wgpu::BindGroupLayoutEntry {
    bgl_buffer(binding, wgpu::BufferBindingType::Storage { read_only: true }, false)
}

fn bgl_storage_rw(binding: u32) -> wgpu::BindGroupLayoutEntry {
    bgl_buffer(binding, wgpu::BufferBindingType::Storage { read_only: false }, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_size_rounds_up() {
        assert_eq!(dispatch_size(1, 256), 1);
        assert_eq!(dispatch_size(256, 256), 1);
        assert_eq!(dispatch_size(257, 256), 2);
        assert_eq!(dispatch_size(1000, 64), 16);
    }

    #[test]
    fn variant_rewrites_shader_constants() {
        let variant = Variant {
            eos: EquationOfState::PowerLaw,
            strategy: NeighborStrategy::GridChecked,
            workgroup_size: 64,
        };
        let src = variant.source(DENSITY_WGSL);
        assert!(src.contains("const EOS_POWER_LAW: bool = true;"));
        assert!(src.contains("const NEIGHBOR_MODE: u32 = 1u;"));
        assert!(src.contains("@workgroup_size(64)"));
        assert!(!src.contains("@workgroup_size(256)"));
    }

    #[test]
    fn default_variant_keeps_source() {
        let variant = Variant {
            eos: EquationOfState::Linear,
            strategy: NeighborStrategy::Grid,
            workgroup_size: DEFAULT_WORKGROUP_SIZE,
        };
        assert_eq!(variant.source(FORCES_WGSL), format!("{COMMON_WGSL}\n{FORCES_WGSL}"));
    }
}
