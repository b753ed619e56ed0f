//! GPU buffer management for the SPH core.
//!
//! Creates the storage buffers for particle arrays and hash grid tables,
//! the uniform buffers for kernel constants and sort steps, and handles
//! GPU->CPU readback through staging buffers.

use wgpu::util::DeviceExt;

use crate::error::{SimError, SimResult};
use crate::params::KernelSet;
use crate::particle::ParticleBuffers;

/// Kernel constants uniform. Must match `SimParams` in `common.wgsl` exactly.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuSimParams {
    pub h: f32,
    pub h2: f32,
    pub poly6: f32,
    pub spiky_grad: f32,
    pub visc_lap: f32,
    pub mass: f32,
    pub rest_density: f32,
    pub stiffness: f32,
    pub viscosity: f32,
    pub box_half_size: f32,
    pub damping: f32,
    pub dt: f32,
    pub n_particles: u32,
    pub n_padded: u32,
    pub capacity: u32,
    pub _pad: u32,
}

impl GpuSimParams {
    pub fn new(kernels: &KernelSet, dt: f32, n_particles: u32, n_padded: u32, capacity: u32) -> Self {
        let c = &kernels.coefficients;
        Self {
            h: c.h,
            h2: c.h2,
            poly6: c.poly6,
            spiky_grad: c.spiky_grad,
            visc_lap: c.visc_lap,
            mass: kernels.particle_mass,
            rest_density: kernels.rest_density,
            stiffness: kernels.stiffness,
            viscosity: kernels.viscosity,
            box_half_size: kernels.box_half_size,
            damping: kernels.boundary_damping,
            dt,
            n_particles,
            n_padded,
            capacity,
            _pad: 0,
        }
    }
}

/// One compare-exchange step of the bitonic network. Must match `SortStep`
/// in `sort.wgsl`.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuSortStep {
    pub k: u32,
    pub j: u32,
    pub n_padded: u32,
    pub _pad: u32,
}

/// Byte stride between sort steps in the dynamic-offset uniform buffer.
pub const SORT_STEP_STRIDE: u64 = 256;

/// Minimum buffer size (wgpu requires non-zero buffers).
const MIN_BUF_SIZE: u64 = 16;

/// Compare-exchange steps sorting `n_padded` (a power of two) keys.
pub fn bitonic_steps(n_padded: u32) -> Vec<GpuSortStep> {
    let mut steps = Vec::new();
    let mut k = 2;
    while k <= n_padded {
        let mut j = k / 2;
        while j > 0 {
            steps.push(GpuSortStep { k, j, n_padded, _pad: 0 });
            j /= 2;
        }
        k *= 2;
    }
    steps
}

/// All GPU buffers of one simulation.
pub struct GpuBuffers {
    pub params: wgpu::Buffer,
    pub sort_steps: wgpu::Buffer,
    pub sort_step_count: u32,

    // Shared with the renderer.
    pub position: wgpu::Buffer,
    pub velocity: wgpu::Buffer,

    pub half_velocity: wgpu::Buffer,
    pub force: wgpu::Buffer,
    pub density: wgpu::Buffer,

    // Hash grid tables. `cell_index_of` and `particle_index` are padded to a
    // power of two for the sort.
    pub cell_index_of: wgpu::Buffer,
    pub particle_index: wgpu::Buffer,
    pub offsets: wgpu::Buffer,

    pub n_particles: u32,
    pub n_padded: u32,
    pub capacity: u32,
}

fn padded_bytes(bytes: &[u8]) -> Vec<u8> {
    let mut out = bytes.to_vec();
    if (out.len() as u64) < MIN_BUF_SIZE {
        out.resize(MIN_BUF_SIZE as usize, 0);
    }
    out
}

fn create_storage_init(device: &wgpu::Device, label: &str, bytes: &[u8], extra: wgpu::BufferUsages) -> wgpu::Buffer {
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents: &padded_bytes(bytes),
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST | extra,
    })
}

fn create_storage_zeroed(device: &wgpu::Device, label: &str, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: size.max(MIN_BUF_SIZE),
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

impl GpuBuffers {
    /// Upload `particles` and allocate grid tables with `capacity` slots.
    pub fn new(device: &wgpu::Device, particles: &ParticleBuffers, capacity: u32) -> Self {
        let n_particles = particles.len() as u32;
        let n_padded = n_particles.max(1).next_power_of_two();
        let vec4_bytes = 16u64;

        let params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("sim_params"),
            size: std::mem::size_of::<GpuSimParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let steps = bitonic_steps(n_padded);
        let mut step_bytes = vec![0u8; (steps.len().max(1) as u64 * SORT_STEP_STRIDE) as usize];
        for (i, step) in steps.iter().enumerate() {
            let at = i * SORT_STEP_STRIDE as usize;
            step_bytes[at..at + std::mem::size_of::<GpuSortStep>()].copy_from_slice(bytemuck::bytes_of(step));
        }
        let sort_steps = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("sort_steps"),
            contents: &step_bytes,
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let shared = wgpu::BufferUsages::VERTEX;
        let position = create_storage_init(device, "position", bytemuck::cast_slice(&particles.position), shared);
        let velocity = create_storage_init(device, "velocity", bytemuck::cast_slice(&particles.velocity), shared);
        let half_velocity = create_storage_zeroed(device, "half_velocity", n_particles as u64 * vec4_bytes);
        let force = create_storage_zeroed(device, "force", n_particles as u64 * vec4_bytes);
        let density = create_storage_zeroed(device, "density", n_particles as u64 * 4);

        let cell_index_of = create_storage_zeroed(device, "cell_index_of", n_padded as u64 * 4);
        let particle_index = create_storage_zeroed(device, "particle_index", n_padded as u64 * 4);
        let offsets = create_storage_zeroed(device, "offsets", capacity as u64 * 4);

        Self {
            params,
            sort_steps,
            sort_step_count: steps.len() as u32,
            position,
            velocity,
            half_velocity,
            force,
            density,
            cell_index_of,
            particle_index,
            offsets,
            n_particles,
            n_padded,
            capacity,
        }
    }

    /// Upload new kernel constants.
    pub fn update_params(&self, queue: &wgpu::Queue, params: &GpuSimParams) {
        queue.write_buffer(&self.params, 0, bytemuck::bytes_of(params));
    }
}

/// Copy the first `count` elements of `buffer` back to the host.
pub fn read_buffer<T: bytemuck::Pod>(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    buffer: &wgpu::Buffer,
    count: usize,
) -> SimResult<Vec<T>> {
    if count == 0 {
        return Ok(Vec::new());
    }
    let byte_len = (count * std::mem::size_of::<T>()) as u64;
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("readback_staging"),
        size: byte_len,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("readback"),
    });
    encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, byte_len);
    queue.submit(std::iter::once(encoder.finish()));

    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    device.poll(wgpu::Maintain::Wait);
    rx.recv()
        .map_err(|e| SimError::dispatch("readback", format!("map callback dropped: {e}")))?
        .map_err(|e| SimError::dispatch("readback", format!("buffer map failed: {e}")))?;

    let data = slice.get_mapped_range();
    let out: Vec<T> = bytemuck::cast_slice(&data).to_vec();
    drop(data);
    staging.unmap();
    Ok(out)
}
