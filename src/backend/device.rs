use super::Backend;
use crate::{
    agent::Agent,
    errors::SlimeError,
    random::RandomService,
    render,
    resolver::{ArbitrationOutcome, MoveResolver},
    settings::Settings,
    swapper::Swapper,
    trail::TrailField,
};
use log::{debug, error, info, trace};
use std::borrow::Cow;
use std::fs;
use std::path::Path;
use wgpu::util::DeviceExt;

// The bundled compute program (WGSL)
const SLIME_SHADER_WGSL: &str = include_str!("../shaders/slime.wgsl");

const WORKGROUP_SIZE: u32 = 64;
const MAX_WORKGROUPS_PER_DIMENSION: u32 = 65535;

const DIFFUSE_ENTRY_POINT: &str = "diffuse";
const DECAY_ENTRY_POINT: &str = "decay";
const DESIRED_MOVES_ENTRY_POINT: &str = "desiredMoves";
const MOVE_ENTRY_POINT: &str = "moveAgents";
const SENSE_ENTRY_POINT: &str = "sense";

/// WGSL source for the device kernels. Whatever it is, it has to expose the
/// five entry points above against the bind group layout built in
/// [`DeviceBackend::new`].
#[derive(Debug, Clone)]
pub struct ComputeProgram {
    label: String,
    source: String,
}

impl ComputeProgram {
    pub fn bundled() -> Self {
        Self {
            label: "slime.wgsl".to_owned(),
            source: SLIME_SHADER_WGSL.to_owned(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, SlimeError> {
        let source = fs::read_to_string(path)?;
        info!("loaded compute program from '{}'", path.display());

        Ok(Self {
            label: path.display().to_string(),
            source,
        })
    }

    pub fn from_source(label: &str, source: &str) -> Self {
        Self {
            label: label.to_owned(),
            source: source.to_owned(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, SlimeError> {
        match &settings.compute_program {
            Some(path) => Self::from_file(path),
            None => Ok(Self::bundled()),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

/// Mirrors `Config` in the WGSL program. 16 four-byte fields, so it's already
/// a multiple of 16 bytes as a uniform buffer needs.
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct DeviceConfig {
    width: u32,
    height: u32,
    kernel_size: u32,
    population: u32,
    diffusion_decay: f32,
    diffusion_ratio: f32,
    sensor_angle: f32,
    rotation_angle: f32,
    sensor_offset: f32,
    sensor_width: u32,
    step_size: f32,
    chemo_deposition: f32,
    max_chemo: f32,
    _padding: [u32; 3],
}

impl DeviceConfig {
    fn new(settings: &Settings, population: usize) -> Self {
        Self {
            width: settings.width,
            height: settings.height,
            kernel_size: settings.diffusion_kernel_size,
            population: population as u32,
            diffusion_decay: settings.diffusion_decay,
            diffusion_ratio: settings.diffusion_ratio,
            sensor_angle: settings.sensor_angle,
            rotation_angle: settings.rotation_angle,
            sensor_offset: settings.sensor_offset,
            sensor_width: settings.sensor_width,
            step_size: settings.step_size,
            chemo_deposition: settings.chemo_deposition,
            max_chemo: settings.max_chemo,
            _padding: [0; 3],
        }
    }
}

struct Pipelines {
    diffuse: wgpu::ComputePipeline,
    decay: wgpu::ComputePipeline,
    desired_moves: wgpu::ComputePipeline,
    move_agents: wgpu::ComputePipeline,
    sense: wgpu::ComputePipeline,
}

/// Runs the per-cell and per-agent stages as compute dispatches. Arbitration
/// still happens on the host: every move reads the proposals back, resolves
/// them and writes the verdicts out again before the commit kernel runs.
pub struct DeviceBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipelines: Pipelines,
    _config_buffer: wgpu::Buffer,
    // Both swap together: bind group 0 reads trail buffer 0 and writes buffer 1
    trail_buffers: Swapper<wgpu::Buffer>,
    bind_groups: Swapper<wgpu::BindGroup>,
    agent_buffer: wgpu::Buffer,
    desired_buffer: wgpu::Buffer,
    new_direction_buffer: wgpu::Buffer,
    coin_buffer: wgpu::Buffer,
    staging_buffer: wgpu::Buffer,
    // Host-side copies, refreshed from the device on demand
    trail: TrailField,
    agents: Vec<Agent>,
    resolver: MoveResolver,
    coins: Vec<f32>,
}

impl DeviceBackend {
    pub fn new(
        settings: &Settings,
        agents: Vec<Agent>,
        program: &ComputeProgram,
    ) -> Result<Self, SlimeError> {
        pollster::block_on(Self::new_async(settings, agents, program))
    }

    async fn new_async(
        settings: &Settings,
        agents: Vec<Agent>,
        program: &ComputeProgram,
    ) -> Result<Self, SlimeError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await
            .ok_or(SlimeError::NoCompatibleDevice)?;
        info!("using compute adapter '{}'", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Slime Compute Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter.limits(),
                },
                None,
            )
            .await?;

        let trail = TrailField::new(settings.width, settings.height, 0.0, settings.max_chemo);
        let population = agents.len();
        let cell_count = trail.len();

        let config = DeviceConfig::new(settings, population);
        let config_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Config Uniform Buffer"),
            contents: bytemuck::bytes_of(&config),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let trail_usage = wgpu::BufferUsages::STORAGE
            | wgpu::BufferUsages::COPY_SRC
            | wgpu::BufferUsages::COPY_DST;
        let trail_a = storage_buffer_init(&device, "Trail Buffer A", trail.current(), trail_usage);
        let trail_b = storage_buffer_init(&device, "Trail Buffer B", trail.next(), trail_usage);

        let agent_buffer = storage_buffer_init(
            &device,
            "Agent Buffer",
            &agents[..],
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
        );
        let desired_buffer = storage_buffer::<i32>(
            &device,
            "Desired Destination Buffer",
            population,
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
        );
        let new_direction_buffer = storage_buffer::<f32>(
            &device,
            "New Direction Buffer",
            population,
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        );
        let coin_buffer = storage_buffer::<f32>(
            &device,
            "Sense Coin Buffer",
            population,
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        );

        // big enough for whichever readback is largest
        let staging_size = [
            std::mem::size_of_val(trail.current()),
            std::mem::size_of::<Agent>() * population,
            std::mem::size_of::<i32>() * population,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
        .max(4);
        let staging_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Staging Buffer"),
            size: staging_size as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        debug!(
            "allocated device buffers for {} cells and {} agents",
            cell_count, population
        );

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Slime Bind Group Layout"),
            entries: &[
                uniform_layout_entry(0),
                storage_layout_entry(1, false), // current trail
                storage_layout_entry(2, false), // next trail
                storage_layout_entry(3, false), // agents
                storage_layout_entry(4, false), // desired destinations
                storage_layout_entry(5, true),  // new directions
                storage_layout_entry(6, true),  // sense coins
            ],
        });

        let make_bind_group = |label: &str, current: &wgpu::Buffer, next: &wgpu::Buffer| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout: &bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: config_buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: current.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: next.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: agent_buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 4,
                        resource: desired_buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 5,
                        resource: new_direction_buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 6,
                        resource: coin_buffer.as_entire_binding(),
                    },
                ],
            })
        };
        let bind_group_a = make_bind_group("Slime Bind Group A", &trail_a, &trail_b);
        let bind_group_b = make_bind_group("Slime Bind Group B", &trail_b, &trail_a);

        let pipelines = build_pipelines(&device, &bind_group_layout, program).await?;
        info!(
            "built compute program '{}' for {} agents on a {}x{} grid",
            program.label(),
            population,
            settings.width,
            settings.height
        );

        Ok(Self {
            device,
            queue,
            pipelines,
            _config_buffer: config_buffer,
            trail_buffers: Swapper::new(trail_a, trail_b),
            bind_groups: Swapper::new(bind_group_a, bind_group_b),
            agent_buffer,
            desired_buffer,
            new_direction_buffer,
            coin_buffer,
            staging_buffer,
            resolver: MoveResolver::new(cell_count, population),
            coins: vec![0.0; population],
            trail,
            agents,
        })
    }

    fn cell_count(&self) -> u32 {
        self.trail.len() as u32
    }

    fn dispatch(&self, label: &str, pipeline: &wgpu::ComputePipeline, invocations: u32) {
        if invocations == 0 {
            return;
        }

        let (x, y) = workgroup_counts(invocations);
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
        {
            let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(label),
                timestamp_writes: None,
            });
            compute_pass.set_pipeline(pipeline);
            compute_pass.set_bind_group(0, self.bind_groups.current(), &[]);
            compute_pass.dispatch_workgroups(x, y, 1);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        trace!("dispatched {} as {}x{} workgroups", label, x, y);
    }

    /// Copies the front of `source` into `out`, blocking until the device is done.
    fn read_back<T: bytemuck::Pod>(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        staging_buffer: &wgpu::Buffer,
        source: &wgpu::Buffer,
        out: &mut [T],
    ) -> Result<(), SlimeError> {
        let size = std::mem::size_of_val(out) as wgpu::BufferAddress;
        if size == 0 {
            return Ok(());
        }

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Readback Encoder"),
        });
        encoder.copy_buffer_to_buffer(source, 0, staging_buffer, 0, size);
        queue.submit(std::iter::once(encoder.finish()));

        let buffer_slice = staging_buffer.slice(..size);
        let (tx, rx) = std::sync::mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            if tx.send(result).is_err() {
                error!("Failed to send map_async result: receiver dropped");
            }
        });
        device.poll(wgpu::Maintain::Wait);

        rx.recv().map_err(|_| SlimeError::ReadbackAbandoned)??;

        {
            let data = buffer_slice.get_mapped_range();
            out.copy_from_slice(bytemuck::cast_slice(&data[..]));
        }
        staging_buffer.unmap();

        Ok(())
    }

    fn sync_trail(&mut self) -> Result<(), SlimeError> {
        Self::read_back(
            &self.device,
            &self.queue,
            &self.staging_buffer,
            self.trail_buffers.current(),
            self.trail.current_mut(),
        )
    }

    fn sync_agents(&mut self) -> Result<(), SlimeError> {
        Self::read_back(
            &self.device,
            &self.queue,
            &self.staging_buffer,
            &self.agent_buffer,
            &mut self.agents[..],
        )
    }
}

impl Backend for DeviceBackend {
    fn diffuse(&mut self) -> Result<(), SlimeError> {
        self.dispatch(
            "Diffuse Pass",
            &self.pipelines.diffuse,
            self.cell_count(),
        );
        Ok(())
    }

    fn swap_buffers(&mut self) {
        self.trail_buffers.swap();
        self.bind_groups.swap();
        self.trail.swap();
    }

    fn decay(&mut self) -> Result<(), SlimeError> {
        self.dispatch("Decay Pass", &self.pipelines.decay, self.cell_count());
        Ok(())
    }

    fn move_agents(
        &mut self,
        random: &mut RandomService,
    ) -> Result<ArbitrationOutcome, SlimeError> {
        let population = self.population() as u32;
        self.dispatch(
            "Desired Moves Pass",
            &self.pipelines.desired_moves,
            population,
        );

        Self::read_back(
            &self.device,
            &self.queue,
            &self.staging_buffer,
            &self.desired_buffer,
            self.resolver.desired_mut(),
        )?;
        let outcome = self.resolver.arbitrate(random);

        if population > 0 {
            self.queue.write_buffer(
                &self.desired_buffer,
                0,
                bytemuck::cast_slice(self.resolver.desired()),
            );
            self.queue.write_buffer(
                &self.new_direction_buffer,
                0,
                bytemuck::cast_slice(self.resolver.new_directions()),
            );
        }
        self.dispatch("Move Pass", &self.pipelines.move_agents, population);

        trace!(
            "{} agents moved, {} blocked, {} tried to leave the grid",
            outcome.accepted,
            outcome.blocked,
            outcome.out_of_bounds
        );

        Ok(outcome)
    }

    fn sense(&mut self, random: &mut RandomService) -> Result<(), SlimeError> {
        random.fill_floats(&mut self.coins);
        if !self.coins.is_empty() {
            self.queue
                .write_buffer(&self.coin_buffer, 0, bytemuck::cast_slice(&self.coins[..]));
        }
        self.dispatch(
            "Sense Pass",
            &self.pipelines.sense,
            self.population() as u32,
        );
        Ok(())
    }

    fn render(&mut self, frame: &mut [u8]) -> Result<(), SlimeError> {
        self.sync_trail()?;
        render::project(self.trail.current(), frame)
    }

    fn population(&self) -> usize {
        self.agents.len()
    }

    fn agents(&mut self) -> Result<&[Agent], SlimeError> {
        self.sync_agents()?;
        Ok(&self.agents)
    }

    fn trail(&mut self) -> Result<&TrailField, SlimeError> {
        self.sync_trail()?;
        Ok(&self.trail)
    }
}

/// Splits `invocations` into an `(x, y)` workgroup grid that stays under the
/// per-dimension dispatch limit. Kernels flatten it back with
/// `gid.y * num_workgroups.x * WORKGROUP_SIZE + gid.x`.
fn workgroup_counts(invocations: u32) -> (u32, u32) {
    let groups = (invocations + WORKGROUP_SIZE - 1) / WORKGROUP_SIZE;
    if groups <= MAX_WORKGROUPS_PER_DIMENSION {
        (groups, 1)
    } else {
        let y = (groups + MAX_WORKGROUPS_PER_DIMENSION - 1) / MAX_WORKGROUPS_PER_DIMENSION;
        (MAX_WORKGROUPS_PER_DIMENSION, y)
    }
}

// Bindings can't be empty, so zero-length stores still get one element's worth
fn storage_buffer<T>(
    device: &wgpu::Device,
    label: &str,
    len: usize,
    usage: wgpu::BufferUsages,
) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: (len.max(1) * std::mem::size_of::<T>()) as wgpu::BufferAddress,
        usage,
        mapped_at_creation: false,
    })
}

fn storage_buffer_init<T: bytemuck::Pod>(
    device: &wgpu::Device,
    label: &str,
    contents: &[T],
    usage: wgpu::BufferUsages,
) -> wgpu::Buffer {
    if contents.is_empty() {
        return storage_buffer::<T>(device, label, 0, usage);
    }

    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents: bytemuck::cast_slice(contents),
        usage,
    })
}

fn uniform_layout_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: wgpu::BufferSize::new(std::mem::size_of::<DeviceConfig>() as u64),
        },
        count: None,
    }
}

fn storage_layout_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Compiles `program` and builds one pipeline per entry point. Anything the
/// device rejects (bad WGSL, a missing entry point, a binding that doesn't
/// match the layout) comes back as [`SlimeError::ProgramBuild`].
async fn build_pipelines(
    device: &wgpu::Device,
    bind_group_layout: &wgpu::BindGroupLayout,
    program: &ComputeProgram,
) -> Result<Pipelines, SlimeError> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);

    let shader_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(program.label()),
        source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(program.source())),
    });

    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("Slime Pipeline Layout"),
        bind_group_layouts: &[bind_group_layout],
        push_constant_ranges: &[],
    });

    let pipeline = |entry_point: &str| {
        device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(entry_point),
            layout: Some(&pipeline_layout),
            module: &shader_module,
            entry_point,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        })
    };

    let pipelines = Pipelines {
        diffuse: pipeline(DIFFUSE_ENTRY_POINT),
        decay: pipeline(DECAY_ENTRY_POINT),
        desired_moves: pipeline(DESIRED_MOVES_ENTRY_POINT),
        move_agents: pipeline(MOVE_ENTRY_POINT),
        sense: pipeline(SENSE_ENTRY_POINT),
    };

    match device.pop_error_scope().await {
        Some(error) => Err(SlimeError::ProgramBuild(error.to_string())),
        None => Ok(pipelines),
    }
}
