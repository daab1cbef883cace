use std::sync::Arc;
use std::sync::mpsc;
use std::time::Instant;

use tessel_geom::Vec3;
use tessel_mesh_cpu::{ChunkMesh, MeshAccumulator, SourceMesh, VoxelMap};
use tessel_palette::{Category, PaletteSnapshot};
use wgpu::util::DeviceExt;

use crate::error::GpuError;
use crate::layout::{CULLED, PackedPalette, Params, Plan, plan_instances};

const WORKGROUP_SIZE: u32 = 64;
const STORAGE_BINDINGS: u32 = 7;

struct UploadedPalette {
    snapshot: Arc<PaletteSnapshot>,
    packed: PackedPalette,
    meta: wgpu::Buffer,
    vertices: wgpu::Buffer,
    indices: wgpu::Buffer,
}

/// Culled-face chunk meshing on a compute device.
///
/// The shader expands every `(block, group)` instance and culls hidden triangles; the host
/// then compacts the readback into the same category buffers the CPU builder produces.
pub struct GpuMesher {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::ComputePipeline,
    bind_layout: wgpu::BindGroupLayout,
    limits: wgpu::Limits,
    adapter_name: String,
    palette: Option<UploadedPalette>,
}

fn elapsed_ms(start: Instant) -> u32 {
    start.elapsed().as_millis().min(u128::from(u32::MAX)) as u32
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
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

impl GpuMesher {
    /// Picks an adapter and compiles the expansion shader. Fails when no adapter can run
    /// compute shaders with enough storage bindings.
    pub fn new() -> Result<Self, GpuError> {
        pollster::block_on(Self::init())
    }

    async fn init() -> Result<Self, GpuError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| GpuError::NoAdapter(e.to_string()))?;
        let info = adapter.get_info();
        let limits = adapter.limits();
        if !adapter
            .get_downlevel_capabilities()
            .flags
            .contains(wgpu::DownlevelFlags::COMPUTE_SHADERS)
            || limits.max_storage_buffers_per_shader_stage < STORAGE_BINDINGS
        {
            return Err(GpuError::NoComputeSupport(info.name));
        }
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("tessel-mesh"),
                required_features: wgpu::Features::empty(),
                required_limits: limits.clone(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await
            .map_err(|e| GpuError::RequestDevice(e.to_string()))?;

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("expand-shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("expand.wgsl").into()),
        });
        let mut entries = vec![wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }];
        entries.extend((1..=5).map(|b| storage_entry(b, true)));
        entries.extend((6..=7).map(|b| storage_entry(b, false)));
        let bind_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("expand-bind-layout"),
            entries: &entries,
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("expand-pipeline-layout"),
            bind_group_layouts: &[&bind_layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("expand-pipeline"),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });
        if let Some(err) = device.pop_error_scope().await {
            return Err(GpuError::Validation(err.to_string()));
        }

        log::info!(
            target: "events",
            "gpu mesher on {} ({:?}, {:?})",
            info.name,
            info.backend,
            info.device_type
        );
        Ok(Self {
            device,
            queue,
            pipeline,
            bind_layout,
            limits,
            adapter_name: info.name,
            palette: None,
        })
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    pub fn has_palette(&self) -> bool {
        self.palette.is_some()
    }

    fn binding_limit(&self) -> u64 {
        u64::from(self.limits.max_storage_buffer_binding_size).min(self.limits.max_buffer_size)
    }

    fn check_size(&self, what: &'static str, bytes: u64) -> Result<(), GpuError> {
        let limit = self.binding_limit();
        if bytes > limit {
            return Err(GpuError::TooLarge { what, bytes, limit });
        }
        Ok(())
    }

    fn storage_init<T: bytemuck::Pod>(
        &self,
        label: &str,
        data: &[T],
        usage: wgpu::BufferUsages,
    ) -> wgpu::Buffer {
        // zero-sized bindings are invalid
        let pad = [0u8; 4];
        let contents: &[u8] = if data.is_empty() {
            &pad
        } else {
            bytemuck::cast_slice(data)
        };
        self.device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents,
                usage: wgpu::BufferUsages::STORAGE | usage,
            })
    }

    /// Packs and uploads the palette geometry; replaces any earlier upload.
    pub fn upload_palette(&mut self, snapshot: Arc<PaletteSnapshot>) -> Result<(), GpuError> {
        let start = Instant::now();
        let packed = PackedPalette::pack(&snapshot);
        self.check_size("palette metadata", packed.meta.len() as u64 * 4)?;
        self.check_size("palette vertices", packed.vertices.len() as u64 * 4)?;
        self.check_size("palette indices", packed.indices.len() as u64 * 4)?;
        let none = wgpu::BufferUsages::empty();
        let meta = self.storage_init("palette-meta", &packed.meta, none);
        let vertices = self.storage_init("palette-vertices", &packed.vertices, none);
        let indices = self.storage_init("palette-indices", &packed.indices, none);
        log::info!(
            target: "perf",
            "ms={} gpu_upload_palette generation={} entries={} groups={} verts={}",
            elapsed_ms(start),
            snapshot.generation,
            packed.entry_count(),
            packed.groups.len(),
            packed.vertices.len() / crate::layout::VERTEX_STRIDE
        );
        self.palette = Some(UploadedPalette {
            snapshot,
            packed,
            meta,
            vertices,
            indices,
        });
        Ok(())
    }

    /// Workgroup grid covering `instances`; spills into `y` past the per-dimension limit.
    fn dispatch_size(&self, instances: u32) -> Result<(u32, u32), GpuError> {
        let groups = instances.div_ceil(WORKGROUP_SIZE);
        let max = self.limits.max_compute_workgroups_per_dimension.max(1);
        let x = groups.min(max);
        let y = groups.div_ceil(x.max(1));
        if y > max {
            return Err(GpuError::TooLarge {
                what: "instance dispatch",
                bytes: u64::from(instances) * 32,
                limit: u64::from(max) * u64::from(max) * u64::from(WORKGROUP_SIZE) * 32,
            });
        }
        Ok((x, y))
    }

    /// Builds one chunk; output matches [`tessel_mesh_cpu::MeshBuilder::build_chunk`] in
    /// culled mode.
    pub fn build_chunk(
        &self,
        blocks: &[i32],
        origin: [i32; 3],
        quantize: bool,
    ) -> Result<ChunkMesh, GpuError> {
        let uploaded = self.palette.as_ref().ok_or(GpuError::NoPalette)?;
        if blocks.len() % 4 != 0 {
            return Err(GpuError::BadStride(blocks.len()));
        }
        if blocks.is_empty() {
            return Ok(ChunkMesh::empty());
        }
        let start = Instant::now();
        let no_geometry = ChunkMesh {
            meshes: Vec::new(),
            origin,
        };
        let Some(map) = VoxelMap::from_records(blocks) else {
            return Ok(no_geometry);
        };
        let plan = plan_instances(&uploaded.snapshot, &uploaded.packed, blocks);
        if plan.instances.is_empty() {
            return Ok(no_geometry);
        }
        let (verts, indices) = self.dispatch(uploaded, &map, origin, &plan)?;
        let (mesh, culled) = compact(&uploaded.packed, &plan, &verts, &indices, origin, quantize);
        log::debug!(
            target: "perf",
            "ms={} gpu_build_chunk blocks={} instances={} culled_tris={} tris={} verts={} origin={:?}",
            elapsed_ms(start),
            blocks.len() / 4,
            plan.instances.len(),
            culled,
            mesh.triangle_count(),
            mesh.vertex_count(),
            origin
        );
        Ok(mesh)
    }

    fn dispatch(
        &self,
        uploaded: &UploadedPalette,
        map: &VoxelMap,
        origin: [i32; 3],
        plan: &Plan,
    ) -> Result<(Vec<f32>, Vec<u32>), GpuError> {
        let out_vertex_bytes = u64::from(plan.total_vertices) * 8 * 4;
        let out_index_bytes = u64::from(plan.total_indices) * 4;
        self.check_size("voxel map", map.cells().len() as u64 * 4)?;
        self.check_size("instance table", plan.words.len() as u64 * 4)?;
        self.check_size("output vertices", out_vertex_bytes)?;
        self.check_size("output indices", out_index_bytes)?;
        let (gx, gy) = self.dispatch_size(plan.instances.len() as u32)?;

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let params = Params::new(map, origin, &uploaded.packed, plan);
        let params_buf = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("expand-params"),
                contents: bytemuck::bytes_of(&params),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let none = wgpu::BufferUsages::empty();
        let cells = self.storage_init("voxel-cells", map.cells(), none);
        let instances = self.storage_init("instances", &plan.words, none);
        let out_vertex_size = out_vertex_bytes.max(4);
        let out_index_size = out_index_bytes.max(4);
        let out_vertices = self.output_buffer("out-vertices", out_vertex_size, false);
        let out_indices = self.output_buffer("out-indices", out_index_size, false);
        let staging_vertices = self.output_buffer("staging-vertices", out_vertex_size, true);
        let staging_indices = self.output_buffer("staging-indices", out_index_size, true);

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("expand-bind-group"),
            layout: &self.bind_layout,
            entries: &[
                params_buf.as_entire_binding(),
                cells.as_entire_binding(),
                uploaded.meta.as_entire_binding(),
                uploaded.vertices.as_entire_binding(),
                uploaded.indices.as_entire_binding(),
                instances.as_entire_binding(),
                out_vertices.as_entire_binding(),
                out_indices.as_entire_binding(),
            ]
            .into_iter()
            .enumerate()
            .map(|(binding, resource)| wgpu::BindGroupEntry {
                binding: binding as u32,
                resource,
            })
            .collect::<Vec<_>>(),
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("expand-encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("expand-pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(gx, gy, 1);
        }
        encoder.copy_buffer_to_buffer(&out_vertices, 0, &staging_vertices, 0, out_vertex_size);
        encoder.copy_buffer_to_buffer(&out_indices, 0, &staging_indices, 0, out_index_size);
        self.queue.submit(Some(encoder.finish()));
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(GpuError::Validation(err.to_string()));
        }

        let verts = self.read_back::<f32>(&staging_vertices, plan.total_vertices as usize * 8)?;
        let indices = self.read_back::<u32>(&staging_indices, plan.total_indices as usize)?;
        Ok((verts, indices))
    }

    fn output_buffer(&self, label: &str, size: u64, staging: bool) -> wgpu::Buffer {
        let usage = if staging {
            wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST
        } else {
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC
        };
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage,
            mapped_at_creation: false,
        })
    }

    fn read_back<T: bytemuck::Pod>(
        &self,
        staging: &wgpu::Buffer,
        len: usize,
    ) -> Result<Vec<T>, GpuError> {
        let slice = staging.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device
            .poll(wgpu::PollType::Wait)
            .map_err(|e| GpuError::Readback(e.to_string()))?;
        rx.recv()
            .map_err(|e| GpuError::Readback(e.to_string()))?
            .map_err(|e| GpuError::Readback(e.to_string()))?;
        let out = {
            let data = slice.get_mapped_range();
            let values: &[T] = bytemuck::cast_slice(&data);
            values[..len.min(values.len())].to_vec()
        };
        staging.unmap();
        Ok(out)
    }
}

/// Copies each instance's surviving triangles into per-category buffers, in plan order.
fn compact(
    packed: &PackedPalette,
    plan: &Plan,
    verts: &[f32],
    indices: &[u32],
    origin: [i32; 3],
    quantize: bool,
) -> (ChunkMesh, usize) {
    let total = plan.total_vertices as usize;
    let (positions, rest) = verts.split_at((total * 3).min(verts.len()));
    let (normals, uvs) = rest.split_at((total * 3).min(rest.len()));
    let mut accs: [MeshAccumulator; 5] = Default::default();
    let mut visible = Vec::new();
    let mut culled = 0;
    for inst in &plan.instances {
        let info = packed.groups[inst.group as usize];
        let v0 = inst.out_vertex as usize;
        let v1 = v0 + info.vertex_count as usize;
        let i0 = inst.out_index as usize;
        let i1 = i0 + info.index_count as usize;
        let (Some(p), Some(n), Some(uv), Some(idx)) = (
            positions.get(v0 * 3..v1 * 3),
            normals.get(v0 * 3..v1 * 3),
            uvs.get(v0 * 2..v1 * 2),
            indices.get(i0..i1),
        ) else {
            continue;
        };
        visible.clear();
        for (t, tri) in idx.chunks_exact(3).enumerate() {
            if tri[0] == CULLED {
                culled += 1;
            } else {
                visible.push(t as u32);
            }
        }
        if visible.is_empty() {
            continue;
        }
        let src = SourceMesh {
            positions: p,
            normals: n,
            uvs: uv,
            indices: idx,
        };
        accs[inst.category.index()].push_instance(src, Vec3::ZERO, &visible, info.material_index);
    }
    let meshes = Category::ALL
        .into_iter()
        .zip(accs)
        .filter_map(|(category, acc)| acc.finish(category, quantize))
        .collect();
    (ChunkMesh { meshes, origin }, culled)
}
