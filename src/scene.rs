use std::sync::Arc;

use frame_graph::{
    BufferDescriptor, BufferHandle, DrawArguments, DrawFilterMask, DrawListContext, DrawListTag,
    DrawPacket, DrawPacketBuilder, DrawPacketPool, DrawRequest, IndexBufferView,
    PipelineStateHandle, ShaderResourceGroupHandle, StreamBufferView,
};

use crate::device::HeadlessDevice;

#[derive(Clone)]
pub struct Camera {
    pub position: nalgebra_glm::Vec3,
    pub yaw: f32,
    pub pitch: f32,
    pub fov: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: nalgebra_glm::vec3(0.0, 2.0, -12.0),
            yaw: 90_f32.to_radians(),
            pitch: -10_f32.to_radians(),
            fov: 60.0,
        }
    }
}

impl Camera {
    pub fn view_projection(&self, aspect_ratio: f32) -> nalgebra_glm::Mat4 {
        let projection =
            nalgebra_glm::perspective_lh_zo(aspect_ratio, self.fov.to_radians(), 0.1, 1000.0);

        let forward = nalgebra_glm::vec3(
            self.yaw.cos() * self.pitch.cos(),
            self.pitch.sin(),
            self.yaw.sin() * self.pitch.cos(),
        );
        let target = self.position + forward;
        let view = nalgebra_glm::look_at_lh(&self.position, &target, &nalgebra_glm::Vec3::y());

        projection * view
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct Vertex {
    position: [f32; 4],
    texture_coordinates: [f32; 2],
    texture_index: u32,
    padding: u32,
}

#[repr(C)]
#[derive(Default, Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct ObjectConstants {
    mvp: nalgebra_glm::Mat4,
    texture_index: u32,
    padding: [u32; 3],
}

#[derive(Debug, Clone, Copy)]
struct Mesh {
    first_index: u32,
    index_count: u32,
    texture_index: u32,
}

const MESHES: [Mesh; 3] = [
    Mesh {
        first_index: 0,
        index_count: 6,
        texture_index: 0,
    },
    Mesh {
        first_index: 6,
        index_count: 3,
        texture_index: 2,
    },
    Mesh {
        first_index: 9,
        index_count: 3,
        texture_index: 3,
    },
];

struct SceneObject {
    mesh: Mesh,
    translation: nalgebra_glm::Vec3,
}

/// A grid of textured quads and triangles turned into draw packets every
/// frame.
pub struct Scene {
    pub model: nalgebra_glm::Mat4,
    pub camera: Camera,
    objects: Vec<SceneObject>,
    packets: Vec<Arc<DrawPacket>>,
    packet_pool: Arc<DrawPacketPool>,
    forward_tag: DrawListTag,
    pipeline: PipelineStateHandle,
    material: ShaderResourceGroupHandle,
    vertex_buffer: BufferHandle,
    index_buffer: BufferHandle,
}

impl Scene {
    pub fn new(
        device: &HeadlessDevice,
        forward_tag: DrawListTag,
        packet_pool: Arc<DrawPacketPool>,
        grid_size: u32,
    ) -> Self {
        let vertex_buffer = device.create_buffer(
            "Vertex Buffer",
            BufferDescriptor::new(std::mem::size_of_val(&VERTICES) as u64),
        );
        let index_buffer = device.create_buffer(
            "Index Buffer",
            BufferDescriptor::new(std::mem::size_of_val(&INDICES) as u64),
        );

        let half = grid_size as f32 / 2.0;
        let objects = (0..grid_size * grid_size)
            .map(|index| SceneObject {
                mesh: MESHES[index as usize % MESHES.len()],
                translation: nalgebra_glm::vec3(
                    (index % grid_size) as f32 * 2.0 - half * 2.0,
                    0.0,
                    (index / grid_size) as f32 * 2.0,
                ),
            })
            .collect();

        Self {
            model: nalgebra_glm::Mat4::identity(),
            camera: Camera::default(),
            objects,
            packets: Vec::new(),
            packet_pool,
            forward_tag,
            pipeline: device.create_pipeline_state("Scene Pipeline"),
            material: device.create_shader_resource_group("Texture Atlas"),
            vertex_buffer,
            index_buffer,
        }
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Bytes of per-instance data uploaded each frame.
    pub fn instance_data_size(&self) -> u64 {
        (self.objects.len() * std::mem::size_of::<ObjectConstants>()) as u64
    }

    pub fn update(&mut self, aspect_ratio: f32, delta_time: f32) {
        self.model = nalgebra_glm::rotate(
            &self.model,
            30_f32.to_radians() * delta_time,
            &nalgebra_glm::Vec3::y(),
        );

        let view_projection = self.camera.view_projection(aspect_ratio);
        self.packets = self
            .objects
            .iter()
            .filter_map(|object| {
                let model = nalgebra_glm::translate(&self.model, &object.translation);
                let mvp = view_projection * model;
                let constants = ObjectConstants {
                    mvp,
                    texture_index: object.mesh.texture_index,
                    padding: [0; 3],
                };
                let depth = (mvp * nalgebra_glm::vec4(0.0, 0.0, 0.0, 1.0)).w;
                self.build_packet(object.mesh, &constants, depth_sort_key(depth))
            })
            .collect();
    }

    fn build_packet(
        &self,
        mesh: Mesh,
        constants: &ObjectConstants,
        sort_key: u64,
    ) -> Option<Arc<DrawPacket>> {
        let mut builder = DrawPacketBuilder::begin(self.packet_pool.clone());
        builder
            .set_draw_arguments(DrawArguments::Indexed {
                index_count: mesh.index_count,
                instance_count: 1,
                first_index: mesh.first_index,
                vertex_offset: 0,
                first_instance: 0,
            })
            .set_index_buffer_view(IndexBufferView {
                buffer: self.index_buffer,
                offset: 0,
                size: std::mem::size_of_val(&INDICES) as u32,
                index_size_bytes: 4,
            })
            .add_shader_resource_group(self.material)
            .set_root_constants(bytemuck::bytes_of(constants))
            .set_draw_filter_mask(DrawFilterMask::MAIN_VIEW)
            .add_draw_item(
                DrawRequest::new(self.forward_tag, self.pipeline)
                    .stream_buffer_views([StreamBufferView {
                        buffer: self.vertex_buffer,
                        offset: 0,
                        size: std::mem::size_of_val(&VERTICES) as u32,
                        stride: std::mem::size_of::<Vertex>() as u32,
                    }])
                    .sort_key(sort_key),
            );
        builder.end()
    }

    /// Replaces the contents of `draw_list` with this frame's packets.
    pub fn collect(&self, draw_list: &mut DrawListContext) {
        draw_list.clear();
        for packet in &self.packets {
            draw_list.add_draw_packet(packet);
        }
        draw_list.finalize();
    }
}

/// Front to back: nearer objects get smaller keys.
fn depth_sort_key(depth: f32) -> u64 {
    (depth.max(0.0) * 1024.0) as u64
}

const VERTICES: [Vertex; 10] = [
    Vertex {
        position: [-1.5, -1.0, 0.0, 1.0],
        texture_coordinates: [0.0, 1.0],
        texture_index: 0,
        padding: 0,
    },
    Vertex {
        position: [-0.5, -1.0, 0.0, 1.0],
        texture_coordinates: [1.0, 1.0],
        texture_index: 0,
        padding: 0,
    },
    Vertex {
        position: [-0.5, 0.0, 0.0, 1.0],
        texture_coordinates: [1.0, 0.0],
        texture_index: 0,
        padding: 0,
    },
    Vertex {
        position: [-1.5, 0.0, 0.0, 1.0],
        texture_coordinates: [0.0, 0.0],
        texture_index: 0,
        padding: 0,
    },
    Vertex {
        position: [0.5, -1.0, 0.0, 1.0],
        texture_coordinates: [1.0, 1.0],
        texture_index: 2,
        padding: 0,
    },
    Vertex {
        position: [-0.5, -1.0, 0.0, 1.0],
        texture_coordinates: [0.0, 1.0],
        texture_index: 2,
        padding: 0,
    },
    Vertex {
        position: [0.0, 0.0, 0.0, 1.0],
        texture_coordinates: [0.5, 0.0],
        texture_index: 2,
        padding: 0,
    },
    Vertex {
        position: [1.5, -1.0, 0.0, 1.0],
        texture_coordinates: [1.0, 1.0],
        texture_index: 3,
        padding: 0,
    },
    Vertex {
        position: [0.5, -1.0, 0.0, 1.0],
        texture_coordinates: [0.0, 1.0],
        texture_index: 3,
        padding: 0,
    },
    Vertex {
        position: [1.0, 0.0, 0.0, 1.0],
        texture_coordinates: [0.5, 0.0],
        texture_index: 3,
        padding: 0,
    },
];

const INDICES: [u32; 12] = [0, 1, 2, 0, 2, 3, 4, 5, 6, 7, 8, 9];
