pub mod blit_pass;
pub mod gaussian_blur_pass;
pub mod histogram_compute_pass;
pub mod post_process_pass;
pub mod scene_pass;
pub mod upload_pass;

pub use blit_pass::{BlitPass, BlitPassData};
pub use gaussian_blur_pass::{
    GaussianBlurHorizontalPass, GaussianBlurPassData, GaussianBlurVerticalPass,
};
pub use histogram_compute_pass::HistogramComputePass;
pub use post_process_pass::{PostProcessPass, PostProcessPassData};
pub use scene_pass::{ScenePass, ScenePassData, SharedDrawList};
pub use upload_pass::{UploadPass, UploadPassData};

use std::sync::Arc;

use frame_graph::{
    ConfigurationError, DeviceError, DrawArguments, DrawListTag, DrawPacket, DrawPacketAllocator,
    DrawPacketBuilder, DrawRequest, ExecuteContext, FrameGraphBuilder, PipelineStateHandle,
    ResourceDescriptor, ResourceId, Result, ShaderResourceGroupHandle,
};

pub const SWAPCHAIN: &str = "swapchain";
pub const INSTANCE_DATA: &str = "instance_data";
pub const HISTOGRAM_READBACK: &str = "histogram_readback";
pub const SCENE_COLOR: &str = "scene_color";
pub const SCENE_DEPTH: &str = "scene_depth";
pub const BLUR_TEMP: &str = "blur_temp";
pub const BLUR_OUTPUT: &str = "blur_output";
pub const LDR_COLOR: &str = "ldr_color";

pub fn resource_id(name: &str) -> ResourceId {
    ResourceId::from_name(name)
}

/// Size of the imported swapchain, which every intermediate target follows.
pub(crate) fn swapchain_extent(builder: &FrameGraphBuilder<'_>) -> Result<(u32, u32)> {
    match builder.descriptor(resource_id(SWAPCHAIN)) {
        Some(ResourceDescriptor::Image(image)) => Ok((image.width, image.height)),
        _ => Err(ConfigurationError::UndefinedAttachment {
            scope: builder.scope_id().clone(),
            id: resource_id(SWAPCHAIN),
        }
        .into()),
    }
}

/// A single fullscreen triangle drawn with `pipeline`.
pub(crate) fn fullscreen_packet(
    allocator: Arc<dyn DrawPacketAllocator>,
    tag: DrawListTag,
    pipeline: PipelineStateHandle,
    shader_resource_group: ShaderResourceGroupHandle,
    root_constants: &[u8],
) -> Option<Arc<DrawPacket>> {
    let mut builder = DrawPacketBuilder::begin(allocator);
    builder
        .set_draw_arguments(DrawArguments::Linear {
            vertex_count: 3,
            instance_count: 1,
            first_vertex: 0,
            first_instance: 0,
        })
        .add_shader_resource_group(shader_resource_group)
        .set_root_constants(root_constants)
        .add_draw_item(DrawRequest::new(tag, pipeline));
    builder.end()
}

pub(crate) fn record_packet<C>(
    context: &ExecuteContext<'_, C>,
    packet: Option<&Arc<DrawPacket>>,
) -> Result<()> {
    let Some(packet) = packet else {
        return Err(DeviceError::Recording {
            reason: format!("scope '{}' has no compiled draw packet", context.scope.id()),
        }
        .into());
    };

    for item in packet.draw_items() {
        context.device.record_draw(context.command_list, &item)?;
    }
    Ok(())
}
