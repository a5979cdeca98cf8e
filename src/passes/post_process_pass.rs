use std::sync::Arc;

use frame_graph::{
    AttachmentAccess, CompileContext, DeviceError, DrawListTag, DrawPacket, DrawPacketPool,
    ExecuteContext, Format, FrameGraphBuilder, ImageDescriptor, PipelineStateHandle, Result,
    ScopeId, ScopeProducer, ShaderResourceGroupHandle, ViewHandle,
};

use super::{
    BLUR_OUTPUT, LDR_COLOR, fullscreen_packet, record_packet, resource_id, swapchain_extent,
};
use crate::pass_configs::PassConfigs;

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct ToneMapConstants {
    hdr_view: ViewHandle,
    exposure: f32,
    gamma: f32,
}

pub struct PostProcessPassData {
    pub pipeline: PipelineStateHandle,
    pub shader_resource_group: ShaderResourceGroupHandle,
    pub fullscreen_tag: DrawListTag,
    pub packet_pool: Arc<DrawPacketPool>,
}

/// Tone maps the blurred HDR image into an LDR target.
pub struct PostProcessPass {
    pub data: PostProcessPassData,
    cached_packet: Option<Arc<DrawPacket>>,
}

impl PostProcessPass {
    pub fn new(data: PostProcessPassData) -> Self {
        Self {
            data,
            cached_packet: None,
        }
    }
}

impl ScopeProducer<PassConfigs> for PostProcessPass {
    fn scope_id(&self) -> ScopeId {
        ScopeId::new("post_process_pass")
    }

    fn setup_frame_graph_dependencies(&mut self, builder: &mut FrameGraphBuilder<'_>) -> Result<()> {
        let (width, height) = swapchain_extent(builder)?;
        let output = builder.create_transient_image(
            LDR_COLOR,
            ImageDescriptor::new_2d(Format::Rgba8Unorm, width, height),
        )?;
        builder
            .use_shader_attachment(resource_id(BLUR_OUTPUT), AttachmentAccess::READ)
            .use_color_attachment(output);
        Ok(())
    }

    fn compile_resources(&mut self, context: &CompileContext<'_, PassConfigs>) -> Result<()> {
        let Some(hdr_view) = context.view(resource_id(BLUR_OUTPUT)) else {
            return Err(DeviceError::ViewCreation {
                reason: "no view of the HDR input for tone mapping".to_string(),
            }
            .into());
        };

        let settings = &context.configs.post_process;
        let constants = ToneMapConstants {
            hdr_view,
            exposure: settings.exposure,
            gamma: settings.gamma,
        };
        self.cached_packet = fullscreen_packet(
            self.data.packet_pool.clone(),
            self.data.fullscreen_tag,
            self.data.pipeline,
            self.data.shader_resource_group,
            bytemuck::bytes_of(&constants),
        );
        Ok(())
    }

    fn build_command_list(&self, context: &ExecuteContext<'_, PassConfigs>) -> Result<()> {
        record_packet(context, self.cached_packet.as_ref())
    }
}
