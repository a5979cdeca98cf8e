use std::sync::Arc;

use frame_graph::{
    AttachmentAccess, CompileContext, DeviceError, DrawListTag, DrawPacket, DrawPacketPool,
    ExecuteContext, FrameGraphBuilder, PipelineStateHandle, Result, ScopeId, ScopeProducer,
    ShaderResourceGroupHandle, ViewHandle,
};

use super::{LDR_COLOR, SWAPCHAIN, fullscreen_packet, record_packet, resource_id};
use crate::pass_configs::PassConfigs;

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct BlitConstants {
    input_view: ViewHandle,
}

pub struct BlitPassData {
    pub pipeline: PipelineStateHandle,
    pub shader_resource_group: ShaderResourceGroupHandle,
    pub fullscreen_tag: DrawListTag,
    pub packet_pool: Arc<DrawPacketPool>,
}

/// Presents the final LDR image by drawing it into the swapchain.
pub struct BlitPass {
    pub data: BlitPassData,
    name: String,
    cached_packet: Option<Arc<DrawPacket>>,
}

impl BlitPass {
    pub fn new(data: BlitPassData, name: String) -> Self {
        Self {
            data,
            name,
            cached_packet: None,
        }
    }
}

impl ScopeProducer<PassConfigs> for BlitPass {
    fn scope_id(&self) -> ScopeId {
        ScopeId::new(self.name.as_str())
    }

    fn setup_frame_graph_dependencies(&mut self, builder: &mut FrameGraphBuilder<'_>) -> Result<()> {
        builder
            .use_shader_attachment(resource_id(LDR_COLOR), AttachmentAccess::READ)
            .use_color_attachment(resource_id(SWAPCHAIN));
        Ok(())
    }

    fn compile_resources(&mut self, context: &CompileContext<'_, PassConfigs>) -> Result<()> {
        let Some(input_view) = context.view(resource_id(LDR_COLOR)) else {
            return Err(DeviceError::ViewCreation {
                reason: format!("'{}' has no view of its input", self.name),
            }
            .into());
        };

        self.cached_packet = fullscreen_packet(
            self.data.packet_pool.clone(),
            self.data.fullscreen_tag,
            self.data.pipeline,
            self.data.shader_resource_group,
            bytemuck::bytes_of(&BlitConstants { input_view }),
        );
        Ok(())
    }

    fn build_command_list(&self, context: &ExecuteContext<'_, PassConfigs>) -> Result<()> {
        record_packet(context, self.cached_packet.as_ref())
    }
}
