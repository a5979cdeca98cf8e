use std::sync::Arc;

use frame_graph::{
    AttachmentAccess, CompileContext, DeviceError, DrawListTag, DrawPacket, DrawPacketPool,
    ExecuteContext, Format, FrameGraphBuilder, ImageDescriptor, PipelineStateHandle, Result,
    ScopeId, ScopeProducer, ShaderResourceGroupHandle, ViewHandle,
};

use super::{
    BLUR_OUTPUT, BLUR_TEMP, SCENE_COLOR, fullscreen_packet, record_packet, resource_id,
    swapchain_extent,
};
use crate::pass_configs::PassConfigs;

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct BlurConstants {
    input_view: ViewHandle,
    direction: [f32; 2],
}

#[derive(Clone)]
pub struct GaussianBlurPassData {
    pub pipeline: PipelineStateHandle,
    pub shader_resource_group: ShaderResourceGroupHandle,
    pub fullscreen_tag: DrawListTag,
    pub packet_pool: Arc<DrawPacketPool>,
}

/// One direction of the separable blur. With the blur switched off the pass
/// still runs and copies its input through.
struct BlurDirection {
    data: GaussianBlurPassData,
    input: &'static str,
    output: &'static str,
    direction: [f32; 2],
    cached_packet: Option<Arc<DrawPacket>>,
}

impl BlurDirection {
    fn setup(&self, builder: &mut FrameGraphBuilder<'_>) -> Result<()> {
        let (width, height) = swapchain_extent(builder)?;
        let output = builder.create_transient_image(
            self.output,
            ImageDescriptor::new_2d(Format::Rgba16Float, width, height),
        )?;
        builder
            .use_shader_attachment(resource_id(self.input), AttachmentAccess::READ)
            .use_color_attachment(output);
        Ok(())
    }

    fn compile(&mut self, context: &CompileContext<'_, PassConfigs>) -> Result<()> {
        let Some(input_view) = context.view(resource_id(self.input)) else {
            return Err(DeviceError::ViewCreation {
                reason: format!("no view of '{}' for the blur", self.input),
            }
            .into());
        };

        let constants = BlurConstants {
            input_view,
            direction: self.direction,
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

    fn build(&self, context: &ExecuteContext<'_, PassConfigs>) -> Result<()> {
        if context.configs.gaussian_blur.enabled {
            return record_packet(context, self.cached_packet.as_ref());
        }

        let (Some(source), Some(destination)) = (
            context.resource(resource_id(self.input)),
            context.resource(resource_id(self.output)),
        ) else {
            return Err(DeviceError::Recording {
                reason: format!("blur copy from '{}' has no resources", self.input),
            }
            .into());
        };
        context
            .device
            .record_copy(context.command_list, source, destination)?;
        Ok(())
    }
}

pub struct GaussianBlurHorizontalPass {
    blur: BlurDirection,
}

impl GaussianBlurHorizontalPass {
    pub fn new(data: GaussianBlurPassData) -> Self {
        Self {
            blur: BlurDirection {
                data,
                input: SCENE_COLOR,
                output: BLUR_TEMP,
                direction: [1.0, 0.0],
                cached_packet: None,
            },
        }
    }
}

impl ScopeProducer<PassConfigs> for GaussianBlurHorizontalPass {
    fn scope_id(&self) -> ScopeId {
        ScopeId::new("gaussian_blur_horizontal_pass")
    }

    fn setup_frame_graph_dependencies(&mut self, builder: &mut FrameGraphBuilder<'_>) -> Result<()> {
        self.blur.setup(builder)
    }

    fn compile_resources(&mut self, context: &CompileContext<'_, PassConfigs>) -> Result<()> {
        self.blur.compile(context)
    }

    fn build_command_list(&self, context: &ExecuteContext<'_, PassConfigs>) -> Result<()> {
        self.blur.build(context)
    }
}

pub struct GaussianBlurVerticalPass {
    blur: BlurDirection,
}

impl GaussianBlurVerticalPass {
    pub fn new(data: GaussianBlurPassData) -> Self {
        Self {
            blur: BlurDirection {
                data,
                input: BLUR_TEMP,
                output: BLUR_OUTPUT,
                direction: [0.0, 1.0],
                cached_packet: None,
            },
        }
    }
}

impl ScopeProducer<PassConfigs> for GaussianBlurVerticalPass {
    fn scope_id(&self) -> ScopeId {
        ScopeId::new("gaussian_blur_vertical_pass")
    }

    fn setup_frame_graph_dependencies(&mut self, builder: &mut FrameGraphBuilder<'_>) -> Result<()> {
        self.blur.setup(builder)
    }

    fn compile_resources(&mut self, context: &CompileContext<'_, PassConfigs>) -> Result<()> {
        self.blur.compile(context)
    }

    fn build_command_list(&self, context: &ExecuteContext<'_, PassConfigs>) -> Result<()> {
        self.blur.build(context)
    }
}
