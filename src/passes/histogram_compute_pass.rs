use frame_graph::{
    AttachmentAccess, CompileContext, ExecuteContext, FrameGraphBuilder, QueueClass,
    ResourceDescriptor, Result, ScopeId, ScopeProducer,
};

use super::{HISTOGRAM_READBACK, SCENE_COLOR, resource_id};
use crate::pass_configs::PassConfigs;

const WORKGROUP_SIZE: u32 = 16;

/// Bins scene luminance into the imported readback buffer on the compute
/// queue.
#[derive(Default)]
pub struct HistogramComputePass {
    width: u32,
    height: u32,
}

impl ScopeProducer<PassConfigs> for HistogramComputePass {
    fn scope_id(&self) -> ScopeId {
        ScopeId::new("histogram_compute_pass")
    }

    fn queue_class(&self) -> QueueClass {
        QueueClass::Compute
    }

    fn is_enabled(&self, configs: &PassConfigs) -> bool {
        configs.histogram.enabled
    }

    fn setup_frame_graph_dependencies(&mut self, builder: &mut FrameGraphBuilder<'_>) -> Result<()> {
        builder
            .use_shader_attachment(resource_id(SCENE_COLOR), AttachmentAccess::READ)
            .use_shader_attachment(resource_id(HISTOGRAM_READBACK), AttachmentAccess::WRITE);
        Ok(())
    }

    fn compile_resources(&mut self, context: &CompileContext<'_, PassConfigs>) -> Result<()> {
        if let Some(ResourceDescriptor::Image(image)) = context.descriptor(resource_id(SCENE_COLOR))
        {
            self.width = image.width;
            self.height = image.height;
        }
        Ok(())
    }

    fn build_command_list(&self, context: &ExecuteContext<'_, PassConfigs>) -> Result<()> {
        let workgroups_x = self.width.div_ceil(WORKGROUP_SIZE);
        let workgroups_y = self.height.div_ceil(WORKGROUP_SIZE);
        context
            .device
            .record_dispatch(context.command_list, [workgroups_x, workgroups_y, 1])?;
        Ok(())
    }
}
