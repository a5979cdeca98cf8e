use std::sync::Arc;

use frame_graph::{
    AttachmentAccess, DrawListContext, DrawListTag, ExecuteContext, Format, FrameGraphBuilder,
    ImageDescriptor, Result, ScopeId, ScopeProducer,
};
use parking_lot::RwLock;

use super::{INSTANCE_DATA, SCENE_COLOR, SCENE_DEPTH, resource_id, swapchain_extent};
use crate::pass_configs::PassConfigs;

/// Draw list filled by the application before each frame and read by the
/// scene pass while recording.
pub type SharedDrawList = Arc<RwLock<DrawListContext>>;

pub struct ScenePassData {
    pub draw_list: SharedDrawList,
    pub forward_tag: DrawListTag,
}

/// Renders every forward draw item into the HDR scene target. Large lists are
/// split across command lists by item range.
pub struct ScenePass {
    pub data: ScenePassData,
}

impl ScenePass {
    pub fn new(data: ScenePassData) -> Self {
        Self { data }
    }
}

impl ScopeProducer<PassConfigs> for ScenePass {
    fn scope_id(&self) -> ScopeId {
        ScopeId::new("scene_pass")
    }

    fn setup_frame_graph_dependencies(&mut self, builder: &mut FrameGraphBuilder<'_>) -> Result<()> {
        let (width, height) = swapchain_extent(builder)?;

        let color = builder.create_transient_image(
            SCENE_COLOR,
            ImageDescriptor::new_2d(Format::Rgba16Float, width, height),
        )?;
        let depth = builder.create_transient_image(
            SCENE_DEPTH,
            ImageDescriptor::new_2d(Format::Depth32Float, width, height),
        )?;

        let item_count = self.data.draw_list.read().item_count(self.data.forward_tag);
        builder
            .use_input_assembly(resource_id(INSTANCE_DATA))
            .use_color_attachment(color)
            .use_depth_stencil_attachment(depth, AttachmentAccess::READ_WRITE)
            .set_estimated_item_count(item_count as u32);
        Ok(())
    }

    fn build_command_list(&self, context: &ExecuteContext<'_, PassConfigs>) -> Result<()> {
        let draw_list = self.data.draw_list.read();
        for properties in
            draw_list.draw_list_range(self.data.forward_tag, context.item_range.clone())
        {
            if let Some(item) = properties.item() {
                context.device.record_draw(context.command_list, &item)?;
            }
        }
        Ok(())
    }
}
