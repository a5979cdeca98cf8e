use frame_graph::{
    AttachmentAccess, BufferHandle, CompileContext, DeviceError, ExecuteContext,
    FrameGraphBuilder, QueueClass, ResourceHandle, Result, ScopeId, ScopeProducer,
};

use super::{INSTANCE_DATA, resource_id};
use crate::pass_configs::PassConfigs;

pub struct UploadPassData {
    pub staging_buffer: BufferHandle,
}

/// Copies the instance data staged on the CPU into the persistent instance
/// buffer on the copy queue.
pub struct UploadPass {
    pub data: UploadPassData,
    destination: Option<ResourceHandle>,
}

impl UploadPass {
    pub fn new(data: UploadPassData) -> Self {
        Self {
            data,
            destination: None,
        }
    }
}

impl ScopeProducer<PassConfigs> for UploadPass {
    fn scope_id(&self) -> ScopeId {
        ScopeId::new("upload_pass")
    }

    fn queue_class(&self) -> QueueClass {
        QueueClass::Copy
    }

    fn is_enabled(&self, configs: &PassConfigs) -> bool {
        configs.upload.enabled
    }

    fn setup_frame_graph_dependencies(&mut self, builder: &mut FrameGraphBuilder<'_>) -> Result<()> {
        builder.use_copy_attachment(resource_id(INSTANCE_DATA), AttachmentAccess::WRITE);
        Ok(())
    }

    fn compile_resources(&mut self, context: &CompileContext<'_, PassConfigs>) -> Result<()> {
        self.destination = context.resource(resource_id(INSTANCE_DATA));
        Ok(())
    }

    fn build_command_list(&self, context: &ExecuteContext<'_, PassConfigs>) -> Result<()> {
        let Some(destination) = self.destination else {
            return Err(DeviceError::Recording {
                reason: "instance buffer was not resolved".to_string(),
            }
            .into());
        };

        context.device.record_copy(
            context.command_list,
            ResourceHandle::Buffer(self.data.staging_buffer),
            destination,
        )?;
        Ok(())
    }
}
