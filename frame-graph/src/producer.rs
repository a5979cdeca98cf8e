use std::ops::Range;

use crate::attachment::{AttachmentDatabase, AttachmentUsageDescriptor};
use crate::device::{BufferHandle, CommandListHandle, Device, ImageHandle, ResourceHandle, ViewHandle};
use crate::error::{FrameGraphError, Result};
use crate::graph::FrameGraphState;
use crate::scope::Scope;
use crate::types::{
    AttachmentAccess, AttachmentUsage, BufferDescriptor, ImageDescriptor, QueueClass,
    ResourceDescriptor, ResourceId, ScopeId,
};

/// Index of a producer in registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProducerIndex(pub usize);

/// Per-frame lifecycle of a producer. Advances one step at a time and resets
/// to `Unregistered` when the next frame begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerState {
    Unregistered,
    DependenciesDeclared,
    Compiled,
    Executed,
}

impl ProducerState {
    pub fn next(self) -> Option<ProducerState> {
        match self {
            ProducerState::Unregistered => Some(ProducerState::DependenciesDeclared),
            ProducerState::DependenciesDeclared => Some(ProducerState::Compiled),
            ProducerState::Compiled => Some(ProducerState::Executed),
            ProducerState::Executed => None,
        }
    }
}

/// A unit of GPU work that owns one scope of the frame graph.
///
/// `C` is the caller's per-frame configuration, handed through to every
/// callback unchanged.
pub trait ScopeProducer<C = ()>: Send + Sync {
    fn scope_id(&self) -> ScopeId;

    /// Read once at registration.
    fn queue_class(&self) -> QueueClass {
        QueueClass::Graphics
    }

    fn device_index(&self) -> usize {
        0
    }

    fn is_enabled(&self, _configs: &C) -> bool {
        true
    }

    fn setup_frame_graph_dependencies(&mut self, builder: &mut FrameGraphBuilder<'_>) -> Result<()>;

    fn compile_resources(&mut self, _context: &CompileContext<'_, C>) -> Result<()> {
        Ok(())
    }

    /// Called once per command list of the scope, possibly from a worker
    /// thread, each time with a distinct `item_range`.
    fn build_command_list(&self, _context: &ExecuteContext<'_, C>) -> Result<()> {
        Ok(())
    }
}

/// Everything a scope declared during setup. Usages are resolved against the
/// attachment database only after every producer ran its setup.
#[derive(Debug, Default)]
pub(crate) struct ScopeDeclaration {
    pub usages: Vec<AttachmentUsageDescriptor>,
    pub execute_after: Vec<ScopeId>,
    pub execute_before: Vec<ScopeId>,
    pub estimated_item_count: u32,
}

pub struct FrameGraphBuilder<'a> {
    scope_id: &'a ScopeId,
    attachments: &'a mut AttachmentDatabase,
    declaration: &'a mut ScopeDeclaration,
}

impl<'a> FrameGraphBuilder<'a> {
    pub(crate) fn new(
        scope_id: &'a ScopeId,
        attachments: &'a mut AttachmentDatabase,
        declaration: &'a mut ScopeDeclaration,
    ) -> Self {
        Self {
            scope_id,
            attachments,
            declaration,
        }
    }

    pub fn scope_id(&self) -> &ScopeId {
        self.scope_id
    }

    /// Descriptor of a resource already defined this frame. Imports are
    /// visible to every producer, transients once their creator ran setup.
    pub fn descriptor(&self, resource_id: ResourceId) -> Option<&ResourceDescriptor> {
        self.attachments
            .find(resource_id)
            .map(|attachment| attachment.descriptor())
    }

    pub fn use_attachment(&mut self, usage: AttachmentUsageDescriptor) -> &mut Self {
        self.declaration.usages.push(usage);
        self
    }

    pub fn use_color_attachment(&mut self, resource_id: ResourceId) -> &mut Self {
        self.use_attachment(AttachmentUsageDescriptor::new(
            resource_id,
            AttachmentUsage::RenderTarget,
            AttachmentAccess::WRITE,
        ))
    }

    pub fn use_depth_stencil_attachment(
        &mut self,
        resource_id: ResourceId,
        access: AttachmentAccess,
    ) -> &mut Self {
        self.use_attachment(AttachmentUsageDescriptor::new(
            resource_id,
            AttachmentUsage::DepthStencil,
            access,
        ))
    }

    pub fn use_shader_attachment(
        &mut self,
        resource_id: ResourceId,
        access: AttachmentAccess,
    ) -> &mut Self {
        self.use_attachment(AttachmentUsageDescriptor::new(
            resource_id,
            AttachmentUsage::ShaderResource,
            access,
        ))
    }

    pub fn use_copy_attachment(
        &mut self,
        resource_id: ResourceId,
        access: AttachmentAccess,
    ) -> &mut Self {
        self.use_attachment(AttachmentUsageDescriptor::new(
            resource_id,
            AttachmentUsage::Copy,
            access,
        ))
    }

    pub fn use_indirect_attachment(&mut self, resource_id: ResourceId) -> &mut Self {
        self.use_attachment(AttachmentUsageDescriptor::new(
            resource_id,
            AttachmentUsage::Indirect,
            AttachmentAccess::READ,
        ))
    }

    pub fn use_resolve_attachment(&mut self, resource_id: ResourceId) -> &mut Self {
        self.use_attachment(AttachmentUsageDescriptor::new(
            resource_id,
            AttachmentUsage::Resolve,
            AttachmentAccess::WRITE,
        ))
    }

    pub fn use_input_assembly(&mut self, resource_id: ResourceId) -> &mut Self {
        self.use_attachment(AttachmentUsageDescriptor::new(
            resource_id,
            AttachmentUsage::InputAssembly,
            AttachmentAccess::READ,
        ))
    }

    pub fn create_transient_image(
        &mut self,
        name: &str,
        descriptor: ImageDescriptor,
    ) -> Result<ResourceId> {
        self.attachments
            .create_transient(name, ResourceDescriptor::Image(descriptor))
    }

    pub fn create_transient_buffer(
        &mut self,
        name: &str,
        descriptor: BufferDescriptor,
    ) -> Result<ResourceId> {
        self.attachments
            .create_transient(name, ResourceDescriptor::Buffer(descriptor))
    }

    pub fn import_image(
        &mut self,
        name: &str,
        image: ImageHandle,
        descriptor: ImageDescriptor,
    ) -> Result<ResourceId> {
        self.attachments.import(
            name,
            ResourceHandle::Image(image),
            ResourceDescriptor::Image(descriptor),
        )
    }

    pub fn import_buffer(
        &mut self,
        name: &str,
        buffer: BufferHandle,
        descriptor: BufferDescriptor,
    ) -> Result<ResourceId> {
        self.attachments.import(
            name,
            ResourceHandle::Buffer(buffer),
            ResourceDescriptor::Buffer(descriptor),
        )
    }

    pub fn execute_after(&mut self, scope: impl Into<ScopeId>) -> &mut Self {
        self.declaration.execute_after.push(scope.into());
        self
    }

    pub fn execute_before(&mut self, scope: impl Into<ScopeId>) -> &mut Self {
        self.declaration.execute_before.push(scope.into());
        self
    }

    /// Drives how many command lists the scope is split into.
    pub fn set_estimated_item_count(&mut self, count: u32) -> &mut Self {
        self.declaration.estimated_item_count = count;
        self
    }
}

pub struct CompileContext<'a, C = ()> {
    pub configs: &'a C,
    pub scope: &'a Scope,
    pub attachments: &'a AttachmentDatabase,
    pub frame_index: u64,
}

impl<C> CompileContext<'_, C> {
    /// The view this scope binds for `resource_id`.
    pub fn view(&self, resource_id: ResourceId) -> Option<ViewHandle> {
        scope_view(self.scope, self.attachments, resource_id)
    }

    pub fn resource(&self, resource_id: ResourceId) -> Option<ResourceHandle> {
        self.attachments
            .find(resource_id)
            .and_then(|attachment| attachment.resource())
    }

    pub fn descriptor(&self, resource_id: ResourceId) -> Option<&ResourceDescriptor> {
        self.attachments
            .find(resource_id)
            .map(|attachment| attachment.descriptor())
    }
}

pub struct ExecuteContext<'a, C = ()> {
    pub configs: &'a C,
    pub scope: &'a Scope,
    pub attachments: &'a AttachmentDatabase,
    pub device: &'a dyn Device,
    pub command_list: CommandListHandle,
    pub command_list_index: usize,
    pub item_range: Range<u32>,
    pub frame_index: u64,
}

impl<C> ExecuteContext<'_, C> {
    pub fn view(&self, resource_id: ResourceId) -> Option<ViewHandle> {
        scope_view(self.scope, self.attachments, resource_id)
    }

    pub fn resource(&self, resource_id: ResourceId) -> Option<ResourceHandle> {
        self.attachments
            .find(resource_id)
            .and_then(|attachment| attachment.resource())
    }
}

fn scope_view(
    scope: &Scope,
    attachments: &AttachmentDatabase,
    resource_id: ResourceId,
) -> Option<ViewHandle> {
    scope
        .attachments()
        .iter()
        .map(|&handle| attachments.scope_attachment(handle))
        .find(|attachment| attachment.resource_id() == resource_id)
        .and_then(|attachment| attachment.view())
}

pub(crate) struct ProducerSlot<C> {
    pub producer: Box<dyn ScopeProducer<C>>,
    pub scope_id: ScopeId,
    pub queue_class: QueueClass,
    pub device_index: usize,
    pub state: ProducerState,
}

impl<C> ProducerSlot<C> {
    pub fn new(producer: Box<dyn ScopeProducer<C>>) -> Self {
        Self {
            scope_id: producer.scope_id(),
            queue_class: producer.queue_class(),
            device_index: producer.device_index(),
            producer,
            state: ProducerState::Unregistered,
        }
    }

    pub fn advance(
        &mut self,
        to: ProducerState,
        operation: &'static str,
        graph_state: FrameGraphState,
    ) -> Result<()> {
        if self.state.next() != Some(to) {
            log::error!(
                "Scope '{}' cannot move from {:?} to {:?}",
                self.scope_id,
                self.state,
                to
            );
            return Err(FrameGraphError::InvalidState {
                operation,
                state: graph_state,
            });
        }
        self.state = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl ScopeProducer for Noop {
        fn scope_id(&self) -> ScopeId {
            ScopeId::new("noop")
        }

        fn setup_frame_graph_dependencies(&mut self, _builder: &mut FrameGraphBuilder<'_>) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn producer_states_advance_one_step_at_a_time() {
        let mut slot = ProducerSlot::new(Box::new(Noop) as Box<dyn ScopeProducer>);
        assert_eq!(slot.scope_id, ScopeId::new("noop"));
        assert_eq!(slot.queue_class, QueueClass::Graphics);

        assert!(
            slot.advance(ProducerState::Compiled, "compile", FrameGraphState::Compiling)
                .is_err()
        );
        slot.advance(
            ProducerState::DependenciesDeclared,
            "begin_frame",
            FrameGraphState::CollectingScopes,
        )
        .unwrap();
        slot.advance(ProducerState::Compiled, "compile", FrameGraphState::Compiling)
            .unwrap();
        slot.advance(ProducerState::Executed, "execute", FrameGraphState::Executing)
            .unwrap();
        assert!(
            slot.advance(ProducerState::Executed, "execute", FrameGraphState::Executing)
                .is_err()
        );
    }

    #[test]
    fn builder_records_usages_without_resolving_them() {
        let scope_id = ScopeId::new("lighting");
        let mut attachments = AttachmentDatabase::new();
        let mut declaration = ScopeDeclaration::default();
        let mut builder = FrameGraphBuilder::new(&scope_id, &mut attachments, &mut declaration);

        let hdr = builder
            .create_transient_image(
                "hdr",
                ImageDescriptor::new_2d(crate::types::Format::Rgba16Float, 32, 32),
            )
            .unwrap();
        builder
            .use_color_attachment(hdr)
            .use_shader_attachment(ResourceId::from_name("defined_later"), AttachmentAccess::READ)
            .execute_after("shadows")
            .set_estimated_item_count(12);

        assert_eq!(declaration.usages.len(), 2);
        assert_eq!(declaration.execute_after, vec![ScopeId::new("shadows")]);
        assert_eq!(declaration.estimated_item_count, 12);
        assert!(attachments.contains(hdr));
    }
}
