use std::collections::HashMap;

use crate::device::{ResourceHandle, ViewHandle};
use crate::error::{ConfigurationError, Result};
use crate::scope::ScopeIndex;
use crate::types::{
    AttachmentAccess, AttachmentUsage, Lifetime, ResourceDescriptor, ResourceId, ResourceKind,
    ResourceState, ScopeId, ViewDescriptor,
};

/// Index of a [`ScopeAttachment`] in the frame's attachment arena.
///
/// Handles are only meaningful for the frame that produced them; the arena is
/// cleared when the frame ends or is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttachmentHandle(pub(crate) usize);

impl AttachmentHandle {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentLifetimeType {
    Transient,
    Imported,
}

#[derive(Debug, Clone)]
pub struct FrameAttachment {
    resource_id: ResourceId,
    name: String,
    lifetime_type: AttachmentLifetimeType,
    descriptor: ResourceDescriptor,
    resource: Option<ResourceHandle>,
    first_scope_attachment: Option<AttachmentHandle>,
    last_scope_attachment: Option<AttachmentHandle>,
    lifetime: Option<Lifetime>,
}

impl FrameAttachment {
    pub fn resource_id(&self) -> ResourceId {
        self.resource_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lifetime_type(&self) -> AttachmentLifetimeType {
        self.lifetime_type
    }

    pub fn is_transient(&self) -> bool {
        self.lifetime_type == AttachmentLifetimeType::Transient
    }

    pub fn descriptor(&self) -> &ResourceDescriptor {
        &self.descriptor
    }

    pub fn kind(&self) -> ResourceKind {
        self.descriptor.kind()
    }

    /// The backing resource. Transient attachments only receive one once the
    /// frame is compiled.
    pub fn resource(&self) -> Option<ResourceHandle> {
        self.resource
    }

    pub fn first_scope_attachment(&self) -> Option<AttachmentHandle> {
        self.first_scope_attachment
    }

    pub fn last_scope_attachment(&self) -> Option<AttachmentHandle> {
        self.last_scope_attachment
    }

    /// `[start, end]` in execution-order indices, known after compile.
    pub fn lifetime(&self) -> Option<Lifetime> {
        self.lifetime
    }
}

#[derive(Debug, Clone)]
pub struct ScopeAttachment {
    scope: ScopeIndex,
    resource_id: ResourceId,
    usage: AttachmentUsage,
    access: AttachmentAccess,
    view_descriptor: ViewDescriptor,
    view: Option<ViewHandle>,
    prev: Option<AttachmentHandle>,
    next: Option<AttachmentHandle>,
}

impl ScopeAttachment {
    pub fn scope(&self) -> ScopeIndex {
        self.scope
    }

    pub fn resource_id(&self) -> ResourceId {
        self.resource_id
    }

    pub fn usage(&self) -> AttachmentUsage {
        self.usage
    }

    pub fn access(&self) -> AttachmentAccess {
        self.access
    }

    pub fn state(&self) -> ResourceState {
        ResourceState::new(self.usage, self.access)
    }

    pub fn view_descriptor(&self) -> &ViewDescriptor {
        &self.view_descriptor
    }

    pub fn view(&self) -> Option<ViewHandle> {
        self.view
    }

    pub fn prev(&self) -> Option<AttachmentHandle> {
        self.prev
    }

    pub fn next(&self) -> Option<AttachmentHandle> {
        self.next
    }
}

/// One declared usage, before it is resolved against the database.
#[derive(Debug, Clone)]
pub struct AttachmentUsageDescriptor {
    pub resource_id: ResourceId,
    pub usage: AttachmentUsage,
    pub access: AttachmentAccess,
    pub view: ViewDescriptor,
}

impl AttachmentUsageDescriptor {
    pub fn new(resource_id: ResourceId, usage: AttachmentUsage, access: AttachmentAccess) -> Self {
        Self {
            resource_id,
            usage,
            access,
            view: ViewDescriptor::Whole,
        }
    }

    pub fn with_view(mut self, view: ViewDescriptor) -> Self {
        self.view = view;
        self
    }
}

/// Per-frame arena of frame attachments and their scope attachment chains.
#[derive(Debug, Default)]
pub struct AttachmentDatabase {
    frame_attachments: Vec<FrameAttachment>,
    lookup: HashMap<ResourceId, usize>,
    scope_attachments: Vec<ScopeAttachment>,
}

impl AttachmentDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.frame_attachments.clear();
        self.lookup.clear();
        self.scope_attachments.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.frame_attachments.is_empty()
    }

    pub fn create_transient(
        &mut self,
        name: &str,
        descriptor: ResourceDescriptor,
    ) -> Result<ResourceId> {
        let resource_id = ResourceId::from_name(name);
        if self.lookup.contains_key(&resource_id) {
            return Err(ConfigurationError::DuplicateAttachment {
                resource: name.to_string(),
                id: resource_id,
            }
            .into());
        }

        self.insert(FrameAttachment {
            resource_id,
            name: name.to_string(),
            lifetime_type: AttachmentLifetimeType::Transient,
            descriptor,
            resource: None,
            first_scope_attachment: None,
            last_scope_attachment: None,
            lifetime: None,
        });
        Ok(resource_id)
    }

    /// Importing the same resource under the same name twice is a no-op.
    pub fn import(
        &mut self,
        name: &str,
        resource: ResourceHandle,
        descriptor: ResourceDescriptor,
    ) -> Result<ResourceId> {
        let resource_id = ResourceId::from_name(name);
        if let Some(existing) = self.find(resource_id) {
            if existing.resource == Some(resource) {
                return Ok(resource_id);
            }
            return Err(ConfigurationError::DuplicateAttachment {
                resource: name.to_string(),
                id: resource_id,
            }
            .into());
        }

        self.insert(FrameAttachment {
            resource_id,
            name: name.to_string(),
            lifetime_type: AttachmentLifetimeType::Imported,
            descriptor,
            resource: Some(resource),
            first_scope_attachment: None,
            last_scope_attachment: None,
            lifetime: None,
        });
        Ok(resource_id)
    }

    fn insert(&mut self, attachment: FrameAttachment) {
        self.lookup
            .insert(attachment.resource_id, self.frame_attachments.len());
        self.frame_attachments.push(attachment);
    }

    pub fn contains(&self, resource_id: ResourceId) -> bool {
        self.lookup.contains_key(&resource_id)
    }

    pub fn find(&self, resource_id: ResourceId) -> Option<&FrameAttachment> {
        self.lookup
            .get(&resource_id)
            .map(|&index| &self.frame_attachments[index])
    }

    pub(crate) fn find_mut(&mut self, resource_id: ResourceId) -> Option<&mut FrameAttachment> {
        self.lookup
            .get(&resource_id)
            .map(|&index| &mut self.frame_attachments[index])
    }

    /// Frame attachments in definition order.
    pub fn frame_attachments(&self) -> &[FrameAttachment] {
        &self.frame_attachments
    }

    /// Every view created for a scope attachment this frame.
    pub fn views(&self) -> impl Iterator<Item = ViewHandle> + '_ {
        self.scope_attachments
            .iter()
            .filter_map(ScopeAttachment::view)
    }

    /// Transient resources that were placed in a heap this frame.
    pub fn placed_transients(&self) -> impl Iterator<Item = ResourceHandle> + '_ {
        self.frame_attachments
            .iter()
            .filter(|attachment| attachment.is_transient())
            .filter_map(FrameAttachment::resource)
    }

    pub fn scope_attachment(&self, handle: AttachmentHandle) -> &ScopeAttachment {
        &self.scope_attachments[handle.0]
    }

    pub fn scope_attachment_count(&self) -> usize {
        self.scope_attachments.len()
    }

    /// Appends a usage to the tail of the resource's chain.
    ///
    /// Call order is chronology: the frame graph resolves usages scope by
    /// scope in registration order, so a scope's usages are always contiguous
    /// at the tail when they are appended.
    pub fn append_usage(
        &mut self,
        scope: ScopeIndex,
        scope_id: &ScopeId,
        usage: &AttachmentUsageDescriptor,
    ) -> Result<AttachmentHandle> {
        let Some(&attachment_index) = self.lookup.get(&usage.resource_id) else {
            return Err(ConfigurationError::UndefinedAttachment {
                scope: scope_id.clone(),
                id: usage.resource_id,
            }
            .into());
        };

        let frame_attachment = &self.frame_attachments[attachment_index];

        if !usage.view.is_compatible_with(frame_attachment.kind()) {
            let (view, actual) = match frame_attachment.kind() {
                ResourceKind::Image => ("buffer", "an image"),
                ResourceKind::Buffer => ("image", "a buffer"),
            };
            return Err(ConfigurationError::AttachmentKindMismatch {
                scope: scope_id.clone(),
                resource: frame_attachment.name.clone(),
                view: view.to_string(),
                actual: actual.to_string(),
            }
            .into());
        }

        let tail = frame_attachment.last_scope_attachment;
        if let Some(tail) = tail
            && self.scope_attachments[tail.0].scope == scope
        {
            return Err(ConfigurationError::DuplicateUsage {
                scope: scope_id.clone(),
                resource: frame_attachment.name.clone(),
                id: usage.resource_id,
            }
            .into());
        }

        let handle = AttachmentHandle(self.scope_attachments.len());
        self.scope_attachments.push(ScopeAttachment {
            scope,
            resource_id: usage.resource_id,
            usage: usage.usage,
            access: usage.access,
            view_descriptor: usage.view.clone(),
            view: None,
            prev: tail,
            next: None,
        });

        if let Some(tail) = tail {
            self.scope_attachments[tail.0].next = Some(handle);
        }

        let frame_attachment = &mut self.frame_attachments[attachment_index];
        if frame_attachment.first_scope_attachment.is_none() {
            frame_attachment.first_scope_attachment = Some(handle);
        }
        frame_attachment.last_scope_attachment = Some(handle);

        log::trace!(
            "Attachment '{}' used by scope '{}' as {:?} ({:?})",
            frame_attachment.name,
            scope_id,
            usage.usage,
            usage.access
        );

        Ok(handle)
    }

    /// Walks a resource's usages from producer to last consumer.
    pub fn chain(&self, resource_id: ResourceId) -> ChainIter<'_> {
        ChainIter {
            database: self,
            current: self
                .find(resource_id)
                .and_then(|attachment| attachment.first_scope_attachment),
        }
    }

    pub(crate) fn set_lifetime(&mut self, resource_id: ResourceId, lifetime: Lifetime) {
        if let Some(attachment) = self.find_mut(resource_id) {
            attachment.lifetime = Some(lifetime);
        }
    }

    pub(crate) fn set_resource(&mut self, resource_id: ResourceId, resource: ResourceHandle) {
        if let Some(attachment) = self.find_mut(resource_id) {
            attachment.resource = Some(resource);
        }
    }

    pub(crate) fn set_view(&mut self, handle: AttachmentHandle, view: ViewHandle) {
        self.scope_attachments[handle.0].view = Some(view);
    }
}

pub struct ChainIter<'a> {
    database: &'a AttachmentDatabase,
    current: Option<AttachmentHandle>,
}

impl<'a> Iterator for ChainIter<'a> {
    type Item = (AttachmentHandle, &'a ScopeAttachment);

    fn next(&mut self) -> Option<Self::Item> {
        let handle = self.current?;
        let attachment = self.database.scope_attachment(handle);
        self.current = attachment.next;
        Some((handle, attachment))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::ImageHandle;
    use crate::types::{Format, ImageDescriptor};

    fn color_target() -> ResourceDescriptor {
        ResourceDescriptor::Image(ImageDescriptor::new_2d(Format::Rgba8Unorm, 64, 64))
    }

    #[test]
    fn chain_links_usages_in_call_order() {
        let mut database = AttachmentDatabase::new();
        let id = database.create_transient("color", color_target()).unwrap();

        let write = AttachmentUsageDescriptor::new(
            id,
            AttachmentUsage::RenderTarget,
            AttachmentAccess::WRITE,
        );
        let read = AttachmentUsageDescriptor::new(
            id,
            AttachmentUsage::ShaderResource,
            AttachmentAccess::READ,
        );

        let first = database
            .append_usage(ScopeIndex(0), &ScopeId::new("a"), &write)
            .unwrap();
        let second = database
            .append_usage(ScopeIndex(1), &ScopeId::new("b"), &read)
            .unwrap();
        let third = database
            .append_usage(ScopeIndex(2), &ScopeId::new("c"), &read)
            .unwrap();

        let chain: Vec<_> = database.chain(id).map(|(handle, _)| handle).collect();
        assert_eq!(chain, vec![first, second, third]);

        let attachment = database.find(id).unwrap();
        assert_eq!(attachment.first_scope_attachment(), Some(first));
        assert_eq!(attachment.last_scope_attachment(), Some(third));
        assert_eq!(database.scope_attachment(second).prev(), Some(first));
        assert_eq!(database.scope_attachment(second).next(), Some(third));
        assert_eq!(database.scope_attachment(third).next(), None);
    }

    #[test]
    fn undefined_attachment_is_a_configuration_error() {
        let mut database = AttachmentDatabase::new();
        let usage = AttachmentUsageDescriptor::new(
            ResourceId::from_name("missing"),
            AttachmentUsage::ShaderResource,
            AttachmentAccess::READ,
        );
        let error = database
            .append_usage(ScopeIndex(0), &ScopeId::new("a"), &usage)
            .unwrap_err();
        assert!(matches!(
            error,
            crate::FrameGraphError::Configuration(ConfigurationError::UndefinedAttachment { .. })
        ));
    }

    #[test]
    fn same_scope_cannot_use_a_resource_twice() {
        let mut database = AttachmentDatabase::new();
        let id = database.create_transient("color", color_target()).unwrap();
        let usage = AttachmentUsageDescriptor::new(
            id,
            AttachmentUsage::RenderTarget,
            AttachmentAccess::WRITE,
        );
        let scope = ScopeId::new("a");
        database.append_usage(ScopeIndex(0), &scope, &usage).unwrap();
        assert!(database.append_usage(ScopeIndex(0), &scope, &usage).is_err());
    }

    #[test]
    fn buffer_views_on_images_are_rejected() {
        let mut database = AttachmentDatabase::new();
        let id = database.create_transient("color", color_target()).unwrap();
        let usage = AttachmentUsageDescriptor::new(
            id,
            AttachmentUsage::ShaderResource,
            AttachmentAccess::READ,
        )
        .with_view(ViewDescriptor::Buffer(crate::types::BufferViewDescriptor {
            offset: 0,
            size: None,
        }));
        assert!(
            database
                .append_usage(ScopeIndex(0), &ScopeId::new("a"), &usage)
                .is_err()
        );
    }

    #[test]
    fn importing_the_same_resource_twice_is_allowed() {
        let mut database = AttachmentDatabase::new();
        let handle = ResourceHandle::Image(ImageHandle(7));
        let first = database.import("swapchain", handle, color_target()).unwrap();
        let second = database.import("swapchain", handle, color_target()).unwrap();
        assert_eq!(first, second);

        let other = ResourceHandle::Image(ImageHandle(8));
        assert!(database.import("swapchain", other, color_target()).is_err());
        assert!(database.create_transient("swapchain", color_target()).is_err());
    }
}
