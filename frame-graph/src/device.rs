//! Interfaces the frame graph consumes from a graphics backend.
//!
//! The frame graph never talks to a platform API directly. A backend
//! implements these traits and is injected into [`FrameGraph`](crate::FrameGraph)
//! as an `Arc<dyn Device>`.

use bytemuck::{Pod, Zeroable};

use crate::aliasing::AliasingBarrier;
use crate::draw_packet::DrawItem;
use crate::error::DeviceError;
use crate::scope::TransitionBarrier;
use crate::types::{
    BufferDescriptor, ImageDescriptor, MemoryRequirements, QueueClass, ResourceDescriptor,
    ViewDescriptor,
};

macro_rules! handle_type {
    ($($name:ident),* $(,)?) => {
        $(
            #[repr(transparent)]
            #[derive(
                Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Pod, Zeroable,
            )]
            pub struct $name(pub u64);
        )*
    };
}

handle_type!(
    HeapHandle,
    ImageHandle,
    BufferHandle,
    ViewHandle,
    CommandListHandle,
    PipelineStateHandle,
    ShaderResourceGroupHandle,
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceHandle {
    Image(ImageHandle),
    Buffer(BufferHandle),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapDescriptor {
    pub label: String,
    pub capacity_bytes: u64,
}

pub trait HeapBackend {
    fn create_heap(&self, descriptor: &HeapDescriptor) -> Result<HeapHandle, DeviceError>;

    fn release_heap(&self, _heap: HeapHandle) {}

    fn place_image(
        &self,
        heap: HeapHandle,
        offset: u64,
        descriptor: &ImageDescriptor,
    ) -> Result<ImageHandle, DeviceError>;

    fn place_buffer(
        &self,
        heap: HeapHandle,
        offset: u64,
        descriptor: &BufferDescriptor,
    ) -> Result<BufferHandle, DeviceError>;

    /// Called when a frame is discarded or the graph is dropped. Backends may
    /// defer destruction until submitted work using the resource retires.
    fn release_resource(&self, _resource: ResourceHandle) {}

    fn resource_requirements(&self, descriptor: &ResourceDescriptor) -> MemoryRequirements {
        descriptor.estimated_requirements()
    }

    fn emit_aliasing_barrier(
        &self,
        command_list: CommandListHandle,
        heap: HeapHandle,
        barrier: &AliasingBarrier,
    );

    fn emit_transition_barrier(
        &self,
        _command_list: CommandListHandle,
        _resource: ResourceHandle,
        _barrier: &TransitionBarrier,
    ) {
    }
}

pub trait ViewFactory {
    fn create_view(
        &self,
        resource: ResourceHandle,
        descriptor: &ViewDescriptor,
    ) -> Result<ViewHandle, DeviceError>;

    fn release_view(&self, _view: ViewHandle) {}
}

pub trait CommandListPool {
    /// May block until a list of the requested class is available.
    fn acquire_command_list(&self, queue: QueueClass) -> Result<CommandListHandle, DeviceError>;

    fn discard_command_list(&self, _command_list: CommandListHandle) {}
}

pub trait CommandEncoder {
    fn record_draw(
        &self,
        command_list: CommandListHandle,
        item: &DrawItem<'_>,
    ) -> Result<(), DeviceError>;

    fn record_dispatch(
        &self,
        command_list: CommandListHandle,
        group_count: [u32; 3],
    ) -> Result<(), DeviceError>;

    fn record_copy(
        &self,
        command_list: CommandListHandle,
        source: ResourceHandle,
        destination: ResourceHandle,
    ) -> Result<(), DeviceError>;
}

pub trait Device: HeapBackend + ViewFactory + CommandListPool + CommandEncoder + Send + Sync {}

impl<T> Device for T where T: HeapBackend + ViewFactory + CommandListPool + CommandEncoder + Send + Sync
{}
