//! A scope-based frame graph.
//!
//! Producers declare the attachments their scope uses; the graph links them
//! into per-resource chains, orders the scopes, packs transient resources
//! into aliased heaps and records barriers, then drives compile and execute
//! callbacks in dependency order.

pub mod aliasing;
pub mod attachment;
pub mod device;
pub mod draw_list;
pub mod draw_packet;
pub mod error;
pub mod executor;
pub mod graph;
pub mod producer;
pub mod scope;
pub mod types;

pub use aliasing::{
    AliasedHeap, AliasedResourceState, AliasingBarrier, AliasingBarrierTracker, AliasingDescriptor,
    AliasingPlan, HeapOccupant, Placement, TransientAllocationRequest, TransientAllocator,
};
pub use attachment::{
    AttachmentDatabase, AttachmentHandle, AttachmentLifetimeType, AttachmentUsageDescriptor,
    FrameAttachment, ScopeAttachment,
};
pub use device::{
    BufferHandle, CommandEncoder, CommandListHandle, CommandListPool, Device, HeapBackend,
    HeapDescriptor, HeapHandle, ImageHandle, PipelineStateHandle, ResourceHandle,
    ShaderResourceGroupHandle, ViewFactory, ViewHandle,
};
pub use draw_list::{DrawItemProperties, DrawListContext};
pub use draw_packet::{
    DrawArguments, DrawFilterMask, DrawItem, DrawListMask, DrawListTag, DrawListTagRegistry,
    DrawPacket, DrawPacketAllocator, DrawPacketBuilder, DrawPacketPool, DrawRequest,
    IndexBufferView, MAX_DRAW_LIST_TAGS, StreamBufferView, SystemDrawPacketAllocator,
};
pub use error::{ConfigurationError, DeviceError, ErrorKind, FrameGraphError, Result};
pub use executor::{FrameSubmission, QueueSubmission, RecordedCommandList};
pub use graph::{FrameGraph, FrameGraphDescriptor, FrameGraphState, FrameStatistics};
pub use producer::{
    CompileContext, ExecuteContext, FrameGraphBuilder, ProducerIndex, ProducerState, ScopeProducer,
};
pub use scope::{CrossQueueWait, DependencyKind, Scope, ScopeIndex, TransitionBarrier};
pub use types::{
    AttachmentAccess, AttachmentUsage, BufferDescriptor, BufferViewDescriptor, Format,
    ImageDescriptor, ImageViewDescriptor, Lifetime, MemoryRequirements, QueueClass,
    ResourceDescriptor, ResourceId, ResourceKind, ResourceState, ScopeId, ViewDescriptor,
};
