use crate::graph::FrameGraphState;
use crate::types::{ResourceId, ScopeId};

#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("Scope '{scope}' uses attachment {id} which is never defined in this frame")]
    UndefinedAttachment { scope: ScopeId, id: ResourceId },

    #[error("Scope '{scope}' declares attachment '{resource}' ({id}) more than once")]
    DuplicateUsage {
        scope: ScopeId,
        resource: String,
        id: ResourceId,
    },

    #[error("Attachment '{resource}' ({id}) is defined more than once")]
    DuplicateAttachment { resource: String, id: ResourceId },

    #[error("Scope '{scope}' is already registered")]
    DuplicateScope { scope: ScopeId },

    #[error("Scope '{scope}' is not registered")]
    UnknownScope { scope: ScopeId },

    #[error("Scope '{scope}' binds a {view} view to {actual} attachment '{resource}'")]
    AttachmentKindMismatch {
        scope: ScopeId,
        resource: String,
        view: String,
        actual: String,
    },

    #[error("Frame graph contains a dependency cycle between scopes {scopes:?}")]
    CyclicDependency { scopes: Vec<ScopeId> },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("Failed to create heap of {capacity_bytes} bytes: {reason}")]
    HeapCreation { capacity_bytes: u64, reason: String },

    #[error("Failed to place resource at offset {offset}: {reason}")]
    Placement { offset: u64, reason: String },

    #[error("Failed to create view: {reason}")]
    ViewCreation { reason: String },

    #[error("Failed to acquire command list: {reason}")]
    CommandList { reason: String },

    #[error("Failed to record commands: {reason}")]
    Recording { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    OutOfMemory,
    Device,
    InvalidState,
}

#[derive(Debug, thiserror::Error)]
pub enum FrameGraphError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(
        "Out of transient memory: '{resource}' needs {size} bytes, heap capacity is {capacity} bytes"
    )]
    OutOfMemory {
        resource: String,
        size: u64,
        capacity: u64,
    },

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("{operation} is not valid while the frame graph is {state:?}")]
    InvalidState {
        operation: &'static str,
        state: FrameGraphState,
    },

    #[error("All {max} draw list tags are in use, cannot register '{name}'")]
    DrawListTagsExhausted { name: String, max: usize },
}

impl FrameGraphError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FrameGraphError::Configuration(_) | FrameGraphError::DrawListTagsExhausted { .. } => {
                ErrorKind::Configuration
            }
            FrameGraphError::OutOfMemory { .. } => ErrorKind::OutOfMemory,
            FrameGraphError::Device(_) => ErrorKind::Device,
            FrameGraphError::InvalidState { .. } => ErrorKind::InvalidState,
        }
    }
}

pub type Result<T> = std::result::Result<T, FrameGraphError>;
