use std::ops::Range;

use crate::aliasing::AliasingBarrier;
use crate::attachment::AttachmentHandle;
use crate::producer::ProducerIndex;
use crate::types::{QueueClass, ResourceId, ResourceState, ScopeId};

/// Index of a scope in the current frame, equal to its position in
/// registration order among the scopes enabled for the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeIndex(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependencyKind {
    /// One side of the pair writes the shared resource.
    Data,
    /// Both sides only read; keeps attachment chains in execution order.
    ChainOrder,
    /// Requested through `execute_after` / `execute_before`.
    Explicit,
}

/// State change of one resource before a scope runs. `before` is `None` for
/// the first use of the resource in the frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionBarrier {
    pub resource_id: ResourceId,
    pub before: Option<ResourceState>,
    pub after: ResourceState,
}

/// The scope must wait for `scope`, which runs on another queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrossQueueWait {
    pub queue: QueueClass,
    pub scope: ScopeIndex,
}

#[derive(Debug, Clone)]
pub struct Scope {
    id: ScopeId,
    index: ScopeIndex,
    producer: ProducerIndex,
    queue_class: QueueClass,
    device_index: usize,
    attachments: Vec<AttachmentHandle>,
    producers: Vec<ScopeIndex>,
    consumers: Vec<ScopeIndex>,
    estimated_item_count: u32,
    execution_index: Option<usize>,
    transitions: Vec<TransitionBarrier>,
    aliasing_barriers: Vec<AliasingBarrier>,
    cross_queue_waits: Vec<CrossQueueWait>,
    culled: bool,
}

impl Scope {
    pub(crate) fn new(
        id: ScopeId,
        index: ScopeIndex,
        producer: ProducerIndex,
        queue_class: QueueClass,
        device_index: usize,
    ) -> Self {
        Self {
            id,
            index,
            producer,
            queue_class,
            device_index,
            attachments: Vec::new(),
            producers: Vec::new(),
            consumers: Vec::new(),
            estimated_item_count: 0,
            execution_index: None,
            transitions: Vec::new(),
            aliasing_barriers: Vec::new(),
            cross_queue_waits: Vec::new(),
            culled: false,
        }
    }

    pub fn id(&self) -> &ScopeId {
        &self.id
    }

    pub fn index(&self) -> ScopeIndex {
        self.index
    }

    pub fn producer(&self) -> ProducerIndex {
        self.producer
    }

    pub fn queue_class(&self) -> QueueClass {
        self.queue_class
    }

    pub fn device_index(&self) -> usize {
        self.device_index
    }

    /// Scope attachments in declaration order.
    pub fn attachments(&self) -> &[AttachmentHandle] {
        &self.attachments
    }

    /// Scopes this scope depends on.
    pub fn producers(&self) -> &[ScopeIndex] {
        &self.producers
    }

    /// Scopes depending on this scope.
    pub fn consumers(&self) -> &[ScopeIndex] {
        &self.consumers
    }

    pub fn estimated_item_count(&self) -> u32 {
        self.estimated_item_count
    }

    /// Position in the frame's global execution order, once compiled.
    pub fn execution_index(&self) -> Option<usize> {
        self.execution_index
    }

    pub fn transitions(&self) -> &[TransitionBarrier] {
        &self.transitions
    }

    pub fn aliasing_barriers(&self) -> &[AliasingBarrier] {
        &self.aliasing_barriers
    }

    pub fn cross_queue_waits(&self) -> &[CrossQueueWait] {
        &self.cross_queue_waits
    }

    pub fn is_culled(&self) -> bool {
        self.culled
    }

    /// Sub-ranges of the item count, one per command list. Always at least
    /// one range, even for scopes with no items.
    pub fn item_ranges(&self, items_per_command_list: u32) -> Vec<Range<u32>> {
        let per_list = items_per_command_list.max(1);
        let count = self.estimated_item_count;
        if count == 0 {
            return vec![0..0];
        }

        (0..count.div_ceil(per_list))
            .map(|list| {
                let start = list * per_list;
                start..(start + per_list).min(count)
            })
            .collect()
    }

    pub(crate) fn push_attachment(&mut self, handle: AttachmentHandle) {
        self.attachments.push(handle);
    }

    pub(crate) fn add_producer(&mut self, scope: ScopeIndex) {
        if !self.producers.contains(&scope) {
            self.producers.push(scope);
        }
    }

    pub(crate) fn add_consumer(&mut self, scope: ScopeIndex) {
        if !self.consumers.contains(&scope) {
            self.consumers.push(scope);
        }
    }

    pub(crate) fn set_estimated_item_count(&mut self, count: u32) {
        self.estimated_item_count = count;
    }

    pub(crate) fn set_execution_index(&mut self, execution_index: usize) {
        self.execution_index = Some(execution_index);
    }

    pub(crate) fn set_culled(&mut self, culled: bool) {
        self.culled = culled;
    }

    pub(crate) fn set_transitions(&mut self, transitions: Vec<TransitionBarrier>) {
        self.transitions = transitions;
    }

    pub(crate) fn set_aliasing_barriers(&mut self, barriers: Vec<AliasingBarrier>) {
        self.aliasing_barriers = barriers;
    }

    pub(crate) fn set_cross_queue_waits(&mut self, waits: Vec<CrossQueueWait>) {
        self.cross_queue_waits = waits;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope_with_items(count: u32) -> Scope {
        let mut scope = Scope::new(
            ScopeId::new("scope"),
            ScopeIndex(0),
            ProducerIndex(0),
            QueueClass::Graphics,
            0,
        );
        scope.set_estimated_item_count(count);
        scope
    }

    #[test]
    fn empty_scopes_still_record_one_list() {
        assert_eq!(scope_with_items(0).item_ranges(256), vec![0..0]);
    }

    #[test]
    fn item_ranges_cover_every_item_once() {
        let ranges = scope_with_items(600).item_ranges(256);
        assert_eq!(ranges, vec![0..256, 256..512, 512..600]);
    }

    #[test]
    fn edges_are_not_duplicated() {
        let mut scope = scope_with_items(0);
        scope.add_producer(ScopeIndex(3));
        scope.add_producer(ScopeIndex(3));
        scope.add_consumer(ScopeIndex(4));
        scope.add_consumer(ScopeIndex(4));
        assert_eq!(scope.producers(), &[ScopeIndex(3)]);
        assert_eq!(scope.consumers(), &[ScopeIndex(4)]);
    }
}
