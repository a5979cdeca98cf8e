use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use web_time::Instant;

use crate::aliasing::{
    AliasingBarrier, AliasingDescriptor, AliasingPlan, TransientAllocationRequest,
    TransientAllocator,
};
use crate::attachment::{AttachmentDatabase, ChainIter, FrameAttachment, ScopeAttachment};
use crate::device::{BufferHandle, Device, HeapDescriptor, HeapHandle, ImageHandle, ResourceHandle};
use crate::error::{ConfigurationError, FrameGraphError, Result};
use crate::executor::{FrameExecutor, FrameSubmission};
use crate::producer::{
    CompileContext, FrameGraphBuilder, ProducerIndex, ProducerSlot, ProducerState, ScopeDeclaration,
    ScopeProducer,
};
use crate::scope::{CrossQueueWait, DependencyKind, Scope, ScopeIndex, TransitionBarrier};
use crate::types::{
    AttachmentAccess, BufferDescriptor, ImageDescriptor, Lifetime, QueueClass, ResourceDescriptor,
    ResourceId, ScopeId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameGraphState {
    Idle,
    CollectingScopes,
    Compiling,
    Executing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameGraphDescriptor {
    pub heap_capacity_bytes: u64,
    pub allow_heap_growth: bool,
    pub max_heap_count: usize,
    pub aliasing_enabled: bool,
    pub cull_unused_scopes: bool,
    pub items_per_command_list: u32,
    pub parallel_queues: bool,
}

impl Default for FrameGraphDescriptor {
    fn default() -> Self {
        Self {
            heap_capacity_bytes: 64 * 1024 * 1024,
            allow_heap_growth: true,
            max_heap_count: 4,
            aliasing_enabled: true,
            cull_unused_scopes: false,
            items_per_command_list: 256,
            parallel_queues: true,
        }
    }
}

impl FrameGraphDescriptor {
    pub fn with_heap_capacity(mut self, bytes: u64) -> Self {
        self.heap_capacity_bytes = bytes;
        self
    }

    pub fn with_heap_growth(mut self, allow: bool, max_heap_count: usize) -> Self {
        self.allow_heap_growth = allow;
        self.max_heap_count = max_heap_count;
        self
    }

    pub fn with_aliasing(mut self, enabled: bool) -> Self {
        self.aliasing_enabled = enabled;
        self
    }

    pub fn with_culling(mut self, enabled: bool) -> Self {
        self.cull_unused_scopes = enabled;
        self
    }

    pub fn with_items_per_command_list(mut self, items: u32) -> Self {
        self.items_per_command_list = items.max(1);
        self
    }

    pub fn with_parallel_queues(mut self, enabled: bool) -> Self {
        self.parallel_queues = enabled;
        self
    }

    fn aliasing_descriptor(&self) -> AliasingDescriptor {
        AliasingDescriptor {
            heap_capacity_bytes: self.heap_capacity_bytes,
            allow_heap_growth: self.allow_heap_growth,
            max_heap_count: self.max_heap_count,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameStatistics {
    pub frame_index: u64,
    pub scope_count: usize,
    pub culled_scope_count: usize,
    pub transient_count: usize,
    pub imported_count: usize,
    pub heap_count: usize,
    pub heap_bytes: u64,
    /// Bytes the transients would need without aliasing.
    pub unaliased_bytes: u64,
    pub aliasing_barrier_count: usize,
    pub transition_barrier_count: usize,
    pub command_list_count: usize,
    pub compile_duration: Duration,
    pub execute_duration: Duration,
}

#[derive(Debug, Clone)]
struct ImportedResource {
    name: String,
    resource: ResourceHandle,
    descriptor: ResourceDescriptor,
}

/// Orchestrates the per-frame cycle of scope producers.
///
/// `C` is the caller's per-frame configuration and reaches every producer
/// callback as-is.
pub struct FrameGraph<C = ()> {
    device: Arc<dyn Device>,
    descriptor: FrameGraphDescriptor,
    state: FrameGraphState,
    frame_index: u64,
    producers: Vec<ProducerSlot<C>>,
    imports: Vec<ImportedResource>,
    attachments: AttachmentDatabase,
    scopes: Vec<Scope>,
    scope_lookup: HashMap<ScopeId, ScopeIndex>,
    declarations: Vec<ScopeDeclaration>,
    graph: DiGraph<ScopeIndex, DependencyKind>,
    execution_order: Vec<ScopeIndex>,
    allocator: Mutex<TransientAllocator>,
    aliasing_plan: Option<AliasingPlan>,
    heaps: Vec<HeapHandle>,
    statistics: FrameStatistics,
}

impl<C: Sync> FrameGraph<C> {
    pub fn new(device: Arc<dyn Device>, descriptor: FrameGraphDescriptor) -> Self {
        let allocator = TransientAllocator::new(descriptor.aliasing_descriptor());
        Self {
            device,
            descriptor,
            state: FrameGraphState::Idle,
            frame_index: 0,
            producers: Vec::new(),
            imports: Vec::new(),
            attachments: AttachmentDatabase::new(),
            scopes: Vec::new(),
            scope_lookup: HashMap::new(),
            declarations: Vec::new(),
            graph: DiGraph::new(),
            execution_order: Vec::new(),
            allocator: Mutex::new(allocator),
            aliasing_plan: None,
            heaps: Vec::new(),
            statistics: FrameStatistics::default(),
        }
    }

    pub fn descriptor(&self) -> &FrameGraphDescriptor {
        &self.descriptor
    }

    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    pub fn state(&self) -> FrameGraphState {
        self.state
    }

    /// Index of the most recently begun frame; 0 before the first frame.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn register_producer(&mut self, producer: Box<dyn ScopeProducer<C>>) -> Result<()> {
        self.expect_state(FrameGraphState::Idle, "register_producer")?;

        let slot = ProducerSlot::new(producer);
        if self
            .producers
            .iter()
            .any(|existing| existing.scope_id == slot.scope_id)
        {
            return Err(ConfigurationError::DuplicateScope {
                scope: slot.scope_id,
            }
            .into());
        }

        log::debug!(
            "Registered scope '{}' on {:?} queue",
            slot.scope_id,
            slot.queue_class
        );
        self.producers.push(slot);
        Ok(())
    }

    pub fn unregister_producer(&mut self, scope_id: &ScopeId) -> Result<Box<dyn ScopeProducer<C>>> {
        self.expect_state(FrameGraphState::Idle, "unregister_producer")?;

        let Some(position) = self
            .producers
            .iter()
            .position(|slot| &slot.scope_id == scope_id)
        else {
            return Err(ConfigurationError::UnknownScope {
                scope: scope_id.clone(),
            }
            .into());
        };

        log::debug!("Unregistered scope '{}'", scope_id);
        self.discard_frame();
        Ok(self.producers.remove(position).producer)
    }

    pub fn producer_state(&self, scope_id: &ScopeId) -> Option<ProducerState> {
        self.producers
            .iter()
            .find(|slot| &slot.scope_id == scope_id)
            .map(|slot| slot.state)
    }

    /// Registers a persistent external image, imported into every frame.
    /// Importing under an existing name replaces the previous resource.
    pub fn import_image(
        &mut self,
        name: &str,
        image: ImageHandle,
        descriptor: ImageDescriptor,
    ) -> Result<ResourceId> {
        self.import(
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
        self.import(
            name,
            ResourceHandle::Buffer(buffer),
            ResourceDescriptor::Buffer(descriptor),
        )
    }

    fn import(
        &mut self,
        name: &str,
        resource: ResourceHandle,
        descriptor: ResourceDescriptor,
    ) -> Result<ResourceId> {
        self.expect_state(FrameGraphState::Idle, "import")?;

        let imported = ImportedResource {
            name: name.to_string(),
            resource,
            descriptor,
        };
        match self.imports.iter_mut().find(|existing| existing.name == name) {
            Some(existing) => *existing = imported,
            None => self.imports.push(imported),
        }
        Ok(ResourceId::from_name(name))
    }

    pub fn remove_import(&mut self, resource_id: ResourceId) -> Result<bool> {
        self.expect_state(FrameGraphState::Idle, "remove_import")?;

        let count = self.imports.len();
        self.imports
            .retain(|imported| ResourceId::from_name(&imported.name) != resource_id);
        Ok(self.imports.len() != count)
    }

    /// Runs every enabled producer's setup once, in registration order, and
    /// links the declared usages into attachment chains.
    pub fn begin_frame(&mut self, configs: &C) -> Result<()> {
        self.expect_state(FrameGraphState::Idle, "begin_frame")?;

        self.discard_frame();
        self.frame_index += 1;
        self.state = FrameGraphState::CollectingScopes;

        let result = self.collect_scopes(configs);
        self.abort_on_error("begin_frame", result)
    }

    pub fn compile(&mut self, configs: &C) -> Result<()> {
        self.expect_state(FrameGraphState::CollectingScopes, "compile")?;
        self.state = FrameGraphState::Compiling;

        let start = Instant::now();
        let result = self.compile_frame(configs);
        self.statistics.compile_duration = start.elapsed();
        self.abort_on_error("compile", result)
    }

    pub fn execute(&mut self, configs: &C) -> Result<FrameSubmission> {
        self.expect_state(FrameGraphState::Compiling, "execute")?;
        self.state = FrameGraphState::Executing;

        let start = Instant::now();
        let queue_orders: Vec<(QueueClass, Vec<ScopeIndex>)> = QueueClass::ALL
            .iter()
            .map(|&queue| (queue, self.queue_indices(queue)))
            .collect();

        let executor = FrameExecutor {
            device: self.device.as_ref(),
            scopes: &self.scopes,
            producers: &self.producers,
            attachments: &self.attachments,
            heaps: &self.heaps,
            configs,
            items_per_command_list: self.descriptor.items_per_command_list,
            frame_index: self.frame_index,
        };
        let result = executor.execute(&queue_orders, self.descriptor.parallel_queues);

        let submission = match result {
            Ok(submission) => submission,
            Err(error) => return self.abort_on_error("execute", Err(error)),
        };

        let graph_state = self.state;
        let executed: Vec<ProducerIndex> = self
            .execution_order
            .iter()
            .map(|index| self.scopes[index.0].producer())
            .collect();
        for producer in executed {
            let advanced =
                self.producers[producer.0].advance(ProducerState::Executed, "execute", graph_state);
            if let Err(error) = advanced {
                return self.abort_on_error("execute", Err(error));
            }
        }

        self.statistics.command_list_count = submission.command_list_count();
        self.statistics.execute_duration = start.elapsed();
        self.state = FrameGraphState::Idle;

        log::debug!(
            "Frame {} recorded {} command lists in {:?}",
            self.frame_index,
            self.statistics.command_list_count,
            self.statistics.execute_duration
        );

        Ok(submission)
    }

    pub fn render_frame(&mut self, configs: &C) -> Result<FrameSubmission> {
        self.begin_frame(configs)?;
        self.compile(configs)?;
        self.execute(configs)
    }

    /// Drops the frame in flight. Only possible before execution starts.
    pub fn cancel_frame(&mut self) -> Result<()> {
        match self.state {
            FrameGraphState::CollectingScopes | FrameGraphState::Compiling => {
                log::debug!("Frame {} cancelled", self.frame_index);
                self.discard_frame();
                self.state = FrameGraphState::Idle;
                Ok(())
            }
            state => Err(FrameGraphError::InvalidState {
                operation: "cancel_frame",
                state,
            }),
        }
    }

    pub fn scopes(&self) -> &[Scope] {
        &self.scopes
    }

    pub fn scope(&self, scope_id: &ScopeId) -> Option<&Scope> {
        self.scope_lookup
            .get(scope_id)
            .map(|index| &self.scopes[index.0])
    }

    pub fn execution_order(&self) -> Vec<&ScopeId> {
        self.execution_order
            .iter()
            .map(|index| self.scopes[index.0].id())
            .collect()
    }

    pub fn queue_order(&self, queue: QueueClass) -> Vec<&ScopeId> {
        self.queue_indices(queue)
            .into_iter()
            .map(|index| self.scopes[index.0].id())
            .collect()
    }

    pub fn attachments(&self) -> &AttachmentDatabase {
        &self.attachments
    }

    pub fn frame_attachment(&self, resource_id: ResourceId) -> Option<&FrameAttachment> {
        self.attachments.find(resource_id)
    }

    pub fn attachment_chain(&self, resource_id: ResourceId) -> ChainIter<'_> {
        self.attachments.chain(resource_id)
    }

    pub fn aliasing_plan(&self) -> Option<&AliasingPlan> {
        self.aliasing_plan.as_ref()
    }

    pub fn statistics(&self) -> &FrameStatistics {
        &self.statistics
    }

    fn queue_indices(&self, queue: QueueClass) -> Vec<ScopeIndex> {
        self.execution_order
            .iter()
            .copied()
            .filter(|index| self.scopes[index.0].queue_class() == queue)
            .collect()
    }

    fn expect_state(&self, expected: FrameGraphState, operation: &'static str) -> Result<()> {
        if self.state != expected {
            return Err(FrameGraphError::InvalidState {
                operation,
                state: self.state,
            });
        }
        Ok(())
    }

    fn abort_on_error<T>(&mut self, phase: &str, result: Result<T>) -> Result<T> {
        if let Err(error) = &result {
            log::error!("Frame {} aborted during {}: {}", self.frame_index, phase, error);
            self.discard_frame();
            self.state = FrameGraphState::Idle;
        }
        result
    }

    fn discard_frame(&mut self) {
        self.release_frame_objects();
        self.attachments.clear();
        self.scopes.clear();
        self.scope_lookup.clear();
        self.declarations.clear();
        self.graph.clear();
        self.execution_order.clear();
        self.aliasing_plan = None;
        self.statistics = FrameStatistics::default();
        for slot in &mut self.producers {
            slot.state = ProducerState::Unregistered;
        }
    }

    fn collect_scopes(&mut self, configs: &C) -> Result<()> {
        for imported in &self.imports {
            self.attachments
                .import(&imported.name, imported.resource, imported.descriptor)?;
        }

        let graph_state = self.state;
        for (producer_index, slot) in self.producers.iter_mut().enumerate() {
            if !slot.producer.is_enabled(configs) {
                log::debug!("Scope '{}' is disabled this frame", slot.scope_id);
                continue;
            }

            let mut declaration = ScopeDeclaration::default();
            let mut builder =
                FrameGraphBuilder::new(&slot.scope_id, &mut self.attachments, &mut declaration);
            slot.producer.setup_frame_graph_dependencies(&mut builder)?;
            slot.advance(ProducerState::DependenciesDeclared, "begin_frame", graph_state)?;

            let index = ScopeIndex(self.scopes.len());
            let mut scope = Scope::new(
                slot.scope_id.clone(),
                index,
                ProducerIndex(producer_index),
                slot.queue_class,
                slot.device_index,
            );
            scope.set_estimated_item_count(declaration.estimated_item_count);

            self.scope_lookup.insert(slot.scope_id.clone(), index);
            self.scopes.push(scope);
            self.declarations.push(declaration);
        }

        for (scope, declaration) in self.scopes.iter_mut().zip(&self.declarations) {
            for usage in &declaration.usages {
                let handle = self
                    .attachments
                    .append_usage(scope.index(), scope.id(), usage)?;
                scope.push_attachment(handle);
            }
        }

        log::debug!(
            "Frame {} declared {} scopes and {} attachments",
            self.frame_index,
            self.scopes.len(),
            self.attachments.frame_attachments().len()
        );
        Ok(())
    }

    fn compile_frame(&mut self, configs: &C) -> Result<()> {
        self.build_dependency_graph();
        let order = self.topological_order()?;

        let culled = if self.descriptor.cull_unused_scopes {
            self.compute_culled_scopes(&order)
        } else {
            HashSet::new()
        };

        for &index in &culled {
            self.scopes[index.0].set_culled(true);
            log::debug!("Culled scope '{}'", self.scopes[index.0].id());
        }

        self.execution_order = order
            .into_iter()
            .filter(|index| !culled.contains(index))
            .collect();
        for (execution_index, &index) in self.execution_order.iter().enumerate() {
            self.scopes[index.0].set_execution_index(execution_index);
        }

        self.compute_lifetimes();
        let plan = self.allocate_transients()?;
        self.create_views()?;
        self.compute_barriers(&plan);
        self.aliasing_plan = Some(plan);

        let graph_state = self.state;
        for &index in &self.execution_order {
            let scope = &self.scopes[index.0];
            let slot = &mut self.producers[scope.producer().0];
            let context = CompileContext {
                configs,
                scope,
                attachments: &self.attachments,
                frame_index: self.frame_index,
            };
            slot.producer.compile_resources(&context)?;
            slot.advance(ProducerState::Compiled, "compile", graph_state)?;
        }

        self.update_statistics(culled.len());
        Ok(())
    }

    fn build_dependency_graph(&mut self) {
        self.graph.clear();
        for scope in &self.scopes {
            self.graph.add_node(scope.index());
        }

        let mut edges: Vec<(ScopeIndex, ScopeIndex, DependencyKind)> = Vec::new();

        for frame_attachment in self.attachments.frame_attachments() {
            let chain: Vec<_> = self
                .attachments
                .chain(frame_attachment.resource_id())
                .map(|(_, attachment)| attachment)
                .collect();

            for pair in chain.windows(2) {
                let (earlier, later) = (pair[0], pair[1]);
                if earlier.scope() == later.scope() {
                    continue;
                }
                let kind = if earlier.access().is_write() || later.access().is_write() {
                    DependencyKind::Data
                } else {
                    DependencyKind::ChainOrder
                };
                edges.push((earlier.scope(), later.scope(), kind));
            }

            // Readers depend on the last writer even when other readers sit
            // between them, and the next writer depends on every such reader.
            let mut last_writer: Option<ScopeIndex> = None;
            let mut readers_since_write: Vec<ScopeIndex> = Vec::new();
            for attachment in &chain {
                let scope = attachment.scope();
                if attachment.access().is_write() {
                    for &reader in &readers_since_write {
                        if reader != scope {
                            edges.push((reader, scope, DependencyKind::Data));
                        }
                    }
                    readers_since_write.clear();
                    last_writer = Some(scope);
                } else {
                    if let Some(writer) = last_writer
                        && writer != scope
                    {
                        edges.push((writer, scope, DependencyKind::Data));
                    }
                    readers_since_write.push(scope);
                }
            }
        }

        for (scope, declaration) in self.scopes.iter().zip(&self.declarations) {
            for other in &declaration.execute_after {
                if let Some(other) = self.explicit_target(scope.id(), other) {
                    edges.push((other, scope.index(), DependencyKind::Explicit));
                }
            }
            for other in &declaration.execute_before {
                if let Some(other) = self.explicit_target(scope.id(), other) {
                    edges.push((scope.index(), other, DependencyKind::Explicit));
                }
            }
        }

        for (from, to, kind) in edges {
            let (from_node, to_node) = (NodeIndex::new(from.0), NodeIndex::new(to.0));
            match self.graph.find_edge(from_node, to_node) {
                Some(edge) => {
                    if kind == DependencyKind::Data {
                        self.graph[edge] = DependencyKind::Data;
                    }
                }
                None => {
                    self.graph.add_edge(from_node, to_node, kind);
                }
            }
            self.scopes[from.0].add_consumer(to);
            self.scopes[to.0].add_producer(from);
        }
    }

    fn explicit_target(&self, requester: &ScopeId, target: &ScopeId) -> Option<ScopeIndex> {
        match self.scope_lookup.get(target) {
            Some(&index) if self.scopes[index.0].id() != requester => Some(index),
            Some(_) => None,
            None => {
                log::warn!(
                    "Scope '{}' requested ordering against '{}', which is not part of this frame",
                    requester,
                    target
                );
                None
            }
        }
    }

    /// Kahn's algorithm, always taking the ready scope registered first.
    fn topological_order(&self) -> Result<Vec<ScopeIndex>> {
        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|node| self.graph.neighbors_directed(node, Direction::Incoming).count())
            .collect();

        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree == 0)
            .map(|(index, _)| Reverse(index))
            .collect();

        let mut order = Vec::with_capacity(self.scopes.len());
        while let Some(Reverse(index)) = ready.pop() {
            order.push(ScopeIndex(index));
            for next in self
                .graph
                .neighbors_directed(NodeIndex::new(index), Direction::Outgoing)
            {
                in_degree[next.index()] -= 1;
                if in_degree[next.index()] == 0 {
                    ready.push(Reverse(next.index()));
                }
            }
        }

        if order.len() == self.scopes.len() {
            return Ok(order);
        }

        let scopes = petgraph::algo::tarjan_scc(&self.graph)
            .into_iter()
            .filter(|component| component.len() > 1)
            .flatten()
            .map(|node| self.scopes[node.index()].id().clone())
            .collect();

        Err(ConfigurationError::CyclicDependency { scopes }.into())
    }

    /// Walks the order backwards, keeping scopes that write something a kept
    /// scope or the outside world still needs. Scopes without writes are
    /// always kept.
    fn compute_culled_scopes(&self, order: &[ScopeIndex]) -> HashSet<ScopeIndex> {
        let mut required_resources: HashSet<ResourceId> = self
            .attachments
            .frame_attachments()
            .iter()
            .filter(|attachment| !attachment.is_transient())
            .map(FrameAttachment::resource_id)
            .collect();
        let mut culled = HashSet::new();

        for &index in order.iter().rev() {
            let scope = &self.scopes[index.0];
            let usages: Vec<&ScopeAttachment> = scope
                .attachments()
                .iter()
                .map(|&handle| self.attachments.scope_attachment(handle))
                .collect();

            let has_writes = usages.iter().any(|usage| usage.access().is_write());
            let writes_required = usages.iter().any(|usage| {
                usage.access().is_write() && required_resources.contains(&usage.resource_id())
            });

            if writes_required || !has_writes {
                required_resources.extend(
                    usages
                        .iter()
                        .filter(|usage| usage.access().contains(AttachmentAccess::READ))
                        .map(|usage| usage.resource_id()),
                );
            } else {
                culled.insert(index);
            }
        }

        culled
    }

    fn is_live(&self, attachment: &ScopeAttachment) -> bool {
        !self.scopes[attachment.scope().0].is_culled()
    }

    fn compute_lifetimes(&mut self) {
        let frame_end = self.execution_order.len().saturating_sub(1);
        let mut lifetimes = Vec::new();

        for frame_attachment in self.attachments.frame_attachments() {
            let mut live = self
                .attachments
                .chain(frame_attachment.resource_id())
                .filter(|(_, attachment)| self.is_live(attachment))
                .filter_map(|(_, attachment)| {
                    self.scopes[attachment.scope().0].execution_index()
                });

            let Some(first) = live.next() else {
                log::debug!(
                    "Attachment '{}' is not used by any scope this frame",
                    frame_attachment.name()
                );
                continue;
            };
            let last = live.last().unwrap_or(first);

            let lifetime = if frame_attachment.is_transient() && !self.descriptor.aliasing_enabled {
                Lifetime::new(0, frame_end)
            } else {
                Lifetime::new(first, last)
            };
            lifetimes.push((frame_attachment.resource_id(), lifetime));
        }

        for (resource_id, lifetime) in lifetimes {
            self.attachments.set_lifetime(resource_id, lifetime);
        }
    }

    fn allocate_transients(&mut self) -> Result<AliasingPlan> {
        let mut requests = Vec::new();

        for frame_attachment in self.attachments.frame_attachments() {
            if !frame_attachment.is_transient() {
                continue;
            }
            let Some(lifetime) = frame_attachment.lifetime() else {
                continue;
            };

            let mut live = self
                .attachments
                .chain(frame_attachment.resource_id())
                .map(|(_, attachment)| attachment)
                .filter(|attachment| self.is_live(attachment));
            let Some(first) = live.next() else {
                continue;
            };
            let last = live.last().unwrap_or(first);

            requests.push(TransientAllocationRequest {
                resource_id: frame_attachment.resource_id(),
                name: frame_attachment.name().to_string(),
                kind: frame_attachment.kind(),
                requirements: self
                    .device
                    .resource_requirements(frame_attachment.descriptor()),
                lifetime,
                first_state: first.state(),
                last_state: last.state(),
            });
        }

        let plan = self.allocator.lock().plan(&requests)?;

        for heap_index in self.heaps.len()..plan.heaps().len() {
            let heap = self.device.create_heap(&HeapDescriptor {
                label: format!("transient heap {heap_index}"),
                capacity_bytes: self.descriptor.heap_capacity_bytes,
            })?;
            log::debug!("Created transient heap {} as {:?}", heap_index, heap);
            self.heaps.push(heap);
        }

        for request in &requests {
            let Some(placement) = plan.placement(request.resource_id) else {
                continue;
            };
            let heap = self.heaps[placement.heap_index];
            let Some(descriptor) = self
                .attachments
                .find(request.resource_id)
                .map(|attachment| *attachment.descriptor())
            else {
                continue;
            };

            let resource = match descriptor {
                ResourceDescriptor::Image(image) => {
                    ResourceHandle::Image(self.device.place_image(heap, placement.offset, &image)?)
                }
                ResourceDescriptor::Buffer(buffer) => ResourceHandle::Buffer(
                    self.device.place_buffer(heap, placement.offset, &buffer)?,
                ),
            };
            self.attachments.set_resource(request.resource_id, resource);
        }

        Ok(plan)
    }

    fn create_views(&mut self) -> Result<()> {
        let mut requests = Vec::new();

        for &index in &self.execution_order {
            for &handle in self.scopes[index.0].attachments() {
                let attachment = self.attachments.scope_attachment(handle);
                let Some(resource) = self
                    .attachments
                    .find(attachment.resource_id())
                    .and_then(FrameAttachment::resource)
                else {
                    continue;
                };
                requests.push((handle, resource, attachment.view_descriptor().clone()));
            }
        }

        // Views are stored as they are created so a failure part way through
        // still releases the ones that exist.
        for (handle, resource, descriptor) in requests {
            let view = self.device.create_view(resource, &descriptor)?;
            self.attachments.set_view(handle, view);
        }
        Ok(())
    }

    fn compute_barriers(&mut self, plan: &AliasingPlan) {
        let mut per_scope = Vec::with_capacity(self.execution_order.len());

        for &index in &self.execution_order {
            let scope = &self.scopes[index.0];

            let mut transitions = Vec::new();
            for &handle in scope.attachments() {
                let attachment = self.attachments.scope_attachment(handle);
                let mut previous = attachment.prev();
                while let Some(previous_handle) = previous {
                    let candidate = self.attachments.scope_attachment(previous_handle);
                    if self.is_live(candidate) {
                        break;
                    }
                    previous = candidate.prev();
                }

                let before = previous.map(|handle| self.attachments.scope_attachment(handle).state());
                let after = attachment.state();
                if before.is_some_and(|before| before.is_compatible_with(&after)) {
                    continue;
                }
                transitions.push(TransitionBarrier {
                    resource_id: attachment.resource_id(),
                    before,
                    after,
                });
            }

            let aliasing_barriers: Vec<AliasingBarrier> = scope
                .execution_index()
                .map(|execution_index| plan.barriers_at(execution_index).cloned().collect())
                .unwrap_or_default();

            let mut waits = Vec::new();
            for edge in self
                .graph
                .edges_directed(NodeIndex::new(index.0), Direction::Incoming)
            {
                if *edge.weight() == DependencyKind::ChainOrder {
                    continue;
                }
                let producer = &self.scopes[edge.source().index()];
                if producer.is_culled() || producer.queue_class() == scope.queue_class() {
                    continue;
                }
                let wait = CrossQueueWait {
                    queue: producer.queue_class(),
                    scope: producer.index(),
                };
                if !waits.contains(&wait) {
                    waits.push(wait);
                }
            }

            // Reused bytes must not be touched while another queue still
            // works on their previous occupant.
            for barrier in &aliasing_barriers {
                for previous in self.last_users_per_queue(barrier.before.resource_id) {
                    let user = &self.scopes[previous.0];
                    if user.queue_class() == scope.queue_class() {
                        continue;
                    }
                    let wait = CrossQueueWait {
                        queue: user.queue_class(),
                        scope: previous,
                    };
                    if !waits.contains(&wait) {
                        waits.push(wait);
                    }
                }
            }
            waits.sort_by_key(|wait: &CrossQueueWait| wait.scope);

            per_scope.push((index, transitions, aliasing_barriers, waits));
        }

        for (index, transitions, aliasing_barriers, waits) in per_scope {
            let scope = &mut self.scopes[index.0];
            scope.set_transitions(transitions);
            scope.set_aliasing_barriers(aliasing_barriers);
            scope.set_cross_queue_waits(waits);
        }
    }

    /// The latest live scope using `resource_id` on each queue.
    fn last_users_per_queue(&self, resource_id: ResourceId) -> Vec<ScopeIndex> {
        let mut last: Vec<(QueueClass, ScopeIndex, usize)> = Vec::new();

        for (_, attachment) in self.attachments.chain(resource_id) {
            let user = &self.scopes[attachment.scope().0];
            let Some(execution_index) = user.execution_index() else {
                continue;
            };
            match last.iter_mut().find(|(queue, _, _)| *queue == user.queue_class()) {
                Some(entry) if entry.2 < execution_index => {
                    *entry = (user.queue_class(), user.index(), execution_index);
                }
                Some(_) => {}
                None => last.push((user.queue_class(), user.index(), execution_index)),
            }
        }

        last.into_iter().map(|(_, scope, _)| scope).collect()
    }

    fn update_statistics(&mut self, culled_scope_count: usize) {
        let transient_count = self
            .attachments
            .frame_attachments()
            .iter()
            .filter(|attachment| attachment.is_transient())
            .count();

        let mut statistics = FrameStatistics {
            frame_index: self.frame_index,
            scope_count: self.scopes.len(),
            culled_scope_count,
            transient_count,
            imported_count: self.attachments.frame_attachments().len() - transient_count,
            transition_barrier_count: self
                .scopes
                .iter()
                .map(|scope| scope.transitions().len())
                .sum(),
            ..Default::default()
        };

        if let Some(plan) = &self.aliasing_plan {
            statistics.heap_count = plan.heaps().len();
            statistics.heap_bytes = plan.total_size_bytes();
            statistics.unaliased_bytes = plan
                .placements()
                .values()
                .map(|placement| placement.size)
                .sum();
            statistics.aliasing_barrier_count = plan.barriers().len();
        }

        log::debug!(
            "Frame {} compiled: {} scopes ({} culled), {} transients in {} bytes ({} unaliased)",
            statistics.frame_index,
            statistics.scope_count,
            statistics.culled_scope_count,
            statistics.transient_count,
            statistics.heap_bytes,
            statistics.unaliased_bytes
        );

        self.statistics = statistics;
    }
}

impl<C> FrameGraph<C> {
    /// Hands the frame's views and placed transients back to the device.
    fn release_frame_objects(&self) {
        let views: Vec<_> = self.attachments.views().collect();
        let placed: Vec<_> = self.attachments.placed_transients().collect();
        if views.is_empty() && placed.is_empty() {
            return;
        }

        log::trace!(
            "Frame {} released {} views and {} transients",
            self.frame_index,
            views.len(),
            placed.len()
        );
        for view in views {
            self.device.release_view(view);
        }
        for resource in placed {
            self.device.release_resource(resource);
        }
    }
}

impl<C> Drop for FrameGraph<C> {
    fn drop(&mut self) {
        self.release_frame_objects();
        for heap in self.heaps.drain(..) {
            self.device.release_heap(heap);
        }
    }
}
