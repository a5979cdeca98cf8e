//! Shared test infrastructure: a recording mock device and a configurable
//! scope producer.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use frame_graph::{
    AliasingBarrier, AttachmentAccess, AttachmentUsage, BufferDescriptor, BufferHandle,
    CommandEncoder, CommandListHandle, CommandListPool, CompileContext, DeviceError, DrawItem,
    ExecuteContext, Format, FrameGraph, FrameGraphBuilder, FrameGraphDescriptor, HeapBackend,
    HeapDescriptor, HeapHandle, ImageDescriptor, ImageHandle, QueueClass, ResourceHandle,
    ResourceId, Result, ScopeId, ScopeProducer, TransitionBarrier, ViewDescriptor, ViewFactory,
    ViewHandle,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    CreateHeap { heap: HeapHandle, capacity_bytes: u64 },
    ReleaseHeap { heap: HeapHandle },
    PlaceImage { heap: HeapHandle, offset: u64, image: ImageHandle },
    PlaceBuffer { heap: HeapHandle, offset: u64, buffer: BufferHandle },
    CreateView { resource: ResourceHandle, view: ViewHandle },
    ReleaseResource { resource: ResourceHandle },
    ReleaseView { view: ViewHandle },
    Acquire { queue: QueueClass, command_list: CommandListHandle },
    Discard { command_list: CommandListHandle },
    AliasingBarrier { command_list: CommandListHandle, heap: HeapHandle, execution_index: usize },
    Transition { command_list: CommandListHandle, resource_id: ResourceId },
    Dispatch { command_list: CommandListHandle },
}

/// Device calls that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePoint {
    Heap,
    Placement,
    View,
}

/// Hands out increasing handles and records every call.
#[derive(Debug, Default)]
pub struct MockDevice {
    next_handle: AtomicU64,
    acquired: AtomicUsize,
    acquire_limit: Mutex<Option<usize>>,
    failure: Mutex<Option<(FailurePoint, usize)>>,
    events: Mutex<Vec<DeviceEvent>>,
}

impl MockDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every acquisition after the first `limit` fails.
    pub fn fail_command_lists_after(&self, limit: usize) {
        *self.acquire_limit.lock() = Some(limit);
    }

    /// Calls of `point` fail once `successes` of them have gone through.
    pub fn fail_after(&self, point: FailurePoint, successes: usize) {
        *self.failure.lock() = Some((point, successes));
    }

    /// Resources and views created but not yet released.
    pub fn live_objects(&self) -> (HashSet<ResourceHandle>, HashSet<ViewHandle>) {
        let mut resources = HashSet::new();
        let mut views = HashSet::new();
        for event in self.events.lock().iter() {
            match *event {
                DeviceEvent::PlaceImage { image, .. } => {
                    resources.insert(ResourceHandle::Image(image));
                }
                DeviceEvent::PlaceBuffer { buffer, .. } => {
                    resources.insert(ResourceHandle::Buffer(buffer));
                }
                DeviceEvent::ReleaseResource { resource } => {
                    resources.remove(&resource);
                }
                DeviceEvent::CreateView { view, .. } => {
                    views.insert(view);
                }
                DeviceEvent::ReleaseView { view } => {
                    views.remove(&view);
                }
                _ => {}
            }
        }
        (resources, views)
    }

    pub fn events(&self) -> Vec<DeviceEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, predicate: impl Fn(&DeviceEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|event| predicate(event)).count()
    }

    fn next(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn record(&self, event: DeviceEvent) {
        self.events.lock().push(event);
    }

    fn should_fail(&self, point: FailurePoint) -> bool {
        match self.failure.lock().as_mut() {
            Some((failing, remaining)) if *failing == point => {
                if *remaining == 0 {
                    return true;
                }
                *remaining -= 1;
                false
            }
            _ => false,
        }
    }
}

impl HeapBackend for MockDevice {
    fn create_heap(&self, descriptor: &HeapDescriptor) -> std::result::Result<HeapHandle, DeviceError> {
        if self.should_fail(FailurePoint::Heap) {
            return Err(DeviceError::HeapCreation {
                capacity_bytes: descriptor.capacity_bytes,
                reason: "heap creation disabled".to_string(),
            });
        }
        let heap = HeapHandle(self.next());
        self.record(DeviceEvent::CreateHeap {
            heap,
            capacity_bytes: descriptor.capacity_bytes,
        });
        Ok(heap)
    }

    fn release_heap(&self, heap: HeapHandle) {
        self.record(DeviceEvent::ReleaseHeap { heap });
    }

    fn place_image(
        &self,
        heap: HeapHandle,
        offset: u64,
        _descriptor: &ImageDescriptor,
    ) -> std::result::Result<ImageHandle, DeviceError> {
        if self.should_fail(FailurePoint::Placement) {
            return Err(DeviceError::Placement {
                offset,
                reason: "placement disabled".to_string(),
            });
        }
        let image = ImageHandle(self.next());
        self.record(DeviceEvent::PlaceImage { heap, offset, image });
        Ok(image)
    }

    fn place_buffer(
        &self,
        heap: HeapHandle,
        offset: u64,
        _descriptor: &BufferDescriptor,
    ) -> std::result::Result<BufferHandle, DeviceError> {
        if self.should_fail(FailurePoint::Placement) {
            return Err(DeviceError::Placement {
                offset,
                reason: "placement disabled".to_string(),
            });
        }
        let buffer = BufferHandle(self.next());
        self.record(DeviceEvent::PlaceBuffer { heap, offset, buffer });
        Ok(buffer)
    }

    fn release_resource(&self, resource: ResourceHandle) {
        self.record(DeviceEvent::ReleaseResource { resource });
    }

    fn emit_aliasing_barrier(
        &self,
        command_list: CommandListHandle,
        heap: HeapHandle,
        barrier: &AliasingBarrier,
    ) {
        self.record(DeviceEvent::AliasingBarrier {
            command_list,
            heap,
            execution_index: barrier.execution_index,
        });
    }

    fn emit_transition_barrier(
        &self,
        command_list: CommandListHandle,
        _resource: ResourceHandle,
        barrier: &TransitionBarrier,
    ) {
        self.record(DeviceEvent::Transition {
            command_list,
            resource_id: barrier.resource_id,
        });
    }
}

impl ViewFactory for MockDevice {
    fn create_view(
        &self,
        resource: ResourceHandle,
        _descriptor: &ViewDescriptor,
    ) -> std::result::Result<ViewHandle, DeviceError> {
        if self.should_fail(FailurePoint::View) {
            return Err(DeviceError::ViewCreation {
                reason: "view creation disabled".to_string(),
            });
        }
        let view = ViewHandle(self.next());
        self.record(DeviceEvent::CreateView { resource, view });
        Ok(view)
    }

    fn release_view(&self, view: ViewHandle) {
        self.record(DeviceEvent::ReleaseView { view });
    }
}

impl CommandListPool for MockDevice {
    fn acquire_command_list(
        &self,
        queue: QueueClass,
    ) -> std::result::Result<CommandListHandle, DeviceError> {
        let acquired = self.acquired.fetch_add(1, Ordering::Relaxed);
        if let Some(limit) = *self.acquire_limit.lock()
            && acquired >= limit
        {
            return Err(DeviceError::CommandList {
                reason: format!("pool exhausted after {limit} lists"),
            });
        }

        let command_list = CommandListHandle(self.next());
        self.record(DeviceEvent::Acquire {
            queue,
            command_list,
        });
        Ok(command_list)
    }

    fn discard_command_list(&self, command_list: CommandListHandle) {
        self.record(DeviceEvent::Discard { command_list });
    }
}

impl CommandEncoder for MockDevice {
    fn record_draw(
        &self,
        _command_list: CommandListHandle,
        _item: &DrawItem<'_>,
    ) -> std::result::Result<(), DeviceError> {
        Ok(())
    }

    fn record_dispatch(
        &self,
        command_list: CommandListHandle,
        _group_count: [u32; 3],
    ) -> std::result::Result<(), DeviceError> {
        self.record(DeviceEvent::Dispatch { command_list });
        Ok(())
    }

    fn record_copy(
        &self,
        _command_list: CommandListHandle,
        _source: ResourceHandle,
        _destination: ResourceHandle,
    ) -> std::result::Result<(), DeviceError> {
        Ok(())
    }
}

/// Per-frame configuration for test producers.
#[derive(Debug, Clone, Default)]
pub struct TestConfig {
    pub disabled: Vec<&'static str>,
}

pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

#[derive(Debug, Clone)]
enum Transient {
    Image(&'static str, ImageDescriptor),
    Buffer(&'static str, BufferDescriptor),
}

/// A producer whose declarations are configured up front.
pub struct TestProducer {
    id: &'static str,
    queue: QueueClass,
    transients: Vec<Transient>,
    usages: Vec<(&'static str, AttachmentUsage, AttachmentAccess)>,
    after: Vec<&'static str>,
    before: Vec<&'static str>,
    items: u32,
    fail_build: bool,
    log: CallLog,
}

impl TestProducer {
    pub fn new(id: &'static str, log: &CallLog) -> Self {
        Self {
            id,
            queue: QueueClass::Graphics,
            transients: Vec::new(),
            usages: Vec::new(),
            after: Vec::new(),
            before: Vec::new(),
            items: 0,
            fail_build: false,
            log: log.clone(),
        }
    }

    pub fn on_queue(mut self, queue: QueueClass) -> Self {
        self.queue = queue;
        self
    }

    pub fn creates_image(mut self, name: &'static str, width: u32, height: u32) -> Self {
        self.transients.push(Transient::Image(
            name,
            ImageDescriptor::new_2d(Format::Rgba8Unorm, width, height),
        ));
        self
    }

    pub fn creates_buffer(mut self, name: &'static str, size: u64) -> Self {
        self.transients
            .push(Transient::Buffer(name, BufferDescriptor::new(size)));
        self
    }

    pub fn color(self, name: &'static str) -> Self {
        self.uses(name, AttachmentUsage::RenderTarget, AttachmentAccess::WRITE)
    }

    pub fn reads(self, name: &'static str) -> Self {
        self.uses(name, AttachmentUsage::ShaderResource, AttachmentAccess::READ)
    }

    pub fn writes(self, name: &'static str) -> Self {
        self.uses(name, AttachmentUsage::ShaderResource, AttachmentAccess::WRITE)
    }

    pub fn uses(
        mut self,
        name: &'static str,
        usage: AttachmentUsage,
        access: AttachmentAccess,
    ) -> Self {
        self.usages.push((name, usage, access));
        self
    }

    pub fn after(mut self, scope: &'static str) -> Self {
        self.after.push(scope);
        self
    }

    pub fn before(mut self, scope: &'static str) -> Self {
        self.before.push(scope);
        self
    }

    pub fn items(mut self, items: u32) -> Self {
        self.items = items;
        self
    }

    pub fn failing_build(mut self) -> Self {
        self.fail_build = true;
        self
    }

    pub fn boxed(self) -> Box<dyn ScopeProducer<TestConfig>> {
        Box::new(self)
    }
}

impl ScopeProducer<TestConfig> for TestProducer {
    fn scope_id(&self) -> ScopeId {
        ScopeId::new(self.id)
    }

    fn queue_class(&self) -> QueueClass {
        self.queue
    }

    fn is_enabled(&self, configs: &TestConfig) -> bool {
        !configs.disabled.contains(&self.id)
    }

    fn setup_frame_graph_dependencies(&mut self, builder: &mut FrameGraphBuilder<'_>) -> Result<()> {
        self.log.lock().push(format!("setup:{}", self.id));

        for transient in &self.transients {
            match transient {
                Transient::Image(name, descriptor) => {
                    builder.create_transient_image(name, *descriptor)?;
                }
                Transient::Buffer(name, descriptor) => {
                    builder.create_transient_buffer(name, *descriptor)?;
                }
            }
        }

        for &(name, usage, access) in &self.usages {
            builder.use_attachment(frame_graph::AttachmentUsageDescriptor::new(
                ResourceId::from_name(name),
                usage,
                access,
            ));
        }
        for &scope in &self.after {
            builder.execute_after(scope);
        }
        for &scope in &self.before {
            builder.execute_before(scope);
        }
        builder.set_estimated_item_count(self.items);
        Ok(())
    }

    fn compile_resources(&mut self, context: &CompileContext<'_, TestConfig>) -> Result<()> {
        for &(name, _, _) in &self.usages {
            assert!(
                context.view(ResourceId::from_name(name)).is_some(),
                "scope '{}' has no view for '{}'",
                self.id,
                name
            );
        }
        self.log.lock().push(format!("compile:{}", self.id));
        Ok(())
    }

    fn build_command_list(&self, context: &ExecuteContext<'_, TestConfig>) -> Result<()> {
        if self.fail_build {
            return Err(DeviceError::Recording {
                reason: format!("{} refused to record", self.id),
            }
            .into());
        }

        context
            .device
            .record_dispatch(context.command_list, [1, 1, 1])?;
        self.log.lock().push(format!(
            "build:{}:{}..{}",
            self.id, context.item_range.start, context.item_range.end
        ));
        Ok(())
    }
}

pub fn frame_graph(
    device: &Arc<MockDevice>,
    descriptor: FrameGraphDescriptor,
) -> FrameGraph<TestConfig> {
    let _ = env_logger::builder().is_test(true).try_init();
    FrameGraph::new(device.clone(), descriptor)
}

pub fn names<'a>(scopes: impl IntoIterator<Item = &'a ScopeId>) -> Vec<String> {
    scopes
        .into_iter()
        .map(|scope| scope.as_str().to_string())
        .collect()
}
