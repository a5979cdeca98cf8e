use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use frame_graph::{
    AliasingBarrier, BufferDescriptor, BufferHandle, CommandEncoder, CommandListHandle,
    CommandListPool, DeviceError, DrawItem, FrameSubmission, HeapBackend, HeapDescriptor,
    HeapHandle, ImageDescriptor, ImageHandle, PipelineStateHandle, QueueClass, ResourceHandle,
    ShaderResourceGroupHandle, TransitionBarrier, ViewDescriptor, ViewFactory, ViewHandle,
};
use parking_lot::Mutex;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeviceStatistics {
    pub draws: usize,
    pub dispatches: usize,
    pub copies: usize,
    pub aliasing_barriers: usize,
    pub transition_barriers: usize,
    pub submitted_command_lists: usize,
    pub discarded_command_lists: usize,
}

#[derive(Debug)]
struct OpenCommandList {
    queue: QueueClass,
    commands: usize,
}

/// A device that validates handles and counts commands without touching a GPU.
#[derive(Debug, Default)]
pub struct HeadlessDevice {
    next_handle: AtomicU64,
    heaps: Mutex<HashMap<HeapHandle, u64>>,
    images: Mutex<HashMap<ImageHandle, ImageDescriptor>>,
    buffers: Mutex<HashMap<BufferHandle, BufferDescriptor>>,
    placed: Mutex<HashSet<ResourceHandle>>,
    views: Mutex<HashMap<ViewHandle, ResourceHandle>>,
    labels: Mutex<HashMap<u64, String>>,
    command_lists: Mutex<HashMap<CommandListHandle, OpenCommandList>>,
    statistics: Mutex<DeviceStatistics>,
}

impl HeadlessDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn next_handle(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn labeled(&self, label: &str) -> u64 {
        let handle = self.next_handle();
        self.labels.lock().insert(handle, label.to_string());
        handle
    }

    pub fn label(&self, handle: u64) -> Option<String> {
        self.labels.lock().get(&handle).cloned()
    }

    /// Committed image outside any heap, used for the swapchain.
    pub fn create_image(&self, label: &str, descriptor: ImageDescriptor) -> ImageHandle {
        let image = ImageHandle(self.labeled(label));
        self.images.lock().insert(image, descriptor);
        image
    }

    pub fn release_image(&self, image: ImageHandle) {
        self.images.lock().remove(&image);
        self.labels.lock().remove(&image.0);
    }

    pub fn create_buffer(&self, label: &str, descriptor: BufferDescriptor) -> BufferHandle {
        let buffer = BufferHandle(self.labeled(label));
        self.buffers.lock().insert(buffer, descriptor);
        buffer
    }

    pub fn create_pipeline_state(&self, label: &str) -> PipelineStateHandle {
        PipelineStateHandle(self.labeled(label))
    }

    pub fn create_shader_resource_group(&self, label: &str) -> ShaderResourceGroupHandle {
        ShaderResourceGroupHandle(self.labeled(label))
    }

    pub fn heap_bytes(&self) -> u64 {
        self.heaps.lock().values().sum()
    }

    pub fn statistics(&self) -> DeviceStatistics {
        *self.statistics.lock()
    }

    /// Placed resources and views the frame graph has not released yet.
    pub fn live_frame_objects(&self) -> (usize, usize) {
        (self.placed.lock().len(), self.views.lock().len())
    }

    /// Closes every list of the submission. Lists the device does not know are
    /// reported and skipped.
    pub fn submit(&self, submission: &FrameSubmission) {
        let mut submitted = 0;
        let mut command_lists = self.command_lists.lock();

        for queue in &submission.queues {
            for recorded in &queue.command_lists {
                let Some(list) = command_lists.remove(&recorded.handle) else {
                    log::warn!(
                        "Submitted unknown command list {:?} for scope '{}'",
                        recorded.handle,
                        recorded.scope_id
                    );
                    continue;
                };
                for wait in &recorded.waits {
                    log::trace!(
                        "{:?} queue waits on {:?} before {:?}",
                        list.queue,
                        wait.queue,
                        recorded.handle
                    );
                }
                log::trace!(
                    "Submitted {:?} on {:?} with {} commands",
                    recorded.handle,
                    list.queue,
                    list.commands
                );
                submitted += 1;
            }
        }

        drop(command_lists);

        self.statistics.lock().submitted_command_lists += submitted;
    }

    fn record(&self, command_list: CommandListHandle) -> Result<(), DeviceError> {
        match self.command_lists.lock().get_mut(&command_list) {
            Some(list) => {
                list.commands += 1;
                Ok(())
            }
            None => Err(DeviceError::Recording {
                reason: format!("command list {:?} is not open", command_list),
            }),
        }
    }

    fn resource_exists(&self, resource: ResourceHandle) -> bool {
        match resource {
            ResourceHandle::Image(image) => self.images.lock().contains_key(&image),
            ResourceHandle::Buffer(buffer) => self.buffers.lock().contains_key(&buffer),
        }
    }
}

impl HeapBackend for HeadlessDevice {
    fn create_heap(&self, descriptor: &HeapDescriptor) -> Result<HeapHandle, DeviceError> {
        let heap = HeapHandle(self.labeled(&descriptor.label));
        self.heaps.lock().insert(heap, descriptor.capacity_bytes);
        log::debug!(
            "Created heap '{}' of {} bytes",
            descriptor.label,
            descriptor.capacity_bytes
        );
        Ok(heap)
    }

    fn release_heap(&self, heap: HeapHandle) {
        self.heaps.lock().remove(&heap);
        self.labels.lock().remove(&heap.0);
    }

    fn place_image(
        &self,
        heap: HeapHandle,
        offset: u64,
        descriptor: &ImageDescriptor,
    ) -> Result<ImageHandle, DeviceError> {
        let capacity = self.heaps.lock().get(&heap).copied();
        let Some(capacity) = capacity else {
            return Err(DeviceError::Placement {
                offset,
                reason: format!("unknown heap {:?}", heap),
            });
        };
        if offset >= capacity {
            return Err(DeviceError::Placement {
                offset,
                reason: format!("offset past the end of a {capacity} byte heap"),
            });
        }

        let image = ImageHandle(self.next_handle());
        self.placed.lock().insert(ResourceHandle::Image(image));
        self.images.lock().insert(image, *descriptor);
        Ok(image)
    }

    fn place_buffer(
        &self,
        heap: HeapHandle,
        offset: u64,
        descriptor: &BufferDescriptor,
    ) -> Result<BufferHandle, DeviceError> {
        let capacity = self.heaps.lock().get(&heap).copied();
        if !capacity.is_some_and(|capacity| offset < capacity) {
            return Err(DeviceError::Placement {
                offset,
                reason: format!("heap {:?} cannot hold a buffer here", heap),
            });
        }

        let buffer = BufferHandle(self.next_handle());
        self.placed.lock().insert(ResourceHandle::Buffer(buffer));
        self.buffers.lock().insert(buffer, *descriptor);
        Ok(buffer)
    }

    fn release_resource(&self, resource: ResourceHandle) {
        if !self.placed.lock().remove(&resource) {
            log::warn!("Released {:?} which was never placed", resource);
            return;
        }
        match resource {
            ResourceHandle::Image(image) => {
                self.images.lock().remove(&image);
            }
            ResourceHandle::Buffer(buffer) => {
                self.buffers.lock().remove(&buffer);
            }
        }
    }

    fn emit_aliasing_barrier(
        &self,
        command_list: CommandListHandle,
        _heap: HeapHandle,
        barrier: &AliasingBarrier,
    ) {
        log::trace!(
            "Aliasing barrier in {:?}: {} -> {} over {:?}",
            command_list,
            barrier.before.resource_id,
            barrier.after.resource_id,
            barrier.range
        );
        self.statistics.lock().aliasing_barriers += 1;
    }

    fn emit_transition_barrier(
        &self,
        _command_list: CommandListHandle,
        _resource: ResourceHandle,
        _barrier: &TransitionBarrier,
    ) {
        self.statistics.lock().transition_barriers += 1;
    }
}

impl ViewFactory for HeadlessDevice {
    fn create_view(
        &self,
        resource: ResourceHandle,
        _descriptor: &ViewDescriptor,
    ) -> Result<ViewHandle, DeviceError> {
        if !self.resource_exists(resource) {
            return Err(DeviceError::ViewCreation {
                reason: format!("{:?} does not exist", resource),
            });
        }
        let view = ViewHandle(self.next_handle());
        self.views.lock().insert(view, resource);
        Ok(view)
    }

    fn release_view(&self, view: ViewHandle) {
        self.views.lock().remove(&view);
    }
}

impl CommandListPool for HeadlessDevice {
    fn acquire_command_list(&self, queue: QueueClass) -> Result<CommandListHandle, DeviceError> {
        let command_list = CommandListHandle(self.next_handle());
        self.command_lists.lock().insert(
            command_list,
            OpenCommandList {
                queue,
                commands: 0,
            },
        );
        Ok(command_list)
    }

    fn discard_command_list(&self, command_list: CommandListHandle) {
        if self.command_lists.lock().remove(&command_list).is_some() {
            self.statistics.lock().discarded_command_lists += 1;
        }
    }
}

impl CommandEncoder for HeadlessDevice {
    fn record_draw(
        &self,
        command_list: CommandListHandle,
        _item: &DrawItem<'_>,
    ) -> Result<(), DeviceError> {
        self.record(command_list)?;
        self.statistics.lock().draws += 1;
        Ok(())
    }

    fn record_dispatch(
        &self,
        command_list: CommandListHandle,
        group_count: [u32; 3],
    ) -> Result<(), DeviceError> {
        if group_count.contains(&0) {
            return Ok(());
        }
        self.record(command_list)?;
        self.statistics.lock().dispatches += 1;
        Ok(())
    }

    fn record_copy(
        &self,
        command_list: CommandListHandle,
        source: ResourceHandle,
        destination: ResourceHandle,
    ) -> Result<(), DeviceError> {
        for resource in [source, destination] {
            if !self.resource_exists(resource) {
                return Err(DeviceError::Recording {
                    reason: format!("copy references missing {:?}", resource),
                });
            }
        }
        self.record(command_list)?;
        self.statistics.lock().copies += 1;
        Ok(())
    }
}
