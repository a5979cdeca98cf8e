//! Immutable bundles of draw items sharing one allocation.
//!
//! A packet stores every table (header, per-item records, shader resource
//! groups, stream buffer views and root constants) in a single `u64` block
//! obtained from a [`DrawPacketAllocator`]. Tables are `#[repr(C)]` plain old
//! data viewed in place with `bytemuck`, and the block goes back to its
//! allocator when the last `Arc<DrawPacket>` is dropped.

use std::fmt;
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytemuck::{Pod, Zeroable};
use parking_lot::Mutex;

use crate::device::{BufferHandle, PipelineStateHandle, ShaderResourceGroupHandle};
use crate::error::{FrameGraphError, Result};

pub const MAX_DRAW_LIST_TAGS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DrawListTag(u8);

impl DrawListTag {
    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn mask(self) -> DrawListMask {
        DrawListMask(1 << self.0)
    }
}

/// Set of draw list tags, one bit per tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DrawListMask(pub u64);

impl DrawListMask {
    pub const NONE: DrawListMask = DrawListMask(0);
    pub const ALL: DrawListMask = DrawListMask(u64::MAX);

    pub fn contains(self, tag: DrawListTag) -> bool {
        self.0 & tag.mask().0 != 0
    }

    pub fn with(self, tag: DrawListTag) -> Self {
        DrawListMask(self.0 | tag.mask().0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

bitflags::bitflags! {
    /// Which views a packet is visible to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DrawFilterMask: u32 {
        const MAIN_VIEW = 1 << 0;
        const SHADOW = 1 << 1;
        const REFLECTION = 1 << 2;
        const _ = !0;
    }
}

impl Default for DrawFilterMask {
    fn default() -> Self {
        DrawFilterMask::all()
    }
}

/// Names to draw list tags. Tags are handed out in order and never reused.
#[derive(Debug, Default)]
pub struct DrawListTagRegistry {
    names: Vec<String>,
}

impl DrawListTagRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the existing tag when the name is already registered.
    pub fn acquire_tag(&mut self, name: &str) -> Result<DrawListTag> {
        if let Some(tag) = self.find_tag(name) {
            return Ok(tag);
        }
        if self.names.len() >= MAX_DRAW_LIST_TAGS {
            return Err(FrameGraphError::DrawListTagsExhausted {
                name: name.to_string(),
                max: MAX_DRAW_LIST_TAGS,
            });
        }
        let tag = DrawListTag(self.names.len() as u8);
        self.names.push(name.to_string());
        Ok(tag)
    }

    pub fn find_tag(&self, name: &str) -> Option<DrawListTag> {
        self.names
            .iter()
            .position(|existing| existing == name)
            .map(|index| DrawListTag(index as u8))
    }

    pub fn name(&self, tag: DrawListTag) -> Option<&str> {
        self.names.get(tag.index()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawArguments {
    Linear {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    Indexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
    Indirect {
        buffer: BufferHandle,
        offset: u64,
        draw_count: u32,
    },
}

impl Default for DrawArguments {
    fn default() -> Self {
        DrawArguments::Linear {
            vertex_count: 0,
            instance_count: 1,
            first_vertex: 0,
            first_instance: 0,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct IndexBufferView {
    pub buffer: BufferHandle,
    pub offset: u64,
    pub size: u32,
    pub index_size_bytes: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct StreamBufferView {
    pub buffer: BufferHandle,
    pub offset: u64,
    pub size: u32,
    pub stride: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct DrawArgumentsRecord {
    kind: u32,
    words: [u32; 5],
}

const ARGUMENTS_LINEAR: u32 = 0;
const ARGUMENTS_INDEXED: u32 = 1;
const ARGUMENTS_INDIRECT: u32 = 2;

impl DrawArgumentsRecord {
    fn encode(arguments: &DrawArguments) -> Self {
        match *arguments {
            DrawArguments::Linear {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            } => Self {
                kind: ARGUMENTS_LINEAR,
                words: [vertex_count, instance_count, first_vertex, first_instance, 0],
            },
            DrawArguments::Indexed {
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            } => Self {
                kind: ARGUMENTS_INDEXED,
                words: [
                    index_count,
                    instance_count,
                    first_index,
                    vertex_offset as u32,
                    first_instance,
                ],
            },
            DrawArguments::Indirect {
                buffer,
                offset,
                draw_count,
            } => Self {
                kind: ARGUMENTS_INDIRECT,
                words: [
                    buffer.0 as u32,
                    (buffer.0 >> 32) as u32,
                    offset as u32,
                    (offset >> 32) as u32,
                    draw_count,
                ],
            },
        }
    }

    fn decode(&self) -> DrawArguments {
        let [a, b, c, d, e] = self.words;
        match self.kind {
            ARGUMENTS_INDEXED => DrawArguments::Indexed {
                index_count: a,
                instance_count: b,
                first_index: c,
                vertex_offset: d as i32,
                first_instance: e,
            },
            ARGUMENTS_INDIRECT => DrawArguments::Indirect {
                buffer: BufferHandle(a as u64 | (b as u64) << 32),
                offset: c as u64 | (d as u64) << 32,
                draw_count: e,
            },
            _ => DrawArguments::Linear {
                vertex_count: a,
                instance_count: b,
                first_vertex: c,
                first_instance: d,
            },
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct PacketHeader {
    draw_item_count: u32,
    shader_resource_group_count: u32,
    unique_shader_resource_group_count: u32,
    stream_buffer_view_count: u32,
    root_constant_bytes: u32,
    draw_filter_mask: u32,
    has_index_buffer_view: u32,
    padding: u32,
    draw_list_mask: u64,
    index_buffer_view: IndexBufferView,
    arguments: DrawArgumentsRecord,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct DrawItemRecord {
    sort_key: u64,
    pipeline_state: PipelineStateHandle,
    stream_buffer_view_offset: u32,
    stream_buffer_view_count: u32,
    unique_shader_resource_group_offset: u32,
    unique_shader_resource_group_count: u32,
    draw_list_tag: u32,
    stencil_ref: u32,
}

const WORD: usize = std::mem::size_of::<u64>();

fn words_for<T>(count: usize) -> usize {
    (count * std::mem::size_of::<T>()).div_ceil(WORD)
}

/// Word ranges of each table inside a packet's storage.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PacketLayout {
    header: Range<usize>,
    items: Range<usize>,
    shader_resource_groups: Range<usize>,
    unique_shader_resource_groups: Range<usize>,
    stream_buffer_views: Range<usize>,
    root_constants: Range<usize>,
}

impl PacketLayout {
    fn new(
        items: usize,
        shader_resource_groups: usize,
        unique_shader_resource_groups: usize,
        stream_buffer_views: usize,
        root_constant_bytes: usize,
    ) -> Self {
        let mut cursor = 0;
        let mut next = |words: usize| {
            let range = cursor..cursor + words;
            cursor += words;
            range
        };

        Self {
            header: next(words_for::<PacketHeader>(1)),
            items: next(words_for::<DrawItemRecord>(items)),
            shader_resource_groups: next(words_for::<ShaderResourceGroupHandle>(shader_resource_groups)),
            unique_shader_resource_groups: next(words_for::<ShaderResourceGroupHandle>(
                unique_shader_resource_groups,
            )),
            stream_buffer_views: next(words_for::<StreamBufferView>(stream_buffer_views)),
            root_constants: next(root_constant_bytes.div_ceil(WORD)),
        }
    }

    fn total_words(&self) -> usize {
        self.root_constants.end
    }
}

/// Source of packet storage blocks.
pub trait DrawPacketAllocator: Send + Sync {
    /// Returns a zeroed block of at least `words` words.
    fn allocate(&self, words: usize) -> Box<[u64]>;

    fn release(&self, storage: Box<[u64]>);
}

#[derive(Debug, Default)]
pub struct SystemDrawPacketAllocator;

impl DrawPacketAllocator for SystemDrawPacketAllocator {
    fn allocate(&self, words: usize) -> Box<[u64]> {
        vec![0; words].into_boxed_slice()
    }

    fn release(&self, _storage: Box<[u64]>) {}
}

/// Keeps released blocks around and hands them back out to packets that fit.
#[derive(Debug)]
pub struct DrawPacketPool {
    free: Mutex<Vec<Box<[u64]>>>,
    max_pooled: usize,
    allocations: AtomicUsize,
    reuses: AtomicUsize,
}

impl DrawPacketPool {
    pub fn new(max_pooled: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            max_pooled,
            allocations: AtomicUsize::new(0),
            reuses: AtomicUsize::new(0),
        }
    }

    pub fn pooled_count(&self) -> usize {
        self.free.lock().len()
    }

    pub fn allocation_count(&self) -> usize {
        self.allocations.load(Ordering::Relaxed)
    }

    pub fn reuse_count(&self) -> usize {
        self.reuses.load(Ordering::Relaxed)
    }
}

impl Default for DrawPacketPool {
    fn default() -> Self {
        Self::new(256)
    }
}

impl DrawPacketAllocator for DrawPacketPool {
    fn allocate(&self, words: usize) -> Box<[u64]> {
        let reused = {
            let mut free = self.free.lock();
            let best = free
                .iter()
                .enumerate()
                .filter(|(_, block)| block.len() >= words)
                .min_by_key(|(_, block)| block.len())
                .map(|(index, _)| index);
            best.map(|index| free.swap_remove(index))
        };

        match reused {
            Some(mut block) => {
                block.fill(0);
                self.reuses.fetch_add(1, Ordering::Relaxed);
                block
            }
            None => {
                self.allocations.fetch_add(1, Ordering::Relaxed);
                vec![0; words].into_boxed_slice()
            }
        }
    }

    fn release(&self, storage: Box<[u64]>) {
        let mut free = self.free.lock();
        if free.len() < self.max_pooled {
            free.push(storage);
        }
    }
}

/// One draw of a packet, borrowing the packet's shared tables.
#[derive(Debug, Clone, Copy)]
pub struct DrawItem<'a> {
    pub draw_list_tag: DrawListTag,
    pub sort_key: u64,
    pub stencil_ref: u8,
    pub pipeline_state: PipelineStateHandle,
    pub arguments: DrawArguments,
    pub index_buffer_view: Option<&'a IndexBufferView>,
    pub stream_buffer_views: &'a [StreamBufferView],
    pub shader_resource_groups: &'a [ShaderResourceGroupHandle],
    pub unique_shader_resource_groups: &'a [ShaderResourceGroupHandle],
    pub root_constants: &'a [u8],
    pub draw_filter_mask: DrawFilterMask,
}

pub struct DrawPacket {
    storage: Option<Box<[u64]>>,
    layout: PacketLayout,
    allocator: Arc<dyn DrawPacketAllocator>,
}

impl DrawPacket {
    fn words(&self, range: &Range<usize>) -> &[u64] {
        self.storage
            .as_deref()
            .and_then(|storage| storage.get(range.clone()))
            .unwrap_or(&[])
    }

    fn header(&self) -> Option<&PacketHeader> {
        bytemuck::cast_slice::<u64, PacketHeader>(self.words(&self.layout.header)).first()
    }

    fn item_records(&self) -> &[DrawItemRecord] {
        bytemuck::cast_slice(self.words(&self.layout.items))
    }

    pub fn draw_item_count(&self) -> usize {
        self.item_records().len()
    }

    pub fn draw_list_mask(&self) -> DrawListMask {
        DrawListMask(self.header().map_or(0, |header| header.draw_list_mask))
    }

    pub fn draw_filter_mask(&self) -> DrawFilterMask {
        DrawFilterMask::from_bits_retain(self.header().map_or(0, |header| header.draw_filter_mask))
    }

    pub fn draw_arguments(&self) -> DrawArguments {
        self.header()
            .map(|header| header.arguments.decode())
            .unwrap_or_default()
    }

    pub fn index_buffer_view(&self) -> Option<&IndexBufferView> {
        self.header()
            .filter(|header| header.has_index_buffer_view != 0)
            .map(|header| &header.index_buffer_view)
    }

    pub fn shader_resource_groups(&self) -> &[ShaderResourceGroupHandle] {
        bytemuck::cast_slice(self.words(&self.layout.shader_resource_groups))
    }

    pub fn root_constants(&self) -> &[u8] {
        let bytes: &[u8] = bytemuck::cast_slice(self.words(&self.layout.root_constants));
        let length = self
            .header()
            .map_or(0, |header| header.root_constant_bytes as usize);
        &bytes[..length.min(bytes.len())]
    }

    /// Items are returned in the order they were added.
    pub fn draw_item(&self, index: usize) -> Option<DrawItem<'_>> {
        let record = self.item_records().get(index)?;

        let unique: &[ShaderResourceGroupHandle] =
            bytemuck::cast_slice(self.words(&self.layout.unique_shader_resource_groups));
        let streams: &[StreamBufferView] =
            bytemuck::cast_slice(self.words(&self.layout.stream_buffer_views));

        let unique_start = record.unique_shader_resource_group_offset as usize;
        let unique_end = unique_start + record.unique_shader_resource_group_count as usize;
        let stream_start = record.stream_buffer_view_offset as usize;
        let stream_end = stream_start + record.stream_buffer_view_count as usize;

        Some(DrawItem {
            draw_list_tag: DrawListTag(record.draw_list_tag as u8),
            sort_key: record.sort_key,
            stencil_ref: record.stencil_ref as u8,
            pipeline_state: record.pipeline_state,
            arguments: self.draw_arguments(),
            index_buffer_view: self.index_buffer_view(),
            stream_buffer_views: streams.get(stream_start..stream_end).unwrap_or(&[]),
            shader_resource_groups: self.shader_resource_groups(),
            unique_shader_resource_groups: unique.get(unique_start..unique_end).unwrap_or(&[]),
            root_constants: self.root_constants(),
            draw_filter_mask: self.draw_filter_mask(),
        })
    }

    pub fn draw_items(&self) -> impl Iterator<Item = DrawItem<'_>> {
        (0..self.draw_item_count()).filter_map(|index| self.draw_item(index))
    }

    /// Size of the packet's single allocation.
    pub fn storage_bytes(&self) -> usize {
        self.storage.as_ref().map_or(0, |storage| storage.len() * WORD)
    }
}

impl fmt::Debug for DrawPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DrawPacket")
            .field("draw_item_count", &self.draw_item_count())
            .field("draw_list_mask", &self.draw_list_mask())
            .field("draw_filter_mask", &self.draw_filter_mask())
            .finish()
    }
}

impl Drop for DrawPacket {
    fn drop(&mut self) {
        if let Some(storage) = self.storage.take() {
            self.allocator.release(storage);
        }
    }
}

#[derive(Debug, Clone)]
pub struct DrawRequest {
    pub list_tag: DrawListTag,
    pub pipeline_state: PipelineStateHandle,
    pub stream_buffer_views: Vec<StreamBufferView>,
    pub unique_shader_resource_groups: Vec<ShaderResourceGroupHandle>,
    pub sort_key: u64,
    pub stencil_ref: u8,
}

impl DrawRequest {
    pub fn new(list_tag: DrawListTag, pipeline_state: PipelineStateHandle) -> Self {
        Self {
            list_tag,
            pipeline_state,
            stream_buffer_views: Vec::new(),
            unique_shader_resource_groups: Vec::new(),
            sort_key: 0,
            stencil_ref: 0,
        }
    }

    pub fn stream_buffer_views(mut self, views: impl IntoIterator<Item = StreamBufferView>) -> Self {
        self.stream_buffer_views.extend(views);
        self
    }

    pub fn unique_shader_resource_group(mut self, group: ShaderResourceGroupHandle) -> Self {
        self.unique_shader_resource_groups.push(group);
        self
    }

    pub fn sort_key(mut self, sort_key: u64) -> Self {
        self.sort_key = sort_key;
        self
    }

    pub fn stencil_ref(mut self, stencil_ref: u8) -> Self {
        self.stencil_ref = stencil_ref;
        self
    }
}

pub struct DrawPacketBuilder {
    allocator: Arc<dyn DrawPacketAllocator>,
    arguments: DrawArguments,
    index_buffer_view: Option<IndexBufferView>,
    shader_resource_groups: Vec<ShaderResourceGroupHandle>,
    root_constants: Vec<u8>,
    draw_filter_mask: DrawFilterMask,
    requests: Vec<DrawRequest>,
}

impl DrawPacketBuilder {
    pub fn begin(allocator: Arc<dyn DrawPacketAllocator>) -> Self {
        Self {
            allocator,
            arguments: DrawArguments::default(),
            index_buffer_view: None,
            shader_resource_groups: Vec::new(),
            root_constants: Vec::new(),
            draw_filter_mask: DrawFilterMask::all(),
            requests: Vec::new(),
        }
    }

    pub fn set_draw_arguments(&mut self, arguments: DrawArguments) -> &mut Self {
        self.arguments = arguments;
        self
    }

    pub fn set_index_buffer_view(&mut self, view: IndexBufferView) -> &mut Self {
        self.index_buffer_view = Some(view);
        self
    }

    pub fn add_shader_resource_group(&mut self, group: ShaderResourceGroupHandle) -> &mut Self {
        if !self.shader_resource_groups.contains(&group) {
            self.shader_resource_groups.push(group);
        }
        self
    }

    pub fn set_root_constants(&mut self, bytes: &[u8]) -> &mut Self {
        self.root_constants.clear();
        self.root_constants.extend_from_slice(bytes);
        self
    }

    pub fn set_draw_filter_mask(&mut self, mask: DrawFilterMask) -> &mut Self {
        self.draw_filter_mask = mask;
        self
    }

    pub fn add_draw_item(&mut self, request: DrawRequest) -> &mut Self {
        self.requests.push(request);
        self
    }

    /// Packs everything into one allocation. Returns `None` when no draw
    /// items were added.
    pub fn end(self) -> Option<Arc<DrawPacket>> {
        if self.requests.is_empty() {
            return None;
        }

        let stream_count: usize = self
            .requests
            .iter()
            .map(|request| request.stream_buffer_views.len())
            .sum();
        let unique_count: usize = self
            .requests
            .iter()
            .map(|request| request.unique_shader_resource_groups.len())
            .sum();

        let layout = PacketLayout::new(
            self.requests.len(),
            self.shader_resource_groups.len(),
            unique_count,
            stream_count,
            self.root_constants.len(),
        );
        let mut storage = self.allocator.allocate(layout.total_words());

        let mut draw_list_mask = DrawListMask::NONE;
        let mut records = Vec::with_capacity(self.requests.len());
        let mut streams = Vec::with_capacity(stream_count);
        let mut unique = Vec::with_capacity(unique_count);

        for request in &self.requests {
            draw_list_mask = draw_list_mask.with(request.list_tag);
            records.push(DrawItemRecord {
                sort_key: request.sort_key,
                pipeline_state: request.pipeline_state,
                stream_buffer_view_offset: streams.len() as u32,
                stream_buffer_view_count: request.stream_buffer_views.len() as u32,
                unique_shader_resource_group_offset: unique.len() as u32,
                unique_shader_resource_group_count: request.unique_shader_resource_groups.len()
                    as u32,
                draw_list_tag: request.list_tag.0 as u32,
                stencil_ref: request.stencil_ref as u32,
            });
            streams.extend_from_slice(&request.stream_buffer_views);
            unique.extend_from_slice(&request.unique_shader_resource_groups);
        }

        let header = PacketHeader {
            draw_item_count: records.len() as u32,
            shader_resource_group_count: self.shader_resource_groups.len() as u32,
            unique_shader_resource_group_count: unique_count as u32,
            stream_buffer_view_count: stream_count as u32,
            root_constant_bytes: self.root_constants.len() as u32,
            draw_filter_mask: self.draw_filter_mask.bits(),
            has_index_buffer_view: self.index_buffer_view.is_some() as u32,
            padding: 0,
            draw_list_mask: draw_list_mask.0,
            index_buffer_view: self.index_buffer_view.unwrap_or_default(),
            arguments: DrawArgumentsRecord::encode(&self.arguments),
        };

        write_table(&mut storage, &layout.header, std::slice::from_ref(&header));
        write_table(&mut storage, &layout.items, &records);
        write_table(&mut storage, &layout.shader_resource_groups, &self.shader_resource_groups);
        write_table(&mut storage, &layout.unique_shader_resource_groups, &unique);
        write_table(&mut storage, &layout.stream_buffer_views, &streams);

        let root_constants: &mut [u8] =
            bytemuck::cast_slice_mut(&mut storage[layout.root_constants.clone()]);
        root_constants[..self.root_constants.len()].copy_from_slice(&self.root_constants);

        Some(Arc::new(DrawPacket {
            storage: Some(storage),
            layout,
            allocator: self.allocator,
        }))
    }
}

fn write_table<T: Pod>(storage: &mut [u64], words: &Range<usize>, values: &[T]) {
    let table: &mut [T] = bytemuck::cast_slice_mut(&mut storage[words.clone()]);
    table[..values.len()].copy_from_slice(values);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags() -> (DrawListTag, DrawListTag) {
        let mut registry = DrawListTagRegistry::new();
        (
            registry.acquire_tag("forward").unwrap(),
            registry.acquire_tag("shadow").unwrap(),
        )
    }

    fn stream(buffer: u64) -> StreamBufferView {
        StreamBufferView {
            buffer: BufferHandle(buffer),
            offset: 0,
            size: 1024,
            stride: 32,
        }
    }

    #[test]
    fn items_keep_insertion_order() {
        let (forward, shadow) = tags();
        let mut builder = DrawPacketBuilder::begin(Arc::new(SystemDrawPacketAllocator));
        builder
            .set_draw_arguments(DrawArguments::Indexed {
                index_count: 36,
                instance_count: 1,
                first_index: 0,
                vertex_offset: -4,
                first_instance: 0,
            })
            .set_index_buffer_view(IndexBufferView {
                buffer: BufferHandle(9),
                offset: 0,
                size: 72,
                index_size_bytes: 2,
            })
            .add_shader_resource_group(ShaderResourceGroupHandle(1))
            .set_root_constants(&[1, 2, 3, 4, 5]);

        for index in 0..5u64 {
            let tag = if index % 2 == 0 { forward } else { shadow };
            builder.add_draw_item(
                DrawRequest::new(tag, PipelineStateHandle(100 + index))
                    .sort_key(10 - index)
                    .stream_buffer_views([stream(index), stream(index + 50)]),
            );
        }

        let packet = builder.end().unwrap();
        assert_eq!(packet.draw_item_count(), 5);
        assert_eq!(packet.draw_list_mask(), forward.mask().with(shadow));

        for (index, item) in packet.draw_items().enumerate() {
            assert_eq!(item.pipeline_state, PipelineStateHandle(100 + index as u64));
            assert_eq!(item.sort_key, 10 - index as u64);
            assert_eq!(item.stream_buffer_views.len(), 2);
            assert_eq!(item.stream_buffer_views[0].buffer, BufferHandle(index as u64));
            assert_eq!(item.shader_resource_groups, &[ShaderResourceGroupHandle(1)]);
            assert_eq!(item.root_constants, &[1, 2, 3, 4, 5]);
            assert_eq!(item.index_buffer_view.map(|view| view.size), Some(72));
            assert!(matches!(
                item.arguments,
                DrawArguments::Indexed { vertex_offset: -4, .. }
            ));
        }
        assert!(packet.draw_item(5).is_none());
    }

    #[test]
    fn empty_builder_produces_no_packet() {
        let mut builder = DrawPacketBuilder::begin(Arc::new(SystemDrawPacketAllocator));
        builder.set_draw_arguments(DrawArguments::default());
        assert!(builder.end().is_none());
    }

    #[test]
    fn indirect_arguments_keep_wide_fields() {
        let (forward, _) = tags();
        let mut builder = DrawPacketBuilder::begin(Arc::new(SystemDrawPacketAllocator));
        builder
            .set_draw_arguments(DrawArguments::Indirect {
                buffer: BufferHandle(u64::MAX - 1),
                offset: 1 << 40,
                draw_count: 3,
            })
            .add_draw_item(DrawRequest::new(forward, PipelineStateHandle(1)));
        let packet = builder.end().unwrap();
        assert_eq!(
            packet.draw_arguments(),
            DrawArguments::Indirect {
                buffer: BufferHandle(u64::MAX - 1),
                offset: 1 << 40,
                draw_count: 3,
            }
        );
        assert!(packet.index_buffer_view().is_none());
    }

    #[test]
    fn dropped_packets_return_storage_to_the_pool() {
        let (forward, _) = tags();
        let pool = Arc::new(DrawPacketPool::new(4));

        for _ in 0..3 {
            let mut builder = DrawPacketBuilder::begin(pool.clone());
            builder.add_draw_item(DrawRequest::new(forward, PipelineStateHandle(1)));
            let packet = builder.end().unwrap();
            let shared = packet.clone();
            drop(packet);
            assert_eq!(pool.pooled_count(), 0);
            drop(shared);
            assert_eq!(pool.pooled_count(), 1);
        }

        assert_eq!(pool.allocation_count(), 1);
        assert_eq!(pool.reuse_count(), 2);
    }

    #[test]
    fn registry_runs_out_after_sixty_four_tags() {
        let mut registry = DrawListTagRegistry::new();
        for index in 0..MAX_DRAW_LIST_TAGS {
            registry.acquire_tag(&format!("tag{index}")).unwrap();
        }
        assert_eq!(registry.acquire_tag("tag3").unwrap().index(), 3);
        let error = registry.acquire_tag("one_too_many").unwrap_err();
        assert!(matches!(error, FrameGraphError::DrawListTagsExhausted { max: 64, .. }));
    }
}
