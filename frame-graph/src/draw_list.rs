use std::ops::Range;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::draw_packet::{
    DrawFilterMask, DrawItem, DrawListMask, DrawListTag, DrawPacket, MAX_DRAW_LIST_TAGS,
};

/// Reference to one item of a shared draw packet.
#[derive(Debug, Clone)]
pub struct DrawItemProperties {
    pub packet: Arc<DrawPacket>,
    pub item_index: usize,
    pub sort_key: u64,
}

impl DrawItemProperties {
    pub fn item(&self) -> Option<DrawItem<'_>> {
        self.packet.draw_item(self.item_index)
    }
}

/// Collects draw items for one view, one list per draw list tag.
///
/// Packets may be added from several threads. Once [`finalize`](Self::finalize)
/// ran, each list is sorted by sort key and scopes read them by item range.
#[derive(Debug)]
pub struct DrawListContext {
    draw_list_mask: DrawListMask,
    filter_mask: DrawFilterMask,
    pending: Mutex<Vec<Vec<DrawItemProperties>>>,
    lists: Vec<Vec<DrawItemProperties>>,
    finalized: bool,
}

impl DrawListContext {
    pub fn new(draw_list_mask: DrawListMask, filter_mask: DrawFilterMask) -> Self {
        Self {
            draw_list_mask,
            filter_mask,
            pending: Mutex::new(vec![Vec::new(); MAX_DRAW_LIST_TAGS]),
            lists: vec![Vec::new(); MAX_DRAW_LIST_TAGS],
            finalized: false,
        }
    }

    pub fn draw_list_mask(&self) -> DrawListMask {
        self.draw_list_mask
    }

    pub fn filter_mask(&self) -> DrawFilterMask {
        self.filter_mask
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Adds every item of `packet` whose tag this context collects. Packets
    /// outside the filter mask are skipped entirely. Returns the number of
    /// items taken.
    pub fn add_draw_packet(&self, packet: &Arc<DrawPacket>) -> usize {
        if !packet.draw_filter_mask().intersects(self.filter_mask) {
            return 0;
        }
        if packet.draw_list_mask().0 & self.draw_list_mask.0 == 0 {
            return 0;
        }

        let mut pending = self.pending.lock();
        let mut added = 0;
        for (item_index, item) in packet.draw_items().enumerate() {
            if !self.draw_list_mask.contains(item.draw_list_tag) {
                continue;
            }
            pending[item.draw_list_tag.index()].push(DrawItemProperties {
                packet: packet.clone(),
                item_index,
                sort_key: item.sort_key,
            });
            added += 1;
        }
        added
    }

    /// Moves the accumulated items into the lists and sorts each list by
    /// sort key. Items with equal keys keep their insertion order.
    pub fn finalize(&mut self) {
        let pending = self.pending.get_mut();
        for (list, items) in self.lists.iter_mut().zip(pending.iter_mut()) {
            list.append(items);
            list.sort_by_key(|properties| properties.sort_key);
        }
        self.finalized = true;
    }

    pub fn draw_list(&self, tag: DrawListTag) -> &[DrawItemProperties] {
        self.lists
            .get(tag.index())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The part of a list a single command list records. The range is
    /// clamped to the list length.
    pub fn draw_list_range(&self, tag: DrawListTag, range: Range<u32>) -> &[DrawItemProperties] {
        let list = self.draw_list(tag);
        let end = (range.end as usize).min(list.len());
        let start = (range.start as usize).min(end);
        &list[start..end]
    }

    pub fn item_count(&self, tag: DrawListTag) -> usize {
        self.draw_list(tag).len()
    }

    /// Drops every collected item, releasing the packets this context held.
    pub fn clear(&mut self) {
        for list in &mut self.lists {
            list.clear();
        }
        for items in self.pending.get_mut().iter_mut() {
            items.clear();
        }
        self.finalized = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::PipelineStateHandle;
    use crate::draw_packet::{
        DrawListTagRegistry, DrawPacketBuilder, DrawRequest, SystemDrawPacketAllocator,
    };

    fn packet(
        requests: &[(DrawListTag, u64)],
        filter: DrawFilterMask,
    ) -> Arc<DrawPacket> {
        let mut builder = DrawPacketBuilder::begin(Arc::new(SystemDrawPacketAllocator));
        builder.set_draw_filter_mask(filter);
        for (index, &(tag, sort_key)) in requests.iter().enumerate() {
            builder.add_draw_item(
                DrawRequest::new(tag, PipelineStateHandle(index as u64)).sort_key(sort_key),
            );
        }
        builder.end().unwrap()
    }

    #[test]
    fn items_are_distributed_by_tag_and_sorted() {
        let mut registry = DrawListTagRegistry::new();
        let forward = registry.acquire_tag("forward").unwrap();
        let shadow = registry.acquire_tag("shadow").unwrap();
        let transparent = registry.acquire_tag("transparent").unwrap();

        let mut context = DrawListContext::new(
            DrawListMask::NONE.with(forward).with(shadow),
            DrawFilterMask::MAIN_VIEW,
        );

        let first = packet(
            &[(forward, 30), (shadow, 1), (forward, 10), (transparent, 0)],
            DrawFilterMask::all(),
        );
        let second = packet(&[(forward, 10), (forward, 20)], DrawFilterMask::MAIN_VIEW);
        let hidden = packet(&[(forward, 0)], DrawFilterMask::SHADOW);

        assert_eq!(context.add_draw_packet(&first), 3);
        assert_eq!(context.add_draw_packet(&second), 2);
        assert_eq!(context.add_draw_packet(&hidden), 0);
        context.finalize();

        let keys: Vec<u64> = context
            .draw_list(forward)
            .iter()
            .map(|properties| properties.sort_key)
            .collect();
        assert_eq!(keys, vec![10, 10, 20, 30]);

        // Equal keys keep insertion order: the item from the first packet wins.
        let tied = &context.draw_list(forward)[0];
        assert!(Arc::ptr_eq(&tied.packet, &first));
        assert_eq!(tied.item().unwrap().pipeline_state, PipelineStateHandle(2));

        assert_eq!(context.item_count(shadow), 1);
        assert_eq!(context.item_count(transparent), 0);
        assert_eq!(context.draw_list_range(forward, 1..3).len(), 2);
        assert_eq!(context.draw_list_range(forward, 3..100).len(), 1);
        assert!(context.draw_list_range(forward, 10..12).is_empty());
    }

    #[test]
    fn packets_can_be_added_from_many_threads() {
        let mut registry = DrawListTagRegistry::new();
        let forward = registry.acquire_tag("forward").unwrap();
        let mut context = DrawListContext::new(DrawListMask::ALL, DrawFilterMask::all());

        std::thread::scope(|scope| {
            for thread in 0..4u64 {
                let context = &context;
                scope.spawn(move || {
                    for index in 0..25 {
                        context.add_draw_packet(&packet(&[(forward, thread * 100 + index)], DrawFilterMask::all()));
                    }
                });
            }
        });
        context.finalize();

        let list = context.draw_list(forward);
        assert_eq!(list.len(), 100);
        assert!(list.windows(2).all(|pair| pair[0].sort_key <= pair[1].sort_key));

        context.clear();
        assert_eq!(context.item_count(forward), 0);
        assert!(!context.is_finalized());
    }
}
