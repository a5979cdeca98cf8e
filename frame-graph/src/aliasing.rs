//! Transient heap packing and aliasing barrier tracking.
//!
//! Transient resources are packed into fixed-capacity heaps with a greedy
//! interval-coloring heuristic. Resources are visited in order of lifetime
//! start; ranges of resources that died before the current start are returned
//! to the heap's free list, and the resource takes the smallest aligned gap
//! that fits (lowest heap, then lowest offset on ties). This is best-effort:
//! optimal packing is NP-hard, but the result never lets two resources with
//! overlapping lifetimes share a byte and is fully deterministic.

use std::collections::HashMap;
use std::ops::Range;

use crate::error::{FrameGraphError, Result};
use crate::types::{Lifetime, MemoryRequirements, ResourceId, ResourceKind, ResourceState, align_up};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasingDescriptor {
    pub heap_capacity_bytes: u64,
    pub allow_heap_growth: bool,
    pub max_heap_count: usize,
}

impl Default for AliasingDescriptor {
    fn default() -> Self {
        Self {
            heap_capacity_bytes: 64 * 1024 * 1024,
            allow_heap_growth: true,
            max_heap_count: 4,
        }
    }
}

impl AliasingDescriptor {
    fn heap_limit(&self) -> usize {
        if self.allow_heap_growth {
            self.max_heap_count.max(1)
        } else {
            1
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransientAllocationRequest {
    pub resource_id: ResourceId,
    pub name: String,
    pub kind: ResourceKind,
    pub requirements: MemoryRequirements,
    pub lifetime: Lifetime,
    pub first_state: ResourceState,
    pub last_state: ResourceState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Placement {
    pub heap_index: usize,
    pub offset: u64,
    pub size: u64,
}

impl Placement {
    pub fn range(&self) -> Range<u64> {
        self.offset..self.offset + self.size
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapOccupant {
    pub resource_id: ResourceId,
    pub range: Range<u64>,
    pub lifetime: Lifetime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AliasedResourceState {
    pub resource_id: ResourceId,
    pub kind: ResourceKind,
    pub state: ResourceState,
}

impl AliasedResourceState {
    fn is_compatible_with(&self, other: &AliasedResourceState) -> bool {
        self.kind == other.kind && self.state.is_compatible_with(&other.state)
    }
}

/// Heap bytes changing occupant at the start of `execution_index`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasingBarrier {
    pub execution_index: usize,
    pub heap_index: usize,
    pub range: Range<u64>,
    pub before: AliasedResourceState,
    pub after: AliasedResourceState,
}

#[derive(Debug, Clone)]
pub struct AliasedHeap {
    capacity_bytes: u64,
    size_bytes: u64,
    free_ranges: Vec<Range<u64>>,
    occupants: Vec<HeapOccupant>,
    live: Vec<usize>,
}

impl AliasedHeap {
    pub fn new(capacity_bytes: u64) -> Self {
        Self {
            capacity_bytes,
            size_bytes: 0,
            free_ranges: vec![0..capacity_bytes],
            occupants: Vec::new(),
            live: Vec::new(),
        }
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }

    /// High watermark of bytes used this frame.
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Every resource placed in the heap this frame, in placement order.
    pub fn occupants(&self) -> &[HeapOccupant] {
        &self.occupants
    }

    pub fn free_ranges(&self) -> &[Range<u64>] {
        &self.free_ranges
    }

    /// Returns `(offset, gap_size)` of the smallest gap that fits.
    fn best_fit(&self, requirements: &MemoryRequirements) -> Option<(u64, u64)> {
        let mut best: Option<(u64, u64)> = None;

        for gap in &self.free_ranges {
            let offset = align_up(gap.start, requirements.alignment);
            let Some(end) = offset.checked_add(requirements.size) else {
                continue;
            };
            if end > gap.end {
                continue;
            }

            let gap_size = gap.end - gap.start;
            if best.is_none_or(|(_, best_size)| gap_size < best_size) {
                best = Some((offset, gap_size));
            }
        }

        best
    }

    fn allocate(&mut self, resource_id: ResourceId, range: Range<u64>, lifetime: Lifetime) {
        if !range.is_empty()
            && let Some(position) = self
                .free_ranges
                .iter()
                .position(|gap| gap.start <= range.start && range.end <= gap.end)
        {
            let gap = self.free_ranges.remove(position);
            let mut insert_at = position;
            if gap.start < range.start {
                self.free_ranges.insert(insert_at, gap.start..range.start);
                insert_at += 1;
            }
            if range.end < gap.end {
                self.free_ranges.insert(insert_at, range.end..gap.end);
            }
        }

        self.size_bytes = self.size_bytes.max(range.end);
        self.live.push(self.occupants.len());
        self.occupants.push(HeapOccupant {
            resource_id,
            range,
            lifetime,
        });
    }

    /// Frees every live occupant whose lifetime ended before `execution_index`.
    fn retire(&mut self, execution_index: usize) {
        let mut index = 0;
        while index < self.live.len() {
            let occupant = &self.occupants[self.live[index]];
            if occupant.lifetime.end < execution_index {
                let range = occupant.range.clone();
                self.live.swap_remove(index);
                self.free(range);
            } else {
                index += 1;
            }
        }
    }

    fn free(&mut self, range: Range<u64>) {
        if range.is_empty() {
            return;
        }
        let position = self
            .free_ranges
            .partition_point(|gap| gap.start < range.start);
        self.free_ranges.insert(position, range);

        if position + 1 < self.free_ranges.len()
            && self.free_ranges[position].end == self.free_ranges[position + 1].start
        {
            let next = self.free_ranges.remove(position + 1);
            self.free_ranges[position].end = next.end;
        }

        if position > 0 && self.free_ranges[position - 1].end == self.free_ranges[position].start {
            let current = self.free_ranges.remove(position);
            self.free_ranges[position - 1].end = current.end;
        }
    }
}

#[derive(Debug, Clone)]
struct TrackedRegion {
    range: Range<u64>,
    occupant: AliasedResourceState,
}

/// Records which resource last owned each heap byte and emits a barrier
/// whenever a new resource takes over bytes from a different one.
#[derive(Debug, Default)]
pub struct AliasingBarrierTracker {
    heaps: Vec<Vec<TrackedRegion>>,
    barriers: Vec<AliasingBarrier>,
}

impl AliasingBarrierTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.heaps.clear();
        self.barriers.clear();
    }

    /// `first` is the state the new resource is first used in, `last` the
    /// state it leaves its bytes in.
    pub fn add_resource(
        &mut self,
        heap_index: usize,
        range: Range<u64>,
        first: AliasedResourceState,
        last: AliasedResourceState,
        execution_index: usize,
    ) {
        if range.is_empty() {
            return;
        }
        if self.heaps.len() <= heap_index {
            self.heaps.resize_with(heap_index + 1, Vec::new);
        }

        let regions = std::mem::take(&mut self.heaps[heap_index]);
        let mut kept = Vec::with_capacity(regions.len() + 2);
        let mut overlapped: Vec<(AliasedResourceState, Range<u64>)> = Vec::new();

        for region in regions {
            if region.range.end <= range.start || range.end <= region.range.start {
                kept.push(region);
                continue;
            }

            let intersection =
                region.range.start.max(range.start)..region.range.end.min(range.end);

            match overlapped
                .iter_mut()
                .find(|(before, _)| before.resource_id == region.occupant.resource_id)
            {
                Some((_, merged)) => {
                    merged.start = merged.start.min(intersection.start);
                    merged.end = merged.end.max(intersection.end);
                }
                None => overlapped.push((region.occupant, intersection)),
            }

            if region.range.start < range.start {
                kept.push(TrackedRegion {
                    range: region.range.start..range.start,
                    occupant: region.occupant,
                });
            }
            if range.end < region.range.end {
                kept.push(TrackedRegion {
                    range: range.end..region.range.end,
                    occupant: region.occupant,
                });
            }
        }

        kept.push(TrackedRegion {
            range,
            occupant: last,
        });
        kept.sort_by_key(|region| region.range.start);
        self.heaps[heap_index] = kept;

        for (before, overlap) in overlapped {
            if before.is_compatible_with(&first) {
                log::trace!(
                    "Skipping aliasing barrier {} -> {} at scope {}: compatible states",
                    before.resource_id,
                    first.resource_id,
                    execution_index
                );
                continue;
            }

            self.barriers.push(AliasingBarrier {
                execution_index,
                heap_index,
                range: overlap,
                before,
                after: first,
            });
        }
    }

    pub fn barriers(&self) -> &[AliasingBarrier] {
        &self.barriers
    }

    fn take_barriers(&mut self) -> Vec<AliasingBarrier> {
        std::mem::take(&mut self.barriers)
    }
}

#[derive(Debug, Clone, Default)]
pub struct AliasingPlan {
    placements: HashMap<ResourceId, Placement>,
    heaps: Vec<AliasedHeap>,
    barriers: Vec<AliasingBarrier>,
}

impl AliasingPlan {
    pub fn placement(&self, resource_id: ResourceId) -> Option<Placement> {
        self.placements.get(&resource_id).copied()
    }

    pub fn placements(&self) -> &HashMap<ResourceId, Placement> {
        &self.placements
    }

    pub fn heaps(&self) -> &[AliasedHeap] {
        &self.heaps
    }

    /// Barriers in the order they were recorded, which is ascending
    /// execution index.
    pub fn barriers(&self) -> &[AliasingBarrier] {
        &self.barriers
    }

    pub fn barriers_at(&self, execution_index: usize) -> impl Iterator<Item = &AliasingBarrier> {
        self.barriers
            .iter()
            .filter(move |barrier| barrier.execution_index == execution_index)
    }

    pub fn total_size_bytes(&self) -> u64 {
        self.heaps.iter().map(AliasedHeap::size_bytes).sum()
    }
}

/// Plans transient placements for one frame.
///
/// The frame graph keeps one allocator behind its allocation-phase lock and
/// reuses its buffers across frames.
#[derive(Debug, Default)]
pub struct TransientAllocator {
    descriptor: AliasingDescriptor,
    heaps: Vec<AliasedHeap>,
    tracker: AliasingBarrierTracker,
}

impl TransientAllocator {
    pub fn new(descriptor: AliasingDescriptor) -> Self {
        Self {
            descriptor,
            heaps: Vec::new(),
            tracker: AliasingBarrierTracker::new(),
        }
    }

    pub fn descriptor(&self) -> &AliasingDescriptor {
        &self.descriptor
    }

    pub fn plan(&mut self, requests: &[TransientAllocationRequest]) -> Result<AliasingPlan> {
        self.heaps.clear();
        self.tracker.reset();

        let capacity = self.descriptor.heap_capacity_bytes;
        let heap_limit = self.descriptor.heap_limit();

        let mut order: Vec<usize> = (0..requests.len()).collect();
        order.sort_by_key(|&index| {
            let lifetime = requests[index].lifetime;
            (lifetime.start, lifetime.end, index)
        });

        let mut placements = HashMap::with_capacity(requests.len());

        for index in order {
            let request = &requests[index];
            let out_of_memory = || FrameGraphError::OutOfMemory {
                resource: request.name.clone(),
                size: request.requirements.size,
                capacity,
            };

            if request.requirements.size > capacity {
                return Err(out_of_memory());
            }

            for heap in &mut self.heaps {
                heap.retire(request.lifetime.start);
            }

            let best = self
                .heaps
                .iter()
                .enumerate()
                .filter_map(|(heap_index, heap)| {
                    heap.best_fit(&request.requirements)
                        .map(|(offset, gap_size)| (gap_size, heap_index, offset))
                })
                .min();

            let (heap_index, offset) = match best {
                Some((_, heap_index, offset)) => (heap_index, offset),
                None => {
                    if self.heaps.len() >= heap_limit {
                        return Err(out_of_memory());
                    }
                    self.heaps.push(AliasedHeap::new(capacity));
                    let heap_index = self.heaps.len() - 1;
                    let (offset, _) = self.heaps[heap_index]
                        .best_fit(&request.requirements)
                        .ok_or_else(out_of_memory)?;
                    log::debug!(
                        "Opened transient heap {} ({} bytes) for '{}'",
                        heap_index,
                        capacity,
                        request.name
                    );
                    (heap_index, offset)
                }
            };

            let range = offset..offset + request.requirements.size;
            self.heaps[heap_index].allocate(request.resource_id, range.clone(), request.lifetime);

            self.tracker.add_resource(
                heap_index,
                range,
                AliasedResourceState {
                    resource_id: request.resource_id,
                    kind: request.kind,
                    state: request.first_state,
                },
                AliasedResourceState {
                    resource_id: request.resource_id,
                    kind: request.kind,
                    state: request.last_state,
                },
                request.lifetime.start,
            );

            log::trace!(
                "Placed '{}' at heap {} offset {} ({} bytes, scopes {}..={})",
                request.name,
                heap_index,
                offset,
                request.requirements.size,
                request.lifetime.start,
                request.lifetime.end
            );

            placements.insert(
                request.resource_id,
                Placement {
                    heap_index,
                    offset,
                    size: request.requirements.size,
                },
            );
        }

        Ok(AliasingPlan {
            placements,
            heaps: self.heaps.clone(),
            barriers: self.tracker.take_barriers(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::types::{AttachmentAccess, AttachmentUsage};
    use rand::{Rng, SeedableRng, rngs::StdRng};

    fn request(name: &str, size: u64, start: usize, end: usize) -> TransientAllocationRequest {
        TransientAllocationRequest {
            resource_id: ResourceId::from_name(name),
            name: name.to_string(),
            kind: ResourceKind::Image,
            requirements: MemoryRequirements { size, alignment: 1 },
            lifetime: Lifetime::new(start, end),
            first_state: ResourceState::new(AttachmentUsage::RenderTarget, AttachmentAccess::WRITE),
            last_state: ResourceState::new(AttachmentUsage::ShaderResource, AttachmentAccess::READ),
        }
    }

    fn allocator(capacity: u64, allow_heap_growth: bool) -> TransientAllocator {
        TransientAllocator::new(AliasingDescriptor {
            heap_capacity_bytes: capacity,
            allow_heap_growth,
            max_heap_count: 8,
        })
    }

    #[test]
    fn disjoint_lifetimes_share_offset_with_one_barrier() {
        let mut allocator = allocator(1024, false);
        let plan = allocator
            .plan(&[request("a", 1024, 0, 2), request("b", 1024, 3, 5)])
            .unwrap();

        let a = plan.placement(ResourceId::from_name("a")).unwrap();
        let b = plan.placement(ResourceId::from_name("b")).unwrap();
        assert_eq!((a.heap_index, a.offset), (0, 0));
        assert_eq!((b.heap_index, b.offset), (0, 0));

        assert_eq!(plan.barriers().len(), 1);
        let barrier = &plan.barriers()[0];
        assert_eq!(barrier.execution_index, 3);
        assert_eq!(barrier.range, 0..1024);
        assert_eq!(barrier.before.resource_id, ResourceId::from_name("a"));
        assert_eq!(barrier.after.resource_id, ResourceId::from_name("b"));
    }

    #[test]
    fn oversized_request_fails_without_growth() {
        let mut allocator = allocator(1024, false);
        let error = allocator.plan(&[request("huge", 2048, 0, 0)]).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::OutOfMemory);
    }

    #[test]
    fn oversized_request_fails_even_with_growth() {
        let mut allocator = allocator(1024, true);
        assert!(allocator.plan(&[request("huge", 1025, 0, 0)]).is_err());
    }

    #[test]
    fn overlapping_resources_open_a_new_heap_when_growth_allowed() {
        let mut grow = allocator(1024, true);
        let plan = grow
            .plan(&[request("a", 1024, 0, 3), request("b", 1024, 1, 2)])
            .unwrap();
        assert_eq!(plan.heaps().len(), 2);
        assert_eq!(plan.placement(ResourceId::from_name("b")).unwrap().heap_index, 1);
        assert!(plan.barriers().is_empty());

        let mut fixed = allocator(1024, false);
        let error = fixed
            .plan(&[request("a", 1024, 0, 3), request("b", 1024, 1, 2)])
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::OutOfMemory);
    }

    #[test]
    fn freed_neighbours_coalesce() {
        let mut allocator = allocator(512, false);
        let plan = allocator
            .plan(&[
                request("a", 256, 0, 0),
                request("b", 256, 0, 0),
                request("c", 512, 1, 1),
            ])
            .unwrap();
        assert_eq!(plan.placement(ResourceId::from_name("c")).unwrap().offset, 0);
        assert_eq!(plan.heaps()[0].size_bytes(), 512);
        assert_eq!(plan.barriers().len(), 2);
    }

    #[test]
    fn smallest_fitting_gap_wins() {
        let mut allocator = allocator(1000, false);
        let plan = allocator
            .plan(&[
                request("big", 600, 0, 0),
                request("small", 200, 0, 0),
                request("keep", 100, 0, 5),
                request("late", 100, 1, 1),
            ])
            .unwrap();
        // big [0,600), small [600,800), keep [800,900); at scope 1 the gaps are
        // [0,800) and [900,1000), the latter being the smaller fit.
        assert_eq!(plan.placement(ResourceId::from_name("late")).unwrap().offset, 900);
    }

    #[test]
    fn alignment_is_respected() {
        let mut allocator = allocator(4096, false);
        let mut aligned = request("aligned", 256, 0, 1);
        aligned.requirements.alignment = 1024;
        let plan = allocator
            .plan(&[request("odd", 100, 0, 1), aligned])
            .unwrap();
        assert_eq!(
            plan.placement(ResourceId::from_name("aligned")).unwrap().offset % 1024,
            0
        );
    }

    #[test]
    fn compatible_read_only_states_skip_the_barrier() {
        let mut allocator = allocator(1024, false);
        let read = ResourceState::new(AttachmentUsage::ShaderResource, AttachmentAccess::READ);
        let mut a = request("a", 1024, 0, 0);
        a.first_state = read;
        a.last_state = read;
        let mut b = request("b", 1024, 1, 1);
        b.first_state = read;
        b.last_state = read;

        let plan = allocator.plan(&[a, b]).unwrap();
        assert!(plan.barriers().is_empty());
    }

    #[test]
    fn zero_sized_resources_never_produce_barriers() {
        let state = |name: &str| AliasedResourceState {
            resource_id: ResourceId::from_name(name),
            kind: ResourceKind::Buffer,
            state: ResourceState::new(AttachmentUsage::ShaderResource, AttachmentAccess::WRITE),
        };

        let mut tracker = AliasingBarrierTracker::new();
        tracker.add_resource(0, 0..512, state("a"), state("a"), 0);
        tracker.add_resource(0, 256..256, state("empty"), state("empty"), 1);
        assert!(tracker.barriers().is_empty());

        tracker.add_resource(0, 0..512, state("b"), state("b"), 2);
        assert_eq!(tracker.barriers().len(), 1);
        assert_eq!(tracker.barriers()[0].before.resource_id, ResourceId::from_name("a"));

        let mut allocator = allocator(1024, false);
        let plan = allocator
            .plan(&[request("a", 512, 0, 0), request("empty", 0, 1, 1)])
            .unwrap();
        assert_eq!(plan.placement(ResourceId::from_name("empty")).unwrap().size, 0);
        assert!(plan.barriers().is_empty());
        assert!(plan.heaps()[0].free_ranges().iter().all(|gap| !gap.is_empty()));
    }

    #[test]
    fn planning_is_deterministic() {
        let requests: Vec<_> = (0..16)
            .map(|index| request(&format!("r{index}"), 64 * (index as u64 % 5 + 1), index / 3, index / 3 + index % 4))
            .collect();

        let mut allocator = allocator(4096, true);
        let first = allocator.plan(&requests).unwrap();
        let second = allocator.plan(&requests).unwrap();
        assert_eq!(first.placements(), second.placements());
        assert_eq!(first.barriers(), second.barriers());
    }

    #[test]
    fn overlapping_lifetimes_never_share_bytes() {
        let mut rng = StdRng::seed_from_u64(0x5eed);

        for _ in 0..200 {
            let count = rng.gen_range(1..40);
            let requests: Vec<_> = (0..count)
                .map(|index| {
                    let start = rng.gen_range(0..20);
                    let end = start + rng.gen_range(0..6);
                    let mut request = request(&format!("r{index}"), rng.gen_range(1..=512), start, end);
                    request.requirements.alignment = [1, 16, 256][rng.gen_range(0..3)];
                    request
                })
                .collect();

            let mut allocator = allocator(1024, true);
            allocator.descriptor.max_heap_count = 64;
            let plan = allocator.plan(&requests).unwrap();

            for (index, a) in requests.iter().enumerate() {
                let placement_a = plan.placement(a.resource_id).unwrap();
                assert_eq!(placement_a.offset % a.requirements.alignment, 0);
                assert!(placement_a.range().end <= 1024);

                for b in &requests[index + 1..] {
                    let placement_b = plan.placement(b.resource_id).unwrap();
                    if placement_a.heap_index != placement_b.heap_index
                        || !a.lifetime.overlaps(&b.lifetime)
                    {
                        continue;
                    }
                    let disjoint = placement_a.range().end <= placement_b.offset
                        || placement_b.range().end <= placement_a.offset;
                    assert!(disjoint, "{} and {} overlap", a.name, b.name);
                }
            }
        }
    }
}
