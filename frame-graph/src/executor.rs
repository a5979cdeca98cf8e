//! Per-queue command recording for a compiled frame.

use std::ops::Range;

use crate::attachment::AttachmentDatabase;
use crate::device::{CommandListHandle, Device, HeapHandle};
use crate::error::Result;
use crate::producer::{ExecuteContext, ProducerSlot};
use crate::scope::{CrossQueueWait, Scope, ScopeIndex};
use crate::types::{QueueClass, ScopeId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCommandList {
    pub handle: CommandListHandle,
    pub scope: ScopeIndex,
    pub scope_id: ScopeId,
    pub item_range: Range<u32>,
    /// Only set on the first list of a scope.
    pub waits: Vec<CrossQueueWait>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSubmission {
    pub queue: QueueClass,
    pub command_lists: Vec<RecordedCommandList>,
}

/// Recorded work of one frame, ready for the caller to submit queue by queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameSubmission {
    pub frame_index: u64,
    pub queues: Vec<QueueSubmission>,
}

impl FrameSubmission {
    pub fn queue(&self, queue: QueueClass) -> Option<&QueueSubmission> {
        self.queues.iter().find(|submission| submission.queue == queue)
    }

    pub fn command_list_count(&self) -> usize {
        self.queues
            .iter()
            .map(|submission| submission.command_lists.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.command_list_count() == 0
    }
}

pub(crate) struct FrameExecutor<'a, C> {
    pub device: &'a dyn Device,
    pub scopes: &'a [Scope],
    pub producers: &'a [ProducerSlot<C>],
    pub attachments: &'a AttachmentDatabase,
    pub heaps: &'a [HeapHandle],
    pub configs: &'a C,
    pub items_per_command_list: u32,
    pub frame_index: u64,
}

type QueueRecording = (QueueClass, Vec<RecordedCommandList>, Result<()>);

impl<C: Sync> FrameExecutor<'_, C> {
    /// Records every queue, one worker per non-empty queue when `parallel`.
    /// On failure all acquired lists are discarded and the first error in
    /// queue order is returned.
    pub fn execute(
        &self,
        queue_orders: &[(QueueClass, Vec<ScopeIndex>)],
        parallel: bool,
    ) -> Result<FrameSubmission> {
        let non_empty: Vec<_> = queue_orders
            .iter()
            .filter(|(_, order)| !order.is_empty())
            .collect();

        let recordings: Vec<QueueRecording> = if parallel && non_empty.len() > 1 {
            std::thread::scope(|scope| {
                let workers: Vec<_> = non_empty
                    .iter()
                    .map(|(queue, order)| {
                        scope.spawn(move || {
                            let mut recorded = Vec::new();
                            let result = self.record_queue(*queue, order, &mut recorded);
                            (*queue, recorded, result)
                        })
                    })
                    .collect();

                workers
                    .into_iter()
                    .map(|worker| {
                        worker
                            .join()
                            .unwrap_or_else(|payload| std::panic::resume_unwind(payload))
                    })
                    .collect()
            })
        } else {
            non_empty
                .iter()
                .map(|(queue, order)| {
                    let mut recorded = Vec::new();
                    let result = self.record_queue(*queue, order, &mut recorded);
                    (*queue, recorded, result)
                })
                .collect()
        };

        let mut first_error = None;
        let mut queues = Vec::with_capacity(recordings.len());
        for (queue, command_lists, result) in recordings {
            if let Err(error) = result
                && first_error.is_none()
            {
                first_error = Some(error);
            }
            queues.push(QueueSubmission {
                queue,
                command_lists,
            });
        }

        if let Some(error) = first_error {
            for submission in &queues {
                for list in &submission.command_lists {
                    self.device.discard_command_list(list.handle);
                }
            }
            return Err(error);
        }

        Ok(FrameSubmission {
            frame_index: self.frame_index,
            queues,
        })
    }

    fn record_queue(
        &self,
        queue: QueueClass,
        order: &[ScopeIndex],
        recorded: &mut Vec<RecordedCommandList>,
    ) -> Result<()> {
        for &index in order {
            let scope = &self.scopes[index.0];
            let producer = &self.producers[scope.producer().0];

            for (list_index, item_range) in scope
                .item_ranges(self.items_per_command_list)
                .into_iter()
                .enumerate()
            {
                let command_list = self.device.acquire_command_list(queue)?;
                recorded.push(RecordedCommandList {
                    handle: command_list,
                    scope: index,
                    scope_id: scope.id().clone(),
                    item_range: item_range.clone(),
                    waits: if list_index == 0 {
                        scope.cross_queue_waits().to_vec()
                    } else {
                        Vec::new()
                    },
                });

                if list_index == 0 {
                    self.emit_barriers(scope, command_list);
                }

                let context = ExecuteContext {
                    configs: self.configs,
                    scope,
                    attachments: self.attachments,
                    device: self.device,
                    command_list,
                    command_list_index: list_index,
                    item_range,
                    frame_index: self.frame_index,
                };
                producer.producer.build_command_list(&context)?;
            }

            log::trace!("Recorded scope '{}' on {:?}", scope.id(), queue);
        }

        Ok(())
    }

    fn emit_barriers(&self, scope: &Scope, command_list: CommandListHandle) {
        for barrier in scope.aliasing_barriers() {
            if let Some(&heap) = self.heaps.get(barrier.heap_index) {
                self.device
                    .emit_aliasing_barrier(command_list, heap, barrier);
            }
        }

        for transition in scope.transitions() {
            if let Some(resource) = self
                .attachments
                .find(transition.resource_id)
                .and_then(|attachment| attachment.resource())
            {
                self.device
                    .emit_transition_barrier(command_list, resource, transition);
            }
        }
    }
}
