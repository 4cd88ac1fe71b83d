/// Timeline based deletion queue
///
/// Austin Shafer - 2024
use std::fmt;

/// Something that can be released once it is known the GPU is done with it.
///
/// This plays the role a `Box<dyn Drop>` release callback plays elsewhere in
/// this crate's ancestry: the deletion queue doesn't know or care what kind
/// of resource it's holding, only that `release` must run after the fence
/// value it was scheduled against has signalled.
pub trait Droppable {
    fn release(self: Box<Self>);
}

impl<F: FnOnce()> Droppable for F {
    fn release(self: Box<Self>) {
        (*self)()
    }
}

/// A queue of items to be dropped for a particular timeline point.
struct DQTimelinePointQueue {
    pq_sync_point: u64,
    pq_items: Vec<Box<dyn Droppable + Send + Sync>>,
}

/// A timeline point based deletion queue for the frame scheduler.
///
/// This schedules items to be dropped when a certain timeline point is hit.
/// This timeline point refers to the graphics queue's timeline semaphore
/// value, the same value the frame scheduler signals at the end of each
/// frame (see scheduler.rs). It is the direct generalisation of the
/// resource-destruction half of invariant I1/I2: an item scheduled against
/// frame F's fence value is not released until F has retired.
pub struct DeletionQueue {
    /// The last timeline point that we have already seen. If new items are
    /// not newer than this point then they are dropped immediately instead
    /// of being added to any queue.
    dq_last_signaled: u64,
    /// A queue per timeline point.
    dq_point_queues: Vec<DQTimelinePointQueue>,
}

impl fmt::Debug for DeletionQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeletionQueue")
            .field("dq_last_signaled", &self.dq_last_signaled)
            .field("pending_points", &self.dq_point_queues.len())
            .finish()
    }
}

impl DeletionQueue {
    /// Creates an empty deletion queue.
    pub fn new() -> Self {
        Self {
            dq_last_signaled: 0,
            dq_point_queues: Vec::new(),
        }
    }

    /// Schedule the item to be dropped once the specified timeline point
    /// has passed.
    ///
    /// This does not drop the item immediately, unless the timeline point
    /// is already known to be signaled.
    pub fn schedule_drop_at_point(&mut self, item: Box<dyn Droppable + Send + Sync>, sync_point: u64) {
        if sync_point <= self.dq_last_signaled {
            item.release();
            return;
        }

        if let Some(point_queue) = self
            .dq_point_queues
            .iter_mut()
            .find(|pq| pq.pq_sync_point == sync_point)
        {
            point_queue.pq_items.push(item);
            return;
        }

        self.dq_point_queues.push(DQTimelinePointQueue {
            pq_sync_point: sync_point,
            pq_items: vec![item],
        });
    }

    /// Release all pending items for a timeline point.
    ///
    /// This clears all deletion queues for this sync point, including sync
    /// points preceeding this one, invoking `release` on every item in
    /// submission order.
    pub fn drop_all_at_point(&mut self, sync_point: u64) {
        self.dq_last_signaled = sync_point;

        let mut i = 0;
        while i < self.dq_point_queues.len() {
            if self.dq_point_queues[i].pq_sync_point <= sync_point {
                let queue = self.dq_point_queues.remove(i);
                for item in queue.pq_items {
                    item.release();
                }
            } else {
                i += 1;
            }
        }
    }

    /// How many sync points still have pending work. Test-only
    /// introspection; the backend never needs this.
    #[cfg(test)]
    pub fn pending_points(&self) -> usize {
        self.dq_point_queues.len()
    }
}

impl Default for DeletionQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn item_released_only_once_point_signals() {
        let released = Arc::new(AtomicUsize::new(0));
        let mut queue = DeletionQueue::new();

        let flag = released.clone();
        queue.schedule_drop_at_point(Box::new(move || { flag.fetch_add(1, Ordering::SeqCst); }), 5);
        assert_eq!(released.load(Ordering::SeqCst), 0);

        queue.drop_all_at_point(4);
        assert_eq!(released.load(Ordering::SeqCst), 0);

        queue.drop_all_at_point(5);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn item_scheduled_for_already_passed_point_releases_immediately() {
        let released = Arc::new(AtomicUsize::new(0));
        let mut queue = DeletionQueue::new();
        queue.drop_all_at_point(10);

        let flag = released.clone();
        queue.schedule_drop_at_point(Box::new(move || { flag.fetch_add(1, Ordering::SeqCst); }), 3);
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert_eq!(queue.pending_points(), 0);
    }
}
