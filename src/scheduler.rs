// The frame scheduler: a K-buffered fence ring serialising CPU recording
// and GPU execution.
//
// Grounded on the teacher's timeline-semaphore discipline in `Device`
// (wait_for_latest_timeline / cbuf_submit_async / schedule_drop_at_point)
// generalized from one fence to a ring of K frame slots, per §4.6.
//
// Austin Shafer - 2024

use crate::deletion_queue::{DeletionQueue, Droppable};
use crate::device_ops::DeviceOps;
use crate::resources::ResourceState;
use crate::state_tracker::ResourceKey;
use ash::vk;
use std::collections::HashMap;
use std::sync::Arc;
use utils::log;

/// Maintains K frame records and a single monotonically-increasing
/// timeline semaphore on the graphics queue.
pub struct FrameScheduler<D: DeviceOps> {
    device: Arc<D>,
    k: u32,
    cur_frame: u32,
    /// The timeline value each ring slot's most recent `end_frame` call
    /// signalled. Zero means the slot has never been used.
    frame_fence_values: Vec<u64>,
    /// Monotonic counter; the *next* call to `end_frame` signals
    /// `fence_counter + 1`.
    fence_counter: u64,
    /// Shared deletion queue. Items are scheduled against
    /// `fence_counter + 1` at the point they're queued, which is exactly
    /// the value the frame currently being recorded will eventually
    /// signal.
    deletion_queue: DeletionQueue,
    pending_command_lists: Vec<vk::CommandBuffer>,
    /// The state every resource touched so far *this frame* was last left
    /// in by the list that most recently touched it. Seeded into the next
    /// list opened this frame (§5: "the state tracker's final-states output
    /// of list N is threaded into the initial-states input of list N+1 for
    /// the same frame, via the scheduler"). Cleared at `begin_frame`.
    carried_states: HashMap<ResourceKey, ResourceState>,
}

impl<D: DeviceOps> FrameScheduler<D> {
    pub fn new(device: Arc<D>, k: u32) -> Self {
        Self {
            device,
            k,
            cur_frame: 0,
            frame_fence_values: vec![0; k as usize],
            fence_counter: 0,
            deletion_queue: DeletionQueue::new(),
            pending_command_lists: Vec::new(),
            carried_states: HashMap::new(),
        }
    }

    /// States carried forward from the last list submitted this frame that
    /// touched each resource - read by the next list opened this frame to
    /// seed its tracker's `initial_states`.
    pub fn carried_states(&self) -> &HashMap<ResourceKey, ResourceState> {
        &self.carried_states
    }

    /// Record list N's final states as the initial states for whichever
    /// list N+1 (in this same frame) next touches the same resources.
    pub fn absorb_final_states(&mut self, states: &HashMap<ResourceKey, ResourceState>) {
        for (&key, &state) in states {
            self.carried_states.insert(key, state);
        }
    }

    pub fn k(&self) -> u32 {
        self.k
    }

    pub fn cur_frame_index(&self) -> u32 {
        self.cur_frame
    }

    /// The timeline value the frame currently being recorded will signal
    /// once `end_frame` is called. `schedule_destroy`/staging-buffer
    /// release use this to file work against the right point.
    pub fn current_target_fence_value(&self) -> u64 {
        self.fence_counter + 1
    }

    pub fn schedule_drop(&mut self, item: Box<dyn Droppable + Send + Sync>) {
        let target = self.current_target_fence_value();
        self.deletion_queue.schedule_drop_at_point(item, target);
    }

    /// §4.6 `begin_frame`.
    pub fn begin_frame(&mut self) {
        self.cur_frame = (self.cur_frame + 1) % self.k;

        let awaited = self.frame_fence_values[self.cur_frame as usize];
        if awaited != 0 {
            self.device.wait_timeline_value(awaited);
            // Everything scheduled against this (now-retired) fence value,
            // and everything scheduled against earlier ones, is safe to
            // release.
            self.deletion_queue.drop_all_at_point(awaited);
        }

        self.pending_command_lists.clear();
    }

    /// §4.6 `submit`: queue onto the current frame's command-list batch.
    pub fn submit(&mut self, cmd: vk::CommandBuffer) {
        self.pending_command_lists.push(cmd);
    }

    /// §4.6 `end_frame`: flush the batch, signal a new fence value, present.
    pub fn end_frame(&mut self) {
        self.fence_counter += 1;
        let signal_value = self.fence_counter;

        self.device.submit(&self.pending_command_lists, signal_value);
        self.frame_fence_values[self.cur_frame as usize] = signal_value;
        self.pending_command_lists.clear();

        self.device.present();
    }

    /// Diagnostic path used when the device reports a fault. There is no
    /// recovery - the scheduler logs what it has and the caller is
    /// expected to treat this as fatal (§7, DeviceLost).
    pub fn report_device_lost(&self) {
        log::error!(
            "device lost at fence_counter={} (frame slot {})",
            self.fence_counter,
            self.cur_frame
        );
    }
}
