//! Deferred resource destruction for multi-frame-in-flight rendering.
//!
//! A destroyed resource may still be referenced by command buffers the GPU
//! has not finished executing. Destruction therefore enqueues a kind-tagged
//! entry stamped with the current absolute frame; the native object and its
//! pool slot are only reclaimed once enough frames have passed that no
//! in-flight submission can still reference it.

use crate::resource::{
    BufferHandle, DescriptorSetHandle, DescriptorSetLayoutHandle, PipelineHandle,
    RenderPassHandle, SamplerHandle, ShaderStateHandle, TextureHandle,
};
use std::collections::VecDeque;

/// A handle tagged with its resource kind, pending destruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredResource {
    Buffer(BufferHandle),
    Texture(TextureHandle),
    Pipeline(PipelineHandle),
    Sampler(SamplerHandle),
    DescriptorSetLayout(DescriptorSetLayoutHandle),
    DescriptorSet(DescriptorSetHandle),
    RenderPass(RenderPassHandle),
    ShaderState(ShaderStateHandle),
}

/// An entry awaiting maturity.
#[derive(Debug, Clone, Copy)]
pub struct PendingDestroy {
    pub resource: DeferredResource,
    /// Absolute frame number when destruction was requested.
    pub frame_queued: u64,
}

/// Queue of deferred destructions, one per device.
pub struct DestructionQueue {
    pending: VecDeque<PendingDestroy>,
    frames_in_flight: usize,
}

impl DestructionQueue {
    /// Create a queue for the given frames-in-flight window.
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            frames_in_flight,
        }
    }

    /// Enqueue a resource for destruction at `frame_number`.
    pub fn queue(&mut self, resource: DeferredResource, frame_number: u64) {
        self.pending.push_back(PendingDestroy {
            resource,
            frame_queued: frame_number,
        });
    }

    /// Pop every entry that is safe to destroy at `current_frame_number`.
    ///
    /// An entry matures once more than `frames_in_flight` frames have
    /// passed since it was queued. Queue order is FIFO and frame numbers
    /// are non-decreasing, so only the front can mature.
    pub fn drain_ready(&mut self, current_frame_number: u64) -> Vec<DeferredResource> {
        let cutoff = current_frame_number.saturating_sub(self.frames_in_flight as u64);

        let mut ready = Vec::new();
        while matches!(self.pending.front(), Some(p) if p.frame_queued < cutoff) {
            let pending = self.pending.pop_front().expect("front just matched");
            ready.push(pending.resource);
        }

        ready
    }

    /// Drain everything regardless of maturity.
    ///
    /// Call during shutdown after `device_wait_idle()`.
    pub fn drain_all(&mut self) -> Vec<DeferredResource> {
        self.pending.drain(..).map(|p| p.resource).collect()
    }

    /// Number of pending destructions.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Update the frames-in-flight window.
    ///
    /// Call when the swapchain is recreated with a different image count.
    pub fn set_frames_in_flight(&mut self, frames_in_flight: usize) {
        self.frames_in_flight = frames_in_flight;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texture_entry() -> DeferredResource {
        DeferredResource::Texture(TextureHandle::INVALID)
    }

    #[test]
    fn entry_matures_only_after_in_flight_window() {
        let mut queue = DestructionQueue::new(2);

        // Marked at frame 10 with 2 frames in flight.
        queue.queue(texture_entry(), 10);

        // Frames 11 and 12 may still reference the resource.
        assert!(queue.drain_ready(11).is_empty());
        assert!(queue.drain_ready(12).is_empty());

        // Frame 13: both in-flight frames have completed.
        let ready = queue.drain_ready(13);
        assert_eq!(ready.len(), 1);
        assert_eq!(queue.pending_count(), 0);
    }

    #[test]
    fn entries_drain_in_fifo_order() {
        let mut queue = DestructionQueue::new(1);

        let a = DeferredResource::Buffer(BufferHandle::INVALID);
        let b = DeferredResource::Sampler(SamplerHandle::INVALID);
        queue.queue(a, 1);
        queue.queue(b, 2);

        let ready = queue.drain_ready(100);
        assert_eq!(ready, vec![a, b]);
    }

    #[test]
    fn immature_tail_stays_queued() {
        let mut queue = DestructionQueue::new(2);

        queue.queue(texture_entry(), 1);
        queue.queue(texture_entry(), 9);

        let ready = queue.drain_ready(10);
        assert_eq!(ready.len(), 1);
        assert_eq!(queue.pending_count(), 1);
    }

    #[test]
    fn drain_all_ignores_maturity() {
        let mut queue = DestructionQueue::new(3);

        queue.queue(texture_entry(), 5);
        queue.queue(texture_entry(), 5);

        assert_eq!(queue.drain_all().len(), 2);
        assert_eq!(queue.pending_count(), 0);
    }
}
