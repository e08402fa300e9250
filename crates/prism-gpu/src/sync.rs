//! Per-frame synchronization primitives.

use crate::error::{GpuError, Result};
use ash::vk;

/// Upper bound on any single fence wait. Exceeding it is treated as a lost
/// device rather than blocking the frame loop forever.
pub const FENCE_WAIT_TIMEOUT_NS: u64 = 4_000_000_000;

/// Create a semaphore.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_semaphore(device: &ash::Device) -> Result<vk::Semaphore> {
    let create_info = vk::SemaphoreCreateInfo::default();
    let semaphore = device.create_semaphore(&create_info, None)?;
    Ok(semaphore)
}

/// Create a fence.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_fence(device: &ash::Device, signaled: bool) -> Result<vk::Fence> {
    let flags = if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    };

    let create_info = vk::FenceCreateInfo::default().flags(flags);
    let fence = device.create_fence(&create_info, None)?;
    Ok(fence)
}

/// Wait for a fence with the bounded timeout.
///
/// # Safety
/// The device and fence must be valid.
pub unsafe fn wait_for_fence(device: &ash::Device, fence: vk::Fence) -> Result<()> {
    match device.wait_for_fences(&[fence], true, FENCE_WAIT_TIMEOUT_NS) {
        Ok(()) => Ok(()),
        Err(vk::Result::TIMEOUT) => Err(GpuError::DeviceLost(
            "frame fence not signaled within timeout".to_string(),
        )),
        Err(e) => Err(GpuError::from(e)),
    }
}

/// Synchronization owned by one frame slot.
pub struct FrameSync {
    /// Signaled when rendering for this slot is complete
    pub render_complete: vk::Semaphore,
    /// Signaled by queue submission, waited on before slot reuse
    pub command_buffer_executed: vk::Fence,
}

impl FrameSync {
    /// Create frame synchronization resources.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: &ash::Device) -> Result<Self> {
        Ok(Self {
            render_complete: create_semaphore(device)?,
            command_buffer_executed: create_fence(device, true)?,
        })
    }

    /// Block until this slot's previous submission completed.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn wait(&self, device: &ash::Device) -> Result<()> {
        wait_for_fence(device, self.command_buffer_executed)
    }

    /// Reset the fence before resubmitting this slot.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn reset(&self, device: &ash::Device) -> Result<()> {
        device.reset_fences(&[self.command_buffer_executed])?;
        Ok(())
    }

    /// Destroy synchronization resources.
    ///
    /// # Safety
    /// The device must be valid and resources must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_semaphore(self.render_complete, None);
        device.destroy_fence(self.command_buffer_executed, None);
    }
}

/// Rotates frame slots for the frames-in-flight window.
///
/// The image-acquired semaphore is shared across slots: acquisition happens
/// before the frame slot is known to be free.
pub struct FrameSyncManager {
    frame_syncs: Vec<FrameSync>,
    pub image_acquired: vk::Semaphore,
    current_frame: usize,
}

impl FrameSyncManager {
    /// Create a sync manager for the given number of frames in flight.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: &ash::Device, frames_in_flight: usize) -> Result<Self> {
        let mut frame_syncs = Vec::with_capacity(frames_in_flight);
        for _ in 0..frames_in_flight {
            frame_syncs.push(FrameSync::new(device)?);
        }

        Ok(Self {
            frame_syncs,
            image_acquired: create_semaphore(device)?,
            current_frame: 0,
        })
    }

    /// Get the current frame's sync resources.
    pub fn current(&self) -> &FrameSync {
        &self.frame_syncs[self.current_frame]
    }

    /// Advance to the next frame slot.
    pub fn advance(&mut self) {
        self.current_frame = (self.current_frame + 1) % self.frame_syncs.len();
    }

    /// Get the current frame slot index.
    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    /// Number of frame slots.
    pub fn frames_in_flight(&self) -> usize {
        self.frame_syncs.len()
    }

    /// Destroy all resources.
    ///
    /// # Safety
    /// The device must be valid and all resources must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        for sync in &self.frame_syncs {
            sync.destroy(device);
        }
        device.destroy_semaphore(self.image_acquired, None);
    }
}
