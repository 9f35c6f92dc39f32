// Frame pacing
//
// A fixed ring of in-flight frames, each with its own fence, command buffer
// and semaphore pair. A slot's fence is waited on before its command buffer
// is reset, so the CPU is never more than IN_FLIGHT_FRAMES ahead of the GPU.

use ash::vk;

use super::driver::{GpuDriver, SubmitDesc};
use super::swapchain::SwapchainManager;
use crate::error::{GfxError, GfxResult};

pub const IN_FLIGHT_FRAMES: usize = 2;

/// Per-slot synchronization and recording state.
#[derive(Debug, Clone, Copy)]
pub struct FrameContext {
    pub fence: vk::Fence,
    pub command_buffer: vk::CommandBuffer,
    /// Signalled by the queue submit, waited on by present.
    pub render_completed: vk::Semaphore,
    /// Signalled by acquire, waited on by the queue submit.
    pub present_completed: vk::Semaphore,
}

impl FrameContext {
    fn create<D: GpuDriver + ?Sized>(driver: &D, command_pool: vk::CommandPool) -> GfxResult<Self> {
        // Start signaled so the first wait on each slot returns immediately.
        let mut frame = Self {
            fence: driver.create_fence(true)?,
            command_buffer: vk::CommandBuffer::null(),
            render_completed: vk::Semaphore::null(),
            present_completed: vk::Semaphore::null(),
        };
        let mut build = || -> GfxResult<()> {
            frame.command_buffer = driver.allocate_command_buffer(command_pool)?;
            frame.render_completed = driver.create_semaphore()?;
            frame.present_completed = driver.create_semaphore()?;
            Ok(())
        };
        match build() {
            Ok(()) => Ok(frame),
            Err(e) => {
                frame.destroy(driver, command_pool);
                Err(e)
            }
        }
    }

    fn destroy<D: GpuDriver + ?Sized>(&self, driver: &D, command_pool: vk::CommandPool) {
        if self.present_completed != vk::Semaphore::null() {
            driver.destroy_semaphore(self.present_completed);
        }
        if self.render_completed != vk::Semaphore::null() {
            driver.destroy_semaphore(self.render_completed);
        }
        if self.command_buffer != vk::CommandBuffer::null() {
            driver.free_command_buffer(command_pool, self.command_buffer);
        }
        driver.destroy_fence(self.fence);
    }
}

/// What the caller records into for the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    /// Slot in the in-flight ring.
    pub frame_index: u32,
    /// Acquired swapchain image.
    pub image_index: u32,
    pub command_buffer: vk::CommandBuffer,
    pub suboptimal: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Ready(FrameInfo),
    /// The swapchain was out of date; nothing to record this frame.
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentStatus {
    Presented,
    Suboptimal,
    OutOfDate,
}

pub struct FrameScheduler {
    frames: Vec<FrameContext>,
    frame_index: usize,
    recording: Option<FrameInfo>,
    out_of_date_streak: u32,
    // A failed submit leaves the slot's fence reset and its acquire semaphore
    // signaled; nothing will ever complete either.
    lost: bool,
}

impl FrameScheduler {
    /// A scheduler with no frames; `create` replaces it.
    pub(crate) fn empty() -> Self {
        Self {
            frames: Vec::new(),
            frame_index: 0,
            recording: None,
            out_of_date_streak: 0,
            lost: false,
        }
    }

    pub fn create<D: GpuDriver + ?Sized>(driver: &D, command_pool: vk::CommandPool) -> GfxResult<Self> {
        let mut frames = Vec::with_capacity(IN_FLIGHT_FRAMES);
        for _ in 0..IN_FLIGHT_FRAMES {
            match FrameContext::create(driver, command_pool) {
                Ok(frame) => frames.push(frame),
                Err(e) => {
                    for frame in &frames {
                        frame.destroy(driver, command_pool);
                    }
                    return Err(e);
                }
            }
        }
        log::debug!("Created {} in-flight frame contexts", frames.len());

        Ok(Self {
            frames,
            frame_index: 0,
            recording: None,
            out_of_date_streak: 0,
            lost: false,
        })
    }

    pub fn destroy<D: GpuDriver + ?Sized>(&mut self, driver: &D, command_pool: vk::CommandPool) {
        for frame in self.frames.drain(..) {
            frame.destroy(driver, command_pool);
        }
        self.recording = None;
    }

    /// Wait for the slot's previous use, acquire an image and begin recording.
    pub fn new_frame<D: GpuDriver + ?Sized>(
        &mut self,
        driver: &D,
        swapchain: &mut SwapchainManager,
    ) -> GfxResult<FrameStatus> {
        if self.recording.is_some() {
            return Err(GfxError::InvalidArgument(
                "new_frame called while a frame is still being recorded".into(),
            ));
        }
        if self.lost {
            return Err(GfxError::FrameRingLost);
        }
        let frame = self.current()?;

        driver.wait_fence(frame.fence)?;

        let (image_index, suboptimal) =
            match driver.acquire_next_image(swapchain.handle(), frame.present_completed) {
                Ok(acquired) => acquired,
                Err(GfxError::SwapchainOutOfDate) => {
                    self.out_of_date_streak += 1;
                    log::warn!(
                        "Swapchain out of date at acquire ({} in a row), skipping frame",
                        self.out_of_date_streak
                    );
                    return Ok(FrameStatus::Skipped);
                }
                Err(e) => return Err(e),
            };
        self.out_of_date_streak = 0;
        swapchain.set_current_index(image_index);

        driver.reset_fence(frame.fence)?;
        driver.reset_command_buffer(frame.command_buffer)?;
        driver.begin_command_buffer(frame.command_buffer, false)?;
        let info = FrameInfo {
            frame_index: self.frame_index as u32,
            image_index,
            command_buffer: frame.command_buffer,
            suboptimal,
        };
        self.recording = Some(info);

        log::trace!("Frame {} recording into image {}", self.frame_index, image_index);
        Ok(FrameStatus::Ready(info))
    }

    /// End recording, submit, advance the ring and present.
    pub fn submit<D: GpuDriver + ?Sized>(
        &mut self,
        driver: &D,
        swapchain: &SwapchainManager,
    ) -> GfxResult<PresentStatus> {
        let info = self.recording.take().ok_or(GfxError::NoFrameInProgress)?;
        let frame = self.current()?;

        let submitted = driver.end_command_buffer(frame.command_buffer).and_then(|()| {
            driver.queue_submit(&SubmitDesc {
                command_buffer: frame.command_buffer,
                wait: Some((
                    frame.present_completed,
                    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                )),
                signal: Some(frame.render_completed),
                fence: frame.fence,
            })
        });
        if let Err(e) = submitted {
            log::error!("Frame {} submission failed: {}", self.frame_index, e);
            self.lost = true;
            return Err(e);
        }

        self.frame_index = (self.frame_index + 1) % self.frames.len();

        match driver.queue_present(swapchain.handle(), info.image_index, frame.render_completed) {
            Ok(false) => Ok(PresentStatus::Presented),
            Ok(true) => Ok(PresentStatus::Suboptimal),
            Err(GfxError::SwapchainOutOfDate) => {
                log::debug!("Swapchain out of date at present");
                Ok(PresentStatus::OutOfDate)
            }
            Err(e) => Err(e),
        }
    }

    fn current(&self) -> GfxResult<FrameContext> {
        self.frames
            .get(self.frame_index)
            .copied()
            .ok_or_else(|| GfxError::InvalidArgument("frame ring has been destroyed".into()))
    }

    pub fn frame_index(&self) -> u32 {
        self.frame_index as u32
    }

    pub fn frames(&self) -> &[FrameContext] {
        &self.frames
    }

    /// The frame between `new_frame` and `submit`, if any.
    pub fn current_frame(&self) -> Option<FrameInfo> {
        self.recording
    }

    /// Whether a failed submission has made the ring unusable.
    pub fn is_lost(&self) -> bool {
        self.lost
    }

    /// Consecutive acquires that found the swapchain out of date.
    pub fn out_of_date_streak(&self) -> u32 {
        self.out_of_date_streak
    }

    pub(crate) fn reset_out_of_date_streak(&mut self) {
        self.out_of_date_streak = 0;
    }
}
