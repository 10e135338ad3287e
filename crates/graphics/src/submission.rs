use crate::{
    command::CommandList,
    error::Result,
    platform::{RawCommandAllocator, RawFence, RawQueue},
    surface::Swapchain,
    upload::Staging,
    Device,
};

/// A value on the context's fence timeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FenceValue(pub u64);

/// One queue, one allocator, one command list and one fence.
///
/// The list is created in the recording state so that work recorded during
/// startup (texture uploads) goes out with the first frame. After that the
/// cycle is `begin_frame`, record, `submit`, `present`, `signal_and_wait`.
/// The wait is unconditional, so at most one frame of GPU work is ever
/// outstanding.
pub struct CommandContext {
    queue: RawQueue,
    allocator: RawCommandAllocator,
    list: CommandList,
    fence: RawFence,
    last_signaled: u64,
    recording: bool,
    // Staging read by the open list. Moved to `retired` on submit.
    unsubmitted: Vec<Staging>,
    retired: Vec<Staging>,
}

impl CommandContext {
    pub fn new(device: &Device) -> Result<Self> {
        let queue = device.raw.create_queue()?;
        let allocator = device.raw.create_command_allocator()?;
        let list = device.raw.create_command_list(&allocator)?;
        let fence = device.raw.create_fence(0)?;

        Ok(Self {
            queue,
            allocator,
            list: CommandList::new(list),
            fence,
            last_signaled: 0,
            recording: true,
            unsubmitted: Vec::new(),
            retired: Vec::new(),
        })
    }

    /// The list to record into.
    ///
    /// # Panics
    ///
    /// If the list has been submitted and not yet reopened with
    /// [`begin_frame`](Self::begin_frame).
    pub fn command_list(&mut self) -> &mut CommandList {
        assert!(self.recording, "the command list is closed");
        &mut self.list
    }

    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Reopens the allocator and list for recording.
    ///
    /// Errors from either reset mean GPU work that was thought to be complete
    /// is still running, and are fatal to the caller.
    pub fn begin_frame(&mut self) -> Result<()> {
        if self.recording {
            return Ok(());
        }

        assert!(
            self.completed_value() >= self.last_signaled(),
            "command allocator reused before fence value {} completed",
            self.last_signaled
        );

        self.allocator.reset()?;
        self.list.reset(&self.allocator)?;
        self.recording = true;
        Ok(())
    }

    /// Closes the list and executes it on the queue.
    pub fn submit(&mut self) -> Result<()> {
        assert!(self.recording, "submitted a closed command list");

        self.list.close()?;
        self.recording = false;
        self.queue.execute(self.list.raw())?;

        let ready_at = self.pending_value();
        for mut staging in self.unsubmitted.drain(..) {
            staging.stamp(ready_at);
            self.retired.push(staging);
        }
        Ok(())
    }

    /// Presents the swapchain's current buffer with a sync interval of 1.
    pub fn present(&self, swapchain: &Swapchain) -> Result<()> {
        swapchain.present(1)
    }

    /// Signals the next fence value and blocks until the GPU reaches it, then
    /// releases retired staging buffers.
    pub fn signal_and_wait(&mut self) -> Result<FenceValue> {
        let value = self.last_signaled + 1;
        self.queue.signal(&self.fence, value)?;
        self.last_signaled = value;

        if self.fence.completed_value() < value {
            self.fence.wait(value)?;
        }

        self.release_retired();
        Ok(FenceValue(value))
    }

    /// Keeps `staging` alive until the fence passes the value it waits on.
    ///
    /// While the list is open the copies reading from it have not been
    /// executed, so it is held until [`submit`](Self::submit) and released
    /// only by a wait that follows.
    pub fn retire(&mut self, staging: Staging) {
        if self.recording {
            self.unsubmitted.push(staging);
        } else {
            self.retired.push(staging);
        }
    }

    /// The number of staging buffers still waiting on the GPU.
    #[must_use]
    pub fn retired_count(&self) -> usize {
        self.unsubmitted.len() + self.retired.len()
    }

    #[must_use]
    pub fn completed_value(&self) -> FenceValue {
        FenceValue(self.fence.completed_value())
    }

    #[must_use]
    pub fn last_signaled(&self) -> FenceValue {
        FenceValue(self.last_signaled)
    }

    /// The value the next [`signal_and_wait`](Self::signal_and_wait) will
    /// signal. Work recorded now completes at this value.
    #[must_use]
    pub fn pending_value(&self) -> FenceValue {
        FenceValue(self.last_signaled + 1)
    }

    /// Signals and waits without submitting, so no GPU work outlives the
    /// caller. Work still recorded in an open list is not executed, and its
    /// staging stays retired.
    pub fn flush(&mut self) -> Result<()> {
        self.signal_and_wait().map(|_| ())
    }

    pub(crate) fn queue(&self) -> &RawQueue {
        &self.queue
    }

    fn release_retired(&mut self) {
        let completed = self.completed_value();
        let before = self.retired.len();
        self.retired.retain(|staging| staging.ready_at() > completed);

        let released = before - self.retired.len();
        if released > 0 {
            log::debug!("released {released} staging buffers at fence {}", completed.0);
        }
    }
}

impl Drop for CommandContext {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            log::error!("failed to drain the queue on shutdown: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GraphicsConfig;

    fn context() -> (Device, CommandContext) {
        let device = Device::new(&GraphicsConfig::default()).unwrap();
        let context = CommandContext::new(&device).unwrap();
        (device, context)
    }

    #[test]
    fn fence_progress_is_monotonic() {
        let (_device, mut context) = context();
        context.submit().unwrap();

        let mut previous = context.completed_value();
        for _ in 0..2 {
            let signaled_before = context.pending_value();
            let value = context.signal_and_wait().unwrap();

            assert_eq!(value, signaled_before);
            assert!(context.completed_value() >= value);
            assert!(context.completed_value() <= context.last_signaled());
            assert!(context.completed_value() > previous);
            previous = context.completed_value();

            context.begin_frame().unwrap();
            context.submit().unwrap();
        }
    }

    #[test]
    fn begin_frame_is_idempotent_while_recording() {
        let (_device, mut context) = context();
        assert!(context.is_recording());
        context.begin_frame().unwrap();
        assert!(context.is_recording());
    }

    #[test]
    fn full_cycle_reuses_the_allocator() {
        let (_device, mut context) = context();

        for frame in 1..=3 {
            context.begin_frame().unwrap();
            context.submit().unwrap();
            assert!(!context.is_recording());
            assert_eq!(context.signal_and_wait().unwrap(), FenceValue(frame));
        }
    }

    #[test]
    #[should_panic(expected = "submitted a closed command list")]
    fn submit_twice_panics() {
        let (_device, mut context) = context();
        context.submit().unwrap();
        context.submit().unwrap();
    }
}
