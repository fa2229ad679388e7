//! Host-recorded command lists.
//!
//! The pipeliner records each queue's work as a list of [`Command`]s and hands
//! it to the backend in a [`Submission`]. Backends translate the list into
//! native command buffers (Vulkan) or interpret it directly (dummy).

use crate::backend::{BufferId, FenceId, ImageId, SemaphoreId};
use crate::types::{DrawCommand, Region, RenderPushConstant};

/// One image region copied into a buffer, rows tightly packed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageCopy {
    pub region: Region,
    pub buffer_offset: u64,
}

/// A single recorded command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Copy bytes between buffers.
    CopyBuffer {
        src: BufferId,
        src_offset: u64,
        dst: BufferId,
        dst_offset: u64,
        size: u64,
    },
    /// Bind the view, material and light storage buffers for later draws.
    BindResources {
        views: BufferId,
        materials: BufferId,
        lights: BufferId,
        light_count: u32,
    },
    /// Clear a whole image to `color`.
    ClearImage { image: ImageId, color: [f32; 4] },
    /// Start rendering into `region` of `image`.
    BeginView { image: ImageId, region: Region },
    /// Set the push constant for subsequent draws.
    PushConstants(RenderPushConstant),
    /// Draw with the bound resources and current push constant.
    Draw(DrawCommand),
    /// Finish rendering the current view.
    EndView,
    /// Make rendered contents of `image` available to copies.
    PrepareReadback { image: ImageId },
    /// Run the bound compute pipeline.
    Dispatch { x: u32, y: u32, z: u32 },
    /// Copy image regions into a buffer.
    CopyImageToBuffer {
        image: ImageId,
        buffer: BufferId,
        regions: Vec<ImageCopy>,
    },
}

/// A timeline semaphore and the value to wait for or signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SemaphoreOp {
    pub semaphore: SemaphoreId,
    pub value: u64,
}

/// Work for one queue: commands plus synchronization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Submission {
    pub label: String,
    pub commands: Vec<Command>,
    pub wait: Vec<SemaphoreOp>,
    pub signal: Vec<SemaphoreOp>,
    pub fence: Option<FenceId>,
}

impl Submission {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Default::default()
        }
    }

    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    /// Wait on the device until `semaphore` reaches `value`.
    pub fn wait_for(mut self, semaphore: SemaphoreId, value: u64) -> Self {
        self.wait.push(SemaphoreOp { semaphore, value });
        self
    }

    /// Set `semaphore` to `value` when the work completes.
    pub fn signal(mut self, semaphore: SemaphoreId, value: u64) -> Self {
        self.signal.push(SemaphoreOp { semaphore, value });
        self
    }

    /// Signal `fence` when the work completes.
    pub fn with_fence(mut self, fence: FenceId) -> Self {
        self.fence = Some(fence);
        self
    }

    /// Number of draw commands in the list.
    pub fn draw_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, Command::Draw(_)))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submission_builder() {
        let sem = SemaphoreId::new(1);
        let fence = FenceId::new(2);
        let mut submission = Submission::new("graphics")
            .wait_for(sem, 3)
            .signal(sem, 4)
            .with_fence(fence);
        submission.push(Command::Draw(DrawCommand::new(3, 0)));
        submission.push(Command::EndView);

        assert_eq!(submission.label, "graphics");
        assert_eq!(submission.wait, vec![SemaphoreOp { semaphore: sem, value: 3 }]);
        assert_eq!(submission.signal[0].value, 4);
        assert_eq!(submission.fence, Some(fence));
        assert_eq!(submission.draw_count(), 1);
    }
}
