//! Presentation driver.
use crate::{queue::CommandQueue, resource::TextureId};
use std::sync::Arc;
use tracing::{trace, warn};

/// Draws the contents of each frame.
pub trait PresentationDelegate: Send {
    /// Enqueues the rendering of the next frame into `target`.
    ///
    /// Returns `false` to skip presenting this frame.
    fn draw_frame(&mut self, queue: &CommandQueue, target: TextureId) -> bool;
}

/// Presents frames drawn by a delegate on the device's surface.
///
/// The presenter drives the queue; frame pacing is left to the caller, who calls
/// [`tick`](Presenter::tick) once per display refresh.
pub struct Presenter {
    queue: Arc<CommandQueue>,
    delegate: Box<dyn PresentationDelegate>,
    frames_presented: u64,
}

impl Presenter {
    pub fn new(queue: Arc<CommandQueue>, delegate: Box<dyn PresentationDelegate>) -> Presenter {
        Presenter {
            queue,
            delegate,
            frames_presented: 0,
        }
    }

    pub fn queue(&self) -> &Arc<CommandQueue> {
        &self.queue
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    /// Draws and presents one frame. Returns whether a frame was presented.
    pub fn tick(&mut self) -> bool {
        let drawable = match self.queue.device().next_drawable() {
            Some(drawable) => drawable,
            None => {
                warn!("no drawable available");
                return false;
            }
        };
        if !self.delegate.draw_frame(&self.queue, drawable.texture) {
            trace!("frame skipped");
            return false;
        }
        self.queue.enqueue_present(drawable.id);
        self.queue.flush();
        self.frames_presented += 1;
        true
    }
}
