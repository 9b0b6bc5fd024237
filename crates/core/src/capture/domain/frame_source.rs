use std::time::Duration;

use thiserror::Error;

use crate::shared::frame::Frame;

#[derive(Error, Debug)]
pub enum FrameSourceError {
    /// The source has no more frames and will never produce one again.
    #[error("frame source closed")]
    Closed,
    #[error("capture failed: {0}")]
    Capture(String),
}

/// Supplies frames to the detection loop (camera device, uploaded image, ...).
///
/// Called once per tick with the session-relative capture time, which the
/// source stamps onto the frame. `Ok(None)` means nothing was available this
/// tick; the loop simply waits for the next one.
pub trait FrameSource: Send {
    fn capture(&mut self, now: Duration) -> Result<Option<Frame>, FrameSourceError>;
}
