use std::time::Duration;

use ndarray::{ArrayView3, ShapeError};

/// A single captured camera frame: contiguous RGB(A) bytes in row-major order,
/// stamped with its capture time relative to the start of the session.
///
/// Frames are not validated on construction. Sources hand over whatever the
/// device produced and the preprocessor decides whether it is usable.
#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    channels: u8,
    captured_at: Duration,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, channels: u8, captured_at: Duration) -> Self {
        Self {
            data,
            width,
            height,
            channels,
            captured_at,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn captured_at(&self) -> Duration {
        self.captured_at
    }

    /// Returns a copy of this frame re-stamped with a new capture time.
    pub fn restamped(&self, captured_at: Duration) -> Self {
        Self {
            captured_at,
            ..self.clone()
        }
    }

    /// Views the buffer as `[height, width, channels]`.
    ///
    /// Fails when the buffer length disagrees with the declared dimensions.
    pub fn as_ndarray(&self) -> Result<ArrayView3<'_, u8>, ShapeError> {
        ArrayView3::from_shape(self.shape(), &self.data)
    }

    fn shape(&self) -> (usize, usize, usize) {
        (
            self.height as usize,
            self.width as usize,
            self.channels as usize,
        )
    }
}
