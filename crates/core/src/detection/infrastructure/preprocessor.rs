use ndarray::Array4;
use thiserror::Error;

use crate::config::pipeline_config::Normalization;
use crate::detection::domain::inference_engine::InputTensor;
use crate::shared::frame::Frame;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PreprocessError {
    #[error("frame has zero size ({width}x{height})")]
    Empty { width: u32, height: u32 },
    #[error("unsupported channel count {0} (expected 3 or 4)")]
    Channels(u8),
    #[error("frame buffer holds {actual} bytes, expected {expected}")]
    BufferLength { expected: usize, actual: usize },
}

/// Converts camera frames into the model's fixed input tensor.
///
/// Center-crops to a square, nearest-neighbour resizes to
/// `input_size × input_size`, drops alpha, and normalizes into an NCHW
/// `[1, 3, S, S]` float tensor.
#[derive(Clone, Debug)]
pub struct Preprocessor {
    input_size: u32,
    normalization: Normalization,
}

impl Preprocessor {
    pub fn new(input_size: u32, normalization: Normalization) -> Self {
        Self {
            input_size: input_size.max(1),
            normalization,
        }
    }

    pub fn input_size(&self) -> u32 {
        self.input_size
    }

    pub fn process(&self, frame: &Frame) -> Result<InputTensor, PreprocessError> {
        validate(frame)?;
        let src = frame
            .as_ndarray()
            .map_err(|_| PreprocessError::BufferLength {
                expected: expected_len(frame),
                actual: frame.data().len(),
            })?;

        let fw = frame.width() as usize;
        let fh = frame.height() as usize;
        let side = fw.min(fh);
        let off_x = (fw - side) / 2;
        let off_y = (fh - side) / 2;

        let size = self.input_size as usize;
        let scale = side as f64 / size as f64;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

        for y in 0..size {
            let src_y = off_y + ((y as f64 * scale) as usize).min(side - 1);
            for x in 0..size {
                let src_x = off_x + ((x as f64 * scale) as usize).min(side - 1);
                for c in 0..3 {
                    tensor[[0, c, y, x]] = self.normalize(src[[src_y, src_x, c]]);
                }
            }
        }

        Ok(tensor)
    }

    fn normalize(&self, value: u8) -> f32 {
        match self.normalization {
            Normalization::SignedUnit => value as f32 / 127.5 - 1.0,
            Normalization::UnitRange => value as f32 / 255.0,
        }
    }
}

fn validate(frame: &Frame) -> Result<(), PreprocessError> {
    if frame.width() == 0 || frame.height() == 0 || frame.data().is_empty() {
        return Err(PreprocessError::Empty {
            width: frame.width(),
            height: frame.height(),
        });
    }
    if !matches!(frame.channels(), 3 | 4) {
        return Err(PreprocessError::Channels(frame.channels()));
    }
    let expected = expected_len(frame);
    if frame.data().len() != expected {
        return Err(PreprocessError::BufferLength {
            expected,
            actual: frame.data().len(),
        });
    }
    Ok(())
}

fn expected_len(frame: &Frame) -> usize {
    frame.width() as usize * frame.height() as usize * frame.channels() as usize
}
