use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capture::domain::frame_source::{FrameSource, FrameSourceError};
use crate::shared::constants::IMAGE_EXTENSIONS;
use crate::shared::frame::Frame;

/// How an [`ImageFileSource`] behaves once every image has been served.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Playback {
    /// Close the source after the last image.
    Once,
    /// Start again from the first image.
    Loop,
    /// Keep serving the last image, like a product left on the counter.
    HoldLast,
}

/// Replays uploaded still images as camera frames, one per tick.
///
/// Images are decoded eagerly with the `image` crate so a corrupt upload
/// fails at construction rather than mid-session.
pub struct ImageFileSource {
    frames: Vec<Frame>,
    position: usize,
    playback: Playback,
}

impl ImageFileSource {
    pub fn open(paths: &[PathBuf], playback: Playback) -> Result<Self, FrameSourceError> {
        let frames = paths
            .iter()
            .map(|p| decode(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_frames(frames, playback))
    }

    /// Opens every image file in `dir`, sorted by file name.
    pub fn open_dir(dir: &Path, playback: Playback) -> Result<Self, FrameSourceError> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| FrameSourceError::Capture(format!("{}: {e}", dir.display())))?;
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_image(path))
            .collect();
        paths.sort();
        if paths.is_empty() {
            return Err(FrameSourceError::Capture(format!(
                "no images found in {}",
                dir.display()
            )));
        }
        Self::open(&paths, playback)
    }

    pub fn from_frames(frames: Vec<Frame>, playback: Playback) -> Self {
        Self {
            frames,
            position: 0,
            playback,
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl FrameSource for ImageFileSource {
    fn capture(&mut self, now: Duration) -> Result<Option<Frame>, FrameSourceError> {
        if self.frames.is_empty() {
            return Err(FrameSourceError::Closed);
        }
        let index = if self.position < self.frames.len() {
            self.position
        } else {
            match self.playback {
                Playback::Once => return Err(FrameSourceError::Closed),
                Playback::Loop => self.position % self.frames.len(),
                Playback::HoldLast => self.frames.len() - 1,
            }
        };
        self.position += 1;
        Ok(Some(self.frames[index].restamped(now)))
    }
}

pub fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

fn decode(path: &Path) -> Result<Frame, FrameSourceError> {
    let img = image::open(path)
        .map_err(|e| FrameSourceError::Capture(format!("{}: {e}", path.display())))?
        .to_rgb8();
    let (width, height) = img.dimensions();
    Ok(Frame::new(img.into_raw(), width, height, 3, Duration::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn solid(value: u8) -> Frame {
        Frame::new(vec![value; 4 * 4 * 3], 4, 4, 3, Duration::ZERO)
    }

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_frames_are_restamped() {
        let mut source = ImageFileSource::from_frames(vec![solid(1)], Playback::Once);
        let frame = source.capture(ms(1500)).unwrap().unwrap();
        assert_eq!(frame.captured_at(), ms(1500));
    }

    #[test]
    fn test_once_closes_after_last() {
        let mut source = ImageFileSource::from_frames(vec![solid(1), solid(2)], Playback::Once);
        assert_eq!(source.capture(ms(0)).unwrap().unwrap().data()[0], 1);
        assert_eq!(source.capture(ms(1)).unwrap().unwrap().data()[0], 2);
        assert!(matches!(
            source.capture(ms(2)),
            Err(FrameSourceError::Closed)
        ));
    }

    #[test]
    fn test_loop_wraps_around() {
        let mut source = ImageFileSource::from_frames(vec![solid(1), solid(2)], Playback::Loop);
        let values: Vec<u8> = (0..5)
            .map(|t| source.capture(ms(t)).unwrap().unwrap().data()[0])
            .collect();
        assert_eq!(values, vec![1, 2, 1, 2, 1]);
    }

    #[test]
    fn test_hold_last_repeats_final_image() {
        let mut source =
            ImageFileSource::from_frames(vec![solid(1), solid(2)], Playback::HoldLast);
        let values: Vec<u8> = (0..4)
            .map(|t| source.capture(ms(t)).unwrap().unwrap().data()[0])
            .collect();
        assert_eq!(values, vec![1, 2, 2, 2]);
    }

    #[test]
    fn test_empty_source_is_closed() {
        let mut source = ImageFileSource::from_frames(vec![], Playback::Loop);
        assert!(matches!(
            source.capture(ms(0)),
            Err(FrameSourceError::Closed)
        ));
    }

    #[test]
    fn test_open_decodes_png() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("botella.png");
        image::RgbImage::from_pixel(6, 4, image::Rgb([200, 100, 50]))
            .save(&path)
            .unwrap();

        let mut source = ImageFileSource::open(&[path], Playback::Once).unwrap();
        let frame = source.capture(ms(0)).unwrap().unwrap();

        assert_eq!((frame.width(), frame.height(), frame.channels()), (6, 4, 3));
        assert_eq!(&frame.data()[..3], &[200, 100, 50]);
    }

    #[test]
    fn test_open_dir_filters_and_sorts() {
        let tmp = TempDir::new().unwrap();
        image::RgbImage::from_pixel(2, 2, image::Rgb([2, 2, 2]))
            .save(tmp.path().join("b.png"))
            .unwrap();
        image::RgbImage::from_pixel(2, 2, image::Rgb([1, 1, 1]))
            .save(tmp.path().join("a.png"))
            .unwrap();
        std::fs::write(tmp.path().join("notes.txt"), b"ignore me").unwrap();

        let mut source = ImageFileSource::open_dir(tmp.path(), Playback::Once).unwrap();

        assert_eq!(source.len(), 2);
        assert_eq!(source.capture(ms(0)).unwrap().unwrap().data()[0], 1);
    }

    #[test]
    fn test_open_dir_without_images_fails() {
        let tmp = TempDir::new().unwrap();
        assert!(ImageFileSource::open_dir(tmp.path(), Playback::Once).is_err());
    }

    #[test]
    fn test_corrupt_image_fails_at_open() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("broken.jpg");
        std::fs::write(&path, b"not a jpeg").unwrap();
        assert!(ImageFileSource::open(&[path], Playback::Once).is_err());
    }

    #[test]
    fn test_is_image() {
        assert!(is_image(Path::new("photo.JPG")));
        assert!(is_image(Path::new("scan.png")));
        assert!(!is_image(Path::new("clip.mp4")));
        assert!(!is_image(Path::new("noext")));
    }
}
