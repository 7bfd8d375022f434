//! Clip constructors backed by files and data.

use image::GenericImageView;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::{
    audio::AudioClip,
    config::{Config, FpsSource},
    error::{ClipError, CompositionError, Result},
    video::{
        clip::{Clip, FrameProvider},
        reader::{FrameReader, ReaderOptions},
        types::Frame,
    },
};

/// Letter to color table for [`Clip::bitmap`]
pub type Palette = HashMap<char, [u8; 3]>;

/// Palette used when none is given
pub fn default_palette() -> Palette {
    [
        ('R', [255, 0, 0]),
        ('G', [0, 255, 0]),
        ('B', [0, 0, 255]),
        ('O', [0, 0, 0]),
        ('W', [255, 255, 255]),
        ('A', [89, 225, 62]),
        ('C', [113, 157, 108]),
        ('D', [215, 182, 143]),
        ('E', [57, 26, 252]),
        ('F', [225, 135, 33]),
    ]
    .into_iter()
    .collect()
}

/// How long each bitmap frame lasts
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BitmapTiming {
    Fps(f64),
    /// Total duration, split evenly between frames
    Duration(f64),
}

/// Options for [`Clip::from_video_file`]
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFileOptions {
    /// Decode the alpha channel into a mask
    pub has_mask: bool,
    /// Load the audio track when there is one
    pub audio: bool,
    /// Output size; a missing dimension keeps the aspect ratio
    pub target_resolution: Option<(Option<u32>, Option<u32>)>,
    /// Overrides the configured frame rate source
    pub fps_source: Option<FpsSource>,
    pub audio_fps: u32,
    pub audio_channels: u16,
}

impl Default for VideoFileOptions {
    fn default() -> Self {
        Self {
            has_mask: false,
            audio: true,
            target_resolution: None,
            fps_source: None,
            audio_fps: 44100,
            audio_channels: 2,
        }
    }
}

/// Frames decoded from a file. The color clip and its mask share one reader.
struct FileFrames {
    reader: Arc<Mutex<FrameReader>>,
    alpha: bool,
}

impl FrameProvider for FileFrames {
    fn frame_at(&self, t: f64) -> Result<Frame> {
        let raw = self.reader.lock().get_frame(t)?;
        if self.alpha {
            raw.alpha_mask().ok_or_else(|| {
                ClipError::FrameFailed { reason: "decoded frames carry no alpha channel".to_string() }.into()
            })
        } else {
            Ok(raw.to_frame())
        }
    }

    fn release(&self) {
        self.reader.lock().close();
    }

    fn stale_frames(&self) -> usize {
        // Counted once, on the color side
        if self.alpha {
            0
        } else {
            self.reader.lock().stale_reads()
        }
    }
}

struct IndexedFrames<T, F> {
    data: Vec<T>,
    fps: f64,
    data_to_frame: F,
}

impl<T, F> FrameProvider for IndexedFrames<T, F>
where
    T: Send + Sync,
    F: Fn(&T) -> Result<Frame> + Send + Sync,
{
    fn frame_at(&self, t: f64) -> Result<Frame> {
        let index = ((self.fps * t) as usize).min(self.data.len().saturating_sub(1));
        (self.data_to_frame)(&self.data[index])
    }
}

impl Clip {
    /// Still image from a file. With `transparent`, an alpha channel
    /// becomes the clip's mask.
    pub fn from_image_file<P: AsRef<Path>>(path: P, transparent: bool) -> Result<Clip> {
        let image = image::open(path.as_ref())?;
        let (width, height) = image.dimensions();

        if transparent && image.color().has_alpha() {
            let rgba = image.to_rgba8();
            let alpha: Vec<f32> = rgba.pixels().map(|px| px[3] as f32 / 255.0).collect();
            let mask = Frame::from_mask_values(width, height, alpha).ok_or_else(|| ClipError::FrameFailed {
                reason: format!("alpha plane of {} does not match its size", path.as_ref().display()),
            })?;
            let clip = Clip::image(Frame::Rgb(image.to_rgb8()));
            return clip.with_mask(Clip::image(mask));
        }

        Ok(Clip::image(Frame::Rgb(image.to_rgb8())))
    }

    /// Clip drawn from letter grids, one grid per frame and one string per
    /// row. Colors come from `palette`, or [`default_palette`].
    pub fn bitmap(frames: &[Vec<&str>], timing: BitmapTiming, palette: Option<&Palette>) -> Result<Clip> {
        if frames.is_empty() {
            return Err(CompositionError::Empty { operation: "bitmap clip".to_string() }.into());
        }
        let default = default_palette();
        let palette = palette.unwrap_or(&default);

        let rendered = frames
            .iter()
            .map(|rows| bitmap_frame(rows, palette))
            .collect::<Result<Vec<_>>>()?;

        let size = rendered[0].size();
        if let Some(index) = rendered.iter().position(|f| f.size() != size) {
            return Err(CompositionError::SizeMismatch {
                index,
                expected: size,
                found: rendered[index].size(),
            }
            .into());
        }

        let n = rendered.len() as f64;
        let (fps, duration) = match timing {
            BitmapTiming::Fps(fps) => (fps, n / fps),
            BitmapTiming::Duration(duration) => (n / duration, duration),
        };

        let provider = IndexedFrames {
            data: rendered,
            fps,
            data_to_frame: |frame: &Frame| -> Result<Frame> { Ok(frame.clone()) },
        };
        Ok(Clip::from_provider(Arc::new(provider), size, false)
            .with_fps(fps)
            .with_duration(duration))
    }

    /// Letter grids of every frame, the inverse of [`Clip::bitmap`]
    pub fn to_bitmap(&self, palette: Option<&Palette>) -> Result<Vec<Vec<String>>> {
        let default = default_palette();
        let letters: HashMap<[u8; 3], char> = palette
            .unwrap_or(&default)
            .iter()
            .map(|(letter, color)| (*color, *letter))
            .collect();

        self.iter_frames(None)?
            .map(|item| {
                let (_, frame) = item?;
                (0..frame.height())
                    .map(|y| {
                        (0..frame.width())
                            .map(|x| {
                                let color = frame.get_pixel(x, y);
                                letters.get(&color).copied().ok_or_else(|| {
                                    ClipError::FrameFailed {
                                        reason: format!("color {:?} is not in the palette", color),
                                    }
                                    .into()
                                })
                            })
                            .collect::<Result<String>>()
                    })
                    .collect::<Result<Vec<String>>>()
            })
            .collect()
    }

    /// One frame per data item, shown for `1 / fps` seconds each
    pub fn from_data<T, F>(data: Vec<T>, data_to_frame: F, fps: f64) -> Result<Clip>
    where
        T: Send + Sync + 'static,
        F: Fn(&T) -> Result<Frame> + Send + Sync + 'static,
    {
        if data.is_empty() {
            return Err(CompositionError::Empty { operation: "data clip".to_string() }.into());
        }
        if fps.is_nan() || fps <= 0.0 {
            return Err(ClipError::MissingFps { operation: "data clip".to_string() }.into());
        }

        let first = data_to_frame(&data[0])?;
        let duration = data.len() as f64 / fps;
        let provider = IndexedFrames { data, fps, data_to_frame };

        Ok(Clip::from_provider(Arc::new(provider), first.size(), first.is_mask())
            .with_fps(fps)
            .with_duration(duration))
    }

    /// Clip decoded from a video file by an ffmpeg subprocess
    pub fn from_video_file<P: AsRef<Path>>(path: P, options: &VideoFileOptions, config: &Config) -> Result<Clip> {
        let path = path.as_ref();

        let mut reader_options = ReaderOptions::from_config(config);
        reader_options.target_resolution = options.target_resolution;
        if let Some(source) = options.fps_source {
            reader_options.fps_source = source;
        }
        if options.has_mask {
            reader_options.pixel_format = "rgba".to_string();
        }

        let reader = FrameReader::open(path, &reader_options, config)?;
        let fps = reader.fps();
        let size = reader.size();
        let duration = reader
            .duration()
            .or_else(|| reader.info().and_then(|info| info.duration));
        let audio_found = reader.info().map_or(false, |info| info.audio_found);

        let reader = Arc::new(Mutex::new(reader));
        let mut clip = Clip::from_provider(
            Arc::new(FileFrames { reader: reader.clone(), alpha: false }),
            size,
            false,
        )
        .with_fps(fps);

        if options.has_mask {
            let mask = Clip::from_provider(Arc::new(FileFrames { reader, alpha: true }), size, true).with_fps(fps);
            clip = clip.with_mask(mask)?;
        }

        if options.audio && audio_found {
            match AudioClip::from_media_file(path, options.audio_fps, options.audio_channels, &config.binaries) {
                Ok(audio) => clip = clip.with_audio(audio),
                Err(e) => warn!("Audio of {} could not be decoded: {}", path.display(), e),
            }
        }

        if let Some(duration) = duration {
            clip = clip.with_duration(duration);
        }

        info!(
            "Loaded {} ({}x{}, {:.3} fps, {:?} s)",
            path.display(),
            size.0,
            size.1,
            fps,
            duration
        );
        Ok(clip)
    }
}

fn bitmap_frame(rows: &[&str], palette: &Palette) -> Result<Frame> {
    let height = rows.len() as u32;
    let width = rows.first().map_or(0, |row| row.chars().count()) as u32;
    if width == 0 || height == 0 {
        return Err(ClipError::FrameFailed { reason: "empty bitmap frame".to_string() }.into());
    }

    let mut data = Vec::with_capacity((width * height * 3) as usize);
    for row in rows {
        if row.chars().count() as u32 != width {
            return Err(ClipError::FrameFailed { reason: format!("ragged bitmap row {:?}", row) }.into());
        }
        for letter in row.chars() {
            let color = palette.get(&letter).ok_or_else(|| ClipError::FrameFailed {
                reason: format!("letter {:?} is not in the palette", letter),
            })?;
            data.extend_from_slice(color);
        }
    }

    Frame::from_rgb_bytes(width, height, data)
        .ok_or_else(|| ClipError::FrameFailed { reason: "bitmap buffer size mismatch".to_string() }.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::types::Channel;
    use image::{Rgba, RgbaImage};
    use tempfile::tempdir;

    #[test]
    fn test_bitmap_frames_and_timing() {
        let frames = vec![vec!["RG", "BO"], vec!["WW", "WW"]];
        let clip = Clip::bitmap(&frames, BitmapTiming::Fps(2.0), None).unwrap();
        assert_eq!(clip.size(), (2, 2));
        assert_eq!(clip.duration(), Some(1.0));

        let first = clip.get_frame(0.0).unwrap();
        assert_eq!(first.get_pixel(0, 0), [255, 0, 0]);
        assert_eq!(first.get_pixel(1, 0), [0, 255, 0]);
        assert_eq!(first.get_pixel(0, 1), [0, 0, 255]);
        assert_eq!(clip.get_frame(0.5).unwrap().get_pixel(1, 1), [255, 255, 255]);
        // The final instant shows the last frame
        assert_eq!(clip.get_frame(1.0).unwrap().get_pixel(0, 0), [255, 255, 255]);

        let by_duration = Clip::bitmap(&frames, BitmapTiming::Duration(4.0), None).unwrap();
        assert_eq!(by_duration.fps(), Some(0.5));
    }

    #[test]
    fn test_bitmap_roundtrip_letters() {
        let frames = vec![vec!["RGB", "OWA"], vec!["CDE", "FRR"]];
        let clip = Clip::bitmap(&frames, BitmapTiming::Fps(1.0), None).unwrap();
        let letters = clip.to_bitmap(None).unwrap();
        assert_eq!(letters, vec![vec!["RGB", "OWA"], vec!["CDE", "FRR"]]);
    }

    #[test]
    fn test_bitmap_rejects_unknown_letters_and_ragged_rows() {
        assert!(Clip::bitmap(&[vec!["RX"]], BitmapTiming::Fps(1.0), None).is_err());
        assert!(Clip::bitmap(&[vec!["RG", "R"]], BitmapTiming::Fps(1.0), None).is_err());
        assert!(Clip::bitmap(&[vec!["R"], vec!["RR"]], BitmapTiming::Fps(1.0), None).is_err());
    }

    #[test]
    fn test_from_data_indexes_by_time() {
        let clip = Clip::from_data(vec![10u8, 20, 30], |v| Ok(Frame::new_filled(1, 1, [*v, 0, 0])), 3.0).unwrap();
        assert_eq!(clip.duration(), Some(1.0));
        assert_eq!(clip.get_frame(0.0).unwrap().get_pixel(0, 0)[0], 10);
        assert_eq!(clip.get_frame(0.5).unwrap().get_pixel(0, 0)[0], 20);
        assert_eq!(clip.get_frame(1.0).unwrap().get_pixel(0, 0)[0], 30);

        let empty: Vec<u8> = Vec::new();
        assert!(Clip::from_data(empty, |_| Ok(Frame::new_black(1, 1)), 3.0).is_err());
    }

    #[test]
    fn test_image_file_alpha_becomes_mask() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logo.png");
        let mut image = RgbaImage::from_pixel(4, 2, Rgba([200, 100, 50, 255]));
        image.put_pixel(0, 0, Rgba([200, 100, 50, 0]));
        image.save(&path).unwrap();

        let clip = Clip::from_image_file(&path, true).unwrap();
        assert_eq!(clip.size(), (4, 2));
        assert_eq!(clip.get_frame(0.0).unwrap().get_pixel(1, 1), [200, 100, 50]);
        let mask = clip.mask().unwrap().get_frame(0.0).unwrap();
        assert_eq!(mask.mask_value(0, 0), 0.0);
        assert_eq!(mask.mask_value(1, 0), 1.0);

        let opaque = Clip::from_image_file(&path, false).unwrap();
        assert!(opaque.mask().is_none());
    }

    #[test]
    fn test_image_file_missing() {
        let dir = tempdir().unwrap();
        assert!(Clip::from_image_file(dir.path().join("nope.png"), false).is_err());
    }

    #[test]
    fn test_video_file_roundtrip_with_ffmpeg() {
        let config = Config::default();
        if config.binaries.ensure_ffmpeg().is_err() {
            return;
        }
        let dir = tempdir().unwrap();
        let path = dir.path().join("bars.mp4");
        let status = std::process::Command::new(&config.binaries.ffmpeg)
            .args(["-y", "-loglevel", "error", "-f", "lavfi", "-i", "testsrc=size=64x48:rate=10:duration=2"])
            .arg(&path)
            .status()
            .unwrap();
        if !status.success() {
            return;
        }

        let options = VideoFileOptions { audio: false, ..Default::default() };
        let clip = Clip::from_video_file(&path, &options, &config).unwrap();
        assert_eq!(clip.size(), (64, 48));
        assert_eq!(clip.fps(), Some(10.0));
        assert!((clip.duration().unwrap() - 2.0).abs() < 0.2);

        let frame = clip.get_frame(1.0).unwrap();
        assert_eq!(frame.size(), (64, 48));
        let gray = clip.to_mask(Channel::Green).get_frame(0.5).unwrap();
        assert!(gray.is_mask());
        clip.close();
        // Frames are still available after closing
        assert!(clip.get_frame(0.2).is_ok());
        assert_eq!(clip.stale_frames(), 0);
    }
}
