//! Stills, image sequences and animated GIFs.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::{
    error::{ExportError, Result},
    video::clip::Clip,
};

/// Expand the first `%d` or `%0Nd` placeholder of `format` with `index`
pub fn format_frame_name(format: &str, index: usize) -> Result<String> {
    let invalid = || ExportError::InvalidNameFormat {
        format: format.to_string(),
    };

    let start = format.find('%').ok_or_else(invalid)?;
    let rest = &format[start + 1..];
    let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
    if rest[digits..].chars().next() != Some('d') {
        return Err(invalid().into());
    }

    let spec = &rest[..digits];
    let number = if spec.is_empty() {
        index.to_string()
    } else {
        let width: usize = spec.parse().map_err(|_| invalid())?;
        if spec.starts_with('0') {
            format!("{:0width$}", index, width = width)
        } else {
            format!("{:width$}", index, width = width)
        }
    };

    Ok(format!("{}{}{}", &format[..start], number, &rest[digits + 1..]))
}

fn is_jpeg(path: &Path) -> bool {
    path.extension()
        .map(|e| matches!(e.to_string_lossy().to_ascii_lowercase().as_str(), "jpg" | "jpeg"))
        .unwrap_or(false)
}

fn gif_error(e: gif::EncodingError) -> ExportError {
    ExportError::EncodingFailed {
        reason: format!("GIF encoding failed: {}", e),
    }
}

impl Clip {
    /// Save the frame at `t` as an image; the format follows the extension.
    /// With `with_mask` and a mask present, the mask becomes the alpha
    /// channel (formats without alpha keep RGB).
    pub fn save_frame<P: AsRef<Path>>(&self, path: P, t: f64, with_mask: bool) -> Result<()> {
        let path = path.as_ref();
        let frame = self.get_frame(t)?;

        match self.mask() {
            Some(mask) if with_mask && !is_jpeg(path) => {
                let alpha = mask.get_frame(t)?;
                frame.to_rgba_image(Some(&alpha)).save(path)?;
            }
            _ => frame.to_rgb_image().save(path)?,
        }
        debug!("Saved frame at {:.3}s to {}", t, path.display());
        Ok(())
    }

    /// Write every frame to a file named by `name_format` (`%d` or `%0Nd`
    /// is replaced by the frame index). Returns the written paths.
    pub fn write_images_sequence(
        &self,
        name_format: &str,
        fps: Option<f64>,
        with_mask: bool,
    ) -> Result<Vec<PathBuf>> {
        // Fail on a bad pattern before rendering anything
        format_frame_name(name_format, 0)?;
        let times = self.frame_times(fps)?;
        info!("Writing {} images to {}", times.len(), name_format);

        let mut paths = Vec::with_capacity(times.len());
        for (index, t) in times.into_iter().enumerate() {
            let path = PathBuf::from(format_frame_name(name_format, index)?);
            self.save_frame(&path, t, with_mask)?;
            paths.push(path);
        }
        Ok(paths)
    }

    /// Encode the clip as an animated GIF. `loop_count` of `None` or `0`
    /// loops forever. Masks are not carried into the GIF.
    pub fn write_gif<P: AsRef<Path>>(&self, path: P, fps: Option<f64>, loop_count: Option<u16>) -> Result<()> {
        let path = path.as_ref();
        let fps = self.require_fps(fps, "write_gif")?;
        let (width, height) = self.size();
        let (w, h) = match (u16::try_from(width), u16::try_from(height)) {
            (Ok(w), Ok(h)) => (w, h),
            _ => {
                return Err(ExportError::EncodingFailed {
                    reason: format!("{}x{} is too large for a GIF", width, height),
                }
                .into())
            }
        };

        let times = self.frame_times(Some(fps))?;
        info!("Writing GIF {} ({} frames @ {:.2} fps)", path.display(), times.len(), fps);

        let file = BufWriter::new(File::create(path)?);
        let mut encoder = gif::Encoder::new(file, w, h, &[]).map_err(gif_error)?;
        let repeat = match loop_count {
            None | Some(0) => gif::Repeat::Infinite,
            Some(n) => gif::Repeat::Finite(n),
        };
        encoder.set_repeat(repeat).map_err(gif_error)?;

        // GIF delays are in hundredths of a second
        let delay = (100.0 / fps).round().clamp(1.0, u16::MAX as f64) as u16;
        for t in times {
            let rgb = self.get_frame(t)?.to_rgb_bytes();
            let mut frame = gif::Frame::from_rgb_speed(w, h, &rgb, 10);
            frame.delay = delay;
            encoder.write_frame(&frame).map_err(gif_error)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{video::types::Channel, CompositorError};
    use tempfile::tempdir;

    #[test]
    fn test_format_frame_name() {
        assert_eq!(format_frame_name("frame%d.png", 7).unwrap(), "frame7.png");
        assert_eq!(format_frame_name("frame%04d.png", 7).unwrap(), "frame0007.png");
        assert_eq!(format_frame_name("out/%03d_x.jpg", 12).unwrap(), "out/012_x.jpg");
        assert!(matches!(
            format_frame_name("frame.png", 1),
            Err(CompositorError::Export(ExportError::InvalidNameFormat { .. }))
        ));
        assert!(format_frame_name("frame%s.png", 1).is_err());
    }

    #[test]
    fn test_save_frame_with_mask_writes_alpha() {
        let dir = tempdir().unwrap();
        let mask = Clip::color((3, 2), [128, 0, 0]).to_mask(Channel::Red);
        let clip = Clip::color((3, 2), [10, 20, 30]).with_mask(mask).unwrap();

        let path = dir.path().join("still.png");
        clip.save_frame(&path, 0.0, true).unwrap();
        let image = image::open(&path).unwrap().to_rgba8();
        assert_eq!(image.dimensions(), (3, 2));
        assert_eq!(image.get_pixel(0, 0).0, [10, 20, 30, 128]);

        let opaque = dir.path().join("opaque.png");
        clip.save_frame(&opaque, 0.0, false).unwrap();
        let image = image::open(&opaque).unwrap();
        assert!(!image.color().has_alpha());
    }

    #[test]
    fn test_images_sequence() {
        let dir = tempdir().unwrap();
        let clip = Clip::color((2, 2), [0, 255, 0]).with_duration(1.0);
        let pattern = dir.path().join("f%03d.png");
        let paths = clip
            .write_images_sequence(&pattern.to_string_lossy(), Some(4.0), false)
            .unwrap();

        assert_eq!(paths.len(), 4);
        assert_eq!(paths[3], dir.path().join("f003.png"));
        assert!(paths.iter().all(|p| p.exists()));
    }

    #[test]
    fn test_images_sequence_rejects_pattern_first() {
        let dir = tempdir().unwrap();
        let clip = Clip::color((2, 2), [0, 0, 0]).with_duration(1.0);
        let pattern = dir.path().join("frame.png");
        assert!(clip
            .write_images_sequence(&pattern.to_string_lossy(), Some(4.0), false)
            .is_err());
        assert!(!pattern.exists());
    }

    #[test]
    fn test_write_gif() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("anim.gif");
        let clip = Clip::bitmap(
            &[vec!["RG", "BW"], vec!["WB", "GR"]],
            crate::video::sources::BitmapTiming::Fps(2.0),
            None,
        )
        .unwrap();
        clip.write_gif(&path, None, Some(0)).unwrap();

        let mut decoder = gif::DecodeOptions::new()
            .read_info(File::open(&path).unwrap())
            .unwrap();
        assert_eq!((decoder.width(), decoder.height()), (2, 2));
        let mut frames = 0;
        while let Some(frame) = decoder.read_next_frame().unwrap() {
            assert_eq!(frame.delay, 50);
            frames += 1;
        }
        assert_eq!(frames, 2);
    }

    #[test]
    fn test_gif_requires_fps() {
        let dir = tempdir().unwrap();
        let clip = Clip::color((2, 2), [0, 0, 0]).with_duration(1.0);
        assert!(matches!(
            clip.write_gif(dir.path().join("x.gif"), None, None),
            Err(CompositorError::Clip(crate::error::ClipError::MissingFps { .. }))
        ));
    }
}
