//! Writing clips to video files through an ffmpeg encoder.

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    error::{ExportError, Result},
    video::clip::Clip,
};

use super::writer::{FfmpegVideoWriter, WriterOptions};

/// Default video codec for a container extension
pub fn codec_for_extension(extension: &str) -> Option<&'static str> {
    match extension.to_ascii_lowercase().as_str() {
        "mp4" | "mkv" | "mov" => Some("libx264"),
        "webm" => Some("libvpx"),
        "ogv" => Some("libtheora"),
        "avi" => Some("png"),
        _ => None,
    }
}

/// Default audio codec for a container extension
pub fn audio_codec_for_extension(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        "ogv" | "webm" => "libvorbis",
        _ => "libmp3lame",
    }
}

/// Settings for [`Clip::write_videofile`]
#[derive(Debug, Clone)]
pub struct VideoExportOptions {
    /// Frame rate; the clip's own fps when unset
    pub fps: Option<f64>,
    /// Video codec; picked from the extension when unset
    pub codec: Option<String>,
    pub bitrate: Option<String>,
    /// Mux the clip's soundtrack
    pub audio: bool,
    /// Use this file as the soundtrack instead of the clip's audio
    pub audio_file: Option<PathBuf>,
    pub audio_fps: u32,
    /// Audio codec; picked from the extension when unset
    pub audio_codec: Option<String>,
    pub preset: String,
    pub threads: Option<usize>,
    pub pixel_format: Option<String>,
    /// Keep the encoder output in `<output>.log`
    pub write_logfile: bool,
    /// Delete the intermediate soundtrack afterwards
    pub remove_temp: bool,
    pub ffmpeg_params: Vec<String>,
    /// ffmpeg executable
    pub ffmpeg: String,
}

impl Default for VideoExportOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl VideoExportOptions {
    pub fn from_config(config: &Config) -> Self {
        let export = &config.export;
        Self {
            fps: None,
            codec: None,
            bitrate: export.bitrate.clone(),
            audio: true,
            audio_file: None,
            audio_fps: export.audio_fps,
            audio_codec: export.audio_codec.clone(),
            preset: export.preset.clone(),
            threads: Some(export.threads),
            pixel_format: export.pixel_format.clone(),
            write_logfile: export.write_logfile,
            remove_temp: export.remove_temp,
            ffmpeg_params: Vec::new(),
            ffmpeg: config.binaries.ffmpeg.clone(),
        }
    }
}

/// Soundtrack written next to the output or inside a temporary directory.
/// The file goes away on drop when `remove` is set.
struct TempAudio {
    path: PathBuf,
    remove: bool,
    _dir: Option<tempfile::TempDir>,
}

impl TempAudio {
    fn create(output: &Path, remove: bool) -> Result<Self> {
        let stem = output
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());
        let name = format!("{}_TEMP_AUDIO.wav", stem);

        if remove {
            let dir = tempfile::Builder::new().prefix("clip-compositor").tempdir()?;
            Ok(Self {
                path: dir.path().join(name),
                remove,
                _dir: Some(dir),
            })
        } else {
            let parent = output.parent().unwrap_or_else(|| Path::new(""));
            Ok(Self {
                path: parent.join(name),
                remove,
                _dir: None,
            })
        }
    }
}

impl Drop for TempAudio {
    fn drop(&mut self) {
        if self.remove && self.path.exists() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!("Failed to remove temporary audio {}: {}", self.path.display(), e);
            }
        }
    }
}

impl Clip {
    /// Encode the clip into `path`.
    ///
    /// Frames are pulled in increasing time order and piped as raw RGB to
    /// ffmpeg. The soundtrack, if any, is written to a WAV file first and
    /// muxed by the same encoder. Masks are dropped; mask clips are
    /// written as gray levels.
    pub fn write_videofile<P: AsRef<Path>>(&self, path: P, options: &VideoExportOptions) -> Result<()> {
        let path = path.as_ref();
        let duration = self.require_duration("write_videofile")?;
        let fps = self.require_fps(options.fps, "write_videofile")?;

        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        let codec = match &options.codec {
            Some(codec) => codec.clone(),
            None => codec_for_extension(&extension)
                .ok_or_else(|| ExportError::UnknownCodec {
                    extension: extension.clone(),
                })?
                .to_string(),
        };

        info!(
            "Writing {} ({:.2}s @ {:.2} fps, codec {})",
            path.display(),
            duration,
            fps,
            codec
        );

        let mut temp_audio = None;
        let audio_file = match (&options.audio_file, self.audio()) {
            (Some(file), _) if options.audio => Some(file.clone()),
            (None, Some(audio)) if options.audio => {
                let temp = TempAudio::create(path, options.remove_temp)?;
                debug!("Writing soundtrack to {}", temp.path.display());
                audio.write_wav(&temp.path, Some(options.audio_fps))?;
                let file = temp.path.clone();
                temp_audio = Some(temp);
                Some(file)
            }
            _ => None,
        };

        let audio_codec = audio_file.as_ref().map(|_| {
            options
                .audio_codec
                .clone()
                .unwrap_or_else(|| audio_codec_for_extension(&extension).to_string())
        });

        let logfile = options.write_logfile.then(|| {
            let mut name = path.as_os_str().to_owned();
            name.push(".log");
            PathBuf::from(name)
        });

        let writer_options = WriterOptions {
            codec,
            preset: options.preset.clone(),
            bitrate: options.bitrate.clone(),
            threads: options.threads,
            audio_file,
            audio_codec,
            pixel_format: options.pixel_format.clone(),
            ffmpeg_params: options.ffmpeg_params.clone(),
            logfile,
        };

        let clip = if self.is_mask() { self.to_rgb() } else { self.clone() };
        let mut writer = FfmpegVideoWriter::new(&options.ffmpeg, path, clip.size(), fps, &writer_options)?;
        for item in clip.iter_frames(Some(fps))? {
            let (_, frame) = item?;
            writer.write_frame(&frame)?;
        }
        writer.finish()?;
        drop(temp_audio);

        let stale = clip.stale_frames();
        if stale > 0 {
            warn!("{} frames of {} were repeated from an earlier read", stale, path.display());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::BinaryConfig,
        video::types::{Alignment, Channel, Frame},
        CompositorError,
    };
    use tempfile::tempdir;

    fn ffmpeg_available() -> bool {
        BinaryConfig::default().ensure_ffmpeg().is_ok()
    }

    #[test]
    fn test_codec_table() {
        assert_eq!(codec_for_extension("mp4"), Some("libx264"));
        assert_eq!(codec_for_extension("MOV"), Some("libx264"));
        assert_eq!(codec_for_extension("webm"), Some("libvpx"));
        assert_eq!(codec_for_extension("ogv"), Some("libtheora"));
        assert_eq!(codec_for_extension("avi"), Some("png"));
        assert_eq!(codec_for_extension("xyz"), None);

        assert_eq!(audio_codec_for_extension("webm"), "libvorbis");
        assert_eq!(audio_codec_for_extension("mp4"), "libmp3lame");
    }

    #[test]
    fn test_options_follow_config() {
        let mut config = Config::default();
        config.export.preset = "ultrafast".to_string();
        config.binaries.ffmpeg = "/opt/ffmpeg".to_string();
        let options = VideoExportOptions::from_config(&config);
        assert_eq!(options.preset, "ultrafast");
        assert_eq!(options.ffmpeg, "/opt/ffmpeg");
        assert!(options.audio);
        assert!(options.remove_temp);
    }

    #[test]
    fn test_unknown_extension_fails_before_encoding() {
        let dir = tempdir().unwrap();
        let clip = Clip::color((4, 4), [0, 0, 0]).with_duration(1.0).with_fps(5.0);
        let result = clip.write_videofile(dir.path().join("out.xyz"), &VideoExportOptions::default());
        assert!(matches!(
            result,
            Err(CompositorError::Export(ExportError::UnknownCodec { .. }))
        ));
    }

    #[test]
    fn test_requires_duration_and_fps() {
        let dir = tempdir().unwrap();
        let options = VideoExportOptions::default();

        let endless = Clip::color((4, 4), [0, 0, 0]).with_fps(5.0);
        assert!(endless.write_videofile(dir.path().join("a.mp4"), &options).is_err());

        let no_fps = Clip::color((4, 4), [0, 0, 0]).with_duration(1.0);
        assert!(no_fps.write_videofile(dir.path().join("b.mp4"), &options).is_err());
    }

    #[test]
    fn test_temp_audio_is_removed() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("movie.mp4");

        let temp = TempAudio::create(&output, true).unwrap();
        std::fs::write(&temp.path, b"RIFF").unwrap();
        let path = temp.path.clone();
        drop(temp);
        assert!(!path.exists());

        let kept = TempAudio::create(&output, false).unwrap();
        assert_eq!(kept.path, dir.path().join("movie_TEMP_AUDIO.wav"));
        std::fs::write(&kept.path, b"RIFF").unwrap();
        let path = kept.path.clone();
        drop(kept);
        assert!(path.exists());
    }

    #[test]
    fn test_write_and_read_back() {
        if !ffmpeg_available() {
            return;
        }
        let dir = tempdir().unwrap();
        let output = dir.path().join("red.avi");
        let clip = Clip::color((16, 16), [255, 0, 0]).with_duration(1.0).with_fps(10.0);
        clip.write_videofile(&output, &VideoExportOptions::default()).unwrap();

        let back = Clip::from_video_file(&output, &Default::default(), &Config::default()).unwrap();
        assert_eq!(back.size(), (16, 16));
        let frame = back.get_frame(0.5).unwrap();
        assert_eq!(frame.get_pixel(8, 8), [255, 0, 0]);
        back.close();
    }

    #[test]
    fn test_resized_clip_is_written_at_new_size() {
        if !ffmpeg_available() {
            return;
        }
        let dir = tempdir().unwrap();
        let output = dir.path().join("grown.avi");
        let clip = Clip::from_fn(|_| Ok(Frame::new_filled(4, 4, [0, 0, 255])), Some(0.5))
            .unwrap()
            .with_fps(10.0)
            .image_transform(|frame| Ok(frame.fit(8, 6, Alignment::TopLeft)), &[]);
        clip.write_videofile(&output, &VideoExportOptions::default()).unwrap();

        let back = Clip::from_video_file(&output, &Default::default(), &Config::default()).unwrap();
        assert_eq!(back.size(), (8, 6));
        back.close();
    }

    #[test]
    fn test_mask_clip_is_written_as_gray() {
        if !ffmpeg_available() {
            return;
        }
        let dir = tempdir().unwrap();
        let output = dir.path().join("mask.avi");
        let mask = Clip::color((8, 8), [255, 0, 0])
            .with_duration(0.5)
            .with_fps(10.0)
            .to_mask(Channel::Red);
        mask.write_videofile(&output, &VideoExportOptions::default()).unwrap();
        assert!(output.exists());
    }
}
