use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::{Command, Stdio};

use crate::error::{ConfigError, Result};

/// Main configuration for the clip compositor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// External binaries
    pub binaries: BinaryConfig,

    /// Frame reader settings
    pub reader: ReaderConfig,

    /// Export settings
    pub export: ExportConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound { path: path.display().to_string() })?;

        let config: Config = toml::from_str(&content)
            .map_err(|_| ConfigError::ParseFailed { path: path.display().to_string() })?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::InvalidValue {
            key: "config".to_string(),
            value: e.to_string(),
        })?;

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Default configuration with binary paths overridden by the
    /// `FFMPEG_BINARY` and `IMAGEMAGICK_BINARY` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.binaries.apply_env();
        config
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.binaries.validate()?;
        self.reader.validate()?;
        self.export.validate()?;
        Ok(())
    }
}

/// Locations of the external tools. They are only checked on first use.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BinaryConfig {
    /// ffmpeg executable used for probing, decoding and encoding
    pub ffmpeg: String,

    /// ImageMagick executable used to rasterize text
    pub imagemagick: String,
}

impl Default for BinaryConfig {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            imagemagick: "magick".to_string(),
        }
    }
}

impl BinaryConfig {
    fn apply_env(&mut self) {
        if let Ok(ffmpeg) = std::env::var("FFMPEG_BINARY") {
            if !ffmpeg.is_empty() {
                self.ffmpeg = ffmpeg;
            }
        }
        if let Ok(imagemagick) = std::env::var("IMAGEMAGICK_BINARY") {
            if !imagemagick.is_empty() {
                self.imagemagick = imagemagick;
            }
        }
    }

    fn validate(&self) -> Result<()> {
        let binaries = [
            ("binaries.ffmpeg", &self.ffmpeg),
            ("binaries.imagemagick", &self.imagemagick),
        ];
        for (key, value) in binaries {
            if value.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: value.clone(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Check that ffmpeg can be executed
    pub fn ensure_ffmpeg(&self) -> Result<()> {
        check_binary("ffmpeg", &self.ffmpeg)
    }

    /// Check that ImageMagick can be executed
    pub fn ensure_imagemagick(&self) -> Result<()> {
        check_binary("ImageMagick", &self.imagemagick)
    }
}

fn check_binary(name: &str, path: &str) -> Result<()> {
    let status = Command::new(path)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();

    match status {
        Ok(status) if status.success() => Ok(()),
        _ => Err(ConfigError::BinaryNotFound {
            binary: name.to_string(),
            path: path.to_string(),
        }
        .into()),
    }
}

/// Where the reader takes the frame rate of a stream from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FpsSource {
    /// The `fps` figure of the stream line, falling back to `tbr`
    Fps,
    /// The `tbr` figure of the stream line
    Tbr,
}

/// Frame reader configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Raw pixel format requested from the decoder (`rgb24` or `rgba`)
    pub pixel_format: String,

    /// Scaling algorithm passed to `-sws_flags`
    pub resize_algorithm: String,

    /// Forward jumps of at most this many frames are served by discarding
    /// frames instead of restarting the decoder
    pub seek_threshold_frames: usize,

    /// Frame rate source for probed streams
    pub fps_source: FpsSource,

    /// Decode the whole file while probing to obtain an exact duration
    pub decode_file: bool,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            pixel_format: "rgb24".to_string(),
            resize_algorithm: "bicubic".to_string(),
            seek_threshold_frames: 100,
            fps_source: FpsSource::Fps,
            decode_file: false,
        }
    }
}

impl ReaderConfig {
    fn validate(&self) -> Result<()> {
        if self.pixel_format != "rgb24" && self.pixel_format != "rgba" {
            return Err(ConfigError::InvalidValue {
                key: "reader.pixel_format".to_string(),
                value: self.pixel_format.clone(),
            }
            .into());
        }

        if self.resize_algorithm.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "reader.resize_algorithm".to_string(),
                value: self.resize_algorithm.clone(),
            }
            .into());
        }

        Ok(())
    }
}

/// Export configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Encoder preset (speed/size trade-off)
    pub preset: String,

    /// Sample rate of the soundtrack written next to the video
    pub audio_fps: u32,

    /// Audio codec; picked from the container when unset
    pub audio_codec: Option<String>,

    /// Target video bitrate, e.g. "5000k"
    pub bitrate: Option<String>,

    /// Encoder threads
    pub threads: usize,

    /// Keep ffmpeg's output in `<output>.log`
    pub write_logfile: bool,

    /// Pixel format of the encoded stream
    pub pixel_format: Option<String>,

    /// Delete the temporary soundtrack once the video is written
    pub remove_temp: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            preset: "medium".to_string(),
            audio_fps: 44100,
            audio_codec: None,
            bitrate: None,
            threads: num_cpus::get(),
            write_logfile: false,
            pixel_format: None,
            remove_temp: true,
        }
    }
}

impl ExportConfig {
    fn validate(&self) -> Result<()> {
        if self.audio_fps == 0 {
            return Err(ConfigError::InvalidValue {
                key: "export.audio_fps".to_string(),
                value: self.audio_fps.to_string(),
            }
            .into());
        }

        if self.threads == 0 {
            return Err(ConfigError::InvalidValue {
                key: "export.threads".to_string(),
                value: self.threads.to_string(),
            }
            .into());
        }

        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,

    /// Include the module path in each line
    pub show_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            show_target: false,
        }
    }
}
