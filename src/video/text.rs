//! Text clips rasterized by ImageMagick.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

use crate::{
    config::Config,
    error::{ClipError, ConfigError, ReaderError, Result},
    video::clip::Clip,
};

/// Where the text comes from
#[derive(Debug, Clone, PartialEq)]
pub enum TextSource {
    Text(String),
    /// A UTF-8 text file
    File(PathBuf),
}

/// ImageMagick text drawing mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextMethod {
    /// Image sized to fit the text
    #[default]
    Label,
    /// Text wrapped to the given width
    Caption,
}

impl TextMethod {
    fn as_str(self) -> &'static str {
        match self {
            TextMethod::Label => "label",
            TextMethod::Caption => "caption",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextOptions {
    pub source: TextSource,
    /// Font name or path to a font file
    pub font: Option<String>,
    pub font_size: Option<u32>,
    pub color: String,
    pub bg_color: String,
    pub stroke_color: Option<String>,
    pub stroke_width: f64,
    pub method: TextMethod,
    /// Image size; a missing dimension is computed by ImageMagick
    pub size: Option<(Option<u32>, Option<u32>)>,
    /// ImageMagick gravity (`center`, `west`, `north`...)
    pub align: String,
    pub kerning: Option<f64>,
    pub interline: Option<f64>,
    /// Use the alpha channel of the rendered image as a mask
    pub transparent: bool,
}

impl TextOptions {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            source: TextSource::Text(text.into()),
            font: None,
            font_size: None,
            color: "black".to_string(),
            bg_color: "transparent".to_string(),
            stroke_color: None,
            stroke_width: 1.0,
            method: TextMethod::Label,
            size: None,
            align: "center".to_string(),
            kerning: None,
            interline: None,
            transparent: true,
        }
    }

    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            source: TextSource::File(path.into()),
            ..Self::new("")
        }
    }

    /// ImageMagick arguments drawing the text in `text_file` into `output`
    pub fn magick_args(&self, text_file: &Path, output: &Path) -> Result<Vec<String>> {
        if self.method == TextMethod::Caption && self.size.and_then(|s| s.0).is_none() {
            return Err(ConfigError::InvalidValue {
                key: "size".to_string(),
                value: "caption text needs a width".to_string(),
            }
            .into());
        }

        let mut args = vec![
            "-background".to_string(),
            self.bg_color.clone(),
            "-fill".to_string(),
            self.color.clone(),
        ];
        if let Some(font) = &self.font {
            args.extend(["-font".to_string(), font.clone()]);
        }
        if let Some(size) = self.font_size {
            args.extend(["-pointsize".to_string(), size.to_string()]);
        }
        if let Some(kerning) = self.kerning {
            args.extend(["-kerning".to_string(), format!("{:.1}", kerning)]);
        }
        if let Some(interline) = self.interline {
            args.extend(["-interline-spacing".to_string(), format!("{:.1}", interline)]);
        }
        if let Some(stroke) = &self.stroke_color {
            args.extend([
                "-stroke".to_string(),
                stroke.clone(),
                "-strokewidth".to_string(),
                format!("{:.1}", self.stroke_width),
            ]);
        }
        if let Some((width, height)) = self.size {
            let dim = |d: Option<u32>| d.map(|v| v.to_string()).unwrap_or_default();
            args.extend(["-size".to_string(), format!("{}x{}", dim(width), dim(height))]);
        }
        args.extend([
            "-gravity".to_string(),
            self.align.clone(),
            format!("{}:@{}", self.method.as_str(), text_file.display()),
            "-type".to_string(),
            "truecolormatte".to_string(),
            format!("PNG32:{}", output.display()),
        ]);
        Ok(args)
    }
}

impl Clip {
    /// Static clip of rendered text. The image is produced once, eagerly.
    pub fn text(options: &TextOptions, config: &Config) -> Result<Clip> {
        let workdir = tempfile::tempdir()?;
        let output = workdir.path().join("text.png");

        // Text always goes through a file so that no escaping is needed
        let text_file = match &options.source {
            TextSource::File(path) => path.clone(),
            TextSource::Text(text) => {
                let path = workdir.path().join("text.txt");
                fs::write(&path, text)?;
                path
            }
        };

        let args = options.magick_args(&text_file, &output)?;
        let binary = &config.binaries.imagemagick;
        debug!("{} {}", binary, args.join(" "));

        let result = Command::new(binary)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| ReaderError::SpawnFailed {
                binary: binary.clone(),
                reason: e.to_string(),
            })?;

        if !result.status.success() {
            return Err(ClipError::FrameFailed {
                reason: format!(
                    "ImageMagick failed to render text: {}",
                    String::from_utf8_lossy(&result.stderr).trim()
                ),
            }
            .into());
        }

        Clip::from_image_file(&output, options.transparent)
    }
}
