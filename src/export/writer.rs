//! Encoder subprocess fed with raw frames.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use tracing::{debug, info, warn};

use crate::{
    error::{ExportError, ReaderError, Result},
    video::types::Frame,
};

/// Encoder settings for [`FfmpegVideoWriter`]
#[derive(Debug, Clone, PartialEq)]
pub struct WriterOptions {
    pub codec: String,
    pub preset: String,
    /// Passed to `-b`, e.g. `"5000k"`
    pub bitrate: Option<String>,
    pub threads: Option<usize>,
    /// Audio track muxed into the output
    pub audio_file: Option<PathBuf>,
    pub audio_codec: Option<String>,
    /// Output pixel format; `libx264` with even dimensions uses `yuv420p`
    pub pixel_format: Option<String>,
    /// Extra arguments placed before the output path
    pub ffmpeg_params: Vec<String>,
    /// Keep the encoder's diagnostics in this file
    pub logfile: Option<PathBuf>,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            codec: "libx264".to_string(),
            preset: "medium".to_string(),
            bitrate: None,
            threads: None,
            audio_file: None,
            audio_codec: None,
            pixel_format: None,
            ffmpeg_params: Vec::new(),
            logfile: None,
        }
    }
}

/// Arguments for an ffmpeg process reading `rgb24` frames on stdin
pub fn writer_args(path: &Path, size: (u32, u32), fps: f64, options: &WriterOptions) -> Vec<String> {
    let mut args: Vec<String> = [
        "-y",
        "-loglevel",
        if options.logfile.is_some() { "info" } else { "error" },
        "-f",
        "rawvideo",
        "-vcodec",
        "rawvideo",
        "-s",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    args.push(format!("{}x{}", size.0, size.1));
    args.extend(["-pix_fmt", "rgb24", "-r"].iter().map(|s| s.to_string()));
    args.push(format!("{:.02}", fps));
    args.extend(["-an", "-i", "-"].iter().map(|s| s.to_string()));

    if let Some(audio) = &options.audio_file {
        args.extend(["-i".to_string(), audio.display().to_string()]);
        let codec = options.audio_codec.clone().unwrap_or_else(|| "copy".to_string());
        args.extend(["-acodec".to_string(), codec]);
    }

    args.extend([
        "-vcodec".to_string(),
        options.codec.clone(),
        "-preset".to_string(),
        options.preset.clone(),
    ]);
    args.extend(options.ffmpeg_params.iter().cloned());
    if let Some(bitrate) = &options.bitrate {
        args.extend(["-b".to_string(), bitrate.clone()]);
    }
    if let Some(threads) = options.threads {
        args.extend(["-threads".to_string(), threads.to_string()]);
    }

    let even = size.0 % 2 == 0 && size.1 % 2 == 0;
    if options.codec == "libx264" && even {
        args.extend(["-pix_fmt".to_string(), "yuv420p".to_string()]);
    } else if let Some(format) = &options.pixel_format {
        args.extend(["-pix_fmt".to_string(), format.clone()]);
    }

    args.push(path.display().to_string());
    args
}

/// A running ffmpeg encoder. Dropping it without [`finish`](Self::finish)
/// kills the process.
pub struct FfmpegVideoWriter {
    path: PathBuf,
    size: (u32, u32),
    child: Child,
    stdin: Option<ChildStdin>,
    /// Encoder diagnostics: the user's logfile or an anonymous temp file
    log: File,
    frames_written: usize,
}

impl FfmpegVideoWriter {
    pub fn new<P: AsRef<Path>>(
        binary: &str,
        path: P,
        size: (u32, u32),
        fps: f64,
        options: &WriterOptions,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let args = writer_args(&path, size, fps, options);
        debug!("{} {}", binary, args.join(" "));

        let log = match &options.logfile {
            Some(logfile) => File::options().read(true).write(true).create(true).truncate(true).open(logfile)?,
            None => tempfile::tempfile()?,
        };

        let mut child = Command::new(binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::from(log.try_clone()?))
            .spawn()
            .map_err(|e| ReaderError::SpawnFailed {
                binary: binary.to_string(),
                reason: e.to_string(),
            })?;

        let stdin = child.stdin.take();
        info!("Encoding {} ({}x{} @ {:.2} fps, {})", path.display(), size.0, size.1, fps, options.codec);

        Ok(Self {
            path,
            size,
            child,
            stdin,
            log,
            frames_written: 0,
        })
    }

    /// Send one frame. Mask frames are written as gray levels.
    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if frame.size() != self.size {
            return Err(ExportError::EncodingFailed {
                reason: format!(
                    "frame {} is {}x{}, the output is {}x{}",
                    self.frames_written,
                    frame.width(),
                    frame.height(),
                    self.size.0,
                    self.size.1
                ),
            }
            .into());
        }

        let stdin = self.stdin.as_mut().ok_or_else(|| ExportError::EncodingFailed {
            reason: "encoder input already closed".to_string(),
        })?;

        if let Err(e) = stdin.write_all(&frame.to_rgb_bytes()) {
            let log = self.read_log();
            return Err(ExportError::EncodingFailed {
                reason: format!(
                    "writing frame {} to {} failed: {}\n{}",
                    self.frames_written,
                    self.path.display(),
                    e,
                    log.trim()
                ),
            }
            .into());
        }
        self.frames_written += 1;
        Ok(())
    }

    pub fn frames_written(&self) -> usize {
        self.frames_written
    }

    /// Close the input and wait for the encoder to exit
    pub fn finish(mut self) -> Result<()> {
        drop(self.stdin.take());
        let status = self.child.wait()?;
        if !status.success() {
            return Err(ExportError::EncodingFailed {
                reason: format!("ffmpeg exited with {}: {}", status, self.read_log().trim()),
            }
            .into());
        }
        info!("Wrote {} frames to {}", self.frames_written, self.path.display());
        Ok(())
    }

    fn read_log(&mut self) -> String {
        let mut text = String::new();
        let read = self
            .log
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.log.read_to_string(&mut text));
        if let Err(e) = read {
            debug!("Encoder log unreadable: {}", e);
        }
        text
    }
}

impl Drop for FfmpegVideoWriter {
    fn drop(&mut self) {
        drop(self.stdin.take());
        // Already reaped by `finish`
        if let Ok(Some(_)) = self.child.try_wait() {
            return;
        }
        if let Err(e) = self.child.kill() {
            if e.kind() != io::ErrorKind::InvalidInput {
                warn!("Could not stop encoder for {}: {}", self.path.display(), e);
            }
        }
        self.child.wait().ok();
    }
}
