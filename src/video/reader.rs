//! Subprocess-backed sequential frame reader.
//!
//! An ffmpeg process decodes the file and writes raw frames to its stdout.
//! Reading frames in increasing time order is cheap: small forward jumps are
//! served by discarding frames from the pipe. Backward requests and forward
//! jumps beyond the seek threshold restart the decoder at the requested time.

use image::{ImageBuffer, Luma};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{
    config::{Config, FpsSource},
    error::{ConfigError, ProbeError, ReaderError, Result},
    video::{
        probe::{probe_file, MediaInfo, ProbeOptions},
        types::Frame,
    },
};

/// Whether a frame came fresh from the decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Decoded,
    /// The decoder returned a short read; this is the last good frame again
    Stale,
}

/// Raw interleaved pixels as delivered by the decoder
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    /// Bytes per pixel: 3 for `rgb24`, 4 for `rgba`
    pub depth: usize,
    pub data: Arc<Vec<u8>>,
    pub status: FrameStatus,
}

impl RawFrame {
    pub fn is_stale(&self) -> bool {
        self.status == FrameStatus::Stale
    }

    /// Color part of the frame
    pub fn to_frame(&self) -> Frame {
        let rgb = if self.depth == 3 {
            self.data.as_ref().clone()
        } else {
            self.data
                .chunks_exact(self.depth)
                .flat_map(|px| px[..3].iter().copied())
                .collect()
        };
        Frame::from_rgb_bytes(self.width, self.height, rgb)
            .unwrap_or_else(|| Frame::new_black(self.width, self.height))
    }

    /// Alpha channel as a mask frame, for 4-byte pixel formats
    pub fn alpha_mask(&self) -> Option<Frame> {
        if self.depth < 4 {
            return None;
        }
        let values: Vec<f32> = self
            .data
            .chunks_exact(self.depth)
            .map(|px| px[3] as f32 / 255.0)
            .collect();
        ImageBuffer::<Luma<f32>, Vec<f32>>::from_raw(self.width, self.height, values).map(Frame::Mask)
    }
}

/// A live decoder output pipe
pub trait DecoderStream: Read + Send {
    /// Stop the producer and release its resources. Must tolerate repeated calls.
    fn terminate(&mut self) -> io::Result<()>;
}

/// Starts decoders positioned at a given time
pub trait DecoderLauncher: Send {
    fn launch(&mut self, start_time: f64) -> Result<Box<dyn DecoderStream>>;
}

/// Launches `ffmpeg` writing raw frames to a pipe
#[derive(Debug, Clone)]
pub struct FfmpegLauncher {
    pub binary: String,
    pub path: PathBuf,
    pub size: (u32, u32),
    pub pixel_format: String,
    pub resize_algorithm: String,
}

impl FfmpegLauncher {
    /// Arguments for a decoder starting at `start_time`.
    ///
    /// Seeking uses an input `-ss` (fast, keyframe based) to one second
    /// before the target and an output `-ss` (exact) for the rest.
    pub fn command_args(&self, start_time: f64) -> Vec<String> {
        let path = self.path.display().to_string();
        let mut args = Vec::new();

        if start_time != 0.0 {
            let offset = start_time.min(1.0);
            args.extend([
                "-ss".to_string(),
                format!("{:.6}", start_time - offset),
                "-i".to_string(),
                path,
                "-ss".to_string(),
                format!("{:.6}", offset),
            ]);
        } else {
            args.extend(["-i".to_string(), path]);
        }

        args.extend([
            "-loglevel".to_string(),
            "error".to_string(),
            "-f".to_string(),
            "image2pipe".to_string(),
            "-vf".to_string(),
            format!("scale={}:{}", self.size.0, self.size.1),
            "-sws_flags".to_string(),
            self.resize_algorithm.clone(),
            "-pix_fmt".to_string(),
            self.pixel_format.clone(),
            "-vcodec".to_string(),
            "rawvideo".to_string(),
            "-".to_string(),
        ]);
        args
    }
}

impl DecoderLauncher for FfmpegLauncher {
    fn launch(&mut self, start_time: f64) -> Result<Box<dyn DecoderStream>> {
        let args = self.command_args(start_time);
        debug!("Starting decoder: {} {}", self.binary, args.join(" "));

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| -> crate::CompositorError {
                if e.kind() == io::ErrorKind::NotFound {
                    ConfigError::BinaryNotFound {
                        binary: "ffmpeg".to_string(),
                        path: self.binary.clone(),
                    }
                    .into()
                } else {
                    ReaderError::SpawnFailed {
                        binary: self.binary.clone(),
                        reason: e.to_string(),
                    }
                    .into()
                }
            })?;

        let stdout = child.stdout.take().ok_or_else(|| ReaderError::SpawnFailed {
            binary: self.binary.clone(),
            reason: "failed to capture stdout".to_string(),
        })?;

        let frame_size = 4 * self.size.0 as usize * self.size.1 as usize;
        Ok(Box::new(FfmpegStream {
            child,
            stdout: BufReader::with_capacity(frame_size + 100, stdout),
            terminated: false,
        }))
    }
}

struct FfmpegStream {
    child: Child,
    stdout: BufReader<ChildStdout>,
    terminated: bool,
}

impl Read for FfmpegStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stdout.read(buf)
    }
}

impl DecoderStream for FfmpegStream {
    fn terminate(&mut self) -> io::Result<()> {
        if self.terminated {
            return Ok(());
        }
        self.terminated = true;
        if self.child.try_wait()?.is_none() {
            self.child.kill()?;
        }
        self.child.wait()?;
        Ok(())
    }
}

impl Drop for FfmpegStream {
    fn drop(&mut self) {
        let _ = self.terminate();
    }
}

/// Fixed properties of the decoded stream
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReaderGeometry {
    pub fps: f64,
    /// Output frame size after rotation and scaling
    pub size: (u32, u32),
    pub depth: usize,
    pub n_frames: usize,
    pub duration: Option<f64>,
}

/// How to open a file for reading
#[derive(Debug, Clone, PartialEq)]
pub struct ReaderOptions {
    pub pixel_format: String,
    /// Output size; a missing dimension is derived from the aspect ratio
    pub target_resolution: Option<(Option<u32>, Option<u32>)>,
    pub resize_algorithm: String,
    pub fps_source: FpsSource,
    pub decode_file: bool,
    pub seek_threshold_frames: usize,
}

impl ReaderOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            pixel_format: config.reader.pixel_format.clone(),
            target_resolution: None,
            resize_algorithm: config.reader.resize_algorithm.clone(),
            fps_source: config.reader.fps_source,
            decode_file: config.reader.decode_file,
            seek_threshold_frames: config.reader.seek_threshold_frames,
        }
    }
}

/// Sequential/seekable raw-frame reader over a decoder pipe
pub struct FrameReader {
    filename: String,
    launcher: Box<dyn DecoderLauncher>,
    stream: Option<Box<dyn DecoderStream>>,
    geometry: ReaderGeometry,
    seek_threshold: usize,
    /// Index of the frame the next `read_frame` returns
    pos: usize,
    last_read: Option<Arc<Vec<u8>>>,
    last_status: FrameStatus,
    stale_reads: usize,
    info: Option<MediaInfo>,
}

impl FrameReader {
    /// Probe `path` and start an ffmpeg decoder at its first frame
    pub fn open<P: AsRef<Path>>(path: P, options: &ReaderOptions, config: &Config) -> Result<Self> {
        let path = path.as_ref();
        let filename = path.display().to_string();

        let probe_options = ProbeOptions {
            fps_source: options.fps_source,
            check_duration: true,
            decode_file: options.decode_file,
        };
        let info = probe_file(path, &probe_options, &config.binaries)?;

        if !info.video_found {
            return Err(ReaderError::NoVideoStream { path: filename }.into());
        }
        let fps = info
            .video_fps
            .filter(|fps| *fps > 0.0)
            .ok_or_else(|| ProbeError::MissingFrameRate { path: filename.clone() })?;
        let mut size = info
            .video_size
            .ok_or_else(|| ProbeError::MissingVideoSize { path: filename.clone() })?;

        // ffmpeg applies rotation metadata itself
        if matches!(info.video_rotation.abs().round() as i64, 90 | 270) {
            size = (size.1, size.0);
        }
        if let Some(target) = options.target_resolution {
            size = target_size(size, target);
        }

        let depth = if options.pixel_format.ends_with('a') { 4 } else { 3 };
        let geometry = ReaderGeometry {
            fps,
            size,
            depth,
            n_frames: info.video_n_frames,
            duration: info.video_duration,
        };

        info!(
            "Opening {}: {}x{} @ {:.3} fps, {} frames",
            filename, size.0, size.1, fps, geometry.n_frames
        );

        let launcher = FfmpegLauncher {
            binary: config.binaries.ffmpeg.clone(),
            path: path.to_path_buf(),
            size,
            pixel_format: options.pixel_format.clone(),
            resize_algorithm: options.resize_algorithm.clone(),
        };

        let mut reader = Self::with_launcher(
            filename,
            Box::new(launcher),
            geometry,
            options.seek_threshold_frames,
        )?;
        reader.info = Some(info);
        Ok(reader)
    }

    /// Reader over an arbitrary decoder; pre-reads the first frame
    pub fn with_launcher(
        filename: impl Into<String>,
        launcher: Box<dyn DecoderLauncher>,
        geometry: ReaderGeometry,
        seek_threshold: usize,
    ) -> Result<Self> {
        let mut reader = Self {
            filename: filename.into(),
            launcher,
            stream: None,
            geometry,
            seek_threshold,
            pos: 0,
            last_read: None,
            last_status: FrameStatus::Decoded,
            stale_reads: 0,
            info: None,
        };
        reader.initialize(0.0)?;
        Ok(reader)
    }

    /// Index of the frame shown at time `t`
    pub fn frame_number(&self, t: f64) -> usize {
        // The epsilon keeps n / fps from landing on frame n - 1
        (self.geometry.fps * t + 1e-5).max(0.0).floor() as usize
    }

    /// (Re)start the decoder at `start_time` and read the frame there.
    /// The last good frame survives the restart.
    pub fn initialize(&mut self, start_time: f64) -> Result<()> {
        self.terminate_stream();
        self.stream = Some(self.launcher.launch(start_time)?);
        self.pos = self.frame_number(start_time);
        self.read_frame()?;
        Ok(())
    }

    /// Frame at time `t`
    pub fn get_frame(&mut self, t: f64) -> Result<RawFrame> {
        // Position the reader will be at once the frame is read
        let pos = self.frame_number(t) + 1;

        if self.stream.is_none() {
            self.initialize(t)?;
            return self.current();
        }

        if pos == self.pos {
            self.current()
        } else if pos < self.pos || pos > self.pos + self.seek_threshold {
            debug!(
                "Reseeking {} from frame {} to frame {}",
                self.filename,
                self.pos,
                pos - 1
            );
            self.initialize(t)?;
            self.current()
        } else {
            self.skip_frames(pos - self.pos - 1)?;
            self.read_frame()
        }
    }

    /// Read and discard `n` frames. A failing pipe is not fatal here: the
    /// following `read_frame` comes up short and serves the last good frame.
    pub fn skip_frames(&mut self, n: usize) -> Result<()> {
        if n == 0 {
            return Ok(());
        }
        let bytes = (n * self.frame_bytes()) as u64;
        let stream = self.stream.as_mut().ok_or(ReaderError::StreamClosed)?;
        if let Err(e) = io::copy(&mut stream.as_mut().take(bytes), &mut io::sink()) {
            warn!("Skipping {} frames of {} failed: {}", n, self.filename, e);
        }
        self.pos += n;
        Ok(())
    }

    /// Read the next frame from the pipe. A short read yields the last good
    /// frame marked [`FrameStatus::Stale`]; a short read before any frame was
    /// ever decoded is fatal.
    pub fn read_frame(&mut self) -> Result<RawFrame> {
        let nbytes = self.frame_bytes();
        let stream = self.stream.as_mut().ok_or(ReaderError::StreamClosed)?;

        let mut buffer = vec![0u8; nbytes];
        let filled = read_full(stream.as_mut(), &mut buffer);

        if filled == nbytes {
            self.last_read = Some(Arc::new(buffer));
            self.last_status = FrameStatus::Decoded;
        } else {
            warn!(
                "In file {}, {} bytes wanted but {} bytes read at frame index {} (out of a total {} frames), at time {:.2}/{:.2} sec. Using the last valid frame instead.",
                self.filename,
                nbytes,
                filled,
                self.pos,
                self.geometry.n_frames,
                self.pos as f64 / self.geometry.fps,
                self.geometry.duration.unwrap_or(f64::NAN),
            );
            if self.last_read.is_none() {
                return Err(ReaderError::FirstFrameFailed { path: self.filename.clone() }.into());
            }
            self.last_status = FrameStatus::Stale;
            self.stale_reads += 1;
        }

        self.pos += 1;
        self.current()
    }

    fn current(&self) -> Result<RawFrame> {
        let data = self.last_read.clone().ok_or(ReaderError::StreamClosed)?;
        Ok(RawFrame {
            width: self.geometry.size.0,
            height: self.geometry.size.1,
            depth: self.geometry.depth,
            data,
            status: self.last_status,
        })
    }

    fn frame_bytes(&self) -> usize {
        self.geometry.depth * self.geometry.size.0 as usize * self.geometry.size.1 as usize
    }

    fn terminate_stream(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.terminate() {
                debug!("Decoder for {} did not terminate cleanly: {}", self.filename, e);
            }
        }
    }

    /// Stop the decoder and drop the cached frame. Safe to call repeatedly;
    /// the next `get_frame` starts a new decoder.
    pub fn close(&mut self) {
        self.terminate_stream();
        self.last_read = None;
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn fps(&self) -> f64 {
        self.geometry.fps
    }

    pub fn size(&self) -> (u32, u32) {
        self.geometry.size
    }

    pub fn depth(&self) -> usize {
        self.geometry.depth
    }

    pub fn n_frames(&self) -> usize {
        self.geometry.n_frames
    }

    pub fn duration(&self) -> Option<f64> {
        self.geometry.duration
    }

    /// Number of short reads answered with a stale frame
    pub fn stale_reads(&self) -> usize {
        self.stale_reads
    }

    /// Probe record, for readers opened from a file
    pub fn info(&self) -> Option<&MediaInfo> {
        self.info.as_ref()
    }
}

impl Drop for FrameReader {
    fn drop(&mut self) {
        self.close();
    }
}

fn read_full(stream: &mut dyn DecoderStream, buffer: &mut [u8]) -> usize {
    let mut filled = 0;
    while filled < buffer.len() {
        match stream.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!("Decoder pipe read failed: {}", e);
                break;
            }
        }
    }
    filled
}

/// Apply a target resolution; with one dimension missing the other is
/// scaled to keep the aspect ratio.
fn target_size(size: (u32, u32), target: (Option<u32>, Option<u32>)) -> (u32, u32) {
    match target {
        (Some(w), Some(h)) => (w, h),
        (Some(w), None) => {
            let ratio = w as f64 / size.0 as f64;
            (w, (size.1 as f64 * ratio) as u32)
        }
        (None, Some(h)) => {
            let ratio = h as f64 / size.1 as f64;
            ((size.0 as f64 * ratio) as u32, h)
        }
        (None, None) => size,
    }
}
