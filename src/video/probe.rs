//! Media probing.
//!
//! `ffmpeg -i <file>` prints a human-readable description of every input
//! stream on stderr. [`ProbeParser`] scans that text line by line and builds
//! a [`MediaInfo`] record. The format is not versioned by ffmpeg, so parsing
//! is best effort: unknown lines are ignored, unsupported stream types are
//! kept as [`StreamKind::Unsupported`] with a warning, and only the fields
//! needed for playback (duration, frame size) are hard requirements.

use std::path::Path;
use std::process::Command;
use tracing::{debug, warn};

use crate::{
    config::{BinaryConfig, FpsSource},
    error::{ConfigError, ProbeError, Result},
};

/// Ordered key/value metadata. Re-inserting a key replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    entries: Vec<(String, String)>,
}

impl Metadata {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    fn append_line(&mut self, key: &str, line: &str) {
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| k == key) {
            entry.1.push('\n');
            entry.1.push_str(line);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Stream type as reported on the `Stream #i:n` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamKind {
    Video,
    Audio,
    Data,
    /// Any other type (subtitle, attachment, ...); kept but not interpreted
    Unsupported(String),
}

impl StreamKind {
    fn from_label(label: &str) -> Self {
        match label.to_ascii_lowercase().as_str() {
            "video" => StreamKind::Video,
            "audio" => StreamKind::Audio,
            "data" => StreamKind::Data,
            other => StreamKind::Unsupported(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub input_number: usize,
    pub stream_number: usize,
    pub kind: StreamKind,
    pub language: Option<String>,
    pub default: bool,
    /// Frame size of video streams
    pub size: Option<(u32, u32)>,
    /// kb/s
    pub bitrate: Option<u32>,
    /// Frame rate of video streams
    pub fps: Option<f64>,
    /// Sample rate of audio streams
    pub sample_rate: Option<u32>,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Chapter {
    pub input_number: usize,
    pub chapter_number: usize,
    pub start: f64,
    pub end: f64,
    pub metadata: Metadata,
}

/// Streams and chapters of one `Input #n` block
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputInfo {
    pub input_number: usize,
    pub streams: Vec<StreamInfo>,
    pub chapters: Vec<Chapter>,
}

/// Everything learned about a media file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaInfo {
    /// Container duration in seconds
    pub duration: Option<f64>,
    /// Container start offset in seconds
    pub start: Option<f64>,
    /// Container bitrate in kb/s
    pub bitrate: Option<u32>,
    pub metadata: Metadata,
    pub inputs: Vec<InputInfo>,

    pub video_found: bool,
    pub video_size: Option<(u32, u32)>,
    pub video_fps: Option<f64>,
    pub video_bitrate: Option<u32>,
    /// Rotation in degrees from stream metadata or display matrix side data
    pub video_rotation: f64,
    pub video_n_frames: usize,
    pub video_duration: Option<f64>,
    pub default_video_input_number: Option<usize>,
    pub default_video_stream_number: Option<usize>,

    pub audio_found: bool,
    pub audio_fps: Option<u32>,
    pub audio_bitrate: Option<u32>,
    pub default_audio_input_number: Option<usize>,
    pub default_audio_stream_number: Option<usize>,
}

/// Probe behavior switches
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeOptions {
    pub fps_source: FpsSource,
    /// Fail when no duration can be read, and derive the frame count from it
    pub check_duration: bool,
    /// Decode the whole file and take the last `time=` progress value as
    /// the duration
    pub decode_file: bool,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            fps_source: FpsSource::Fps,
            check_duration: true,
            decode_file: false,
        }
    }
}

/// Which record metadata lines currently belong to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParserState {
    OutsideMetadata,
    ContainerMetadata,
    Stream,
    StreamMetadata,
    Chapter,
    ChapterMetadata,
}

/// Line-oriented scanner over ffmpeg's diagnostic output
pub struct ProbeParser {
    path: String,
    options: ProbeOptions,
    state: ParserState,
    info: MediaInfo,
    inside_output: bool,
    default_stream_found: bool,
    current_input: Option<InputInfo>,
    current_stream: Option<StreamInfo>,
    current_chapter: Option<Chapter>,
    last_field: Option<String>,
}

impl ProbeParser {
    /// `path` is only used in error messages
    pub fn new(path: impl Into<String>, options: ProbeOptions) -> Self {
        Self {
            path: path.into(),
            options,
            state: ParserState::OutsideMetadata,
            info: MediaInfo::default(),
            inside_output: false,
            default_stream_found: false,
            current_input: None,
            current_stream: None,
            current_chapter: None,
            last_field: None,
        }
    }

    /// Parse a complete stderr capture
    pub fn parse(mut self, text: &str) -> Result<MediaInfo> {
        // Progress lines are separated by carriage returns
        for line in text.split(['\n', '\r']) {
            self.feed_line(line)?;
        }
        self.finish()
    }

    fn feed_line(&mut self, line: &str) -> Result<()> {
        if self.options.decode_file && self.options.check_duration && line.contains("time=") {
            match after(line, "time=").and_then(parse_timestamp) {
                Some(duration) => self.info.duration = Some(duration),
                None => debug!("Ignoring unparsable progress line: {}", line),
            }
            return Ok(());
        }

        if self.inside_output || !line.starts_with(' ') {
            if self.options.decode_file && !self.inside_output && line.starts_with("Output") {
                self.inside_output = true;
            }
            return Ok(());
        }

        if self.state != ParserState::ContainerMetadata && line.starts_with("  Metadata:") {
            self.state = ParserState::ContainerMetadata;
        } else if line.starts_with("  Duration:") {
            self.state = ParserState::OutsideMetadata;
            self.parse_duration_line(line)?;
        } else if self.state == ParserState::ContainerMetadata {
            let target = &mut self.info.metadata;
            add_metadata_line(target, &mut self.last_field, line);
        } else if line.trim_start().starts_with("Stream ") {
            self.open_stream(line);
        } else if line.trim() == "Metadata:" {
            self.state = match self.state {
                ParserState::Stream | ParserState::StreamMetadata => ParserState::StreamMetadata,
                ParserState::Chapter | ParserState::ChapterMetadata => ParserState::ChapterMetadata,
                other => other,
            };
        } else if line.starts_with("    Chapter") {
            self.open_chapter(line);
        } else if matches!(self.state, ParserState::Stream | ParserState::StreamMetadata) {
            self.add_stream_metadata_line(line);
        } else if matches!(self.state, ParserState::Chapter | ParserState::ChapterMetadata) {
            if let Some(chapter) = self.current_chapter.as_mut() {
                add_metadata_line(&mut chapter.metadata, &mut self.last_field, line);
            }
        }

        Ok(())
    }

    fn parse_duration_line(&mut self, line: &str) -> Result<()> {
        if self.options.check_duration && !self.options.decode_file {
            let duration = after(line, "Duration: ")
                .and_then(parse_timestamp)
                .ok_or_else(|| ProbeError::InvalidDuration { line: line.trim().to_string() })?;
            self.info.duration = Some(duration);
        }

        self.info.bitrate = number_before(line, " kb/s").and_then(|s| s.parse().ok());
        self.info.start = after(line, "start: ")
            .and_then(|s| s.split(',').next())
            .filter(|s| s.starts_with(|c: char| c.is_ascii_digit()))
            .and_then(|s| s.trim().parse().ok());
        Ok(())
    }

    fn open_stream(&mut self, line: &str) {
        let Some(header) = parse_stream_header(line) else {
            debug!("Ignoring malformed stream line: {}", line.trim());
            return;
        };

        self.close_stream();
        self.close_chapter();

        let default = !self.default_stream_found || line.trim_end().ends_with("(default)");
        self.default_stream_found = true;

        match self.current_input.as_ref() {
            Some(input) if input.input_number != header.input_number => {
                if let Some(done) = self.current_input.take() {
                    self.info.inputs.push(done);
                }
            }
            _ => {}
        }
        self.current_input.get_or_insert_with(|| InputInfo {
            input_number: header.input_number,
            ..InputInfo::default()
        });

        let mut stream = StreamInfo {
            input_number: header.input_number,
            stream_number: header.stream_number,
            kind: StreamKind::from_label(&header.kind),
            language: header.language.filter(|l| l != "und"),
            default,
            size: None,
            bitrate: None,
            fps: None,
            sample_rate: None,
            metadata: Metadata::default(),
        };

        match stream.kind.clone() {
            StreamKind::Video => self.parse_video_stream(line, &mut stream),
            StreamKind::Audio => self.parse_audio_stream(line, &mut stream),
            StreamKind::Data => {}
            StreamKind::Unsupported(kind) => {
                warn!(
                    "{} stream parsing is not supported and will be ignored ({})",
                    kind, self.path
                );
            }
        }

        self.current_stream = Some(stream);
        self.state = ParserState::Stream;
    }

    fn parse_video_stream(&mut self, line: &str, stream: &mut StreamInfo) {
        self.info.video_found = true;

        stream.size = parse_frame_size(line);
        stream.bitrate = number_before(line, " kb/s").and_then(|s| s.parse().ok());
        stream.fps = match self.options.fps_source {
            FpsSource::Fps => parse_fps(line).or_else(|| parse_tbr(line)),
            FpsSource::Tbr => parse_tbr(line).or_else(|| parse_fps(line)),
        }
        .map(snap_ntsc);

        if stream.default {
            self.info.default_video_input_number = Some(stream.input_number);
            self.info.default_video_stream_number = Some(stream.stream_number);
        }
        if stream.default || self.info.video_size.is_none() {
            self.info.video_size = stream.size;
        }
        if stream.default || self.info.video_bitrate.is_none() {
            self.info.video_bitrate = stream.bitrate;
        }
        if stream.default || self.info.video_fps.is_none() {
            self.info.video_fps = stream.fps;
        }
    }

    fn parse_audio_stream(&mut self, line: &str, stream: &mut StreamInfo) {
        self.info.audio_found = true;

        stream.sample_rate = spaced_number_before(line, " Hz").and_then(|s| s.parse().ok());
        stream.bitrate = number_before(line, " kb/s").and_then(|s| s.parse().ok());

        if stream.default {
            self.info.default_audio_input_number = Some(stream.input_number);
            self.info.default_audio_stream_number = Some(stream.stream_number);
            self.info.audio_fps = stream.sample_rate;
            self.info.audio_bitrate = stream.bitrate;
        }
    }

    fn add_stream_metadata_line(&mut self, line: &str) {
        let Some(stream) = self.current_stream.as_mut() else {
            return;
        };

        if stream.kind == StreamKind::Video {
            if let Some((field, value)) = split_field(line) {
                match field {
                    "rotate" => {
                        if let Ok(rotation) = value.parse::<f64>() {
                            self.info.video_rotation = rotation;
                        }
                    }
                    "displaymatrix" => {
                        if let Some(rotation) = after(value, "rotation of ")
                            .and_then(|s| s.split_whitespace().next())
                            .and_then(|s| s.parse::<f64>().ok())
                        {
                            self.info.video_rotation = rotation;
                        }
                    }
                    _ => {}
                }
            }
        }

        add_metadata_line(&mut stream.metadata, &mut self.last_field, line);
    }

    fn open_chapter(&mut self, line: &str) {
        self.close_stream();
        self.close_chapter();

        match parse_chapter_header(line) {
            Some(chapter) => {
                self.current_chapter = Some(chapter);
                self.state = ParserState::Chapter;
            }
            None => debug!("Ignoring malformed chapter line: {}", line.trim()),
        }
    }

    fn close_stream(&mut self) {
        if let Some(stream) = self.current_stream.take() {
            let input = self.current_input.get_or_insert_with(|| InputInfo {
                input_number: stream.input_number,
                ..InputInfo::default()
            });
            input.streams.push(stream);
        }
    }

    fn close_chapter(&mut self) {
        if let Some(chapter) = self.current_chapter.take() {
            let index = chapter.input_number;
            match self.current_input.as_mut() {
                Some(input) if input.input_number == index => input.chapters.push(chapter),
                _ => {
                    if let Some(input) = self.info.inputs.iter_mut().find(|i| i.input_number == index) {
                        input.chapters.push(chapter);
                    } else {
                        // Chapters are listed before the streams of their input
                        if let Some(done) = self.current_input.take() {
                            self.info.inputs.push(done);
                        }
                        self.current_input = Some(InputInfo {
                            input_number: index,
                            streams: Vec::new(),
                            chapters: vec![chapter],
                        });
                    }
                }
            }
        }
    }

    fn finish(mut self) -> Result<MediaInfo> {
        self.close_stream();
        self.close_chapter();
        if let Some(input) = self.current_input.take() {
            self.info.inputs.push(input);
        }

        let mut info = self.info;

        if info.video_found && self.options.check_duration {
            let duration = info
                .duration
                .ok_or_else(|| ProbeError::MissingDuration { path: self.path.clone() })?;
            info.video_n_frames = info
                .video_fps
                .map(|fps| (duration * fps).floor() as usize)
                .unwrap_or(0);
            info.video_duration = Some(duration);
        } else {
            info.video_n_frames = 1;
            info.video_duration = None;
        }

        if info.audio_found && info.audio_bitrate.is_none() {
            info.audio_bitrate = info
                .inputs
                .iter()
                .flat_map(|input| input.streams.iter())
                .filter(|s| s.kind == StreamKind::Audio)
                .find_map(|s| s.bitrate);
        }

        Ok(info)
    }
}

/// Run `ffmpeg -i` on a file and parse its report
pub fn probe_file<P: AsRef<Path>>(
    path: P,
    options: &ProbeOptions,
    binaries: &BinaryConfig,
) -> Result<MediaInfo> {
    let path = path.as_ref();
    let label = path.display().to_string();

    if !path.exists() {
        return Err(ProbeError::NotFound { path: label }.into());
    }
    if path.is_dir() {
        return Err(ProbeError::IsDirectory { path: label }.into());
    }

    let mut cmd = Command::new(&binaries.ffmpeg);
    cmd.arg("-hide_banner").arg("-i").arg(path);
    if options.decode_file {
        cmd.args(["-f", "null", "-"]);
    }

    debug!("Probing {} with {}", label, binaries.ffmpeg);
    let output = cmd.output().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::BinaryNotFound {
                binary: "ffmpeg".to_string(),
                path: binaries.ffmpeg.clone(),
            }
            .into()
        } else {
            crate::CompositorError::from(ProbeError::ProcessFailed { reason: e.to_string() })
        }
    })?;

    // ffmpeg exits with an error when no output is given; the report is on stderr regardless
    let report = String::from_utf8_lossy(&output.stderr);
    if report.contains("No such file or directory") {
        return Err(ProbeError::NotFound { path: label }.into());
    }

    ProbeParser::new(label, *options).parse(&report).map_err(|e| {
        debug!("ffmpeg report:\n{}", report);
        e
    })
}

/// NTSC rates are printed rounded (23.98, 29.97); restore the exact value
fn snap_ntsc(fps: f64) -> f64 {
    let coef = 1000.0 / 1001.0;
    let mut fps = fps;
    for x in [23.0, 24.0, 25.0, 30.0, 50.0] {
        if fps != x && (fps - x * coef).abs() < 0.01 {
            fps = x * coef;
        }
    }
    fps
}

fn after<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    line.rfind(marker).map(|idx| &line[idx + marker.len()..])
}

/// `HH:MM:SS.ss` (possibly followed by more text) to seconds
fn parse_timestamp(text: &str) -> Option<f64> {
    let token = text
        .trim_start()
        .split(|c: char| c == ',' || c.is_whitespace())
        .next()?;
    let mut parts = token.split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || hours < 0.0 {
        return None;
    }
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Run of digits immediately preceding the first occurrence of `unit`
fn number_before<'a>(line: &'a str, unit: &str) -> Option<&'a str> {
    line.match_indices(unit).find_map(|(idx, _)| {
        let prefix = &line[..idx];
        let start = prefix
            .char_indices()
            .rev()
            .take_while(|(_, c)| c.is_ascii_digit())
            .last()
            .map(|(i, _)| i)?;
        Some(&prefix[start..])
    })
}

/// Space-delimited token preceding `unit`
fn spaced_token_before<'a>(line: &'a str, unit: &str) -> Option<&'a str> {
    line.match_indices(unit).find_map(|(idx, _)| {
        let prefix = &line[..idx];
        let space = prefix.rfind(' ')?;
        let token = &prefix[space + 1..];
        (!token.is_empty()).then_some(token)
    })
}

fn spaced_number_before<'a>(line: &'a str, unit: &str) -> Option<&'a str> {
    spaced_token_before(line, unit).filter(|t| t.chars().all(|c| c.is_ascii_digit()))
}

fn parse_fps(line: &str) -> Option<f64> {
    spaced_token_before(line, " fps").and_then(|t| t.parse().ok())
}

fn parse_tbr(line: &str) -> Option<f64> {
    let token = spaced_token_before(line, " tbr")?;
    match token.strip_suffix('k') {
        Some(thousands) => thousands.parse::<f64>().ok().map(|v| v * 1000.0),
        None => token.parse().ok(),
    }
}

/// First `WxH` token followed by a comma or whitespace
fn parse_frame_size(line: &str) -> Option<(u32, u32)> {
    let words: Vec<&str> = line.split(' ').collect();
    words.iter().enumerate().skip(1).find_map(|(i, word)| {
        let core = match word.strip_suffix(',') {
            Some(core) => core,
            None if i + 1 < words.len() => word,
            None => return None,
        };
        let (w, h) = core.split_once('x')?;
        let digits = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
        if digits(w) && digits(h) {
            Some((w.parse().ok()?, h.parse().ok()?))
        } else {
            None
        }
    })
}

struct StreamHeader {
    input_number: usize,
    stream_number: usize,
    language: Option<String>,
    kind: String,
}

fn split_number(text: &str) -> Option<(usize, &str)> {
    let end = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    if end == 0 {
        return None;
    }
    Some((text[..end].parse().ok()?, &text[end..]))
}

/// `Stream #0:1[0x2](eng): Audio: ...`
fn parse_stream_header(line: &str) -> Option<StreamHeader> {
    let rest = line.trim_start().strip_prefix("Stream #")?;
    let (input_number, rest) = split_number(rest)?;
    let (stream_number, mut rest) = split_number(rest.strip_prefix(':')?)?;

    if let Some(id) = rest.strip_prefix('[') {
        rest = &id[id.find(']')? + 1..];
    }

    let mut language = None;
    if let Some(lang) = rest.strip_prefix('(') {
        let close = lang.find(')')?;
        language = Some(lang[..close].to_string());
        rest = &lang[close + 1..];
    }

    let rest = rest.strip_prefix(": ")?;
    let (kind, _) = rest.split_once(':')?;
    if kind.is_empty() || !kind.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }

    Some(StreamHeader {
        input_number,
        stream_number,
        language,
        kind: kind.to_string(),
    })
}

/// `    Chapter #0:1: start 10.000000, end 20.000000`
fn parse_chapter_header(line: &str) -> Option<Chapter> {
    let rest = line.trim_start().strip_prefix("Chapter #")?;
    let (input_number, rest) = split_number(rest)?;
    let (chapter_number, rest) = split_number(rest.strip_prefix(':')?)?;
    let rest = rest.strip_prefix(": start ")?;
    let (start, rest) = rest.split_once(", end ")?;
    let end = rest.split(|c: char| c == ',' || c.is_whitespace()).next()?;

    Some(Chapter {
        input_number,
        chapter_number,
        start: start.trim().parse().ok()?,
        end: end.parse().ok()?,
        metadata: Metadata::default(),
    })
}

/// `key : value`, split at the first colon
fn split_field(line: &str) -> Option<(&str, &str)> {
    let (field, value) = line.split_once(':')?;
    Some((field.trim(), value.trim()))
}

/// Lines without a key continue the previous field
fn add_metadata_line(target: &mut Metadata, last_field: &mut Option<String>, line: &str) {
    match split_field(line) {
        Some((field, value)) if !field.is_empty() => {
            target.insert(field, value);
            *last_field = Some(field.to_string());
        }
        Some((_, value)) => {
            if let Some(field) = last_field.as_deref() {
                target.append_line(field, value);
            }
        }
        None => {
            if let Some(field) = last_field.as_deref() {
                target.append_line(field, line.trim());
            }
        }
    }
}
