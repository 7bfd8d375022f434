//! # Video Module
//!
//! The clip abstraction and everything that produces frames: procedural
//! and static clips, images, text, and files decoded by ffmpeg.

pub mod clip;
pub mod probe;
pub mod reader;
pub mod sources;
pub mod text;
pub mod types;

pub use clip::{Clip, FrameProvider, Target};
pub use probe::{probe_file, MediaInfo, ProbeOptions, ProbeParser};
pub use reader::{FrameReader, FrameStatus, RawFrame, ReaderOptions};
pub use sources::{default_palette, BitmapTiming, Palette, VideoFileOptions};
pub use text::{TextMethod, TextOptions, TextSource};
pub use types::{Alignment, Anchor, Channel, Coord, Frame, Placement, Position};
