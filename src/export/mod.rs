//! # Export
//!
//! Realizing clips into files: encoded video through an ffmpeg
//! subprocess, still images, image sequences and GIFs.

pub mod images;
pub mod video;
pub mod writer;

pub use images::format_frame_name;
pub use video::{audio_codec_for_extension, codec_for_extension, VideoExportOptions};
pub use writer::{FfmpegVideoWriter, WriterOptions};
