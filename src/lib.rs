//! # Clip-Compositor
//!
//! Lazy, time-indexed video clips that are composed, masked, layered and
//! concatenated, then realized frame by frame through ffmpeg.
//!
//! A [`Clip`] is a function of time. Nothing is decoded or rendered until
//! a frame is requested, either directly with [`Clip::get_frame`] or by an
//! export such as [`Clip::write_videofile`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use clip_compositor::{
//!     composition::{concatenate, CompositeVideoClip, ConcatMethod},
//!     export::VideoExportOptions,
//!     video::{Anchor, VideoFileOptions},
//!     Clip, Config,
//! };
//!
//! # fn main() -> clip_compositor::Result<()> {
//! let config = Config::from_env();
//! let intro = Clip::from_video_file("intro.mp4", &VideoFileOptions::default(), &config)?;
//! let main = Clip::from_video_file("main.mp4", &VideoFileOptions::default(), &config)?;
//!
//! let logo = Clip::from_image_file("logo.png", true)?
//!     .with_duration(3.0)
//!     .with_position(Anchor::Center, false);
//!
//! let body = concatenate(&[intro, main], ConcatMethod::Compose)?;
//! let video = CompositeVideoClip::new(vec![body, logo]).build()?;
//! video.write_videofile("final.mp4", &VideoExportOptions::from_config(&config))?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`video`] - The clip type, frames, file and text sources, the ffmpeg
//!   frame reader and probe parser
//! - [`composition`] - Blitting, layered composites, concatenation and grids
//! - [`audio`] - Audio data, loading and time-indexed audio clips
//! - [`export`] - Video, image sequence, still and GIF writers
//! - [`config`] - Configuration management

pub mod audio;
pub mod composition;
pub mod config;
pub mod error;
pub mod export;
pub mod logging;
pub mod video;

// Re-export commonly used types for convenience
pub use crate::{
    audio::AudioClip,
    composition::{clips_array, concatenate, CompositeVideoClip, ConcatMethod},
    config::Config,
    error::{CompositorError, Result},
    video::{Clip, Frame, Position},
};
