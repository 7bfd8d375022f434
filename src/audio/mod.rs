//! # Audio Module
//!
//! Decoded audio data, file loading, and the time-indexed [`AudioClip`]
//! carried by video clips.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use clip_compositor::audio::AudioClip;
//!
//! # fn main() -> clip_compositor::Result<()> {
//! let music = AudioClip::from_file("song.wav")?;
//! let intro = music.subclip(0.0, Some(5.0))?;
//! intro.write_wav("intro.wav", Some(44100))?;
//! # Ok(())
//! # }
//! ```

pub mod clip;
pub mod loader;
pub mod types;

pub use clip::{AudioClip, SampleSource};
pub use loader::AudioLoader;
pub use types::{AudioData, AudioFormat};
