//! # Composition
//!
//! Building clips out of other clips: blitting with masks, layered
//! composites, back-to-back concatenation and grid arrays.

pub mod blit;
pub mod composite;
pub mod concatenate;
pub mod operators;

// Re-exports for convenience
pub use blit::blit;
pub use composite::CompositeVideoClip;
pub use concatenate::{clips_array, concatenate, ConcatMethod};
