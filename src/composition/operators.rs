//! Operator shorthands for common compositions.
//!
//! - `a + b`: `a` then `b` (chained when sizes match, composed otherwise)
//! - `a | b`: side by side
//! - `a / b`: `a` above `b`
//! - `a & mask`: `a` with `mask` as its mask

use std::ops::{Add, BitAnd, BitOr, Div};

use crate::{error::Result, video::clip::Clip};

use super::concatenate::{clips_array, concatenate, ConcatMethod};

impl Add for Clip {
    type Output = Result<Clip>;

    fn add(self, other: Clip) -> Result<Clip> {
        let method = if self.size() == other.size() {
            ConcatMethod::Chain
        } else {
            ConcatMethod::Compose
        };
        concatenate(&[self, other], method)
    }
}

impl BitOr for Clip {
    type Output = Result<Clip>;

    fn bitor(self, other: Clip) -> Result<Clip> {
        clips_array(&[vec![self, other]], None)
    }
}

impl Div for Clip {
    type Output = Result<Clip>;

    fn div(self, other: Clip) -> Result<Clip> {
        clips_array(&[vec![self], vec![other]], None)
    }
}

impl BitAnd for Clip {
    type Output = Result<Clip>;

    fn bitand(self, mask: Clip) -> Result<Clip> {
        self.with_mask(mask)
    }
}
