//! Pasting one frame onto another.

use std::borrow::Cow;

use crate::{
    error::Result,
    video::{
        clip::Clip,
        types::{Alignment, Channel, Frame, MaskImage},
    },
};
use image::RgbImage;

/// Overlapping region of a source placed at `pos` on a canvas, as
/// `(source x, source y, canvas x, canvas y, width, height)`
fn overlap(src: (u32, u32), dst: (u32, u32), pos: (i64, i64)) -> Option<(u32, u32, u32, u32, u32, u32)> {
    let (w1, h1) = (src.0 as i64, src.1 as i64);
    let (w2, h2) = (dst.0 as i64, dst.1 as i64);
    let (xp, yp) = pos;

    let x1 = (-xp).max(0);
    let y1 = (-yp).max(0);
    let xp1 = xp.max(0);
    let yp1 = yp.max(0);
    let xp2 = w2.min(xp + w1);
    let yp2 = h2.min(yp + h1);

    if xp1 >= xp2 || yp1 >= yp2 {
        return None;
    }
    Some((
        x1 as u32,
        y1 as u32,
        xp1 as u32,
        yp1 as u32,
        (xp2 - xp1) as u32,
        (yp2 - yp1) as u32,
    ))
}

/// Paste `src` onto a copy of `dst` with its top-left corner at `pos`.
///
/// Parts of `src` outside `dst` are cropped. With a `mask`, each pixel is
/// `m * src + (1 - m) * dst`. A mask canvas receiving a mask source without
/// an explicit mask accumulates opacity: `s + (1 - s) * dst`.
pub fn blit(src: &Frame, dst: &Frame, pos: (i64, i64), mask: Option<&Frame>) -> Frame {
    let Some((sx, sy, dx, dy, w, h)) = overlap(src.size(), dst.size(), pos) else {
        return dst.clone();
    };

    match dst {
        Frame::Rgb(canvas) => {
            let src: Cow<'_, RgbImage> = match src.as_rgb() {
                Some(img) => Cow::Borrowed(img),
                None => Cow::Owned(src.to_rgb_image()),
            };
            let mut out = canvas.clone();
            for row in 0..h {
                for col in 0..w {
                    let s = src.get_pixel(sx + col, sy + row);
                    let d = out.get_pixel_mut(dx + col, dy + row);
                    match mask {
                        None => *d = *s,
                        Some(m) => {
                            let a = m.mask_value(sx + col, sy + row);
                            for c in 0..3 {
                                let v = a * s[c] as f32 + (1.0 - a) * d[c] as f32;
                                d[c] = v.clamp(0.0, 255.0) as u8;
                            }
                        }
                    }
                }
            }
            Frame::Rgb(out)
        }
        Frame::Mask(canvas) => {
            let src: Cow<'_, MaskImage> = match src.as_mask() {
                Some(img) => Cow::Borrowed(img),
                None => Cow::Owned(src.to_mask_image(Channel::Red)),
            };
            let mut out = canvas.clone();
            for row in 0..h {
                for col in 0..w {
                    let s = src.get_pixel(sx + col, sy + row)[0];
                    let d = out.get_pixel_mut(dx + col, dy + row);
                    d[0] = match mask {
                        Some(m) => {
                            let a = m.mask_value(sx + col, sy + row);
                            a * s + (1.0 - a) * d[0]
                        }
                        None => s + (1.0 - s) * d[0],
                    };
                }
            }
            Frame::Mask(out)
        }
    }
}

impl Clip {
    /// Draw this clip's frame onto `canvas`. `t` is on the parent timeline,
    /// so the clip's own frame is the one at `t - start`.
    pub fn blit_on(&self, canvas: &Frame, t: f64) -> Result<Frame> {
        let ct = t - self.start();
        let mut frame = self.get_frame(ct)?;
        let mut mask = match self.mask() {
            Some(mask) => Some(mask.get_frame(ct)?),
            None => None,
        };

        if let Some(m) = &mask {
            if m.size() != frame.size() {
                let width = frame.width().max(m.width());
                let height = frame.height().max(m.height());
                frame = frame.fit(width, height, Alignment::TopLeft);
                mask = Some(m.fit(width, height, Alignment::TopLeft));
            }
        }

        let pos = self
            .position()
            .at(ct)
            .resolve(self.relative_position(), canvas.size(), frame.size());
        Ok(blit(&frame, canvas, pos, mask.as_ref()))
    }
}
