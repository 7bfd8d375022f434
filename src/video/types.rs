use image::{ImageBuffer, Luma, Rgb, RgbImage, Rgba, RgbaImage};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Single-channel opacity image with values in `[0, 1]`
pub type MaskImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// A single rendered frame
///
/// Color clips produce [`Frame::Rgb`] frames; mask clips produce
/// [`Frame::Mask`] frames whose values are opacities.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Rgb(RgbImage),
    Mask(MaskImage),
}

/// Color channel selector used when turning a color frame into a mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Channel {
    #[default]
    Red,
    Green,
    Blue,
}

impl Channel {
    pub fn index(self) -> usize {
        match self {
            Channel::Red => 0,
            Channel::Green => 1,
            Channel::Blue => 2,
        }
    }
}

/// Where a smaller frame lands when placed on a larger canvas
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    TopLeft,
    Center,
}

fn quantize(value: f32) -> u8 {
    (255.0 * value).round().clamp(0.0, 255.0) as u8
}

impl Frame {
    /// Create a new frame with the given dimensions filled with black
    pub fn new_black(width: u32, height: u32) -> Self {
        Frame::Rgb(ImageBuffer::new(width, height))
    }

    /// Create a new frame with the given dimensions filled with the specified color
    pub fn new_filled(width: u32, height: u32, color: [u8; 3]) -> Self {
        Frame::Rgb(ImageBuffer::from_pixel(width, height, Rgb(color)))
    }

    /// Create a mask frame where every pixel has the given opacity
    pub fn new_mask(width: u32, height: u32, value: f32) -> Self {
        Frame::Mask(ImageBuffer::from_pixel(width, height, Luma([value])))
    }

    /// Create a frame from raw RGB bytes
    pub fn from_rgb_bytes(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        ImageBuffer::from_raw(width, height, data).map(Frame::Rgb)
    }

    /// Create a mask frame from row-major opacity values
    pub fn from_mask_values(width: u32, height: u32, data: Vec<f32>) -> Option<Self> {
        ImageBuffer::from_raw(width, height, data).map(Frame::Mask)
    }

    /// Get the width of the frame
    pub fn width(&self) -> u32 {
        match self {
            Frame::Rgb(img) => img.width(),
            Frame::Mask(img) => img.width(),
        }
    }

    /// Get the height of the frame
    pub fn height(&self) -> u32 {
        match self {
            Frame::Rgb(img) => img.height(),
            Frame::Mask(img) => img.height(),
        }
    }

    /// `(width, height)`
    pub fn size(&self) -> (u32, u32) {
        (self.width(), self.height())
    }

    pub fn is_mask(&self) -> bool {
        matches!(self, Frame::Mask(_))
    }

    pub fn as_rgb(&self) -> Option<&RgbImage> {
        match self {
            Frame::Rgb(img) => Some(img),
            Frame::Mask(_) => None,
        }
    }

    pub fn as_mask(&self) -> Option<&MaskImage> {
        match self {
            Frame::Mask(img) => Some(img),
            Frame::Rgb(_) => None,
        }
    }

    /// Get a pixel at the given coordinates (returns RGB array).
    /// Mask frames are read as gray levels.
    pub fn get_pixel(&self, x: u32, y: u32) -> [u8; 3] {
        match self {
            Frame::Rgb(img) => img.get_pixel(x, y).0,
            Frame::Mask(img) => {
                let v = quantize(img.get_pixel(x, y)[0]);
                [v, v, v]
            }
        }
    }

    /// Opacity at the given coordinates. Color frames are read through
    /// their red channel.
    pub fn mask_value(&self, x: u32, y: u32) -> f32 {
        match self {
            Frame::Mask(img) => img.get_pixel(x, y)[0],
            Frame::Rgb(img) => img.get_pixel(x, y)[0] as f32 / 255.0,
        }
    }

    /// Color version of this frame. Mask values `v` become gray `round(255 * v)`.
    pub fn to_rgb(&self) -> Frame {
        Frame::Rgb(self.to_rgb_image())
    }

    pub fn to_rgb_image(&self) -> RgbImage {
        match self {
            Frame::Rgb(img) => img.clone(),
            Frame::Mask(img) => ImageBuffer::from_fn(img.width(), img.height(), |x, y| {
                let v = quantize(img.get_pixel(x, y)[0]);
                Rgb([v, v, v])
            }),
        }
    }

    /// Mask version of this frame, taking `channel / 255` as opacity.
    /// Mask frames are returned unchanged.
    pub fn to_mask(&self, channel: Channel) -> Frame {
        Frame::Mask(self.to_mask_image(channel))
    }

    pub fn to_mask_image(&self, channel: Channel) -> MaskImage {
        match self {
            Frame::Mask(img) => img.clone(),
            Frame::Rgb(img) => {
                let c = channel.index();
                ImageBuffer::from_fn(img.width(), img.height(), |x, y| {
                    Luma([img.get_pixel(x, y)[c] as f32 / 255.0])
                })
            }
        }
    }

    /// Multiply every opacity of a mask frame by `factor`.
    /// Color frames are returned unchanged.
    pub fn scale_mask(&self, factor: f32) -> Frame {
        match self {
            Frame::Mask(img) => {
                let mut out = img.clone();
                for p in out.pixels_mut() {
                    p[0] *= factor;
                }
                Frame::Mask(out)
            }
            Frame::Rgb(_) => self.clone(),
        }
    }

    /// Place this frame on a zero-filled canvas of the given size.
    /// Parts falling outside the canvas are cropped.
    pub fn fit(&self, width: u32, height: u32, alignment: Alignment) -> Frame {
        if self.size() == (width, height) {
            return self.clone();
        }

        let (dx, dy) = match alignment {
            Alignment::TopLeft => (0i64, 0i64),
            Alignment::Center => (
                (width as i64 - self.width() as i64) / 2,
                (height as i64 - self.height() as i64) / 2,
            ),
        };

        let inside = |x: u32, y: u32, w: u32, h: u32| -> Option<(u32, u32)> {
            let sx = x as i64 - dx;
            let sy = y as i64 - dy;
            if sx >= 0 && sy >= 0 && sx < w as i64 && sy < h as i64 {
                Some((sx as u32, sy as u32))
            } else {
                None
            }
        };

        match self {
            Frame::Rgb(img) => Frame::Rgb(ImageBuffer::from_fn(width, height, |x, y| {
                match inside(x, y, img.width(), img.height()) {
                    Some((sx, sy)) => *img.get_pixel(sx, sy),
                    None => Rgb([0, 0, 0]),
                }
            })),
            Frame::Mask(img) => Frame::Mask(ImageBuffer::from_fn(width, height, |x, y| {
                match inside(x, y, img.width(), img.height()) {
                    Some((sx, sy)) => *img.get_pixel(sx, sy),
                    None => Luma([0.0]),
                }
            })),
        }
    }

    /// Convert the frame to raw RGB bytes
    pub fn to_rgb_bytes(&self) -> Vec<u8> {
        match self {
            Frame::Rgb(img) => img.as_raw().clone(),
            Frame::Mask(_) => self.to_rgb_image().into_raw(),
        }
    }

    /// Color frame with an alpha channel taken from `mask`
    pub fn to_rgba_image(&self, mask: Option<&Frame>) -> RgbaImage {
        let rgb = self.to_rgb_image();
        ImageBuffer::from_fn(rgb.width(), rgb.height(), |x, y| {
            let [r, g, b] = rgb.get_pixel(x, y).0;
            let alpha = match mask {
                Some(m) if x < m.width() && y < m.height() => quantize(m.mask_value(x, y)),
                Some(_) => 0,
                None => 255,
            };
            Rgba([r, g, b, alpha])
        })
    }

    /// Save the frame as an image file; the format follows the extension
    pub fn save_png<P: AsRef<Path>>(&self, path: P) -> Result<(), image::ImageError> {
        self.to_rgb_image().save(path)
    }
}

/// Named edge or middle of a canvas
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    Left,
    Center,
    Right,
    Top,
    Bottom,
}

impl Anchor {
    /// Offset of a span of `inner` pixels inside `outer` pixels.
    /// `Left`/`Top` are the start edge, `Right`/`Bottom` the end edge.
    fn offset(self, outer: u32, inner: u32) -> f64 {
        match self {
            Anchor::Left | Anchor::Top => 0.0,
            Anchor::Center => (outer as f64 - inner as f64) / 2.0,
            Anchor::Right | Anchor::Bottom => outer as f64 - inner as f64,
        }
    }
}

/// One coordinate of a placement
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Coord {
    /// Pixels, or a fraction of the canvas for relative positions
    Value(f64),
    Anchor(Anchor),
}

impl From<f64> for Coord {
    fn from(value: f64) -> Self {
        Coord::Value(value)
    }
}

impl From<i32> for Coord {
    fn from(value: i32) -> Self {
        Coord::Value(value as f64)
    }
}

impl From<Anchor> for Coord {
    fn from(anchor: Anchor) -> Self {
        Coord::Anchor(anchor)
    }
}

/// Top-left placement of a clip on a canvas at one instant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub x: Coord,
    pub y: Coord,
}

impl Placement {
    pub fn new(x: impl Into<Coord>, y: impl Into<Coord>) -> Self {
        Self { x: x.into(), y: y.into() }
    }

    /// Placement named by a single anchor: `Center` centers on both axes,
    /// `Left`/`Right` center vertically, `Top`/`Bottom` center horizontally.
    pub fn anchored(anchor: Anchor) -> Self {
        let (x, y) = match anchor {
            Anchor::Center => (Anchor::Center, Anchor::Center),
            Anchor::Left => (Anchor::Left, Anchor::Center),
            Anchor::Right => (Anchor::Right, Anchor::Center),
            Anchor::Top => (Anchor::Center, Anchor::Top),
            Anchor::Bottom => (Anchor::Center, Anchor::Bottom),
        };
        Self::new(x, y)
    }

    /// Pixel offset of a `clip`-sized image on a `canvas`-sized one.
    /// With `relative`, numeric coordinates are fractions of the canvas.
    pub fn resolve(&self, relative: bool, canvas: (u32, u32), clip: (u32, u32)) -> (i64, i64) {
        let axis = |coord: Coord, outer: u32, inner: u32| -> i64 {
            let value = match coord {
                Coord::Value(v) if relative => v * outer as f64,
                Coord::Value(v) => v,
                Coord::Anchor(anchor) => anchor.offset(outer, inner),
            };
            // Truncation toward zero
            value as i64
        };
        (axis(self.x, canvas.0, clip.0), axis(self.y, canvas.1, clip.1))
    }
}

impl Default for Placement {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

/// Time-dependent placement function
pub type PlacementFn = dyn Fn(f64) -> Placement + Send + Sync;

/// Position of a clip inside a composition, fixed or animated
#[derive(Clone)]
pub enum Position {
    Fixed(Placement),
    Animated(Arc<PlacementFn>),
}

impl Position {
    /// Position following `f(t)`, with `t` relative to the clip start
    pub fn animated<F>(f: F) -> Self
    where
        F: Fn(f64) -> Placement + Send + Sync + 'static,
    {
        Position::Animated(Arc::new(f))
    }

    /// Placement at clip-local time `t`
    pub fn at(&self, t: f64) -> Placement {
        match self {
            Position::Fixed(placement) => *placement,
            Position::Animated(f) => f(t),
        }
    }
}

impl Default for Position {
    fn default() -> Self {
        Position::Fixed(Placement::default())
    }
}

impl fmt::Debug for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Fixed(placement) => f.debug_tuple("Fixed").field(placement).finish(),
            Position::Animated(_) => f.write_str("Animated(..)"),
        }
    }
}

impl From<Placement> for Position {
    fn from(placement: Placement) -> Self {
        Position::Fixed(placement)
    }
}

impl From<Anchor> for Position {
    fn from(anchor: Anchor) -> Self {
        Position::Fixed(Placement::anchored(anchor))
    }
}

impl From<(f64, f64)> for Position {
    fn from((x, y): (f64, f64)) -> Self {
        Position::Fixed(Placement::new(x, y))
    }
}

impl From<(i32, i32)> for Position {
    fn from((x, y): (i32, i32)) -> Self {
        Position::Fixed(Placement::new(x, y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_roundtrip_quantization() {
        let frame = Frame::new_filled(4, 4, [10, 128, 255]);
        let mask = frame.to_mask(Channel::Green);
        assert!(mask.is_mask());
        assert!((mask.mask_value(1, 1) - 128.0 / 255.0).abs() < 1e-6);

        let back = mask.to_rgb();
        assert_eq!(back.get_pixel(1, 1), [128, 128, 128]);
    }

    #[test]
    fn test_fit_center_pads_with_zeros() {
        let frame = Frame::new_filled(2, 2, [200, 0, 0]);
        let padded = frame.fit(4, 4, Alignment::Center);
        assert_eq!(padded.size(), (4, 4));
        assert_eq!(padded.get_pixel(0, 0), [0, 0, 0]);
        assert_eq!(padded.get_pixel(1, 1), [200, 0, 0]);
        assert_eq!(padded.get_pixel(2, 2), [200, 0, 0]);
        assert_eq!(padded.get_pixel(3, 3), [0, 0, 0]);
    }

    #[test]
    fn test_anchor_resolution() {
        let canvas = (100, 50);
        let clip = (20, 10);
        assert_eq!(Placement::anchored(Anchor::Center).resolve(false, canvas, clip), (40, 20));
        assert_eq!(Placement::anchored(Anchor::Right).resolve(false, canvas, clip), (80, 20));
        assert_eq!(Placement::anchored(Anchor::Bottom).resolve(false, canvas, clip), (40, 40));
        assert_eq!(Placement::new(Anchor::Left, Anchor::Top).resolve(false, canvas, clip), (0, 0));
    }

    #[test]
    fn test_relative_and_truncating_resolution() {
        let placement = Placement::new(0.25, 0.5);
        assert_eq!(placement.resolve(true, (100, 50), (10, 10)), (25, 25));

        // (7 - 4) / 2 = 1.5 truncates to 1
        assert_eq!(Placement::anchored(Anchor::Center).resolve(false, (7, 7), (4, 4)), (1, 1));
        assert_eq!(Placement::new(-3.7, 2.9).resolve(false, (10, 10), (1, 1)), (-3, 2));
    }

    #[test]
    fn test_rgba_uses_mask_as_alpha() {
        let frame = Frame::new_filled(2, 1, [1, 2, 3]);
        let mask = Frame::from_mask_values(2, 1, vec![1.0, 0.5]).unwrap();
        let rgba = frame.to_rgba_image(Some(&mask));
        assert_eq!(rgba.get_pixel(0, 0).0, [1, 2, 3, 255]);
        assert_eq!(rgba.get_pixel(1, 0).0, [1, 2, 3, 128]);
    }
}
