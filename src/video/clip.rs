//! The clip abstraction.
//!
//! A [`Clip`] is a cheap-to-clone value describing video as a function of
//! time. Its frames come from a shared [`FrameProvider`]; every `with_*` and
//! transform method returns a new clip that shares the untouched parts of
//! the receiver and never mutates it. Nothing is rendered until
//! [`Clip::get_frame`] is called.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::{
    audio::AudioClip,
    error::{ClipError, Result},
    video::types::{Channel, Frame, Position},
};

/// Slack allowed when checking a time against a clip's duration, so that
/// offsets accumulated by concatenation do not reject the final instant
pub(crate) const TIME_EPSILON: f64 = 1e-9;

/// Produces the frame shown at a time
pub trait FrameProvider: Send + Sync {
    fn frame_at(&self, t: f64) -> Result<Frame>;

    /// True when every time yields the same frame
    fn is_static(&self) -> bool {
        false
    }

    /// Release external resources (decoder processes). They are
    /// re-acquired on the next `frame_at`.
    fn release(&self) {}

    /// Number of degraded frames served so far
    fn stale_frames(&self) -> usize {
        0
    }
}

pub type FrameFn = dyn Fn(f64) -> Result<Frame> + Send + Sync;
pub type ImageFn = dyn Fn(Frame) -> Result<Frame> + Send + Sync;
pub type TimeFn = dyn Fn(f64) -> f64 + Send + Sync;
pub type TransformFn = dyn Fn(&dyn Fn(f64) -> Result<Frame>, f64) -> Result<Frame> + Send + Sync;

/// Sub-clips a transform may be propagated to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Mask,
    Audio,
}

struct StaticFrame {
    frame: Frame,
}

impl FrameProvider for StaticFrame {
    fn frame_at(&self, _t: f64) -> Result<Frame> {
        Ok(self.frame.clone())
    }

    fn is_static(&self) -> bool {
        true
    }
}

struct FnFrames {
    f: Arc<FrameFn>,
}

impl FrameProvider for FnFrames {
    fn frame_at(&self, t: f64) -> Result<Frame> {
        (self.f)(t)
    }
}

struct ImageTransformed {
    source: Arc<dyn FrameProvider>,
    f: Arc<ImageFn>,
}

impl FrameProvider for ImageTransformed {
    fn frame_at(&self, t: f64) -> Result<Frame> {
        (self.f)(self.source.frame_at(t)?)
    }

    fn release(&self) {
        self.source.release();
    }

    fn stale_frames(&self) -> usize {
        self.source.stale_frames()
    }
}

struct TimeMapped {
    source: Arc<dyn FrameProvider>,
    map: Arc<TimeFn>,
}

impl FrameProvider for TimeMapped {
    fn frame_at(&self, t: f64) -> Result<Frame> {
        self.source.frame_at((self.map)(t))
    }

    fn is_static(&self) -> bool {
        self.source.is_static()
    }

    fn release(&self) {
        self.source.release();
    }

    fn stale_frames(&self) -> usize {
        self.source.stale_frames()
    }
}

struct Transformed {
    source: Arc<dyn FrameProvider>,
    f: Arc<TransformFn>,
}

impl FrameProvider for Transformed {
    fn frame_at(&self, t: f64) -> Result<Frame> {
        let source = &self.source;
        (self.f)(&|at: f64| source.frame_at(at), t)
    }

    fn release(&self) {
        self.source.release();
    }

    fn stale_frames(&self) -> usize {
        self.source.stale_frames()
    }
}

/// Keeps the last `capacity` computed frames
struct Memoized {
    source: Arc<dyn FrameProvider>,
    capacity: usize,
    cache: Mutex<VecDeque<(u64, Frame)>>,
}

impl FrameProvider for Memoized {
    fn frame_at(&self, t: f64) -> Result<Frame> {
        let key = t.to_bits();
        if let Some((_, frame)) = self.cache.lock().iter().find(|(k, _)| *k == key) {
            return Ok(frame.clone());
        }

        let frame = self.source.frame_at(t)?;
        let mut cache = self.cache.lock();
        if cache.len() == self.capacity {
            cache.pop_front();
        }
        cache.push_back((key, frame.clone()));
        Ok(frame)
    }

    fn is_static(&self) -> bool {
        self.source.is_static()
    }

    fn release(&self) {
        self.cache.lock().clear();
        self.source.release();
    }

    fn stale_frames(&self) -> usize {
        self.source.stale_frames()
    }
}

/// Time-indexed video clip
#[derive(Clone)]
pub struct Clip {
    frames: Arc<dyn FrameProvider>,
    size: (u32, u32),
    duration: Option<f64>,
    start: f64,
    end: Option<f64>,
    fps: Option<f64>,
    mask: Option<Box<Clip>>,
    audio: Option<AudioClip>,
    position: Position,
    relative_position: bool,
    layer: i32,
    is_mask: bool,
    constant_size: bool,
}

impl fmt::Debug for Clip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Clip")
            .field("size", &self.size)
            .field("duration", &self.duration)
            .field("start", &self.start)
            .field("end", &self.end)
            .field("fps", &self.fps)
            .field("is_mask", &self.is_mask)
            .field("has_mask", &self.mask.is_some())
            .field("has_audio", &self.audio.is_some())
            .field("position", &self.position)
            .field("layer", &self.layer)
            .finish()
    }
}

impl Clip {
    // ========================================================================
    // CONSTRUCTION
    // ========================================================================

    /// Clip over an arbitrary provider. `size` must match the frames it yields.
    pub fn from_provider(provider: Arc<dyn FrameProvider>, size: (u32, u32), is_mask: bool) -> Self {
        Self {
            frames: provider,
            size,
            duration: None,
            start: 0.0,
            end: None,
            fps: None,
            mask: None,
            audio: None,
            position: Position::default(),
            relative_position: false,
            layer: 0,
            is_mask,
            constant_size: true,
        }
    }

    /// Procedural clip. The frame at `t = 0` is rendered once to learn the
    /// size and whether the clip is a mask.
    pub fn from_fn<F>(f: F, duration: Option<f64>) -> Result<Self>
    where
        F: Fn(f64) -> Result<Frame> + Send + Sync + 'static,
    {
        let first = f(0.0)?;
        let mut clip = Self::from_provider(
            Arc::new(FnFrames { f: Arc::new(f) }),
            first.size(),
            first.is_mask(),
        );
        if let Some(duration) = duration {
            clip = clip.with_duration(duration);
        }
        Ok(clip)
    }

    /// Clip showing the same frame at every time
    pub fn image(frame: Frame) -> Self {
        let size = frame.size();
        let is_mask = frame.is_mask();
        Self::from_provider(Arc::new(StaticFrame { frame }), size, is_mask)
    }

    /// Flat color clip
    pub fn color(size: (u32, u32), color: [u8; 3]) -> Self {
        Self::image(Frame::new_filled(size.0, size.1, color))
    }

    /// Uniform mask clip
    pub fn mask_color(size: (u32, u32), value: f32) -> Self {
        Self::image(Frame::new_mask(size.0, size.1, value))
    }

    // ========================================================================
    // ACCESS
    // ========================================================================

    /// Frame at time `t`. Fails when `t` is negative, not finite, or past
    /// the duration; `t == duration` is accepted.
    pub fn get_frame(&self, t: f64) -> Result<Frame> {
        let out_of_range = !t.is_finite()
            || t < 0.0
            || self.duration.map_or(false, |d| t > d + TIME_EPSILON);
        if out_of_range {
            return Err(ClipError::TimeOutOfRange { t, duration: self.duration }.into());
        }
        self.frames.frame_at(t)
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    pub fn width(&self) -> u32 {
        self.size.0
    }

    pub fn height(&self) -> u32 {
        self.size.1
    }

    pub fn aspect_ratio(&self) -> f64 {
        self.size.0 as f64 / self.size.1 as f64
    }

    pub fn duration(&self) -> Option<f64> {
        self.duration
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn end(&self) -> Option<f64> {
        self.end
    }

    pub fn fps(&self) -> Option<f64> {
        self.fps
    }

    pub fn mask(&self) -> Option<&Clip> {
        self.mask.as_deref()
    }

    pub fn audio(&self) -> Option<&AudioClip> {
        self.audio.as_ref()
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn relative_position(&self) -> bool {
        self.relative_position
    }

    pub fn layer(&self) -> i32 {
        self.layer
    }

    pub fn is_mask(&self) -> bool {
        self.is_mask
    }

    pub fn has_constant_size(&self) -> bool {
        self.constant_size
    }

    /// Whether every frame is the same image
    pub fn is_static(&self) -> bool {
        self.frames.is_static()
    }

    pub(crate) fn provider(&self) -> &Arc<dyn FrameProvider> {
        &self.frames
    }

    /// Whether the clip is on screen at parent time `t`
    pub fn is_playing(&self, t: f64) -> bool {
        t >= self.start && self.end.map_or(true, |end| t < end)
    }

    /// Number of frames, `floor(duration * fps)`
    pub fn n_frames(&self) -> Result<usize> {
        let duration = self.require_duration("n_frames")?;
        let fps = self.require_fps(None, "n_frames")?;
        Ok((duration * fps).floor() as usize)
    }

    /// Times `i / fps` strictly below the duration
    pub fn frame_times(&self, fps: Option<f64>) -> Result<Vec<f64>> {
        let duration = self.require_duration("frame iteration")?;
        let fps = self.require_fps(fps, "frame iteration")?;
        let count = (duration * fps - 1e-6).ceil().max(0.0) as usize;
        Ok((0..count).map(|i| i as f64 / fps).collect())
    }

    /// Frames in increasing time order
    pub fn iter_frames(
        &self,
        fps: Option<f64>,
    ) -> Result<impl Iterator<Item = Result<(f64, Frame)>> + '_> {
        let times = self.frame_times(fps)?;
        Ok(times.into_iter().map(move |t| self.get_frame(t).map(|frame| (t, frame))))
    }

    pub(crate) fn require_duration(&self, operation: &str) -> Result<f64> {
        self.duration.ok_or_else(|| {
            ClipError::MissingDuration { operation: operation.to_string() }.into()
        })
    }

    pub(crate) fn require_fps(&self, fps: Option<f64>, operation: &str) -> Result<f64> {
        fps.or(self.fps)
            .filter(|fps| *fps > 0.0)
            .ok_or_else(|| ClipError::MissingFps { operation: operation.to_string() }.into())
    }

    /// Release decoder processes held by this clip and its mask
    pub fn close(&self) {
        self.frames.release();
        if let Some(mask) = &self.mask {
            mask.close();
        }
    }

    /// Degraded frames served by file readers under this clip
    pub fn stale_frames(&self) -> usize {
        self.frames.stale_frames() + self.mask.as_ref().map_or(0, |m| m.stale_frames())
    }

    // ========================================================================
    // TIMING
    // ========================================================================

    /// Place the clip at `t` on its parent timeline
    pub fn with_start(&self, t: f64) -> Clip {
        let mut clip = self.clone();
        clip.start = t;
        clip.end = clip.duration.map(|d| t + d);
        clip.mask = self.mask.as_ref().map(|m| Box::new(m.with_start(t)));
        clip.audio = self.audio.as_ref().map(|a| a.with_start(t));
        clip
    }

    /// Cut the clip at parent time `t`
    pub fn with_end(&self, t: f64) -> Clip {
        self.with_duration((t - self.start).max(0.0))
    }

    pub fn with_duration(&self, duration: f64) -> Clip {
        let mut clip = self.clone();
        clip.duration = Some(duration);
        clip.end = Some(self.start + duration);
        clip.mask = self.mask.as_ref().map(|m| Box::new(m.with_duration(duration)));
        clip.audio = self.audio.as_ref().map(|a| a.with_duration(duration));
        clip
    }

    pub fn with_fps(&self, fps: f64) -> Clip {
        let mut clip = self.clone();
        clip.fps = Some(fps);
        clip
    }

    /// Section `[start, end)` re-indexed to begin at zero; `end = None`
    /// keeps everything up to the original end.
    pub fn subclip(&self, start: f64, end: Option<f64>) -> Result<Clip> {
        let invalid = || ClipError::InvalidRange { start, end, duration: self.duration };

        if !start.is_finite() || start < 0.0 {
            return Err(invalid().into());
        }
        if let Some(duration) = self.duration {
            if start > duration + TIME_EPSILON {
                return Err(invalid().into());
            }
        }
        if let Some(end) = end {
            let past_end = self.duration.map_or(false, |d| end > d + TIME_EPSILON);
            if !end.is_finite() || end <= start || past_end {
                return Err(invalid().into());
            }
        }

        let new_duration = end.or(self.duration).map(|e| (e - start).max(0.0));
        let shifted = self.time_transform(move |t| t + start, &[Target::Mask, Target::Audio]);

        let mut clip = shifted.with_start(0.0);
        clip.duration = None;
        clip.end = None;
        clip.mask = clip.mask.map(|mut m| {
            m.duration = None;
            m.end = None;
            m
        });
        Ok(match new_duration {
            Some(duration) => clip.with_duration(duration),
            None => clip,
        })
    }

    // ========================================================================
    // ATTRIBUTES
    // ========================================================================

    /// Position on a composition canvas; with `relative`, numeric
    /// coordinates are fractions of the canvas size
    pub fn with_position(&self, position: impl Into<Position>, relative: bool) -> Clip {
        let position = position.into();
        let mut clip = self.clone();
        clip.mask = self
            .mask
            .as_ref()
            .map(|m| Box::new(m.with_position(position.clone(), relative)));
        clip.position = position;
        clip.relative_position = relative;
        clip
    }

    pub fn with_layer(&self, layer: i32) -> Clip {
        let mut clip = self.clone();
        clip.layer = layer;
        clip.mask = self.mask.as_ref().map(|m| Box::new(m.with_layer(layer)));
        clip
    }

    /// Attach an opacity mask; it must be tagged as a mask
    pub fn with_mask(&self, mask: Clip) -> Result<Clip> {
        if !mask.is_mask {
            return Err(ClipError::NotAMask.into());
        }
        Ok(self.attach_mask(mask))
    }

    /// `with_mask` for masks built by the crate itself
    pub(crate) fn attach_mask(&self, mask: Clip) -> Clip {
        debug_assert!(mask.is_mask);
        let mut clip = self.clone();
        clip.mask = Some(Box::new(mask));
        clip
    }

    pub fn without_mask(&self) -> Clip {
        let mut clip = self.clone();
        clip.mask = None;
        clip
    }

    /// Multiply the mask by `opacity`, adding an opaque mask first if needed
    pub fn with_opacity(&self, opacity: f32) -> Clip {
        let base = if self.mask.is_some() { self.clone() } else { self.add_mask() };
        let mut clip = base.clone();
        clip.mask = base
            .mask
            .as_ref()
            .map(|m| Box::new(m.image_transform(move |frame| Ok(frame.scale_mask(opacity)), &[])));
        clip
    }

    pub fn with_audio(&self, audio: AudioClip) -> Clip {
        let mut clip = self.clone();
        clip.audio = Some(audio);
        clip
    }

    pub fn without_audio(&self) -> Clip {
        let mut clip = self.clone();
        clip.audio = None;
        clip
    }

    /// Replace the frame function, keeping timing and attributes
    pub fn with_make_frame<F>(&self, f: F) -> Result<Clip>
    where
        F: Fn(f64) -> Result<Frame> + Send + Sync + 'static,
    {
        let first = f(0.0)?;
        let mut clip = self.clone();
        clip.size = first.size();
        clip.is_mask = first.is_mask();
        clip.frames = Arc::new(FnFrames { f: Arc::new(f) });
        Ok(clip)
    }

    // ========================================================================
    // CONVERSION
    // ========================================================================

    /// Mask clip taking `channel / 255` as opacity
    pub fn to_mask(&self, channel: Channel) -> Clip {
        if self.is_mask {
            return self.clone();
        }
        let mut clip = self.image_transform(move |frame| Ok(frame.to_mask(channel)), &[]);
        clip.is_mask = true;
        clip
    }

    /// Color clip showing mask values as gray levels
    pub fn to_rgb(&self) -> Clip {
        if !self.is_mask {
            return self.clone();
        }
        let mut clip = self.image_transform(|frame| Ok(frame.to_rgb()), &[]);
        clip.is_mask = false;
        clip
    }

    /// Static clip of the frame at `t`
    pub fn to_image_clip(&self, t: f64, with_mask: bool, duration: Option<f64>) -> Result<Clip> {
        let mut clip = Clip::image(self.get_frame(t)?);
        if with_mask {
            if let Some(mask) = &self.mask {
                clip = clip.with_mask(Clip::image(mask.get_frame(t)?.to_mask(Channel::Red)))?;
            }
        }
        Ok(match duration {
            Some(duration) => clip.with_duration(duration),
            None => clip,
        })
    }

    // ========================================================================
    // TRANSFORMS
    // ========================================================================

    /// Clip whose frames are `f(frame)`. For static clips the transform is
    /// applied once, right away; for other clips `f` must keep the frame size.
    pub fn image_transform<F>(&self, f: F, apply_to: &[Target]) -> Clip
    where
        F: Fn(Frame) -> Result<Frame> + Send + Sync + 'static,
    {
        self.image_transform_shared(Arc::new(f), apply_to)
    }

    fn image_transform_shared(&self, f: Arc<ImageFn>, apply_to: &[Target]) -> Clip {
        let mut clip = self.clone();

        let eager = if self.frames.is_static() {
            self.frames.frame_at(0.0).and_then(|frame| f(frame)).ok()
        } else {
            None
        };

        match eager {
            Some(frame) => {
                clip.size = frame.size();
                clip.frames = Arc::new(StaticFrame { frame });
            }
            None => {
                clip.frames = Arc::new(ImageTransformed {
                    source: self.frames.clone(),
                    f: f.clone(),
                });
                clip.refresh_size();
            }
        }

        if apply_to.contains(&Target::Mask) {
            clip.mask = self
                .mask
                .as_ref()
                .map(|m| Box::new(m.image_transform_shared(f, &[])));
        }
        clip
    }

    /// Clip whose frame at `t` is the original frame at `f(t)`. Timing is
    /// left unchanged.
    pub fn time_transform<F>(&self, f: F, apply_to: &[Target]) -> Clip
    where
        F: Fn(f64) -> f64 + Send + Sync + 'static,
    {
        self.time_transform_shared(Arc::new(f), apply_to)
    }

    fn time_transform_shared(&self, f: Arc<TimeFn>, apply_to: &[Target]) -> Clip {
        let mut clip = self.clone();
        clip.frames = Arc::new(TimeMapped {
            source: self.frames.clone(),
            map: f.clone(),
        });
        if apply_to.contains(&Target::Mask) {
            clip.mask = self
                .mask
                .as_ref()
                .map(|m| Box::new(m.time_transform_shared(f.clone(), &[])));
        }
        if apply_to.contains(&Target::Audio) {
            clip.audio = self.audio.as_ref().map(|a| a.time_transform_shared(f.clone()));
        }
        clip
    }

    /// General transform: `f(get_frame, t)` may sample the original clip at
    /// any time
    pub fn transform<F>(&self, f: F, apply_to: &[Target]) -> Clip
    where
        F: Fn(&dyn Fn(f64) -> Result<Frame>, f64) -> Result<Frame> + Send + Sync + 'static,
    {
        self.transform_shared(Arc::new(f), apply_to)
    }

    fn transform_shared(&self, f: Arc<TransformFn>, apply_to: &[Target]) -> Clip {
        let mut clip = self.clone();
        clip.frames = Arc::new(Transformed {
            source: self.frames.clone(),
            f: f.clone(),
        });
        clip.refresh_size();
        if apply_to.contains(&Target::Mask) {
            clip.mask = self
                .mask
                .as_ref()
                .map(|m| Box::new(m.transform_shared(f, &[])));
        }
        clip
    }

    /// Cache the last `capacity` computed frames of this clip and its mask
    pub fn memoized(&self, capacity: usize) -> Clip {
        if capacity == 0 || self.frames.is_static() {
            return self.clone();
        }
        let mut clip = self.clone();
        clip.frames = Arc::new(Memoized {
            source: self.frames.clone(),
            capacity,
            cache: Mutex::new(VecDeque::with_capacity(capacity)),
        });
        clip.mask = self.mask.as_ref().map(|m| Box::new(m.memoized(capacity)));
        clip
    }

    /// Declare that frames may change size over time. Masks added with
    /// `add_mask` then follow the size of each frame.
    pub fn with_variable_size(&self) -> Clip {
        let mut clip = self.clone();
        clip.constant_size = false;
        clip
    }

    /// Take the size from the frame at `t = 0`. A failing frame keeps the
    /// previous size; the error resurfaces on `get_frame`.
    fn refresh_size(&mut self) {
        match self.frames.frame_at(0.0) {
            Ok(frame) => self.size = frame.size(),
            Err(e) => debug!("Keeping size {:?}, first frame failed: {}", self.size, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompositorError;
    use crate::video::types::Alignment;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 2x2 clip whose red channel encodes `10 * t`
    pub(crate) fn ramp_clip(duration: f64) -> Clip {
        Clip::from_fn(
            |t| Ok(Frame::new_filled(2, 2, [(10.0 * t).round() as u8, 0, 0])),
            Some(duration),
        )
        .unwrap()
        .with_fps(10.0)
    }

    #[test]
    fn test_strict_time_bounds() {
        let clip = ramp_clip(5.0);
        assert!(clip.get_frame(5.0).is_ok());
        assert!(matches!(
            clip.get_frame(5.1),
            Err(CompositorError::Clip(ClipError::TimeOutOfRange { .. }))
        ));
        assert!(clip.get_frame(-0.1).is_err());
        assert!(clip.get_frame(f64::NAN).is_err());

        // Unbounded clips accept any non-negative time
        let still = Clip::color((2, 2), [1, 2, 3]);
        assert!(still.get_frame(1e6).is_ok());
    }

    #[test]
    fn test_subclip_reindexes() {
        let clip = ramp_clip(10.0);
        let sub = clip.subclip(2.0, Some(6.0)).unwrap();
        assert_eq!(sub.duration(), Some(4.0));
        assert_eq!(sub.start(), 0.0);
        assert_eq!(sub.get_frame(0.0).unwrap(), clip.get_frame(2.0).unwrap());
        assert_eq!(sub.get_frame(1.5).unwrap(), clip.get_frame(3.5).unwrap());

        let tail = clip.subclip(7.0, None).unwrap();
        assert_eq!(tail.duration(), Some(3.0));
        assert_eq!(tail.get_frame(3.0).unwrap(), clip.get_frame(10.0).unwrap());
    }

    #[test]
    fn test_subclip_invalid_ranges() {
        let clip = ramp_clip(10.0);
        for (start, end) in [(-1.0, None), (3.0, Some(3.0)), (4.0, Some(2.0)), (11.0, None), (1.0, Some(12.0))] {
            assert!(matches!(
                clip.subclip(start, end),
                Err(CompositorError::Clip(ClipError::InvalidRange { .. }))
            ));
        }
    }

    #[test]
    fn test_outplace_operations_leave_receiver_untouched() {
        let clip = ramp_clip(3.0);
        let moved = clip.with_position((10, 20), false).with_layer(4).with_start(1.0);

        assert_eq!(clip.layer(), 0);
        assert_eq!(clip.start(), 0.0);
        assert!(clip.mask().is_none());
        assert_eq!(moved.layer(), 4);
        assert_eq!(moved.end(), Some(4.0));

        let faded = clip.with_opacity(0.5);
        assert!(clip.mask().is_none());
        let mask = faded.mask().unwrap();
        assert!(mask.is_mask());
        assert_eq!(mask.get_frame(1.0).unwrap().mask_value(0, 0), 0.5);
    }

    #[test]
    fn test_with_mask_requires_mask_clip() {
        let clip = ramp_clip(1.0);
        let not_a_mask = Clip::color((2, 2), [255, 255, 255]);
        assert!(matches!(
            clip.with_mask(not_a_mask.clone()),
            Err(CompositorError::Clip(ClipError::NotAMask))
        ));
        assert!(clip.with_mask(not_a_mask.to_mask(Channel::Red)).is_ok());
    }

    #[test]
    fn test_mask_rgb_roundtrip() {
        let clip = Clip::color((3, 3), [51, 0, 0]);
        let mask = clip.to_mask(Channel::Red);
        assert!(mask.is_mask());
        let value = mask.get_frame(0.0).unwrap().mask_value(1, 1);
        assert!((value - 0.2).abs() < 1e-6);

        let rgb = mask.to_rgb();
        assert!(!rgb.is_mask());
        assert_eq!(rgb.get_frame(0.0).unwrap().get_pixel(1, 1), [51, 51, 51]);
    }

    #[test]
    fn test_n_frames() {
        let clip = Clip::color((2, 2), [0, 0, 0]).with_duration(10.0).with_fps(25.0);
        assert_eq!(clip.n_frames().unwrap(), 250);
        assert_eq!(clip.frame_times(None).unwrap().len(), 250);

        let no_fps = Clip::color((2, 2), [0, 0, 0]).with_duration(1.0);
        assert!(matches!(
            no_fps.n_frames(),
            Err(CompositorError::Clip(ClipError::MissingFps { .. }))
        ));
    }

    #[test]
    fn test_static_image_transform_is_eager() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let clip = Clip::color((2, 2), [10, 10, 10]).image_transform(
            move |frame| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(frame.to_mask(Channel::Red).to_rgb())
            },
            &[],
        );
        clip.get_frame(0.0).unwrap();
        clip.get_frame(3.0).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(clip.is_static());
    }

    #[test]
    fn test_time_transform_and_general_transform() {
        let clip = ramp_clip(10.0);
        let slow = clip.time_transform(|t| t / 2.0, &[]);
        assert_eq!(slow.get_frame(4.0).unwrap(), clip.get_frame(2.0).unwrap());

        let echo = clip.transform(|get_frame, t| get_frame((t - 1.0).max(0.0)), &[]);
        assert_eq!(echo.get_frame(3.0).unwrap(), clip.get_frame(2.0).unwrap());
    }

    #[test]
    fn test_resizing_transforms_update_size() {
        let clip = ramp_clip(2.0);
        assert_eq!(clip.size(), (2, 2));

        let grown = clip.image_transform(|frame| Ok(frame.fit(4, 3, Alignment::TopLeft)), &[]);
        assert_eq!(grown.size(), (4, 3));
        assert_eq!(grown.get_frame(1.0).unwrap().size(), grown.size());

        let shrunk = clip.transform(
            |get_frame, t| Ok(get_frame(t)?.fit(1, 1, Alignment::TopLeft)),
            &[],
        );
        assert_eq!(shrunk.size(), (1, 1));
        assert_eq!(clip.size(), (2, 2));
    }

    #[test]
    fn test_resizing_transform_resizes_mask() {
        let clip = ramp_clip(2.0).with_opacity(0.5);
        let grown = clip.image_transform(|frame| Ok(frame.fit(4, 4, Alignment::TopLeft)), &[Target::Mask]);
        assert_eq!(grown.size(), (4, 4));
        assert_eq!(grown.mask().unwrap().size(), (4, 4));
    }

    #[test]
    fn test_with_variable_size_is_outplace() {
        let clip = ramp_clip(1.0);
        let variable = clip.with_variable_size();
        assert!(clip.has_constant_size());
        assert!(!variable.has_constant_size());
    }

    #[test]
    fn test_memoized_caches_frames() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let clip = Clip::from_fn(
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Frame::new_black(1, 1))
            },
            Some(2.0),
        )
        .unwrap()
        .memoized(2);

        // One call during construction
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        clip.get_frame(0.5).unwrap();
        clip.get_frame(0.5).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        clip.get_frame(0.6).unwrap();
        clip.get_frame(0.7).unwrap();
        clip.get_frame(0.5).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_to_image_clip_freezes_frame() {
        let clip = ramp_clip(5.0).with_opacity(0.25);
        let frozen = clip.to_image_clip(2.0, true, Some(1.0)).unwrap();
        assert_eq!(frozen.duration(), Some(1.0));
        assert_eq!(frozen.get_frame(0.7).unwrap(), clip.get_frame(2.0).unwrap());
        assert_eq!(frozen.mask().unwrap().get_frame(0.0).unwrap().mask_value(0, 0), 0.25);
    }

    #[test]
    fn test_iter_frames_in_order() {
        let clip = ramp_clip(1.0);
        let times: Vec<f64> = clip
            .iter_frames(Some(4.0))
            .unwrap()
            .map(|item| item.unwrap().0)
            .collect();
        assert_eq!(times, vec![0.0, 0.25, 0.5, 0.75]);
    }
}
