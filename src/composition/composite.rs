use std::sync::Arc;
use tracing::debug;

use crate::{
    audio::AudioClip,
    error::{CompositionError, Result},
    video::{
        clip::{Clip, FrameProvider},
        types::{Anchor, Frame, Position},
    },
};

/// Fully opaque mask following the size of a variable-size clip
struct OnesLike {
    source: Arc<dyn FrameProvider>,
}

impl FrameProvider for OnesLike {
    fn frame_at(&self, t: f64) -> Result<Frame> {
        let (width, height) = self.source.frame_at(t)?.size();
        Ok(Frame::new_mask(width, height, 1.0))
    }
}

enum Background {
    Color(Frame),
    Clip(Clip),
}

/// Layered clips drawn over a background
struct CompositeFrames {
    background: Background,
    /// Sorted by layer, lowest first
    clips: Vec<Clip>,
}

impl FrameProvider for CompositeFrames {
    fn frame_at(&self, t: f64) -> Result<Frame> {
        let mut frame = match &self.background {
            Background::Color(frame) => frame.clone(),
            Background::Clip(clip) => clip.get_frame(t)?,
        };
        for clip in self.clips.iter().filter(|c| c.is_playing(t)) {
            frame = clip.blit_on(&frame, t)?;
        }
        Ok(frame)
    }

    fn release(&self) {
        if let Background::Clip(clip) = &self.background {
            clip.close();
        }
        for clip in &self.clips {
            clip.close();
        }
    }

    fn stale_frames(&self) -> usize {
        let background = match &self.background {
            Background::Clip(clip) => clip.stale_frames(),
            Background::Color(_) => 0,
        };
        background + self.clips.iter().map(Clip::stale_frames).sum::<usize>()
    }
}

/// Builder for a clip made of other clips drawn on top of each other.
///
/// At each time every playing clip is blitted onto the background in
/// increasing layer order (ties keep their input order), each at its own
/// position and offset by its own `start`.
///
/// ```rust,no_run
/// use clip_compositor::composition::CompositeVideoClip;
/// use clip_compositor::video::{Anchor, Clip};
///
/// # fn main() -> clip_compositor::Result<()> {
/// let backdrop = Clip::color((640, 360), [0, 0, 80]).with_duration(5.0);
/// let badge = Clip::color((100, 100), [255, 200, 0])
///     .with_duration(3.0)
///     .with_start(1.0)
///     .with_position(Anchor::Center, false);
/// let scene = CompositeVideoClip::new(vec![backdrop, badge]).build()?;
/// assert_eq!(scene.duration(), Some(5.0));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct CompositeVideoClip {
    clips: Vec<Clip>,
    size: Option<(u32, u32)>,
    bg_color: Option<[u8; 3]>,
    use_bg_clip: bool,
}

impl CompositeVideoClip {
    pub fn new(clips: Vec<Clip>) -> Self {
        Self {
            clips,
            size: None,
            bg_color: None,
            use_bg_clip: false,
        }
    }

    /// Canvas size; defaults to the size of the first clip
    pub fn with_size(mut self, size: (u32, u32)) -> Self {
        self.size = Some(size);
        self
    }

    /// Opaque background color. Without one the background is black and
    /// the result gets a mask combining the masks of its clips.
    pub fn with_bg_color(mut self, color: [u8; 3]) -> Self {
        self.bg_color = Some(color);
        self
    }

    /// Use the first clip as the background instead of a flat color
    pub fn use_bg_clip(mut self, use_bg_clip: bool) -> Self {
        self.use_bg_clip = use_bg_clip;
        self
    }

    pub fn build(self) -> Result<Clip> {
        let first = self.clips.first().ok_or_else(|| CompositionError::Empty {
            operation: "composite".to_string(),
        })?;
        let size = self.size.unwrap_or_else(|| first.size());

        let fps = self
            .clips
            .iter()
            .filter_map(Clip::fps)
            .fold(None, |acc: Option<f64>, fps| Some(acc.map_or(fps, |a| a.max(fps))));

        let mut clips = self.clips;
        let background_clip = if self.use_bg_clip { Some(clips.remove(0)) } else { None };
        clips.sort_by_key(Clip::layer);

        let transparent = match &background_clip {
            Some(bg) if bg.mask().is_none() => false,
            _ => self.bg_color.is_none(),
        };

        let duration = if clips.is_empty() {
            background_clip.as_ref().and_then(Clip::duration)
        } else {
            clips
                .iter()
                .map(Clip::end)
                .try_fold(0.0_f64, |acc, end| end.map(|e| acc.max(e)))
        };

        let audio_tracks: Vec<AudioClip> = background_clip
            .iter()
            .chain(clips.iter())
            .filter_map(|c| c.audio().cloned())
            .collect();

        let mask = if transparent {
            Some(composite_mask(&clips, background_clip.as_ref(), size, duration))
        } else {
            None
        };

        debug!(
            "Composite of {} clips, {}x{}, duration {:?}",
            clips.len(),
            size.0,
            size.1,
            duration
        );

        let background = match background_clip {
            Some(clip) => Background::Clip(clip),
            None => Background::Color(Frame::new_filled(size.0, size.1, self.bg_color.unwrap_or([0, 0, 0]))),
        };

        let mut clip = Clip::from_provider(Arc::new(CompositeFrames { background, clips }), size, false);
        if let Some(duration) = duration {
            clip = clip.with_duration(duration);
        }
        if let Some(fps) = fps {
            clip = clip.with_fps(fps);
        }
        if let Some(mask) = mask {
            clip = clip.attach_mask(mask);
        }
        if !audio_tracks.is_empty() {
            clip = clip.with_audio(AudioClip::composite(audio_tracks)?);
        }
        Ok(clip)
    }
}

/// Opacity of a composite: each clip's mask (opaque when it has none)
/// placed, timed and layered like the clip itself, over zero.
fn composite_mask(clips: &[Clip], background: Option<&Clip>, size: (u32, u32), duration: Option<f64>) -> Clip {
    let placed_mask = |c: &Clip| {
        let mask = match c.mask() {
            Some(mask) => mask.clone(),
            None => c.add_mask().mask().cloned().unwrap_or_else(|| Clip::mask_color(c.size(), 1.0)),
        };
        let mask = mask
            .with_position(c.position().clone(), c.relative_position())
            .with_layer(c.layer())
            .with_start(c.start());
        match c.duration() {
            Some(d) => mask.with_duration(d),
            None => mask,
        }
    };

    let masks: Vec<Clip> = clips.iter().map(placed_mask).collect();
    let background = match background.and_then(Clip::mask) {
        Some(bg_mask) => Background::Clip(bg_mask.clone()),
        None => Background::Color(Frame::new_mask(size.0, size.1, 0.0)),
    };

    let mask = Clip::from_provider(Arc::new(CompositeFrames { background, clips: masks }), size, true);
    match duration {
        Some(d) => mask.with_duration(d),
        None => mask,
    }
}

impl Clip {
    /// Copy of the clip with a fully opaque mask
    pub fn add_mask(&self) -> Clip {
        let mask = if self.has_constant_size() {
            Clip::mask_color(self.size(), 1.0)
        } else {
            Clip::from_provider(
                Arc::new(OnesLike { source: self.provider().clone() }),
                self.size(),
                true,
            )
            .with_variable_size()
        };
        let mask = mask
            .with_position(self.position().clone(), self.relative_position())
            .with_layer(self.layer())
            .with_start(self.start());
        let mask = match self.duration() {
            Some(d) => mask.with_duration(d),
            None => mask,
        };
        self.attach_mask(mask)
    }

    /// The clip drawn over a flat `color` background of `size` (the clip's
    /// own size by default), centered unless `position` says otherwise.
    /// `opacity` makes the background partially transparent.
    ///
    /// A still clip with a still mask gives back a still clip.
    pub fn on_color(
        &self,
        size: Option<(u32, u32)>,
        color: [u8; 3],
        position: Option<Position>,
        opacity: Option<f32>,
    ) -> Result<Clip> {
        let size = size.unwrap_or_else(|| self.size());
        let position = position.unwrap_or_else(|| Anchor::Center.into());

        let mut background = Clip::color(size, color);
        if let Some(d) = self.duration() {
            background = background.with_duration(d);
        }
        if let Some(opacity) = opacity {
            background = background.with_opacity(opacity);
        }

        let composite = CompositeVideoClip::new(vec![background, self.with_position(position, false)])
            .with_size(size)
            .build()?;

        let still = self.is_static() && self.mask().map_or(true, Clip::is_static);
        if !still {
            return Ok(composite);
        }

        let mut clip = composite.to_image_clip(0.0, true, self.duration())?;
        if let Some(fps) = self.fps() {
            clip = clip.with_fps(fps);
        }
        if let Some(audio) = self.audio() {
            clip = clip.with_audio(audio.clone());
        }
        Ok(clip)
    }
}
