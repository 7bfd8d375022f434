use std::sync::Arc;
use tracing::debug;

use crate::{
    audio::AudioClip,
    error::{CompositionError, Result},
    video::{
        clip::{Clip, FrameProvider},
        types::{Alignment, Frame},
    },
};

use super::composite::CompositeVideoClip;

/// How clips of different sizes are joined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConcatMethod {
    /// Frames are played as they are; all clips must share one size
    #[default]
    Chain,
    /// Every frame is centered on a canvas as large as the largest clip
    Compose,
}

/// Clips played back to back
struct ConcatFrames {
    clips: Vec<Clip>,
    /// Start of each clip on the joined timeline
    offsets: Vec<f64>,
    durations: Vec<f64>,
    /// Canvas every frame is padded to, for `Compose`
    canvas: Option<(u32, u32)>,
}

impl ConcatFrames {
    /// Index of the clip playing at `t` and the time inside it
    fn locate(&self, t: f64) -> (usize, f64) {
        let last = self.clips.len() - 1;
        let index = self.offsets.partition_point(|&o| o <= t).saturating_sub(1).min(last);
        let local = (t - self.offsets[index]).clamp(0.0, self.durations[index]);
        (index, local)
    }
}

impl FrameProvider for ConcatFrames {
    fn frame_at(&self, t: f64) -> Result<Frame> {
        let (index, local) = self.locate(t);
        let frame = self.clips[index].get_frame(local)?;
        Ok(match self.canvas {
            Some((width, height)) => frame.fit(width, height, Alignment::Center),
            None => frame,
        })
    }

    fn release(&self) {
        for clip in &self.clips {
            clip.close();
        }
    }

    fn stale_frames(&self) -> usize {
        self.clips.iter().map(Clip::stale_frames).sum()
    }
}

/// Join clips end to end. The result lasts the sum of their durations;
/// at time `t` it shows the clip whose interval contains `t`.
///
/// Masks are joined too (clips without one count as opaque) when any clip
/// has a mask, and each clip's audio is moved to where the clip starts.
pub fn concatenate(clips: &[Clip], method: ConcatMethod) -> Result<Clip> {
    if clips.is_empty() {
        return Err(CompositionError::Empty { operation: "concatenate".to_string() }.into());
    }

    let durations = clips
        .iter()
        .map(|c| c.require_duration("concatenation"))
        .collect::<Result<Vec<f64>>>()?;

    let mut offsets = Vec::with_capacity(clips.len());
    let mut total = 0.0;
    for d in &durations {
        offsets.push(total);
        total += d;
    }

    let (size, canvas) = match method {
        ConcatMethod::Chain => {
            let expected = clips[0].size();
            if let Some(index) = clips.iter().position(|c| c.size() != expected) {
                return Err(CompositionError::SizeMismatch {
                    index,
                    expected,
                    found: clips[index].size(),
                }
                .into());
            }
            (expected, None)
        }
        ConcatMethod::Compose => {
            let width = clips.iter().map(Clip::width).max().unwrap_or(0);
            let height = clips.iter().map(Clip::height).max().unwrap_or(0);
            ((width, height), Some((width, height)))
        }
    };

    let is_mask = clips.iter().all(Clip::is_mask);
    let mask = if clips.iter().any(|c| c.mask().is_some()) {
        let masks: Vec<Clip> = clips
            .iter()
            .zip(&durations)
            .map(|(c, d)| match c.mask() {
                Some(mask) => mask.with_start(0.0).with_duration(*d),
                None => Clip::mask_color(c.size(), 1.0).with_duration(*d),
            })
            .collect();
        Some(concatenate(&masks, method)?)
    } else {
        None
    };

    let audio_tracks: Vec<AudioClip> = clips
        .iter()
        .zip(&offsets)
        .filter_map(|(c, offset)| c.audio().map(|a| a.with_start(*offset)))
        .collect();

    let fps = clips
        .iter()
        .filter_map(Clip::fps)
        .fold(None, |acc: Option<f64>, fps| Some(acc.map_or(fps, |a| a.max(fps))));

    debug!(
        "Concatenating {} clips ({:?}), {}x{}, {:.3} s",
        clips.len(),
        method,
        size.0,
        size.1,
        total
    );

    let provider = ConcatFrames {
        clips: clips.to_vec(),
        offsets,
        durations,
        canvas,
    };
    let mut result = Clip::from_provider(Arc::new(provider), size, is_mask).with_duration(total);
    if let Some(fps) = fps {
        result = result.with_fps(fps);
    }
    if let Some(mask) = mask {
        result = result.attach_mask(mask);
    }
    if !audio_tracks.is_empty() {
        result = result.with_audio(AudioClip::composite(audio_tracks)?);
    }
    Ok(result)
}

/// Arrange a rectangular grid of clips into one clip. Clips of a row are
/// placed left to right and centered vertically in the row; rows are
/// stacked top to bottom. Every row must be equally wide.
pub fn clips_array(grid: &[Vec<Clip>], bg_color: Option<[u8; 3]>) -> Result<Clip> {
    let invalid = |reason: String| CompositionError::InvalidGrid { reason };

    let columns = grid.first().map_or(0, Vec::len);
    if columns == 0 {
        return Err(invalid("grid has no clips".to_string()).into());
    }
    if let Some(row) = grid.iter().position(|r| r.len() != columns) {
        return Err(invalid(format!(
            "row {} has {} clips, expected {}",
            row,
            grid[row].len(),
            columns
        ))
        .into());
    }

    let row_width = |row: &Vec<Clip>| row.iter().map(|c| c.width() as u64).sum::<u64>();
    let width = row_width(&grid[0]);
    if let Some(row) = grid.iter().position(|r| row_width(r) != width) {
        return Err(invalid(format!(
            "row {} is {} pixels wide, expected {}",
            row,
            row_width(&grid[row]),
            width
        ))
        .into());
    }

    let mut placed = Vec::with_capacity(grid.len() * columns);
    let mut y = 0u32;
    for row in grid {
        let row_height = row.iter().map(Clip::height).max().unwrap_or(0);
        let mut x = 0u32;
        for clip in row {
            let top = y + (row_height - clip.height()) / 2;
            placed.push(clip.with_position((x as f64, top as f64), false));
            x += clip.width();
        }
        y += row_height;
    }

    let mut composite = CompositeVideoClip::new(placed).with_size((width as u32, y));
    if let Some(color) = bg_color {
        composite = composite.with_bg_color(color);
    }
    composite.build()
}

impl Clip {
    /// Apply `fx` to the section `[start, end)` only; the parts before and
    /// after are kept as they are.
    pub fn subfx<F>(&self, fx: F, start: f64, end: Option<f64>) -> Result<Clip>
    where
        F: FnOnce(Clip) -> Result<Clip>,
    {
        let duration = self.require_duration("subfx")?;
        let center = fx(self.subclip(start, end)?)?;

        let mut parts = Vec::with_capacity(3);
        if start > 0.0 {
            parts.push(self.subclip(0.0, Some(start))?);
        }
        parts.push(center);
        if let Some(end) = end {
            if end < duration {
                parts.push(self.subclip(end, None)?);
            }
        }

        let size = parts[0].size();
        let method = if parts.iter().all(|p| p.size() == size) {
            ConcatMethod::Chain
        } else {
            ConcatMethod::Compose
        };
        Ok(concatenate(&parts, method)?.with_start(self.start()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ClipError, CompositorError};

    fn ramp(duration: f64, base: u8) -> Clip {
        Clip::from_fn(
            move |t| Ok(Frame::new_filled(2, 2, [base, (10.0 * t).round() as u8, 0])),
            Some(duration),
        )
        .unwrap()
    }

    #[test]
    fn test_chain_partition() {
        let a = ramp(2.0, 1);
        let b = ramp(3.0, 2);
        let joined = concatenate(&[a.clone(), b.clone()], ConcatMethod::Chain).unwrap();

        assert_eq!(joined.duration(), Some(5.0));
        for t in [0.0, 0.5, 1.9] {
            assert_eq!(joined.get_frame(t).unwrap(), a.get_frame(t).unwrap());
        }
        for t in [2.0, 2.5, 4.9, 5.0] {
            assert_eq!(joined.get_frame(t).unwrap(), b.get_frame(t - 2.0).unwrap());
        }
    }

    #[test]
    fn test_chain_accepts_resized_clip() {
        let upscaled = ramp(1.0, 1).image_transform(|f| Ok(f.fit(4, 4, Alignment::TopLeft)), &[]);
        let native = Clip::color((4, 4), [0, 0, 9]).with_duration(1.0);
        let joined = concatenate(&[upscaled, native], ConcatMethod::Chain).unwrap();
        assert_eq!(joined.size(), (4, 4));
        assert_eq!(joined.get_frame(0.5).unwrap().size(), (4, 4));
        assert_eq!(joined.get_frame(1.5).unwrap().get_pixel(3, 3), [0, 0, 9]);
    }

    #[test]
    fn test_chain_rejects_mismatched_sizes() {
        let a = ramp(1.0, 1);
        let b = Clip::color((3, 3), [0, 0, 0]).with_duration(1.0);
        assert!(matches!(
            concatenate(&[a, b], ConcatMethod::Chain),
            Err(CompositorError::Composition(CompositionError::SizeMismatch { index: 1, .. }))
        ));
    }

    #[test]
    fn test_concatenate_requires_durations() {
        let endless = Clip::color((2, 2), [0, 0, 0]);
        assert!(matches!(
            concatenate(&[endless], ConcatMethod::Chain),
            Err(CompositorError::Clip(ClipError::MissingDuration { .. }))
        ));
        assert!(concatenate(&[], ConcatMethod::Chain).is_err());
    }

    #[test]
    fn test_compose_pads_to_largest() {
        let small = Clip::color((2, 2), [255, 0, 0]).with_duration(1.0);
        let large = Clip::color((4, 4), [0, 255, 0]).with_duration(1.0);
        let joined = concatenate(&[small, large], ConcatMethod::Compose).unwrap();

        assert_eq!(joined.size(), (4, 4));
        let first = joined.get_frame(0.5).unwrap();
        assert_eq!(first.size(), (4, 4));
        assert_eq!(first.get_pixel(0, 0), [0, 0, 0]);
        assert_eq!(first.get_pixel(1, 1), [255, 0, 0]);
        assert_eq!(first.get_pixel(2, 2), [255, 0, 0]);
        assert_eq!(joined.get_frame(1.5).unwrap().get_pixel(0, 0), [0, 255, 0]);
    }

    #[test]
    fn test_masks_and_audio_follow_their_clips() {
        let faded = ramp(1.0, 1).with_opacity(0.5);
        let plain = ramp(1.0, 2).with_audio(AudioClip::from_fn(|_, _| 0.25, 1, 100, Some(1.0)));
        let joined = concatenate(&[faded, plain], ConcatMethod::Chain).unwrap();

        let mask = joined.mask().unwrap();
        assert_eq!(mask.duration(), Some(2.0));
        assert_eq!(mask.get_frame(0.5).unwrap().mask_value(0, 0), 0.5);
        assert_eq!(mask.get_frame(1.5).unwrap().mask_value(0, 0), 1.0);

        let audio = joined.audio().unwrap();
        assert_eq!(audio.sample(0.5, 0), 0.0);
        assert_eq!(audio.sample(1.5, 0), 0.25);
    }

    #[test]
    fn test_fps_is_the_maximum() {
        let a = ramp(1.0, 1).with_fps(24.0);
        let b = ramp(1.0, 2).with_fps(30.0);
        let c = ramp(1.0, 3);
        let joined = concatenate(&[a, b, c], ConcatMethod::Chain).unwrap();
        assert_eq!(joined.fps(), Some(30.0));
    }

    #[test]
    fn test_clips_array_quadrants() {
        let tile = |color: [u8; 3]| Clip::color((100, 100), color).with_duration(5.0);
        let a = Clip::from_fn(
            |t| Ok(Frame::new_filled(100, 100, [7, (10.0 * t) as u8, 0])),
            Some(5.0),
        )
        .unwrap();
        let grid = vec![
            vec![a.clone(), tile([0, 255, 0])],
            vec![tile([0, 0, 255]), tile([255, 255, 255])],
        ];
        let array = clips_array(&grid, None).unwrap();

        assert_eq!(array.size(), (200, 200));
        assert_eq!(array.duration(), Some(5.0));
        for t in [0.0, 2.5] {
            let frame = array.get_frame(t).unwrap();
            let expected = a.get_frame(t).unwrap();
            for (x, y) in [(0, 0), (50, 50), (99, 99)] {
                assert_eq!(frame.get_pixel(x, y), expected.get_pixel(x, y));
            }
            assert_eq!(frame.get_pixel(150, 50), [0, 255, 0]);
            assert_eq!(frame.get_pixel(50, 150), [0, 0, 255]);
            assert_eq!(frame.get_pixel(150, 150), [255, 255, 255]);
        }
    }

    #[test]
    fn test_clips_array_centers_short_clips_in_row() {
        let tall = Clip::color((2, 4), [255, 0, 0]).with_duration(1.0);
        let short = Clip::color((2, 2), [0, 255, 0]).with_duration(1.0);
        let array = clips_array(&[vec![tall, short]], Some([9, 9, 9])).unwrap();

        assert_eq!(array.size(), (4, 4));
        let frame = array.get_frame(0.0).unwrap();
        assert_eq!(frame.get_pixel(2, 0), [9, 9, 9]);
        assert_eq!(frame.get_pixel(2, 1), [0, 255, 0]);
        assert_eq!(frame.get_pixel(3, 2), [0, 255, 0]);
        assert_eq!(frame.get_pixel(2, 3), [9, 9, 9]);
    }

    #[test]
    fn test_clips_array_rejects_bad_grids() {
        let clip = |w: u32| Clip::color((w, 2), [0, 0, 0]).with_duration(1.0);
        let ragged = vec![vec![clip(2), clip(2)], vec![clip(4)]];
        assert!(matches!(
            clips_array(&ragged, None),
            Err(CompositorError::Composition(CompositionError::InvalidGrid { .. }))
        ));

        let uneven = vec![vec![clip(2), clip(2)], vec![clip(2), clip(3)]];
        assert!(matches!(
            clips_array(&uneven, None),
            Err(CompositorError::Composition(CompositionError::InvalidGrid { .. }))
        ));

        assert!(clips_array(&[], None).is_err());
    }

    #[test]
    fn test_subfx_only_touches_the_section() {
        let clip = ramp(3.0, 5);
        let inverted = clip
            .subfx(
                |section| {
                    Ok(section.image_transform(|f| Ok(Frame::new_filled(f.width(), f.height(), [0, 0, 0])), &[]))
                },
                1.0,
                Some(2.0),
            )
            .unwrap();

        assert_eq!(inverted.duration(), Some(3.0));
        assert_eq!(inverted.get_frame(0.5).unwrap(), clip.get_frame(0.5).unwrap());
        assert_eq!(inverted.get_frame(1.5).unwrap().get_pixel(0, 0), [0, 0, 0]);
        assert_eq!(inverted.get_frame(2.5).unwrap(), clip.get_frame(2.5).unwrap());
    }
}
