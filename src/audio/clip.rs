//! Time-indexed audio.
//!
//! An [`AudioClip`] is the audio counterpart of a video clip: a cheap handle
//! over a shared [`SampleSource`], placed on a parent timeline by `start`.
//! Sub-clips, offsets and mixes are built without copying samples.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::{
    audio::{loader::AudioLoader, types::AudioData},
    config::BinaryConfig,
    error::{ClipError, CompositionError, ExportError, Result},
    video::clip::TimeFn,
};

/// Produces sample values as a function of time
pub trait SampleSource: Send + Sync {
    /// Sample of `channel` at `t` seconds, in `[-1, 1]`
    fn value(&self, t: f64, channel: usize) -> f32;
}

struct DataSamples {
    data: AudioData,
}

impl SampleSource for DataSamples {
    fn value(&self, t: f64, channel: usize) -> f32 {
        self.data.sample_at_time(t, channel)
    }
}

struct FnSamples<F> {
    f: F,
}

impl<F> SampleSource for FnSamples<F>
where
    F: Fn(f64, usize) -> f32 + Send + Sync,
{
    fn value(&self, t: f64, channel: usize) -> f32 {
        (self.f)(t, channel)
    }
}

struct TimeMappedSamples {
    source: Arc<dyn SampleSource>,
    map: Arc<TimeFn>,
}

impl SampleSource for TimeMappedSamples {
    fn value(&self, t: f64, channel: usize) -> f32 {
        self.source.value((self.map)(t), channel)
    }
}

/// Sum of the clips playing at each instant
struct MixedSamples {
    clips: Vec<AudioClip>,
}

impl SampleSource for MixedSamples {
    fn value(&self, t: f64, channel: usize) -> f32 {
        self.clips
            .iter()
            .filter(|clip| clip.is_playing(t))
            .map(|clip| clip.sample(t - clip.start, channel))
            .sum()
    }
}

/// Audio as a function of time
#[derive(Clone)]
pub struct AudioClip {
    source: Arc<dyn SampleSource>,
    n_channels: u16,
    /// Native sample rate, used when no rate is given for export
    fps: u32,
    duration: Option<f64>,
    start: f64,
    end: Option<f64>,
}

impl fmt::Debug for AudioClip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioClip")
            .field("n_channels", &self.n_channels)
            .field("fps", &self.fps)
            .field("duration", &self.duration)
            .field("start", &self.start)
            .field("end", &self.end)
            .finish()
    }
}

impl AudioClip {
    fn from_source(source: Arc<dyn SampleSource>, n_channels: u16, fps: u32, duration: Option<f64>) -> Self {
        Self {
            source,
            n_channels: n_channels.max(1),
            fps,
            duration,
            start: 0.0,
            end: duration,
        }
    }

    /// Clip over decoded samples
    pub fn from_data(data: AudioData) -> Self {
        let (channels, rate, duration) = (data.channels, data.sample_rate, data.duration);
        Self::from_source(Arc::new(DataSamples { data }), channels, rate, Some(duration))
    }

    /// Procedural clip; `f(t, channel)` gives the sample value
    pub fn from_fn<F>(f: F, n_channels: u16, fps: u32, duration: Option<f64>) -> Self
    where
        F: Fn(f64, usize) -> f32 + Send + Sync + 'static,
    {
        Self::from_source(Arc::new(FnSamples { f }), n_channels, fps, duration)
    }

    /// Load an audio file (wav, mp3, flac, ogg, m4a, aac)
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::from_data(AudioLoader::load(path)?))
    }

    /// Audio track of any media file, decoded by ffmpeg
    pub fn from_media_file<P: AsRef<Path>>(
        path: P,
        fps: u32,
        n_channels: u16,
        binaries: &BinaryConfig,
    ) -> Result<Self> {
        Ok(Self::from_data(AudioLoader::load_with_ffmpeg(path, fps, n_channels, binaries)?))
    }

    /// Mix of `clips`, each placed at its own `start`. Gaps are silent.
    pub fn composite(clips: Vec<AudioClip>) -> Result<Self> {
        if clips.is_empty() {
            return Err(CompositionError::Empty { operation: "audio composite".to_string() }.into());
        }
        let n_channels = clips.iter().map(|c| c.n_channels).max().unwrap_or(1);
        let fps = clips.iter().map(|c| c.fps).max().unwrap_or(0);
        let duration = clips
            .iter()
            .map(|c| c.end)
            .try_fold(0.0_f64, |acc, end| end.map(|e| acc.max(e)));

        Ok(Self::from_source(Arc::new(MixedSamples { clips }), n_channels, fps, duration))
    }

    /// Clips played one after the other
    pub fn concatenate(clips: &[AudioClip]) -> Result<Self> {
        let mut placed = Vec::with_capacity(clips.len());
        let mut offset = 0.0;
        for clip in clips {
            let duration = clip.duration.ok_or_else(|| ClipError::MissingDuration {
                operation: "audio concatenation".to_string(),
            })?;
            placed.push(clip.with_start(offset));
            offset += duration;
        }
        Self::composite(placed)
    }

    pub fn n_channels(&self) -> u16 {
        self.n_channels
    }

    pub fn fps(&self) -> u32 {
        self.fps
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

    /// Whether the clip sounds at parent time `t`
    pub fn is_playing(&self, t: f64) -> bool {
        t >= self.start && self.end.map_or(true, |end| t < end)
    }

    /// Sample at clip-local time `t`; silence outside `[0, duration)`
    pub fn sample(&self, t: f64, channel: usize) -> f32 {
        let outside = !t.is_finite() || t < 0.0 || self.duration.map_or(false, |d| t >= d);
        if outside {
            return 0.0;
        }
        let channel = channel.min(self.n_channels as usize - 1);
        self.source.value(t, channel)
    }

    /// `n` interleaved sample frames starting at local time `start`
    pub fn chunk(&self, start: f64, n: usize, rate: u32) -> Vec<f32> {
        let channels = self.n_channels as usize;
        let mut out = Vec::with_capacity(n * channels);
        for i in 0..n {
            let t = start + i as f64 / rate as f64;
            for channel in 0..channels {
                out.push(self.sample(t, channel));
            }
        }
        out
    }

    pub fn with_start(&self, t: f64) -> AudioClip {
        let mut clip = self.clone();
        clip.start = t;
        clip.end = self.duration.map(|d| t + d);
        clip
    }

    pub fn with_duration(&self, duration: f64) -> AudioClip {
        let mut clip = self.clone();
        clip.duration = Some(duration);
        clip.end = Some(self.start + duration);
        clip
    }

    /// Section `[start, end)` re-indexed to begin at zero
    pub fn subclip(&self, start: f64, end: Option<f64>) -> Result<AudioClip> {
        let invalid = || ClipError::InvalidRange { start, end, duration: self.duration };
        if !start.is_finite() || start < 0.0 || self.duration.map_or(false, |d| start > d) {
            return Err(invalid().into());
        }
        if let Some(end) = end {
            if !end.is_finite() || end <= start || self.duration.map_or(false, |d| end > d) {
                return Err(invalid().into());
            }
        }

        let new_duration = end.or(self.duration).map(|e| e - start);
        let mut clip = self.time_transform(move |t| t + start);
        clip.start = 0.0;
        clip.duration = new_duration;
        clip.end = new_duration;
        Ok(clip)
    }

    /// Clip whose sample at `t` is the original sample at `f(t)`
    pub fn time_transform<F>(&self, f: F) -> AudioClip
    where
        F: Fn(f64) -> f64 + Send + Sync + 'static,
    {
        self.time_transform_shared(Arc::new(f))
    }

    pub(crate) fn time_transform_shared(&self, map: Arc<TimeFn>) -> AudioClip {
        let mut clip = self.clone();
        clip.source = Arc::new(TimeMappedSamples {
            source: self.source.clone(),
            map,
        });
        clip
    }

    /// Render the whole clip at `fps`
    pub fn to_audio_data(&self, fps: Option<u32>) -> Result<AudioData> {
        let duration = self.duration.ok_or_else(|| ClipError::MissingDuration {
            operation: "audio rendering".to_string(),
        })?;
        let fps = fps.unwrap_or(self.fps);
        if fps == 0 {
            return Err(ClipError::MissingFps { operation: "audio rendering".to_string() }.into());
        }
        let n = (duration * fps as f64 - 1e-6).ceil().max(0.0) as usize;
        Ok(AudioData::new(self.chunk(0.0, n, fps), fps, self.n_channels))
    }

    /// Write 16-bit PCM WAV at `fps` (the clip's own rate when `None`)
    pub fn write_wav<P: AsRef<Path>>(&self, path: P, fps: Option<u32>) -> Result<()> {
        let path = path.as_ref();
        let data = self.to_audio_data(fps)?;
        debug!(
            "Writing {} audio frames to {}",
            data.frame_count(),
            path.display()
        );

        let spec = hound::WavSpec {
            channels: data.channels,
            sample_rate: data.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let encoding = |e: hound::Error| ExportError::EncodingFailed { reason: e.to_string() };

        let mut writer = hound::WavWriter::create(path, spec).map_err(encoding)?;
        for sample in &data.samples {
            let value = (sample.clamp(-1.0, 1.0) * 32767.0).round() as i16;
            writer.write_sample(value).map_err(encoding)?;
        }
        writer.finalize().map_err(encoding)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn constant(value: f32, duration: f64) -> AudioClip {
        AudioClip::from_fn(move |_, _| value, 1, 100, Some(duration))
    }

    #[test]
    fn test_sample_outside_duration_is_silent() {
        let clip = constant(0.5, 1.0);
        assert_eq!(clip.sample(0.0, 0), 0.5);
        assert_eq!(clip.sample(0.99, 0), 0.5);
        assert_eq!(clip.sample(1.0, 0), 0.0);
        assert_eq!(clip.sample(-0.1, 0), 0.0);
    }

    #[test]
    fn test_concatenate_places_clips_end_to_end() {
        let joined = AudioClip::concatenate(&[constant(0.25, 1.0), constant(0.5, 2.0)]).unwrap();
        assert_eq!(joined.duration(), Some(3.0));
        assert_eq!(joined.sample(0.5, 0), 0.25);
        assert_eq!(joined.sample(1.5, 0), 0.5);
        assert_eq!(joined.sample(2.99, 0), 0.5);
    }

    #[test]
    fn test_composite_with_gap_is_silent_in_gap() {
        let mixed = AudioClip::composite(vec![
            constant(0.25, 1.0),
            constant(0.5, 1.0).with_start(2.0),
        ])
        .unwrap();
        assert_eq!(mixed.duration(), Some(3.0));
        assert_eq!(mixed.sample(0.5, 0), 0.25);
        assert_eq!(mixed.sample(1.5, 0), 0.0);
        assert_eq!(mixed.sample(2.5, 0), 0.5);
    }

    #[test]
    fn test_composite_overlap_sums() {
        let mixed = AudioClip::composite(vec![constant(0.25, 2.0), constant(0.5, 2.0).with_start(1.0)]).unwrap();
        assert_eq!(mixed.sample(1.5, 0), 0.75);
    }

    #[test]
    fn test_subclip_and_chunk() {
        let ramp = AudioClip::from_fn(|t, _| t as f32 / 10.0, 2, 10, Some(10.0));
        let sub = ramp.subclip(2.0, Some(4.0)).unwrap();
        assert_eq!(sub.duration(), Some(2.0));

        let chunk = sub.chunk(0.0, 3, 10);
        assert_eq!(chunk.len(), 6);
        assert!((chunk[0] - 0.2).abs() < 1e-6);
        assert!((chunk[4] - 0.22).abs() < 1e-6);

        assert!(ramp.subclip(4.0, Some(3.0)).is_err());
        assert!(ramp.subclip(1.0, Some(11.0)).is_err());
    }

    #[test]
    fn test_write_wav_reads_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.wav");

        constant(0.5, 0.5).write_wav(&path, Some(8000)).unwrap();

        let data = AudioLoader::load(&path).unwrap();
        assert_eq!(data.sample_rate, 8000);
        assert_eq!(data.channels, 1);
        assert_eq!(data.frame_count(), 4000);
        assert!((data.samples[100] - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_to_audio_data_requires_duration() {
        let endless = AudioClip::from_fn(|_, _| 0.0, 1, 100, None);
        assert!(endless.to_audio_data(None).is_err());
    }
}
