use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Decoded audio held in memory
#[derive(Debug, Clone)]
pub struct AudioData {
    /// Interleaved samples in `[-1, 1]`
    pub samples: Vec<f32>,

    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Number of channels (1 = mono, 2 = stereo)
    pub channels: u16,

    /// Duration in seconds
    pub duration: f64,

    /// Source file, empty for generated audio
    pub file_path: PathBuf,

    pub format: AudioFormat,
}

impl AudioData {
    /// Generated audio with no backing file
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        let channels = channels.max(1);
        let duration = if sample_rate == 0 {
            0.0
        } else {
            samples.len() as f64 / (sample_rate as f64 * channels as f64)
        };
        Self {
            samples,
            sample_rate,
            channels,
            duration,
            file_path: PathBuf::new(),
            format: AudioFormat::raw(),
        }
    }

    /// Number of sample frames (one sample per channel each)
    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    /// Get samples for a specific channel (0-based)
    pub fn channel_samples(&self, channel: usize) -> Vec<f32> {
        if self.channels == 1 || channel >= self.channels as usize {
            return self.samples.clone();
        }

        self.samples
            .iter()
            .skip(channel)
            .step_by(self.channels as usize)
            .copied()
            .collect()
    }

    /// Sample of `channel` at `time` seconds; silence outside the data
    pub fn sample_at_time(&self, time: f64, channel: usize) -> f32 {
        if time < 0.0 || !time.is_finite() {
            return 0.0;
        }
        let channels = self.channels as usize;
        let channel = channel.min(channels.saturating_sub(1));
        let sample_index = (time * self.sample_rate as f64) as usize;
        self.samples
            .get(sample_index * channels + channel)
            .copied()
            .unwrap_or(0.0)
    }

    /// Get time in seconds for a sample index
    pub fn time_for_sample(&self, sample_index: usize) -> f64 {
        sample_index as f64 / self.sample_rate as f64
    }
}

/// Audio file format information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// File extension (wav, mp3, flac, etc.)
    pub extension: String,

    /// Bit depth (16, 24, 32, etc.)
    pub bit_depth: Option<u16>,

    /// Compression type (if any)
    pub compression: Option<String>,

    /// Bitrate for compressed formats
    pub bitrate: Option<u32>,
}

impl AudioFormat {
    /// Uncompressed 32-bit float samples
    pub fn raw() -> Self {
        Self {
            extension: "raw".to_string(),
            bit_depth: Some(32),
            compression: None,
            bitrate: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_from_samples() {
        let data = AudioData::new(vec![0.0; 44100 * 2], 44100, 2);
        assert_eq!(data.duration, 1.0);
        assert_eq!(data.frame_count(), 44100);
    }

    #[test]
    fn test_channel_samples() {
        let data = AudioData::new(vec![0.1, -0.1, 0.2, -0.2], 2, 2);
        assert_eq!(data.channel_samples(0), vec![0.1, 0.2]);
        assert_eq!(data.channel_samples(1), vec![-0.1, -0.2]);
    }

    #[test]
    fn test_sample_at_time_outside_data_is_silent() {
        let data = AudioData::new(vec![0.5, 0.25], 2, 1);
        assert_eq!(data.sample_at_time(0.0, 0), 0.5);
        assert_eq!(data.sample_at_time(0.5, 0), 0.25);
        assert_eq!(data.sample_at_time(1.0, 0), 0.0);
        assert_eq!(data.sample_at_time(-1.0, 0), 0.0);
    }
}
