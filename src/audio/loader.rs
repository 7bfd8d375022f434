use std::fs::File;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::{debug, warn};

use symphonia::core::audio::{AudioBuffer, AudioBufferRef, Signal};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::sample::Sample;

use crate::audio::types::{AudioData, AudioFormat};
use crate::config::BinaryConfig;
use crate::error::{AudioError, ReaderError, Result};

/// Decodes sound files into interleaved `f32` samples
pub struct AudioLoader;

fn load_failed(path: &Path) -> AudioError {
    AudioError::LoadFailed {
        path: path.display().to_string(),
    }
}

impl AudioLoader {
    /// Decode a sound file picked by its extension. WAV goes through hound,
    /// compressed formats through symphonia.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<AudioData> {
        let path = path.as_ref();
        let extension = Self::detect_format(path).unwrap_or_default();

        match extension.as_str() {
            "wav" => Self::load_wav(path),
            "mp3" | "flac" | "ogg" | "m4a" | "aac" => Self::load_with_symphonia(path),
            _ => Err(AudioError::UnsupportedFormat { format: extension }.into()),
        }
    }

    fn load_wav(path: &Path) -> Result<AudioData> {
        let reader = hound::WavReader::open(path).map_err(|_| load_failed(path))?;
        let spec = reader.spec();

        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<std::result::Result<Vec<f32>, _>>()
                .map_err(|_| load_failed(path))?,
            hound::SampleFormat::Int => reader
                .into_samples::<i32>()
                .map(|s| s.map(|s| Self::int_to_float(s, spec.bits_per_sample)))
                .collect::<std::result::Result<Vec<f32>, _>>()
                .map_err(|_| load_failed(path))?,
        };

        Ok(AudioData {
            duration: samples.len() as f64 / (spec.sample_rate * spec.channels as u32) as f64,
            samples,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            file_path: path.to_path_buf(),
            format: AudioFormat {
                extension: "wav".to_string(),
                bit_depth: Some(spec.bits_per_sample),
                compression: None,
                bitrate: None,
            },
        })
    }

    fn load_with_symphonia(path: &Path) -> Result<AudioData> {
        let file = File::open(path).map_err(|_| load_failed(path))?;
        let source = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(extension);
        }

        let mut format = symphonia::default::get_probe()
            .format(&hint, source, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|_| load_failed(path))?
            .format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| load_failed(path))?;
        let track_id = track.id;
        // Copied out: the decode loop borrows `format` mutably
        let params = track.codec_params.clone();

        let sample_rate = params.sample_rate.ok_or_else(|| AudioError::InvalidParameters {
            details: format!("{} has no sample rate", path.display()),
        })?;
        let channels = params
            .channels
            .ok_or_else(|| AudioError::InvalidParameters {
                details: format!("{} has no channel layout", path.display()),
            })?
            .count() as u16;

        let mut decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|_| load_failed(path))?;

        let mut samples = Vec::new();
        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::ResetRequired) => {
                    decoder.reset();
                    continue;
                }
                // Unexpected EOF is how symphonia reports the end of the stream
                Err(SymphoniaError::IoError(_)) => break,
                Err(e) => {
                    warn!("Stopped reading {} early: {}", path.display(), e);
                    break;
                }
            };

            while !format.metadata().is_latest() {
                format.metadata().pop();
            }
            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(decoded) => Self::convert_audio_buffer_to_f32(&decoded, &mut samples),
                Err(SymphoniaError::DecodeError(e)) => {
                    debug!("Dropped corrupt packet in {}: {}", path.display(), e);
                }
                Err(SymphoniaError::IoError(_)) => break,
                Err(e) => {
                    warn!("Stopped decoding {} early: {}", path.display(), e);
                    break;
                }
            }
        }

        Ok(AudioData {
            duration: samples.len() as f64 / (sample_rate * channels as u32) as f64,
            samples,
            sample_rate,
            channels,
            file_path: path.to_path_buf(),
            format: AudioFormat {
                extension: Self::detect_format(path).unwrap_or_else(|| "unknown".to_string()),
                bit_depth: params.bits_per_sample.map(|b| b as u16),
                compression: Some(format!("{:?}", params.codec)),
                bitrate: None,
            },
        })
    }

    /// Decode the audio track of any file ffmpeg can read (including video
    /// containers), resampled to `sample_rate` with `channels` channels
    pub fn load_with_ffmpeg<P: AsRef<Path>>(
        path: P,
        sample_rate: u32,
        channels: u16,
        binaries: &BinaryConfig,
    ) -> Result<AudioData> {
        let path = path.as_ref();
        if sample_rate == 0 || channels == 0 {
            return Err(AudioError::InvalidParameters {
                details: format!("sample rate {} with {} channels", sample_rate, channels),
            }
            .into());
        }

        let args = Self::ffmpeg_args(path, sample_rate, channels);
        debug!("{} {}", binaries.ffmpeg, args.join(" "));

        let output = Command::new(&binaries.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| ReaderError::SpawnFailed {
                binary: binaries.ffmpeg.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            debug!("ffmpeg audio decode failed: {}", String::from_utf8_lossy(&output.stderr));
            return Err(AudioError::LoadFailed {
                path: path.display().to_string(),
            }
            .into());
        }

        let samples: Vec<f32> = output
            .stdout
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        let mut data = AudioData::new(samples, sample_rate, channels);
        data.file_path = path.to_path_buf();
        data.format.extension = Self::detect_format(path).unwrap_or_else(|| "unknown".to_string());
        Ok(data)
    }

    fn ffmpeg_args(path: &Path, sample_rate: u32, channels: u16) -> Vec<String> {
        vec![
            "-i".to_string(),
            path.display().to_string(),
            "-vn".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-f".to_string(),
            "f32le".to_string(),
            "-acodec".to_string(),
            "pcm_f32le".to_string(),
            "-ar".to_string(),
            sample_rate.to_string(),
            "-ac".to_string(),
            channels.to_string(),
            "-".to_string(),
        ]
    }

    /// Convert integer sample to float (-1.0 to 1.0)
    fn int_to_float(sample: i32, bit_depth: u16) -> f32 {
        match bit_depth {
            // hound already re-centers unsigned 8-bit data
            8 => sample as f32 / 128.0,
            16 => sample as f32 / 32768.0,
            24 => sample as f32 / 8388608.0,
            32 => sample as f32 / 2147483648.0,
            _ => sample as f32 / 32768.0,
        }
    }

    /// Convert Symphonia audio buffer to f32 samples
    fn convert_audio_buffer_to_f32(buffer: &AudioBufferRef, output: &mut Vec<f32>) {
        match buffer {
            AudioBufferRef::F32(buf) => Self::interleave(&**buf, output, |s| s),
            AudioBufferRef::F64(buf) => Self::interleave(&**buf, output, |s| s as f32),
            AudioBufferRef::S32(buf) => {
                Self::interleave(&**buf, output, |s| s as f32 / 2147483648.0)
            }
            AudioBufferRef::S16(buf) => Self::interleave(&**buf, output, |s| s as f32 / 32768.0),
            AudioBufferRef::U8(buf) => {
                Self::interleave(&**buf, output, |s| (s as f32 - 128.0) / 128.0)
            }
            _ => {
                warn!("Dropped packet with unhandled sample format");
            }
        }
    }

    /// Append planar channels as interleaved samples
    fn interleave<S: Sample>(
        buf: &AudioBuffer<S>,
        output: &mut Vec<f32>,
        convert: impl Fn(S) -> f32,
    ) {
        let channels = buf.spec().channels.count();
        output.reserve(buf.frames() * channels);
        for frame_idx in 0..buf.frames() {
            for ch in 0..channels {
                output.push(convert(buf.chan(ch)[frame_idx]));
            }
        }
    }

    /// Lowercased extension of `path`
    pub fn detect_format<P: AsRef<Path>>(path: P) -> Option<String> {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase())
    }

    /// Whether `load` can decode files with this extension
    pub fn is_format_supported(extension: &str) -> bool {
        matches!(
            extension.to_lowercase().as_str(),
            "wav" | "mp3" | "flac" | "ogg" | "m4a" | "aac"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_format_detection() {
        assert_eq!(AudioLoader::detect_format("test.wav"), Some("wav".to_string()));
        assert_eq!(AudioLoader::detect_format("test.MP3"), Some("mp3".to_string()));
        assert_eq!(AudioLoader::detect_format("test"), None);
    }

    #[test]
    fn test_format_support() {
        assert!(AudioLoader::is_format_supported("wav"));
        assert!(AudioLoader::is_format_supported("mp3"));
        assert!(AudioLoader::is_format_supported("FLAC"));
        assert!(!AudioLoader::is_format_supported("xyz"));
    }

    #[test]
    fn test_int_to_float_conversion() {
        assert_eq!(AudioLoader::int_to_float(0, 16), 0.0);
        assert_eq!(AudioLoader::int_to_float(32767, 16), 32767.0 / 32768.0);
        assert_eq!(AudioLoader::int_to_float(-32768, 16), -1.0);

        // 8-bit samples arrive signed from hound
        assert_eq!(AudioLoader::int_to_float(0, 8), 0.0);
        assert_eq!(AudioLoader::int_to_float(127, 8), 127.0 / 128.0);
        assert_eq!(AudioLoader::int_to_float(-128, 8), -1.0);
    }

    #[test]
    fn test_ffmpeg_args_request_float_pcm() {
        let args = AudioLoader::ffmpeg_args(Path::new("clip.mp4"), 22050, 2);
        assert_eq!(args[1], "clip.mp4");
        assert!(args.windows(2).any(|w| w[0] == "-f" && w[1] == "f32le"));
        assert!(args.windows(2).any(|w| w[0] == "-ar" && w[1] == "22050"));
        assert!(args.windows(2).any(|w| w[0] == "-ac" && w[1] == "2"));
        assert_eq!(args.last().map(String::as_str), Some("-"));
    }

    #[test]
    fn test_wav_roundtrip_through_hound() {
        let temp_dir = tempdir().unwrap();
        let file_path = temp_dir.path().join("tone.wav");

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&file_path, spec).unwrap();
        for i in 0..8000 {
            writer.write_sample(if i % 2 == 0 { 16384i16 } else { -16384 }).unwrap();
        }
        writer.finalize().unwrap();

        let data = AudioLoader::load(&file_path).unwrap();
        assert_eq!(data.sample_rate, 8000);
        assert_eq!(data.channels, 1);
        assert_eq!(data.duration, 1.0);
        assert_eq!(data.samples[0], 0.5);
        assert_eq!(data.samples[1], -0.5);
    }

    #[test]
    fn test_float_stereo_wav() {
        let temp_dir = tempdir().unwrap();
        let file_path = temp_dir.path().join("stereo.wav");

        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 4000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(&file_path, spec).unwrap();
        for _ in 0..2000 {
            writer.write_sample(0.25f32).unwrap();
            writer.write_sample(-0.75f32).unwrap();
        }
        writer.finalize().unwrap();

        let data = AudioLoader::load(&file_path).unwrap();
        assert_eq!(data.channels, 2);
        assert_eq!(data.duration, 0.5);
        assert_eq!(data.format.bit_depth, Some(32));
        assert_eq!(&data.samples[..2], &[0.25, -0.75]);
    }

    #[test]
    fn test_missing_file_reports_path() {
        let temp_dir = tempdir().unwrap();
        let file_path = temp_dir.path().join("absent.flac");

        match AudioLoader::load(&file_path) {
            Err(crate::error::CompositorError::Audio(AudioError::LoadFailed { path })) => {
                assert!(path.ends_with("absent.flac"));
            }
            other => panic!("Expected LoadFailed, got {:?}", other.map(|d| d.duration)),
        }
    }

    #[test]
    fn test_unsupported_format() {
        let temp_dir = tempdir().unwrap();
        let file_path = temp_dir.path().join("test.xyz");

        let mut file = File::create(&file_path).unwrap();
        file.write_all(b"dummy content").unwrap();

        let result = AudioLoader::load(&file_path);
        assert!(result.is_err());

        if let Err(crate::error::CompositorError::Audio(AudioError::UnsupportedFormat { format })) = result {
            assert_eq!(format, "xyz");
        } else {
            panic!("Expected UnsupportedFormat error");
        }
    }
}