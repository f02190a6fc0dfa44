//! Audio decoding using symphonia
//!
//! Decodes the supported formats (MP3, FLAC, AAC, Vorbis, WAV) and
//! normalizes everything to the standard in-memory format: 44.1 kHz stereo
//! f32. Decoding happens once per load; the render path never touches a
//! codec.

use crate::audio::resampler::resample_to_standard;
use crate::audio::types::TrackBuffer;
use std::path::Path;
use stillpoint_common::{EngineError, Result, TrackMetadata};
use symphonia::core::audio::{AudioBuffer, AudioBufferRef, Signal};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, StandardTagKey};
use symphonia::core::probe::Hint;
use symphonia::core::sample::Sample;
use tracing::{debug, warn};

/// Track decoder
///
/// Stateless; each call opens, probes and decodes one file.
pub struct TrackDecoder;

/// Raw decode result before normalization
struct DecodedAudio {
    /// Interleaved samples at the source channel layout
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
    bit_depth: Option<u32>,
    title: Option<String>,
    artist: Option<String>,
}

impl TrackDecoder {
    /// Decode a file and normalize it to a [`TrackBuffer`], returning the
    /// buffer together with the source metadata.
    ///
    /// Mono sources are upmixed by channel duplication; sources with more
    /// than two channels keep their front pair. Non-44.1 kHz sources are
    /// resampled once, here.
    pub fn decode_normalized(path: &Path) -> Result<(TrackBuffer, TrackMetadata)> {
        let decoded = Self::decode_file(path)?;

        let stereo = normalize_channels(decoded.samples, decoded.channels);
        let normalized = resample_to_standard(&stereo, decoded.sample_rate, 2)?;
        let buffer = TrackBuffer::new(normalized);

        let metadata = TrackMetadata {
            duration: buffer.duration_seconds(),
            sample_rate: decoded.sample_rate,
            channels: decoded.channels,
            bit_depth: decoded.bit_depth,
            title: decoded.title,
            artist: decoded.artist,
        };

        debug!(
            "Normalized {}: {:.2}s, {}Hz/{}ch source",
            path.display(),
            metadata.duration,
            metadata.sample_rate,
            metadata.channels
        );

        Ok((buffer, metadata))
    }

    /// Decode an entire file to interleaved f32 at its source format
    fn decode_file(path: &Path) -> Result<DecodedAudio> {
        debug!("Decoding file: {}", path.display());

        let file = std::fs::File::open(path).map_err(|e| EngineError::FileLoad {
            reason: format!("failed to open {}: {}", path.display(), e),
        })?;

        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let format_opts = FormatOptions::default();
        let metadata_opts = MetadataOptions::default();

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &format_opts, &metadata_opts)
            .map_err(|e| EngineError::FileLoad {
                reason: format!("failed to probe format: {e}"),
            })?;

        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| EngineError::FileLoad {
                reason: "no audio track found".into(),
            })?;

        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let sample_rate = codec_params.sample_rate.ok_or_else(|| EngineError::InvalidFormat {
            reason: "sample rate not reported".into(),
        })?;
        let channels = codec_params
            .channels
            .map(|c| c.count() as u16)
            .ok_or_else(|| EngineError::InvalidFormat {
                reason: "channel count not reported".into(),
            })?;
        let bit_depth = codec_params.bits_per_sample;

        let (title, artist) = read_tags(format.metadata().current());

        let decoder_opts = DecoderOptions::default();
        let mut decoder = symphonia::default::get_codecs()
            .make(&codec_params, &decoder_opts)
            .map_err(|e| EngineError::FileLoad {
                reason: format!("failed to create decoder: {e}"),
            })?;

        let mut samples = Vec::new();

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(symphonia::core::errors::Error::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(e) => {
                    warn!("error reading packet: {}", e);
                    break;
                }
            };

            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(decoded) => convert_samples_to_f32(&decoded, &mut samples),
                Err(e) => {
                    // Skip undecodable packets; a fully corrupt stream just
                    // produces an empty buffer, rejected below.
                    warn!("decode error: {}", e);
                    continue;
                }
            }
        }

        if samples.is_empty() {
            return Err(EngineError::FileLoad {
                reason: format!("no decodable audio in {}", path.display()),
            });
        }

        debug!(
            "Decoded {} samples ({} frames)",
            samples.len(),
            samples.len() / channels as usize
        );

        Ok(DecodedAudio {
            samples,
            sample_rate,
            channels,
            bit_depth,
            title,
            artist,
        })
    }
}

/// Pull title/artist tags out of the container metadata, if any
fn read_tags(
    revision: Option<&symphonia::core::meta::MetadataRevision>,
) -> (Option<String>, Option<String>) {
    let mut title = None;
    let mut artist = None;
    if let Some(revision) = revision {
        for tag in revision.tags() {
            match tag.std_key {
                Some(StandardTagKey::TrackTitle) => title = Some(tag.value.to_string()),
                Some(StandardTagKey::Artist) => artist = Some(tag.value.to_string()),
                _ => {}
            }
        }
    }
    (title, artist)
}

/// Convert a decoded symphonia buffer to interleaved f32 samples
///
/// Handles every sample layout symphonia produces, normalizing integer
/// formats into [-1.0, 1.0].
fn convert_samples_to_f32(decoded: &AudioBufferRef, output: &mut Vec<f32>) {
    match decoded {
        AudioBufferRef::F32(buf) => interleave_planar(buf, output, |s| s),
        AudioBufferRef::F64(buf) => interleave_planar(buf, output, |s| s as f32),
        AudioBufferRef::S32(buf) => {
            interleave_planar(buf, output, |s| s as f32 / i32::MAX as f32)
        }
        AudioBufferRef::S16(buf) => {
            interleave_planar(buf, output, |s| f32::from(s) / f32::from(i16::MAX))
        }
        AudioBufferRef::S8(buf) => {
            interleave_planar(buf, output, |s| f32::from(s) / f32::from(i8::MAX))
        }
        AudioBufferRef::U32(buf) => interleave_planar(buf, output, |s| {
            (s as i64 - 2_147_483_648) as f32 / 2_147_483_648.0
        }),
        AudioBufferRef::U16(buf) => {
            interleave_planar(buf, output, |s| (i32::from(s) - 32_768) as f32 / 32_768.0)
        }
        AudioBufferRef::U8(buf) => {
            interleave_planar(buf, output, |s| (i32::from(s) - 128) as f32 / 128.0)
        }
        AudioBufferRef::S24(buf) => interleave_planar(buf, output, |s| {
            s.inner() as f32 / 8_388_608.0
        }),
        AudioBufferRef::U24(buf) => interleave_planar(buf, output, |s| {
            (s.inner() as i32 - 8_388_608) as f32 / 8_388_608.0
        }),
    }
}

/// Interleave a planar symphonia buffer, converting each sample with `convert`
fn interleave_planar<S: Sample + Copy>(
    buf: &AudioBuffer<S>,
    output: &mut Vec<f32>,
    convert: impl Fn(S) -> f32,
) {
    let num_channels = buf.spec().channels.count();
    let num_frames = buf.frames();
    output.reserve(num_frames * num_channels);

    for frame_idx in 0..num_frames {
        for ch_idx in 0..num_channels {
            output.push(convert(buf.chan(ch_idx)[frame_idx]));
        }
    }
}

/// Fold any channel layout down to interleaved stereo
///
/// Mono duplicates into both channels; layouts beyond stereo keep their
/// front pair.
fn normalize_channels(samples: Vec<f32>, channels: u16) -> Vec<f32> {
    match channels {
        2 => samples,
        0 | 1 => {
            let mut stereo = Vec::with_capacity(samples.len() * 2);
            for sample in samples {
                stereo.push(sample);
                stereo.push(sample);
            }
            stereo
        }
        n => {
            warn!("downmixing {}-channel source to stereo front pair", n);
            let n = n as usize;
            let frames = samples.len() / n;
            let mut stereo = Vec::with_capacity(frames * 2);
            for frame_idx in 0..frames {
                stereo.push(samples[frame_idx * n]);
                stereo.push(samples[frame_idx * n + 1]);
            }
            stereo
        }
    }
}
