//! Clip decoding using symphonia
//!
//! Decodes a whole file to interleaved f32, folds it to stereo and converts
//! it to the graph's sample rate. [`SymphoniaLoader`] wraps this as the
//! engine's [`BufferLoader`], running each decode on tokio's blocking pool.

use crate::audio::buffer::{ClipSource, SampleBuffer, BUFFER_CHANNELS};
use crate::audio::resampler::Resampler;
use crate::error::{Error, Result};
use crate::playback::registry::BufferLoader;
use futures::future::BoxFuture;
use std::path::{Path, PathBuf};
use symphonia::core::audio::SampleBuffer as DecodeBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

/// Interleaved samples as they came out of the file
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Map a clip url to a local path
///
/// Accepts plain paths and `file://` urls. Clips are never fetched over
/// the network.
pub fn resolve_clip_path(url: &str) -> Result<PathBuf> {
    if let Some(path) = url.strip_prefix("file://") {
        return Ok(PathBuf::from(path));
    }
    match url.split_once("://") {
        Some((scheme, _)) => Err(Error::Decode(format!(
            "Remote clips are not supported (scheme '{}'), use a local path or file:// url: {}",
            scheme, url
        ))),
        None => Ok(PathBuf::from(url)),
    }
}

/// Decode an entire file
pub fn decode_file(path: &Path) -> Result<DecodedAudio> {
    debug!("Decoding file: {}", path.display());

    let file = std::fs::File::open(path)
        .map_err(|e| Error::Decode(format!("Failed to open file {}: {}", path.display(), e)))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| Error::Decode(format!("Failed to probe format: {}", e)))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| Error::Decode("No audio track found".to_string()))?;
    let track_id = track.id;

    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| Error::Decode("Sample rate not found".to_string()))?;
    let channels = track
        .codec_params
        .channels
        .map(|c| c.count() as u16)
        .ok_or_else(|| Error::Decode("Channel count not found".to_string()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| Error::Decode(format!("Failed to create decoder: {}", e)))?;

    let mut samples = Vec::new();
    let mut scratch: Option<DecodeBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => {
                warn!("Error reading packet from {}: {}", path.display(), e);
                break;
            }
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                let frames = decoded.capacity();
                // Capacity counts samples, not frames
                let needed = frames * spec.channels.count();
                if scratch.as_ref().map_or(true, |buf| buf.capacity() < needed) {
                    scratch = Some(DecodeBuffer::new(frames as u64, spec));
                }
                if let Some(buf) = scratch.as_mut() {
                    buf.copy_interleaved_ref(decoded);
                    samples.extend_from_slice(buf.samples());
                }
            }
            // Corrupt packet; keep going
            Err(SymphoniaError::DecodeError(e)) => warn!("Decode error in {}: {}", path.display(), e),
            Err(e) => {
                warn!("Decoder stopped on {}: {}", path.display(), e);
                break;
            }
        }
    }

    debug!(
        "Decoded {} frames at {}Hz ({} channels)",
        samples.len() / channels.max(1) as usize,
        sample_rate,
        channels
    );

    Ok(DecodedAudio {
        samples,
        sample_rate,
        channels,
    })
}

/// Fold interleaved audio of any width to stereo
///
/// Mono is duplicated; channels beyond the first two are dropped.
pub fn to_stereo(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.iter().flat_map(|s| [*s, *s]).collect(),
        2 => samples.to_vec(),
        n => samples
            .chunks_exact(n as usize)
            .flat_map(|frame| [frame[0], frame[1]])
            .collect(),
    }
}

/// Decode `path` into a stereo buffer at `target_rate`
pub fn decode_clip(path: &Path, target_rate: u32) -> Result<SampleBuffer> {
    let decoded = decode_file(path)?;
    if decoded.samples.is_empty() {
        return Err(Error::Decode(format!("{} contains no audio", path.display())));
    }

    let stereo = to_stereo(&decoded.samples, decoded.channels);
    let samples = Resampler::resample(
        &stereo,
        decoded.sample_rate,
        target_rate,
        BUFFER_CHANNELS as u16,
    )?;
    Ok(SampleBuffer::new(samples, target_rate))
}

/// [`BufferLoader`] reading local files through symphonia
#[derive(Debug, Clone, Copy)]
pub struct SymphoniaLoader {
    target_rate: u32,
}

impl SymphoniaLoader {
    /// Loader producing buffers at `target_rate` (the graph's rate)
    pub fn new(target_rate: u32) -> Self {
        Self { target_rate }
    }

    pub fn target_rate(&self) -> u32 {
        self.target_rate
    }
}

impl BufferLoader for SymphoniaLoader {
    fn load<'a>(&'a self, source: &'a ClipSource) -> BoxFuture<'a, Result<SampleBuffer>> {
        let target_rate = self.target_rate;
        Box::pin(async move {
            let path = resolve_clip_path(&source.url)?;
            tokio::task::spawn_blocking(move || decode_clip(&path, target_rate))
                .await
                .map_err(|e| Error::Internal(format!("Decode task failed: {}", e)))?
        })
    }
}
