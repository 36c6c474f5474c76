// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::io::{self, Read};

use parking_lot::Mutex;
use symphonia::core::audio::{AudioBuffer, AudioBufferRef, Signal};
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSourceStream, ReadOnlySource};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};

use super::AudioError;

/// Adapts a reader that is only `Send` into one symphonia will accept, which also needs `Sync`.
struct SyncReader<R>(Mutex<R>);

impl<R: Read + Send> Read for SyncReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.get_mut().read(buf)
    }
}

/// Decodes a live, non-seekable audio stream into interleaved f32 samples.
pub struct StreamDecoder {
    format_reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: u16,
}

impl StreamDecoder {
    /// Detects the stream format and prepares a decoder for its first audio track. The content
    /// type of the response, if known, is used as a format hint.
    pub fn open<R>(reader: R, content_type: Option<&str>) -> Result<StreamDecoder, AudioError>
    where
        R: Read + Send + 'static,
    {
        let source = ReadOnlySource::new(SyncReader(Mutex::new(reader)));
        let mss = MediaSourceStream::new(Box::new(source), Default::default());

        let mut hint = Hint::new();
        if let Some(content_type) = content_type {
            hint.mime_type(content_type);
            if let Some(extension) = extension_for(content_type) {
                hint.with_extension(extension);
            }
        }

        let meta_opts: MetadataOptions = Default::default();
        let fmt_opts: FormatOptions = Default::default();
        let probed = get_probe()
            .format(&hint, mss, &fmt_opts, &meta_opts)
            .map_err(|e| AudioError::Format(format!("unrecognized stream: {}", e)))?;

        let format_reader = probed.format;
        let track = format_reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| AudioError::Format("no audio track in stream".to_string()))?;

        let track_id = track.id;
        let params = &track.codec_params;
        let sample_rate = params
            .sample_rate
            .ok_or_else(|| AudioError::Format("sample rate not specified".to_string()))?;
        let channels = params.channels.map(|c| c.count() as u16).unwrap_or(0);

        let decoder_opts: DecoderOptions = Default::default();
        let decoder = get_codecs().make(params, &decoder_opts)?;

        Ok(StreamDecoder {
            format_reader,
            decoder,
            track_id,
            sample_rate,
            channels,
        })
    }

    /// The sample rate of the stream.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// The channel count of the stream. Zero until the first packet is decoded if the
    /// container didn't say.
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Decodes the next packet. Returns `Ok(None)` when the remote end closes the stream.
    pub fn next_chunk(&mut self) -> Result<Option<Vec<f32>>, AudioError> {
        loop {
            let packet = match self.format_reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Ok(None)
                }
                Err(e) => return Err(e.into()),
            };
            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                // A corrupt frame in a live stream is skipped rather than ending playback.
                Err(SymphoniaError::DecodeError(_)) => continue,
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let (samples, channels) = decode_buffer_to_f32(decoded);
            if channels == 0 || samples.is_empty() {
                continue;
            }
            self.channels = channels as u16;
            return Ok(Some(samples));
        }
    }
}

/// Maps a stream content type onto the file extension symphonia knows it by.
fn extension_for(content_type: &str) -> Option<&'static str> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match mime.as_str() {
        "audio/mpeg" | "audio/mp3" | "audio/mpeg3" => Some("mp3"),
        "audio/aac" | "audio/aacp" | "audio/x-aac" => Some("aac"),
        "audio/ogg" | "application/ogg" | "audio/vorbis" => Some("ogg"),
        "audio/flac" | "audio/x-flac" => Some("flac"),
        "audio/wav" | "audio/x-wav" | "audio/wave" => Some("wav"),
        "audio/mp4" | "audio/x-m4a" => Some("m4a"),
        _ => None,
    }
}

fn decode_buffer_to_f32(decoded: AudioBufferRef) -> (Vec<f32>, usize) {
    match decoded {
        AudioBufferRef::F32(buf) => interleave(&buf, |sample| sample),
        AudioBufferRef::F64(buf) => interleave(&buf, |sample| sample as f32),
        AudioBufferRef::S8(buf) => interleave(&buf, |sample| sample as f32 / 128.0),
        AudioBufferRef::S16(buf) => interleave(&buf, |sample| sample as f32 / 32768.0),
        AudioBufferRef::S24(buf) => {
            interleave(&buf, |sample| sample.inner() as f32 / 8_388_608.0)
        }
        AudioBufferRef::S32(buf) => interleave(&buf, |sample| sample as f32 / 2_147_483_648.0),
        AudioBufferRef::U8(buf) => interleave(&buf, |sample| (sample as f32 - 128.0) / 128.0),
        AudioBufferRef::U16(buf) => {
            interleave(&buf, |sample| (sample as f32 - 32768.0) / 32768.0)
        }
        AudioBufferRef::U24(buf) => interleave(&buf, |sample| {
            (sample.inner() as f32 - 8_388_608.0) / 8_388_608.0
        }),
        AudioBufferRef::U32(buf) => interleave(&buf, |sample| {
            (sample as f64 - 2_147_483_648.0) as f32 / 2_147_483_648.0
        }),
    }
}

/// Interleaves planar samples from a generic AudioBuffer.
fn interleave<T, F>(buf: &AudioBuffer<T>, convert: F) -> (Vec<f32>, usize)
where
    T: symphonia::core::sample::Sample,
    F: Fn(T) -> f32,
{
    let frames = buf.frames();
    let channels = buf.spec().channels.count();
    let planes = buf.planes();
    let mut samples = Vec::with_capacity(frames * channels);
    for frame_idx in 0..frames {
        for ch_idx in 0..channels {
            samples.push(convert(planes.planes()[ch_idx][frame_idx]));
        }
    }
    (samples, channels)
}

/// Rewrites interleaved samples from one channel layout to another. Mono is spread to every
/// output channel, anything folded down to mono is averaged, and other layouts wrap around.
pub fn remix(samples: &[f32], from: u16, to: u16) -> Vec<f32> {
    let from = from.max(1) as usize;
    let to = to.max(1) as usize;
    if from == to {
        return samples.to_vec();
    }

    let frames = samples.len() / from;
    let mut output = Vec::with_capacity(frames * to);
    for frame in samples.chunks_exact(from) {
        if to == 1 {
            output.push(frame.iter().sum::<f32>() / from as f32);
            continue;
        }
        for channel in 0..to {
            output.push(frame[channel % from]);
        }
    }
    output
}

/// A linear interpolating sample rate converter for interleaved audio. Keeps the last frame of
/// each chunk so that interpolation is continuous across chunk boundaries.
pub struct Resampler {
    channels: usize,
    step: f64,
    position: f64,
    history: Vec<f32>,
}

impl Resampler {
    /// Creates a resampler converting from one rate to another.
    pub fn new(from_rate: u32, to_rate: u32, channels: u16) -> Resampler {
        Resampler {
            channels: channels.max(1) as usize,
            step: from_rate as f64 / to_rate.max(1) as f64,
            position: 0.0,
            history: Vec::new(),
        }
    }

    /// Returns true if the conversion does nothing.
    pub fn is_passthrough(&self) -> bool {
        self.step == 1.0
    }

    /// Converts the next chunk of interleaved input.
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        if self.is_passthrough() {
            return input.to_vec();
        }

        let channels = self.channels;
        let mut combined = Vec::with_capacity(self.history.len() + input.len());
        combined.extend_from_slice(&self.history);
        combined.extend_from_slice(input);

        let frames = combined.len() / channels;
        if frames < 2 {
            self.history = combined;
            return Vec::new();
        }

        let mut output =
            Vec::with_capacity(((frames as f64 / self.step) as usize + 1) * channels);
        while self.position + 1.0 < frames as f64 {
            let index = self.position as usize;
            let frac = (self.position - index as f64) as f32;
            let current = &combined[index * channels..(index + 1) * channels];
            let next = &combined[(index + 1) * channels..(index + 2) * channels];
            for channel in 0..channels {
                output.push(current[channel] + (next[channel] - current[channel]) * frac);
            }
            self.position += self.step;
        }

        // The last frame becomes frame zero of the next call.
        self.position -= (frames - 1) as f64;
        self.history = combined[(frames - 1) * channels..frames * channels].to_vec();
        output
    }
}
