//! WAV encoding and audio import.
//!
//! Mixdowns and bundle audio are written as 16-bit PCM. Import accepts any
//! PCM or float WAV hound can read, and MP3 with the `mp3` feature.

use std::io::Cursor;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use thiserror::Error;

use crate::graph::InterleavedBuffer;
use crate::project::AudioBuffer;

/// Float sample to 16-bit PCM. Negative values scale by 32768 and positive
/// ones by 32767 so both ends of `[-1, 1]` are reachable.
#[inline]
pub fn to_pcm16(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

fn encode_interleaved(samples: &[f32], channels: u16, sample_rate: u32) -> Result<Vec<u8>, hound::Error> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    {
        let mut writer = WavWriter::new(&mut cursor, spec)?;
        for &sample in samples {
            writer.write_sample(to_pcm16(sample))?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Encode a rendered mixdown as a 16-bit WAV file.
pub fn encode_wav16(buffer: &InterleavedBuffer) -> Result<Vec<u8>, hound::Error> {
    encode_interleaved(&buffer.samples, buffer.channels, buffer.sample_rate)
}

/// Encode a decoded clip buffer as a 16-bit WAV file, keeping its channel
/// count and sample rate. A channel shorter than the longest one is padded
/// with silence.
pub fn encode_buffer_wav16(buffer: &AudioBuffer) -> Result<Vec<u8>, hound::Error> {
    let channels = buffer.channel_count().max(1);
    let frames = buffer.channels.iter().map(Vec::len).max().unwrap_or(0);
    let mut samples = Vec::with_capacity(frames * channels);
    for i in 0..frames {
        for ch in 0..channels {
            let sample = buffer.channels.get(ch).and_then(|c| c.get(i)).copied();
            samples.push(sample.unwrap_or(0.0));
        }
    }
    encode_interleaved(&samples, channels as u16, buffer.sample_rate)
}

/// Decode a WAV file of any supported bit depth.
pub fn decode_wav(bytes: &[u8]) -> Result<AudioBuffer, hound::Error> {
    let mut reader = WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();
    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        SampleFormat::Int => {
            let max = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|x| x as f32 / max))
                .collect::<Result<_, _>>()?
        }
    };
    Ok(AudioBuffer::from_interleaved(
        &samples,
        spec.channels as usize,
        spec.sample_rate,
    ))
}

/// Why imported audio could not be used.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("invalid WAV data: {0}")]
    Wav(String),
    #[error("invalid MP3 data: {0}")]
    Mp3(String),
    /// Neither a RIFF/WAVE file nor (with the `mp3` feature) an MP3 stream.
    #[error("unsupported audio format")]
    UnsupportedFormat,
    #[error("the file contains no audio")]
    Empty,
}

fn is_riff(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE"
}

/// Decode an imported audio file. Nothing is returned unless the whole file
/// decodes to at least one frame.
pub fn decode_audio(bytes: &[u8]) -> Result<AudioBuffer, DecodeError> {
    let buffer = if is_riff(bytes) {
        decode_wav(bytes).map_err(|e| DecodeError::Wav(e.to_string()))?
    } else {
        decode_compressed(bytes)?
    };
    if buffer.frames() == 0 || buffer.sample_rate == 0 {
        return Err(DecodeError::Empty);
    }
    log::debug!(
        "decoded {} frames, {} channels at {} Hz",
        buffer.frames(),
        buffer.channel_count(),
        buffer.sample_rate
    );
    Ok(buffer)
}

#[cfg(feature = "mp3")]
fn decode_compressed(bytes: &[u8]) -> Result<AudioBuffer, DecodeError> {
    use minimp3::{Decoder, Error as Mp3Error, Frame};

    let mut decoder = Decoder::new(Cursor::new(bytes));
    let mut samples = Vec::new();
    let mut format: Option<(usize, u32)> = None;
    loop {
        match decoder.next_frame() {
            Ok(Frame {
                data,
                sample_rate,
                channels,
                ..
            }) => {
                format.get_or_insert((channels, sample_rate as u32));
                samples.extend(data.iter().map(|&s| s as f32 / 32768.0));
            }
            Err(Mp3Error::Eof) => break,
            Err(Mp3Error::SkippedData) => continue,
            Err(e) => return Err(DecodeError::Mp3(e.to_string())),
        }
    }
    let (channels, sample_rate) = format.ok_or(DecodeError::UnsupportedFormat)?;
    Ok(AudioBuffer::from_interleaved(&samples, channels, sample_rate))
}

#[cfg(not(feature = "mp3"))]
fn decode_compressed(_bytes: &[u8]) -> Result<AudioBuffer, DecodeError> {
    Err(DecodeError::UnsupportedFormat)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm16_scaling_is_asymmetric() {
        assert_eq!(to_pcm16(1.0), 32767);
        assert_eq!(to_pcm16(-1.0), -32768);
        assert_eq!(to_pcm16(2.0), 32767);
        assert_eq!(to_pcm16(-3.0), -32768);
        assert_eq!(to_pcm16(0.0), 0);
    }

    #[test]
    fn mixdown_header_is_stereo_16_bit() {
        let buffer = InterleavedBuffer {
            sample_rate: 44100,
            channels: 2,
            samples: vec![0.0; 2 * 100],
        };
        let wav = encode_wav16(&buffer).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(u16::from_le_bytes([wav[22], wav[23]]), 2);
        assert_eq!(u32::from_le_bytes([wav[24], wav[25], wav[26], wav[27]]), 44100);
        assert_eq!(u16::from_le_bytes([wav[34], wav[35]]), 16);
        assert_eq!(wav.len(), 44 + 100 * 2 * 2);
    }

    #[test]
    fn clip_buffers_survive_encoding() {
        let left: Vec<f32> = (0..64).map(|i| (i as f32 / 32.0) - 1.0).collect();
        let right: Vec<f32> = left.iter().map(|s| -s).collect();
        let buffer = AudioBuffer::new(22050, vec![left.clone(), right]);
        let decoded = decode_audio(&encode_buffer_wav16(&buffer).unwrap()).unwrap();
        assert_eq!(decoded.sample_rate, 22050);
        assert_eq!(decoded.channel_count(), 2);
        for (a, b) in decoded.channels[0].iter().zip(&left) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn ragged_channels_are_padded() {
        let buffer = AudioBuffer::new(8000, vec![vec![0.5; 10], vec![-0.5; 4]]);
        let decoded = decode_audio(&encode_buffer_wav16(&buffer).unwrap()).unwrap();
        assert_eq!(decoded.frames(), 10);
        assert_eq!(decoded.channels[1][3], -0.5);
        assert_eq!(&decoded.channels[1][4..], &[0.0; 6]);

        let short_first = AudioBuffer::new(8000, vec![vec![0.25; 2], vec![0.25; 6]]);
        let decoded = decode_audio(&encode_buffer_wav16(&short_first).unwrap()).unwrap();
        assert_eq!(decoded.frames(), 6);
        assert_eq!(decoded.channels[0][5], 0.0);
    }

    #[test]
    fn decodes_24_bit_and_float_files() {
        for (bits, format) in [(24, SampleFormat::Int), (32, SampleFormat::Float)] {
            let spec = WavSpec {
                channels: 1,
                sample_rate: 8000,
                bits_per_sample: bits,
                sample_format: format,
            };
            let mut cursor = Cursor::new(Vec::new());
            {
                let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
                for _ in 0..10 {
                    match format {
                        SampleFormat::Int => writer.write_sample(1 << 22).unwrap(),
                        SampleFormat::Float => writer.write_sample(0.5f32).unwrap(),
                    }
                }
                writer.finalize().unwrap();
            }
            let buffer = decode_audio(&cursor.into_inner()).unwrap();
            assert_eq!(buffer.frames(), 10);
            assert!((buffer.channels[0][0] - 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(decode_audio(b"not audio at all").is_err());
        assert!(matches!(
            decode_audio(b"RIFF\0\0\0\0WAVEjunk"),
            Err(DecodeError::Wav(_))
        ));
    }

    #[test]
    fn empty_wav_is_rejected() {
        let buffer = AudioBuffer::new(8000, vec![Vec::new()]);
        let wav = encode_buffer_wav16(&buffer).unwrap();
        assert_eq!(decode_audio(&wav), Err(DecodeError::Empty));
    }
}
