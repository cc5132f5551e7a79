//! WAV container helpers

use std::path::Path;

use anyhow::{Result, anyhow};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

/// Decoded mono clip
#[derive(Debug, Clone)]
pub struct Clip {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

/// Convert audio buffer to WAV file
///
/// The output is always mono (single channel), 16-bit PCM.
pub fn buffer_to_wav<P: AsRef<Path>>(
    buffer: &[i16],
    output_path: P,
    sample_rate: u32,
) -> hound::Result<()> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut writer = WavWriter::create(output_path, spec)?;
    for &sample in buffer {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Read a WAV file as mono i16, averaging channels if needed
pub fn read_wav<P: AsRef<Path>>(input_path: P) -> Result<Clip> {
    let mut reader = WavReader::open(input_path)?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(|v| v as f32))
            .collect::<Result<_, _>>()?,
        (SampleFormat::Int, bits) if bits <= 32 => {
            let shift = bits.saturating_sub(16) as u32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| (v >> shift) as f32))
                .collect::<Result<_, _>>()?
        }
        (SampleFormat::Float, 32) => reader
            .samples::<f32>()
            .map(|s| s.map(|v| v * i16::MAX as f32))
            .collect::<Result<_, _>>()?,
        (format, bits) => {
            return Err(anyhow!("Unsupported WAV encoding: {:?} {}-bit", format, bits));
        }
    };

    let samples = interleaved
        .chunks(channels)
        .map(|chunk| {
            let mean = chunk.iter().sum::<f32>() / chunk.len() as f32;
            mean.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
        })
        .collect();

    Ok(Clip {
        samples,
        sample_rate: spec.sample_rate,
    })
}
