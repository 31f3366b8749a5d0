//! WAV decode/encode helpers.

use std::io::Cursor;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tracing::debug;

/// Mono PCM audio in the range -1.0..=1.0.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl PcmAudio {
    pub fn duration_ms(&self) -> u64 {
        samples_to_ms(self.samples.len(), self.sample_rate)
    }
}

pub fn samples_to_ms(samples: usize, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    samples as u64 * 1000 / sample_rate as u64
}

pub fn ms_to_samples(ms: u64, sample_rate: u32) -> usize {
    (ms * sample_rate as u64 / 1000) as usize
}

/// Read duration and sample rate from a WAV header.
pub fn probe(bytes: &[u8]) -> Result<(u64, u32), hound::Error> {
    let reader = WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();
    Ok((
        samples_to_ms(reader.duration() as usize, spec.sample_rate),
        spec.sample_rate,
    ))
}

/// Decode WAV bytes to mono f32, averaging channels.
pub fn decode(bytes: &[u8]) -> Result<PcmAudio, hound::Error> {
    let mut reader = WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()?
        }
    };

    let channels = spec.channels.max(1) as usize;
    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    };

    Ok(PcmAudio {
        samples,
        sample_rate: spec.sample_rate,
    })
}

/// Encode mono f32 samples as 16-bit PCM WAV.
pub fn encode(audio: &PcmAudio) -> Result<Vec<u8>, hound::Error> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: audio.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec)?;
        for &sample in &audio.samples {
            writer.write_sample((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

const RESAMPLE_CHUNK: usize = 1024;
const MAX_FLUSHES: usize = 8;

/// Resample mono audio with a windowed-sinc interpolator.
///
/// The interpolator's delay is trimmed from the front and its tail flushed,
/// so the output is aligned with the input and exactly
/// `round(len * to_rate / from_rate)` samples long.
pub fn resample(input: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, String> {
    if input.is_empty() || from_rate == to_rate {
        return Ok(input.to_vec());
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let chunk = input.len().max(RESAMPLE_CHUNK);
    let mut resampler =
        SincFixedIn::<f32>::new(ratio, 2.0, params, chunk, 1).map_err(|e| e.to_string())?;

    let expected = (input.len() as f64 * ratio).round() as usize;
    let delay = resampler.output_delay();

    let mut output = resampler
        .process_partial(Some(&[input][..]), None)
        .map_err(|e| e.to_string())?
        .pop()
        .unwrap_or_default();
    for _ in 0..MAX_FLUSHES {
        if output.len() >= delay + expected {
            break;
        }
        let tail = resampler
            .process_partial(None::<&[&[f32]]>, None)
            .map_err(|e| e.to_string())?
            .pop()
            .unwrap_or_default();
        if tail.is_empty() {
            break;
        }
        output.extend(tail);
    }

    output.drain(..delay.min(output.len()));
    output.resize(expected, 0.0);

    debug!(from_rate, to_rate, input = input.len(), output = output.len(), delay, "resampled clip");
    Ok(output)
}
