//! WAV decoding and resampling for transcription input.

use std::io::Cursor;
use std::path::Path;

use tutor_core::error::TutorError;

/// Mono PCM samples in [-1.0, 1.0].
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// Decode an in-memory WAV file, mixing multi-channel audio down to mono.
pub fn decode_wav(bytes: &[u8]) -> Result<DecodedAudio, TutorError> {
    let reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| TutorError::Transcription(format!("Unsupported audio: {e}")))?;
    read_samples(reader)
}

/// Decode a WAV file from disk.
pub fn decode_wav_file(path: &Path) -> Result<DecodedAudio, TutorError> {
    let reader = hound::WavReader::open(path).map_err(|e| {
        TutorError::Transcription(format!("Cannot open WAV {}: {e}", path.display()))
    })?;
    read_samples(reader)
}

fn read_samples<R: std::io::Read>(mut reader: hound::WavReader<R>) -> Result<DecodedAudio, TutorError> {
    let spec = reader.spec();
    let read_err = |e: hound::Error| TutorError::Transcription(format!("WAV read error: {e}"));

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let max = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max).map_err(read_err))
                .collect::<Result<_, _>>()?
        }
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map_err(read_err))
            .collect::<Result<_, _>>()?,
    };

    let samples = if spec.channels > 1 {
        let ch = spec.channels as usize;
        samples
            .chunks(ch)
            .map(|frame| frame.iter().sum::<f32>() / ch as f32)
            .collect()
    } else {
        samples
    };

    Ok(DecodedAudio {
        samples,
        sample_rate: spec.sample_rate,
    })
}

/// Linear resampling. Adequate for speech headed to a 16 kHz model.
pub fn resample(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || input.is_empty() || from_rate == 0 || to_rate == 0 {
        return input.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (input.len() as f64 / ratio).ceil() as usize;
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let src_idx = i as f64 * ratio;
        let idx0 = (src_idx.floor() as usize).min(input.len() - 1);
        let idx1 = (idx0 + 1).min(input.len() - 1);
        let frac = (src_idx - idx0 as f64) as f32;
        output.push(input[idx0] * (1.0 - frac) + input[idx1] * frac);
    }

    output
}
