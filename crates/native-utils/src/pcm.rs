use rubato::{FastFixedIn, PolynomialDegree, Resampler, ResamplerConstructionError};
use std::time::Duration;
use tracing::error;
use voicecoach_core::AudioFrame;

/// G.711 (PCMU) runs at a fixed 8 kHz.
pub const PCMU_SAMPLE_RATE: u32 = 8000;

/// Creates a resampler to convert between audio sample rates.
pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> Result<FastFixedIn<f32>, ResamplerConstructionError> {
    FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1, // mono
    )
}

/// Averages interleaved channels down to one.
pub fn downmix_to_mono(interleaved: &[f32], channels: u16) -> Vec<f32> {
    let channels = channels.max(1) as usize;
    if channels == 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Converts a slice of f32 samples to a vector of i16 samples.
pub fn convert_f32_to_i16(pcm32: &[f32]) -> Vec<i16> {
    pcm32
        .iter()
        .map(|&sample| (sample * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}

/// Converts a slice of i16 samples to a vector of f32 samples.
pub fn convert_i16_to_f32(pcm16: &[i16]) -> Vec<f32> {
    pcm16.iter().map(|&sample| sample as f32 / 32768.0).collect()
}

const ULAW_BIAS: i32 = 0x84;
const ULAW_CLIP: i32 = 32635;

/// Encodes one linear PCM16 sample as G.711 µ-law.
pub fn linear_to_ulaw(sample: i16) -> u8 {
    let mut pcm = sample as i32;
    let sign = if pcm < 0 {
        pcm = -pcm;
        0x80
    } else {
        0
    };
    pcm = pcm.min(ULAW_CLIP) + ULAW_BIAS;

    let mut exponent = 7;
    let mut mask = 0x4000;
    while exponent > 0 && pcm & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = (pcm >> (exponent + 3)) & 0x0F;
    !((sign | (exponent << 4) | mantissa) as u8)
}

pub fn encode_ulaw(pcm16: &[i16]) -> Vec<u8> {
    pcm16.iter().map(|&s| linear_to_ulaw(s)).collect()
}

/// Turns arbitrarily sized blocks of mono f32 input into fixed-duration PCM16
/// frames at the output rate.
pub struct FrameAssembler {
    resampler: Option<FastFixedIn<f32>>,
    pending: Vec<f32>,
    resampled: Vec<f32>,
    frame_len: usize,
    output_rate: u32,
}

impl FrameAssembler {
    pub fn new(
        input_rate: u32,
        output_rate: u32,
        frame: Duration,
    ) -> Result<Self, ResamplerConstructionError> {
        let resampler = if input_rate == output_rate {
            None
        } else {
            // One resampler chunk per 10 ms of input.
            let chunk = (input_rate as usize / 100).max(1);
            Some(create_resampler(input_rate as f64, output_rate as f64, chunk)?)
        };
        let frame_len = ((output_rate as u128 * frame.as_millis()) / 1000).max(1) as usize;
        Ok(Self {
            resampler,
            pending: Vec::new(),
            resampled: Vec::new(),
            frame_len,
            output_rate,
        })
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// Feeds samples in and returns every complete frame now available.
    pub fn push(&mut self, mono: &[f32]) -> Vec<AudioFrame> {
        match self.resampler.as_mut() {
            None => self.resampled.extend_from_slice(mono),
            Some(resampler) => {
                self.pending.extend_from_slice(mono);
                loop {
                    let needed = resampler.input_frames_next();
                    if self.pending.len() < needed {
                        break;
                    }
                    let chunk: Vec<f32> = self.pending.drain(..needed).collect();
                    match resampler.process(&[chunk], None) {
                        Ok(mut out) => {
                            if let Some(channel) = out.pop() {
                                self.resampled.extend(channel);
                            }
                        }
                        Err(e) => error!(error = %e, "Failed to resample capture chunk."),
                    }
                }
            }
        }

        let mut frames = Vec::new();
        while self.resampled.len() >= self.frame_len {
            let block: Vec<f32> = self.resampled.drain(..self.frame_len).collect();
            frames.push(AudioFrame {
                samples: convert_f32_to_i16(&block),
                sample_rate: self.output_rate,
            });
        }
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_create_resampler() {
        assert!(create_resampler(48000.0, 8000.0, 480).is_ok());
        assert!(create_resampler(44100.0, 8000.0, 441).is_ok());
        assert!(create_resampler(16000.0, 8000.0, 160).is_ok());
    }

    #[test]
    fn test_downmix_to_mono() {
        let stereo = vec![1.0f32, 0.0, 0.5, 0.5, -1.0, 1.0];
        let mono = downmix_to_mono(&stereo, 2);
        assert_eq!(mono.len(), 3);
        assert_abs_diff_eq!(mono[0], 0.5, epsilon = 0.0001);
        assert_abs_diff_eq!(mono[1], 0.5, epsilon = 0.0001);
        assert_abs_diff_eq!(mono[2], 0.0, epsilon = 0.0001);

        assert_eq!(downmix_to_mono(&[0.25, 0.75], 1), vec![0.25, 0.75]);
        // A trailing partial frame is dropped.
        assert_eq!(downmix_to_mono(&[0.5, 0.5, 0.1], 2).len(), 1);
    }

    #[test]
    fn test_convert_f32_to_i16() {
        let result = convert_f32_to_i16(&[1.0, -1.0, 0.0, 2.0, -2.0]);
        assert_eq!(result, vec![i16::MAX, -32767, 0, i16::MAX, i16::MIN]);
        assert!(convert_f32_to_i16(&[]).is_empty());
    }

    #[test]
    fn test_convert_i16_to_f32() {
        let result = convert_i16_to_f32(&[16384, i16::MIN, 0]);
        assert_abs_diff_eq!(result[0], 0.5, epsilon = 0.0001);
        assert_abs_diff_eq!(result[1], -1.0, epsilon = 0.0001);
        assert_abs_diff_eq!(result[2], 0.0, epsilon = 0.0001);
    }

    #[test]
    fn test_ulaw_reference_values() {
        assert_eq!(linear_to_ulaw(0), 0xFF);
        assert_eq!(linear_to_ulaw(i16::MAX), 0x80);
        assert_eq!(linear_to_ulaw(i16::MIN), 0x00);
        assert_eq!(linear_to_ulaw(-1), 0x7F);
        assert_eq!(encode_ulaw(&[0, i16::MAX]), vec![0xFF, 0x80]);
    }

    #[test]
    fn test_ulaw_is_monotonic_for_positive_input() {
        // Larger magnitudes encode to smaller (inverted) codes.
        let codes: Vec<u8> = [0i16, 100, 1000, 10000, 30000]
            .iter()
            .map(|&s| linear_to_ulaw(s))
            .collect();
        assert!(codes.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_assembler_passthrough_frames() {
        let mut assembler = FrameAssembler::new(8000, 8000, Duration::from_millis(20)).unwrap();
        assert_eq!(assembler.frame_len(), 160);

        let frames = assembler.push(&vec![0.5f32; 400]);
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.samples.len() == 160 && f.sample_rate == 8000));

        let frames = assembler.push(&vec![0.5f32; 80]);
        assert_eq!(frames.len(), 1);
        assert!(assembler.push(&[]).is_empty());
    }

    #[test]
    fn test_assembler_resamples_to_output_rate() {
        let mut assembler = FrameAssembler::new(48000, 8000, Duration::from_millis(20)).unwrap();
        let mut frames = Vec::new();
        // One second of input delivered in uneven callback-sized blocks.
        let mut fed = 0;
        while fed < 48000 {
            let n = 333.min(48000 - fed);
            frames.extend(assembler.push(&vec![0.1f32; n]));
            fed += n;
        }
        assert!(frames.len() >= 45 && frames.len() <= 52, "got {} frames", frames.len());
        assert!(frames.iter().all(|f| f.samples.len() == 160 && f.sample_rate == 8000));
    }
}
