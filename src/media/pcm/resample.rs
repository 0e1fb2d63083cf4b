//! `pcm/resample.rs` — linear-interpolation rate conversion for interleaved
//! i16 PCM, carrying state across blocks so a stream can be fed piecewise.

pub struct LinearResampler {
    /// Source / target ratio (< 1.0 upsamples, > 1.0 downsamples).
    ratio: f64,
    /// Fractional read head within the current input block.
    index: f64,
    /// Last frame of the previous block, for cross-block interpolation.
    last_frame: Vec<i16>,
    channels: usize,
}

impl LinearResampler {
    pub fn new(source_rate: u32, target_rate: u32, channels: usize) -> Self {
        let channels = channels.max(1);
        Self {
            ratio: f64::from(source_rate.max(1)) / f64::from(target_rate.max(1)),
            index: 0.0,
            last_frame: vec![0; channels],
            channels,
        }
    }

    /// Resample `input` and append the result to `output`.
    pub fn process(&mut self, input: &[i16], output: &mut Vec<i16>) {
        let frames = input.len() / self.channels;
        if frames == 0 {
            return;
        }
        if self.is_passthrough() {
            output.extend_from_slice(&input[..frames * self.channels]);
            return;
        }

        while self.index < frames as f64 {
            let idx = self.index as usize;
            let fract = self.index.fract();

            for c in 0..self.channels {
                let s1 = if idx == 0 {
                    f64::from(self.last_frame[c])
                } else {
                    f64::from(input[(idx - 1) * self.channels + c])
                };
                let s2 = f64::from(input[idx * self.channels + c]);

                output.push((s1 * (1.0 - fract) + s2 * fract).round() as i16);
            }

            self.index += self.ratio;
        }

        self.index -= frames as f64;
        self.last_frame
            .copy_from_slice(&input[(frames - 1) * self.channels..frames * self.channels]);
    }

    pub fn is_passthrough(&self) -> bool {
        (self.ratio - 1.0).abs() < f64::EPSILON
    }
}
