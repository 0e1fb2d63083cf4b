//! Interleaved i16 PCM conformance: bring a decoded stream to another stream's
//! channel count and sample rate so the two can be mixed sample by sample.

pub mod resample;

pub use resample::LinearResampler;

use crate::media::PcmLayout;

/// Re-map interleaved frames from `from` channels to `to` channels.
///
/// Mono fans out to every output channel, anything folds down to mono by
/// averaging, and other shapes copy channel `c % from` into output channel `c`.
pub fn convert_channels(input: &[i16], from: usize, to: usize, output: &mut Vec<i16>) {
    let from = from.max(1);
    let to = to.max(1);
    if from == to {
        output.extend_from_slice(input);
        return;
    }

    for frame in input.chunks_exact(from) {
        if to == 1 {
            let sum: i32 = frame.iter().map(|s| i32::from(*s)).sum();
            output.push((sum / from as i32) as i16);
        } else if from == 1 {
            output.extend(std::iter::repeat_n(frame[0], to));
        } else {
            output.extend((0..to).map(|c| frame[c % from]));
        }
    }
}

/// Channel re-mapping followed by rate conversion.
pub struct PcmConverter {
    source: PcmLayout,
    target: PcmLayout,
    resampler: LinearResampler,
    scratch: Vec<i16>,
}

impl PcmConverter {
    pub fn new(source: PcmLayout, target: PcmLayout) -> Self {
        Self {
            source,
            target,
            resampler: LinearResampler::new(
                source.sample_rate,
                target.sample_rate,
                target.channels,
            ),
            scratch: Vec::new(),
        }
    }

    pub fn is_identity(&self) -> bool {
        self.source == self.target
    }

    pub fn target(&self) -> PcmLayout {
        self.target
    }

    pub fn process(&mut self, input: &[i16], output: &mut Vec<i16>) {
        if self.is_identity() {
            output.extend_from_slice(input);
            return;
        }
        self.scratch.clear();
        convert_channels(
            input,
            self.source.channels,
            self.target.channels,
            &mut self.scratch,
        );
        self.resampler.process(&self.scratch, output);
    }
}
