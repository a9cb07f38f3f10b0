// First-order pre-emphasis high-pass filter
// Each owner keeps its own instance; filter memory is never shared

/// Pre-emphasis filter `y[i] = x[i] - coefficient * x[i - 1]`
///
/// The previous sample is carried across calls, so consecutive frames of a
/// stream are filtered as one continuous signal. A coefficient of 0 passes
/// audio through untouched and leaves the memory cell alone.
#[derive(Debug, Clone, PartialEq)]
pub struct PreEmphasisFilter {
    coefficient: f32,
    previous_sample: f32,
}

impl PreEmphasisFilter {
    pub fn new(coefficient: f32) -> Self {
        Self {
            coefficient,
            previous_sample: 0.0,
        }
    }

    /// Filter a frame, returning the emphasized samples
    pub fn apply(&mut self, input: &[f32]) -> Vec<f32> {
        if self.coefficient == 0.0 {
            return input.to_vec();
        }

        let mut output = Vec::with_capacity(input.len());
        for &sample in input {
            output.push(sample - self.coefficient * self.previous_sample);
            self.previous_sample = sample;
        }
        output
    }

    /// Forget the carried sample
    pub fn reset(&mut self) {
        self.previous_sample = 0.0;
    }

    pub fn coefficient(&self) -> f32 {
        self.coefficient
    }

    /// Change the coefficient; the memory cell is kept
    pub fn set_coefficient(&mut self, coefficient: f32) {
        self.coefficient = coefficient;
    }

    pub fn previous_sample(&self) -> f32 {
        self.previous_sample
    }
}

impl Default for PreEmphasisFilter {
    fn default() -> Self {
        Self::new(crate::audio_constants::PRE_EMPHASIS_COEFFICIENT)
    }
}
