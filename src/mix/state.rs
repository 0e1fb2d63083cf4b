use crate::mix::AudioSample;

/// Outcome of one low-level extract or decode step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    /// No progress possible right now.
    None,
    /// One unit of work was performed.
    Consumed,
    /// Internal state changed; another attempt may progress without waiting.
    RetryImmediately,
}

/// What an extractor has to offer the mixer right now.
#[derive(Debug)]
pub enum GetSampleResult<'a> {
    /// Nothing decoded yet, more to come.
    Pending,
    /// The decoder is exhausted and every sample has been released.
    EndOfStream,
    Ready(&'a mut AudioSample),
}

impl GetSampleResult<'_> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    pub fn is_eos(&self) -> bool {
        matches!(self, Self::EndOfStream)
    }
}
