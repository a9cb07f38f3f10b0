// Sliding audio window for wake word analysis
// Keeps the most recent ~1.5 seconds of normalized samples in a fixed ring

use crate::trace;

/// A fixed-capacity ring of the most recent audio samples
///
/// Appends overwrite the oldest samples once the ring is full, so the
/// buffer never holds more than `capacity` samples and never reallocates
/// after construction.
#[derive(Debug)]
pub struct SlidingAudioBuffer {
    /// Internal storage for samples
    data: Vec<f32>,
    /// Maximum capacity (number of samples)
    capacity: usize,
    /// Write position (next index to write to)
    write_pos: usize,
    /// Number of samples currently in buffer
    len: usize,
    /// Total samples ever appended (monotonic, survives `clear`)
    total_samples_appended: u64,
}

impl SlidingAudioBuffer {
    /// Create a new buffer with the given capacity
    ///
    /// # Arguments
    /// * `capacity` - Maximum number of f32 samples to store
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0.0; capacity],
            capacity,
            write_pos: 0,
            len: 0,
            total_samples_appended: 0,
        }
    }

    /// Create a buffer sized for a specific duration at a given sample rate
    pub fn for_duration(duration_secs: f32, sample_rate: u32) -> Self {
        Self::new(crate::audio_constants::samples_for_duration(
            duration_secs,
            sample_rate,
        ))
    }

    /// Append samples, evicting the oldest ones when full
    ///
    /// A slice longer than the capacity keeps only its most recent
    /// `capacity` samples.
    pub fn append(&mut self, samples: &[f32]) {
        self.total_samples_appended += samples.len() as u64;
        if self.capacity == 0 || samples.is_empty() {
            return;
        }

        if samples.len() >= self.capacity {
            let tail = &samples[samples.len() - self.capacity..];
            self.data.copy_from_slice(tail);
            self.write_pos = 0;
            self.len = self.capacity;
            return;
        }

        // At most two contiguous copies: up to the end of storage, then from the start
        let first = samples.len().min(self.capacity - self.write_pos);
        self.data[self.write_pos..self.write_pos + first].copy_from_slice(&samples[..first]);
        let rest = samples.len() - first;
        if rest > 0 {
            self.data[..rest].copy_from_slice(&samples[first..]);
        }

        self.write_pos = (self.write_pos + samples.len()) % self.capacity;
        self.len = (self.len + samples.len()).min(self.capacity);
    }

    /// Copy out the current contents, oldest sample first
    ///
    /// An empty buffer yields an empty vector.
    pub fn snapshot(&self) -> Vec<f32> {
        if self.len < self.capacity {
            // Not yet wrapped - samples sit at the start of storage
            self.data[..self.len].to_vec()
        } else {
            let mut result = Vec::with_capacity(self.capacity);
            result.extend_from_slice(&self.data[self.write_pos..]);
            result.extend_from_slice(&self.data[..self.write_pos]);
            result
        }
    }

    /// Drop all samples; the capacity is unchanged
    pub fn clear(&mut self) {
        trace!("[buffer] Buffer cleared, was holding {} samples", self.len);
        self.write_pos = 0;
        self.len = 0;
    }

    /// Total number of samples ever appended to this buffer
    pub fn total_samples_appended(&self) -> u64 {
        self.total_samples_appended
    }

    /// Current number of samples in the buffer
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Check if the buffer holds a full window
    pub fn is_full(&self) -> bool {
        self.len == self.capacity
    }

    /// Get the capacity of the buffer
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
