//! Circular sample store shared by both analysis paths

/// Fixed-capacity circular buffer of mono samples.
///
/// Overwrites the oldest data once full. Capacity never changes after
/// construction; readers take a contiguous copy with [`snapshot_into`]
/// so analysis never observes a half-written window.
///
/// [`snapshot_into`]: SampleRingBuffer::snapshot_into
pub struct SampleRingBuffer {
    samples: Box<[f32]>,
    write_pos: usize,
    total_written: u64,
}

impl SampleRingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: vec![0.0; capacity.max(1)].into_boxed_slice(),
            write_pos: 0,
            total_written: 0,
        }
    }

    #[inline]
    pub fn write(&mut self, sample: f32) {
        self.samples[self.write_pos] = sample;
        self.write_pos = (self.write_pos + 1) % self.samples.len();
        self.total_written += 1;
    }

    pub fn write_slice(&mut self, data: &[f32]) {
        for &sample in data {
            self.write(sample);
        }
    }

    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    /// Samples written since creation, including overwritten ones.
    pub fn total_written(&self) -> u64 {
        self.total_written
    }

    /// Number of valid samples currently held.
    pub fn len(&self) -> usize {
        self.total_written.min(self.samples.len() as u64) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.total_written == 0
    }

    /// Copy the held samples, oldest first.
    pub fn snapshot(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.len());
        self.snapshot_into(&mut out);
        out
    }

    /// Copy the held samples into `out`, oldest first, reusing its allocation.
    pub fn snapshot_into(&self, out: &mut Vec<f32>) {
        out.clear();
        let len = self.len();
        let capacity = self.samples.len();
        let start = (self.write_pos + capacity - len) % capacity;

        if start + len <= capacity {
            out.extend_from_slice(&self.samples[start..start + len]);
        } else {
            out.extend_from_slice(&self.samples[start..]);
            out.extend_from_slice(&self.samples[..(start + len) - capacity]);
        }
    }
}
