//! Hop-based analysis cadence

/// Decides when an analysis pass fires, from the number of samples written.
///
/// A pass fires every `hop_size` samples, so the pass rate never exceeds
/// `sample_rate / hop_size` whatever the device quantum size is.
#[derive(Debug, Clone)]
pub struct AnalysisScheduler {
    hop_size: usize,
    since_last: usize,
    fired: u64,
}

impl AnalysisScheduler {
    pub fn new(hop_size: usize) -> Self {
        Self {
            hop_size: hop_size.max(1),
            since_last: 0,
            fired: 0,
        }
    }

    /// Account for one written sample; true when it completes a hop.
    #[inline]
    pub fn on_sample(&mut self) -> bool {
        self.since_last += 1;
        if self.since_last >= self.hop_size {
            self.since_last = 0;
            self.fired += 1;
            true
        } else {
            false
        }
    }

    /// Account for `count` written samples; returns the number of completed hops.
    pub fn advance(&mut self, count: usize) -> usize {
        let total = self.since_last + count;
        let hops = total / self.hop_size;
        self.since_last = total % self.hop_size;
        self.fired += hops as u64;
        hops
    }

    pub fn hop_size(&self) -> usize {
        self.hop_size
    }

    /// Passes fired so far.
    pub fn fired(&self) -> u64 {
        self.fired
    }

    /// Upper bound on passes per second.
    pub fn max_rate(&self, sample_rate: u32) -> f32 {
        sample_rate as f32 / self.hop_size as f32
    }
}

#[cfg(test)]
mod tests {
    use super::AnalysisScheduler;

    #[test]
    fn fires_once_per_hop() {
        let mut scheduler = AnalysisScheduler::new(512);
        let fired = (0..2048).filter(|_| scheduler.on_sample()).count();

        assert_eq!(fired, 4);
        assert_eq!(scheduler.fired(), 4);
    }

    #[test]
    fn fires_on_the_hop_boundary() {
        let mut scheduler = AnalysisScheduler::new(4);
        let pattern: Vec<bool> = (0..8).map(|_| scheduler.on_sample()).collect();

        assert_eq!(
            pattern,
            vec![false, false, false, true, false, false, false, true]
        );
    }

    #[test]
    fn advance_carries_the_remainder_across_quanta() {
        let mut scheduler = AnalysisScheduler::new(512);

        assert_eq!(scheduler.advance(128), 0);
        assert_eq!(scheduler.advance(128), 0);
        assert_eq!(scheduler.advance(128), 0);
        assert_eq!(scheduler.advance(128), 1);
        assert_eq!(scheduler.advance(1100), 2);
        assert_eq!(scheduler.fired(), 3);
    }

    #[test]
    fn rate_is_bounded_by_hop() {
        let scheduler = AnalysisScheduler::new(512);
        let rate = scheduler.max_rate(44_100);

        assert!((rate - 86.13).abs() < 0.01, "rate {rate}");
    }
}
