/// Completion counter for one fetch run.
///
/// The total is fixed when the plan is built. Percentages are the integer
/// floor of `done * 100 / total`; an empty run is immediately at 100.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    total: usize,
    done: usize,
}

impl Progress {
    pub fn new(total: usize) -> Self {
        Self { total, done: 0 }
    }

    /// The percentage reported before any request runs.
    pub fn start(&self) -> u8 {
        self.percent()
    }

    /// Record one settled request and return the new percentage.
    pub fn advance(&mut self) -> u8 {
        if self.done < self.total {
            self.done += 1;
        } else {
            tracing::warn!(total = self.total, "Progress advanced past total");
        }
        self.percent()
    }

    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        // done <= total, so this is at most 100
        (self.done * 100 / self.total) as u8
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn done(&self) -> usize {
        self.done
    }

    pub fn is_complete(&self) -> bool {
        self.done == self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sequence(total: usize) -> Vec<u8> {
        let mut progress = Progress::new(total);
        let mut events = vec![progress.start()];
        for _ in 0..total {
            events.push(progress.advance());
        }
        events
    }

    #[test]
    fn test_three_requests() {
        assert_eq!(sequence(3), vec![0, 33, 66, 100]);
    }

    #[test]
    fn test_six_requests() {
        assert_eq!(sequence(6), vec![0, 16, 33, 50, 66, 83, 100]);
    }

    #[test]
    fn test_empty_run_starts_complete() {
        let progress = Progress::new(0);
        assert_eq!(progress.start(), 100);
        assert!(progress.is_complete());
    }

    #[test]
    fn test_sequence_is_floor_and_monotonic() {
        for total in 1..=64 {
            let events = sequence(total);
            assert_eq!(events.len(), total + 1);
            assert_eq!(events[0], 0);
            assert_eq!(*events.last().unwrap(), 100);
            for (k, pct) in events.iter().enumerate() {
                assert_eq!(*pct as usize, k * 100 / total);
            }
            assert!(events.windows(2).all(|w| w[0] <= w[1]));
        }
    }

    #[test]
    fn test_advance_saturates_at_total() {
        let mut progress = Progress::new(1);
        assert_eq!(progress.advance(), 100);
        assert_eq!(progress.advance(), 100);
        assert_eq!(progress.done(), 1);
        assert_eq!(progress.total(), 1);
    }
}
