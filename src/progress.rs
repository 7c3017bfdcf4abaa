use log::info;

/// Percentage between two progress messages.
const STEP_PERCENT: u64 = 10;

/// Wraps an event iterator and logs how much of the expected total has been
/// consumed, once per [`STEP_PERCENT`] percent.
pub struct Progress<I> {
    inner: I,
    total: u64,
    seen: u64,
    next_percent: u64,
}

impl<I> Progress<I> {
    pub fn new(inner: I, total: u64) -> Self {
        Self {
            inner,
            total,
            seen: 0,
            next_percent: STEP_PERCENT,
        }
    }

    fn report(&mut self) {
        if self.total == 0 {
            return;
        }

        let percent = self.seen.saturating_mul(100) / self.total;
        if percent >= self.next_percent {
            info!("Processed {percent}% ({}/{} records)", self.seen, self.total);
            self.next_percent = (percent / STEP_PERCENT + 1) * STEP_PERCENT;
        }
    }

    pub fn seen(&self) -> u64 {
        self.seen
    }
}

impl<I: Iterator> Iterator for Progress<I> {
    type Item = I::Item;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.inner.next()?;
        self.seen += 1;
        self.report();
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::Progress;

    #[test]
    fn passes_items_through() {
        let mut progress = Progress::new(0..25, 25);
        let items: Vec<u32> = progress.by_ref().collect();

        assert_eq!(items, (0..25).collect::<Vec<_>>());
        assert_eq!(progress.seen(), 25);
        assert!(progress.next_percent > 100);
    }

    #[test]
    fn steps_skip_ahead_on_coarse_totals() {
        let mut progress = Progress::new(0..3, 3);

        progress.next();
        assert_eq!(progress.next_percent, 40);
        progress.next();
        assert_eq!(progress.next_percent, 70);
    }

    #[test]
    fn unknown_total_never_reports() {
        let mut progress = Progress::new(0..5, 0);
        assert_eq!(progress.by_ref().count(), 5);
        assert_eq!(progress.next_percent, 10);
    }
}
