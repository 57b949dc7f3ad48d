//! Sliding-window rate estimation over fixed-duration buckets.
//!
//! A [`RateEstimator`] keeps exactly `bucket_count` bucket sums in a ring and
//! a running total, so both [`RateEstimator::add`] and
//! [`RateEstimator::full_period_average`] are O(1).

/// Moving sum of samples over `bucket_count` buckets of `bucket_ms` each.
#[derive(Debug, Clone)]
pub struct RateEstimator {
    bucket_ms: u64,
    buckets: Vec<i64>,
    /// Index of the current (newest) bucket.
    head: usize,
    /// Start of the current bucket; `None` until the first sample.
    current_start: Option<u64>,
    sum: i64,
}

impl RateEstimator {
    /// # Panics
    /// If `bucket_ms` or `bucket_count` is zero.
    pub fn new(bucket_ms: u64, bucket_count: usize) -> Self {
        assert!(bucket_ms > 0, "bucket duration must be non-zero");
        assert!(bucket_count > 0, "bucket count must be non-zero");

        Self {
            bucket_ms,
            buckets: vec![0; bucket_count],
            head: 0,
            current_start: None,
            sum: 0,
        }
    }

    pub fn bucket_ms(&self) -> u64 {
        self.bucket_ms
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Total span covered by the window, in milliseconds.
    pub fn window_ms(&self) -> u64 {
        self.bucket_ms * self.buckets.len() as u64
    }

    /// Records `value` at `timestamp_ms`.
    ///
    /// Samples older than the current bucket are folded into it.
    pub fn add(&mut self, timestamp_ms: u64, value: i64) {
        let aligned = timestamp_ms - timestamp_ms % self.bucket_ms;

        let start = match self.current_start {
            None => {
                self.current_start = Some(aligned);
                aligned
            }
            Some(start) => start,
        };

        if timestamp_ms >= start + self.bucket_ms {
            let elapsed = (timestamp_ms - start) / self.bucket_ms;
            if elapsed >= self.buckets.len() as u64 {
                self.reset_to(aligned);
            } else {
                for _ in 0..elapsed {
                    self.head = (self.head + 1) % self.buckets.len();
                    self.sum -= self.buckets[self.head];
                    self.buckets[self.head] = 0;
                }
                self.current_start = Some(start + elapsed * self.bucket_ms);
            }
        }

        self.buckets[self.head] += value;
        self.sum += value;
    }

    /// Mean accumulation per bucket across the whole window.
    ///
    /// This is per bucket, not per second; see [`RateEstimator::rate_per_second`].
    pub fn full_period_average(&self) -> f64 {
        self.sum as f64 / self.buckets.len() as f64
    }

    /// [`full_period_average`](Self::full_period_average) normalised to one second.
    pub fn rate_per_second(&self) -> f64 {
        self.full_period_average() * 1000.0 / self.bucket_ms as f64
    }

    fn reset_to(&mut self, aligned_start: u64) {
        self.buckets.iter_mut().for_each(|b| *b = 0);
        self.head = 0;
        self.sum = 0;
        self.current_start = Some(aligned_start);
    }
}

/// The three smoothing windows reported per queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateWindow {
    /// 60 one-second buckets.
    OneMinute,
    /// 240 fifteen-second buckets; finer than one-minute buckets to keep
    /// the hourly figure from jumping.
    OneHour,
    /// 144 ten-minute buckets.
    OneDay,
}

impl RateWindow {
    pub const ALL: [RateWindow; 3] = [RateWindow::OneMinute, RateWindow::OneHour, RateWindow::OneDay];

    pub const fn bucket_ms(self) -> u64 {
        match self {
            RateWindow::OneMinute => 1_000,
            RateWindow::OneHour => 15_000,
            RateWindow::OneDay => 600_000,
        }
    }

    pub const fn bucket_count(self) -> usize {
        match self {
            RateWindow::OneMinute => 60,
            RateWindow::OneHour => 240,
            RateWindow::OneDay => 144,
        }
    }

    pub const fn index(self) -> usize {
        match self {
            RateWindow::OneMinute => 0,
            RateWindow::OneHour => 1,
            RateWindow::OneDay => 2,
        }
    }

    pub fn estimator(self) -> RateEstimator {
        RateEstimator::new(self.bucket_ms(), self.bucket_count())
    }
}
