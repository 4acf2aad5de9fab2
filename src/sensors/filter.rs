//! Sample conditioning for analog channels.
//!
//! Every ADC channel passes through a median-of-5 (spike rejection)
//! followed by a moving average of 8 (noise).  Both are fixed-size and
//! allocation-free.

/// Running median over the last `N` samples.
#[derive(Debug, Clone)]
pub struct MedianFilter<const N: usize> {
    window: [f32; N],
    len: usize,
    next: usize,
}

impl<const N: usize> MedianFilter<N> {
    pub const fn new() -> Self {
        Self {
            window: [0.0; N],
            len: 0,
            next: 0,
        }
    }

    pub fn push(&mut self, value: f32) -> f32 {
        self.window[self.next] = value;
        self.next = (self.next + 1) % N;
        self.len = (self.len + 1).min(N);

        let mut sorted = [0.0f32; N];
        sorted[..self.len].copy_from_slice(&self.window[..self.len]);
        let filled = &mut sorted[..self.len];
        filled.sort_unstable_by(f32::total_cmp);
        filled[self.len / 2]
    }

    pub fn reset(&mut self) {
        self.len = 0;
        self.next = 0;
    }
}

impl<const N: usize> Default for MedianFilter<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Arithmetic mean over the last `N` samples.
#[derive(Debug, Clone)]
pub struct MovingAverage<const N: usize> {
    window: [f32; N],
    sum: f32,
    len: usize,
    next: usize,
}

impl<const N: usize> MovingAverage<N> {
    pub const fn new() -> Self {
        Self {
            window: [0.0; N],
            sum: 0.0,
            len: 0,
            next: 0,
        }
    }

    pub fn push(&mut self, value: f32) -> f32 {
        if self.len == N {
            self.sum -= self.window[self.next];
        } else {
            self.len += 1;
        }
        self.window[self.next] = value;
        self.sum += value;
        self.next = (self.next + 1) % N;
        self.sum / self.len as f32
    }

    pub fn reset(&mut self) {
        self.sum = 0.0;
        self.len = 0;
        self.next = 0;
    }
}

impl<const N: usize> Default for MovingAverage<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Median-of-5 then moving-average-of-8.
#[derive(Debug, Clone, Default)]
pub struct AnalogFilter {
    median: MedianFilter<5>,
    mean: MovingAverage<8>,
}

impl AnalogFilter {
    pub const fn new() -> Self {
        Self {
            median: MedianFilter::new(),
            mean: MovingAverage::new(),
        }
    }

    pub fn push(&mut self, value: f32) -> f32 {
        let m = self.median.push(value);
        self.mean.push(m)
    }

    /// Forget history, e.g. after a probe fault so stale values don't
    /// bleed into the first good reading.
    pub fn reset(&mut self) {
        self.median.reset();
        self.mean.reset();
    }
}
