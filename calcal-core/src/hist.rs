//! Binned accumulators: fixed-width histograms and profiles.
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]

/// A 1D histogram with uniform bins over `[lo, hi)`.
///
/// Values outside the range are counted in underflow/overflow and never
/// contribute to window statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    counts: Vec<f64>,
    lo: f64,
    hi: f64,
    bin_width: f64,
    underflow: u64,
    overflow: u64,
    entries: u64,
}

/// Mean, RMS and weight of the bins inside a window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    pub mean: f64,
    pub rms: f64,
    pub weight: f64,
}

impl Histogram {
    /// Creates an empty histogram. `n_bins` is clamped to at least one.
    #[must_use]
    pub fn new(n_bins: usize, lo: f64, hi: f64) -> Self {
        let n_bins = n_bins.max(1);
        Self {
            counts: vec![0.0; n_bins],
            lo,
            hi,
            bin_width: (hi - lo) / n_bins as f64,
            underflow: 0,
            overflow: 0,
            entries: 0,
        }
    }

    /// Adds one entry.
    pub fn fill(&mut self, x: f64) {
        self.entries += 1;
        match self.bin_of(x) {
            Some(bin) => self.counts[bin] += 1.0,
            None if x < self.lo => self.underflow += 1,
            None => self.overflow += 1,
        }
    }

    /// Bin containing `x`, if in range.
    #[must_use]
    pub fn bin_of(&self, x: f64) -> Option<usize> {
        if !(x >= self.lo && x < self.hi) {
            return None;
        }
        let bin = ((x - self.lo) / self.bin_width) as usize;
        Some(bin.min(self.counts.len() - 1))
    }

    #[must_use]
    pub fn bin_center(&self, bin: usize) -> f64 {
        self.lo + (bin as f64 + 0.5) * self.bin_width
    }

    #[must_use]
    pub fn bin_width(&self) -> f64 {
        self.bin_width
    }

    #[must_use]
    pub fn counts(&self) -> &[f64] {
        &self.counts
    }

    #[must_use]
    pub fn n_bins(&self) -> usize {
        self.counts.len()
    }

    #[must_use]
    pub fn range(&self) -> (f64, f64) {
        (self.lo, self.hi)
    }

    /// Total number of fills, including under/overflow.
    #[must_use]
    pub fn entries(&self) -> u64 {
        self.entries
    }

    #[must_use]
    pub fn underflow(&self) -> u64 {
        self.underflow
    }

    #[must_use]
    pub fn overflow(&self) -> u64 {
        self.overflow
    }

    /// Iterates `(center, count)` for bins whose center lies in `[lo, hi]`.
    pub fn window(&self, lo: f64, hi: f64) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.counts
            .iter()
            .enumerate()
            .map(|(i, &c)| (self.bin_center(i), c))
            .filter(move |&(x, _)| x >= lo && x <= hi)
    }

    /// Mean and RMS of bin centers inside `[lo, hi]`, weighted by count.
    #[must_use]
    pub fn window_stats(&self, lo: f64, hi: f64) -> Option<WindowStats> {
        let (mut sw, mut sx, mut sxx) = (0.0, 0.0, 0.0);
        for (x, c) in self.window(lo, hi) {
            sw += c;
            sx += c * x;
            sxx += c * x * x;
        }
        if sw <= 0.0 {
            return None;
        }
        let mean = sx / sw;
        let var = (sxx / sw - mean * mean).max(0.0);
        Some(WindowStats {
            mean,
            rms: var.sqrt(),
            weight: sw,
        })
    }

    /// Center of the most populated bin, after a 3-bin running sum.
    #[must_use]
    pub fn peak(&self) -> Option<f64> {
        let n = self.counts.len();
        let mut best: Option<(usize, f64)> = None;
        for i in 0..n {
            let lo = i.saturating_sub(1);
            let hi = (i + 1).min(n - 1);
            let sum: f64 = self.counts[lo..=hi].iter().sum();
            if sum > 0.0 && best.map_or(true, |(_, b)| sum > b) {
                best = Some((i, sum));
            }
        }
        best.map(|(i, _)| self.bin_center(i))
    }
}

/// Per-bin running sums for a profile.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct ProfileBin {
    n: u64,
    sum_x: f64,
    sum_y: f64,
    sum_yy: f64,
}

/// Mean of `y` as a function of binned `x`.
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    bins: Vec<ProfileBin>,
    lo: f64,
    hi: f64,
    bin_width: f64,
}

/// One populated profile bin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfilePoint {
    /// Mean `x` of the entries in the bin.
    pub x: f64,
    /// Mean `y`.
    pub mean: f64,
    /// Error on the mean (spread / sqrt(n)).
    pub error: f64,
    pub entries: u64,
}

impl Profile {
    #[must_use]
    pub fn new(n_bins: usize, lo: f64, hi: f64) -> Self {
        let n_bins = n_bins.max(1);
        Self {
            bins: vec![ProfileBin::default(); n_bins],
            lo,
            hi,
            bin_width: (hi - lo) / n_bins as f64,
        }
    }

    /// Adds `(x, y)`; returns false if `x` is out of range.
    pub fn fill(&mut self, x: f64, y: f64) -> bool {
        if !(x >= self.lo && x < self.hi) {
            return false;
        }
        let bin = (((x - self.lo) / self.bin_width) as usize).min(self.bins.len() - 1);
        let b = &mut self.bins[bin];
        b.n += 1;
        b.sum_x += x;
        b.sum_y += y;
        b.sum_yy += y * y;
        true
    }

    #[must_use]
    pub fn n_bins(&self) -> usize {
        self.bins.len()
    }

    /// Returns the bin contents, `None` if the bin is empty.
    #[must_use]
    pub fn point(&self, bin: usize) -> Option<ProfilePoint> {
        let b = self.bins.get(bin)?;
        if b.n == 0 {
            return None;
        }
        let n = b.n as f64;
        let mean = b.sum_y / n;
        let spread = (b.sum_yy / n - mean * mean).max(0.0).sqrt();
        Some(ProfilePoint {
            x: b.sum_x / n,
            mean,
            error: spread / n.sqrt(),
            entries: b.n,
        })
    }

    /// Iterates the populated bins.
    pub fn points(&self) -> impl Iterator<Item = ProfilePoint> + '_ {
        (0..self.bins.len()).filter_map(|i| self.point(i))
    }
}
