//! Two-pass pedestal estimator.
//!
//! The rough pass histograms the LEX8 range of every face with no cuts and
//! takes iteratively trimmed moments. The final pass histograms all four
//! ranges, vetoing a crystal's readout when either face's LEX8 value strays
//! too far from its rough pedestal, then fits a Gaussian inside the trimmed
//! window.
#![allow(clippy::cast_precision_loss)]

use crate::fit::FitEngine;
use crate::scan::scan_events;
use crate::stats::StageStats;
use calcal_core::{
    EventSource, FaceIdx, FaceNum, Histogram, IdxArray, Pedestal, PedestalConfig, PedestalSet,
    RangeIdx, RangeNum, Result, StageLog, TwrNum, WindowStats,
};

/// Rough pedestals, one per face (LEX8 only).
pub type RoughPedestals = IdxArray<FaceIdx, Option<Pedestal>>;

/// Pedestal estimator for both passes.
pub struct PedestalEstimator<'a> {
    config: &'a PedestalConfig,
    fitter: &'a dyn FitEngine,
}

impl<'a> PedestalEstimator<'a> {
    /// Create an estimator.
    #[must_use]
    pub fn new(config: &'a PedestalConfig, fitter: &'a dyn FitEngine) -> Self {
        Self { config, fitter }
    }

    fn new_hist(&self) -> Histogram {
        Histogram::new(self.config.hist_bins, self.config.hist_lo, self.config.hist_hi)
    }

    /// Mean and RMS after repeatedly narrowing the window to
    /// `mean +- trim_sigma * rms`.
    #[must_use]
    pub fn trimmed_moments(&self, hist: &Histogram) -> Option<WindowStats> {
        let (lo, hi) = hist.range();
        let mut stats = hist.window_stats(lo, hi)?;
        for _ in 0..self.config.trim_iterations {
            let (wlo, whi) = self.trim_window(hist, &stats);
            stats = hist.window_stats(wlo, whi)?;
        }
        Some(stats)
    }

    fn trim_window(&self, hist: &Histogram, stats: &WindowStats) -> (f64, f64) {
        let half = (self.config.trim_sigma * stats.rms).max(0.5 * hist.bin_width());
        (stats.mean - half, stats.mean + half)
    }

    /// Final per-channel estimate: trimmed moments refined by a Gaussian
    /// fit inside the trimmed window.
    ///
    /// Returns `None` when the histogram has too few entries. The flag is
    /// true when the fit failed or fell below the resolution floor and the
    /// trimmed moments were used instead.
    #[must_use]
    pub fn fit_histogram(&self, hist: &Histogram) -> Option<(Pedestal, bool)> {
        let trimmed = self.trimmed_moments(hist)?;
        if trimmed.weight < self.config.min_entries as f64 {
            return None;
        }
        let fallback = Pedestal {
            mean: trimmed.mean,
            sigma: trimmed.rms,
        };
        match self.fitter.fit_gaussian(hist, self.trim_window(hist, &trimmed)) {
            Ok(fit) if fit.sigma >= self.config.min_sigma => Some((
                Pedestal {
                    mean: fit.mean,
                    sigma: fit.sigma,
                },
                false,
            )),
            _ => Some((fallback, true)),
        }
    }

    /// Pass 1: LEX8 histogram per face, trimmed moments.
    ///
    /// # Errors
    /// Propagates format faults from the event stream.
    pub fn rough_pass(
        &self,
        source: &mut dyn EventSource,
        towers: &[TwrNum],
        log: &StageLog<'_>,
        stats: &mut StageStats,
    ) -> Result<RoughPedestals> {
        log.info(format_args!("rough pedestal pass started"));
        let mut hists: IdxArray<FaceIdx, Option<Histogram>> = IdxArray::empty();

        scan_events(
            source,
            self.config.max_events,
            log,
            stats,
            |event, stats| {
                for hit in &event.hits {
                    let xtal = hit.xtal()?;
                    if !towers.contains(&xtal.twr()) {
                        stats.foreign_hits += 1;
                        continue;
                    }
                    hit.check_readouts()?;
                    stats.hits_seen += 1;
                    let mut filled = false;
                    for face in FaceNum::ALL {
                        match hit.adc(face, RangeNum::Lex8) {
                            Some(adc) => {
                                hists
                                    .get_or_insert_with(xtal.face(face), || self.new_hist())
                                    .fill(f64::from(adc));
                                filled = true;
                            }
                            None => stats.bad_hits += 1,
                        }
                    }
                    if filled {
                        stats.hits_used += 1;
                    }
                }
                Ok(())
            },
        )?;

        let mut rough: RoughPedestals = IdxArray::empty();
        for (face, hist) in hists.populated() {
            match self.trimmed_moments(hist) {
                Some(m) if m.weight >= self.config.min_entries as f64 => {
                    rough[face] = Some(Pedestal {
                        mean: m.mean,
                        sigma: m.rms,
                    });
                }
                _ => {
                    stats.skipped_channels += 1;
                    log.warn(format_args!("{face}: too few entries for a rough pedestal"));
                }
            }
        }
        for face in rough.missing(towers) {
            log.debug(format_args!("{face}: no rough pedestal"));
        }
        stats.log_summary(log);
        Ok(rough)
    }

    /// Pass 2: all ranges per channel, with the rough-pedestal veto.
    ///
    /// # Errors
    /// Propagates format faults; returns
    /// [`calcal_core::Error::UnpopulatedChannel`] if an active channel ends
    /// without a pedestal.
    pub fn final_pass(
        &self,
        source: &mut dyn EventSource,
        rough: &RoughPedestals,
        towers: &[TwrNum],
        log: &StageLog<'_>,
        stats: &mut StageStats,
    ) -> Result<PedestalSet> {
        log.info(format_args!("final pedestal pass started"));
        let mut hists: IdxArray<RangeIdx, Option<Histogram>> = IdxArray::empty();
        let cut = self.config.rough_cut_sigma;
        let floor = self.config.min_sigma;

        scan_events(
            source,
            self.config.max_events,
            log,
            stats,
            |event, stats| {
                for hit in &event.hits {
                    let xtal = hit.xtal()?;
                    if !towers.contains(&xtal.twr()) {
                        stats.foreign_hits += 1;
                        continue;
                    }
                    hit.check_readouts()?;
                    stats.hits_seen += 1;

                    let mut quiet = true;
                    for face in FaceNum::ALL {
                        let (Some(ped), Some(adc)) =
                            (rough[xtal.face(face)], hit.adc(face, RangeNum::Lex8))
                        else {
                            quiet = false;
                            stats.bad_hits += 1;
                            break;
                        };
                        if (f64::from(adc) - ped.mean).abs() > cut * ped.sigma.max(floor) {
                            quiet = false;
                            break;
                        }
                    }
                    if !quiet {
                        continue;
                    }

                    for face in FaceNum::ALL {
                        for range in RangeNum::ALL {
                            if let Some(adc) = hit.adc(face, range) {
                                hists
                                    .get_or_insert_with(xtal.face(face).range(range), || {
                                        self.new_hist()
                                    })
                                    .fill(f64::from(adc));
                            }
                        }
                    }
                    stats.hits_used += 1;
                }
                Ok(())
            },
        )?;

        let mut peds: PedestalSet = IdxArray::empty();
        for (idx, hist) in hists.populated() {
            match self.fit_histogram(hist) {
                Some((ped, fell_back)) => {
                    if fell_back {
                        stats.soft_faults += 1;
                        log.debug(format_args!(
                            "{idx}: Gaussian fit rejected, using trimmed moments"
                        ));
                    }
                    peds[idx] = Some(ped);
                }
                None => {
                    stats.skipped_channels += 1;
                    log.warn(format_args!("{idx}: too few entries for a pedestal"));
                }
            }
        }
        stats.log_summary(log);
        peds.check_complete("pedestal", towers)?;
        Ok(peds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::StandardFitter;
    use calcal_core::{CrystalHit, Event, MemoryEventSource, Readout, RecordingLog, XtalIdx};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal, Uniform};

    #[test]
    fn test_trimmed_fit_ignores_far_outliers() {
        let config = PedestalConfig::default();
        let fitter = StandardFitter::new();
        let est = PedestalEstimator::new(&config, &fitter);
        let mut rng = StdRng::seed_from_u64(17);
        let noise = Normal::new(500.0, 10.0).unwrap();
        let outlier = Uniform::new(620.0, 1500.0);

        let mut hist = Histogram::new(4096, -0.5, 4095.5);
        for _ in 0..20_000 {
            hist.fill(noise.sample(&mut rng));
        }
        // 0.75% of entries, all beyond 10 sigma.
        for _ in 0..150 {
            hist.fill(outlier.sample(&mut rng));
        }

        let (ped, fell_back) = est.fit_histogram(&hist).unwrap();
        assert!(!fell_back);
        assert!((ped.mean - 500.0).abs() < 0.5, "outliers pulled mean to {}", ped.mean);
        assert!((ped.sigma - 10.0).abs() < 0.5, "sigma {}", ped.sigma);
    }

    #[test]
    fn test_narrow_peak_falls_back_to_trimmed_moments() {
        let config = PedestalConfig::default().with_min_sigma(2.0);
        let fitter = StandardFitter::new();
        let est = PedestalEstimator::new(&config, &fitter);
        let mut hist = Histogram::new(4096, -0.5, 4095.5);
        for i in 0..300 {
            hist.fill(if i % 3 == 0 { 101.0 } else { 100.0 });
        }
        let (ped, fell_back) = est.fit_histogram(&hist).unwrap();
        assert!(fell_back);
        assert!((ped.mean - 100.333).abs() < 0.01);
    }

    fn pedestal_events(n: usize, seed: u64) -> MemoryEventSource {
        let mut rng = StdRng::seed_from_u64(seed);
        let noise = Normal::new(0.0, 3.0).unwrap();
        let twr = TwrNum::new(0).unwrap();
        (0..n as u64)
            .map(|id| {
                let hits = XtalIdx::in_tower(twr)
                    .map(|xtal| {
                        let readouts = RangeNum::ALL
                            .iter()
                            .map(|&r| {
                                let base = 50.0 + 5.0 * r as u8 as f64;
                                let mut adc = || (base + noise.sample(&mut rng)).round() as u16;
                                let pos = adc();
                                let neg = adc();
                                Readout::new(r, pos, neg)
                            })
                            .collect();
                        CrystalHit::new(xtal, readouts)
                    })
                    .collect();
                Event { id, hits }
            })
            .collect()
    }

    #[test]
    fn test_two_pass_recovers_pedestals() {
        let config = PedestalConfig::default();
        let fitter = StandardFitter::new();
        let est = PedestalEstimator::new(&config, &fitter);
        let mut source = pedestal_events(300, 3);
        let towers = [TwrNum::new(0).unwrap()];
        let sink = RecordingLog::new();
        let log = StageLog::new(&sink, "pedestal");

        let mut rough_stats = StageStats::default();
        let rough = est
            .rough_pass(&mut source, &towers, &log, &mut rough_stats)
            .unwrap();
        assert_eq!(rough_stats.events_read, 300);
        assert_eq!(rough.populated().count(), 96 * 2);

        let mut stats = StageStats::default();
        let peds = est
            .final_pass(&mut source, &rough, &towers, &log, &mut stats)
            .unwrap();
        assert!(stats.hits_used > 0);
        assert_eq!(peds.populated().count(), 96 * 8);
        for (idx, ped) in peds.populated() {
            let truth = 50.0 + 5.0 * f64::from(idx.range().raw());
            assert!((ped.mean - truth).abs() < 0.02 * truth, "{idx}: {}", ped.mean);
            assert!((ped.sigma - 3.0).abs() < 0.6, "{idx}: sigma {}", ped.sigma);
        }
    }

    #[test]
    fn test_rough_pass_counts_only_hits_with_lex8() {
        let config = PedestalConfig::default();
        let fitter = StandardFitter::new();
        let est = PedestalEstimator::new(&config, &fitter);
        let xtal = XtalIdx::from_raw(0, 3, 4).unwrap();
        let ranges = [RangeNum::Lex1, RangeNum::Hex8, RangeNum::Hex1, RangeNum::Hex1];
        let no_lex8: Vec<Readout> = ranges.iter().map(|&r| Readout::new(r, 60, 60)).collect();
        let full: Vec<Readout> = RangeNum::ALL
            .iter()
            .map(|&r| Readout::new(r, 50, 52))
            .collect();
        let mut source: MemoryEventSource = vec![
            Event {
                id: 0,
                hits: vec![CrystalHit::new(xtal, full)],
            },
            Event {
                id: 1,
                hits: vec![CrystalHit::new(xtal, no_lex8)],
            },
        ]
        .into_iter()
        .collect();
        let sink = RecordingLog::new();
        let log = StageLog::new(&sink, "pedestal");

        let mut stats = StageStats::default();
        est.rough_pass(&mut source, &[TwrNum::new(0).unwrap()], &log, &mut stats)
            .unwrap();
        assert_eq!(stats.hits_seen, 2);
        assert_eq!(stats.hits_used, 1);
        assert_eq!(stats.bad_hits, 2);
    }

    #[test]
    fn test_final_pass_counts_fit_fallbacks() {
        // Every Gaussian width lands under the floor.
        let config = PedestalConfig::default().with_min_sigma(10.0);
        let fitter = StandardFitter::new();
        let est = PedestalEstimator::new(&config, &fitter);
        let mut source = pedestal_events(300, 9);
        let towers = [TwrNum::new(0).unwrap()];
        let sink = RecordingLog::new();
        let log = StageLog::new(&sink, "pedestal");

        let rough = est
            .rough_pass(&mut source, &towers, &log, &mut StageStats::default())
            .unwrap();
        let mut stats = StageStats::default();
        let peds = est
            .final_pass(&mut source, &rough, &towers, &log, &mut stats)
            .unwrap();
        assert_eq!(stats.soft_faults, 96 * 8);
        assert_eq!(stats.skipped_channels, 0);
        for (idx, ped) in peds.populated() {
            let truth = 50.0 + 5.0 * f64::from(idx.range().raw());
            assert!((ped.mean - truth).abs() < 0.02 * truth, "{idx}: {}", ped.mean);
        }
    }
}
