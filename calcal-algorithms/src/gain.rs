//! Path-length-corrected MeV/DAC gain estimator.
//!
//! For every good track the orthogonal hits give a coarse line (column per
//! layer) which gates the track angle and predicts where the track crosses
//! each along-track crystal. Along-track hits too close to a crystal end
//! are dropped; the survivors are placed precisely with the position
//! splines and refit to get the track inclination. Signals are scaled down
//! by the path-length factor `sec(theta)` before histogramming.
#![allow(clippy::cast_precision_loss)]

use crate::asym::diode_dacs;
use crate::fit::{FitEngine, FitPoint, LineFit};
use crate::hits::HitSummary;
use crate::scan::scan_events;
use crate::stats::StageStats;
use calcal_core::{
    DenseIndex, DiodeNum, Dir, Error, EventSource, FaceNum, GainConfig, Histogram, IdxArray,
    IntNonlinSet, MevPerDac, MevPerDacSet, MuonConfig, PedestalSet, PositionSplines, Profile,
    Result, StageLog, TwrNum, ValErr, XtalIdx,
};

const POS: usize = FaceNum::Pos as usize;
const NEG: usize = FaceNum::Neg as usize;
const LRG: usize = DiodeNum::Large as usize;
const SM: usize = DiodeNum::Small as usize;

/// A track accepted for gain filling.
#[derive(Debug, Clone)]
pub(crate) struct GainTrack {
    /// Path-length factor `sec(theta)`.
    pub sec_theta: f64,
    /// Along-track crystals kept after the edge cut, with their DACs.
    pub hits: Vec<(XtalIdx, [[f64; 2]; 2])>,
}

/// Per-crystal accumulators.
#[derive(Debug, Clone)]
struct GainHists {
    large: Histogram,
    ratio: Profile,
}

/// Derives MeV/DAC constants from muon events.
pub struct GainEstimator<'a> {
    muon: &'a MuonConfig,
    config: &'a GainConfig,
    peds: &'a PedestalSet,
    inl: &'a IntNonlinSet,
    splines: &'a PositionSplines,
    fitter: &'a dyn FitEngine,
}

impl<'a> GainEstimator<'a> {
    /// Create an estimator over the products of the earlier stages.
    #[must_use]
    pub fn new(
        muon: &'a MuonConfig,
        config: &'a GainConfig,
        peds: &'a PedestalSet,
        inl: &'a IntNonlinSet,
        splines: &'a PositionSplines,
        fitter: &'a dyn FitEngine,
    ) -> Self {
        Self {
            muon,
            config,
            peds,
            inl,
            splines,
            fitter,
        }
    }

    fn line_through(&self, points: &[FitPoint]) -> Option<LineFit> {
        self.fitter.fit_line(points).ok()
    }

    /// Applies the angle and edge cuts to a good track in `dir` and measures
    /// its inclination. Returns `None` if the track is rejected.
    pub(crate) fn fit_track(
        &self,
        summary: &HitSummary,
        dir: Dir,
        stats: &mut StageStats,
    ) -> Option<GainTrack> {
        let orth: Vec<FitPoint> = summary
            .hits(dir.orthogonal())
            .iter()
            .map(|x| FitPoint::new(x.lyr().val() as f64, x.col().val() as f64))
            .collect();
        let coarse = self.line_through(&orth)?;
        let pitch = self.muon.pitch_ratio();
        let max_tan = self.config.max_track_angle_deg.to_radians().tan();
        if (coarse.slope * pitch).abs() > max_tan {
            return None;
        }

        let (edge_lo, edge_hi) = self.config.edge_window();
        let mut hits = Vec::new();
        let mut placed = Vec::new();
        for &xtal in summary.hits(dir) {
            let lyr = xtal.lyr().val() as f64;
            let predicted = coarse.eval(lyr);
            if predicted < edge_lo || predicted > edge_hi {
                continue;
            }
            let dacs = match diode_dacs(summary, xtal, self.inl) {
                Ok(d) => d,
                Err(fault) => {
                    fault.count(stats);
                    continue;
                }
            };
            let Some(spline) = self.splines[xtal].as_ref() else {
                stats.bad_hits += 1;
                continue;
            };
            let asym = (dacs[POS][LRG] / dacs[NEG][LRG]).ln();
            placed.push(FitPoint::new(lyr, spline.eval(asym)));
            hits.push((xtal, dacs));
        }
        if placed.len() < 2 {
            return None;
        }

        let fine = self.line_through(&placed)?;
        let tan_theta = fine.slope * pitch;
        Some(GainTrack {
            sec_theta: tan_theta.hypot(1.0),
            hits,
        })
    }

    /// Scans the muon events and returns MeV/DAC for every active crystal.
    ///
    /// # Errors
    /// Propagates format faults; returns
    /// [`Error::UnpopulatedChannel`] if an active crystal ends without a
    /// constant.
    pub fn run(
        &self,
        source: &mut dyn EventSource,
        towers: &[TwrNum],
        log: &StageLog<'_>,
        stats: &mut StageStats,
    ) -> Result<MevPerDacSet> {
        log.info(format_args!("gain stage started"));
        let mut hists: IdxArray<XtalIdx, Option<GainHists>> = IdxArray::empty();
        let mut summaries: Vec<HitSummary> =
            towers.iter().map(|&t| HitSummary::new(t, self.muon)).collect();

        scan_events(
            source,
            self.muon.max_events,
            log,
            stats,
            |event, stats| {
                stats.foreign_hits += event
                    .hits
                    .iter()
                    .filter(|h| !towers.iter().any(|t| t.raw() == h.twr))
                    .count();
                for summary in &mut summaries {
                    summary.summarize(event, self.peds, stats)?;
                    for dir in Dir::ALL {
                        if !summary.is_good(dir) {
                            continue;
                        }
                        let Some(track) = self.fit_track(summary, dir, stats) else {
                            stats.tracks_rejected += 1;
                            continue;
                        };
                        stats.tracks_good += 1;
                        for (xtal, dacs) in track.hits {
                            let large = (dacs[POS][LRG] * dacs[NEG][LRG]).sqrt() / track.sec_theta;
                            let small = (dacs[POS][SM] * dacs[NEG][SM]).sqrt() / track.sec_theta;
                            let h = hists.get_or_insert_with(xtal, || self.new_hists());
                            h.large.fill(large);
                            h.ratio.fill(small, large);
                            stats.hits_used += 1;
                        }
                    }
                }
                Ok(())
            },
        )?;

        let mut mpd: MevPerDacSet = IdxArray::empty();
        for (xtal, h) in hists.populated() {
            match self.mev_per_dac(&h.large, &h.ratio) {
                Ok(m) => mpd[xtal] = Some(m),
                Err(e) => {
                    stats.skipped_channels += 1;
                    log.warn(format_args!("{xtal}: {e}"));
                }
            }
        }
        stats.log_summary(log);
        mpd.check_complete("mevPerDac", towers)?;
        Ok(mpd)
    }

    fn new_hists(&self) -> GainHists {
        GainHists {
            large: Histogram::new(self.config.hist_bins, 0.0, self.config.hist_max_dac),
            ratio: Profile::new(self.config.ratio_prof_bins, 0.0, self.config.ratio_prof_max),
        }
    }

    /// Gain constants of one crystal from its large-diode DAC histogram and
    /// its large-vs-small ratio profile.
    ///
    /// # Errors
    /// Returns [`Error::DataQuality`] for too few entries or a failed or
    /// non-physical fit.
    pub fn mev_per_dac(&self, large: &Histogram, ratio: &Profile) -> Result<MevPerDac> {
        if large.entries() < self.config.min_entries {
            return Err(Error::DataQuality(format!(
                "{} entries, need {}",
                large.entries(),
                self.config.min_entries
            )));
        }
        let peak = large
            .peak()
            .ok_or_else(|| Error::DataQuality("empty DAC histogram".into()))?;
        let window = (self.config.fit_lo_frac * peak, self.config.fit_hi_frac * peak);
        let landau = self
            .fitter
            .fit_landau(large, window)
            .map_err(|e| Error::DataQuality(format!("Landau fit: {e}")))?;
        if !(landau.mpv > 0.0) {
            return Err(Error::DataQuality(format!("non-physical MPV {}", landau.mpv)));
        }
        let lrg = self.config.muon_deposit_mev / landau.mpv;
        let lrg_err = lrg * landau.width / landau.mpv;

        let weighted: Vec<FitPoint> = ratio
            .points()
            .filter(|p| p.entries >= 2 && p.error > 0.0)
            .map(|p| FitPoint::with_sigma(p.x, p.mean, p.error))
            .collect();
        let points = if weighted.len() >= 2 {
            weighted
        } else {
            ratio.points().map(|p| FitPoint::new(p.x, p.mean)).collect()
        };
        let line = self
            .fitter
            .fit_line(&points)
            .map_err(|e| Error::DataQuality(format!("ratio fit: {e}")))?;
        if !(line.slope > 0.0) {
            return Err(Error::DataQuality(format!(
                "non-physical large/small ratio slope {}",
                line.slope
            )));
        }

        let sm = lrg * line.slope;
        let rel = (line.slope_err / line.slope).hypot(lrg_err / lrg);
        Ok(MevPerDac {
            large: ValErr::new(lrg, lrg_err),
            small: ValErr::new(sm, sm * rel),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asym::tests::{asym_law, crystal, linear_inl};
    use crate::fit::StandardFitter;
    use crate::hits::tests::flat_peds;
    use crate::landau::landau_gauss;
    use approx::assert_relative_eq;
    use calcal_core::{CrystalHit, Event, MonotoneSpline};

    fn law_splines() -> PositionSplines {
        let points: Vec<(f64, f64)> = (0..12)
            .map(|p| (asym_law(f64::from(p)), f64::from(p)))
            .collect();
        let spline = MonotoneSpline::from_points(&points).unwrap();
        let twr = TwrNum::new(0).unwrap();
        IdxArray::from_fn(|x: XtalIdx| (x.twr() == twr).then(|| spline.clone()))
    }

    struct Fixture {
        muon: MuonConfig,
        gain: GainConfig,
        peds: PedestalSet,
        inl: IntNonlinSet,
        splines: PositionSplines,
        fitter: StandardFitter,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                muon: MuonConfig::default(),
                gain: GainConfig::default(),
                peds: flat_peds(50.0),
                inl: linear_inl(),
                splines: law_splines(),
                fitter: StandardFitter::new(),
            }
        }

        fn estimator(&self) -> GainEstimator<'_> {
            GainEstimator::new(
                &self.muon,
                &self.gain,
                &self.peds,
                &self.inl,
                &self.splines,
                &self.fitter,
            )
        }

        fn track(&self, hits: Vec<CrystalHit>) -> (Option<GainTrack>, StageStats) {
            let mut summary = HitSummary::new(TwrNum::new(0).unwrap(), &self.muon);
            let mut stats = StageStats::default();
            summary
                .summarize(&Event { id: 0, hits }, &self.peds, &mut stats)
                .unwrap();
            assert!(summary.good_x());
            let track = self.estimator().fit_track(&summary, Dir::X, &mut stats);
            (track, stats)
        }
    }

    /// X track in column 5 crossing the X crystals at `along(lyr)`, with Y
    /// hits in the column nearest to the crossing point.
    fn inclined_x_track(along: impl Fn(u8) -> f64) -> Vec<CrystalHit> {
        let mut hits = Vec::new();
        for lyr in 0..8u8 {
            let p = along(lyr);
            if lyr % 2 == 0 {
                hits.push(crystal(lyr, 5, p));
            } else {
                hits.push(crystal(lyr, p.round() as u8, 5.0));
            }
        }
        hits
    }

    #[test]
    fn test_vertical_track_has_unit_path_length() {
        let fx = Fixture::new();
        let (track, _) = fx.track(inclined_x_track(|_| 4.0));
        let track = track.unwrap();
        assert_eq!(track.hits.len(), 4);
        assert_relative_eq!(track.sec_theta, 1.0, epsilon = 1e-3);
    }

    #[test]
    fn test_inclined_track_path_length() {
        let fx = Fixture::new();
        let (track, _) = fx.track(inclined_x_track(|l| 3.0 + 0.25 * f64::from(l)));
        let tan = 0.25 * fx.muon.pitch_ratio();
        assert_relative_eq!(track.unwrap().sec_theta, tan.hypot(1.0), epsilon = 1e-2);
    }

    #[test]
    fn test_steep_track_is_rejected() {
        let fx = Fixture::new();
        let (track, _) = fx.track(inclined_x_track(|l| 0.5 + 1.4 * f64::from(l)));
        assert!(track.is_none());
    }

    #[test]
    fn test_edge_crossings_are_dropped() {
        let fx = Fixture::new();
        let (track, _) = fx.track(inclined_x_track(|_| 0.0));
        assert!(track.is_none());
    }

    #[test]
    fn test_mev_per_dac_from_landau_peak() {
        let fx = Fixture::new();
        let est = fx.estimator();
        let mut large = Histogram::new(200, 0.0, 2000.0);
        for bin in 0..large.n_bins() {
            let x = large.bin_center(bin);
            let expected = 4000.0 * 10.0 * landau_gauss(x, 400.0, 20.0, 12.0);
            for _ in 0..expected.round() as usize {
                large.fill(x);
            }
        }
        let mut ratio = Profile::new(100, 0.0, 1000.0);
        for i in 0..60 {
            let small = 40.0 + f64::from(i);
            ratio.fill(small, 6.0 * small);
        }

        let mpd = est.mev_per_dac(&large, &ratio).unwrap();
        assert_relative_eq!(mpd.large.value, 22.288 / 400.0, max_relative = 0.02);
        assert_relative_eq!(mpd.small.value, 6.0 * mpd.large.value, max_relative = 1e-6);
        assert!(mpd.large.error > 0.0);
        // Ratio-slope error adds in quadrature.
        assert!(mpd.small.rel_error() > mpd.large.rel_error());
    }

    #[test]
    fn test_sparse_histogram_is_data_quality_fault() {
        let fx = Fixture::new();
        let mut large = Histogram::new(200, 0.0, 2000.0);
        large.fill(400.0);
        let err = fx
            .estimator()
            .mev_per_dac(&large, &Profile::new(10, 0.0, 100.0))
            .unwrap_err();
        assert!(matches!(err, Error::DataQuality(_)));
    }
}
