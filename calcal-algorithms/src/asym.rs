//! Light-asymmetry profiles and the asymmetry-to-position reconstruction.
//!
//! A clean track in one projection fixes the position of the hits in the
//! orthogonal projection along their crystals: it is the column of the
//! track. Each such hit contributes `ln(pos / neg)` of its linearized face
//! signals to a per-crystal profile over the interior columns.
#![allow(clippy::cast_precision_loss)]

use crate::hits::HitSummary;
use crate::scan::scan_events;
use crate::stats::StageStats;
use calcal_core::{
    AsymCurve, AsymSet, AsymType, ColNum, DenseIndex, DiodeNum, Dir, Error, EventSource, FaceNum,
    IdxArray, IntNonlinSet, MonotoneSpline, MuonConfig, PedestalSet, PositionSplines, Profile,
    Result, StageLog, TwrNum, XtalAsym, XtalIdx, N_ASYM_PTS, N_ASYM_TYPES, N_COL,
};

/// Why a hit could not be linearized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DacFault {
    /// A diode has no INL curve.
    NoCurve,
    /// A diode linearized to a non-positive DAC.
    NonPositive,
}

impl DacFault {
    pub(crate) fn count(self, stats: &mut StageStats) {
        match self {
            DacFault::NoCurve => stats.bad_hits += 1,
            DacFault::NonPositive => stats.soft_faults += 1,
        }
    }
}

/// DAC of every face-diode of a hit crystal, indexed `[face][diode]`.
pub(crate) fn diode_dacs(
    summary: &HitSummary,
    xtal: XtalIdx,
    inl: &IntNonlinSet,
) -> std::result::Result<[[f64; 2]; 2], DacFault> {
    let mut dacs = [[0.0; 2]; 2];
    for face in FaceNum::ALL {
        for diode in DiodeNum::ALL {
            let idx = xtal.face(face).diode(diode);
            let curve = inl.for_diode(idx).ok_or(DacFault::NoCurve)?;
            let dac = curve.adc_to_dac(summary.signal(idx));
            if dac.is_nan() || dac <= 0.0 {
                return Err(DacFault::NonPositive);
            }
            dacs[face as usize][diode as usize] = dac;
        }
    }
    Ok(dacs)
}

/// Along-crystal position of the orthogonal hits for a good track in `dir`.
///
/// Edge columns are excluded.
fn track_position(summary: &HitSummary, dir: Dir) -> Option<ColNum> {
    summary
        .first_col(dir)
        .filter(|c| c.val() != 0 && c.val() != N_COL - 1)
}

/// Builds asymmetry curves from muon events.
pub struct AsymProfiler<'a> {
    muon: &'a MuonConfig,
    peds: &'a PedestalSet,
    inl: &'a IntNonlinSet,
}

impl<'a> AsymProfiler<'a> {
    /// Create a profiler reading pedestals and INL curves from earlier stages.
    #[must_use]
    pub fn new(muon: &'a MuonConfig, peds: &'a PedestalSet, inl: &'a IntNonlinSet) -> Self {
        Self { muon, peds, inl }
    }

    /// Scans the muon events and returns one asymmetry record per active
    /// crystal.
    ///
    /// # Errors
    /// Propagates format faults; returns
    /// [`Error::UnpopulatedChannel`] if an active crystal lacks samples at
    /// any interior position.
    pub fn run(
        &self,
        source: &mut dyn EventSource,
        towers: &[TwrNum],
        log: &StageLog<'_>,
        stats: &mut StageStats,
    ) -> Result<AsymSet> {
        log.info(format_args!("asymmetry stage started"));
        let mut profiles: IdxArray<XtalIdx, Option<Vec<Profile>>> = IdxArray::empty();
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
                        let Some(col) = track_position(summary, dir) else {
                            continue;
                        };
                        stats.tracks_good += 1;
                        let pos = col.val() as f64;
                        for &xtal in summary.hits(dir.orthogonal()) {
                            let dacs = match diode_dacs(summary, xtal, self.inl) {
                                Ok(d) => d,
                                Err(fault) => {
                                    fault.count(stats);
                                    continue;
                                }
                            };
                            let profs = profiles.get_or_insert_with(xtal, || {
                                (0..N_ASYM_TYPES)
                                    .map(|_| {
                                        Profile::new(N_ASYM_PTS, 0.5, N_ASYM_PTS as f64 + 0.5)
                                    })
                                    .collect()
                            });
                            for asym in AsymType::ALL {
                                let ratio = dacs[FaceNum::Pos as usize][asym.pos as usize]
                                    / dacs[FaceNum::Neg as usize][asym.neg as usize];
                                profs[asym.val()].fill(pos, ratio.ln());
                            }
                            stats.hits_used += 1;
                        }
                    }
                }
                Ok(())
            },
        )?;

        let mut asym: AsymSet = IdxArray::empty();
        for (xtal, profs) in profiles.populated() {
            match finalize_curves(profs) {
                Some(curves) => asym[xtal] = Some(XtalAsym { curves }),
                None => {
                    stats.skipped_channels += 1;
                    log.warn(format_args!("{xtal}: asymmetry profile has empty positions"));
                }
            }
        }
        stats.log_summary(log);
        asym.check_complete("asymmetry", towers)?;
        Ok(asym)
    }
}

fn finalize_curves(profs: &[Profile]) -> Option<[AsymCurve; N_ASYM_TYPES]> {
    let mut curves = [AsymCurve {
        value: [0.0; N_ASYM_PTS],
        error: [0.0; N_ASYM_PTS],
    }; N_ASYM_TYPES];
    for (curve, prof) in curves.iter_mut().zip(profs) {
        for i in 0..N_ASYM_PTS {
            let pt = prof.point(i)?;
            curve.value[i] = pt.mean;
            curve.error[i] = pt.error;
        }
    }
    Some(curves)
}

/// Builds the asymmetry-to-position spline of one crystal from its
/// large-diode curve.
///
/// The samples sit at positions `1..=10`; one point is extrapolated
/// linearly at each end (positions 0 and 11) so that the boundary samples
/// invert cleanly.
///
/// # Errors
/// Returns [`Error::DataQuality`] if the curve is not strictly monotone.
pub fn position_spline(asym: &XtalAsym) -> Result<MonotoneSpline> {
    let v = &asym.get(AsymType::LL).value;
    let n = N_ASYM_PTS;
    let mut pos = Vec::with_capacity(n + 2);
    let mut val = Vec::with_capacity(n + 2);
    pos.push(0.0);
    val.push(v[0] - (v[1] - v[0]));
    for (i, &a) in v.iter().enumerate() {
        pos.push(i as f64 + 1.0);
        val.push(a);
    }
    pos.push(n as f64 + 1.0);
    val.push(v[n - 1] + (v[n - 1] - v[n - 2]));
    MonotoneSpline::new(pos, val)?.inverse()
}

/// Builds the position spline of every active crystal.
///
/// # Errors
/// Returns [`Error::UnpopulatedChannel`] if an active crystal has no usable
/// curve.
pub fn build_position_splines(
    asym: &AsymSet,
    towers: &[TwrNum],
    log: &StageLog<'_>,
    stats: &mut StageStats,
) -> Result<PositionSplines> {
    let mut splines: PositionSplines = IdxArray::empty();
    for (xtal, rec) in asym.populated() {
        if !towers.contains(&xtal.twr()) {
            continue;
        }
        match position_spline(rec) {
            Ok(s) => splines[xtal] = Some(s),
            Err(Error::DataQuality(msg)) => {
                stats.skipped_channels += 1;
                log.warn(format_args!("{xtal}: {msg}"));
            }
            Err(e) => return Err(e),
        }
    }
    log.info(format_args!("built {} position splines", splines.populated().count()));
    splines.check_complete("position spline", towers)?;
    Ok(splines)
}
