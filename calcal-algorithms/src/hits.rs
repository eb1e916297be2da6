//! Per-event hit summary and muon track selection.
#![allow(clippy::cast_possible_truncation)]

use crate::stats::StageStats;
use calcal_core::{
    ColNum, DenseIndex, DiodeIdx, DiodeNum, Dir, Event, FaceNum, IdxArray, MuonConfig,
    PedestalSet, Result, TwrNum, XtalIdx, N_COL, N_LYR,
};

/// Number of layers per projection.
const LYRS_PER_DIR: usize = N_LYR / 2;

/// Summary of the hits of one tower in one event.
///
/// Holds pedestal-subtracted x8-range signals for every diode of every hit
/// crystal, per-projection hit lists and counts, and the two track-quality
/// flags. The summary is reused across events; [`HitSummary::summarize`]
/// resets it first.
#[derive(Debug, Clone)]
pub struct HitSummary {
    twr: TwrNum,
    threshold: f64,
    max_layer_hits: usize,
    signal: IdxArray<DiodeIdx, f64>,
    touched: Vec<XtalIdx>,
    hits: [Vec<XtalIdx>; 2],
    per_lyr: [usize; N_LYR],
    per_col: [[usize; N_COL]; 2],
    first_col: [Option<ColNum>; 2],
    good: [bool; 2],
}

impl HitSummary {
    /// Creates an empty summary for one tower.
    #[must_use]
    pub fn new(twr: TwrNum, config: &MuonConfig) -> Self {
        Self {
            twr,
            threshold: config.hit_threshold,
            max_layer_hits: config.max_layer_hits,
            signal: IdxArray::filled(0.0),
            touched: Vec::new(),
            hits: [Vec::new(), Vec::new()],
            per_lyr: [0; N_LYR],
            per_col: [[0; N_COL]; 2],
            first_col: [None; 2],
            good: [false; 2],
        }
    }

    /// Tower this summary covers.
    #[must_use]
    pub fn tower(&self) -> TwrNum {
        self.twr
    }

    fn reset(&mut self) {
        for xtal in self.touched.drain(..) {
            for face in FaceNum::ALL {
                for diode in DiodeNum::ALL {
                    self.signal[xtal.face(face).diode(diode)] = 0.0;
                }
            }
        }
        for list in &mut self.hits {
            list.clear();
        }
        self.per_lyr = [0; N_LYR];
        self.per_col = [[0; N_COL]; 2];
        self.first_col = [None; 2];
        self.good = [false; 2];
    }

    /// Rebuilds the summary from the hits of this tower in `event`.
    ///
    /// Hits without a pedestal or without an x8 readout are counted as bad
    /// hits and skipped.
    ///
    /// # Errors
    /// Returns a format fault for invalid coordinates or a readout count
    /// other than 4.
    pub fn summarize(
        &mut self,
        event: &Event,
        peds: &PedestalSet,
        stats: &mut StageStats,
    ) -> Result<()> {
        self.reset();

        for hit in &event.hits {
            let xtal = hit.xtal()?;
            if xtal.twr() != self.twr {
                continue;
            }
            hit.check_readouts()?;
            stats.hits_seen += 1;

            let mut signals = [[0.0; 2]; 2];
            let mut complete = true;
            'faces: for face in FaceNum::ALL {
                for diode in DiodeNum::ALL {
                    let rng = xtal.face(face).range(diode.x8_range());
                    match (hit.adc(face, rng.range()), peds[rng]) {
                        (Some(adc), Some(ped)) => {
                            signals[face as usize][diode as usize] = f64::from(adc) - ped.mean;
                        }
                        _ => {
                            complete = false;
                            break 'faces;
                        }
                    }
                }
            }
            if !complete {
                stats.bad_hits += 1;
                continue;
            }

            self.touched.push(xtal);
            for face in FaceNum::ALL {
                for diode in DiodeNum::ALL {
                    self.signal[xtal.face(face).diode(diode)] =
                        signals[face as usize][diode as usize];
                }
            }

            let large = signals[FaceNum::Pos as usize][DiodeNum::Large as usize]
                + signals[FaceNum::Neg as usize][DiodeNum::Large as usize];
            if large <= self.threshold {
                continue;
            }

            let lyr = xtal.lyr();
            let col = xtal.col();
            let dir = lyr.dir() as usize;
            self.hits[dir].push(xtal);
            self.per_lyr[lyr.val()] += 1;
            self.per_col[dir][col.val()] += 1;
            self.first_col[dir].get_or_insert(col);
        }

        if self.per_lyr.iter().any(|&n| n > self.max_layer_hits) {
            return Ok(());
        }
        for dir in Dir::ALL {
            let d = dir as usize;
            let lyrs = self
                .per_lyr
                .iter()
                .enumerate()
                .filter(|&(l, &n)| n > 0 && (l % 2 == d))
                .count();
            let cols = self.per_col[d].iter().filter(|&&n| n > 0).count();
            let orth = self.hits[dir.orthogonal() as usize].len();
            self.good[d] = lyrs == LYRS_PER_DIR && cols == 1 && orth > 0;
        }
        Ok(())
    }

    /// True if the hits of `dir` form a clean single-column track.
    #[must_use]
    pub fn is_good(&self, dir: Dir) -> bool {
        self.good[dir as usize]
    }

    /// Shorthand for `is_good(Dir::X)`.
    #[must_use]
    pub fn good_x(&self) -> bool {
        self.is_good(Dir::X)
    }

    /// Shorthand for `is_good(Dir::Y)`.
    #[must_use]
    pub fn good_y(&self) -> bool {
        self.is_good(Dir::Y)
    }

    /// Hit crystals in layers of `dir`, in event order.
    #[must_use]
    pub fn hits(&self, dir: Dir) -> &[XtalIdx] {
        &self.hits[dir as usize]
    }

    /// Column of the first hit in `dir`.
    #[must_use]
    pub fn first_col(&self, dir: Dir) -> Option<ColNum> {
        self.first_col[dir as usize]
    }

    /// Number of hits in a layer.
    #[must_use]
    pub fn layer_hits(&self, lyr: usize) -> usize {
        self.per_lyr[lyr]
    }

    /// Number of hits in a column of the layers of `dir`.
    #[must_use]
    pub fn col_hits(&self, dir: Dir, col: ColNum) -> usize {
        self.per_col[dir as usize][col.val()]
    }

    /// Pedestal-subtracted x8-range signal of a diode (0 if not hit).
    #[must_use]
    pub fn signal(&self, diode: DiodeIdx) -> f64 {
        self.signal[diode]
    }
}
