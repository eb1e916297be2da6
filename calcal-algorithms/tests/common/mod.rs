//! Synthetic single-tower detector used by the integration tests.
#![allow(dead_code, clippy::cast_possible_truncation, clippy::cast_sign_loss)]

use calcal_algorithms::landau::{landau_density, LANDAU_PEAK};
use calcal_algorithms::{RawCiCurve, RawCiSet};
use calcal_core::{
    CrystalHit, DenseIndex, Event, IdxArray, MemoryEventSource, MuonConfig, RangeIdx, RangeNum,
    Readout, TwrNum, XtalIdx,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

/// Most probable large-diode deposit of a vertical muon, in DAC.
pub const MPV_DAC: f64 = 400.0;
/// Landau scale of the deposit, in DAC.
pub const WIDTH_DAC: f64 = 20.0;
/// Gaussian smearing of the deposit, in DAC.
pub const SMEAR_DAC: f64 = 12.0;
/// Large-to-small diode response ratio.
pub const SMALL_RATIO: f64 = 6.0;
/// Pedestal noise, in ADC.
pub const PED_NOISE: f64 = 3.0;

pub fn tower() -> TwrNum {
    TwrNum::new(0).unwrap()
}

/// Injected pedestal of a range.
pub fn true_ped(range: RangeNum) -> f64 {
    50.0 + 5.0 * f64::from(range.raw())
}

/// ADC per DAC of a range.
pub fn range_gain(range: RangeNum) -> f64 {
    if range.raw() % 2 == 0 {
        2.0
    } else {
        0.25
    }
}

/// Injected asymmetry at a position along a crystal (column units).
pub fn asym_law(pos: f64) -> f64 {
    0.1 * (pos - 5.5)
}

fn readouts(rng: &mut StdRng, dac: impl Fn(RangeNum, bool) -> f64, noise: f64) -> Vec<Readout> {
    let gauss = Normal::new(0.0, noise).unwrap();
    RangeNum::ALL
        .iter()
        .map(|&r| {
            let mut adc = |pos: bool| {
                let v = true_ped(r) + range_gain(r) * dac(r, pos) + gauss.sample(&mut *rng);
                v.round().clamp(0.0, 4095.0) as u16
            };
            let p = adc(true);
            let n = adc(false);
            Readout::new(r, p, n)
        })
        .collect()
}

/// Pedestal run: every crystal of the tower read out with no signal.
pub fn pedestal_run(n: u64, seed: u64) -> MemoryEventSource {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|id| {
            let hits = XtalIdx::in_tower(tower())
                .map(|xtal| CrystalHit::new(xtal, readouts(&mut rng, |_, _| 0.0, PED_NOISE)))
                .collect();
            Event { id, hits }
        })
        .collect()
}

/// Pedestal-subtracted charge-injection sweeps: DAC 0..2000 in steps of 20,
/// perfectly linear in every range.
pub fn raw_ci() -> RawCiSet {
    let dac: Vec<f64> = (0..=100).map(|i| f64::from(i) * 20.0).collect();
    let mut raw: RawCiSet = IdxArray::empty();
    for idx in RangeIdx::all().filter(|i| i.xtal().twr() == tower()) {
        let g = range_gain(idx.range());
        raw[idx] = Some(RawCiCurve::new(dac.clone(), dac.iter().map(|d| g * d).collect()));
    }
    raw
}

/// Inverse-CDF sampler of the standard Landau distribution, truncated at
/// `v = 40` so that no readout saturates.
pub struct LandauSampler {
    v: Vec<f64>,
    cdf: Vec<f64>,
}

impl LandauSampler {
    pub fn new() -> Self {
        let step = 0.01;
        let v: Vec<f64> = (0..=4400).map(|i| -4.0 + f64::from(i) * step).collect();
        let mut cdf = Vec::with_capacity(v.len());
        let mut acc = 0.0;
        let mut prev = landau_density(v[0]);
        cdf.push(0.0);
        for &x in &v[1..] {
            let d = landau_density(x);
            acc += 0.5 * (prev + d) * step;
            prev = d;
            cdf.push(acc);
        }
        for c in &mut cdf {
            *c /= acc;
        }
        Self { v, cdf }
    }

    pub fn sample(&self, rng: &mut StdRng) -> f64 {
        let u: f64 = rng.gen();
        let i = self.cdf.partition_point(|&c| c < u).clamp(1, self.v.len() - 1);
        let (c0, c1) = (self.cdf[i - 1], self.cdf[i]);
        let t = if c1 > c0 { (u - c0) / (c1 - c0) } else { 0.0 };
        self.v[i - 1] + t * (self.v[i] - self.v[i - 1])
    }
}

/// Column of a continuous coordinate.
fn column(x: f64) -> u8 {
    (x + 0.5).floor() as u8
}

/// Start coordinate such that `x0 + slope * l` stays inside the tower for
/// layers 0..8.
fn start(rng: &mut StdRng, slope: f64) -> f64 {
    let span = 7.0 * slope;
    let lo = -0.5 - span.min(0.0);
    let hi = 11.5 - span.max(0.0);
    rng.gen_range(lo..hi)
}

fn slope(rng: &mut StdRng) -> f64 {
    let s = rng.gen_range(0.15..0.3);
    if rng.gen_bool(0.5) {
        s
    } else {
        -s
    }
}

/// Muon run: single-tower tracks, each vertical in at least one projection.
///
/// The deposit of a crystal is a Landau sample scaled by the path length
/// `sec(theta)` of the inclined projection; light splits between the faces
/// following [`asym_law`].
pub fn muon_run(n: u64, seed: u64) -> MemoryEventSource {
    let mut rng = StdRng::seed_from_u64(seed);
    let landau = LandauSampler::new();
    let smear = Normal::new(0.0, SMEAR_DAC).unwrap();
    let pitch = MuonConfig::default().pitch_ratio();

    (0..n)
        .map(|id| {
            let kind: f64 = rng.gen();
            let (sx, sy) = if kind < 0.3 {
                (0.0, 0.0)
            } else if kind < 0.65 {
                (0.0, slope(&mut rng))
            } else {
                (slope(&mut rng), 0.0)
            };
            let x0 = start(&mut rng, sx);
            let y0 = start(&mut rng, sy);
            let sec = (sx.abs().max(sy.abs()) * pitch).hypot(1.0);

            let hits = (0..8u8)
                .map(|lyr| {
                    let l = f64::from(lyr);
                    let (x, y) = (x0 + sx * l, y0 + sy * l);
                    // Even layers measure x and are read along y.
                    let (col, along) = if lyr % 2 == 0 { (column(x), y) } else { (column(y), x) };
                    let deposit = MPV_DAC
                        + WIDTH_DAC * (landau.sample(&mut rng) - LANDAU_PEAK)
                        + smear.sample(&mut rng);
                    let large = deposit.max(1.0) * sec;
                    let half = 0.5 * asym_law(along);
                    let dac = |r: RangeNum, pos: bool| {
                        let diode = if r.raw() < 2 { large } else { large / SMALL_RATIO };
                        diode * if pos { half.exp() } else { (-half).exp() }
                    };
                    let xtal = XtalIdx::from_raw(0, lyr, col).unwrap();
                    CrystalHit::new(xtal, readouts(&mut rng, dac, 1.0))
                })
                .collect();
            Event { id, hits }
        })
        .collect()
}
