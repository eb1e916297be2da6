//! Calibration record types produced by the pipeline stages.
//!
//! Each record set is an [`IdxArray`] of optional entries keyed by the
//! granularity the constant is defined at. Sets start empty, are filled by
//! exactly one stage, then handed read-only to later stages and writers.

use crate::array::IdxArray;
use crate::index::{DiodeIdx, DiodeNum, RangeIdx, XtalIdx, N_DIODE};
use crate::spline::MonotoneSpline;
use crate::{Error, Result};
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Number of position samples along a crystal in an asymmetry curve.
pub const N_ASYM_PTS: usize = 10;

/// Number of face-diode pairings in an asymmetry record.
pub const N_ASYM_TYPES: usize = N_DIODE * N_DIODE;

/// Baseline ADC of one range channel.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Pedestal {
    pub mean: f64,
    pub sigma: f64,
}

/// Pedestals for every range channel.
pub type PedestalSet = IdxArray<RangeIdx, Option<Pedestal>>;

/// Charge-injection response of one range channel: pedestal-subtracted ADC
/// as a function of injected DAC.
#[derive(Debug, Clone, PartialEq)]
pub struct IntNonlinCurve {
    dac: Vec<f64>,
    adc: Vec<f64>,
    dac_to_adc: MonotoneSpline,
    adc_to_dac: MonotoneSpline,
}

impl IntNonlinCurve {
    /// Builds the curve and both lookup splines.
    ///
    /// # Errors
    /// Returns [`Error::DataQuality`] unless both sequences are strictly
    /// increasing with at least two points.
    pub fn new(dac: Vec<f64>, adc: Vec<f64>) -> Result<Self> {
        if adc.windows(2).any(|w| w[1] <= w[0]) {
            return Err(Error::DataQuality(
                "integral nonlinearity ADC values are not strictly increasing".into(),
            ));
        }
        let dac_to_adc = MonotoneSpline::new(dac.clone(), adc.clone())?;
        let adc_to_dac = MonotoneSpline::new(adc.clone(), dac.clone())?;
        Ok(Self {
            dac,
            adc,
            dac_to_adc,
            adc_to_dac,
        })
    }

    /// Converts a pedestal-subtracted ADC to DAC.
    #[must_use]
    pub fn adc_to_dac(&self, adc: f64) -> f64 {
        self.adc_to_dac.eval(adc)
    }

    /// Converts DAC to a pedestal-subtracted ADC.
    #[must_use]
    pub fn dac_to_adc(&self, dac: f64) -> f64 {
        self.dac_to_adc.eval(dac)
    }

    #[must_use]
    pub fn dac(&self) -> &[f64] {
        &self.dac
    }

    #[must_use]
    pub fn adc(&self) -> &[f64] {
        &self.adc
    }

    /// Iterates `(dac, adc)` samples in DAC order.
    pub fn points(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.dac.iter().copied().zip(self.adc.iter().copied())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.dac.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dac.is_empty()
    }
}

/// Integral-nonlinearity curves for every range channel.
pub type IntNonlinSet = IdxArray<RangeIdx, Option<IntNonlinCurve>>;

impl IdxArray<RangeIdx, Option<IntNonlinCurve>> {
    /// Curve used to linearize a diode: the diode's x8 range.
    #[must_use]
    pub fn for_diode(&self, diode: DiodeIdx) -> Option<&IntNonlinCurve> {
        self[diode.x8_range()].as_ref()
    }
}

/// Pairing of the diode read on each face for one asymmetry curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AsymType {
    pub pos: DiodeNum,
    pub neg: DiodeNum,
}

impl AsymType {
    /// Large diode on both faces; the only pairing used for positions.
    pub const LL: AsymType = AsymType::new(DiodeNum::Large, DiodeNum::Large);
    pub const LS: AsymType = AsymType::new(DiodeNum::Large, DiodeNum::Small);
    pub const SL: AsymType = AsymType::new(DiodeNum::Small, DiodeNum::Large);
    pub const SS: AsymType = AsymType::new(DiodeNum::Small, DiodeNum::Small);

    pub const ALL: [AsymType; N_ASYM_TYPES] = [Self::LL, Self::LS, Self::SL, Self::SS];

    #[must_use]
    pub const fn new(pos: DiodeNum, neg: DiodeNum) -> Self {
        Self { pos, neg }
    }

    /// Dense index in `0..N_ASYM_TYPES`.
    #[must_use]
    pub fn val(self) -> usize {
        self.pos as usize * N_DIODE + self.neg as usize
    }
}

impl fmt::Display for AsymType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.pos, self.neg)
    }
}

/// Log-ratio of face signals sampled at the interior crystal positions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AsymCurve {
    pub value: [f64; N_ASYM_PTS],
    pub error: [f64; N_ASYM_PTS],
}

/// All four asymmetry curves of one crystal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct XtalAsym {
    pub curves: [AsymCurve; N_ASYM_TYPES],
}

impl XtalAsym {
    #[must_use]
    pub fn get(&self, asym: AsymType) -> &AsymCurve {
        &self.curves[asym.val()]
    }
}

/// Asymmetry curves for every crystal.
pub type AsymSet = IdxArray<XtalIdx, Option<XtalAsym>>;

/// Asymmetry-to-position splines for every crystal.
pub type PositionSplines = IdxArray<XtalIdx, Option<MonotoneSpline>>;

/// A value with its absolute error.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ValErr {
    pub value: f64,
    pub error: f64,
}

impl ValErr {
    #[must_use]
    pub fn new(value: f64, error: f64) -> Self {
        Self { value, error }
    }

    /// Error divided by value.
    #[must_use]
    pub fn rel_error(&self) -> f64 {
        self.error / self.value
    }
}

/// Energy scale of both diodes of a crystal.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MevPerDac {
    pub large: ValErr,
    pub small: ValErr,
}

impl MevPerDac {
    #[must_use]
    pub fn diode(&self, diode: DiodeNum) -> ValErr {
        match diode {
            DiodeNum::Large => self.large,
            DiodeNum::Small => self.small,
        }
    }
}

/// MeV/DAC constants for every crystal.
pub type MevPerDacSet = IdxArray<XtalIdx, Option<MevPerDac>>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{FaceNum, RangeNum};
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_inl_curve_lookup_both_ways() {
        let dac: Vec<f64> = (0..20).map(|i| f64::from(i) * 50.0).collect();
        let adc: Vec<f64> = dac.iter().map(|d| 1.5 * d + 2.0).collect();
        let curve = IntNonlinCurve::new(dac, adc).unwrap();
        assert_abs_diff_eq!(curve.adc_to_dac(302.0), 200.0, epsilon = 1e-9);
        assert_abs_diff_eq!(curve.dac_to_adc(200.0), 302.0, epsilon = 1e-9);
        assert_eq!(curve.points().count(), 20);
    }

    #[test]
    fn test_inl_curve_rejects_non_monotone_adc() {
        let err = IntNonlinCurve::new(vec![0.0, 1.0, 2.0], vec![0.0, 5.0, 5.0]).unwrap_err();
        assert!(matches!(err, Error::DataQuality(_)));
    }

    #[test]
    fn test_for_diode_uses_x8_range() {
        let mut set: IntNonlinSet = IdxArray::empty();
        let face = XtalIdx::from_raw(0, 0, 0).unwrap().face(FaceNum::Pos);
        let curve = IntNonlinCurve::new(vec![0.0, 1.0], vec![0.0, 3.0]).unwrap();
        set[face.range(RangeNum::Hex8)] = Some(curve);
        assert!(set.for_diode(face.diode(DiodeNum::Small)).is_some());
        assert!(set.for_diode(face.diode(DiodeNum::Large)).is_none());
    }

    #[test]
    fn test_asym_type_index() {
        let vals: Vec<usize> = AsymType::ALL.iter().map(|a| a.val()).collect();
        assert_eq!(vals, vec![0, 1, 2, 3]);
        assert_eq!(AsymType::SL.to_string(), "SM-LRG");
    }
}
