//! Calibration run configuration.
//!
//! Every threshold and table here is a calibration constant that varies by
//! detector configuration, so none of them is hard-coded in the stages.
#![allow(clippy::doc_markdown)]

use crate::index::{RangeNum, TwrNum, N_COL, N_RNG};
use crate::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Top-level configuration of a calibration run.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CalibConfig {
    /// Towers to calibrate.
    pub towers: Vec<u8>,
    pub pedestal: PedestalConfig,
    pub inl: InlConfig,
    pub muon: MuonConfig,
    pub gain: GainConfig,
}

impl Default for CalibConfig {
    fn default() -> Self {
        Self {
            towers: vec![0],
            pedestal: PedestalConfig::default(),
            inl: InlConfig::default(),
            muon: MuonConfig::default(),
            gain: GainConfig::default(),
        }
    }
}

impl CalibConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the active towers.
    #[must_use]
    pub fn with_towers(mut self, towers: Vec<u8>) -> Self {
        self.towers = towers;
        self
    }

    #[must_use]
    pub fn with_pedestal(mut self, pedestal: PedestalConfig) -> Self {
        self.pedestal = pedestal;
        self
    }

    #[must_use]
    pub fn with_inl(mut self, inl: InlConfig) -> Self {
        self.inl = inl;
        self
    }

    #[must_use]
    pub fn with_muon(mut self, muon: MuonConfig) -> Self {
        self.muon = muon;
        self
    }

    #[must_use]
    pub fn with_gain(mut self, gain: GainConfig) -> Self {
        self.gain = gain;
        self
    }

    /// Active towers as typed components, in configured order.
    ///
    /// # Errors
    /// Returns [`Error::InvalidCoordinate`] for an out-of-range tower.
    pub fn active_towers(&self) -> Result<Vec<TwrNum>> {
        self.towers.iter().map(|&t| TwrNum::new(t)).collect()
    }

    /// Rejects inconsistent settings.
    ///
    /// # Errors
    /// Returns [`Error::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.towers.is_empty() {
            return Err(Error::Config("no active towers".into()));
        }
        let towers = self
            .active_towers()
            .map_err(|e| Error::Config(e.to_string()))?;
        for (i, t) in towers.iter().enumerate() {
            if towers[..i].contains(t) {
                return Err(Error::Config(format!("tower {t} listed twice")));
            }
        }
        self.pedestal.validate()?;
        self.inl.validate()?;
        self.muon.validate()?;
        self.gain.validate()
    }
}

/// Pedestal estimator settings.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PedestalConfig {
    /// Maximum events per pass (`None` = whole source).
    pub max_events: Option<usize>,
    /// ADC histogram binning.
    pub hist_bins: usize,
    pub hist_lo: f64,
    pub hist_hi: f64,
    /// Half-width of the trim window in RMS units (default: 3.0).
    pub trim_sigma: f64,
    /// Number of trim iterations (default: 3).
    pub trim_iterations: usize,
    /// Rough-pedestal deviation that vetoes an event in the final pass (default: 5.0).
    pub rough_cut_sigma: f64,
    /// Fitted sigmas below this fall back to the trimmed RMS.
    pub min_sigma: f64,
    /// Fewest histogram entries that give a usable pedestal.
    pub min_entries: u64,
}

impl Default for PedestalConfig {
    fn default() -> Self {
        Self {
            max_events: None,
            hist_bins: 4096,
            hist_lo: -0.5,
            hist_hi: 4095.5,
            trim_sigma: 3.0,
            trim_iterations: 3,
            rough_cut_sigma: 5.0,
            min_sigma: 0.5,
            min_entries: 10,
        }
    }
}

impl PedestalConfig {
    #[must_use]
    pub fn with_max_events(mut self, n: usize) -> Self {
        self.max_events = Some(n);
        self
    }

    #[must_use]
    pub fn with_trim(mut self, sigma: f64, iterations: usize) -> Self {
        self.trim_sigma = sigma;
        self.trim_iterations = iterations;
        self
    }

    #[must_use]
    pub fn with_rough_cut_sigma(mut self, sigma: f64) -> Self {
        self.rough_cut_sigma = sigma;
        self
    }

    #[must_use]
    pub fn with_min_sigma(mut self, sigma: f64) -> Self {
        self.min_sigma = sigma;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.hist_bins == 0 || self.hist_hi <= self.hist_lo {
            return Err(Error::Config("pedestal histogram range is empty".into()));
        }
        if self.trim_sigma <= 0.0 || self.rough_cut_sigma <= 0.0 {
            return Err(Error::Config("pedestal cut widths must be positive".into()));
        }
        if self.trim_iterations == 0 {
            return Err(Error::Config("pedestal trim needs at least one iteration".into()));
        }
        Ok(())
    }
}

/// Smoothing parameters for one range category of the INL builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct InlSmoothing {
    /// Half-width of the quadratic fit window, and the step between centers.
    pub group_width: usize,
    /// Number of low-end points replaced by linear extrapolation.
    pub extrap_lo: usize,
    /// Span of raw samples the low-end extrapolation line is drawn over.
    pub extrap_lo_from: usize,
    /// Number of pre-saturation samples copied verbatim.
    pub skip_high: usize,
}

impl InlSmoothing {
    #[must_use]
    pub const fn new(
        group_width: usize,
        extrap_lo: usize,
        extrap_lo_from: usize,
        skip_high: usize,
    ) -> Self {
        Self {
            group_width,
            extrap_lo,
            extrap_lo_from,
            skip_high,
        }
    }
}

/// Integral-nonlinearity builder settings.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct InlConfig {
    /// Smoothing table, indexed by range.
    pub smoothing: [InlSmoothing; N_RNG],
    /// Samples above this fraction of full scale count as saturated.
    pub saturation_fraction: f64,
}

impl Default for InlConfig {
    fn default() -> Self {
        Self {
            smoothing: [
                InlSmoothing::new(3, 1, 4, 10),
                InlSmoothing::new(4, 1, 4, 10),
                InlSmoothing::new(3, 1, 4, 10),
                InlSmoothing::new(4, 1, 4, 10),
            ],
            saturation_fraction: 0.99,
        }
    }
}

impl InlConfig {
    /// Smoothing parameters for `range`.
    #[must_use]
    pub fn smoothing(&self, range: RangeNum) -> InlSmoothing {
        self.smoothing[range as usize]
    }

    #[must_use]
    pub fn with_smoothing(mut self, range: RangeNum, smoothing: InlSmoothing) -> Self {
        self.smoothing[range as usize] = smoothing;
        self
    }

    fn validate(&self) -> Result<()> {
        for (range, s) in RangeNum::ALL.iter().zip(&self.smoothing) {
            if s.group_width == 0 || s.extrap_lo_from < 2 {
                return Err(Error::Config(format!(
                    "INL smoothing for {range} needs group_width >= 1 and extrap_lo_from >= 2"
                )));
            }
        }
        if !(self.saturation_fraction > 0.0 && self.saturation_fraction <= 1.0) {
            return Err(Error::Config(
                "INL saturation fraction must be in (0, 1]".into(),
            ));
        }
        Ok(())
    }
}

/// Hit summarizer and track selection settings.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct MuonConfig {
    /// Maximum events per muon stage (`None` = whole source).
    pub max_events: Option<usize>,
    /// Large-diode Pos+Neg signal (ADC) above which a crystal counts as hit.
    pub hit_threshold: f64,
    /// Crystal pitch across a layer (mm).
    pub cell_hor_pitch: f64,
    /// Layer pitch (mm).
    pub cell_vert_pitch: f64,
    /// Layers with more hits than this spoil both projections.
    pub max_layer_hits: usize,
}

impl Default for MuonConfig {
    fn default() -> Self {
        Self {
            max_events: None,
            hit_threshold: 100.0,
            cell_hor_pitch: 27.84,
            cell_vert_pitch: 21.35,
            max_layer_hits: 2,
        }
    }
}

impl MuonConfig {
    #[must_use]
    pub fn with_max_events(mut self, n: usize) -> Self {
        self.max_events = Some(n);
        self
    }

    #[must_use]
    pub fn with_hit_threshold(mut self, threshold: f64) -> Self {
        self.hit_threshold = threshold;
        self
    }

    /// Horizontal over vertical cell pitch.
    #[must_use]
    pub fn pitch_ratio(&self) -> f64 {
        self.cell_hor_pitch / self.cell_vert_pitch
    }

    fn validate(&self) -> Result<()> {
        if self.cell_hor_pitch <= 0.0 || self.cell_vert_pitch <= 0.0 {
            return Err(Error::Config("cell pitches must be positive".into()));
        }
        if self.hit_threshold < 0.0 {
            return Err(Error::Config("hit threshold must not be negative".into()));
        }
        Ok(())
    }
}

/// Gain estimator settings.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct GainConfig {
    /// Most probable muon deposit in one crystal at normal incidence (MeV).
    pub muon_deposit_mev: f64,
    /// Tracks steeper than this from vertical are rejected (degrees).
    pub max_track_angle_deg: f64,
    /// Fraction of the crystal length at each end treated as edge.
    pub edge_fraction: f64,
    /// Large-diode DAC histogram binning.
    pub hist_bins: usize,
    pub hist_max_dac: f64,
    /// Small-vs-large profile binning over small-diode DAC.
    pub ratio_prof_bins: usize,
    pub ratio_prof_max: f64,
    /// Fewest histogram entries for a Landau fit.
    pub min_entries: u64,
    /// Landau fit window as fractions of the histogram peak.
    pub fit_lo_frac: f64,
    pub fit_hi_frac: f64,
}

impl Default for GainConfig {
    fn default() -> Self {
        Self {
            // 11.2 MeV/cm in CsI over 1.99 cm.
            muon_deposit_mev: 22.288,
            max_track_angle_deg: 30.0,
            edge_fraction: 0.1,
            hist_bins: 200,
            hist_max_dac: 2000.0,
            ratio_prof_bins: 100,
            ratio_prof_max: 1000.0,
            min_entries: 50,
            fit_lo_frac: 0.6,
            fit_hi_frac: 1.8,
        }
    }
}

impl GainConfig {
    #[must_use]
    pub fn with_muon_deposit(mut self, mev: f64) -> Self {
        self.muon_deposit_mev = mev;
        self
    }

    #[must_use]
    pub fn with_max_track_angle(mut self, degrees: f64) -> Self {
        self.max_track_angle_deg = degrees;
        self
    }

    #[must_use]
    pub fn with_edge_fraction(mut self, fraction: f64) -> Self {
        self.edge_fraction = fraction;
        self
    }

    #[must_use]
    pub fn with_hist(mut self, bins: usize, max_dac: f64) -> Self {
        self.hist_bins = bins;
        self.hist_max_dac = max_dac;
        self
    }

    #[must_use]
    pub fn with_min_entries(mut self, n: u64) -> Self {
        self.min_entries = n;
        self
    }

    /// Allowed range of line-predicted column for along-track hits.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn edge_window(&self) -> (f64, f64) {
        let margin = self.edge_fraction * N_COL as f64;
        (-0.5 + margin, N_COL as f64 - 0.5 - margin)
    }

    fn validate(&self) -> Result<()> {
        if self.muon_deposit_mev <= 0.0 {
            return Err(Error::Config("muon deposit must be positive".into()));
        }
        if !(self.max_track_angle_deg > 0.0 && self.max_track_angle_deg < 90.0) {
            return Err(Error::Config("max track angle must be in (0, 90)".into()));
        }
        if !(0.0..0.5).contains(&self.edge_fraction) {
            return Err(Error::Config("edge fraction must be in [0, 0.5)".into()));
        }
        if self.hist_bins == 0 || self.hist_max_dac <= 0.0 || self.ratio_prof_bins == 0 {
            return Err(Error::Config("gain histogram binning is empty".into()));
        }
        if self.fit_lo_frac >= self.fit_hi_frac {
            return Err(Error::Config("Landau fit window is empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_config_is_valid() {
        let config = CalibConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.active_towers().unwrap(), vec![TwrNum::new(0).unwrap()]);
        assert_eq!(config.inl.smoothing(RangeNum::Lex1).group_width, 4);
    }

    #[test]
    fn test_validate_rejects_bad_towers() {
        assert!(CalibConfig::default().with_towers(vec![]).validate().is_err());
        assert!(CalibConfig::default().with_towers(vec![16]).validate().is_err());
        assert!(CalibConfig::default().with_towers(vec![1, 1]).validate().is_err());
        assert!(CalibConfig::default().with_towers(vec![3, 1]).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_sections() {
        let bad_ped =
            CalibConfig::default().with_pedestal(PedestalConfig::default().with_trim(3.0, 0));
        assert!(matches!(bad_ped.validate(), Err(Error::Config(_))));

        let bad_gain =
            CalibConfig::default().with_gain(GainConfig::default().with_edge_fraction(0.6));
        assert!(bad_gain.validate().is_err());
    }

    #[test]
    fn test_edge_window() {
        let (lo, hi) = GainConfig::default().edge_window();
        assert_relative_eq!(lo, 0.7, epsilon = 1e-12);
        assert_relative_eq!(hi, 10.3, epsilon = 1e-12);
    }
}
