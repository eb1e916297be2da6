//! Integral-nonlinearity curve builder.
//!
//! Smooths raw charge-injection sweeps (pedestal-subtracted ADC against
//! injected DAC) into the curves used to linearize every range:
//!
//! 1. Samples above the saturation fraction of full scale are dropped.
//! 2. The noisy low end is replaced by a line through two later samples.
//! 3. The body is resampled with local quadratic fits, one per group.
//! 4. The last pre-saturation samples are copied verbatim.
//! 5. One point is extrapolated out to the full-scale ADC.

use crate::fit::FitEngine;
use crate::stats::StageStats;
use calcal_core::{
    DenseIndex, Error, IdxArray, InlConfig, IntNonlinCurve, IntNonlinSet, RangeIdx, RangeNum,
    Result, StageLog, TwrNum, XtalScoped,
};

/// Raw charge-injection sweep for one range channel.
#[derive(Debug, Clone, PartialEq)]
pub struct RawCiCurve {
    /// Injected DAC settings, increasing.
    pub dac: Vec<f64>,
    /// Mean pedestal-subtracted ADC at each setting.
    pub adc: Vec<f64>,
}

impl RawCiCurve {
    /// Pairs up DAC settings and ADC responses.
    #[must_use]
    pub fn new(dac: Vec<f64>, adc: Vec<f64>) -> Self {
        Self { dac, adc }
    }

    /// Number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.dac.len()
    }

    /// True if the sweep has no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dac.is_empty()
    }
}

/// Raw sweeps for every range channel.
pub type RawCiSet = IdxArray<RangeIdx, Option<RawCiCurve>>;

/// Builds smoothed INL curves from raw sweeps.
pub struct InlBuilder<'a> {
    config: &'a InlConfig,
    fitter: &'a dyn FitEngine,
}

impl<'a> InlBuilder<'a> {
    /// Create a builder using the given smoothing table and fit engine.
    #[must_use]
    pub fn new(config: &'a InlConfig, fitter: &'a dyn FitEngine) -> Self {
        Self { config, fitter }
    }

    /// Smooths one sweep using the table entry for `range`.
    ///
    /// # Errors
    /// Returns [`Error::DataQuality`] if the sweep is too short for the
    /// smoothing parameters, has no pre-saturation samples, or yields a
    /// non-increasing curve.
    pub fn smooth(&self, range: RangeNum, raw: &RawCiCurve) -> Result<IntNonlinCurve> {
        let s = self.config.smoothing(range);
        let (dac, adc) = (&raw.dac, &raw.adc);
        let n = dac.len();
        if adc.len() != n || n < 2 {
            return Err(Error::DataQuality(format!(
                "charge-injection sweep has {} DAC and {} ADC samples",
                n,
                adc.len()
            )));
        }
        if dac.windows(2).any(|w| w[1] <= w[0]) {
            return Err(Error::DataQuality(
                "charge-injection DAC settings are not increasing".into(),
            ));
        }

        let adc_max = adc[n - 1];
        let sat_thresh = self.config.saturation_fraction * adc_max;
        let last = adc
            .iter()
            .rposition(|&a| a <= sat_thresh)
            .ok_or_else(|| Error::DataQuality("every sample is saturated".into()))?;

        let lo_from = s.extrap_lo + s.extrap_lo_from - 1;
        if lo_from > last {
            return Err(Error::DataQuality(format!(
                "only {} pre-saturation samples, low-end extrapolation needs {}",
                last + 1,
                lo_from + 1
            )));
        }

        let mut out_dac = Vec::with_capacity(n);
        let mut out_adc = Vec::with_capacity(n);

        // Low end: line through two later samples.
        let i0 = s.extrap_lo;
        let lo_slope = (adc[lo_from] - adc[i0]) / (dac[lo_from] - dac[i0]);
        for i in 0..s.extrap_lo {
            out_dac.push(dac[i]);
            out_adc.push(adc[i0] + lo_slope * (dac[i] - dac[i0]));
        }

        // Body: one quadratic per group, evaluated at the group center.
        let mut next_copy = s.extrap_lo;
        let mut center = s.extrap_lo + s.group_width - 1;
        let tail = s.skip_high.max(s.group_width - 1);
        while center + tail <= last {
            let lo = center.saturating_sub(s.group_width);
            let hi = (center + s.group_width).min(last);
            let points: Vec<(f64, f64)> = (lo..=hi).map(|i| (dac[i], adc[i])).collect();
            let quad = self.fitter.fit_quadratic(&points)?;
            out_dac.push(dac[center]);
            out_adc.push(quad.eval(dac[center]));
            next_copy = center + 1;
            center += s.group_width;
        }

        // High end: verbatim samples.
        let copy_from = next_copy.max((last + 1).saturating_sub(s.skip_high));
        for i in copy_from..=last {
            out_dac.push(dac[i]);
            out_adc.push(adc[i]);
        }

        // Full scale: extrapolate from the last two points.
        let k = out_dac.len();
        if k < 2 {
            return Err(Error::DataQuality(
                "fewer than 2 points to extrapolate full scale from".into(),
            ));
        }
        let slope = (out_adc[k - 1] - out_adc[k - 2]) / (out_dac[k - 1] - out_dac[k - 2]);
        if !(slope.is_finite() && slope > 0.0) {
            return Err(Error::DataQuality(format!(
                "degenerate full-scale extrapolation slope {slope}"
            )));
        }
        out_dac.push(out_dac[k - 1] + (adc_max - out_adc[k - 1]) / slope);
        out_adc.push(adc_max);

        IntNonlinCurve::new(out_dac, out_adc)
    }

    /// Smooths every sweep of the active towers.
    ///
    /// Channels whose sweep fails smoothing are logged and counted; any
    /// active channel left without a curve is fatal.
    ///
    /// # Errors
    /// Returns [`Error::UnpopulatedChannel`] if an active channel has no curve.
    pub fn build_all(
        &self,
        raw: &RawCiSet,
        towers: &[TwrNum],
        log: &StageLog<'_>,
        stats: &mut StageStats,
    ) -> Result<IntNonlinSet> {
        let mut curves: IntNonlinSet = IdxArray::empty();
        for (idx, sweep) in raw.populated() {
            if !towers.contains(&idx.owning_xtal().twr()) {
                continue;
            }
            match self.smooth(idx.range(), sweep) {
                Ok(curve) => curves[idx] = Some(curve),
                Err(e) => {
                    stats.skipped_channels += 1;
                    log.warn(format_args!("{idx}: {e}"));
                }
            }
        }
        log.info(format_args!(
            "smoothed {} of {} channels",
            curves.populated().count(),
            RangeIdx::COUNT / calcal_core::N_TWR * towers.len()
        ));
        stats.log_summary(log);
        curves.check_complete("intNonlin", towers)?;
        Ok(curves)
    }
}
