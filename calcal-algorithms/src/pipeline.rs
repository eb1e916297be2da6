//! Stage sequencing for a full calibration run.

use crate::asym::{build_position_splines, AsymProfiler};
use crate::fit::FitEngine;
use crate::gain::GainEstimator;
use crate::inl::{InlBuilder, RawCiSet};
use crate::pedestal::{PedestalEstimator, RoughPedestals};
use crate::stats::{PipelineReport, StageStats};
use calcal_core::{
    AsymSet, CalibConfig, Error, EventSource, IntNonlinSet, MevPerDacSet, PedestalSet,
    PositionSplines, Result, StageLog, TwrNum,
};
use log::Log;
use std::fmt;

/// Where a [`CalibPipeline`] is in its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Nothing has run.
    Init,
    /// Rough pedestals are available.
    RoughPed,
    /// Final pedestals are available.
    FinalPed,
    /// INL curves have been supplied or built.
    InlReady,
    /// Asymmetry curves are available.
    Asymmetry,
    /// Position splines are available.
    PositionSpline,
    /// Gain constants are available.
    Gain,
    /// Outputs have been taken.
    Done,
    /// A stage failed; the run must be restarted.
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Init => "INIT",
            PipelineState::RoughPed => "ROUGH_PED",
            PipelineState::FinalPed => "FINAL_PED",
            PipelineState::InlReady => "INL_READY",
            PipelineState::Asymmetry => "ASYMMETRY",
            PipelineState::PositionSpline => "POSITION_SPLINE",
            PipelineState::Gain => "GAIN",
            PipelineState::Done => "DONE",
            PipelineState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Every table produced by a completed run.
#[derive(Debug, Clone)]
pub struct CalibOutputs {
    /// Final pedestals.
    pub pedestals: PedestalSet,
    /// INL curves used by the muon stages.
    pub inl: IntNonlinSet,
    /// Asymmetry curves.
    pub asym: AsymSet,
    /// Asymmetry-to-position splines.
    pub position_splines: PositionSplines,
    /// MeV/DAC gain constants.
    pub mev_per_dac: MevPerDacSet,
    /// Per-stage counters.
    pub report: PipelineReport,
}

/// Runs the calibration stages in order.
///
/// Each step checks the current state, so a stage can only run once its
/// inputs exist. Any error leaves the pipeline in
/// [`PipelineState::Failed`].
pub struct CalibPipeline<'a> {
    config: CalibConfig,
    towers: Vec<TwrNum>,
    fitter: &'a dyn FitEngine,
    logger: &'a dyn Log,
    state: PipelineState,
    rough: Option<RoughPedestals>,
    pedestals: Option<PedestalSet>,
    inl: Option<IntNonlinSet>,
    asym: Option<AsymSet>,
    splines: Option<PositionSplines>,
    mev_per_dac: Option<MevPerDacSet>,
    report: PipelineReport,
}

impl<'a> CalibPipeline<'a> {
    /// Validates `config` and prepares a run.
    ///
    /// # Errors
    /// Returns [`Error::Config`] for an invalid configuration.
    pub fn new(
        config: CalibConfig,
        fitter: &'a dyn FitEngine,
        logger: &'a dyn Log,
    ) -> Result<Self> {
        config.validate()?;
        let towers = config.active_towers()?;
        Ok(Self {
            config,
            towers,
            fitter,
            logger,
            state: PipelineState::Init,
            rough: None,
            pedestals: None,
            inl: None,
            asym: None,
            splines: None,
            mev_per_dac: None,
            report: PipelineReport::default(),
        })
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Active towers.
    #[must_use]
    pub fn towers(&self) -> &[TwrNum] {
        &self.towers
    }

    /// Counters of the stages run so far.
    #[must_use]
    pub fn report(&self) -> &PipelineReport {
        &self.report
    }

    /// Final pedestals, once available.
    #[must_use]
    pub fn pedestals(&self) -> Option<&PedestalSet> {
        self.pedestals.as_ref()
    }

    /// INL curves, once available.
    #[must_use]
    pub fn inl(&self) -> Option<&IntNonlinSet> {
        self.inl.as_ref()
    }

    /// Asymmetry curves, once available.
    #[must_use]
    pub fn asym(&self) -> Option<&AsymSet> {
        self.asym.as_ref()
    }

    /// Gain constants, once available.
    #[must_use]
    pub fn mev_per_dac(&self) -> Option<&MevPerDacSet> {
        self.mev_per_dac.as_ref()
    }

    fn stage_log(&self, target: &'static str) -> StageLog<'a> {
        StageLog::new(self.logger, target)
    }

    fn enter(&mut self, expected: PipelineState, stage: &str) -> Result<()> {
        if self.state == expected {
            return Ok(());
        }
        let err = Error::Stage(format!(
            "{stage} needs state {expected}, pipeline is {}",
            self.state
        ));
        self.state = PipelineState::Failed;
        Err(err)
    }

    fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.stage_log("calcal::pipeline")
                .error(format_args!("run aborted in state {}: {e}", self.state));
            self.state = PipelineState::Failed;
        }
        result
    }

    /// Records the counters of `stage` whether or not it succeeded.
    fn conclude<T>(
        &mut self,
        stage: &'static str,
        stats: StageStats,
        result: Result<T>,
        next: PipelineState,
    ) -> Result<T> {
        match result {
            Ok(value) => {
                self.report.push(stage, stats);
                self.state = next;
                Ok(value)
            }
            Err(e) => {
                self.report.push_failed(stage, stats);
                self.settle(Err(e))
            }
        }
    }

    /// First pedestal pass.
    ///
    /// # Errors
    /// Returns [`Error::Stage`] out of order, or any fault of the stage.
    pub fn rough_pedestals(&mut self, source: &mut dyn EventSource) -> Result<()> {
        self.enter(PipelineState::Init, "rough pedestal pass")?;
        let log = self.stage_log("calcal::pedestal");
        let mut stats = StageStats::default();
        let result = PedestalEstimator::new(&self.config.pedestal, self.fitter)
            .rough_pass(source, &self.towers, &log, &mut stats);
        let rough = self.conclude("rough_pedestal", stats, result, PipelineState::RoughPed)?;
        self.rough = Some(rough);
        Ok(())
    }

    /// Second pedestal pass, gated by the rough pedestals.
    ///
    /// # Errors
    /// Returns [`Error::Stage`] out of order, or any fault of the stage.
    pub fn final_pedestals(&mut self, source: &mut dyn EventSource) -> Result<()> {
        self.enter(PipelineState::RoughPed, "final pedestal pass")?;
        let log = self.stage_log("calcal::pedestal");
        let mut stats = StageStats::default();
        let result = match self.rough.take() {
            Some(rough) => PedestalEstimator::new(&self.config.pedestal, self.fitter)
                .final_pass(source, &rough, &self.towers, &log, &mut stats),
            None => Err(Error::Stage("rough pedestals are missing".into())),
        };
        let peds = self.conclude("final_pedestal", stats, result, PipelineState::FinalPed)?;
        self.pedestals = Some(peds);
        Ok(())
    }

    /// Uses pedestals from an earlier run instead of the two passes.
    ///
    /// # Errors
    /// Returns [`Error::Stage`] unless the pipeline is fresh, or
    /// [`Error::UnpopulatedChannel`] if an active channel is missing.
    pub fn supply_pedestals(&mut self, pedestals: PedestalSet) -> Result<()> {
        self.enter(PipelineState::Init, "supplying pedestals")?;
        let result = pedestals.check_complete("pedestal", &self.towers);
        self.settle(result)?;
        self.pedestals = Some(pedestals);
        self.state = PipelineState::FinalPed;
        Ok(())
    }

    /// Uses INL curves built elsewhere.
    ///
    /// # Errors
    /// Returns [`Error::Stage`] before final pedestals, or
    /// [`Error::UnpopulatedChannel`] if an active channel is missing.
    pub fn supply_inl(&mut self, inl: IntNonlinSet) -> Result<()> {
        self.enter(PipelineState::FinalPed, "supplying INL curves")?;
        let result = inl.check_complete("intNonlin", &self.towers);
        self.settle(result)?;
        self.inl = Some(inl);
        self.state = PipelineState::InlReady;
        Ok(())
    }

    /// Builds INL curves from raw charge-injection sweeps.
    ///
    /// # Errors
    /// Returns [`Error::Stage`] before final pedestals, or any fault of the
    /// builder.
    pub fn build_inl(&mut self, raw: &RawCiSet) -> Result<()> {
        self.enter(PipelineState::FinalPed, "building INL curves")?;
        let log = self.stage_log("calcal::inl");
        let mut stats = StageStats::default();
        let result = InlBuilder::new(&self.config.inl, self.fitter).build_all(
            raw,
            &self.towers,
            &log,
            &mut stats,
        );
        let inl = self.conclude("inl", stats, result, PipelineState::InlReady)?;
        self.inl = Some(inl);
        Ok(())
    }

    /// Asymmetry profiles from muon events.
    ///
    /// # Errors
    /// Returns [`Error::Stage`] out of order, or any fault of the stage.
    pub fn asymmetry(&mut self, source: &mut dyn EventSource) -> Result<()> {
        self.enter(PipelineState::InlReady, "asymmetry stage")?;
        let log = self.stage_log("calcal::asym");
        let mut stats = StageStats::default();
        let result = match (&self.pedestals, &self.inl) {
            (Some(peds), Some(inl)) => AsymProfiler::new(&self.config.muon, peds, inl).run(
                source,
                &self.towers,
                &log,
                &mut stats,
            ),
            _ => Err(Error::Stage("pedestals or INL curves are missing".into())),
        };
        let asym = self.conclude("asymmetry", stats, result, PipelineState::Asymmetry)?;
        self.asym = Some(asym);
        Ok(())
    }

    /// Asymmetry-to-position splines.
    ///
    /// # Errors
    /// Returns [`Error::Stage`] out of order, or any fault of the stage.
    pub fn position_splines(&mut self) -> Result<()> {
        self.enter(PipelineState::Asymmetry, "position splines")?;
        let log = self.stage_log("calcal::asym");
        let mut stats = StageStats::default();
        let result = match &self.asym {
            Some(asym) => build_position_splines(asym, &self.towers, &log, &mut stats),
            None => Err(Error::Stage("asymmetry curves are missing".into())),
        };
        let splines =
            self.conclude("position_spline", stats, result, PipelineState::PositionSpline)?;
        self.splines = Some(splines);
        Ok(())
    }

    /// Path-length-corrected gain from muon events.
    ///
    /// # Errors
    /// Returns [`Error::Stage`] out of order, or any fault of the stage.
    pub fn gain(&mut self, source: &mut dyn EventSource) -> Result<()> {
        self.enter(PipelineState::PositionSpline, "gain stage")?;
        let log = self.stage_log("calcal::gain");
        let mut stats = StageStats::default();
        let result = match (&self.pedestals, &self.inl, &self.splines) {
            (Some(peds), Some(inl), Some(splines)) => GainEstimator::new(
                &self.config.muon,
                &self.config.gain,
                peds,
                inl,
                splines,
                self.fitter,
            )
            .run(source, &self.towers, &log, &mut stats),
            _ => Err(Error::Stage("inputs of the gain stage are missing".into())),
        };
        let mpd = self.conclude("gain", stats, result, PipelineState::Gain)?;
        self.mev_per_dac = Some(mpd);
        Ok(())
    }

    /// Takes the products of a completed run.
    ///
    /// # Errors
    /// Returns [`Error::Stage`] unless the gain stage has completed.
    pub fn finish(&mut self) -> Result<CalibOutputs> {
        self.enter(PipelineState::Gain, "finishing")?;
        let outputs = match (
            self.pedestals.take(),
            self.inl.take(),
            self.asym.take(),
            self.splines.take(),
            self.mev_per_dac.take(),
        ) {
            (Some(pedestals), Some(inl), Some(asym), Some(position_splines), Some(mev_per_dac)) => {
                Ok(CalibOutputs {
                    pedestals,
                    inl,
                    asym,
                    position_splines,
                    mev_per_dac,
                    report: std::mem::take(&mut self.report),
                })
            }
            _ => Err(Error::Stage("calibration products are missing".into())),
        };
        let outputs = self.settle(outputs)?;
        self.state = PipelineState::Done;
        self.stage_log("calcal::pipeline")
            .info(format_args!("calibration run complete"));
        Ok(outputs)
    }

    /// Runs every stage: two pedestal passes over `ped_source`, INL curves
    /// from `raw_ci`, then the muon stages over `muon_source`.
    ///
    /// # Errors
    /// Returns the first fault of any stage.
    pub fn run(
        &mut self,
        ped_source: &mut dyn EventSource,
        raw_ci: &RawCiSet,
        muon_source: &mut dyn EventSource,
    ) -> Result<CalibOutputs> {
        self.rough_pedestals(ped_source)?;
        self.final_pedestals(ped_source)?;
        self.build_inl(raw_ci)?;
        self.run_muon(muon_source)
    }

    /// Runs the muon stages once pedestals and INL curves are in place.
    ///
    /// # Errors
    /// Returns the first fault of any stage.
    pub fn run_muon(&mut self, muon_source: &mut dyn EventSource) -> Result<CalibOutputs> {
        self.asymmetry(muon_source)?;
        self.position_splines()?;
        self.gain(muon_source)?;
        self.finish()
    }
}
