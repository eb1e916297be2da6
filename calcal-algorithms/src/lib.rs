//! calcal-algorithms: Calibration stages for calorimeter channels.
//!
//! This crate provides the statistical stages of a calibration run:
//! - **Pedestals** - two-pass trimmed Gaussian estimate per range channel
//! - **INL** - smoothing of charge-injection sweeps into linearity curves
//! - **Asymmetry** - light-asymmetry profiles and position reconstruction
//! - **Gain** - path-length-corrected MeV/DAC from the muon Landau peak
//!
//! [`CalibPipeline`] sequences them; all fitting goes through [`FitEngine`].
//!
#![warn(missing_docs)]

mod asym;
mod fit;
mod gain;
mod hits;
mod inl;
pub mod landau;
mod pedestal;
mod pipeline;
mod scan;
mod stats;

pub use asym::{build_position_splines, position_spline, AsymProfiler};
pub use fit::{FitEngine, FitPoint, GaussFit, LandauFit, LineFit, Quadratic, StandardFitter};
pub use gain::GainEstimator;
pub use hits::HitSummary;
pub use inl::{InlBuilder, RawCiCurve, RawCiSet};
pub use pedestal::{PedestalEstimator, RoughPedestals};
pub use pipeline::{CalibOutputs, CalibPipeline, PipelineState};
pub use stats::{PipelineReport, StageStats};
