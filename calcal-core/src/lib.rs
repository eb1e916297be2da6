//! calcal-core: Core types for calorimeter calibration production.
//!
//! This crate provides the channel index algebra, the event model and event
//! source abstraction, calibration record sets, run configuration and the
//! binned accumulators shared by every calibration stage.
//!

pub mod array;
pub mod calib;
pub mod config;
pub mod error;
pub mod event;
pub mod hist;
pub mod index;
pub mod logging;
pub mod spline;

pub use array::IdxArray;
pub use calib::{
    AsymCurve, AsymSet, AsymType, IntNonlinCurve, IntNonlinSet, MevPerDac, MevPerDacSet,
    Pedestal, PedestalSet, PositionSplines, ValErr, XtalAsym, N_ASYM_PTS, N_ASYM_TYPES,
};
pub use config::{CalibConfig, GainConfig, InlConfig, InlSmoothing, MuonConfig, PedestalConfig};
pub use error::{Error, Result};
pub use event::{
    CrystalHit, Event, EventSource, FaceReadout, MemoryEventSource, ReadFailure, Readout,
};
pub use hist::{Histogram, Profile, ProfilePoint, WindowStats};
pub use index::{
    ColNum, DenseIndex, DiodeIdx, DiodeNum, Dir, FaceIdx, FaceNum, LyrNum, RangeIdx, RangeNum,
    TwrNum, XtalIdx, XtalScoped, N_COL, N_DIODE, N_FACE, N_LYR, N_RNG, N_TWR,
};
pub use logging::{RecordingLog, StageLog};
pub use spline::MonotoneSpline;
