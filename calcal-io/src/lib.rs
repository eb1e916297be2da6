//! calcal-io: File I/O for calcal.
//!
//! This crate provides the calibration table TXT format, JSON run
//! configuration, and a memory-mapped JSON-lines event source that the
//! calibration stages can rescan.
//!

mod config;
mod error;
mod events;
mod reader;
mod writer;

pub use config::{config_from_json, load_config, save_config};
pub use error::{Error, Result};
pub use events::{write_events_jsonl, JsonlEventSource};
pub use reader::{
    read_asym, read_asym_txt, read_inl, read_inl_txt, read_mev_per_dac, read_mev_per_dac_txt,
    read_pedestals, read_pedestals_txt, read_raw_ci, read_raw_ci_txt,
};
pub use writer::CalibTxtWriter;
