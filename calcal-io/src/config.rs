//! JSON run configuration files.
//!
//! Every field has a default, so a file only needs the settings it changes.

use crate::Result;
use calcal_core::CalibConfig;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Parses and validates a configuration from JSON text.
///
/// # Errors
/// Returns a JSON error for malformed input and a core configuration error
/// for settings that fail validation.
pub fn config_from_json(text: &str) -> Result<CalibConfig> {
    let config: CalibConfig = serde_json::from_str(text)?;
    config.validate()?;
    Ok(config)
}

/// Loads and validates a configuration file.
///
/// # Errors
/// See [`config_from_json`].
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CalibConfig> {
    let config: CalibConfig = serde_json::from_reader(BufReader::new(File::open(path)?))?;
    config.validate()?;
    Ok(config)
}

/// Writes a configuration as pretty-printed JSON.
///
/// # Errors
/// Returns an error if the file cannot be written.
pub fn save_config<P: AsRef<Path>>(config: &CalibConfig, path: P) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, config)?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}
