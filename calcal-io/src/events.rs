//! Memory-mapped JSON-lines event files.
//!
//! One event per non-blank line. Opening a file indexes the line offsets
//! once; loading an entry decodes only that line, so stages can rescan the
//! file from entry 0 as often as they need.

use crate::Result;
use calcal_core::{Event, EventSource, ReadFailure};
use memmap2::Mmap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

/// Re-seekable event source over a JSON-lines file.
pub struct JsonlEventSource {
    mmap: Option<Mmap>,
    lines: Vec<Range<usize>>,
    current: Event,
    path: PathBuf,
}

impl JsonlEventSource {
    /// Maps `path` and indexes its lines.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or memory-mapped.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)?;
        // Empty files cannot be mapped on every platform.
        let mmap = if file.metadata()?.len() == 0 {
            None
        } else {
            // SAFETY: The file is opened read-only and we assume it is not modified concurrently.
            #[allow(unsafe_code)]
            let mmap = unsafe { Mmap::map(&file)? };
            Some(mmap)
        };
        let lines = mmap.as_deref().map(index_lines).unwrap_or_default();
        log::debug!(
            "indexed {} events in {}",
            lines.len(),
            path.as_ref().display()
        );
        Ok(Self {
            mmap,
            lines,
            current: Event::default(),
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Path of the mapped file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn bytes(&self) -> &[u8] {
        self.mmap.as_deref().unwrap_or(&[])
    }
}

/// Byte ranges of the non-blank lines of `data`.
fn index_lines(data: &[u8]) -> Vec<Range<usize>> {
    let mut lines = Vec::new();
    let mut start = 0;
    for end in data
        .iter()
        .enumerate()
        .filter_map(|(i, &b)| (b == b'\n').then_some(i))
        .chain(std::iter::once(data.len()))
    {
        if data[start..end].iter().any(|b| !b.is_ascii_whitespace()) {
            lines.push(start..end);
        }
        start = end + 1;
        if start > data.len() {
            break;
        }
    }
    lines
}

impl EventSource for JsonlEventSource {
    fn entry_count(&self) -> usize {
        self.lines.len()
    }

    fn load_event(&mut self, i: usize) -> std::result::Result<&Event, ReadFailure> {
        let range = self.lines.get(i).cloned().ok_or_else(|| ReadFailure {
            entry: i,
            reason: format!("out of range (have {} entries)", self.lines.len()),
        })?;
        self.current = serde_json::from_slice(&self.bytes()[range]).map_err(|e| ReadFailure {
            entry: i,
            reason: e.to_string(),
        })?;
        Ok(&self.current)
    }
}

/// Writes events as JSON lines.
///
/// # Errors
/// Returns an error if the file cannot be written.
pub fn write_events_jsonl<'a, P, I>(path: P, events: I) -> Result<usize>
where
    P: AsRef<Path>,
    I: IntoIterator<Item = &'a Event>,
{
    let mut writer = BufWriter::new(File::create(path)?);
    let mut count = 0;
    for event in events {
        serde_json::to_writer(&mut writer, event)?;
        writeln!(writer)?;
        count += 1;
    }
    writer.flush()?;
    Ok(count)
}
