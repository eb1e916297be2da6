//! Linear scan over an event source, shared by every event-driven stage.

use crate::stats::StageStats;
use calcal_core::{Event, EventSource, Result, StageLog};

const PROGRESS_EVERY: usize = 10_000;

/// Visits entries `0..n` of `source`, where `n` is the configured limit or
/// the source size.
///
/// Read failures are counted and skipped. A limit larger than the source is
/// reported as an early end of source and the scan proceeds with what is
/// there. Errors returned by `visit` abort the scan and carry the entry
/// number and event id.
pub(crate) fn scan_events<F>(
    source: &mut dyn EventSource,
    max_events: Option<usize>,
    log: &StageLog<'_>,
    stats: &mut StageStats,
    mut visit: F,
) -> Result<()>
where
    F: FnMut(&Event, &mut StageStats) -> Result<()>,
{
    let available = source.entry_count();
    let n = match max_events {
        Some(max) if max > available => {
            log.warn(format_args!(
                "early end of source: {max} events requested, {available} available"
            ));
            available
        }
        Some(max) => max,
        None => available,
    };
    log.info(format_args!("scanning {n} events"));

    for i in 0..n {
        match source.load_event(i) {
            Ok(event) => {
                stats.events_read += 1;
                let id = event.id;
                visit(event, stats).map_err(|e| e.in_event(i, id))?;
            }
            Err(failure) => {
                stats.read_failures += 1;
                log.warn(format_args!("skipping unreadable {failure}"));
            }
        }
        if (i + 1) % PROGRESS_EVERY == 0 {
            log.debug(format_args!("{} events processed", i + 1));
        }
    }
    Ok(())
}
