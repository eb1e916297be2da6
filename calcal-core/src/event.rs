//! Event model and the abstract event source.
//!
//! An event is a list of crystal hits. Each hit carries the raw
//! (tower, layer, column) coordinates and one readout per ADC range, every
//! readout holding a (range, ADC) pair for both faces.

use crate::index::{FaceNum, RangeNum, XtalIdx, N_RNG};
use crate::{Error, Result};
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A single face's digitized value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FaceReadout {
    /// ADC range that produced the value.
    pub range: RangeNum,
    /// Raw (not pedestal-subtracted) ADC.
    pub adc: u16,
}

/// One readout of a crystal: both faces digitized together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Readout {
    pub pos: FaceReadout,
    pub neg: FaceReadout,
}

impl Readout {
    /// Creates a readout with the same range on both faces.
    #[must_use]
    pub fn new(range: RangeNum, adc_pos: u16, adc_neg: u16) -> Self {
        Self {
            pos: FaceReadout {
                range,
                adc: adc_pos,
            },
            neg: FaceReadout {
                range,
                adc: adc_neg,
            },
        }
    }

    /// Returns the readout for one face.
    #[inline]
    #[must_use]
    pub fn face(&self, face: FaceNum) -> FaceReadout {
        match face {
            FaceNum::Pos => self.pos,
            FaceNum::Neg => self.neg,
        }
    }
}

/// A hit crystal within an event.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CrystalHit {
    pub twr: u8,
    pub lyr: u8,
    pub col: u8,
    pub readouts: Vec<Readout>,
}

impl CrystalHit {
    /// Creates a hit for `xtal` with the given readouts.
    #[must_use]
    pub fn new(xtal: XtalIdx, readouts: Vec<Readout>) -> Self {
        Self {
            twr: xtal.twr().raw(),
            lyr: xtal.lyr().raw(),
            col: xtal.col().raw(),
            readouts,
        }
    }

    /// Decodes the packed coordinates.
    ///
    /// # Errors
    /// Returns a format fault if a coordinate is out of range.
    pub fn xtal(&self) -> Result<XtalIdx> {
        XtalIdx::from_raw(self.twr, self.lyr, self.col).map_err(|e| {
            Error::Format(format!(
                "hit ({}, {}, {}) has invalid coordinates: {e}",
                self.twr, self.lyr, self.col
            ))
        })
    }

    /// Checks the hit carries one readout per range.
    ///
    /// # Errors
    /// Returns a format fault when the readout count is not 4.
    pub fn check_readouts(&self) -> Result<()> {
        if self.readouts.len() == N_RNG {
            Ok(())
        } else {
            Err(Error::Format(format!(
                "hit ({}, {}, {}) has {} readouts, expected {N_RNG}",
                self.twr,
                self.lyr,
                self.col,
                self.readouts.len()
            )))
        }
    }

    /// Returns the raw ADC of `face` digitized in `range`, if present.
    #[must_use]
    pub fn adc(&self, face: FaceNum, range: RangeNum) -> Option<u16> {
        self.readouts
            .iter()
            .map(|r| r.face(face))
            .find(|r| r.range == range)
            .map(|r| r.adc)
    }
}

/// A digitized detector event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Event {
    /// Event sequence number from the source.
    pub id: u64,
    pub hits: Vec<CrystalHit>,
}

/// Non-fatal failure to load one entry from an event source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadFailure {
    pub entry: usize,
    pub reason: String,
}

impl fmt::Display for ReadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entry {}: {}", self.entry, self.reason)
    }
}

/// Re-seekable source of events.
///
/// Each calibration stage performs one linear scan from entry 0, so sources
/// must support loading any entry by number.
pub trait EventSource {
    /// Number of entries available.
    fn entry_count(&self) -> usize;

    /// Loads entry `i` and returns a view of it.
    ///
    /// # Errors
    /// Returns a [`ReadFailure`] if the entry cannot be decoded; callers skip
    /// the entry and continue.
    fn load_event(&mut self, i: usize) -> std::result::Result<&Event, ReadFailure>;
}

/// In-memory event source.
#[derive(Debug, Clone, Default)]
pub struct MemoryEventSource {
    events: Vec<Event>,
}

impl MemoryEventSource {
    #[must_use]
    pub fn new(events: Vec<Event>) -> Self {
        Self { events }
    }

    pub fn push(&mut self, event: Event) {
        self.events.push(event);
    }

    #[must_use]
    pub fn events(&self) -> &[Event] {
        &self.events
    }
}

impl FromIterator<Event> for MemoryEventSource {
    fn from_iter<T: IntoIterator<Item = Event>>(iter: T) -> Self {
        Self {
            events: iter.into_iter().collect(),
        }
    }
}

impl EventSource for MemoryEventSource {
    fn entry_count(&self) -> usize {
        self.events.len()
    }

    fn load_event(&mut self, i: usize) -> std::result::Result<&Event, ReadFailure> {
        self.events.get(i).ok_or_else(|| ReadFailure {
            entry: i,
            reason: format!("out of range (have {} entries)", self.events.len()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn four_range_hit() -> CrystalHit {
        let xtal = XtalIdx::from_raw(0, 1, 2).unwrap();
        let readouts = RangeNum::ALL
            .iter()
            .enumerate()
            .map(|(i, &r)| Readout::new(r, 100 + i as u16, 200 + i as u16))
            .collect();
        CrystalHit::new(xtal, readouts)
    }

    #[test]
    fn test_adc_lookup_by_range() {
        let hit = four_range_hit();
        assert!(hit.check_readouts().is_ok());
        assert_eq!(hit.adc(FaceNum::Pos, RangeNum::Hex8), Some(102));
        assert_eq!(hit.adc(FaceNum::Neg, RangeNum::Lex8), Some(200));
        assert_eq!(hit.xtal().unwrap(), XtalIdx::from_raw(0, 1, 2).unwrap());
    }

    #[test]
    fn test_wrong_readout_count_is_format_fault() {
        let mut hit = four_range_hit();
        hit.readouts.pop();
        assert!(matches!(hit.check_readouts(), Err(Error::Format(_))));
    }

    #[test]
    fn test_invalid_coordinates_are_format_fault() {
        let mut hit = four_range_hit();
        hit.col = 12;
        assert!(matches!(hit.xtal(), Err(Error::Format(_))));
    }

    #[test]
    fn test_memory_source_read_failure() {
        let mut src: MemoryEventSource = std::iter::once(Event::default()).collect();
        assert_eq!(src.entry_count(), 1);
        assert!(src.load_event(0).is_ok());
        let err = src.load_event(3).unwrap_err();
        assert_eq!(err.entry, 3);
    }
}
