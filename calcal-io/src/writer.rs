//! TXT writers for the calibration tables.
//!
//! Every table covers one tower. A `;` comment line names the columns, then
//! one record per channel follows in index order. Values use the shortest
//! representation that reads back to the same `f64`.

use crate::Result;
use calcal_core::{
    AsymSet, AsymType, DiodeNum, FaceNum, IntNonlinSet, MevPerDacSet, PedestalSet, RangeNum,
    TwrNum, XtalIdx,
};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Writer for calibration TXT tables.
pub struct CalibTxtWriter<W: Write> {
    writer: W,
}

impl CalibTxtWriter<BufWriter<File>> {
    /// Creates a new file writer.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> CalibTxtWriter<W> {
    /// Wraps any byte sink.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes `layer column face range mean sigma` for every range channel.
    ///
    /// # Errors
    /// Fails with an unpopulated-channel error if any channel of `twr` has
    /// no pedestal.
    pub fn write_pedestals(&mut self, peds: &PedestalSet, twr: TwrNum) -> Result<()> {
        writeln!(self.writer, "; layer column face range mean sigma")?;
        for xtal in XtalIdx::in_tower(twr) {
            for face in FaceNum::ALL {
                for range in RangeNum::ALL {
                    let idx = xtal.face(face).range(range);
                    let ped = peds.require("pedestal", idx)?;
                    writeln!(
                        self.writer,
                        "{} {} {face} {range} {} {}",
                        xtal.lyr().raw(),
                        xtal.col().raw(),
                        ped.mean,
                        ped.sigma
                    )?;
                }
            }
        }
        self.flush()
    }

    /// Writes `layer column face range DAC ADC`, one record per curve point.
    ///
    /// # Errors
    /// Fails with an unpopulated-channel error if any channel of `twr` has
    /// no curve.
    pub fn write_inl(&mut self, inl: &IntNonlinSet, twr: TwrNum) -> Result<()> {
        writeln!(self.writer, "; layer column face range DAC ADC")?;
        for xtal in XtalIdx::in_tower(twr) {
            for face in FaceNum::ALL {
                for range in RangeNum::ALL {
                    let curve = inl.require("intNonlin", xtal.face(face).range(range))?;
                    for (dac, adc) in curve.points() {
                        writeln!(
                            self.writer,
                            "{} {} {face} {range} {dac} {adc}",
                            xtal.lyr().raw(),
                            xtal.col().raw()
                        )?;
                    }
                }
            }
        }
        self.flush()
    }

    /// Writes `layer column posDiode negDiode value[0..9] error[0..9]`, one
    /// record per diode pairing.
    ///
    /// # Errors
    /// Fails with an unpopulated-channel error if any crystal of `twr` has
    /// no asymmetry curves.
    pub fn write_asym(&mut self, asym: &AsymSet, twr: TwrNum) -> Result<()> {
        writeln!(
            self.writer,
            "; layer column posDiode negDiode value[0..9] error[0..9]"
        )?;
        for xtal in XtalIdx::in_tower(twr) {
            let rec = asym.require("asymmetry", xtal)?;
            for t in AsymType::ALL {
                let curve = rec.get(t);
                write!(
                    self.writer,
                    "{} {} {} {}",
                    xtal.lyr().raw(),
                    xtal.col().raw(),
                    t.pos,
                    t.neg
                )?;
                for v in curve.value.iter().chain(&curve.error) {
                    write!(self.writer, " {v}")?;
                }
                writeln!(self.writer)?;
            }
        }
        self.flush()
    }

    /// Writes `layer column diode mean error` for both diodes of every
    /// crystal.
    ///
    /// # Errors
    /// Fails with an unpopulated-channel error if any crystal of `twr` has
    /// no gain constants.
    pub fn write_mev_per_dac(&mut self, mpd: &MevPerDacSet, twr: TwrNum) -> Result<()> {
        writeln!(self.writer, "; layer column diode mean error")?;
        for xtal in XtalIdx::in_tower(twr) {
            let rec = mpd.require("mevPerDac", xtal)?;
            for diode in DiodeNum::ALL {
                let v = rec.diode(diode);
                writeln!(
                    self.writer,
                    "{} {} {diode} {} {}",
                    xtal.lyr().raw(),
                    xtal.col().raw(),
                    v.value,
                    v.error
                )?;
            }
        }
        self.flush()
    }

    /// Flushes the writer.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Returns the underlying sink.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use calcal_core::{DenseIndex, IdxArray, MevPerDac, Pedestal, RangeIdx, ValErr};
    use tempfile::NamedTempFile;

    fn tower0() -> TwrNum {
        TwrNum::new(0).unwrap()
    }

    #[test]
    fn test_write_pedestals() {
        let file = NamedTempFile::new().unwrap();
        let peds: PedestalSet = IdxArray::from_fn(|idx: RangeIdx| {
            (idx.xtal().twr() == tower0()).then_some(Pedestal {
                mean: 512.25,
                sigma: 4.5,
            })
        });
        let mut writer = CalibTxtWriter::create(file.path()).unwrap();
        writer.write_pedestals(&peds, tower0()).unwrap();

        let content = std::fs::read_to_string(file.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 1 + 96 * 8);
        assert!(lines[0].starts_with(';'));
        assert_eq!(lines[1], "0 0 POS LEX8 512.25 4.5");
        assert_eq!(lines[8], "0 0 NEG HEX1 512.25 4.5");
    }

    #[test]
    fn test_write_mev_per_dac_layout() {
        let mpd: MevPerDacSet = IdxArray::from_fn(|x: XtalIdx| {
            (x.twr() == tower0()).then_some(MevPerDac {
                large: ValErr::new(0.05, 0.001),
                small: ValErr::new(0.3, 0.01),
            })
        });
        let mut writer = CalibTxtWriter::new(Vec::new());
        writer.write_mev_per_dac(&mpd, tower0()).unwrap();
        let text = String::from_utf8(writer.into_inner()).unwrap();
        let mut lines = text.lines().skip(1);
        assert_eq!(lines.next(), Some("0 0 LRG 0.05 0.001"));
        assert_eq!(lines.next(), Some("0 0 SM 0.3 0.01"));
    }

    #[test]
    fn test_unpopulated_channel_is_fatal() {
        let mut peds: PedestalSet = IdxArray::empty();
        for idx in RangeIdx::all().filter(|i| i.xtal().twr() == tower0()).skip(1) {
            peds[idx] = Some(Pedestal {
                mean: 1.0,
                sigma: 1.0,
            });
        }
        let mut writer = CalibTxtWriter::new(Vec::new());
        let err = writer.write_pedestals(&peds, tower0()).unwrap_err();
        assert!(matches!(
            err,
            Error::Core(calcal_core::Error::UnpopulatedChannel { .. })
        ));
    }
}
