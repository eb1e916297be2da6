//! TXT readers for the calibration tables and raw charge-injection sweeps.
//!
//! Readers accept the layout written by [`crate::CalibTxtWriter`]: blank
//! lines and lines starting with `;` are skipped, every other line is one
//! whitespace-separated record. Face, diode and range fields may be given
//! as mnemonics (`POS`, `LRG`, `HEX8`) or raw numbers.

use crate::{Error, Result};
use calcal_algorithms::{RawCiCurve, RawCiSet};
use calcal_core::{
    AsymCurve, AsymSet, AsymType, ColNum, DenseIndex, DiodeNum, FaceNum, IdxArray, IntNonlinCurve,
    IntNonlinSet, LyrNum, MevPerDac, MevPerDacSet, Pedestal, PedestalSet, RangeIdx, RangeNum,
    TwrNum, ValErr, XtalAsym, XtalIdx, N_ASYM_PTS, N_ASYM_TYPES,
};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;

const ASYM_FIELDS: usize = 4 + 2 * N_ASYM_PTS;

/// Calls `visit` with the 1-based line number and fields of every record.
fn for_each_record<R, F>(reader: R, n_fields: usize, mut visit: F) -> Result<()>
where
    R: BufRead,
    F: FnMut(usize, &[&str]) -> Result<()>,
{
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with(';') {
            continue;
        }
        let fields: Vec<&str> = trimmed.split_whitespace().collect();
        if fields.len() != n_fields {
            return Err(Error::invalid(
                i + 1,
                format!("expected {n_fields} fields, found {}", fields.len()),
            ));
        }
        visit(i + 1, &fields)?;
    }
    Ok(())
}

fn parse_num<T: FromStr>(line: usize, field: &str, what: &str) -> Result<T> {
    field
        .parse()
        .map_err(|_| Error::invalid(line, format!("{what} '{field}' is not a number")))
}

fn parse_xtal(line: usize, twr: TwrNum, lyr: &str, col: &str) -> Result<XtalIdx> {
    let lyr = LyrNum::new(parse_num(line, lyr, "layer")?)
        .map_err(|e| Error::invalid(line, e.to_string()))?;
    let col = ColNum::new(parse_num(line, col, "column")?)
        .map_err(|e| Error::invalid(line, e.to_string()))?;
    Ok(XtalIdx::new(twr, lyr, col))
}

/// Parses an enum component from its mnemonic or raw value.
fn parse_component<T: DenseIndex>(
    line: usize,
    field: &str,
    mnem: &[&str],
    what: &str,
) -> Result<T> {
    let val = mnem
        .iter()
        .position(|m| m.eq_ignore_ascii_case(field))
        .or_else(|| field.parse::<usize>().ok());
    val.and_then(T::from_val)
        .ok_or_else(|| Error::invalid(line, format!("unknown {what} '{field}'")))
}

fn parse_range_idx(line: usize, twr: TwrNum, f: &[&str]) -> Result<RangeIdx> {
    let xtal = parse_xtal(line, twr, f[0], f[1])?;
    let face: FaceNum = parse_component(line, f[2], &FaceNum::MNEM, "face")?;
    let range: RangeNum = parse_component(line, f[3], &RangeNum::MNEM, "range")?;
    Ok(xtal.face(face).range(range))
}

fn duplicate(line: usize, what: impl std::fmt::Display) -> Error {
    Error::invalid(line, format!("duplicate record for {what}"))
}

fn open<P: AsRef<Path>>(path: P) -> Result<BufReader<File>> {
    Ok(BufReader::new(File::open(path)?))
}

/// Reads a pedestal table for tower `twr`.
///
/// # Errors
/// Returns [`Error::InvalidFormat`] for malformed or duplicate records.
pub fn read_pedestals<R: BufRead>(reader: R, twr: TwrNum) -> Result<PedestalSet> {
    let mut peds: PedestalSet = IdxArray::empty();
    for_each_record(reader, 6, |line, f| {
        let idx = parse_range_idx(line, twr, f)?;
        if peds[idx].is_some() {
            return Err(duplicate(line, idx));
        }
        peds[idx] = Some(Pedestal {
            mean: parse_num(line, f[4], "mean")?,
            sigma: parse_num(line, f[5], "sigma")?,
        });
        Ok(())
    })?;
    Ok(peds)
}

/// Reads a pedestal TXT file.
///
/// # Errors
/// See [`read_pedestals`].
pub fn read_pedestals_txt<P: AsRef<Path>>(path: P, twr: TwrNum) -> Result<PedestalSet> {
    read_pedestals(open(path)?, twr)
}

type CurvePoints = IdxArray<RangeIdx, Option<(Vec<f64>, Vec<f64>)>>;

/// Collects `layer column face range DAC ADC` records per channel, requiring
/// increasing DAC within each channel.
fn read_curve_points<R: BufRead>(reader: R, twr: TwrNum) -> Result<CurvePoints> {
    let mut points: CurvePoints = IdxArray::empty();
    for_each_record(reader, 6, |line, f| {
        let idx = parse_range_idx(line, twr, f)?;
        let dac: f64 = parse_num(line, f[4], "DAC")?;
        let adc: f64 = parse_num(line, f[5], "ADC")?;
        let (dacs, adcs) = points.get_or_insert_with(idx, || (Vec::new(), Vec::new()));
        if dacs.last().is_some_and(|&last| dac <= last) {
            return Err(Error::invalid(line, format!("{idx}: DAC {dac} out of order")));
        }
        dacs.push(dac);
        adcs.push(adc);
        Ok(())
    })?;
    Ok(points)
}

/// Reads an INL table for tower `twr`.
///
/// # Errors
/// Returns [`Error::InvalidFormat`] for malformed records and a core
/// format error for a channel with fewer than two samples.
pub fn read_inl<R: BufRead>(reader: R, twr: TwrNum) -> Result<IntNonlinSet> {
    let points = read_curve_points(reader, twr)?;
    let mut inl: IntNonlinSet = IdxArray::empty();
    for (idx, (dac, adc)) in points.populated() {
        if dac.len() < 2 {
            return Err(calcal_core::Error::Format(format!(
                "{idx}: INL curve truncated to {} sample",
                dac.len()
            ))
            .into());
        }
        inl[idx] = Some(IntNonlinCurve::new(dac.clone(), adc.clone())?);
    }
    Ok(inl)
}

/// Reads an INL TXT file.
///
/// # Errors
/// See [`read_inl`].
pub fn read_inl_txt<P: AsRef<Path>>(path: P, twr: TwrNum) -> Result<IntNonlinSet> {
    read_inl(open(path)?, twr)
}

/// Reads raw charge-injection sweeps (pedestal-subtracted mean ADC per DAC
/// setting) for tower `twr`.
///
/// # Errors
/// Returns [`Error::InvalidFormat`] for malformed records.
pub fn read_raw_ci<R: BufRead>(reader: R, twr: TwrNum) -> Result<RawCiSet> {
    let points = read_curve_points(reader, twr)?;
    let mut raw: RawCiSet = IdxArray::empty();
    for (idx, (dac, adc)) in points.populated() {
        raw[idx] = Some(RawCiCurve::new(dac.clone(), adc.clone()));
    }
    log::debug!("read {} charge-injection sweeps", raw.populated().count());
    Ok(raw)
}

/// Reads a raw charge-injection TXT file.
///
/// # Errors
/// See [`read_raw_ci`].
pub fn read_raw_ci_txt<P: AsRef<Path>>(path: P, twr: TwrNum) -> Result<RawCiSet> {
    read_raw_ci(open(path)?, twr)
}

/// Reads an asymmetry table for tower `twr`.
///
/// # Errors
/// Returns [`Error::InvalidFormat`] for malformed or duplicate records and a
/// core format error for a crystal missing one of its four pairings.
pub fn read_asym<R: BufRead>(reader: R, twr: TwrNum) -> Result<AsymSet> {
    let mut partial: IdxArray<XtalIdx, Option<[Option<AsymCurve>; N_ASYM_TYPES]>> =
        IdxArray::empty();
    for_each_record(reader, ASYM_FIELDS, |line, f| {
        let xtal = parse_xtal(line, twr, f[0], f[1])?;
        let pos: DiodeNum = parse_component(line, f[2], &DiodeNum::MNEM, "diode")?;
        let neg: DiodeNum = parse_component(line, f[3], &DiodeNum::MNEM, "diode")?;
        let asym = AsymType::new(pos, neg);
        let mut curve = AsymCurve {
            value: [0.0; N_ASYM_PTS],
            error: [0.0; N_ASYM_PTS],
        };
        for i in 0..N_ASYM_PTS {
            curve.value[i] = parse_num(line, f[4 + i], "asymmetry")?;
            curve.error[i] = parse_num(line, f[4 + N_ASYM_PTS + i], "asymmetry error")?;
        }
        let slot = &mut partial.get_or_insert_with(xtal, || [None; N_ASYM_TYPES])[asym.val()];
        if slot.is_some() {
            return Err(duplicate(line, format_args!("{xtal} {asym}")));
        }
        *slot = Some(curve);
        Ok(())
    })?;

    let mut out: AsymSet = IdxArray::empty();
    for (xtal, curves) in partial.populated() {
        let mut full = [AsymCurve {
            value: [0.0; N_ASYM_PTS],
            error: [0.0; N_ASYM_PTS],
        }; N_ASYM_TYPES];
        for (t, slot) in AsymType::ALL.iter().zip(full.iter_mut()) {
            *slot = curves[t.val()].ok_or_else(|| {
                calcal_core::Error::Format(format!("{xtal}: asymmetry {t} record missing"))
            })?;
        }
        out[xtal] = Some(XtalAsym { curves: full });
    }
    Ok(out)
}

/// Reads an asymmetry TXT file.
///
/// # Errors
/// See [`read_asym`].
pub fn read_asym_txt<P: AsRef<Path>>(path: P, twr: TwrNum) -> Result<AsymSet> {
    read_asym(open(path)?, twr)
}

/// Reads a MeV/DAC table for tower `twr`.
///
/// # Errors
/// Returns [`Error::InvalidFormat`] for malformed or duplicate records and a
/// core format error for a crystal with only one diode.
pub fn read_mev_per_dac<R: BufRead>(reader: R, twr: TwrNum) -> Result<MevPerDacSet> {
    let mut partial: IdxArray<XtalIdx, Option<[Option<ValErr>; 2]>> = IdxArray::empty();
    for_each_record(reader, 5, |line, f| {
        let xtal = parse_xtal(line, twr, f[0], f[1])?;
        let diode: DiodeNum = parse_component(line, f[2], &DiodeNum::MNEM, "diode")?;
        let v = ValErr::new(parse_num(line, f[3], "mean")?, parse_num(line, f[4], "error")?);
        let slot = &mut partial.get_or_insert_with(xtal, || [None; 2])[diode.val()];
        if slot.is_some() {
            return Err(duplicate(line, format_args!("{xtal} {diode}")));
        }
        *slot = Some(v);
        Ok(())
    })?;

    let mut out: MevPerDacSet = IdxArray::empty();
    for (xtal, diodes) in partial.populated() {
        match diodes {
            [Some(large), Some(small)] => {
                out[xtal] = Some(MevPerDac {
                    large: *large,
                    small: *small,
                });
            }
            _ => {
                return Err(calcal_core::Error::Format(format!(
                    "{xtal}: MeV/DAC needs both diodes"
                ))
                .into())
            }
        }
    }
    Ok(out)
}

/// Reads a MeV/DAC TXT file.
///
/// # Errors
/// See [`read_mev_per_dac`].
pub fn read_mev_per_dac_txt<P: AsRef<Path>>(path: P, twr: TwrNum) -> Result<MevPerDacSet> {
    read_mev_per_dac(open(path)?, twr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tower0() -> TwrNum {
        TwrNum::new(0).unwrap()
    }

    #[test]
    fn test_comments_and_mnemonics() {
        let text = "; layer column face range mean sigma\n\n\
                    3 7 NEG hex8 101.5 2.25\n\
                    3 7 0 1 99 3\n";
        let peds = read_pedestals(text.as_bytes(), tower0()).unwrap();
        assert_eq!(peds.populated().count(), 2);
        let xtal = XtalIdx::from_raw(0, 3, 7).unwrap();
        let hex8 = peds[xtal.face(FaceNum::Neg).range(RangeNum::Hex8)].unwrap();
        assert_eq!(hex8.mean, 101.5);
        let lex1 = peds[xtal.face(FaceNum::Pos).range(RangeNum::Lex1)].unwrap();
        assert_eq!(lex1.sigma, 3.0);
    }

    #[test]
    fn test_wrong_field_count_reports_line() {
        let text = "; header\n0 0 POS LEX8 100 2\n0 1 POS LEX8 100\n";
        let err = read_pedestals(text.as_bytes(), tower0()).unwrap_err();
        assert!(matches!(err, Error::InvalidFormat { line: 3, .. }), "{err}");
    }

    #[test]
    fn test_non_numeric_and_bad_coordinates() {
        let err = read_pedestals("0 0 POS LEX8 abc 2\n".as_bytes(), tower0()).unwrap_err();
        assert!(matches!(err, Error::InvalidFormat { line: 1, .. }));
        let err = read_pedestals("8 0 POS LEX8 1 2\n".as_bytes(), tower0()).unwrap_err();
        assert!(matches!(err, Error::InvalidFormat { .. }));
        let err = read_pedestals("0 0 TOP LEX8 1 2\n".as_bytes(), tower0()).unwrap_err();
        assert!(matches!(err, Error::InvalidFormat { .. }));
    }

    #[test]
    fn test_duplicate_record_is_rejected() {
        let text = "0 0 POS LEX8 1 2\n0 0 POS LEX8 1 2\n";
        let err = read_pedestals(text.as_bytes(), tower0()).unwrap_err();
        assert!(matches!(err, Error::InvalidFormat { line: 2, .. }));
    }

    #[test]
    fn test_truncated_inl_channel() {
        let text = "0 0 POS LEX8 0 0\n0 0 POS LEX8 100 200\n0 0 NEG LEX8 0 0\n";
        let err = read_inl(text.as_bytes(), tower0()).unwrap_err();
        assert!(matches!(err, Error::Core(calcal_core::Error::Format(_))), "{err}");
    }

    #[test]
    fn test_unordered_dac_is_rejected() {
        let text = "0 0 POS LEX8 100 200\n0 0 POS LEX8 50 100\n";
        let err = read_raw_ci(text.as_bytes(), tower0()).unwrap_err();
        assert!(matches!(err, Error::InvalidFormat { line: 2, .. }));
    }

    #[test]
    fn test_incomplete_asym_crystal() {
        let mut line = String::from("0 0 LRG LRG");
        for _ in 0..2 * N_ASYM_PTS {
            line.push_str(" 0.1");
        }
        let err = read_asym(line.as_bytes(), tower0()).unwrap_err();
        assert!(matches!(err, Error::Core(calcal_core::Error::Format(_))));
    }

    #[test]
    fn test_mev_per_dac_needs_both_diodes() {
        let err = read_mev_per_dac("2 2 SM 0.3 0.01\n".as_bytes(), tower0()).unwrap_err();
        assert!(matches!(err, Error::Core(calcal_core::Error::Format(_))));
    }
}
