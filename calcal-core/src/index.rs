//! Coordinate index algebra.
//!
//! Every electronics channel of the calorimeter is addressed by a tuple of
//! bounded coordinates (tower, layer, column, face, diode/range). This module
//! provides a typed newtype per coordinate and four nested composite indices:
//!
//! - [`XtalIdx`] - (tower, layer, column)
//! - [`FaceIdx`] - crystal + face
//! - [`DiodeIdx`] - face + diode
//! - [`RangeIdx`] - face + range
//!
//! Composites use mixed-radix flattening with the trailing coordinate varying
//! fastest, so iterating `0..COUNT` walks Tower -> Layer -> Column -> Face ->
//! Diode/Range. Promotion and demotion between granularities is a single
//! multiply/add or divide/modulo.
#![allow(clippy::cast_possible_truncation, clippy::must_use_candidate)]

use crate::{Error, Result};
use std::fmt;
use std::marker::PhantomData;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Number of towers in the instrument.
pub const N_TWR: usize = 16;
/// Number of crystal layers per tower.
pub const N_LYR: usize = 8;
/// Number of crystal columns per layer.
pub const N_COL: usize = 12;
/// Number of readout faces per crystal.
pub const N_FACE: usize = 2;
/// Number of photodiodes per face.
pub const N_DIODE: usize = 2;
/// Number of ADC ranges per face.
pub const N_RNG: usize = 4;

/// Shared encode/decode contract for every dense index type.
///
/// Implementors map onto `0..COUNT` without gaps or duplicates.
pub trait DenseIndex: Copy + Eq + fmt::Debug {
    /// Cardinality of the index space.
    const COUNT: usize;

    /// Returns the flat value in `0..COUNT`.
    fn val(self) -> usize;

    /// Decodes a flat value, returning `None` outside `0..COUNT`.
    fn from_val(val: usize) -> Option<Self>;

    /// Checks the flat value is inside the index space.
    fn is_valid(self) -> bool {
        self.val() < Self::COUNT
    }

    /// Advances to the next index in nested order.
    fn next_idx(self) -> Option<Self> {
        Self::from_val(self.val() + 1)
    }

    /// Iterates every index exactly once in nested order.
    fn all() -> IdxIter<Self> {
        IdxIter {
            next: 0,
            _marker: PhantomData,
        }
    }
}

/// Iterator over a full index space.
#[derive(Debug, Clone)]
pub struct IdxIter<I> {
    next: usize,
    _marker: PhantomData<I>,
}

impl<I: DenseIndex> Iterator for IdxIter<I> {
    type Item = I;

    fn next(&mut self) -> Option<I> {
        let idx = I::from_val(self.next)?;
        self.next += 1;
        Some(idx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = I::COUNT.saturating_sub(self.next);
        (left, Some(left))
    }
}

impl<I: DenseIndex> ExactSizeIterator for IdxIter<I> {}

macro_rules! bounded_component {
    ($(#[$meta:meta])* $name:ident, $count:expr, $label:literal, $mnem:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(u8);

        impl $name {
            /// Creates the component, failing if it exceeds its cardinality.
            ///
            /// # Errors
            /// Returns [`Error::InvalidCoordinate`] when `val` is out of range.
            pub fn new(val: u8) -> Result<Self> {
                if usize::from(val) < $count {
                    Ok(Self(val))
                } else {
                    Err(Error::InvalidCoordinate {
                        component: $label,
                        value: usize::from(val),
                        limit: $count,
                    })
                }
            }

            /// Returns the raw coordinate value.
            #[inline]
            pub fn raw(self) -> u8 {
                self.0
            }

            /// Short mnemonic used in logs and reports.
            pub fn mnemonic(self) -> String {
                ($mnem)(self.0)
            }
        }

        impl DenseIndex for $name {
            const COUNT: usize = $count;

            #[inline]
            fn val(self) -> usize {
                usize::from(self.0)
            }

            fn from_val(val: usize) -> Option<Self> {
                if val < $count {
                    Some(Self(val as u8))
                } else {
                    None
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.mnemonic())
            }
        }
    };
}

bounded_component!(
    /// Tower (bay) number.
    TwrNum,
    N_TWR,
    "tower",
    |v: u8| format!("T{v}")
);

bounded_component!(
    /// Layer number; even layers measure X, odd layers measure Y.
    LyrNum,
    N_LYR,
    "layer",
    |v: u8| format!("{}{}", if v % 2 == 0 { 'X' } else { 'Y' }, v / 2)
);

bounded_component!(
    /// Column (crystal position within a layer).
    ColNum,
    N_COL,
    "column",
    |v: u8| format!("C{v}")
);

/// Measurement direction of a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dir {
    /// Even layers.
    X,
    /// Odd layers.
    Y,
}

impl Dir {
    /// Both projections.
    pub const ALL: [Dir; 2] = [Dir::X, Dir::Y];

    /// The orthogonal projection.
    pub fn orthogonal(self) -> Self {
        match self {
            Dir::X => Dir::Y,
            Dir::Y => Dir::X,
        }
    }
}

impl LyrNum {
    /// Projection measured by this layer.
    pub fn dir(self) -> Dir {
        if self.0 % 2 == 0 {
            Dir::X
        } else {
            Dir::Y
        }
    }
}

/// Crystal readout face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "UPPERCASE"))]
pub enum FaceNum {
    Pos = 0,
    Neg = 1,
}

impl FaceNum {
    pub const ALL: [FaceNum; N_FACE] = [FaceNum::Pos, FaceNum::Neg];
    pub const MNEM: [&'static str; N_FACE] = ["POS", "NEG"];
}

/// Photodiode size; the large diode carries the high-gain ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "UPPERCASE"))]
pub enum DiodeNum {
    Large = 0,
    Small = 1,
}

impl DiodeNum {
    pub const ALL: [DiodeNum; N_DIODE] = [DiodeNum::Large, DiodeNum::Small];
    pub const MNEM: [&'static str; N_DIODE] = ["LRG", "SM"];

    /// The x8 (fine) range read out from this diode.
    pub fn x8_range(self) -> RangeNum {
        match self {
            DiodeNum::Large => RangeNum::Lex8,
            DiodeNum::Small => RangeNum::Hex8,
        }
    }
}

/// ADC gain range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "UPPERCASE"))]
pub enum RangeNum {
    Lex8 = 0,
    Lex1 = 1,
    Hex8 = 2,
    Hex1 = 3,
}

impl RangeNum {
    pub const ALL: [RangeNum; N_RNG] = [
        RangeNum::Lex8,
        RangeNum::Lex1,
        RangeNum::Hex8,
        RangeNum::Hex1,
    ];
    pub const MNEM: [&'static str; N_RNG] = ["LEX8", "LEX1", "HEX8", "HEX1"];

    /// Diode feeding this range.
    pub fn diode(self) -> DiodeNum {
        DiodeNum::ALL[self as usize / 2]
    }
}

macro_rules! enum_component {
    ($name:ident, $count:expr, $label:literal) => {
        impl $name {
            /// Creates the component from its raw value.
            ///
            /// # Errors
            /// Returns [`Error::InvalidCoordinate`] when `val` is out of range.
            pub fn new(val: u8) -> Result<Self> {
                Self::from_val(usize::from(val)).ok_or(Error::InvalidCoordinate {
                    component: $label,
                    value: usize::from(val),
                    limit: $count,
                })
            }

            /// Returns the raw coordinate value.
            #[inline]
            pub fn raw(self) -> u8 {
                self as u8
            }
        }

        impl DenseIndex for $name {
            const COUNT: usize = $count;

            #[inline]
            fn val(self) -> usize {
                self as usize
            }

            fn from_val(val: usize) -> Option<Self> {
                Self::ALL.get(val).copied()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(Self::MNEM[*self as usize])
            }
        }
    };
}

enum_component!(FaceNum, N_FACE, "face");
enum_component!(DiodeNum, N_DIODE, "diode");
enum_component!(RangeNum, N_RNG, "range");

/// Crystal index: (tower, layer, column).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct XtalIdx(u16);

impl XtalIdx {
    /// Encodes a crystal from typed components.
    #[inline]
    pub fn new(twr: TwrNum, lyr: LyrNum, col: ColNum) -> Self {
        Self(((twr.val() * N_LYR + lyr.val()) * N_COL + col.val()) as u16)
    }

    /// Encodes a crystal from raw values.
    ///
    /// # Errors
    /// Returns [`Error::InvalidCoordinate`] if any component exceeds its cardinality.
    pub fn from_raw(twr: u8, lyr: u8, col: u8) -> Result<Self> {
        Ok(Self::new(TwrNum::new(twr)?, LyrNum::new(lyr)?, ColNum::new(col)?))
    }

    #[inline]
    pub fn twr(self) -> TwrNum {
        TwrNum((usize::from(self.0) / (N_COL * N_LYR)) as u8)
    }

    #[inline]
    pub fn lyr(self) -> LyrNum {
        LyrNum(((usize::from(self.0) / N_COL) % N_LYR) as u8)
    }

    #[inline]
    pub fn col(self) -> ColNum {
        ColNum((usize::from(self.0) % N_COL) as u8)
    }

    /// Promotes to a face index.
    #[inline]
    pub fn face(self, face: FaceNum) -> FaceIdx {
        FaceIdx::new(self, face)
    }

    /// Iterates the crystals of one tower.
    pub fn in_tower(twr: TwrNum) -> impl Iterator<Item = XtalIdx> {
        let start = twr.val() * N_LYR * N_COL;
        (start..start + N_LYR * N_COL).map(|v| XtalIdx(v as u16))
    }
}

impl DenseIndex for XtalIdx {
    const COUNT: usize = N_TWR * N_LYR * N_COL;

    #[inline]
    fn val(self) -> usize {
        usize::from(self.0)
    }

    fn from_val(val: usize) -> Option<Self> {
        (val < Self::COUNT).then(|| XtalIdx(val as u16))
    }
}

impl fmt::Display for XtalIdx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.twr(), self.lyr(), self.col())
    }
}

macro_rules! nested_index {
    (
        $(#[$meta:meta])*
        $name:ident, $outer:ident, $outer_fn:ident, $inner:ident, $inner_fn:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(u16);

        impl $name {
            /// Promotes `outer` by appending the trailing coordinate.
            #[inline]
            pub fn new(outer: $outer, inner: $inner) -> Self {
                Self((outer.val() * <$inner as DenseIndex>::COUNT + inner.val()) as u16)
            }

            /// Demotes by dropping the trailing coordinate.
            #[inline]
            pub fn $outer_fn(self) -> $outer {
                $outer(self.0 / <$inner as DenseIndex>::COUNT as u16)
            }

            /// Trailing coordinate.
            #[inline]
            pub fn $inner_fn(self) -> $inner {
                $inner::ALL[usize::from(self.0) % <$inner as DenseIndex>::COUNT]
            }
        }

        impl DenseIndex for $name {
            const COUNT: usize = <$outer as DenseIndex>::COUNT * <$inner as DenseIndex>::COUNT;

            #[inline]
            fn val(self) -> usize {
                usize::from(self.0)
            }

            fn from_val(val: usize) -> Option<Self> {
                (val < Self::COUNT).then(|| $name(val as u16))
            }
        }
    };
}

nested_index!(
    /// Face index: crystal + face.
    FaceIdx,
    XtalIdx,
    xtal,
    FaceNum,
    face
);

nested_index!(
    /// Diode index: face + diode.
    DiodeIdx,
    FaceIdx,
    face_idx,
    DiodeNum,
    diode
);

nested_index!(
    /// Range index: face + range.
    RangeIdx,
    FaceIdx,
    face_idx,
    RangeNum,
    range
);

impl FaceIdx {
    #[inline]
    pub fn diode(self, diode: DiodeNum) -> DiodeIdx {
        DiodeIdx::new(self, diode)
    }

    #[inline]
    pub fn range(self, range: RangeNum) -> RangeIdx {
        RangeIdx::new(self, range)
    }
}

impl DiodeIdx {
    #[inline]
    pub fn xtal(self) -> XtalIdx {
        self.face_idx().xtal()
    }

    /// Range index of the diode's x8 range on the same face.
    #[inline]
    pub fn x8_range(self) -> RangeIdx {
        self.face_idx().range(self.diode().x8_range())
    }
}

impl RangeIdx {
    #[inline]
    pub fn xtal(self) -> XtalIdx {
        self.face_idx().xtal()
    }

    /// Diode index feeding this range.
    #[inline]
    pub fn diode_idx(self) -> DiodeIdx {
        self.face_idx().diode(self.range().diode())
    }
}

/// Index granularities that address channels of a single crystal.
pub trait XtalScoped: DenseIndex + fmt::Display {
    /// Crystal owning this channel.
    fn owning_xtal(self) -> XtalIdx;
}

impl XtalScoped for XtalIdx {
    fn owning_xtal(self) -> XtalIdx {
        self
    }
}

impl XtalScoped for FaceIdx {
    fn owning_xtal(self) -> XtalIdx {
        self.xtal()
    }
}

impl XtalScoped for DiodeIdx {
    fn owning_xtal(self) -> XtalIdx {
        self.xtal()
    }
}

impl XtalScoped for RangeIdx {
    fn owning_xtal(self) -> XtalIdx {
        self.xtal()
    }
}

impl fmt::Display for FaceIdx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.xtal(), self.face())
    }
}

impl fmt::Display for DiodeIdx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.face_idx(), self.diode())
    }
}

impl fmt::Display for RangeIdx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.face_idx(), self.range())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_xtal_encode_decode_roundtrip() {
        for twr in 0..N_TWR as u8 {
            for lyr in 0..N_LYR as u8 {
                for col in 0..N_COL as u8 {
                    let xtal = XtalIdx::from_raw(twr, lyr, col).unwrap();
                    assert_eq!(xtal.twr().raw(), twr);
                    assert_eq!(xtal.lyr().raw(), lyr);
                    assert_eq!(xtal.col().raw(), col);
                }
            }
        }
    }

    #[test]
    fn test_encode_rejects_out_of_range() {
        assert!(XtalIdx::from_raw(16, 0, 0).is_err());
        assert!(XtalIdx::from_raw(0, 8, 0).is_err());
        assert!(XtalIdx::from_raw(0, 0, 12).is_err());
        assert!(RangeNum::new(4).is_err());
        assert!(FaceNum::new(2).is_err());
        assert_eq!(DiodeNum::new(1).unwrap(), DiodeNum::Small);
    }

    #[test]
    fn test_range_index_is_bijective() {
        let mut seen = HashSet::new();
        let mut count = 0;
        for idx in RangeIdx::all() {
            let face = idx.face_idx();
            let rebuilt = RangeIdx::new(face, idx.range());
            assert_eq!(rebuilt, idx);
            assert_eq!(RangeIdx::from_val(idx.val()), Some(idx));
            assert!(seen.insert(idx.val()));
            count += 1;
        }
        assert_eq!(count, RangeIdx::COUNT);
        assert_eq!(RangeIdx::COUNT, N_TWR * N_LYR * N_COL * N_FACE * N_RNG);
        assert_eq!(RangeIdx::from_val(RangeIdx::COUNT), None);
    }

    #[test]
    fn test_iteration_order_is_nested() {
        // Trailing coordinate varies fastest.
        let first: Vec<DiodeIdx> = DiodeIdx::all().take(5).collect();
        assert_eq!(first[0].diode(), DiodeNum::Large);
        assert_eq!(first[1].diode(), DiodeNum::Small);
        assert_eq!(first[2].face_idx().face(), FaceNum::Neg);
        assert_eq!(first[4].xtal().col().raw(), 1);

        let mut idx = XtalIdx::from_val(0).unwrap();
        let mut steps = 1;
        while let Some(next) = idx.next_idx() {
            assert_eq!(next.val(), idx.val() + 1);
            idx = next;
            steps += 1;
        }
        assert_eq!(steps, XtalIdx::COUNT);
        assert_eq!(idx.twr().raw(), 15);
        assert_eq!(idx.lyr().raw(), 7);
        assert_eq!(idx.col().raw(), 11);
    }

    #[test]
    fn test_promote_demote() {
        let xtal = XtalIdx::from_raw(3, 5, 7).unwrap();
        let face = xtal.face(FaceNum::Neg);
        let rng = face.range(RangeNum::Hex8);
        assert_eq!(rng.xtal(), xtal);
        assert_eq!(rng.face_idx(), face);
        assert_eq!(rng.diode_idx(), face.diode(DiodeNum::Small));
        assert_eq!(face.diode(DiodeNum::Large).x8_range().range(), RangeNum::Lex8);
    }

    #[test]
    fn test_layer_direction_and_mnemonics() {
        assert_eq!(LyrNum::new(0).unwrap().dir(), Dir::X);
        assert_eq!(LyrNum::new(3).unwrap().dir(), Dir::Y);
        assert_eq!(LyrNum::new(3).unwrap().to_string(), "Y1");
        assert_eq!(RangeNum::Hex1.to_string(), "HEX1");
        assert_eq!(Dir::X.orthogonal(), Dir::Y);
        let xtal = XtalIdx::from_raw(0, 2, 4).unwrap();
        assert_eq!(xtal.to_string(), "T0/X1/C4");
    }

    #[test]
    fn test_in_tower_covers_tower_only() {
        let twr = TwrNum::new(2).unwrap();
        let xtals: Vec<XtalIdx> = XtalIdx::in_tower(twr).collect();
        assert_eq!(xtals.len(), N_LYR * N_COL);
        assert!(xtals.iter().all(|x| x.twr() == twr));
    }
}
