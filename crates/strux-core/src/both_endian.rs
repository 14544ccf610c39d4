//! Values stored in both byte orders, as ISO 9660 does for most of its
//! integer fields: the little-endian copy first, then the big-endian copy.

use std::fmt;
use std::ops::{
    Add, AddAssign, BitAnd, BitAndAssign, BitOr, BitOrAssign, BitXor, BitXorAssign, Div,
    DivAssign, Mul, MulAssign, Not, Rem, RemAssign, Shl, ShlAssign, Shr, ShrAssign, Sub,
    SubAssign,
};

use crate::codec::{Endian, Primitive};

/// A scalar carrying its little- and big-endian readings side by side.
///
/// Both halves are kept as read so that damaged images can be detected with
/// [`BothEndian::is_consistent`]; arithmetic works on the little-endian
/// reading and always produces a consistent pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct BothEndian<T> {
    le: T,
    be: T,
}

impl<T: Copy> BothEndian<T> {
    pub fn new(value: T) -> Self {
        Self {
            le: value,
            be: value,
        }
    }

    pub fn from_parts(le: T, be: T) -> Self {
        Self { le, be }
    }

    pub fn get(&self) -> T {
        self.le
    }

    pub fn little(&self) -> T {
        self.le
    }

    pub fn big(&self) -> T {
        self.be
    }
}

impl<T: Copy + PartialEq> BothEndian<T> {
    pub fn is_consistent(&self) -> bool {
        self.le == self.be
    }
}

impl<T: Primitive> BothEndian<T> {
    pub const WIDTH: usize = 2 * T::WIDTH;

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::WIDTH {
            return None;
        }
        let (le, be) = bytes.split_at(T::WIDTH);
        Some(Self {
            le: T::decode(le, Endian::Little)?,
            be: T::decode(be, Endian::Big)?,
        })
    }

    pub fn encode(&self, out: &mut [u8]) -> bool {
        if out.len() != Self::WIDTH {
            return false;
        }
        let (le, be) = out.split_at_mut(T::WIDTH);
        self.le.encode(Endian::Little, le) && self.be.encode(Endian::Big, be)
    }
}

impl<T: Copy> From<T> for BothEndian<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl<T: Copy + PartialEq + fmt::Display> fmt::Display for BothEndian<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_consistent() {
            write!(f, "{}", self.le)
        } else {
            write!(f, "{} (be: {})", self.le, self.be)
        }
    }
}

macro_rules! binary_ops {
    ($($op:ident $method:ident $assign:ident $assign_method:ident),*) => {$(
        impl<T: Copy + $op<Output = T>> $op for BothEndian<T> {
            type Output = Self;

            fn $method(self, rhs: Self) -> Self {
                Self::new($op::$method(self.le, rhs.le))
            }
        }

        impl<T: Copy + $op<Output = T>> $op<T> for BothEndian<T> {
            type Output = Self;

            fn $method(self, rhs: T) -> Self {
                Self::new($op::$method(self.le, rhs))
            }
        }

        impl<T: Copy + $op<Output = T>> $assign for BothEndian<T> {
            fn $assign_method(&mut self, rhs: Self) {
                *self = $op::$method(*self, rhs);
            }
        }

        impl<T: Copy + $op<Output = T>> $assign<T> for BothEndian<T> {
            fn $assign_method(&mut self, rhs: T) {
                *self = $op::$method(*self, rhs);
            }
        }
    )*};
}

binary_ops!(
    Add add AddAssign add_assign,
    Sub sub SubAssign sub_assign,
    Mul mul MulAssign mul_assign,
    Div div DivAssign div_assign,
    Rem rem RemAssign rem_assign,
    BitAnd bitand BitAndAssign bitand_assign,
    BitOr bitor BitOrAssign bitor_assign,
    BitXor bitxor BitXorAssign bitxor_assign
);

macro_rules! shift_ops {
    ($($op:ident $method:ident $assign:ident $assign_method:ident),*) => {$(
        impl<T: Copy + $op<u32, Output = T>> $op<u32> for BothEndian<T> {
            type Output = Self;

            fn $method(self, rhs: u32) -> Self {
                Self::new($op::$method(self.le, rhs))
            }
        }

        impl<T: Copy + $op<u32, Output = T>> $assign<u32> for BothEndian<T> {
            fn $assign_method(&mut self, rhs: u32) {
                *self = $op::$method(*self, rhs);
            }
        }
    )*};
}

shift_ops!(Shl shl ShlAssign shl_assign, Shr shr ShrAssign shr_assign);

impl<T: Copy + Not<Output = T>> Not for BothEndian<T> {
    type Output = Self;

    fn not(self) -> Self {
        Self::new(!self.le)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_iso_both_byte_order() {
        let bytes = hex::decode("0008000000000800").unwrap();
        let value = BothEndian::<u32>::decode(&bytes).unwrap();
        assert_eq!(value.get(), 2048);
        assert!(value.is_consistent());

        let mut out = [0u8; 8];
        assert!(value.encode(&mut out));
        assert_eq!(out.to_vec(), bytes);
        assert!(!value.encode(&mut out[..4]));
    }

    #[test]
    fn detects_mismatched_halves() {
        let value = BothEndian::<u16>::decode(&[0x01, 0x00, 0x00, 0x02]).unwrap();
        assert_eq!(value.little(), 1);
        assert_eq!(value.big(), 2);
        assert!(!value.is_consistent());
        assert_eq!(value.to_string(), "1 (be: 2)");
    }

    #[test]
    fn arithmetic_yields_consistent_pairs() {
        let a = BothEndian::from_parts(10u32, 99);
        let mut b = a + BothEndian::new(5);
        assert_eq!(b, BothEndian::new(15));

        b -= 3;
        b *= 2;
        assert_eq!(b.get(), 24);
        assert_eq!((b / 5).get(), 4);
        assert_eq!((b % 5).get(), 4);
        assert_eq!((b << 1).get(), 48);
        assert_eq!((b >> 3).get(), 3);
        assert_eq!((b & 0x8).get(), 8);
        assert_eq!((b | 1).get(), 25);
        assert_eq!((b ^ b).get(), 0);
        assert_eq!((!BothEndian::new(0u16)).get(), u16::MAX);
    }
}
