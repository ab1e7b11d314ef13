//! Galois field arithmetic over GF(2^8) and GF(2^16).
//!
//! Both fields use 2 as their primitive element. The reducing polynomials are part of the
//! on-disk formats: 0x11D for PAR 1.0 volumes and 0x1100B for PAR 2.0 recovery slices.
//! Log/antilog tables are built on first use and never mutated afterwards.

use std::fmt;
use std::ops::{Add, Mul, Sub};
use std::sync::OnceLock;

use crate::error::{Error, Result};

pub const GF8_POLY: u32 = 0x11D;
pub const GF16_POLY: u32 = 0x1100B;

/// A finite field of characteristic 2 whose elements are fixed-width symbols.
pub trait Field:
    Copy
    + Eq
    + fmt::Debug
    + Send
    + Sync
    + 'static
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
{
    const BITS: u32;
    /// Bytes per symbol when a block is viewed as a vector of field elements.
    const SYMBOL_BYTES: usize;
    const ZERO: Self;
    const ONE: Self;
    /// Number of distinct data-column bases the format defines.
    const MAX_DATA_BLOCKS: usize;

    fn checked_div(self, rhs: Self) -> Result<Self>;

    fn inverse(self) -> Result<Self> {
        Self::ONE.checked_div(self)
    }

    fn pow(self, exp: u32) -> Self;

    /// Coefficient base of data column `index`, or `None` past the field's capacity.
    fn data_base(index: usize) -> Option<Self>;

    /// `dst ^= coef * src`, symbol by symbol. Both slices hold whole symbols.
    fn mul_acc(dst: &mut [u8], src: &[u8], coef: Self);

    fn is_zero(self) -> bool {
        self == Self::ZERO
    }
}

struct Tables {
    log: Vec<u16>,
    // Doubled so that log(a) + log(b) never needs a modulo.
    exp: Vec<u16>,
    max: usize,
}

impl Tables {
    fn build(bits: u32, poly: u32) -> Self {
        let size = 1usize << bits;
        let max = size - 1;
        let mut log = vec![0u16; size];
        let mut exp = vec![0u16; 2 * max];
        let mut x: u32 = 1;
        for i in 0..max {
            exp[i] = x as u16;
            log[x as usize] = i as u16;
            x <<= 1;
            if x & size as u32 != 0 {
                x ^= poly;
            }
        }
        for i in max..2 * max {
            exp[i] = exp[i - max];
        }
        Tables { log, exp, max }
    }

    #[inline]
    fn mul(&self, a: u16, b: u16) -> u16 {
        if a == 0 || b == 0 {
            return 0;
        }
        self.exp[self.log[a as usize] as usize + self.log[b as usize] as usize]
    }

    fn div(&self, a: u16, b: u16) -> Result<u16> {
        if b == 0 {
            return Err(Error::DivisionByZero);
        }
        if a == 0 {
            return Ok(0);
        }
        Ok(self.exp[self.log[a as usize] as usize + self.max - self.log[b as usize] as usize])
    }

    fn pow(&self, a: u16, e: u32) -> u16 {
        if e == 0 {
            return 1;
        }
        if a == 0 {
            return 0;
        }
        let l = (self.log[a as usize] as u64 * e as u64) % self.max as u64;
        self.exp[l as usize]
    }
}

fn gf8_tables() -> &'static Tables {
    static TABLES: OnceLock<Tables> = OnceLock::new();
    TABLES.get_or_init(|| Tables::build(8, GF8_POLY))
}

fn gf16_tables() -> &'static Tables {
    static TABLES: OnceLock<Tables> = OnceLock::new();
    TABLES.get_or_init(|| Tables::build(16, GF16_POLY))
}

/// PAR2 input-slice constants: 2^n for every n coprime to 65535, in increasing n.
fn par2_bases() -> &'static [u16] {
    static BASES: OnceLock<Vec<u16>> = OnceLock::new();
    BASES.get_or_init(|| {
        let t = gf16_tables();
        (0u32..65535).filter(|&n| gcd(n, 65535) == 1).map(|n| t.exp[n as usize]).collect()
    })
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

macro_rules! field_ops {
    ($t:ident, $repr:ty, $tables:ident) => {
        impl Add for $t {
            type Output = $t;
            fn add(self, rhs: $t) -> $t {
                $t(self.0 ^ rhs.0)
            }
        }

        impl Sub for $t {
            type Output = $t;
            fn sub(self, rhs: $t) -> $t {
                $t(self.0 ^ rhs.0)
            }
        }

        impl Mul for $t {
            type Output = $t;
            fn mul(self, rhs: $t) -> $t {
                $t($tables().mul(self.0 as u16, rhs.0 as u16) as $repr)
            }
        }
    };
}

/// Element of GF(2^8) modulo x^8 + x^4 + x^3 + x^2 + 1.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Gf8(pub u8);

/// Element of GF(2^16) modulo x^16 + x^12 + x^3 + x + 1.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Gf16(pub u16);

field_ops!(Gf8, u8, gf8_tables);
field_ops!(Gf16, u16, gf16_tables);

impl Field for Gf8 {
    const BITS: u32 = 8;
    const SYMBOL_BYTES: usize = 1;
    const ZERO: Self = Gf8(0);
    const ONE: Self = Gf8(1);
    const MAX_DATA_BLOCKS: usize = 255;

    fn checked_div(self, rhs: Self) -> Result<Self> {
        gf8_tables().div(self.0 as u16, rhs.0 as u16).map(|v| Gf8(v as u8))
    }

    fn pow(self, exp: u32) -> Self {
        Gf8(gf8_tables().pow(self.0 as u16, exp) as u8)
    }

    fn data_base(index: usize) -> Option<Self> {
        // PAR1 multiplies file number i (1-based) by i^(volume - 1).
        u8::try_from(index + 1).ok().map(Gf8)
    }

    fn mul_acc(dst: &mut [u8], src: &[u8], coef: Self) {
        match coef.0 {
            0 => {}
            1 => dst.iter_mut().zip(src).for_each(|(d, s)| *d ^= s),
            c => {
                let t = gf8_tables();
                let mut row = [0u8; 256];
                for (s, r) in row.iter_mut().enumerate() {
                    *r = t.mul(c as u16, s as u16) as u8;
                }
                for (d, &s) in dst.iter_mut().zip(src) {
                    *d ^= row[s as usize];
                }
            }
        }
    }
}

impl Field for Gf16 {
    const BITS: u32 = 16;
    const SYMBOL_BYTES: usize = 2;
    const ZERO: Self = Gf16(0);
    const ONE: Self = Gf16(1);
    const MAX_DATA_BLOCKS: usize = 32768;

    fn checked_div(self, rhs: Self) -> Result<Self> {
        gf16_tables().div(self.0, rhs.0).map(Gf16)
    }

    fn pow(self, exp: u32) -> Self {
        Gf16(gf16_tables().pow(self.0, exp))
    }

    fn data_base(index: usize) -> Option<Self> {
        par2_bases().get(index).copied().map(Gf16)
    }

    fn mul_acc(dst: &mut [u8], src: &[u8], coef: Self) {
        match coef.0 {
            0 => {}
            1 => dst.iter_mut().zip(src).for_each(|(d, s)| *d ^= s),
            c => {
                let t = gf16_tables();
                let lc = t.log[c as usize] as usize;
                for (d, s) in dst.chunks_exact_mut(2).zip(src.chunks_exact(2)) {
                    let sv = u16::from_le_bytes([s[0], s[1]]);
                    if sv == 0 {
                        continue;
                    }
                    let p = t.exp[t.log[sv as usize] as usize + lc].to_le_bytes();
                    d[0] ^= p[0];
                    d[1] ^= p[1];
                }
            }
        }
    }
}

/// Data-column bases for the first `count` blocks of a set.
pub fn data_bases<F: Field>(count: usize) -> Result<Vec<F>> {
    if count > F::MAX_DATA_BLOCKS {
        return Err(Error::TooManyBlocks { count, max: F::MAX_DATA_BLOCKS });
    }
    (0..count)
        .map(|i| F::data_base(i).ok_or(Error::TooManyBlocks { count, max: F::MAX_DATA_BLOCKS }))
        .collect()
}
