//! Fixed-width identifiers and big-endian 256-bit arithmetic.
//!
//! Everything in this module is a plain value type: constructed from bytes,
//! compared by value, and never mutated in place. `UInt256` stores its limbs
//! big-endian to match the canonical wire encoding, so `as_bytes()` is
//! a zero-cost borrow rather than a byte-swapping copy.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};

/// 32-byte opaque hash, e.g. a BLAKE3 digest or a transaction/block hash.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub const ZERO: Hash256 = Hash256([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Hash256(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Hash256(bytes)
    }
}

/// 20-byte account identifier. `Address::ZERO` is the burn/null sentinel.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Address(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// 256-bit unsigned integer, stored big-endian, with checked arithmetic.
///
/// Overflow and underflow are never silently wrapped: every caller in the
/// executor goes through `checked_add`/`checked_sub` and maps `None` onto a
/// validation error (`InsufficientFunds`), never a panic.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct UInt256(pub [u8; 32]);

impl UInt256 {
    pub const ZERO: UInt256 = UInt256([0u8; 32]);

    pub fn from_u64(value: u64) -> Self {
        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&value.to_be_bytes());
        UInt256(bytes)
    }

    pub fn from_u128(value: u128) -> Self {
        let mut bytes = [0u8; 32];
        bytes[16..].copy_from_slice(&value.to_be_bytes());
        UInt256(bytes)
    }

    pub fn from_be_bytes(bytes: [u8; 32]) -> Self {
        UInt256(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    fn to_u128_lossy(self) -> u128 {
        let mut buf = [0u8; 16];
        buf.copy_from_slice(&self.0[16..]);
        u128::from_be_bytes(buf)
    }

    pub fn checked_add(self, other: UInt256) -> Option<UInt256> {
        let mut result = [0u8; 32];
        let mut carry: u16 = 0;
        for i in (0..32).rev() {
            let sum = self.0[i] as u16 + other.0[i] as u16 + carry;
            result[i] = sum as u8;
            carry = sum >> 8;
        }
        if carry != 0 {
            None
        } else {
            Some(UInt256(result))
        }
    }

    pub fn checked_sub(self, other: UInt256) -> Option<UInt256> {
        if self < other {
            return None;
        }
        let mut result = [0u8; 32];
        let mut borrow: i16 = 0;
        for i in (0..32).rev() {
            let mut diff = self.0[i] as i16 - other.0[i] as i16 - borrow;
            if diff < 0 {
                diff += 256;
                borrow = 1;
            } else {
                borrow = 0;
            }
            result[i] = diff as u8;
        }
        Some(UInt256(result))
    }

    pub fn saturating_sub(self, other: UInt256) -> UInt256 {
        self.checked_sub(other).unwrap_or(UInt256::ZERO)
    }

    /// Checked multiplication by a `u64` scalar (used for `gas_limit * price`).
    pub fn checked_mul_u64(self, scalar: u64) -> Option<UInt256> {
        if scalar == 0 || self == UInt256::ZERO {
            return Some(UInt256::ZERO);
        }
        let mut acc = UInt256::ZERO;
        let mut base = self;
        let mut n = scalar;
        // binary multiplication via repeated doubling, checked at each step
        while n > 0 {
            if n & 1 == 1 {
                acc = acc.checked_add(base)?;
            }
            n >>= 1;
            if n > 0 {
                base = base.checked_add(base)?;
            }
        }
        Some(acc)
    }
}

impl fmt::Debug for UInt256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_u128_lossy())
    }
}

impl Add for UInt256 {
    type Output = UInt256;
    fn add(self, rhs: UInt256) -> UInt256 {
        self.checked_add(rhs).expect("UInt256 addition overflow")
    }
}

impl Sub for UInt256 {
    type Output = UInt256;
    fn sub(self, rhs: UInt256) -> UInt256 {
        self.checked_sub(rhs).expect("UInt256 subtraction underflow")
    }
}
