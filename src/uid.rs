//! Time-ordered unique identifiers
//!
//! Every pool, branch, commit, data object and index rule is named by a
//! 20-byte [`Uid`]: a 4-byte big-endian timestamp (seconds since the
//! 1_400_000_000 epoch) followed by 16 random bytes. Byte order equals
//! creation order to the second, which doubles as a tiebreak between
//! concurrent commits.
//!
//! ## Text Forms
//! - canonical: 27 characters of base62 (`0-9A-Za-z`), zero padded
//! - input only: `0x` followed by 40 hex digits

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{LakeError, Result};

/// Number of bytes in a uid
pub const UID_LEN: usize = 20;

/// Length of the base62 text form
pub const ENCODED_LEN: usize = 27;

/// Seconds between the unix epoch and the uid epoch
const EPOCH: u64 = 1_400_000_000;

const ALPHABET: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// A globally unique, time-ordered identifier
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Uid([u8; UID_LEN]);

impl Uid {
    /// The all-zero uid
    pub const NIL: Uid = Uid([0u8; UID_LEN]);

    /// Generate a new uid stamped with the current time
    pub fn new() -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(EPOCH);
        let ts = now.saturating_sub(EPOCH) as u32;

        let mut bytes = [0u8; UID_LEN];
        bytes[..4].copy_from_slice(&ts.to_be_bytes());
        rand::thread_rng().fill_bytes(&mut bytes[4..]);
        Uid(bytes)
    }

    pub fn from_bytes(bytes: [u8; UID_LEN]) -> Self {
        Uid(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; UID_LEN] {
        &self.0
    }

    pub fn is_nil(&self) -> bool {
        *self == Self::NIL
    }

    /// Seconds since the unix epoch at which this uid was generated
    pub fn timestamp(&self) -> u64 {
        let ts = u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]]);
        ts as u64 + EPOCH
    }

    /// Parse either the base62 form or the `0x`-prefixed hex form
    pub fn parse(s: &str) -> Result<Self> {
        if let Some(hex) = s.strip_prefix("0x") {
            return Self::parse_hex(hex);
        }
        Self::parse_base62(s)
    }

    fn parse_hex(hex: &str) -> Result<Self> {
        if hex.len() != UID_LEN * 2 || !hex.is_ascii() {
            return Err(LakeError::InvalidId(format!("0x{}", hex)));
        }
        let mut bytes = [0u8; UID_LEN];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[2 * i..2 * i + 2], 16)
                .map_err(|_| LakeError::InvalidId(format!("0x{}", hex)))?;
        }
        Ok(Uid(bytes))
    }

    fn parse_base62(s: &str) -> Result<Self> {
        if s.len() != ENCODED_LEN {
            return Err(LakeError::InvalidId(s.to_string()));
        }

        // Accumulate into five big-endian u32 limbs
        let mut limbs = [0u32; UID_LEN / 4];
        for c in s.bytes() {
            let digit = base62_digit(c).ok_or_else(|| LakeError::InvalidId(s.to_string()))?;
            let mut carry = digit as u64;
            for limb in limbs.iter_mut().rev() {
                let acc = (*limb as u64) * 62 + carry;
                *limb = acc as u32;
                carry = acc >> 32;
            }
            if carry != 0 {
                return Err(LakeError::InvalidId(s.to_string()));
            }
        }

        let mut bytes = [0u8; UID_LEN];
        for (i, limb) in limbs.iter().enumerate() {
            bytes[4 * i..4 * i + 4].copy_from_slice(&limb.to_be_bytes());
        }
        Ok(Uid(bytes))
    }

    /// The `0x` + 40 hex digit form
    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(2 + UID_LEN * 2);
        s.push_str("0x");
        for b in &self.0 {
            s.push_str(&format!("{:02x}", b));
        }
        s
    }

    fn encode_base62(&self) -> String {
        let mut parts: Vec<u32> = self
            .0
            .chunks(4)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        let mut out = [b'0'; ENCODED_LEN];
        let mut pos = ENCODED_LEN;
        while !parts.is_empty() {
            let mut quotient = Vec::with_capacity(parts.len());
            let mut rem: u64 = 0;
            for &part in &parts {
                let acc = (rem << 32) | part as u64;
                let q = acc / 62;
                rem = acc % 62;
                if !quotient.is_empty() || q != 0 {
                    quotient.push(q as u32);
                }
            }
            pos -= 1;
            out[pos] = ALPHABET[rem as usize];
            parts = quotient;
        }
        // ALPHABET is ASCII
        String::from_utf8_lossy(&out).into_owned()
    }
}

fn base62_digit(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'A'..=b'Z' => Some(c - b'A' + 10),
        b'a'..=b'z' => Some(c - b'a' + 36),
        _ => None,
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode_base62())
    }
}

impl fmt::Debug for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uid({})", self)
    }
}

impl FromStr for Uid {
    type Err = LakeError;

    fn from_str(s: &str) -> Result<Self> {
        Uid::parse(s)
    }
}
