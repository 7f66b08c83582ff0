//! Ordered index key values and collation.
//!
//! Index nodes embed a copy of the key they index. The document model
//! lives outside the engine, so keys carry only the scalar kinds an index
//! can order on. Encoding is a type byte followed by the payload:
//!
//! ```text
//! +------+-------------------------------+
//! | type | payload                       |
//! +------+-------------------------------+
//!   0x00   MinValue   (none)
//!   0x01   Null       (none)
//!   0x02   Int        i64 LE
//!   0x03   Double     f64 LE
//!   0x04   String     u16 LE length + UTF-8 bytes
//!   0x05   Binary     u16 LE length + bytes
//!   0x06   Bool       u8
//!   0x07   MaxValue   (none)
//! ```

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::constants::MAX_INDEX_KEY_LENGTH;
use crate::error::{TesseraError, TesseraResult};

/// A key stored in an index node.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexKey {
    /// Lower bound of every index; only the head sentinel carries it.
    MinValue,
    /// Explicit null.
    Null,
    /// 64-bit integer.
    Int(i64),
    /// 64-bit float.
    Double(f64),
    /// UTF-8 string.
    String(String),
    /// Raw bytes.
    Binary(Vec<u8>),
    /// Boolean.
    Bool(bool),
    /// Upper bound of every index; only the tail sentinel carries it.
    MaxValue,
}

const TYPE_MIN: u8 = 0x00;
const TYPE_NULL: u8 = 0x01;
const TYPE_INT: u8 = 0x02;
const TYPE_DOUBLE: u8 = 0x03;
const TYPE_STRING: u8 = 0x04;
const TYPE_BINARY: u8 = 0x05;
const TYPE_BOOL: u8 = 0x06;
const TYPE_MAX: u8 = 0x07;

impl IndexKey {
    /// Number of bytes this key occupies inside an index node.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        match self {
            Self::MinValue | Self::Null | Self::MaxValue => 1,
            Self::Int(_) | Self::Double(_) => 9,
            Self::String(s) => 3 + s.len(),
            Self::Binary(b) => 3 + b.len(),
            Self::Bool(_) => 2,
        }
    }

    /// Rejects keys that cannot be stored in an index node.
    pub fn validate(&self) -> TesseraResult<()> {
        let size = self.encoded_len();
        if size > MAX_INDEX_KEY_LENGTH {
            return Err(TesseraError::IndexKeyTooLong {
                size,
                max: MAX_INDEX_KEY_LENGTH,
            });
        }
        Ok(())
    }

    /// Writes the key into `buf`, which must hold `encoded_len()` bytes.
    pub fn encode_into(&self, buf: &mut [u8]) {
        match self {
            Self::MinValue => buf[0] = TYPE_MIN,
            Self::Null => buf[0] = TYPE_NULL,
            Self::MaxValue => buf[0] = TYPE_MAX,
            Self::Int(v) => {
                buf[0] = TYPE_INT;
                buf[1..9].copy_from_slice(&v.to_le_bytes());
            }
            Self::Double(v) => {
                buf[0] = TYPE_DOUBLE;
                buf[1..9].copy_from_slice(&v.to_le_bytes());
            }
            Self::String(s) => {
                buf[0] = TYPE_STRING;
                Self::encode_bytes(s.as_bytes(), &mut buf[1..]);
            }
            Self::Binary(b) => {
                buf[0] = TYPE_BINARY;
                Self::encode_bytes(b, &mut buf[1..]);
            }
            Self::Bool(v) => {
                buf[0] = TYPE_BOOL;
                buf[1] = u8::from(*v);
            }
        }
    }

    fn encode_bytes(bytes: &[u8], buf: &mut [u8]) {
        let len = bytes.len() as u16;
        buf[0..2].copy_from_slice(&len.to_le_bytes());
        buf[2..2 + bytes.len()].copy_from_slice(bytes);
    }

    /// Decodes a key from the start of `buf`.
    pub fn decode(buf: &[u8]) -> TesseraResult<Self> {
        let corrupt = || TesseraError::corruption("truncated index key");
        let tag = *buf.first().ok_or_else(corrupt)?;
        let key = match tag {
            TYPE_MIN => Self::MinValue,
            TYPE_NULL => Self::Null,
            TYPE_MAX => Self::MaxValue,
            TYPE_INT => Self::Int(i64::from_le_bytes(
                buf.get(1..9).ok_or_else(corrupt)?.try_into().unwrap(),
            )),
            TYPE_DOUBLE => Self::Double(f64::from_le_bytes(
                buf.get(1..9).ok_or_else(corrupt)?.try_into().unwrap(),
            )),
            TYPE_STRING => {
                let bytes = Self::decode_bytes(&buf[1..]).ok_or_else(corrupt)?;
                let s = std::str::from_utf8(bytes)
                    .map_err(|_| TesseraError::corruption("index key is not valid UTF-8"))?;
                Self::String(s.to_owned())
            }
            TYPE_BINARY => Self::Binary(Self::decode_bytes(&buf[1..]).ok_or_else(corrupt)?.to_vec()),
            TYPE_BOOL => Self::Bool(*buf.get(1).ok_or_else(corrupt)? != 0),
            other => {
                return Err(TesseraError::corruption(format!(
                    "unknown index key type {other:#04x}"
                )))
            }
        };
        Ok(key)
    }

    fn decode_bytes(buf: &[u8]) -> Option<&[u8]> {
        let len = u16::from_le_bytes(buf.get(0..2)?.try_into().ok()?) as usize;
        buf.get(2..2 + len)
    }

    /// Rank of the key's type in the cross-type order.
    fn type_rank(&self) -> u8 {
        match self {
            Self::MinValue => 0,
            Self::Null => 1,
            Self::Int(_) | Self::Double(_) => 2,
            Self::String(_) => 3,
            Self::Binary(_) => 4,
            Self::Bool(_) => 5,
            Self::MaxValue => 6,
        }
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MinValue => write!(f, "$minValue"),
            Self::Null => write!(f, "null"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::String(s) => write!(f, "\"{s}\""),
            Self::Binary(b) => write!(f, "<{} bytes>", b.len()),
            Self::Bool(v) => write!(f, "{v}"),
            Self::MaxValue => write!(f, "$maxValue"),
        }
    }
}

impl From<i64> for IndexKey {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for IndexKey {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

// =============================================================================
// Collation
// =============================================================================

/// Comparison rules used to order index keys.
///
/// Only string comparison is affected; every other kind compares the same
/// way under every collation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Collation {
    /// Compare strings without regard to letter case.
    pub ignore_case: bool,
}

impl Collation {
    /// Ordinal byte-wise string comparison.
    pub const ORDINAL: Self = Self { ignore_case: false };

    /// Case-insensitive string comparison.
    pub const IGNORE_CASE: Self = Self { ignore_case: true };

    /// Compares two keys.
    #[must_use]
    pub fn compare(&self, a: &IndexKey, b: &IndexKey) -> Ordering {
        use IndexKey::{Binary, Bool, Double, Int, String};

        match (a, b) {
            (Int(x), Int(y)) => x.cmp(y),
            (Double(x), Double(y)) => compare_doubles(*x, *y),
            (Int(x), Double(y)) => compare_int_double(*x, *y),
            (Double(x), Int(y)) => compare_int_double(*y, *x).reverse(),
            (String(x), String(y)) => self.compare_str(x, y),
            (Binary(x), Binary(y)) => x.cmp(y),
            (Bool(x), Bool(y)) => x.cmp(y),
            _ => a.type_rank().cmp(&b.type_rank()),
        }
    }

    fn compare_str(&self, a: &str, b: &str) -> Ordering {
        if self.ignore_case {
            a.chars()
                .flat_map(char::to_lowercase)
                .cmp(b.chars().flat_map(char::to_lowercase))
        } else {
            a.cmp(b)
        }
    }
}

/// Numeric order with `-0.0 == 0.0`. NaNs sort by sign past the infinities.
fn compare_doubles(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or_else(|| a.total_cmp(&b))
}

/// Exact comparison of an integer against a double, without rounding the
/// integer to 53 bits.
fn compare_int_double(i: i64, d: f64) -> Ordering {
    if d.is_nan() {
        return if d.is_sign_negative() {
            Ordering::Greater
        } else {
            Ordering::Less
        };
    }
    // 2^63: every finite double below it in magnitude truncates into i128
    // without loss, and so does every i64.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if d >= LIMIT {
        return Ordering::Less;
    }
    if d < -LIMIT {
        return Ordering::Greater;
    }
    let whole = d.trunc();
    match i128::from(i).cmp(&(whole as i128)) {
        Ordering::Equal => 0.0_f64.partial_cmp(&(d - whole)).unwrap_or(Ordering::Equal),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(key: &IndexKey) -> IndexKey {
        let mut buf = vec![0u8; key.encoded_len()];
        key.encode_into(&mut buf);
        IndexKey::decode(&buf).unwrap()
    }

    #[test]
    fn test_encoding_of_each_kind() {
        for key in [
            IndexKey::MinValue,
            IndexKey::Null,
            IndexKey::Int(-42),
            IndexKey::Double(2.5),
            IndexKey::from("hello"),
            IndexKey::Binary(vec![1, 2, 3]),
            IndexKey::Bool(true),
            IndexKey::MaxValue,
        ] {
            assert_eq!(round_trip(&key), key);
        }
    }

    #[test]
    fn test_cross_type_order() {
        let c = Collation::ORDINAL;
        let ordered = [
            IndexKey::MinValue,
            IndexKey::Null,
            IndexKey::Int(1),
            IndexKey::from("a"),
            IndexKey::Binary(vec![0]),
            IndexKey::Bool(false),
            IndexKey::MaxValue,
        ];
        for pair in ordered.windows(2) {
            assert_eq!(c.compare(&pair[0], &pair[1]), Ordering::Less);
        }
    }

    #[test]
    fn test_numbers_compare_numerically() {
        let c = Collation::default();
        assert_eq!(c.compare(&IndexKey::Int(2), &IndexKey::Double(2.5)), Ordering::Less);
        assert_eq!(c.compare(&IndexKey::Double(3.0), &IndexKey::Int(3)), Ordering::Equal);
    }

    #[test]
    fn test_large_integers_against_doubles() {
        let c = Collation::default();
        let two_53 = 1i64 << 53;
        let a = IndexKey::Int(two_53);
        let b = IndexKey::Double(two_53 as f64);
        let d = IndexKey::Int(two_53 + 1);

        assert_eq!(c.compare(&a, &b), Ordering::Equal);
        assert_eq!(c.compare(&b, &d), Ordering::Less);
        assert_eq!(c.compare(&d, &b), Ordering::Greater);
        assert_eq!(c.compare(&a, &d), Ordering::Less);

        let max = IndexKey::Int(i64::MAX);
        assert_eq!(c.compare(&max, &IndexKey::Double(i64::MAX as f64)), Ordering::Less);
        assert_eq!(
            c.compare(&IndexKey::Int(i64::MIN), &IndexKey::Double(i64::MIN as f64)),
            Ordering::Equal
        );
        assert_eq!(c.compare(&max, &IndexKey::Double(f64::INFINITY)), Ordering::Less);
        assert_eq!(c.compare(&max, &IndexKey::Double(f64::NAN)), Ordering::Less);
        assert_eq!(
            c.compare(&IndexKey::Int(-1), &IndexKey::Double(-1.5)),
            Ordering::Greater
        );
        assert_eq!(c.compare(&IndexKey::Int(0), &IndexKey::Double(-0.0)), Ordering::Equal);
        assert_eq!(
            c.compare(&IndexKey::Double(-0.0), &IndexKey::Double(0.0)),
            Ordering::Equal
        );
    }

    #[test]
    fn test_mixed_numbers_sort_consistently() {
        let c = Collation::default();
        let two_53 = 1i64 << 53;
        let mut keys = vec![
            IndexKey::Int(two_53 + 1),
            IndexKey::Double(two_53 as f64),
            IndexKey::Int(two_53 - 1),
            IndexKey::Double(0.5),
            IndexKey::Int(two_53),
            IndexKey::Int(0),
            IndexKey::Double(f64::NEG_INFINITY),
        ];
        keys.sort_by(|x, y| c.compare(x, y));
        for pair in keys.windows(2) {
            assert_ne!(c.compare(&pair[0], &pair[1]), Ordering::Greater);
        }
        for (i, x) in keys.iter().enumerate() {
            for y in &keys[i + 1..] {
                assert_ne!(c.compare(x, y), Ordering::Greater, "{x:?} vs {y:?}");
            }
        }
    }

    #[test]
    fn test_ignore_case() {
        let a = IndexKey::from("Apple");
        let b = IndexKey::from("apple");
        assert_ne!(Collation::ORDINAL.compare(&a, &b), Ordering::Equal);
        assert_eq!(Collation::IGNORE_CASE.compare(&a, &b), Ordering::Equal);
    }

    #[test]
    fn test_key_too_long() {
        let key = IndexKey::Binary(vec![0; MAX_INDEX_KEY_LENGTH]);
        assert!(matches!(key.validate(), Err(TesseraError::IndexKeyTooLong { .. })));
        assert!(IndexKey::Binary(vec![0; 100]).validate().is_ok());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(IndexKey::decode(&[]).is_err());
        assert!(IndexKey::decode(&[0x09]).is_err());
        assert!(IndexKey::decode(&[TYPE_STRING, 10, 0, b'a']).is_err());
    }
}
