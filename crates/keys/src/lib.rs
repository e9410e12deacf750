//! Order-preserving key serialization.
//!
//! A value is encoded such that `memcmp` of two encodings of the same SQL
//! type has the same sign as the semantic comparison. The index layers
//! (B+tree, hash) only ever see these byte strings.
//!
//! Layout: one tag byte (`0x00` NULL, `0x01` value) followed by the payload:
//! - signed integers: fixed-width big-endian with the sign bit flipped
//! - floats: IEEE-754 bits, negative values fully inverted, positive values
//!   with the sign bit set; NaN is canonicalized positive and sorts last
//! - strings: raw UTF-8 plus a `0x00` terminator (interior NUL rejected)
//! - blobs: `0x00` escaped as `0x00 0xFF`, terminated by `0x00 0x00`
//! - decimals: rescaled to a fixed point scale of 9 and encoded as a
//!   sign-flipped i128
//!
//! NULL therefore sorts below every non-NULL value of the same column.

use std::cmp::Ordering;

use chrono::{Datelike, NaiveDate, NaiveTime, Timelike};
use common::{DbError, DbResult};
use types::{DataType, Value};

const TAG_NULL: u8 = 0x00;
const TAG_VALUE: u8 = 0x01;

/// All decimal keys are rescaled to this many fractional digits so that
/// byte comparison agrees with numeric comparison across scales.
const DECIMAL_KEY_SCALE: u8 = 9;

/// Serialize a value into its memcmp-ordered byte form.
pub fn encode_key(value: &Value) -> DbResult<Vec<u8>> {
    let mut out = Vec::with_capacity(16);
    match value {
        Value::Null => {
            out.push(TAG_NULL);
            return Ok(out);
        }
        _ => out.push(TAG_VALUE),
    }

    match value {
        Value::Null => unreachable!(),
        Value::TinyInt(v) => out.push((*v as u8) ^ 0x80),
        Value::SmallInt(v) => out.extend_from_slice(&((*v as u16) ^ 0x8000).to_be_bytes()),
        Value::Int(v) => out.extend_from_slice(&((*v as u32) ^ 0x8000_0000).to_be_bytes()),
        Value::BigInt(v) => {
            out.extend_from_slice(&((*v as u64) ^ 0x8000_0000_0000_0000).to_be_bytes())
        }
        Value::Float(v) => out.extend_from_slice(&order_f32(*v).to_be_bytes()),
        Value::Double(v) => out.extend_from_slice(&order_f64(*v).to_be_bytes()),
        Value::Decimal { digits, scale } => {
            if *scale > DECIMAL_KEY_SCALE {
                return Err(DbError::Semantic(format!(
                    "decimal scale {scale} exceeds key limit {DECIMAL_KEY_SCALE}"
                )));
            }
            let factor = 10i128.pow((DECIMAL_KEY_SCALE - scale) as u32);
            let rescaled = digits.checked_mul(factor).ok_or_else(|| {
                DbError::Arithmetic("decimal overflows key encoding".into())
            })?;
            out.extend_from_slice(
                &((rescaled as u128) ^ (1u128 << 127)).to_be_bytes(),
            );
        }
        Value::Char(s) | Value::Varchar(s) | Value::Text(s) => {
            if s.as_bytes().contains(&0) {
                return Err(DbError::Semantic(
                    "string keys must not contain NUL bytes".into(),
                ));
            }
            out.extend_from_slice(s.as_bytes());
            out.push(0x00);
        }
        Value::Blob(bytes) => {
            for byte in bytes {
                out.push(*byte);
                if *byte == 0x00 {
                    out.push(0xFF);
                }
            }
            out.push(0x00);
            out.push(0x00);
        }
        Value::Bool(b) => out.push(*b as u8),
        Value::Date(d) => {
            out.extend_from_slice(&((d.num_days_from_ce() as u32) ^ 0x8000_0000).to_be_bytes())
        }
        Value::Time(t) => out.extend_from_slice(&t.num_seconds_from_midnight().to_be_bytes()),
        Value::DateTime(dt) => out.extend_from_slice(
            &((dt.and_utc().timestamp() as u64) ^ 0x8000_0000_0000_0000).to_be_bytes(),
        ),
    }
    Ok(out)
}

/// Concatenation of the per-column encodings; the terminated string form
/// keeps the concatenation prefix-free.
pub fn encode_composite(values: &[Value]) -> DbResult<Vec<u8>> {
    let mut out = Vec::new();
    for value in values {
        out.extend_from_slice(&encode_key(value)?);
    }
    Ok(out)
}

/// Recover the value from its encoded form, given the column type.
pub fn decode_key(bytes: &[u8], ty: DataType) -> DbResult<Value> {
    let (tag, payload) = bytes
        .split_first()
        .ok_or_else(|| DbError::Corruption("empty key encoding".into()))?;
    if *tag == TAG_NULL {
        return Ok(Value::Null);
    }
    if *tag != TAG_VALUE {
        return Err(DbError::Corruption(format!("bad key tag {tag:#04x}")));
    }

    let value = match ty {
        DataType::TinyInt => Value::TinyInt((take1(payload)? ^ 0x80) as i8),
        DataType::SmallInt => {
            Value::SmallInt((u16::from_be_bytes(take(payload)?) ^ 0x8000) as i16)
        }
        DataType::Int => Value::Int((u32::from_be_bytes(take(payload)?) ^ 0x8000_0000) as i32),
        DataType::BigInt => Value::BigInt(
            (u64::from_be_bytes(take(payload)?) ^ 0x8000_0000_0000_0000) as i64,
        ),
        DataType::Float => Value::Float(unorder_f32(u32::from_be_bytes(take(payload)?))),
        DataType::Double => Value::Double(unorder_f64(u64::from_be_bytes(take(payload)?))),
        DataType::Decimal => {
            let rescaled = (u128::from_be_bytes(take(payload)?) ^ (1u128 << 127)) as i128;
            let (digits, scale) = strip_trailing_zeros(rescaled, DECIMAL_KEY_SCALE);
            Value::Decimal { digits, scale }
        }
        DataType::Char | DataType::Varchar | DataType::Text => {
            let end = payload
                .iter()
                .position(|b| *b == 0x00)
                .ok_or_else(|| DbError::Corruption("unterminated string key".into()))?;
            let text = std::str::from_utf8(&payload[..end])
                .map_err(|e| DbError::Corruption(format!("invalid UTF-8 in key: {e}")))?;
            match ty {
                DataType::Char => Value::Char(text.to_string()),
                DataType::Varchar => Value::Varchar(text.to_string()),
                _ => Value::Text(text.to_string()),
            }
        }
        DataType::Blob => {
            let mut bytes = Vec::new();
            let mut iter = payload.iter().copied();
            loop {
                match iter.next() {
                    Some(0x00) => match iter.next() {
                        Some(0xFF) => bytes.push(0x00),
                        Some(0x00) | None => break,
                        Some(other) => {
                            return Err(DbError::Corruption(format!(
                                "bad blob key escape {other:#04x}"
                            )))
                        }
                    },
                    Some(byte) => bytes.push(byte),
                    None => break,
                }
            }
            Value::Blob(bytes)
        }
        DataType::Bool => Value::Bool(take1(payload)? != 0),
        DataType::Date => {
            let days = (u32::from_be_bytes(take(payload)?) ^ 0x8000_0000) as i32;
            let date = NaiveDate::from_num_days_from_ce_opt(days)
                .ok_or_else(|| DbError::Corruption("date key out of range".into()))?;
            Value::Date(date)
        }
        DataType::Time => {
            let secs = u32::from_be_bytes(take(payload)?);
            let time = NaiveTime::from_num_seconds_from_midnight_opt(secs, 0)
                .ok_or_else(|| DbError::Corruption("time key out of range".into()))?;
            Value::Time(time)
        }
        DataType::DateTime => {
            let secs = (u64::from_be_bytes(take(payload)?) ^ 0x8000_0000_0000_0000) as i64;
            let dt = chrono::DateTime::from_timestamp(secs, 0)
                .ok_or_else(|| DbError::Corruption("datetime key out of range".into()))?;
            Value::DateTime(dt.naive_utc())
        }
    };
    Ok(value)
}

/// Byte-lexicographic comparison over encoded keys.
pub fn compare(a: &[u8], b: &[u8]) -> Ordering {
    a.cmp(b)
}

fn order_f32(v: f32) -> u32 {
    // Canonicalize NaN so it sorts above every number.
    let bits = if v.is_nan() { f32::NAN.to_bits() } else { v.to_bits() };
    if bits & 0x8000_0000 != 0 {
        !bits
    } else {
        bits | 0x8000_0000
    }
}

fn unorder_f32(bits: u32) -> f32 {
    if bits & 0x8000_0000 != 0 {
        f32::from_bits(bits & !0x8000_0000)
    } else {
        f32::from_bits(!bits)
    }
}

fn order_f64(v: f64) -> u64 {
    let bits = if v.is_nan() { f64::NAN.to_bits() } else { v.to_bits() };
    if bits & 0x8000_0000_0000_0000 != 0 {
        !bits
    } else {
        bits | 0x8000_0000_0000_0000
    }
}

fn unorder_f64(bits: u64) -> f64 {
    if bits & 0x8000_0000_0000_0000 != 0 {
        f64::from_bits(bits & !0x8000_0000_0000_0000)
    } else {
        f64::from_bits(!bits)
    }
}

fn strip_trailing_zeros(mut digits: i128, mut scale: u8) -> (i128, u8) {
    while scale > 0 && digits % 10 == 0 {
        digits /= 10;
        scale -= 1;
    }
    (digits, scale)
}

fn take<const N: usize>(payload: &[u8]) -> DbResult<[u8; N]> {
    payload
        .get(..N)
        .and_then(|s| <[u8; N]>::try_from(s).ok())
        .ok_or_else(|| DbError::Corruption("truncated key encoding".into()))
}

fn take1(payload: &[u8]) -> DbResult<u8> {
    payload
        .first()
        .copied()
        .ok_or_else(|| DbError::Corruption("truncated key encoding".into()))
}
