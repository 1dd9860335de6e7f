//! Encode/decode key and value flash words.
//!
//! Pure functions only: nothing here touches the flash driver or the
//! critical section. Given a `Word` type, these are a total/partial pair of
//! inverse transforms between the logical [`Record`](crate::record::Record)
//! and the two on-flash words that represent it.

use crate::record::{DataType, Key, Value};
use crate::word::Word;

/// Encode `key`/`ty` into the key word described in the data model: the
/// header byte (`(type << 4) | size`) at the most significant byte, the key
/// name packed in descending byte positions below it, zero-padded toward
/// the least significant end.
///
/// Returns `None` for anything [`is_valid_key`] would reject: empty key,
/// key longer than `W::BYTES - 1`, or a type that needs a wider word than
/// `W` provides.
pub fn encode_key<W: Word>(key: &str, ty: DataType) -> Option<W> {
    let key_bytes = key.as_bytes();
    if key_bytes.is_empty() || key_bytes.len() > W::BYTES - 1 {
        return None;
    }
    if ty.requires_wide_word() && W::BYTES < 8 {
        return None;
    }

    // For `Str` the size nibble records the *key name's* length (matching
    // the reference encoder), which is always <= 15 and so always fits a
    // nibble regardless of word width; for every other type it is the
    // fixed value width, at most 8.
    let size_nibble = if matches!(ty, DataType::Str) {
        key_bytes.len() as u8
    } else {
        ty.value_size(W::BYTES) as u8
    };
    let header = (ty.code() << 4) | (size_nibble & 0x0F);

    let mut buf = [0u8; 16];
    buf[W::BYTES - 1] = header;
    for (i, &b) in key_bytes.iter().enumerate() {
        buf[W::BYTES - 2 - i] = b;
    }
    Some(W::from_le_bytes(&buf))
}

/// Decode a key word into its type and key name. Returns `None` if the
/// header byte's type nibble is out of range (0..=10). Callers should
/// treat that as "not a valid key" (i.e. not [`crate::scan::SlotState::Used`]).
pub fn decode_key<W: Word>(word: W) -> Option<(DataType, Key)> {
    let mut buf = [0u8; 16];
    word.write_le_bytes(&mut buf);
    let header = buf[W::BYTES - 1];
    let ty = DataType::from_code(header >> 4)?;

    let mut key = Key::new();
    for i in (0..W::BYTES - 1).rev() {
        let b = buf[i];
        if b == 0 {
            break;
        }
        // Keys are validated to be ASCII on the way in; a non-ASCII byte
        // here means flash content this crate did not write itself.
        if key.push(b as char).is_err() {
            break;
        }
    }
    Some((ty, key))
}

/// Compare only the non-header bytes of two key words: the rule by which
/// two keys are "the same" regardless of which `write` produced the header
/// (type/size may legitimately differ between an old and new write of the
/// same key; whichever happened later wins).
pub fn key_bytes_eq<W: Word>(a: W, b: W) -> bool {
    let mut ba = [0u8; 16];
    let mut bb = [0u8; 16];
    a.write_le_bytes(&mut ba);
    b.write_le_bytes(&mut bb);
    ba[..W::BYTES - 1] == bb[..W::BYTES - 1]
}

/// Encode a value into its flash word: a raw bit copy for numeric types, a
/// NUL-padded byte copy for strings.
pub fn value_to_word<W: Word>(value: &Value) -> W {
    match value {
        Value::U8(v) => W::from_u64(*v as u64),
        Value::I8(v) => W::from_u64(*v as u8 as u64),
        Value::U16(v) => W::from_u64(*v as u64),
        Value::I16(v) => W::from_u64(*v as u16 as u64),
        Value::U32(v) => W::from_u64(*v as u64),
        Value::I32(v) => W::from_u64(*v as u32 as u64),
        Value::F32(v) => W::from_u64(v.to_bits() as u64),
        Value::U64(v) => W::from_u64(*v),
        Value::I64(v) => W::from_u64(*v as u64),
        Value::F64(v) => W::from_u64(v.to_bits()),
        Value::Str(s) => {
            let mut buf = [0u8; 16];
            let bytes = s.as_bytes();
            buf[..bytes.len()].copy_from_slice(bytes);
            W::from_le_bytes(&buf)
        }
    }
}

/// Decode a value word back into a typed [`Value`], given the type decoded
/// from the paired key word.
pub fn word_to_value<W: Word>(ty: DataType, word: W) -> Value {
    let bits = word.to_u64();
    match ty {
        DataType::U8 => Value::U8(bits as u8),
        DataType::I8 => Value::I8(bits as u8 as i8),
        DataType::U16 => Value::U16(bits as u16),
        DataType::I16 => Value::I16(bits as u16 as i16),
        DataType::U32 => Value::U32(bits as u32),
        DataType::I32 => Value::I32(bits as u32 as i32),
        DataType::F32 => Value::F32(f32::from_bits(bits as u32)),
        DataType::U64 => Value::U64(bits),
        DataType::I64 => Value::I64(bits as i64),
        DataType::F64 => Value::F64(f64::from_bits(bits)),
        DataType::Str => {
            let mut buf = [0u8; 16];
            word.write_le_bytes(&mut buf);
            let len = buf[..W::BYTES].iter().position(|&b| b == 0).unwrap_or(W::BYTES);
            let mut s = heapless::String::<16>::new();
            for &b in &buf[..len] {
                if s.push(b as char).is_err() {
                    break;
                }
            }
            Value::Str(s)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_roundtrip_u32() {
        let w: u32 = encode_key("c1", DataType::U32).unwrap();
        let (ty, key) = decode_key(w).unwrap();
        assert_eq!(ty, DataType::U32);
        assert_eq!(key.as_str(), "c1");
    }

    #[test]
    fn key_too_long_rejected() {
        // w = 4 allows at most 3 key bytes.
        assert!(encode_key::<u32>("abcd", DataType::U8).is_none());
        assert!(encode_key::<u32>("abc", DataType::U8).is_some());
    }

    #[test]
    fn empty_key_rejected() {
        assert!(encode_key::<u32>("", DataType::U8).is_none());
    }

    #[test]
    fn wide_types_need_wide_word() {
        assert!(encode_key::<u32>("a", DataType::U64).is_none());
        assert!(encode_key::<u64>("a", DataType::U64).is_some());
    }

    #[test]
    fn key_equality_ignores_header() {
        let a: u32 = encode_key("ca1", DataType::U32).unwrap();
        let b: u32 = encode_key("ca1", DataType::Str).unwrap();
        assert!(key_bytes_eq(a, b));
    }

    #[test]
    fn value_roundtrip_numeric() {
        let v = Value::I32(-123);
        let w: u32 = value_to_word(&v);
        assert_eq!(word_to_value::<u32>(DataType::I32, w), Value::I32(-123));
    }

    #[test]
    fn value_roundtrip_string() {
        let mut s = heapless::String::<16>::new();
        s.push_str("hi").unwrap();
        let v = Value::Str(s);
        let w: u32 = value_to_word(&v);
        match word_to_value::<u32>(DataType::Str, w) {
            Value::Str(decoded) => assert_eq!(decoded.as_str(), "hi"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn float_bit_pattern_preserved() {
        let v = Value::F32(1.5);
        let w: u32 = value_to_word(&v);
        assert_eq!(word_to_value::<u32>(DataType::F32, w), Value::F32(1.5));
    }
}
