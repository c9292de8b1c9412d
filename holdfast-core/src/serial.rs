//! Value serialization for the persistent collections.
//!
//! A [`Serializer`] converts one element type to and from its byte
//! representation. The contract is strict so storage layers can plan
//! allocations before writing:
//!
//! - [`serialized_size`](Serializer::serialized_size) reports the exact
//!   encoded length without writing anything,
//! - [`serialize`](Serializer::serialize) appends exactly that many bytes,
//! - [`deserialize`](Serializer::deserialize) reconstructs a value equal to
//!   the original from those bytes.
//!
//! Fixed-width types encode to a constant size and report it through
//! [`fixed_size`](Serializer::fixed_size); variable-length types prefix
//! their payload with a 4-byte big-endian length. All multi-byte fields are
//! big-endian. Serializers never see an absent value — optionality is the
//! business of the layer above.

use crate::error::{Error, Result};

/// Converts values of one element type to and from bytes.
pub trait Serializer {
    /// The element type this serializer handles.
    type Value;

    /// `Some(n)` when every value encodes to exactly `n` bytes, `None` for
    /// variable-length encodings.
    fn fixed_size(&self) -> Option<u32>;

    /// Exact number of bytes [`serialize`](Serializer::serialize) will
    /// produce for `value`.
    fn serialized_size(&self, value: &Self::Value) -> u32;

    /// Appends the encoded form of `value` to `out`.
    fn serialize(&self, value: &Self::Value, out: &mut Vec<u8>);

    /// Decodes a value from `bytes`.
    ///
    /// `bytes` must start with the output of a matching
    /// [`serialize`](Serializer::serialize) call; trailing slack is
    /// ignored.
    ///
    /// # Errors
    ///
    /// [`Error::Corrupt`] on truncated or malformed input. Callers must not
    /// attempt partial recovery from a failed decode.
    fn deserialize(&self, bytes: &[u8]) -> Result<Self::Value>;
}

fn take_fixed<const N: usize>(bytes: &[u8], what: &str) -> Result<[u8; N]> {
    match bytes.get(..N) {
        Some(head) => {
            let mut out = [0u8; N];
            out.copy_from_slice(head);
            Ok(out)
        }
        None => Err(Error::Corrupt(format!("truncated {what}: {} of {N} bytes", bytes.len()))),
    }
}

/// Fixed 4-byte serializer for `u32`.
#[derive(Debug, Clone, Copy, Default)]
pub struct U32Serializer;

impl Serializer for U32Serializer {
    type Value = u32;

    fn fixed_size(&self) -> Option<u32> {
        Some(4)
    }

    fn serialized_size(&self, _value: &u32) -> u32 {
        4
    }

    fn serialize(&self, value: &u32, out: &mut Vec<u8>) {
        out.extend_from_slice(&value.to_be_bytes());
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<u32> {
        Ok(u32::from_be_bytes(take_fixed(bytes, "u32")?))
    }
}

/// Fixed 8-byte serializer for `u64`.
#[derive(Debug, Clone, Copy, Default)]
pub struct U64Serializer;

impl Serializer for U64Serializer {
    type Value = u64;

    fn fixed_size(&self) -> Option<u32> {
        Some(8)
    }

    fn serialized_size(&self, _value: &u64) -> u32 {
        8
    }

    fn serialize(&self, value: &u64, out: &mut Vec<u8>) {
        out.extend_from_slice(&value.to_be_bytes());
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<u64> {
        Ok(u64::from_be_bytes(take_fixed(bytes, "u64")?))
    }
}

/// Fixed 4-byte serializer for `i32`.
#[derive(Debug, Clone, Copy, Default)]
pub struct I32Serializer;

impl Serializer for I32Serializer {
    type Value = i32;

    fn fixed_size(&self) -> Option<u32> {
        Some(4)
    }

    fn serialized_size(&self, _value: &i32) -> u32 {
        4
    }

    fn serialize(&self, value: &i32, out: &mut Vec<u8>) {
        out.extend_from_slice(&value.to_be_bytes());
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<i32> {
        Ok(i32::from_be_bytes(take_fixed(bytes, "i32")?))
    }
}

/// Fixed 8-byte serializer for `i64`.
#[derive(Debug, Clone, Copy, Default)]
pub struct I64Serializer;

impl Serializer for I64Serializer {
    type Value = i64;

    fn fixed_size(&self) -> Option<u32> {
        Some(8)
    }

    fn serialized_size(&self, _value: &i64) -> u32 {
        8
    }

    fn serialize(&self, value: &i64, out: &mut Vec<u8>) {
        out.extend_from_slice(&value.to_be_bytes());
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<i64> {
        Ok(i64::from_be_bytes(take_fixed(bytes, "i64")?))
    }
}

/// Fixed 8-byte serializer for `f64`, stored as the IEEE-754 bit pattern.
///
/// Round-trips are bit-exact, NaN payloads included.
#[derive(Debug, Clone, Copy, Default)]
pub struct F64Serializer;

impl Serializer for F64Serializer {
    type Value = f64;

    fn fixed_size(&self) -> Option<u32> {
        Some(8)
    }

    fn serialized_size(&self, _value: &f64) -> u32 {
        8
    }

    fn serialize(&self, value: &f64, out: &mut Vec<u8>) {
        out.extend_from_slice(&value.to_bits().to_be_bytes());
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<f64> {
        Ok(f64::from_bits(u64::from_be_bytes(take_fixed(bytes, "f64")?)))
    }
}

fn read_prefixed<'a>(bytes: &'a [u8], what: &str) -> Result<&'a [u8]> {
    let len = u32::from_be_bytes(take_fixed(bytes, what)?) as usize;
    bytes
        .get(4..4 + len)
        .ok_or_else(|| Error::Corrupt(format!("truncated {what}: {len} bytes promised, {} present", bytes.len() - 4)))
}

/// Variable-length serializer for raw byte strings: a 4-byte big-endian
/// length prefix followed by the payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesSerializer;

impl Serializer for BytesSerializer {
    type Value = Vec<u8>;

    fn fixed_size(&self) -> Option<u32> {
        None
    }

    fn serialized_size(&self, value: &Vec<u8>) -> u32 {
        4 + value.len() as u32
    }

    fn serialize(&self, value: &Vec<u8>, out: &mut Vec<u8>) {
        out.extend_from_slice(&(value.len() as u32).to_be_bytes());
        out.extend_from_slice(value);
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        Ok(read_prefixed(bytes, "byte string")?.to_vec())
    }
}

/// Variable-length serializer for `String`: a 4-byte big-endian length
/// prefix followed by the UTF-8 payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringSerializer;

impl Serializer for StringSerializer {
    type Value = String;

    fn fixed_size(&self) -> Option<u32> {
        None
    }

    fn serialized_size(&self, value: &String) -> u32 {
        4 + value.len() as u32
    }

    fn serialize(&self, value: &String, out: &mut Vec<u8>) {
        out.extend_from_slice(&(value.len() as u32).to_be_bytes());
        out.extend_from_slice(value.as_bytes());
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<String> {
        let payload = read_prefixed(bytes, "string")?;
        std::str::from_utf8(payload)
            .map(str::to_owned)
            .map_err(|e| Error::Corrupt(format!("string payload is not valid UTF-8: {e}")))
    }
}
