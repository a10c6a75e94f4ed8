//! Typed field codec for frame payloads.
//!
//! Each field is `id:u16 | type:u8 | len:u32 | value`, big-endian. Field order
//! is preserved exactly; unknown ids and unknown type bytes decode fine and
//! re-encode byte-identically.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

pub const FIELD_HEADER_LEN: usize = 7;

/// TLV type byte. Unknown values are kept as-is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FieldType(pub u8);

impl FieldType {
    pub const U8: FieldType = FieldType(1);
    pub const U16: FieldType = FieldType(2);
    pub const U32: FieldType = FieldType(3);
    pub const U64: FieldType = FieldType(4);
    pub const BOOL: FieldType = FieldType(5);
    pub const STRING: FieldType = FieldType(6);
    pub const BYTES: FieldType = FieldType(7);

    pub fn name(self) -> Option<&'static str> {
        Some(match self {
            FieldType::U8 => "u8",
            FieldType::U16 => "u16",
            FieldType::U32 => "u32",
            FieldType::U64 => "u64",
            FieldType::BOOL => "bool",
            FieldType::STRING => "string",
            FieldType::BYTES => "bytes",
            _ => return None,
        })
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "type({})", self.0),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Field {
    pub id: u16,
    pub field_type: FieldType,
    pub value: Bytes,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum FieldError {
    #[error("tlv: short field header at offset {offset}")]
    ShortFieldHeader { offset: usize },
    #[error("tlv: short value for field {id}: declared {declared} bytes, {remaining} remaining")]
    ShortFieldValue {
        id: u16,
        declared: u32,
        remaining: usize,
    },
    #[error("tlv: field {id} value too large: {len} bytes")]
    ValueTooLarge { id: u16, len: usize },
    #[error("tlv: missing field {id}")]
    MissingField { id: u16 },
    #[error("tlv: field {id} type mismatch: got {got} want {want}")]
    TypeMismatch {
        id: u16,
        got: FieldType,
        want: FieldType,
    },
    #[error("tlv: field {id} has invalid {want} length {len}")]
    InvalidLength {
        id: u16,
        want: FieldType,
        len: usize,
    },
    #[error("tlv: field {id} is not valid utf-8")]
    InvalidUtf8 { id: u16 },
    #[error("tlv: field {id} has invalid bool byte {byte}")]
    InvalidBool { id: u16, byte: u8 },
}

impl Field {
    #[must_use]
    pub fn new(id: u16, field_type: FieldType, value: impl Into<Bytes>) -> Self {
        Self {
            id,
            field_type,
            value: value.into(),
        }
    }

    #[must_use]
    pub fn u8(id: u16, value: u8) -> Self {
        Self::new(id, FieldType::U8, vec![value])
    }

    #[must_use]
    pub fn u16(id: u16, value: u16) -> Self {
        Self::new(id, FieldType::U16, value.to_be_bytes().to_vec())
    }

    #[must_use]
    pub fn u32(id: u16, value: u32) -> Self {
        Self::new(id, FieldType::U32, value.to_be_bytes().to_vec())
    }

    #[must_use]
    pub fn u64(id: u16, value: u64) -> Self {
        Self::new(id, FieldType::U64, value.to_be_bytes().to_vec())
    }

    #[must_use]
    pub fn bool(id: u16, value: bool) -> Self {
        Self::new(id, FieldType::BOOL, vec![u8::from(value)])
    }

    #[must_use]
    pub fn string(id: u16, value: &str) -> Self {
        Self::new(id, FieldType::STRING, Bytes::copy_from_slice(value.as_bytes()))
    }

    #[must_use]
    pub fn bytes(id: u16, value: impl Into<Bytes>) -> Self {
        Self::new(id, FieldType::BYTES, value)
    }

    fn expect_type(&self, want: FieldType) -> Result<(), FieldError> {
        if self.field_type != want {
            return Err(FieldError::TypeMismatch {
                id: self.id,
                got: self.field_type,
                want,
            });
        }
        Ok(())
    }

    fn fixed<const N: usize>(&self, want: FieldType) -> Result<[u8; N], FieldError> {
        self.expect_type(want)?;
        <[u8; N]>::try_from(&self.value[..]).map_err(|_| FieldError::InvalidLength {
            id: self.id,
            want,
            len: self.value.len(),
        })
    }

    pub fn as_u8(&self) -> Result<u8, FieldError> {
        Ok(self.fixed::<1>(FieldType::U8)?[0])
    }

    pub fn as_u16(&self) -> Result<u16, FieldError> {
        Ok(u16::from_be_bytes(self.fixed(FieldType::U16)?))
    }

    pub fn as_u32(&self) -> Result<u32, FieldError> {
        Ok(u32::from_be_bytes(self.fixed(FieldType::U32)?))
    }

    pub fn as_u64(&self) -> Result<u64, FieldError> {
        Ok(u64::from_be_bytes(self.fixed(FieldType::U64)?))
    }

    pub fn as_bool(&self) -> Result<bool, FieldError> {
        match self.fixed::<1>(FieldType::BOOL)?[0] {
            0 => Ok(false),
            1 => Ok(true),
            byte => Err(FieldError::InvalidBool { id: self.id, byte }),
        }
    }

    pub fn as_str(&self) -> Result<&str, FieldError> {
        self.expect_type(FieldType::STRING)?;
        std::str::from_utf8(&self.value).map_err(|_| FieldError::InvalidUtf8 { id: self.id })
    }

    pub fn as_bytes(&self) -> Result<&Bytes, FieldError> {
        self.expect_type(FieldType::BYTES)?;
        Ok(&self.value)
    }

    /// Encoded size including the 7-byte field header.
    pub fn encoded_len(&self) -> usize {
        FIELD_HEADER_LEN + self.value.len()
    }
}

pub fn encode_field(field: &Field, out: &mut BytesMut) -> Result<(), FieldError> {
    let len = u32::try_from(field.value.len()).map_err(|_| FieldError::ValueTooLarge {
        id: field.id,
        len: field.value.len(),
    })?;
    out.reserve(field.encoded_len());
    out.put_u16(field.id);
    out.put_u8(field.field_type.0);
    out.put_u32(len);
    out.put_slice(&field.value);
    Ok(())
}

/// Encodes fields in the given order.
pub fn encode_fields(fields: &[Field]) -> Result<Bytes, FieldError> {
    let mut out = BytesMut::with_capacity(fields.iter().map(Field::encoded_len).sum());
    for field in fields {
        encode_field(field, &mut out)?;
    }
    Ok(out.freeze())
}

/// Decodes a payload into its ordered field list. Values share the payload
/// buffer.
pub fn decode_fields(payload: &Bytes) -> Result<Vec<Field>, FieldError> {
    let mut fields = Vec::new();
    let mut offset = 0usize;
    while offset < payload.len() {
        let remaining = payload.len() - offset;
        if remaining < FIELD_HEADER_LEN {
            return Err(FieldError::ShortFieldHeader { offset });
        }
        let head = &payload[offset..offset + FIELD_HEADER_LEN];
        let id = u16::from_be_bytes([head[0], head[1]]);
        let field_type = FieldType(head[2]);
        let declared = u32::from_be_bytes([head[3], head[4], head[5], head[6]]);
        offset += FIELD_HEADER_LEN;

        let remaining = payload.len() - offset;
        let len = usize::try_from(declared).unwrap_or(usize::MAX);
        if len > remaining {
            return Err(FieldError::ShortFieldValue {
                id,
                declared,
                remaining,
            });
        }
        fields.push(Field {
            id,
            field_type,
            value: payload.slice(offset..offset + len),
        });
        offset += len;
    }
    Ok(fields)
}

/// First field with `id`, in payload order.
pub fn get_field(fields: &[Field], id: u16) -> Option<&Field> {
    fields.iter().find(|field| field.id == id)
}

pub fn require_field(fields: &[Field], id: u16) -> Result<&Field, FieldError> {
    get_field(fields, id).ok_or(FieldError::MissingField { id })
}

pub fn field_string(fields: &[Field], id: u16) -> Result<String, FieldError> {
    require_field(fields, id)?.as_str().map(str::to_owned)
}

pub fn field_bytes(fields: &[Field], id: u16) -> Result<Bytes, FieldError> {
    require_field(fields, id)?.as_bytes().cloned()
}

pub fn field_u32(fields: &[Field], id: u16) -> Result<u32, FieldError> {
    require_field(fields, id)?.as_u32()
}

pub fn field_u64(fields: &[Field], id: u16) -> Result<u64, FieldError> {
    require_field(fields, id)?.as_u64()
}

pub fn optional_string(fields: &[Field], id: u16) -> Result<Option<String>, FieldError> {
    get_field(fields, id)
        .map(|field| field.as_str().map(str::to_owned))
        .transpose()
}

pub fn optional_u64(fields: &[Field], id: u16) -> Result<Option<u64>, FieldError> {
    get_field(fields, id).map(Field::as_u64).transpose()
}

pub fn optional_bytes(fields: &[Field], id: u16) -> Result<Option<Bytes>, FieldError> {
    get_field(fields, id)
        .map(|field| field.as_bytes().cloned())
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn encodes_header_then_value() {
        let bytes = encode_fields(&[Field::string(0x0102, "hi")]).unwrap();
        assert_eq!(&bytes[..], &[0x01, 0x02, 6, 0, 0, 0, 2, b'h', b'i']);
    }

    #[test]
    fn short_header_and_short_value_are_distinct() {
        let err = decode_fields(&Bytes::from_static(&[0, 1, 6, 0])).unwrap_err();
        assert_eq!(err, FieldError::ShortFieldHeader { offset: 0 });

        let err = decode_fields(&Bytes::from_static(&[0, 1, 6, 0, 0, 0, 9, b'a'])).unwrap_err();
        assert_eq!(
            err,
            FieldError::ShortFieldValue {
                id: 1,
                declared: 9,
                remaining: 1
            }
        );
    }

    #[test]
    fn get_field_returns_first_match() {
        let fields = vec![
            Field::string(7, "first"),
            Field::u32(8, 3),
            Field::string(7, "second"),
        ];
        assert_eq!(get_field(&fields, 7).unwrap().as_str().unwrap(), "first");
        assert!(get_field(&fields, 9).is_none());
    }

    #[test]
    fn typed_accessors_check_type_and_length() {
        let fields = vec![
            Field::u8(1, 9),
            Field::u16(2, 513),
            Field::u32(3, 70_000),
            Field::u64(4, u64::MAX),
            Field::bool(5, true),
            Field::bytes(6, vec![1, 2, 3]),
            Field::new(7, FieldType::U32, vec![0, 1]),
        ];
        assert_eq!(fields[0].as_u8().unwrap(), 9);
        assert_eq!(fields[1].as_u16().unwrap(), 513);
        assert_eq!(field_u32(&fields, 3).unwrap(), 70_000);
        assert_eq!(field_u64(&fields, 4).unwrap(), u64::MAX);
        assert!(fields[4].as_bool().unwrap());
        assert_eq!(&field_bytes(&fields, 6).unwrap()[..], &[1, 2, 3]);

        assert!(matches!(
            field_string(&fields, 3),
            Err(FieldError::TypeMismatch { id: 3, .. })
        ));
        assert!(matches!(
            field_u32(&fields, 7),
            Err(FieldError::InvalidLength { id: 7, len: 2, .. })
        ));
        assert_eq!(
            field_string(&fields, 99),
            Err(FieldError::MissingField { id: 99 })
        );
    }

    #[test]
    fn unknown_type_bytes_survive() {
        let fields = vec![Field::new(900, FieldType(42), vec![0xAA])];
        let decoded = decode_fields(&encode_fields(&fields).unwrap()).unwrap();
        assert_eq!(decoded, fields);
        assert_eq!(decoded[0].field_type.to_string(), "type(42)");
    }

    fn field_strategy() -> impl Strategy<Value = Field> {
        (
            any::<u16>(),
            any::<u8>(),
            proptest::collection::vec(any::<u8>(), 0..64),
        )
            .prop_map(|(id, ty, value)| Field::new(id, FieldType(ty), value))
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

        #[test]
        fn decode_inverts_encode_in_order(fields in proptest::collection::vec(field_strategy(), 0..16)) {
            let encoded = encode_fields(&fields).unwrap();
            let decoded = decode_fields(&encoded).unwrap();
            prop_assert_eq!(&decoded, &fields);
            prop_assert_eq!(encode_fields(&decoded).unwrap(), encoded);
        }
    }
}
