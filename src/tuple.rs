//! Tuple values and the schemas that describe them.

use std::fmt;
use std::sync::Arc;

use crate::errors::{Error, Result};
use crate::RecordId;

/// Fixed payload width of a string field, excluding the length prefix.
pub const STRING_LEN: usize = 128;

/// The type of a single tuple field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
    Int,
    String,
}

impl Type {
    /// Number of bytes a field of this type occupies on a page.
    pub fn byte_len(&self) -> usize {
        match self {
            Type::Int => 4,
            Type::String => 4 + STRING_LEN,
        }
    }

    /// Parses a field from its on-page representation. `bytes` must be
    /// exactly `byte_len` long.
    pub fn parse(&self, bytes: &[u8]) -> Result<Field> {
        if bytes.len() != self.byte_len() {
            return Err(Error::Schema(format!(
                "field of type {self:?} needs {} bytes, got {}",
                self.byte_len(),
                bytes.len()
            )));
        }
        match self {
            Type::Int => {
                let raw: [u8; 4] = bytes[..4].try_into().expect("length checked above");
                Ok(Field::Int(i32::from_be_bytes(raw)))
            }
            Type::String => {
                let raw: [u8; 4] = bytes[..4].try_into().expect("length checked above");
                let len = u32::from_be_bytes(raw) as usize;
                if len > STRING_LEN {
                    return Err(Error::Schema(format!(
                        "string field length {len} exceeds maximum {STRING_LEN}"
                    )));
                }
                let value = String::from_utf8_lossy(&bytes[4..4 + len]).into_owned();
                Ok(Field::String(value))
            }
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => write!(f, "int"),
            Type::String => write!(f, "string"),
        }
    }
}

/// A single field value.
///
/// Integers serialize as 4 big-endian two's-complement bytes. Strings
/// serialize as a 4-byte big-endian length followed by the bytes, zero
/// padded to [`STRING_LEN`]; longer values are truncated on write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    Int(i32),
    String(String),
}

impl Field {
    pub fn field_type(&self) -> Type {
        match self {
            Field::Int(_) => Type::Int,
            Field::String(_) => Type::String,
        }
    }

    /// Serializes into `out`, which must be exactly
    /// `self.field_type().byte_len()` bytes.
    pub fn serialize(&self, out: &mut [u8]) {
        match self {
            Field::Int(v) => out[..4].copy_from_slice(&v.to_be_bytes()),
            Field::String(s) => {
                let bytes = s.as_bytes();
                let len = bytes.len().min(STRING_LEN);
                out[..4].copy_from_slice(&(len as u32).to_be_bytes());
                out[4..4 + len].copy_from_slice(&bytes[..len]);
                out[4 + len..].fill(0);
            }
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Int(v) => write!(f, "{v}"),
            Field::String(s) => write!(f, "{s}"),
        }
    }
}

/// One column of a schema.
#[derive(Debug, Clone)]
pub struct TdItem {
    pub field_type: Type,
    pub name: Option<String>,
}

impl TdItem {
    pub fn new(field_type: Type, name: &str) -> Self {
        Self {
            field_type,
            name: Some(name.to_string()),
        }
    }

    pub fn unnamed(field_type: Type) -> Self {
        Self {
            field_type,
            name: None,
        }
    }
}

/// Describes the schema of a tuple: an ordered list of typed, optionally
/// named columns. All tuples of one descriptor occupy the same number of
/// bytes.
#[derive(Debug, Clone)]
pub struct TupleDesc {
    items: Vec<TdItem>,
}

impl TupleDesc {
    pub fn new(items: Vec<TdItem>) -> Self {
        Self { items }
    }

    /// A descriptor with the given types and no column names.
    pub fn anonymous(types: &[Type]) -> Self {
        Self {
            items: types.iter().copied().map(TdItem::unnamed).collect(),
        }
    }

    pub fn num_fields(&self) -> usize {
        self.items.len()
    }

    pub fn items(&self) -> &[TdItem] {
        &self.items
    }

    pub fn field_type(&self, i: usize) -> Option<Type> {
        self.items.get(i).map(|item| item.field_type)
    }

    pub fn field_name(&self, i: usize) -> Option<&str> {
        self.items.get(i).and_then(|item| item.name.as_deref())
    }

    /// Index of the first column with the given name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.items
            .iter()
            .position(|item| item.name.as_deref() == Some(name))
    }

    /// The size in bytes of a tuple with this descriptor.
    pub fn byte_size(&self) -> usize {
        self.items.iter().map(|item| item.field_type.byte_len()).sum()
    }
}

// Descriptors compare by field types only; column names do not affect
// whether two tuples are layout-compatible.
impl PartialEq for TupleDesc {
    fn eq(&self, other: &Self) -> bool {
        self.items.len() == other.items.len()
            && self
                .items
                .iter()
                .zip(&other.items)
                .all(|(a, b)| a.field_type == b.field_type)
    }
}

impl Eq for TupleDesc {}

impl fmt::Display for TupleDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, item) in self.items.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match &item.name {
                Some(name) => write!(f, "{name} {}", item.field_type)?,
                None => write!(f, "{}", item.field_type)?,
            }
        }
        write!(f, ")")
    }
}

/// A single row: field values laid out per a shared [`TupleDesc`], plus
/// the on-disk location once the tuple has been stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Tuple {
    desc: Arc<TupleDesc>,
    fields: Vec<Field>,
    record_id: Option<RecordId>,
}

impl Tuple {
    pub fn new(desc: Arc<TupleDesc>, fields: Vec<Field>) -> Result<Self> {
        if fields.len() != desc.num_fields() {
            return Err(Error::Schema(format!(
                "tuple has {} fields, descriptor has {}",
                fields.len(),
                desc.num_fields()
            )));
        }
        for (i, field) in fields.iter().enumerate() {
            if Some(field.field_type()) != desc.field_type(i) {
                return Err(Error::Schema(format!(
                    "field {i} is {:?}, descriptor expects {:?}",
                    field.field_type(),
                    desc.field_type(i)
                )));
            }
        }
        Ok(Self {
            desc,
            fields,
            record_id: None,
        })
    }

    pub fn desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    pub fn field(&self, i: usize) -> Option<&Field> {
        self.fields.get(i)
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn record_id(&self) -> Option<RecordId> {
        self.record_id
    }

    pub fn set_record_id(&mut self, rid: Option<RecordId>) {
        self.record_id = rid;
    }

    /// Serializes into `out`, which must be exactly
    /// `self.desc().byte_size()` bytes.
    pub fn serialize(&self, out: &mut [u8]) {
        let mut offset = 0;
        for field in &self.fields {
            let len = field.field_type().byte_len();
            field.serialize(&mut out[offset..offset + len]);
            offset += len;
        }
    }

    /// Parses a tuple from its on-page representation.
    pub fn parse(desc: &Arc<TupleDesc>, bytes: &[u8]) -> Result<Self> {
        if bytes.len() != desc.byte_size() {
            return Err(Error::Schema(format!(
                "tuple needs {} bytes, got {}",
                desc.byte_size(),
                bytes.len()
            )));
        }
        let mut fields = Vec::with_capacity(desc.num_fields());
        let mut offset = 0;
        for item in desc.items() {
            let len = item.field_type.byte_len();
            fields.push(item.field_type.parse(&bytes[offset..offset + len])?);
            offset += len;
        }
        Ok(Self {
            desc: desc.clone(),
            fields,
            record_id: None,
        })
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, "\t")?;
            }
            write!(f, "{field}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_desc() -> Arc<TupleDesc> {
        Arc::new(TupleDesc::new(vec![
            TdItem::new(Type::Int, "id"),
            TdItem::new(Type::String, "name"),
        ]))
    }

    #[test]
    fn descriptor_sizes() {
        let desc = sample_desc();
        assert_eq!(desc.num_fields(), 2);
        assert_eq!(desc.byte_size(), 4 + 4 + STRING_LEN);
        assert_eq!(desc.index_of("name"), Some(1));
        assert_eq!(desc.index_of("missing"), None);
    }

    #[test]
    fn descriptors_compare_by_types_not_names() {
        let named = TupleDesc::new(vec![TdItem::new(Type::Int, "a")]);
        let anon = TupleDesc::anonymous(&[Type::Int]);
        assert_eq!(named, anon);
        assert_ne!(named, TupleDesc::anonymous(&[Type::String]));
    }

    #[test]
    fn tuple_round_trips_through_bytes() {
        let desc = sample_desc();
        let tuple = Tuple::new(
            desc.clone(),
            vec![Field::Int(-7), Field::String("alice".to_string())],
        )
        .unwrap();
        let mut bytes = vec![0u8; desc.byte_size()];
        tuple.serialize(&mut bytes);
        let parsed = Tuple::parse(&desc, &bytes).unwrap();
        assert_eq!(parsed.field(0), Some(&Field::Int(-7)));
        assert_eq!(parsed.field(1), Some(&Field::String("alice".to_string())));
    }

    #[test]
    fn long_strings_are_truncated_to_fixed_width() {
        let long = "x".repeat(STRING_LEN + 40);
        let field = Field::String(long);
        let mut bytes = vec![0u8; Type::String.byte_len()];
        field.serialize(&mut bytes);
        let parsed = Type::String.parse(&bytes).unwrap();
        assert_eq!(parsed, Field::String("x".repeat(STRING_LEN)));
    }

    #[test]
    fn arity_mismatch_is_rejected() {
        let desc = sample_desc();
        assert!(Tuple::new(desc, vec![Field::Int(1)]).is_err());
    }
}
