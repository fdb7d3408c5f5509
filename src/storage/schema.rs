use std::hash::{Hash, Hasher};

use crate::error::DbError;

/// Column types. `Char(n)` is a fixed-length string with a declared bound of
/// n bytes; on disk it occupies a 4-byte length prefix plus n padded bytes.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Type {
    Int,
    Char(u8),
}

pub fn get_type_length(t: Type) -> usize {
    match t {
        Type::Int => 4,
        Type::Char(len) => 4 + len as usize,
    }
}

#[derive(PartialEq, Debug, Clone)]
pub struct FieldItem {
    pub field_type: Type,
    pub field_name: String,
}

impl FieldItem {
    pub fn new(field_name: &str, field_type: Type) -> Self {
        Self {
            field_type,
            field_name: field_name.to_string(),
        }
    }
}

/// The schema of a row: an ordered sequence of typed, optionally named
/// columns.
///
/// Two schemas are equal iff their type sequences are equal, the field names
/// don't participate in the comparison (nor in the hash).
#[derive(Debug, Clone, Default)]
pub struct Schema {
    pub fields: Vec<FieldItem>,
}

impl Schema {
    pub fn new(fields: Vec<FieldItem>) -> Self {
        Self { fields }
    }

    /// Row size in bytes.
    pub fn get_size(&self) -> usize {
        self.fields
            .iter()
            .map(|f| get_type_length(f.field_type))
            .sum()
    }

    /// Index of the first field with the given name.
    pub fn field_index(&self, name: &str) -> Result<usize, DbError> {
        self.fields
            .iter()
            .position(|f| f.field_name == name)
            .ok_or_else(|| DbError::NoSuchField(name.to_string()))
    }
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        if self.fields.len() != other.fields.len() {
            return false;
        }
        self.fields
            .iter()
            .zip(&other.fields)
            .all(|(a, b)| a.field_type == b.field_type)
    }
}

impl Eq for Schema {}

impl Hash for Schema {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for f in &self.fields {
            f.field_type.hash(state);
        }
    }
}

/// A schema of `width` int columns, used all over the tests.
pub fn int_schema(width: usize, name_prefix: &str) -> Schema {
    let fields = (0..width)
        .map(|i| FieldItem::new(&format!("{}-{}", name_prefix, i), Type::Int))
        .collect();
    Schema { fields }
}
