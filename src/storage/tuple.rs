use std::{cmp::Ordering, fmt, io::Read};

use crate::{
    error::DbError,
    io::{read_exact, read_into, ByteWriter, Encodeable, Serializeable},
    page::PageId,
    storage::schema::{Schema, Type},
    types::DbResult,
};

/// A typed value.
#[derive(Debug, Clone)]
pub enum Cell {
    Int(i32),
    String(String),
}

impl Cell {
    pub fn matches_type(&self, t: Type) -> bool {
        match (self, t) {
            (Cell::Int(_), Type::Int) => true,
            (Cell::String(_), Type::Char(_)) => true,
            _ => false,
        }
    }
}

impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Cell::Int(a), Cell::Int(b)) => a == b,
            (Cell::String(a), Cell::String(b)) => a == b,
            _ => panic!("cannot compare cells of different types"),
        }
    }
}

impl Eq for Cell {}

impl PartialOrd for Cell {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Cell {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Cell::Int(a), Cell::Int(b)) => a.cmp(b),
            (Cell::String(a), Cell::String(b)) => a.cmp(b),
            _ => panic!("cannot compare cells of different types"),
        }
    }
}

/// # Format
///
/// - `Int`: big-endian 32-bit two's complement.
/// - `Char(n)`: big-endian 32-bit actual length, then n bytes padded with
///   zeros. Over-length strings are truncated to the declared bound.
impl Serializeable for Cell {
    type Reference = Type;

    fn encode(&self, writer: &mut ByteWriter, reference: &Type) {
        match (self, reference) {
            (Cell::Int(v), Type::Int) => {
                writer.write(v);
            }
            (Cell::String(v), Type::Char(len)) => {
                let max_len = *len as usize;
                let bytes = v.as_bytes();
                let actual = std::cmp::min(bytes.len(), max_len);
                writer.write(&(actual as u32));
                let mut payload = bytes[..actual].to_vec();
                payload.resize(max_len, 0);
                writer.write_bytes(&payload);
            }
            _ => panic!("cell does not match the declared type"),
        }
    }

    fn decode<R: Read>(reader: &mut R, reference: &Type) -> Self {
        match reference {
            Type::Int => Cell::Int(read_into(reader)),
            Type::Char(len) => {
                let actual: u32 = read_into(reader);
                let payload = read_exact(reader, *len as usize);
                let s = String::from_utf8_lossy(&payload[..actual as usize]).to_string();
                Cell::String(s)
            }
        }
    }
}

/// The on-disk location of a row: the page it lives on and the slot within
/// that page.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct RecordId {
    pub pid: PageId,
    pub slot: u32,
}

impl RecordId {
    pub fn new(pid: PageId, slot: u32) -> Self {
        Self { pid, slot }
    }
}

impl PartialOrd for RecordId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RecordId {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.pid.page_index, self.slot).cmp(&(other.pid.page_index, other.slot))
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.pid, self.slot)
    }
}

/// A row: a schema plus one cell per column, plus the optional location of
/// the row on disk. Rows without a record id have not been inserted yet.
#[derive(Debug, Clone)]
pub struct Tuple {
    schema: Schema,
    cells: Vec<Cell>,
    record_id: Option<RecordId>,
}

impl Tuple {
    /// A tuple with zero-initialized cells, pre-sized to the schema length.
    pub fn new(schema: &Schema) -> Self {
        let cells = schema
            .fields
            .iter()
            .map(|f| match f.field_type {
                Type::Int => Cell::Int(0),
                Type::Char(_) => Cell::String(String::new()),
            })
            .collect();
        Self {
            schema: schema.clone(),
            cells,
            record_id: None,
        }
    }

    pub fn new_from_cells(schema: &Schema, cells: &[Cell]) -> Result<Self, DbError> {
        if cells.len() != schema.fields.len() {
            return Err(DbError::SchemaMismatch(format!(
                "expect {} cells, got {}",
                schema.fields.len(),
                cells.len()
            )));
        }
        let mut tuple = Self::new(schema);
        for (i, cell) in cells.iter().enumerate() {
            tuple.set_cell(i, cell.clone())?;
        }
        Ok(tuple)
    }

    pub fn read_from<R: Read>(reader: &mut R, schema: &Schema) -> Self {
        let cells = schema
            .fields
            .iter()
            .map(|f| Cell::decode(reader, &f.field_type))
            .collect();
        Self {
            schema: schema.clone(),
            cells,
            record_id: None,
        }
    }

    /// A tuple of `width` int columns, all set to `value`.
    pub fn new_int_tuple(value: i32, width: usize) -> Self {
        let schema = crate::storage::schema::int_schema(width, "");
        let cells = vec![Cell::Int(value); width];
        Self {
            schema,
            cells,
            record_id: None,
        }
    }

    pub fn get_cell(&self, i: usize) -> Cell {
        self.cells[i].clone()
    }

    /// Set the cell at index i. The index must be within the schema and the
    /// cell must match the column type.
    pub fn set_cell(&mut self, i: usize, cell: Cell) -> DbResult {
        if i >= self.cells.len() {
            return Err(DbError::NoSuchField(format!(
                "field index {} out of range ({} fields)",
                i,
                self.cells.len()
            )));
        }
        if !cell.matches_type(self.schema.fields[i].field_type) {
            return Err(DbError::SchemaMismatch(format!(
                "cell {:?} does not match column type {:?}",
                cell, self.schema.fields[i].field_type
            )));
        }
        self.cells[i] = cell;
        Ok(())
    }

    pub fn get_schema(&self) -> &Schema {
        &self.schema
    }

    pub fn get_record_id(&self) -> Option<RecordId> {
        self.record_id
    }

    pub fn set_record_id(&mut self, record_id: Option<RecordId>) {
        self.record_id = record_id;
    }
}

impl Encodeable for Tuple {
    fn to_bytes(&self) -> Vec<u8> {
        let mut writer = ByteWriter::new();
        for (cell, field) in self.cells.iter().zip(&self.schema.fields) {
            cell.encode(&mut writer, &field.field_type);
        }
        writer.to_bytes()
    }
}

impl PartialEq for Tuple {
    fn eq(&self, other: &Self) -> bool {
        self.cells == other.cells
    }
}

impl Eq for Tuple {}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let content: Vec<String> = self.cells.iter().map(|c| format!("{:?}", c)).collect();
        write!(f, "{{{}}}", content.join(", "))
    }
}
