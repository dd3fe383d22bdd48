//! Fixed-schema tabular container used by legacy state files.
//!
//! A file is a tree of named nodes. Groups hold child nodes in insertion
//! order; tables hold rows of typed cells with fixed-width string columns.
//! Nodes are addressed by slash paths such as `/universes/prod/topology`.
//!
//! On-disk layout (little-endian):
//!
//! ```text
//! magic "TRTB" | format u16 | root node | sha256(everything before) [32]
//!
//! node   := kind u8 (0 group, 1 table) | name
//! group  := count u32 | node*
//! table  := ncols u16 | (name | type u8 | width u32)* | nrows u32 | cell*
//! name   := len u16 | utf8 bytes
//! cell   := str: `width` bytes, NUL padded | u32: 4 bytes | i64: 8 bytes
//! ```

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use sha2::{Digest, Sha256};

use super::write_atomic;
use crate::error::StateError;
use crate::record::remove_positions;
use crate::Result;

const MAGIC: &[u8; 4] = b"TRTB";
const FORMAT_VERSION: u16 = 1;
const DIGEST_LEN: usize = 32;
const MAX_DEPTH: usize = 16;

const NODE_GROUP: u8 = 0;
const NODE_TABLE: u8 = 1;

const TYPE_STR: u8 = 0;
const TYPE_U32: u8 = 1;
const TYPE_I64: u8 = 2;

/// Type of a table column. String columns have a fixed byte width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Str(usize),
    UInt32,
    Int64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
}

impl Column {
    pub fn string(name: &str, width: usize) -> Self {
        Self {
            name: name.to_string(),
            ty: ColumnType::Str(width),
        }
    }

    pub fn uint32(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ty: ColumnType::UInt32,
        }
    }

    pub fn int64(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ty: ColumnType::Int64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    Str(String),
    UInt32(u32),
    Int64(i64),
}

impl Cell {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Cell::UInt32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Cell::Int64(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<&str> for Cell {
    fn from(s: &str) -> Self {
        Cell::Str(s.to_string())
    }
}

impl From<String> for Cell {
    fn from(s: String) -> Self {
        Cell::Str(s)
    }
}

/// Rows of typed cells under a fixed column schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    columns: Vec<Column>,
    rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new(columns: Vec<Column>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Cell at `row` in column `name`.
    pub fn cell(&self, row: usize, name: &str) -> Option<&Cell> {
        let col = self.column_index(name)?;
        self.rows.get(row)?.get(col)
    }

    /// All string values of column `name`, in row order.
    pub fn strings(&self, name: &str) -> Vec<String> {
        match self.column_index(name) {
            Some(col) => self
                .rows
                .iter()
                .filter_map(|r| r[col].as_str().map(str::to_string))
                .collect(),
            None => Vec::new(),
        }
    }

    /// First string value of column `name`.
    pub fn first_string(&self, name: &str) -> Option<String> {
        self.cell(0, name)?.as_str().map(str::to_string)
    }

    fn check_cell(&self, col: usize, cell: &Cell) -> Result<()> {
        let column = &self.columns[col];
        match (column.ty, cell) {
            (ColumnType::Str(width), Cell::Str(s)) => {
                if s.len() > width {
                    return Err(StateError::FieldTooLong {
                        field: column.name.clone(),
                        limit: width,
                        value: s.clone(),
                    });
                }
                Ok(())
            }
            (ColumnType::UInt32, Cell::UInt32(_)) | (ColumnType::Int64, Cell::Int64(_)) => Ok(()),
            (ty, cell) => Err(StateError::Serialization(format!(
                "column '{}' of type {:?} cannot hold {:?}",
                column.name, ty, cell
            ))),
        }
    }

    /// Append a row; it must match the column schema.
    pub fn append(&mut self, row: Vec<Cell>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(StateError::Serialization(format!(
                "row has {} cells, table has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        for (col, cell) in row.iter().enumerate() {
            self.check_cell(col, cell)?;
        }
        self.rows.push(row);
        Ok(())
    }

    /// Overwrite one cell in place.
    pub fn set(&mut self, row: usize, name: &str, cell: Cell) -> Result<()> {
        let col = self.column_index(name).ok_or_else(|| {
            StateError::Serialization(format!("table has no column '{name}'"))
        })?;
        if row >= self.rows.len() {
            return Err(StateError::Serialization(format!(
                "row {row} out of range ({} rows)",
                self.rows.len()
            )));
        }
        self.check_cell(col, &cell)?;
        self.rows[row][col] = cell;
        Ok(())
    }

    /// Remove rows by position (positions as before any removal).
    ///
    /// Removing the last row leaves an empty table with its columns intact.
    pub fn remove_rows(&mut self, positions: &[usize]) -> usize {
        remove_positions(&mut self.rows, positions)
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Group(Group),
    Table(Table),
}

/// Named children in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Group {
    children: Vec<(String, Node)>,
}

impl Group {
    pub fn names(&self) -> Vec<String> {
        self.children.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|(n, _)| n == name).map(|(_, c)| c)
    }

    fn get_mut(&mut self, name: &str) -> Option<&mut Node> {
        self.children
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c)
    }

    fn remove(&mut self, name: &str) -> Option<Node> {
        let pos = self.children.iter().position(|(n, _)| n == name)?;
        Some(self.children.remove(pos).1)
    }
}

fn split(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// In-memory image of a whole legacy file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableFile {
    root: Group,
}

impl TableFile {
    pub fn new() -> Self {
        Self::default()
    }

    fn node(&self, path: &str) -> Option<&Node> {
        let parts = split(path);
        let (last, parents) = parts.split_last()?;
        let mut group = &self.root;
        for part in parents {
            match group.get(part)? {
                Node::Group(g) => group = g,
                Node::Table(_) => return None,
            }
        }
        group.get(last)
    }

    /// Group at `path`; the root for `/`.
    pub fn get_group(&self, path: &str) -> Option<&Group> {
        if split(path).is_empty() {
            return Some(&self.root);
        }
        match self.node(path)? {
            Node::Group(g) => Some(g),
            Node::Table(_) => None,
        }
    }

    /// Table at `path`, `None` if it was never created.
    pub fn get_table(&self, path: &str) -> Option<&Table> {
        match self.node(path)? {
            Node::Table(t) => Some(t),
            Node::Group(_) => None,
        }
    }

    pub fn get_table_mut(&mut self, path: &str) -> Option<&mut Table> {
        let parts = split(path);
        let (last, parents) = parts.split_last()?;
        let mut group = &mut self.root;
        for part in parents {
            match group.get_mut(part)? {
                Node::Group(g) => group = g,
                Node::Table(_) => return None,
            }
        }
        match group.get_mut(last)? {
            Node::Table(t) => Some(t),
            Node::Group(_) => None,
        }
    }

    /// Child names of the group at `path`; empty if the group is missing.
    pub fn list(&self, path: &str) -> Vec<String> {
        self.get_group(path).map(Group::names).unwrap_or_default()
    }

    /// Create the group at `path` and any missing parents.
    pub fn create_group(&mut self, path: &str) -> Result<&mut Group> {
        let mut group = &mut self.root;
        let mut walked = String::new();
        for part in split(path) {
            walked.push('/');
            walked.push_str(part);
            if group.get(part).is_none() {
                group
                    .children
                    .push((part.to_string(), Node::Group(Group::default())));
            }
            match group.get_mut(part) {
                Some(Node::Group(g)) => group = g,
                _ => {
                    return Err(StateError::NodeConflict {
                        path: walked,
                        expected: "group",
                    })
                }
            }
        }
        Ok(group)
    }

    /// Create the table at `path`, or return the existing one if it has the
    /// same columns.
    pub fn create_table(&mut self, path: &str, columns: Vec<Column>) -> Result<&mut Table> {
        let parts = split(path);
        let Some((last, parents)) = parts.split_last() else {
            return Err(StateError::NodeConflict {
                path: path.to_string(),
                expected: "table",
            });
        };
        let parent = self.create_group(&parents.join("/"))?;

        if parent.get(last).is_none() {
            parent
                .children
                .push((last.to_string(), Node::Table(Table::new(columns.clone()))));
        }
        match parent.get_mut(last) {
            Some(Node::Table(t)) if t.columns == columns => Ok(t),
            _ => Err(StateError::NodeConflict {
                path: path.to_string(),
                expected: "table",
            }),
        }
    }

    /// Detach the node at `path`.
    pub fn remove_node(&mut self, path: &str) -> Option<Node> {
        let parts = split(path);
        let (last, parents) = parts.split_last()?;
        let mut group = &mut self.root;
        for part in parents {
            match group.get_mut(part)? {
                Node::Group(g) => group = g,
                Node::Table(_) => return None,
            }
        }
        group.remove(last)
    }

    // -- persistence ------------------------------------------------------

    /// Read a file; `None` if it does not exist.
    pub fn read(path: &Path) -> Result<Option<Self>> {
        match fs::read(path) {
            Ok(bytes) => Self::decode(&bytes, path).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StateError::io(path, e)),
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        write_atomic(path, &self.encode()?)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        encode_group(&mut out, "", &self.root)?;
        let digest = Sha256::digest(&out);
        out.extend_from_slice(&digest);
        Ok(out)
    }

    /// Parse bytes read from `origin` (used in error messages).
    pub fn decode(bytes: &[u8], origin: &Path) -> Result<Self> {
        if bytes.len() < MAGIC.len() + 2 + DIGEST_LEN {
            return Err(StateError::corrupt(origin, "file too short"));
        }
        let (body, digest) = bytes.split_at(bytes.len() - DIGEST_LEN);
        let expected = Sha256::digest(body);
        if expected.as_slice() != digest {
            return Err(StateError::corrupt(
                origin,
                format!(
                    "checksum mismatch (stored {}, computed {})",
                    hex::encode(digest),
                    hex::encode(expected)
                ),
            ));
        }

        let mut reader = Reader {
            buf: body,
            pos: 0,
            origin,
        };
        if reader.take(MAGIC.len())? != MAGIC {
            return Err(StateError::corrupt(origin, "bad magic"));
        }
        let version = reader.u16()?;
        if version != FORMAT_VERSION {
            return Err(StateError::corrupt(
                origin,
                format!("unsupported format version {version}"),
            ));
        }

        let root = match reader.node(0)? {
            (_, Node::Group(g)) => g,
            (_, Node::Table(_)) => return Err(StateError::corrupt(origin, "root is a table")),
        };
        if reader.pos != body.len() {
            return Err(StateError::corrupt(origin, "trailing bytes after root"));
        }
        Ok(Self { root })
    }
}

fn encode_name(out: &mut Vec<u8>, name: &str) -> Result<()> {
    let len = u16::try_from(name.len())
        .map_err(|_| StateError::Serialization(format!("node name too long: {name}")))?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(name.as_bytes());
    Ok(())
}

fn encode_group(out: &mut Vec<u8>, name: &str, group: &Group) -> Result<()> {
    out.push(NODE_GROUP);
    encode_name(out, name)?;
    out.extend_from_slice(&(group.children.len() as u32).to_le_bytes());
    for (child_name, child) in &group.children {
        match child {
            Node::Group(g) => encode_group(out, child_name, g)?,
            Node::Table(t) => encode_table(out, child_name, t)?,
        }
    }
    Ok(())
}

fn encode_table(out: &mut Vec<u8>, name: &str, table: &Table) -> Result<()> {
    out.push(NODE_TABLE);
    encode_name(out, name)?;
    out.extend_from_slice(&(table.columns.len() as u16).to_le_bytes());
    for column in &table.columns {
        encode_name(out, &column.name)?;
        let (tag, width) = match column.ty {
            ColumnType::Str(w) => (TYPE_STR, w as u32),
            ColumnType::UInt32 => (TYPE_U32, 0),
            ColumnType::Int64 => (TYPE_I64, 0),
        };
        out.push(tag);
        out.extend_from_slice(&width.to_le_bytes());
    }
    out.extend_from_slice(&(table.rows.len() as u32).to_le_bytes());
    for row in &table.rows {
        for (column, cell) in table.columns.iter().zip(row) {
            match (column.ty, cell) {
                (ColumnType::Str(width), Cell::Str(s)) => {
                    let mut field = s.as_bytes().to_vec();
                    field.resize(width, 0);
                    out.extend_from_slice(&field);
                }
                (ColumnType::UInt32, Cell::UInt32(v)) => out.extend_from_slice(&v.to_le_bytes()),
                (ColumnType::Int64, Cell::Int64(v)) => out.extend_from_slice(&v.to_le_bytes()),
                (ty, cell) => {
                    return Err(StateError::Serialization(format!(
                        "column '{}' of type {:?} cannot hold {:?}",
                        column.name, ty, cell
                    )))
                }
            }
        }
    }
    Ok(())
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    origin: &'a Path,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| StateError::corrupt(self.origin, "unexpected end of file"))?;
        let buf = self.buf;
        let slice = &buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i64(&mut self) -> Result<i64> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(i64::from_le_bytes(arr))
    }

    fn utf8(&self, bytes: &[u8]) -> Result<String> {
        String::from_utf8(bytes.to_vec())
            .map_err(|_| StateError::corrupt(self.origin, "invalid utf-8 in string"))
    }

    fn name(&mut self) -> Result<String> {
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        self.utf8(bytes)
    }

    fn node(&mut self, depth: usize) -> Result<(String, Node)> {
        if depth > MAX_DEPTH {
            return Err(StateError::corrupt(self.origin, "nodes nested too deeply"));
        }
        let kind = self.u8()?;
        let name = self.name()?;
        match kind {
            NODE_GROUP => {
                let count = self.u32()?;
                let mut group = Group::default();
                for _ in 0..count {
                    group.children.push(self.node(depth + 1)?);
                }
                Ok((name, Node::Group(group)))
            }
            NODE_TABLE => Ok((name, Node::Table(self.table()?))),
            other => Err(StateError::corrupt(
                self.origin,
                format!("unknown node kind {other}"),
            )),
        }
    }

    fn table(&mut self) -> Result<Table> {
        let ncols = self.u16()?;
        let mut columns = Vec::with_capacity(ncols as usize);
        for _ in 0..ncols {
            let name = self.name()?;
            let tag = self.u8()?;
            let width = self.u32()? as usize;
            let ty = match tag {
                TYPE_STR if width == 0 => {
                    return Err(StateError::corrupt(
                        self.origin,
                        format!("string column '{name}' has zero width"),
                    ))
                }
                TYPE_STR => ColumnType::Str(width),
                TYPE_U32 => ColumnType::UInt32,
                TYPE_I64 => ColumnType::Int64,
                other => {
                    return Err(StateError::corrupt(
                        self.origin,
                        format!("unknown column type {other}"),
                    ))
                }
            };
            columns.push(Column { name, ty });
        }

        let nrows = self.u32()? as usize;
        let row_width: usize = columns
            .iter()
            .map(|c| match c.ty {
                ColumnType::Str(width) => width,
                ColumnType::UInt32 => 4,
                ColumnType::Int64 => 8,
            })
            .sum();
        if nrows > 0 && row_width == 0 {
            return Err(StateError::corrupt(
                self.origin,
                format!("table without columns claims {nrows} rows"),
            ));
        }
        let remaining = self.buf.len() - self.pos;
        if nrows.saturating_mul(row_width) > remaining {
            return Err(StateError::corrupt(
                self.origin,
                format!("table claims {nrows} rows of {row_width} bytes, {remaining} bytes left"),
            ));
        }
        let mut table = Table::new(columns);
        for _ in 0..nrows {
            let mut row = Vec::with_capacity(table.columns.len());
            for column in &table.columns {
                let cell = match column.ty {
                    ColumnType::Str(width) => {
                        let raw = self.take(width)?;
                        let end = raw.iter().rposition(|b| *b != 0).map_or(0, |p| p + 1);
                        Cell::Str(self.utf8(&raw[..end])?)
                    }
                    ColumnType::UInt32 => Cell::UInt32(self.u32()?),
                    ColumnType::Int64 => Cell::Int64(self.i64()?),
                };
                row.push(cell);
            }
            table.rows.push(row);
        }
        Ok(table)
    }
}
