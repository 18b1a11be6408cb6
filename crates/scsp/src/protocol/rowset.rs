//! Row-set assembly.
//!
//! A row set arrives either as one `*` frame or as a stream of `/` chunk
//! frames terminated by [`ROWSET_CHUNK_END`]. Both share a signature:
//!
//! ```text
//! *LEN 0:VERSION NROWS NCOLS <header> <NROWS*NCOLS cells>
//! /LEN IDX:VERSION NROWS NCOLS [<header>] <NROWS*NCOLS cells>
//! ```
//!
//! The column header is only present in the first chunk (index 0 or 1).
//! Version 1 headers carry column names; version 2 adds declared type,
//! origin database, origin table, origin column name and three flag passes.

use scsp_core::Value;
use scsp_core::error::{Error, ProtocolError, ProtocolErrorKind, Result};

use crate::protocol::{FrameReader, ROWSET_CHUNK_END, tag};

/// Per-column metadata carried by version 2 row sets.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ColumnMeta {
    /// Declared column type
    pub decl_type: String,
    /// Database the column originates from
    pub database: String,
    /// Table the column originates from
    pub table: String,
    /// Original column name (before aliasing)
    pub origin_name: String,
    /// NOT NULL constraint
    pub not_null: bool,
    /// Part of the primary key
    pub primary_key: bool,
    /// AUTOINCREMENT column
    pub autoincrement: bool,
}

/// A tabular result.
///
/// Cells are stored row-major in one flat sequence of `nrows * ncols`
/// values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RowSet {
    nrows: usize,
    ncols: usize,
    version: u8,
    names: Vec<String>,
    metadata: Vec<ColumnMeta>,
    data: Vec<Value>,
}

impl RowSet {
    /// Number of rows.
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    /// Number of columns.
    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// Row-set protocol version (1 or 2).
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Check if the row set has no rows.
    pub fn is_empty(&self) -> bool {
        self.nrows == 0
    }

    /// Column display names.
    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    /// Alias of [`RowSet::column_names`].
    pub fn columns(&self) -> &[String] {
        &self.names
    }

    /// Display name of a column by index.
    pub fn column_name(&self, col: usize) -> Option<&str> {
        self.names.get(col).map(String::as_str)
    }

    /// Index of a column by display name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Per-column metadata, only available for version 2 row sets.
    pub fn metadata(&self) -> Option<&[ColumnMeta]> {
        if self.version == 2 {
            Some(&self.metadata)
        } else {
            None
        }
    }

    /// Cell at `(row, col)`.
    pub fn value(&self, row: usize, col: usize) -> Option<&Value> {
        if row >= self.nrows || col >= self.ncols {
            return None;
        }
        self.data.get(row * self.ncols + col)
    }

    /// Cells of one row.
    pub fn row(&self, row: usize) -> Option<&[Value]> {
        if row >= self.nrows {
            return None;
        }
        let start = row * self.ncols;
        self.data.get(start..start + self.ncols)
    }

    /// Iterate over rows as cell slices.
    ///
    /// Always yields [`RowSet::nrows`] rows; they are empty when the row
    /// set has no columns.
    pub fn rows(&self) -> impl Iterator<Item = &[Value]> {
        (0..self.nrows).map(move |row| self.row(row).unwrap_or(&[]))
    }

    /// All cells, row-major.
    pub fn data(&self) -> &[Value] {
        &self.data
    }

    /// Consume the row set, returning its cells.
    pub fn into_data(self) -> Vec<Value> {
        self.data
    }
}

/// In-flight chunked row set, owned by one connection.
#[derive(Debug, Default)]
pub struct RowsetContext {
    in_flight: Option<RowSet>,
}

impl RowsetContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if a chunked row set is being assembled.
    pub fn is_active(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Drop any partially assembled row set.
    pub fn clear(&mut self) {
        self.in_flight = None;
    }
}

/// Parsed `LEN IDX:VERSION NROWS NCOLS` signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    /// Chunk index (0 for plain row sets)
    pub index: u64,
    /// Header version
    pub version: u64,
    /// Rows carried by this frame
    pub nrows: usize,
    /// Column count
    pub ncols: usize,
    /// Offset of the first header/data byte
    pub data_start: usize,
    /// Offset one past the end of this frame
    pub frame_end: usize,
}

impl Signature {
    fn is_first_chunk(&self) -> bool {
        self.index <= 1
    }
}

/// Parse the signature of the row-set frame at the start of `buf`.
pub fn parse_signature(buf: &[u8]) -> Option<Signature> {
    let mut reader = FrameReader::new(buf, 1);
    let len = reader.read_number()?;
    let frame_start = reader.position();
    let chunk = reader.read_number()?;
    let nrows = reader.read_number()?;
    let ncols = reader.read_number()?;

    Some(Signature {
        index: chunk.value,
        version: chunk.extended,
        nrows: usize::try_from(nrows.value).ok()?,
        ncols: usize::try_from(ncols.value).ok()?,
        data_start: reader.position(),
        frame_end: frame_start.checked_add(usize::try_from(len.value).ok()?)?,
    })
}

/// Feed one `*` or `/` frame into the assembler.
///
/// Returns the completed row set (plain row sets, or the end-of-chunk
/// sentinel) or `None` when a chunk was absorbed and more are expected,
/// together with the number of bytes this frame occupied in `buf`.
pub fn assemble(buf: &[u8], ctx: &mut RowsetContext) -> Result<(Option<RowSet>, usize)> {
    let chunked = buf.first() == Some(&tag::ROWSET_CHUNK);

    if chunked && buf.starts_with(ROWSET_CHUNK_END) {
        let rowset = ctx.in_flight.take().unwrap_or_else(|| {
            tracing::warn!("end-of-chunk marker without a chunked row set in flight");
            RowSet::default()
        });
        return Ok((Some(rowset), ROWSET_CHUNK_END.len()));
    }

    let sig = parse_signature(buf).ok_or_else(|| Error::malformed("invalid row-set signature"))?;
    if sig.frame_end > buf.len() {
        return Err(Error::malformed(format!(
            "row-set frame declares {} bytes but only {} are available",
            sig.frame_end,
            buf.len()
        )));
    }
    let cells = sig.nrows.checked_mul(sig.ncols).ok_or_else(|| {
        Error::malformed(format!(
            "row-set dimensions overflow: {} x {}",
            sig.nrows, sig.ncols
        ))
    })?;
    let frame = &buf[..sig.frame_end];
    let mut reader = FrameReader::new(frame, sig.data_start);

    tracing::trace!(
        index = sig.index,
        version = sig.version,
        nrows = sig.nrows,
        ncols = sig.ncols,
        "row-set frame"
    );

    let mut rowset = if sig.is_first_chunk() {
        if ctx.is_active() {
            return Err(unexpected(
                "a new row set started before the previous chunked row set ended",
            ));
        }
        let mut rowset = RowSet {
            nrows: sig.nrows,
            ncols: sig.ncols,
            ..RowSet::default()
        };
        read_header(&mut reader, &sig, &mut rowset)?;
        rowset
    } else {
        let mut rowset = ctx.in_flight.take().ok_or_else(|| {
            unexpected(format!(
                "row-set chunk {} received without a first chunk",
                sig.index
            ))
        })?;
        if rowset.ncols != sig.ncols {
            return Err(Error::malformed(format!(
                "row-set chunk {} has {} columns, expected {}",
                sig.index, sig.ncols, rowset.ncols
            )));
        }
        rowset.nrows += sig.nrows;
        rowset
    };

    reader
        .read_values(cells, &mut rowset.data)
        .ok_or_else(|| Error::malformed("row-set data ends before its declared cell count"))?;

    if chunked {
        ctx.in_flight = Some(rowset);
        Ok((None, sig.frame_end))
    } else {
        Ok((Some(rowset), sig.frame_end))
    }
}

fn read_header(reader: &mut FrameReader<'_>, sig: &Signature, rowset: &mut RowSet) -> Result<()> {
    rowset.version = match sig.version {
        1 => 1,
        2 => 2,
        other => {
            return Err(Error::Protocol(ProtocolError::new(
                ProtocolErrorKind::UnsupportedVersion,
                format!("row-set version {} is not supported", other),
            )));
        }
    };

    let ncols = sig.ncols;
    rowset.names = read_texts(reader, ncols, "column names")?;
    if rowset.version == 1 {
        return Ok(());
    }

    let decl_types = read_texts(reader, ncols, "declared types")?;
    let databases = read_texts(reader, ncols, "database names")?;
    let tables = read_texts(reader, ncols, "table names")?;
    let origin_names = read_texts(reader, ncols, "origin column names")?;
    let not_null = read_flags(reader, ncols, "not-null flags")?;
    let primary_key = read_flags(reader, ncols, "primary-key flags")?;
    let autoincrement = read_flags(reader, ncols, "autoincrement flags")?;

    rowset.metadata = (0..ncols)
        .map(|i| ColumnMeta {
            decl_type: decl_types[i].clone(),
            database: databases[i].clone(),
            table: tables[i].clone(),
            origin_name: origin_names[i].clone(),
            not_null: not_null[i],
            primary_key: primary_key[i],
            autoincrement: autoincrement[i],
        })
        .collect();
    Ok(())
}

fn read_texts(reader: &mut FrameReader<'_>, count: usize, what: &str) -> Result<Vec<String>> {
    (0..count)
        .map(|_| {
            reader
                .read_text()
                .ok_or_else(|| Error::malformed(format!("row-set header truncated in {}", what)))
        })
        .collect()
}

fn read_flags(reader: &mut FrameReader<'_>, count: usize, what: &str) -> Result<Vec<bool>> {
    (0..count)
        .map(|_| {
            reader
                .read_flag()
                .map(|flag| flag != 0)
                .ok_or_else(|| Error::malformed(format!("row-set header truncated in {}", what)))
        })
        .collect()
}

fn unexpected(message: impl Into<String>) -> Error {
    Error::Protocol(ProtocolError::new(ProtocolErrorKind::Unexpected, message))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Wrap `body` (everything after the length field) into a frame.
    fn frame(tag: char, body: &str) -> Vec<u8> {
        format!("{}{} {}", tag, body.len(), body).into_bytes()
    }

    #[test]
    fn test_plain_v1_rowset() {
        let buf = frame('*', "0:1 2 2 +2 id+4 name:1 +5 Alice:2 _ ");
        let mut ctx = RowsetContext::new();
        let (rowset, used) = assemble(&buf, &mut ctx).unwrap();
        let rowset = rowset.unwrap();

        assert_eq!(used, buf.len());
        assert_eq!(rowset.nrows(), 2);
        assert_eq!(rowset.ncols(), 2);
        assert_eq!(rowset.version(), 1);
        assert_eq!(rowset.column_names(), ["id", "name"]);
        assert!(rowset.metadata().is_none());
        assert_eq!(rowset.value(0, 1), Some(&Value::Text("Alice".to_string())));
        assert_eq!(rowset.value(1, 0), Some(&Value::Integer(2)));
        assert_eq!(rowset.value(1, 1), Some(&Value::Null));
        assert_eq!(rowset.value(2, 0), None);
        assert_eq!(rowset.data().len(), 4);
        assert!(!ctx.is_active());
    }

    #[test]
    fn test_plain_v2_rowset_metadata() {
        let body = "0:2 1 2 \
                    +2 id+4 name\
                    +7 INTEGER+4 TEXT\
                    +4 main+4 main\
                    +5 users+5 users\
                    +2 id+4 name\
                    :1 :0 \
                    :1 :0 \
                    :1 :0 \
                    :7 +3 Bob";
        let buf = frame('*', body);
        let mut ctx = RowsetContext::new();
        let rowset = assemble(&buf, &mut ctx).unwrap().0.unwrap();

        assert_eq!(rowset.version(), 2);
        let meta = rowset.metadata().unwrap();
        assert_eq!(meta.len(), 2);
        assert_eq!(meta[0].decl_type, "INTEGER");
        assert_eq!(meta[0].database, "main");
        assert_eq!(meta[0].table, "users");
        assert_eq!(meta[0].origin_name, "id");
        assert!(meta[0].not_null && meta[0].primary_key && meta[0].autoincrement);
        assert!(!meta[1].not_null && !meta[1].primary_key && !meta[1].autoincrement);
        assert_eq!(rowset.row(0).unwrap(), [Value::Integer(7), Value::Text("Bob".into())]);
    }

    #[test]
    fn test_empty_rowset_has_no_data() {
        let buf = frame('*', "0:1 0 0 ");
        let mut ctx = RowsetContext::new();
        let rowset = assemble(&buf, &mut ctx).unwrap().0.unwrap();
        assert_eq!(rowset.nrows(), 0);
        assert_eq!(rowset.ncols(), 0);
        assert!(rowset.data().is_empty());
        assert_eq!(rowset.rows().count(), 0);
    }

    #[test]
    fn test_rows_without_columns() {
        let buf = frame('*', "0:1 3 0 ");
        let rowset = assemble(&buf, &mut RowsetContext::new()).unwrap().0.unwrap();
        assert_eq!(rowset.nrows(), 3);
        assert_eq!(rowset.rows().count(), 3);
        assert!(rowset.rows().all(<[Value]>::is_empty));
        assert_eq!(rowset.row(2), Some(&[][..]));
    }

    #[test]
    fn test_rows_iterate_in_order() {
        let buf = frame('*', "0:1 2 2 +1 a+1 b:1 :2 :3 :4 ");
        let rowset = assemble(&buf, &mut RowsetContext::new()).unwrap().0.unwrap();
        let rows: Vec<&[Value]> = rowset.rows().collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1], [Value::Integer(3), Value::Integer(4)]);
    }

    #[test]
    fn test_unsupported_version() {
        let buf = frame('*', "0:3 0 1 +1 a");
        let err = assemble(&buf, &mut RowsetContext::new()).unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError {
                kind: ProtocolErrorKind::UnsupportedVersion,
                ..
            })
        ));
    }

    #[test]
    fn test_chunks_accumulate_until_sentinel() {
        let mut ctx = RowsetContext::new();

        let first = frame('/', "1:1 2 1 +1 n:1 :2 ");
        let (done, used) = assemble(&first, &mut ctx).unwrap();
        assert!(done.is_none());
        assert_eq!(used, first.len());
        assert!(ctx.is_active());

        let second = frame('/', "2:1 3 1 :3 :4 :5 ");
        assert!(assemble(&second, &mut ctx).unwrap().0.is_none());

        let (done, used) = assemble(ROWSET_CHUNK_END, &mut ctx).unwrap();
        assert_eq!(used, ROWSET_CHUNK_END.len());
        let rowset = done.unwrap();
        assert_eq!(rowset.nrows(), 5);
        assert_eq!(rowset.data().len(), rowset.nrows() * rowset.ncols());
        assert_eq!(rowset.column_names(), ["n"]);
        let values: Vec<i64> = rowset.rows().map(|r| r[0].as_i64().unwrap()).collect();
        assert_eq!(values, vec![1, 2, 3, 4, 5]);
        assert!(!ctx.is_active());
    }

    #[test]
    fn test_continuation_without_first_chunk_fails() {
        let buf = frame('/', "2:1 1 1 :3 ");
        let err = assemble(&buf, &mut RowsetContext::new()).unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError {
                kind: ProtocolErrorKind::Unexpected,
                ..
            })
        ));
    }

    #[test]
    fn test_second_stream_cannot_start_while_in_flight() {
        let mut ctx = RowsetContext::new();
        let first = frame('/', "1:1 1 1 +1 n:1 ");
        assemble(&first, &mut ctx).unwrap();
        assert!(assemble(&first, &mut ctx).is_err());
    }

    #[test]
    fn test_truncated_data_is_malformed() {
        // declares two rows but carries one
        let buf = frame('*', "0:1 2 1 +1 n:1 ");
        assert!(assemble(&buf, &mut RowsetContext::new()).is_err());
    }

    #[test]
    fn test_signature_fields() {
        let buf = frame('/', "3:2 10 4 ");
        let sig = parse_signature(&buf).unwrap();
        assert_eq!(sig.index, 3);
        assert_eq!(sig.version, 2);
        assert_eq!(sig.nrows, 10);
        assert_eq!(sig.ncols, 4);
        assert_eq!(sig.data_start, buf.len());
        assert_eq!(sig.frame_end, buf.len());
    }
}
