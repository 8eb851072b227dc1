// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Two-phase collective result assembly.
//!
//! Results leave the engine as flat archives: little-endian scalars,
//! u64-length-prefixed strings, i32 dtype tags, i64 counts. Assembly is
//! a fixed collective sequence run identically on every rank:
//!
//! 1. every rank encodes its local selection into an archive;
//! 2. local sizes sum-reduce to rank 0;
//! 3. rank 0 alone writes the header in front of its own body;
//! 4. bodies gather to rank 0 in rank order.
//!
//! Rank 0 returns the assembled bytes; every other rank returns nothing.
//! A rank with an empty selection still runs every step with a
//! zero-length body.
//!
//! Header layouts: ndarray is `[1][total][dtype][total]`; dataframe is
//! `[ncols][total]` then `[name][dtype]` per column. Dataframe bodies
//! open with their local row count so chunk boundaries survive
//! concatenation.

// Length and tag fields are fixed-width by format; counts fit them.
#![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]

use std::collections::BTreeMap;

use bytes::{BufMut, Bytes, BytesMut};
use skein_comm::Collective;
use skein_store::{MetaValue, ObjectId, ObjectMeta, ObjectStore};

use crate::column::{Column, DataType};
use crate::error::EngineError;
use crate::value::DynValue;

/// Object type name of one rank's tensor chunk.
pub const TENSOR_CHUNK_TYPE_NAME: &str = "skein::TensorChunk";
/// Object type name of the rank-0 tensor group.
pub const TENSOR_TYPE_NAME: &str = "skein::Tensor";
/// Object type name of one rank's dataframe chunk.
pub const DATAFRAME_CHUNK_TYPE_NAME: &str = "skein::DataframeChunk";
/// Object type name of the rank-0 dataframe group.
pub const DATAFRAME_TYPE_NAME: &str = "skein::Dataframe";

/// Append-only result encoder.
#[derive(Debug, Default)]
pub struct Archive {
    buf: BytesMut,
}

impl Archive {
    /// Empty archive.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True when nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// One byte, `0` or `1`.
    pub fn put_bool(&mut self, b: bool) {
        self.buf.put_u8(u8::from(b));
    }

    /// Little-endian `i32`.
    pub fn put_i32(&mut self, x: i32) {
        self.buf.put_i32_le(x);
    }

    /// Little-endian `i64`.
    pub fn put_i64(&mut self, x: i64) {
        self.buf.put_i64_le(x);
    }

    /// Little-endian `u64`.
    pub fn put_u64(&mut self, x: u64) {
        self.buf.put_u64_le(x);
    }

    /// Little-endian `f64`.
    pub fn put_f64(&mut self, x: f64) {
        self.buf.put_f64_le(x);
    }

    /// u64 length prefix, then the UTF-8 bytes.
    pub fn put_str(&mut self, s: &str) {
        self.buf.put_u64_le(s.len() as u64);
        self.buf.put_slice(s.as_bytes());
    }

    /// Raw bytes, no framing.
    pub fn put_raw(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    /// Every row of `col`, fixed-width per dtype, strings
    /// length-prefixed.
    pub fn put_column(&mut self, col: &Column) {
        match col {
            Column::Bool(v) => {
                for b in v {
                    self.put_bool(*b);
                }
            }
            Column::Int32(v) => {
                for x in v {
                    self.buf.put_i32_le(*x);
                }
            }
            Column::UInt32(v) => {
                for x in v {
                    self.buf.put_u32_le(*x);
                }
            }
            Column::Int64(v) => {
                for x in v {
                    self.buf.put_i64_le(*x);
                }
            }
            Column::UInt64(v) => {
                for x in v {
                    self.buf.put_u64_le(*x);
                }
            }
            Column::Float32(v) => {
                for x in v {
                    self.buf.put_f32_le(*x);
                }
            }
            Column::Float64(v) => {
                for x in v {
                    self.buf.put_f64_le(*x);
                }
            }
            Column::Utf8(v) | Column::LargeUtf8(v) => {
                for s in v {
                    self.put_str(s);
                }
            }
        }
    }

    /// Finish writing.
    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }

    /// The bytes written so far.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }
}

/// Cursor over archive bytes.
#[derive(Debug)]
pub struct ArchiveReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ArchiveReader<'a> {
    /// Read from the start of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], EngineError> {
        let end = self.pos.checked_add(n).filter(|&e| e <= self.data.len());
        let Some(end) = end else {
            return Err(EngineError::InvalidValue(
                "archive ended early".into(),
            ));
        };
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    /// Read one bool byte.
    ///
    /// # Errors
    /// [`EngineError::InvalidValue`] on underrun.
    pub fn get_bool(&mut self) -> Result<bool, EngineError> {
        Ok(self.take(1)?[0] != 0)
    }

    /// Read a little-endian `i32`.
    ///
    /// # Errors
    /// [`EngineError::InvalidValue`] on underrun.
    pub fn get_i32(&mut self) -> Result<i32, EngineError> {
        let raw: [u8; 4] = self.take(4)?.try_into().unwrap_or_default();
        Ok(i32::from_le_bytes(raw))
    }

    /// Read a little-endian `i64`.
    ///
    /// # Errors
    /// [`EngineError::InvalidValue`] on underrun.
    pub fn get_i64(&mut self) -> Result<i64, EngineError> {
        let raw: [u8; 8] = self.take(8)?.try_into().unwrap_or_default();
        Ok(i64::from_le_bytes(raw))
    }

    /// Read a little-endian `u64`.
    ///
    /// # Errors
    /// [`EngineError::InvalidValue`] on underrun.
    pub fn get_u64(&mut self) -> Result<u64, EngineError> {
        let raw: [u8; 8] = self.take(8)?.try_into().unwrap_or_default();
        Ok(u64::from_le_bytes(raw))
    }

    /// Read a little-endian `f64`.
    ///
    /// # Errors
    /// [`EngineError::InvalidValue`] on underrun.
    pub fn get_f64(&mut self) -> Result<f64, EngineError> {
        let raw: [u8; 8] = self.take(8)?.try_into().unwrap_or_default();
        Ok(f64::from_le_bytes(raw))
    }

    /// Read a length-prefixed string.
    ///
    /// # Errors
    /// [`EngineError::InvalidValue`] on underrun or bad UTF-8.
    pub fn get_str(&mut self) -> Result<String, EngineError> {
        let len = self.get_u64()? as usize;
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| EngineError::InvalidValue("archive string is not UTF-8".into()))
    }

    /// Read one value of `dtype`, widened to a [`DynValue`] the same way
    /// [`Column::value`] widens.
    ///
    /// # Errors
    /// [`EngineError::InvalidValue`] on underrun.
    #[allow(clippy::cast_precision_loss)]
    pub fn get_value(&mut self, dtype: DataType) -> Result<DynValue, EngineError> {
        Ok(match dtype {
            DataType::Bool => DynValue::Bool(self.get_bool()?),
            DataType::Int32 => {
                let raw: [u8; 4] = self.take(4)?.try_into().unwrap_or_default();
                DynValue::Int(i64::from(i32::from_le_bytes(raw)))
            }
            DataType::UInt32 => {
                let raw: [u8; 4] = self.take(4)?.try_into().unwrap_or_default();
                DynValue::Int(i64::from(u32::from_le_bytes(raw)))
            }
            DataType::Int64 => DynValue::Int(self.get_i64()?),
            DataType::UInt64 => {
                let x = self.get_u64()?;
                i64::try_from(x).map_or(DynValue::Float(x as f64), DynValue::Int)
            }
            DataType::Float32 => {
                let raw: [u8; 4] = self.take(4)?.try_into().unwrap_or_default();
                DynValue::Float(f64::from(f32::from_le_bytes(raw)))
            }
            DataType::Float64 => DynValue::Float(self.get_f64()?),
            DataType::Utf8 | DataType::LargeUtf8 => DynValue::Str(self.get_str()?),
        })
    }
}

fn dtype_from_tag(tag: i32) -> Result<DataType, EngineError> {
    DataType::from_wire_tag(tag)
        .ok_or_else(|| EngineError::InvalidValue(format!("unknown dtype tag: {tag}")))
}

/// All-gather each rank's `(dtype, rows)` and check the dtypes agree.
/// Returns the total row count.
fn exchange_ndarray_schema(
    comm: &dyn Collective,
    dtype: DataType,
    rows: u64,
) -> Result<u64, EngineError> {
    let mut desc = Archive::new();
    desc.put_i32(dtype.wire_tag());
    desc.put_u64(rows);
    let mut total = 0_u64;
    for (rank, raw) in comm.all_gather(desc.freeze().to_vec())?.iter().enumerate() {
        let mut reader = ArchiveReader::new(raw);
        let peer = dtype_from_tag(reader.get_i32()?)?;
        total += reader.get_u64()?;
        if peer != dtype {
            return Err(EngineError::DataType(format!(
                "dtype diverges across ranks: {} on rank {rank}, {} locally",
                peer.name(),
                dtype.name()
            )));
        }
    }
    Ok(total)
}

/// All-gather each rank's dataframe layout and check names and dtypes
/// agree column by column. Returns the total row count.
fn exchange_dataframe_schema(
    comm: &dyn Collective,
    columns: &[(String, Column)],
    rows: u64,
) -> Result<u64, EngineError> {
    let mut desc = Archive::new();
    desc.put_u64(columns.len() as u64);
    desc.put_u64(rows);
    for (name, col) in columns {
        desc.put_str(name);
        desc.put_i32(col.data_type().wire_tag());
    }
    let mut total = 0_u64;
    for (rank, raw) in comm.all_gather(desc.freeze().to_vec())?.iter().enumerate() {
        let mut reader = ArchiveReader::new(raw);
        let ncols = reader.get_u64()? as usize;
        total += reader.get_u64()?;
        if ncols != columns.len() {
            return Err(EngineError::DataType(format!(
                "dataframe has {ncols} columns on rank {rank}, {} locally",
                columns.len()
            )));
        }
        for (name, col) in columns {
            let peer_name = reader.get_str()?;
            let peer_dtype = dtype_from_tag(reader.get_i32()?)?;
            if peer_name != *name {
                return Err(EngineError::DataType(format!(
                    "dataframe column order diverges across ranks: {peer_name} vs {name}"
                )));
            }
            if peer_dtype != col.data_type() {
                return Err(EngineError::DataType(format!(
                    "column {name} dtype diverges across ranks: {} on rank {rank}, {} locally",
                    peer_dtype.name(),
                    col.data_type().name()
                )));
            }
        }
    }
    Ok(total)
}

/// Run the size-reduce + body-gather tail of the protocol. Rank 0 gets
/// the bodies back in rank order with the byte total verified against
/// the reduction.
fn reduce_and_gather(
    comm: &dyn Collective,
    body: Archive,
) -> Result<Option<Vec<Vec<u8>>>, EngineError> {
    let reduced = comm.sum_i64_to_root(body.len() as i64)?;
    let gathered = comm.gather_to_root(body.freeze().to_vec())?;
    let Some(bodies) = gathered else {
        return Ok(None);
    };
    let got: i64 = bodies.iter().map(|b| b.len() as i64).sum();
    if Some(got) != reduced {
        return Err(EngineError::IllegalState(
            "gathered body size disagrees with the reduced total".into(),
        ));
    }
    Ok(Some(bodies))
}

/// Assemble a one-dimensional array from every rank's column.
///
/// Returns the full archive on rank 0 and `None` elsewhere.
///
/// # Errors
/// [`EngineError::DataType`] when dtypes diverge across ranks;
/// collective failures propagate.
pub fn marshal_ndarray(
    comm: &dyn Collective,
    local: &Column,
) -> Result<Option<Bytes>, EngineError> {
    let dtype = local.data_type();
    let total = exchange_ndarray_schema(comm, dtype, local.len() as u64)?;

    let mut body = Archive::new();
    body.put_column(local);
    let Some(bodies) = reduce_and_gather(comm, body)? else {
        return Ok(None);
    };

    let mut out = Archive::new();
    out.put_i64(1);
    out.put_i64(total as i64);
    out.put_i32(dtype.wire_tag());
    out.put_i64(total as i64);
    for chunk in &bodies {
        out.put_raw(chunk);
    }
    Ok(Some(out.freeze()))
}

/// Assemble a dataframe from every rank's aligned columns.
///
/// Returns the full archive on rank 0 and `None` elsewhere.
///
/// # Errors
/// [`EngineError::InvalidValue`] when local columns are missing or
/// misaligned, [`EngineError::DataType`] when layouts diverge across
/// ranks; collective failures propagate.
pub fn marshal_dataframe(
    comm: &dyn Collective,
    columns: &[(String, Column)],
) -> Result<Option<Bytes>, EngineError> {
    let rows = check_alignment(columns)?;
    let total = exchange_dataframe_schema(comm, columns, rows as u64)?;

    let Some(bodies) = reduce_and_gather(comm, dataframe_body(columns, rows))? else {
        return Ok(None);
    };

    let mut out = Archive::new();
    out.put_i64(columns.len() as i64);
    out.put_i64(total as i64);
    for (name, col) in columns {
        out.put_str(name);
        out.put_i32(col.data_type().wire_tag());
    }
    for chunk in &bodies {
        out.put_raw(chunk);
    }
    Ok(Some(out.freeze()))
}

fn check_alignment(columns: &[(String, Column)]) -> Result<usize, EngineError> {
    let Some((_, first)) = columns.first() else {
        return Err(EngineError::InvalidValue(
            "dataframe needs at least one column".into(),
        ));
    };
    let rows = first.len();
    for (name, col) in columns {
        if col.len() != rows {
            return Err(EngineError::InvalidValue(format!(
                "column {name} has {} rows, expected {rows}",
                col.len()
            )));
        }
    }
    Ok(rows)
}

fn dataframe_body(columns: &[(String, Column)], rows: usize) -> Archive {
    let mut body = Archive::new();
    body.put_i64(rows as i64);
    for (_, col) in columns {
        body.put_column(col);
    }
    body
}

/// Decoded ndarray archive.
#[derive(Debug, Clone, PartialEq)]
pub struct NdarrayData {
    /// Element type.
    pub dtype: DataType,
    /// Every rank's values, rank order.
    pub values: Vec<DynValue>,
}

/// Decode an assembled ndarray archive.
///
/// # Errors
/// [`EngineError::InvalidValue`] on malformed bytes.
pub fn decode_ndarray(bytes: &[u8]) -> Result<NdarrayData, EngineError> {
    let mut reader = ArchiveReader::new(bytes);
    let ndim = reader.get_i64()?;
    if ndim != 1 {
        return Err(EngineError::InvalidValue(format!(
            "expected a one-dimensional archive, found ndim {ndim}"
        )));
    }
    let total = reader.get_i64()?;
    let dtype = dtype_from_tag(reader.get_i32()?)?;
    if reader.get_i64()? != total {
        return Err(EngineError::InvalidValue(
            "ndarray length fields disagree".into(),
        ));
    }
    let mut values = Vec::with_capacity(total.max(0) as usize);
    for _ in 0..total {
        values.push(reader.get_value(dtype)?);
    }
    if reader.remaining() != 0 {
        return Err(EngineError::InvalidValue(
            "trailing bytes after ndarray payload".into(),
        ));
    }
    Ok(NdarrayData { dtype, values })
}

/// Decoded dataframe archive.
#[derive(Debug, Clone, PartialEq)]
pub struct DataframeData {
    /// Column name, dtype, and values (every rank's rows, rank order).
    pub columns: Vec<(String, DataType, Vec<DynValue>)>,
}

/// Decode an assembled dataframe archive.
///
/// # Errors
/// [`EngineError::InvalidValue`] on malformed bytes.
pub fn decode_dataframe(bytes: &[u8]) -> Result<DataframeData, EngineError> {
    let mut reader = ArchiveReader::new(bytes);
    let ncols = reader.get_i64()?;
    let total = reader.get_i64()?;
    let mut columns: Vec<(String, DataType, Vec<DynValue>)> = Vec::new();
    for _ in 0..ncols {
        let name = reader.get_str()?;
        let dtype = dtype_from_tag(reader.get_i32()?)?;
        columns.push((name, dtype, Vec::new()));
    }
    let mut seen = 0_i64;
    while reader.remaining() > 0 {
        let chunk_rows = reader.get_i64()?;
        for (_, dtype, values) in &mut columns {
            for _ in 0..chunk_rows {
                values.push(reader.get_value(*dtype)?);
            }
        }
        seen += chunk_rows;
    }
    if seen != total {
        return Err(EngineError::InvalidValue(format!(
            "dataframe chunks carry {seen} rows, header says {total}"
        )));
    }
    Ok(DataframeData { columns })
}

/// Gather every rank's object id to rank 0, construct a group over
/// them there, and hand the group id back to every rank.
pub(crate) fn group_ids_to_root(
    comm: &dyn Collective,
    store: &dyn ObjectStore,
    chunk_id: ObjectId,
    group_type: &str,
    name: Option<&str>,
) -> Result<ObjectId, EngineError> {
    let gathered = comm.gather_to_root(chunk_id.0.to_le_bytes().to_vec())?;
    let group_bytes = if let Some(ids) = gathered {
        let mut members = BTreeMap::new();
        for (rank, raw) in ids.iter().enumerate() {
            let raw: [u8; 8] = raw.as_slice().try_into().map_err(|_| {
                EngineError::IllegalState("chunk id exchange corrupted".into())
            })?;
            members.insert(rank as u32, ObjectId(u64::from_le_bytes(raw)));
        }
        let group = store.construct_group(group_type, members)?;
        if let Some(name) = name {
            store.put_name(group, name)?;
        }
        group.0.to_le_bytes().to_vec()
    } else {
        Vec::new()
    };
    let raw: [u8; 8] = comm
        .broadcast_from_root(group_bytes)?
        .as_slice()
        .try_into()
        .map_err(|_| EngineError::IllegalState("group id broadcast corrupted".into()))?;
    Ok(ObjectId(u64::from_le_bytes(raw)))
}

/// Store form of [`marshal_ndarray`]: each rank writes its body as a
/// chunk object, rank 0 groups the chunks (optionally binding `name`),
/// and every rank returns the group id.
///
/// # Errors
/// [`EngineError::DataType`] when dtypes diverge; store and collective
/// failures propagate.
pub fn store_ndarray(
    comm: &dyn Collective,
    store: &dyn ObjectStore,
    local: &Column,
    name: Option<&str>,
) -> Result<ObjectId, EngineError> {
    let dtype = local.data_type();
    exchange_ndarray_schema(comm, dtype, local.len() as u64)?;

    let mut body = Archive::new();
    body.put_column(local);
    let meta = ObjectMeta::new(TENSOR_CHUNK_TYPE_NAME)
        .with_entry("rank", MetaValue::U64(u64::from(comm.spec().rank)))
        .with_entry("rows", MetaValue::U64(local.len() as u64))
        .with_entry("dtype", MetaValue::Str(dtype.name().to_owned()));
    let chunk_id = store.put(body.freeze(), meta)?;
    group_ids_to_root(comm, store, chunk_id, TENSOR_TYPE_NAME, name)
}

/// Store form of [`marshal_dataframe`].
///
/// # Errors
/// [`EngineError::InvalidValue`] on misaligned columns,
/// [`EngineError::DataType`] when layouts diverge; store and collective
/// failures propagate.
pub fn store_dataframe(
    comm: &dyn Collective,
    store: &dyn ObjectStore,
    columns: &[(String, Column)],
    name: Option<&str>,
) -> Result<ObjectId, EngineError> {
    let rows = check_alignment(columns)?;
    exchange_dataframe_schema(comm, columns, rows as u64)?;

    let schema: Vec<serde_json::Value> = columns
        .iter()
        .map(|(name, col)| {
            serde_json::json!({ "name": name, "type": col.data_type().name() })
        })
        .collect();
    let schema_json = serde_json::Value::Array(schema).to_string();

    let meta = ObjectMeta::new(DATAFRAME_CHUNK_TYPE_NAME)
        .with_entry("rank", MetaValue::U64(u64::from(comm.spec().rank)))
        .with_entry("rows", MetaValue::U64(rows as u64))
        .with_entry("schema", MetaValue::Str(schema_json));
    let chunk_id = store.put(dataframe_body(columns, rows).freeze(), meta)?;
    group_ids_to_root(comm, store, chunk_id, DATAFRAME_TYPE_NAME, name)
}
