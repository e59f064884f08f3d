//! CopyEncoder: serializes a sealed batch in the PostgreSQL binary COPY
//! wire format and streams it over one connection (spec §4.7).
//!
//! `tokio_postgres::binary_copy::BinaryCopyInWriter` assumes one
//! `ToSql`-typed value per fixed column; this crate's column list is
//! derived at runtime from the VCF header (an arbitrary number of typed
//! INFO/FORMAT columns, plus the range/fingerprint/audit-id columns this
//! crate synthesizes) and so the tuple framing is hand-rolled against the
//! same wire contract instead.

use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::IngestError;
use crate::header::{HeaderField, HeaderModel, StorageKind, VcfType};
use crate::rowbuild::TableRow;
use crate::typedvalue::{missing_of, Scalar, TypedValue};

const COPY_SIGNATURE: &[u8; 11] = b"PGCOPY\n\xff\r\n\0";
/// NULL is encoded as a field length of -1; there is no payload to follow.
const NULL_LENGTH: i32 = -1;

// Real PostgreSQL type OIDs, used only as the array element-type tag; no
// network round-trip depends on the exact value beyond what `COPY` expects
// to find embedded in an array header.
const OID_INT8: u32 = 20;
const OID_INT4: u32 = 23;
const OID_FLOAT8: u32 = 701;
const OID_TEXT: u32 = 25;
const OID_BOOL: u32 = 16;

/// The ordered set of typed columns a load targets, derived once from the
/// frozen [`HeaderModel`] and shared by every shard's encoder.
#[derive(Debug, Clone)]
pub struct ColumnPlan {
    pub info_fields: Vec<HeaderField>,
    pub format_fields: Vec<HeaderField>,
    pub sample_names: Vec<String>,
}

impl ColumnPlan {
    pub fn from_header(header: &HeaderModel) -> Self {
        let mut info_fields: Vec<HeaderField> = header.info_fields.values().cloned().collect();
        info_fields.sort_by(|a, b| a.id.cmp(&b.id));
        let mut format_fields: Vec<HeaderField> = header.format_fields.values().cloned().collect();
        format_fields.sort_by(|a, b| a.id.cmp(&b.id));
        Self {
            info_fields,
            format_fields,
            sample_names: header.sample_names.clone(),
        }
    }

    /// Total number of fields written per tuple: the 12 fixed core columns
    /// (chrom, pos, id, reference, alt, alt_index, is_spanning_deletion,
    /// qual, filter, position_range, fingerprint, audit_batch_id) plus one
    /// per declared INFO field plus one per (sample × FORMAT field).
    pub fn field_count(&self) -> u16 {
        (12 + self.info_fields.len() + self.sample_names.len() * self.format_fields.len()) as u16
    }
}

fn scalar_oid(vcf_type: VcfType) -> u32 {
    match vcf_type {
        VcfType::Integer => OID_INT8,
        VcfType::Float => OID_FLOAT8,
        VcfType::Character | VcfType::String => OID_TEXT,
        VcfType::Flag => OID_BOOL,
    }
}

fn write_length_prefixed(buf: &mut Vec<u8>, payload: &[u8]) {
    buf.write_i32::<BigEndian>(payload.len() as i32).unwrap();
    buf.extend_from_slice(payload);
}

fn write_null(buf: &mut Vec<u8>) {
    buf.write_i32::<BigEndian>(NULL_LENGTH).unwrap();
}

fn write_text_field(buf: &mut Vec<u8>, text: Option<&str>) {
    match text {
        Some(s) => write_length_prefixed(buf, s.as_bytes()),
        None => write_null(buf),
    }
}

fn write_int8_field(buf: &mut Vec<u8>, value: Option<i64>) {
    match value {
        Some(v) => {
            let mut payload = Vec::with_capacity(8);
            payload.write_i64::<BigEndian>(v).unwrap();
            write_length_prefixed(buf, &payload);
        }
        None => write_null(buf),
    }
}

fn write_int4_field(buf: &mut Vec<u8>, value: i32) {
    let mut payload = Vec::with_capacity(4);
    payload.write_i32::<BigEndian>(value).unwrap();
    write_length_prefixed(buf, &payload);
}

fn write_float8_field(buf: &mut Vec<u8>, value: Option<f64>) -> Result<(), IngestError> {
    match value {
        Some(v) => {
            if v.is_nan() || v.is_infinite() {
                return Err(IngestError::Encoding(format!(
                    "non-finite float value {v} is outside the declared domain"
                )));
            }
            let mut payload = Vec::with_capacity(8);
            payload.write_f64::<BigEndian>(v).unwrap();
            write_length_prefixed(buf, &payload);
        }
        None => write_null(buf),
    }
    Ok(())
}

fn write_bool_field(buf: &mut Vec<u8>, value: bool) {
    write_length_prefixed(buf, &[if value { 0x01 } else { 0x00 }]);
}

fn write_uuid_field(buf: &mut Vec<u8>, value: uuid::Uuid) {
    write_length_prefixed(buf, value.as_bytes());
}

/// Range over int8: flags byte (bit0 inclusive-lower, bit1 inclusive-upper,
/// bit2 empty), then lower and upper each with their own length prefix.
fn write_range_field(buf: &mut Vec<u8>, lower: i64, upper: i64) -> Result<(), IngestError> {
    if upper < lower {
        return Err(IngestError::Encoding(format!(
            "range upper bound {upper} precedes lower bound {lower}"
        )));
    }
    let flags: u8 = 0b001; // inclusive-lower, exclusive-upper, not empty
    let mut payload = Vec::with_capacity(1 + 4 + 8 + 4 + 8);
    payload.push(flags);
    payload.write_i32::<BigEndian>(8).unwrap();
    payload.write_i64::<BigEndian>(lower).unwrap();
    payload.write_i32::<BigEndian>(8).unwrap();
    payload.write_i64::<BigEndian>(upper).unwrap();
    write_length_prefixed(buf, &payload);
    Ok(())
}

fn scalar_bytes(scalar: &Scalar) -> Result<Option<Vec<u8>>, IngestError> {
    Ok(match scalar {
        Scalar::Integer(None) => None,
        Scalar::Integer(Some(v)) => {
            let mut payload = Vec::with_capacity(8);
            payload.write_i64::<BigEndian>(*v).unwrap();
            Some(payload)
        }
        Scalar::Float(None) => None,
        Scalar::Float(Some(v)) => {
            if v.is_nan() || v.is_infinite() {
                return Err(IngestError::Encoding(format!(
                    "non-finite float value {v} is outside the declared domain"
                )));
            }
            let mut payload = Vec::with_capacity(8);
            payload.write_f64::<BigEndian>(*v).unwrap();
            Some(payload)
        }
        Scalar::Character(None) | Scalar::Str(None) => None,
        Scalar::Character(Some(c)) => Some(c.to_string().into_bytes()),
        Scalar::Str(Some(s)) => Some(s.clone().into_bytes()),
    })
}

fn write_scalar_value(buf: &mut Vec<u8>, scalar: &Scalar) -> Result<(), IngestError> {
    match scalar_bytes(scalar)? {
        Some(bytes) => write_length_prefixed(buf, &bytes),
        None => write_null(buf),
    }
    Ok(())
}

/// Standard 1-dimensional array header (ndim=1, has-null flag, element
/// type OID, dimension length, lower bound=1), followed by each element's
/// own length-prefixed encoding (NULL elements use length -1 in place).
fn write_array_value(buf: &mut Vec<u8>, elements: &[Scalar], vcf_type: VcfType) -> Result<(), IngestError> {
    let mut payload = Vec::new();
    let has_null = elements.iter().any(|s| scalar_bytes(s).map(|b| b.is_none()).unwrap_or(false));
    payload.write_i32::<BigEndian>(1).unwrap(); // ndim
    payload.write_i32::<BigEndian>(if has_null { 1 } else { 0 }).unwrap();
    payload.write_u32::<BigEndian>(scalar_oid(vcf_type)).unwrap();
    payload.write_i32::<BigEndian>(elements.len() as i32).unwrap();
    payload.write_i32::<BigEndian>(1).unwrap(); // lower bound
    for scalar in elements {
        match scalar_bytes(scalar)? {
            Some(bytes) => {
                payload.write_i32::<BigEndian>(bytes.len() as i32).unwrap();
                payload.extend_from_slice(&bytes);
            }
            None => {
                payload.write_i32::<BigEndian>(NULL_LENGTH).unwrap();
            }
        }
    }
    write_length_prefixed(buf, &payload);
    Ok(())
}

fn write_text_array(buf: &mut Vec<u8>, values: &[String]) {
    let mut payload = Vec::new();
    payload.write_i32::<BigEndian>(1).unwrap();
    payload.write_i32::<BigEndian>(0).unwrap();
    payload.write_u32::<BigEndian>(OID_TEXT).unwrap();
    payload.write_i32::<BigEndian>(values.len() as i32).unwrap();
    payload.write_i32::<BigEndian>(1).unwrap();
    for value in values {
        payload.write_i32::<BigEndian>(value.len() as i32).unwrap();
        payload.extend_from_slice(value.as_bytes());
    }
    write_length_prefixed(buf, &payload);
}

fn write_typed_value(buf: &mut Vec<u8>, value: &TypedValue, vcf_type: VcfType) -> Result<(), IngestError> {
    match value {
        TypedValue::Flag(b) => write_bool_field(buf, *b),
        TypedValue::Scalar(scalar) => write_scalar_value(buf, scalar)?,
        TypedValue::Array(elements) => write_array_value(buf, elements, vcf_type)?,
    }
    Ok(())
}

fn field_for<'a>(
    map: &'a indexmap::IndexMap<String, TypedValue>,
    field: &HeaderField,
) -> TypedValue {
    map.get(&field.id)
        .cloned()
        .unwrap_or_else(|| match field.storage_kind {
            StorageKind::Flag => TypedValue::Flag(false),
            StorageKind::Scalar => TypedValue::missing_scalar(field.vcf_type),
            StorageKind::Array => TypedValue::Array(vec![]),
        })
}

/// Encodes one [`TableRow`] into its wire tuple. `plan` must come from the
/// same [`HeaderModel`] the row's `info`/`samples` maps were projected
/// against.
pub fn encode_tuple(row: &TableRow, plan: &ColumnPlan) -> Result<Vec<u8>, IngestError> {
    let mut buf = Vec::new();
    buf.write_i16::<BigEndian>(plan.field_count() as i16).unwrap();

    write_text_field(&mut buf, Some(&row.chrom));
    write_int8_field(&mut buf, Some(row.pos));
    write_text_field(&mut buf, row.id.as_deref());
    write_text_field(&mut buf, Some(&row.reference));
    write_text_field(&mut buf, Some(&row.alt));
    write_int4_field(&mut buf, row.alt_index);
    write_bool_field(&mut buf, row.is_spanning_deletion);
    write_float8_field(&mut buf, row.qual)?;
    write_text_array(&mut buf, &row.filter);
    write_range_field(&mut buf, row.position_range.lower, row.position_range.upper)?;
    write_text_field(&mut buf, Some(&row.fingerprint));
    write_uuid_field(&mut buf, row.audit_batch_id);

    for field in &plan.info_fields {
        let value = field_for(&row.info, field);
        write_typed_value(&mut buf, &value, field.vcf_type)?;
    }
    for sample in &row.samples {
        for field in &plan.format_fields {
            let value = field_for(sample, field);
            write_typed_value(&mut buf, &value, field.vcf_type)?;
        }
    }

    Ok(buf)
}

/// Writes the fixed COPY stream header: signature, flags (0), header
/// extension length (0).
pub async fn write_header<W: AsyncWrite + Unpin>(sink: &mut W) -> Result<(), IngestError> {
    let mut buf = Vec::with_capacity(19);
    buf.extend_from_slice(COPY_SIGNATURE);
    buf.write_i32::<BigEndian>(0).unwrap(); // flags
    buf.write_i32::<BigEndian>(0).unwrap(); // header extension length
    sink.write_all(&buf).await.map_err(IngestError::Io)
}

/// Writes the trailer marker: a tuple field count of -1.
pub async fn write_trailer<W: AsyncWrite + Unpin>(sink: &mut W) -> Result<(), IngestError> {
    let mut buf = Vec::with_capacity(2);
    buf.write_i16::<BigEndian>(-1).unwrap();
    sink.write_all(&buf).await.map_err(IngestError::Io)
}

/// Encodes and writes every row of `rows` to `sink`, framed between a COPY
/// header and trailer. Encoding itself is synchronous; only the writes to
/// `sink` suspend (spec §5 suspension-point contract).
pub async fn encode_batch<W: AsyncWrite + Unpin>(
    sink: &mut W,
    rows: &[TableRow],
    plan: &ColumnPlan,
) -> Result<(), IngestError> {
    write_header(sink).await?;
    for row in rows {
        let tuple = encode_tuple(row, plan)?;
        sink.write_all(&tuple).await.map_err(IngestError::Io)?;
    }
    write_trailer(sink).await
}

/// One decoded wire tuple, column-by-column, mirroring [`TableRow`]'s shape
/// closely enough to check a round-trip (spec §8 testable property 7:
/// "decode(encode(batch)) equals batch column-by-column, null-for-null").
/// Not used by the write path.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRow {
    pub chrom: String,
    pub pos: i64,
    pub id: Option<String>,
    pub reference: String,
    pub alt: String,
    pub alt_index: i32,
    pub is_spanning_deletion: bool,
    pub qual: Option<f64>,
    pub filter: Vec<String>,
    pub position_range: (i64, i64),
    pub fingerprint: String,
    pub audit_batch_id: uuid::Uuid,
    pub info: indexmap::IndexMap<String, TypedValue>,
    pub samples: Vec<indexmap::IndexMap<String, TypedValue>>,
}

fn io_err(e: std::io::Error) -> IngestError {
    IngestError::Encoding(e.to_string())
}

fn read_field(cur: &mut Cursor<&[u8]>) -> Result<Option<Vec<u8>>, IngestError> {
    let len = cur.read_i32::<BigEndian>().map_err(io_err)?;
    if len == NULL_LENGTH {
        return Ok(None);
    }
    let mut buf = vec![0u8; len as usize];
    cur.read_exact(&mut buf).map_err(io_err)?;
    Ok(Some(buf))
}

fn decode_text_field(cur: &mut Cursor<&[u8]>) -> Result<Option<String>, IngestError> {
    Ok(read_field(cur)?.map(|b| String::from_utf8_lossy(&b).into_owned()))
}

fn decode_int8_field(cur: &mut Cursor<&[u8]>) -> Result<Option<i64>, IngestError> {
    match read_field(cur)? {
        Some(bytes) => Ok(Some(Cursor::new(bytes.as_slice()).read_i64::<BigEndian>().map_err(io_err)?)),
        None => Ok(None),
    }
}

fn decode_int4_field(cur: &mut Cursor<&[u8]>) -> Result<i32, IngestError> {
    let bytes = read_field(cur)?
        .ok_or_else(|| IngestError::Encoding("unexpected NULL for non-nullable int4 field".into()))?;
    Cursor::new(bytes.as_slice()).read_i32::<BigEndian>().map_err(io_err)
}

fn decode_float8_field(cur: &mut Cursor<&[u8]>) -> Result<Option<f64>, IngestError> {
    match read_field(cur)? {
        Some(bytes) => Ok(Some(Cursor::new(bytes.as_slice()).read_f64::<BigEndian>().map_err(io_err)?)),
        None => Ok(None),
    }
}

fn decode_bool_field(cur: &mut Cursor<&[u8]>) -> Result<bool, IngestError> {
    let bytes = read_field(cur)?
        .ok_or_else(|| IngestError::Encoding("unexpected NULL for non-nullable bool field".into()))?;
    Ok(bytes.first().copied().unwrap_or(0) != 0)
}

fn decode_uuid_field(cur: &mut Cursor<&[u8]>) -> Result<uuid::Uuid, IngestError> {
    let bytes = read_field(cur)?
        .ok_or_else(|| IngestError::Encoding("unexpected NULL for non-nullable uuid field".into()))?;
    uuid::Uuid::from_slice(&bytes).map_err(|e| IngestError::Encoding(e.to_string()))
}

fn decode_range_field(cur: &mut Cursor<&[u8]>) -> Result<(i64, i64), IngestError> {
    let bytes = read_field(cur)?
        .ok_or_else(|| IngestError::Encoding("unexpected NULL for non-nullable range field".into()))?;
    let mut inner = Cursor::new(bytes.as_slice());
    let _flags = inner.read_u8().map_err(io_err)?;
    let lower_len = inner.read_i32::<BigEndian>().map_err(io_err)?;
    let lower = inner.read_i64::<BigEndian>().map_err(io_err)?;
    debug_assert_eq!(lower_len, 8);
    let upper_len = inner.read_i32::<BigEndian>().map_err(io_err)?;
    let upper = inner.read_i64::<BigEndian>().map_err(io_err)?;
    debug_assert_eq!(upper_len, 8);
    Ok((lower, upper))
}

fn read_array_header(inner: &mut Cursor<&[u8]>) -> Result<i32, IngestError> {
    let _ndim = inner.read_i32::<BigEndian>().map_err(io_err)?;
    let _has_null = inner.read_i32::<BigEndian>().map_err(io_err)?;
    let _oid = inner.read_u32::<BigEndian>().map_err(io_err)?;
    let len = inner.read_i32::<BigEndian>().map_err(io_err)?;
    let _lower_bound = inner.read_i32::<BigEndian>().map_err(io_err)?;
    Ok(len)
}

fn decode_text_array(cur: &mut Cursor<&[u8]>) -> Result<Vec<String>, IngestError> {
    let bytes = read_field(cur)?
        .ok_or_else(|| IngestError::Encoding("unexpected NULL for non-nullable text array field".into()))?;
    let mut inner = Cursor::new(bytes.as_slice());
    let len = read_array_header(&mut inner)?;
    let mut values = Vec::with_capacity(len.max(0) as usize);
    for _ in 0..len {
        let elem_len = inner.read_i32::<BigEndian>().map_err(io_err)?;
        let mut buf = vec![0u8; elem_len as usize];
        inner.read_exact(&mut buf).map_err(io_err)?;
        values.push(String::from_utf8_lossy(&buf).into_owned());
    }
    Ok(values)
}

fn decode_scalar_bytes(buf: &[u8], vcf_type: VcfType) -> Result<Scalar, IngestError> {
    Ok(match vcf_type {
        VcfType::Integer => Scalar::Integer(Some(Cursor::new(buf).read_i64::<BigEndian>().map_err(io_err)?)),
        VcfType::Float => Scalar::Float(Some(Cursor::new(buf).read_f64::<BigEndian>().map_err(io_err)?)),
        VcfType::Character => Scalar::Character(String::from_utf8_lossy(buf).chars().next()),
        VcfType::String | VcfType::Flag => Scalar::Str(Some(String::from_utf8_lossy(buf).into_owned())),
    })
}

fn decode_scalar_value(cur: &mut Cursor<&[u8]>, vcf_type: VcfType) -> Result<Scalar, IngestError> {
    match read_field(cur)? {
        Some(bytes) => decode_scalar_bytes(&bytes, vcf_type),
        None => Ok(missing_of(vcf_type)),
    }
}

fn decode_array_value(cur: &mut Cursor<&[u8]>, vcf_type: VcfType) -> Result<Vec<Scalar>, IngestError> {
    let bytes = read_field(cur)?
        .ok_or_else(|| IngestError::Encoding("unexpected NULL for non-nullable array field".into()))?;
    let mut inner = Cursor::new(bytes.as_slice());
    let len = read_array_header(&mut inner)?;
    let mut out = Vec::with_capacity(len.max(0) as usize);
    for _ in 0..len {
        let elem_len = inner.read_i32::<BigEndian>().map_err(io_err)?;
        if elem_len == NULL_LENGTH {
            out.push(missing_of(vcf_type));
        } else {
            let mut buf = vec![0u8; elem_len as usize];
            inner.read_exact(&mut buf).map_err(io_err)?;
            out.push(decode_scalar_bytes(&buf, vcf_type)?);
        }
    }
    Ok(out)
}

fn decode_typed_value(
    cur: &mut Cursor<&[u8]>,
    vcf_type: VcfType,
    storage_kind: StorageKind,
) -> Result<TypedValue, IngestError> {
    Ok(match storage_kind {
        StorageKind::Flag => TypedValue::Flag(decode_bool_field(cur)?),
        StorageKind::Scalar => TypedValue::Scalar(decode_scalar_value(cur, vcf_type)?),
        StorageKind::Array => TypedValue::Array(decode_array_value(cur, vcf_type)?),
    })
}

/// Decodes one tuple body, assuming the field-count prefix has already been
/// read and validated against `plan.field_count()` by the caller.
fn decode_row_body(cur: &mut Cursor<&[u8]>, plan: &ColumnPlan) -> Result<DecodedRow, IngestError> {
    let chrom =
        decode_text_field(cur)?.ok_or_else(|| IngestError::Encoding("chrom must not be NULL".into()))?;
    let pos = decode_int8_field(cur)?.ok_or_else(|| IngestError::Encoding("pos must not be NULL".into()))?;
    let id = decode_text_field(cur)?;
    let reference =
        decode_text_field(cur)?.ok_or_else(|| IngestError::Encoding("reference must not be NULL".into()))?;
    let alt = decode_text_field(cur)?.ok_or_else(|| IngestError::Encoding("alt must not be NULL".into()))?;
    let alt_index = decode_int4_field(cur)?;
    let is_spanning_deletion = decode_bool_field(cur)?;
    let qual = decode_float8_field(cur)?;
    let filter = decode_text_array(cur)?;
    let position_range = decode_range_field(cur)?;
    let fingerprint =
        decode_text_field(cur)?.ok_or_else(|| IngestError::Encoding("fingerprint must not be NULL".into()))?;
    let audit_batch_id = decode_uuid_field(cur)?;

    let mut info = indexmap::IndexMap::new();
    for field in &plan.info_fields {
        let value = decode_typed_value(cur, field.vcf_type, field.storage_kind)?;
        info.insert(field.id.clone(), value);
    }

    let mut samples = Vec::with_capacity(plan.sample_names.len());
    for _ in &plan.sample_names {
        let mut sample = indexmap::IndexMap::new();
        for field in &plan.format_fields {
            let value = decode_typed_value(cur, field.vcf_type, field.storage_kind)?;
            sample.insert(field.id.clone(), value);
        }
        samples.push(sample);
    }

    Ok(DecodedRow {
        chrom,
        pos,
        id,
        reference,
        alt,
        alt_index,
        is_spanning_deletion,
        qual,
        filter,
        position_range,
        fingerprint,
        audit_batch_id,
        info,
        samples,
    })
}

/// Decodes one standalone wire tuple (as produced by [`encode_tuple`]),
/// including its field-count prefix.
pub fn decode_tuple(bytes: &[u8], plan: &ColumnPlan) -> Result<DecodedRow, IngestError> {
    let mut cur = Cursor::new(bytes);
    let field_count = cur.read_i16::<BigEndian>().map_err(io_err)?;
    if field_count as u16 != plan.field_count() {
        return Err(IngestError::Encoding(format!(
            "tuple declares {field_count} fields, plan expects {}",
            plan.field_count()
        )));
    }
    decode_row_body(&mut cur, plan)
}

/// Decodes a full COPY stream (signature, header extension, tuples,
/// trailer) as produced by [`encode_batch`], the inverse of the encode
/// path (spec §8 testable property 7: binary-COPY round-trip).
pub fn decode_batch(bytes: &[u8], plan: &ColumnPlan) -> Result<Vec<DecodedRow>, IngestError> {
    let mut cur = Cursor::new(bytes);
    let mut signature = [0u8; 11];
    cur.read_exact(&mut signature).map_err(io_err)?;
    if &signature != COPY_SIGNATURE {
        return Err(IngestError::Encoding("missing COPY signature".into()));
    }
    let _flags = cur.read_i32::<BigEndian>().map_err(io_err)?;
    let header_ext_len = cur.read_i32::<BigEndian>().map_err(io_err)?;
    if header_ext_len != 0 {
        let mut skip = vec![0u8; header_ext_len as usize];
        cur.read_exact(&mut skip).map_err(io_err)?;
    }

    let mut rows = Vec::new();
    loop {
        let field_count = cur.read_i16::<BigEndian>().map_err(io_err)?;
        if field_count == -1 {
            break;
        }
        if field_count as u16 != plan.field_count() {
            return Err(IngestError::Encoding(format!(
                "tuple declares {field_count} fields, plan expects {}",
                plan.field_count()
            )));
        }
        rows.push(decode_row_body(&mut cur, plan)?);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rowbuild::PositionRange;
    use indexmap::IndexMap;
    use std::io::Cursor;

    fn header_with(extra: &str) -> HeaderModel {
        let text = format!(
            "##fileformat=VCFv4.2\n{extra}#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n"
        );
        let mut cursor = Cursor::new(text.into_bytes());
        HeaderModel::parse(&mut cursor).unwrap()
    }

    fn header_with_samples(extra: &str, samples: &[&str]) -> HeaderModel {
        let text = format!(
            "##fileformat=VCFv4.2\n{extra}#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\t{}\n",
            samples.join("\t")
        );
        let mut cursor = Cursor::new(text.into_bytes());
        HeaderModel::parse(&mut cursor).unwrap()
    }

    fn plain_row() -> TableRow {
        TableRow {
            chrom: "chr1".to_string(),
            pos: 100,
            id: None,
            reference: "A".to_string(),
            alt: "G".to_string(),
            alt_index: 1,
            is_spanning_deletion: false,
            qual: Some(50.0),
            filter: vec!["PASS".to_string()],
            info: IndexMap::new(),
            samples: vec![],
            position_range: PositionRange { lower: 100, upper: 101 },
            fingerprint: "deadbeef".to_string(),
            audit_batch_id: uuid::Uuid::nil(),
        }
    }

    #[test]
    fn tuple_field_count_matches_plan() {
        let header = header_with("##INFO=<ID=AC,Number=A,Type=Integer,Description=\"d\">\n");
        let plan = ColumnPlan::from_header(&header);
        assert_eq!(plan.field_count(), 13); // 12 core + 1 info, no samples

        let tuple = encode_tuple(&plain_row(), &plan).unwrap();
        let field_count = i16::from_be_bytes([tuple[0], tuple[1]]);
        assert_eq!(field_count, 13);
    }

    #[test]
    fn null_qual_encodes_as_negative_one_length() {
        let header = header_with("");
        let plan = ColumnPlan::from_header(&header);
        let mut row = plain_row();
        row.qual = None;
        let tuple = encode_tuple(&row, &plan).unwrap();
        // locate qual's length prefix: field count(2) + chrom(4+4) + pos(4+8)
        // + id(4, null) + ref(4+1) + alt(4+1) + alt_index(4+4) + flag(4+1)
        let mut offset = 2;
        offset += 4 + row.chrom.len(); // chrom
        offset += 4 + 8; // pos
        offset += 4; // id (null, no payload)
        offset += 4 + row.reference.len();
        offset += 4 + row.alt.len();
        offset += 4 + 4; // alt_index
        offset += 4 + 1; // is_spanning_deletion
        let qual_len = i32::from_be_bytes(tuple[offset..offset + 4].try_into().unwrap());
        assert_eq!(qual_len, -1);
    }

    #[test]
    fn nan_qual_is_rejected_as_encoding_error() {
        let header = header_with("");
        let plan = ColumnPlan::from_header(&header);
        let mut row = plain_row();
        row.qual = Some(f64::NAN);
        let err = encode_tuple(&row, &plan).unwrap_err();
        assert!(matches!(err, IngestError::Encoding(_)));
    }

    #[tokio::test]
    async fn encode_batch_writes_header_rows_and_trailer() {
        let header = header_with("");
        let plan = ColumnPlan::from_header(&header);
        let mut out = Vec::new();
        encode_batch(&mut out, &[plain_row(), plain_row()], &plan).await.unwrap();
        assert_eq!(&out[0..11], COPY_SIGNATURE);
        assert_eq!(&out[out.len() - 2..], &(-1i16).to_be_bytes());
    }

    #[test]
    fn decode_tuple_matches_encoded_core_columns() {
        let header = header_with("");
        let plan = ColumnPlan::from_header(&header);
        let mut row = plain_row();
        row.id = Some("rs123".to_string());
        row.filter = vec!["PASS".to_string(), "q10".to_string()];

        let tuple = encode_tuple(&row, &plan).unwrap();
        let decoded = decode_tuple(&tuple, &plan).unwrap();

        assert_eq!(decoded.chrom, row.chrom);
        assert_eq!(decoded.pos, row.pos);
        assert_eq!(decoded.id, row.id);
        assert_eq!(decoded.reference, row.reference);
        assert_eq!(decoded.alt, row.alt);
        assert_eq!(decoded.alt_index, row.alt_index);
        assert_eq!(decoded.is_spanning_deletion, row.is_spanning_deletion);
        assert_eq!(decoded.qual, row.qual);
        assert_eq!(decoded.filter, row.filter);
        assert_eq!(
            decoded.position_range,
            (row.position_range.lower, row.position_range.upper)
        );
        assert_eq!(decoded.fingerprint, row.fingerprint);
        assert_eq!(decoded.audit_batch_id, row.audit_batch_id);
    }

    #[test]
    fn decode_tuple_preserves_null_for_null() {
        let header = header_with("");
        let plan = ColumnPlan::from_header(&header);
        let mut row = plain_row();
        row.id = None;
        row.qual = None;

        let tuple = encode_tuple(&row, &plan).unwrap();
        let decoded = decode_tuple(&tuple, &plan).unwrap();

        assert_eq!(decoded.id, None);
        assert_eq!(decoded.qual, None);
    }

    #[test]
    fn decode_tuple_rejects_field_count_mismatch() {
        let header = header_with("");
        let plan = ColumnPlan::from_header(&header);
        let tuple = encode_tuple(&plain_row(), &plan).unwrap();

        let other_header = header_with("##INFO=<ID=AC,Number=A,Type=Integer,Description=\"d\">\n");
        let other_plan = ColumnPlan::from_header(&other_header);
        let err = decode_tuple(&tuple, &other_plan).unwrap_err();
        assert!(matches!(err, IngestError::Encoding(_)));
    }

    #[tokio::test]
    async fn round_trip_decode_matches_encoded_batch_column_by_column() {
        let header = header_with_samples(
            "##INFO=<ID=AC,Number=A,Type=Integer,Description=\"d\">\n\
             ##INFO=<ID=DB,Number=0,Type=Flag,Description=\"d\">\n\
             ##FORMAT=<ID=GT,Number=1,Type=String,Description=\"d\">\n",
            &["NA001", "NA002"],
        );
        let plan = ColumnPlan::from_header(&header);

        let mut present_info = IndexMap::new();
        present_info.insert("AC".to_string(), TypedValue::Array(vec![Scalar::Integer(Some(3))]));
        present_info.insert("DB".to_string(), TypedValue::Flag(true));

        let mut missing_info = IndexMap::new();
        missing_info.insert("AC".to_string(), TypedValue::Array(vec![Scalar::Integer(None)]));
        missing_info.insert("DB".to_string(), TypedValue::Flag(false));

        let mut sample1 = IndexMap::new();
        sample1.insert("GT".to_string(), TypedValue::Scalar(Scalar::Str(Some("0/1".to_string()))));
        let mut sample2 = IndexMap::new();
        sample2.insert("GT".to_string(), TypedValue::Scalar(Scalar::Str(None)));

        let mut row_a = plain_row();
        row_a.info = present_info;
        row_a.samples = vec![sample1, sample2];

        let mut row_b = plain_row();
        row_b.chrom = "chr2".to_string();
        row_b.id = None;
        row_b.qual = None;
        row_b.filter = vec![];
        row_b.info = missing_info;
        row_b.samples = vec![IndexMap::new(), IndexMap::new()];

        let rows = vec![row_a.clone(), row_b.clone()];
        let mut out = Vec::new();
        encode_batch(&mut out, &rows, &plan).await.unwrap();

        let decoded = decode_batch(&out, &plan).unwrap();
        assert_eq!(decoded.len(), 2);

        for (original, got) in rows.iter().zip(decoded.iter()) {
            assert_eq!(got.chrom, original.chrom);
            assert_eq!(got.id, original.id);
            assert_eq!(got.qual, original.qual);
            assert_eq!(got.filter, original.filter);
            for field in &plan.info_fields {
                let expected = field_for(&original.info, field);
                assert_eq!(got.info.get(&field.id), Some(&expected));
            }
            for (sample_expected, sample_got) in original.samples.iter().zip(got.samples.iter()) {
                for field in &plan.format_fields {
                    let expected = field_for(sample_expected, field);
                    assert_eq!(sample_got.get(&field.id), Some(&expected));
                }
            }
        }
    }
}
