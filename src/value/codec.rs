//! Tagged binary encoding of [`Value`] trees, plus a sorted-key document
//! format used for persisted script state.
//!
//! Wire layout: one LEB128 varint tag followed by a payload.
//!
//! | tag | kind   | payload                                        |
//! |-----|--------|------------------------------------------------|
//! | 1   | number | 8-byte big-endian IEEE-754                      |
//! | 2   | string | varint byte length + UTF-8                      |
//! | 3   | list   | varint count + elements                         |
//! | 4   | dict   | varint count + (key, value) pairs               |
//! | 5   | struct | varint arity + fields                           |
//! | 6   | vec3   | three 8-byte big-endian doubles                 |
//! | 7   | uuid   | 16 bytes, most significant first                |
//! | 8   | text   | varint segment count + (varint color, string)   |

use std::collections::BTreeMap;

use uuid::Uuid;

use super::{DictRef, ListRef, RichText, StructRef, TextSegment, Value, Vec3};

pub const TAG_NUMBER: u32 = 1;
pub const TAG_STRING: u32 = 2;
pub const TAG_LIST: u32 = 3;
pub const TAG_DICT: u32 = 4;
pub const TAG_STRUCT: u32 = 5;
pub const TAG_VEC3: u32 = 6;
pub const TAG_UUID: u32 = 7;
pub const TAG_TEXT: u32 = 8;

/// Nesting limit for both directions; anything deeper is rejected rather
/// than recursing without bound, so whatever encodes also decodes.
pub const MAX_DEPTH: usize = 512;

const MAX_VARINT_BYTES: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("unknown value tag {tag}")]
    UnknownTag { tag: u32 },
    #[error("value of type `{type_name}` cannot be encoded")]
    Unencodable { type_name: String },
    #[error("unexpected end of input at byte {position}")]
    UnexpectedEof { position: usize },
    #[error("varint at byte {position} is longer than 5 bytes")]
    VarIntTooLong { position: usize },
    #[error("invalid UTF-8 in string at byte {position}")]
    InvalidUtf8 { position: usize },
    #[error("length {0} does not fit in a varint")]
    LengthOverflow(usize),
    #[error("nesting deeper than 512 levels")]
    TooDeep,
    #[error("{remaining} trailing bytes after value")]
    TrailingBytes { remaining: usize },
}

// ── Writing ──────────────────────────────────────────────────────

pub fn write_var_int(out: &mut Vec<u8>, mut value: u32) {
    loop {
        #[allow(clippy::cast_possible_truncation)]
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn write_len(out: &mut Vec<u8>, len: usize) -> Result<(), CodecError> {
    let len32 = u32::try_from(len).map_err(|_| CodecError::LengthOverflow(len))?;
    write_var_int(out, len32);
    Ok(())
}

fn write_f64(out: &mut Vec<u8>, n: f64) {
    out.extend_from_slice(&n.to_be_bytes());
}

fn write_string(out: &mut Vec<u8>, s: &str) -> Result<(), CodecError> {
    write_len(out, s.len())?;
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

/// Append the encoding of `value` to `out`. On error `out` may hold a
/// partial encoding.
pub fn encode_value(value: &Value, out: &mut Vec<u8>) -> Result<(), CodecError> {
    encode_at_depth(value, out, 0)
}

fn encode_at_depth(value: &Value, out: &mut Vec<u8>, depth: usize) -> Result<(), CodecError> {
    if depth > MAX_DEPTH {
        return Err(CodecError::TooDeep);
    }
    match value {
        Value::Number(n) => {
            write_var_int(out, TAG_NUMBER);
            write_f64(out, *n);
        }
        Value::String(s) => {
            write_var_int(out, TAG_STRING);
            write_string(out, s)?;
        }
        Value::List(list) => {
            let items = list.snapshot();
            write_var_int(out, TAG_LIST);
            write_len(out, items.len())?;
            for item in &items {
                encode_at_depth(item, out, depth + 1)?;
            }
        }
        Value::Dict(dict) => {
            let entries = dict.entries();
            write_var_int(out, TAG_DICT);
            write_len(out, entries.len())?;
            for (k, v) in &entries {
                encode_at_depth(k, out, depth + 1)?;
                encode_at_depth(v, out, depth + 1)?;
            }
        }
        Value::Struct(fields) => {
            let fields = fields.snapshot();
            write_var_int(out, TAG_STRUCT);
            write_len(out, fields.len())?;
            for field in &fields {
                encode_at_depth(field, out, depth + 1)?;
            }
        }
        Value::Vector(v) => {
            write_var_int(out, TAG_VEC3);
            write_f64(out, v.x);
            write_f64(out, v.y);
            write_f64(out, v.z);
        }
        Value::Uuid(u) => {
            write_var_int(out, TAG_UUID);
            out.extend_from_slice(u.as_bytes());
        }
        Value::Text(text) => {
            write_var_int(out, TAG_TEXT);
            write_len(out, text.segments().len())?;
            for seg in text.segments() {
                write_var_int(out, seg.color.map_or(0, |rgb| rgb.saturating_add(1)));
                write_string(out, &seg.content)?;
            }
        }
        Value::Extension(ext) => {
            return Err(CodecError::Unencodable {
                type_name: ext.type_name().to_string(),
            });
        }
    }
    Ok(())
}

pub fn to_bytes(value: &Value) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    encode_value(value, &mut out)?;
    Ok(out)
}

// ── Reading ──────────────────────────────────────────────────────

/// Cursor over an encoded buffer.
#[derive(Debug)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    fn read_byte(&mut self) -> Result<u8, CodecError> {
        let byte = self
            .buf
            .get(self.pos)
            .copied()
            .ok_or(CodecError::UnexpectedEof { position: self.pos })?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_exact(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or(CodecError::UnexpectedEof { position: self.buf.len() })?;
        let bytes = self
            .buf
            .get(self.pos..end)
            .ok_or(CodecError::UnexpectedEof { position: self.pos })?;
        self.pos = end;
        Ok(bytes)
    }

    pub fn read_var_int(&mut self) -> Result<u32, CodecError> {
        let start = self.pos;
        let mut value: u32 = 0;
        for i in 0..MAX_VARINT_BYTES {
            let byte = self.read_byte()?;
            value |= u32::from(byte & 0x7f) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(CodecError::VarIntTooLong { position: start })
    }

    fn read_len(&mut self) -> Result<usize, CodecError> {
        let len = self.read_var_int()?;
        usize::try_from(len).map_err(|_| CodecError::LengthOverflow(usize::MAX))
    }

    pub fn read_f64(&mut self) -> Result<f64, CodecError> {
        let bytes = self.read_exact(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(bytes);
        Ok(f64::from_be_bytes(arr))
    }

    pub fn read_string(&mut self) -> Result<String, CodecError> {
        let len = self.read_len()?;
        let start = self.pos;
        let bytes = self.read_exact(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8 { position: start })
    }

    /// Capacity hint for `count` elements, bounded by what the buffer could
    /// possibly hold so a corrupt count cannot force a huge allocation.
    fn capacity_for(&self, count: usize) -> usize {
        count.min(self.remaining())
    }
}

pub fn decode_value(reader: &mut Reader<'_>) -> Result<Value, CodecError> {
    decode_at_depth(reader, 0)
}

fn decode_at_depth(reader: &mut Reader<'_>, depth: usize) -> Result<Value, CodecError> {
    if depth > MAX_DEPTH {
        return Err(CodecError::TooDeep);
    }
    let tag = reader.read_var_int()?;
    match tag {
        TAG_NUMBER => Ok(Value::Number(reader.read_f64()?)),
        TAG_STRING => Ok(Value::String(reader.read_string()?)),
        TAG_LIST => {
            let count = reader.read_len()?;
            let mut items = Vec::with_capacity(reader.capacity_for(count));
            for _ in 0..count {
                items.push(decode_at_depth(reader, depth + 1)?);
            }
            Ok(Value::List(ListRef::from_vec(items)))
        }
        TAG_DICT => {
            let count = reader.read_len()?;
            let mut entries = Vec::with_capacity(reader.capacity_for(count));
            for _ in 0..count {
                let key = decode_at_depth(reader, depth + 1)?;
                let value = decode_at_depth(reader, depth + 1)?;
                entries.push((key, value));
            }
            Ok(Value::Dict(DictRef::from_entries(entries)))
        }
        TAG_STRUCT => {
            let arity = reader.read_len()?;
            let mut fields = Vec::with_capacity(reader.capacity_for(arity));
            for _ in 0..arity {
                fields.push(decode_at_depth(reader, depth + 1)?);
            }
            Ok(Value::Struct(StructRef::from_values(fields)))
        }
        TAG_VEC3 => {
            let x = reader.read_f64()?;
            let y = reader.read_f64()?;
            let z = reader.read_f64()?;
            Ok(Value::Vector(Vec3::new(x, y, z)))
        }
        TAG_UUID => {
            let bytes = reader.read_exact(16)?;
            let uuid = Uuid::from_slice(bytes)
                .map_err(|_| CodecError::UnexpectedEof { position: reader.pos })?;
            Ok(Value::Uuid(uuid))
        }
        TAG_TEXT => {
            let count = reader.read_len()?;
            let mut segments = Vec::with_capacity(reader.capacity_for(count));
            for _ in 0..count {
                let color = reader.read_var_int()?;
                let content = reader.read_string()?;
                segments.push(TextSegment {
                    content,
                    color: color.checked_sub(1),
                });
            }
            Ok(Value::Text(RichText::from_segments(segments)))
        }
        other => Err(CodecError::UnknownTag { tag: other }),
    }
}

/// Decode exactly one value spanning the whole buffer.
pub fn from_bytes(bytes: &[u8]) -> Result<Value, CodecError> {
    let mut reader = Reader::new(bytes);
    let value = decode_value(&mut reader)?;
    match reader.remaining() {
        0 => Ok(value),
        remaining => Err(CodecError::TrailingBytes { remaining }),
    }
}

// ── Documents ────────────────────────────────────────────────────

/// String-keyed record; keys are always written in ascending order, so
/// equal documents encode to identical bytes.
pub type Document = BTreeMap<String, Value>;

pub fn encode_document(doc: &Document) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    write_len(&mut out, doc.len())?;
    for (key, value) in doc {
        write_string(&mut out, key)?;
        encode_value(value, &mut out)?;
    }
    Ok(out)
}

pub fn decode_document(bytes: &[u8]) -> Result<Document, CodecError> {
    read_document(bytes).inspect_err(|e| {
        tracing::debug!(len = bytes.len(), error = %e, "document decode failed");
    })
}

fn read_document(bytes: &[u8]) -> Result<Document, CodecError> {
    let mut reader = Reader::new(bytes);
    let count = reader.read_len()?;
    let mut doc = Document::new();
    for _ in 0..count {
        let key = reader.read_string()?;
        let value = decode_value(&mut reader)?;
        doc.insert(key, value);
    }
    match reader.remaining() {
        0 => Ok(doc),
        remaining => Err(CodecError::TrailingBytes { remaining }),
    }
}
