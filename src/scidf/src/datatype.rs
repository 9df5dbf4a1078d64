//! Datatype subsystem:
//! the class/size/byte-order recipe for interpreting raw element
//! bytes, plus the encode/decode functions that turn those bytes
//! into [`crate::Value`]s and back.

use crate::io::{ByteReader, ByteWriter, Endian, Width};
use crate::{Error, Result, Value};
use std::io::{Read, Seek, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringPadding {
    NullTerminate,
    NullPad,
    SpacePad,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charset {
    Ascii,
    Utf8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompoundMember {
    pub name: String,
    pub offset: u32,
    pub datatype: Datatype,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VarLenKind {
    String { charset: Charset, padding: StringPadding },
    Sequence { base: Box<Datatype> },
}

/// One datatype message payload. `size` is
/// always the on-disk element size in bytes and is never zero.
#[derive(Debug, Clone, PartialEq)]
pub enum Datatype {
    FixedPoint {
        size: u32,
        order: Endian,
        signed: bool,
        bit_offset: u16,
        bit_precision: u16,
    },
    Float {
        size: u32,
        order: Endian,
        sign_bit: u16,
        exponent_location: u16,
        exponent_size: u16,
        mantissa_location: u16,
        mantissa_size: u16,
    },
    FixedString {
        size: u32,
        padding: StringPadding,
        charset: Charset,
    },
    VarLen {
        size: u32,
        kind: VarLenKind,
    },
    Compound {
        size: u32,
        members: Vec<CompoundMember>,
    },
    Array {
        size: u32,
        dims: Vec<u32>,
        base: Box<Datatype>,
    },
    Enum {
        size: u32,
        base: Box<Datatype>,
        members: Vec<(String, i64)>,
    },
    Bitfield {
        size: u32,
        order: Endian,
    },
    Opaque {
        size: u32,
        tag: String,
    },
}

impl Datatype {
    pub fn size(&self) -> u32 {
        match self {
            Datatype::FixedPoint { size, .. }
            | Datatype::Float { size, .. }
            | Datatype::FixedString { size, .. }
            | Datatype::VarLen { size, .. }
            | Datatype::Compound { size, .. }
            | Datatype::Array { size, .. }
            | Datatype::Enum { size, .. }
            | Datatype::Bitfield { size, .. }
            | Datatype::Opaque { size, .. } => *size,
        }
    }

    pub fn i32_le() -> Datatype {
        Datatype::FixedPoint {
            size: 4,
            order: Endian::Little,
            signed: true,
            bit_offset: 0,
            bit_precision: 32,
        }
    }

    pub fn i64_le() -> Datatype {
        Datatype::FixedPoint {
            size: 8,
            order: Endian::Little,
            signed: true,
            bit_offset: 0,
            bit_precision: 64,
        }
    }

    pub fn f64_le() -> Datatype {
        Datatype::Float {
            size: 8,
            order: Endian::Little,
            sign_bit: 63,
            exponent_location: 52,
            exponent_size: 11,
            mantissa_location: 0,
            mantissa_size: 52,
        }
    }

    pub fn f32_le() -> Datatype {
        Datatype::Float {
            size: 4,
            order: Endian::Little,
            sign_bit: 31,
            exponent_location: 23,
            exponent_size: 8,
            mantissa_location: 0,
            mantissa_size: 23,
        }
    }

    pub fn fixed_string(size: u32, padding: StringPadding) -> Datatype {
        Datatype::FixedString {
            size,
            padding,
            charset: Charset::Utf8,
        }
    }

    pub fn varlen_string() -> Datatype {
        Datatype::VarLen {
            size: 16, // global heap id: length(4) + offset + index(4), widest case
            kind: VarLenKind::String {
                charset: Charset::Utf8,
                padding: StringPadding::NullTerminate,
            },
        }
    }

    /// Structural validation: size > 0,
    /// compound members have distinct names and don't overlap, array
    /// has a non-empty dims list.
    pub fn validate(&self) -> Result<()> {
        if self.size() == 0 {
            return Err(Error::invalid("datatype size must be > 0"));
        }
        match self {
            Datatype::Compound { size, members } => {
                let mut names = std::collections::HashSet::new();
                let mut ranges: Vec<(u32, u32)> = Vec::new();
                for m in members {
                    if !names.insert(&m.name) {
                        return Err(Error::invalid(format!(
                            "duplicate compound member name {:?}",
                            m.name
                        )));
                    }
                    let end = m.offset + m.datatype.size();
                    if end > *size {
                        return Err(Error::invalid("compound member exceeds declared size"));
                    }
                    for (s, e) in &ranges {
                        if m.offset < *e && *s < end {
                            return Err(Error::invalid(format!(
                                "compound member {:?} overlaps another member",
                                m.name
                            )));
                        }
                    }
                    ranges.push((m.offset, end));
                    m.datatype.validate()?;
                }
                Ok(())
            }
            Datatype::Array { dims, base, .. } => {
                if dims.is_empty() {
                    return Err(Error::invalid("array datatype must have a non-empty dims list"));
                }
                base.validate()
            }
            Datatype::VarLen { kind: VarLenKind::Sequence { base }, .. } => base.validate(),
            _ => Ok(()),
        }
    }

    /// Fast-path eligibility: verbatim byte copy is valid
    /// only for little-endian fixed-point/float types whose declared
    /// size matches the native Rust type.
    fn fast_path_width(&self) -> Option<usize> {
        match self {
            Datatype::FixedPoint { size, order: Endian::Little, .. }
            | Datatype::Float { size, order: Endian::Little, .. } => match size {
                1 | 2 | 4 | 8 => Some(*size as usize),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn parse<R: Read + Seek>(reader: &mut ByteReader<R>) -> Result<Datatype> {
        let class_and_version = reader.read_u8()?;
        let version = class_and_version >> 4;
        let class_id = class_and_version & 0x0F;
        if !(1..=3).contains(&version) {
            return Err(Error::UnsupportedVersion(version));
        }
        let flag_bytes = reader.read_exact_bytes(3)?;
        let size = reader.read_u32(Endian::Little)?;

        match class_id {
            0 => {
                let order = if flag_bytes[0] & 0x01 != 0 { Endian::Big } else { Endian::Little };
                let signed = flag_bytes[0] & 0x08 != 0;
                let bit_offset = reader.read_u16(Endian::Little)?;
                let bit_precision = reader.read_u16(Endian::Little)?;
                Ok(Datatype::FixedPoint { size, order, signed, bit_offset, bit_precision })
            }
            1 => {
                let order = if flag_bytes[0] & 0x01 != 0 { Endian::Big } else { Endian::Little };
                reader.read_u16(Endian::Little)?; // bit offset (unused here)
                reader.read_u16(Endian::Little)?; // bit precision (unused here)
                let exponent_location = reader.read_u8()? as u16;
                let exponent_size = reader.read_u8()? as u16;
                let mantissa_location = reader.read_u8()? as u16;
                let mantissa_size = reader.read_u8()? as u16;
                reader.read_u32(Endian::Little)?; // exponent bias (IEEE biasing assumed)
                let sign_bit = (size * 8 - 1) as u16;
                Ok(Datatype::Float {
                    size, order, sign_bit, exponent_location, exponent_size,
                    mantissa_location, mantissa_size,
                })
            }
            3 => {
                let padding = match flag_bytes[0] & 0x0F {
                    0 => StringPadding::NullTerminate,
                    1 => StringPadding::NullPad,
                    2 => StringPadding::SpacePad,
                    other => return Err(Error::corrupt(format!("unknown string padding {other}"))),
                };
                let charset = match (flag_bytes[0] >> 4) & 0x0F {
                    0 => Charset::Ascii,
                    1 => Charset::Utf8,
                    other => return Err(Error::corrupt(format!("unknown charset {other}"))),
                };
                Ok(Datatype::FixedString { size, padding, charset })
            }
            9 => {
                let is_string = flag_bytes[0] & 0x0F == 1;
                if is_string {
                    let padding = match (flag_bytes[0] >> 4) & 0x0F {
                        0 => StringPadding::NullTerminate,
                        1 => StringPadding::NullPad,
                        2 => StringPadding::SpacePad,
                        other => return Err(Error::corrupt(format!("unknown string padding {other}"))),
                    };
                    let charset = match flag_bytes[1] & 0x0F {
                        0 => Charset::Ascii,
                        1 => Charset::Utf8,
                        other => return Err(Error::corrupt(format!("unknown charset {other}"))),
                    };
                    Ok(Datatype::VarLen { size, kind: VarLenKind::String { charset, padding } })
                } else {
                    let base = Datatype::parse(reader)?;
                    Ok(Datatype::VarLen { size, kind: VarLenKind::Sequence { base: Box::new(base) } })
                }
            }
            6 => {
                let count = u16::from_le_bytes([flag_bytes[0], flag_bytes[1]]);
                let mut members = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let name = reader.read_cstr()?;
                    if version == 1 {
                        let pad = (8 - (name.len() + 1) % 8) % 8;
                        reader.skip(pad as u64)?;
                    }
                    let offset = reader.read_u32(Endian::Little)?;
                    let member_type = Datatype::parse(reader)?;
                    members.push(CompoundMember {
                        name: String::from_utf8_lossy(&name).into_owned(),
                        offset,
                        datatype: member_type,
                    });
                }
                Ok(Datatype::Compound { size, members })
            }
            10 => {
                let rank = reader.read_u8()?;
                if version < 3 {
                    reader.skip(3)?; // reserved
                }
                let mut dims = Vec::with_capacity(rank as usize);
                for _ in 0..rank {
                    dims.push(reader.read_u32(Endian::Little)?);
                }
                if version < 3 {
                    reader.skip(4 * rank as u64)?; // unused permutation indices
                }
                let base = Datatype::parse(reader)?;
                Ok(Datatype::Array { size, dims, base: Box::new(base) })
            }
            8 => {
                let count = u16::from_le_bytes([flag_bytes[0], flag_bytes[1]]);
                let base = Datatype::parse(reader)?;
                let mut members = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let name = reader.read_cstr()?;
                    if version == 1 {
                        let pad = (8 - (name.len() + 1) % 8) % 8;
                        reader.skip(pad as u64)?;
                    }
                    let value = read_enum_const(reader, &base)?;
                    members.push((String::from_utf8_lossy(&name).into_owned(), value));
                }
                Ok(Datatype::Enum { size, base: Box::new(base), members })
            }
            4 => {
                let order = if flag_bytes[0] & 0x01 != 0 { Endian::Big } else { Endian::Little };
                reader.skip(4)?; // bit offset + bit precision, unused beyond size
                Ok(Datatype::Bitfield { size, order })
            }
            5 => {
                let tag_len = ((flag_bytes[0] & 0x0F) as usize) * 8;
                let tag_bytes = reader.read_exact_bytes(tag_len)?;
                let tag = String::from_utf8_lossy(&tag_bytes).trim_end_matches('\0').to_string();
                Ok(Datatype::Opaque { size, tag })
            }
            other => Err(Error::unsupported(format!("datatype class {other}"))),
        }
    }

    pub fn serialize<W: Write + Seek>(&self, writer: &mut ByteWriter<W>) -> Result<()> {
        match self {
            Datatype::FixedPoint { size, order, signed, bit_offset, bit_precision } => {
                writer.write_u8(0x13)?; // version 1, class 0
                let mut flags = 0u8;
                if matches!(order, Endian::Big) { flags |= 0x01; }
                if *signed { flags |= 0x08; }
                writer.write_bytes(&[flags, 0, 0])?;
                writer.write_u32(*size, Endian::Little)?;
                writer.write_u16(*bit_offset, Endian::Little)?;
                writer.write_u16(*bit_precision, Endian::Little)?;
            }
            Datatype::Float { size, order, exponent_location, exponent_size, mantissa_location, mantissa_size, .. } => {
                writer.write_u8(0x11)?; // version 1, class 1
                let mut flags = 0u8;
                if matches!(order, Endian::Big) { flags |= 0x01; }
                writer.write_bytes(&[flags, 0, 0])?;
                writer.write_u32(*size, Endian::Little)?;
                writer.write_u16(0, Endian::Little)?;
                writer.write_u16((*size * 8) as u16, Endian::Little)?;
                writer.write_u8(*exponent_location as u8)?;
                writer.write_u8(*exponent_size as u8)?;
                writer.write_u8(*mantissa_location as u8)?;
                writer.write_u8(*mantissa_size as u8)?;
                let bias: u32 = if *size == 8 { 1023 } else { 127 };
                writer.write_u32(bias, Endian::Little)?;
            }
            Datatype::FixedString { size, padding, charset } => {
                writer.write_u8(0x13)?; // version 1, class 3
                let pad_bits = match padding {
                    StringPadding::NullTerminate => 0,
                    StringPadding::NullPad => 1,
                    StringPadding::SpacePad => 2,
                };
                let charset_bits = match charset {
                    Charset::Ascii => 0,
                    Charset::Utf8 => 1,
                };
                writer.write_bytes(&[pad_bits | (charset_bits << 4), 0, 0])?;
                writer.write_u32(*size, Endian::Little)?;
            }
            Datatype::VarLen { size, kind } => {
                writer.write_u8(0x19)?; // version 1, class 9
                match kind {
                    VarLenKind::String { charset, padding } => {
                        let pad_bits = match padding {
                            StringPadding::NullTerminate => 0,
                            StringPadding::NullPad => 1,
                            StringPadding::SpacePad => 2,
                        };
                        let charset_bits: u8 = match charset {
                            Charset::Ascii => 0,
                            Charset::Utf8 => 1,
                        };
                        writer.write_bytes(&[1 | (pad_bits << 4), charset_bits, 0])?;
                        writer.write_u32(*size, Endian::Little)?;
                    }
                    VarLenKind::Sequence { base } => {
                        writer.write_bytes(&[0, 0, 0])?;
                        writer.write_u32(*size, Endian::Little)?;
                        base.serialize(writer)?;
                    }
                }
            }
            Datatype::Compound { size, members } => {
                writer.write_u8(0x36)?; // version 3, class 6
                let count = members.len() as u16;
                writer.write_bytes(&count.to_le_bytes())?;
                writer.write_u8(0)?;
                writer.write_u32(*size, Endian::Little)?;
                for m in members {
                    writer.write_cstr(m.name.as_bytes())?;
                    writer.write_u32(m.offset, Endian::Little)?;
                    m.datatype.serialize(writer)?;
                }
            }
            Datatype::Array { size, dims, base } => {
                writer.write_u8(0x3A)?; // version 3, class 10
                writer.write_bytes(&[0, 0, 0])?;
                writer.write_u32(*size, Endian::Little)?;
                writer.write_u8(dims.len() as u8)?;
                for d in dims {
                    writer.write_u32(*d, Endian::Little)?;
                }
                base.serialize(writer)?;
            }
            Datatype::Enum { size, base, members } => {
                writer.write_u8(0x38)?; // version 3, class 8
                let count = members.len() as u16;
                writer.write_bytes(&count.to_le_bytes())?;
                writer.write_u32(*size, Endian::Little)?;
                base.serialize(writer)?;
                for (name, value) in members {
                    writer.write_cstr(name.as_bytes())?;
                    write_enum_const(writer, base, *value)?;
                }
            }
            Datatype::Bitfield { size, order } => {
                writer.write_u8(0x14)?; // version 1, class 4
                let flags = if matches!(order, Endian::Big) { 1 } else { 0 };
                writer.write_bytes(&[flags, 0, 0])?;
                writer.write_u32(*size, Endian::Little)?;
                writer.write_bytes(&[0, 0, 0, 0])?;
            }
            Datatype::Opaque { size, tag } => {
                writer.write_u8(0x15)?; // version 1, class 5
                let words = (tag.len() + 7) / 8;
                writer.write_bytes(&[(words as u8) & 0x0F, 0, 0])?;
                writer.write_u32(*size, Endian::Little)?;
                let mut padded = tag.as_bytes().to_vec();
                padded.resize(words * 8, 0);
                writer.write_bytes(&padded)?;
            }
        }
        Ok(())
    }
}

fn read_enum_const<R: Read + Seek>(reader: &mut ByteReader<R>, base: &Datatype) -> Result<i64> {
    match base.size() {
        1 => Ok(reader.read_u8()? as i64),
        2 => Ok(reader.read_u16(Endian::Little)? as i64),
        4 => Ok(reader.read_u32(Endian::Little)? as i64),
        8 => Ok(reader.read_u64(Endian::Little)? as i64),
        other => Err(Error::corrupt(format!("unsupported enum base size {other}"))),
    }
}

fn write_enum_const<W: Write + Seek>(writer: &mut ByteWriter<W>, base: &Datatype, value: i64) -> Result<()> {
    match base.size() {
        1 => writer.write_u8(value as u8),
        2 => writer.write_u16(value as u16, Endian::Little),
        4 => writer.write_u32(value as u32, Endian::Little),
        8 => writer.write_u64(value as u64, Endian::Little),
        other => Err(Error::corrupt(format!("unsupported enum base size {other}"))),
    }
}

/// Resolves a variable-length value stored in the global heap.
/// Implemented by the file-level heap cache.
pub trait HeapResolver {
    fn resolve_global(&mut self, collection_addr: u64, index: u32) -> Result<Vec<u8>>;
}

/// A resolver that errors on any attempt to dereference the global
/// heap — used when decoding datatypes known not to need it (fixed
/// types, attribute payloads that happen to be all-fixed, tests).
pub struct NoHeap;
impl HeapResolver for NoHeap {
    fn resolve_global(&mut self, _collection_addr: u64, _index: u32) -> Result<Vec<u8>> {
        Err(Error::unsupported("variable-length data requires a global heap resolver"))
    }
}

/// Decodes `count` consecutive elements of `dt` from `bytes`.
/// `bytes.len()` must equal `count * dt.size()`.
pub fn decode_elements(dt: &Datatype, bytes: &[u8], count: usize, heap: &mut dyn HeapResolver) -> Result<Vec<Value>> {
    let width = dt.size() as usize;
    if bytes.len() < width * count {
        return Err(Error::corrupt("element buffer shorter than declared size"));
    }
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let slice = &bytes[i * width..(i + 1) * width];
        out.push(decode_one(dt, slice, heap)?);
    }
    Ok(out)
}

fn decode_one(dt: &Datatype, bytes: &[u8], heap: &mut dyn HeapResolver) -> Result<Value> {
    if let Some(width) = dt.fast_path_width() {
        // Verbatim copy path: little-endian, native width, matching signedness.
        if let Datatype::FixedPoint { signed, .. } = dt {
            return Ok(decode_fixed_native(bytes, width, *signed));
        }
        if let Datatype::Float { .. } = dt {
            return Ok(decode_float_native(bytes, width));
        }
    }

    match dt {
        Datatype::FixedPoint { size, order, signed, bit_offset, bit_precision } => {
            Ok(decode_fixed_generic(bytes, *size, *order, *signed, *bit_offset, *bit_precision))
        }
        Datatype::Float { size, order, .. } => {
            let mut native = bytes.to_vec();
            if *order == Endian::Big {
                native.reverse();
            }
            Ok(decode_float_native(&native, *size as usize))
        }
        Datatype::FixedString { padding, .. } => Ok(Value::Str(decode_fixed_string(bytes, *padding))),
        Datatype::VarLen { kind: VarLenKind::String { .. }, .. } => {
            Ok(Value::Str(decode_varlen_string(bytes, heap)?))
        }
        Datatype::VarLen { kind: VarLenKind::Sequence { base }, .. } => {
            let (collection_addr, index, len) = parse_global_heap_id(bytes)?;
            if collection_addr == 0 {
                return Ok(Value::Array(Vec::new()));
            }
            let raw = heap.resolve_global(collection_addr, index)?;
            let n = len as usize / base.size().max(1) as usize;
            Ok(Value::Array(decode_elements(base, &raw, n, heap)?))
        }
        Datatype::Compound { members, .. } => {
            let mut fields = Vec::with_capacity(members.len());
            for m in members {
                let slice = &bytes[m.offset as usize..(m.offset as usize + m.datatype.size() as usize)];
                fields.push((m.name.clone(), decode_one(&m.datatype, slice, heap)?));
            }
            Ok(Value::Compound(fields))
        }
        Datatype::Array { dims, base, .. } => {
            let n: u32 = dims.iter().product();
            let elems = decode_elements(base, bytes, n as usize, heap)?;
            Ok(Value::Array(elems))
        }
        Datatype::Enum { base, members, .. } => {
            let raw = decode_enum_raw(bytes, base)?;
            let name = members
                .iter()
                .find(|(_, v)| *v == raw)
                .map(|(n, _)| n.clone())
                .unwrap_or_else(|| format!("<unknown:{raw}>"));
            Ok(Value::Enum(name, raw))
        }
        Datatype::Bitfield { .. } => Ok(Value::Bytes(bytes.to_vec())),
        Datatype::Opaque { .. } => Ok(Value::Bytes(bytes.to_vec())),
    }
}

fn decode_enum_raw(bytes: &[u8], base: &Datatype) -> Result<i64> {
    match base.size() {
        1 => Ok(bytes[0] as i8 as i64),
        2 => Ok(i16::from_le_bytes(bytes[..2].try_into().unwrap()) as i64),
        4 => Ok(i32::from_le_bytes(bytes[..4].try_into().unwrap()) as i64),
        8 => Ok(i64::from_le_bytes(bytes[..8].try_into().unwrap())),
        other => Err(Error::corrupt(format!("unsupported enum base size {other}"))),
    }
}

fn decode_fixed_native(bytes: &[u8], width: usize, signed: bool) -> Value {
    match (width, signed) {
        (1, true) => Value::I8(bytes[0] as i8),
        (1, false) => Value::U8(bytes[0]),
        (2, true) => Value::I16(i16::from_le_bytes(bytes[..2].try_into().unwrap())),
        (2, false) => Value::U16(u16::from_le_bytes(bytes[..2].try_into().unwrap())),
        (4, true) => Value::I32(i32::from_le_bytes(bytes[..4].try_into().unwrap())),
        (4, false) => Value::U32(u32::from_le_bytes(bytes[..4].try_into().unwrap())),
        (8, true) => Value::I64(i64::from_le_bytes(bytes[..8].try_into().unwrap())),
        (8, false) => Value::U64(u64::from_le_bytes(bytes[..8].try_into().unwrap())),
        _ => unreachable!("fast_path_width only returns 1/2/4/8"),
    }
}

fn decode_float_native(bytes: &[u8], width: usize) -> Value {
    match width {
        4 => Value::F32(f32::from_le_bytes(bytes[..4].try_into().unwrap())),
        8 => Value::F64(f64::from_le_bytes(bytes[..8].try_into().unwrap())),
        _ => unreachable!("fast_path_width only returns 4 or 8 for floats"),
    }
}

/// Slow path for fixed-point types whose bit-offset/precision don't
/// span the whole declared size, or whose byte order is big-endian.
fn decode_fixed_generic(bytes: &[u8], size: u32, order: Endian, signed: bool, bit_offset: u16, bit_precision: u16) -> Value {
    let mut native = bytes[..size as usize].to_vec();
    if order == Endian::Big {
        native.reverse();
    }
    let mut raw: u64 = 0;
    for (i, b) in native.iter().enumerate().take(8) {
        raw |= (*b as u64) << (8 * i);
    }
    raw >>= bit_offset;
    let precision = bit_precision.min(64);
    if precision < 64 {
        raw &= (1u64 << precision) - 1;
    }
    if signed && precision < 64 && (raw & (1 << (precision - 1))) != 0 {
        raw |= !0u64 << precision;
    }
    match size {
        1 => if signed { Value::I8(raw as i8) } else { Value::U8(raw as u8) },
        2 => if signed { Value::I16(raw as i16) } else { Value::U16(raw as u16) },
        4 => if signed { Value::I32(raw as i32) } else { Value::U32(raw as u32) },
        _ => if signed { Value::I64(raw as i64) } else { Value::U64(raw) },
    }
}

fn decode_fixed_string(bytes: &[u8], padding: StringPadding) -> String {
    let end = match padding {
        StringPadding::NullTerminate | StringPadding::NullPad => {
            bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len())
        }
        StringPadding::SpacePad => {
            let trimmed = bytes.iter().rposition(|&b| b != b' ' && b != 0);
            trimmed.map(|i| i + 1).unwrap_or(0)
        }
    };
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// A variable-length string element on disk is a global-heap id:
/// `{length: u32, collection_address: offset, index: u32}`.
/// A null collection address decodes to the empty string.
fn decode_varlen_string(bytes: &[u8], heap: &mut dyn HeapResolver) -> Result<String> {
    let (collection_addr, index, _len) = parse_global_heap_id(bytes)?;
    if collection_addr == 0 {
        return Ok(String::new());
    }
    let raw = heap.resolve_global(collection_addr, index)?;
    Ok(String::from_utf8_lossy(&raw).trim_end_matches('\0').to_string())
}

/// Global heap id layout is `{u32 length, offset-width address, u32 index}`.
/// This crate always writes 8-byte offsets in global-heap ids it emits,
/// but reads whatever width the element slice implies by the varlen
/// datatype's declared size (16 bytes for an 8-byte-offset file, 10 or
/// 12 for narrower ones).
fn parse_global_heap_id(bytes: &[u8]) -> Result<(u64, u32, u32)> {
    if bytes.len() < 10 {
        return Err(Error::corrupt("global heap id too short"));
    }
    let length = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
    let addr_width = bytes.len() - 8;
    let mut addr_bytes = [0u8; 8];
    addr_bytes[..addr_width].copy_from_slice(&bytes[4..4 + addr_width]);
    let collection_addr = u64::from_le_bytes(addr_bytes);
    let index = u32::from_le_bytes(bytes[bytes.len() - 4..].try_into().unwrap());
    Ok((collection_addr, index, length))
}

pub fn encode_global_heap_id(buf: &mut Vec<u8>, length: u32, addr_width: Width, collection_addr: u64, index: u32) {
    buf.extend_from_slice(&length.to_le_bytes());
    buf.extend_from_slice(&collection_addr.to_le_bytes()[..addr_width.bytes() as usize]);
    buf.extend_from_slice(&index.to_le_bytes());
}

/// Encodes a single element of `dt`, used by the dataset
/// writer. Variable-length encoding (writing into the global heap)
/// is handled by the caller, since it requires allocating heap space;
/// this only handles the fixed-width classes used by the writer.
pub fn encode_fixed_element(dt: &Datatype, value: &Value) -> Result<Vec<u8>> {
    let size = dt.size() as usize;
    match (dt, value) {
        (Datatype::FixedPoint { signed: true, order: Endian::Little, .. }, _) => {
            let n: i64 = match value {
                Value::I8(v) => *v as i64,
                Value::I16(v) => *v as i64,
                Value::I32(v) => *v as i64,
                Value::I64(v) => *v,
                other => return Err(Error::wrong_kind(format!("expected signed integer, found {other:?}"))),
            };
            Ok(n.to_le_bytes()[..size].to_vec())
        }
        (Datatype::FixedPoint { signed: false, order: Endian::Little, .. }, _) => {
            let n: u64 = match value {
                Value::U8(v) => *v as u64,
                Value::U16(v) => *v as u64,
                Value::U32(v) => *v as u64,
                Value::U64(v) => *v,
                other => return Err(Error::wrong_kind(format!("expected unsigned integer, found {other:?}"))),
            };
            Ok(n.to_le_bytes()[..size].to_vec())
        }
        (Datatype::Float { order: Endian::Little, .. }, Value::F64(v)) if size == 8 => Ok(v.to_le_bytes().to_vec()),
        (Datatype::Float { order: Endian::Little, .. }, Value::F32(v)) if size == 4 => Ok(v.to_le_bytes().to_vec()),
        (Datatype::FixedString { padding, .. }, Value::Str(s)) => Ok(encode_fixed_string(s, size, *padding)),
        (Datatype::Opaque { .. }, Value::Bytes(b)) | (Datatype::Bitfield { .. }, Value::Bytes(b)) => {
            let mut out = b.clone();
            out.resize(size, 0);
            Ok(out)
        }
        (other_dt, other_val) => Err(Error::wrong_kind(format!(
            "value {other_val:?} does not match datatype {other_dt:?}"
        ))),
    }
}

fn encode_fixed_string(s: &str, size: usize, padding: StringPadding) -> Vec<u8> {
    let mut out = s.as_bytes().to_vec();
    out.truncate(size);
    let pad_byte = match padding {
        StringPadding::SpacePad => b' ',
        _ => 0,
    };
    out.resize(size, pad_byte);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(dt: &Datatype) -> Datatype {
        let mut buf: Vec<u8> = Vec::new();
        let mut writer = ByteWriter::new(std::io::Cursor::new(&mut buf));
        dt.serialize(&mut writer).unwrap();
        let cursor = std::io::Cursor::new(buf);
        let mut reader = ByteReader::new(cursor);
        Datatype::parse(&mut reader).unwrap()
    }

    #[test]
    fn fixed_point_roundtrips() {
        let dt = Datatype::i32_le();
        assert_eq!(roundtrip(&dt), dt);
    }

    #[test]
    fn float_roundtrips() {
        let dt = Datatype::f64_le();
        assert_eq!(roundtrip(&dt), dt);
    }

    #[test]
    fn compound_roundtrips() {
        let dt = Datatype::Compound {
            size: 12,
            members: vec![
                CompoundMember { name: "a".into(), offset: 0, datatype: Datatype::i32_le() },
                CompoundMember { name: "b".into(), offset: 4, datatype: Datatype::f64_le() },
            ],
        };
        dt.validate().unwrap();
        assert_eq!(roundtrip(&dt), dt);
    }

    #[test]
    fn compound_rejects_duplicate_names() {
        let dt = Datatype::Compound {
            size: 8,
            members: vec![
                CompoundMember { name: "a".into(), offset: 0, datatype: Datatype::i32_le() },
                CompoundMember { name: "a".into(), offset: 4, datatype: Datatype::i32_le() },
            ],
        };
        assert!(dt.validate().is_err());
    }

    #[test]
    fn compound_rejects_overlap() {
        let dt = Datatype::Compound {
            size: 8,
            members: vec![
                CompoundMember { name: "a".into(), offset: 0, datatype: Datatype::i64_le() },
                CompoundMember { name: "b".into(), offset: 4, datatype: Datatype::i32_le() },
            ],
        };
        assert!(dt.validate().is_err());
    }

    #[test]
    fn decode_fixed_point_fast_path() {
        let dt = Datatype::i32_le();
        let bytes = 42i32.to_le_bytes();
        let v = decode_one(&dt, &bytes, &mut NoHeap).unwrap();
        assert_eq!(v, Value::I32(42));
    }

    #[test]
    fn decode_float_fast_path() {
        let dt = Datatype::f64_le();
        let bytes = 1.5f64.to_le_bytes();
        let v = decode_one(&dt, &bytes, &mut NoHeap).unwrap();
        assert_eq!(v, Value::F64(1.5));
    }

    #[test]
    fn decode_fixed_string_strips_null_padding() {
        let dt = Datatype::fixed_string(8, StringPadding::NullPad);
        let mut bytes = b"alpha".to_vec();
        bytes.resize(8, 0);
        let v = decode_one(&dt, &bytes, &mut NoHeap).unwrap();
        assert_eq!(v, Value::Str("alpha".to_string()));
    }

    #[test]
    fn decode_compound() {
        let dt = Datatype::Compound {
            size: 12,
            members: vec![
                CompoundMember { name: "a".into(), offset: 0, datatype: Datatype::i32_le() },
                CompoundMember { name: "b".into(), offset: 4, datatype: Datatype::f64_le() },
            ],
        };
        let mut bytes = 7i32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&2.0f64.to_le_bytes());
        let v = decode_one(&dt, &bytes, &mut NoHeap).unwrap();
        assert_eq!(
            v,
            Value::Compound(vec![("a".into(), Value::I32(7)), ("b".into(), Value::F64(2.0))])
        );
    }

    #[test]
    fn null_global_heap_id_decodes_empty_string() {
        let dt = Datatype::varlen_string();
        let mut bytes = vec![0u8; 4]; // length = 0
        bytes.extend_from_slice(&0u64.to_le_bytes()); // collection address = 0
        bytes.extend_from_slice(&0u32.to_le_bytes()); // index
        let v = decode_one(&dt, &bytes, &mut NoHeap).unwrap();
        assert_eq!(v, Value::Str(String::new()));
    }
}
