//! Object header message payloads and their type codes.
//! Object headers carry a list of `(type, flags, payload)` triples;
//! this module knows how to turn a payload into a typed [`Message`]
//! and back. Unknown type codes are preserved as raw bytes so a file
//! written by a more capable implementation round-trips losslessly.

pub mod attribute;
pub mod dataspace;
pub mod filter;
pub mod layout;
pub mod link;
pub mod misc;

use std::io::Cursor;

use crate::datatype::Datatype;
use crate::io::{ByteReader, ByteWriter, Width};
use crate::{Error, Result};

use attribute::Attribute;
use dataspace::Dataspace;
use filter::FilterPipeline;
use layout::DataLayout;
use link::{GroupInfo, Link, LinkInfo};
use misc::{AttributeInfo, Continuation, FillValue, SymbolTable};

pub const TYPE_NIL: u16 = 0x0000;
pub const TYPE_DATASPACE: u16 = 0x0001;
pub const TYPE_LINK_INFO: u16 = 0x0002;
pub const TYPE_DATATYPE: u16 = 0x0003;
pub const TYPE_FILL_VALUE: u16 = 0x0005;
pub const TYPE_LINK: u16 = 0x0006;
pub const TYPE_DATA_LAYOUT: u16 = 0x0008;
pub const TYPE_GROUP_INFO: u16 = 0x000A;
pub const TYPE_FILTER_PIPELINE: u16 = 0x000B;
pub const TYPE_ATTRIBUTE: u16 = 0x000C;
pub const TYPE_CONTINUATION: u16 = 0x0010;
pub const TYPE_SYMBOL_TABLE: u16 = 0x0011;
pub const TYPE_ATTRIBUTE_INFO: u16 = 0x0015;

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Nil,
    Dataspace(Dataspace),
    LinkInfo(LinkInfo),
    Datatype(Datatype),
    FillValue(FillValue),
    Link(Link),
    DataLayout(DataLayout),
    GroupInfo(GroupInfo),
    FilterPipeline(FilterPipeline),
    Attribute(Attribute),
    Continuation(Continuation),
    SymbolTable(SymbolTable),
    AttributeInfo(AttributeInfo),
    /// A message type this crate doesn't interpret, preserved verbatim
    /// so headers containing it still round-trip.
    Unknown { type_code: u16, payload: Vec<u8> },
}

impl Message {
    pub fn type_code(&self) -> u16 {
        match self {
            Message::Nil => TYPE_NIL,
            Message::Dataspace(_) => TYPE_DATASPACE,
            Message::LinkInfo(_) => TYPE_LINK_INFO,
            Message::Datatype(_) => TYPE_DATATYPE,
            Message::FillValue(_) => TYPE_FILL_VALUE,
            Message::Link(_) => TYPE_LINK,
            Message::DataLayout(_) => TYPE_DATA_LAYOUT,
            Message::GroupInfo(_) => TYPE_GROUP_INFO,
            Message::FilterPipeline(_) => TYPE_FILTER_PIPELINE,
            Message::Attribute(_) => TYPE_ATTRIBUTE,
            Message::Continuation(_) => TYPE_CONTINUATION,
            Message::SymbolTable(_) => TYPE_SYMBOL_TABLE,
            Message::AttributeInfo(_) => TYPE_ATTRIBUTE_INFO,
            Message::Unknown { type_code, .. } => *type_code,
        }
    }

    pub fn decode(type_code: u16, payload: &[u8], offset_width: Width, length_width: Width) -> Result<Message> {
        log::trace!("decoding message type 0x{type_code:04x}, {} byte payload", payload.len());
        let mut reader = ByteReader::new(Cursor::new(payload));
        Ok(match type_code {
            TYPE_NIL => Message::Nil,
            TYPE_DATASPACE => Message::Dataspace(Dataspace::parse(&mut reader, offset_width)?),
            TYPE_LINK_INFO => Message::LinkInfo(LinkInfo::parse(&mut reader, offset_width)?),
            TYPE_DATATYPE => Message::Datatype(Datatype::parse(&mut reader)?),
            TYPE_FILL_VALUE => Message::FillValue(FillValue::parse(&mut reader)?),
            TYPE_LINK => Message::Link(Link::parse(&mut reader, offset_width)?),
            TYPE_DATA_LAYOUT => Message::DataLayout(DataLayout::parse(&mut reader, offset_width, length_width)?),
            TYPE_GROUP_INFO => Message::GroupInfo(GroupInfo::parse(&mut reader)?),
            TYPE_FILTER_PIPELINE => Message::FilterPipeline(FilterPipeline::parse(&mut reader)?),
            TYPE_ATTRIBUTE => Message::Attribute(Attribute::parse(&mut reader, offset_width)?),
            TYPE_CONTINUATION => Message::Continuation(Continuation::parse(&mut reader, offset_width, length_width)?),
            TYPE_SYMBOL_TABLE => Message::SymbolTable(SymbolTable::parse(&mut reader, offset_width)?),
            TYPE_ATTRIBUTE_INFO => Message::AttributeInfo(AttributeInfo::parse(&mut reader, offset_width)?),
            other => {
                log::warn!("skipping unknown message type 0x{other:04x}, keeping {} byte payload verbatim", payload.len());
                Message::Unknown { type_code: other, payload: payload.to_vec() }
            }
        })
    }

    pub fn encode(&self, offset_width: Width, length_width: Width) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        let mut writer = ByteWriter::new(Cursor::new(&mut buf));
        match self {
            Message::Nil => {}
            Message::Dataspace(m) => m.serialize(&mut writer, offset_width)?,
            Message::LinkInfo(m) => m.serialize(&mut writer, offset_width)?,
            Message::Datatype(m) => m.serialize(&mut writer)?,
            Message::FillValue(m) => m.serialize(&mut writer)?,
            Message::Link(m) => m.serialize(&mut writer, offset_width)?,
            Message::DataLayout(m) => m.serialize(&mut writer, offset_width, length_width)?,
            Message::GroupInfo(m) => m.serialize(&mut writer)?,
            Message::FilterPipeline(m) => m.serialize(&mut writer)?,
            Message::Attribute(m) => m.serialize(&mut writer, offset_width)?,
            Message::Continuation(m) => m.serialize(&mut writer, offset_width, length_width)?,
            Message::SymbolTable(m) => m.serialize(&mut writer, offset_width)?,
            Message::AttributeInfo(m) => m.serialize(&mut writer, offset_width)?,
            Message::Unknown { payload, .. } => writer.write_bytes(payload)?,
        }
        Ok(buf)
    }

    pub fn as_dataspace(&self) -> Result<&Dataspace> {
        match self {
            Message::Dataspace(d) => Ok(d),
            other => Err(Error::wrong_kind(format!("expected Dataspace message, found {other:?}"))),
        }
    }

    pub fn as_datatype(&self) -> Result<&Datatype> {
        match self {
            Message::Datatype(d) => Ok(d),
            other => Err(Error::wrong_kind(format!("expected Datatype message, found {other:?}"))),
        }
    }

    pub fn as_data_layout(&self) -> Result<&DataLayout> {
        match self {
            Message::DataLayout(d) => Ok(d),
            other => Err(Error::wrong_kind(format!("expected DataLayout message, found {other:?}"))),
        }
    }

    pub fn as_link(&self) -> Result<&Link> {
        match self {
            Message::Link(l) => Ok(l),
            other => Err(Error::wrong_kind(format!("expected Link message, found {other:?}"))),
        }
    }

    pub fn as_attribute(&self) -> Result<&Attribute> {
        match self {
            Message::Attribute(a) => Ok(a),
            other => Err(Error::wrong_kind(format!("expected Attribute message, found {other:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_type_round_trips_verbatim() {
        let payload = vec![9, 9, 9, 9];
        let msg = Message::decode(0x00FF, &payload, Width::EIGHT, Width::EIGHT).unwrap();
        assert!(matches!(msg, Message::Unknown { type_code: 0x00FF, .. }));
        let encoded = msg.encode(Width::EIGHT, Width::EIGHT).unwrap();
        assert_eq!(encoded, payload);
    }

    #[test]
    fn nil_round_trips_empty() {
        let msg = Message::decode(TYPE_NIL, &[], Width::EIGHT, Width::EIGHT).unwrap();
        assert_eq!(msg, Message::Nil);
        assert!(msg.encode(Width::EIGHT, Width::EIGHT).unwrap().is_empty());
    }
}
