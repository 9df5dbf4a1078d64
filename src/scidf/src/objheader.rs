//! Object header codec: the message list
//! attached to every group, dataset, and named datatype. v1 headers
//! (linked 8-byte-aligned blocks) are parsed for read compatibility;
//! this crate only ever *writes* v2 ("OHDR"/"OCHK", checksummed, flag-
//! controlled field widths).

use std::io::{Read, Seek, Write};

use crate::checksum::lookup3;
use crate::io::{ByteReader, ByteWriter, Endian, Width};
use crate::message::{Message, TYPE_CONTINUATION, TYPE_NIL};
use crate::{Error, Result};

const V2_SIGNATURE: &[u8; 4] = b"OHDR";
const V2_CONTINUATION_SIGNATURE: &[u8; 4] = b"OCHK";

#[derive(Debug, Clone)]
pub struct HeaderMessage {
    pub message: Message,
    pub flags: u8,
}

#[derive(Debug, Clone, Default)]
pub struct ObjectHeader {
    pub messages: Vec<HeaderMessage>,
}

impl ObjectHeader {
    pub fn new() -> ObjectHeader {
        ObjectHeader::default()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(HeaderMessage { message, flags: 0 });
    }

    pub fn find(&self, type_code: u16) -> Option<&Message> {
        self.messages.iter().map(|m| &m.message).find(|m| m.type_code() == type_code)
    }

    pub fn find_all(&self, type_code: u16) -> Vec<&Message> {
        self.messages.iter().map(|m| &m.message).filter(|m| m.type_code() == type_code).collect()
    }

    pub fn parse<R: Read + Seek>(reader: &mut ByteReader<R>, addr: u64, offset_width: Width, length_width: Width) -> Result<ObjectHeader> {
        reader.seek_to(addr)?;
        let sig = reader.peek(4)?;
        if sig.as_slice() == V2_SIGNATURE {
            log::trace!("decoding v2 object header at {addr:#x}");
            Self::parse_v2(reader, addr, offset_width, length_width)
        } else {
            log::trace!("decoding v1 object header at {addr:#x}");
            Self::parse_v1(reader, addr, offset_width, length_width)
        }
    }

    fn parse_v2<R: Read + Seek>(reader: &mut ByteReader<R>, addr: u64, offset_width: Width, length_width: Width) -> Result<ObjectHeader> {
        reader.seek_to(addr)?;
        reader.skip(4)?; // "OHDR"
        let version = reader.read_u8()?;
        if version != 2 {
            return Err(Error::UnsupportedVersion(version));
        }
        let flags = reader.read_u8()?;
        if flags & 0x20 != 0 {
            reader.skip(16)?; // times: access, modification, change, birth
        }
        if flags & 0x10 != 0 {
            reader.skip(4)?; // max compact / min dense attribute counts
        }
        let chunk_size_width = 1usize << (flags & 0x03);
        let chunk0_size = read_width(reader, chunk_size_width)?;

        let mut header = ObjectHeader::default();
        let chunk_start = reader.position()?;
        Self::verify_chunk_checksum(reader, addr, chunk_start, chunk0_size)?;
        Self::read_chunk(reader, chunk_start, chunk0_size, offset_width, length_width, &mut header)?;
        Ok(header)
    }

    /// Validates the trailing lookup3 checksum covering `prefix_start
    /// ..chunk_start+chunk_size-4`. `prefix_start` is the
    /// start of the signature/flags/size-field region preceding the
    /// message list; `chunk_size` already excludes that prefix.
    fn verify_chunk_checksum<R: Read + Seek>(reader: &mut ByteReader<R>, prefix_start: u64, chunk_start: u64, chunk_size: u64) -> Result<()> {
        let checksum_start = chunk_start + chunk_size;
        let span = checksum_start - prefix_start;
        let saved_pos = reader.position()?;
        reader.seek_to(prefix_start)?;
        let body = reader.read_exact_bytes(span as usize)?;
        let stored = reader.read_u32(Endian::Little)?;
        reader.seek_to(saved_pos)?;
        if lookup3(&body) != stored {
            return Err(Error::corrupt("object header checksum mismatch"));
        }
        Ok(())
    }

    fn read_chunk<R: Read + Seek>(
        reader: &mut ByteReader<R>,
        chunk_data_start: u64,
        chunk_size: u64,
        offset_width: Width,
        length_width: Width,
        header: &mut ObjectHeader,
    ) -> Result<()> {
        reader.seek_to(chunk_data_start)?;
        let chunk_end = chunk_data_start + chunk_size;

        let mut continuations = Vec::new();
        while reader.position()? + 4 <= chunk_end {
            let type_code = reader.read_u8()? as u16;
            let size = reader.read_u16(Endian::Little)?;
            let msg_flags = reader.read_u8()?;
            let creation_order_present = false; // this crate's writer never sets the tracking flag
            if creation_order_present {
                reader.skip(2)?;
            }
            let payload = reader.read_exact_bytes(size as usize)?;
            if type_code == TYPE_NIL {
                continue;
            }
            if type_code == TYPE_CONTINUATION {
                let cont = crate::message::misc::Continuation::parse(&mut ByteReader::new(std::io::Cursor::new(&payload)), offset_width, length_width)?;
                continuations.push(cont);
                continue;
            }
            let message = Message::decode(type_code, &payload, offset_width, length_width)?;
            header.messages.push(HeaderMessage { message, flags: msg_flags });
        }
        reader.skip(4)?; // trailing checksum, already verified by the caller

        for cont in continuations {
            let body_len = cont.length - 4 - 4; // minus "OCHK" signature and trailing checksum
            Self::verify_chunk_checksum(reader, cont.addr, cont.addr + 4, body_len)?;
            let sig = {
                reader.seek_to(cont.addr)?;
                reader.read_exact_bytes(4)?
            };
            if sig.as_slice() != V2_CONTINUATION_SIGNATURE {
                return Err(Error::corrupt("object header continuation signature mismatch"));
            }
            Self::read_chunk(reader, cont.addr + 4, body_len, offset_width, length_width, header)?;
        }
        Ok(())
    }

    fn parse_v1<R: Read + Seek>(reader: &mut ByteReader<R>, addr: u64, offset_width: Width, length_width: Width) -> Result<ObjectHeader> {
        reader.seek_to(addr)?;
        let version = reader.read_u8()?;
        if version != 1 {
            return Err(Error::UnsupportedVersion(version));
        }
        reader.skip(1)?; // reserved
        let total_messages = reader.read_u16(Endian::Little)?;
        reader.skip(4)?; // reference count
        let header_size = reader.read_u32(Endian::Little)?;
        reader.align(8)?;

        let mut header = ObjectHeader::default();
        let mut remaining_messages = total_messages as i64;
        let mut block_start = reader.position()?;
        let mut block_len = header_size as u64;

        loop {
            reader.seek_to(block_start)?;
            let block_end = block_start + block_len;
            let mut next_block: Option<(u64, u64)> = None;

            while remaining_messages > 0 && reader.position()? + 8 <= block_end {
                let type_code = reader.read_u16(Endian::Little)?;
                let size = reader.read_u16(Endian::Little)?;
                let msg_flags = reader.read_u8()?;
                reader.skip(3)?; // reserved
                let payload = reader.read_exact_bytes(size as usize)?;
                remaining_messages -= 1;
                if type_code == TYPE_NIL {
                    continue;
                }
                if type_code == TYPE_CONTINUATION {
                    let mut pr = ByteReader::new(std::io::Cursor::new(&payload));
                    let cont_addr = pr.read_offset(offset_width)?;
                    let cont_len = pr.read_length(length_width)?;
                    next_block = Some((cont_addr, cont_len));
                    continue;
                }
                let message = Message::decode(type_code, &payload, offset_width, length_width)?;
                header.messages.push(HeaderMessage { message, flags: msg_flags });
            }

            match next_block {
                Some((next_addr, next_len)) => {
                    block_start = next_addr;
                    block_len = next_len;
                }
                None => break,
            }
        }

        Ok(header)
    }

    /// Serializes this header as a single v2 chunk. The writer never
    /// splits a header across "OCHK" continuations — the
    /// whole message list is buffered and written as one chunk).
    pub fn write<W: Write + Seek + Read>(&self, writer: &mut ByteWriter<W>, addr: u64, offset_width: Width, length_width: Width, min_chunk_size: u64) -> Result<u64> {
        let mut body = Vec::new();
        for hm in &self.messages {
            let payload = hm.message.encode(offset_width, length_width)?;
            body.push(hm.message.type_code() as u8);
            body.extend_from_slice(&(payload.len() as u16).to_le_bytes());
            body.push(hm.flags);
            body.extend_from_slice(&payload);
        }
        while (body.len() as u64) < min_chunk_size {
            let pad = (min_chunk_size - body.len() as u64 - 4).min(u16::MAX as u64);
            body.push(TYPE_NIL as u8);
            body.extend_from_slice(&(pad as u16).to_le_bytes());
            body.push(0);
            body.extend(std::iter::repeat(0u8).take(pad as usize));
        }

        let chunk_size = body.len() as u64;
        let (size_field_flag, size_field_width) = if chunk_size <= u8::MAX as u64 {
            (0u8, 1usize)
        } else if chunk_size <= u16::MAX as u64 {
            (1, 2)
        } else if chunk_size <= u32::MAX as u64 {
            (2, 4)
        } else {
            (3, 8)
        };

        writer.seek_to(addr)?;
        writer.write_bytes(V2_SIGNATURE)?;
        writer.write_u8(2)?; // version
        writer.write_u8(size_field_flag)?; // flags: chunk size field width, no times, no attribute phase change
        write_width(writer, size_field_width, chunk_size)?;
        writer.write_bytes(&body)?;

        let checksum_input_start = addr;
        let checksum_input_end = writer.position()?;

        // Recompute the checksum by re-reading the bytes just written,
        // rather than threading a running hash through every branch above.
        let total_len = checksum_input_end - checksum_input_start;
        writer.seek_to(checksum_input_start)?;
        let mut verify_buf = vec![0u8; total_len as usize];
        {
            use std::io::Read as _;
            writer.get_mut().read_exact(&mut verify_buf)?;
        }
        let checksum = lookup3(&verify_buf);
        writer.seek_to(checksum_input_end)?;
        writer.write_u32(checksum, Endian::Little)?;

        Ok(checksum_input_end + 4 - addr)
    }
}

fn read_width<R: Read + Seek>(reader: &mut ByteReader<R>, width: usize) -> Result<u64> {
    match width {
        1 => Ok(reader.read_u8()? as u64),
        2 => Ok(reader.read_u16(Endian::Little)? as u64),
        4 => Ok(reader.read_u32(Endian::Little)? as u64),
        8 => reader.read_u64(Endian::Little),
        other => Err(Error::corrupt(format!("unsupported chunk size field width {other}"))),
    }
}

fn write_width<W: Write + Seek>(writer: &mut ByteWriter<W>, width: usize, value: u64) -> Result<()> {
    match width {
        1 => writer.write_u8(value as u8),
        2 => writer.write_u16(value as u16, Endian::Little),
        4 => writer.write_u32(value as u32, Endian::Little),
        8 => writer.write_u64(value, Endian::Little),
        other => Err(Error::corrupt(format!("unsupported chunk size field width {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::Datatype;
    use crate::message::dataspace::Dataspace;
    use std::io::Cursor;

    #[test]
    fn v2_header_roundtrips_messages() {
        let mut header = ObjectHeader::new();
        header.push(Message::Dataspace(Dataspace::Scalar));
        header.push(Message::Datatype(Datatype::i32_le()));

        let mut buf = vec![0u8; 1024];
        let written_len;
        {
            let mut writer = ByteWriter::new(Cursor::new(&mut buf));
            written_len = header.write(&mut writer, 0, Width::EIGHT, Width::EIGHT, 0).unwrap();
        }
        assert!(written_len > 0);

        let cursor = Cursor::new(buf);
        let mut reader = ByteReader::new(cursor);
        let parsed = ObjectHeader::parse(&mut reader, 0, Width::EIGHT, Width::EIGHT).unwrap();
        assert_eq!(parsed.messages.len(), 2);
        assert_eq!(parsed.find(crate::message::TYPE_DATASPACE).unwrap(), &Message::Dataspace(Dataspace::Scalar));
        assert_eq!(parsed.find(crate::message::TYPE_DATATYPE).unwrap(), &Message::Datatype(Datatype::i32_le()));
    }

    #[test]
    fn header_respects_minimum_chunk_size() {
        let mut header = ObjectHeader::new();
        header.push(Message::Dataspace(Dataspace::Scalar));
        let mut buf = vec![0u8; 4096];
        let mut writer = ByteWriter::new(Cursor::new(&mut buf));
        let total = header.write(&mut writer, 0, Width::EIGHT, Width::EIGHT, 256).unwrap();
        assert!(total >= 256);
    }
}
