//! Just enough ASN.1 BER to speak SNMPv2c: definite lengths, primitive
//! integers, octet strings, OIDs and constructed sequences.

use crate::error::TransportError;

pub mod tag {
    pub const INTEGER: u8 = 0x02;
    pub const OCTET_STRING: u8 = 0x04;
    pub const NULL: u8 = 0x05;
    pub const OBJECT_ID: u8 = 0x06;
    pub const SEQUENCE: u8 = 0x30;

    pub const IP_ADDRESS: u8 = 0x40;
    pub const COUNTER32: u8 = 0x41;
    pub const GAUGE32: u8 = 0x42;
    pub const TIMETICKS: u8 = 0x43;
    pub const OPAQUE: u8 = 0x44;
    pub const COUNTER64: u8 = 0x46;

    pub const NO_SUCH_OBJECT: u8 = 0x80;
    pub const NO_SUCH_INSTANCE: u8 = 0x81;
    pub const END_OF_MIB_VIEW: u8 = 0x82;

    pub const GET_REQUEST: u8 = 0xa0;
    pub const GET_NEXT_REQUEST: u8 = 0xa1;
    pub const RESPONSE: u8 = 0xa2;
}

fn decode_err(msg: impl Into<String>) -> TransportError {
    TransportError::Decode(msg.into())
}

pub fn write_length(buf: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        buf.push(len as u8);
        return;
    }
    let bytes = len.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    buf.push(0x80 | (bytes.len() - skip) as u8);
    buf.extend_from_slice(&bytes[skip..]);
}

pub fn write_tlv(buf: &mut Vec<u8>, tag: u8, content: &[u8]) {
    buf.push(tag);
    write_length(buf, content.len());
    buf.extend_from_slice(content);
}

/// Minimal two's complement encoding.
pub fn encode_integer(value: i64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    while start < bytes.len() - 1 {
        let redundant = (bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0)
            || (bytes[start] == 0xff && bytes[start + 1] & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    bytes[start..].to_vec()
}

/// Unsigned encoding used by Counter32/Gauge32/Counter64 contents.
pub fn encode_unsigned(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count().min(7);
    let mut out = Vec::with_capacity(9);
    if bytes[skip] & 0x80 != 0 {
        out.push(0);
    }
    out.extend_from_slice(&bytes[skip..]);
    out
}

pub fn decode_integer(content: &[u8]) -> Result<i64, TransportError> {
    if content.is_empty() || content.len() > 8 {
        return Err(decode_err(format!("integer of {} bytes", content.len())));
    }
    let fill = if content[0] & 0x80 != 0 { 0xff } else { 0x00 };
    let mut bytes = [fill; 8];
    bytes[8 - content.len()..].copy_from_slice(content);
    Ok(i64::from_be_bytes(bytes))
}

pub fn decode_unsigned32(content: &[u8]) -> Result<u32, TransportError> {
    let value = crate::counter::counter_from_be_bytes(content)?;
    u32::try_from(value).map_err(|_| decode_err("32-bit value out of range"))
}

pub fn encode_oid(arcs: &[u32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(arcs.len() + 1);
    let (first, second) = match arcs {
        [a, b, ..] => (*a, *b),
        [a] => (*a, 0),
        [] => (0, 0),
    };
    // Widened so arcs beyond what `Oid` accepts still encode without wrapping.
    push_base128(&mut out, u64::from(first) * 40 + u64::from(second));
    for arc in arcs.iter().skip(2) {
        push_base128(&mut out, u64::from(*arc));
    }
    out
}

fn push_base128(out: &mut Vec<u8>, mut value: u64) {
    let mut tmp = [0u8; 10];
    let mut i = tmp.len() - 1;
    tmp[i] = (value & 0x7f) as u8;
    value >>= 7;
    while value > 0 {
        i -= 1;
        tmp[i] = 0x80 | (value & 0x7f) as u8;
        value >>= 7;
    }
    out.extend_from_slice(&tmp[i..]);
}

pub fn decode_oid(content: &[u8]) -> Result<Vec<u32>, TransportError> {
    let mut arcs = Vec::with_capacity(content.len() + 1);
    let mut value: u32 = 0;
    let mut pending = false;
    for b in content {
        if value > (u32::MAX >> 7) {
            return Err(decode_err("OID arc overflows 32 bits"));
        }
        value = (value << 7) | u32::from(b & 0x7f);
        pending = true;
        if b & 0x80 == 0 {
            if arcs.is_empty() {
                let first = (value / 40).min(2);
                arcs.push(first);
                arcs.push(value - first * 40);
            } else {
                arcs.push(value);
            }
            value = 0;
            pending = false;
        }
    }
    if pending || arcs.is_empty() {
        return Err(decode_err("truncated OID"));
    }
    Ok(arcs)
}

/// Cursor over a run of TLVs.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn byte(&mut self) -> Result<u8, TransportError> {
        let b = *self
            .buf
            .get(self.pos)
            .ok_or_else(|| decode_err("unexpected end of message"))?;
        self.pos += 1;
        Ok(b)
    }

    fn length(&mut self) -> Result<usize, TransportError> {
        let first = self.byte()?;
        if first & 0x80 == 0 {
            return Ok(usize::from(first));
        }
        let count = usize::from(first & 0x7f);
        if count == 0 || count > std::mem::size_of::<usize>() {
            return Err(decode_err(format!("unsupported length form 0x{first:02x}")));
        }
        let mut len = 0usize;
        for _ in 0..count {
            len = (len << 8) | usize::from(self.byte()?);
        }
        Ok(len)
    }

    pub fn read_tlv(&mut self) -> Result<(u8, &'a [u8]), TransportError> {
        let tag = self.byte()?;
        let len = self.length()?;
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| decode_err(format!("length {len} runs past end of message")))?;
        let content = &self.buf[self.pos..end];
        self.pos = end;
        Ok((tag, content))
    }

    pub fn expect(&mut self, expected: u8) -> Result<&'a [u8], TransportError> {
        let (tag, content) = self.read_tlv()?;
        if tag != expected {
            return Err(decode_err(format!(
                "expected tag 0x{expected:02x}, found 0x{tag:02x}"
            )));
        }
        Ok(content)
    }

    pub fn read_integer(&mut self) -> Result<i64, TransportError> {
        decode_integer(self.expect(tag::INTEGER)?)
    }
}
