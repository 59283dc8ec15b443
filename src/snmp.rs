//! SNMPv2c GET / GETNEXT over UDP.

use std::{
    fmt,
    io,
    net::{SocketAddr, ToSocketAddrs, UdpSocket},
    str::FromStr,
    sync::atomic::{AtomicI32, Ordering},
    time::{Duration, Instant},
};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::ber::{self, tag, Reader};
use crate::error::{Result, TransportError};

const SNMP_V2C: i64 = 1;
const MAX_DATAGRAM: usize = 65_535;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid OID '{0}'")]
pub struct InvalidOid(pub String);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Oid(Vec<u32>);

impl Oid {
    pub fn arcs(&self) -> &[u32] {
        &self.0
    }

    /// `self` with one more arc appended, e.g. a table column plus ifIndex.
    pub fn child(&self, arc: u32) -> Oid {
        let mut arcs = self.0.clone();
        arcs.push(arc);
        Oid(arcs)
    }

    pub fn starts_with(&self, prefix: &Oid) -> bool {
        self.0.starts_with(&prefix.0)
    }

    pub fn last_arc(&self) -> Option<u32> {
        self.0.last().copied()
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for arc in &self.0 {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{arc}")?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for Oid {
    type Err = InvalidOid;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let arcs = s
            .trim_start_matches('.')
            .split('.')
            .map(str::parse::<u32>)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| InvalidOid(s.to_string()))?;
        // The first two arcs share one subidentifier: first * 40 + second.
        let valid = match arcs[..] {
            [0 | 1, second, ..] => second < 40,
            [2, second, ..] => second <= u32::MAX - 80,
            _ => false,
        };
        if !valid {
            return Err(InvalidOid(s.to_string()));
        }
        Ok(Oid(arcs))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnmpValue {
    Integer(i64),
    OctetString(Vec<u8>),
    Null,
    ObjectId(Oid),
    IpAddress([u8; 4]),
    /// Raw big-endian contents.
    Counter32(Vec<u8>),
    Gauge32(u32),
    TimeTicks(u32),
    Opaque(Vec<u8>),
    /// Raw big-endian contents.
    Counter64(Vec<u8>),
    NoSuchObject,
    NoSuchInstance,
    EndOfMibView,
}

impl SnmpValue {
    fn decode(tag_byte: u8, content: &[u8]) -> Result<Self> {
        Ok(match tag_byte {
            tag::INTEGER => SnmpValue::Integer(ber::decode_integer(content)?),
            tag::OCTET_STRING => SnmpValue::OctetString(content.to_vec()),
            tag::NULL => SnmpValue::Null,
            tag::OBJECT_ID => SnmpValue::ObjectId(Oid(ber::decode_oid(content)?)),
            tag::IP_ADDRESS => {
                let octets: [u8; 4] = content
                    .try_into()
                    .map_err(|_| TransportError::Decode("IpAddress must be 4 bytes".into()))?;
                SnmpValue::IpAddress(octets)
            }
            tag::COUNTER32 => SnmpValue::Counter32(content.to_vec()),
            tag::GAUGE32 => SnmpValue::Gauge32(ber::decode_unsigned32(content)?),
            tag::TIMETICKS => SnmpValue::TimeTicks(ber::decode_unsigned32(content)?),
            tag::OPAQUE => SnmpValue::Opaque(content.to_vec()),
            tag::COUNTER64 => SnmpValue::Counter64(content.to_vec()),
            tag::NO_SUCH_OBJECT => SnmpValue::NoSuchObject,
            tag::NO_SUCH_INSTANCE => SnmpValue::NoSuchInstance,
            tag::END_OF_MIB_VIEW => SnmpValue::EndOfMibView,
            other => {
                return Err(TransportError::Decode(format!(
                    "unsupported value tag 0x{other:02x}"
                )))
            }
        })
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            SnmpValue::Integer(v) => ber::write_tlv(buf, tag::INTEGER, &ber::encode_integer(*v)),
            SnmpValue::OctetString(v) => ber::write_tlv(buf, tag::OCTET_STRING, v),
            SnmpValue::Null => ber::write_tlv(buf, tag::NULL, &[]),
            SnmpValue::ObjectId(oid) => ber::write_tlv(buf, tag::OBJECT_ID, &ber::encode_oid(oid.arcs())),
            SnmpValue::IpAddress(v) => ber::write_tlv(buf, tag::IP_ADDRESS, v),
            SnmpValue::Counter32(v) => ber::write_tlv(buf, tag::COUNTER32, v),
            SnmpValue::Gauge32(v) => {
                ber::write_tlv(buf, tag::GAUGE32, &ber::encode_unsigned(u64::from(*v)))
            }
            SnmpValue::TimeTicks(v) => {
                ber::write_tlv(buf, tag::TIMETICKS, &ber::encode_unsigned(u64::from(*v)))
            }
            SnmpValue::Opaque(v) => ber::write_tlv(buf, tag::OPAQUE, v),
            SnmpValue::Counter64(v) => ber::write_tlv(buf, tag::COUNTER64, v),
            SnmpValue::NoSuchObject => ber::write_tlv(buf, tag::NO_SUCH_OBJECT, &[]),
            SnmpValue::NoSuchInstance => ber::write_tlv(buf, tag::NO_SUCH_INSTANCE, &[]),
            SnmpValue::EndOfMibView => ber::write_tlv(buf, tag::END_OF_MIB_VIEW, &[]),
        }
    }

    pub fn as_text(&self) -> Option<String> {
        match self {
            SnmpValue::OctetString(v) => Some(String::from_utf8_lossy(v).into_owned()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarBind {
    pub oid: Oid,
    pub value: SnmpValue,
}

impl VarBind {
    pub fn new(oid: Oid, value: SnmpValue) -> Self {
        Self { oid, value }
    }

    /// Turn SNMPv2 exception values into errors.
    pub fn check(&self) -> Result<()> {
        match self.value {
            SnmpValue::NoSuchObject => Err(TransportError::NoSuchObject(self.oid.clone())),
            SnmpValue::NoSuchInstance => Err(TransportError::NoSuchInstance(self.oid.clone())),
            SnmpValue::EndOfMibView => Err(TransportError::EndOfMibView(self.oid.clone())),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduKind {
    Get,
    GetNext,
    Response,
}

impl PduKind {
    fn tag(self) -> u8 {
        match self {
            PduKind::Get => tag::GET_REQUEST,
            PduKind::GetNext => tag::GET_NEXT_REQUEST,
            PduKind::Response => tag::RESPONSE,
        }
    }

    fn from_tag(t: u8) -> Result<Self> {
        match t {
            tag::GET_REQUEST => Ok(PduKind::Get),
            tag::GET_NEXT_REQUEST => Ok(PduKind::GetNext),
            tag::RESPONSE => Ok(PduKind::Response),
            other => Err(TransportError::Decode(format!("unsupported PDU 0x{other:02x}"))),
        }
    }
}

/// A v2c message with its PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub community: Vec<u8>,
    pub kind: PduKind,
    pub request_id: i32,
    pub error_status: i64,
    pub error_index: i64,
    pub varbinds: Vec<VarBind>,
}

impl Message {
    pub fn request(kind: PduKind, community: &[u8], request_id: i32, oids: &[Oid]) -> Self {
        Self {
            community: community.to_vec(),
            kind,
            request_id,
            error_status: 0,
            error_index: 0,
            varbinds: oids
                .iter()
                .map(|oid| VarBind::new(oid.clone(), SnmpValue::Null))
                .collect(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut list = Vec::new();
        for vb in &self.varbinds {
            let mut entry = Vec::new();
            ber::write_tlv(&mut entry, tag::OBJECT_ID, &ber::encode_oid(vb.oid.arcs()));
            vb.value.encode(&mut entry);
            ber::write_tlv(&mut list, tag::SEQUENCE, &entry);
        }

        let mut pdu = Vec::new();
        ber::write_tlv(&mut pdu, tag::INTEGER, &ber::encode_integer(i64::from(self.request_id)));
        ber::write_tlv(&mut pdu, tag::INTEGER, &ber::encode_integer(self.error_status));
        ber::write_tlv(&mut pdu, tag::INTEGER, &ber::encode_integer(self.error_index));
        ber::write_tlv(&mut pdu, tag::SEQUENCE, &list);

        let mut body = Vec::new();
        ber::write_tlv(&mut body, tag::INTEGER, &ber::encode_integer(SNMP_V2C));
        ber::write_tlv(&mut body, tag::OCTET_STRING, &self.community);
        ber::write_tlv(&mut body, self.kind.tag(), &pdu);

        let mut out = Vec::with_capacity(body.len() + 4);
        ber::write_tlv(&mut out, tag::SEQUENCE, &body);
        out
    }

    pub fn decode(datagram: &[u8]) -> Result<Self> {
        let body = Reader::new(datagram).expect(tag::SEQUENCE)?;
        let mut fields = Reader::new(body);

        let version = fields.read_integer()?;
        if version != SNMP_V2C {
            return Err(TransportError::Decode(format!("unsupported SNMP version {version}")));
        }
        let community = fields.expect(tag::OCTET_STRING)?.to_vec();
        let (pdu_tag, pdu) = fields.read_tlv()?;
        let kind = PduKind::from_tag(pdu_tag)?;

        let mut pdu = Reader::new(pdu);
        let request_id = i32::try_from(pdu.read_integer()?)
            .map_err(|_| TransportError::Decode("request-id out of range".into()))?;
        let error_status = pdu.read_integer()?;
        let error_index = pdu.read_integer()?;

        let mut list = Reader::new(pdu.expect(tag::SEQUENCE)?);
        let mut varbinds = Vec::new();
        while !list.is_empty() {
            let mut entry = Reader::new(list.expect(tag::SEQUENCE)?);
            let oid = Oid(ber::decode_oid(entry.expect(tag::OBJECT_ID)?)?);
            let (value_tag, content) = entry.read_tlv()?;
            varbinds.push(VarBind::new(oid, SnmpValue::decode(value_tag, content)?));
        }

        Ok(Self {
            community,
            kind,
            request_id,
            error_status,
            error_index,
            varbinds,
        })
    }
}

/// Blocking SNMPv2c client bound to one agent.
pub struct SnmpSession {
    socket: UdpSocket,
    agent: SocketAddr,
    community: Vec<u8>,
    timeout: Duration,
    retries: u32,
    next_id: AtomicI32,
}

impl SnmpSession {
    pub fn open(
        host: &str,
        port: u16,
        community: &str,
        timeout: Duration,
        retries: u32,
    ) -> Result<Self> {
        let agent = (host, port).to_socket_addrs()?.next().ok_or_else(|| {
            TransportError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("could not resolve {host}"),
            ))
        })?;
        let local: SocketAddr = if agent.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(local)?;
        info!(%agent, timeout_ms = timeout.as_millis() as u64, retries, "SNMP session opened");

        Ok(Self {
            socket,
            agent,
            community: community.as_bytes().to_vec(),
            timeout,
            retries,
            next_id: AtomicI32::new(1),
        })
    }

    pub fn agent(&self) -> SocketAddr {
        self.agent
    }

    fn request_id(&self) -> i32 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if id == i32::MAX {
            self.next_id.store(1, Ordering::Relaxed);
        }
        id
    }

    fn exchange(&self, kind: PduKind, oids: &[Oid]) -> Result<Vec<VarBind>> {
        let request_id = self.request_id();
        let datagram = Message::request(kind, &self.community, request_id, oids).encode();
        let mut buf = vec![0u8; MAX_DATAGRAM];

        for attempt in 0..=self.retries {
            if attempt > 0 {
                debug!(request_id, attempt, "resending SNMP request");
            }
            self.socket.send_to(&datagram, self.agent)?;
            let deadline = Instant::now() + self.timeout;

            loop {
                let remaining = match deadline.checked_duration_since(Instant::now()) {
                    Some(r) if !r.is_zero() => r,
                    _ => break,
                };
                self.socket.set_read_timeout(Some(remaining))?;
                let (len, from) = match self.socket.recv_from(&mut buf) {
                    Ok(received) => received,
                    Err(e)
                        if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
                    {
                        break
                    }
                    Err(e) => return Err(e.into()),
                };
                if from != self.agent {
                    continue;
                }
                let response = match Message::decode(&buf[..len]) {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(error = %e, "discarding undecodable datagram");
                        continue;
                    }
                };
                if response.kind != PduKind::Response || response.request_id != request_id {
                    continue;
                }
                if response.error_status != 0 {
                    return Err(TransportError::ErrorStatus {
                        status: response.error_status,
                        index: response.error_index,
                    });
                }
                return Ok(response.varbinds);
            }
        }

        Err(TransportError::Timeout {
            agent: self.agent.to_string(),
            attempts: self.retries + 1,
        })
    }

    /// GET all `oids` in one request. Exception values fail the whole call.
    pub fn get(&self, oids: &[Oid]) -> Result<Vec<VarBind>> {
        let varbinds = self.exchange(PduKind::Get, oids)?;
        if varbinds.len() != oids.len() {
            return Err(TransportError::VarBindCount {
                expected: oids.len(),
                got: varbinds.len(),
            });
        }
        for vb in &varbinds {
            vb.check()?;
        }
        Ok(varbinds)
    }

    pub fn get_next(&self, oid: &Oid) -> Result<VarBind> {
        self.exchange(PduKind::GetNext, std::slice::from_ref(oid))?
            .into_iter()
            .next()
            .ok_or(TransportError::VarBindCount { expected: 1, got: 0 })
    }

    /// Every varbind under `base`, in agent order.
    pub fn walk(&self, base: &Oid) -> Result<Vec<VarBind>> {
        let mut out = Vec::new();
        let mut cursor = base.clone();
        loop {
            let vb = self.get_next(&cursor)?;
            if !vb.oid.starts_with(base) || matches!(vb.value, SnmpValue::EndOfMibView) {
                break;
            }
            if vb.oid <= cursor {
                warn!(oid = %vb.oid, "agent returned non-increasing OID, stopping walk");
                break;
            }
            cursor = vb.oid.clone();
            out.push(vb);
        }
        Ok(out)
    }
}
