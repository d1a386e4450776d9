// SPDX-License-Identifier: AGPL-3.0-or-later

//! PDU codec (§4.E, §6): the router-frame wire header (hand-rolled
//! big-endian byte layout, matching how the teacher hand-rolls its BHS
//! encode/decode instead of deriving it) plus the typed command/ack/nak
//! body carried as its payload.

use zerocopy::{BigEndian, FromBytes, Immutable, IntoBytes, KnownLayout, U16, U32};

use crate::{
    crypto::Hash,
    datum::{Datum, Timestamp},
    error::{GdpError, GdpResult},
    metadata::{LogName, Metadata},
};

/// Top three bits of `flags_and_type` (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    Regular = 0,
    Forward = 1,
    Advertise = 2,
    Withdraw = 3,
    NoRoute = 4,
    Reserved = 5,
    Ack = 6,
    Nak = 7,
}

impl FrameType {
    fn from_bits(b: u8) -> GdpResult<Self> {
        Ok(match b {
            0 => FrameType::Regular,
            1 => FrameType::Forward,
            2 => FrameType::Advertise,
            3 => FrameType::Withdraw,
            4 => FrameType::NoRoute,
            5 => FrameType::Reserved,
            6 => FrameType::Ack,
            7 => FrameType::Nak,
            _ => return Err(GdpError::PduCorrupt),
        })
    }
}

pub const ROUTER_FRAME_HEADER_LEN: usize = 76;
const RELIABLE_BIT: u8 = 0b0000_1000;

/// Fixed 76-byte router-frame header, big-endian on the wire (§6):
/// `{version, header_len, flags_and_type, ttl, seqno_and_fragment,
/// fragment_len, sdu_len, dst, src}`. `payload` follows immediately and
/// is not part of this struct.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct RouterFrameHeader {
    pub version: u8,
    pub header_len: u8,
    pub flags_and_type: u8,
    pub ttl: u8,
    pub seqno_and_fragment: U32<BigEndian>,
    pub fragment_len: U16<BigEndian>,
    pub sdu_len: U16<BigEndian>,
    pub dst: [u8; 32],
    pub src: [u8; 32],
}

const ROUTER_FRAME_VERSION: u8 = 1;

impl RouterFrameHeader {
    pub fn new(
        dst: LogName,
        src: LogName,
        frame_type: FrameType,
        reliable: bool,
        ttl: u8,
        seqno: u32,
        fragment: u8,
        sdu_len: u16,
    ) -> Self {
        let mut flags_and_type = (frame_type as u8) << 5;
        if reliable {
            flags_and_type |= RELIABLE_BIT;
        }
        let seqno_and_fragment = (seqno << 8) | fragment as u32;
        RouterFrameHeader {
            version: ROUTER_FRAME_VERSION,
            header_len: ROUTER_FRAME_HEADER_LEN as u8,
            flags_and_type,
            ttl: ttl & 0x3f,
            seqno_and_fragment: seqno_and_fragment.into(),
            fragment_len: 1u16.into(),
            sdu_len: sdu_len.into(),
            dst: dst.0,
            src: src.0,
        }
    }

    pub fn frame_type(&self) -> GdpResult<FrameType> {
        FrameType::from_bits(self.flags_and_type >> 5)
    }

    pub fn reliable(&self) -> bool {
        self.flags_and_type & RELIABLE_BIT != 0
    }

    pub fn seqno(&self) -> u32 {
        self.seqno_and_fragment.get() >> 8
    }

    pub fn fragment(&self) -> u8 {
        (self.seqno_and_fragment.get() & 0xff) as u8
    }

    pub fn sdu_len(&self) -> u16 {
        self.sdu_len.get()
    }

    pub fn dst_name(&self) -> LogName {
        LogName(self.dst)
    }

    pub fn src_name(&self) -> LogName {
        LogName(self.src)
    }

    pub fn encode(&self, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(ROUTER_FRAME_HEADER_LEN + payload.len());
        out.extend_from_slice(self.as_bytes());
        out.extend_from_slice(payload);
        out
    }

    pub fn decode(buf: &[u8]) -> GdpResult<(Self, &[u8])> {
        if buf.len() < ROUTER_FRAME_HEADER_LEN {
            return Err(GdpError::ShortMsg);
        }
        let (header_bytes, rest) = buf.split_at(ROUTER_FRAME_HEADER_LEN);
        let header = *RouterFrameHeader::ref_from_bytes(header_bytes)
            .map_err(|_| GdpError::PduCorrupt)?;
        if header.version != ROUTER_FRAME_VERSION {
            return Err(GdpError::VersionMismatch);
        }
        Ok((header, rest))
    }
}

/// Open mode for `CmdOpen` (§4.E).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    AppendOnly,
    ReadOnly,
    ReadAppend,
}

/// Commands, §4.E. Codes partition into ranges per §6; `code()` returns
/// the wire command byte.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Keepalive,
    Advertise { name: LogName },
    Withdraw { name: LogName },
    Ping,
    Create { metadata: Metadata },
    Open { name: LogName, mode: OpenMode },
    Close { name: LogName },
    Delete { name: LogName },
    Append { name: LogName, datums: Vec<Datum> },
    ReadByRecno { name: LogName, recno: i64, nrecs: Option<i64> },
    ReadByTs { name: LogName, ts: Timestamp, nrecs: Option<i64> },
    ReadByHash { name: LogName, hash: Hash },
    SubscribeByRecno { name: LogName, start: i64, nrecs: Option<i64>, timeout: Option<u32> },
    SubscribeByTs { name: LogName, ts: Timestamp, nrecs: Option<i64>, timeout: Option<u32> },
    SubscribeByHash { name: LogName, hash: Hash, timeout: Option<u32> },
    Unsubscribe { name: LogName },
    GetMetadata { name: LogName },
}

impl Command {
    pub fn code(&self) -> u8 {
        match self {
            Command::Keepalive => 1,
            Command::Ping => 2,
            Command::Advertise { .. } => 64,
            Command::Withdraw { .. } => 65,
            Command::Create { .. } => 66,
            Command::Open { .. } => 67,
            Command::Close { .. } => 68,
            Command::Delete { .. } => 69,
            Command::Append { .. } => 70,
            Command::ReadByRecno { .. } => 71,
            Command::ReadByTs { .. } => 72,
            Command::ReadByHash { .. } => 73,
            Command::SubscribeByRecno { .. } => 74,
            Command::SubscribeByTs { .. } => 75,
            Command::SubscribeByHash { .. } => 76,
            Command::Unsubscribe { .. } => 77,
            Command::GetMetadata { .. } => 78,
        }
    }
}

/// Acks, §4.E, codes 128..191.
#[derive(Debug, Clone, PartialEq)]
pub enum Ack {
    Success { recno: Option<i64>, ts: Option<Timestamp>, hash: Option<Hash>, metadata: Option<Metadata> },
    Created { name: LogName },
    Deleted,
    Changed { recno: i64 },
    Content { datums: Vec<Datum> },
    EndOfResults { nresults: Option<u64>, ep_stat: Option<u16> },
}

impl Ack {
    pub fn code(&self) -> u8 {
        match self {
            Ack::Success { .. } => 128,
            Ack::Created { .. } => 129,
            Ack::Deleted => 130,
            Ack::Changed { .. } => 131,
            Ack::Content { .. } => 132,
            Ack::EndOfResults { .. } => 133,
        }
    }
}

/// Naks, §4.E. Client 192..223, server 224..239, router 240..254.
#[derive(Debug, Clone, PartialEq)]
pub enum Nak {
    Generic { ep_stat: Option<u16>, description: Option<String> },
    Conflict { recno: i64 },
    RouterNoRoute,
}

impl Nak {
    pub fn code(&self) -> u8 {
        match self {
            Nak::Generic { .. } => 192,
            Nak::Conflict { .. } => 224,
            Nak::RouterNoRoute => 240,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PduBody {
    Command(Command),
    Ack(Ack),
    Nak(Nak),
}

impl PduBody {
    pub fn code(&self) -> u8 {
        match self {
            PduBody::Command(c) => c.code(),
            PduBody::Ack(a) => a.code(),
            PduBody::Nak(n) => n.code(),
        }
    }
}

/// One message at the session layer (§4.E): a body plus correlation
/// fields. `rid` correlates request/response; `l5_seqno` orders
/// asynchronous results (mod 2^15, see [`crate::event`]).
#[derive(Debug, Clone, PartialEq)]
pub struct Pdu {
    pub src: LogName,
    pub dst: LogName,
    pub l4_seqno: u32,
    pub rid: Option<u32>,
    pub l5_seqno: Option<u16>,
    pub body: PduBody,
}

struct Writer(Vec<u8>);

impl Writer {
    fn new() -> Self {
        Writer(Vec::new())
    }
    fn u8(&mut self, v: u8) {
        self.0.push(v);
    }
    fn u16(&mut self, v: u16) {
        self.0.extend_from_slice(&v.to_be_bytes());
    }
    fn u32(&mut self, v: u32) {
        self.0.extend_from_slice(&v.to_be_bytes());
    }
    fn i64(&mut self, v: i64) {
        self.0.extend_from_slice(&v.to_be_bytes());
    }
    fn u64(&mut self, v: u64) {
        self.0.extend_from_slice(&v.to_be_bytes());
    }
    fn f32(&mut self, v: f32) {
        self.0.extend_from_slice(&v.to_be_bytes());
    }
    fn bytes(&mut self, b: &[u8]) {
        self.u32(b.len() as u32);
        self.0.extend_from_slice(b);
    }
    fn name(&mut self, n: LogName) {
        self.0.extend_from_slice(&n.0);
    }
    fn opt<T>(&mut self, v: &Option<T>, f: impl FnOnce(&mut Self, &T)) {
        match v {
            Some(x) => {
                self.u8(1);
                f(self, x);
            },
            None => self.u8(0),
        }
    }
    fn timestamp(&mut self, ts: &Timestamp) {
        self.i64(ts.sec);
        self.u32(ts.nsec as u32);
        self.f32(ts.accuracy);
    }
    fn datum(&mut self, d: &Datum) {
        self.i64(d.recno);
        self.timestamp(&d.ts);
        self.0.extend_from_slice(&d.prev_hash);
        self.bytes(&d.payload);
        self.opt(&d.sig, |w, s| w.bytes(s));
    }
    fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }
    fn need(&self, n: usize) -> GdpResult<()> {
        if self.pos + n > self.buf.len() {
            Err(GdpError::ShortMsg)
        } else {
            Ok(())
        }
    }
    fn u8(&mut self) -> GdpResult<u8> {
        self.need(1)?;
        let v = self.buf[self.pos];
        self.pos += 1;
        Ok(v)
    }
    fn u16(&mut self) -> GdpResult<u16> {
        self.need(2)?;
        let v = u16::from_be_bytes(self.buf[self.pos..self.pos + 2].try_into().expect("2 bytes"));
        self.pos += 2;
        Ok(v)
    }
    fn u32(&mut self) -> GdpResult<u32> {
        self.need(4)?;
        let v = u32::from_be_bytes(self.buf[self.pos..self.pos + 4].try_into().expect("4 bytes"));
        self.pos += 4;
        Ok(v)
    }
    fn i64(&mut self) -> GdpResult<i64> {
        self.need(8)?;
        let v = i64::from_be_bytes(self.buf[self.pos..self.pos + 8].try_into().expect("8 bytes"));
        self.pos += 8;
        Ok(v)
    }
    fn u64(&mut self) -> GdpResult<u64> {
        self.need(8)?;
        let v = u64::from_be_bytes(self.buf[self.pos..self.pos + 8].try_into().expect("8 bytes"));
        self.pos += 8;
        Ok(v)
    }
    fn f32(&mut self) -> GdpResult<f32> {
        self.need(4)?;
        let v = f32::from_be_bytes(self.buf[self.pos..self.pos + 4].try_into().expect("4 bytes"));
        self.pos += 4;
        Ok(v)
    }
    fn bytes(&mut self) -> GdpResult<Vec<u8>> {
        let len = self.u32()? as usize;
        self.need(len)?;
        let v = self.buf[self.pos..self.pos + len].to_vec();
        self.pos += len;
        Ok(v)
    }
    fn name(&mut self) -> GdpResult<LogName> {
        self.need(32)?;
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&self.buf[self.pos..self.pos + 32]);
        self.pos += 32;
        Ok(LogName(arr))
    }
    fn hash(&mut self) -> GdpResult<Hash> {
        self.need(32)?;
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&self.buf[self.pos..self.pos + 32]);
        self.pos += 32;
        Ok(arr)
    }
    fn opt<T>(&mut self, f: impl FnOnce(&mut Self) -> GdpResult<T>) -> GdpResult<Option<T>> {
        match self.u8()? {
            0 => Ok(None),
            1 => Ok(Some(f(self)?)),
            _ => Err(GdpError::PduCorrupt),
        }
    }
    fn timestamp(&mut self) -> GdpResult<Timestamp> {
        Ok(Timestamp {
            sec: self.i64()?,
            nsec: self.u32()? as i32,
            accuracy: self.f32()?,
        })
    }
    fn datum(&mut self) -> GdpResult<Datum> {
        let recno = self.i64()?;
        let ts = self.timestamp()?;
        let prev_hash = self.hash()?;
        let payload = self.bytes()?;
        let sig = self.opt(|r| r.bytes())?;
        Ok(Datum { recno, ts, prev_hash, payload, sig })
    }
    fn metadata(&mut self) -> GdpResult<Metadata> {
        let bytes = self.bytes()?;
        Metadata::deserialize(&bytes)
    }
    fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }
}

impl Pdu {
    /// Serialize to the §4.E payload format (the part carried inside the
    /// router frame's `payload`).
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.name(self.src);
        w.name(self.dst);
        w.u32(self.l4_seqno);
        w.opt(&self.rid, |w, r| w.u32(*r));
        w.opt(&self.l5_seqno, |w, s| w.u16(*s));
        w.u8(self.body.code());
        match &self.body {
            PduBody::Command(cmd) => encode_command(&mut w, cmd),
            PduBody::Ack(ack) => encode_ack(&mut w, ack),
            PduBody::Nak(nak) => encode_nak(&mut w, nak),
        }
        w.into_inner()
    }

    pub fn decode(buf: &[u8]) -> GdpResult<Self> {
        let mut r = Reader::new(buf);
        let src = r.name()?;
        let dst = r.name()?;
        let l4_seqno = r.u32()?;
        let rid = r.opt(|r| r.u32())?;
        let l5_seqno = r.opt(|r| r.u16())?;
        let code = r.u8()?;
        let body = decode_body(code, &mut r)?;
        Ok(Pdu { src, dst, l4_seqno, rid, l5_seqno, body })
    }
}

fn encode_command(w: &mut Writer, cmd: &Command) {
    match cmd {
        Command::Keepalive | Command::Ping => {},
        Command::Advertise { name } | Command::Withdraw { name } => w.name(*name),
        Command::Create { metadata } => w.bytes(&metadata.serialize()),
        Command::Open { name, mode } => {
            w.name(*name);
            w.u8(match mode {
                OpenMode::AppendOnly => 0,
                OpenMode::ReadOnly => 1,
                OpenMode::ReadAppend => 2,
            });
        },
        Command::Close { name } | Command::Delete { name } | Command::Unsubscribe { name }
        | Command::GetMetadata { name } => w.name(*name),
        Command::Append { name, datums } => {
            w.name(*name);
            w.u32(datums.len() as u32);
            for d in datums {
                w.datum(d);
            }
        },
        Command::ReadByRecno { name, recno, nrecs } => {
            w.name(*name);
            w.i64(*recno);
            w.opt(nrecs, |w, n| w.i64(*n));
        },
        Command::ReadByTs { name, ts, nrecs } => {
            w.name(*name);
            w.timestamp(ts);
            w.opt(nrecs, |w, n| w.i64(*n));
        },
        Command::ReadByHash { name, hash } => {
            w.name(*name);
            w.0.extend_from_slice(hash);
        },
        Command::SubscribeByRecno { name, start, nrecs, timeout } => {
            w.name(*name);
            w.i64(*start);
            w.opt(nrecs, |w, n| w.i64(*n));
            w.opt(timeout, |w, t| w.u32(*t));
        },
        Command::SubscribeByTs { name, ts, nrecs, timeout } => {
            w.name(*name);
            w.timestamp(ts);
            w.opt(nrecs, |w, n| w.i64(*n));
            w.opt(timeout, |w, t| w.u32(*t));
        },
        Command::SubscribeByHash { name, hash, timeout } => {
            w.name(*name);
            w.0.extend_from_slice(hash);
            w.opt(timeout, |w, t| w.u32(*t));
        },
    }
}

fn encode_ack(w: &mut Writer, ack: &Ack) {
    match ack {
        Ack::Success { recno, ts, hash, metadata } => {
            w.opt(recno, |w, r| w.i64(*r));
            w.opt(ts, |w, t| w.timestamp(t));
            w.opt(hash, |w, h| w.0.extend_from_slice(h));
            w.opt(metadata, |w, m| w.bytes(&m.serialize()));
        },
        Ack::Created { name } => w.name(*name),
        Ack::Deleted => {},
        Ack::Changed { recno } => w.i64(*recno),
        Ack::Content { datums } => {
            w.u32(datums.len() as u32);
            for d in datums {
                w.datum(d);
            }
        },
        Ack::EndOfResults { nresults, ep_stat } => {
            w.opt(nresults, |w, n| w.u64(*n));
            w.opt(ep_stat, |w, s| w.u16(*s));
        },
    }
}

fn encode_nak(w: &mut Writer, nak: &Nak) {
    match nak {
        Nak::Generic { ep_stat, description } => {
            w.opt(ep_stat, |w, s| w.u16(*s));
            w.opt(description, |w, d| w.bytes(d.as_bytes()));
        },
        Nak::Conflict { recno } => w.i64(*recno),
        Nak::RouterNoRoute => {},
    }
}

fn decode_body(code: u8, r: &mut Reader<'_>) -> GdpResult<PduBody> {
    let cmd = match code {
        1 => Some(Command::Keepalive),
        2 => Some(Command::Ping),
        64 => Some(Command::Advertise { name: r.name()? }),
        65 => Some(Command::Withdraw { name: r.name()? }),
        66 => Some(Command::Create { metadata: r.metadata()? }),
        67 => {
            let name = r.name()?;
            let mode = match r.u8()? {
                0 => OpenMode::AppendOnly,
                1 => OpenMode::ReadOnly,
                2 => OpenMode::ReadAppend,
                _ => return Err(GdpError::PduCorrupt),
            };
            Some(Command::Open { name, mode })
        },
        68 => Some(Command::Close { name: r.name()? }),
        69 => Some(Command::Delete { name: r.name()? }),
        70 => {
            let name = r.name()?;
            let n = r.u32()? as usize;
            let mut datums = Vec::with_capacity(n);
            for _ in 0..n {
                datums.push(r.datum()?);
            }
            Some(Command::Append { name, datums })
        },
        71 => Some(Command::ReadByRecno {
            name: r.name()?,
            recno: r.i64()?,
            nrecs: r.opt(|r| r.i64())?,
        }),
        72 => Some(Command::ReadByTs {
            name: r.name()?,
            ts: r.timestamp()?,
            nrecs: r.opt(|r| r.i64())?,
        }),
        73 => Some(Command::ReadByHash { name: r.name()?, hash: r.hash()? }),
        74 => Some(Command::SubscribeByRecno {
            name: r.name()?,
            start: r.i64()?,
            nrecs: r.opt(|r| r.i64())?,
            timeout: r.opt(|r| r.u32())?,
        }),
        75 => Some(Command::SubscribeByTs {
            name: r.name()?,
            ts: r.timestamp()?,
            nrecs: r.opt(|r| r.i64())?,
            timeout: r.opt(|r| r.u32())?,
        }),
        76 => Some(Command::SubscribeByHash {
            name: r.name()?,
            hash: r.hash()?,
            timeout: r.opt(|r| r.u32())?,
        }),
        77 => Some(Command::Unsubscribe { name: r.name()? }),
        78 => Some(Command::GetMetadata { name: r.name()? }),
        _ => None,
    };
    if let Some(cmd) = cmd {
        return Ok(PduBody::Command(cmd));
    }

    let ack = match code {
        128 => Some(Ack::Success {
            recno: r.opt(|r| r.i64())?,
            ts: r.opt(|r| r.timestamp())?,
            hash: r.opt(|r| r.hash())?,
            metadata: r.opt(|r| r.metadata())?,
        }),
        129 => Some(Ack::Created { name: r.name()? }),
        130 => Some(Ack::Deleted),
        131 => Some(Ack::Changed { recno: r.i64()? }),
        132 => {
            let n = r.u32()? as usize;
            let mut datums = Vec::with_capacity(n);
            for _ in 0..n {
                datums.push(r.datum()?);
            }
            Some(Ack::Content { datums })
        },
        133 => Some(Ack::EndOfResults {
            nresults: r.opt(|r| r.u64())?,
            ep_stat: r.opt(|r| r.u16())?,
        }),
        _ => None,
    };
    if let Some(ack) = ack {
        return Ok(PduBody::Ack(ack));
    }

    match code {
        192 => Ok(PduBody::Nak(Nak::Generic {
            ep_stat: r.opt(|r| r.u16())?,
            description: r
                .opt(|r| r.bytes())?
                .map(|b| String::from_utf8_lossy(&b).into_owned()),
        })),
        224 => Ok(PduBody::Nak(Nak::Conflict { recno: r.i64()? })),
        240 => {
            let _ = r.remaining();
            Ok(PduBody::Nak(Nak::RouterNoRoute))
        },
        _ => Err(GdpError::PduCorrupt),
    }
}

/// Map a [`GdpError`] to the "best" ack/nak command code for the wire
/// (§4.E), using the detail-code round-trip already defined on the error
/// (§7, §8's `stat_from_acknak(acknak_from_estat(s)) == s` law).
pub fn nak_code_for_error(err: &GdpError) -> u8 {
    match err {
        GdpError::NoRoute => Nak::RouterNoRoute.code(),
        GdpError::RecnoSeqError => Nak::Conflict { recno: 0 }.code(),
        _ => Nak::Generic { ep_stat: None, description: None }.code(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_name() -> LogName {
        LogName([7u8; 32])
    }

    #[test]
    fn router_frame_header_round_trips() {
        let dst = sample_name();
        let src = LogName([9u8; 32]);
        let header = RouterFrameHeader::new(dst, src, FrameType::Regular, true, 32, 42, 0, 10);
        let encoded = header.encode(b"0123456789");
        let (decoded, payload) = RouterFrameHeader::decode(&encoded).expect("decode");
        assert_eq!(decoded.dst_name(), dst);
        assert_eq!(decoded.src_name(), src);
        assert_eq!(decoded.frame_type().expect("frame type"), FrameType::Regular);
        assert!(decoded.reliable());
        assert_eq!(decoded.seqno(), 42);
        assert_eq!(decoded.sdu_len(), 10);
        assert_eq!(payload, b"0123456789");
    }

    #[test]
    fn command_append_round_trips() {
        let pdu = Pdu {
            src: sample_name(),
            dst: LogName([1u8; 32]),
            l4_seqno: 5,
            rid: Some(99),
            l5_seqno: None,
            body: PduBody::Command(Command::Append {
                name: sample_name(),
                datums: vec![Datum::new(b"hi".to_vec())],
            }),
        };
        let bytes = pdu.encode();
        let back = Pdu::decode(&bytes).expect("decode");
        assert_eq!(back, pdu);
    }

    #[test]
    fn ack_content_round_trips_with_l5_seqno() {
        let mut d = Datum::new(b"x".to_vec());
        d.recno = 3;
        let pdu = Pdu {
            src: sample_name(),
            dst: sample_name(),
            l4_seqno: 1,
            rid: Some(1),
            l5_seqno: Some(7),
            body: PduBody::Ack(Ack::Content { datums: vec![d] }),
        };
        let bytes = pdu.encode();
        let back = Pdu::decode(&bytes).expect("decode");
        assert_eq!(back.l5_seqno, Some(7));
        assert_eq!(back, pdu);
    }

    #[test]
    fn nak_router_no_route_round_trips() {
        let pdu = Pdu {
            src: sample_name(),
            dst: sample_name(),
            l4_seqno: 0,
            rid: None,
            l5_seqno: None,
            body: PduBody::Nak(Nak::RouterNoRoute),
        };
        let bytes = pdu.encode();
        let back = Pdu::decode(&bytes).expect("decode");
        assert_eq!(back, pdu);
    }

    #[test]
    fn truncated_buffer_is_short_msg() {
        let pdu = Pdu {
            src: sample_name(),
            dst: sample_name(),
            l4_seqno: 0,
            rid: Some(1),
            l5_seqno: None,
            body: PduBody::Command(Command::GetMetadata { name: sample_name() }),
        };
        let bytes = pdu.encode();
        let truncated = &bytes[..bytes.len() - 2];
        assert!(matches!(Pdu::decode(truncated), Err(GdpError::ShortMsg)));
    }

    #[test]
    fn command_code_ranges_match_spec_partitions() {
        assert!(Command::Keepalive.code() < 64);
        assert!((64..127).contains(&Command::Append { name: sample_name(), datums: vec![] }.code()));
        assert!((128..191).contains(&(Ack::Deleted.code() as u16)));
        assert!((192..223).contains(&(Nak::Generic { ep_stat: None, description: None }.code() as u16)));
        assert!((224..239).contains(&(Nak::Conflict { recno: 0 }.code() as u16)));
        assert!((240..254).contains(&(Nak::RouterNoRoute.code() as u16)));
    }
}
