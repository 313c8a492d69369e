// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! UDP frame codec (version 1).
//!
//! ```text
//! 0       4     5      6         8
//! +-------+-----+------+---------+----------------------------+
//! | HRMS  | ver | kind | reserved| body ...                   |
//! +-------+-----+------+---------+----------------------------+
//!
//! DATA     reliability u8 | pad u8 | MessageInfo (32) | channel str16 | payload u32-len
//! ANNOUNCE identity (16) | pid u32 | reliability u8 | pad u8 | depth u32
//!          | host str16 | node str16 | channel str16
//! WITHDRAW identity (16)
//! ```
//!
//! All integers little-endian. `str16` is a u16 length followed by UTF-8.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

use crate::endpoint::Endpoint;
use crate::identity::Identity;
use crate::message::MessageInfo;
use crate::role::{QosProfile, Reliability, RoleAttributes};

/// `HRMS`
pub const FRAME_MAGIC: [u8; 4] = *b"HRMS";

/// Current frame layout version.
pub const FRAME_VERSION: u8 = 1;

const HEADER_LEN: usize = 8;

const KIND_DATA: u8 = 1;
const KIND_ANNOUNCE: u8 = 2;
const KIND_WITHDRAW: u8 = 3;

/// One UDP datagram.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// Application message.
    Data {
        /// Reliability of the sending writer.
        reliability: Reliability,
        /// Channel the message belongs to.
        channel: String,
        /// Stamped metadata.
        info: MessageInfo,
        /// Opaque payload.
        payload: Bytes,
    },
    /// Periodic writer advertisement.
    Announce(Endpoint),
    /// Writer going away.
    Withdraw(Identity),
}

/// Decoding failures. Malformed datagrams are logged and dropped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrameError {
    /// Datagram ends before the layout says it should.
    Truncated,
    /// Not a hermes frame.
    BadMagic,
    /// Frame from an incompatible layout version.
    Version(u8),
    /// Unknown frame kind.
    UnknownKind(u8),
    /// String field is not UTF-8.
    BadString,
    /// String field longer than a u16 length can carry.
    FieldTooLong(usize),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "truncated frame"),
            Self::BadMagic => write!(f, "bad magic"),
            Self::Version(v) => write!(f, "unsupported frame version {} (expected {})", v, FRAME_VERSION),
            Self::UnknownKind(k) => write!(f, "unknown frame kind {}", k),
            Self::BadString => write!(f, "invalid UTF-8 in string field"),
            Self::FieldTooLong(len) => write!(f, "string field of {} bytes exceeds u16 length", len),
        }
    }
}

impl std::error::Error for FrameError {}

impl Frame {
    /// Serialize into a datagram.
    pub fn encode(&self) -> Result<Bytes, FrameError> {
        let mut buf = BytesMut::with_capacity(self.encoded_len_hint());
        buf.put_slice(&FRAME_MAGIC);
        buf.put_u8(FRAME_VERSION);
        buf.put_u8(self.kind());
        buf.put_u16_le(0);

        match self {
            Self::Data {
                reliability,
                channel,
                info,
                payload,
            } => {
                buf.put_u8(reliability.to_u8());
                buf.put_u8(0);
                put_info(&mut buf, info);
                put_str(&mut buf, channel)?;
                buf.put_u32_le(payload.len() as u32);
                buf.put_slice(payload);
            }
            Self::Announce(endpoint) => {
                let attr = endpoint.attributes();
                buf.put_slice(&endpoint.id().as_bytes());
                buf.put_u32_le(attr.process_id);
                buf.put_u8(attr.qos.reliability.to_u8());
                buf.put_u8(0);
                buf.put_u32_le(attr.qos.history_depth as u32);
                put_str(&mut buf, &attr.host_name)?;
                put_str(&mut buf, &attr.node_name)?;
                put_str(&mut buf, &attr.channel_name)?;
            }
            Self::Withdraw(id) => buf.put_slice(&id.as_bytes()),
        }
        Ok(buf.freeze())
    }

    /// Parse a datagram.
    pub fn decode(datagram: &[u8]) -> Result<Self, FrameError> {
        let mut buf = datagram;
        need(buf, HEADER_LEN)?;
        if buf[..4] != FRAME_MAGIC {
            return Err(FrameError::BadMagic);
        }
        buf.advance(4);
        let version = buf.get_u8();
        if version != FRAME_VERSION {
            return Err(FrameError::Version(version));
        }
        let kind = buf.get_u8();
        buf.advance(2);

        match kind {
            KIND_DATA => {
                need(buf, 2 + MessageInfo::WIRE_LEN)?;
                let reliability = Reliability::from_u8(buf.get_u8());
                buf.advance(1);
                let info = MessageInfo::decode(buf).ok_or(FrameError::Truncated)?;
                buf.advance(MessageInfo::WIRE_LEN);
                let channel = get_str(&mut buf)?;
                need(buf, 4)?;
                let len = buf.get_u32_le() as usize;
                need(buf, len)?;
                let payload = Bytes::copy_from_slice(&buf[..len]);
                Ok(Self::Data {
                    reliability,
                    channel,
                    info,
                    payload,
                })
            }
            KIND_ANNOUNCE => {
                need(buf, Identity::WIRE_LEN + 10)?;
                let id = get_identity(&mut buf);
                let process_id = buf.get_u32_le();
                let reliability = Reliability::from_u8(buf.get_u8());
                buf.advance(1);
                let depth = buf.get_u32_le() as usize;
                let host = get_str(&mut buf)?;
                let node = get_str(&mut buf)?;
                let channel = get_str(&mut buf)?;
                let qos = QosProfile {
                    history_depth: depth.max(1),
                    reliability,
                    ..QosProfile::default()
                };
                let attributes = RoleAttributes::new(host, process_id, node, channel).with_qos(qos);
                Ok(Self::Announce(Endpoint::with_identity(id, attributes)))
            }
            KIND_WITHDRAW => {
                need(buf, Identity::WIRE_LEN)?;
                Ok(Self::Withdraw(get_identity(&mut buf)))
            }
            other => Err(FrameError::UnknownKind(other)),
        }
    }

    fn kind(&self) -> u8 {
        match self {
            Self::Data { .. } => KIND_DATA,
            Self::Announce(_) => KIND_ANNOUNCE,
            Self::Withdraw(_) => KIND_WITHDRAW,
        }
    }

    fn encoded_len_hint(&self) -> usize {
        match self {
            Self::Data { channel, payload, .. } => {
                HEADER_LEN + 2 + MessageInfo::WIRE_LEN + 2 + channel.len() + 4 + payload.len()
            }
            Self::Announce(_) => 128,
            Self::Withdraw(_) => HEADER_LEN + Identity::WIRE_LEN,
        }
    }
}

fn need(buf: &[u8], len: usize) -> Result<(), FrameError> {
    if buf.remaining() < len {
        Err(FrameError::Truncated)
    } else {
        Ok(())
    }
}

fn put_info(buf: &mut BytesMut, info: &MessageInfo) {
    let mut raw = [0u8; MessageInfo::WIRE_LEN];
    if info.encode_into(&mut raw).is_some() {
        buf.put_slice(&raw);
    }
}

fn put_str(buf: &mut BytesMut, s: &str) -> Result<(), FrameError> {
    let len = u16::try_from(s.len()).map_err(|_| FrameError::FieldTooLong(s.len()))?;
    buf.put_u16_le(len);
    buf.put_slice(s.as_bytes());
    Ok(())
}

fn get_str(buf: &mut &[u8]) -> Result<String, FrameError> {
    need(buf, 2)?;
    let len = buf.get_u16_le() as usize;
    need(buf, len)?;
    let s = std::str::from_utf8(&buf[..len]).map_err(|_| FrameError::BadString)?;
    let owned = s.to_string();
    buf.advance(len);
    Ok(owned)
}

fn get_identity(buf: &mut &[u8]) -> Identity {
    let mut raw = [0u8; Identity::WIRE_LEN];
    buf.copy_to_slice(&mut raw);
    Identity::from_bytes(raw)
}
