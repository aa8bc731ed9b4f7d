// MIT License
//
// Copyright (c) 2025 Takatoshi Kondo
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! MQTT 3.1.1 packet types and their wire representation.
//!
//! The client side of the protocol needs CONNECT, CONNACK, PUBLISH, PUBACK,
//! SUBSCRIBE, SUBACK, UNSUBSCRIBE, UNSUBACK, PINGREQ, PINGRESP and
//! DISCONNECT. QoS 2 packet types are intentionally absent.

pub mod codec;

use bytes::Bytes;

use codec::{
    read_binary_slice, read_fixed_header, read_string_slice, read_u16, variable_int_len,
    write_binary, write_fixed_header, write_string, write_u16,
};

pub use codec::FixedHeader;

/// Default upper bound on a single packet's total wire size.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 1024 * 1024;

/// Packet decode/encode error.
///
/// `Incomplete` is not a failure: it signals that the reader must
/// accumulate more bytes before retrying the decode.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// More bytes are required to finish decoding.
    #[error("incomplete packet: need {needed} more bytes")]
    Incomplete { needed: usize },

    /// Unknown or unsupported packet type nibble.
    #[error("invalid packet type: {0}")]
    InvalidPacketType(u8),

    /// QoS field outside 0..=2.
    #[error("invalid QoS value: {0}")]
    InvalidQos(u8),

    /// CONNACK return code outside the defined range.
    #[error("invalid connect return code: {0}")]
    InvalidReturnCode(u8),

    /// A length-prefixed string field is not valid UTF-8.
    #[error("invalid UTF-8 in string field")]
    InvalidUtf8,

    /// Declared packet size exceeds the configured maximum.
    #[error("packet too large: {size} exceeds {max}")]
    PacketTooLarge { size: usize, max: usize },

    /// Encode target buffer cannot hold the packet.
    #[error("buffer too small: required {required}, available {available}")]
    BufferTooSmall { required: usize, available: usize },

    /// Structurally invalid packet content.
    #[error("malformed packet: {0}")]
    Malformed(&'static str),
}

impl CodecError {
    /// True when the decoder only needs more bytes.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, CodecError::Incomplete { .. })
    }
}

/// Quality of Service level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum QoS {
    /// At most once delivery (fire and forget).
    #[default]
    AtMostOnce = 0,
    /// At least once delivery (PUBACK acknowledged).
    AtLeastOnce = 1,
    /// Exactly once delivery. Wire-representable but not driven by this client.
    ExactlyOnce = 2,
}

impl QoS {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(QoS::AtMostOnce),
            1 => Some(QoS::AtLeastOnce),
            2 => Some(QoS::ExactlyOnce),
            _ => None,
        }
    }
}

/// MQTT control packet type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Connect = 1,
    Connack = 2,
    Publish = 3,
    Puback = 4,
    Subscribe = 8,
    Suback = 9,
    Unsubscribe = 10,
    Unsuback = 11,
    Pingreq = 12,
    Pingresp = 13,
    Disconnect = 14,
}

impl PacketType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(PacketType::Connect),
            2 => Some(PacketType::Connack),
            3 => Some(PacketType::Publish),
            4 => Some(PacketType::Puback),
            8 => Some(PacketType::Subscribe),
            9 => Some(PacketType::Suback),
            10 => Some(PacketType::Unsubscribe),
            11 => Some(PacketType::Unsuback),
            12 => Some(PacketType::Pingreq),
            13 => Some(PacketType::Pingresp),
            14 => Some(PacketType::Disconnect),
            _ => None,
        }
    }
}

/// CONNACK return code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectReturnCode {
    Accepted = 0,
    UnacceptableProtocolVersion = 1,
    IdentifierRejected = 2,
    ServerUnavailable = 3,
    BadCredentials = 4,
    NotAuthorized = 5,
}

impl ConnectReturnCode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ConnectReturnCode::Accepted),
            1 => Some(ConnectReturnCode::UnacceptableProtocolVersion),
            2 => Some(ConnectReturnCode::IdentifierRejected),
            3 => Some(ConnectReturnCode::ServerUnavailable),
            4 => Some(ConnectReturnCode::BadCredentials),
            5 => Some(ConnectReturnCode::NotAuthorized),
            _ => None,
        }
    }

    /// True when retrying the connection cannot succeed: the broker rejected
    /// the protocol level, the client identifier, or the credentials.
    /// `ServerUnavailable` is the only retryable rejection.
    pub fn is_fatal(self) -> bool {
        !matches!(
            self,
            ConnectReturnCode::Accepted | ConnectReturnCode::ServerUnavailable
        )
    }
}

impl std::fmt::Display for ConnectReturnCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectReturnCode::Accepted => "connection accepted",
            ConnectReturnCode::UnacceptableProtocolVersion => "unacceptable protocol version",
            ConnectReturnCode::IdentifierRejected => "identifier rejected",
            ConnectReturnCode::ServerUnavailable => "server unavailable",
            ConnectReturnCode::BadCredentials => "bad user name or password",
            ConnectReturnCode::NotAuthorized => "not authorized",
        };
        f.write_str(s)
    }
}

/// MQTT 3.1.1 packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Connect(Connect),
    Connack(Connack),
    Publish(Publish),
    Puback(Puback),
    Subscribe(Subscribe),
    Suback(Suback),
    Unsubscribe(Unsubscribe),
    Unsuback(Unsuback),
    Pingreq,
    Pingresp,
    Disconnect,
}

/// CONNECT packet.
#[derive(Debug, Clone, PartialEq)]
pub struct Connect {
    pub client_id: String,
    pub keep_alive: u16,
    pub clean_session: bool,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
}

/// CONNACK packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connack {
    pub session_present: bool,
    pub code: ConnectReturnCode,
}

/// PUBLISH packet.
#[derive(Debug, Clone, PartialEq)]
pub struct Publish {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
    pub dup: bool,
    pub pkid: u16,
}

/// PUBACK packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Puback {
    pub pkid: u16,
}

/// SUBSCRIBE packet.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscribe {
    pub pkid: u16,
    pub filters: Vec<SubscribeFilter>,
}

/// Single topic filter entry within a SUBSCRIBE packet.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscribeFilter {
    pub path: String,
    pub qos: QoS,
}

/// SUBACK packet.
#[derive(Debug, Clone, PartialEq)]
pub struct Suback {
    pub pkid: u16,
    pub return_codes: Vec<SubscribeReturnCode>,
}

/// Per-filter SUBACK return code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeReturnCode {
    Success(QoS),
    Failure,
}

impl SubscribeReturnCode {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => SubscribeReturnCode::Success(QoS::AtMostOnce),
            1 => SubscribeReturnCode::Success(QoS::AtLeastOnce),
            2 => SubscribeReturnCode::Success(QoS::ExactlyOnce),
            _ => SubscribeReturnCode::Failure,
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            SubscribeReturnCode::Success(QoS::AtMostOnce) => 0,
            SubscribeReturnCode::Success(QoS::AtLeastOnce) => 1,
            SubscribeReturnCode::Success(QoS::ExactlyOnce) => 2,
            SubscribeReturnCode::Failure => 0x80,
        }
    }
}

/// UNSUBSCRIBE packet.
#[derive(Debug, Clone, PartialEq)]
pub struct Unsubscribe {
    pub pkid: u16,
    pub topics: Vec<String>,
}

/// UNSUBACK packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unsuback {
    pub pkid: u16,
}

// ============================================================================
// Packet parsing
// ============================================================================

impl Packet {
    /// Parse one packet from the front of `buf`.
    ///
    /// Returns the packet and the number of bytes consumed.
    /// `CodecError::Incomplete` asks the caller for more bytes.
    pub fn read(buf: &[u8], max_size: usize) -> Result<(Packet, usize), CodecError> {
        let header = read_fixed_header(buf)?;
        let total_len = header.header_length + header.remaining_length as usize;

        if total_len > max_size {
            return Err(CodecError::PacketTooLarge {
                size: total_len,
                max: max_size,
            });
        }

        if buf.len() < total_len {
            return Err(CodecError::Incomplete {
                needed: total_len - buf.len(),
            });
        }

        let payload = &buf[header.header_length..total_len];

        // The declared remaining length is fully buffered at this point, so a
        // body reader asking for more bytes means the length field lies about
        // the body. That must not surface as `Incomplete`: waiting for more
        // bytes would never resolve it.
        let packet = Self::read_body(&header, payload).map_err(|e| {
            if e.is_incomplete() {
                CodecError::Malformed("remaining length shorter than packet body")
            } else {
                e
            }
        })?;

        Ok((packet, total_len))
    }

    fn read_body(header: &FixedHeader, payload: &[u8]) -> Result<Packet, CodecError> {
        let packet = match header.packet_type {
            PacketType::Connect => Packet::Connect(Connect::read(payload)?),
            PacketType::Connack => Packet::Connack(Connack::read(payload)?),
            PacketType::Publish => Packet::Publish(Publish::read(header.flags, payload)?),
            PacketType::Puback => Packet::Puback(Puback::read(payload)?),
            PacketType::Subscribe => Packet::Subscribe(Subscribe::read(payload)?),
            PacketType::Suback => Packet::Suback(Suback::read(payload)?),
            PacketType::Unsubscribe => Packet::Unsubscribe(Unsubscribe::read(payload)?),
            PacketType::Unsuback => Packet::Unsuback(Unsuback::read(payload)?),
            PacketType::Pingreq => Packet::Pingreq,
            PacketType::Pingresp => Packet::Pingresp,
            PacketType::Disconnect => Packet::Disconnect,
        };

        Ok(packet)
    }

    /// Write the packet into `buf`, returning the bytes written.
    pub fn write(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        match self {
            Packet::Connect(p) => p.write(buf),
            Packet::Connack(p) => p.write(buf),
            Packet::Publish(p) => p.write(buf),
            Packet::Puback(p) => p.write(buf),
            Packet::Subscribe(p) => p.write(buf),
            Packet::Suback(p) => p.write(buf),
            Packet::Unsubscribe(p) => p.write(buf),
            Packet::Unsuback(p) => p.write(buf),
            Packet::Pingreq => write_simple_packet(buf, PacketType::Pingreq),
            Packet::Pingresp => write_simple_packet(buf, PacketType::Pingresp),
            Packet::Disconnect => write_simple_packet(buf, PacketType::Disconnect),
        }
    }

    /// Exact wire size of the packet.
    pub fn size(&self) -> usize {
        match self {
            Packet::Connect(p) => p.size(),
            Packet::Connack(_) => 4,
            Packet::Publish(p) => p.size(),
            Packet::Puback(_) => 4,
            Packet::Subscribe(p) => p.size(),
            Packet::Suback(p) => p.size(),
            Packet::Unsubscribe(p) => p.size(),
            Packet::Unsuback(_) => 4,
            Packet::Pingreq | Packet::Pingresp | Packet::Disconnect => 2,
        }
    }

    /// Encode the packet into a freshly allocated wire frame.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let mut buf = vec![0u8; self.size()];
        let written = self.write(&mut buf)?;
        buf.truncate(written);
        Ok(buf)
    }

    /// Short name for logging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Packet::Connect(_) => "CONNECT",
            Packet::Connack(_) => "CONNACK",
            Packet::Publish(_) => "PUBLISH",
            Packet::Puback(_) => "PUBACK",
            Packet::Subscribe(_) => "SUBSCRIBE",
            Packet::Suback(_) => "SUBACK",
            Packet::Unsubscribe(_) => "UNSUBSCRIBE",
            Packet::Unsuback(_) => "UNSUBACK",
            Packet::Pingreq => "PINGREQ",
            Packet::Pingresp => "PINGRESP",
            Packet::Disconnect => "DISCONNECT",
        }
    }
}

fn write_simple_packet(buf: &mut [u8], packet_type: PacketType) -> Result<usize, CodecError> {
    write_fixed_header(buf, packet_type, 0, 0).ok_or(CodecError::BufferTooSmall {
        required: 2,
        available: buf.len(),
    })
}

// ============================================================================
// Individual packet implementations
// ============================================================================

impl Connect {
    const FLAG_CLEAN_SESSION: u8 = 0x02;
    const FLAG_PASSWORD: u8 = 0x40;
    const FLAG_USERNAME: u8 = 0x80;

    pub fn read(buf: &[u8]) -> Result<Self, CodecError> {
        let mut pos = 0;

        let (name, len) = read_string_slice(buf)?;
        if name != "MQTT" {
            return Err(CodecError::Malformed("bad protocol name"));
        }
        pos += len;

        if buf.len() < pos + 4 {
            return Err(CodecError::Incomplete {
                needed: pos + 4 - buf.len(),
            });
        }
        let protocol_level = buf[pos];
        if protocol_level != 4 {
            return Err(CodecError::Malformed("unsupported protocol level"));
        }
        pos += 1;

        let flags = buf[pos];
        if flags & 0x01 != 0 {
            return Err(CodecError::Malformed("reserved connect flag set"));
        }
        pos += 1;

        let keep_alive = read_u16(&buf[pos..]).ok_or(CodecError::Incomplete { needed: 2 })?;
        pos += 2;

        let (client_id, len) = read_string_slice(&buf[pos..])?;
        let client_id = client_id.to_string();
        pos += len;

        let username = if flags & Self::FLAG_USERNAME != 0 {
            let (u, len) = read_string_slice(&buf[pos..])?;
            pos += len;
            Some(u.to_string())
        } else {
            None
        };

        let password = if flags & Self::FLAG_PASSWORD != 0 {
            let (p, _len) = read_binary_slice(&buf[pos..])?;
            Some(p.to_vec())
        } else {
            None
        };

        Ok(Connect {
            client_id,
            keep_alive,
            clean_session: flags & Self::FLAG_CLEAN_SESSION != 0,
            username,
            password,
        })
    }

    pub fn write(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        let remaining_len = self.remaining_length();
        let header_len = 1 + variable_int_len(remaining_len as u32);
        let total = header_len + remaining_len;

        if buf.len() < total {
            return Err(CodecError::BufferTooSmall {
                required: total,
                available: buf.len(),
            });
        }

        let mut pos = write_fixed_header(buf, PacketType::Connect, 0, remaining_len as u32)
            .ok_or(CodecError::BufferTooSmall {
                required: header_len,
                available: buf.len(),
            })?;

        pos += write_string(&mut buf[pos..], "MQTT").ok_or(CodecError::BufferTooSmall {
            required: 6,
            available: buf.len() - pos,
        })?;

        buf[pos] = 4; // protocol level
        pos += 1;

        let mut flags = 0u8;
        if self.clean_session {
            flags |= Self::FLAG_CLEAN_SESSION;
        }
        if self.username.is_some() {
            flags |= Self::FLAG_USERNAME;
        }
        if self.password.is_some() {
            flags |= Self::FLAG_PASSWORD;
        }
        buf[pos] = flags;
        pos += 1;

        write_u16(&mut buf[pos..], self.keep_alive).ok_or(CodecError::BufferTooSmall {
            required: 2,
            available: buf.len() - pos,
        })?;
        pos += 2;

        pos += write_string(&mut buf[pos..], &self.client_id).ok_or(
            CodecError::BufferTooSmall {
                required: 2 + self.client_id.len(),
                available: buf.len() - pos,
            },
        )?;

        if let Some(ref username) = self.username {
            pos += write_string(&mut buf[pos..], username).ok_or(CodecError::BufferTooSmall {
                required: 2 + username.len(),
                available: buf.len() - pos,
            })?;
        }

        if let Some(ref password) = self.password {
            pos += write_binary(&mut buf[pos..], password).ok_or(CodecError::BufferTooSmall {
                required: 2 + password.len(),
                available: buf.len() - pos,
            })?;
        }

        Ok(pos)
    }

    fn remaining_length(&self) -> usize {
        // protocol name + level + flags + keep_alive
        let mut len = 2 + 4 + 1 + 1 + 2;
        len += 2 + self.client_id.len();

        if let Some(ref username) = self.username {
            len += 2 + username.len();
        }
        if let Some(ref password) = self.password {
            len += 2 + password.len();
        }

        len
    }

    pub fn size(&self) -> usize {
        let remaining = self.remaining_length();
        1 + variable_int_len(remaining as u32) + remaining
    }
}

impl Connack {
    pub fn read(buf: &[u8]) -> Result<Self, CodecError> {
        if buf.len() < 2 {
            return Err(CodecError::Incomplete {
                needed: 2 - buf.len(),
            });
        }

        let session_present = buf[0] & 0x01 != 0;
        let code = ConnectReturnCode::from_u8(buf[1]).ok_or(CodecError::InvalidReturnCode(buf[1]))?;

        Ok(Connack {
            session_present,
            code,
        })
    }

    pub fn write(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        if buf.len() < 4 {
            return Err(CodecError::BufferTooSmall {
                required: 4,
                available: buf.len(),
            });
        }

        write_fixed_header(buf, PacketType::Connack, 0, 2).ok_or(CodecError::BufferTooSmall {
            required: 2,
            available: buf.len(),
        })?;

        buf[2] = if self.session_present { 0x01 } else { 0x00 };
        buf[3] = self.code as u8;

        Ok(4)
    }
}

impl Publish {
    pub fn read(flags: u8, buf: &[u8]) -> Result<Self, CodecError> {
        let dup = flags & 0x08 != 0;
        let qos_bits = (flags >> 1) & 0x03;
        let qos = QoS::from_u8(qos_bits).ok_or(CodecError::InvalidQos(qos_bits))?;
        let retain = flags & 0x01 != 0;

        let mut pos = 0;

        let (topic, len) = read_string_slice(buf)?;
        let topic = topic.to_string();
        pos += len;

        let pkid = if qos != QoS::AtMostOnce {
            let id = read_u16(&buf[pos..]).ok_or(CodecError::Incomplete { needed: 2 })?;
            if id == 0 {
                return Err(CodecError::Malformed("zero packet id on QoS > 0 publish"));
            }
            pos += 2;
            id
        } else {
            0
        };

        let payload = Bytes::copy_from_slice(&buf[pos..]);

        Ok(Publish {
            topic,
            payload,
            qos,
            retain,
            dup,
            pkid,
        })
    }

    pub fn write(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        let remaining_len = self.remaining_length();
        let header_len = 1 + variable_int_len(remaining_len as u32);
        let total = header_len + remaining_len;

        if buf.len() < total {
            return Err(CodecError::BufferTooSmall {
                required: total,
                available: buf.len(),
            });
        }

        let mut flags = (self.qos as u8) << 1;
        if self.dup {
            flags |= 0x08;
        }
        if self.retain {
            flags |= 0x01;
        }

        let mut pos = write_fixed_header(buf, PacketType::Publish, flags, remaining_len as u32)
            .ok_or(CodecError::BufferTooSmall {
                required: header_len,
                available: buf.len(),
            })?;

        pos += write_string(&mut buf[pos..], &self.topic).ok_or(CodecError::BufferTooSmall {
            required: 2 + self.topic.len(),
            available: buf.len() - pos,
        })?;

        if self.qos != QoS::AtMostOnce {
            write_u16(&mut buf[pos..], self.pkid).ok_or(CodecError::BufferTooSmall {
                required: 2,
                available: buf.len() - pos,
            })?;
            pos += 2;
        }

        buf[pos..pos + self.payload.len()].copy_from_slice(&self.payload);
        pos += self.payload.len();

        Ok(pos)
    }

    fn remaining_length(&self) -> usize {
        let mut len = 2 + self.topic.len() + self.payload.len();
        if self.qos != QoS::AtMostOnce {
            len += 2;
        }
        len
    }

    pub fn size(&self) -> usize {
        let remaining = self.remaining_length();
        1 + variable_int_len(remaining as u32) + remaining
    }
}

impl Puback {
    pub fn read(buf: &[u8]) -> Result<Self, CodecError> {
        let pkid = read_u16(buf).ok_or(CodecError::Incomplete { needed: 2 })?;
        Ok(Puback { pkid })
    }

    pub fn write(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        if buf.len() < 4 {
            return Err(CodecError::BufferTooSmall {
                required: 4,
                available: buf.len(),
            });
        }

        write_fixed_header(buf, PacketType::Puback, 0, 2).ok_or(CodecError::BufferTooSmall {
            required: 2,
            available: buf.len(),
        })?;

        write_u16(&mut buf[2..], self.pkid).ok_or(CodecError::BufferTooSmall {
            required: 2,
            available: buf.len() - 2,
        })?;

        Ok(4)
    }
}

impl Subscribe {
    pub fn read(buf: &[u8]) -> Result<Self, CodecError> {
        let pkid = read_u16(buf).ok_or(CodecError::Incomplete { needed: 2 })?;
        let mut pos = 2;

        let mut filters = Vec::new();
        while pos < buf.len() {
            let (path, len) = read_string_slice(&buf[pos..])?;
            pos += len;

            if pos >= buf.len() {
                return Err(CodecError::Incomplete { needed: 1 });
            }
            let qos = QoS::from_u8(buf[pos] & 0x03).ok_or(CodecError::InvalidQos(buf[pos]))?;
            pos += 1;

            filters.push(SubscribeFilter {
                path: path.to_string(),
                qos,
            });
        }

        if filters.is_empty() {
            return Err(CodecError::Malformed("subscribe without filters"));
        }

        Ok(Subscribe { pkid, filters })
    }

    pub fn write(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        let remaining_len = self.remaining_length();
        let header_len = 1 + variable_int_len(remaining_len as u32);
        let total = header_len + remaining_len;

        if buf.len() < total {
            return Err(CodecError::BufferTooSmall {
                required: total,
                available: buf.len(),
            });
        }

        // Subscribe has fixed flags of 0x02
        let mut pos = write_fixed_header(buf, PacketType::Subscribe, 0x02, remaining_len as u32)
            .ok_or(CodecError::BufferTooSmall {
                required: header_len,
                available: buf.len(),
            })?;

        write_u16(&mut buf[pos..], self.pkid).ok_or(CodecError::BufferTooSmall {
            required: 2,
            available: buf.len() - pos,
        })?;
        pos += 2;

        for filter in &self.filters {
            pos += write_string(&mut buf[pos..], &filter.path).ok_or(
                CodecError::BufferTooSmall {
                    required: 2 + filter.path.len(),
                    available: buf.len() - pos,
                },
            )?;
            buf[pos] = filter.qos as u8;
            pos += 1;
        }

        Ok(pos)
    }

    fn remaining_length(&self) -> usize {
        let mut len = 2; // pkid
        for filter in &self.filters {
            len += 2 + filter.path.len() + 1;
        }
        len
    }

    pub fn size(&self) -> usize {
        let remaining = self.remaining_length();
        1 + variable_int_len(remaining as u32) + remaining
    }
}

impl Suback {
    pub fn read(buf: &[u8]) -> Result<Self, CodecError> {
        let pkid = read_u16(buf).ok_or(CodecError::Incomplete { needed: 2 })?;
        let return_codes: Vec<_> = buf[2..]
            .iter()
            .map(|&b| SubscribeReturnCode::from_u8(b))
            .collect();

        if return_codes.is_empty() {
            return Err(CodecError::Malformed("suback without return codes"));
        }

        Ok(Suback { pkid, return_codes })
    }

    pub fn write(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        let remaining_len = 2 + self.return_codes.len();
        let header_len = 1 + variable_int_len(remaining_len as u32);
        let total = header_len + remaining_len;

        if buf.len() < total {
            return Err(CodecError::BufferTooSmall {
                required: total,
                available: buf.len(),
            });
        }

        let mut pos = write_fixed_header(buf, PacketType::Suback, 0, remaining_len as u32).ok_or(
            CodecError::BufferTooSmall {
                required: header_len,
                available: buf.len(),
            },
        )?;

        write_u16(&mut buf[pos..], self.pkid).ok_or(CodecError::BufferTooSmall {
            required: 2,
            available: buf.len() - pos,
        })?;
        pos += 2;

        for code in &self.return_codes {
            buf[pos] = code.to_u8();
            pos += 1;
        }

        Ok(pos)
    }

    pub fn size(&self) -> usize {
        let remaining = 2 + self.return_codes.len();
        1 + variable_int_len(remaining as u32) + remaining
    }
}

impl Unsubscribe {
    pub fn read(buf: &[u8]) -> Result<Self, CodecError> {
        let pkid = read_u16(buf).ok_or(CodecError::Incomplete { needed: 2 })?;
        let mut pos = 2;

        let mut topics = Vec::new();
        while pos < buf.len() {
            let (topic, len) = read_string_slice(&buf[pos..])?;
            topics.push(topic.to_string());
            pos += len;
        }

        if topics.is_empty() {
            return Err(CodecError::Malformed("unsubscribe without topics"));
        }

        Ok(Unsubscribe { pkid, topics })
    }

    pub fn write(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        let remaining_len = self.remaining_length();
        let header_len = 1 + variable_int_len(remaining_len as u32);
        let total = header_len + remaining_len;

        if buf.len() < total {
            return Err(CodecError::BufferTooSmall {
                required: total,
                available: buf.len(),
            });
        }

        // Unsubscribe has fixed flags of 0x02
        let mut pos = write_fixed_header(buf, PacketType::Unsubscribe, 0x02, remaining_len as u32)
            .ok_or(CodecError::BufferTooSmall {
                required: header_len,
                available: buf.len(),
            })?;

        write_u16(&mut buf[pos..], self.pkid).ok_or(CodecError::BufferTooSmall {
            required: 2,
            available: buf.len() - pos,
        })?;
        pos += 2;

        for topic in &self.topics {
            pos += write_string(&mut buf[pos..], topic).ok_or(CodecError::BufferTooSmall {
                required: 2 + topic.len(),
                available: buf.len() - pos,
            })?;
        }

        Ok(pos)
    }

    fn remaining_length(&self) -> usize {
        let mut len = 2; // pkid
        for topic in &self.topics {
            len += 2 + topic.len();
        }
        len
    }

    pub fn size(&self) -> usize {
        let remaining = self.remaining_length();
        1 + variable_int_len(remaining as u32) + remaining
    }
}

impl Unsuback {
    pub fn read(buf: &[u8]) -> Result<Self, CodecError> {
        let pkid = read_u16(buf).ok_or(CodecError::Incomplete { needed: 2 })?;
        Ok(Unsuback { pkid })
    }

    pub fn write(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        if buf.len() < 4 {
            return Err(CodecError::BufferTooSmall {
                required: 4,
                available: buf.len(),
            });
        }

        write_fixed_header(buf, PacketType::Unsuback, 0, 2).ok_or(CodecError::BufferTooSmall {
            required: 2,
            available: buf.len(),
        })?;

        write_u16(&mut buf[2..], self.pkid).ok_or(CodecError::BufferTooSmall {
            required: 2,
            available: buf.len() - 2,
        })?;

        Ok(4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(packet: Packet) {
        let frame = packet.to_bytes().unwrap();
        assert_eq!(frame.len(), packet.size());

        let (decoded, consumed) = Packet::read(&frame, DEFAULT_MAX_PACKET_SIZE).unwrap();
        assert_eq!(consumed, frame.len());
        assert_eq!(decoded, packet);
    }

    #[test]
    fn connect_roundtrip() {
        roundtrip(Packet::Connect(Connect {
            client_id: "sdk-java".to_string(),
            keep_alive: 60,
            clean_session: true,
            username: None,
            password: None,
        }));
    }

    #[test]
    fn connect_with_credentials_roundtrip() {
        roundtrip(Packet::Connect(Connect {
            client_id: "c1".to_string(),
            keep_alive: 30,
            clean_session: false,
            username: Some("user".to_string()),
            password: Some(b"secret".to_vec()),
        }));
    }

    #[test]
    fn connack_roundtrip() {
        roundtrip(Packet::Connack(Connack {
            session_present: true,
            code: ConnectReturnCode::Accepted,
        }));
    }

    #[test]
    fn connack_rejection_codes() {
        for (byte, code) in [
            (1u8, ConnectReturnCode::UnacceptableProtocolVersion),
            (3, ConnectReturnCode::ServerUnavailable),
            (4, ConnectReturnCode::BadCredentials),
            (5, ConnectReturnCode::NotAuthorized),
        ] {
            let connack = Connack::read(&[0x00, byte]).unwrap();
            assert_eq!(connack.code, code);
        }
        assert!(Connack::read(&[0x00, 6]).is_err());
    }

    #[test]
    fn fatal_return_code_classification() {
        assert!(!ConnectReturnCode::Accepted.is_fatal());
        assert!(!ConnectReturnCode::ServerUnavailable.is_fatal());
        assert!(ConnectReturnCode::BadCredentials.is_fatal());
        assert!(ConnectReturnCode::NotAuthorized.is_fatal());
        assert!(ConnectReturnCode::UnacceptableProtocolVersion.is_fatal());
    }

    #[test]
    fn publish_qos0_roundtrip() {
        roundtrip(Packet::Publish(Publish {
            topic: "outgoing".to_string(),
            payload: Bytes::from_static(b"hello from non-blocking publisher - 1"),
            qos: QoS::AtMostOnce,
            retain: false,
            dup: false,
            pkid: 0,
        }));
    }

    #[test]
    fn publish_qos1_roundtrip() {
        roundtrip(Packet::Publish(Publish {
            topic: "a/b/c".to_string(),
            payload: Bytes::from_static(b"payload"),
            qos: QoS::AtLeastOnce,
            retain: true,
            dup: true,
            pkid: 42,
        }));
    }

    #[test]
    fn publish_qos1_zero_pkid_rejected() {
        let publish = Publish {
            topic: "t".to_string(),
            payload: Bytes::new(),
            qos: QoS::AtLeastOnce,
            retain: false,
            dup: false,
            pkid: 0,
        };
        let frame = Packet::Publish(publish).to_bytes().unwrap();
        assert!(Packet::read(&frame, DEFAULT_MAX_PACKET_SIZE).is_err());
    }

    #[test]
    fn puback_roundtrip() {
        roundtrip(Packet::Puback(Puback { pkid: 7 }));
    }

    #[test]
    fn subscribe_roundtrip() {
        roundtrip(Packet::Subscribe(Subscribe {
            pkid: 3,
            filters: vec![
                SubscribeFilter {
                    path: "outgoing".to_string(),
                    qos: QoS::AtMostOnce,
                },
                SubscribeFilter {
                    path: "a/+/c".to_string(),
                    qos: QoS::AtLeastOnce,
                },
            ],
        }));
    }

    #[test]
    fn subscribe_flags_nibble() {
        let subscribe = Subscribe {
            pkid: 1,
            filters: vec![SubscribeFilter {
                path: "t".to_string(),
                qos: QoS::AtMostOnce,
            }],
        };
        let frame = Packet::Subscribe(subscribe).to_bytes().unwrap();
        assert_eq!(frame[0], 0x82);
    }

    #[test]
    fn suback_roundtrip() {
        roundtrip(Packet::Suback(Suback {
            pkid: 3,
            return_codes: vec![
                SubscribeReturnCode::Success(QoS::AtLeastOnce),
                SubscribeReturnCode::Failure,
            ],
        }));
    }

    #[test]
    fn unsubscribe_roundtrip() {
        roundtrip(Packet::Unsubscribe(Unsubscribe {
            pkid: 9,
            topics: vec!["a/b".to_string(), "c/#".to_string()],
        }));
    }

    #[test]
    fn unsuback_roundtrip() {
        roundtrip(Packet::Unsuback(Unsuback { pkid: 9 }));
    }

    #[test]
    fn control_packets_roundtrip() {
        roundtrip(Packet::Pingreq);
        roundtrip(Packet::Pingresp);
        roundtrip(Packet::Disconnect);
    }

    #[test]
    fn read_incomplete_is_not_terminal() {
        let publish = Publish {
            topic: "test/topic".to_string(),
            payload: Bytes::from_static(b"hello"),
            qos: QoS::AtMostOnce,
            retain: false,
            dup: false,
            pkid: 0,
        };
        let frame = Packet::Publish(publish).to_bytes().unwrap();

        for cut in 1..frame.len() {
            match Packet::read(&frame[..cut], DEFAULT_MAX_PACKET_SIZE) {
                Err(e) if e.is_incomplete() => {}
                other => panic!("expected Incomplete at cut {cut}, got {other:?}"),
            }
        }
    }

    #[test]
    fn understated_remaining_length_is_malformed() {
        // PUBACK whose remaining length claims 1 byte: the whole frame is
        // buffered, but the body cannot hold a packet id. More bytes will
        // never fix this, so it must not read as Incomplete.
        let frame = [0x40, 0x01, 0x00];
        match Packet::read(&frame, DEFAULT_MAX_PACKET_SIZE) {
            Err(CodecError::Malformed(_)) => {}
            other => panic!("expected Malformed, got {other:?}"),
        }
    }

    #[test]
    fn read_respects_max_size() {
        let publish = Publish {
            topic: "t".to_string(),
            payload: Bytes::from(vec![0u8; 1024]),
            qos: QoS::AtMostOnce,
            retain: false,
            dup: false,
            pkid: 0,
        };
        let frame = Packet::Publish(publish).to_bytes().unwrap();
        assert!(matches!(
            Packet::read(&frame, 128),
            Err(CodecError::PacketTooLarge { .. })
        ));
    }

    #[test]
    fn two_packets_back_to_back() {
        let mut stream = Packet::Puback(Puback { pkid: 1 }).to_bytes().unwrap();
        stream.extend(Packet::Pingresp.to_bytes().unwrap());

        let (first, consumed) = Packet::read(&stream, DEFAULT_MAX_PACKET_SIZE).unwrap();
        assert_eq!(first, Packet::Puback(Puback { pkid: 1 }));

        let (second, _) = Packet::read(&stream[consumed..], DEFAULT_MAX_PACKET_SIZE).unwrap();
        assert_eq!(second, Packet::Pingresp);
    }
}
