// Copyright (C) 2020 Matthew Waters <matthew@centricular.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The subset of STUN attributes exchanged during connectivity checks.

use std::convert::TryFrom;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use byteorder::{BigEndian, ByteOrder};

use crate::agent::AgentError;
use crate::stun::message::MAGIC_COOKIE;

pub const USERNAME: AttributeType = AttributeType(0x0006);
pub const MESSAGE_INTEGRITY: AttributeType = AttributeType(0x0008);
pub const ERROR_CODE: AttributeType = AttributeType(0x0009);
pub const UNKNOWN_ATTRIBUTES: AttributeType = AttributeType(0x000A);
// RFC 5766, always set on checks for relay compatibility
pub const REQUESTED_TRANSPORT: AttributeType = AttributeType(0x0019);
pub const XOR_MAPPED_ADDRESS: AttributeType = AttributeType(0x0020);
pub const SOFTWARE: AttributeType = AttributeType(0x8022);
pub const FINGERPRINT: AttributeType = AttributeType(0x8028);

// RFC 8445
pub const PRIORITY: AttributeType = AttributeType(0x0024);
pub const USE_CANDIDATE: AttributeType = AttributeType(0x0025);
pub const ICE_CONTROLLED: AttributeType = AttributeType(0x0029);
pub const ICE_CONTROLLING: AttributeType = AttributeType(0x002A);

pub const BAD_REQUEST: u16 = 400;
pub const UNAUTHORIZED: u16 = 401;
pub const UNKNOWN_ATTRIBUTE: u16 = 420;
pub const ROLE_CONFLICT: u16 = 487;

/// IANA protocol number for UDP as carried in REQUESTED-TRANSPORT
pub const TRANSPORT_UDP: u8 = 17;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttributeType(u16);

impl std::fmt::Display for AttributeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({:#06x})", self.name(), self.0)
    }
}

impl AttributeType {
    pub const fn new(val: u16) -> Self {
        Self(val)
    }

    pub fn name(self) -> &'static str {
        match self {
            USERNAME => "USERNAME",
            MESSAGE_INTEGRITY => "MESSAGE-INTEGRITY",
            ERROR_CODE => "ERROR-CODE",
            UNKNOWN_ATTRIBUTES => "UNKNOWN-ATTRIBUTES",
            REQUESTED_TRANSPORT => "REQUESTED-TRANSPORT",
            XOR_MAPPED_ADDRESS => "XOR-MAPPED-ADDRESS",
            SOFTWARE => "SOFTWARE",
            FINGERPRINT => "FINGERPRINT",
            PRIORITY => "PRIORITY",
            USE_CANDIDATE => "USE-CANDIDATE",
            ICE_CONTROLLED => "ICE-CONTROLLED",
            ICE_CONTROLLING => "ICE-CONTROLLING",
            _ => "unknown",
        }
    }

    /// Whether a receiver must understand this attribute to process the message.
    /// Values below 0x8000 are comprehension-required.
    ///
    /// # Examples
    ///
    /// ```
    /// # use librice_conncheck::stun::attribute::AttributeType;
    /// assert!(AttributeType::new(0x0024).comprehension_required());
    /// assert!(!AttributeType::new(0x8028).comprehension_required());
    /// ```
    pub fn comprehension_required(self) -> bool {
        self.0 < 0x8000
    }
}

impl From<u16> for AttributeType {
    fn from(f: u16) -> Self {
        Self::new(f)
    }
}

impl From<AttributeType> for u16 {
    fn from(f: AttributeType) -> Self {
        f.0
    }
}

/// Conversion between a typed attribute and its wire representation.
pub trait Attribute: std::fmt::Debug {
    fn get_type(&self) -> AttributeType;

    fn to_raw(&self) -> RawAttribute;

    fn from_raw(raw: &RawAttribute) -> Result<Self, AgentError>
    where
        Self: Sized;
}

/// An attribute as found on the wire: type, unpadded length and value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAttribute {
    pub atype: AttributeType,
    pub value: Vec<u8>,
}

impl RawAttribute {
    pub fn new(atype: AttributeType, data: &[u8]) -> Self {
        Self {
            atype,
            value: data.to_vec(),
        }
    }

    pub fn length(&self) -> u16 {
        self.value.len() as u16
    }

    /// Size of this attribute inside a message including the header and padding
    pub fn padded_len(&self) -> usize {
        4 + ((self.value.len() + 3) & !3)
    }

    /// Deserialize a `RawAttribute` from the start of `data`.
    ///
    /// # Examples
    ///
    /// ```
    /// # use librice_conncheck::stun::attribute::{RawAttribute, AttributeType};
    /// let attr = RawAttribute::from_bytes(&[0, 0x24, 0, 2, 5, 6, 0, 0]).unwrap();
    /// assert_eq!(attr.atype, AttributeType::new(0x24));
    /// assert_eq!(attr.value, &[5, 6]);
    /// ```
    pub fn from_bytes(data: &[u8]) -> Result<Self, AgentError> {
        if data.len() < 4 {
            return Err(AgentError::NotEnoughData);
        }
        let atype = AttributeType::from(BigEndian::read_u16(&data[0..2]));
        let len = BigEndian::read_u16(&data[2..4]) as usize;
        if len > data.len() - 4 {
            return Err(AgentError::InvalidSize);
        }
        Ok(Self {
            atype,
            value: data[4..4 + len].to_vec(),
        })
    }

    /// Serialize to the wire including padding to a multiple of 4 bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut ret = vec![0; self.padded_len()];
        BigEndian::write_u16(&mut ret[0..2], self.atype.into());
        BigEndian::write_u16(&mut ret[2..4], self.length());
        ret[4..4 + self.value.len()].copy_from_slice(&self.value);
        ret
    }

    fn expect_type(&self, atype: AttributeType) -> Result<(), AgentError> {
        if self.atype != atype {
            return Err(AgentError::WrongImplementation);
        }
        Ok(())
    }

    fn expect_len(&self, len: usize) -> Result<(), AgentError> {
        match self.value.len() {
            l if l < len => Err(AgentError::NotEnoughData),
            l if l > len => Err(AgentError::TooBig),
            _ => Ok(()),
        }
    }
}

impl std::fmt::Display for RawAttribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let typed = match self.atype {
            USERNAME => Username::from_raw(self).map(|a| a.to_string()),
            ERROR_CODE => ErrorCode::from_raw(self).map(|a| a.to_string()),
            UNKNOWN_ATTRIBUTES => UnknownAttributes::from_raw(self).map(|a| a.to_string()),
            REQUESTED_TRANSPORT => RequestedTransport::from_raw(self).map(|a| a.to_string()),
            XOR_MAPPED_ADDRESS => XorMappedAddress::from_raw(self).map(|a| a.to_string()),
            SOFTWARE => Software::from_raw(self).map(|a| a.to_string()),
            PRIORITY => Priority::from_raw(self).map(|a| a.to_string()),
            USE_CANDIDATE => UseCandidate::from_raw(self).map(|a| a.to_string()),
            ICE_CONTROLLED => IceControlled::from_raw(self).map(|a| a.to_string()),
            ICE_CONTROLLING => IceControlling::from_raw(self).map(|a| a.to_string()),
            MESSAGE_INTEGRITY => MessageIntegrity::from_raw(self).map(|a| a.to_string()),
            FINGERPRINT => Fingerprint::from_raw(self).map(|a| a.to_string()),
            _ => Err(AgentError::ResourceNotFound),
        };
        match typed {
            Ok(s) => f.write_str(&s),
            Err(AgentError::ResourceNotFound) => {
                write!(f, "{}: len {} {:x?}", self.atype, self.length(), self.value)
            }
            Err(_) => write!(f, "{} (malformed): {:x?}", self.atype, self.value),
        }
    }
}

macro_rules! raw_conversions {
    ($name:ident) => {
        impl TryFrom<&RawAttribute> for $name {
            type Error = AgentError;

            fn try_from(value: &RawAttribute) -> Result<Self, Self::Error> {
                $name::from_raw(value)
            }
        }

        impl From<$name> for RawAttribute {
            fn from(f: $name) -> Self {
                f.to_raw()
            }
        }
    };
}

// Attributes whose value is a single big endian integer
macro_rules! integer_attribute {
    ($(#[$meta:meta])* $name:ident, $atype:ident, $field:ident: $int:ty, $read:path, $write:path) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name {
            $field: $int,
        }

        impl $name {
            pub fn new($field: $int) -> Self {
                Self { $field }
            }

            pub fn $field(&self) -> $int {
                self.$field
            }
        }

        impl Attribute for $name {
            fn get_type(&self) -> AttributeType {
                $atype
            }

            fn to_raw(&self) -> RawAttribute {
                let mut buf = [0; std::mem::size_of::<$int>()];
                $write(&mut buf, self.$field);
                RawAttribute::new($atype, &buf)
            }

            fn from_raw(raw: &RawAttribute) -> Result<Self, AgentError> {
                raw.expect_type($atype)?;
                raw.expect_len(std::mem::size_of::<$int>())?;
                Ok(Self {
                    $field: $read(&raw.value),
                })
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}: {}", $atype, self.$field)
            }
        }

        raw_conversions!($name);
    };
}

integer_attribute!(
    /// The priority a peer-reflexive candidate learnt from this check would have
    Priority,
    PRIORITY,
    priority: u32,
    BigEndian::read_u32,
    BigEndian::write_u32
);
integer_attribute!(
    /// Sent by the controlled agent along with its tie-breaker
    IceControlled,
    ICE_CONTROLLED,
    tie_breaker: u64,
    BigEndian::read_u64,
    BigEndian::write_u64
);
integer_attribute!(
    /// Sent by the controlling agent along with its tie-breaker
    IceControlling,
    ICE_CONTROLLING,
    tie_breaker: u64,
    BigEndian::read_u64,
    BigEndian::write_u64
);

// Attributes carrying UTF-8 text bounded in size
macro_rules! string_attribute {
    ($name:ident, $atype:ident, $field:ident, $max:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name {
            $field: String,
        }

        impl $name {
            pub fn new($field: &str) -> Result<Self, AgentError> {
                if $field.len() > $max {
                    return Err(AgentError::InvalidSize);
                }
                Ok(Self {
                    $field: $field.to_owned(),
                })
            }

            pub fn $field(&self) -> &str {
                &self.$field
            }
        }

        impl Attribute for $name {
            fn get_type(&self) -> AttributeType {
                $atype
            }

            fn to_raw(&self) -> RawAttribute {
                RawAttribute::new($atype, self.$field.as_bytes())
            }

            fn from_raw(raw: &RawAttribute) -> Result<Self, AgentError> {
                raw.expect_type($atype)?;
                if raw.value.len() > $max {
                    return Err(AgentError::TooBig);
                }
                Ok(Self {
                    $field: std::str::from_utf8(&raw.value)
                        .map_err(|_| AgentError::Malformed)?
                        .to_owned(),
                })
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}: '{}'", $atype, self.$field)
            }
        }

        raw_conversions!($name);
    };
}

string_attribute!(Username, USERNAME, username, 513);
string_attribute!(Software, SOFTWARE, software, 763);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorCode {
    code: u16,
    reason: String,
}

impl ErrorCode {
    pub fn new(code: u16, reason: &str) -> Result<Self, AgentError> {
        if !(300..700).contains(&code) {
            return Err(AgentError::Malformed);
        }
        Ok(Self {
            code,
            reason: reason.to_owned(),
        })
    }

    /// Construct with the RFC-recommended reason phrase
    pub fn with_code(code: u16) -> Result<Self, AgentError> {
        Self::new(code, Self::default_reason_for_code(code))
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn default_reason_for_code(code: u16) -> &'static str {
        match code {
            BAD_REQUEST => "Bad Request",
            UNAUTHORIZED => "Unauthorized",
            UNKNOWN_ATTRIBUTE => "Unknown Attribute",
            ROLE_CONFLICT => "Role Conflict",
            500 => "Server Error",
            _ => "Unknown",
        }
    }
}

impl Attribute for ErrorCode {
    fn get_type(&self) -> AttributeType {
        ERROR_CODE
    }

    fn to_raw(&self) -> RawAttribute {
        let mut data = vec![0, 0, (self.code / 100) as u8, (self.code % 100) as u8];
        data.extend(self.reason.as_bytes());
        RawAttribute::new(ERROR_CODE, &data)
    }

    fn from_raw(raw: &RawAttribute) -> Result<Self, AgentError> {
        raw.expect_type(ERROR_CODE)?;
        if raw.value.len() < 4 {
            return Err(AgentError::NotEnoughData);
        }
        if raw.value.len() > 763 + 4 {
            return Err(AgentError::TooBig);
        }
        let hundreds = (raw.value[2] & 0x7) as u16;
        let rest = raw.value[3] as u16;
        if !(3..7).contains(&hundreds) || rest > 99 {
            return Err(AgentError::Malformed);
        }
        Ok(Self {
            code: hundreds * 100 + rest,
            reason: std::str::from_utf8(&raw.value[4..])
                .map_err(|_| AgentError::Malformed)?
                .to_owned(),
        })
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} '{}'", ERROR_CODE, self.code, self.reason)
    }
}

raw_conversions!(ErrorCode);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownAttributes {
    attributes: Vec<AttributeType>,
}

impl UnknownAttributes {
    pub fn new(attrs: &[AttributeType]) -> Self {
        let mut ret = Self { attributes: vec![] };
        for &attr in attrs {
            ret.add_attribute(attr);
        }
        ret
    }

    pub fn add_attribute(&mut self, attr: AttributeType) {
        if !self.has_attribute(attr) {
            self.attributes.push(attr);
        }
    }

    pub fn has_attribute(&self, attr: AttributeType) -> bool {
        self.attributes.contains(&attr)
    }
}

impl Attribute for UnknownAttributes {
    fn get_type(&self) -> AttributeType {
        UNKNOWN_ATTRIBUTES
    }

    fn to_raw(&self) -> RawAttribute {
        let mut data = vec![0; self.attributes.len() * 2];
        for (chunk, &attr) in data.chunks_exact_mut(2).zip(self.attributes.iter()) {
            BigEndian::write_u16(chunk, attr.into());
        }
        RawAttribute::new(UNKNOWN_ATTRIBUTES, &data)
    }

    fn from_raw(raw: &RawAttribute) -> Result<Self, AgentError> {
        raw.expect_type(UNKNOWN_ATTRIBUTES)?;
        if raw.value.len() % 2 != 0 {
            return Err(AgentError::Malformed);
        }
        Ok(Self {
            attributes: raw
                .value
                .chunks_exact(2)
                .map(|c| BigEndian::read_u16(c).into())
                .collect(),
        })
    }
}

impl std::fmt::Display for UnknownAttributes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {:?}", UNKNOWN_ATTRIBUTES, self.attributes)
    }
}

raw_conversions!(UnknownAttributes);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UseCandidate {}

impl UseCandidate {
    pub fn new() -> Self {
        Self {}
    }
}

impl Attribute for UseCandidate {
    fn get_type(&self) -> AttributeType {
        USE_CANDIDATE
    }

    fn to_raw(&self) -> RawAttribute {
        RawAttribute::new(USE_CANDIDATE, &[])
    }

    fn from_raw(raw: &RawAttribute) -> Result<Self, AgentError> {
        raw.expect_type(USE_CANDIDATE)?;
        raw.expect_len(0)?;
        Ok(Self {})
    }
}

impl std::fmt::Display for UseCandidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", USE_CANDIDATE)
    }
}

raw_conversions!(UseCandidate);

/// The transport protocol a relay should allocate, one byte followed by three
/// reserved bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestedTransport {
    protocol: u8,
}

impl RequestedTransport {
    pub fn new(protocol: u8) -> Self {
        Self { protocol }
    }

    pub fn protocol(&self) -> u8 {
        self.protocol
    }
}

impl Attribute for RequestedTransport {
    fn get_type(&self) -> AttributeType {
        REQUESTED_TRANSPORT
    }

    fn to_raw(&self) -> RawAttribute {
        RawAttribute::new(REQUESTED_TRANSPORT, &[self.protocol, 0, 0, 0])
    }

    fn from_raw(raw: &RawAttribute) -> Result<Self, AgentError> {
        raw.expect_type(REQUESTED_TRANSPORT)?;
        raw.expect_len(4)?;
        Ok(Self {
            protocol: raw.value[0],
        })
    }
}

impl std::fmt::Display for RequestedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", REQUESTED_TRANSPORT, self.protocol)
    }
}

raw_conversions!(RequestedTransport);

fn xor_bytes<const N: usize>(a: [u8; N], b: [u8; N]) -> [u8; N] {
    let mut ret = a;
    for (r, b) in ret.iter_mut().zip(b.iter()) {
        *r ^= b;
    }
    ret
}

/// The reflexive transport address of a request's source, obfuscated with the
/// magic cookie and, for IPv6, the transaction id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XorMappedAddress {
    // stored XOR-ed as the transaction id is needed to recover the address
    xored: SocketAddr,
}

impl XorMappedAddress {
    pub fn new(addr: SocketAddr, transaction: u128) -> Self {
        Self {
            xored: Self::xor_addr(addr, transaction),
        }
    }

    fn xor_addr(addr: SocketAddr, transaction: u128) -> SocketAddr {
        let port = addr.port() ^ (MAGIC_COOKIE >> 16) as u16;
        match addr.ip() {
            IpAddr::V4(ip) => {
                let octets = xor_bytes(ip.octets(), MAGIC_COOKIE.to_be_bytes());
                SocketAddr::new(IpAddr::V4(Ipv4Addr::from(octets)), port)
            }
            IpAddr::V6(ip) => {
                let key = ((MAGIC_COOKIE as u128) << 96
                    | (transaction & 0xffff_ffff_ffff_ffff_ffff_ffff))
                    .to_be_bytes();
                let octets = xor_bytes(ip.octets(), key);
                SocketAddr::new(IpAddr::V6(Ipv6Addr::from(octets)), port)
            }
        }
    }

    pub fn addr(&self, transaction: u128) -> SocketAddr {
        Self::xor_addr(self.xored, transaction)
    }
}

impl Attribute for XorMappedAddress {
    fn get_type(&self) -> AttributeType {
        XOR_MAPPED_ADDRESS
    }

    fn to_raw(&self) -> RawAttribute {
        let mut buf = match self.xored.ip() {
            IpAddr::V4(ip) => {
                let mut buf = vec![0, 0x1, 0, 0];
                buf.extend(ip.octets());
                buf
            }
            IpAddr::V6(ip) => {
                let mut buf = vec![0, 0x2, 0, 0];
                buf.extend(ip.octets());
                buf
            }
        };
        BigEndian::write_u16(&mut buf[2..4], self.xored.port());
        RawAttribute::new(XOR_MAPPED_ADDRESS, &buf)
    }

    fn from_raw(raw: &RawAttribute) -> Result<Self, AgentError> {
        raw.expect_type(XOR_MAPPED_ADDRESS)?;
        if raw.value.len() < 4 {
            return Err(AgentError::NotEnoughData);
        }
        let port = BigEndian::read_u16(&raw.value[2..4]);
        let ip = match raw.value[1] {
            0x1 => {
                raw.expect_len(8)?;
                IpAddr::V4(Ipv4Addr::from(BigEndian::read_u32(&raw.value[4..8])))
            }
            0x2 => {
                raw.expect_len(20)?;
                IpAddr::V6(Ipv6Addr::from(BigEndian::read_u128(&raw.value[4..20])))
            }
            _ => return Err(AgentError::Malformed),
        };
        Ok(Self {
            xored: SocketAddr::new(ip, port),
        })
    }
}

impl std::fmt::Display for XorMappedAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: XOR({})", XOR_MAPPED_ADDRESS, self.xored)
    }
}

raw_conversions!(XorMappedAddress);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageIntegrity {
    hmac: [u8; 20],
}

impl MessageIntegrity {
    pub fn new(hmac: [u8; 20]) -> Self {
        Self { hmac }
    }

    pub fn hmac(&self) -> &[u8; 20] {
        &self.hmac
    }
}

impl Attribute for MessageIntegrity {
    fn get_type(&self) -> AttributeType {
        MESSAGE_INTEGRITY
    }

    fn to_raw(&self) -> RawAttribute {
        RawAttribute::new(MESSAGE_INTEGRITY, &self.hmac)
    }

    fn from_raw(raw: &RawAttribute) -> Result<Self, AgentError> {
        raw.expect_type(MESSAGE_INTEGRITY)?;
        raw.expect_len(20)?;
        let mut hmac = [0; 20];
        hmac.copy_from_slice(&raw.value);
        Ok(Self { hmac })
    }
}

impl std::fmt::Display for MessageIntegrity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: 0x", MESSAGE_INTEGRITY)?;
        for val in self.hmac.iter() {
            write!(f, "{:02x}", val)?;
        }
        Ok(())
    }
}

raw_conversions!(MessageIntegrity);

/// CRC32 of the preceding message, stored on the wire XOR-ed with `XOR_CONSTANT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    fingerprint: [u8; 4],
}

impl Fingerprint {
    pub const XOR_CONSTANT: [u8; 4] = [0x53, 0x54, 0x55, 0x4E];

    pub fn new(fingerprint: [u8; 4]) -> Self {
        Self { fingerprint }
    }

    pub fn fingerprint(&self) -> &[u8; 4] {
        &self.fingerprint
    }
}

impl Attribute for Fingerprint {
    fn get_type(&self) -> AttributeType {
        FINGERPRINT
    }

    fn to_raw(&self) -> RawAttribute {
        RawAttribute::new(
            FINGERPRINT,
            &xor_bytes(self.fingerprint, Self::XOR_CONSTANT),
        )
    }

    fn from_raw(raw: &RawAttribute) -> Result<Self, AgentError> {
        raw.expect_type(FINGERPRINT)?;
        raw.expect_len(4)?;
        let mut wire = [0; 4];
        wire.copy_from_slice(&raw.value);
        Ok(Self {
            fingerprint: xor_bytes(wire, Self::XOR_CONSTANT),
        })
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: 0x{:08x}", FINGERPRINT, u32::from_be_bytes(self.fingerprint))
    }
}

raw_conversions!(Fingerprint);
