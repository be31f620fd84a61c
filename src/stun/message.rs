// Copyright (C) 2020 Matthew Waters <matthew@centricular.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! STUN message framing as used for ICE connectivity checks (RFC 5389).

use std::convert::TryFrom;

use byteorder::{BigEndian, ByteOrder};
use crc::{Crc, CRC_32_ISO_HDLC};
use hmac::{Hmac, Mac};

use crate::agent::AgentError;
use crate::stun::attribute::*;

pub const MAGIC_COOKIE: u32 = 0x2112A442;

pub const BINDING: u16 = 0x0001;

const HEADER_LEN: usize = 20;
const TRANSACTION_MASK: u128 = 0xffff_ffff_ffff_ffff_ffff_ffff;
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// The key material for MESSAGE-INTEGRITY.  ICE only ever uses short term
/// credentials where the key is the password.
#[derive(Clone, PartialEq, Eq, Derivative)]
#[derivative(Debug)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
pub struct ShortTermCredentials {
    #[derivative(Debug = "ignore")]
    pub password: String,
}

impl ShortTermCredentials {
    pub fn new(password: &str) -> Self {
        Self {
            password: password.to_owned(),
        }
    }

    fn hmac(&self) -> Result<Hmac<sha1::Sha1>, AgentError> {
        Hmac::<sha1::Sha1>::new_from_slice(self.password.as_bytes())
            .map_err(|_| AgentError::Malformed)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MessageClass {
    Request,
    Indication,
    Success,
    Error,
}

impl MessageClass {
    pub fn is_response(self) -> bool {
        matches!(self, MessageClass::Success | MessageClass::Error)
    }

    fn to_bits(self) -> u16 {
        match self {
            MessageClass::Request => 0x000,
            MessageClass::Indication => 0x010,
            MessageClass::Success => 0x100,
            MessageClass::Error => 0x110,
        }
    }
}

/// The 14 bit message type with the class bits interleaved into the method.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MessageType(u16);

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} {:#x}", self.class(), self.method())
    }
}

impl MessageType {
    pub fn from_class_method(class: MessageClass, method: u16) -> Self {
        let method_bits = method & 0xf | (method & 0x70) << 1 | (method & 0xf80) << 2;
        Self(class.to_bits() | method_bits)
    }

    pub fn class(self) -> MessageClass {
        match (self.0 & 0x10) >> 4 | (self.0 & 0x100) >> 7 {
            0x0 => MessageClass::Request,
            0x1 => MessageClass::Indication,
            0x2 => MessageClass::Success,
            _ => MessageClass::Error,
        }
    }

    pub fn method(self) -> u16 {
        self.0 & 0xf | (self.0 & 0xe0) >> 1 | (self.0 & 0x3e00) >> 2
    }

    fn from_bytes(data: &[u8]) -> Result<Self, AgentError> {
        let data = BigEndian::read_u16(data);
        if data & 0xc000 != 0x0 {
            return Err(AgentError::NotStun);
        }
        Ok(Self(data))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    msg_type: MessageType,
    // 96 bits are significant
    transaction: u128,
    attributes: Vec<RawAttribute>,
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Message({}, transaction: {:#x}, attributes: [",
            self.msg_type, self.transaction
        )?;
        for (i, a) in self.attributes.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", a)?;
        }
        f.write_str("])")
    }
}

impl Message {
    pub fn new(msg_type: MessageType, transaction: u128) -> Self {
        Self {
            msg_type,
            transaction: transaction & TRANSACTION_MASK,
            attributes: vec![],
        }
    }

    pub fn new_request(method: u16, transaction: u128) -> Self {
        Self::new(
            MessageType::from_class_method(MessageClass::Request, method),
            transaction,
        )
    }

    pub fn new_success(orig: &Message) -> Self {
        Self::new(
            MessageType::from_class_method(MessageClass::Success, orig.method()),
            orig.transaction,
        )
    }

    pub fn new_error(orig: &Message) -> Self {
        Self::new(
            MessageType::from_class_method(MessageClass::Error, orig.method()),
            orig.transaction,
        )
    }

    /// A random 96-bit transaction identifier
    pub fn generate_transaction() -> u128 {
        use rand::{thread_rng, Rng};
        thread_rng().gen::<u128>() & TRANSACTION_MASK
    }

    pub fn get_type(&self) -> MessageType {
        self.msg_type
    }

    pub fn class(&self) -> MessageClass {
        self.msg_type.class()
    }

    pub fn has_class(&self, class: MessageClass) -> bool {
        self.class() == class
    }

    pub fn method(&self) -> u16 {
        self.msg_type.method()
    }

    pub fn transaction_id(&self) -> u128 {
        self.transaction
    }

    fn attributes_len(&self) -> usize {
        self.attributes.iter().map(|a| a.padded_len()).sum()
    }

    /// Serialize a `Message` to network bytes
    ///
    /// # Examples
    ///
    /// ```
    /// # use librice_conncheck::stun::attribute::RawAttribute;
    /// # use librice_conncheck::stun::message::{Message, BINDING};
    /// let mut message = Message::new_request(BINDING, 1000);
    /// message.add_attribute(RawAttribute::new(0x24.into(), &[3])).unwrap();
    /// assert_eq!(
    ///     message.to_bytes(),
    ///     vec![0, 1, 0, 8, 33, 18, 164, 66, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 3, 232, 0, 0x24, 0, 1, 3, 0, 0, 0]
    /// );
    /// ```
    pub fn to_bytes(&self) -> Vec<u8> {
        let attr_len = self.attributes_len();
        let mut ret = vec![0; HEADER_LEN];
        BigEndian::write_u16(&mut ret[0..2], self.msg_type.0);
        BigEndian::write_u16(&mut ret[2..4], attr_len as u16);
        BigEndian::write_u128(
            &mut ret[4..20],
            (MAGIC_COOKIE as u128) << 96 | self.transaction,
        );
        ret.reserve(attr_len);
        for attr in &self.attributes {
            ret.extend(attr.to_bytes());
        }
        ret
    }

    /// Parse a `Message`, validating the FINGERPRINT if present.  MESSAGE-INTEGRITY
    /// requires credentials and is checked separately with [`Message::validate_integrity`].
    pub fn from_bytes(data: &[u8]) -> Result<Self, AgentError> {
        if data.len() < HEADER_LEN {
            return Err(AgentError::NotEnoughData);
        }
        let msg_type = MessageType::from_bytes(data)?;
        let len = BigEndian::read_u16(&data[2..4]) as usize;
        if len % 4 != 0 || len + HEADER_LEN > data.len() {
            trace!(
                "advertised size {} does not match data size {}",
                len + HEADER_LEN,
                data.len()
            );
            return Err(AgentError::Malformed);
        }
        let tid = BigEndian::read_u128(&data[4..20]);
        if (tid >> 96) as u32 != MAGIC_COOKIE {
            return Err(AgentError::NotStun);
        }
        let mut ret = Self::new(msg_type, tid);

        let mut offset = HEADER_LEN;
        while offset < HEADER_LEN + len {
            let attr = RawAttribute::from_bytes(&data[offset..HEADER_LEN + len])?;
            let padded = attr.padded_len();
            if ret.has_attribute(FINGERPRINT) {
                warn!("attribute {} after FINGERPRINT", attr.atype);
                return Err(AgentError::Malformed);
            }
            if ret.has_attribute(MESSAGE_INTEGRITY) && attr.atype != FINGERPRINT {
                warn!("attribute {} after MESSAGE-INTEGRITY", attr.atype);
                return Err(AgentError::Malformed);
            }
            if attr.atype == FINGERPRINT {
                let expected = Fingerprint::from_raw(&attr)?;
                let computed = Self::fingerprint_over(&data[..offset], offset + padded);
                if &computed != expected.fingerprint() {
                    warn!(
                        "fingerprint mismatch {:x?} != {:x?}",
                        computed,
                        expected.fingerprint()
                    );
                    return Err(AgentError::Malformed);
                }
            }
            ret.attributes.push(attr);
            offset += padded;
        }
        Ok(ret)
    }

    // CRC over `prefix` with its length field rewritten to end at `end`
    fn fingerprint_over(prefix: &[u8], end: usize) -> [u8; 4] {
        let mut data = prefix.to_vec();
        BigEndian::write_u16(&mut data[2..4], (end - HEADER_LEN) as u16);
        CRC32.checksum(&data).to_be_bytes()
    }

    // HMAC over `prefix` with its length field rewritten to end after the
    // MESSAGE-INTEGRITY attribute
    fn hmac_over(
        prefix: &[u8],
        credentials: &ShortTermCredentials,
    ) -> Result<Hmac<sha1::Sha1>, AgentError> {
        let mut data = prefix.to_vec();
        BigEndian::write_u16(&mut data[2..4], (prefix.len() + 24 - HEADER_LEN) as u16);
        let mut hmac = credentials.hmac()?;
        hmac.update(&data);
        Ok(hmac)
    }

    /// Verify MESSAGE-INTEGRITY against the bytes this message was parsed from.
    pub fn validate_integrity(
        &self,
        orig_data: &[u8],
        credentials: &ShortTermCredentials,
    ) -> Result<(), AgentError> {
        let integrity = self
            .get_attribute(MESSAGE_INTEGRITY)
            .ok_or(AgentError::ResourceNotFound)
            .and_then(MessageIntegrity::from_raw)?;
        let offset = HEADER_LEN
            + self
                .attributes
                .iter()
                .take_while(|a| a.atype != MESSAGE_INTEGRITY)
                .map(|a| a.padded_len())
                .sum::<usize>();
        if orig_data.len() < offset + 24 || orig_data[offset + 4..offset + 24] != integrity.hmac()[..] {
            return Err(AgentError::Malformed);
        }
        Self::hmac_over(&orig_data[..offset], credentials)?
            .verify_slice(integrity.hmac())
            .map_err(|_| AgentError::IntegrityCheckFailed)
    }

    pub fn add_message_integrity(
        &mut self,
        credentials: &ShortTermCredentials,
    ) -> Result<(), AgentError> {
        if self.has_attribute(MESSAGE_INTEGRITY) || self.has_attribute(FINGERPRINT) {
            return Err(AgentError::AlreadyExists);
        }
        let bytes = self.to_bytes();
        let digest = Self::hmac_over(&bytes, credentials)?.finalize().into_bytes();
        let mut hmac = [0; 20];
        hmac.copy_from_slice(&digest);
        self.attributes.push(MessageIntegrity::new(hmac).into());
        Ok(())
    }

    pub fn add_fingerprint(&mut self) -> Result<(), AgentError> {
        if self.has_attribute(FINGERPRINT) {
            return Err(AgentError::AlreadyExists);
        }
        let bytes = self.to_bytes();
        let fingerprint = Self::fingerprint_over(&bytes, bytes.len() + 8);
        self.attributes.push(Fingerprint::new(fingerprint).into());
        Ok(())
    }

    /// Append an attribute.  Each attribute type may only appear once and nothing
    /// may follow MESSAGE-INTEGRITY or FINGERPRINT.
    ///
    /// ```
    /// # use librice_conncheck::stun::attribute::{Priority, PRIORITY};
    /// # use librice_conncheck::stun::message::{Message, BINDING};
    /// let mut message = Message::new_request(BINDING, 0);
    /// assert!(message.add_attribute(Priority::new(1).into()).is_ok());
    /// assert!(message.add_attribute(Priority::new(2).into()).is_err());
    /// assert!(message.has_attribute(PRIORITY));
    /// ```
    pub fn add_attribute(&mut self, attr: RawAttribute) -> Result<(), AgentError> {
        if attr.atype == MESSAGE_INTEGRITY || attr.atype == FINGERPRINT {
            return Err(AgentError::WrongImplementation);
        }
        if self.has_attribute(attr.atype)
            || self.has_attribute(MESSAGE_INTEGRITY)
            || self.has_attribute(FINGERPRINT)
        {
            return Err(AgentError::AlreadyExists);
        }
        self.attributes.push(attr);
        Ok(())
    }

    pub fn get_attribute(&self, atype: AttributeType) -> Option<&RawAttribute> {
        self.attributes.iter().find(|attr| attr.atype == atype)
    }

    /// Retrieve and decode an attribute, `None` if absent
    pub fn attribute<A: Attribute>(&self, atype: AttributeType) -> Result<Option<A>, AgentError> {
        self.get_attribute(atype).map(A::from_raw).transpose()
    }

    pub fn has_attribute(&self, atype: AttributeType) -> bool {
        self.get_attribute(atype).is_some()
    }

    pub fn iter_attributes(&self) -> impl Iterator<Item = &RawAttribute> {
        self.attributes.iter()
    }

    /// Produce the error response for `msg` when it has comprehension-required
    /// attributes outside `supported` (420) or lacks one of `required` (400).
    pub fn check_attribute_types(
        msg: &Message,
        supported: &[AttributeType],
        required: &[AttributeType],
    ) -> Option<Message> {
        let unsupported: Vec<AttributeType> = msg
            .iter_attributes()
            .map(|a| a.atype)
            .filter(|at| at.comprehension_required() && !supported.contains(at))
            .collect();
        if !unsupported.is_empty() {
            debug!("unknown comprehension required attributes {:?}", unsupported);
            return Message::unknown_attributes(msg, &unsupported).ok();
        }
        if let Some(missing) = required.iter().find(|&&at| !msg.has_attribute(at)) {
            debug!("missing required attribute {}", missing);
            return Message::bad_request(msg).ok();
        }
        None
    }

    pub fn unknown_attributes(
        src: &Message,
        attributes: &[AttributeType],
    ) -> Result<Message, AgentError> {
        let mut out = Message::error_response(src, UNKNOWN_ATTRIBUTE)?;
        out.add_attribute(UnknownAttributes::new(attributes).into())?;
        Ok(out)
    }

    pub fn bad_request(src: &Message) -> Result<Message, AgentError> {
        Message::error_response(src, BAD_REQUEST)
    }

    /// An error response to `src` carrying SOFTWARE and ERROR-CODE
    pub fn error_response(src: &Message, code: u16) -> Result<Message, AgentError> {
        let mut out = Message::new_error(src);
        out.add_attribute(Software::new(crate::SOFTWARE_NAME)?.into())?;
        out.add_attribute(ErrorCode::with_code(code)?.into())?;
        Ok(out)
    }
}

impl From<Message> for Vec<u8> {
    fn from(f: Message) -> Self {
        f.to_bytes()
    }
}

impl TryFrom<&[u8]> for Message {
    type Error = AgentError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        Message::from_bytes(value)
    }
}
