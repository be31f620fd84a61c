// Copyright (C) 2020 Matthew Waters <matthew@centricular.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Assembly and interpretation of the STUN messages exchanged by connectivity checks

use std::net::SocketAddr;

use crate::agent::AgentError;
use crate::candidate::{Candidate, CandidateType};
use crate::stun::attribute::*;
use crate::stun::message::*;

/// ICE username fragment and password for one side of a stream
#[derive(Clone, PartialEq, Eq, Derivative)]
#[derivative(Debug)]
pub struct Credentials {
    pub ufrag: String,
    #[derivative(Debug = "ignore")]
    pub passwd: String,
}

impl Credentials {
    pub fn new(ufrag: &str, passwd: &str) -> Self {
        Self {
            ufrag: ufrag.to_owned(),
            passwd: passwd.to_owned(),
        }
    }
}

impl From<&Credentials> for ShortTermCredentials {
    fn from(cred: &Credentials) -> Self {
        ShortTermCredentials::new(&cred.passwd)
    }
}

/// What a pair needs from its stream and session to build a check
#[derive(Debug, Clone, Copy)]
pub struct CheckContext<'a> {
    pub controlling: bool,
    pub local_credentials: &'a Credentials,
    pub remote_credentials: &'a Credentials,
}

impl<'a> CheckContext<'a> {
    /// USERNAME for checks we send
    pub(crate) fn outgoing_username(&self) -> String {
        self.remote_credentials.ufrag.clone() + ":" + &self.local_credentials.ufrag
    }

    /// USERNAME expected on checks we receive
    pub(crate) fn incoming_username(&self) -> String {
        self.local_credentials.ufrag.clone() + ":" + &self.remote_credentials.ufrag
    }
}

/// How a datagram must leave the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmitPath {
    /// Straight from the local base address
    Direct,
    /// The local candidate is a relay allocation
    LocalRelayed,
    /// Through the local TURN allocation after setting this peer address
    TurnPeer(SocketAddr),
}

/// A datagram the caller must send
#[derive(Clone, PartialEq, Eq, Derivative)]
#[derivative(Debug)]
pub struct Transmit {
    pub from: SocketAddr,
    pub to: SocketAddr,
    pub path: TransmitPath,
    #[derivative(Debug = "ignore")]
    pub data: Vec<u8>,
}

impl Transmit {
    pub(crate) fn for_pair(local: &Candidate, remote: &Candidate, data: Vec<u8>) -> Self {
        let path = if remote.candidate_type == CandidateType::Relayed {
            TransmitPath::TurnPeer(remote.address)
        } else if local.candidate_type == CandidateType::Relayed {
            TransmitPath::LocalRelayed
        } else {
            TransmitPath::Direct
        };
        Self {
            from: local.send_address(),
            to: remote.address,
            path,
            data,
        }
    }
}

/// The attributes of one outgoing Binding request
#[derive(Debug, Clone, Copy)]
pub(crate) struct BindingRequest {
    pub transaction: u128,
    pub priority: u32,
    pub tie_breaker: u64,
    pub use_candidate: bool,
}

/// Build a signed Binding request.  Attribute order is fixed: USERNAME,
/// PRIORITY, the role attribute, USE-CANDIDATE, REQUESTED-TRANSPORT,
/// MESSAGE-INTEGRITY and finally FINGERPRINT.
pub(crate) fn binding_request(
    request: &BindingRequest,
    ctx: &CheckContext,
) -> Result<Message, AgentError> {
    let mut msg = Message::new_request(BINDING, request.transaction);
    msg.add_attribute(Username::new(&ctx.outgoing_username())?.into())?;
    msg.add_attribute(Priority::new(request.priority).into())?;
    if ctx.controlling {
        msg.add_attribute(IceControlling::new(request.tie_breaker).into())?;
    } else {
        msg.add_attribute(IceControlled::new(request.tie_breaker).into())?;
    }
    if request.use_candidate {
        msg.add_attribute(UseCandidate::new().into())?;
    }
    msg.add_attribute(RequestedTransport::new(TRANSPORT_UDP).into())?;
    msg.add_message_integrity(&ctx.remote_credentials.into())?;
    msg.add_fingerprint()?;
    Ok(msg)
}

/// The outcome carried by a response to one of our checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CheckResponse {
    Success(SocketAddr),
    RoleConflict,
    Failure(u16),
}

/// Interpret a response to one of our checks.  Responses are signed with the
/// peer's password.
pub(crate) fn parse_response(
    msg: &Message,
    data: &[u8],
    remote_credentials: &Credentials,
) -> Result<CheckResponse, AgentError> {
    msg.validate_integrity(data, &remote_credentials.into())?;
    match msg.class() {
        MessageClass::Success => {
            let mapped = msg
                .attribute::<XorMappedAddress>(XOR_MAPPED_ADDRESS)?
                .ok_or(AgentError::Malformed)?;
            Ok(CheckResponse::Success(mapped.addr(msg.transaction_id())))
        }
        MessageClass::Error => {
            let code = msg
                .attribute::<ErrorCode>(ERROR_CODE)?
                .map(|err| err.code())
                .ok_or(AgentError::Malformed)?;
            if code == ROLE_CONFLICT {
                Ok(CheckResponse::RoleConflict)
            } else {
                Ok(CheckResponse::Failure(code))
            }
        }
        _ => Err(AgentError::WrongImplementation),
    }
}

/// The role claimed by the sender of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PeerRole {
    Controlling(u64),
    Controlled(u64),
}

/// A connectivity check received from the peer that passed authentication
#[derive(Debug, Clone)]
pub(crate) struct IncomingCheck {
    pub request: Message,
    pub priority: u32,
    pub use_candidate: bool,
    pub role: PeerRole,
}

#[derive(Debug)]
pub(crate) enum IncomingRequest {
    Check(IncomingCheck),
    /// Answer with this error and do nothing else
    Reply(Message),
    Ignore,
}

const SUPPORTED_ATTRIBUTES: [AttributeType; 8] = [
    USERNAME,
    MESSAGE_INTEGRITY,
    FINGERPRINT,
    PRIORITY,
    USE_CANDIDATE,
    ICE_CONTROLLING,
    ICE_CONTROLLED,
    REQUESTED_TRANSPORT,
];

/// Authenticate and decode a Binding request from the peer.  Requests
/// without credentials, with a username for a different session or with a
/// bad MESSAGE-INTEGRITY are ignored.  Only authenticated requests are
/// answered, errors included.
pub(crate) fn validate_request(
    msg: &Message,
    data: &[u8],
    ctx: &CheckContext,
) -> Result<IncomingRequest, AgentError> {
    let username = match msg.attribute::<Username>(USERNAME)? {
        Some(username) if msg.has_attribute(MESSAGE_INTEGRITY) => username,
        _ => {
            debug!("ignoring request without USERNAME and MESSAGE-INTEGRITY");
            return Ok(IncomingRequest::Ignore);
        }
    };
    if username.username() != ctx.incoming_username() {
        debug!(
            "ignoring request with username '{}', expected '{}'",
            username.username(),
            ctx.incoming_username()
        );
        return Ok(IncomingRequest::Ignore);
    }
    if let Err(e) = msg.validate_integrity(data, &ctx.local_credentials.into()) {
        debug!("ignoring request failing integrity: {:?}", e);
        return Ok(IncomingRequest::Ignore);
    }
    if let Some(error) = Message::check_attribute_types(msg, &SUPPORTED_ATTRIBUTES, &[PRIORITY]) {
        return Ok(IncomingRequest::Reply(sign(error, ctx.local_credentials)?));
    }
    let role = match (
        msg.attribute::<IceControlling>(ICE_CONTROLLING)?,
        msg.attribute::<IceControlled>(ICE_CONTROLLED)?,
    ) {
        (Some(controlling), None) => PeerRole::Controlling(controlling.tie_breaker()),
        (None, Some(controlled)) => PeerRole::Controlled(controlled.tie_breaker()),
        _ => {
            debug!("request without exactly one role attribute");
            return Ok(IncomingRequest::Reply(signed_error(
                msg,
                BAD_REQUEST,
                ctx.local_credentials,
            )?));
        }
    };
    let priority = msg
        .attribute::<Priority>(PRIORITY)?
        .ok_or(AgentError::Malformed)?;
    Ok(IncomingRequest::Check(IncomingCheck {
        request: msg.clone(),
        priority: priority.priority(),
        use_candidate: msg.has_attribute(USE_CANDIDATE),
        role,
    }))
}

/// Success response reflecting `from` back to the peer, signed with our password
pub(crate) fn success_response(
    request: &Message,
    from: SocketAddr,
    local_credentials: &Credentials,
) -> Result<Message, AgentError> {
    let mut response = Message::new_success(request);
    response.add_attribute(XorMappedAddress::new(from, request.transaction_id()).into())?;
    sign(response, local_credentials)
}

/// Error response signed with our password
pub(crate) fn signed_error(
    request: &Message,
    code: u16,
    local_credentials: &Credentials,
) -> Result<Message, AgentError> {
    sign(Message::error_response(request, code)?, local_credentials)
}

fn sign(mut response: Message, local_credentials: &Credentials) -> Result<Message, AgentError> {
    response.add_message_integrity(&local_credentials.into())?;
    response.add_fingerprint()?;
    Ok(response)
}
