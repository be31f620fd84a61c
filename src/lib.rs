// Copyright (C) 2020 Matthew Waters <matthew@centricular.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! ICE (RFC 8445) connectivity checks.
//!
//! A [`session::Session`] forms candidate pairs for each stream, paces STUN
//! Binding checks across them, resolves role conflicts with the peer and
//! nominates a pair per component.  It performs no I/O itself;
//! [`agent::Agent`] drives a session over an async transport.

#[macro_use]
extern crate tracing;

#[macro_use]
extern crate derivative;

pub mod agent;
pub mod candidate;
pub mod checklist;
pub mod clock;
pub mod component;
pub mod conncheck;
pub mod pair;
pub mod retry;
pub mod session;
pub mod stun;
mod utils;

pub(crate) const SOFTWARE_NAME: &str = concat!("librice-conncheck ", env!("CARGO_PKG_VERSION"));
