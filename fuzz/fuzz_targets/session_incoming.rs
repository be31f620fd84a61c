#![no_main]
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use libfuzzer_sys::fuzz_target;

#[macro_use]
extern crate tracing;
use once_cell::sync::Lazy;
use tracing_subscriber::EnvFilter;

use librice_conncheck::candidate::{Candidate, CandidateType, TransportType};
use librice_conncheck::conncheck::Credentials;
use librice_conncheck::session::{Session, SessionPollRet};

#[derive(arbitrary::Arbitrary, Debug)]
struct Incoming<'data> {
    controlling: bool,
    from_remote: bool,
    advance_ms: u16,
    data: &'data [u8],
}

static TRACING: Lazy<()> = Lazy::new(|| {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
});

const LOCAL: &str = "192.168.1.1:1000";
const REMOTE: &str = "192.168.1.2:2000";

fn session(controlling: bool) -> Session {
    let mut session = Session::builder().controlling(controlling).build();
    let stream = session.add_stream(
        Credentials::new("lufrag", "lpasswd"),
        Credentials::new("rufrag", "rpasswd"),
    );
    if let Some(list) = session.stream_mut(stream) {
        let local: SocketAddr = LOCAL.parse().unwrap();
        let remote: SocketAddr = REMOTE.parse().unwrap();
        let _ = list.add_local_candidate(
            Candidate::builder(1, CandidateType::Host, TransportType::Udp, "0", local).build(),
        );
        let _ = list.add_remote_candidate(
            Candidate::builder(1, CandidateType::Host, TransportType::Udp, "0", remote).build(),
        );
    }
    let _ = session.start_checks();
    session
}

fuzz_target!(|incoming: Incoming| {
    Lazy::force(&TRACING);
    let mut session = session(incoming.controlling);
    let now = Instant::now();
    let _ = session.poll(now);
    let from: SocketAddr = if incoming.from_remote {
        REMOTE.parse().unwrap()
    } else {
        "10.0.0.1:3000".parse().unwrap()
    };
    let ret = session.handle_incoming(now, from, LOCAL.parse().unwrap(), incoming.data);
    debug!("incoming result {:?}", ret);
    let later = now + Duration::from_millis(incoming.advance_ms as u64);
    for _ in 0..16 {
        match session.poll(later) {
            SessionPollRet::Transmit(_) | SessionPollRet::Event(_) => continue,
            _ => break,
        }
    }
});
