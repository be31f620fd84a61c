#![no_main]
use libfuzzer_sys::fuzz_target;

#[macro_use]
extern crate tracing;
use once_cell::sync::Lazy;
use tracing_subscriber::EnvFilter;

use librice_conncheck::stun::message::*;

#[derive(arbitrary::Arbitrary, Debug)]
struct DataAndCredentials<'data> {
    data: &'data [u8],
    credentials: ShortTermCredentials,
}

static TRACING: Lazy<()> = Lazy::new(|| {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
});

fuzz_target!(|data_and_credentials: DataAndCredentials| {
    Lazy::force(&TRACING);
    let msg = Message::from_bytes(data_and_credentials.data);
    debug!("parsed {:?}", msg);
    let integrity_result = msg.and_then(|msg| {
        msg.validate_integrity(data_and_credentials.data, &data_and_credentials.credentials)
    });
    debug!("integrity result {:?}", integrity_result);
});
