//! Fuzz testing for client key resolution and config parsing.
//!
//! Ensures that header, address and duration handling never panics on
//! hostile input.
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! # Install cargo-fuzz (requires nightly)
//! cargo +nightly install cargo-fuzz
//!
//! # Run the client key fuzz target
//! cargo +nightly fuzz run fuzz_client_key
//!
//! # Run with a time limit (e.g., 60 seconds)
//! cargo +nightly fuzz run fuzz_client_key -- -max_total_time=60
//! ```
//!
//! # What This Tests
//!
//! - `resolve_client_key`: forwarding header precedence and peer fallback
//! - `strip_port`: host:port and bracketed IPv6 handling
//! - `CidrRange::parse`: trusted proxy ranges, including silly prefix lengths
//! - `parse_duration`: window and eviction interval strings

#![no_main]

use arbitrary::Arbitrary;
use axum::http::{HeaderMap, HeaderValue};
use gatekeeper::config::parse_duration;
use gatekeeper::middleware::ip::{CidrRange, resolve_client_key, strip_port};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input<'a> {
    forwarded_for: Option<&'a [u8]>,
    real_ip: Option<&'a [u8]>,
    peer: Option<&'a str>,
    cidr: &'a str,
    duration: &'a str,
}

fuzz_target!(|input: Input<'_>| {
    let mut headers = HeaderMap::new();
    if let Some(value) = input.forwarded_for.and_then(|v| HeaderValue::from_bytes(v).ok()) {
        headers.insert("x-forwarded-for", value);
    }
    if let Some(value) = input.real_ip.and_then(|v| HeaderValue::from_bytes(v).ok()) {
        headers.insert("x-real-ip", value);
    }

    let _ = resolve_client_key(&headers, input.peer);

    if let Some(peer) = input.peer {
        let _ = strip_port(peer);
    }

    if let Some(range) = CidrRange::parse(input.cidr) {
        let _ = range.contains(&"10.1.2.3".parse().unwrap());
        let _ = range.contains(&"::1".parse().unwrap());
    }

    let _ = parse_duration("RATE_LIMIT_WINDOW", input.duration);
});
