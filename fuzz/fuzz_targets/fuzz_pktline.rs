//! Fuzz target for pkt-line parsing.
//!
//! Tests that the pkt-line reader handles arbitrary input without panicking.

#![no_main]

use barge_git::pktline::PktReader;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut reader = PktReader::new(data);

    // Bound iterations to keep crafted inputs from looping forever.
    for _ in 0..1000 {
        match reader.next() {
            Ok(Some(_)) => continue,
            Ok(None) => break,
            Err(_) => break, // Errors are expected for malformed input
        }
    }
});
