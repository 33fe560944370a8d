//! Fuzz target for pack indexing.
//!
//! Tests that the pack indexer handles arbitrary input without panicking.

#![no_main]

use barge_git::pack;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = pack::index_pack(data, &|_| None);
});
