//! Fuzz target for receive-pack request parsing.
//!
//! Drives the full push path with arbitrary bodies against an in-memory
//! repository; the engine must reject garbage without panicking.

#![no_main]

use barge_git::Repository;
use barge_protocol::receive_pack;
use barge_store::MemoryStore;
use libfuzzer_sys::fuzz_target;
use std::sync::Arc;

fuzz_target!(|data: &[u8]| {
    let repo = Repository::new(Arc::new(MemoryStore::new()));
    if repo.init().is_err() {
        return;
    }
    let _ = receive_pack(&repo, data);
});
