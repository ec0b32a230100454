//! Fuzz target for context snapshot decoding.
//!
//! Snapshots may come from disk or another process; arbitrary bytes must
//! decode to an error, never a panic or an oversized allocation.

#![no_main]

use ember_core::engine::ContextSnapshot;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(snapshot) = ContextSnapshot::decode(data) {
        // Anything that decodes must re-encode to the same bytes.
        assert_eq!(snapshot.encode(), data);
    }
});
