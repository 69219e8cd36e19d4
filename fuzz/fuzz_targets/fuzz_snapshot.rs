#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Persisted snapshots come from disk and may be corrupted or truncated;
    // decoding must reject bad input without panicking.
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = matchwire_client::persist::decode_snapshot(s);
    }
});
