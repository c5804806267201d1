#![no_main]

use libfuzzer_sys::fuzz_target;
use ringstore_core::core_cache::CacheReader;
use ringstore_core::core_keyring::KeyringRecord;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes as a snapshot cache: header, count, framed records.
    // The reader must stop at the first bad frame instead of panicking.
    if let Ok(reader) = CacheReader::<KeyringRecord, _>::from_reader(data) {
        for item in reader.take(1024) {
            if item.is_err() {
                break;
            }
        }
    }
});
