#![no_main]

use libfuzzer_sys::fuzz_target;
use ringstore_core::core_crypto::is_passphrase_blob;
use ringstore_core::core_keyring::{ProtectionScheme, SecretRingContainer};

fuzz_target!(|data: &[u8]| {
    let _ = ProtectionScheme::of(data);
    let _ = is_passphrase_blob(data);

    // Anything that decodes must encode back to a blob that decodes the same
    if let Ok(container) = SecretRingContainer::decode(data) {
        let blob = container.encode().expect("re-encode decoded container");
        let again = SecretRingContainer::decode(&blob).expect("decode re-encoded container");
        assert_eq!(again, container);
    }
});
