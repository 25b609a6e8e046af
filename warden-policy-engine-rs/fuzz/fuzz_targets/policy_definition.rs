#![no_main]

use libfuzzer_sys::fuzz_target;
use warden_policy_engine::Policy;

fuzz_target!(|data: &str| {
    // Arbitrary definitions must compile or fail, never panic
    if let Ok(policy) = Policy::compile("fuzz", "1", data) {
        let _ = policy.validate();
    }
});
