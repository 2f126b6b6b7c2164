use proptest::prelude::*;

/// Strategy for payload-like strings, including empty ones
pub fn payload_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9{}\":, ]{0,64}"
}

/// Strategy for a batch of payloads pushed by one producer
pub fn payload_batch_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(payload_strategy(), 0..200)
}
