/// Common test utilities shared by the integration tests.

use proptest::prelude::*;

/// Standard proptest configuration (100 iterations).
pub fn proptest_config() -> ProptestConfig {
    ProptestConfig {
        cases: 100,
        ..ProptestConfig::default()
    }
}

/// Generate a positive recurrence period, 1s..1day in milliseconds.
pub fn every_ms() -> impl Strategy<Value = i64> {
    1_000i64..86_400_000
}

/// Generate a plausible epoch-millisecond anchor (2020..2040 or so).
pub fn anchor_ms() -> impl Strategy<Value = i64> {
    1_577_836_800_000i64..2_208_988_800_000
}
