// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use once_cell::sync::Lazy;
use prometheus::{register_histogram, Histogram};

/// Time spent re-checking one transaction's readset against the
/// multi-version state. Observational only.
pub static VALIDATION_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "occ_multiversion_validation_seconds",
        "Time spent validating a transaction's readset against the multi-version store"
    )
    .unwrap()
});
