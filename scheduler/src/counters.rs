// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use once_cell::sync::Lazy;
use prometheus::{register_histogram, register_int_counter, Histogram, IntCounter};

/// Wall-clock time of a full batch, including all execution and validation
/// rounds and the terminal commit.
pub static BATCH_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "occ_scheduler_batch_seconds",
        "Time spent processing one batch of transactions"
    )
    .unwrap()
});

/// Count of transactions scheduled for re-execution, whether from an
/// estimate abort or a failed validation.
pub static RE_EXECUTION_COUNT: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "occ_scheduler_re_execution_count",
        "Number of transactions scheduled for re-execution after a round"
    )
    .unwrap()
});
