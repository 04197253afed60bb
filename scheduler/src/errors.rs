// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum Error {
    /// The caller-supplied cancellation token fired while the batch was in
    /// flight. Nothing was committed to the parent stores and no guarantee
    /// is made about multi-version state.
    #[error("batch execution cancelled before commit")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;
