// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use crate::{kv::StoreKey, WriteSet};
use bytes::Bytes;
use std::collections::HashMap;

/// Raw transaction bytes handed to the external handler. Decoding is the
/// handler's concern.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeliverTxRequest {
    pub tx: Bytes,
}

impl DeliverTxRequest {
    pub fn new(tx: Bytes) -> Self {
        Self { tx }
    }
}

/// Handler output for one transaction. A nonzero code is a transaction-level
/// failure, not an engine error.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeliverTxResponse {
    pub code: u32,
    pub data: Bytes,
    pub log: String,
}

impl DeliverTxResponse {
    pub fn ok(data: Bytes) -> Self {
        Self {
            code: 0,
            data,
            ..Self::default()
        }
    }

    pub fn error(code: u32, log: impl Into<String>) -> Self {
        Self {
            code,
            log: log.into(),
            ..Self::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

/// One entry of the ordered batch: the request plus optional externally
/// supplied estimated writesets, keyed by store key. Estimates seed the
/// multi-version stores before the first execution round so that dependent
/// transactions abort early instead of reading stale parent state.
#[derive(Clone, Debug, Default)]
pub struct DeliverTxEntry {
    pub request: DeliverTxRequest,
    pub estimated_writesets: HashMap<StoreKey, WriteSet>,
}

impl DeliverTxEntry {
    pub fn new(tx: Bytes) -> Self {
        Self {
            request: DeliverTxRequest::new(tx),
            ..Self::default()
        }
    }

    pub fn with_estimated_writeset(mut self, store_key: StoreKey, writeset: WriteSet) -> Self {
        self.estimated_writesets.insert(store_key, writeset);
        self
    }
}
