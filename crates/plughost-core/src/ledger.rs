//! Call-once ledger for plugin init functions.

use std::collections::HashSet;

use plughost_sdk::abi::PluginInitFn;

use crate::image::ImageId;

/// A resolved init function: the image it lives in and its address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionId {
    pub image: ImageId,
    pub address: usize,
}

impl FunctionId {
    pub fn new(image: ImageId, function: PluginInitFn) -> Self {
        Self {
            image,
            address: function as usize,
        }
    }
}

/// Functions that have been entered at least once. Only grows.
#[derive(Debug, Default)]
pub struct InitLedger {
    called: HashSet<FunctionId>,
}

impl InitLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `id` as called. Returns `false` if it already was, in which
    /// case the caller must not invoke it again.
    pub fn mark(&mut self, id: FunctionId) -> bool {
        self.called.insert(id)
    }

    pub fn contains(&self, id: &FunctionId) -> bool {
        self.called.contains(id)
    }

    pub fn len(&self) -> usize {
        self.called.len()
    }

    pub fn is_empty(&self) -> bool {
        self.called.is_empty()
    }
}
