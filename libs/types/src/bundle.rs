//! Ordered call sequences handed to the bundle executor

use crate::errors::TypesError;
use ethers_core::types::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};

/// One contract call inside a bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallDescriptor {
    pub target: Address,
    pub payload: Bytes,
    pub value: U256,
    /// Explicit gas limit; estimated when absent
    #[serde(default)]
    pub gas_limit: Option<u64>,
    /// Byte offset in `payload` where the first return word of the previous call is
    /// written before this call is simulated
    #[serde(default)]
    pub splice_previous_output: Option<usize>,
}

impl CallDescriptor {
    pub fn new(target: Address, payload: Bytes, value: U256) -> Self {
        Self {
            target,
            payload,
            value,
            gas_limit: None,
            splice_previous_output: None,
        }
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = Some(gas_limit);
        self
    }

    pub fn splicing_previous_output_at(mut self, offset: usize) -> Self {
        self.splice_previous_output = Some(offset);
        self
    }

    /// Missing pieces, if any: zero target or empty payload with zero value
    pub fn missing_fields(&self) -> Option<&'static str> {
        if self.target.is_zero() {
            Some("target")
        } else if self.payload.is_empty() && self.value.is_zero() {
            Some("payload")
        } else {
            None
        }
    }
}

/// Calls that must land together, valid for a number of blocks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bundle {
    pub calls: Vec<CallDescriptor>,
    pub validity_blocks: u64,
    /// Human-readable tag for logs (usually the path)
    #[serde(default)]
    pub label: String,
}

impl Bundle {
    pub fn new(calls: Vec<CallDescriptor>, validity_blocks: u64) -> Result<Self, TypesError> {
        if validity_blocks == 0 {
            return Err(TypesError::ZeroValidity);
        }
        Ok(Self {
            calls,
            validity_blocks,
            label: String::new(),
        })
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}
