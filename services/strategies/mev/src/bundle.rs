//! Bundle construction and structural validation

use thiserror::Error;
use types::{Address, Bundle, Bytes, CallDescriptor, U256};

/// Structural problem found before any chain access
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BundleError {
    #[error("bundle has no calls")]
    Empty,

    #[error("bundle has {count} calls, limit is {max}")]
    TooManyCalls { count: usize, max: usize },

    #[error("call {index} is missing its {field}")]
    MissingField { index: usize, field: &'static str },

    #[error("call {index} splices at offset {offset} past a {len}-byte payload")]
    SpliceOutOfRange {
        index: usize,
        offset: usize,
        len: usize,
    },

    #[error("call 0 cannot splice a previous output")]
    SpliceOnFirstCall,

    #[error("bundle validity must be at least one block")]
    ZeroValidity,
}

/// Builder for atomic call bundles
pub struct BundleBuilder {
    calls: Vec<CallDescriptor>,
    validity_blocks: u64,
    label: String,
}

impl BundleBuilder {
    pub fn new(validity_blocks: u64) -> Self {
        Self {
            calls: Vec::new(),
            validity_blocks,
            label: String::new(),
        }
    }

    pub fn add_call(mut self, call: CallDescriptor) -> Self {
        self.calls.push(call);
        self
    }

    /// Plain value transfer, e.g. a builder tip
    pub fn add_transfer(self, to: Address, value: U256) -> Self {
        self.add_call(CallDescriptor::new(to, Bytes::new(), value))
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn build(self) -> Result<Bundle, BundleError> {
        let bundle = Bundle::new(self.calls, self.validity_blocks)
            .map_err(|_| BundleError::ZeroValidity)?
            .with_label(self.label);
        Ok(bundle)
    }
}

/// Check call count and per-call completeness
pub fn validate_bundle(bundle: &Bundle, max_calls: usize) -> Result<(), BundleError> {
    if bundle.is_empty() {
        return Err(BundleError::Empty);
    }
    if bundle.len() > max_calls {
        return Err(BundleError::TooManyCalls {
            count: bundle.len(),
            max: max_calls,
        });
    }
    if bundle.validity_blocks == 0 {
        return Err(BundleError::ZeroValidity);
    }

    for (index, call) in bundle.calls.iter().enumerate() {
        if let Some(field) = call.missing_fields() {
            return Err(BundleError::MissingField { index, field });
        }
        if let Some(offset) = call.splice_previous_output {
            if index == 0 {
                return Err(BundleError::SpliceOnFirstCall);
            }
            if offset.checked_add(32).map_or(true, |end| end > call.payload.len()) {
                return Err(BundleError::SpliceOutOfRange {
                    index,
                    offset,
                    len: call.payload.len(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(byte: u8) -> CallDescriptor {
        CallDescriptor::new(
            Address::repeat_byte(byte),
            Bytes::from(vec![0xab; 68]),
            U256::zero(),
        )
    }

    #[test]
    fn test_builder_and_validation() {
        let bundle = BundleBuilder::new(2)
            .add_call(call(1).with_gas_limit(400_000))
            .add_transfer(Address::repeat_byte(9), U256::from(1_000u64))
            .label("WBNB→USDT→CAKE→WBNB")
            .build()
            .unwrap();

        assert_eq!(bundle.len(), 2);
        assert_eq!(bundle.calls[0].gas_limit, Some(400_000));
        assert!(validate_bundle(&bundle, 8).is_ok());
        assert_eq!(
            validate_bundle(&bundle, 1),
            Err(BundleError::TooManyCalls { count: 2, max: 1 })
        );
    }

    #[test]
    fn test_missing_fields_rejected() {
        let bundle = BundleBuilder::new(1)
            .add_call(call(1))
            .add_call(CallDescriptor::new(Address::zero(), Bytes::from(vec![1]), U256::zero()))
            .build()
            .unwrap();
        assert_eq!(
            validate_bundle(&bundle, 8),
            Err(BundleError::MissingField {
                index: 1,
                field: "target"
            })
        );

        let empty = BundleBuilder::new(1).build().unwrap();
        assert_eq!(validate_bundle(&empty, 8), Err(BundleError::Empty));
        assert!(matches!(BundleBuilder::new(0).build(), Err(BundleError::ZeroValidity)));
    }

    #[test]
    fn test_splice_bounds() {
        let bundle = BundleBuilder::new(1)
            .add_call(call(1))
            .add_call(call(2).splicing_previous_output_at(40))
            .build()
            .unwrap();
        assert!(matches!(
            validate_bundle(&bundle, 8),
            Err(BundleError::SpliceOutOfRange { index: 1, .. })
        ));

        let first = BundleBuilder::new(1)
            .add_call(call(1).splicing_previous_output_at(4))
            .build()
            .unwrap();
        assert_eq!(validate_bundle(&first, 8), Err(BundleError::SpliceOnFirstCall));

        let huge = BundleBuilder::new(1)
            .add_call(call(1))
            .add_call(call(2).splicing_previous_output_at(usize::MAX))
            .build()
            .unwrap();
        assert!(matches!(
            validate_bundle(&huge, 8),
            Err(BundleError::SpliceOutOfRange {
                index: 1,
                offset: usize::MAX,
                ..
            })
        ));
    }
}
