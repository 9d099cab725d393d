//! Local pre-flight of a bundle through read-only calls
//!
//! Calls run in order against current state. When a call asks for it, the first
//! 32-byte return word of the previous call is written into its payload first.
//! The first revert stops the run and reports its index.

use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionRequest};
use network::{ChainClient, RpcError};
use thiserror::Error;
use tracing::debug;
use types::{Bundle, CallDescriptor};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimulationFailure {
    #[error("call {index} would revert: {reason}")]
    Reverted { index: usize, reason: String },

    #[error("call {index} could not be simulated: {reason}")]
    Unavailable { index: usize, reason: String },

    #[error("call {index} needs {needed} bytes of previous output, got {got}")]
    MissingOutput {
        index: usize,
        needed: usize,
        got: usize,
    },

    #[error("call {index} splices at offset {offset} past a {len}-byte payload")]
    SpliceOutOfRange { index: usize, offset: usize, len: usize },
}

impl SimulationFailure {
    pub fn index(&self) -> usize {
        match self {
            SimulationFailure::Reverted { index, .. }
            | SimulationFailure::Unavailable { index, .. }
            | SimulationFailure::MissingOutput { index, .. }
            | SimulationFailure::SpliceOutOfRange { index, .. } => *index,
        }
    }
}

/// Return data of every call, in order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulationReport {
    pub outputs: Vec<Bytes>,
}

pub(crate) fn call_request(from: Address, call: &CallDescriptor, payload: Bytes) -> TypedTransaction {
    let mut request = TransactionRequest::new()
        .from(from)
        .to(call.target)
        .data(payload)
        .value(call.value);
    if let Some(gas) = call.gas_limit {
        request = request.gas(gas);
    }
    request.into()
}

fn splice(payload: &Bytes, offset: usize, previous: &Bytes, index: usize) -> Result<Bytes, SimulationFailure> {
    let Some(end) = offset.checked_add(32).filter(|end| *end <= payload.len()) else {
        return Err(SimulationFailure::SpliceOutOfRange {
            index,
            offset,
            len: payload.len(),
        });
    };
    if previous.len() < 32 {
        return Err(SimulationFailure::MissingOutput {
            index,
            needed: 32,
            got: previous.len(),
        });
    }
    let mut spliced = payload.to_vec();
    spliced[offset..end].copy_from_slice(&previous[..32]);
    Ok(spliced.into())
}

pub async fn simulate_bundle(
    chain: &dyn ChainClient,
    from: Address,
    bundle: &Bundle,
) -> Result<SimulationReport, SimulationFailure> {
    let mut outputs: Vec<Bytes> = Vec::with_capacity(bundle.len());

    for (index, call) in bundle.calls.iter().enumerate() {
        let payload = match (call.splice_previous_output, outputs.last()) {
            (Some(offset), Some(previous)) => splice(&call.payload, offset, previous, index)?,
            (Some(_), None) => {
                return Err(SimulationFailure::MissingOutput {
                    index,
                    needed: 32,
                    got: 0,
                })
            }
            (None, _) => call.payload.clone(),
        };

        let tx = call_request(from, call, payload);
        match chain.call(&tx, None).await {
            Ok(output) => {
                debug!(index, bytes = output.len(), "simulated call");
                outputs.push(output);
            }
            Err(RpcError::Reverted { reason, .. }) => {
                return Err(SimulationFailure::Reverted { index, reason })
            }
            Err(e) => {
                return Err(SimulationFailure::Unavailable {
                    index,
                    reason: e.to_string(),
                })
            }
        }
    }

    Ok(SimulationReport { outputs })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_splice_writes_first_word() {
        let payload = Bytes::from(vec![0u8; 68]);
        let mut previous = vec![0u8; 64];
        previous[31] = 7;
        let spliced = splice(&payload, 4, &Bytes::from(previous), 1).unwrap();
        assert_eq!(spliced[35], 7);
        assert_eq!(spliced.len(), 68);
    }

    #[test]
    fn test_splice_short_output() {
        let payload = Bytes::from(vec![0u8; 68]);
        let err = splice(&payload, 4, &Bytes::from(vec![1u8; 8]), 2).unwrap_err();
        assert_eq!(err.index(), 2);
    }

    #[test]
    fn test_splice_offset_past_payload() {
        let payload = Bytes::from(vec![0u8; 68]);
        let previous = Bytes::from(vec![1u8; 32]);

        let err = splice(&payload, 40, &previous, 1).unwrap_err();
        assert!(matches!(err, SimulationFailure::SpliceOutOfRange { offset: 40, len: 68, .. }));

        let err = splice(&payload, usize::MAX - 8, &previous, 1).unwrap_err();
        assert!(matches!(err, SimulationFailure::SpliceOutOfRange { index: 1, .. }));
    }
}
