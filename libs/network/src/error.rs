//! RPC error types and rate-limit classification

use ethers::abi::{self, ParamType, Token};
use ethers::providers::{JsonRpcError, ProviderError, RpcError as EthersRpcError};
use ethers::types::Bytes;
use std::time::Duration;
use thiserror::Error;

/// Result alias for chain access
pub type Result<T> = std::result::Result<T, RpcError>;

/// Phrases providers use when throttling, matched case-insensitively
///
/// Bare status codes are never matched on their own: addresses, amounts and
/// revert reasons routinely contain the same digits.
pub const RATE_LIMIT_SIGNATURES: &[&str] = &[
    "rate limit",
    "rate-limit",
    "too many requests",
    "status code 429",
    "http 429",
    "429 too many",
    "request limit",
    "exceeded the rps",
    "capacity exceeded",
];

/// JSON-RPC error codes providers use when throttling
pub const RATE_LIMIT_CODES: &[i64] = &[429, -32005, -32029, -32090];

/// Selector of `Error(string)`
const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

/// Classified chain-access failure
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RpcError {
    /// Provider kept throttling until the retry ceiling
    #[error("rate limited after {attempts} attempts: {message}")]
    RateLimited { attempts: u32, message: String },

    /// No response within the request timeout, after retries
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The call would revert on-chain
    #[error("execution reverted: {reason}")]
    Reverted { reason: String, data: Option<Bytes> },

    /// Any other JSON-RPC error response
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// Connection or HTTP level failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Response did not decode into the expected type
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl RpcError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, RpcError::RateLimited { .. })
    }

    pub fn is_revert(&self) -> bool {
        matches!(self, RpcError::Reverted { .. })
    }

    /// Build from a JSON-RPC error response
    ///
    /// Reverts are classified first so a revert reason can never read as throttling.
    pub fn from_response(response: &JsonRpcError) -> Self {
        if is_revert_response(response) {
            let data = response.data.as_ref().and_then(revert_data);
            let reason = data
                .as_ref()
                .and_then(|d| decode_revert_reason(d))
                .unwrap_or_else(|| response.message.clone());
            return RpcError::Reverted { reason, data };
        }
        if is_rate_limit_response(response) {
            return RpcError::RateLimited {
                attempts: 1,
                message: response.message.clone(),
            };
        }
        RpcError::Rpc {
            code: response.code,
            message: response.message.clone(),
        }
    }
}

impl From<ProviderError> for RpcError {
    fn from(err: ProviderError) -> Self {
        if let Some(response) = err.as_error_response() {
            return RpcError::from_response(response);
        }
        if let Some(serde_err) = err.as_serde_error() {
            return RpcError::Decode(serde_err.to_string());
        }
        let message = err.to_string();
        if matches_rate_limit(&message) {
            RpcError::RateLimited {
                attempts: 1,
                message,
            }
        } else {
            RpcError::Transport(message)
        }
    }
}

/// True when the text carries a known throttling signature
pub fn matches_rate_limit(message: &str) -> bool {
    let lowered = message.to_lowercase();
    RATE_LIMIT_SIGNATURES.iter().any(|sig| lowered.contains(sig))
}

/// Code 3 or an "execution reverted" message
pub fn is_revert_response(response: &JsonRpcError) -> bool {
    response.code == 3 || response.message.to_lowercase().contains("execution reverted")
}

pub fn is_rate_limit_response(response: &JsonRpcError) -> bool {
    if is_revert_response(response) {
        return false;
    }
    RATE_LIMIT_CODES.contains(&response.code) || matches_rate_limit(&response.message)
}

/// Throttling check over any provider error
pub fn is_rate_limit_error(err: &ProviderError) -> bool {
    match err.as_error_response() {
        Some(response) => is_rate_limit_response(response),
        None => matches_rate_limit(&err.to_string()),
    }
}

fn revert_data(value: &serde_json::Value) -> Option<Bytes> {
    let text = value.as_str().or_else(|| value.get("data").and_then(|d| d.as_str()))?;
    text.parse::<Bytes>().ok()
}

/// Decode `Error(string)` revert payloads
pub fn decode_revert_reason(data: &[u8]) -> Option<String> {
    if data.len() < 4 || data[..4] != ERROR_STRING_SELECTOR {
        return None;
    }
    match abi::decode(&[ParamType::String], &data[4..]).ok()?.into_iter().next()? {
        Token::String(reason) => Some(reason),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(code: i64, message: &str, data: Option<serde_json::Value>) -> JsonRpcError {
        JsonRpcError {
            code,
            message: message.to_string(),
            data,
        }
    }

    #[test]
    fn test_rate_limit_by_code_and_text() {
        assert!(is_rate_limit_response(&response(-32005, "limit", None)));
        assert!(is_rate_limit_response(&response(-32000, "Too Many Requests", None)));
        assert!(!is_rate_limit_response(&response(-32000, "nonce too low", None)));
    }

    #[test]
    fn test_revert_reason_decoded() {
        let mut payload = ERROR_STRING_SELECTOR.to_vec();
        payload.extend(abi::encode(&[Token::String("INSUFFICIENT_OUTPUT".into())]));
        let data = serde_json::Value::String(Bytes::from(payload).to_string());

        let err = RpcError::from_response(&response(3, "execution reverted", Some(data)));
        match err {
            RpcError::Reverted { reason, data } => {
                assert_eq!(reason, "INSUFFICIENT_OUTPUT");
                assert!(data.is_some());
            }
            other => panic!("expected revert, got {other:?}"),
        }
    }

    #[test]
    fn test_digits_in_messages_are_not_throttling() {
        assert!(!matches_rate_limit(
            "insufficient funds for gas * price + value: address 0x4290000000000000000000000000000000000001 have 1 want 2"
        ));
        assert!(!matches_rate_limit("nonce too low: next nonce 14290, tx nonce 1"));
        assert!(!matches_rate_limit("invalid argument -320050"));
        assert!(matches_rate_limit("HTTP status client error (429 Too Many Requests) for url"));
        assert!(matches_rate_limit("server returned status code 429"));
    }

    #[test]
    fn test_revert_wins_over_throttling_text() {
        let err = RpcError::from_response(&response(3, "execution reverted: minReturn 1429", None));
        assert_eq!(
            err,
            RpcError::Reverted {
                reason: "execution reverted: minReturn 1429".to_string(),
                data: None,
            }
        );

        let err = RpcError::from_response(&response(-32000, "execution reverted: rate limit on pair", None));
        assert!(err.is_revert());
        assert!(!is_rate_limit_response(&response(3, "too many requests", None)));
    }

    #[test]
    fn test_unrelated_rpc_error_propagates_unclassified() {
        let err = RpcError::from_response(&response(-32000, "header not found for block 4290", None));
        assert_eq!(
            err,
            RpcError::Rpc {
                code: -32000,
                message: "header not found for block 4290".to_string(),
            }
        );
    }

    #[test]
    fn test_plain_error_is_not_retryable() {
        let err = RpcError::from(ProviderError::CustomError("connection refused".into()));
        assert!(matches!(err, RpcError::Transport(_)));
        let err = RpcError::from(ProviderError::CustomError("HTTP 429".into()));
        assert!(err.is_rate_limited());
    }
}
