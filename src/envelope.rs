//! Boundary marshaling: the universal success/failure wrapper.
//!
//! Every engine operation crossing a host boundary (FFI glue, IPC, logging)
//! is wrapped in a [`ResponseEnvelope`]: exactly one of `error` and `result`
//! is present. Each operation gets its own statically-typed `result` shape;
//! there is no reflective dispatch.

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScripError};

/// Wire form of a [`ScripError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeError {
    pub message: String,
    pub internal: bool,
}

impl From<&ScripError> for EnvelopeError {
    fn from(e: &ScripError) -> Self {
        Self {
            message: e.message().to_string(),
            internal: e.is_internal(),
        }
    }
}

impl From<EnvelopeError> for ScripError {
    fn from(e: EnvelopeError) -> Self {
        if e.internal {
            ScripError::internal(e.message)
        } else {
            ScripError::recoverable(e.message)
        }
    }
}

/// `{ "error": {...} | absent, "result": ... | absent }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope<T> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<EnvelopeError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
}

impl<T> ResponseEnvelope<T> {
    pub fn ok(result: T) -> Self {
        Self {
            error: None,
            result: Some(result),
        }
    }

    pub fn err(error: &ScripError) -> Self {
        Self {
            error: Some(error.into()),
            result: None,
        }
    }

    pub fn from_result(result: Result<T>) -> Self {
        match result {
            Ok(value) => Self::ok(value),
            Err(e) => Self::err(&e),
        }
    }

    /// Unwrap back into a `Result`, enforcing the exactly-one contract.
    pub fn into_result(self) -> Result<T> {
        match (self.error, self.result) {
            (None, Some(result)) => Ok(result),
            (Some(error), None) => Err(error.into()),
            (None, None) => Err(ScripError::internal(
                "envelope has neither error nor result",
            )),
            (Some(_), Some(_)) => Err(ScripError::internal(
                "envelope has both error and result",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Status;

    #[test]
    fn test_ok_envelope_wire_shape() {
        let envelope = ResponseEnvelope::ok(Status::Success);
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json, serde_json::json!({ "result": 0 }));
    }

    #[test]
    fn test_err_envelope_wire_shape() {
        let envelope: ResponseEnvelope<Status> =
            ResponseEnvelope::err(&ScripError::internal("corrupt state"));
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "error": { "message": "corrupt state", "internal": true } })
        );
    }

    #[test]
    fn test_round_trip_through_result() {
        let original: Result<i64> = Ok(1_000_000_000_000);
        let envelope = ResponseEnvelope::from_result(original);
        let json = serde_json::to_string(&envelope).unwrap();
        let back: ResponseEnvelope<i64> = serde_json::from_str(&json).unwrap();
        assert_eq!(back.into_result().unwrap(), 1_000_000_000_000);

        let failed: Result<i64> = Err(ScripError::recoverable("no network"));
        let envelope = ResponseEnvelope::from_result(failed);
        let err = envelope.into_result().unwrap_err();
        assert!(!err.is_internal());
        assert_eq!(err.message(), "no network");
    }

    #[test]
    fn test_exactly_one_contract_enforced() {
        let neither: ResponseEnvelope<i64> = serde_json::from_str("{}").unwrap();
        assert!(neither.into_result().unwrap_err().is_internal());

        let both: ResponseEnvelope<i64> = serde_json::from_str(
            r#"{"error":{"message":"m","internal":false},"result":3}"#,
        )
        .unwrap();
        assert!(both.into_result().unwrap_err().is_internal());
    }
}
