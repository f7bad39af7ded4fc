//! Type definitions for the Scrip SDK

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Result, ScripError};

/// Token types the server may issue. A holder with an `account` token is an
/// Account; otherwise it is an anonymous Tracker.
pub mod token_type {
    pub const EARNER: &str = "earner";
    pub const SPENDER: &str = "spender";
    pub const INDICATOR: &str = "indicator";
    pub const ACCOUNT: &str = "account";
}

/// Business outcome of a synchronization or transaction call.
///
/// These are data, not failures: an operation that completes with
/// `Status::InsufficientBalance` returns `Ok`, not `Err`. On the wire each
/// status is a small integer, round-tripped exactly. `Invalid` is a local
/// sentinel and is never produced by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Invalid = -1,
    Success = 0,
    ExistingTransaction = 1,
    InsufficientBalance = 2,
    TransactionAmountMismatch = 3,
    TransactionTypeNotFound = 4,
    InvalidTokens = 5,
    ServerError = 6,
}

impl Status {
    /// The wire code for this status.
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Decode a wire code. Unknown codes map to `Invalid`.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Status::Success,
            1 => Status::ExistingTransaction,
            2 => Status::InsufficientBalance,
            3 => Status::TransactionAmountMismatch,
            4 => Status::TransactionTypeNotFound,
            5 => Status::InvalidTokens,
            6 => Status::ServerError,
            _ => Status::Invalid,
        }
    }
}

impl Serialize for Status {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.code())
    }
}

impl<'de> Deserialize<'de> for Status {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let code = i32::deserialize(deserializer)?;
        Ok(Status::from_code(code))
    }
}

/// Price of one purchasable (class, distinguisher) pair, in the smallest
/// currency denomination. The catalog is replaced wholesale on each
/// synchronization that requests purchase classes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchasePrice {
    #[serde(rename = "class")]
    pub transaction_class: String,
    pub distinguisher: String,
    pub price: i64,
}

/// Opaque server-issued credential attached to some purchases, consumed by
/// collaborators outside this engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorization {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "AccessType")]
    pub access_type: String,
    #[serde(rename = "Expires")]
    pub expires: DateTime<Utc>,
    /// The original encoded form. Absent when freshly decoded from the server
    /// response, populated before storing.
    #[serde(rename = "Encoded", default)]
    pub encoded: String,
}

/// Decode a base64-encoded authorization as issued by the server.
pub fn decode_authorization(encoded: &str) -> Result<Authorization> {
    #[derive(Deserialize)]
    struct Wrapper {
        #[serde(rename = "Authorization")]
        authorization: Authorization,
    }

    let decoded = BASE64
        .decode(encoded)
        .map_err(|e| ScripError::internal(format!("authorization base64 decode failed: {e}")))?;
    let wrapper: Wrapper = serde_json::from_slice(&decoded)
        .map_err(|e| ScripError::internal(format!("authorization parse failed: {e}")))?;

    let mut authorization = wrapper.authorization;
    authorization.encoded = encoded.to_string();
    Ok(authorization)
}

/// Server-assigned unique purchase identifier.
pub type TransactionId = String;

/// A committed purchase in the local ledger.
///
/// `server_time_expiry` is the authoritative expiry; `local_time_expiry` is
/// that instant shifted into the local clock using the stored server-time
/// diff. Expiry checks use local time; "which expires next" uses server time.
/// A purchase with no expiry never expires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Purchase {
    pub id: TransactionId,
    #[serde(rename = "class")]
    pub transaction_class: String,
    pub distinguisher: String,
    #[serde(rename = "serverTimeExpiry")]
    pub server_time_expiry: Option<DateTime<Utc>>,
    #[serde(rename = "localTimeExpiry")]
    pub local_time_expiry: Option<DateTime<Utc>>,
    pub authorization: Option<Authorization>,
}

/// Result of a successful `new_expiring_purchase` exchange.
///
/// `purchase` is `Some` iff `status` is `Status::Success`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewExpiringPurchaseResponse {
    pub status: Status,
    pub purchase: Option<Purchase>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_round_trip() {
        for status in [
            Status::Success,
            Status::ExistingTransaction,
            Status::InsufficientBalance,
            Status::TransactionAmountMismatch,
            Status::TransactionTypeNotFound,
            Status::InvalidTokens,
            Status::ServerError,
        ] {
            assert_eq!(Status::from_code(status.code()), status);
        }
        assert_eq!(Status::Invalid.code(), -1);
        assert_eq!(Status::from_code(-1), Status::Invalid);
        assert_eq!(Status::from_code(99), Status::Invalid);
    }

    #[test]
    fn test_status_serde_is_integer() {
        assert_eq!(serde_json::to_string(&Status::ServerError).unwrap(), "6");
        let status: Status = serde_json::from_str("2").unwrap();
        assert_eq!(status, Status::InsufficientBalance);
    }

    #[test]
    fn test_decode_authorization() {
        let inner = serde_json::json!({
            "Authorization": {
                "ID": "auth-1",
                "AccessType": "speed-boost",
                "Expires": "2031-01-01T00:00:00Z",
            }
        });
        let encoded = BASE64.encode(inner.to_string());
        let authorization = decode_authorization(&encoded).unwrap();
        assert_eq!(authorization.id, "auth-1");
        assert_eq!(authorization.access_type, "speed-boost");
        assert_eq!(authorization.encoded, encoded);
    }

    #[test]
    fn test_decode_authorization_garbage() {
        let err = decode_authorization("not!base64!").unwrap_err();
        assert!(err.is_internal());

        let encoded = BASE64.encode("{\"nope\": 1}");
        assert!(decode_authorization(&encoded).is_err());
    }

    #[test]
    fn test_purchase_serde_round_trip() {
        let purchase = Purchase {
            id: "txn-1".into(),
            transaction_class: "speed-boost".into(),
            distinguisher: "1hr".into(),
            server_time_expiry: Some("2030-06-01T12:00:00Z".parse().unwrap()),
            local_time_expiry: Some("2030-06-01T12:00:01Z".parse().unwrap()),
            authorization: None,
        };
        let json = serde_json::to_string(&purchase).unwrap();
        let back: Purchase = serde_json::from_str(&json).unwrap();
        assert_eq!(back, purchase);
    }
}
