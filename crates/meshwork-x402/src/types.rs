//! x402 wire types
//!
//! All JSON is camelCase. Amounts are base-10 strings of integer minor units and
//! authorization windows are unix seconds.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use meshwork_types::{ReceiptId, TokenAmount};
use serde::{Deserialize, Serialize};

use crate::error::{Result, X402Error};

/// Request header carrying `base64(JSON(PaymentProof))`
pub const PAYMENT_HEADER: &str = "x-payment";
/// Response header carrying `base64(JSON(PaymentReceipt))`
pub const PAYMENT_RESPONSE_HEADER: &str = "x-payment-response";
/// Protocol version header on 402 responses
pub const VERSION_HEADER: &str = "x-402-version";
/// The only payment scheme Meshwork accepts
pub const SCHEME_EXACT: &str = "exact";

/// What a client must pay to access a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentChallenge {
    pub scheme: String,
    pub network: String,
    pub max_amount_required: TokenAmount,
    pub resource: String,
    pub description: String,
    pub mime_type: String,
    pub pay_to: String,
    pub max_timeout_seconds: u64,
    pub asset: String,
}

/// Body of a 402 response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequired {
    pub x402_version: u32,
    pub accepts: Vec<PaymentChallenge>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Signed transfer authorization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Authorization {
    pub from: String,
    pub to: String,
    pub value: TokenAmount,
    #[serde(with = "unix_seconds")]
    pub valid_after: i64,
    #[serde(with = "unix_seconds")]
    pub valid_before: i64,
    pub nonce: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofPayload {
    pub signature: String,
    pub authorization: Authorization,
}

/// Client-submitted payment proof
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentProof {
    pub x402_version: u32,
    pub scheme: String,
    pub network: String,
    pub payload: ProofPayload,
}

impl PaymentProof {
    pub fn nonce(&self) -> &str {
        &self.payload.authorization.nonce
    }

    pub fn payer(&self) -> &str {
        &self.payload.authorization.from
    }

    /// Encode for the `X-PAYMENT` header
    pub fn to_header(&self) -> Result<String> {
        encode_header(self)
    }

    /// Decode an `X-PAYMENT` header value
    pub fn from_header(value: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(value.trim())
            .map_err(|e| X402Error::MalformedProof(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| X402Error::MalformedProof(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Confirmed,
}

/// Proof of an accepted payment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentReceipt {
    pub id: ReceiptId,
    /// The authorization nonce that was consumed
    pub payment_id: String,
    pub status: ReceiptStatus,
    pub confirmed_at: DateTime<Utc>,
    pub transaction_hash: String,
    pub payer: String,
    pub amount: TokenAmount,
    pub network: String,
}

impl PaymentReceipt {
    /// Encode for the `X-PAYMENT-RESPONSE` header
    pub fn to_header(&self) -> Result<String> {
        encode_header(self)
    }

    pub fn from_header(value: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(value.trim())
            .map_err(|e| X402Error::Serialization(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| X402Error::Serialization(e.to_string()))
    }
}

fn encode_header<T: Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_vec(value).map_err(|e| X402Error::Serialization(e.to_string()))?;
    Ok(STANDARD.encode(json))
}

/// Unix seconds written as strings, read from strings or integers
mod unix_seconds {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(value: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        struct SecondsVisitor;

        impl<'de> Visitor<'de> for SecondsVisitor {
            type Value = i64;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("unix seconds as a string or integer")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<i64, E> {
                v.parse().map_err(E::custom)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<i64, E> {
                Ok(v)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<i64, E> {
                i64::try_from(v).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(SecondsVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proof() -> PaymentProof {
        PaymentProof {
            x402_version: 1,
            scheme: SCHEME_EXACT.into(),
            network: "base-sepolia".into(),
            payload: ProofPayload {
                signature: "0xsig".into(),
                authorization: Authorization {
                    from: "0xpayer".into(),
                    to: "0xpayee".into(),
                    value: TokenAmount(10_000),
                    valid_after: 1_700_000_000,
                    valid_before: 1_700_000_300,
                    nonce: "0x01".into(),
                },
            },
        }
    }

    #[test]
    fn proof_json_is_camel_case() {
        let json = serde_json::to_value(proof()).unwrap();
        assert_eq!(json["x402Version"], 1);
        assert_eq!(json["payload"]["authorization"]["validBefore"], "1700000300");
        assert_eq!(json["payload"]["authorization"]["value"], "10000");
    }

    #[test]
    fn proof_header_decodes() {
        let header = proof().to_header().unwrap();
        assert_eq!(PaymentProof::from_header(&header).unwrap(), proof());
    }

    #[test]
    fn numeric_window_accepted() {
        let json = r#"{"from":"a","to":"b","value":"5","validAfter":10,"validBefore":"20","nonce":"n"}"#;
        let auth: Authorization = serde_json::from_str(json).unwrap();
        assert_eq!((auth.valid_after, auth.valid_before), (10, 20));
    }

    #[test]
    fn garbage_header_is_malformed() {
        assert!(matches!(
            PaymentProof::from_header("%%%not-base64"),
            Err(X402Error::MalformedProof(_))
        ));
        let not_json = STANDARD.encode("hello");
        assert!(matches!(
            PaymentProof::from_header(&not_json),
            Err(X402Error::MalformedProof(_))
        ));
    }

    #[test]
    fn payment_required_omits_absent_error() {
        let body = PaymentRequired {
            x402_version: 1,
            accepts: vec![],
            error: None,
        };
        let json = serde_json::to_value(body).unwrap();
        assert!(json.get("error").is_none());
    }
}
