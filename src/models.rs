use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::certificate::CertificateId;
use crate::policy::Band;

// Certificate service wire format.

/// Body of `POST /certificate`. `certId` and `qrPayload` are omitted when
/// the service is the one issuing identifiers.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_id: Option<CertificateId>,
    pub confidence: f32,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_payload: Option<String>,
}

/// Reply to `POST /certificate` when the service issues the identifier.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct IssuedCertificate {
    pub cert_id: String,
}

/// Whatever `GET /certificate/{id}` returns. Known fields are typed,
/// the rest is relayed untouched.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CertificateMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

// Checker HTTP API.

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionResponse {
    pub prediction_id: String,
    pub confidence: f32,
    pub complement: f32,
    pub band: Band,
    pub mint_enabled: bool,
    pub labels: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MintRequest {
    pub prediction_id: String,
}

/// `?verify=<id>` deep link carried by QR codes.
#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    pub verify: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VerifyStatus {
    Verified,
    NotFound,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub status: VerifyStatus,
    pub cert_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<CertificateMetadata>,
    pub qr_available: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub model_loaded: bool,
    pub tracked_predictions: usize,
}
