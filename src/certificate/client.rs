//! Client for the external certificate service. The service renders PDFs
//! and QR codes and stores records; this side only builds requests and
//! relays what comes back. Calls are never retried.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Method, Response, StatusCode};

use super::id::{CertificateId, IdRules};
use crate::config::{CertificateConfig, IdIssuance, VerifyMethod};
use crate::error::{AppError, Result};
use crate::models::{CertificateMetadata, CertificateRecord, IssuedCertificate};

/// Upper bound on how much of an error body ends up in a message.
const MAX_ERROR_BODY: usize = 200;

#[derive(Debug, Clone)]
pub struct MintedCertificate {
    pub id: CertificateId,
    pub confidence: f32,
    pub issued_at: DateTime<Utc>,
    pub qr_payload: String,
    pub pdf: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct QrImage {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub enum VerifyOutcome {
    Verified {
        id: CertificateId,
        metadata: CertificateMetadata,
        qr: Option<QrImage>,
    },
    NotFound {
        id: CertificateId,
    },
}

pub struct CertificateClient {
    http: reqwest::Client,
    base_url: String,
    verify_base_url: String,
    rules: IdRules,
    issuance: IdIssuance,
    persist_records: bool,
    verify_method: VerifyMethod,
    fetch_qr: bool,
    mint_threshold: f32,
}

impl CertificateClient {
    pub fn from_config(cfg: &CertificateConfig, mint_threshold: f32) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| AppError::Config(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            verify_base_url: cfg.verify_base_url.clone(),
            rules: IdRules::new(cfg.id_prefix.clone(), cfg.min_id_len),
            issuance: cfg.issuance,
            persist_records: cfg.persist_records,
            verify_method: cfg.verify_method,
            fetch_qr: cfg.fetch_qr,
            mint_threshold,
        })
    }

    pub fn rules(&self) -> &IdRules {
        &self.rules
    }

    /// The URL a QR code encodes; it lands on the verify deep link.
    pub fn qr_payload(&self, id: &CertificateId) -> String {
        format!("{}?verify={}", self.verify_base_url, id)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn check_threshold(&self, confidence: f32) -> Result<()> {
        if confidence < self.mint_threshold {
            return Err(AppError::MintNotAllowed {
                confidence,
                threshold: self.mint_threshold,
            });
        }
        Ok(())
    }

    /// Mint a certificate, using whichever side issues identifiers.
    pub async fn mint(&self, confidence: f32) -> Result<MintedCertificate> {
        self.check_threshold(confidence)?;
        match self.issuance {
            IdIssuance::Client => self.mint_with_id(self.rules.generate(), confidence).await,
            IdIssuance::Server => {
                let issued_at = Utc::now();
                let record = CertificateRecord {
                    cert_id: None,
                    confidence,
                    timestamp: issued_at,
                    qr_payload: None,
                };
                let resp = self
                    .send_checked(self.http.post(self.url("/certificate")).json(&record))
                    .await?;
                let issued: IssuedCertificate = resp.json().await?;
                let id = self.rules.parse(&issued.cert_id).map_err(|e| AppError::RemoteStatus {
                    status: StatusCode::OK.as_u16(),
                    message: format!("service issued an unusable identifier: {e}"),
                })?;
                tracing::info!(%id, "certificate service issued identifier");
                self.fetch_pdf(id, confidence, issued_at).await
            }
        }
    }

    /// Mint under a locally chosen identifier: optional persistence, then
    /// the PDF. A failed persistence call stops the sequence.
    pub async fn mint_with_id(&self, id: CertificateId, confidence: f32) -> Result<MintedCertificate> {
        self.check_threshold(confidence)?;
        let issued_at = Utc::now();

        if self.persist_records {
            let record = CertificateRecord {
                cert_id: Some(id.clone()),
                confidence,
                timestamp: issued_at,
                qr_payload: Some(self.qr_payload(&id)),
            };
            self.send_checked(self.http.post(self.url("/certificate")).json(&record))
                .await?;
            tracing::info!(%id, confidence, "certificate record persisted");
        }

        self.fetch_pdf(id, confidence, issued_at).await
    }

    async fn fetch_pdf(
        &self,
        id: CertificateId,
        confidence: f32,
        issued_at: DateTime<Utc>,
    ) -> Result<MintedCertificate> {
        let qr_payload = self.qr_payload(&id);
        let confidence_param = format!("{confidence:.2}");
        let request = self
            .http
            .get(self.url(&format!("/certificate/{id}/pdf")))
            .query(&[("qrData", qr_payload.as_str()), ("confidence", confidence_param.as_str())]);
        let pdf = self.send_checked(request).await?.bytes().await?.to_vec();

        tracing::info!(%id, bytes = pdf.len(), "certificate PDF received");
        Ok(MintedCertificate {
            id,
            confidence,
            issued_at,
            qr_payload,
            pdf,
        })
    }

    /// Verify a user-supplied identifier. Malformed input never reaches
    /// the network.
    pub async fn verify(&self, input: &str) -> Result<VerifyOutcome> {
        let id = self.rules.parse(input)?;
        let method = match self.verify_method {
            VerifyMethod::Get => Method::GET,
            VerifyMethod::Head => Method::HEAD,
        };

        let resp = self
            .http
            .request(method.clone(), self.url(&format!("/certificate/{id}")))
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            tracing::info!(%id, "certificate not found");
            return Ok(VerifyOutcome::NotFound { id });
        }
        if !status.is_success() {
            return Err(status_error(resp).await);
        }

        let metadata = if method == Method::HEAD {
            CertificateMetadata::default()
        } else {
            read_metadata(resp).await?
        };
        tracing::info!(%id, "certificate verified");

        let qr = if self.fetch_qr {
            match self.fetch_qr_image(&id).await {
                Ok(qr) => Some(qr),
                Err(e) => {
                    tracing::warn!(%id, error = %e, "QR fetch failed after verification");
                    None
                }
            }
        } else {
            None
        };

        Ok(VerifyOutcome::Verified { id, metadata, qr })
    }

    pub async fn fetch_qr_image(&self, id: &CertificateId) -> Result<QrImage> {
        let resp = self
            .http
            .get(self.url(&format!("/qr/{id}")))
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(AppError::NotFound(id.to_string()));
        }
        if !resp.status().is_success() {
            return Err(status_error(resp).await);
        }

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/png")
            .to_string();
        let bytes = resp.bytes().await?.to_vec();
        Ok(QrImage {
            content_type,
            bytes,
        })
    }

    async fn send_checked(&self, request: reqwest::RequestBuilder) -> Result<Response> {
        let resp = request.send().await?;
        if resp.status().is_success() {
            Ok(resp)
        } else {
            Err(status_error(resp).await)
        }
    }
}

/// A lookup answers with JSON metadata or with the certificate PDF
/// itself. Only a JSON body carries metadata; any other 200 body still
/// proves the certificate exists.
async fn read_metadata(resp: Response) -> Result<CertificateMetadata> {
    let is_json = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|essence| essence.trim().to_ascii_lowercase().ends_with("json"))
        .unwrap_or(false);
    let body = resp.bytes().await?;

    if !is_json {
        tracing::debug!(bytes = body.len(), "lookup returned a non-JSON body");
        return Ok(CertificateMetadata::default());
    }
    serde_json::from_slice(&body).map_err(|e| AppError::MalformedResponse(e.to_string()))
}

async fn status_error(resp: Response) -> AppError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    let body = body.trim();
    let message = if body.is_empty() {
        status.canonical_reason().unwrap_or("unknown status").to_string()
    } else {
        body.chars().take(MAX_ERROR_BODY).collect()
    };
    tracing::warn!(status = status.as_u16(), %message, "certificate service call failed");
    AppError::RemoteStatus {
        status: status.as_u16(),
        message,
    }
}
