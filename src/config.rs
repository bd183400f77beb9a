//! TOML configuration. Every section and field has a default, so an empty
//! file (or no file at all) yields a working setup.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

pub const CONFIG_ENV: &str = "AUTHCHECK_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub policy: PolicyConfig,
    pub certificate: CertificateConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Number of actix workers; 0 lets actix pick one per core.
    pub workers: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            workers: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeMode {
    /// Exact resize to the square input, ignoring aspect ratio.
    Stretch,
    /// Aspect-preserving resize centered on an opaque black square.
    Letterbox,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// Intensities scaled to [0,1].
    Unit,
    /// [0,1] followed by ImageNet mean/std per channel.
    Imagenet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TensorLayout {
    Nhwc,
    Nchw,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub model_path: PathBuf,
    pub manifest_path: PathBuf,
    pub authentic_label: String,
    pub replica_label: String,
    pub resize: ResizeMode,
    pub normalization: Normalization,
    pub layout: TensorLayout,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("model/model.onnx"),
            manifest_path: PathBuf::from("model/metadata.json"),
            authentic_label: "authentic".to_string(),
            replica_label: "replica".to_string(),
            resize: ResizeMode::Stretch,
            normalization: Normalization::Unit,
            layout: TensorLayout::Nhwc,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    ThreeBand,
    TwoBand,
}

/// Decision thresholds, in percent. The three-band policy is the default;
/// `uncertain_threshold` is ignored by the two-band policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub kind: PolicyKind,
    pub authentic_threshold: f32,
    pub uncertain_threshold: f32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            kind: PolicyKind::ThreeBand,
            authentic_threshold: 85.0,
            uncertain_threshold: 50.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdIssuance {
    /// The certificate service assigns the identifier on `POST /certificate`.
    Server,
    /// The identifier is generated locally before any remote call.
    Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyMethod {
    Get,
    Head,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CertificateConfig {
    pub base_url: String,
    /// Page that QR codes link back to; `?verify=<id>` is appended.
    pub verify_base_url: String,
    pub id_prefix: String,
    pub min_id_len: usize,
    pub issuance: IdIssuance,
    /// Only consulted for client-issued identifiers; server issuance
    /// always persists.
    pub persist_records: bool,
    pub verify_method: VerifyMethod,
    pub fetch_qr: bool,
    pub timeout_secs: u64,
}

impl Default for CertificateConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3000".to_string(),
            verify_base_url: "http://127.0.0.1:8080/verify".to_string(),
            id_prefix: "OF-".to_string(),
            min_id_len: 12,
            issuance: IdIssuance::Client,
            persist_records: true,
            verify_method: VerifyMethod::Get,
            fetch_qr: true,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub prediction_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            prediction_capacity: 256,
        }
    }
}

impl AppConfig {
    /// Load from an explicit path, or from `AUTHCHECK_CONFIG`, or fall back
    /// to defaults. An explicitly named file that does not exist is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

        let config = match explicit {
            Some(path) => {
                let text = std::fs::read_to_string(&path).map_err(|e| {
                    AppError::Config(format!("cannot read {}: {e}", path.display()))
                })?;
                Self::from_toml(&text)?
            }
            None => {
                tracing::debug!("no configuration file given, using defaults");
                Self::default()
            }
        };

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| AppError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        let p = &self.policy;
        for (name, value) in [
            ("authentic_threshold", p.authentic_threshold),
            ("uncertain_threshold", p.uncertain_threshold),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(AppError::Config(format!(
                    "policy.{name} must be within [0, 100], got {value}"
                )));
            }
        }
        if p.kind == PolicyKind::ThreeBand && p.uncertain_threshold > p.authentic_threshold {
            return Err(AppError::Config(format!(
                "policy.uncertain_threshold ({}) exceeds authentic_threshold ({})",
                p.uncertain_threshold, p.authentic_threshold
            )));
        }

        let c = &self.certificate;
        if c.id_prefix.is_empty() || c.id_prefix.trim() != c.id_prefix {
            return Err(AppError::Config(
                "certificate.id_prefix must be non-empty without surrounding whitespace".into(),
            ));
        }
        if c.id_prefix.to_uppercase() != c.id_prefix {
            return Err(AppError::Config(
                "certificate.id_prefix must be upper-case".into(),
            ));
        }
        if !c
            .id_prefix
            .chars()
            .all(|ch| ch.is_ascii_uppercase() || ch.is_ascii_digit() || ch == '-')
        {
            return Err(AppError::Config(format!(
                "certificate.id_prefix {:?} may only contain A-Z, 0-9 and '-'",
                c.id_prefix
            )));
        }
        if c.min_id_len <= c.id_prefix.len() {
            return Err(AppError::Config(format!(
                "certificate.min_id_len ({}) must exceed the prefix length ({})",
                c.min_id_len,
                c.id_prefix.len()
            )));
        }
        if c.timeout_secs == 0 {
            return Err(AppError::Config("certificate.timeout_secs must be > 0".into()));
        }
        if self.session.prediction_capacity == 0 {
            return Err(AppError::Config(
                "session.prediction_capacity must be > 0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_document_yields_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config.policy.kind, PolicyKind::ThreeBand);
        assert_eq!(config.policy.authentic_threshold, 85.0);
        assert_eq!(config.certificate.id_prefix, "OF-");
        assert_eq!(config.certificate.issuance, IdIssuance::Client);
        assert_eq!(config.model.layout, TensorLayout::Nhwc);
        config.validate().unwrap();
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [policy]
            kind = "two_band"

            [model]
            resize = "letterbox"
            normalization = "imagenet"
            layout = "nchw"

            [certificate]
            verify_method = "head"
            issuance = "server"
            "#,
        )
        .unwrap();
        assert_eq!(config.policy.kind, PolicyKind::TwoBand);
        assert_eq!(config.policy.uncertain_threshold, 50.0);
        assert_eq!(config.model.resize, ResizeMode::Letterbox);
        assert_eq!(config.model.normalization, Normalization::Imagenet);
        assert_eq!(config.model.layout, TensorLayout::Nchw);
        assert_eq!(config.certificate.verify_method, VerifyMethod::Head);
        assert_eq!(config.certificate.issuance, IdIssuance::Server);
        assert_eq!(config.certificate.min_id_len, 12);
    }

    #[test]
    fn inverted_thresholds_are_rejected() {
        let config = AppConfig::from_toml(
            "[policy]\nauthentic_threshold = 40.0\nuncertain_threshold = 60.0\n",
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let config = AppConfig::from_toml("[policy]\nauthentic_threshold = 120.0\n").unwrap();
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn min_length_must_cover_prefix() {
        let config = AppConfig::from_toml("[certificate]\nmin_id_len = 3\n").unwrap();
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn prefix_outside_identifier_alphabet_is_rejected() {
        for prefix in ["OF_", "OF.", "ÖF-"] {
            let config =
                AppConfig::from_toml(&format!("[certificate]\nid_prefix = \"{prefix}\"\n"))
                    .unwrap();
            assert!(
                matches!(config.validate(), Err(AppError::Config(_))),
                "{prefix} accepted"
            );
        }
        let config = AppConfig::from_toml("[certificate]\nid_prefix = \"CERT-2\"\n").unwrap();
        config.validate().unwrap();
    }

    #[test]
    fn unknown_enum_value_is_a_config_error() {
        let err = AppConfig::from_toml("[policy]\nkind = \"five_band\"\n").unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn load_reads_explicit_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nbind = \"0.0.0.0:9000\"").unwrap();
        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:9000");
    }

    #[test]
    fn load_reports_missing_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = AppConfig::load(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }
}
