use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, Result};

pub const RANDOM_SUFFIX_LEN: usize = 9;

const BASE36: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Prefix and minimum length every certificate identifier must satisfy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdRules {
    pub prefix: String,
    pub min_len: usize,
}

impl IdRules {
    pub fn new(prefix: impl Into<String>, min_len: usize) -> Self {
        Self {
            prefix: prefix.into(),
            min_len,
        }
    }

    /// Prefix followed by nine upper-case base-36 characters drawn from a
    /// v4 UUID.
    pub fn generate(&self) -> CertificateId {
        let mut bits = Uuid::new_v4().as_u128();
        let mut id = String::with_capacity(self.prefix.len() + RANDOM_SUFFIX_LEN);
        id.push_str(&self.prefix);
        for _ in 0..RANDOM_SUFFIX_LEN {
            id.push(BASE36[(bits % 36) as usize] as char);
            bits /= 36;
        }
        CertificateId(id)
    }

    /// Trim and upper-case user input, then check prefix and length.
    pub fn parse(&self, input: &str) -> Result<CertificateId> {
        let normalized = input.trim().to_uppercase();
        if normalized.is_empty() {
            return Err(AppError::InvalidIdentifier("identifier is empty".into()));
        }
        if !normalized.starts_with(&self.prefix) {
            return Err(AppError::InvalidIdentifier(format!(
                "{normalized:?} does not start with {:?}",
                self.prefix
            )));
        }
        if normalized.len() < self.min_len {
            return Err(AppError::InvalidIdentifier(format!(
                "{normalized:?} is shorter than {} characters",
                self.min_len
            )));
        }
        if !normalized.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(AppError::InvalidIdentifier(format!(
                "{normalized:?} contains characters outside [A-Z0-9-]"
            )));
        }
        Ok(CertificateId(normalized))
    }
}

/// A normalized certificate identifier. Only constructed through
/// [`IdRules`], so holding one means the format check passed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CertificateId(String);

impl CertificateId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CertificateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
