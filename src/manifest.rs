//! Label manifest shipped next to the model (`metadata.json`). The class
//! order of the model output is taken from here, never assumed.

use std::path::Path;

use serde::Deserialize;

use crate::error::{AppError, Result};

pub const DEFAULT_INPUT_SIZE: u32 = 224;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawManifest {
    labels: Vec<String>,
    image_size: Option<u32>,
}

/// A validated manifest: the class labels, which output index means
/// "authentic", and the square input edge the model expects.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelManifest {
    pub labels: Vec<String>,
    pub authentic_index: usize,
    pub input_size: u32,
}

impl LabelManifest {
    pub fn load(path: &Path, authentic_label: &str, replica_label: &str) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| AppError::Manifest(format!("cannot read {}: {e}", path.display())))?;
        Self::parse(&text, authentic_label, replica_label)
    }

    pub fn parse(text: &str, authentic_label: &str, replica_label: &str) -> Result<Self> {
        let raw: RawManifest =
            serde_json::from_str(text).map_err(|e| AppError::Manifest(e.to_string()))?;
        Self::from_labels(raw.labels, raw.image_size, authentic_label, replica_label)
    }

    fn from_labels(
        labels: Vec<String>,
        image_size: Option<u32>,
        authentic_label: &str,
        replica_label: &str,
    ) -> Result<Self> {
        if labels.is_empty() || labels.len() > 2 {
            return Err(AppError::Manifest(format!(
                "expected one or two labels, found {}",
                labels.len()
            )));
        }

        let matches = |label: &str, wanted: &str| label.trim().eq_ignore_ascii_case(wanted);

        let authentic: Vec<usize> = labels
            .iter()
            .enumerate()
            .filter(|(_, l)| matches(l, authentic_label))
            .map(|(i, _)| i)
            .collect();
        let authentic_index = match authentic.as_slice() {
            [index] => *index,
            [] => {
                return Err(AppError::Manifest(format!(
                    "no label named {authentic_label:?} in {labels:?}"
                )))
            }
            _ => {
                return Err(AppError::Manifest(format!(
                    "label {authentic_label:?} appears more than once in {labels:?}"
                )))
            }
        };

        if labels.len() == 2 {
            let other = &labels[1 - authentic_index];
            if !matches(other, replica_label) {
                return Err(AppError::Manifest(format!(
                    "second class must be {replica_label:?}, found {other:?}"
                )));
            }
        }

        let input_size = image_size.unwrap_or(DEFAULT_INPUT_SIZE);
        if input_size == 0 {
            return Err(AppError::Manifest("imageSize must be positive".into()));
        }

        Ok(Self {
            labels,
            authentic_index,
            input_size,
        })
    }

    pub fn class_count(&self) -> usize {
        self.labels.len()
    }
}
