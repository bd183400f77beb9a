use serde::Serialize;

use crate::error::{AppError, Result};

/// Two-class outputs whose sum strays further than this from 1 are
/// treated as logits and passed through a softmax.
pub const PROBABILITY_SUM_TOLERANCE: f32 = 0.1;

/// Class probabilities read back from one inference run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Prediction {
    pub authentic: f32,
    pub replica: f32,
}

impl Prediction {
    /// Interpret a raw output vector. `authentic_index` comes from the
    /// label manifest and is only consulted for two-class outputs.
    pub fn from_output(output: &[f32], authentic_index: usize) -> Result<Self> {
        if output.iter().any(|v| !v.is_finite()) {
            return Err(AppError::MalformedOutput(format!(
                "non-finite value in {output:?}"
            )));
        }

        match output {
            [score] => Ok(Self {
                authentic: *score,
                replica: 1.0 - *score,
            }),
            [_, _] => {
                if authentic_index > 1 {
                    return Err(AppError::MalformedOutput(format!(
                        "authentic index {authentic_index} out of range for two classes"
                    )));
                }
                let probs = if ((output[0] + output[1]) - 1.0).abs() > PROBABILITY_SUM_TOLERANCE {
                    tracing::debug!(?output, "output does not sum to 1, applying softmax");
                    softmax(output)
                } else {
                    output.to_vec()
                };
                Ok(Self {
                    authentic: probs[authentic_index],
                    replica: probs[1 - authentic_index],
                })
            }
            _ => Err(AppError::MalformedOutput(format!(
                "expected 1 or 2 values, got {}",
                output.len()
            ))),
        }
    }

    /// P(authentic) as a percentage in [0, 100].
    pub fn confidence(&self) -> f32 {
        to_percent(self.authentic)
    }

    /// P(replica) as a percentage in [0, 100].
    pub fn complement(&self) -> f32 {
        to_percent(self.replica)
    }
}

fn to_percent(p: f32) -> f32 {
    (p * 100.0).clamp(0.0, 100.0)
}

pub fn softmax(values: &[f32]) -> Vec<f32> {
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = values.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}
