use serde::{Deserialize, Serialize};

use crate::config::{PolicyConfig, PolicyKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Band {
    Authentic,
    Uncertain,
    LikelyReplica,
}

impl Band {
    /// Only the authentic band unlocks minting.
    pub fn mint_enabled(self) -> bool {
        self == Band::Authentic
    }

    pub fn describe(self) -> &'static str {
        match self {
            Band::Authentic => "authentic",
            Band::Uncertain => "uncertain",
            Band::LikelyReplica => "likely replica",
        }
    }
}

/// Maps a confidence percentage onto a display band.
///
/// Defaults to three bands (authentic >= 85, uncertain >= 50, replica
/// below). The two-band variant drops the uncertain band entirely.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DecisionPolicy {
    ThreeBand { authentic: f32, uncertain: f32 },
    TwoBand { authentic: f32 },
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        DecisionPolicy::ThreeBand {
            authentic: 85.0,
            uncertain: 50.0,
        }
    }
}

impl From<&PolicyConfig> for DecisionPolicy {
    fn from(cfg: &PolicyConfig) -> Self {
        match cfg.kind {
            PolicyKind::ThreeBand => DecisionPolicy::ThreeBand {
                authentic: cfg.authentic_threshold,
                uncertain: cfg.uncertain_threshold,
            },
            PolicyKind::TwoBand => DecisionPolicy::TwoBand {
                authentic: cfg.authentic_threshold,
            },
        }
    }
}

impl DecisionPolicy {
    pub fn classify(&self, confidence: f32) -> Band {
        match *self {
            DecisionPolicy::ThreeBand {
                authentic,
                uncertain,
            } => {
                if confidence >= authentic {
                    Band::Authentic
                } else if confidence >= uncertain {
                    Band::Uncertain
                } else {
                    Band::LikelyReplica
                }
            }
            DecisionPolicy::TwoBand { authentic } => {
                if confidence >= authentic {
                    Band::Authentic
                } else {
                    Band::LikelyReplica
                }
            }
        }
    }

    pub fn mint_threshold(&self) -> f32 {
        match *self {
            DecisionPolicy::ThreeBand { authentic, .. } | DecisionPolicy::TwoBand { authentic } => {
                authentic
            }
        }
    }
}
