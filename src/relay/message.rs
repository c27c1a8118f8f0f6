//! What travels between a source and its mirrors.
//!
//! Each [Frame] is one [ron] value on its own line. A mirror opens with
//! [Frame::Join], the host answers [Frame::Accepted] or [Frame::Refused], and
//! from then on only [Frame::Update]s flow, host to mirror.

use super::RelayError;
use crate::telemetry::Degree;
use serde::{Deserialize, Serialize};

/// A pose update. Every field is optional; a receiver applies the fields
/// that are present and leaves everything else as it was.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelayMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub angle: Option<Degree>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<f64>,
    /// Per-channel targets of a multi-channel rig.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bends: Option<Vec<Degree>>,
}

impl RelayMessage {
    pub fn offset_only(offset: f64) -> Self {
        Self {
            offset: Some(offset),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Refusal {
    /// The code the mirror asked for does not belong to this host.
    UnknownCode,
    /// Another mirror is already connected under the same code.
    IdentityTaken,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    Join { from: String, to: String },
    Accepted,
    Refused(Refusal),
    Update(RelayMessage),
}

impl Frame {
    /// One line of RON, newline included.
    pub fn encode(&self) -> Result<String, RelayError> {
        let mut line = ron::ser::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    pub fn decode(line: &str) -> Result<Self, RelayError> {
        Ok(ron::de::from_str(line.trim_end())?)
    }
}
