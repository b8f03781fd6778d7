//! Strict identifier validation.

use sdp_error::{ErrorCode, Result, SdpError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// WorkstreamId
// ---------------------------------------------------------------------------

/// A validated workstream identifier of shape `PP-FFF-SS`.
///
/// `PP` is the two-digit project code, `FFF` the three-digit feature
/// number, `SS` the two-digit sequence. Separators are single hyphens; any
/// other shape is a protocol error.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorkstreamId(String);

impl WorkstreamId {
    /// Validate and wrap a raw identifier.
    pub fn parse(raw: &str) -> Result<Self> {
        let bytes = raw.as_bytes();
        let well_formed = bytes.len() == 9
            && bytes[..2].iter().all(u8::is_ascii_digit)
            && bytes[2] == b'-'
            && bytes[3..6].iter().all(u8::is_ascii_digit)
            && bytes[6] == b'-'
            && bytes[7..].iter().all(u8::is_ascii_digit);
        if !well_formed {
            return Err(SdpError::new(
                ErrorCode::WsIdInvalid,
                format!("workstream id '{raw}' is not of shape PP-FFF-SS"),
            )
            .with_context("ws_id", raw));
        }
        Ok(Self(raw.to_string()))
    }

    /// The full id string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Two-digit project code.
    pub fn project_code(&self) -> &str {
        &self.0[..2]
    }

    /// Three-digit feature number.
    pub fn feature_number(&self) -> &str {
        &self.0[3..6]
    }

    /// Two-digit sequence.
    pub fn sequence(&self) -> &str {
        &self.0[7..]
    }
}

impl fmt::Display for WorkstreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for WorkstreamId {
    type Err = SdpError;
    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for WorkstreamId {
    type Error = SdpError;
    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<WorkstreamId> for String {
    fn from(id: WorkstreamId) -> Self {
        id.0
    }
}

// ---------------------------------------------------------------------------
// FeatureId
// ---------------------------------------------------------------------------

/// A validated feature identifier: `FNNN` (e.g. `F070`) or `F-SLUG`
/// (e.g. `F-checkout-flow`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FeatureId(String);

impl FeatureId {
    /// Validate and wrap a raw identifier.
    pub fn parse(raw: &str) -> Result<Self> {
        let ok = match raw.strip_prefix('F') {
            Some(rest) if rest.len() == 3 && rest.bytes().all(|b| b.is_ascii_digit()) => true,
            Some(rest) => match rest.strip_prefix('-') {
                Some(slug) => {
                    !slug.is_empty()
                        && !slug.starts_with('-')
                        && !slug.ends_with('-')
                        && !slug.contains("--")
                        && slug
                            .bytes()
                            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
                }
                None => false,
            },
            None => false,
        };
        if !ok {
            return Err(SdpError::new(
                ErrorCode::FeatureIdInvalid,
                format!("feature id '{raw}' is not FNNN or F-SLUG"),
            )
            .with_context("feature_id", raw));
        }
        Ok(Self(raw.to_string()))
    }

    /// The full id string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The three-digit feature number, when of the `FNNN` form.
    pub fn number(&self) -> Option<&str> {
        let rest = &self.0[1..];
        (rest.len() == 3 && rest.bytes().all(|b| b.is_ascii_digit())).then_some(rest)
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for FeatureId {
    type Err = SdpError;
    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for FeatureId {
    type Error = SdpError;
    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<FeatureId> for String {
    fn from(id: FeatureId) -> Self {
        id.0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
