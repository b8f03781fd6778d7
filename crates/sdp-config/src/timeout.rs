//! Timeout categories and layered resolution.
//!
//! Precedence: explicit per-call parameter → `.sdp/config.yaml` →
//! `SDP_TIMEOUT_<CATEGORY>` environment variable → hard-coded default.
//! Durations use the Go syntax (`300ms`, `30s`, `5m`, `1h30m`).

use crate::SdpConfig;
use sdp_error::{ErrorCode, Result, SdpError};
use std::time::Duration;
use tracing::warn;

/// Timeout category a caller picks for a subprocess.
///
/// The secure subprocess layer never default-wraps; the caller always
/// supplies the category (or an explicit duration).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeoutCategory {
    /// Quick probes, e.g. `--version` checks. 5 s.
    Short,
    /// Standard operations. 30 s.
    Default,
    /// Full test suites. 5 min.
    Long,
    /// Descriptor verification commands. 60 s.
    Verification,
}

impl TimeoutCategory {
    /// Hard-coded default for this category.
    pub fn default_duration(self) -> Duration {
        match self {
            Self::Short => Duration::from_secs(5),
            Self::Default => Duration::from_secs(30),
            Self::Long => Duration::from_secs(300),
            Self::Verification => Duration::from_secs(60),
        }
    }

    /// Key used in `.sdp/config.yaml`'s `timeouts` map.
    pub fn config_key(self) -> &'static str {
        match self {
            Self::Short => "short",
            Self::Default => "default",
            Self::Long => "long",
            Self::Verification => "verification",
        }
    }

    /// Environment variable consulted for this category.
    pub fn env_var(self) -> &'static str {
        match self {
            Self::Short => "SDP_TIMEOUT_SHORT",
            Self::Default => "SDP_TIMEOUT_DEFAULT",
            Self::Long => "SDP_TIMEOUT_LONG",
            Self::Verification => "SDP_TIMEOUT_VERIFICATION",
        }
    }
}

/// Resolve the effective timeout for a category.
///
/// `explicit` (the per-call parameter) wins outright. Unparseable values in
/// the config file or environment are skipped with a warning rather than
/// failing the operation.
pub fn resolve_timeout(
    explicit: Option<Duration>,
    config: &SdpConfig,
    category: TimeoutCategory,
) -> Duration {
    if let Some(d) = explicit {
        return d;
    }
    if let Some(raw) = config.timeouts.get(category.config_key()) {
        match parse_duration(raw) {
            Ok(d) => return d,
            Err(e) => warn!(key = category.config_key(), %e, "ignoring bad config timeout"),
        }
    }
    if let Ok(raw) = std::env::var(category.env_var()) {
        match parse_duration(&raw) {
            Ok(d) => return d,
            Err(e) => warn!(var = category.env_var(), %e, "ignoring bad env timeout"),
        }
    }
    category.default_duration()
}

/// Parse a Go-style duration: one or more `<number><unit>` terms where the
/// unit is `ms`, `s`, `m`, or `h`. Numbers may carry a decimal fraction.
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let s = raw.trim();
    if s.is_empty() {
        return Err(bad_duration(raw, "empty"));
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let num_end = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .ok_or_else(|| bad_duration(raw, "missing unit"))?;
        if num_end == 0 {
            return Err(bad_duration(raw, "missing number"));
        }
        let value: f64 = rest[..num_end]
            .parse()
            .map_err(|_| bad_duration(raw, "bad number"))?;

        let unit_end = num_end
            + rest[num_end..]
                .find(|c: char| c.is_ascii_digit())
                .unwrap_or(rest.len() - num_end);
        let unit = &rest[num_end..unit_end];
        let millis = match unit {
            "ms" => value,
            "s" => value * 1_000.0,
            "m" => value * 60_000.0,
            "h" => value * 3_600_000.0,
            _ => return Err(bad_duration(raw, "unknown unit")),
        };
        if !millis.is_finite() || millis < 0.0 {
            return Err(bad_duration(raw, "out of range"));
        }
        total += Duration::from_millis(millis as u64);
        rest = &rest[unit_end..];
    }
    Ok(total)
}

fn bad_duration(raw: &str, why: &str) -> SdpError {
    SdpError::new(
        ErrorCode::FrontmatterInvalid,
        format!("invalid duration '{raw}': {why}"),
    )
}
