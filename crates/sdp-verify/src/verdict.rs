//! Verdict artifacts: the durable outcome record of one workstream run.
//!
//! The verdict schema is normative: [`verdict_schema`] publishes it, and
//! [`write_verdict`] validates every document against it before anything
//! touches disk.

use sdp_config::SdpPaths;
use sdp_error::{ErrorCode, Result, SdpError};
use schemars::{JsonSchema, schema_for};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::OnceLock;

/// PASS/FAIL outcome of a workstream execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum VerdictKind {
    /// All quality gates held.
    #[serde(rename = "PASS")]
    Pass,
    /// At least one gate failed.
    #[serde(rename = "FAIL")]
    Fail,
}

/// Quality-gate measurements backing a verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct QualityGates {
    /// Test suite outcome.
    pub tests_pass: bool,
    /// Linter outcome.
    pub lint_clean: bool,
    /// Measured aggregate coverage.
    pub coverage_pct: f64,
    /// Threshold the coverage was held against.
    pub coverage_threshold: f64,
    /// Largest file touched, in lines.
    pub max_file_loc: u64,
    /// Build outcome.
    pub build_ok: bool,
    /// Static-vet outcome.
    pub vet_ok: bool,
}

/// Evidence that one acceptance criterion was met.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AcEvidence {
    /// The acceptance criterion, verbatim.
    pub ac: String,
    /// Whether it was met.
    pub met: bool,
    /// Supporting evidence.
    pub evidence: String,
}

/// Durable outcome record of one workstream execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Verdict {
    /// Workstream the verdict describes.
    pub ws_id: String,
    /// Feature the workstream belongs to.
    pub feature_id: String,
    /// Overall outcome.
    pub verdict: VerdictKind,
    /// Commit the verdict was rendered against.
    pub commit: String,
    /// Gate measurements.
    pub quality_gates: QualityGates,
    /// Per-acceptance-criterion evidence.
    pub ac_evidence: Vec<AcEvidence>,
    /// Prose summary of pre-existing code discovered before implementation.
    /// Mandatory: the anti-duplication contract.
    pub existing_work_summary: String,
}

/// The normative verdict JSON schema.
pub fn verdict_schema() -> &'static serde_json::Value {
    static SCHEMA: OnceLock<serde_json::Value> = OnceLock::new();
    SCHEMA.get_or_init(|| {
        serde_json::to_value(schema_for!(Verdict)).expect("verdict schema serialises")
    })
}

fn schema_validator() -> &'static jsonschema::Validator {
    static VALIDATOR: OnceLock<jsonschema::Validator> = OnceLock::new();
    VALIDATOR.get_or_init(|| {
        jsonschema::validator_for(verdict_schema()).expect("verdict schema compiles")
    })
}

/// Validate a verdict against the published schema and persist it
/// atomically to `.sdp/ws-verdicts/<ws_id>.json`.
///
/// # Errors
///
/// `SCHEMA_VIOLATION` when the document does not conform (including an
/// empty `existing_work_summary`); nothing is written in that case.
pub fn write_verdict(paths: &SdpPaths, verdict: &Verdict) -> Result<PathBuf> {
    if verdict.existing_work_summary.trim().is_empty() {
        return Err(SdpError::new(
            ErrorCode::SchemaViolation,
            "existing_work_summary is mandatory and must not be empty",
        )
        .with_context("ws_id", verdict.ws_id.clone()));
    }
    let value = serde_json::to_value(verdict)
        .map_err(|e| SdpError::internal(format!("serialise verdict: {e}")))?;
    if let Err(error) = schema_validator().validate(&value) {
        return Err(SdpError::new(
            ErrorCode::SchemaViolation,
            format!("verdict does not conform to its schema: {error}"),
        )
        .with_context("ws_id", verdict.ws_id.clone()));
    }

    let dir = paths.verdicts_dir();
    std::fs::create_dir_all(&dir).map_err(SdpError::from)?;
    let file = dir.join(format!("{}.json", verdict.ws_id));
    let tmp = file.with_extension("json.tmp");
    let json = serde_json::to_string_pretty(&value)
        .map_err(|e| SdpError::internal(format!("serialise verdict: {e}")))?;
    std::fs::write(&tmp, format!("{json}\n")).map_err(SdpError::from)?;
    std::fs::rename(&tmp, &file).map_err(SdpError::from)?;
    Ok(file)
}

/// Load a previously written verdict.
pub fn read_verdict(paths: &SdpPaths, ws_id: &str) -> Result<Verdict> {
    let file = paths.verdicts_dir().join(format!("{ws_id}.json"));
    let raw = std::fs::read_to_string(&file)
        .map_err(|e| SdpError::from(e).with_context("file", file.display().to_string()))?;
    serde_json::from_str(&raw).map_err(|e| {
        SdpError::new(ErrorCode::SchemaViolation, format!("unreadable verdict: {e}"))
            .with_context("file", file.display().to_string())
    })
}
