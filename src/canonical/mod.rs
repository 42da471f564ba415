//! Input Normalization — Canonicalizer (§4.2, §4.8).
//!
//! Two independent paths share one error taxonomy: the structured-value path
//! (`structured`) for parametric params/prompts, and the CAD-script path
//! (`script`) for FreeCAD-like scripts, backed by an API registry (`registry`)
//! and PII masking (`pii`).

pub mod pii;
pub mod registry;
pub mod script;
pub mod structured;

use serde::Serialize;
use thiserror::Error;

use crate::error::ErrorKind;

/// Machine codes for every normalization/validation failure mode (§4.2, plus
/// the three codes supplemented from the original script-normalization service).
#[derive(Debug, Clone, Error, Serialize)]
#[serde(tag = "code", content = "details")]
pub enum CanonError {
    #[error("invalid syntax at {line}:{column}: {message}")]
    InvalidSyntax {
        line: usize,
        column: usize,
        message: String,
    },
    #[error("security violation: forbidden name `{name}`")]
    SecurityViolation { name: String },
    #[error("unknown API `{name}`")]
    ApiNotFound { name: String },
    #[error("deprecated API `{name}`, use `{suggestion}` instead")]
    ApiDeprecated { name: String, suggestion: String },
    #[error("dimension error: {message}")]
    DimensionError { message: String },
    #[error("angle error: {message}")]
    AngleError { message: String },
    #[error("unsupported sketch constraint `{kind}`")]
    ConstraintUnsupported { kind: String },
    #[error("sketch `{sketch}` is underconstrained")]
    SketchUnderconstrained { sketch: String },
    #[error("script must produce exactly one solid, found {count}")]
    SingleSolidViolation { count: usize },
    #[error("pattern error: {message}")]
    PatternError { message: String },
    #[error("missing required field `{field}`")]
    MissingRequired { field: String },
    #[error("ambiguous input: {message}")]
    AmbiguousInput { message: String },
    #[error("AI hint required: {message}")]
    AiHintRequired { message: String },
    /// [SUPPLEMENT] a feature references a sketch/body that does not exist or precedes it.
    #[error("feature `{feature}` depends on undefined `{dependency}`")]
    FeatureDependencyError { feature: String, dependency: String },
    /// [SUPPLEMENT] defensive step-budget cap on the AST walk/regex pass, not a CAD timeout.
    #[error("normalization exceeded its step budget")]
    TimeoutError,
    /// [SUPPLEMENT] a boolean operation named fewer than two operand bodies.
    #[error("boolean operation `{op}` requires at least two bodies, found {count}")]
    BooleanBodyError { op: String, count: usize },
}

impl CanonError {
    pub fn code(&self) -> &'static str {
        match self {
            CanonError::InvalidSyntax { .. } => "invalid_syntax",
            CanonError::SecurityViolation { .. } => "security_violation",
            CanonError::ApiNotFound { .. } => "api_not_found",
            CanonError::ApiDeprecated { .. } => "api_deprecated",
            CanonError::DimensionError { .. } => "dimension_error",
            CanonError::AngleError { .. } => "angle_error",
            CanonError::ConstraintUnsupported { .. } => "constraint_unsupported",
            CanonError::SketchUnderconstrained { .. } => "sketch_underconstrained",
            CanonError::SingleSolidViolation { .. } => "single_solid_violation",
            CanonError::PatternError { .. } => "pattern_error",
            CanonError::MissingRequired { .. } => "missing_required",
            CanonError::AmbiguousInput { .. } => "ambiguous_input",
            CanonError::AiHintRequired { .. } => "ai_hint_required",
            CanonError::FeatureDependencyError { .. } => "feature_dependency_error",
            CanonError::TimeoutError => "timeout_error",
            CanonError::BooleanBodyError { .. } => "boolean_body_error",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CanonError::TimeoutError => ErrorKind::Resource,
            _ => ErrorKind::UserInput,
        }
    }
}

pub type CanonResult<T> = Result<T, CanonError>;

/// Result of `validate()`: `normalize(input)` plus a success flag and
/// errors/warnings, per §4.8.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationOutcome<T> {
    pub normalized: Option<T>,
    pub success: bool,
    pub errors: Vec<CanonError>,
    pub warnings: Vec<String>,
}

impl<T> ValidationOutcome<T> {
    pub fn ok(value: T) -> Self {
        Self {
            normalized: Some(value),
            success: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn failed(errors: Vec<CanonError>) -> Self {
        Self {
            normalized: None,
            success: false,
            errors,
            warnings: Vec::new(),
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }
}
