use crate::engine::{EngineError, Mode, Scope};
use serde::Deserialize;
use std::fmt;

/// On-disk shape of a patch descriptor.
///
/// ```yaml
/// pattern: /^\[profile\.release\]$/i
/// text: "\nlto = true"
/// mode: append
/// global: false
/// ```
#[derive(Debug, Deserialize, Default, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PatchFile {
    /// Plain pattern or `/pattern/flags` literal
    #[serde(alias = "regexp")]
    pub pattern: String,
    #[serde(default)]
    pub text: Option<String>,
    /// Relative paths resolve against the descriptor's directory
    #[serde(default)]
    pub text_file: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub global: bool,
}

impl PatchFile {
    pub fn mode(&self) -> Result<Mode, EngineError> {
        match &self.mode {
            Some(mode) => mode.parse(),
            None => Ok(Mode::default()),
        }
    }

    pub fn scope(&self) -> Scope {
        Scope::from_global(self.global)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        if self.pattern.is_empty() {
            issues.push(ValidationIssue::MissingField { field: "pattern" });
        }

        match (&self.text, &self.text_file) {
            (Some(_), Some(_)) => issues.push(ValidationIssue::ConflictingTemplateSource),
            (None, None) => issues.push(ValidationIssue::MissingField { field: "text" }),
            (None, Some(path)) if path.trim().is_empty() => {
                issues.push(ValidationIssue::MissingField { field: "text_file" })
            }
            _ => {}
        }

        if let Err(EngineError::InvalidMode { mode, suggestion }) = self.mode() {
            issues.push(ValidationIssue::InvalidMode { mode, suggestion });
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    MissingField {
        field: &'static str,
    },
    ConflictingTemplateSource,
    InvalidMode {
        mode: String,
        suggestion: Option<&'static str>,
    },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::MissingField { field } => {
                write!(f, "patch missing required field '{field}'")
            }
            ValidationIssue::ConflictingTemplateSource => {
                write!(f, "text and text_file are mutually exclusive")
            }
            ValidationIssue::InvalidMode { mode, suggestion } => match suggestion {
                Some(s) => write!(
                    f,
                    "invalid mode '{mode}': expected append, prepend or replace (did you mean '{s}'?)"
                ),
                None => write!(f, "invalid mode '{mode}': expected append, prepend or replace"),
            },
        }
    }
}
