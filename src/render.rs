//! Template rendering for patch text.
//!
//! Patch text is rendered once per apply/revert call, before any matching
//! happens. Variables come from an explicit [`RenderContext`]; nothing is
//! looked up implicitly.

use std::collections::BTreeMap;
use thiserror::Error;

/// Names that may not be bound in a [`RenderContext`].
pub const RESERVED_NAMES: &[&str] = &["self", "patch", "match"];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("undefined template variable '{name}'")]
    Undefined { name: String },

    #[error("invalid template variable name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("unterminated template tag at byte {offset}")]
    Unterminated { offset: usize },
}

/// Turns template text plus a context into final patch text.
pub trait Renderer {
    fn render(&self, template: &str, context: &RenderContext) -> Result<String, RenderError>;
}

/// Name to value bindings available while rendering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderContext {
    vars: BTreeMap<String, String>,
}

impl RenderContext {
    pub const fn new() -> Self {
        Self {
            vars: BTreeMap::new(),
        }
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Check every bound name; the first bad one is reported.
    pub fn validate(&self) -> Result<(), RenderError> {
        self.vars.keys().try_for_each(|name| validate_name(name))
    }
}

impl<K, V> FromIterator<(K, V)> for RenderContext
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut context = RenderContext::new();
        for (name, value) in iter {
            context.insert(name, value);
        }
        context
    }
}

fn validate_name(name: &str) -> Result<(), RenderError> {
    let mut chars = name.chars();
    let starts_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !starts_ok || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(RenderError::InvalidName {
            name: name.to_string(),
            reason: "expected an identifier",
        });
    }
    if RESERVED_NAMES.contains(&name) {
        return Err(RenderError::InvalidName {
            name: name.to_string(),
            reason: "name is reserved",
        });
    }
    Ok(())
}

/// Whitespace handling around template tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrimMode {
    /// Leave text around tags untouched.
    #[default]
    Keep,
    /// Drop a newline that directly follows a tag.
    TrimTagNewline,
}

/// Renders text unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainRenderer;

impl Renderer for PlainRenderer {
    fn render(&self, template: &str, _context: &RenderContext) -> Result<String, RenderError> {
        Ok(template.to_string())
    }
}

/// Substitutes `{{ name }}` tags from the context.
///
/// `{{{{` produces a literal `{{`. Backreference tokens such as `\1` pass
/// through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateRenderer {
    trim: TrimMode,
}

impl TemplateRenderer {
    pub const fn new(trim: TrimMode) -> Self {
        Self { trim }
    }

    pub fn trim_mode(&self) -> TrimMode {
        self.trim
    }
}

impl Renderer for TemplateRenderer {
    fn render(&self, template: &str, context: &RenderContext) -> Result<String, RenderError> {
        context.validate()?;

        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(open) = rest.find("{{") {
            out.push_str(&rest[..open]);
            let after = &rest[open + 2..];

            if let Some(stripped) = after.strip_prefix("{{") {
                out.push_str("{{");
                rest = stripped;
                continue;
            }

            let close = after.find("}}").ok_or(RenderError::Unterminated {
                offset: template.len() - rest.len() + open,
            })?;
            let name = after[..close].trim();
            validate_name(name)?;
            let value = context.get(name).ok_or_else(|| RenderError::Undefined {
                name: name.to_string(),
            })?;
            out.push_str(value);

            rest = &after[close + 2..];
            if self.trim == TrimMode::TrimTagNewline {
                rest = rest
                    .strip_prefix("\r\n")
                    .or_else(|| rest.strip_prefix('\n'))
                    .unwrap_or(rest);
            }
        }

        out.push_str(rest);
        Ok(out)
    }
}
