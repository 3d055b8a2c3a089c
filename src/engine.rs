//! Pattern-anchored patch application and reversal.
//!
//! [`apply_patch`] inserts rendered template text next to (or in place of)
//! each match of a pattern. [`revert_patch`] finds regions produced by an
//! append or prepend patch and strips the inserted text again.
//!
//! Under [`Scope::All`] the scan resumes immediately after the region just
//! written, so text inserted by a patch is never matched by the same patch.

use crate::expand::{check_references, expand_backrefs, segments, CaptureSource, ExpandError, Segment};
use fancy_regex::{Captures, Expander, Regex};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

/// How template text relates to a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Mode {
    /// Insert after the match.
    #[default]
    Append,
    /// Insert before the match.
    Prepend,
    /// Substitute the match. Cannot be reverted.
    Replace,
}

impl Mode {
    pub const ALL: [Mode; 3] = [Mode::Append, Mode::Prepend, Mode::Replace];

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Append => "append",
            Mode::Prepend => "prepend",
            Mode::Replace => "replace",
        }
    }

    pub fn is_revertible(self) -> bool {
        !matches!(self, Mode::Replace)
    }

    /// Closest mode name to an unrecognized input, for error hints.
    fn suggest(input: &str) -> Option<&'static str> {
        let input = input.to_ascii_lowercase();
        Mode::ALL
            .iter()
            .map(|mode| (mode.as_str(), strsim::levenshtein(&input, mode.as_str())))
            .filter(|(_, distance)| *distance <= 2)
            .min_by_key(|(_, distance)| *distance)
            .map(|(name, _)| name)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_start_matches(':') {
            "append" => Ok(Mode::Append),
            "prepend" => Ok(Mode::Prepend),
            "replace" => Ok(Mode::Replace),
            other => Err(EngineError::InvalidMode {
                mode: other.to_string(),
                suggestion: Mode::suggest(other),
            }),
        }
    }
}

/// Whether a patch touches the first match only or every match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Scope {
    #[default]
    First,
    All,
}

impl Scope {
    pub fn from_global(global: bool) -> Self {
        if global {
            Scope::All
        } else {
            Scope::First
        }
    }

    pub fn is_global(self) -> bool {
        matches!(self, Scope::All)
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(
        "invalid mode '{mode}': expected append, prepend or replace{}",
        .suggestion.map(|s| format!(" (did you mean '{s}'?)")).unwrap_or_default()
    )]
    InvalidMode {
        mode: String,
        suggestion: Option<&'static str>,
    },

    #[error("replace patches cannot be reverted: the replaced text is not recoverable")]
    NotRevertible,

    #[error(transparent)]
    UnresolvedReference(#[from] ExpandError),

    #[error("invalid replacement template {template:?}: {source}")]
    ReplacementTemplate {
        template: String,
        #[source]
        source: fancy_regex::Error,
    },

    #[error("regex error: {0}")]
    Regex(#[from] fancy_regex::Error),
}

/// Apply a patch to `document` and return the patched text.
///
/// `offset` is a character offset at which the search starts. No match at
/// all leaves the document unchanged.
///
/// # Errors
///
/// Fails before any text is touched when the template references a group
/// the pattern does not define.
pub fn apply_patch(
    document: &str,
    pattern: &Regex,
    template: &str,
    scope: Scope,
    mode: Mode,
    offset: usize,
) -> Result<String, EngineError> {
    let expander = Expander::python();
    let replacement = match mode {
        Mode::Append | Mode::Prepend => {
            check_references(template, pattern.captures_len().saturating_sub(1))?;
            String::new()
        }
        Mode::Replace => {
            let replacement = replacement_template(template);
            expander
                .check(&replacement, pattern)
                .map_err(|source| EngineError::ReplacementTemplate {
                    template: template.to_string(),
                    source,
                })?;
            replacement
        }
    };

    let (patched, count) = rewrite_matches(document, pattern, scope, offset, |captures| {
        let matched = captures.group(0).unwrap_or("");
        let region = match mode {
            Mode::Append => format!("{}{}", matched, expand_backrefs(template, captures)?),
            Mode::Prepend => format!("{}{}", expand_backrefs(template, captures)?, matched),
            Mode::Replace => expander.expansion(&replacement, captures),
        };
        Ok(region)
    })?;

    tracing::debug!(pattern = pattern.as_str(), %mode, count, "applied patch");
    Ok(patched)
}

/// Undo an append or prepend patch previously made with the same arguments.
///
/// A replace patch fails with [`EngineError::NotRevertible`].
///
/// Template text is matched literally; only `\N` tokens keep their meaning
/// as references to the pattern's groups. A region is only restored when it
/// splits exactly into the original match and the text the template expands
/// to against it; anything else is left alone. For prepend patches a template
/// that references a group cannot be reverted, since the reference would
/// precede the group it names in the combined pattern.
pub fn revert_patch(
    document: &str,
    pattern: &Regex,
    template: &str,
    scope: Scope,
    mode: Mode,
    offset: usize,
) -> Result<String, EngineError> {
    let composite = composite_pattern(pattern, template, mode)?;

    let (reverted, count) = rewrite_matches(document, &composite, scope, offset, |captures| {
        let matched = captures.get(0).map_or("", |m| m.as_str());
        let original = strip_inserted(matched, template, mode, captures)?;
        Ok(original.unwrap_or(matched).to_string())
    })?;

    tracing::debug!(pattern = pattern.as_str(), %mode, count, "reverted patch");
    Ok(reverted)
}

/// Build the pattern matching a region already patched with `template`.
///
/// The original pattern sits in a non-capturing group, so its group numbers
/// and its own backreferences are unchanged. Each template reference `\N`
/// becomes the backreference `(?:\N)`; `\0` has no group to refer to and
/// matches lazily instead. Dot matches newline across the combined pattern.
pub fn composite_pattern(pattern: &Regex, template: &str, mode: Mode) -> Result<Regex, EngineError> {
    if !mode.is_revertible() {
        return Err(EngineError::NotRevertible);
    }
    check_references(template, pattern.captures_len().saturating_sub(1))?;

    let mut inserted = String::with_capacity(template.len() * 2);
    for segment in segments(template) {
        match segment {
            Segment::Literal(text) => escape_literal(text, &mut inserted),
            Segment::Group(0) => inserted.push_str(".*?"),
            Segment::Group(index) => {
                inserted.push_str("(?:\\");
                inserted.push_str(&index.to_string());
                inserted.push(')');
            }
        }
    }

    let mut wrapped = format!("(?:{}", pattern.as_str());
    // A trailing `#` comment must not swallow the closing paren
    if enables_extended(pattern.as_str()) {
        wrapped.push_str("(?x)\n");
    }
    wrapped.push(')');

    let source = match mode {
        Mode::Append => format!("(?s){wrapped}{inserted}"),
        _ => format!("(?s){inserted}{wrapped}"),
    };
    Ok(Regex::new(&source)?)
}

/// Whether `source` may switch on extended mode somewhere.
fn enables_extended(source: &str) -> bool {
    static EXTENDED: OnceLock<regex::Regex> = OnceLock::new();
    EXTENDED
        .get_or_init(|| regex::Regex::new(r"\(\?[a-zA-Z]*x").expect("extended flag regex is valid"))
        .is_match(source)
}

/// Quote regex metacharacters so `text` matches itself.
fn escape_literal(text: &str, out: &mut String) {
    for c in text.chars() {
        if matches!(
            c,
            '\\' | '.' | '+' | '*' | '?' | '(' | ')' | '|' | '[' | ']' | '{' | '}' | '^' | '$'
        ) {
            out.push('\\');
        }
        out.push(c);
    }
}

/// Rewrite a replace template into the expander's syntax.
///
/// `\N`, `\k<name>`, `\g<name>`, `\&` and `\\` keep their meaning. Any other
/// backslash is literal text.
fn replacement_template(template: &str) -> String {
    let mut out = String::with_capacity(template.len() + 4);
    let mut rest = template;

    while let Some(pos) = rest.find('\\') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos + 1..];
        let named = tail
            .strip_prefix("k<")
            .or_else(|| tail.strip_prefix("g<"))
            .and_then(|name| name.find('>').map(|end| &name[..end]));

        let consumed = if tail.starts_with('\\') {
            out.push_str(r"\\");
            1
        } else if tail.starts_with(|c: char| c.is_ascii_digit()) {
            out.push('\\');
            0
        } else if let Some(name) = named {
            out.push_str(r"\g<");
            out.push_str(name);
            out.push('>');
            name.len() + 3
        } else if tail.starts_with('&') {
            out.push_str(r"\g<0>");
            1
        } else {
            out.push_str(r"\\");
            0
        };
        rest = &tail[consumed..];
    }

    out.push_str(rest);
    out
}

/// Split a reverted region into the original match and the text a patch put
/// next to it. Returns the original match when the split reproduces
/// `matched` exactly.
fn strip_inserted<'m>(
    matched: &'m str,
    template: &str,
    mode: Mode,
    captures: &Captures<'_>,
) -> Result<Option<&'m str>, EngineError> {
    let mut fixed = 0;
    let mut whole_refs = 0;
    for segment in segments(template) {
        match segment {
            Segment::Literal(text) => fixed += text.len(),
            Segment::Group(0) => whole_refs += 1,
            Segment::Group(index) => fixed += captures.group(index).map_or(0, str::len),
        }
    }

    let Some(rest) = matched.len().checked_sub(fixed) else {
        return Ok(None);
    };
    if rest % (whole_refs + 1) != 0 {
        return Ok(None);
    }
    let original_len = rest / (whole_refs + 1);
    let original = match mode {
        Mode::Append => matched.get(..original_len),
        _ => matched.get(matched.len() - original_len..),
    };
    let Some(original) = original else {
        return Ok(None);
    };

    let inserted = expand_backrefs(
        template,
        &RevertGroups {
            captures,
            whole: original,
        },
    )?;
    let rebuilt = match mode {
        Mode::Append => format!("{original}{inserted}"),
        _ => format!("{inserted}{original}"),
    };
    Ok((rebuilt == matched).then_some(original))
}

/// Captures of a composite pattern, with group 0 standing for the original match.
struct RevertGroups<'c, 't> {
    captures: &'c Captures<'t>,
    whole: &'c str,
}

impl CaptureSource for RevertGroups<'_, '_> {
    fn group_count(&self) -> usize {
        self.captures.group_count()
    }

    fn group(&self, index: usize) -> Option<&str> {
        if index == 0 {
            Some(self.whole)
        } else {
            self.captures.group(index)
        }
    }
}

/// Rewrite each match of `regex` with the text produced by `rewrite`.
///
/// Returns the new document and the number of regions rewritten.
fn rewrite_matches<F>(
    document: &str,
    regex: &Regex,
    scope: Scope,
    offset: usize,
    mut rewrite: F,
) -> Result<(String, usize), EngineError>
where
    F: FnMut(&Captures<'_>) -> Result<String, EngineError>,
{
    let mut contents = document.to_string();
    let Some(mut cursor) = byte_offset(&contents, offset) else {
        return Ok((contents, 0));
    };
    let mut count = 0;

    while cursor <= contents.len() {
        let (start, end, region) = {
            let Some(captures) = regex.captures_from_pos(&contents, cursor)? else {
                break;
            };
            let Some(whole) = captures.get(0) else {
                break;
            };
            (whole.start(), whole.end(), rewrite(&captures)?)
        };

        tracing::debug!(start, end, "rewriting match");
        contents.replace_range(start..end, &region);
        count += 1;

        if !scope.is_global() {
            break;
        }

        cursor = start + region.len();
        // An empty match would be found again at the same spot.
        if start == end {
            cursor = match contents[cursor..].chars().next() {
                Some(c) => cursor + c.len_utf8(),
                None => break,
            };
        }
    }

    Ok((contents, count))
}

/// Byte offset of the `chars`-th character, or `None` past the end.
fn byte_offset(text: &str, chars: usize) -> Option<usize> {
    text.char_indices()
        .map(|(index, _)| index)
        .chain(std::iter::once(text.len()))
        .nth(chars)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn re(pattern: &str) -> Regex {
        Regex::new(pattern).unwrap()
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("append".parse::<Mode>().unwrap(), Mode::Append);
        assert_eq!(":prepend".parse::<Mode>().unwrap(), Mode::Prepend);
        assert_eq!("replace".parse::<Mode>().unwrap(), Mode::Replace);
    }

    #[test]
    fn test_mode_from_str_suggests_close_match() {
        let err = "apend".parse::<Mode>().unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidMode {
                suggestion: Some("append"),
                ..
            }
        ));
        assert!(err.to_string().contains("did you mean 'append'"));

        let err = "add_somewhere_i_dont_know_where".parse::<Mode>().unwrap_err();
        assert!(matches!(err, EngineError::InvalidMode { suggestion: None, .. }));
    }

    #[test]
    fn test_append_first() {
        let out = apply_patch("alpha beta gamma", &re("beta"), " beta and a half", Scope::First, Mode::Append, 0)
            .unwrap();
        assert_eq!(out, "alpha beta beta and a half gamma");
    }

    #[test]
    fn test_prepend_first() {
        let out = apply_patch("alpha beta gamma", &re("beta"), "alpha and a half ", Scope::First, Mode::Prepend, 0)
            .unwrap();
        assert_eq!(out, "alpha alpha and a half beta gamma");
    }

    #[test]
    fn test_replace_first() {
        let out = apply_patch("alpha beta gamma", &re("beta"), "two", Scope::First, Mode::Replace, 0).unwrap();
        assert_eq!(out, "alpha two gamma");
    }

    #[test]
    fn test_capture_groups_in_each_mode() {
        let pattern = re("(beta)");
        let doc = "alpha beta gamma";
        assert_eq!(
            apply_patch(doc, &pattern, r"\1 two", Scope::First, Mode::Replace, 0).unwrap(),
            "alpha beta two gamma"
        );
        assert_eq!(
            apply_patch(doc, &pattern, r" \1 and a half", Scope::First, Mode::Append, 0).unwrap(),
            "alpha beta beta and a half gamma"
        );
        assert_eq!(
            apply_patch(doc, &pattern, r"\1 and a half ", Scope::First, Mode::Prepend, 0).unwrap(),
            "alpha beta and a half beta gamma"
        );
    }

    #[test]
    fn test_replace_uses_match_context() {
        // The anchor only holds at the match position within the document.
        let out = apply_patch("x = 1\ny = 2\n", &re(r"(?m)^y = (\d)"), r"y = \1\1", Scope::First, Mode::Replace, 0)
            .unwrap();
        assert_eq!(out, "x = 1\ny = 22\n");
    }

    #[test]
    fn test_append_global() {
        let out = apply_patch("alpha alpha alpha", &re("alpha"), " alpha and a half", Scope::All, Mode::Append, 0)
            .unwrap();
        assert_eq!(out, "alpha alpha and a half alpha alpha and a half alpha alpha and a half");
    }

    #[test]
    fn test_prepend_global() {
        let out = apply_patch("alpha alpha alpha", &re("alpha"), "alpha and a half ", Scope::All, Mode::Prepend, 0)
            .unwrap();
        assert_eq!(out, "alpha and a half alpha alpha and a half alpha alpha and a half alpha");
    }

    #[test]
    fn test_replace_global_does_not_revisit() {
        let out = apply_patch("a a", &re("a"), "aa", Scope::All, Mode::Replace, 0).unwrap();
        assert_eq!(out, "aa aa");
    }

    #[test]
    fn test_no_match_is_noop() {
        let out = apply_patch("alpha", &re("zeta"), "x", Scope::All, Mode::Append, 0).unwrap();
        assert_eq!(out, "alpha");
    }

    #[test]
    fn test_offset_skips_earlier_matches() {
        let out = apply_patch("beta beta", &re("beta"), "!", Scope::First, Mode::Append, 1).unwrap();
        assert_eq!(out, "beta beta!");
    }

    #[test]
    fn test_offset_counts_characters() {
        let out = apply_patch("ééé beta", &re("é"), "!", Scope::All, Mode::Append, 2).unwrap();
        assert_eq!(out, "ééé! beta");
    }

    #[test]
    fn test_offset_past_end_is_noop() {
        let out = apply_patch("beta", &re("beta"), "!", Scope::First, Mode::Append, 10).unwrap();
        assert_eq!(out, "beta");
    }

    #[test]
    fn test_empty_matches_terminate() {
        let out = apply_patch("ab", &re(""), "", Scope::All, Mode::Replace, 0).unwrap();
        assert_eq!(out, "ab");

        let out = apply_patch("a\nb\n", &re("(?m)^"), "> ", Scope::All, Mode::Prepend, 0).unwrap();
        assert_eq!(out, "> a\n> b\n> ");

        let out = apply_patch("a", &re("$"), "!", Scope::All, Mode::Append, 0).unwrap();
        assert_eq!(out, "a!");
    }

    #[test]
    fn test_unresolved_reference_fails_before_matching() {
        let err = apply_patch("beta", &re("(beta)"), r"\2", Scope::First, Mode::Append, 0).unwrap_err();
        assert!(matches!(
            err,
            EngineError::UnresolvedReference(ExpandError::UnresolvedReference { index: 2, available: 1 })
        ));
    }

    #[test]
    fn test_replace_template_unknown_group_fails() {
        let err = apply_patch("beta", &re("beta"), r"\g<missing>", Scope::First, Mode::Replace, 0).unwrap_err();
        assert!(matches!(err, EngineError::ReplacementTemplate { .. }));
    }

    #[test]
    fn test_revert_append_first() {
        let out = revert_patch(
            "alpha beta beta and a half gamma",
            &re("beta"),
            " beta and a half",
            Scope::First,
            Mode::Append,
            0,
        )
        .unwrap();
        assert_eq!(out, "alpha beta gamma");
    }

    #[test]
    fn test_revert_prepend_first() {
        let out = revert_patch(
            "alpha alpha and a half beta gamma",
            &re("beta"),
            "alpha and a half ",
            Scope::First,
            Mode::Prepend,
            0,
        )
        .unwrap();
        assert_eq!(out, "alpha beta gamma");
    }

    #[test]
    fn test_revert_append_with_capture_group() {
        let out = revert_patch(
            "alpha beta beta and a half gamma",
            &re("(beta)"),
            r" \1 and a half",
            Scope::First,
            Mode::Append,
            0,
        )
        .unwrap();
        assert_eq!(out, "alpha beta gamma");
    }

    #[test]
    fn test_revert_append_global() {
        let out = revert_patch(
            "alpha alpha and a half alpha alpha and a half alpha alpha and a half",
            &re("alpha"),
            " alpha and a half",
            Scope::All,
            Mode::Append,
            0,
        )
        .unwrap();
        assert_eq!(out, "alpha alpha alpha");
    }

    #[test]
    fn test_revert_prepend_global() {
        let out = revert_patch(
            "alpha and a half alpha alpha and a half alpha alpha and a half alpha",
            &re("alpha"),
            "alpha and a half ",
            Scope::All,
            Mode::Prepend,
            0,
        )
        .unwrap();
        assert_eq!(out, "alpha alpha alpha");
    }

    #[test]
    fn test_revert_replace_fails() {
        let err = revert_patch("alpha two gamma", &re("beta"), "two", Scope::First, Mode::Replace, 0).unwrap_err();
        assert!(matches!(err, EngineError::NotRevertible));
    }

    #[test]
    fn test_revert_treats_template_metacharacters_literally() {
        let pattern = re(r"version = \d+");
        let template = " # pinned (v1.*) [x]";
        let patched = apply_patch("version = 3\n", &pattern, template, Scope::First, Mode::Append, 0).unwrap();
        assert_eq!(patched, "version = 3 # pinned (v1.*) [x]\n");

        // A look-alike with different characters where the metacharacters were is left alone.
        let look_alike = "version = 3 # pinned (v1xx) [x]\n";
        assert_eq!(
            revert_patch(look_alike, &pattern, template, Scope::First, Mode::Append, 0).unwrap(),
            look_alike
        );
        assert_eq!(
            revert_patch(&patched, &pattern, template, Scope::First, Mode::Append, 0).unwrap(),
            "version = 3\n"
        );
    }

    #[test]
    fn test_revert_whole_match_reference() {
        let pattern = re("beta");
        let patched = apply_patch("alpha beta", &pattern, r" (\0)", Scope::First, Mode::Append, 0).unwrap();
        assert_eq!(patched, "alpha beta (beta)");
        assert_eq!(
            revert_patch(&patched, &pattern, r" (\0)", Scope::First, Mode::Append, 0).unwrap(),
            "alpha beta"
        );
    }

    #[test]
    fn test_composite_pattern_shape() {
        let composite = composite_pattern(&re("(b)eta"), r" \1.", Mode::Append).unwrap();
        assert_eq!(composite.as_str(), r"(?s)(?:(b)eta) (?:\1)\.");

        let composite = composite_pattern(&re("beta"), "x ", Mode::Prepend).unwrap();
        assert_eq!(composite.as_str(), "(?s)x (?:beta)");
    }

    #[test]
    fn test_reference_digits_are_read_greedily() {
        let pattern = re(r"v(\d)");
        let patched = apply_patch("v1", &pattern, r" \12", Scope::First, Mode::Append, 0);
        // `\12` names group 12, which does not exist
        assert!(patched.is_err());

        let patched = apply_patch("v1", &pattern, r" \1-2", Scope::First, Mode::Append, 0).unwrap();
        assert_eq!(patched, "v1 1-2");
        assert_eq!(
            revert_patch(&patched, &pattern, r" \1-2", Scope::First, Mode::Append, 0).unwrap(),
            "v1"
        );
    }

    #[test]
    fn test_revert_inline_extended_pattern_with_comment() {
        let pattern = re("(?x)be ta # word");
        let patched = apply_patch("beta", &pattern, "!", Scope::First, Mode::Append, 0).unwrap();
        assert_eq!(patched, "beta!");
        assert_eq!(
            revert_patch(&patched, &pattern, "!", Scope::First, Mode::Append, 0).unwrap(),
            "beta"
        );
        assert_eq!(
            revert_patch("!beta", &pattern, "!", Scope::First, Mode::Prepend, 0).unwrap(),
            "beta"
        );
    }

    #[test]
    fn test_revert_whole_match_reference_needs_exact_split() {
        // `\0` matches loosely; a region that does not split exactly is left alone
        let pattern = re("beta");
        let doc = "alpha beta (gamma)";
        assert_eq!(
            revert_patch(doc, &pattern, r" (\0)", Scope::First, Mode::Append, 0).unwrap(),
            doc
        );
    }

    #[test]
    fn test_replace_keeps_unknown_escapes_literal() {
        let out = apply_patch("dir = x", &re("dir"), r"C:\temp", Scope::First, Mode::Replace, 0).unwrap();
        assert_eq!(out, r"C:\temp = x");

        let out = apply_patch("dir", &re("dir"), "a\\", Scope::First, Mode::Replace, 0).unwrap();
        assert_eq!(out, "a\\");
    }

    #[test]
    fn test_replace_template_syntax() {
        let pattern = re(r"(?P<key>\w+) = (?P<value>\w+)");
        let out = apply_patch("a = b", &pattern, r"\k<value> = \g<key> [\&] \\n", Scope::First, Mode::Replace, 0)
            .unwrap();
        assert_eq!(out, r"b = a [a = b] \n");

        let out = apply_patch("a = b", &re(r"(\w) = (\w)"), r"\2\1", Scope::First, Mode::Replace, 0).unwrap();
        assert_eq!(out, "ba");
    }
}
