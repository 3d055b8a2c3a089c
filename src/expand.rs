//! Backreference expansion for append and prepend templates.
//!
//! A template may refer to the capture groups of the match it is inserted
//! next to with `\N` tokens, where `N` is a 1-based group index (`\0` is the
//! whole match). Expansion is a single left-to-right pass: text copied in from
//! a capture group is never scanned again, so a group whose own text looks
//! like `\1` is inserted verbatim, and every repetition of a token expands
//! independently against the same match.

use fancy_regex::Captures;
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExpandError {
    #[error("backreference \\{index} has no matching capture group ({available} available)")]
    UnresolvedReference { index: usize, available: usize },
}

/// Anything that can hand out capture group text by index.
///
/// Index 0 is the whole match. `group_count` excludes it.
pub trait CaptureSource {
    fn group_count(&self) -> usize;

    /// Text of group `index`, or `None` when the group did not participate.
    fn group(&self, index: usize) -> Option<&str>;
}

impl CaptureSource for Captures<'_> {
    fn group_count(&self) -> usize {
        self.len().saturating_sub(1)
    }

    fn group(&self, index: usize) -> Option<&str> {
        self.get(index).map(|m| m.as_str())
    }
}

/// A piece of a template: literal text or a group reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    Literal(&'a str),
    Group(usize),
}

fn token_regex() -> &'static Regex {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    TOKEN.get_or_init(|| Regex::new(r"\\([0-9]+)").expect("backreference token regex is valid"))
}

/// Split a template into literal runs and `\N` references.
///
/// An index too large for `usize` is kept as `usize::MAX` so that it is
/// reported as unresolved rather than silently wrapping.
pub fn segments(template: &str) -> Vec<Segment<'_>> {
    let mut pieces = Vec::new();
    let mut last = 0;

    for caps in token_regex().captures_iter(template) {
        let (Some(token), Some(digits)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if token.start() > last {
            pieces.push(Segment::Literal(&template[last..token.start()]));
        }
        let index = digits.as_str().parse().unwrap_or(usize::MAX);
        pieces.push(Segment::Group(index));
        last = token.end();
    }

    if last < template.len() {
        pieces.push(Segment::Literal(&template[last..]));
    }
    pieces
}

/// Highest group index referenced by `template`, if any.
pub fn max_reference(template: &str) -> Option<usize> {
    segments(template)
        .into_iter()
        .filter_map(|segment| match segment {
            Segment::Group(index) => Some(index),
            Segment::Literal(_) => None,
        })
        .max()
}

/// Fail if `template` refers to a group beyond `group_count`.
pub fn check_references(template: &str, group_count: usize) -> Result<(), ExpandError> {
    match max_reference(template) {
        Some(index) if index > group_count => Err(ExpandError::UnresolvedReference {
            index,
            available: group_count,
        }),
        _ => Ok(()),
    }
}

/// Return a copy of `template` with every `\N` replaced by group `N`'s text.
///
/// Groups that exist but did not participate in the match expand to the
/// empty string.
pub fn expand_backrefs<C>(template: &str, captures: &C) -> Result<String, ExpandError>
where
    C: CaptureSource + ?Sized,
{
    let mut expanded = String::with_capacity(template.len());
    for segment in segments(template) {
        match segment {
            Segment::Literal(text) => expanded.push_str(text),
            Segment::Group(index) => {
                if index > captures.group_count() {
                    return Err(ExpandError::UnresolvedReference {
                        index,
                        available: captures.group_count(),
                    });
                }
                expanded.push_str(captures.group(index).unwrap_or(""));
            }
        }
    }
    Ok(expanded)
}

/// In-place form of [`expand_backrefs`]. On error `template` is left as it was.
pub fn expand_backrefs_in_place<C>(template: &mut String, captures: &C) -> Result<(), ExpandError>
where
    C: CaptureSource + ?Sized,
{
    *template = expand_backrefs(template, captures)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fancy_regex::Regex as FancyRegex;

    fn capture<'t>(re: &FancyRegex, text: &'t str) -> Captures<'t> {
        re.captures(text).unwrap().unwrap()
    }

    #[test]
    fn test_single_group() {
        let re = FancyRegex::new(r"(\d+)").unwrap();
        let caps = capture(&re, "123");
        assert_eq!(expand_backrefs(r"\1 abc", &caps).unwrap(), "123 abc");
    }

    #[test]
    fn test_repeated_group() {
        let re = FancyRegex::new(r"(\d+)").unwrap();
        let caps = capture(&re, "123");
        assert_eq!(expand_backrefs(r"\1 \1 abc", &caps).unwrap(), "123 123 abc");
    }

    #[test]
    fn test_multiple_groups() {
        let re = FancyRegex::new(r"(\d+)(.*)").unwrap();
        let caps = capture(&re, "123xyz");
        assert_eq!(expand_backrefs(r"\1 \2 abc", &caps).unwrap(), "123 xyz abc");
    }

    #[test]
    fn test_no_references() {
        let re = FancyRegex::new(r"(\d+)").unwrap();
        let caps = capture(&re, "123");
        assert_eq!(expand_backrefs("plain", &caps).unwrap(), "plain");
        assert_eq!(expand_backrefs("", &caps).unwrap(), "");
    }

    #[test]
    fn test_whole_match_reference() {
        let re = FancyRegex::new(r"b(e)ta").unwrap();
        let caps = capture(&re, "alpha beta");
        assert_eq!(expand_backrefs(r"[\0/\1]", &caps).unwrap(), "[beta/e]");
    }

    #[test]
    fn test_group_text_is_not_rescanned() {
        let re = FancyRegex::new(r"<(.+)>").unwrap();
        let caps = capture(&re, r"<a\1b>");
        assert_eq!(expand_backrefs(r"\1-\1", &caps).unwrap(), r"a\1b-a\1b");
    }

    #[test]
    fn test_unresolved_reference_fails() {
        let re = FancyRegex::new(r"(\d+)").unwrap();
        let caps = capture(&re, "123");
        let err = expand_backrefs(r"\1 \2", &caps).unwrap_err();
        assert_eq!(
            err,
            ExpandError::UnresolvedReference {
                index: 2,
                available: 1
            }
        );
    }

    #[test]
    fn test_non_participating_group_is_empty() {
        let re = FancyRegex::new(r"(a)|(b)").unwrap();
        let caps = capture(&re, "b");
        assert_eq!(expand_backrefs(r"[\1][\2]", &caps).unwrap(), "[][b]");
    }

    #[test]
    fn test_copy_form_leaves_input_alone() {
        let re = FancyRegex::new(r"(\d+)(.*)").unwrap();
        let caps = capture(&re, "123xyz");
        let template = String::from(r"\1 \2 abc");
        let expanded = expand_backrefs(&template, &caps).unwrap();
        assert_eq!(expanded, "123 xyz abc");
        assert_eq!(template, r"\1 \2 abc");
    }

    #[test]
    fn test_in_place_form() {
        let re = FancyRegex::new(r"(\d+)(.*)").unwrap();
        let caps = capture(&re, "123xyz");
        let mut template = String::from(r"\1 \2 abc");
        expand_backrefs_in_place(&mut template, &caps).unwrap();
        assert_eq!(template, "123 xyz abc");
    }

    #[test]
    fn test_in_place_form_untouched_on_error() {
        let re = FancyRegex::new(r"(\d+)").unwrap();
        let caps = capture(&re, "123");
        let mut template = String::from(r"\1 \9");
        assert!(expand_backrefs_in_place(&mut template, &caps).is_err());
        assert_eq!(template, r"\1 \9");
    }

    #[test]
    fn test_segments() {
        assert_eq!(
            segments(r"a\12b\3"),
            vec![
                Segment::Literal("a"),
                Segment::Group(12),
                Segment::Literal("b"),
                Segment::Group(3),
            ]
        );
        assert_eq!(max_reference(r"a\12b\3"), Some(12));
        assert_eq!(max_reference("none"), None);
    }

    #[test]
    fn test_non_ascii_digits_are_literal() {
        let re = FancyRegex::new(r"(\d+)").unwrap();
        let caps = capture(&re, "123");
        assert_eq!(segments("\\\u{663}"), vec![Segment::Literal("\\\u{663}")]);
        assert_eq!(expand_backrefs("\\\u{663}", &caps).unwrap(), "\\\u{663}");
    }

    #[test]
    fn test_oversized_index_is_unresolved() {
        let template = r"\99999999999999999999999";
        assert_eq!(max_reference(template), Some(usize::MAX));
        assert!(check_references(template, 3).is_err());
    }
}
