//! `/pattern/flags` literals in descriptor files.

use fancy_regex::Regex;
use regex::Regex as LiteralRegex;
use std::sync::OnceLock;

/// Flags accepted after the closing slash of a pattern literal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatternFlags {
    /// `i`
    pub case_insensitive: bool,
    /// `x`: whitespace and `#` comments are ignored
    pub extended: bool,
    /// `m`: `.` also matches `\n`
    pub dot_matches_newline: bool,
}

impl PatternFlags {
    fn from_letters(letters: &str) -> Self {
        Self {
            case_insensitive: letters.contains('i'),
            extended: letters.contains('x'),
            dot_matches_newline: letters.contains('m'),
        }
    }

    /// Inline flag group for these flags. Line anchors are always on.
    fn inline_group(&self) -> String {
        let mut group = String::from("(?m");
        if self.case_insensitive {
            group.push('i');
        }
        if self.extended {
            group.push('x');
        }
        if self.dot_matches_newline {
            group.push('s');
        }
        group.push(')');
        group
    }
}

/// A pattern string split into its source and flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternLiteral {
    pub source: String,
    pub flags: PatternFlags,
}

impl PatternLiteral {
    /// Recognize `/source/flags`; anything else is a plain pattern with no flags.
    pub fn parse(raw: &str) -> Self {
        static LITERAL: OnceLock<LiteralRegex> = OnceLock::new();
        let literal = LITERAL.get_or_init(|| {
            LiteralRegex::new(r"(?s)\A/(.+)/([imx]*)\z").expect("pattern literal regex is valid")
        });

        match literal.captures(raw) {
            Some(caps) => Self {
                source: caps[1].to_string(),
                flags: PatternFlags::from_letters(&caps[2]),
            },
            None => Self {
                source: raw.to_string(),
                flags: PatternFlags::default(),
            },
        }
    }

    pub fn compile(&self) -> Result<Regex, fancy_regex::Error> {
        Regex::new(&format!("{}{}", self.flags.inline_group(), self.source))
    }
}

/// Parse and compile a descriptor's `pattern` field.
pub fn compile_pattern(raw: &str) -> Result<Regex, fancy_regex::Error> {
    PatternLiteral::parse(raw).compile()
}
