//! Pattern Patch: regex-anchored text patches that can be reverted
//!
//! A patch locates a region of a document with a regular expression and
//! inserts text after it, before it, or in place of it. Append and prepend
//! patches can be reverted later with the same arguments.
//!
//! # Architecture
//!
//! - [`expand`] expands `\N` backreferences in template text against a match.
//! - [`engine`] applies and reverts a single patch on a string.
//! - [`patch`] bundles pattern, template, mode and scope into a reusable
//!   [`Patch`] that renders its text and rewrites documents through a
//!   [`DocumentStore`].
//! - [`config`] loads patches from YAML, TOML or JSON descriptors.
//!
//! # Example
//!
//! ```
//! use pattern_patch::{apply_patch, revert_patch, Mode, Scope};
//! use fancy_regex::Regex;
//!
//! let pattern = Regex::new("beta").unwrap();
//! let patched = apply_patch("alpha beta gamma", &pattern, " and a half", Scope::First, Mode::Append, 0)
//!     .unwrap();
//! assert_eq!(patched, "alpha beta and a half gamma");
//!
//! let reverted = revert_patch(&patched, &pattern, " and a half", Scope::First, Mode::Append, 0)
//!     .unwrap();
//! assert_eq!(reverted, "alpha beta gamma");
//! ```

pub mod config;
pub mod engine;
pub mod expand;
pub mod patch;
pub mod render;
pub mod store;

// Re-exports
pub use config::{load_from_path, load_from_str, ConfigError, ConfigFormat, LoaderConfig};
pub use engine::{apply_patch, composite_pattern, revert_patch, EngineError, Mode, Scope};
pub use expand::{expand_backrefs, expand_backrefs_in_place, CaptureSource, ExpandError};
pub use patch::{Patch, PatchError, PatchOptions, PatchOutcome, TemplateSource};
pub use render::{PlainRenderer, RenderContext, RenderError, Renderer, TemplateRenderer, TrimMode};
pub use store::{DocumentStore, FsStore, MemoryStore};
