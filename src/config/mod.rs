pub mod loader;
pub mod pattern;
pub mod schema;

pub use loader::{
    load_from_path, load_from_str, parse_patch_file, ConfigError, ConfigFormat, LoaderConfig,
};
pub use pattern::{compile_pattern, PatternFlags, PatternLiteral};
pub use schema::{PatchFile, ValidationError, ValidationIssue};
