use crate::config::pattern::compile_pattern;
use crate::config::schema::{PatchFile, ValidationError};
use crate::patch::{Patch, PatchError, TemplateSource};
use crate::render::{TemplateRenderer, TrimMode};
use crate::store::FsStore;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Descriptor file formats, chosen by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Toml,
    Json,
}

impl ConfigFormat {
    /// Extensions probed, in order, when loading a patch by name.
    pub const EXTENSIONS: [&'static str; 4] = ["yml", "yaml", "toml", "json"];

    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension {
            "yml" | "yaml" => Some(ConfigFormat::Yaml),
            "toml" => Some(ConfigFormat::Toml),
            "json" => Some(ConfigFormat::Json),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }
}

impl fmt::Display for ConfigFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConfigFormat::Yaml => "YAML",
            ConfigFormat::Toml => "TOML",
            ConfigFormat::Json => "JSON",
        })
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    UnsupportedFormat {
        path: PathBuf,
    },
    Parse {
        path: Option<PathBuf>,
        format: ConfigFormat,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    Validation {
        path: Option<PathBuf>,
        source: ValidationError,
    },
    Pattern {
        pattern: String,
        source: fancy_regex::Error,
    },
    Template {
        path: Option<PathBuf>,
        source: PatchError,
    },
    PatchDirNotConfigured,
    PatchDirNotFound {
        path: PathBuf,
    },
    PatchNotFound {
        name: String,
        dir: PathBuf,
    },
    Walk(walkdir::Error),
}

impl ConfigError {
    fn with_path(self, path: &Path) -> Self {
        let path = path.to_path_buf();
        match self {
            ConfigError::Parse {
                path: None,
                format,
                source,
            } => ConfigError::Parse {
                path: Some(path),
                format,
                source,
            },
            ConfigError::Validation { path: None, source } => ConfigError::Validation {
                path: Some(path),
                source,
            },
            ConfigError::Template { path: None, source } => ConfigError::Template {
                path: Some(path),
                source,
            },
            other => other,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(
                    f,
                    "failed to read patch descriptor from {}: {}",
                    path.display(),
                    source
                )
            }
            ConfigError::UnsupportedFormat { path } => write!(
                f,
                "unsupported patch descriptor format: {} (expected .yml, .yaml, .toml or .json)",
                path.display()
            ),
            ConfigError::Parse {
                path,
                format,
                source,
            } => match path {
                Some(path) => write!(
                    f,
                    "failed to parse patch descriptor {} ({}): {}",
                    format,
                    path.display(),
                    source
                ),
                None => write!(f, "failed to parse patch descriptor {}: {}", format, source),
            },
            ConfigError::Validation { path, source } => match path {
                Some(path) => write!(
                    f,
                    "invalid patch descriptor ({}): {}",
                    path.display(),
                    source
                ),
                None => write!(f, "invalid patch descriptor: {}", source),
            },
            ConfigError::Pattern { pattern, source } => {
                write!(f, "invalid pattern {:?}: {}", pattern, source)
            }
            ConfigError::Template { path, source } => match path {
                Some(path) => write!(f, "patch descriptor {}: {}", path.display(), source),
                None => write!(f, "patch descriptor: {}", source),
            },
            ConfigError::PatchDirNotConfigured => {
                write!(f, "no patch directory configured")
            }
            ConfigError::PatchDirNotFound { path } => {
                write!(f, "patch directory is not a directory: {}", path.display())
            }
            ConfigError::PatchNotFound { name, dir } => {
                write!(f, "no patch named '{}' in {}", name, dir.display())
            }
            ConfigError::Walk(source) => write!(f, "failed to list patches: {}", source),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source.as_ref()),
            ConfigError::Validation { source, .. } => Some(source),
            ConfigError::Pattern { source, .. } => Some(source),
            ConfigError::Template { source, .. } => Some(source),
            ConfigError::Walk(source) => Some(source),
            _ => None,
        }
    }
}

impl From<walkdir::Error> for ConfigError {
    fn from(e: walkdir::Error) -> Self {
        ConfigError::Walk(e)
    }
}

/// Deserialize a descriptor without building a patch from it.
pub fn parse_patch_file(input: &str, format: ConfigFormat) -> Result<PatchFile, ConfigError> {
    let parsed: Result<PatchFile, Box<dyn std::error::Error + Send + Sync>> = match format {
        ConfigFormat::Yaml => serde_yaml::from_str(input).map_err(|e| e.into()),
        ConfigFormat::Toml => toml_edit::de::from_str(input).map_err(|e| e.into()),
        ConfigFormat::Json => serde_json::from_str(input).map_err(|e| e.into()),
    };
    parsed.map_err(|source| ConfigError::Parse {
        path: None,
        format,
        source,
    })
}

/// Build a patch from descriptor text. `text_file` resolves against `base_dir`.
pub fn load_from_str(
    input: &str,
    format: ConfigFormat,
    base_dir: &Path,
) -> Result<Patch, ConfigError> {
    let file = parse_patch_file(input, format)?;
    file.validate()
        .map_err(|source| ConfigError::Validation { path: None, source })?;

    let pattern = compile_pattern(&file.pattern).map_err(|source| ConfigError::Pattern {
        pattern: file.pattern.clone(),
        source,
    })?;
    // `validate` has already rejected unknown modes
    let mode = file.mode().unwrap_or_default();
    let scope = file.scope();

    let patch = TemplateSource::from_fields(
        file.text,
        file.text_file.map(|path| base_dir.join(path)),
    )
    .and_then(|source| Patch::from_source(pattern, source, &FsStore))
    .map_err(|source| ConfigError::Template { path: None, source })?;

    Ok(patch.with_mode(mode).with_scope(scope))
}

/// Load a descriptor file; the format comes from its extension.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Patch, ConfigError> {
    let path = path.as_ref();
    let format = ConfigFormat::from_path(path).ok_or_else(|| ConfigError::UnsupportedFormat {
        path: path.to_path_buf(),
    })?;
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let base_dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    tracing::debug!(path = %path.display(), %format, "loading patch descriptor");
    load_from_str(&contents, format, base_dir).map_err(|error| error.with_path(path))
}

/// Settings for locating descriptors and rendering their text.
#[derive(Debug, Clone, Default)]
pub struct LoaderConfig {
    /// Directory searched by [`LoaderConfig::load_named`]
    pub patch_dir: Option<PathBuf>,
    pub trim_mode: TrimMode,
}

impl LoaderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_patch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.patch_dir = Some(dir.into());
        self
    }

    pub fn with_trim_mode(mut self, trim_mode: TrimMode) -> Self {
        self.trim_mode = trim_mode;
        self
    }

    pub fn renderer(&self) -> TemplateRenderer {
        TemplateRenderer::new(self.trim_mode)
    }

    /// The configured patch directory, if it exists.
    pub fn patch_dir(&self) -> Result<&Path, ConfigError> {
        let dir = self
            .patch_dir
            .as_deref()
            .ok_or(ConfigError::PatchDirNotConfigured)?;
        if !dir.is_dir() {
            return Err(ConfigError::PatchDirNotFound {
                path: dir.to_path_buf(),
            });
        }
        Ok(dir)
    }

    /// Path of the descriptor called `name` in the patch directory.
    pub fn find_named(&self, name: &str) -> Result<PathBuf, ConfigError> {
        let dir = self.patch_dir()?;
        ConfigFormat::EXTENSIONS
            .iter()
            .map(|ext| dir.join(format!("{name}.{ext}")))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| ConfigError::PatchNotFound {
                name: name.to_string(),
                dir: dir.to_path_buf(),
            })
    }

    pub fn load_named(&self, name: &str) -> Result<Patch, ConfigError> {
        load_from_path(self.find_named(name)?)
    }

    /// Load `reference` as a file path if one exists, else as a patch name.
    pub fn resolve(&self, reference: &str) -> Result<Patch, ConfigError> {
        let path = Path::new(reference);
        if path.is_file() {
            load_from_path(path)
        } else {
            self.load_named(reference)
        }
    }

    /// Descriptor files directly inside the patch directory, sorted.
    pub fn list_patches(&self) -> Result<Vec<PathBuf>, ConfigError> {
        let dir = self.patch_dir()?;
        let mut files = Vec::new();
        for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
            let entry = entry?;
            if entry.file_type().is_file() && ConfigFormat::from_path(entry.path()).is_some() {
                files.push(entry.path().to_path_buf());
            }
        }
        files.sort();
        Ok(files)
    }
}
