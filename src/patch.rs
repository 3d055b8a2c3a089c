//! Patch descriptors.
//!
//! A [`Patch`] bundles a pattern, template text, mode and scope. It carries
//! no document state, so one value can be applied to any number of
//! documents, from any number of threads.

use crate::engine::{apply_patch, revert_patch, EngineError, Mode, Scope};
use crate::render::{RenderContext, RenderError, Renderer, TemplateRenderer};
use crate::store::DocumentStore;
use fancy_regex::Regex;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PatchError {
    #[error("text and text_file are mutually exclusive")]
    ConflictingTemplateSource,

    #[error("patch needs either text or text_file")]
    MissingTemplate,

    #[error("failed to read template file {path}: {source}")]
    TemplateFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to render patch text: {0}")]
    Render(#[from] RenderError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Where the template text of a patch comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSource {
    Inline(String),
    File(PathBuf),
}

impl TemplateSource {
    /// Pick the source from optional `text` / `text_file` fields.
    pub fn from_fields(
        text: Option<String>,
        text_file: Option<PathBuf>,
    ) -> Result<Self, PatchError> {
        match (text, text_file) {
            (Some(_), Some(_)) => Err(PatchError::ConflictingTemplateSource),
            (Some(text), None) => Ok(TemplateSource::Inline(text)),
            (None, Some(path)) => Ok(TemplateSource::File(path)),
            (None, None) => Err(PatchError::MissingTemplate),
        }
    }
}

/// Outcome of a patch on one document.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "PatchOutcome reports whether the document changed"]
pub enum PatchOutcome {
    /// The document was rewritten
    Patched { path: PathBuf },
    /// Nothing matched; the document was not written
    Unchanged { path: PathBuf },
}

impl PatchOutcome {
    pub fn path(&self) -> &Path {
        match self {
            PatchOutcome::Patched { path } | PatchOutcome::Unchanged { path } => path,
        }
    }

    pub fn is_changed(&self) -> bool {
        matches!(self, PatchOutcome::Patched { .. })
    }
}

impl fmt::Display for PatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatchOutcome::Patched { path } => write!(f, "Patched {}", path.display()),
            PatchOutcome::Unchanged { path } => write!(f, "Unchanged {}", path.display()),
        }
    }
}

static DEFAULT_RENDERER: TemplateRenderer = TemplateRenderer::new(crate::render::TrimMode::Keep);
static EMPTY_CONTEXT: RenderContext = RenderContext::new();

/// Rendering and positioning options for one apply or revert call.
#[derive(Clone, Copy)]
pub struct PatchOptions<'a> {
    pub renderer: &'a dyn Renderer,
    pub context: &'a RenderContext,
    /// Character offset at which matching starts
    pub offset: usize,
}

impl<'a> PatchOptions<'a> {
    pub fn new(renderer: &'a dyn Renderer, context: &'a RenderContext) -> Self {
        Self {
            renderer,
            context,
            offset: 0,
        }
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }
}

impl Default for PatchOptions<'static> {
    fn default() -> Self {
        Self::new(&DEFAULT_RENDERER, &EMPTY_CONTEXT)
    }
}

impl fmt::Debug for PatchOptions<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatchOptions")
            .field("context", self.context)
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

/// A reusable, regex-anchored text patch.
#[derive(Debug, Clone)]
pub struct Patch {
    pattern: Regex,
    text: String,
    text_file: Option<PathBuf>,
    mode: Mode,
    scope: Scope,
}

impl Patch {
    /// Inline-text patch in append mode, first match only.
    pub fn new(pattern: Regex, text: impl Into<String>) -> Self {
        Self {
            pattern,
            text: text.into(),
            text_file: None,
            mode: Mode::default(),
            scope: Scope::default(),
        }
    }

    /// Build a patch whose text comes from `source`. A file source is read
    /// through `store`.
    pub fn from_source<S>(pattern: Regex, source: TemplateSource, store: &S) -> Result<Self, PatchError>
    where
        S: DocumentStore + ?Sized,
    {
        match source {
            TemplateSource::Inline(text) => Ok(Self::new(pattern, text)),
            TemplateSource::File(path) => {
                let text = store
                    .read(&path)
                    .map_err(|source| PatchError::TemplateFile {
                        path: path.clone(),
                        source,
                    })?;
                let mut patch = Self::new(pattern, text);
                patch.text_file = Some(path);
                Ok(patch)
            }
        }
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn pattern(&self) -> &Regex {
        &self.pattern
    }

    /// Unrendered template text.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn text_file(&self) -> Option<&Path> {
        self.text_file.as_deref()
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    fn render(&self, options: &PatchOptions<'_>) -> Result<String, PatchError> {
        Ok(options.renderer.render(&self.text, options.context)?)
    }

    /// Apply to an in-memory document.
    pub fn apply_str(&self, document: &str, options: &PatchOptions<'_>) -> Result<String, PatchError> {
        let text = self.render(options)?;
        Ok(apply_patch(
            document,
            &self.pattern,
            &text,
            self.scope,
            self.mode,
            options.offset,
        )?)
    }

    /// Revert from an in-memory document.
    pub fn revert_str(&self, document: &str, options: &PatchOptions<'_>) -> Result<String, PatchError> {
        if !self.mode.is_revertible() {
            return Err(EngineError::NotRevertible.into());
        }
        let text = self.render(options)?;
        Ok(revert_patch(
            document,
            &self.pattern,
            &text,
            self.scope,
            self.mode,
            options.offset,
        )?)
    }

    /// Apply to each document in `store`, writing back the ones that change.
    ///
    /// Stops at the first failure. Documents already written stay written.
    pub fn apply_to<S, P>(
        &self,
        store: &mut S,
        documents: &[P],
        options: &PatchOptions<'_>,
    ) -> Result<Vec<PatchOutcome>, PatchError>
    where
        S: DocumentStore + ?Sized,
        P: AsRef<Path>,
    {
        let text = self.render(options)?;
        self.rewrite_documents(store, documents, |contents| {
            apply_patch(contents, &self.pattern, &text, self.scope, self.mode, options.offset)
        })
    }

    /// Revert from each document in `store`, writing back the ones that change.
    ///
    /// Fails with [`EngineError::NotRevertible`] for replace patches before
    /// any document is read.
    pub fn revert_to<S, P>(
        &self,
        store: &mut S,
        documents: &[P],
        options: &PatchOptions<'_>,
    ) -> Result<Vec<PatchOutcome>, PatchError>
    where
        S: DocumentStore + ?Sized,
        P: AsRef<Path>,
    {
        if !self.mode.is_revertible() {
            return Err(EngineError::NotRevertible.into());
        }
        let text = self.render(options)?;
        self.rewrite_documents(store, documents, |contents| {
            revert_patch(contents, &self.pattern, &text, self.scope, self.mode, options.offset)
        })
    }

    fn rewrite_documents<S, P, F>(
        &self,
        store: &mut S,
        documents: &[P],
        mut rewrite: F,
    ) -> Result<Vec<PatchOutcome>, PatchError>
    where
        S: DocumentStore + ?Sized,
        P: AsRef<Path>,
        F: FnMut(&str) -> Result<String, EngineError>,
    {
        let mut outcomes = Vec::with_capacity(documents.len());

        for document in documents {
            let path = document.as_ref();
            let contents = store.read(path).map_err(|source| PatchError::Io {
                path: path.to_path_buf(),
                source,
            })?;

            let modified = rewrite(&contents)?;
            if modified == contents {
                tracing::warn!(path = %path.display(), pattern = self.pattern.as_str(), "patch left document unchanged");
                outcomes.push(PatchOutcome::Unchanged {
                    path: path.to_path_buf(),
                });
                continue;
            }

            store.write(path, &modified).map_err(|source| PatchError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            tracing::info!(path = %path.display(), mode = %self.mode, "wrote patched document");
            outcomes.push(PatchOutcome::Patched {
                path: path.to_path_buf(),
            });
        }

        Ok(outcomes)
    }
}

impl fmt::Display for Patch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Patch pattern={:?} text={:?} text_file={:?} mode={} global={}",
            self.pattern.as_str(),
            self.text,
            self.text_file,
            self.mode,
            self.scope.is_global()
        )
    }
}
