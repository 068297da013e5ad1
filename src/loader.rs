//! Template loaders.
//!
//! A loader resolves a template name to source text. The environment
//! consults its loaders in order and caches compiled templates by name.

use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;

use crate::error::{Error, Result};

/// Source text resolved by a loader.
#[derive(Debug, Clone)]
pub struct TemplateSource {
    pub source: String,
    pub name: String,
    /// Filesystem origin, when there is one.
    pub path: Option<PathBuf>,
}

/// Resolves template names to source text.
pub trait Loader {
    /// Returns the source for `name`, or `None` when this loader does
    /// not know it.
    fn get_source(&self, name: &str) -> Result<Option<TemplateSource>>;
}

/// An in-memory name → source map.
#[derive(Debug, Default)]
pub struct MemoryLoader {
    templates: FxHashMap<String, String>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, source: impl Into<String>) -> &mut Self {
        self.templates.insert(name.into(), source.into());
        self
    }
}

impl Loader for MemoryLoader {
    fn get_source(&self, name: &str) -> Result<Option<TemplateSource>> {
        Ok(self.templates.get(name).map(|source| TemplateSource {
            source: source.clone(),
            name: name.to_string(),
            path: None,
        }))
    }
}

/// Loads templates from one or more search directories.
#[derive(Debug)]
pub struct FileSystemLoader {
    search_paths: Vec<PathBuf>,
}

impl FileSystemLoader {
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Self { search_paths }
    }

    pub fn single(path: impl AsRef<Path>) -> Self {
        Self::new(vec![path.as_ref().to_path_buf()])
    }
}

impl Loader for FileSystemLoader {
    fn get_source(&self, name: &str) -> Result<Option<TemplateSource>> {
        // Reject names that escape the search roots. Absolute names must
        // be refused too: `Path::join` discards the root for them.
        let path = Path::new(name);
        if path.is_absolute()
            || path.components().any(|c| {
                matches!(
                    c,
                    std::path::Component::ParentDir
                        | std::path::Component::RootDir
                        | std::path::Component::Prefix(_)
                )
            })
        {
            return Ok(None);
        }
        for root in &self.search_paths {
            let candidate = root.join(name);
            if candidate.is_file() {
                tracing::trace!(name, path = %candidate.display(), "loading template");
                let source = std::fs::read_to_string(&candidate).map_err(|e| {
                    Error::io(format!("cannot read {}: {}", candidate.display(), e))
                })?;
                return Ok(Some(TemplateSource {
                    source,
                    name: name.to_string(),
                    path: Some(candidate),
                }));
            }
        }
        Ok(None)
    }
}
