/// Read-side content hydration: chapter bundles and step pages.
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::registry::BlockRegistry;
use crate::schema::block::{AuthoringError, PageBlock};
use crate::schema::content::{ChapterBundle, Page, RawChapterDocument, RawPage, StepId};

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("chapter not found: {0}")]
    ChapterNotFound(String),
    #[error("step not found: {0}")]
    StepNotFound(StepId),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Where chapters and pages come from.
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn load_chapter_bundle(&self, slug: &str) -> Result<ChapterBundle, ContentError>;

    /// Pages of one step, ordered and hydrated.
    async fn load_pages(&self, step_id: &StepId) -> Result<Vec<Page>, ContentError>;
}

/// Validate raw page rows into pages, ordered by `order_index`.
///
/// Pages without blocks are authoring errors and are dropped with a
/// warning. Malformed blocks stay in place as diagnostics.
pub fn hydrate_pages(registry: &BlockRegistry, raw: Vec<RawPage>) -> Vec<Page> {
    let mut pages: Vec<Page> = raw
        .into_iter()
        .filter_map(|row| {
            let blocks = match &row.content {
                Value::Array(items) => registry.hydrate(items),
                _ => vec![PageBlock::malformed(AuthoringError::InvalidField {
                    tag: "page".to_string(),
                    message: "Content must be an array".to_string(),
                })],
            };
            if blocks.is_empty() {
                tracing::warn!(page = %row.id, step = %row.step_id, "{}", AuthoringError::EmptyPage(row.id.0.clone()));
                return None;
            }
            Some(Page {
                id: row.id,
                step_id: row.step_id,
                slug: row.slug,
                title: row.title,
                order_index: row.order_index,
                estimated_minutes: row.estimated_minutes,
                xp_award: row.xp_award,
                blocks,
            })
        })
        .collect();
    pages.sort_by_key(|p| p.order_index);
    pages
}

/// Chapters stored as `<dir>/<slug>.json` documents.
pub struct FileContentSource {
    dir: PathBuf,
    registry: BlockRegistry,
}

impl FileContentSource {
    pub fn new(dir: impl Into<PathBuf>, registry: BlockRegistry) -> Self {
        Self {
            dir: dir.into(),
            registry,
        }
    }

    /// Read one chapter document from disk.
    pub fn read_document(path: &Path) -> Result<RawChapterDocument, ContentError> {
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents).map_err(|source| ContentError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    fn document(&self, slug: &str) -> Result<RawChapterDocument, ContentError> {
        let path = self.dir.join(format!("{}.json", slug));
        if !path.exists() {
            return Err(ContentError::ChapterNotFound(slug.to_string()));
        }
        Self::read_document(&path)
    }

    /// Every readable chapter in the directory. A broken document is
    /// skipped with a warning so it cannot hide its siblings.
    fn documents(&self) -> Result<Vec<RawChapterDocument>, ContentError> {
        let mut documents = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            match Self::read_document(&path) {
                Ok(doc) => documents.push(doc),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable chapter"),
            }
        }
        Ok(documents)
    }
}

#[async_trait]
impl ContentSource for FileContentSource {
    async fn load_chapter_bundle(&self, slug: &str) -> Result<ChapterBundle, ContentError> {
        let doc = self.document(slug)?;
        tracing::debug!(slug, steps = doc.steps.len(), "loaded chapter bundle");
        Ok(ChapterBundle {
            chapter: doc.chapter,
            steps: doc.steps,
        })
    }

    async fn load_pages(&self, step_id: &StepId) -> Result<Vec<Page>, ContentError> {
        let doc = self
            .documents()?
            .into_iter()
            .find(|d| d.steps.iter().any(|s| &s.id == step_id))
            .ok_or_else(|| ContentError::StepNotFound(step_id.clone()))?;
        let rows = doc
            .pages
            .into_iter()
            .filter(|p| &p.step_id == step_id)
            .collect();
        Ok(hydrate_pages(&self.registry, rows))
    }
}
