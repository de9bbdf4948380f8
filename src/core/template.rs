/// Template catalog — named, versioned block sequences and their expansion
/// into fresh page blocks.
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

use super::registry::BlockRegistry;
use crate::schema::block::{AuthoringError, Block, PageBlock};

/// The catalog that ships with the engine.
const BUILTIN_TEMPLATES: &str = include_str!("../../content/templates.json");

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template not found: {0}")]
    NotFound(String),
    #[error("template `{key}` block {index}: {source}")]
    Authoring {
        key: String,
        index: usize,
        #[source]
        source: AuthoringError,
    },
    #[error("template `{0}` is defined twice")]
    DuplicateKey(String),
    #[error("template `{key}` has no block {index} to customize")]
    OverrideOutOfRange { key: String, index: usize },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TemplateCategory {
    YourTurn,
    Reading,
    Framework,
    Assessment,
}

/// A reusable block sequence, not yet bound to any page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentTemplate {
    pub key: String,
    pub name: String,
    pub description: String,
    pub category: TemplateCategory,
    pub version: u32,
    pub blocks: Vec<Block>,
}

// Catalog files carry raw blocks so each one goes through the registry.
#[derive(Debug, Deserialize)]
struct RawTemplate {
    key: String,
    name: String,
    #[serde(default)]
    description: String,
    category: TemplateCategory,
    #[serde(default = "first_version")]
    version: u32,
    blocks: Vec<Value>,
}

fn first_version() -> u32 {
    1
}

/// Per-block field overrides, keyed by block index.
pub type Customizations = BTreeMap<usize, Map<String, Value>>;

/// Templates keyed by their lookup key, in authored order.
#[derive(Debug, Clone, Default)]
pub struct TemplateCatalog {
    templates: FxHashMap<String, ContentTemplate>,
    order: Vec<String>,
}

impl TemplateCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// The embedded catalog.
    pub fn builtin(registry: &BlockRegistry) -> Result<TemplateCatalog, TemplateError> {
        Self::parse_json(BUILTIN_TEMPLATES, registry)
    }

    /// Load a catalog from a JSON file.
    pub fn load_from_json(
        path: &Path,
        registry: &BlockRegistry,
    ) -> Result<TemplateCatalog, TemplateError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_json(&contents, registry)
    }

    /// Parse a catalog from a JSON array of templates. Every block must
    /// validate; a malformed template rejects the whole catalog.
    pub fn parse_json(
        input: &str,
        registry: &BlockRegistry,
    ) -> Result<TemplateCatalog, TemplateError> {
        let raw: Vec<RawTemplate> = serde_json::from_str(input)?;
        let mut catalog = TemplateCatalog::new();

        for template in raw {
            if catalog.templates.contains_key(&template.key) {
                return Err(TemplateError::DuplicateKey(template.key));
            }
            let mut blocks = Vec::with_capacity(template.blocks.len());
            for (index, value) in template.blocks.iter().enumerate() {
                let block = registry
                    .parse_block(value)
                    .map_err(|source| TemplateError::Authoring {
                        key: template.key.clone(),
                        index,
                        source,
                    })?;
                blocks.push(block);
            }
            catalog.register(ContentTemplate {
                key: template.key,
                name: template.name,
                description: template.description,
                category: template.category,
                version: template.version,
                blocks,
            });
        }

        Ok(catalog)
    }

    /// Add or replace a template.
    pub fn register(&mut self, template: ContentTemplate) {
        if !self.templates.contains_key(&template.key) {
            self.order.push(template.key.clone());
        }
        self.templates.insert(template.key.clone(), template);
    }

    /// Merge another catalog into this one. Templates from `other`
    /// override templates in `self` with the same key.
    pub fn merge(&mut self, other: TemplateCatalog) {
        let TemplateCatalog { mut templates, order } = other;
        for key in order {
            if let Some(template) = templates.remove(&key) {
                self.register(template);
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&ContentTemplate> {
        self.templates.get(key)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn templates_by_category(&self, category: TemplateCategory) -> Vec<&ContentTemplate> {
        self.order
            .iter()
            .filter_map(|key| self.templates.get(key))
            .filter(|t| t.category == category)
            .collect()
    }

    /// Materialize a template as fresh page blocks. The result owns deep
    /// copies with new identities; editing it never touches the catalog.
    pub fn expand(&self, key: &str) -> Result<Vec<PageBlock>, TemplateError> {
        let template = self
            .get(key)
            .ok_or_else(|| TemplateError::NotFound(key.to_string()))?;
        tracing::debug!(key, version = template.version, blocks = template.blocks.len(), "expanding template");
        Ok(template.blocks.iter().cloned().map(PageBlock::new).collect())
    }

    /// Expand with per-index field overrides, re-validating each touched
    /// block. An override may not change a block's `type`.
    pub fn expand_customized(
        &self,
        key: &str,
        customizations: &Customizations,
        registry: &BlockRegistry,
    ) -> Result<Vec<PageBlock>, TemplateError> {
        let template = self
            .get(key)
            .ok_or_else(|| TemplateError::NotFound(key.to_string()))?;

        if let Some((&index, _)) = customizations
            .iter()
            .find(|(index, _)| **index >= template.blocks.len())
        {
            return Err(TemplateError::OverrideOutOfRange {
                key: key.to_string(),
                index,
            });
        }

        let mut expanded = Vec::with_capacity(template.blocks.len());
        for (index, block) in template.blocks.iter().enumerate() {
            let Some(fields) = customizations.get(&index) else {
                expanded.push(PageBlock::new(block.clone()));
                continue;
            };
            let authoring = |source| TemplateError::Authoring {
                key: key.to_string(),
                index,
                source,
            };

            let mut value = serde_json::to_value(block)?;
            let original_tag = block.kind().tag();
            if let Some(tag) = fields.get("type") {
                if tag.as_str() != Some(original_tag) {
                    return Err(authoring(AuthoringError::TagChanged {
                        from: original_tag.to_string(),
                        to: tag.to_string(),
                    }));
                }
            }
            if let Value::Object(object) = &mut value {
                for (field, override_value) in fields {
                    object.insert(field.clone(), override_value.clone());
                }
            }
            let customized = registry.parse_block(&value).map_err(authoring)?;
            expanded.push(PageBlock::new(customized));
        }
        Ok(expanded)
    }
}
