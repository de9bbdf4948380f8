/// The chapter engine: block registry, template catalog and settings,
/// wired together once at startup.
///
/// Rendering and evaluation are free functions over the schema types; the
/// engine supplies the pieces they need and opens reading sessions.
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::core::autosave::{AutosaveBuffer, Clock, SystemClock};
use crate::core::config::{ConfigError, EngineConfig};
use crate::core::registry::{BlockRegistry, ValidationReport};
use crate::core::render::{render_page, RenderNode};
use crate::core::session::{SessionError, StepSession};
use crate::core::source::ContentSource;
use crate::core::template::{Customizations, TemplateCatalog, TemplateError};
use crate::schema::block::PageBlock;
use crate::schema::content::{ChapterBundle, Page};
use crate::schema::effect::EffectSink;
use crate::schema::response::ResponseMap;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("template error: {0}")]
    Template(#[from] TemplateError),
}

/// The top-level engine. Built via `ChapterEngine::builder()`.
pub struct ChapterEngine {
    registry: BlockRegistry,
    templates: TemplateCatalog,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
}

/// Builder for constructing a `ChapterEngine`.
pub struct ChapterEngineBuilder {
    config_path: Option<PathBuf>,
    templates_path: Option<PathBuf>,
    builtin_templates: bool,
    /// Directly provided config (for testing without files).
    config: Option<EngineConfig>,
    /// Directly provided templates, merged over everything else.
    templates: Option<TemplateCatalog>,
    clock: Option<Arc<dyn Clock>>,
}

impl ChapterEngine {
    pub fn builder() -> ChapterEngineBuilder {
        ChapterEngineBuilder {
            config_path: None,
            templates_path: None,
            builtin_templates: true,
            config: None,
            templates: None,
            clock: None,
        }
    }

    pub fn registry(&self) -> &BlockRegistry {
        &self.registry
    }

    pub fn templates(&self) -> &TemplateCatalog {
        &self.templates
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Validate a raw content array the way an editor would before saving.
    pub fn validate_content(&self, content: &Value) -> ValidationReport {
        self.registry.validate_content(content)
    }

    /// Validate raw blocks into page blocks, keeping failures as diagnostics.
    pub fn hydrate(&self, raw: &[Value]) -> Vec<PageBlock> {
        self.registry.hydrate(raw)
    }

    pub fn expand(&self, key: &str) -> Result<Vec<PageBlock>, TemplateError> {
        self.templates.expand(key)
    }

    pub fn expand_customized(
        &self,
        key: &str,
        customizations: &Customizations,
    ) -> Result<Vec<PageBlock>, TemplateError> {
        self.templates
            .expand_customized(key, customizations, &self.registry)
    }

    pub fn render(&self, blocks: &[PageBlock], responses: &ResponseMap) -> Vec<RenderNode> {
        render_page(blocks, responses)
    }

    /// Open a reading session over already loaded content.
    pub fn open_step(
        &self,
        bundle: ChapterBundle,
        step_slug: &str,
        pages: Vec<Page>,
        sink: Arc<dyn EffectSink>,
    ) -> Result<StepSession, SessionError> {
        StepSession::new(
            bundle,
            step_slug,
            pages,
            AutosaveBuffer::new(self.config.autosave.quiet_period()),
            Arc::clone(&self.clock),
            sink,
            self.config.placeholder_image.clone(),
        )
    }

    /// Load a chapter and one of its steps from `source`, then open a
    /// reading session over it.
    pub async fn load_step(
        &self,
        source: &dyn ContentSource,
        chapter_slug: &str,
        step_slug: &str,
        sink: Arc<dyn EffectSink>,
    ) -> Result<StepSession, SessionError> {
        let bundle = source.load_chapter_bundle(chapter_slug).await?;
        let step_id = bundle
            .step_by_slug(step_slug)
            .map(|s| s.id.clone())
            .ok_or_else(|| SessionError::StepNotFound(step_slug.to_string()))?;
        let pages = source.load_pages(&step_id).await?;
        self.open_step(bundle, step_slug, pages, sink)
    }

    /// Start a write queue using this engine's retry settings.
    #[cfg(feature = "queue")]
    pub fn spawn_queue(
        &self,
        deliver: Arc<dyn crate::core::queue::Deliver>,
    ) -> crate::core::queue::WriteQueue {
        crate::core::queue::WriteQueue::spawn(deliver, self.config.queue.clone())
    }
}

impl ChapterEngineBuilder {
    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn templates_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.templates_path = Some(path.into());
        self
    }

    /// Skip the embedded template catalog.
    pub fn without_builtin_templates(mut self) -> Self {
        self.builtin_templates = false;
        self
    }

    /// Provide config directly (for testing without files).
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Provide templates directly (for testing without files).
    pub fn with_templates(mut self, templates: TemplateCatalog) -> Self {
        self.templates = Some(templates);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<ChapterEngine, EngineError> {
        // A direct value wins over a file.
        let config = match (self.config, &self.config_path) {
            (Some(config), _) => config,
            (None, Some(path)) => EngineConfig::load_from_ron(path)?,
            (None, None) => EngineConfig::default(),
        };
        let registry = BlockRegistry::standard(config.max_conditional_depth);

        let mut templates = if self.builtin_templates {
            TemplateCatalog::builtin(&registry)?
        } else {
            TemplateCatalog::new()
        };
        // Project templates override built-ins.
        if let Some(ref path) = self.templates_path {
            templates.merge(TemplateCatalog::load_from_json(path, &registry)?);
        }
        if let Some(direct) = self.templates {
            templates.merge(direct);
        }
        tracing::debug!(templates = templates.len(), "chapter engine built");

        Ok(ChapterEngine {
            registry,
            templates,
            config,
            clock: self
                .clock
                .unwrap_or_else(|| Arc::new(SystemClock::new())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::template::{ContentTemplate, TemplateCategory};
    use crate::schema::block::{Block, ParagraphBlock};
    use serde_json::json;

    #[test]
    fn default_build_has_builtin_templates() {
        let engine = ChapterEngine::builder().build().unwrap();
        assert!(engine.templates().get("simple_reflection").is_some());
        assert_eq!(engine.config().placeholder_image, "/placeholder.png");
    }

    #[test]
    fn direct_config_wins_over_file() {
        let config = EngineConfig {
            placeholder_image: "/direct.png".to_string(),
            ..EngineConfig::default()
        };
        let engine = ChapterEngine::builder()
            .config_path("config/engine.ron")
            .with_config(config)
            .build()
            .unwrap();
        assert_eq!(engine.config().placeholder_image, "/direct.png");
    }

    #[test]
    fn direct_templates_override_builtins() {
        let mut catalog = TemplateCatalog::new();
        catalog.register(ContentTemplate {
            key: "quick_tips".to_string(),
            name: "Local tips".to_string(),
            description: String::new(),
            category: TemplateCategory::Reading,
            version: 3,
            blocks: vec![Block::Paragraph(ParagraphBlock {
                text: "Local".to_string(),
            })],
        });
        let engine = ChapterEngine::builder().with_templates(catalog).build().unwrap();
        assert_eq!(engine.templates().get("quick_tips").unwrap().version, 3);
        assert_eq!(engine.expand("quick_tips").unwrap().len(), 1);
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let result = ChapterEngine::builder()
            .config_path("config/does_not_exist.ron")
            .build();
        assert!(matches!(result, Err(EngineError::Config(ConfigError::Io(_)))));
    }

    #[test]
    fn depth_setting_reaches_registry() {
        let engine = ChapterEngine::builder()
            .with_config(EngineConfig {
                max_conditional_depth: 1,
                ..EngineConfig::default()
            })
            .without_builtin_templates()
            .build()
            .unwrap();
        let nested = json!([{
            "type": "conditional",
            "condition": {"promptId": "a", "operator": "equals", "value": 1},
            "blocks": [{
                "type": "conditional",
                "condition": {"promptId": "b", "operator": "equals", "value": 1},
                "blocks": []
            }]
        }]);
        assert!(!engine.validate_content(&nested).is_valid());
        assert!(engine.templates().is_empty());
    }
}
