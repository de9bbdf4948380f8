//! WASM bindings for chapter-engine: the authoring editor and the in-browser
//! reader. Everything crosses the boundary as JSON strings.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use wasm_bindgen::prelude::*;

use chapter_engine::core::autosave::ManualClock;
use chapter_engine::core::condition::evaluate;
use chapter_engine::core::config::EngineConfig;
use chapter_engine::core::pipeline::ChapterEngine;
use chapter_engine::core::registry::PaletteCategory;
use chapter_engine::core::render::UserInput;
use chapter_engine::core::scoring::{summarize_scale, summarize_yes_no};
use chapter_engine::core::session::{Navigation, StepExit, StepSession};
use chapter_engine::core::source::hydrate_pages;
use chapter_engine::schema::block::{Block, Condition, PageBlock};
use chapter_engine::schema::content::{ChapterBundle, RawPage};
use chapter_engine::schema::effect::{Effect, EffectId, EffectSink};
use chapter_engine::schema::response::ResponseMap;

// ---------------------------------------------------------------------------
// JSON helper types for communication across the WASM boundary
// ---------------------------------------------------------------------------
#[derive(serde::Serialize)]
struct ExpandedBlock {
    id: String,
    #[serde(flatten)]
    block: Block,
}

#[derive(serde::Serialize)]
struct PendingEffect {
    id: EffectId,
    #[serde(flatten)]
    effect: Effect,
}

#[derive(serde::Serialize)]
struct CompletionInfo {
    next_step: Option<String>,
    chapter_complete: bool,
    assessment: Option<EffectId>,
    section: EffectId,
}

fn js_err(context: &str, e: impl std::fmt::Display) -> JsError {
    JsError::new(&format!("{context}: {e}"))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, JsError> {
    serde_json::to_string(value).map_err(|e| js_err("Serialization error", e))
}

fn parse_responses(json: &str) -> Result<ResponseMap, JsError> {
    if json.trim().is_empty() {
        return Ok(ResponseMap::new());
    }
    serde_json::from_str(json).map_err(|e| js_err("Invalid responses JSON", e))
}

fn expanded(blocks: Vec<PageBlock>) -> Vec<ExpandedBlock> {
    blocks
        .into_iter()
        .filter_map(|placed| {
            let id = placed.id.to_string();
            placed.block.ok().map(|block| ExpandedBlock { id, block })
        })
        .collect()
}

/// Effects collected for JS to deliver; the browser owns the network.
#[derive(Default)]
struct Outbox(Mutex<Vec<PendingEffect>>);

impl EffectSink for Outbox {
    fn enqueue(&self, effect: Effect) -> EffectId {
        let id = EffectId::fresh();
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(PendingEffect { id, effect });
        id
    }
}

// ---------------------------------------------------------------------------
// ChapterEditor: validation, templates and previews for authoring tools
// ---------------------------------------------------------------------------
#[wasm_bindgen]
pub struct ChapterEditor {
    engine: ChapterEngine,
    clock: Arc<ManualClock>,
}

#[wasm_bindgen]
impl ChapterEditor {
    /// Create an editor. `config_ron` may be empty for defaults.
    #[wasm_bindgen(constructor)]
    pub fn new(config_ron: &str) -> Result<ChapterEditor, JsError> {
        let config = if config_ron.trim().is_empty() {
            EngineConfig::default()
        } else {
            EngineConfig::parse_ron(config_ron).map_err(|e| js_err("Config error", e))?
        };
        // `Instant` is unavailable in the browser; JS drives time instead.
        let clock = Arc::new(ManualClock::new());
        let engine = ChapterEngine::builder()
            .with_config(config)
            .with_clock(clock.clone())
            .build()
            .map_err(|e| js_err("Engine build error", e))?;
        Ok(ChapterEditor { engine, clock })
    }

    /// Validate a content array. Returns `{"errors": [...]}`.
    pub fn validate_blocks(&self, content_json: &str) -> Result<String, JsError> {
        let content: serde_json::Value =
            serde_json::from_str(content_json).map_err(|e| js_err("Invalid content JSON", e))?;
        to_json(&self.engine.validate_content(&content))
    }

    /// Render a content array against responses. Returns render nodes.
    pub fn render_blocks(&self, content_json: &str, responses_json: &str) -> Result<String, JsError> {
        let content: Vec<serde_json::Value> =
            serde_json::from_str(content_json).map_err(|e| js_err("Invalid content JSON", e))?;
        let responses = parse_responses(responses_json)?;
        let blocks = self.engine.hydrate(&content);
        to_json(&self.engine.render(&blocks, &responses))
    }

    pub fn evaluate_condition(&self, condition_json: &str, responses_json: &str) -> Result<bool, JsError> {
        let condition: Condition =
            serde_json::from_str(condition_json).map_err(|e| js_err("Invalid condition JSON", e))?;
        Ok(evaluate(&condition, &parse_responses(responses_json)?))
    }

    /// Score one `scale_questions` or `yes_no_check` block.
    pub fn score(&self, block_json: &str, responses_json: &str) -> Result<String, JsError> {
        let raw: serde_json::Value =
            serde_json::from_str(block_json).map_err(|e| js_err("Invalid block JSON", e))?;
        let block = self
            .engine
            .registry()
            .parse_block(&raw)
            .map_err(|e| js_err("Invalid block", e))?;
        let responses = parse_responses(responses_json)?;
        match &block {
            Block::ScaleQuestions(set) => to_json(&summarize_scale(set, &responses)),
            Block::YesNoCheck(set) => to_json(&summarize_yes_no(set, &responses)),
            other => Err(JsError::new(&format!(
                "Block `{}` has no score",
                other.kind().tag()
            ))),
        }
    }

    /// Return JSON array of templates.
    pub fn templates(&self) -> Result<String, JsError> {
        let mut templates: Vec<_> = self
            .engine
            .templates()
            .keys()
            .filter_map(|k| self.engine.templates().get(k))
            .collect();
        templates.sort_by(|a, b| a.key.cmp(&b.key));
        to_json(&templates)
    }

    /// Expand a template into fresh blocks, each with its own id.
    pub fn expand_template(&self, key: &str, customizations_json: &str) -> Result<String, JsError> {
        let blocks = if customizations_json.trim().is_empty() {
            self.engine.expand(key)
        } else {
            let custom = serde_json::from_str(customizations_json)
                .map_err(|e| js_err("Invalid customizations JSON", e))?;
            self.engine.expand_customized(key, &custom)
        }
        .map_err(|e| js_err("Template error", e))?;
        to_json(&expanded(blocks))
    }

    /// Return the block palette grouped by category.
    pub fn palette(&self) -> Result<String, JsError> {
        let registry = self.engine.registry();
        let groups: Vec<_> = [
            PaletteCategory::Text,
            PaletteCategory::Visual,
            PaletteCategory::Interactive,
            PaletteCategory::Planning,
            PaletteCategory::Action,
            PaletteCategory::Logic,
        ]
        .into_iter()
        .map(|category| (category, registry.kinds_in(category)))
        .collect();
        to_json(&groups)
    }

    /// Open a reading session. `pages_json` holds the step's raw page rows.
    pub fn open_step(
        &self,
        bundle_json: &str,
        pages_json: &str,
        step_slug: &str,
    ) -> Result<ReaderSession, JsError> {
        let bundle: ChapterBundle =
            serde_json::from_str(bundle_json).map_err(|e| js_err("Invalid chapter JSON", e))?;
        let rows: Vec<RawPage> =
            serde_json::from_str(pages_json).map_err(|e| js_err("Invalid pages JSON", e))?;
        let pages = hydrate_pages(self.engine.registry(), rows);
        let outbox = Arc::new(Outbox::default());
        let session = self
            .engine
            .open_step(bundle, step_slug, pages, outbox.clone())
            .map_err(|e| js_err("Session error", e))?;
        Ok(ReaderSession {
            session,
            outbox,
            clock: self.clock.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// ReaderSession: one reader working through one step
// ---------------------------------------------------------------------------
#[wasm_bindgen]
pub struct ReaderSession {
    session: StepSession,
    outbox: Arc<Outbox>,
    clock: Arc<ManualClock>,
}

#[wasm_bindgen]
impl ReaderSession {
    /// Current page presentation as JSON.
    pub fn present(&self) -> Result<String, JsError> {
        to_json(&self.session.present())
    }

    /// Seed answers saved in an earlier visit.
    pub fn restore(&mut self, responses_json: &str) -> Result<(), JsError> {
        self.session.restore_responses(parse_responses(responses_json)?);
        Ok(())
    }

    /// Apply `{"input": "...", "value": ...}` to the block `target`.
    pub fn respond(&mut self, target: &str, input_json: &str) -> Result<(), JsError> {
        let input: UserInput =
            serde_json::from_str(input_json).map_err(|e| js_err("Invalid input JSON", e))?;
        self.session
            .respond(target, input)
            .map_err(|e| js_err("Input rejected", e))
    }

    /// Advance time by `elapsed_ms` and save answers that went quiet.
    pub fn tick(&mut self, elapsed_ms: u32) -> usize {
        self.clock.advance(Duration::from_millis(u64::from(elapsed_ms)));
        self.session.tick()
    }

    /// Returns false when already on the last page.
    pub fn next(&mut self) -> bool {
        self.session.next() == Navigation::Moved
    }

    pub fn previous(&mut self) -> bool {
        self.session.previous() == Navigation::Moved
    }

    pub fn complete(&mut self) -> Result<String, JsError> {
        let completion = self.session.complete();
        let (next_step, chapter_complete) = match completion.exit {
            StepExit::Next(step) => (Some(step.slug), false),
            StepExit::ChapterComplete => (None, true),
        };
        to_json(&CompletionInfo {
            next_step,
            chapter_complete,
            assessment: completion.assessment,
            section: completion.section,
        })
    }

    /// Take every effect produced so far, in order, for JS to deliver.
    pub fn drain_effects(&self) -> Result<String, JsError> {
        let effects =
            std::mem::take(&mut *self.outbox.0.lock().unwrap_or_else(PoisonError::into_inner));
        to_json(&effects)
    }
}
