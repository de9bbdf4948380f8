/// Step reading session — page navigation, response collection and the
/// effects a reader's progress produces.
///
/// The session never talks to the backend. Every write goes through the
/// injected [`EffectSink`], usually a `WriteQueue`.
use rustc_hash::FxHashSet;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

use super::autosave::{AutosaveBuffer, Clock};
use super::condition::evaluate;
use super::render::{render_page, respond, InputError, RenderNode, UserInput};
use super::sequence::{
    framework_letters, letter_progress, next_step, resolve_hero, show_page_title, HeroImage,
    HeroSource, LetterProgress, NextStep, PageLayout,
};
use crate::schema::block::{Block, InputKind};
use crate::schema::content::{Chapter, ChapterBundle, Page, PageId, Step, StepKind};
use crate::schema::effect::{AssessmentKind, Effect, EffectId, EffectSink};
use crate::schema::response::{ResponseMap, ResponseValue};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("step not found: {0}")]
    StepNotFound(String),
    #[error("step `{0}` has no pages")]
    NoPages(String),
    #[error("no interactive block `{0}` on this page")]
    UnknownTarget(String),
    #[error("invalid input: {0}")]
    Input(#[from] InputError),
    #[error("content error: {0}")]
    Content(#[from] super::source::ContentError),
}

/// Everything a view needs to draw the current page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PagePresentation {
    pub page_id: PageId,
    /// `None` when the body already opens with a heading.
    pub title: Option<String>,
    pub hero: HeroImage,
    pub letters: Option<LetterProgress>,
    pub nodes: Vec<RenderNode>,
    /// One-based.
    pub page_number: usize,
    pub page_count: usize,
    pub progress_percent: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Navigation {
    Moved,
    /// Already at the first or last page.
    AtEdge,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepExit {
    Next(Step),
    ChapterComplete,
}

/// Result of finishing a step.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub exit: StepExit,
    pub assessment: Option<EffectId>,
    pub section: EffectId,
}

/// One reader working through one step.
pub struct StepSession {
    chapter: Chapter,
    steps: Vec<Step>,
    step: Step,
    pages: Vec<Page>,
    letters: Vec<char>,
    index: usize,
    responses: ResponseMap,
    completed_pages: FxHashSet<PageId>,
    autosave: AutosaveBuffer,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn EffectSink>,
    placeholder_image: String,
}

impl StepSession {
    pub(crate) fn new(
        bundle: ChapterBundle,
        step_slug: &str,
        pages: Vec<Page>,
        autosave: AutosaveBuffer,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn EffectSink>,
        placeholder_image: String,
    ) -> Result<StepSession, SessionError> {
        let step = bundle
            .step_by_slug(step_slug)
            .cloned()
            .ok_or_else(|| SessionError::StepNotFound(step_slug.to_string()))?;
        if pages.is_empty() {
            return Err(SessionError::NoPages(step.slug));
        }
        let letters = framework_letters(&bundle.chapter, &pages);
        tracing::debug!(step = %step.slug, pages = pages.len(), letters = letters.len(), "step session opened");

        Ok(StepSession {
            chapter: bundle.chapter,
            steps: bundle.steps,
            step,
            pages,
            letters,
            index: 0,
            responses: ResponseMap::new(),
            completed_pages: FxHashSet::default(),
            autosave,
            clock,
            sink,
            placeholder_image,
        })
    }

    pub fn step(&self) -> &Step {
        &self.step
    }

    pub fn current_page(&self) -> &Page {
        &self.pages[self.index]
    }

    pub fn page_index(&self) -> usize {
        self.index
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn responses(&self) -> &ResponseMap {
        &self.responses
    }

    /// Seed previously saved answers. Nothing is enqueued.
    pub fn restore_responses(&mut self, saved: ResponseMap) {
        for (id, value) in saved.iter() {
            self.responses.set(id.clone(), value.clone());
        }
    }

    pub fn is_page_completed(&self, page: &PageId) -> bool {
        self.completed_pages.contains(page)
    }

    /// Derive the current page's presentation.
    pub fn present(&self) -> PagePresentation {
        let page = self.current_page();
        let layout = resolve_hero(
            &self.chapter,
            &self.step,
            &self.pages,
            self.index,
            &self.placeholder_image,
        );
        let PageLayout { hero, body } = layout.unwrap_or_else(|| PageLayout {
            hero: HeroImage {
                src: self.placeholder_image.clone(),
                alt: self.step.title.clone(),
                source: HeroSource::Placeholder,
            },
            body: page.blocks.clone(),
        });
        let title = show_page_title(&body)
            .then(|| page.title.clone())
            .flatten();

        PagePresentation {
            page_id: page.id.clone(),
            title,
            hero,
            letters: letter_progress(&self.letters, page),
            nodes: render_page(&body, &self.responses),
            page_number: self.index + 1,
            page_count: self.pages.len(),
            progress_percent: ((self.index + 1) * 100 / self.pages.len()) as u8,
        }
    }

    /// Apply reader input to the interactive block `target` (a prompt id,
    /// question-set id or checklist id) on the current page.
    pub fn respond(&mut self, target: &str, input: UserInput) -> Result<(), SessionError> {
        let block = find_target(self.current_page(), target, &self.responses)
            .cloned()
            .ok_or_else(|| SessionError::UnknownTarget(target.to_string()))?;

        let mut changes = Vec::new();
        respond(&block, input, &self.responses, &mut |id: &str, value: ResponseValue| {
            changes.push((id.to_string(), value))
        })?;

        let now = self.clock.now();
        for (id, value) in changes {
            self.responses.set(id.clone(), value.clone());
            match &block {
                Block::Prompt(p) if matches!(p.input, InputKind::Text | InputKind::Textarea) => {
                    self.autosave.record(&id, value, now);
                }
                Block::Prompt(_) | Block::Checklist(_) => {
                    self.save_answer(id, value);
                }
                // Ratings and yes/no answers travel with the assessment.
                _ => {}
            }
        }
        Ok(())
    }

    /// Save text answers that have been quiet long enough. Returns how many
    /// were enqueued.
    pub fn tick(&mut self) -> usize {
        let due = self.autosave.take_due(self.clock.now());
        let count = due.len();
        for (id, value) in due {
            self.save_answer(id, value);
        }
        count
    }

    /// Complete the current page and move forward.
    pub fn next(&mut self) -> Navigation {
        self.flush_autosave();
        self.complete_current_page();
        if self.index + 1 >= self.pages.len() {
            return Navigation::AtEdge;
        }
        self.index += 1;
        Navigation::Moved
    }

    pub fn previous(&mut self) -> Navigation {
        self.flush_autosave();
        if self.index == 0 {
            return Navigation::AtEdge;
        }
        self.index -= 1;
        Navigation::Moved
    }

    /// Finish the step: complete the last page, submit the baseline
    /// assessment for self-check steps, then complete the section.
    pub fn complete(&mut self) -> Completion {
        self.flush_autosave();
        self.index = self.pages.len() - 1;
        self.complete_current_page();

        let assessment = (self.step.kind == StepKind::SelfCheck).then(|| {
            let total = numeric_total(&self.responses);
            tracing::info!(chapter = %self.chapter.id, total, "submitting baseline assessment");
            self.sink.enqueue(Effect::SubmitAssessment {
                chapter_id: self.chapter.id.clone(),
                kind: AssessmentKind::Baseline,
                responses: self.responses.clone(),
                total,
            })
        });

        let section = self.sink.enqueue(Effect::CompleteSection {
            chapter_id: self.chapter.id.clone(),
            step_kind: self.step.kind,
        });

        let exit = match next_step(&self.steps, self.step.order_index) {
            NextStep::Step(step) => StepExit::Next(step.clone()),
            NextStep::ChapterComplete => StepExit::ChapterComplete,
        };
        tracing::info!(step = %self.step.slug, ?exit, "step completed");

        Completion {
            exit,
            assessment,
            section,
        }
    }

    fn complete_current_page(&mut self) {
        let page = &self.pages[self.index];
        if !self.completed_pages.insert(page.id.clone()) {
            return;
        }
        self.sink.enqueue(Effect::CompletePage {
            chapter_id: self.chapter.id.clone(),
            step_id: self.step.id.clone(),
            page_id: page.id.clone(),
            step_kind: self.step.kind,
        });
    }

    fn flush_autosave(&mut self) {
        for (id, value) in self.autosave.flush() {
            self.save_answer(id, value);
        }
    }

    fn save_answer(&self, prompt_key: String, answer: ResponseValue) {
        self.sink.enqueue(Effect::SavePromptAnswer {
            prompt_key,
            chapter_id: self.chapter.id.clone(),
            step_id: self.step.id.clone(),
            page_id: self.current_page().id.clone(),
            answer,
        });
    }
}

/// Sum of every numeric answer, rounded.
fn numeric_total(responses: &ResponseMap) -> i64 {
    let sum: f64 = responses
        .iter()
        .filter_map(|(_, value)| match value {
            ResponseValue::Number(n) if n.is_finite() => Some(*n),
            _ => None,
        })
        .sum();
    sum.round() as i64
}

/// The visible interactive block whose id is `target`.
fn find_target<'a>(page: &'a Page, target: &str, responses: &ResponseMap) -> Option<&'a Block> {
    fn search<'a>(blocks: impl Iterator<Item = &'a Block>, target: &str, responses: &ResponseMap) -> Option<&'a Block> {
        for block in blocks {
            let found = match block {
                Block::Prompt(p) if p.id == target => Some(block),
                Block::ScaleQuestions(s) if s.id == target => Some(block),
                Block::YesNoCheck(s) if s.id == target => Some(block),
                Block::Checklist(c) if c.id == target => Some(block),
                Block::Conditional(c) if evaluate(&c.condition, responses) => {
                    search(c.blocks.iter(), target, responses)
                }
                _ => None,
            };
            if found.is_some() {
                return found;
            }
        }
        None
    }
    search(page.blocks.iter().filter_map(|b| b.valid()), target, responses)
}
