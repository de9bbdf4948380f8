/// Render dispatch — turns blocks plus the current responses into view
/// nodes, and validates user input on interactive blocks.
///
/// Rendering is pure. The only outward signal is the response callback
/// passed to [`respond`]; persisting what it reports is the caller's job.
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::condition::{evaluate, render_variable};
use super::scoring::{summarize_scale, summarize_yes_no, ScoreSummary};
use crate::schema::block::{
    AuthoringError, Block, ButtonBlock, CalloutBlock, ChecklistBlock, CtaBlock,
    FrameworkIntroBlock, FrameworkLetterBlock, HeadingBlock, ImageBlock, InputKind, ListBlock,
    PageBlock, ParagraphBlock, PromptBlock, QuoteBlock, Scale, ScaleQuestionsBlock, ScriptsBlock,
    StoryBlock, TaskPlanBlock,
};
use crate::schema::response::{ResponseMap, ResponseValue};

/// Conditionals nested deeper than this render a diagnostic.
const MAX_RENDER_DEPTH: usize = 32;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error(transparent)]
    Authoring(#[from] AuthoringError),
    #[error("{tag}: {message}")]
    Handler { tag: &'static str, message: String },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum InputError {
    #[error("`{0}` blocks do not accept input")]
    NotInteractive(&'static str),
    #[error("{block} expects {expected}")]
    WrongKind {
        block: &'static str,
        expected: &'static str,
    },
    #[error("{value} is outside [{min}, {max}]")]
    OutOfRange { value: f64, min: f64, max: f64 },
    #[error("answer does not match pattern `{0}`")]
    PatternMismatch(String),
    #[error("invalid pattern `{pattern}`: {message}")]
    BadPattern { pattern: String, message: String },
    #[error("`{0}` is not one of the options")]
    UnknownOption(String),
    #[error("no item `{0}` in this block")]
    UnknownItem(String),
}

/// A question and its current rating.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RatedQuestion {
    pub id: String,
    pub text: String,
    pub rating: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnsweredStatement {
    pub id: String,
    pub text: String,
    pub answer: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChecklistItemState {
    pub id: String,
    pub text: String,
    pub checked: bool,
}

/// One rendered unit, ready for a view layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum RenderNode {
    Heading(HeadingBlock),
    Paragraph(ParagraphBlock),
    Story(StoryBlock),
    Quote(QuoteBlock),
    Divider,
    Image(ImageBlock),
    Callout(CalloutBlock),
    List(ListBlock),
    Prompt {
        #[serde(flatten)]
        prompt: PromptBlock,
        value: Option<ResponseValue>,
    },
    ScaleQuestions {
        id: String,
        title: Option<String>,
        description: Option<String>,
        scale: Scale,
        questions: Vec<RatedQuestion>,
        score: ScoreSummary,
    },
    YesNoCheck {
        id: String,
        title: Option<String>,
        statements: Vec<AnsweredStatement>,
        score: ScoreSummary,
    },
    Checklist {
        id: String,
        title: Option<String>,
        items: Vec<ChecklistItemState>,
        completion_percent: u8,
    },
    TaskPlan(TaskPlanBlock),
    Scripts(ScriptsBlock),
    Cta(CtaBlock),
    Button(ButtonBlock),
    /// A conditional whose condition holds.
    Group { children: Vec<RenderNode> },
    /// A conditional whose condition does not (yet) hold.
    Hidden,
    Variable { text: String },
    FrameworkIntro(FrameworkIntroBlock),
    FrameworkLetter(FrameworkLetterBlock),
    /// Shown in place of a block that could not be rendered.
    Diagnostic { tag: Option<String>, message: String },
}

impl RenderNode {
    fn diagnostic(tag: Option<&str>, message: impl Into<String>) -> Self {
        Self::Diagnostic {
            tag: tag.map(str::to_string),
            message: message.into(),
        }
    }
}

/// Render a page body. A failing block becomes a diagnostic in its own
/// position; hidden conditionals are left out.
pub fn render_page(blocks: &[PageBlock], responses: &ResponseMap) -> Vec<RenderNode> {
    blocks
        .iter()
        .map(|placed| {
            let result = match &placed.block {
                Ok(block) => render_block(block, responses),
                Err(e) => Err(RenderError::Authoring(e.clone())),
            };
            result.unwrap_or_else(|e| {
                tracing::warn!(block = %placed.id, error = %e, "block rendered as diagnostic");
                let tag = placed.valid().map(|b| b.kind().tag());
                RenderNode::diagnostic(tag, e.to_string())
            })
        })
        .filter(|node| *node != RenderNode::Hidden)
        .collect()
}

/// Dispatch one block to its handler.
pub fn render_block(block: &Block, responses: &ResponseMap) -> Result<RenderNode, RenderError> {
    render_at_depth(block, responses, 0)
}

fn render_at_depth(
    block: &Block,
    responses: &ResponseMap,
    depth: usize,
) -> Result<RenderNode, RenderError> {
    let node = match block {
        Block::Heading(b) => RenderNode::Heading(b.clone()),
        Block::Paragraph(b) => RenderNode::Paragraph(b.clone()),
        Block::Story(b) => RenderNode::Story(b.clone()),
        Block::Quote(b) => RenderNode::Quote(b.clone()),
        Block::Divider => RenderNode::Divider,
        Block::Image(b) => RenderNode::Image(b.clone()),
        Block::Callout(b) => RenderNode::Callout(b.clone()),
        Block::List(b) => RenderNode::List(b.clone()),
        Block::Prompt(prompt) => RenderNode::Prompt {
            prompt: prompt.clone(),
            value: responses.get(&prompt.id).cloned(),
        },
        Block::ScaleQuestions(set) => render_scale(set, responses)?,
        Block::YesNoCheck(set) => RenderNode::YesNoCheck {
            id: set.id.clone(),
            title: set.title.clone(),
            statements: set
                .statements
                .iter()
                .map(|s| AnsweredStatement {
                    id: s.id.clone(),
                    text: s.text.clone(),
                    answer: responses.get(&s.id).and_then(ResponseValue::as_bool),
                })
                .collect(),
            score: summarize_yes_no(set, responses),
        },
        Block::Checklist(list) => {
            let checked = checked_ids(list, responses);
            let items: Vec<ChecklistItemState> = list
                .items
                .iter()
                .map(|item| ChecklistItemState {
                    id: item.id.clone(),
                    text: item.text.clone(),
                    checked: checked.contains(&item.id),
                })
                .collect();
            let done = items.iter().filter(|i| i.checked).count();
            let completion_percent = if items.is_empty() {
                0
            } else {
                (done * 100 / items.len()) as u8
            };
            RenderNode::Checklist {
                id: list.id.clone(),
                title: list.title.clone(),
                items,
                completion_percent,
            }
        }
        Block::TaskPlan(b) => RenderNode::TaskPlan(b.clone()),
        Block::Scripts(b) => RenderNode::Scripts(b.clone()),
        Block::Cta(b) => RenderNode::Cta(b.clone()),
        Block::Button(b) => RenderNode::Button(b.clone()),
        Block::Conditional(conditional) => {
            if depth >= MAX_RENDER_DEPTH {
                return Err(RenderError::Handler {
                    tag: "conditional",
                    message: format!("nested deeper than {}", MAX_RENDER_DEPTH),
                });
            }
            if !evaluate(&conditional.condition, responses) {
                return Ok(RenderNode::Hidden);
            }
            let children = conditional
                .blocks
                .iter()
                .map(|child| {
                    render_at_depth(child, responses, depth + 1).unwrap_or_else(|e| {
                        RenderNode::diagnostic(Some(child.kind().tag()), e.to_string())
                    })
                })
                .filter(|node| *node != RenderNode::Hidden)
                .collect();
            RenderNode::Group { children }
        }
        Block::Variable(variable) => RenderNode::Variable {
            text: render_variable(variable, responses),
        },
        Block::FrameworkIntro(b) => RenderNode::FrameworkIntro(b.clone()),
        Block::FrameworkLetter(b) => RenderNode::FrameworkLetter(b.clone()),
    };
    Ok(node)
}

fn render_scale(set: &ScaleQuestionsBlock, responses: &ResponseMap) -> Result<RenderNode, RenderError> {
    if set.scale.min > set.scale.max {
        return Err(RenderError::Handler {
            tag: "scale_questions",
            message: format!("scale min {} exceeds max {}", set.scale.min, set.scale.max),
        });
    }
    Ok(RenderNode::ScaleQuestions {
        id: set.id.clone(),
        title: set.title.clone(),
        description: set.description.clone(),
        scale: set.scale.clone(),
        questions: set
            .questions
            .iter()
            .map(|q| RatedQuestion {
                id: q.id.clone(),
                text: q.text.clone(),
                rating: responses.get(&q.id).and_then(ResponseValue::as_integer),
            })
            .collect(),
        score: summarize_scale(set, responses),
    })
}

/// Checked item ids in the order they were checked. Authored defaults apply
/// until the reader has touched the checklist.
pub fn checked_ids(list: &ChecklistBlock, responses: &ResponseMap) -> Vec<String> {
    match responses.get(&list.id) {
        Some(value) => value.text_items().into_iter().map(str::to_string).collect(),
        None => list
            .items
            .iter()
            .filter(|i| i.checked)
            .map(|i| i.id.clone())
            .collect(),
    }
}

/// A reader action on an interactive block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "input", content = "value", rename_all = "snake_case")]
pub enum UserInput {
    /// New value for a prompt.
    Answer(ResponseValue),
    Rate { question_id: String, rating: i64 },
    YesNo { statement_id: String, answer: bool },
    /// Check or uncheck a checklist item.
    Toggle { item_id: String },
}

/// Validate `input` against `block` and report the resulting response
/// through `on_change(id, value)`. Nothing is reported on error.
pub fn respond(
    block: &Block,
    input: UserInput,
    responses: &ResponseMap,
    on_change: &mut dyn FnMut(&str, ResponseValue),
) -> Result<(), InputError> {
    match (block, input) {
        (Block::Prompt(prompt), UserInput::Answer(value)) => {
            let value = check_prompt_answer(prompt, value)?;
            on_change(&prompt.id, value);
        }
        (Block::ScaleQuestions(set), UserInput::Rate { question_id, rating }) => {
            if !set.questions.iter().any(|q| q.id == question_id) {
                return Err(InputError::UnknownItem(question_id));
            }
            if rating < set.scale.min || rating > set.scale.max {
                return Err(InputError::OutOfRange {
                    value: rating as f64,
                    min: set.scale.min as f64,
                    max: set.scale.max as f64,
                });
            }
            on_change(&question_id, ResponseValue::from(rating));
        }
        (Block::YesNoCheck(set), UserInput::YesNo { statement_id, answer }) => {
            if !set.statements.iter().any(|s| s.id == statement_id) {
                return Err(InputError::UnknownItem(statement_id));
            }
            on_change(&statement_id, ResponseValue::Bool(answer));
        }
        (Block::Checklist(list), UserInput::Toggle { item_id }) => {
            if !list.items.iter().any(|i| i.id == item_id) {
                return Err(InputError::UnknownItem(item_id));
            }
            let mut checked = checked_ids(list, responses);
            match checked.iter().position(|id| *id == item_id) {
                Some(pos) => {
                    checked.remove(pos);
                }
                None => checked.push(item_id),
            }
            let value = ResponseValue::List(checked.into_iter().map(ResponseValue::Text).collect());
            on_change(&list.id, value);
        }
        (block, input) => {
            let tag = block.kind().tag();
            if !block.is_interactive() {
                return Err(InputError::NotInteractive(tag));
            }
            let expected = match block {
                Block::Prompt(_) => "an answer",
                Block::ScaleQuestions(_) => "a rating",
                Block::YesNoCheck(_) => "a yes/no answer",
                _ => "a toggle",
            };
            tracing::debug!(block = tag, ?input, "input does not fit block");
            return Err(InputError::WrongKind { block: tag, expected });
        }
    }
    Ok(())
}

fn check_prompt_answer(prompt: &PromptBlock, value: ResponseValue) -> Result<ResponseValue, InputError> {
    let wrong = |expected| InputError::WrongKind {
        block: "prompt",
        expected,
    };
    let rules = prompt.validation.clone().unwrap_or_default();

    match prompt.input {
        InputKind::Number => {
            // Numeric text from a text field is normalized to a number.
            let n = value.as_number().ok_or_else(|| wrong("a number"))?;
            let min = rules.min.unwrap_or(f64::NEG_INFINITY);
            let max = rules.max.unwrap_or(f64::INFINITY);
            if n < min || n > max {
                return Err(InputError::OutOfRange { value: n, min, max });
            }
            Ok(ResponseValue::Number(n))
        }
        InputKind::Text | InputKind::Textarea => {
            let text = value.as_text().ok_or_else(|| wrong("text"))?;
            if let Some(pattern) = rules.pattern.as_deref() {
                let re = Regex::new(pattern).map_err(|e| InputError::BadPattern {
                    pattern: pattern.to_string(),
                    message: e.to_string(),
                })?;
                if !text.is_empty() && !re.is_match(text) {
                    return Err(InputError::PatternMismatch(pattern.to_string()));
                }
            }
            Ok(value)
        }
        InputKind::Select => {
            let choice = value.as_text().ok_or_else(|| wrong("one option"))?;
            check_option(prompt, choice)?;
            Ok(value)
        }
        InputKind::Multiselect => {
            let items = value.as_list().ok_or_else(|| wrong("a list of options"))?;
            for item in items {
                let choice = item.as_text().ok_or_else(|| wrong("a list of options"))?;
                check_option(prompt, choice)?;
            }
            Ok(value)
        }
    }
}

fn check_option(prompt: &PromptBlock, choice: &str) -> Result<(), InputError> {
    let known = prompt
        .options
        .as_ref()
        .is_some_and(|options| options.iter().any(|o| o == choice));
    if !known {
        return Err(InputError::UnknownOption(choice.to_string()));
    }
    Ok(())
}
