use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use super::response::ResponseValue;

/// Identity of one placed block. Content equality never implies identity
/// equality; template expansion relies on this to avoid aliasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockId(pub Uuid);

impl BlockId {
    pub fn fresh() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Malformed authored content. Stored per block and rendered inline; it
/// never aborts a page.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AuthoringError {
    #[error("block is not an object")]
    NotAnObject,
    #[error("block has no `type` tag")]
    MissingTag,
    #[error("unknown block type `{0}`")]
    UnknownTag(String),
    #[error("{tag}: {message}")]
    InvalidField { tag: String, message: String },
    #[error("{tag}: {message}")]
    Constraint { tag: String, message: String },
    #[error("block type cannot change from `{from}` to `{to}`")]
    TagChanged { from: String, to: String },
    #[error("conditional blocks nested deeper than {0}")]
    NestingTooDeep(usize),
    #[error("page `{0}` has no blocks")]
    EmptyPage(String),
}

/// The closed set of block kinds, in palette order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Heading,
    Paragraph,
    Story,
    Quote,
    Divider,
    Image,
    Callout,
    List,
    Prompt,
    ScaleQuestions,
    YesNoCheck,
    TaskPlan,
    Checklist,
    Scripts,
    Cta,
    Button,
    Conditional,
    Variable,
    FrameworkIntro,
    FrameworkLetter,
}

impl BlockKind {
    pub const ALL: [BlockKind; 20] = [
        Self::Heading,
        Self::Paragraph,
        Self::Story,
        Self::Quote,
        Self::Divider,
        Self::Image,
        Self::Callout,
        Self::List,
        Self::Prompt,
        Self::ScaleQuestions,
        Self::YesNoCheck,
        Self::TaskPlan,
        Self::Checklist,
        Self::Scripts,
        Self::Cta,
        Self::Button,
        Self::Conditional,
        Self::Variable,
        Self::FrameworkIntro,
        Self::FrameworkLetter,
    ];

    /// The wire tag used in authored JSON (`"type": "..."`).
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Heading => "heading",
            Self::Paragraph => "paragraph",
            Self::Story => "story",
            Self::Quote => "quote",
            Self::Divider => "divider",
            Self::Image => "image",
            Self::Callout => "callout",
            Self::List => "list",
            Self::Prompt => "prompt",
            Self::ScaleQuestions => "scale_questions",
            Self::YesNoCheck => "yes_no_check",
            Self::TaskPlan => "task_plan",
            Self::Checklist => "checklist",
            Self::Scripts => "scripts",
            Self::Cta => "cta",
            Self::Button => "button",
            Self::Conditional => "conditional",
            Self::Variable => "variable",
            Self::FrameworkIntro => "framework_intro",
            Self::FrameworkLetter => "framework_letter",
        }
    }

    pub fn from_tag(tag: &str) -> Option<BlockKind> {
        Self::ALL.iter().copied().find(|k| k.tag() == tag)
    }

    pub fn is_interactive(&self) -> bool {
        matches!(
            self,
            Self::Prompt | Self::ScaleQuestions | Self::YesNoCheck | Self::Checklist
        )
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadingBlock {
    pub level: u8,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParagraphBlock {
    pub text: String,
}

/// Narrative passage, optionally attributed to a character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryBlock {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteBlock {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageBlock {
    pub src: String,
    pub alt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalloutVariant {
    Science,
    Tip,
    Warning,
    Example,
    Truth,
    Research,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalloutBlock {
    pub variant: CalloutVariant,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListStyle {
    Bullets,
    Numbers,
    Checkmarks,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListBlock {
    pub style: ListStyle,
    pub items: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    Text,
    Textarea,
    Number,
    Select,
    Multiselect,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptValidation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptBlock {
    /// Stable prompt key, e.g. `ch1_screentime_daily`.
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input: InputKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<PromptValidation>,
}

/// One rated question or yes/no statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scale {
    pub min: i64,
    pub max: i64,
    pub min_label: String,
    pub max_label: String,
}

/// A closed interval `[lo, hi]` with a label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBand {
    pub range: (i64, i64),
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl ScoreBand {
    pub fn lo(&self) -> i64 {
        self.range.0
    }

    pub fn hi(&self) -> i64 {
        self.range.1
    }

    pub fn contains(&self, total: i64) -> bool {
        total >= self.lo() && total <= self.hi()
    }

    pub fn overlaps(&self, other: &ScoreBand) -> bool {
        self.lo() <= other.hi() && other.lo() <= self.hi()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scoring {
    pub bands: Vec<ScoreBand>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleQuestionsBlock {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub questions: Vec<Question>,
    pub scale: Scale,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scoring: Option<Scoring>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YesNoCheckBlock {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub statements: Vec<Question>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scoring: Option<Scoring>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedTask {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub week: Option<u32>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPlanBlock {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    pub tasks: Vec<PlannedTask>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub checked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChecklistBlock {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub items: Vec<ChecklistItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub id: String,
    pub title: String,
    /// Audience, e.g. "to a friend".
    pub target: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptsBlock {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub scripts: Vec<Script>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CtaVariant {
    Primary,
    Secondary,
    Emphasis,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CtaBlock {
    pub title: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<CtaVariant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonVariant {
    Primary,
    Secondary,
    Outline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ButtonBlock {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<ButtonVariant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    Contains,
    InRange,
}

/// A test against one prompt's response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub prompt_id: String,
    pub operator: Operator,
    pub value: ResponseValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalBlock {
    pub condition: Condition,
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableBlock {
    /// Text with `{{name}}` placeholders.
    pub template: String,
    /// Placeholder name to prompt id.
    pub variables: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LetterMeaning {
    pub letter: String,
    pub meaning: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameworkIntroBlock {
    pub framework_code: String,
    pub title: String,
    pub description: String,
    pub letters: Vec<LetterMeaning>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameworkLetterBlock {
    pub letter: String,
    pub title: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// One typed content unit. The tag is fixed once authored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Heading(HeadingBlock),
    Paragraph(ParagraphBlock),
    Story(StoryBlock),
    Quote(QuoteBlock),
    Divider,
    Image(ImageBlock),
    Callout(CalloutBlock),
    List(ListBlock),
    Prompt(PromptBlock),
    ScaleQuestions(ScaleQuestionsBlock),
    YesNoCheck(YesNoCheckBlock),
    TaskPlan(TaskPlanBlock),
    Checklist(ChecklistBlock),
    Scripts(ScriptsBlock),
    Cta(CtaBlock),
    Button(ButtonBlock),
    Conditional(ConditionalBlock),
    Variable(VariableBlock),
    FrameworkIntro(FrameworkIntroBlock),
    FrameworkLetter(FrameworkLetterBlock),
}

impl Block {
    pub fn kind(&self) -> BlockKind {
        match self {
            Self::Heading(_) => BlockKind::Heading,
            Self::Paragraph(_) => BlockKind::Paragraph,
            Self::Story(_) => BlockKind::Story,
            Self::Quote(_) => BlockKind::Quote,
            Self::Divider => BlockKind::Divider,
            Self::Image(_) => BlockKind::Image,
            Self::Callout(_) => BlockKind::Callout,
            Self::List(_) => BlockKind::List,
            Self::Prompt(_) => BlockKind::Prompt,
            Self::ScaleQuestions(_) => BlockKind::ScaleQuestions,
            Self::YesNoCheck(_) => BlockKind::YesNoCheck,
            Self::TaskPlan(_) => BlockKind::TaskPlan,
            Self::Checklist(_) => BlockKind::Checklist,
            Self::Scripts(_) => BlockKind::Scripts,
            Self::Cta(_) => BlockKind::Cta,
            Self::Button(_) => BlockKind::Button,
            Self::Conditional(_) => BlockKind::Conditional,
            Self::Variable(_) => BlockKind::Variable,
            Self::FrameworkIntro(_) => BlockKind::FrameworkIntro,
            Self::FrameworkLetter(_) => BlockKind::FrameworkLetter,
        }
    }

    pub fn is_interactive(&self) -> bool {
        self.kind().is_interactive()
    }

    pub fn as_image(&self) -> Option<&ImageBlock> {
        match self {
            Self::Image(image) => Some(image),
            _ => None,
        }
    }

    pub fn as_heading(&self) -> Option<&HeadingBlock> {
        match self {
            Self::Heading(heading) => Some(heading),
            _ => None,
        }
    }
}

/// A block placed on a page. Malformed authored data is kept in place so the
/// page can show a diagnostic where the block would have been.
#[derive(Debug, Clone)]
pub struct PageBlock {
    pub id: BlockId,
    pub block: Result<Block, AuthoringError>,
}

impl PageBlock {
    pub fn new(block: Block) -> Self {
        Self {
            id: BlockId::fresh(),
            block: Ok(block),
        }
    }

    pub fn malformed(error: AuthoringError) -> Self {
        Self {
            id: BlockId::fresh(),
            block: Err(error),
        }
    }

    pub fn valid(&self) -> Option<&Block> {
        self.block.as_ref().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip_through_kind() {
        for kind in BlockKind::ALL {
            assert_eq!(BlockKind::from_tag(kind.tag()), Some(kind));
        }
        assert_eq!(BlockKind::from_tag("carousel"), None);
    }

    #[test]
    fn interactive_kinds() {
        let interactive: Vec<_> = BlockKind::ALL.iter().filter(|k| k.is_interactive()).collect();
        assert_eq!(
            interactive,
            vec![
                &BlockKind::Prompt,
                &BlockKind::ScaleQuestions,
                &BlockKind::YesNoCheck,
                &BlockKind::Checklist
            ]
        );
    }

    #[test]
    fn serializes_with_type_tag() {
        let block = Block::Heading(HeadingBlock {
            level: 2,
            text: "P — Plan Your Move".to_string(),
        });
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["type"], "heading");
        assert_eq!(json["level"], 2);
        assert_eq!(serde_json::to_value(Block::Divider).unwrap()["type"], "divider");
    }

    #[test]
    fn camel_case_fields() {
        let json = serde_json::json!({
            "type": "conditional",
            "condition": { "promptId": "q1", "operator": "in_range", "value": [1, 7] },
            "blocks": [{ "type": "paragraph", "text": "shown" }]
        });
        let block: Block = serde_json::from_value(json).unwrap();
        match block {
            Block::Conditional(c) => {
                assert_eq!(c.condition.prompt_id, "q1");
                assert_eq!(c.condition.operator, Operator::InRange);
                assert_eq!(c.blocks.len(), 1);
            }
            other => panic!("unexpected block {:?}", other),
        }
    }

    #[test]
    fn band_interval_is_closed() {
        let band = ScoreBand {
            range: (10, 15),
            label: "Medium".to_string(),
            description: None,
            color: None,
        };
        assert!(band.contains(10));
        assert!(band.contains(15));
        assert!(!band.contains(9));
        assert!(!band.contains(16));
    }

    #[test]
    fn fresh_ids_differ() {
        assert_ne!(BlockId::fresh(), BlockId::fresh());
    }
}
