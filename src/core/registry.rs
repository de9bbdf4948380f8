/// Block registry — the catalog of block kinds and validation of raw
/// authored blocks into typed [`Block`] values.
use regex::Regex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use serde_json::Value;

use crate::schema::block::{
    AuthoringError, Block, BlockKind, ConditionalBlock, InputKind, Operator, PageBlock,
    PromptBlock, Question, ScoreBand, Scoring,
};

/// Palette grouping used by authoring tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaletteCategory {
    Text,
    Visual,
    Interactive,
    Planning,
    Action,
    Logic,
}

/// Metadata for one block kind.
#[derive(Debug, Clone, Serialize)]
pub struct BlockSpec {
    pub kind: BlockKind,
    pub name: &'static str,
    pub description: &'static str,
    pub icon: &'static str,
    pub category: PaletteCategory,
    /// Accepts reader input.
    pub interactive: bool,
}

/// Result of validating a whole content array.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Explicitly constructed lookup table of block kinds. Built once at
/// startup and passed to whatever needs it.
#[derive(Debug, Clone)]
pub struct BlockRegistry {
    specs: FxHashMap<&'static str, BlockSpec>,
    max_conditional_depth: usize,
}

pub const DEFAULT_MAX_CONDITIONAL_DEPTH: usize = 8;

impl Default for BlockRegistry {
    fn default() -> Self {
        Self::standard(DEFAULT_MAX_CONDITIONAL_DEPTH)
    }
}

impl BlockRegistry {
    /// Registry with every built-in kind.
    pub fn standard(max_conditional_depth: usize) -> Self {
        use BlockKind::*;
        use PaletteCategory as C;

        let entries = [
            (Heading, "Heading", "Section title", "type", C::Text),
            (Paragraph, "Paragraph", "Plain text", "align-left", C::Text),
            (Story, "Story", "Narrative dialogue", "message-square", C::Text),
            (Quote, "Quote", "Quotation block", "quote", C::Text),
            (Divider, "Divider", "Visual separator", "minus", C::Text),
            (Image, "Image", "Upload or link image", "image", C::Visual),
            (Callout, "Callout", "Highlighted box", "alert-circle", C::Visual),
            (List, "List", "Bullet or numbered list", "list", C::Visual),
            (FrameworkIntro, "Framework Intro", "Framework overview + letters", "zap", C::Visual),
            (FrameworkLetter, "Framework Letter", "Single framework letter card", "type", C::Visual),
            (Prompt, "Prompt", "User input field", "message-circle", C::Interactive),
            (ScaleQuestions, "Scale Questions", "Rating questions", "bar-chart-3", C::Interactive),
            (YesNoCheck, "Yes/No Check", "Yes/no statements", "check-square", C::Interactive),
            (Checklist, "Checklist", "Checkable items", "list-checks", C::Interactive),
            (TaskPlan, "Task Plan", "Weekly task planner", "calendar", C::Planning),
            (Scripts, "Scripts", "Communication scripts", "file-text", C::Planning),
            (Cta, "Call to Action", "Prominent CTA", "zap", C::Action),
            (Button, "Button", "Action button", "mouse-pointer-click", C::Action),
            (Conditional, "Conditional", "Show blocks when an answer matches", "git-branch", C::Logic),
            (Variable, "Variable Text", "Text filled from earlier answers", "braces", C::Logic),
        ];

        let mut specs = FxHashMap::default();
        for (kind, name, description, icon, category) in entries {
            specs.insert(
                kind.tag(),
                BlockSpec {
                    kind,
                    name,
                    description,
                    icon,
                    category,
                    interactive: kind.is_interactive(),
                },
            );
        }

        Self {
            specs,
            max_conditional_depth,
        }
    }

    pub fn spec(&self, tag: &str) -> Option<&BlockSpec> {
        self.specs.get(tag)
    }

    pub fn kinds_in(&self, category: PaletteCategory) -> Vec<&BlockSpec> {
        let mut specs: Vec<&BlockSpec> = self
            .specs
            .values()
            .filter(|s| s.category == category)
            .collect();
        specs.sort_by_key(|s| BlockKind::ALL.iter().position(|k| *k == s.kind));
        specs
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Validate one raw authored block.
    pub fn parse_block(&self, raw: &Value) -> Result<Block, AuthoringError> {
        self.parse_at_depth(raw, 0)
    }

    /// Validate a raw content array into placed blocks. Malformed entries are
    /// kept as diagnostics in their original position.
    pub fn hydrate(&self, raw: &[Value]) -> Vec<PageBlock> {
        raw.iter()
            .map(|value| match self.parse_block(value) {
                Ok(block) => PageBlock::new(block),
                Err(e) => {
                    tracing::warn!(error = %e, "malformed block kept as diagnostic");
                    PageBlock::malformed(e)
                }
            })
            .collect()
    }

    /// Validate a full content document, collecting one message per bad block.
    pub fn validate_content(&self, content: &Value) -> ValidationReport {
        let Some(items) = content.as_array() else {
            return ValidationReport {
                errors: vec!["Content must be an array".to_string()],
            };
        };

        let mut errors = Vec::new();
        for (i, item) in items.iter().enumerate() {
            if let Err(e) = self.parse_block(item) {
                let tag = item.get("type").and_then(Value::as_str).unwrap_or("unknown");
                errors.push(format!("Block {} ({}): {}", i, tag, e));
            }
        }
        ValidationReport { errors }
    }

    fn parse_at_depth(&self, raw: &Value, depth: usize) -> Result<Block, AuthoringError> {
        let object = raw.as_object().ok_or(AuthoringError::NotAnObject)?;
        let tag = match object.get("type") {
            None | Some(Value::Null) => return Err(AuthoringError::MissingTag),
            Some(Value::String(tag)) => tag.as_str(),
            Some(other) => return Err(AuthoringError::UnknownTag(other.to_string())),
        };
        let spec = self
            .spec(tag)
            .ok_or_else(|| AuthoringError::UnknownTag(tag.to_string()))?;

        // Surface nested problems with their position before serde sees them.
        if spec.kind == BlockKind::Conditional {
            if depth >= self.max_conditional_depth {
                return Err(AuthoringError::NestingTooDeep(self.max_conditional_depth));
            }
            if let Some(children) = object.get("blocks").and_then(Value::as_array) {
                for (i, child) in children.iter().enumerate() {
                    self.parse_at_depth(child, depth + 1).map_err(|e| match e {
                        AuthoringError::NestingTooDeep(_) => e,
                        other => constraint(spec.kind, format!("blocks[{}]: {}", i, other)),
                    })?;
                }
            }
        }

        let block: Block =
            serde_json::from_value(raw.clone()).map_err(|e| AuthoringError::InvalidField {
                tag: tag.to_string(),
                message: e.to_string(),
            })?;
        self.validate_at_depth(&block, depth)?;
        Ok(block)
    }

    fn validate_at_depth(&self, block: &Block, depth: usize) -> Result<(), AuthoringError> {
        let kind = block.kind();
        match block {
            Block::Heading(h) => {
                if !(1..=4).contains(&h.level) {
                    return Err(constraint(kind, format!("level {} is not in 1..=4", h.level)));
                }
            }
            Block::Image(image) => {
                if image.src.trim().is_empty() {
                    return Err(constraint(kind, "src is empty"));
                }
            }
            Block::Prompt(prompt) => validate_prompt(prompt)?,
            Block::ScaleQuestions(set) => {
                require_id(kind, &set.id)?;
                validate_questions(kind, "questions", &set.questions)?;
                if set.scale.min > set.scale.max {
                    return Err(constraint(
                        kind,
                        format!("scale min {} exceeds max {}", set.scale.min, set.scale.max),
                    ));
                }
                validate_scoring(kind, set.scoring.as_ref())?;
            }
            Block::YesNoCheck(set) => {
                require_id(kind, &set.id)?;
                validate_questions(kind, "statements", &set.statements)?;
                validate_scoring(kind, set.scoring.as_ref())?;
            }
            Block::Checklist(list) => {
                let mut seen = FxHashSet::default();
                for item in &list.items {
                    if item.id.trim().is_empty() {
                        return Err(constraint(kind, "checklist item id is empty"));
                    }
                    if !seen.insert(item.id.as_str()) {
                        return Err(constraint(kind, format!("duplicate item id `{}`", item.id)));
                    }
                }
            }
            Block::Conditional(conditional) => self.validate_conditional(conditional, depth)?,
            Block::Variable(variable) => {
                for (name, prompt_id) in &variable.variables {
                    if prompt_id.trim().is_empty() {
                        return Err(constraint(kind, format!("variable `{}` maps to no prompt", name)));
                    }
                }
            }
            Block::FrameworkLetter(letter) => {
                if !letter.letter.chars().next().is_some_and(char::is_alphabetic) {
                    return Err(constraint(kind, "letter must start with an alphabetic character"));
                }
            }
            Block::Paragraph(_)
            | Block::Story(_)
            | Block::Quote(_)
            | Block::Divider
            | Block::Callout(_)
            | Block::List(_)
            | Block::TaskPlan(_)
            | Block::Scripts(_)
            | Block::Cta(_)
            | Block::Button(_)
            | Block::FrameworkIntro(_) => {}
        }
        Ok(())
    }

    fn validate_conditional(
        &self,
        conditional: &ConditionalBlock,
        depth: usize,
    ) -> Result<(), AuthoringError> {
        let kind = BlockKind::Conditional;
        if depth >= self.max_conditional_depth {
            return Err(AuthoringError::NestingTooDeep(self.max_conditional_depth));
        }
        let condition = &conditional.condition;
        if condition.prompt_id.trim().is_empty() {
            return Err(constraint(kind, "condition promptId is empty"));
        }
        if condition.operator == Operator::InRange {
            match condition.value.range_bounds() {
                Some((lo, hi)) if lo <= hi => {}
                Some((lo, hi)) => {
                    return Err(constraint(kind, format!("in_range bounds [{}, {}] are reversed", lo, hi)))
                }
                None => return Err(constraint(kind, "in_range value must be [min, max]")),
            }
        }
        for child in &conditional.blocks {
            self.validate_at_depth(child, depth + 1)?;
        }
        Ok(())
    }
}

fn constraint(kind: BlockKind, message: impl Into<String>) -> AuthoringError {
    AuthoringError::Constraint {
        tag: kind.tag().to_string(),
        message: message.into(),
    }
}

fn require_id(kind: BlockKind, id: &str) -> Result<(), AuthoringError> {
    if id.trim().is_empty() {
        return Err(constraint(kind, "id is required"));
    }
    Ok(())
}

fn validate_prompt(prompt: &PromptBlock) -> Result<(), AuthoringError> {
    let kind = BlockKind::Prompt;
    require_id(kind, &prompt.id)?;
    if matches!(prompt.input, InputKind::Select | InputKind::Multiselect)
        && prompt.options.as_ref().map_or(true, Vec::is_empty)
    {
        return Err(constraint(kind, format!("prompt `{}` needs options", prompt.id)));
    }
    if let Some(rules) = &prompt.validation {
        if let (Some(min), Some(max)) = (rules.min, rules.max) {
            if min > max {
                return Err(constraint(kind, format!("validation min {} exceeds max {}", min, max)));
            }
        }
        if let Some(pattern) = &rules.pattern {
            Regex::new(pattern)
                .map_err(|e| constraint(kind, format!("invalid pattern: {}", e)))?;
        }
    }
    Ok(())
}

fn validate_questions(
    kind: BlockKind,
    field: &str,
    questions: &[Question],
) -> Result<(), AuthoringError> {
    if questions.is_empty() {
        return Err(constraint(kind, format!("{} must not be empty", field)));
    }
    let mut seen = FxHashSet::default();
    for q in questions {
        if q.id.trim().is_empty() {
            return Err(constraint(kind, format!("{} entry has an empty id", field)));
        }
        if !seen.insert(q.id.as_str()) {
            return Err(constraint(kind, format!("duplicate id `{}` in {}", q.id, field)));
        }
    }
    Ok(())
}

fn validate_scoring(kind: BlockKind, scoring: Option<&Scoring>) -> Result<(), AuthoringError> {
    let Some(scoring) = scoring else {
        return Ok(());
    };
    for band in &scoring.bands {
        if band.lo() > band.hi() {
            return Err(constraint(
                kind,
                format!("band `{}` range [{}, {}] is reversed", band.label, band.lo(), band.hi()),
            ));
        }
    }
    let mut sorted: Vec<&ScoreBand> = scoring.bands.iter().collect();
    sorted.sort_by_key(|b| b.lo());
    for pair in sorted.windows(2) {
        if pair[0].overlaps(pair[1]) {
            return Err(constraint(
                kind,
                format!("bands `{}` and `{}` overlap", pair[0].label, pair[1].label),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> BlockRegistry {
        BlockRegistry::default()
    }

    #[test]
    fn standard_registry_covers_every_kind() {
        let reg = registry();
        assert_eq!(reg.len(), BlockKind::ALL.len());
        for kind in BlockKind::ALL {
            assert_eq!(reg.spec(kind.tag()).map(|s| s.kind), Some(kind));
        }
        let interactive: Vec<_> = reg
            .kinds_in(PaletteCategory::Interactive)
            .iter()
            .map(|s| s.kind)
            .collect();
        assert_eq!(
            interactive,
            vec![
                BlockKind::Prompt,
                BlockKind::ScaleQuestions,
                BlockKind::YesNoCheck,
                BlockKind::Checklist
            ]
        );
    }

    #[test]
    fn missing_and_unknown_tags_fail_closed() {
        let reg = registry();
        assert_eq!(reg.parse_block(&json!({"text": "hi"})), Err(AuthoringError::MissingTag));
        assert_eq!(
            reg.parse_block(&json!({"type": "carousel"})),
            Err(AuthoringError::UnknownTag("carousel".to_string()))
        );
        assert_eq!(reg.parse_block(&json!("heading")), Err(AuthoringError::NotAnObject));
    }

    #[test]
    fn missing_numeric_field_is_not_coerced() {
        let reg = registry();
        let raw = json!({
            "type": "scale_questions",
            "id": "self_check",
            "questions": [{"id": "q1", "text": "I listen"}],
            "scale": {"max": 7, "minLabel": "Never", "maxLabel": "Always"}
        });
        match reg.parse_block(&raw) {
            Err(AuthoringError::InvalidField { tag, message }) => {
                assert_eq!(tag, "scale_questions");
                assert!(message.contains("min"), "message was {}", message);
            }
            other => panic!("expected invalid field, got {:?}", other),
        }
    }

    #[test]
    fn wrong_field_type_is_rejected() {
        let reg = registry();
        let raw = json!({"type": "heading", "level": "two", "text": "Hello"});
        assert!(matches!(reg.parse_block(&raw), Err(AuthoringError::InvalidField { .. })));
    }

    #[test]
    fn scale_questions_need_questions() {
        let reg = registry();
        let raw = json!({
            "type": "scale_questions",
            "id": "self_check",
            "questions": [],
            "scale": {"min": 1, "max": 7, "minLabel": "Never", "maxLabel": "Always"}
        });
        assert!(matches!(reg.parse_block(&raw), Err(AuthoringError::Constraint { .. })));
    }

    #[test]
    fn overlapping_bands_are_rejected() {
        let reg = registry();
        let raw = json!({
            "type": "yes_no_check",
            "id": "check",
            "statements": [{"id": "s1", "text": "a"}, {"id": "s2", "text": "b"}],
            "scoring": {"bands": [
                {"range": [0, 1], "label": "Low"},
                {"range": [1, 2], "label": "High"}
            ]}
        });
        let err = reg.parse_block(&raw).unwrap_err();
        assert!(err.to_string().contains("overlap"), "{}", err);
    }

    #[test]
    fn select_prompt_needs_options() {
        let reg = registry();
        let raw = json!({"type": "prompt", "id": "pick", "label": "Pick", "input": "select"});
        assert!(reg.parse_block(&raw).is_err());
        let raw = json!({
            "type": "prompt", "id": "pick", "label": "Pick", "input": "select",
            "options": ["a", "b"]
        });
        assert!(reg.parse_block(&raw).is_ok());
    }

    #[test]
    fn nested_conditional_errors_carry_position() {
        let reg = registry();
        let raw = json!({
            "type": "conditional",
            "condition": {"promptId": "q1", "operator": "equals", "value": "yes"},
            "blocks": [
                {"type": "paragraph", "text": "fine"},
                {"type": "mystery"}
            ]
        });
        let err = reg.parse_block(&raw).unwrap_err();
        assert!(err.to_string().contains("blocks[1]"), "{}", err);
    }

    #[test]
    fn in_range_needs_two_bounds() {
        let reg = registry();
        let raw = json!({
            "type": "conditional",
            "condition": {"promptId": "q1", "operator": "in_range", "value": 3},
            "blocks": []
        });
        assert!(reg.parse_block(&raw).is_err());
    }

    #[test]
    fn nesting_depth_is_bounded() {
        let reg = BlockRegistry::standard(2);
        let leaf = json!({"type": "paragraph", "text": "deep"});
        let wrap = |inner: Value| {
            json!({
                "type": "conditional",
                "condition": {"promptId": "q", "operator": "equals", "value": true},
                "blocks": [inner]
            })
        };
        assert!(reg.parse_block(&wrap(wrap(leaf.clone()))).is_ok());
        assert_eq!(
            reg.parse_block(&wrap(wrap(wrap(leaf)))),
            Err(AuthoringError::NestingTooDeep(2))
        );
    }

    #[test]
    fn validate_content_reports_each_bad_block() {
        let reg = registry();
        let report = reg.validate_content(&json!([
            {"type": "heading", "level": 2, "text": "Ok"},
            {"type": "heading", "level": 9, "text": "Too deep"},
            {"type": "unknown_thing"}
        ]));
        assert!(!report.is_valid());
        assert_eq!(report.errors.len(), 2);
        assert!(report.errors[0].starts_with("Block 1 (heading)"));
        assert!(report.errors[1].starts_with("Block 2 (unknown_thing)"));

        let report = reg.validate_content(&json!({"type": "heading"}));
        assert_eq!(report.errors, vec!["Content must be an array".to_string()]);
    }

    #[test]
    fn hydrate_keeps_positions() {
        let reg = registry();
        let blocks = reg.hydrate(&[
            json!({"type": "paragraph", "text": "one"}),
            json!({"type": "nope"}),
            json!({"type": "divider"}),
        ]);
        assert_eq!(blocks.len(), 3);
        assert!(blocks[0].valid().is_some());
        assert!(blocks[1].block.is_err());
        assert_eq!(blocks[2].valid(), Some(&Block::Divider));
    }
}
