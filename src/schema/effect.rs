use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::content::{ChapterId, PageId, StepId, StepKind};
use super::response::{ResponseMap, ResponseValue};

/// Identity of one enqueued effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EffectId(pub Uuid);

impl EffectId {
    pub fn fresh() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for EffectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentKind {
    Baseline,
    Final,
}

/// A backend write produced by the reader's progress. Effects are plain data
/// so redelivery after a retry replays exactly the same request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum Effect {
    SavePromptAnswer {
        prompt_key: String,
        chapter_id: ChapterId,
        step_id: StepId,
        page_id: PageId,
        answer: ResponseValue,
    },
    CompletePage {
        chapter_id: ChapterId,
        step_id: StepId,
        page_id: PageId,
        step_kind: StepKind,
    },
    CompleteSection {
        chapter_id: ChapterId,
        step_kind: StepKind,
    },
    SubmitAssessment {
        chapter_id: ChapterId,
        kind: AssessmentKind,
        responses: ResponseMap,
        total: i64,
    },
}

impl Effect {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SavePromptAnswer { .. } => "save_prompt_answer",
            Self::CompletePage { .. } => "complete_page",
            Self::CompleteSection { .. } => "complete_section",
            Self::SubmitAssessment { .. } => "submit_assessment",
        }
    }
}

/// Successful outcome reported by the delivery collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "ack", rename_all = "snake_case")]
pub enum Ack {
    Applied { xp_awarded: u32 },
    /// Idempotent no-op: the effect had already been recorded.
    AlreadyCompleted,
}

/// Anything that accepts effects for eventual delivery.
pub trait EffectSink: Send + Sync {
    /// Accept an effect without blocking.
    fn enqueue(&self, effect: Effect) -> EffectId;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effect_wire_shape() {
        let effect = Effect::CompleteSection {
            chapter_id: ChapterId::from("c1"),
            step_kind: StepKind::SelfCheck,
        };
        let json = serde_json::to_value(&effect).unwrap();
        assert_eq!(json["effect"], "complete_section");
        assert_eq!(json["step_kind"], "self_check");
        assert_eq!(effect.name(), "complete_section");
    }

    #[test]
    fn ack_variants_are_distinct() {
        assert_ne!(Ack::Applied { xp_awarded: 0 }, Ack::AlreadyCompleted);
    }
}
