use serde::{Deserialize, Serialize};
use std::fmt;

use super::block::PageBlock;

/// Newtype wrapper for chapter IDs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChapterId(pub String);

/// Newtype wrapper for step IDs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(pub String);

/// Newtype wrapper for page IDs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageId(pub String);

macro_rules! display_id {
    ($($ty:ident),*) => {
        $(
            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(&self.0)
                }
            }

            impl From<&str> for $ty {
                fn from(value: &str) -> Self {
                    Self(value.to_string())
                }
            }
        )*
    };
}

display_id!(ChapterId, StepId, PageId);

/// What a step asks of the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Read,
    SelfCheck,
    Framework,
    Techniques,
    Resolution,
    FollowThrough,
}

/// Canonical navigation order of step kinds within a chapter.
pub const STEP_ORDER: [StepKind; 6] = [
    StepKind::Read,
    StepKind::SelfCheck,
    StepKind::Framework,
    StepKind::Techniques,
    StepKind::Resolution,
    StepKind::FollowThrough,
];

impl StepKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::SelfCheck => "self_check",
            Self::Framework => "framework",
            Self::Techniques => "techniques",
            Self::Resolution => "resolution",
            Self::FollowThrough => "follow_through",
        }
    }

    /// Position in [`STEP_ORDER`].
    pub fn ordinal(&self) -> usize {
        STEP_ORDER.iter().position(|k| k == self).unwrap_or(STEP_ORDER.len())
    }
}

/// An ordered, non-empty run of blocks with a stable identity.
#[derive(Debug, Clone)]
pub struct Page {
    pub id: PageId,
    pub step_id: StepId,
    pub slug: String,
    pub title: Option<String>,
    pub order_index: i32,
    pub estimated_minutes: Option<u32>,
    pub xp_award: u32,
    pub blocks: Vec<PageBlock>,
}

impl Page {
    /// The first image block on this page, if any.
    pub fn first_image(&self) -> Option<&super::block::ImageBlock> {
        self.blocks
            .iter()
            .filter_map(PageBlock::valid)
            .find_map(|b| b.as_image())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    pub chapter_id: ChapterId,
    #[serde(rename = "step_type")]
    pub kind: StepKind,
    pub title: String,
    pub slug: String,
    pub order_index: i32,
    #[serde(rename = "is_required", default)]
    pub required: bool,
    #[serde(default)]
    pub hero_image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: ChapterId,
    #[serde(rename = "chapter_number")]
    pub number: u32,
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub subtitle: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub hero_image_url: Option<String>,
    /// Acronym driving the progress strip, e.g. "SPARK".
    #[serde(default)]
    pub framework_code: Option<String>,
    /// Explicit letter list authored alongside (or instead of) the code.
    #[serde(default)]
    pub framework_letters: Option<Vec<String>>,
}

/// A chapter with its steps, as served by the content collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterBundle {
    pub chapter: Chapter,
    pub steps: Vec<Step>,
}

impl ChapterBundle {
    pub fn step_by_slug(&self, slug: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.slug == slug)
    }

    /// Steps sorted by canonical kind order, then authored order.
    pub fn navigation(&self) -> Vec<&Step> {
        let mut steps: Vec<&Step> = self.steps.iter().collect();
        steps.sort_by_key(|s| (s.kind.ordinal(), s.order_index));
        steps
    }
}

/// Page row as stored, before its blocks are validated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPage {
    pub id: PageId,
    pub step_id: StepId,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub title: Option<String>,
    pub order_index: i32,
    #[serde(default)]
    pub estimated_minutes: Option<u32>,
    #[serde(default)]
    pub xp_award: u32,
    pub content: serde_json::Value,
}

/// On-disk chapter document: the bundle plus every step's raw pages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawChapterDocument {
    pub chapter: Chapter,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub pages: Vec<RawPage>,
}
