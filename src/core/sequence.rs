/// Derived page state: framework-letter progress, hero image choice and the
/// next-step pointer. Everything here is recomputed on each page change.
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

use crate::schema::block::{Block, PageBlock};
use crate::schema::content::{Chapter, Page, Step};

// "P — Plan Your Move", "S - Spot it", "A–Ask"
static LETTER_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([A-Z])\s*[—–-]").expect("static regex"));

/// The authoritative letter sequence for a step.
///
/// Order of precedence: the chapter's framework code, then its authored
/// letter list, then explicit `framework_letter` blocks across the step's
/// pages in first-seen order.
pub fn framework_letters(chapter: &Chapter, pages: &[Page]) -> Vec<char> {
    if let Some(code) = chapter.framework_code.as_deref() {
        let letters: Vec<char> = code
            .chars()
            .filter(|c| c.is_alphabetic())
            .flat_map(char::to_uppercase)
            .collect();
        if !letters.is_empty() {
            return letters;
        }
    }

    if let Some(authored) = &chapter.framework_letters {
        let letters = dedup(authored.iter().filter_map(|l| leading_letter(l)));
        if !letters.is_empty() {
            return letters;
        }
    }

    dedup(
        pages
            .iter()
            .flat_map(|p| p.blocks.iter().filter_map(PageBlock::valid))
            .filter_map(|b| match b {
                Block::FrameworkLetter(fl) => leading_letter(&fl.letter),
                _ => None,
            }),
    )
}

/// The letter a page is about. An explicit `framework_letter` block wins;
/// otherwise the first heading is read, first for a `X —` prefix and then
/// for its first capital letter.
pub fn current_letter(page: &Page) -> Option<char> {
    let blocks = || page.blocks.iter().filter_map(PageBlock::valid);

    let explicit = blocks().find_map(|b| match b {
        Block::FrameworkLetter(fl) => leading_letter(&fl.letter),
        _ => None,
    });
    if explicit.is_some() {
        return explicit;
    }

    let heading = blocks().find_map(Block::as_heading)?;
    if let Some(caps) = LETTER_HEADING.captures(&heading.text) {
        return caps[1].chars().next();
    }
    heading.text.chars().find(|c| c.is_uppercase())
}

/// Progress strip state for one page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LetterProgress {
    pub letters: Vec<char>,
    /// Zero-based position of the current letter.
    pub current: usize,
}

/// `None` suppresses the strip: no sequence, no letter, or a letter that
/// is not part of the sequence.
pub fn letter_progress(letters: &[char], page: &Page) -> Option<LetterProgress> {
    if letters.is_empty() {
        return None;
    }
    let letter = current_letter(page)?;
    let Some(current) = letters.iter().position(|l| *l == letter) else {
        tracing::debug!(page = %page.id, %letter, "letter not in framework; progress suppressed");
        return None;
    };
    Some(LetterProgress {
        letters: letters.to_vec(),
        current,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HeroSource {
    CurrentPage,
    Step,
    Chapter,
    PreviousPage,
    Placeholder,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeroImage {
    pub src: String,
    pub alt: String,
    pub source: HeroSource,
}

/// A page split into its hero image and the body left to render.
#[derive(Debug, Clone)]
pub struct PageLayout {
    pub hero: HeroImage,
    /// Page blocks with every top-level image removed.
    pub body: Vec<PageBlock>,
}

/// Pick the hero image for `pages[index]` and strip images from its body.
///
/// Returns `None` if `index` is out of range.
pub fn resolve_hero(
    chapter: &Chapter,
    step: &Step,
    pages: &[Page],
    index: usize,
    placeholder: &str,
) -> Option<PageLayout> {
    let page = pages.get(index)?;
    let fallback_alt = page.title.clone().unwrap_or_else(|| step.title.clone());
    let non_empty = |s: &Option<String>| s.as_deref().filter(|s| !s.trim().is_empty()).map(str::to_string);

    let hero = if let Some(image) = page.first_image() {
        HeroImage {
            src: image.src.clone(),
            alt: image.alt.clone(),
            source: HeroSource::CurrentPage,
        }
    } else if let Some(src) = non_empty(&step.hero_image_url) {
        HeroImage {
            src,
            alt: fallback_alt,
            source: HeroSource::Step,
        }
    } else if let Some(src) = non_empty(&chapter.hero_image_url) {
        HeroImage {
            src,
            alt: fallback_alt,
            source: HeroSource::Chapter,
        }
    } else if let Some(image) = index
        .checked_sub(1)
        .and_then(|prev| pages[prev].first_image())
    {
        HeroImage {
            src: image.src.clone(),
            alt: image.alt.clone(),
            source: HeroSource::PreviousPage,
        }
    } else {
        HeroImage {
            src: placeholder.to_string(),
            alt: fallback_alt,
            source: HeroSource::Placeholder,
        }
    };

    let body = page
        .blocks
        .iter()
        .filter(|b| !matches!(b.valid(), Some(Block::Image(_))))
        .cloned()
        .collect();

    Some(PageLayout { hero, body })
}

/// The page title is redundant when the body already opens with a heading.
pub fn show_page_title(body: &[PageBlock]) -> bool {
    !matches!(body.first().and_then(PageBlock::valid), Some(Block::Heading(_)))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NextStep<'a> {
    Step(&'a Step),
    ChapterComplete,
}

/// The step with the smallest order index greater than `order_index`.
pub fn next_step(steps: &[Step], order_index: i32) -> NextStep<'_> {
    steps
        .iter()
        .filter(|s| s.order_index > order_index)
        .min_by_key(|s| s.order_index)
        .map_or(NextStep::ChapterComplete, NextStep::Step)
}

fn leading_letter(text: &str) -> Option<char> {
    text.trim()
        .chars()
        .next()
        .filter(|c| c.is_alphabetic())
        .and_then(|c| c.to_uppercase().next())
}

fn dedup(letters: impl Iterator<Item = char>) -> Vec<char> {
    let mut out = Vec::new();
    for letter in letters {
        if !out.contains(&letter) {
            out.push(letter);
        }
    }
    out
}
