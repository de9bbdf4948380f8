/// Engine integration tests: fixture content validation, template
/// expansion, rendering against responses and assessment scoring.

use chapter_engine::core::pipeline::ChapterEngine;
use chapter_engine::core::render::RenderNode;
use chapter_engine::core::scoring::{band_gaps, scale_range};
use chapter_engine::core::source::FileContentSource;
use chapter_engine::core::template::{Customizations, TemplateCategory, TemplateError};
use chapter_engine::schema::block::{AuthoringError, Block};
use chapter_engine::schema::response::{ResponseMap, ResponseValue};
use serde_json::json;
use std::path::Path;

fn engine() -> ChapterEngine {
    ChapterEngine::builder()
        .config_path("tests/fixtures/engine.ron")
        .build()
        .unwrap()
}

#[test]
fn fixture_config_is_loaded() {
    let engine = engine();
    assert_eq!(engine.config().placeholder_image, "/images/fixture-placeholder.png");
    assert_eq!(engine.config().queue.max_attempts, Some(3));
    // Not in the fixture; falls back to the default.
    assert_eq!(engine.config().autosave.quiet_period_ms, 1_000);
}

#[test]
fn fixture_pages_validate_except_the_stray_block() {
    let engine = engine();
    let doc = FileContentSource::read_document(Path::new("tests/fixtures/chapters/stop-scrolling.json"))
        .unwrap();

    let mut failures = Vec::new();
    for page in &doc.pages {
        let report = engine.validate_content(&page.content);
        if !report.is_valid() {
            failures.push((page.id.0.clone(), report.errors));
        }
    }
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, "read-2");
    assert_eq!(failures[0].1.len(), 1);
    assert!(failures[0].1[0].starts_with("Block 5 (bogus_block)"));
}

#[test]
fn fixture_scoring_bands_cover_the_scale() {
    let engine = engine();
    let doc = FileContentSource::read_document(Path::new("tests/fixtures/chapters/stop-scrolling.json"))
        .unwrap();
    let page = doc.pages.iter().find(|p| p.id.0 == "check-1").unwrap();
    let blocks = engine.hydrate(page.content.as_array().unwrap());

    let Some(Block::ScaleQuestions(set)) = blocks[0].valid() else {
        panic!("expected a scale question set");
    };
    let (lo, hi) = scale_range(set);
    assert_eq!((lo, hi), (2, 10));
    let bands = &set.scoring.as_ref().unwrap().bands;
    assert!(band_gaps(bands, lo, hi).is_empty());
}

#[test]
fn every_builtin_template_expands() {
    let engine = engine();
    let keys: Vec<String> = engine.templates().keys().map(str::to_string).collect();
    assert_eq!(keys.len(), 13);
    for key in keys {
        let blocks = engine.expand(&key).unwrap();
        assert!(!blocks.is_empty(), "{} expanded to nothing", key);
        assert!(blocks.iter().all(|b| b.block.is_ok()));
    }
    assert!(!engine
        .templates()
        .templates_by_category(TemplateCategory::YourTurn)
        .is_empty());
}

#[test]
fn expansions_are_independent_copies() {
    let engine = engine();
    let first = engine.expand("simple_reflection").unwrap();
    let second = engine.expand("simple_reflection").unwrap();
    assert_ne!(first[0].id, second[0].id);
    assert_eq!(first[0].block, second[0].block);
}

#[test]
fn customized_expansion_revalidates() {
    let engine = engine();
    let mut custom = Customizations::new();
    custom.insert(
        2,
        json!({"id": "ch1_reflection", "label": "What stood out?"})
            .as_object()
            .unwrap()
            .clone(),
    );
    let blocks = engine.expand_customized("simple_reflection", &custom).unwrap();
    match blocks[2].valid() {
        Some(Block::Prompt(p)) => {
            assert_eq!(p.id, "ch1_reflection");
            assert_eq!(p.label, "What stood out?");
        }
        other => panic!("unexpected block: {:?}", other),
    }

    let mut retag = Customizations::new();
    retag.insert(0, json!({"type": "paragraph"}).as_object().unwrap().clone());
    assert!(matches!(
        engine.expand_customized("simple_reflection", &retag),
        Err(TemplateError::Authoring {
            source: AuthoringError::TagChanged { .. },
            ..
        })
    ));

    assert!(matches!(
        engine.expand("no_such_template"),
        Err(TemplateError::NotFound(_))
    ));
}

#[test]
fn render_shows_branch_for_matching_answer() {
    let engine = engine();
    let blocks = engine.hydrate(&[
        json!({"type": "prompt", "id": "mood", "label": "Mood", "input": "select", "options": ["calm", "wired"]}),
        json!({
            "type": "conditional",
            "condition": {"promptId": "mood", "operator": "equals", "value": "wired"},
            "blocks": [{"type": "paragraph", "text": "Try a screen-free hour."}]
        }),
        json!({"type": "variable", "template": "Today you feel {{mood}}.", "variables": {"mood": "mood"}}),
    ]);

    let empty = engine.render(&blocks, &ResponseMap::new());
    assert_eq!(empty.len(), 2);
    assert!(matches!(&empty[1], RenderNode::Variable { text } if text == "Today you feel [mood]."));

    let mut responses = ResponseMap::new();
    responses.set("mood", ResponseValue::from("wired"));
    let nodes = engine.render(&blocks, &responses);
    assert_eq!(nodes.len(), 3);
    assert!(matches!(&nodes[1], RenderNode::Group { children } if children.len() == 1));
    assert!(matches!(&nodes[2], RenderNode::Variable { text } if text == "Today you feel wired."));
}
