/// Content Linter — validates chapter documents and template catalogs.
///
/// Usage: content_linter <chapters_dir|chapter.json> [--templates <file>] [--config <file>]

use chapter_engine::core::pipeline::ChapterEngine;
use chapter_engine::core::scoring::{band_gaps, scale_range, yes_no_range};
use chapter_engine::core::source::FileContentSource;
use chapter_engine::core::variable::PlaceholderText;
use chapter_engine::schema::block::{Block, ScoreBand};
use chapter_engine::schema::content::RawChapterDocument;
use rustc_hash::{FxHashMap, FxHashSet};
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::EnvFilter;

#[derive(Default)]
struct Report {
    errors: Vec<String>,
    warnings: Vec<String>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        println!("Usage: content_linter <chapters_dir|chapter.json> [--templates <file>] [--config <file>]");
        process::exit(0);
    }

    let content_path = PathBuf::from(&args[1]);
    let mut templates_path = None;
    let mut config_path = None;

    let mut i = 2;
    while i < args.len() {
        if args[i] == "--templates" && i + 1 < args.len() {
            i += 1;
            templates_path = Some(args[i].clone());
        } else if args[i] == "--config" && i + 1 < args.len() {
            i += 1;
            config_path = Some(args[i].clone());
        }
        i += 1;
    }

    let mut builder = ChapterEngine::builder();
    if let Some(path) = config_path {
        builder = builder.config_path(path);
    }
    if let Some(path) = templates_path {
        builder = builder.templates_path(path);
    }
    // Template catalogs fail to load when any block is malformed.
    let engine = match builder.build() {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("ERROR: Failed to build engine: {}", e);
            process::exit(1);
        }
    };
    println!("Loaded {} templates", engine.templates().len());

    let mut report = Report::default();
    let mut documents = Vec::new();
    if content_path.is_file() {
        load_document(&content_path, &mut documents, &mut report);
    } else if content_path.is_dir() {
        load_documents_recursive(&content_path, &mut documents, &mut report);
    } else {
        eprintln!("ERROR: Path '{}' does not exist", content_path.display());
        process::exit(1);
    }
    println!("Loaded {} chapter documents", documents.len());

    for (path, doc) in &documents {
        lint_chapter(&engine, path, doc, &mut report);
    }
    lint_templates(&engine, &mut report);

    println!("\n=== Content Lint Report ===\n");

    if report.errors.is_empty() && report.warnings.is_empty() {
        println!("All checks passed!");
    }

    for warning in &report.warnings {
        println!("WARNING: {}", warning);
    }

    for error in &report.errors {
        println!("ERROR: {}", error);
    }

    println!(
        "\nSummary: {} errors, {} warnings",
        report.errors.len(),
        report.warnings.len()
    );

    if report.errors.is_empty() {
        process::exit(0);
    } else {
        process::exit(1);
    }
}

fn load_document(path: &Path, documents: &mut Vec<(PathBuf, RawChapterDocument)>, report: &mut Report) {
    match FileContentSource::read_document(path) {
        Ok(doc) => {
            println!("  Loaded: {}", path.display());
            documents.push((path.to_path_buf(), doc));
        }
        Err(e) => report.errors.push(format!("{}: {}", path.display(), e)),
    }
}

fn load_documents_recursive(dir: &Path, documents: &mut Vec<(PathBuf, RawChapterDocument)>, report: &mut Report) {
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                load_documents_recursive(&path, documents, report);
            } else if path.extension().and_then(|s| s.to_str()) == Some("json") {
                load_document(&path, documents, report);
            }
        }
    }
}

fn lint_chapter(engine: &ChapterEngine, path: &Path, doc: &RawChapterDocument, report: &mut Report) {
    let chapter = &doc.chapter.slug;
    let step_ids: FxHashSet<_> = doc.steps.iter().map(|s| &s.id).collect();
    let letters: Vec<char> = doc
        .chapter
        .framework_code
        .as_deref()
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_alphabetic())
        .flat_map(char::to_uppercase)
        .collect();

    let mut page_ids = FxHashSet::default();
    let mut prompt_pages: FxHashMap<String, String> = FxHashMap::default();
    let mut conditions: Vec<(String, String)> = Vec::new();
    let mut pages_per_step: FxHashMap<_, usize> = FxHashMap::default();

    for page in &doc.pages {
        let at = format!("{}/{}", chapter, page.id);
        if !page_ids.insert(&page.id) {
            report.errors.push(format!("{}: duplicate page id", at));
        }
        if !step_ids.contains(&page.step_id) {
            report
                .errors
                .push(format!("{}: unknown step `{}`", at, page.step_id));
        }

        let validation = engine.validate_content(&page.content);
        for error in validation.errors {
            report.errors.push(format!("{}: {}", at, error));
        }

        let Some(raw) = page.content.as_array() else {
            continue;
        };
        if raw.is_empty() {
            report
                .warnings
                .push(format!("{}: page has no blocks and will be skipped", at));
            continue;
        }
        *pages_per_step.entry(&page.step_id).or_default() += 1;

        let blocks: Vec<Block> = engine
            .hydrate(raw)
            .into_iter()
            .filter_map(|b| b.block.ok())
            .collect();
        walk(&blocks, &mut |block| match block {
            Block::Prompt(p) => {
                if let Some(other) = prompt_pages.insert(p.id.clone(), page.id.to_string()) {
                    report.warnings.push(format!(
                        "{}: prompt `{}` also appears on page `{}`",
                        at, p.id, other
                    ));
                }
            }
            Block::ScaleQuestions(set) => {
                let (lo, hi) = scale_range(set);
                lint_bands(&at, &set.id, set.scoring.as_ref().map(|s| &s.bands[..]), lo, hi, report);
            }
            Block::YesNoCheck(set) => {
                let (lo, hi) = yes_no_range(set);
                lint_bands(&at, &set.id, set.scoring.as_ref().map(|s| &s.bands[..]), lo, hi, report);
            }
            Block::Conditional(c) => {
                conditions.push((at.clone(), c.condition.prompt_id.clone()));
            }
            Block::Variable(v) => {
                for name in PlaceholderText::parse(&v.template).placeholders() {
                    if !v.variables.contains_key(name) {
                        report.warnings.push(format!(
                            "{}: placeholder `{{{{{}}}}}` has no binding and will show as written",
                            at, name
                        ));
                    }
                }
            }
            Block::FrameworkLetter(fl) => {
                let letter = fl.letter.trim().chars().next().map(|c| c.to_ascii_uppercase());
                if !letters.is_empty() && !letter.is_some_and(|l| letters.contains(&l)) {
                    report.warnings.push(format!(
                        "{}: letter `{}` is not part of framework `{}`",
                        at,
                        fl.letter,
                        doc.chapter.framework_code.as_deref().unwrap_or_default()
                    ));
                }
            }
            _ => {}
        });
    }

    for (at, prompt_id) in conditions {
        if !prompt_pages.contains_key(&prompt_id) && !is_rated_item(doc, engine, &prompt_id) {
            report.warnings.push(format!(
                "{}: condition depends on `{}`, which no page asks",
                at, prompt_id
            ));
        }
    }

    for step in &doc.steps {
        if step.required && !pages_per_step.contains_key(&step.id) {
            report.warnings.push(format!(
                "{}/{}: required step has no pages",
                chapter, step.slug
            ));
        }
    }

    tracing::debug!(path = %path.display(), pages = doc.pages.len(), "chapter linted");
}

fn lint_bands(at: &str, id: &str, bands: Option<&[ScoreBand]>, lo: i64, hi: i64, report: &mut Report) {
    let Some(bands) = bands else {
        return;
    };
    for (from, to) in band_gaps(bands, lo, hi) {
        report.warnings.push(format!(
            "{}: `{}` totals {}..={} fall in no score band",
            at, id, from, to
        ));
    }
}

// Conditions may also test an individual rating or yes/no statement.
fn is_rated_item(doc: &RawChapterDocument, engine: &ChapterEngine, id: &str) -> bool {
    doc.pages.iter().any(|page| {
        let Some(raw) = page.content.as_array() else {
            return false;
        };
        let blocks: Vec<Block> = engine
            .hydrate(raw)
            .into_iter()
            .filter_map(|b| b.block.ok())
            .collect();
        let mut found = false;
        walk(&blocks, &mut |block| match block {
            Block::ScaleQuestions(set) => found |= set.questions.iter().any(|q| q.id == id),
            Block::YesNoCheck(set) => found |= set.statements.iter().any(|s| s.id == id),
            Block::Checklist(list) => found |= list.id == id,
            _ => {}
        });
        found
    })
}

fn lint_templates(engine: &ChapterEngine, report: &mut Report) {
    let mut keys: Vec<&str> = engine.templates().keys().collect();
    keys.sort_unstable();
    for key in keys {
        let Some(template) = engine.templates().get(key) else {
            continue;
        };
        if template.blocks.is_empty() {
            report
                .errors
                .push(format!("template `{}`: no blocks", key));
        }
        walk(&template.blocks, &mut |block| {
            if let Block::ScaleQuestions(set) = block {
                let (lo, hi) = scale_range(set);
                lint_bands(&format!("template `{}`", key), &set.id, set.scoring.as_ref().map(|s| &s.bands[..]), lo, hi, report);
            }
        });
    }
}

/// Visit every block, descending into conditionals.
fn walk<'a>(blocks: &'a [Block], visit: &mut dyn FnMut(&'a Block)) {
    for block in blocks {
        visit(block);
        if let Block::Conditional(c) = block {
            walk(&c.blocks, visit);
        }
    }
}
