/// Preview — interactive reading shell for testing chapter content.
///
/// Usage: preview --content <dir> --chapter <slug> [--step <slug>] [--config <file>] [--fail-rate <0..1>]
///
/// Commands:
///   page                          — show the current page
///   answer <prompt> <value>       — answer a prompt (numbers are parsed)
///   choose <prompt> <a,b,...>     — answer a multi-select prompt
///   rate <set> <question> <n>     — rate a scale question
///   yes|no <set> <statement>      — answer a yes/no statement
///   toggle <checklist> <item>     — check or uncheck an item
///   tick                          — save text answers that have gone quiet
///   next | back                   — move between pages
///   complete                      — finish the step
///   step <slug>                   — open another step
///   queue                         — show write queue state
///   templates | expand <key>      — browse the template catalog
///   help                          — list commands
///   quit                          — drain the queue and exit

use async_trait::async_trait;
use chapter_engine::core::pipeline::ChapterEngine;
use chapter_engine::core::queue::{Deliver, DeliveryError, WriteQueue};
use chapter_engine::core::render::{render_page, RenderNode, UserInput};
use chapter_engine::core::session::{Navigation, StepExit, StepSession};
use chapter_engine::core::source::{ContentSource, FileContentSource};
use chapter_engine::schema::content::PageId;
use chapter_engine::schema::effect::{Ack, Effect};
use chapter_engine::schema::response::{ResponseMap, ResponseValue};
use rand::Rng;
use rustc_hash::FxHashSet;
use std::io::{self, BufRead, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Stand-in backend: logs each effect and fails at random.
struct LoggingBackend {
    fail_rate: f64,
    completed: Mutex<FxHashSet<PageId>>,
}

#[async_trait]
impl Deliver for LoggingBackend {
    async fn deliver(&self, effect: &Effect) -> Result<Ack, DeliveryError> {
        // Simulated round trip.
        tokio::time::sleep(Duration::from_millis(50)).await;
        if self.fail_rate > 0.0 && rand::thread_rng().gen_bool(self.fail_rate.min(1.0)) {
            return Err(DeliveryError::Network("simulated outage".to_string()));
        }
        let ack = match effect {
            Effect::CompletePage { page_id, .. } => {
                let mut completed = self.completed.lock().unwrap_or_else(PoisonError::into_inner);
                if completed.insert(page_id.clone()) {
                    Ack::Applied { xp_awarded: 10 }
                } else {
                    Ack::AlreadyCompleted
                }
            }
            Effect::CompleteSection { .. } => Ack::Applied { xp_awarded: 25 },
            _ => Ack::Applied { xp_awarded: 0 },
        };
        tracing::info!(effect = effect.name(), ?ack, "backend accepted");
        Ok(ack)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage();
        return;
    }

    let mut content_dir = None;
    let mut chapter = None;
    let mut step = None;
    let mut config_path = None;
    let mut fail_rate = 0.0;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--content" if i + 1 < args.len() => {
                i += 1;
                content_dir = Some(args[i].clone());
            }
            "--chapter" if i + 1 < args.len() => {
                i += 1;
                chapter = Some(args[i].clone());
            }
            "--step" if i + 1 < args.len() => {
                i += 1;
                step = Some(args[i].clone());
            }
            "--config" if i + 1 < args.len() => {
                i += 1;
                config_path = Some(args[i].clone());
            }
            "--fail-rate" if i + 1 < args.len() => {
                i += 1;
                fail_rate = args[i].parse().unwrap_or(0.0);
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    let (Some(content_dir), Some(chapter)) = (content_dir, chapter) else {
        print_usage();
        std::process::exit(1);
    };

    let mut builder = ChapterEngine::builder();
    if let Some(path) = config_path {
        builder = builder.config_path(path);
    }
    let engine = match builder.build() {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            std::process::exit(1);
        }
    };

    let source = FileContentSource::new(&content_dir, engine.registry().clone());
    let queue = Arc::new(engine.spawn_queue(Arc::new(LoggingBackend {
        fail_rate,
        completed: Mutex::new(FxHashSet::default()),
    })));

    let first_step = match step {
        Some(step) => step,
        None => match source.load_chapter_bundle(&chapter).await {
            Ok(bundle) => match bundle.navigation().first() {
                Some(step) => step.slug.clone(),
                None => {
                    eprintln!("ERROR: chapter `{}` has no steps", chapter);
                    std::process::exit(1);
                }
            },
            Err(e) => {
                eprintln!("ERROR: {}", e);
                std::process::exit(1);
            }
        },
    };

    let mut session = match engine.load_step(&source, &chapter, &first_step, queue.clone()).await {
        Ok(session) => session,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            std::process::exit(1);
        }
    };

    println!("Loaded {} templates", engine.templates().len());
    println!("Type 'help' for commands.\n");
    print_page(&session);

    loop {
        print!("preview> ");
        io::stdout().flush().ok();

        // Read off the runtime thread so the queue keeps draining.
        let line = match tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            io::stdin().lock().read_line(&mut line).map(|_| line)
        })
        .await
        {
            Ok(Ok(line)) if !line.is_empty() => line,
            _ => break,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        let cmd = parts[0].to_lowercase();

        match cmd.as_str() {
            "quit" | "exit" | "q" => break,
            "help" | "h" | "?" => print_help(),
            "page" | "p" => print_page(&session),
            "answer" => {
                if parts.len() < 3 {
                    println!("Usage: answer <prompt> <value>");
                    continue;
                }
                let value = parse_value(&parts[2..].join(" "));
                apply(&mut session, parts[1], UserInput::Answer(value));
            }
            "choose" => {
                if parts.len() < 3 {
                    println!("Usage: choose <prompt> <a,b,...>");
                    continue;
                }
                let choices = parts[2..]
                    .join(" ")
                    .split(',')
                    .map(|s| ResponseValue::from(s.trim()))
                    .collect();
                apply(&mut session, parts[1], UserInput::Answer(ResponseValue::List(choices)));
            }
            "rate" => {
                let rating = parts.get(3).and_then(|s| s.parse().ok());
                let (Some(rating), true) = (rating, parts.len() == 4) else {
                    println!("Usage: rate <set> <question> <n>");
                    continue;
                };
                apply(
                    &mut session,
                    parts[1],
                    UserInput::Rate {
                        question_id: parts[2].to_string(),
                        rating,
                    },
                );
            }
            "yes" | "no" => {
                if parts.len() != 3 {
                    println!("Usage: {} <set> <statement>", cmd);
                    continue;
                }
                apply(
                    &mut session,
                    parts[1],
                    UserInput::YesNo {
                        statement_id: parts[2].to_string(),
                        answer: cmd == "yes",
                    },
                );
            }
            "toggle" => {
                if parts.len() != 3 {
                    println!("Usage: toggle <checklist> <item>");
                    continue;
                }
                apply(
                    &mut session,
                    parts[1],
                    UserInput::Toggle {
                        item_id: parts[2].to_string(),
                    },
                );
            }
            "tick" => println!("Saved {} answer(s).", session.tick()),
            "next" | "n" => match session.next() {
                Navigation::Moved => print_page(&session),
                Navigation::AtEdge => println!("Last page. Use 'complete' to finish the step."),
            },
            "back" | "b" => match session.previous() {
                Navigation::Moved => print_page(&session),
                Navigation::AtEdge => println!("Already on the first page."),
            },
            "complete" => {
                let completion = session.complete();
                if let Some(id) = completion.assessment {
                    println!("Assessment submitted ({})", id);
                }
                match completion.exit {
                    StepExit::Next(step) => println!("Step complete. Next: {} ({})", step.title, step.slug),
                    StepExit::ChapterComplete => println!("Chapter complete!"),
                }
            }
            "step" => {
                if parts.len() != 2 {
                    println!("Usage: step <slug>");
                    continue;
                }
                match engine.load_step(&source, &chapter, parts[1], queue.clone()).await {
                    Ok(next) => {
                        session = next;
                        print_page(&session);
                    }
                    Err(e) => println!("Error: {}", e),
                }
            }
            "queue" => print_queue(&queue),
            "templates" => {
                let mut keys: Vec<&str> = engine.templates().keys().collect();
                keys.sort_unstable();
                for key in keys {
                    if let Some(t) = engine.templates().get(key) {
                        println!("  {:<36} {:?}  {}", key, t.category, t.name);
                    }
                }
            }
            "expand" => {
                if parts.len() != 2 {
                    println!("Usage: expand <key>");
                    continue;
                }
                match engine.expand(parts[1]) {
                    Ok(blocks) => {
                        for node in render_page(&blocks, &ResponseMap::new()) {
                            print_node(&node, 1);
                        }
                    }
                    Err(e) => println!("Error: {}", e),
                }
            }
            _ => println!("Unknown command '{}'. Type 'help' for commands.", cmd),
        }
    }

    println!("Draining write queue...");
    if tokio::time::timeout(Duration::from_secs(10), queue.wait_idle())
        .await
        .is_err()
    {
        println!("Queue still busy after 10s.");
    }
    let report = queue.shutdown().await;
    println!(
        "Undelivered: {}, dead-lettered: {}",
        report.undelivered.len(),
        report.dead_lettered
    );
    println!("Goodbye.");
}

fn apply(session: &mut StepSession, target: &str, input: UserInput) {
    match session.respond(target, input) {
        Ok(()) => print_page(session),
        Err(e) => println!("Error: {}", e),
    }
}

fn parse_value(text: &str) -> ResponseValue {
    match text {
        "true" => ResponseValue::Bool(true),
        "false" => ResponseValue::Bool(false),
        _ => text
            .parse::<f64>()
            .map(ResponseValue::Number)
            .unwrap_or_else(|_| ResponseValue::from(text)),
    }
}

fn print_page(session: &StepSession) {
    let page = session.present();
    println!(
        "\n── {} · page {}/{} ({}%) ──",
        session.step().title,
        page.page_number,
        page.page_count,
        page.progress_percent
    );
    println!("hero: {} [{:?}]", page.hero.src, page.hero.source);
    if let Some(progress) = &page.letters {
        let strip: Vec<String> = progress
            .letters
            .iter()
            .enumerate()
            .map(|(i, l)| if i == progress.current { format!("[{}]", l) } else { l.to_string() })
            .collect();
        println!("{}", strip.join(" "));
    }
    if let Some(title) = &page.title {
        println!("# {}", title);
    }
    for node in &page.nodes {
        print_node(node, 0);
    }
    println!();
}

fn print_node(node: &RenderNode, depth: usize) {
    let pad = "  ".repeat(depth);
    match node {
        RenderNode::Heading(h) => println!("{}{} {}", pad, "#".repeat(h.level as usize), h.text),
        RenderNode::Paragraph(p) => println!("{}{}", pad, p.text),
        RenderNode::Story(s) => println!("{}~ {}", pad, s.text),
        RenderNode::Quote(q) => println!("{}\"{}\"", pad, q.text),
        RenderNode::Divider => println!("{}----", pad),
        RenderNode::Image(img) => println!("{}[image {}]", pad, img.src),
        RenderNode::Callout(c) => println!("{}[{:?}] {}", pad, c.variant, c.text),
        RenderNode::List(l) => {
            for item in &l.items {
                println!("{}- {}", pad, item);
            }
        }
        RenderNode::Prompt { prompt, value } => {
            let shown = value.as_ref().map_or_else(|| "(unanswered)".to_string(), |v| v.to_string());
            println!("{}? {} [{}] = {}", pad, prompt.label, prompt.id, shown);
        }
        RenderNode::ScaleQuestions { id, questions, score, scale, .. } => {
            println!("{}scale [{}] {}..{}", pad, id, scale.min, scale.max);
            for q in questions {
                let rating = q.rating.map_or("-".to_string(), |r| r.to_string());
                println!("{}  {} [{}]: {}", pad, q.text, q.id, rating);
            }
            print_score(&pad, score);
        }
        RenderNode::YesNoCheck { id, statements, score, .. } => {
            println!("{}yes/no [{}]", pad, id);
            for s in statements {
                let answer = match s.answer {
                    Some(true) => "yes",
                    Some(false) => "no",
                    None => "-",
                };
                println!("{}  {} [{}]: {}", pad, s.text, s.id, answer);
            }
            print_score(&pad, score);
        }
        RenderNode::Checklist { id, items, completion_percent, .. } => {
            println!("{}checklist [{}] {}%", pad, id, completion_percent);
            for item in items {
                println!("{}  [{}] {} ({})", pad, if item.checked { "x" } else { " " }, item.text, item.id);
            }
        }
        RenderNode::TaskPlan(plan) => {
            println!("{}plan: {}", pad, plan.title);
            for task in &plan.tasks {
                println!("{}  - {}", pad, task.title);
            }
        }
        RenderNode::Scripts(scripts) => {
            for script in &scripts.scripts {
                println!("{}script ({}): {}", pad, script.target, script.content);
            }
        }
        RenderNode::Cta(cta) => println!("{}>> {}: {}", pad, cta.title, cta.text),
        RenderNode::Button(button) => println!("{}[ {} ]", pad, button.text),
        RenderNode::Group { children } => {
            for child in children {
                print_node(child, depth + 1);
            }
        }
        RenderNode::Hidden => {}
        RenderNode::Variable { text } => println!("{}{}", pad, text),
        RenderNode::FrameworkIntro(intro) => {
            println!("{}{}: {}", pad, intro.framework_code, intro.title);
            for l in &intro.letters {
                println!("{}  {} — {}", pad, l.letter, l.meaning);
            }
        }
        RenderNode::FrameworkLetter(fl) => println!("{}{} — {}: {}", pad, fl.letter, fl.title, fl.content),
        RenderNode::Diagnostic { tag, message } => {
            println!("{}!! {} ({})", pad, message, tag.as_deref().unwrap_or("malformed"));
        }
    }
}

fn print_score(pad: &str, score: &chapter_engine::core::scoring::ScoreSummary) {
    match (&score.total, &score.band) {
        (Some(total), Some(band)) => println!("{}  total {} — {}", pad, total, band.label),
        (Some(total), None) => println!("{}  total {}", pad, total),
        _ => println!("{}  {}/{} answered", pad, score.answered, score.required),
    }
}

fn print_queue(queue: &WriteQueue) {
    println!("state: {:?}, outstanding: {}", queue.state(), queue.outstanding());
    for delivered in queue.delivered() {
        println!(
            "  delivered {} {} after {} attempt(s): {:?}",
            delivered.id,
            delivered.effect.name(),
            delivered.attempts,
            delivered.ack
        );
    }
    for dead in queue.dead_letters() {
        println!(
            "  DEAD {} {} after {} attempt(s): {}",
            dead.id,
            dead.effect.name(),
            dead.attempts,
            dead.last_error
        );
    }
}

fn print_usage() {
    println!("Usage: preview --content <dir> --chapter <slug> [--step <slug>] [--config <file>] [--fail-rate <0..1>]");
    println!();
    println!("Opens a chapter step and lets you read and answer it interactively.");
    println!("Writes go through the real write queue against a logging backend.");
}

fn print_help() {
    println!("Commands:");
    println!("  page                          — show the current page");
    println!("  answer <prompt> <value>       — answer a prompt");
    println!("  choose <prompt> <a,b,...>     — answer a multi-select prompt");
    println!("  rate <set> <question> <n>     — rate a scale question");
    println!("  yes|no <set> <statement>      — answer a yes/no statement");
    println!("  toggle <checklist> <item>     — check or uncheck an item");
    println!("  tick                          — save text answers that have gone quiet");
    println!("  next | back                   — move between pages");
    println!("  complete                      — finish the step");
    println!("  step <slug>                   — open another step");
    println!("  queue                         — show write queue state");
    println!("  templates | expand <key>      — browse the template catalog");
    println!("  help                          — this list");
    println!("  quit                          — drain the queue and exit");
}
