/// Reading-session integration tests: fixture chapter loaded from disk,
/// walked page by page with a recording effect sink and a manual clock.

use chapter_engine::core::autosave::ManualClock;
use chapter_engine::core::pipeline::ChapterEngine;
use chapter_engine::core::render::{InputError, RenderNode, UserInput};
use chapter_engine::core::sequence::HeroSource;
use chapter_engine::core::session::{Navigation, SessionError, StepExit, StepSession};
use chapter_engine::core::source::FileContentSource;
use chapter_engine::schema::effect::{AssessmentKind, Effect, EffectId, EffectSink};
use chapter_engine::schema::response::ResponseValue;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct Recorder(Mutex<Vec<Effect>>);

impl Recorder {
    fn names(&self) -> Vec<&'static str> {
        self.0.lock().unwrap().iter().map(Effect::name).collect()
    }

    fn effects(&self) -> Vec<Effect> {
        self.0.lock().unwrap().clone()
    }

    fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

impl EffectSink for Recorder {
    fn enqueue(&self, effect: Effect) -> EffectId {
        self.0.lock().unwrap().push(effect);
        EffectId::fresh()
    }
}

struct Harness {
    engine: ChapterEngine,
    source: FileContentSource,
    clock: Arc<ManualClock>,
    sink: Arc<Recorder>,
}

impl Harness {
    fn new() -> Self {
        let clock = Arc::new(ManualClock::new());
        let engine = ChapterEngine::builder()
            .config_path("tests/fixtures/engine.ron")
            .with_clock(clock.clone())
            .build()
            .unwrap();
        let source = FileContentSource::new("tests/fixtures/chapters", engine.registry().clone());
        Harness {
            engine,
            source,
            clock,
            sink: Arc::new(Recorder::default()),
        }
    }

    async fn open(&self, step: &str) -> Result<StepSession, SessionError> {
        self.engine
            .load_step(&self.source, "stop-scrolling", step, self.sink.clone())
            .await
    }
}

#[tokio::test]
async fn read_step_walkthrough() {
    let h = Harness::new();
    let mut session = h.open("read").await.unwrap();

    // The empty draft page is dropped at load.
    assert_eq!(session.page_count(), 2);

    let first = session.present();
    assert_eq!(first.hero.source, HeroSource::CurrentPage);
    assert_eq!(first.hero.src, "/images/ch1/phone-at-night.png");
    assert_eq!(first.title.as_deref(), Some("The 3am Scroll"));
    assert!(first.letters.is_none());
    assert_eq!(first.progress_percent, 50);
    assert!(!first.nodes.iter().any(|n| matches!(n, RenderNode::Image(_))));

    assert_eq!(session.next(), Navigation::Moved);
    assert_eq!(h.sink.names(), vec!["complete_page"]);

    let second = session.present();
    assert_eq!(second.hero.source, HeroSource::Chapter);
    assert_eq!(second.hero.src, "/images/ch1/hero.png");
    // Body opens with a heading, so the page title is not repeated.
    assert!(second.title.is_none());
    // "Your Turn" is not a SPARK letter.
    assert!(second.letters.is_none());
    assert_eq!(second.page_number, 2);
    assert_eq!(second.progress_percent, 100);

    // Unknown block type stays in place as a diagnostic.
    assert!(matches!(
        second.nodes.last(),
        Some(RenderNode::Diagnostic { tag: None, message }) if message.contains("bogus_block")
    ));
    // Conditional is hidden until the hours prompt is answered.
    assert!(!second.nodes.iter().any(|n| matches!(n, RenderNode::Group { .. })));
}

#[tokio::test]
async fn answers_reveal_conditional_content_and_save() {
    let h = Harness::new();
    let mut session = h.open("read").await.unwrap();
    session.next();
    h.sink.clear();

    session
        .respond("ch1_hours_daily", UserInput::Answer(ResponseValue::from(6i64)))
        .unwrap();
    assert_eq!(h.sink.names(), vec!["save_prompt_answer"]);

    // The checklist only exists inside the now-visible conditional.
    session
        .respond(
            "ch1_first_moves",
            UserInput::Toggle {
                item_id: "grayscale".to_string(),
            },
        )
        .unwrap();
    assert_eq!(h.sink.names().len(), 2);

    let nodes = session.present().nodes;
    let group = nodes
        .iter()
        .find_map(|n| match n {
            RenderNode::Group { children } => Some(children),
            _ => None,
        })
        .expect("conditional should be visible");
    assert!(matches!(
        group.last(),
        Some(RenderNode::Checklist { completion_percent: 50, .. })
    ));
}

#[tokio::test]
async fn text_answers_wait_for_quiet_period() {
    let h = Harness::new();
    let mut session = h.open("read").await.unwrap();
    session.next();
    h.sink.clear();

    for text in ["r", "read", "read more"] {
        session
            .respond("ch1_goal", UserInput::Answer(ResponseValue::from(text)))
            .unwrap();
        h.clock.advance(Duration::from_millis(200));
    }
    assert_eq!(session.tick(), 0);
    assert!(h.sink.effects().is_empty());

    // The variable block reads the answer before it is saved.
    let text = session.present().nodes.iter().find_map(|n| match n {
        RenderNode::Variable { text } => Some(text.clone()),
        _ => None,
    });
    assert_eq!(text.as_deref(), Some("You said you would read more."));

    h.clock.advance(Duration::from_millis(1_000));
    assert_eq!(session.tick(), 1);
    match &h.sink.effects()[..] {
        [Effect::SavePromptAnswer {
            prompt_key, answer, ..
        }] => {
            assert_eq!(prompt_key, "ch1_goal");
            assert_eq!(answer, &ResponseValue::from("read more"));
        }
        other => panic!("unexpected effects: {:?}", other),
    }
}

#[tokio::test]
async fn invalid_input_is_rejected_without_effects() {
    let h = Harness::new();
    let mut session = h.open("read").await.unwrap();
    session.next();
    h.sink.clear();

    let err = session
        .respond("ch1_hours_daily", UserInput::Answer(ResponseValue::from(30i64)))
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::Input(InputError::OutOfRange { .. })
    ));

    // Hidden until the condition holds.
    let err = session
        .respond(
            "ch1_first_moves",
            UserInput::Toggle {
                item_id: "grayscale".to_string(),
            },
        )
        .unwrap_err();
    assert!(matches!(err, SessionError::UnknownTarget(_)));
    assert!(h.sink.effects().is_empty());
    assert!(session.responses().get("ch1_hours_daily").is_none());
}

#[tokio::test]
async fn completing_read_step_points_at_self_check() {
    let h = Harness::new();
    let mut session = h.open("read").await.unwrap();
    session.next();
    h.sink.clear();
    session
        .respond("ch1_goal", UserInput::Answer(ResponseValue::from("sleep")))
        .unwrap();

    let completion = session.complete();
    assert!(completion.assessment.is_none());
    match completion.exit {
        StepExit::Next(step) => assert_eq!(step.slug, "self-check"),
        other => panic!("unexpected exit: {:?}", other),
    }
    // Pending text is flushed before the page and section complete.
    assert_eq!(
        h.sink.names(),
        vec!["save_prompt_answer", "complete_page", "complete_section"]
    );
}

#[tokio::test]
async fn self_check_submits_baseline() {
    let h = Harness::new();
    let mut session = h.open("self-check").await.unwrap();

    let presentation = session.present();
    assert_eq!(presentation.hero.source, HeroSource::Step);

    for (question_id, rating) in [("ch1_q_reach", 4), ("ch1_q_sleep", 5)] {
        session
            .respond(
                "ch1_baseline",
                UserInput::Rate {
                    question_id: question_id.to_string(),
                    rating,
                },
            )
            .unwrap();
    }
    // Ratings travel with the assessment, not one by one.
    assert!(h.sink.effects().is_empty());

    match session.present().nodes.first() {
        Some(RenderNode::ScaleQuestions { score, .. }) => {
            assert_eq!(score.total, Some(9));
            assert_eq!(score.band.as_ref().map(|b| b.label.as_str()), Some("Hooked"));
        }
        other => panic!("unexpected node: {:?}", other),
    }

    let completion = session.complete();
    assert!(completion.assessment.is_some());
    let submitted = h.sink.effects().into_iter().find_map(|e| match e {
        Effect::SubmitAssessment { kind, total, .. } => Some((kind, total)),
        _ => None,
    });
    assert_eq!(submitted, Some((AssessmentKind::Baseline, 9)));
    assert!(matches!(completion.exit, StepExit::Next(ref s) if s.slug == "framework"));
}

#[tokio::test]
async fn framework_pages_track_letters() {
    let h = Harness::new();
    let mut session = h.open("framework").await.unwrap();

    assert!(session.present().letters.is_none());
    session.next();

    let letter_page = session.present();
    let progress = letter_page.letters.expect("letter strip");
    assert_eq!(progress.letters, vec!['S', 'P', 'A', 'R', 'K']);
    assert_eq!(progress.current, 1);
    assert_eq!(letter_page.title.as_deref(), Some("P — Pause"));
    assert_eq!(letter_page.hero.src, "/images/ch1/pause.png");

    assert_eq!(session.next(), Navigation::AtEdge);
    assert_eq!(session.previous(), Navigation::Moved);
    assert_eq!(session.previous(), Navigation::AtEdge);
    // Pages complete once, however often they are passed.
    assert_eq!(h.sink.names(), vec!["complete_page", "complete_page"]);
}

#[tokio::test]
async fn missing_steps_and_empty_steps_fail_to_open() {
    let h = Harness::new();
    assert!(matches!(
        h.open("no-such-step").await,
        Err(SessionError::StepNotFound(_))
    ));
    assert!(matches!(
        h.open("follow-through").await,
        Err(SessionError::NoPages(_))
    ));
}
