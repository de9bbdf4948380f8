//! Durable write queue — delivers effects to the backend in FIFO order,
//! retrying failures with bounded exponential backoff.
//!
//! One background task owns delivery. `enqueue` never blocks; it records
//! the effect as pending and hands it to the task over an unbounded
//! channel, so any number of callers may enqueue concurrently. The task
//! awaits each delivery before taking the next effect, and a failed effect
//! stays at the head of the line until it is delivered or dead-lettered.
//!
//! Dropping the handle does not stop delivery: the task keeps draining
//! what was already accepted and exits once the channel is empty. Only
//! [`WriteQueue::shutdown`] stops it early.
//!
//! ## Idempotency
//!
//! A retry replays the same `Effect` value. The delivery collaborator must
//! treat a replay of an already-recorded effect as `Ack::AlreadyCompleted`.

use async_trait::async_trait;
use rand::Rng;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::config::QueueConfig;
use crate::schema::effect::{Ack, Effect, EffectId, EffectSink};

/// A transient failure reported by the delivery collaborator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DeliveryError {
    #[error("network error: {0}")]
    Network(String),
    #[error("delivery timed out")]
    Timeout,
    #[error("storage error: {0}")]
    Storage(String),
}

/// The backend side of the queue.
#[async_trait]
pub trait Deliver: Send + Sync + 'static {
    async fn deliver(&self, effect: &Effect) -> Result<Ack, DeliveryError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EffectStatus {
    /// Waiting for its turn, or for the next retry.
    Pending { attempts: u32 },
    InFlight { attempt: u32 },
    Delivered { ack: Ack, attempts: u32 },
    DeadLettered { attempts: u32, last_error: String },
    /// Still owed when the queue shut down; returned in the shutdown report.
    Abandoned { attempts: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    Idle,
    Draining,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveredEffect {
    pub id: EffectId,
    pub effect: Effect,
    pub ack: Ack,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeadLetter {
    pub id: EffectId,
    pub effect: Effect,
    pub attempts: u32,
    pub last_error: String,
}

/// What was still owed when the queue stopped.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ShutdownReport {
    pub undelivered: Vec<(EffectId, Effect)>,
    pub dead_lettered: usize,
}

struct Queued {
    id: EffectId,
    effect: Effect,
}

#[derive(Default)]
struct Ledger {
    status: FxHashMap<EffectId, EffectStatus>,
    delivered: VecDeque<DeliveredEffect>,
    dead: Vec<DeadLetter>,
    outstanding: usize,
}

struct Shared {
    ledger: Mutex<Ledger>,
    state: watch::Sender<QueueState>,
    history_limit: usize,
}

impl Shared {
    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_status(&self, id: EffectId, status: EffectStatus) {
        self.ledger().status.insert(id, status);
    }

    fn admit(&self, id: EffectId) {
        let mut ledger = self.ledger();
        ledger.status.insert(id, EffectStatus::Pending { attempts: 0 });
        ledger.outstanding += 1;
        self.state.send_replace(QueueState::Draining);
    }

    fn finish(&self, ledger: &mut Ledger) {
        ledger.outstanding = ledger.outstanding.saturating_sub(1);
        if ledger.outstanding == 0 {
            self.state.send_replace(QueueState::Idle);
        }
    }

    fn delivered(&self, item: Queued, ack: Ack, attempts: u32) {
        let mut ledger = self.ledger();
        ledger
            .status
            .insert(item.id, EffectStatus::Delivered { ack, attempts });
        ledger.delivered.push_back(DeliveredEffect {
            id: item.id,
            effect: item.effect,
            ack,
            attempts,
        });
        while ledger.delivered.len() > self.history_limit {
            if let Some(old) = ledger.delivered.pop_front() {
                ledger.status.remove(&old.id);
            }
        }
        self.finish(&mut ledger);
    }

    fn dead_letter(&self, item: Queued, attempts: u32, last_error: String) {
        let mut ledger = self.ledger();
        ledger.status.insert(
            item.id,
            EffectStatus::DeadLettered {
                attempts,
                last_error: last_error.clone(),
            },
        );
        ledger.dead.push(DeadLetter {
            id: item.id,
            effect: item.effect,
            attempts,
            last_error,
        });
        self.finish(&mut ledger);
    }

    fn abandon(&self, items: &[Queued]) {
        let mut ledger = self.ledger();
        for item in items {
            let attempts = match ledger.status.get(&item.id) {
                Some(EffectStatus::Pending { attempts }) => *attempts,
                Some(EffectStatus::InFlight { attempt }) => *attempt,
                _ => 0,
            };
            ledger
                .status
                .insert(item.id, EffectStatus::Abandoned { attempts });
        }
        ledger.outstanding = 0;
        self.state.send_replace(QueueState::Idle);
    }
}

/// FIFO effect delivery with retry. Create with [`WriteQueue::spawn`]
/// inside a tokio runtime.
pub struct WriteQueue {
    tx: mpsc::UnboundedSender<Queued>,
    shared: Arc<Shared>,
    shutdown_tx: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<Vec<Queued>>>>,
}

impl WriteQueue {
    /// Start the consumer task.
    pub fn spawn(deliver: Arc<dyn Deliver>, config: QueueConfig) -> WriteQueue {
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state, _) = watch::channel(QueueState::Idle);
        let shared = Arc::new(Shared {
            ledger: Mutex::new(Ledger::default()),
            state,
            history_limit: config.history_limit,
        });

        let worker = tokio::spawn(run(deliver, config, Arc::clone(&shared), rx, shutdown_rx));

        WriteQueue {
            tx,
            shared,
            shutdown_tx,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Accept an effect for delivery. Returns immediately.
    pub fn enqueue(&self, effect: Effect) -> EffectId {
        let id = EffectId::fresh();
        self.shared.admit(id);
        if let Err(mpsc::error::SendError(item)) = self.tx.send(Queued { id, effect }) {
            tracing::error!(effect_id = %id, effect = item.effect.name(), "enqueue after shutdown; effect dead-lettered");
            self.shared
                .dead_letter(item, 0, "queue is shut down".to_string());
        }
        id
    }

    /// `None` for unknown ids and for deliveries that have aged out of the
    /// history.
    pub fn status(&self, id: EffectId) -> Option<EffectStatus> {
        self.shared.ledger().status.get(&id).cloned()
    }

    pub fn state(&self) -> QueueState {
        *self.shared.state.borrow()
    }

    /// Effects accepted but not yet delivered or dead-lettered.
    pub fn outstanding(&self) -> usize {
        self.shared.ledger().outstanding
    }

    /// The most recent successful deliveries, oldest first, up to
    /// `history_limit`.
    pub fn delivered(&self) -> Vec<DeliveredEffect> {
        self.shared.ledger().delivered.iter().cloned().collect()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.shared.ledger().dead.clone()
    }

    /// Wait until every accepted effect has been delivered or dead-lettered.
    pub async fn wait_idle(&self) {
        let mut state = self.shared.state.subscribe();
        // The sender lives in `self`, so this cannot observe a closed channel.
        let _ = state.wait_for(|s| *s == QueueState::Idle).await;
    }

    /// Stop the consumer once its current delivery attempt returns. Effects
    /// still owed are returned, never dropped silently.
    pub async fn shutdown(&self) -> ShutdownReport {
        self.shutdown_tx.send_replace(true);
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let undelivered = match worker {
            Some(handle) => match handle.await {
                Ok(items) => items,
                Err(e) => {
                    tracing::error!(error = %e, "write queue worker failed");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        for item in &undelivered {
            tracing::error!(effect_id = %item.id, effect = item.effect.name(), "effect undelivered at shutdown");
        }

        ShutdownReport {
            undelivered: undelivered.into_iter().map(|q| (q.id, q.effect)).collect(),
            dead_lettered: self.shared.ledger().dead.len(),
        }
    }
}

impl Drop for WriteQueue {
    fn drop(&mut self) {
        let worker_running = self
            .worker
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some();
        let outstanding = self.shared.ledger().outstanding;
        if worker_running && outstanding > 0 {
            tracing::warn!(outstanding, "write queue handle dropped; worker keeps draining");
        }
    }
}

impl EffectSink for WriteQueue {
    fn enqueue(&self, effect: Effect) -> EffectId {
        WriteQueue::enqueue(self, effect)
    }
}

/// Delay before retry number `failures` (1-based).
pub fn backoff_delay(config: &QueueConfig, failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(31);
    let delay = config
        .base_delay()
        .saturating_mul(1u32 << exponent)
        .min(config.max_delay());
    let half = delay.as_millis() as u64 / 2;
    if config.jitter && half > 0 {
        delay + Duration::from_millis(rand::thread_rng().gen_range(0..=half))
    } else {
        delay
    }
}

/// Resolves once shutdown is requested. A dropped handle is not a request;
/// the worker then runs until the effect channel closes.
async fn shutdown_requested(shutdown_rx: &mut watch::Receiver<bool>) {
    let closed = shutdown_rx.wait_for(|stop| *stop).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

async fn run(
    deliver: Arc<dyn Deliver>,
    config: QueueConfig,
    shared: Arc<Shared>,
    mut rx: mpsc::UnboundedReceiver<Queued>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Vec<Queued> {
    tracing::info!(max_attempts = ?config.max_attempts, "write queue started");
    let mut undelivered = Vec::new();

    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        let next = tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown_rx) => None,
            item = rx.recv() => item,
        };
        let Some(item) = next else {
            break;
        };
        if let Some(interrupted) =
            deliver_until_settled(deliver.as_ref(), &config, &shared, item, &mut shutdown_rx).await
        {
            undelivered.push(interrupted);
            break;
        }
    }

    rx.close();
    while let Ok(item) = rx.try_recv() {
        undelivered.push(item);
    }
    shared.abandon(&undelivered);
    tracing::info!(undelivered = undelivered.len(), "write queue stopped");
    undelivered
}

/// Deliver one effect, retrying until it is delivered or dead-lettered.
/// Returns the effect if shutdown interrupted a backoff wait.
async fn deliver_until_settled(
    deliver: &dyn Deliver,
    config: &QueueConfig,
    shared: &Shared,
    item: Queued,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> Option<Queued> {
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        shared.set_status(item.id, EffectStatus::InFlight { attempt: attempts });
        tracing::debug!(effect_id = %item.id, effect = item.effect.name(), attempt = attempts, "delivering");

        let error = match deliver.deliver(&item.effect).await {
            Ok(ack) => {
                tracing::debug!(effect_id = %item.id, ?ack, attempts, "delivered");
                shared.delivered(item, ack, attempts);
                return None;
            }
            Err(e) => e,
        };

        if config.max_attempts.is_some_and(|max| attempts >= max) {
            tracing::error!(
                effect_id = %item.id,
                effect = item.effect.name(),
                attempts,
                error = %error,
                "effect dead-lettered after max attempts"
            );
            shared.dead_letter(item, attempts, error.to_string());
            return None;
        }

        let delay = backoff_delay(config, attempts);
        tracing::warn!(
            effect_id = %item.id,
            effect = item.effect.name(),
            attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "delivery failed; will retry"
        );
        shared.set_status(item.id, EffectStatus::Pending { attempts });

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown_requested(shutdown_rx) => return Some(item),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::content::{ChapterId, PageId, StepId, StepKind};

    fn page_done(page: &str) -> Effect {
        Effect::CompletePage {
            chapter_id: ChapterId::from("c1"),
            step_id: StepId::from("s1"),
            page_id: PageId::from(page),
            step_kind: StepKind::Read,
        }
    }

    fn page_of(effect: &Effect) -> String {
        match effect {
            Effect::CompletePage { page_id, .. } => page_id.0.clone(),
            other => other.name().to_string(),
        }
    }

    fn config(max_attempts: Option<u32>) -> QueueConfig {
        QueueConfig {
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            max_attempts,
            jitter: false,
            history_limit: 64,
        }
    }

    /// Fails each listed page a set number of times, then succeeds.
    #[derive(Default)]
    struct Flaky {
        failures: Mutex<FxHashMap<String, u32>>,
        calls: Mutex<Vec<String>>,
    }

    impl Flaky {
        fn failing(page: &str, times: u32) -> Arc<Self> {
            let flaky = Flaky::default();
            flaky.failures.lock().unwrap().insert(page.to_string(), times);
            Arc::new(flaky)
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Deliver for Flaky {
        async fn deliver(&self, effect: &Effect) -> Result<Ack, DeliveryError> {
            let page = page_of(effect);
            self.calls.lock().unwrap().push(page.clone());
            tokio::time::sleep(Duration::from_millis(5)).await;
            let mut failures = self.failures.lock().unwrap();
            match failures.get_mut(&page) {
                Some(0) | None => Ok(Ack::Applied { xp_awarded: 10 }),
                Some(n) if *n == u32::MAX => Err(DeliveryError::Network("unreachable".into())),
                Some(n) => {
                    *n -= 1;
                    Err(DeliveryError::Timeout)
                }
            }
        }
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let cfg = config(None);
        let delays: Vec<u64> = (1..=6).map(|n| backoff_delay(&cfg, n).as_millis() as u64).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1_000, 1_000]);
        assert_eq!(backoff_delay(&cfg, 500).as_millis(), 1_000);

        let jittered = QueueConfig { jitter: true, ..cfg };
        let d = backoff_delay(&jittered, 2).as_millis();
        assert!((200..=300).contains(&d), "{}", d);
    }

    #[tokio::test(start_paused = true)]
    async fn second_effect_retries_in_place() {
        let deliver = Flaky::failing("p2", 2);
        let queue = WriteQueue::spawn(deliver.clone(), config(Some(5)));

        let ids: Vec<EffectId> = ["p1", "p2", "p3"].iter().map(|p| queue.enqueue(page_done(p))).collect();
        queue.wait_idle().await;

        let delivered = queue.delivered();
        let order: Vec<String> = delivered.iter().map(|d| page_of(&d.effect)).collect();
        assert_eq!(order, vec!["p1", "p2", "p3"]);
        assert_eq!(delivered[1].attempts, 3);
        assert_eq!(deliver.calls(), vec!["p1", "p2", "p2", "p2", "p3"]);
        for id in ids {
            assert!(matches!(queue.status(id), Some(EffectStatus::Delivered { .. })));
        }
        assert_eq!(queue.state(), QueueState::Idle);
        assert!(queue.dead_letters().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_effect_is_dead_lettered_and_queue_moves_on() {
        let deliver = Flaky::failing("bad", u32::MAX);
        let queue = WriteQueue::spawn(deliver.clone(), config(Some(3)));

        let bad = queue.enqueue(page_done("bad"));
        queue.enqueue(page_done("good"));
        queue.wait_idle().await;

        let dead = queue.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].id, bad);
        assert_eq!(dead[0].attempts, 3);
        assert_eq!(queue.delivered().len(), 1);
        assert_eq!(deliver.calls(), vec!["bad", "bad", "bad", "good"]);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_reports_what_is_still_owed() {
        let deliver = Flaky::failing("stuck", u32::MAX);
        let queue = WriteQueue::spawn(deliver.clone(), config(None));

        let stuck = queue.enqueue(page_done("stuck"));
        let behind = queue.enqueue(page_done("behind"));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(queue.state(), QueueState::Draining);
        assert_eq!(queue.outstanding(), 2);

        let report = queue.shutdown().await;
        let pages: Vec<String> = report.undelivered.iter().map(|(_, e)| page_of(e)).collect();
        assert_eq!(pages, vec!["stuck", "behind"]);
        assert!(deliver.calls().iter().all(|p| p == "stuck"));
        assert_eq!(queue.state(), QueueState::Idle);
        assert!(matches!(queue.status(stuck), Some(EffectStatus::Abandoned { attempts }) if attempts > 0));
        assert_eq!(queue.status(behind), Some(EffectStatus::Abandoned { attempts: 0 }));

        let late = queue.enqueue(page_done("late"));
        assert!(matches!(queue.status(late), Some(EffectStatus::DeadLettered { attempts: 0, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_handle_still_delivers_accepted_effects() {
        let deliver = Flaky::failing("p2", 1);
        {
            let queue = WriteQueue::spawn(deliver.clone(), config(Some(5)));
            for page in ["p1", "p2", "p3"] {
                queue.enqueue(page_done(page));
            }
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(deliver.calls(), vec!["p1", "p2", "p2", "p3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn delivered_history_keeps_only_the_newest() {
        let deliver = Arc::new(Flaky::default());
        let queue = WriteQueue::spawn(
            deliver.clone(),
            QueueConfig {
                history_limit: 2,
                ..config(Some(3))
            },
        );

        let ids: Vec<EffectId> = (1..=5).map(|n| queue.enqueue(page_done(&format!("p{}", n)))).collect();
        queue.wait_idle().await;

        let kept: Vec<String> = queue.delivered().iter().map(|d| page_of(&d.effect)).collect();
        assert_eq!(kept, vec!["p4", "p5"]);
        assert_eq!(queue.status(ids[0]), None);
        assert!(matches!(queue.status(ids[4]), Some(EffectStatus::Delivered { .. })));
        assert_eq!(deliver.calls().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_producers_keep_their_own_order() {
        let deliver = Arc::new(Flaky::default());
        let queue = Arc::new(WriteQueue::spawn(deliver.clone(), config(Some(3))));

        let mut producers = Vec::new();
        for producer in 0..4 {
            let queue = Arc::clone(&queue);
            producers.push(tokio::spawn(async move {
                for n in 0..5 {
                    queue.enqueue(page_done(&format!("w{}-{}", producer, n)));
                    tokio::task::yield_now().await;
                }
            }));
        }
        for p in producers {
            p.await.unwrap();
        }
        queue.wait_idle().await;

        let delivered: Vec<String> = queue.delivered().iter().map(|d| page_of(&d.effect)).collect();
        assert_eq!(delivered.len(), 20);
        for producer in 0..4 {
            let mine: Vec<&String> = delivered
                .iter()
                .filter(|p| p.starts_with(&format!("w{}-", producer)))
                .collect();
            let expected: Vec<String> = (0..5).map(|n| format!("w{}-{}", producer, n)).collect();
            assert_eq!(mine, expected.iter().collect::<Vec<_>>());
        }
    }
}
