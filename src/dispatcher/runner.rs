//! Update polling loop.
//!
//! The dispatcher follows a simple state machine:
//! 1. `Idle` until [`Dispatcher::run`] (or [`Dispatcher::start`]) is called
//! 2. `Polling`: run loop tasks, wait for the poll interval, fetch updates
//!    with `offset = cursor + 1`
//! 3. `Dispatching`: for each fetched update, in ascending id order:
//!    - advance the cursor
//!    - decode it; malformed payloads are logged and skipped
//!    - route it to a command, the message handlers, or the callback handler
//!    - handler errors and panics are logged; the next update still runs
//! 4. Back to `Polling` after the batch, saving the cursor if it changed
//! 5. `Stopped` on a shutdown message, checked between updates and while
//!    waiting on a fetch, never inside a handler
//!
//! Transport failures defer the next fetch by the retry delay; a flood wait
//! defers it by the time Telegram asked for. A rejected token ends the loop.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{Instrument, debug, debug_span, error, info, info_span, warn};

use super::state::{Cursor, PersistentState};
use crate::commands::{
    CallbackContext, CallbackQueryHandler, CommandContext, CommandRegistry, HandlerResult,
    LoopTask, MessageContext, MessageHandler,
};
use crate::config::BotConfig;
use crate::telegram::{
    CallbackQuery, Message, RateLimiter, TelegramBot, TelegramError, Update, UpdateKind,
    UpdateSource,
};

/// Messages that can be sent to a running dispatcher.
#[derive(Debug, Clone)]
pub enum DispatcherMessage {
    /// Stop at the next update boundary.
    Shutdown,
}

/// Lifecycle phase of the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherPhase {
    Idle,
    Polling,
    Dispatching,
    Stopped,
}

/// Counters for one processed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Updates in the batch.
    pub received: usize,
    /// Updates handed to at least one handler.
    pub dispatched: usize,
    /// Updates skipped (malformed, already seen, or nothing to run).
    pub skipped: usize,
    /// Dispatched updates whose handler returned an error or panicked.
    pub failed: usize,
}

/// Errors surfaced by a dispatcher run.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Telegram(#[from] TelegramError),

    #[error("Dispatcher task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

enum Outcome {
    Dispatched,
    Failed,
    Ignored,
}

/// Polls for updates and routes them to handlers.
pub struct Dispatcher {
    /// Facade handed to handlers.
    bot: Arc<TelegramBot>,

    /// Where updates come from (the facade itself unless replaced).
    source: Arc<dyn UpdateSource>,

    /// Command handlers.
    registry: Arc<CommandRegistry>,

    /// Handlers for non-command messages.
    message_handlers: Vec<Arc<dyn MessageHandler>>,

    /// Handler for callback queries.
    callback_handler: Option<Arc<dyn CallbackQueryHandler>>,

    /// Tasks run at the start of every iteration.
    loop_tasks: Vec<Arc<dyn LoopTask>>,

    /// Last processed update id.
    cursor: Cursor,

    /// Cursor value last written to disk.
    saved_cursor: Cursor,

    phase: DispatcherPhase,

    /// Poll pacing and back-off.
    limiter: RateLimiter,

    poll_timeout: Duration,
    retry_delay: Duration,
    allowed_updates: Vec<String>,

    /// Path to save the cursor.
    state_path: Option<PathBuf>,

    /// Spawn handlers instead of awaiting them inline.
    concurrent: bool,

    /// Handlers still running in concurrent mode.
    in_flight: JoinSet<()>,
}

impl Dispatcher {
    /// Creates a dispatcher polling through `bot`.
    ///
    /// Restores the cursor from `config.state_path` when the file exists.
    #[must_use]
    pub fn new(bot: Arc<TelegramBot>, registry: CommandRegistry, config: &BotConfig) -> Self {
        let cursor = config
            .state_path
            .as_ref()
            .map_or_else(Cursor::new, |path| {
                Cursor::from_persistent(&PersistentState::load(path))
            });

        if let Some(last) = cursor.last_update_id() {
            info!("Resuming after update {}", last);
        }

        let source: Arc<dyn UpdateSource> = bot.clone();

        Self {
            bot,
            source,
            registry: Arc::new(registry),
            message_handlers: Vec::new(),
            callback_handler: None,
            loop_tasks: Vec::new(),
            cursor,
            saved_cursor: cursor,
            phase: DispatcherPhase::Idle,
            limiter: RateLimiter::new(config.poll_interval()),
            poll_timeout: config.poll_timeout(),
            retry_delay: config.retry_delay(),
            allowed_updates: config.allowed_updates.clone(),
            state_path: config.state_path.clone(),
            concurrent: config.concurrent_handlers,
            in_flight: JoinSet::new(),
        }
    }

    /// Replaces the update source.
    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn UpdateSource>) -> Self {
        self.source = source;
        self
    }

    /// Adds a handler for non-command messages.
    #[must_use]
    pub fn with_message_handler(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.message_handlers.push(handler);
        self
    }

    /// Sets the callback query handler.
    #[must_use]
    pub fn with_callback_handler(mut self, handler: Arc<dyn CallbackQueryHandler>) -> Self {
        self.callback_handler = Some(handler);
        self
    }

    /// Adds a task run at the start of every polling iteration.
    #[must_use]
    pub fn with_loop_task(mut self, task: Arc<dyn LoopTask>) -> Self {
        self.loop_tasks.push(task);
        self
    }

    /// Starts from the given cursor instead of the stored one.
    #[must_use]
    pub const fn with_cursor(mut self, cursor: Cursor) -> Self {
        self.cursor = cursor;
        self
    }

    /// Overrides the delay used after a failed fetch.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Overrides the minimum spacing between fetches.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.limiter = RateLimiter::new(interval);
        self
    }

    /// Current cursor.
    #[must_use]
    pub const fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// Current lifecycle phase.
    #[must_use]
    pub const fn phase(&self) -> DispatcherPhase {
        self.phase
    }

    /// Spawns the loop and returns a handle to stop it.
    #[must_use]
    pub fn start(self) -> DispatcherHandle {
        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(self.run(rx));
        DispatcherHandle { tx, task }
    }

    /// Runs the polling loop until shutdown.
    ///
    /// Returns the final cursor, or the error that ended the loop.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<DispatcherMessage>,
    ) -> Result<Cursor, TelegramError> {
        info!("Dispatcher started");
        info!("Commands enabled: {:?}", self.registry.tokens());
        info!(
            "Message handlers: {}, loop tasks: {:?}, callback handler: {}",
            self.message_handlers.len(),
            self.loop_tasks.iter().map(|t| t.name()).collect::<Vec<_>>(),
            self.callback_handler.is_some()
        );

        self.phase = DispatcherPhase::Polling;

        let result = loop {
            if stop_requested(&mut rx) {
                break Ok(());
            }

            self.run_loop_tasks().await;

            let fetched = tokio::select! {
                biased;
                msg = rx.recv() => {
                    match msg {
                        Some(DispatcherMessage::Shutdown) | None => break Ok(()),
                    }
                }
                fetched = self.fetch() => fetched,
            };

            match fetched {
                Ok(batch) if batch.is_empty() => {
                    debug!("No new updates");
                }
                Ok(batch) => {
                    let (summary, interrupted) = self.dispatch_batch(batch, Some(&mut rx)).await;
                    log_summary(&summary);
                    self.persist_cursor();
                    if interrupted {
                        break Ok(());
                    }
                }
                Err(TelegramError::Unauthorized) => {
                    error!("Access token rejected, stopping dispatcher");
                    break Err(TelegramError::Unauthorized);
                }
                Err(TelegramError::FloodWait(seconds)) => {
                    warn!("Flood wait from Telegram: {} seconds", seconds);
                    self.limiter.defer(Duration::from_secs(seconds)).await;
                    debug!("Next poll in {:?}", self.limiter.time_until_allowed().await);
                }
                Err(e) if e.is_recoverable() => {
                    warn!("Polling failed: {}. Retrying in {:?}", e, self.retry_delay);
                    self.limiter.defer(self.retry_delay).await;
                }
                Err(e) => {
                    error!("Polling rejected: {}. Retrying in {:?}", e, self.retry_delay);
                    self.limiter.defer(self.retry_delay).await;
                }
            }
        };

        self.drain_in_flight().await;
        self.persist_cursor();
        self.phase = DispatcherPhase::Stopped;
        info!("Dispatcher stopped at update {:?}", self.cursor.last_update_id());

        result.map(|()| self.cursor)
    }

    /// Runs one polling iteration: loop tasks, one fetch, the batch.
    pub async fn poll_once(&mut self) -> Result<BatchSummary, TelegramError> {
        self.run_loop_tasks().await;
        let batch = self.fetch().await?;
        let summary = self.process_batch(batch).await;
        self.persist_cursor();
        Ok(summary)
    }

    /// Processes a batch of raw updates.
    pub async fn process_batch(&mut self, batch: Vec<Value>) -> BatchSummary {
        self.dispatch_batch(batch, None).await.0
    }

    async fn fetch(&self) -> Result<Vec<Value>, TelegramError> {
        let waited = self.limiter.wait_and_acquire().await;
        if !waited.is_zero() {
            debug!("Waited {:?} before polling", waited);
        }

        let offset = self.cursor.next_offset();
        debug!("Polling for updates (offset {:?})", offset);

        self.source
            .fetch_updates(offset, self.poll_timeout, &self.allowed_updates)
            .await
    }

    async fn dispatch_batch(
        &mut self,
        mut batch: Vec<Value>,
        mut stop: Option<&mut mpsc::Receiver<DispatcherMessage>>,
    ) -> (BatchSummary, bool) {
        let mut summary = BatchSummary {
            received: batch.len(),
            ..BatchSummary::default()
        };

        batch.sort_by_key(|raw| Update::peek_id(raw).unwrap_or(i64::MIN));

        self.phase = DispatcherPhase::Dispatching;

        for (index, raw) in batch.into_iter().enumerate() {
            if let Some(rx) = stop.as_deref_mut()
                && stop_requested(rx)
            {
                info!(
                    "Stop requested, leaving {} updates for the next run",
                    summary.received - index
                );
                self.phase = DispatcherPhase::Polling;
                return (summary, true);
            }

            let Some(update_id) = Update::peek_id(&raw) else {
                warn!("Skipping update without update_id: {}", raw);
                summary.skipped += 1;
                continue;
            };

            if self.cursor.has_seen(update_id) {
                debug!(update_id, "Skipping already processed update");
                summary.skipped += 1;
                continue;
            }
            self.cursor.advance(update_id);

            let update = match Update::from_value(&raw) {
                Ok(update) => update,
                Err(e) => {
                    warn!(update_id, "Skipping malformed update: {}", e);
                    summary.skipped += 1;
                    continue;
                }
            };

            let outcome = self
                .dispatch(update)
                .instrument(debug_span!("update", id = update_id))
                .await;

            match outcome {
                Outcome::Dispatched => summary.dispatched += 1,
                Outcome::Failed => {
                    summary.dispatched += 1;
                    summary.failed += 1;
                }
                Outcome::Ignored => summary.skipped += 1,
            }
        }

        self.phase = DispatcherPhase::Polling;
        (summary, false)
    }

    async fn dispatch(&mut self, update: Update) -> Outcome {
        match update.kind {
            UpdateKind::Message(message) => self.dispatch_message(message).await,
            UpdateKind::CallbackQuery(query) => self.dispatch_callback(query).await,
            UpdateKind::Unsupported(kind) => {
                debug!("Ignoring unsupported update type '{}'", kind);
                Outcome::Ignored
            }
        }
    }

    async fn dispatch_message(&mut self, message: Message) -> Outcome {
        let text = message.text().to_owned();
        let from = message
            .sender
            .as_ref()
            .map(|u| format!(" from {}", u.display_name()))
            .unwrap_or_default();

        debug!(chat_id = message.chat_id(), "New message{}", from);

        if let Some((handler, parsed)) = self.registry.resolve(&text) {
            info!("Executing command: '{}'{}", parsed, from);

            let ctx = CommandContext {
                bot: Arc::clone(&self.bot),
                message,
                command: parsed.token,
                args: parsed.args,
            };
            let label = ctx.command.clone();
            return self
                .invoke(label, async move { handler.execute(ctx).await })
                .await;
        }

        if self.registry.looks_like_command(&text) {
            debug!("No handler registered for '{}'", text);
            return Outcome::Ignored;
        }

        if self.message_handlers.is_empty() {
            debug!("No message handlers, ignoring message");
            return Outcome::Ignored;
        }

        let mut failed = false;
        for handler in self.message_handlers.clone() {
            let ctx = MessageContext {
                bot: Arc::clone(&self.bot),
                message: message.clone(),
            };
            let outcome = self
                .invoke("message handler".to_owned(), async move {
                    handler.handle(ctx).await
                })
                .await;
            failed |= matches!(outcome, Outcome::Failed);
        }

        if failed {
            Outcome::Failed
        } else {
            Outcome::Dispatched
        }
    }

    async fn dispatch_callback(&mut self, query: CallbackQuery) -> Outcome {
        let Some(handler) = self.callback_handler.clone() else {
            debug!("No callback query handler, ignoring query {}", query.id);
            return Outcome::Ignored;
        };

        debug!(
            "Callback query {} from {} with data {:?}",
            query.id,
            query.sender.display_name(),
            query.data
        );

        let ctx = CallbackContext {
            bot: Arc::clone(&self.bot),
            query,
        };
        self.invoke("callback handler".to_owned(), async move {
            handler.handle(ctx).await
        })
        .await
    }

    /// Runs a handler future inline, or spawns it in concurrent mode.
    async fn invoke<F>(&mut self, label: String, fut: F) -> Outcome
    where
        F: Future<Output = HandlerResult> + Send + 'static,
    {
        if !self.concurrent {
            return if run_guarded(&label, fut).await {
                Outcome::Dispatched
            } else {
                Outcome::Failed
            };
        }

        let span = tracing::Span::current();
        self.in_flight.spawn(
            async move {
                run_guarded(&label, fut).await;
            }
            .instrument(span),
        );
        self.reap_finished();
        Outcome::Dispatched
    }

    async fn run_loop_tasks(&self) {
        for task in &self.loop_tasks {
            let task = Arc::clone(task);
            let bot = Arc::clone(&self.bot);
            let span = info_span!("loop_task", name = task.name());
            let label = task.name().to_owned();
            run_guarded(&label, async move { task.run(bot).await })
                .instrument(span)
                .await;
        }
    }

    fn reap_finished(&mut self) {
        while let Some(result) = self.in_flight.try_join_next() {
            if let Err(e) = result {
                error!("Handler task aborted: {}", e);
            }
        }
    }

    async fn drain_in_flight(&mut self) {
        if !self.in_flight.is_empty() {
            info!("Waiting for {} running handlers", self.in_flight.len());
        }
        while let Some(result) = self.in_flight.join_next().await {
            if let Err(e) = result {
                error!("Handler task aborted: {}", e);
            }
        }
    }

    fn persist_cursor(&mut self) {
        let Some(path) = &self.state_path else {
            return;
        };
        if self.cursor == self.saved_cursor {
            return;
        }

        match self.cursor.to_persistent().save(path) {
            Ok(()) => {
                debug!("Saved cursor {:?} to {}", self.cursor.last_update_id(), path.display());
                self.saved_cursor = self.cursor;
            }
            Err(e) => warn!("Failed to save state: {}", e),
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("phase", &self.phase)
            .field("cursor", &self.cursor)
            .field("registry", &self.registry)
            .field("concurrent", &self.concurrent)
            .finish_non_exhaustive()
    }
}

/// Handle to a dispatcher started with [`Dispatcher::start`].
#[derive(Debug)]
pub struct DispatcherHandle {
    tx: mpsc::Sender<DispatcherMessage>,
    task: JoinHandle<Result<Cursor, TelegramError>>,
}

impl DispatcherHandle {
    /// Asks the loop to stop and waits for it.
    pub async fn stop(self) -> Result<Cursor, DispatchError> {
        // The loop may already have ended on its own.
        let _ = self.tx.send(DispatcherMessage::Shutdown).await;
        self.wait().await
    }

    /// Waits for the loop to end on its own.
    pub async fn wait(self) -> Result<Cursor, DispatchError> {
        Ok(self.task.await??)
    }

    /// True once the loop has ended.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

fn stop_requested(rx: &mut mpsc::Receiver<DispatcherMessage>) -> bool {
    match rx.try_recv() {
        Ok(DispatcherMessage::Shutdown) | Err(TryRecvError::Disconnected) => true,
        Err(TryRecvError::Empty) => false,
    }
}

/// Awaits a handler, turning errors and panics into a log line.
///
/// Returns true if the handler succeeded.
async fn run_guarded<F>(label: &str, fut: F) -> bool
where
    F: Future<Output = HandlerResult>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(())) => {
            debug!("{} finished", label);
            true
        }
        Ok(Err(e)) => {
            error!("{} failed: {}", label, e);
            false
        }
        Err(panic) => {
            error!("{} panicked: {}", label, panic_message(panic.as_ref()));
            false
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

fn log_summary(summary: &BatchSummary) {
    if summary.failed > 0 {
        warn!(
            "Batch done: {} received, {} dispatched, {} skipped, {} failed",
            summary.received, summary.dispatched, summary.skipped, summary.failed
        );
    } else {
        debug!(
            "Batch done: {} received, {} dispatched, {} skipped",
            summary.received, summary.dispatched, summary.skipped
        );
    }
}
