use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::agent::Processor;
use crate::config::Config;
use crate::dedup;
use crate::platform::ReplyDispatcher;
use crate::store::cursor::CursorStore;
use crate::store::{from_messages_epoch, Message, MessageSource};

/// Text conventions and pacing for one relay.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub trigger: String,
    pub reply_emblem: String,
    pub error_marker: String,
    /// Reply recipient. `None` replies in the self-conversation.
    pub target_handle: Option<String>,
    pub message_pause: Duration,
}

impl RelaySettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            trigger: config.messages.trigger.clone(),
            reply_emblem: config.messages.reply_emblem.clone(),
            error_marker: config.messages.error_marker.clone(),
            target_handle: config.delivery.target_handle.clone(),
            message_pause: config.message_pause(),
        }
    }
}

/// What one poll cycle did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    /// Rows returned by the store
    pub fetched: usize,
    /// Rows that survived the re-filter and moved the cursor
    pub claimed: usize,
    /// Agent replies delivered
    pub replied: usize,
    pub service_errors: usize,
    pub delivery_errors: usize,
}

/// The poll loop state: one cursor, one source, one bridge, one dispatcher.
pub struct Relay {
    source: Arc<dyn MessageSource>,
    processor: Arc<dyn Processor>,
    dispatcher: Arc<dyn ReplyDispatcher>,
    cursor_store: CursorStore,
    cursor: Mutex<i64>,
    settings: RelaySettings,
}

impl Relay {
    /// Build a relay, loading the cursor from `cursor_store`.
    pub fn new(
        source: Arc<dyn MessageSource>,
        processor: Arc<dyn Processor>,
        dispatcher: Arc<dyn ReplyDispatcher>,
        cursor_store: CursorStore,
        settings: RelaySettings,
    ) -> Self {
        let cursor = cursor_store.load();
        Self {
            source,
            processor,
            dispatcher,
            cursor_store,
            cursor: Mutex::new(cursor),
            settings,
        }
    }

    pub async fn cursor(&self) -> i64 {
        *self.cursor.lock().await
    }

    /// The command carried by a trigger message.
    pub fn command_text<'a>(&self, text: &'a str) -> &'a str {
        text.strip_prefix(self.settings.trigger.as_str())
            .unwrap_or(text)
            .trim()
    }

    fn reply_text(&self, reply: &str) -> String {
        format!("{} {}", self.settings.reply_emblem, reply)
    }

    fn failure_text(&self, detail: &str) -> String {
        format!(
            "{} {} {}",
            self.settings.reply_emblem, self.settings.error_marker, detail
        )
    }

    /// Run one poll cycle: fetch, claim, then process claimed messages in order.
    ///
    /// Safe to run concurrently with itself: claims happen under the cursor
    /// lock, so two cycles never process the same message.
    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();

        let since = self.cursor().await;
        debug!("Checking for new messages (last timestamp: {})", since);

        let candidates = match self.source.fetch_candidates(since).await {
            Ok(candidates) => candidates,
            Err(e) => {
                error!("Error checking for new messages: {}", e);
                return report;
            }
        };
        report.fetched = candidates.len();

        if candidates.is_empty() {
            debug!("No new messages found");
            return report;
        }

        let claimed = self.claim(candidates).await;
        report.claimed = claimed.len();
        if claimed.is_empty() {
            return report;
        }

        info!("Found {} new message(s)", claimed.len());
        for (i, message) in claimed.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.settings.message_pause).await;
            }
            self.handle(message, &mut report).await;
        }

        report
    }

    /// Re-filter against the current cursor, then advance and persist it
    /// before anything is processed.
    async fn claim(&self, candidates: Vec<Message>) -> Vec<Message> {
        let mut cursor = self.cursor.lock().await;
        let fresh = dedup::filter_unseen(candidates, *cursor);

        if let Some(latest) = dedup::max_timestamp(&fresh) {
            info!("Updating timestamp from {} to {}", *cursor, latest);
            *cursor = latest;
            if let Err(e) = self.cursor_store.save(latest) {
                warn!(
                    "Failed to persist cursor to {}: {:#}",
                    self.cursor_store.path().display(),
                    e
                );
            }
        }

        fresh
    }

    async fn handle(&self, message: &Message, report: &mut CycleReport) {
        let sent_at = from_messages_epoch(message.date)
            .map(|t| t.to_rfc3339())
            .unwrap_or_default();
        info!(
            rowid = message.rowid,
            guid = %message.guid,
            from = message.handle.as_deref().unwrap_or("unknown"),
            sent_at = %sent_at,
            "Processing message: {:?}",
            message.text
        );

        let command = self.command_text(&message.text);
        let (reply, is_failure) = match self.processor.process(command).await {
            Ok(reply) => (self.reply_text(&reply), false),
            Err(e) => {
                warn!(rowid = message.rowid, "Agent request failed: {}", e);
                report.service_errors += 1;
                (self.failure_text(&e.to_string()), true)
            }
        };

        let target = self.settings.target_handle.as_deref();
        match self.dispatcher.deliver(&reply, target).await {
            Ok(()) => {
                if !is_failure {
                    report.replied += 1;
                }
                info!(rowid = message.rowid, "Finished processing message");
            }
            Err(e) => {
                report.delivery_errors += 1;
                error!(rowid = message.rowid, "Failed to deliver reply: {}", e);
                // A failure reply that cannot be delivered is terminal
                if is_failure {
                    return;
                }
                let notice = self.failure_text(&format!("could not deliver reply: {e}"));
                if let Err(e) = self.dispatcher.deliver(&notice, target).await {
                    error!(rowid = message.rowid, "Failed to deliver error notice: {}", e);
                }
            }
        }
    }
}
