//! Messages.app delivery through AppleScript.
//!
//! The automation host reports some failures only through the script's return
//! value, so every run is decoded into a [`ScriptOutcome`] here and callers see
//! a plain `Result`.

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use super::ReplyDispatcher;
use crate::error::DeliveryError;

/// Sentinel the scripts (and Messages itself) put in front of failures
const ERROR_SENTINEL: &str = "Error:";

/// Result of one script run, decoded from its textual output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptOutcome {
    Sent(String),
    Failed(String),
}

impl ScriptOutcome {
    pub fn decode(output: &str) -> Self {
        let output = output.trim();
        if output.contains(ERROR_SENTINEL) {
            ScriptOutcome::Failed(output.to_string())
        } else {
            ScriptOutcome::Sent(output.to_string())
        }
    }
}

/// Executes an AppleScript source and returns its stdout.
#[async_trait]
pub trait ScriptRunner: Send + Sync {
    async fn run(&self, script: &str) -> Result<String, DeliveryError>;
}

/// Runs scripts with `osascript -e`.
pub struct Osascript {
    program: PathBuf,
}

impl Osascript {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl ScriptRunner for Osascript {
    async fn run(&self, script: &str) -> Result<String, DeliveryError> {
        let output = tokio::process::Command::new(&self.program)
            .arg("-e")
            .arg(script)
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(DeliveryError::Script {
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Escape text for use inside an AppleScript string literal.
pub fn escape_applescript(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out
}

/// Short preview for log lines
fn preview(text: &str) -> String {
    match text.char_indices().nth(50) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Reply dispatcher driving Messages.app.
pub struct MessagesApp {
    runner: Box<dyn ScriptRunner>,
    settle_delay: Duration,
}

impl MessagesApp {
    pub fn new(runner: Box<dyn ScriptRunner>, settle_delay: Duration) -> Self {
        Self {
            runner,
            settle_delay,
        }
    }

    /// Build the send script.
    ///
    /// With a target, sends to that participant of the first iMessage account.
    /// Without one, sends to the first single-participant chat, falling back
    /// to the account's own handle.
    pub fn send_script(&self, text: &str, target: Option<&str>) -> String {
        let text = escape_applescript(text);
        let settle = format!("{:.3}", self.settle_delay.as_secs_f64());

        match target {
            Some(handle) => {
                let handle = escape_applescript(handle);
                format!(
                    r#"tell application "Messages"
    activate
    delay {settle}
    try
        set targetService to 1st account whose service type is iMessage
        set targetBuddy to participant "{handle}" of targetService
        send "{text}" to targetBuddy
        delay 0.3
        return "Message sent successfully to {handle}"
    on error errMsg
        return "Error: " & errMsg
    end try
end tell"#
                )
            }
            None => format!(
                r#"tell application "Messages"
    activate
    delay {settle}
    try
        repeat with aChat in chats
            if (count of participants of aChat) = 1 then
                send "{text}" to aChat
                delay 0.3
                return "Message sent successfully to yourself"
            end if
        end repeat
        set myAccounts to accounts whose service type is iMessage
        if (count of myAccounts) > 0 then
            set myAccount to item 1 of myAccounts
            set myHandle to id of myAccount
            set targetBuddy to participant myHandle of myAccount
            send "{text}" to targetBuddy
            delay 0.3
            return "Message sent successfully (fallback)"
        else
            return "Error: No iMessage account found"
        end if
    on error errMsg
        return "Error: " & errMsg
    end try
end tell"#
            ),
        }
    }

    /// Check that the automation host answers at all.
    pub async fn app_name(&self) -> Result<String, DeliveryError> {
        let output = self
            .runner
            .run(r#"tell application "Messages" to get name"#)
            .await?;
        match ScriptOutcome::decode(&output) {
            ScriptOutcome::Sent(name) => Ok(name),
            ScriptOutcome::Failed(msg) => Err(DeliveryError::Rejected(msg)),
        }
    }
}

#[async_trait]
impl ReplyDispatcher for MessagesApp {
    async fn deliver(&self, text: &str, target: Option<&str>) -> Result<(), DeliveryError> {
        debug!("Preparing to send iMessage: {:?}", preview(text));
        let script = self.send_script(text, target);

        let started = Instant::now();
        let result = self.runner.run(&script).await;
        debug!("AppleScript completed in {}ms", started.elapsed().as_millis());

        match ScriptOutcome::decode(&result?) {
            ScriptOutcome::Sent(detail) => {
                info!("iMessage sent: {}", detail);
                Ok(())
            }
            ScriptOutcome::Failed(detail) => {
                error!("iMessage delivery failed: {}", detail);
                Err(DeliveryError::Rejected(detail))
            }
        }
    }
}
