//! Console sink: the append-only transcript of a build session.
//!
//! Text is stored as produced and masked when rendered. Every rendering path
//! (`output`, `lines`, the live tee) goes through the same [`Redactor`], so a
//! value registered as secret never becomes observable in plaintext.

use std::borrow::Cow;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use regex::Regex;
use tokio::sync::mpsc::UnboundedSender;

/// Fixed mask shown in place of secret values.
pub const MASK: &str = "********";

/// Replaces registered secret substrings with [`MASK`].
///
/// Secrets are matched literally. Longer secrets win over shorter ones that
/// are substrings of them.
#[derive(Debug, Default, Clone)]
pub struct Redactor {
    secrets: Vec<String>,
    pattern: Option<Regex>,
}

impl Redactor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a secret. Empty and already-known values are ignored.
    pub fn add(&mut self, secret: &str) {
        if secret.is_empty() || self.secrets.iter().any(|s| s == secret) {
            return;
        }
        self.secrets.push(secret.to_string());
        self.secrets.sort_by(|a, b| b.len().cmp(&a.len()));

        let alternation = self
            .secrets
            .iter()
            .map(|s| regex::escape(s))
            .collect::<Vec<_>>()
            .join("|");
        // Escaped literals always form a valid pattern.
        self.pattern = Regex::new(&alternation).ok();
    }

    /// Number of registered secrets.
    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }

    /// Mask every registered secret in `text`.
    pub fn redact<'a>(&self, text: &'a str) -> Cow<'a, str> {
        match &self.pattern {
            Some(re) => re.replace_all(text, MASK),
            None => Cow::Borrowed(text),
        }
    }
}

/// One appended line of console output.
#[derive(Clone)]
struct ConsoleLine {
    at: DateTime<Utc>,
    text: String,
}

#[derive(Default)]
struct ConsoleState {
    lines: Vec<ConsoleLine>,
    redactor: Redactor,
    tee: Option<UnboundedSender<String>>,
}

/// Thread-safe, cloneable handle to a session transcript.
///
/// Clones share the same transcript. Appending never fails; rendering always
/// masks secrets.
#[derive(Clone, Default)]
pub struct ConsoleSink {
    inner: Arc<Mutex<ConsoleState>>,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward every appended line, already masked, to `tx`.
    pub fn with_tee(self, tx: UnboundedSender<String>) -> Self {
        self.state().tee = Some(tx);
        self
    }

    fn state(&self) -> MutexGuard<'_, ConsoleState> {
        // A panic while holding the lock cannot leave the transcript
        // half-written, so a poisoned lock is still usable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append text. Multi-line text is split into one entry per line.
    pub fn append(&self, text: impl AsRef<str>) {
        let mut state = self.state();
        let at = Utc::now();
        for line in text.as_ref().lines() {
            if let Some(tx) = &state.tee {
                let masked = state.redactor.redact(line).into_owned();
                // A closed receiver only means nobody is watching live.
                let _ = tx.send(masked);
            }
            state.lines.push(ConsoleLine {
                at,
                text: line.to_string(),
            });
        }
    }

    /// Register a value that must never appear in rendered output.
    pub fn add_secret(&self, secret: &str) {
        self.state().redactor.add(secret);
    }

    /// Mask known secrets in arbitrary text (e.g. step labels, errors).
    pub fn redact(&self, text: &str) -> String {
        self.state().redactor.redact(text).into_owned()
    }

    /// Masked transcript, one line per entry, each terminated by `\n`.
    pub fn output(&self) -> String {
        let state = self.state();
        let mut out = String::new();
        for line in &state.lines {
            out.push_str(&state.redactor.redact(&line.text));
            out.push('\n');
        }
        out
    }

    /// Masked transcript lines.
    pub fn lines(&self) -> Vec<String> {
        let state = self.state();
        state
            .lines
            .iter()
            .map(|l| state.redactor.redact(&l.text).into_owned())
            .collect()
    }

    /// Masked transcript with a `HH:MM:SS.mmm` UTC prefix on every line.
    pub fn output_with_timestamps(&self) -> String {
        let state = self.state();
        let mut out = String::new();
        for line in &state.lines {
            out.push_str(&line.at.format("%H:%M:%S%.3f ").to_string());
            out.push_str(&state.redactor.redact(&line.text));
            out.push('\n');
        }
        out
    }

    /// Number of lines appended so far.
    pub fn len(&self) -> usize {
        self.state().lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().lines.is_empty()
    }
}

impl std::fmt::Debug for ConsoleSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("ConsoleSink")
            .field("lines", &state.lines.len())
            .field("secrets", &state.redactor.len())
            .finish()
    }
}
