//! Transcript endpointing.
//!
//! A live transcript is handed to chat immediately when it ends a sentence,
//! otherwise once no new transcript text has arrived for the quiet period.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Default quiet period before a transcript is forwarded.
pub const DEFAULT_DEBOUNCE_MS: u64 = 600;

const TERMINAL_PUNCTUATION: [char; 6] = ['.', '!', '?', '。', '！', '？'];

/// Callback receiving each finished utterance.
pub type UtteranceCallback =
    Arc<dyn Fn(String) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

pub fn ends_with_terminal_punctuation(text: &str) -> bool {
    text.trim_end()
        .chars()
        .next_back()
        .is_some_and(|c| TERMINAL_PUNCTUATION.contains(&c))
}

/// How successive transcripts from one transport relate to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TranscriptMode {
    /// Each transcript is everything heard so far; only the text after what
    /// was already forwarded belongs to the current utterance.
    #[default]
    Cumulative,
    /// Each transcript is the live text of the current utterance.
    Live,
}

#[derive(Debug, Clone, PartialEq)]
struct Pending {
    transcript: String,
    utterance: String,
}

/// Debounce state machine, driven by explicit timestamps.
///
/// Repeats are only suppressed within the utterance being built; once an
/// utterance is forwarded the next one starts fresh.
#[derive(Debug, Clone)]
pub struct TranscriptDebouncer {
    quiet: Duration,
    mode: TranscriptMode,
    pending: Option<Pending>,
    deadline: Option<Instant>,
    /// Cumulative transcript already handed off.
    committed: String,
}

impl Default for TranscriptDebouncer {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_DEBOUNCE_MS))
    }
}

impl TranscriptDebouncer {
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            mode: TranscriptMode::default(),
            pending: None,
            deadline: None,
            committed: String::new(),
        }
    }

    pub fn with_mode(mut self, mode: TranscriptMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> TranscriptMode {
        self.mode
    }

    /// Feed the latest transcript. Returns an utterance to forward right away.
    ///
    /// Repeating the pending utterance does not restart the quiet period.
    pub fn update(&mut self, transcript: &str, now: Instant) -> Option<String> {
        let transcript = transcript.trim();
        let utterance = match transcript.strip_prefix(self.committed.as_str()) {
            Some(rest) => rest.trim(),
            None => {
                // Transcript restarted from scratch.
                self.committed.clear();
                transcript
            }
        };
        if utterance.is_empty() {
            return None;
        }

        let pending = Pending {
            transcript: transcript.to_string(),
            utterance: utterance.to_string(),
        };

        if ends_with_terminal_punctuation(utterance) {
            self.deadline = None;
            self.pending = None;
            return Some(self.commit(pending));
        }

        let restart = self
            .pending
            .as_ref()
            .is_none_or(|current| current.utterance != pending.utterance);
        if restart {
            self.deadline = Some(now + self.quiet);
        }
        self.pending = Some(pending);
        None
    }

    /// When the pending utterance becomes due.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Forward the pending utterance once its quiet period has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<String> {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                let pending = self.pending.take()?;
                Some(self.commit(pending))
            }
            _ => None,
        }
    }

    /// Drop pending text and forget what was already forwarded.
    pub fn reset(&mut self) {
        self.pending = None;
        self.deadline = None;
        self.committed.clear();
    }

    fn commit(&mut self, pending: Pending) -> String {
        if self.mode == TranscriptMode::Cumulative {
            self.committed = pending.transcript;
        }
        pending.utterance
    }
}

/// Run a debouncer over a stream of transcripts until cancelled or the
/// sender side is dropped. Pending text is discarded on exit.
pub fn spawn_debouncer(
    mut transcripts: mpsc::UnboundedReceiver<String>,
    quiet: Duration,
    mode: TranscriptMode,
    on_utterance: UtteranceCallback,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut debouncer = TranscriptDebouncer::new(quiet).with_mode(mode);
        loop {
            let deadline = debouncer.deadline();
            tokio::select! {
                _ = cancel.cancelled() => break,
                transcript = transcripts.recv() => {
                    let Some(transcript) = transcript else { break };
                    if let Some(text) = debouncer.update(&transcript, Instant::now()) {
                        tracing::debug!("Forwarding utterance on punctuation");
                        on_utterance(text).await;
                    }
                }
                _ = async {
                    match deadline {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    if let Some(text) = debouncer.poll(Instant::now()) {
                        tracing::debug!("Forwarding utterance after quiet period");
                        on_utterance(text).await;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUIET: Duration = Duration::from_millis(600);

    #[test]
    fn test_terminal_punctuation() {
        assert!(ends_with_terminal_punctuation("Hello."));
        assert!(ends_with_terminal_punctuation("Really?  "));
        assert!(ends_with_terminal_punctuation("好的。"));
        assert!(ends_with_terminal_punctuation("真的？"));
        assert!(!ends_with_terminal_punctuation("Hello,"));
        assert!(!ends_with_terminal_punctuation(""));
    }

    #[test]
    fn test_punctuation_forwards_immediately() {
        let mut debouncer = TranscriptDebouncer::new(QUIET);
        let now = Instant::now();
        assert_eq!(
            debouncer.update("How are you?", now),
            Some("How are you?".to_string())
        );
        assert!(debouncer.deadline().is_none());
    }

    #[test]
    fn test_quiet_period_forwards_once() {
        let mut debouncer = TranscriptDebouncer::new(QUIET);
        let start = Instant::now();
        assert_eq!(debouncer.update("hello", start), None);
        assert_eq!(debouncer.poll(start + Duration::from_millis(599)), None);
        assert_eq!(
            debouncer.poll(start + QUIET),
            Some("hello".to_string())
        );
        assert_eq!(debouncer.poll(start + QUIET * 2), None);
    }

    #[test]
    fn test_new_text_restarts_quiet_period() {
        let mut debouncer = TranscriptDebouncer::new(QUIET);
        let start = Instant::now();
        debouncer.update("hello", start);
        let later = start + Duration::from_millis(400);
        debouncer.update("hello there", later);
        assert_eq!(debouncer.poll(start + QUIET), None);
        assert_eq!(
            debouncer.poll(later + QUIET),
            Some("hello there".to_string())
        );
    }

    #[test]
    fn test_same_text_does_not_restart() {
        let mut debouncer = TranscriptDebouncer::new(QUIET);
        let start = Instant::now();
        debouncer.update("hello", start);
        debouncer.update("hello", start + Duration::from_millis(500));
        assert_eq!(debouncer.deadline(), Some(start + QUIET));
    }

    #[test]
    fn test_cumulative_transcript_forwards_only_new_text() {
        let mut debouncer = TranscriptDebouncer::new(QUIET);
        let now = Instant::now();
        assert_eq!(debouncer.update("Hello.", now), Some("Hello.".to_string()));
        assert_eq!(
            debouncer.update("Hello. How are you?", now),
            Some("How are you?".to_string())
        );
        assert_eq!(
            debouncer.update("Hello. How are you? Yes.", now),
            Some("Yes.".to_string())
        );
        assert_eq!(
            debouncer.update("Hello. How are you? Yes. Yes.", now),
            Some("Yes.".to_string())
        );
        // Same cumulative text again carries nothing new.
        assert_eq!(debouncer.update("Hello. How are you? Yes. Yes.", now), None);
    }

    #[test]
    fn test_cumulative_suffix_waits_for_quiet_period() {
        let mut debouncer = TranscriptDebouncer::new(QUIET);
        let start = Instant::now();
        assert!(debouncer.update("Sure.", start).is_some());
        assert_eq!(debouncer.update("Sure. I think", start), None);
        assert_eq!(
            debouncer.poll(start + QUIET),
            Some("I think".to_string())
        );
        assert_eq!(
            debouncer.update("Sure. I think so!", start + QUIET),
            Some("so!".to_string())
        );
    }

    #[test]
    fn test_restarted_transcript_is_a_new_utterance() {
        let mut debouncer = TranscriptDebouncer::new(QUIET);
        let now = Instant::now();
        assert!(debouncer.update("Hello there.", now).is_some());
        assert_eq!(debouncer.update("Yes.", now), Some("Yes.".to_string()));
    }

    #[test]
    fn test_live_mode_forwards_repeated_answers() {
        let mut debouncer = TranscriptDebouncer::new(QUIET).with_mode(TranscriptMode::Live);
        let now = Instant::now();
        assert_eq!(debouncer.update("Yes.", now), Some("Yes.".to_string()));
        assert_eq!(debouncer.update("Yes.", now), Some("Yes.".to_string()));
    }

    #[test]
    fn test_reset_forgets_committed_text() {
        let mut debouncer = TranscriptDebouncer::new(QUIET);
        let now = Instant::now();
        assert!(debouncer.update("Done.", now).is_some());
        assert!(debouncer.update("Done.", now).is_none());
        debouncer.reset();
        assert_eq!(debouncer.update("Done.", now), Some("Done.".to_string()));
    }

    #[tokio::test]
    async fn test_driver_forwards_after_quiet_period() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let handle = spawn_debouncer(
            rx,
            Duration::from_millis(50),
            TranscriptMode::Live,
            Arc::new(move |text| {
                let out_tx = out_tx.clone();
                Box::pin(async move {
                    let _ = out_tx.send(text);
                })
            }),
            cancel.clone(),
        );

        tx.send("I was thinking".to_string()).unwrap();
        let text = tokio::time::timeout(Duration::from_secs(2), out_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(text, "I was thinking");

        tx.send("Okay!".to_string()).unwrap();
        let text = tokio::time::timeout(Duration::from_secs(2), out_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(text, "Okay!");

        cancel.cancel();
        handle.await.unwrap();
    }
}
