//! Trigger-word mode: accumulate finals until the user says the word.

use tokio::time::Instant;

use crate::config::ModeKind;
use crate::recognition::TranscriptEvent;

use super::{join_fragments, DispatchBehavior, ModeEffect, ModeTimer};

pub struct TriggerWord {
    /// Normalized trigger words; empty means the trigger is disabled.
    trigger: Vec<String>,
    fragments: Vec<String>,
}

impl TriggerWord {
    pub fn new(trigger_word: &str) -> Self {
        Self {
            trigger: normalize_phrase(trigger_word),
            fragments: Vec::new(),
        }
    }

    pub fn set_trigger_word(&mut self, trigger_word: &str) {
        self.trigger = normalize_phrase(trigger_word);
        log::debug!("trigger-word: trigger set to {:?}", self.trigger.join(" "));
    }

    pub fn is_enabled(&self) -> bool {
        !self.trigger.is_empty()
    }

    pub fn queued(&self) -> &[String] {
        &self.fragments
    }

    fn joined(&self) -> String {
        join_fragments(self.fragments.iter().map(String::as_str))
    }
}

impl DispatchBehavior for TriggerWord {
    fn kind(&self) -> ModeKind {
        ModeKind::TriggerWord
    }

    fn handle_interim(&mut self, event: &TranscriptEvent) -> Vec<ModeEffect> {
        let preview = join_fragments(
            self.fragments
                .iter()
                .map(String::as_str)
                .chain(std::iter::once(event.text.as_str())),
        );
        vec![ModeEffect::Preview(preview)]
    }

    fn handle_final(&mut self, event: &TranscriptEvent) -> Vec<ModeEffect> {
        let text = event.text.trim();
        if text.is_empty() {
            return Vec::new();
        }

        match strip_trigger(text, &self.trigger) {
            Some(rest) => {
                if !rest.is_empty() {
                    self.fragments.push(rest);
                }
                let utterance = self.joined();
                self.fragments.clear();
                let mut effects = Vec::new();
                if utterance.is_empty() {
                    log::debug!("trigger-word: trigger with nothing queued");
                } else {
                    effects.push(ModeEffect::Send(utterance));
                }
                effects.push(ModeEffect::Queue(Vec::new()));
                effects.push(ModeEffect::Preview(String::new()));
                effects
            }
            None => {
                self.fragments.push(text.to_string());
                vec![
                    ModeEffect::Queue(self.fragments.clone()),
                    ModeEffect::Preview(self.joined()),
                ]
            }
        }
    }

    fn on_timer(&mut self, _timer: ModeTimer, _generation: u64, _now: Instant) -> Vec<ModeEffect> {
        Vec::new()
    }

    fn flush(&mut self) -> Vec<ModeEffect> {
        let utterance = self.joined();
        self.fragments.clear();
        if utterance.is_empty() {
            return Vec::new();
        }
        vec![
            ModeEffect::Send(utterance),
            ModeEffect::Queue(Vec::new()),
            ModeEffect::Preview(String::new()),
        ]
    }

    fn restore(&mut self, text: &str) -> Vec<ModeEffect> {
        self.fragments.insert(0, text.to_string());
        vec![
            ModeEffect::Queue(self.fragments.clone()),
            ModeEffect::Preview(self.joined()),
        ]
    }

    fn clear(&mut self) -> Vec<ModeEffect> {
        self.fragments.clear();
        vec![
            ModeEffect::Queue(Vec::new()),
            ModeEffect::Preview(String::new()),
        ]
    }

    fn pending_text(&self) -> String {
        self.joined()
    }
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

/// Lowercase a word and drop punctuation at its edges.
fn normalize_word(word: &str) -> String {
    word.trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase()
}

fn normalize_phrase(phrase: &str) -> Vec<String> {
    phrase
        .split_whitespace()
        .map(normalize_word)
        .filter(|w| !w.is_empty())
        .collect()
}

/// Remove every whole-word occurrence of `trigger` from `text`.
///
/// Returns `None` when the trigger does not occur (or is empty), otherwise
/// the remaining words joined with single spaces.
///
/// ```
/// use voice_relay::dispatch::strip_trigger;
///
/// let send = vec!["send".to_string()];
/// assert_eq!(strip_trigger("the lights Send.", &send).as_deref(), Some("the lights"));
/// assert_eq!(strip_trigger("the sender", &send), None);
/// ```
pub fn strip_trigger(text: &str, trigger: &[String]) -> Option<String> {
    if trigger.is_empty() {
        return None;
    }

    let words: Vec<&str> = text.split_whitespace().collect();
    let normalized: Vec<String> = words.iter().map(|w| normalize_word(w)).collect();

    let mut kept = Vec::with_capacity(words.len());
    let mut matched = false;
    let mut i = 0;
    while i < words.len() {
        let end = i + trigger.len();
        if end <= words.len() && normalized[i..end] == *trigger {
            matched = true;
            i = end;
        } else {
            kept.push(words[i]);
            i += 1;
        }
    }

    matched.then(|| kept.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sends(effects: &[ModeEffect]) -> Vec<&str> {
        effects
            .iter()
            .filter_map(|e| match e {
                ModeEffect::Send(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn trigger_in_last_fragment_dispatches_everything() {
        let mut m = TriggerWord::new("send");
        assert!(sends(&m.handle_final(&TranscriptEvent::final_result(0, "turn on", None))).is_empty());
        let effects = m.handle_final(&TranscriptEvent::final_result(1, "the lights send", None));

        assert_eq!(sends(&effects), vec!["turn on the lights"]);
        assert!(m.queued().is_empty());
    }

    #[test]
    fn without_trigger_fragments_queue_up() {
        let mut m = TriggerWord::new("send");
        m.handle_final(&TranscriptEvent::final_result(0, "turn on", None));
        let effects = m.handle_final(&TranscriptEvent::final_result(1, "the lights", None));

        assert!(sends(&effects).is_empty());
        assert_eq!(m.queued().len(), 2);
        assert_eq!(
            effects.first(),
            Some(&ModeEffect::Queue(vec!["turn on".into(), "the lights".into()]))
        );
    }

    #[test]
    fn empty_trigger_never_matches() {
        for trigger in ["", "   "] {
            let mut m = TriggerWord::new(trigger);
            assert!(!m.is_enabled());
            let effects = m.handle_final(&TranscriptEvent::final_result(0, "send it now", None));
            assert!(sends(&effects).is_empty());
            assert_eq!(m.queued(), ["send it now"]);
        }
    }

    #[test]
    fn matching_is_whole_word_and_case_insensitive() {
        let send = normalize_phrase("Send");
        assert_eq!(strip_trigger("SEND", &send).as_deref(), Some(""));
        assert_eq!(strip_trigger("please, send!", &send).as_deref(), Some("please,"));
        assert_eq!(strip_trigger("resend this", &send), None);
        assert_eq!(strip_trigger("sending soon", &send), None);
    }

    #[test]
    fn multi_word_trigger() {
        let over = normalize_phrase("over and out");
        assert_eq!(
            strip_trigger("that is all over and out", &over).as_deref(),
            Some("that is all")
        );
        assert_eq!(strip_trigger("come over and see", &over), None);
    }

    #[test]
    fn interim_previews_without_mutating_queue() {
        let mut m = TriggerWord::new("send");
        m.handle_final(&TranscriptEvent::final_result(0, "turn on", None));
        let effects = m.handle_interim(&TranscriptEvent::interim("the li"));

        assert_eq!(effects, vec![ModeEffect::Preview("turn on the li".into())]);
        assert_eq!(m.queued(), ["turn on"]);
    }

    #[test]
    fn lone_trigger_with_empty_queue_sends_nothing() {
        let mut m = TriggerWord::new("send");
        assert!(sends(&m.handle_final(&TranscriptEvent::final_result(0, "send", None))).is_empty());
    }

    #[test]
    fn flush_sends_queue_regardless_of_trigger() {
        let mut m = TriggerWord::new("send");
        m.handle_final(&TranscriptEvent::final_result(0, "draft one", None));
        assert_eq!(sends(&m.flush()), vec!["draft one"]);
        assert!(m.flush().is_empty());
    }

    #[test]
    fn changing_the_trigger_applies_to_next_final() {
        let mut m = TriggerWord::new("send");
        m.set_trigger_word("go");
        m.handle_final(&TranscriptEvent::final_result(0, "ready send", None));
        let effects = m.handle_final(&TranscriptEvent::final_result(1, "go", None));
        assert_eq!(sends(&effects), vec!["ready send"]);
    }
}
