//! Reply classifier for confirmations and corrections.
//!
//! Patterns are data: a `PatternTable` of regex sources applied to the
//! normalized utterance. Content-bearing corrections are tried first, so an
//! utterance yields exactly one of the four outcomes.
//!
//! Outside a dialogue only `late_correction` patterns apply. They require a
//! negative lead-in, so "i wanted to check mail" stays ordinary speech.

use regex::Regex;
use tracing::warn;

use crate::dictionary::normalize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feedback {
    Affirmative,
    Negative,
    NegativeWithContent(String),
    Neither,
}

/// Regex sources over normalized text (lowercase, no punctuation).
#[derive(Debug, Clone, Copy)]
pub struct PatternTable {
    pub affirmative: &'static [&'static str],
    pub negative: &'static [&'static str],
    /// Must contain a `content` capture group.
    pub correction: &'static [&'static str],
    pub undo: &'static [&'static str],
    /// Corrections accepted with no dialogue open. Must contain `content`.
    pub late_correction: &'static [&'static str],
}

pub const DEFAULT_PATTERNS: PatternTable = PatternTable {
    affirmative: &[
        r"^(?:yes|yeah|yep|yup|ya|sure|correct|right|exactly|affirmative|ok|okay|confirm|confirmed)(?: please)?$",
        r"^(?:yes )?(?:do it|go ahead|go for it|please do|thats right|that is right|thats it|that one|sounds good)$",
    ],
    negative: &[
        r"^(?:no|nope|nah|wrong|incorrect|negative|no no|no thanks|not that|not that one)$",
        r"^(?:thats|that is|that was|its) (?:wrong|not it|not right|not what i meant|incorrect)$",
        r"^(?:not what i meant|dont do that|do not do that)$",
    ],
    correction: &[
        r"^(?:no|nope|wrong|not that)(?: (?:no|wrong))? (?:i meant|i mean|i said|i wanted|i want|it should be|should be|make it|do) (?P<content>.+)$",
        r"^(?:thats|that is|that was) (?:wrong|not it|not right) (?:i meant|i mean|i said|i wanted|it should be) (?P<content>.+)$",
        r"^(?:actually|rather|instead) (?:i meant |i mean |do )?(?P<content>.+)$",
        r"^i (?:meant|said|wanted) (?P<content>.+)$",
        r"^(?:no|nope) (?P<content>.+) instead$",
    ],
    undo: &[
        r"^(?:undo|undo that|undo it|go back|revert|revert that|cancel that|take that back|oops|whoops|never mind that)$",
    ],
    late_correction: &[
        r"^(?:no|nope|wrong|not that)(?: (?:no|wrong))? (?:i meant|i mean|i said|i wanted|it should be|should be) (?P<content>.+)$",
        r"^(?:thats|that is|that was) (?:wrong|not it|not right) (?:i meant|i mean|i said|i wanted|it should be) (?P<content>.+)$",
        r"^(?:no|nope) (?P<content>.+) instead$",
    ],
};

#[derive(Debug, Clone)]
pub struct FeedbackClassifier {
    affirmative: Vec<Regex>,
    negative: Vec<Regex>,
    correction: Vec<Regex>,
    undo: Vec<Regex>,
    late_correction: Vec<Regex>,
}

impl Default for FeedbackClassifier {
    fn default() -> Self {
        Self::from_table(&DEFAULT_PATTERNS)
    }
}

impl FeedbackClassifier {
    /// Compile a table. Sources that fail to compile are logged and skipped.
    pub fn from_table(table: &PatternTable) -> Self {
        Self {
            affirmative: compile(table.affirmative),
            negative: compile(table.negative),
            correction: compile(table.correction),
            undo: compile(table.undo),
            late_correction: compile(table.late_correction),
        }
    }

    pub fn classify(&self, utterance: &str) -> Feedback {
        let text = normalize(utterance);
        if text.is_empty() {
            return Feedback::Neither;
        }

        if let Some(content) = first_content(&self.correction, &text) {
            return Feedback::NegativeWithContent(content);
        }
        if self.negative.iter().any(|re| re.is_match(&text)) {
            return Feedback::Negative;
        }
        if self.affirmative.iter().any(|re| re.is_match(&text)) {
            return Feedback::Affirmative;
        }
        Feedback::Neither
    }

    /// Correction target of an explicit "no, I meant X" with no dialogue
    /// open.
    pub fn late_correction(&self, utterance: &str) -> Option<String> {
        first_content(&self.late_correction, &normalize(utterance))
    }

    /// Immediate-undo phrases ("undo", "go back", ...).
    pub fn is_undo(&self, utterance: &str) -> bool {
        let text = normalize(utterance);
        self.undo.iter().any(|re| re.is_match(&text))
    }
}

fn first_content(patterns: &[Regex], text: &str) -> Option<String> {
    patterns.iter().find_map(|re| {
        let content = re.captures(text)?.name("content")?.as_str().trim().to_string();
        (!content.is_empty()).then_some(content)
    })
}

fn compile(sources: &[&str]) -> Vec<Regex> {
    sources
        .iter()
        .filter_map(|src| match Regex::new(src) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!("Skipping invalid feedback pattern {:?}: {}", src, e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_compiles() {
        let c = FeedbackClassifier::default();
        assert_eq!(c.affirmative.len(), DEFAULT_PATTERNS.affirmative.len());
        assert_eq!(c.negative.len(), DEFAULT_PATTERNS.negative.len());
        assert_eq!(c.correction.len(), DEFAULT_PATTERNS.correction.len());
        assert_eq!(c.undo.len(), DEFAULT_PATTERNS.undo.len());
        assert_eq!(c.late_correction.len(), DEFAULT_PATTERNS.late_correction.len());
    }

    #[test]
    fn late_corrections_need_a_negative_lead_in() {
        let c = FeedbackClassifier::default();
        assert_eq!(c.late_correction("No, I meant play podcast").as_deref(), Some("play podcast"));
        assert_eq!(c.late_correction("that's wrong, I meant enter").as_deref(), Some("enter"));
        assert_eq!(c.late_correction("no, scroll up instead").as_deref(), Some("scroll up"));
        assert_eq!(c.late_correction("I wanted to check mail"), None);
        assert_eq!(c.late_correction("actually open the browser"), None);
        assert_eq!(c.late_correction("no"), None);
    }

    #[test]
    fn bare_negatives() {
        let c = FeedbackClassifier::default();
        for s in ["no", "No!", "nope", "wrong", "that's wrong", "not what I meant"] {
            assert_eq!(c.classify(s), Feedback::Negative, "{s}");
        }
    }

    #[test]
    fn negatives_with_content() {
        let c = FeedbackClassifier::default();
        assert_eq!(
            c.classify("No, I meant volume down"),
            Feedback::NegativeWithContent("volume down".into())
        );
        assert_eq!(c.classify("actually scroll up"), Feedback::NegativeWithContent("scroll up".into()));
        assert_eq!(c.classify("I said send it"), Feedback::NegativeWithContent("send it".into()));
        assert_eq!(
            c.classify("that's wrong, it should be enter"),
            Feedback::NegativeWithContent("enter".into())
        );
    }

    #[test]
    fn bare_no_extracts_nothing() {
        let c = FeedbackClassifier::default();
        assert_eq!(c.classify("no"), Feedback::Negative);
        assert_eq!(c.classify("no i meant"), Feedback::Neither);
    }

    #[test]
    fn affirmatives() {
        let c = FeedbackClassifier::default();
        for s in ["yes", "Yeah.", "sure", "go ahead", "that's right", "ok"] {
            assert_eq!(c.classify(s), Feedback::Affirmative, "{s}");
        }
    }

    #[test]
    fn neither() {
        let c = FeedbackClassifier::default();
        assert_eq!(c.classify("open the browser"), Feedback::Neither);
        assert_eq!(c.classify(""), Feedback::Neither);
    }

    #[test]
    fn undo_phrases() {
        let c = FeedbackClassifier::default();
        assert!(c.is_undo("Undo that!"));
        assert!(c.is_undo("go back"));
        assert!(!c.is_undo("go back to the top"));
    }
}
