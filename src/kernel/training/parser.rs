//! Utterance parsing for Training Mode. Everything here is a pure function
//! of the text; word lists are data.

use super::session::SessionType;
use crate::dictionary::{normalize, ContextMatch, StepCondition};

const ENTRY_EXACT: &[&str] = &["train", "training", "start training", "enter training mode"];
const ENTRY_CONTAINS: &[&str] = &["training mode", "teach you", "learn a new command"];
const EXIT: &[&str] = &[
    "cancel",
    "cancel training",
    "nevermind",
    "never mind",
    "exit",
    "exit training",
    "stop",
    "stop training",
    "quit",
];
const TERMINATION: &[&str] = &[
    "done",
    "im done",
    "no",
    "nope",
    "thats it",
    "that is it",
    "thats all",
    "that is all",
    "finished",
    "no more",
    "nothing else",
];
const RESUME: &[&str] = &["resume", "continue", "keep going", "pick up where we left off", "resume it"];
const DISCARD: &[&str] = &["discard", "discard it", "throw it away", "start over", "delete it", "forget it"];
const WORKFLOW_WORDS: &[&str] = &["routine", "workflow", "sequence", "series", "steps", "multistep"];
const ACTION_CONNECTORS: &[&str] = &[
    "means", "mean", "should", "will", "would", "to", "do", "does", "is", "as", "be", "run", "runs", "trigger",
    "triggers", "perform", "performs", "equals", "then", "just", "it", "that", "and", "for",
];
const LEAD_WORDS: &[&str] = &[
    "please", "teach", "you", "me", "to", "i", "want", "make", "learn", "so", "that", "can", "let", "lets", "us",
    "how",
];
const APP_STOPWORDS: &[&str] = &["the", "a", "an", "to", "my", "this", "that", "here", "there", "it", "order"];
const SUCCEEDED_PREFIXES: &[&str] = &[
    "if that works",
    "if that worked",
    "if it works",
    "if it worked",
    "if that succeeds",
    "if it succeeds",
    "if successful",
];
const FAILED_PREFIXES: &[&str] = &[
    "if that fails",
    "if that failed",
    "if it fails",
    "if it failed",
    "if that doesnt work",
    "if not",
    "otherwise",
];
const STEP_FILLER: &[&str] = &["then", "and", "next", "first", "after that", "finally", "also"];

/// A recognized teaching utterance.
#[derive(Debug, Clone, PartialEq)]
pub struct Teaching {
    pub session_type: SessionType,
    /// The quoted trigger, as spoken.
    pub trigger: String,
    /// Free-text action description; `None` for routines.
    pub action_description: Option<String>,
    pub context: Option<ContextMatch>,
}

/// A quoted span and the text around it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quoted<'a> {
    pub inner: &'a str,
    pub before: &'a str,
    pub after: &'a str,
}

pub fn is_entry(text: &str) -> bool {
    let norm = normalize(text);
    ENTRY_EXACT.contains(&norm.as_str()) || ENTRY_CONTAINS.iter().any(|p| contains_words(&norm, p))
}

pub fn is_exit(text: &str) -> bool {
    EXIT.contains(&normalize(text).as_str())
}

pub fn is_termination(text: &str) -> bool {
    TERMINATION.contains(&normalize(text).as_str())
}

pub fn is_resume(text: &str) -> bool {
    let norm = normalize(text);
    RESUME.iter().any(|p| contains_words(&norm, p))
}

pub fn is_discard(text: &str) -> bool {
    let norm = normalize(text);
    DISCARD.iter().any(|p| contains_words(&norm, p))
}

/// Parse `"<trigger>" means <action>`, `make a routine called "<name>"` or
/// `in slack "<trigger>" means <action>`.
pub fn parse_teaching(text: &str) -> Option<Teaching> {
    let quoted = extract_quoted(text)?;
    let trigger = quoted.inner.trim().to_string();
    if normalize(&trigger).is_empty() {
        return None;
    }
    let before = normalize(quoted.before);
    let after = normalize(quoted.after);

    let around = format!("{} {}", before, after);
    if around.split_whitespace().any(|w| WORKFLOW_WORDS.contains(&w)) {
        return Some(Teaching {
            session_type: SessionType::Workflow,
            trigger,
            action_description: None,
            context: None,
        });
    }

    let (before, app_before) = take_app(&before);
    let (after, app_after) = take_app(&after);
    let app = app_after.or(app_before);

    let mut description = strip_leading(&after, ACTION_CONNECTORS);
    if description.is_empty() {
        // "teach you to <action> when I say "<trigger>""
        if let Some(idx) = before.find("when i say") {
            description = strip_leading(before[..idx].trim(), LEAD_WORDS);
        }
    }
    if description.is_empty() {
        return None;
    }

    Some(Teaching {
        session_type: if app.is_some() {
            SessionType::ContextRule
        } else {
            SessionType::SimpleCommand
        },
        trigger,
        action_description: Some(description),
        context: app.map(|a| ContextMatch::app(&a)),
    })
}

/// A variation is either quoted or the whole utterance.
pub fn variation_phrase(text: &str) -> String {
    match extract_quoted(text) {
        Some(q) => q.inner.trim().to_string(),
        None => text.trim().trim_end_matches(['.', '!', '?']).to_string(),
    }
}

/// One routine step: its description and optional guard.
pub fn parse_step(text: &str) -> Option<(String, Option<StepCondition>)> {
    let mut rest = normalize(text);
    let mut condition = None;

    rest = strip_fillers(rest);
    if let Some(r) = SUCCEEDED_PREFIXES.iter().find_map(|p| strip_prefix_words(&rest, p)) {
        condition = Some(StepCondition::IfPreviousSucceeded);
        rest = r;
    } else if let Some(r) = FAILED_PREFIXES.iter().find_map(|p| strip_prefix_words(&rest, p)) {
        condition = Some(StepCondition::IfPreviousFailed);
        rest = r;
    }
    rest = strip_fillers(rest);

    if rest.is_empty() {
        None
    } else {
        Some((rest, condition))
    }
}

/// First span in double (straight or curly) quotes, else the first span in
/// single quotes that open and close on word boundaries.
pub fn extract_quoted(text: &str) -> Option<Quoted<'_>> {
    let is_double = |c: char| matches!(c, '"' | '\u{201C}' | '\u{201D}');
    if let Some(open) = text.find(is_double) {
        let open_len = text[open..].chars().next().map(char::len_utf8).unwrap_or(1);
        let start = open + open_len;
        if let Some(rel) = text[start..].find(is_double) {
            let end = start + rel;
            let close_len = text[end..].chars().next().map(char::len_utf8).unwrap_or(1);
            if !text[start..end].trim().is_empty() {
                return Some(Quoted {
                    inner: &text[start..end],
                    before: &text[..open],
                    after: &text[end + close_len..],
                });
            }
        }
    }

    let is_single = |c: char| matches!(c, '\'' | '\u{2018}' | '\u{2019}');
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    for (i, &(open, c)) in chars.iter().enumerate() {
        if !is_single(c) || (i > 0 && !chars[i - 1].1.is_whitespace()) {
            continue;
        }
        let start = open + c.len_utf8();
        for (j, &(close, d)) in chars.iter().enumerate().skip(i + 1) {
            let boundary = chars
                .get(j + 1)
                .map_or(true, |&(_, n)| n.is_whitespace() || matches!(n, ',' | '.' | '!' | '?' | ':' | ';'));
            if is_single(d) && boundary && !text[start..close].trim().is_empty() {
                return Some(Quoted {
                    inner: &text[start..close],
                    before: &text[..open],
                    after: &text[close + d.len_utf8()..],
                });
            }
        }
    }
    None
}

/// Pull an "in <app>" mention out of normalized text.
fn take_app(norm: &str) -> (String, Option<String>) {
    let words: Vec<&str> = norm.split_whitespace().collect();
    for i in 0..words.len() {
        if words[i] != "in" {
            continue;
        }
        let Some(app) = words.get(i + 1) else {
            continue;
        };
        if APP_STOPWORDS.contains(app) {
            continue;
        }
        let mut kept: Vec<&str> = words[..i].to_vec();
        // "when im in slack"
        while kept.last().is_some_and(|w| matches!(*w, "when" | "im" | "i" | "am" | "while")) {
            kept.pop();
        }
        kept.extend_from_slice(&words[i + 2..]);
        return (kept.join(" "), Some(app.to_string()));
    }
    (norm.to_string(), None)
}

fn strip_leading(norm: &str, words: &[&str]) -> String {
    norm.split_whitespace()
        .skip_while(|w| words.contains(w))
        .collect::<Vec<_>>()
        .join(" ")
}

fn strip_fillers(mut rest: String) -> String {
    while let Some(r) = STEP_FILLER.iter().find_map(|f| strip_prefix_words(&rest, f)) {
        rest = r;
    }
    rest
}

fn strip_prefix_words(norm: &str, prefix: &str) -> Option<String> {
    if norm == prefix {
        return Some(String::new());
    }
    norm.strip_prefix(prefix)
        .and_then(|r| r.strip_prefix(' '))
        .map(str::to_string)
}

fn contains_words(norm: &str, phrase: &str) -> bool {
    format!(" {} ", norm).contains(&format!(" {} ", phrase))
}
