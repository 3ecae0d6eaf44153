use crate::context::ResolutionContext;
use crate::resolve::ClassifierOutcome;

/// Identifies one in-flight classification. Only the latest epoch is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassifyEpoch(pub u64);

#[derive(Debug, Clone)]
pub enum Event {
    /// A transcribed utterance with the focused context at the time it was heard.
    Input(Utterance),
    /// Tier-3 answer delivered back by the driver.
    ClassificationProposed(ClassifyEpoch, ClassifierOutcome),
}

#[derive(Debug, Clone)]
pub struct Utterance {
    pub text: String,
    pub context: ResolutionContext,
}

impl Utterance {
    pub fn text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            context: ResolutionContext::empty(),
        }
    }

    pub fn in_context(text: &str, context: ResolutionContext) -> Self {
        Self {
            text: text.to_string(),
            context,
        }
    }
}

impl Event {
    pub fn utterance(text: &str) -> Self {
        Event::Input(Utterance::text(text))
    }
}
