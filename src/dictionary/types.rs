use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::ResolutionContext;

pub type CommandId = String;
pub type WorkflowId = String;

/// Current on-disk document version.
pub const DOCUMENT_VERSION: u32 = 1;

/// Where a mapping came from. Determines initial confidence and whether
/// time decay and implicit negatives may delete it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandSource {
    Default,
    Trained,
    Learned,
    Confirmed,
    Corrected,
}

impl CommandSource {
    pub fn initial_confidence(self) -> f32 {
        match self {
            CommandSource::Trained | CommandSource::Confirmed => 1.0,
            _ => 0.8,
        }
    }
}

/// Resolution tier. Lower tiers win.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tier {
    ContextOverride,
    Exact,
    Fuzzy,
    Classifier,
}

impl Tier {
    pub fn number(self) -> u8 {
        match self {
            Tier::ContextOverride => 0,
            Tier::Exact => 1,
            Tier::Fuzzy => 2,
            Tier::Classifier => 3,
        }
    }
}

/// Predicate over the surrounding context. Every populated field must match;
/// a predicate with no populated field never matches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    /// Matches when this action is among the context's recent actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recent_action: Option<String>,
}

impl ContextMatch {
    pub fn app(app_id: &str) -> Self {
        Self {
            app_id: Some(app_id.to_string()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.app_id.is_none() && self.category.is_none() && self.mode.is_none() && self.recent_action.is_none()
    }

    pub fn matches(&self, ctx: &ResolutionContext) -> bool {
        if self.is_empty() {
            return false;
        }
        let field_ok = |want: &Option<String>, have: &Option<String>| match want {
            None => true,
            Some(w) => have.as_deref().is_some_and(|h| h.eq_ignore_ascii_case(w)),
        };
        field_ok(&self.app_id, &ctx.focused_app_id)
            && field_ok(&self.category, &ctx.category)
            && field_ok(&self.mode, &ctx.mode)
            && match &self.recent_action {
                None => true,
                Some(a) => ctx.recent_actions.iter().any(|r| r == a),
            }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextRule {
    #[serde(rename = "match")]
    pub matcher: ContextMatch,
    pub action: String,
    #[serde(default)]
    pub priority: i32,
}

/// One learned or built-in phrase set → action mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: CommandId,
    pub action: String,
    /// Trigger phrases as spoken; unique after normalization.
    pub phrases: Vec<String>,
    pub source: CommandSource,
    pub confidence: f32,
    #[serde(default)]
    pub use_count: u64,
    #[serde(default)]
    pub last_used: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub context_rules: Vec<ContextRule>,
}

impl Command {
    /// Highest-priority rule matching `ctx`; ties go to the first declared.
    pub fn select_rule(&self, ctx: &ResolutionContext) -> Option<&ContextRule> {
        let mut best: Option<&ContextRule> = None;
        for rule in self.context_rules.iter().filter(|r| r.matcher.matches(ctx)) {
            match best {
                Some(b) if rule.priority <= b.priority => {}
                _ => best = Some(rule),
            }
        }
        best
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepCondition {
    IfPreviousSucceeded,
    IfPreviousFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Symbolic action executed for this step.
    pub action: String,
    /// The step as the user described it.
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<StepCondition>,
}

/// A named routine taught through Training Mode. Read-only once saved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub name: String,
    pub phrases: Vec<String>,
    pub steps: Vec<WorkflowStep>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierHits {
    #[serde(default)]
    pub tier0_hits: u64,
    #[serde(default)]
    pub tier1_hits: u64,
    #[serde(default)]
    pub tier2_hits: u64,
    #[serde(default)]
    pub tier3_hits: u64,
}

/// The single persisted document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DictionaryDocument {
    pub version: u32,
    #[serde(default)]
    pub commands: Vec<Command>,
    #[serde(default)]
    pub workflows: Vec<Workflow>,
    #[serde(default)]
    pub stats: TierHits,
}

impl Default for DictionaryDocument {
    fn default() -> Self {
        Self {
            version: DOCUMENT_VERSION,
            commands: Vec::new(),
            workflows: Vec::new(),
            stats: TierHits::default(),
        }
    }
}

/// A dictionary hit.
#[derive(Debug, Clone, PartialEq)]
pub struct PhraseMatch {
    pub command_id: CommandId,
    pub action: String,
    pub confidence: f32,
    pub tier: Tier,
    pub source: CommandSource,
    /// The normalized phrase that matched.
    pub phrase: String,
}

/// Aggregate hit counts for observability.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DictionaryStats {
    pub hits: TierHits,
    pub total_hits: u64,
    pub tier0_rate: f64,
    pub tier1_rate: f64,
    pub tier2_rate: f64,
    pub tier3_rate: f64,
    pub commands: usize,
    pub phrases: usize,
    pub workflows: usize,
    pub persist_failures: u64,
}

/// Outcome of a time-decay pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecayReport {
    pub decayed: Vec<CommandId>,
    pub forgotten: Vec<CommandId>,
}
