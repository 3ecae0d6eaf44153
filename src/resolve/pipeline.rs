use std::time::Duration;
use tracing::{debug, info, warn};

use super::classifier::{
    validate, ClassifierCache, ClassifierError, ClassifierOutcome, ClassifierRequest, ClassifierResponse,
    ContextSummary, IntentClassifier,
};
use super::policy::{ConfidencePolicy, Decision};
use crate::config::Config;
use crate::context::ResolutionContext;
use crate::dictionary::{normalize, CommandId, CommandSource, PhraseDictionary, PhraseMatch, Tier, WorkflowId};
use crate::kernel::time::Tick;

/// A resolved utterance.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub action: String,
    pub confidence: f32,
    pub tier: Tier,
    /// Provenance of the mapping; `None` for classifier results.
    pub source: Option<CommandSource>,
    pub command_id: Option<CommandId>,
    /// Set when the phrase triggers a workflow rather than a single action.
    pub workflow_id: Option<WorkflowId>,
    pub params: Option<serde_json::Value>,
    /// Normalized utterance.
    pub phrase: String,
    /// The dictionary phrase that matched, which differs from `phrase` on
    /// fuzzy hits.
    pub matched: Option<String>,
}

impl Resolution {
    fn from_match(m: PhraseMatch, phrase: String) -> Self {
        Self {
            action: m.action,
            confidence: m.confidence,
            tier: m.tier,
            source: Some(m.source),
            command_id: Some(m.command_id),
            workflow_id: None,
            params: None,
            phrase,
            matched: Some(m.phrase),
        }
    }
}

/// Tiered lookup: context override → exact → fuzzy → external classifier.
pub struct ResolutionPipeline {
    policy: ConfidencePolicy,
    known_actions: Vec<String>,
    token_budget: u32,
    recent_actions: usize,
    classifier_enabled: bool,
    classifier_timeout: Duration,
    cache: ClassifierCache,
}

impl ResolutionPipeline {
    pub fn new(cfg: &Config) -> Self {
        Self {
            policy: ConfidencePolicy::new(cfg.policy.clone()),
            known_actions: cfg.known_actions.clone(),
            token_budget: cfg.classifier.token_budget,
            recent_actions: cfg.classifier.recent_actions,
            classifier_enabled: cfg.classifier.enabled,
            classifier_timeout: Duration::from_millis(cfg.classifier.timeout_ms),
            cache: ClassifierCache::new(cfg.classifier.cache_ttl_secs),
        }
    }

    pub fn policy(&self) -> &ConfidencePolicy {
        &self.policy
    }

    pub fn classifier_enabled(&self) -> bool {
        self.classifier_enabled
    }

    /// Tiers 0–2. Hits are counted and the owning command's usage recorded.
    pub fn resolve_local(
        &self,
        dict: &mut PhraseDictionary,
        utterance: &str,
        ctx: &ResolutionContext,
    ) -> Option<Resolution> {
        let phrase = normalize(utterance);
        if phrase.is_empty() {
            return None;
        }

        if let Some(m) = dict.lookup_context_override(&phrase, ctx) {
            debug!("Tier 0 hit for '{}' -> {}", phrase, m.action);
            return Some(Self::count(dict, Resolution::from_match(m, phrase)));
        }
        if let Some(m) = dict.lookup_exact(&phrase) {
            debug!("Tier 1 hit for '{}' -> {}", phrase, m.action);
            return Some(Self::count(dict, Resolution::from_match(m, phrase)));
        }
        if let Some(wf) = dict.lookup_workflow(&phrase) {
            debug!("Tier 1 workflow hit for '{}' -> {}", phrase, wf.name);
            let resolution = Resolution {
                action: wf.name.clone(),
                confidence: 1.0,
                tier: Tier::Exact,
                source: Some(CommandSource::Trained),
                command_id: None,
                workflow_id: Some(wf.id.clone()),
                params: None,
                phrase,
                matched: None,
            };
            dict.record_hit(Tier::Exact);
            return Some(resolution);
        }
        if let Some(m) = dict.lookup_fuzzy(&phrase) {
            debug!("Tier 2 hit for '{}' -> {} ({:.2})", phrase, m.action, m.confidence);
            return Some(Self::count(dict, Resolution::from_match(m, phrase)));
        }
        None
    }

    fn count(dict: &mut PhraseDictionary, resolution: Resolution) -> Resolution {
        dict.record_hit(resolution.tier);
        if let Some(id) = &resolution.command_id {
            dict.record_usage(id);
        }
        resolution
    }

    /// Tier-3 request with a small context summary and token budget.
    pub fn build_request(
        &self,
        dict: &PhraseDictionary,
        utterance: &str,
        ctx: &ResolutionContext,
        recent_actions: &[String],
    ) -> ClassifierRequest {
        let mut recent: Vec<String> = recent_actions.to_vec();
        for a in &ctx.recent_actions {
            if !recent.contains(a) {
                recent.push(a.clone());
            }
        }
        recent.truncate(self.recent_actions);

        ClassifierRequest {
            utterance: utterance.trim().to_string(),
            context_summary: ContextSummary {
                focused: ctx.describe(),
                recent_actions: recent,
            },
            known_actions: self.known_actions_for(dict),
            token_budget: self.token_budget,
        }
    }

    /// The configured action set, or every action the dictionary knows.
    pub fn known_actions_for(&self, dict: &PhraseDictionary) -> Vec<String> {
        if !self.known_actions.is_empty() {
            return self.known_actions.clone();
        }
        let mut actions: Vec<String> = dict.all_commands().iter().map(|c| c.action.clone()).collect();
        actions.sort();
        actions.dedup();
        actions
    }

    pub fn cached(&self, utterance: &str, ctx: &ResolutionContext, now: Tick) -> Option<ClassifierOutcome> {
        self.cache.get(&normalize(utterance), &ctx.key(), now).cloned()
    }

    pub fn remember(&mut self, utterance: &str, ctx: &ResolutionContext, outcome: ClassifierOutcome, now: Tick) {
        self.cache.insert(&normalize(utterance), &ctx.key(), outcome, now);
    }

    pub fn purge_cache(&mut self, now: Tick) {
        self.cache.purge(now);
    }

    /// Validate a raw classifier result against the configured action set.
    pub fn validate(&self, result: Result<ClassifierResponse, ClassifierError>) -> ClassifierOutcome {
        validate(result, &self.known_actions)
    }

    /// Turn a tier-3 outcome into a resolution. Results the policy rejects
    /// are unresolved and not counted.
    pub fn accept_classification(
        &self,
        dict: &mut PhraseDictionary,
        utterance: &str,
        outcome: ClassifierOutcome,
    ) -> Option<Resolution> {
        let ClassifierOutcome::Intent { action, confidence, params } = outcome else {
            return None;
        };
        if self.policy.decide(confidence) == Decision::Reject {
            debug!("Tier 3 result {} at {:.2} rejected", action, confidence);
            return None;
        }
        dict.record_hit(Tier::Classifier);
        info!("Tier 3 hit -> {} ({:.2})", action, confidence);
        Some(Resolution {
            action,
            confidence,
            tier: Tier::Classifier,
            source: None,
            command_id: None,
            workflow_id: None,
            params,
            phrase: normalize(utterance),
            matched: None,
        })
    }

    /// Full resolution in one call, awaiting the classifier when tiers 0–2
    /// miss. The call is bounded by the configured timeout; a timeout or a
    /// malformed answer resolves to `None`. Failed calls are not cached.
    pub async fn resolve<C: IntentClassifier>(
        &mut self,
        dict: &mut PhraseDictionary,
        utterance: &str,
        ctx: &ResolutionContext,
        classifier: Option<&C>,
        now: Tick,
    ) -> Option<Resolution> {
        if let Some(local) = self.resolve_local(dict, utterance, ctx) {
            return Some(local);
        }
        let classifier = classifier.filter(|_| self.classifier_enabled)?;

        let outcome = match self.cached(utterance, ctx, now) {
            Some(hit) => hit,
            None => {
                let request = self.build_request(dict, utterance, ctx, &ctx.recent_actions);
                let result = match tokio::time::timeout(self.classifier_timeout, classifier.classify(request)).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!("Classifier timed out after {:?}", self.classifier_timeout);
                        Err(ClassifierError::Timeout)
                    }
                };
                let outcome = self.validate(result);
                self.remember(utterance, ctx, outcome.clone(), now);
                outcome
            }
        };
        self.accept_classification(dict, utterance, outcome)
    }
}
