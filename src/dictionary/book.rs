use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{HashMap, HashSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::fuzzy::FuzzyIndex;
use super::normalize::normalize;
use super::store::{DictionaryStore, InMemoryDictionaryStore, StoreError};
use super::types::*;
use crate::config::DictionaryConfig;
use crate::context::ResolutionContext;

/// The personal phrase dictionary.
///
/// Sole owner of every Command and Workflow and the only writer of the
/// backing store. All mutation goes through `&mut self`, so
/// read → compute → persist is one uninterrupted unit.
pub struct PhraseDictionary {
    store: Box<dyn DictionaryStore>,
    doc: DictionaryDocument,
    /// normalized phrase -> owning command (1:1)
    phrase_index: HashMap<String, CommandId>,
    workflow_index: HashMap<String, WorkflowId>,
    fuzzy: FuzzyIndex,
    fuzzy_max_score: f32,
    persist_failures: u64,
    undrained_failures: u64,
}

impl PhraseDictionary {
    /// Load from `store`. An unreadable or corrupt document falls back to an
    /// empty one; the failure is logged and counted.
    pub fn open(store: Box<dyn DictionaryStore>, cfg: &DictionaryConfig) -> Self {
        let mut failures = 0;
        let doc = match store.load() {
            Ok(doc) => doc,
            Err(e) => {
                error!("Dictionary load failed, starting from an empty document: {}", e);
                failures += 1;
                DictionaryDocument::default()
            }
        };

        let mut dict = Self {
            store,
            doc: sanitize(doc),
            phrase_index: HashMap::new(),
            workflow_index: HashMap::new(),
            fuzzy: FuzzyIndex::default(),
            fuzzy_max_score: cfg.fuzzy_max_score,
            persist_failures: failures,
            undrained_failures: failures,
        };
        dict.rebuild_indexes();
        info!(
            "Dictionary loaded: {} commands, {} phrases, {} workflows",
            dict.doc.commands.len(),
            dict.phrase_index.len(),
            dict.doc.workflows.len()
        );
        dict
    }

    pub fn in_memory(cfg: &DictionaryConfig) -> Self {
        Self::open(Box::new(InMemoryDictionaryStore::new()), cfg)
    }

    // ── Lookup ─────────────────────────────────────────────────────────────

    /// Tier 1: normalized O(1) lookup, always at confidence 1.0.
    pub fn lookup_exact(&self, phrase: &str) -> Option<PhraseMatch> {
        let norm = normalize(phrase);
        let id = self.phrase_index.get(&norm)?;
        let cmd = self.command(id)?;
        Some(PhraseMatch {
            command_id: cmd.id.clone(),
            action: cmd.action.clone(),
            confidence: 1.0,
            tier: Tier::Exact,
            source: cmd.source,
            phrase: norm,
        })
    }

    /// Tier 2: best approximate match under the configured score ceiling.
    pub fn lookup_fuzzy(&self, phrase: &str) -> Option<PhraseMatch> {
        let norm = normalize(phrase);
        let hit = self.fuzzy.best_match(&norm, self.fuzzy_max_score)?;
        let cmd = self.command(&hit.command_id)?;
        Some(PhraseMatch {
            command_id: cmd.id.clone(),
            action: cmd.action.clone(),
            confidence: (1.0 - hit.score).clamp(0.0, 1.0),
            tier: Tier::Fuzzy,
            source: cmd.source,
            phrase: hit.phrase,
        })
    }

    /// Tier 0: the owning command's highest-priority rule matching `ctx`.
    pub fn lookup_context_override(&self, phrase: &str, ctx: &ResolutionContext) -> Option<PhraseMatch> {
        let norm = normalize(phrase);
        let cmd = self.command(self.phrase_index.get(&norm)?)?;
        let rule = cmd.select_rule(ctx)?;
        Some(PhraseMatch {
            command_id: cmd.id.clone(),
            action: rule.action.clone(),
            confidence: 1.0,
            tier: Tier::ContextOverride,
            source: cmd.source,
            phrase: norm,
        })
    }

    pub fn lookup_workflow(&self, phrase: &str) -> Option<&Workflow> {
        let id = self.workflow_index.get(&normalize(phrase))?;
        self.doc.workflows.iter().find(|w| &w.id == id)
    }

    pub fn command(&self, id: &str) -> Option<&Command> {
        self.doc.commands.iter().find(|c| c.id == id)
    }

    pub fn owner_of(&self, phrase: &str) -> Option<&Command> {
        self.command(self.phrase_index.get(&normalize(phrase))?)
    }

    pub fn all_commands(&self) -> &[Command] {
        &self.doc.commands
    }

    pub fn workflows(&self) -> &[Workflow] {
        &self.doc.workflows
    }

    /// True if any command or workflow owns the normalized phrase.
    pub fn is_phrase_taken(&self, phrase: &str) -> bool {
        let norm = normalize(phrase);
        self.phrase_index.contains_key(&norm) || self.workflow_index.contains_key(&norm)
    }

    /// True if some command maps to `action`.
    pub fn knows_action(&self, action: &str) -> bool {
        self.doc.commands.iter().any(|c| c.action == action)
    }

    /// Name the action a spoken description refers to: "delete the
    /// selection" → `delete_selection` when that action is in `known_actions`
    /// (or, with no configured set, already mapped in the dictionary), else
    /// whatever the description itself resolves to exactly.
    pub fn action_for(&self, description: &str, known_actions: &[String]) -> Option<String> {
        let norm = normalize(description);
        if norm.is_empty() {
            return None;
        }
        let candidates = action_candidates(&norm);
        let named = if known_actions.is_empty() {
            candidates.iter().find(|c| self.knows_action(c)).cloned()
        } else {
            candidates
                .iter()
                .find_map(|c| known_actions.iter().find(|k| k.eq_ignore_ascii_case(c)).cloned())
        };
        named.or_else(|| self.lookup_exact(&norm).map(|m| m.action))
    }

    // ── Mutation ───────────────────────────────────────────────────────────

    /// Map `phrase` to `action`. Rejected (false, no mutation) when the
    /// normalized phrase already belongs to anything.
    pub fn learn(&mut self, phrase: &str, action: &str, source: CommandSource) -> bool {
        let norm = normalize(phrase);
        let action = action.trim();
        if norm.is_empty() || action.is_empty() {
            warn!("Refusing to learn an empty phrase or action");
            return false;
        }
        if self.phrase_index.contains_key(&norm) || self.workflow_index.contains_key(&norm) {
            debug!("Phrase '{}' is already owned, learn rejected", norm);
            return false;
        }

        let now = Utc::now();
        let display = phrase.trim().to_string();
        if let Some(cmd) = self.doc.commands.iter_mut().find(|c| c.action == action) {
            cmd.phrases.push(display);
            cmd.updated_at = now;
            info!("Learned phrase '{}' for existing command {} ({})", norm, cmd.id, action);
        } else {
            let cmd = Command {
                id: Uuid::new_v4().to_string(),
                action: action.to_string(),
                phrases: vec![display],
                source,
                confidence: source.initial_confidence(),
                use_count: 0,
                last_used: None,
                created_at: now,
                updated_at: now,
                context_rules: Vec::new(),
            };
            info!("Learned phrase '{}' as new command {} ({}, {:?})", norm, cmd.id, action, source);
            self.doc.commands.push(cmd);
        }
        self.commit();
        true
    }

    /// Remove `phrase` from its owner; a command left without phrases is deleted.
    pub fn forget(&mut self, phrase: &str) -> bool {
        let norm = normalize(phrase);
        let Some(id) = self.phrase_index.get(&norm).cloned() else {
            return false;
        };
        let Some(pos) = self.doc.commands.iter().position(|c| c.id == id) else {
            return false;
        };

        let cmd = &mut self.doc.commands[pos];
        cmd.phrases.retain(|p| normalize(p) != norm);
        cmd.updated_at = Utc::now();
        if cmd.phrases.is_empty() {
            info!("Forgot '{}', command {} removed", norm, id);
            self.doc.commands.remove(pos);
        } else {
            info!("Forgot '{}' from command {}", norm, id);
        }
        self.commit();
        true
    }

    pub fn record_usage(&mut self, id: &str) -> bool {
        let Some(cmd) = self.doc.commands.iter_mut().find(|c| c.id == id) else {
            return false;
        };
        cmd.use_count += 1;
        cmd.last_used = Some(Utc::now());
        self.persist();
        true
    }

    /// Count a resolution hit. Persisted with the next write.
    pub fn record_hit(&mut self, tier: Tier) {
        let s = &mut self.doc.stats;
        match tier {
            Tier::ContextOverride => s.tier0_hits += 1,
            Tier::Exact => s.tier1_hits += 1,
            Tier::Fuzzy => s.tier2_hits += 1,
            Tier::Classifier => s.tier3_hits += 1,
        }
    }

    /// Shift confidence by `delta`, clamped to `[floor, 1.0]`. A confidence
    /// already under `floor` is never raised by a negative delta.
    pub fn adjust_confidence(&mut self, id: &str, delta: f32, floor: f32) -> Option<f32> {
        let cmd = self.doc.commands.iter_mut().find(|c| c.id == id)?;
        let lo = if delta < 0.0 {
            floor.clamp(0.0, 1.0).min(cmd.confidence)
        } else {
            0.0
        };
        let updated = (cmd.confidence + delta).clamp(lo, 1.0);
        debug!("Confidence {} {:.3} -> {:.3}", id, cmd.confidence, updated);
        cmd.confidence = updated;
        cmd.updated_at = Utc::now();
        self.persist();
        Some(updated)
    }

    /// Attach a context override to the command owning `phrase`.
    pub fn add_context_rule(&mut self, phrase: &str, rule: ContextRule) -> bool {
        if rule.matcher.is_empty() || rule.action.trim().is_empty() {
            return false;
        }
        let Some(id) = self.phrase_index.get(&normalize(phrase)).cloned() else {
            return false;
        };
        let Some(cmd) = self.doc.commands.iter_mut().find(|c| c.id == id) else {
            return false;
        };
        info!("Context rule for command {}: {:?} -> {}", id, rule.matcher, rule.action);
        cmd.context_rules.push(rule);
        cmd.updated_at = Utc::now();
        self.persist();
        true
    }

    /// Store a routine. Rejected when it has no steps, no usable trigger, or a
    /// trigger already owned by a command or workflow.
    pub fn add_workflow(&mut self, name: &str, phrases: &[String], steps: Vec<WorkflowStep>) -> Option<WorkflowId> {
        if steps.is_empty() {
            return None;
        }
        let mut seen = HashSet::new();
        let mut kept = Vec::new();
        for phrase in phrases {
            let norm = normalize(phrase);
            if norm.is_empty() || !seen.insert(norm.clone()) {
                continue;
            }
            if self.phrase_index.contains_key(&norm) || self.workflow_index.contains_key(&norm) {
                warn!("Workflow trigger '{}' is already owned, workflow rejected", norm);
                return None;
            }
            kept.push(phrase.trim().to_string());
        }
        if kept.is_empty() {
            return None;
        }

        let workflow = Workflow {
            id: Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            phrases: kept,
            steps,
            created_at: Utc::now(),
        };
        let id = workflow.id.clone();
        info!("Saved workflow '{}' ({} steps)", workflow.name, workflow.steps.len());
        self.doc.workflows.push(workflow);
        self.commit();
        Some(id)
    }

    pub fn remove_workflow(&mut self, id: &str) -> bool {
        let before = self.doc.workflows.len();
        self.doc.workflows.retain(|w| w.id != id);
        if self.doc.workflows.len() == before {
            return false;
        }
        info!("Removed workflow {}", id);
        self.commit();
        true
    }

    /// Decay `learned` commands unused for longer than `stale_after`; delete
    /// those that fall below `forget_below`.
    pub fn apply_time_decay(
        &mut self,
        now: DateTime<Utc>,
        stale_after: ChronoDuration,
        decay: f32,
        forget_below: f32,
    ) -> DecayReport {
        let mut report = DecayReport::default();
        for cmd in self.doc.commands.iter_mut().filter(|c| c.source == CommandSource::Learned) {
            let last = cmd.last_used.unwrap_or(cmd.created_at);
            if now - last <= stale_after {
                continue;
            }
            cmd.confidence = (cmd.confidence - decay).clamp(0.0, 1.0);
            cmd.updated_at = now;
            if cmd.confidence < forget_below {
                report.forgotten.push(cmd.id.clone());
            } else {
                report.decayed.push(cmd.id.clone());
            }
        }

        if report.decayed.is_empty() && report.forgotten.is_empty() {
            return report;
        }
        if !report.forgotten.is_empty() {
            self.doc.commands.retain(|c| !report.forgotten.contains(&c.id));
            info!("Time decay removed {} stale learned commands", report.forgotten.len());
        }
        self.commit();
        report
    }

    // ── Observability / persistence ────────────────────────────────────────

    pub fn stats(&self) -> DictionaryStats {
        let hits = self.doc.stats.clone();
        let total = hits.tier0_hits + hits.tier1_hits + hits.tier2_hits + hits.tier3_hits;
        let rate = |n: u64| if total == 0 { 0.0 } else { n as f64 / total as f64 };
        DictionaryStats {
            total_hits: total,
            tier0_rate: rate(hits.tier0_hits),
            tier1_rate: rate(hits.tier1_hits),
            tier2_rate: rate(hits.tier2_hits),
            tier3_rate: rate(hits.tier3_hits),
            hits,
            commands: self.doc.commands.len(),
            phrases: self.phrase_index.len(),
            workflows: self.doc.workflows.len(),
            persist_failures: self.persist_failures,
        }
    }

    /// Write the current document, surfacing the error to the caller.
    pub fn flush(&mut self) -> Result<(), StoreError> {
        self.store.save(&self.doc)
    }

    /// Persistence failures since the last call.
    pub fn drain_persist_failures(&mut self) -> u64 {
        std::mem::take(&mut self.undrained_failures)
    }

    fn commit(&mut self) {
        self.rebuild_indexes();
        self.persist();
    }

    fn persist(&mut self) {
        if let Err(e) = self.store.save(&self.doc) {
            // In-memory state stays authoritative for this process.
            error!("Dictionary persist failed: {}", e);
            self.persist_failures += 1;
            self.undrained_failures += 1;
        }
    }

    fn rebuild_indexes(&mut self) {
        self.phrase_index.clear();
        self.workflow_index.clear();
        let mut pairs = Vec::new();
        for cmd in &self.doc.commands {
            for phrase in &cmd.phrases {
                let norm = normalize(phrase);
                self.phrase_index.insert(norm.clone(), cmd.id.clone());
                pairs.push((norm, cmd.id.clone()));
            }
        }
        for wf in &self.doc.workflows {
            for phrase in &wf.phrases {
                self.workflow_index.insert(normalize(phrase), wf.id.clone());
            }
        }
        self.fuzzy = FuzzyIndex::build(pairs);
    }
}

/// Enforce invariants on a loaded document: confidences within [0, 1],
/// phrases unique across commands (first owner keeps it), no phrase-less
/// commands, workflow triggers not shadowing command phrases.
fn sanitize(mut doc: DictionaryDocument) -> DictionaryDocument {
    if doc.version != DOCUMENT_VERSION {
        warn!("Dictionary document version {} (expected {})", doc.version, DOCUMENT_VERSION);
        doc.version = DOCUMENT_VERSION;
    }

    let mut owned = HashSet::new();
    for cmd in doc.commands.iter_mut() {
        if !cmd.confidence.is_finite() {
            cmd.confidence = cmd.source.initial_confidence();
        }
        cmd.confidence = cmd.confidence.clamp(0.0, 1.0);
        cmd.phrases.retain(|p| {
            let norm = normalize(p);
            if norm.is_empty() || !owned.insert(norm.clone()) {
                warn!("Dropping duplicate or empty phrase '{}' from command {}", p, cmd.id);
                return false;
            }
            true
        });
    }
    doc.commands.retain(|c| !c.phrases.is_empty());

    for wf in doc.workflows.iter_mut() {
        wf.phrases.retain(|p| {
            let norm = normalize(p);
            !norm.is_empty() && owned.insert(norm)
        });
    }
    doc.workflows.retain(|w| !w.phrases.is_empty() && !w.steps.is_empty());
    doc
}

const ARTICLES: &[&str] = &["the", "a", "an", "my", "this", "that"];

/// Snake-cased spellings of a normalized description, literal first.
pub fn action_candidates(norm: &str) -> Vec<String> {
    let literal = norm.split_whitespace().collect::<Vec<_>>().join("_");
    let stripped = norm
        .split_whitespace()
        .filter(|w| !ARTICLES.contains(w))
        .collect::<Vec<_>>()
        .join("_");
    let mut out = vec![literal];
    if !stripped.is_empty() && stripped != out[0] {
        out.push(stripped);
    }
    out
}
