//! Knowledge units distilled from mined patterns, and their store.

use morphos_core::{all_match, stats, KnowledgeId, LearningExperience, Time};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::mining::{ExperiencePattern, PatternKind};

/// A distilled, reusable insight with decaying confidence.
///
/// Confidence is only ever derived through [`KnowledgeUnit::merge`] and
/// [`KnowledgeUnit::check`]; it stays in [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeUnit {
    /// Unique identifier
    pub id: KnowledgeId,

    /// Kind of the underlying pattern
    pub kind: PatternKind,

    /// Merge key (kind, source, outcome type)
    pub signature: String,

    /// Latest pattern behind the unit
    pub content: ExperiencePattern,

    confidence: f64,

    /// Experiences folded into the confidence average
    samples: u64,

    /// Times the unit fed back into a strategy
    pub usage_count: u64,

    /// Descriptive tags
    pub tags: BTreeSet<String>,

    /// Related units and link strength
    pub links: HashMap<KnowledgeId, f64>,

    /// Creation time
    pub created_at: Time,

    /// Last passed validation (creation time until then)
    pub last_validated: Time,

    /// Consecutive failed validations
    pub failed_validations: u32,
}

impl KnowledgeUnit {
    /// Create a unit from a mined pattern.
    pub fn from_pattern(pattern: ExperiencePattern, now: Time) -> Self {
        let mut tags = BTreeSet::new();
        tags.insert(pattern.kind.as_str().to_string());
        tags.insert(pattern.outcome_type.clone());
        tags.insert(pattern.source.key());

        Self {
            id: KnowledgeId::new(),
            kind: pattern.kind,
            signature: pattern.signature(),
            confidence: stats::clamp_unit(pattern.confidence),
            samples: pattern.support.max(1) as u64,
            content: pattern,
            usage_count: 0,
            tags,
            links: HashMap::new(),
            created_at: now,
            last_validated: now,
            failed_validations: 0,
        }
    }

    /// Current confidence.
    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Keys of the unit's pre-conditions.
    pub fn condition_keys(&self) -> HashSet<String> {
        self.content.condition_keys()
    }

    /// Fold another unit into this one.
    ///
    /// Confidence becomes the sample-weighted average, tags are unioned and
    /// shared links average their strength. Merging a unit into itself
    /// changes nothing.
    pub fn merge(&mut self, other: &KnowledgeUnit) {
        if other.id == self.id {
            return;
        }

        let total = self.samples + other.samples;
        self.confidence = stats::clamp_unit(
            (self.confidence * self.samples as f64 + other.confidence * other.samples as f64) / total as f64,
        );
        self.samples = total;
        self.usage_count += other.usage_count;
        self.tags.extend(other.tags.iter().cloned());

        for (id, strength) in &other.links {
            if *id == self.id {
                continue;
            }
            self.links
                .entry(*id)
                .and_modify(|s| *s = (*s + strength) / 2.0)
                .or_insert(*strength);
        }

        if other.content.experience_ids != self.content.experience_ids {
            self.content = other.content.clone();
        }
    }

    /// Whether recent experiences still bear the unit out.
    ///
    /// Only experiences from the same source and outcome type that satisfy
    /// every pre-condition count. `None` when none do.
    pub fn validate(&self, experiences: &[&LearningExperience]) -> Option<bool> {
        let relevant: Vec<&&LearningExperience> = experiences
            .iter()
            .filter(|e| e.source == self.content.source && e.outcome_type == self.content.outcome_type)
            .filter(|e| all_match(&self.content.conditions, &e.context))
            .collect();
        if relevant.is_empty() {
            return None;
        }
        let agreeing = relevant
            .iter()
            .filter(|e| e.success == self.kind.predicts_success())
            .count();
        Some(agreeing * 2 >= relevant.len())
    }

    /// Run one validation check; returns whether confidence decayed.
    ///
    /// A failed or inconclusive check decays confidence by `decay` once the
    /// unit has gone `max_age` without passing.
    pub fn check(
        &mut self,
        experiences: &[&LearningExperience],
        now: Time,
        max_age: chrono::Duration,
        decay: f64,
    ) -> bool {
        if self.validate(experiences) == Some(true) {
            self.last_validated = now;
            self.failed_validations = 0;
            return false;
        }

        self.failed_validations += 1;
        if now - self.last_validated >= max_age {
            self.confidence = stats::clamp_unit(self.confidence * decay);
            return true;
        }
        false
    }
}

/// Store of knowledge units, owned by the learner.
#[derive(Debug, Default)]
pub struct KnowledgeStore {
    units: HashMap<KnowledgeId, KnowledgeUnit>,
    by_signature: HashMap<String, KnowledgeId>,
}

impl KnowledgeStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of units.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Get a unit by id.
    pub fn get(&self, id: KnowledgeId) -> Option<&KnowledgeUnit> {
        self.units.get(&id)
    }

    /// All units, most confident first.
    pub fn list(&self) -> Vec<&KnowledgeUnit> {
        let mut units: Vec<&KnowledgeUnit> = self.units.values().collect();
        units.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        units
    }

    /// Add a pattern as knowledge, merging into the unit with the same
    /// signature if there is one. Returns the unit id and whether it is new.
    pub fn upsert(&mut self, pattern: ExperiencePattern, now: Time) -> (KnowledgeId, bool) {
        let candidate = KnowledgeUnit::from_pattern(pattern, now);
        if let Some(id) = self.by_signature.get(&candidate.signature).copied() {
            if let Some(existing) = self.units.get_mut(&id) {
                existing.merge(&candidate);
                return (id, false);
            }
        }

        let id = candidate.id;
        self.by_signature.insert(candidate.signature.clone(), id);
        self.units.insert(id, candidate);
        (id, true)
    }

    /// Count a use of a unit.
    pub fn record_usage(&mut self, id: KnowledgeId) {
        if let Some(unit) = self.units.get_mut(&id) {
            unit.usage_count += 1;
        }
    }

    /// Link units sharing pre-condition keys, strength = Jaccard overlap.
    ///
    /// An existing link averages its strength with the new one.
    pub fn relink(&mut self) {
        let keys: Vec<(KnowledgeId, HashSet<String>)> =
            self.units.values().map(|u| (u.id, u.condition_keys())).collect();

        for (id, own) in &keys {
            let Some(unit) = self.units.get_mut(id) else {
                continue;
            };
            for (other, theirs) in &keys {
                if other == id {
                    continue;
                }
                let strength = stats::jaccard(own, theirs);
                if strength <= 0.0 {
                    continue;
                }
                unit.links
                    .entry(*other)
                    .and_modify(|s| *s = (*s + strength) / 2.0)
                    .or_insert(strength);
            }
        }
    }

    /// Validate every unit; returns how many decayed.
    pub fn check_all(
        &mut self,
        experiences: &[&LearningExperience],
        now: Time,
        max_age: chrono::Duration,
        decay: f64,
    ) -> usize {
        self.units
            .values_mut()
            .filter(|u| now - u.created_at >= max_age)
            .map(|u| u.check(experiences, now, max_age, decay))
            .filter(|decayed| *decayed)
            .count()
    }

    /// Remove units below `floor`, and every link to them.
    pub fn prune(&mut self, floor: f64) -> Vec<KnowledgeUnit> {
        let doomed: Vec<KnowledgeId> = self
            .units
            .values()
            .filter(|u| u.confidence < floor)
            .map(|u| u.id)
            .collect();

        let mut removed = Vec::with_capacity(doomed.len());
        for id in &doomed {
            if let Some(unit) = self.units.remove(id) {
                self.by_signature.remove(&unit.signature);
                removed.push(unit);
            }
        }
        if !doomed.is_empty() {
            for unit in self.units.values_mut() {
                unit.links.retain(|id, _| !doomed.contains(id));
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use morphos_core::{Condition, ConditionOp, Context, ExperienceSource, StrategyId};
    use serde_json::json;

    fn pattern(kind: PatternKind, keys: &[&str], confidence: f64) -> ExperiencePattern {
        ExperiencePattern {
            kind,
            outcome_type: "strategy_execution".to_string(),
            source: ExperienceSource::Strategy(StrategyId::new("damping")),
            support: 4,
            frequency: confidence,
            confidence,
            common_context: Context::new(),
            conditions: keys
                .iter()
                .map(|k| Condition::new(*k, ConditionOp::Le, 0.5))
                .collect(),
            outcomes: HashMap::from([("gain".to_string(), 1.0)]),
            experience_ids: Vec::new(),
        }
    }

    fn experience(success: bool, entropy: f64) -> LearningExperience {
        LearningExperience::new(
            ExperienceSource::Strategy(StrategyId::new("damping")),
            "strategy_execution",
            Context::from([("entropy".to_string(), json!(entropy))]),
            success,
        )
    }

    #[test]
    fn test_self_merge_is_idempotent() {
        let now = chrono::Utc::now();
        let mut unit = KnowledgeUnit::from_pattern(pattern(PatternKind::Success, &["entropy"], 0.7), now);
        let before = (unit.confidence(), unit.tags.clone());

        unit.merge(&unit.clone());
        assert_eq!((unit.confidence(), unit.tags.clone()), before);

        let twin = KnowledgeUnit::from_pattern(pattern(PatternKind::Success, &["entropy"], 0.7), now);
        unit.merge(&twin);
        assert!((unit.confidence() - 0.7).abs() < 1e-12);
        assert_eq!(unit.tags, before.1);
    }

    #[test]
    fn test_merge_averages_confidence_and_links() {
        let now = chrono::Utc::now();
        let mut a = KnowledgeUnit::from_pattern(pattern(PatternKind::Success, &["entropy"], 0.9), now);
        let mut b = KnowledgeUnit::from_pattern(pattern(PatternKind::Success, &["entropy"], 0.5), now);
        let shared = KnowledgeId::new();
        a.links.insert(shared, 0.4);
        b.links.insert(shared, 0.8);
        b.tags.insert("extra".to_string());

        a.merge(&b);
        assert!((a.confidence() - 0.7).abs() < 1e-12);
        assert!((a.links[&shared] - 0.6).abs() < 1e-12);
        assert!(a.tags.contains("extra"));
    }

    #[test]
    fn test_store_merges_same_signature() {
        let now = chrono::Utc::now();
        let mut store = KnowledgeStore::new();
        let (first, created) = store.upsert(pattern(PatternKind::Success, &["entropy"], 0.6), now);
        assert!(created);
        let (second, created) = store.upsert(pattern(PatternKind::Success, &["entropy"], 0.8), now);
        assert!(!created);
        assert_eq!(first, second);
        assert_eq!(store.len(), 1);

        store.upsert(pattern(PatternKind::Failure, &["entropy", "load"], 0.6), now);
        assert_eq!(store.len(), 2);
        store.relink();
        assert!((store.get(first).unwrap().links.values().next().copied().unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_repeated_failed_validation_drops_unit() {
        let created = chrono::Utc::now();
        let mut store = KnowledgeStore::new();
        let (id, _) = store.upsert(pattern(PatternKind::Success, &["entropy"], 0.66), created);

        // Low entropy keeps failing
        let contradicting = [experience(false, 0.2), experience(false, 0.3)];
        let refs: Vec<&LearningExperience> = contradicting.iter().collect();

        let age = chrono::Duration::hours(24);
        let mut checks = 0;
        while store.get(id).is_some() {
            let now = created + chrono::Duration::hours(25 + checks);
            assert_eq!(store.check_all(&refs, now, age, 0.9), 1);
            store.prune(0.3);
            checks += 1;
            assert!(checks < 20);
        }
        assert_eq!(checks, 8);
    }

    #[test]
    fn test_passing_validation_resets_age() {
        let created = chrono::Utc::now();
        let mut unit = KnowledgeUnit::from_pattern(pattern(PatternKind::Success, &["entropy"], 0.66), created);
        let supporting = [experience(true, 0.2)];
        let refs: Vec<&LearningExperience> = supporting.iter().collect();

        let later = created + chrono::Duration::hours(30);
        assert!(!unit.check(&refs, later, chrono::Duration::hours(24), 0.9));
        assert_eq!(unit.last_validated, later);
        assert_eq!(unit.confidence(), 0.66);
    }
}
