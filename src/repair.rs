//! Reference Consistency & Repair Engine
//!
//! Achievements and their references live in separate collections with no
//! shared transaction. A failed second write, a crash between writes, or a
//! bad pointer leaves the pair out of step. This engine finds those states
//! and puts them back together.
//!
//! ## Broken states
//!
//! | state | meaning |
//! |-------|---------|
//! | dangling reference  | an active reference whose pointer resolves to no achievement of the student |
//! | missing reference   | a live achievement that no active reference claims |
//! | duplicate claim     | two or more active references point at one live achievement |
//! | stale reference     | an active reference still pointing at a soft-deleted achievement |
//!
//! ## Repair passes
//!
//! 0. Split duplicate claims (the claimant created closest to the
//!    achievement keeps it) and close stale drafts. A submitted, verified
//!    or rejected reference on a soft-deleted achievement carries a decision
//!    and is reported as unresolved instead of closed.
//! 1. Re-point each dangling or released reference at the closest unclaimed
//!    live achievement within the match window.
//! 2. Synthesize a `draft` reference for every live achievement still
//!    unclaimed.
//!
//! Matching is conservative: an achievement that is already claimed is never
//! handed to a second reference.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::db::schemas::{AchievementDoc, Metadata, ReferenceDoc};
use crate::status::AchievementStatus;
use crate::store::{bounded, AchievementStore, ReferenceStore};
use crate::types::{LedgerError, Result};

// ============================================================================
// Types
// ============================================================================

/// A detected inconsistency between achievements and references
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Inconsistency {
    DanglingReference {
        reference_id: String,
        achievement_id: String,
    },
    MissingReference {
        achievement_id: String,
    },
    DuplicateClaim {
        achievement_id: String,
        reference_ids: Vec<String>,
    },
    StaleReference {
        reference_id: String,
        achievement_id: String,
        status: AchievementStatus,
    },
}

/// What a repair fix did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FixKind {
    /// Pointer rewritten to another achievement
    Repointed,
    /// Stale draft reference set to `deleted`
    Closed,
    /// Draft reference created for an unclaimed achievement
    Created,
}

/// One applied change
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepairFix {
    pub kind: FixKind,
    pub reference_id: String,
    pub field: String,
    pub old_value: Option<String>,
    pub new_value: String,
}

/// A repair write that did not go through
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepairFailure {
    pub kind: FixKind,
    pub reference_id: Option<String>,
    pub achievement_id: String,
    pub error: String,
}

/// Outcome of one repair run for a student
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    pub student_id: String,
    pub achievements_scanned: usize,
    pub references_scanned: usize,
    pub fixes: Vec<RepairFix>,
    /// Inconsistencies left in place because no safe fix exists
    pub unresolved: Vec<Inconsistency>,
    pub failures: Vec<RepairFailure>,
}

impl RepairReport {
    pub fn is_clean(&self) -> bool {
        self.fixes.is_empty() && self.unresolved.is_empty() && self.failures.is_empty()
    }
}

// ============================================================================
// Classification
// ============================================================================

/// A student's records loaded in one go
struct Snapshot {
    achievements: HashMap<String, AchievementDoc>,
    /// Active references, oldest first
    references: Vec<ReferenceDoc>,
    references_scanned: usize,
}

/// The snapshot sorted into the broken states it contains
struct Classification<'a> {
    dangling: Vec<&'a ReferenceDoc>,
    /// Drafts on soft-deleted achievements, safe to close
    stale: Vec<&'a ReferenceDoc>,
    /// Non-draft references on soft-deleted achievements
    stranded: Vec<&'a ReferenceDoc>,
    /// Live achievement ID to the active references pointing at it
    claims: BTreeMap<String, Vec<&'a ReferenceDoc>>,
    /// Live achievements, oldest first
    live: Vec<&'a AchievementDoc>,
}

impl Snapshot {
    fn classify(&self) -> Classification<'_> {
        let mut dangling = Vec::new();
        let mut stale = Vec::new();
        let mut stranded = Vec::new();
        let mut claims: BTreeMap<String, Vec<&ReferenceDoc>> = BTreeMap::new();

        for reference in &self.references {
            match self.achievements.get(&reference.achievement_id) {
                None => dangling.push(reference),
                Some(achievement) if achievement.is_soft_deleted() => {
                    if reference.status == AchievementStatus::Draft {
                        stale.push(reference);
                    } else {
                        stranded.push(reference);
                    }
                }
                Some(_) => claims
                    .entry(reference.achievement_id.clone())
                    .or_default()
                    .push(reference),
            }
        }

        let mut live: Vec<&AchievementDoc> = self
            .achievements
            .values()
            .filter(|a| !a.is_soft_deleted())
            .collect();
        live.sort_by_key(|a| (a.created_millis(), a._id));

        Classification {
            dangling,
            stale,
            stranded,
            claims,
            live,
        }
    }
}

fn ref_id(reference: &ReferenceDoc) -> String {
    reference.id_hex().unwrap_or_default()
}

fn window_millis(window: Duration) -> i64 {
    i64::try_from(window.as_millis()).unwrap_or(i64::MAX)
}

fn stale_entry(reference: &ReferenceDoc) -> Inconsistency {
    Inconsistency::StaleReference {
        reference_id: ref_id(reference),
        achievement_id: reference.achievement_id.clone(),
        status: reference.status,
    }
}

/// The claimant created closest to the achievement, ties broken by ID
pub(crate) fn keeper<'a>(achievement: &AchievementDoc, claimants: &[&'a ReferenceDoc]) -> Option<&'a ReferenceDoc> {
    let created = achievement.created_millis();
    claimants
        .iter()
        .copied()
        .min_by_key(|r| ((r.created_millis() - created).abs(), r._id))
}

// ============================================================================
// Engine
// ============================================================================

/// Audits and repairs achievement/reference consistency
#[derive(Clone)]
pub struct RepairEngine {
    achievements: Arc<dyn AchievementStore>,
    references: Arc<dyn ReferenceStore>,
    config: EngineConfig,
}

impl RepairEngine {
    pub fn new(
        achievements: Arc<dyn AchievementStore>,
        references: Arc<dyn ReferenceStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            achievements,
            references,
            config,
        }
    }

    async fn snapshot(&self, student_id: &str) -> Result<Snapshot> {
        let timeout = self.config.store_timeout;
        let achievements = bounded(
            timeout,
            "list_achievements_by_student",
            self.achievements.list_achievements_by_student(student_id, true),
        )
        .await?;
        let references = bounded(
            timeout,
            "list_references_by_student",
            self.references.list_references_by_student(student_id),
        )
        .await?;

        let references_scanned = references.len();
        let mut references: Vec<ReferenceDoc> =
            references.into_iter().filter(|r| r.is_active()).collect();
        references.sort_by_key(|r| (r.created_millis(), r._id));

        Ok(Snapshot {
            achievements: achievements
                .into_iter()
                .filter_map(|a| a.id_hex().map(|id| (id, a)))
                .collect(),
            references,
            references_scanned,
        })
    }

    /// List every inconsistency for a student without changing anything
    pub async fn audit(&self, student_id: &str) -> Result<Vec<Inconsistency>> {
        let snapshot = self.snapshot(student_id).await?;
        let classes = snapshot.classify();
        let mut found = Vec::new();

        for reference in &classes.dangling {
            found.push(Inconsistency::DanglingReference {
                reference_id: ref_id(reference),
                achievement_id: reference.achievement_id.clone(),
            });
        }

        for (achievement_id, claimants) in &classes.claims {
            if claimants.len() > 1 {
                found.push(Inconsistency::DuplicateClaim {
                    achievement_id: achievement_id.clone(),
                    reference_ids: claimants.iter().map(|r| ref_id(r)).collect(),
                });
            }
        }

        for reference in classes.stale.iter().chain(&classes.stranded) {
            found.push(stale_entry(reference));
        }

        for achievement in &classes.live {
            let id = achievement.id_hex().unwrap_or_default();
            if !classes.claims.contains_key(&id) {
                found.push(Inconsistency::MissingReference { achievement_id: id });
            }
        }

        debug!(
            student_id = %student_id,
            inconsistencies = found.len(),
            "Audit complete"
        );
        Ok(found)
    }

    /// Restore the one-reference-per-live-achievement invariant for a student
    ///
    /// Read failures abort with `StoreUnavailable`. Write failures are
    /// collected in the report and the run continues.
    pub async fn repair(&self, student_id: &str) -> Result<RepairReport> {
        let snapshot = self.snapshot(student_id).await?;
        let classes = snapshot.classify();
        let timeout = self.config.store_timeout;

        let mut report = RepairReport {
            student_id: student_id.to_string(),
            achievements_scanned: snapshot.achievements.len(),
            references_scanned: snapshot.references_scanned,
            ..Default::default()
        };

        // Pass 0: split duplicate claims, close stale drafts
        let mut claimed: HashSet<String> = HashSet::new();
        let mut released: Vec<(&ReferenceDoc, &str)> = Vec::new();

        for (achievement_id, claimants) in &classes.claims {
            claimed.insert(achievement_id.clone());
            if claimants.len() < 2 {
                continue;
            }
            let Some(achievement) = snapshot.achievements.get(achievement_id) else {
                continue;
            };
            let kept = keeper(achievement, claimants).and_then(|k| k._id);
            for reference in claimants.iter().copied() {
                if reference._id != kept {
                    released.push((reference, achievement_id.as_str()));
                }
            }
        }

        for reference in &classes.stale {
            let mut closed = (*reference).clone();
            closed.status = AchievementStatus::Deleted;
            closed.metadata.touch();
            match bounded(timeout, "update_reference", self.references.update_reference(&closed)).await {
                Ok(()) => {
                    info!(
                        student_id = %student_id,
                        reference_id = %ref_id(reference),
                        achievement_id = %reference.achievement_id,
                        "Closed stale draft reference"
                    );
                    report.fixes.push(RepairFix {
                        kind: FixKind::Closed,
                        reference_id: ref_id(reference),
                        field: "status".to_string(),
                        old_value: Some(reference.status.as_str().to_string()),
                        new_value: AchievementStatus::Deleted.as_str().to_string(),
                    });
                }
                Err(e) => {
                    warn!(reference_id = %ref_id(reference), error = %e, "Failed to close stale reference");
                    report.failures.push(RepairFailure {
                        kind: FixKind::Closed,
                        reference_id: Some(ref_id(reference)),
                        achievement_id: reference.achievement_id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        // Decided references on deleted achievements need a human
        for reference in &classes.stranded {
            warn!(
                student_id = %student_id,
                reference_id = %ref_id(reference),
                status = %reference.status.as_str(),
                "Active reference points at a soft-deleted achievement"
            );
            report.unresolved.push(stale_entry(reference));
        }

        // Pass 1: re-point dangling and released references
        let mut homeless: Vec<(&ReferenceDoc, Option<&str>)> = classes
            .dangling
            .iter()
            .map(|r| (*r, None))
            .chain(released.iter().map(|(r, from)| (*r, Some(*from))))
            .collect();
        homeless.sort_by_key(|(r, _)| (r.created_millis(), r._id));

        let window = window_millis(self.config.match_window);
        for (reference, released_from) in homeless {
            let created = reference.created_millis();
            let target = classes
                .live
                .iter()
                .filter_map(|a| a.id_hex().map(|id| (id, *a)))
                .filter(|(id, _)| !claimed.contains(id))
                .filter(|(_, a)| (a.created_millis() - created).abs() <= window)
                .min_by(|(id_a, a), (id_b, b)| {
                    let da = (a.created_millis() - created).abs();
                    let db = (b.created_millis() - created).abs();
                    da.cmp(&db).then_with(|| id_a.cmp(id_b))
                });

            let Some((target_id, _)) = target else {
                debug!(reference_id = %ref_id(reference), "No achievement matches reference");
                report.unresolved.push(match released_from {
                    Some(achievement_id) => Inconsistency::DuplicateClaim {
                        achievement_id: achievement_id.to_string(),
                        reference_ids: vec![ref_id(reference)],
                    },
                    None => Inconsistency::DanglingReference {
                        reference_id: ref_id(reference),
                        achievement_id: reference.achievement_id.clone(),
                    },
                });
                continue;
            };

            // Claimed even if the write fails, so pass 2 cannot create a rival
            claimed.insert(target_id.clone());

            let mut repointed = reference.clone();
            repointed.achievement_id = target_id.clone();
            repointed.metadata.touch();
            match bounded(timeout, "update_reference", self.references.update_reference(&repointed)).await {
                Ok(()) => {
                    info!(
                        student_id = %student_id,
                        reference_id = %ref_id(reference),
                        old_achievement_id = %reference.achievement_id,
                        achievement_id = %target_id,
                        "Re-pointed reference"
                    );
                    report.fixes.push(RepairFix {
                        kind: FixKind::Repointed,
                        reference_id: ref_id(reference),
                        field: "achievement_id".to_string(),
                        old_value: Some(reference.achievement_id.clone()),
                        new_value: target_id,
                    });
                }
                Err(e) => {
                    warn!(reference_id = %ref_id(reference), error = %e, "Failed to re-point reference");
                    report.failures.push(RepairFailure {
                        kind: FixKind::Repointed,
                        reference_id: Some(ref_id(reference)),
                        achievement_id: target_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        // Pass 2: give every unclaimed live achievement a draft reference
        for achievement in &classes.live {
            let Some(achievement_id) = achievement.id_hex() else {
                continue;
            };
            if claimed.contains(&achievement_id) {
                continue;
            }

            let mut reference = ReferenceDoc::draft(student_id.to_string(), achievement_id.clone());
            reference.metadata = match achievement.metadata.created_at {
                Some(at) => Metadata::created_at(at),
                None => Metadata::new(),
            };

            match bounded(timeout, "create_reference", self.references.create_reference(reference)).await {
                Ok(created) => {
                    let reference_id = ref_id(&created);
                    info!(
                        student_id = %student_id,
                        reference_id = %reference_id,
                        achievement_id = %achievement_id,
                        "Created missing reference"
                    );
                    report.fixes.push(RepairFix {
                        kind: FixKind::Created,
                        reference_id,
                        field: "achievement_id".to_string(),
                        old_value: None,
                        new_value: achievement_id,
                    });
                }
                Err(e) => {
                    warn!(achievement_id = %achievement_id, error = %e, "Failed to create missing reference");
                    report.failures.push(RepairFailure {
                        kind: FixKind::Created,
                        reference_id: None,
                        achievement_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            student_id = %student_id,
            fixes = report.fixes.len(),
            unresolved = report.unresolved.len(),
            failures = report.failures.len(),
            "Repair complete"
        );
        Ok(report)
    }

    /// Find the reference that tracks an achievement
    pub async fn safe_resolve_reference(&self, achievement_id: &str) -> Result<ReferenceDoc> {
        let achievement = bounded(
            self.config.store_timeout,
            "get_achievement_by_id",
            self.achievements.get_achievement_by_id(achievement_id),
        )
        .await?;
        self.resolve_for(&achievement).await
    }

    /// Find the reference for an already loaded achievement
    ///
    /// A reference pointing straight at the achievement wins, active ones
    /// first. Failing that, a single dangling reference created within the
    /// resolve window is taken; several such candidates are `Inconsistent`.
    pub async fn resolve_for(&self, achievement: &AchievementDoc) -> Result<ReferenceDoc> {
        let achievement_id = achievement
            .id_hex()
            .ok_or_else(|| LedgerError::NotFound("achievement has no ID".into()))?;
        let timeout = self.config.store_timeout;

        let references = bounded(
            timeout,
            "list_references_by_student",
            self.references.list_references_by_student(&achievement.student_id),
        )
        .await?;

        let direct: Vec<&ReferenceDoc> = references
            .iter()
            .filter(|r| r.achievement_id == achievement_id)
            .collect();
        let active: Vec<&ReferenceDoc> = direct.iter().copied().filter(|r| r.is_active()).collect();
        if let Some(reference) = keeper(achievement, &active) {
            return Ok(reference.clone());
        }
        if let Some(reference) = direct.last() {
            return Ok((*reference).clone());
        }

        let known: HashSet<String> = bounded(
            timeout,
            "list_achievements_by_student",
            self.achievements
                .list_achievements_by_student(&achievement.student_id, true),
        )
        .await?
        .iter()
        .filter_map(|a| a.id_hex())
        .collect();

        let window = window_millis(self.config.resolve_window);
        let created = achievement.created_millis();
        let candidates: Vec<&ReferenceDoc> = references
            .iter()
            .filter(|r| r.is_active() && !known.contains(&r.achievement_id))
            .filter(|r| (r.created_millis() - created).abs() <= window)
            .collect();

        match candidates.as_slice() {
            [only] => {
                warn!(
                    achievement_id = %achievement_id,
                    reference_id = %ref_id(only),
                    pointer = %only.achievement_id,
                    "Resolved achievement through a dangling reference"
                );
                Ok((*only).clone())
            }
            [] => Err(LedgerError::NotFound(format!(
                "reference for achievement {}",
                achievement_id
            ))),
            many => Err(LedgerError::Inconsistent(format!(
                "{} dangling references match achievement {}",
                many.len(),
                achievement_id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::NewAchievement;
    use crate::store::MemoryStore;
    use bson::DateTime;

    const STUDENT: &str = "student-1";

    fn achievement_at(millis: i64) -> AchievementDoc {
        let content = NewAchievement {
            category: "competition".into(),
            title: "Contest Win".into(),
            description: "Regional programming contest".into(),
            ..Default::default()
        }
        .validate()
        .unwrap();
        let mut doc = AchievementDoc::new(STUDENT.to_string(), content);
        doc.metadata = Metadata::created_at(DateTime::from_millis(millis));
        doc
    }

    fn reference_at(pointer: &str, millis: i64) -> ReferenceDoc {
        let mut reference = ReferenceDoc::draft(STUDENT.to_string(), pointer.to_string());
        reference.metadata = Metadata::created_at(DateTime::from_millis(millis));
        reference
    }

    fn engine(store: &Arc<MemoryStore>) -> RepairEngine {
        RepairEngine::new(store.clone(), store.clone(), EngineConfig::default())
    }

    #[test]
    fn test_keeper_prefers_closest_then_lowest_id() {
        let achievement = achievement_at(10_000);
        let mut far = reference_at("a", 19_000);
        far._id = Some(bson::oid::ObjectId::new());
        let mut near = reference_at("a", 10_500);
        near._id = Some(bson::oid::ObjectId::new());

        let kept = keeper(&achievement, &[&far, &near]).unwrap();
        assert_eq!(kept._id, near._id);
        assert!(keeper(&achievement, &[]).is_none());
    }

    #[tokio::test]
    async fn test_audit_clean_student() {
        let store = Arc::new(MemoryStore::new());
        let id = store.insert_achievement_raw(achievement_at(1_000));
        store.insert_reference_raw(reference_at(&id, 1_000));

        assert!(engine(&store).audit(STUDENT).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_audit_ignores_deleted_references() {
        let store = Arc::new(MemoryStore::new());
        let mut closed = reference_at("000000000000000000000000", 1_000);
        closed.status = AchievementStatus::Deleted;
        store.insert_reference_raw(closed);

        assert!(engine(&store).audit(STUDENT).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_window_is_inclusive() {
        let store = Arc::new(MemoryStore::new());
        let id = store.insert_achievement_raw(achievement_at(20_000));
        store.insert_reference_raw(reference_at("gone", 10_000));

        let report = engine(&store).repair(STUDENT).await.unwrap();
        assert_eq!(report.fixes.len(), 1);
        assert_eq!(report.fixes[0].new_value, id);
    }

    #[tokio::test]
    async fn test_resolve_falls_back_within_window_only() {
        let store = Arc::new(MemoryStore::new());
        let id = store.insert_achievement_raw(achievement_at(100_000));
        store.insert_reference_raw(reference_at("gone", 106_000));

        let engine = engine(&store);
        assert!(engine
            .safe_resolve_reference(&id)
            .await
            .unwrap_err()
            .is_not_found());
    }
}
