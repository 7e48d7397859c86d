//! Reference consistency and repair integration tests

mod common;

use bson::DateTime;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use achievement_ledger::db::schemas::{AchievementDoc, Metadata, ReferenceDoc};
use achievement_ledger::store::{FailurePoint, MemoryStore, ReferenceStore};
use achievement_ledger::{
    AchievementStatus, EngineConfig, FixKind, Inconsistency, LedgerError, RepairEngine,
};
use common::{competition, Fixture};

const STUDENT: &str = "student-1";
const MISSING: &str = "65f000000000000000000000";

fn achievement_at(millis: i64) -> AchievementDoc {
    let content = competition("Contest Win").validate().unwrap();
    let mut doc = AchievementDoc::new(STUDENT.to_string(), content);
    doc.metadata = Metadata::created_at(DateTime::from_millis(millis));
    doc
}

fn reference_at(pointer: &str, millis: i64) -> ReferenceDoc {
    let mut reference = ReferenceDoc::draft(STUDENT.to_string(), pointer.to_string());
    reference.metadata = Metadata::created_at(DateTime::from_millis(millis));
    reference
}

fn setup() -> (Arc<MemoryStore>, RepairEngine) {
    let store = Arc::new(MemoryStore::new());
    let engine = RepairEngine::new(store.clone(), store.clone(), EngineConfig::default());
    (store, engine)
}

/// Active references grouped by pointer
fn claims(store: &MemoryStore) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for reference in store.all_references() {
        if reference.is_active() {
            *counts.entry(reference.achievement_id).or_insert(0) += 1;
        }
    }
    counts
}

#[tokio::test]
async fn test_dangling_reference_is_repointed() {
    let (store, engine) = setup();
    let achievement_id = store.insert_achievement_raw(achievement_at(100_000));
    let reference_id = store.insert_reference_raw(reference_at(MISSING, 103_000));

    let audit = engine.audit(STUDENT).await.unwrap();
    assert!(audit.contains(&Inconsistency::DanglingReference {
        reference_id: reference_id.clone(),
        achievement_id: MISSING.to_string(),
    }));

    let report = engine.repair(STUDENT).await.unwrap();
    assert_eq!(report.fixes.len(), 1);
    let fix = &report.fixes[0];
    assert_eq!(fix.kind, FixKind::Repointed);
    assert_eq!(fix.reference_id, reference_id);
    assert_eq!(fix.field, "achievement_id");
    assert_eq!(fix.old_value.as_deref(), Some(MISSING));
    assert_eq!(fix.new_value, achievement_id);

    let reference = store.get_reference_by_id(&reference_id).await.unwrap();
    assert_eq!(reference.achievement_id, achievement_id);
    assert!(engine.audit(STUDENT).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_dangling_outside_window_is_orphan() {
    let (store, engine) = setup();
    let achievement_id = store.insert_achievement_raw(achievement_at(100_000));
    let reference_id = store.insert_reference_raw(reference_at(MISSING, 160_000));

    let report = engine.repair(STUDENT).await.unwrap();
    assert_eq!(
        report.unresolved,
        vec![Inconsistency::DanglingReference {
            reference_id,
            achievement_id: MISSING.to_string(),
        }]
    );

    // The achievement still gets its own reference
    assert_eq!(report.fixes.len(), 1);
    assert_eq!(report.fixes[0].kind, FixKind::Created);
    assert_eq!(report.fixes[0].new_value, achievement_id);
}

#[tokio::test]
async fn test_missing_reference_is_synthesized() {
    let (store, engine) = setup();
    let achievement_id = store.insert_achievement_raw(achievement_at(42_000));

    assert_eq!(
        engine.audit(STUDENT).await.unwrap(),
        vec![Inconsistency::MissingReference {
            achievement_id: achievement_id.clone(),
        }]
    );

    let report = engine.repair(STUDENT).await.unwrap();
    assert_eq!(report.fixes.len(), 1);
    assert!(report.fixes[0].old_value.is_none());

    let references = store.all_references();
    assert_eq!(references.len(), 1);
    assert_eq!(references[0].achievement_id, achievement_id);
    assert_eq!(references[0].status, AchievementStatus::Draft);
    assert_eq!(references[0].created_millis(), 42_000);
}

#[tokio::test]
async fn test_soft_deleted_achievement_needs_no_reference() {
    let (store, engine) = setup();
    let mut gone = achievement_at(1_000);
    gone.metadata.mark_deleted(DateTime::now());
    store.insert_achievement_raw(gone);

    assert!(engine.audit(STUDENT).await.unwrap().is_empty());
    assert!(engine.repair(STUDENT).await.unwrap().is_clean());
}

#[tokio::test]
async fn test_stale_draft_is_closed() {
    let (store, engine) = setup();
    let mut gone = achievement_at(1_000);
    gone.metadata.mark_deleted(DateTime::now());
    let gone_id = store.insert_achievement_raw(gone);
    let reference_id = store.insert_reference_raw(reference_at(&gone_id, 1_000));

    assert_eq!(
        engine.audit(STUDENT).await.unwrap(),
        vec![Inconsistency::StaleReference {
            reference_id: reference_id.clone(),
            achievement_id: gone_id,
            status: AchievementStatus::Draft,
        }]
    );

    let report = engine.repair(STUDENT).await.unwrap();
    assert_eq!(report.fixes.len(), 1);
    assert_eq!(report.fixes[0].kind, FixKind::Closed);
    assert!(report.unresolved.is_empty());
    assert_eq!(
        store.get_reference_by_id(&reference_id).await.unwrap().status,
        AchievementStatus::Deleted
    );
}

#[tokio::test]
async fn test_submitted_reference_on_deleted_achievement_is_reported() {
    let (store, engine) = setup();
    let mut gone = achievement_at(1_000);
    gone.metadata.mark_deleted(DateTime::now());
    let gone_id = store.insert_achievement_raw(gone);
    let mut submitted = reference_at(&gone_id, 1_000);
    submitted.status = AchievementStatus::Submitted;
    let reference_id = store.insert_reference_raw(submitted);

    let expected = Inconsistency::StaleReference {
        reference_id: reference_id.clone(),
        achievement_id: gone_id,
        status: AchievementStatus::Submitted,
    };
    assert_eq!(engine.audit(STUDENT).await.unwrap(), vec![expected.clone()]);

    let report = engine.repair(STUDENT).await.unwrap();
    assert!(report.fixes.is_empty());
    assert_eq!(report.unresolved, vec![expected]);
    assert!(!report.is_clean());

    // The decision is left for a human; a rerun changes nothing
    assert_eq!(
        store.get_reference_by_id(&reference_id).await.unwrap().status,
        AchievementStatus::Submitted
    );
    let again = engine.repair(STUDENT).await.unwrap();
    assert!(again.fixes.is_empty());
    assert_eq!(again.unresolved.len(), 1);
}

#[tokio::test]
async fn test_duplicate_claim_is_split() {
    let (store, engine) = setup();
    let first = store.insert_achievement_raw(achievement_at(10_000));
    let second = store.insert_achievement_raw(achievement_at(12_000));
    let keeper = store.insert_reference_raw(reference_at(&first, 10_100));
    let wrong = store.insert_reference_raw(reference_at(&first, 12_050));

    let audit = engine.audit(STUDENT).await.unwrap();
    assert!(audit.iter().any(|i| matches!(
        i,
        Inconsistency::DuplicateClaim { achievement_id, reference_ids }
            if achievement_id == &first && reference_ids.len() == 2
    )));
    assert!(audit.contains(&Inconsistency::MissingReference {
        achievement_id: second.clone(),
    }));

    let report = engine.repair(STUDENT).await.unwrap();
    assert_eq!(report.fixes.len(), 1);
    assert_eq!(report.fixes[0].reference_id, wrong);
    assert_eq!(report.fixes[0].new_value, second);

    assert_eq!(
        store.get_reference_by_id(&keeper).await.unwrap().achievement_id,
        first
    );
    assert!(claims(&store).values().all(|&n| n == 1));
    assert_eq!(store.all_references().len(), 2);
}

#[tokio::test]
async fn test_claimed_achievement_is_never_reassigned() {
    let (store, engine) = setup();
    let id = store.insert_achievement_raw(achievement_at(50_000));
    store.insert_reference_raw(reference_at(&id, 50_000));
    let stray = store.insert_reference_raw(reference_at(MISSING, 50_500));

    let report = engine.repair(STUDENT).await.unwrap();
    assert!(report.fixes.is_empty());
    assert_eq!(report.unresolved.len(), 1);
    assert_eq!(
        store.get_reference_by_id(&stray).await.unwrap().achievement_id,
        MISSING
    );
    assert_eq!(claims(&store).get(&id), Some(&1));
}

#[tokio::test]
async fn test_equidistant_match_breaks_tie_by_id() {
    let (store, engine) = setup();
    let early = store.insert_achievement_raw(achievement_at(5_000));
    let late = store.insert_achievement_raw(achievement_at(15_000));
    store.insert_reference_raw(reference_at(MISSING, 10_000));

    let report = engine.repair(STUDENT).await.unwrap();
    let repointed: Vec<_> = report
        .fixes
        .iter()
        .filter(|f| f.kind == FixKind::Repointed)
        .collect();
    assert_eq!(repointed.len(), 1);
    assert_eq!(repointed[0].new_value, std::cmp::min(early, late));
}

#[tokio::test]
async fn test_repair_is_idempotent() {
    let (store, engine) = setup();
    let a = store.insert_achievement_raw(achievement_at(10_000));
    store.insert_achievement_raw(achievement_at(30_000));
    store.insert_achievement_raw(achievement_at(60_000));
    store.insert_reference_raw(reference_at(&a, 10_000));
    store.insert_reference_raw(reference_at(&a, 10_500));
    store.insert_reference_raw(reference_at(MISSING, 61_000));
    store.insert_reference_raw(reference_at(MISSING, 200_000));

    let first = engine.repair(STUDENT).await.unwrap();
    assert_eq!(first.fixes.len(), 2);
    assert_eq!(first.unresolved.len(), 2);

    let second = engine.repair(STUDENT).await.unwrap();
    assert!(second.fixes.is_empty());
    assert!(second.failures.is_empty());
    assert_eq!(second.unresolved, first.unresolved);
}

#[tokio::test]
async fn test_write_failures_are_collected() {
    let (store, engine) = setup();
    store.insert_achievement_raw(achievement_at(1_000));
    let reference_id = store.insert_reference_raw(reference_at(MISSING, 1_000));
    store.fail_on(FailurePoint::UpdateReference);

    let report = engine.repair(STUDENT).await.unwrap();
    assert!(report.fixes.is_empty());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].reference_id.as_deref(), Some(reference_id.as_str()));

    // The matched achievement is not given a rival reference
    assert_eq!(store.all_references().len(), 1);
}

#[tokio::test]
async fn test_read_failure_is_store_unavailable() {
    let store = Arc::new(MemoryStore::new());
    let engine = RepairEngine::new(
        store.clone(),
        store.clone(),
        EngineConfig {
            store_timeout: Duration::from_millis(20),
            ..EngineConfig::default()
        },
    );
    store.set_latency(Some(Duration::from_millis(300)));

    let err = engine.repair(STUDENT).await.unwrap_err();
    assert!(matches!(err, LedgerError::StoreUnavailable(_)));
}

#[tokio::test]
async fn test_safe_resolve_prefers_direct_active_pointer() {
    let (store, engine) = setup();
    let id = store.insert_achievement_raw(achievement_at(1_000));
    let mut closed = reference_at(&id, 900);
    closed.status = AchievementStatus::Deleted;
    store.insert_reference_raw(closed);
    let live = store.insert_reference_raw(reference_at(&id, 1_000));

    let resolved = engine.safe_resolve_reference(&id).await.unwrap();
    assert_eq!(resolved.id_hex().unwrap(), live);
}

#[tokio::test]
async fn test_safe_resolve_falls_back_to_single_dangling() {
    let (store, engine) = setup();
    let id = store.insert_achievement_raw(achievement_at(1_000));
    let stray = store.insert_reference_raw(reference_at(MISSING, 3_000));

    let resolved = engine.safe_resolve_reference(&id).await.unwrap();
    assert_eq!(resolved.id_hex().unwrap(), stray);
}

#[tokio::test]
async fn test_safe_resolve_ambiguous_is_inconsistent() {
    let (store, engine) = setup();
    let id = store.insert_achievement_raw(achievement_at(1_000));
    store.insert_reference_raw(reference_at(MISSING, 2_000));
    store.insert_reference_raw(reference_at("65f000000000000000000001", 2_500));

    let err = engine.safe_resolve_reference(&id).await.unwrap_err();
    assert!(matches!(err, LedgerError::Inconsistent(_)));
}

#[tokio::test]
async fn test_safe_resolve_unknown_achievement() {
    let (_, engine) = setup();
    assert!(engine
        .safe_resolve_reference(MISSING)
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn test_lifecycle_submits_through_dangling_reference() {
    let fx = Fixture::new();
    let (achievement_id, reference_id) = fx.create("Contest Win").await;

    let mut broken = fx.store.get_reference_by_id(&reference_id).await.unwrap();
    broken.achievement_id = MISSING.to_string();
    fx.store.update_reference(&broken).await.unwrap();

    let submitted = fx.engine.submit(fx.sid(), &achievement_id).await.unwrap();
    assert_eq!(submitted.id_hex().unwrap(), reference_id);
    assert_eq!(submitted.achievement_id, achievement_id);
    assert!(fx.repair().audit(fx.sid()).await.unwrap().is_empty());
}
