//! Achievement Lifecycle Engine
//!
//! Drives an achievement and its reference through
//! `draft → submitted → verified | rejected` (or `draft → deleted`) and
//! gates every mutation on ownership or the advisor relationship.
//!
//! Each operation is a short sequence of store calls, each bounded by the
//! configured store timeout. Creation writes the achievement first and the
//! reference second; a failed second write is compensated by removing the
//! achievement. Soft deletion tolerates a failed reference write and leaves
//! the stale draft for [`RepairEngine::repair`] to close.

use bson::DateTime;
use serde::Serialize;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::db::schemas::{AchievementDoc, NewAchievement, ReferenceDoc};
use crate::identity::{IdentityStore, Lecturer, Student};
use crate::notify::{Notification, NotificationKind, Notifier};
use crate::repair::{keeper, RepairEngine};
use crate::status::AchievementStatus;
use crate::store::{bounded, AchievementStore, ReferenceStore};
use crate::types::{LedgerError, Result};

/// An advisee's achievement together with its reference
#[derive(Debug, Clone, Serialize)]
pub struct AdviseeAchievement {
    pub student: Student,
    pub achievement: AchievementDoc,
    pub reference: ReferenceDoc,
}

/// What a lecturer sees when reviewing a reference
#[derive(Debug, Clone, Serialize)]
pub struct VerificationDetail {
    pub student: Student,
    pub achievement: AchievementDoc,
    pub reference: ReferenceDoc,
}

/// The pointer value a reference to `achievement` must carry
fn canonical_id(achievement: &AchievementDoc, requested: &str) -> String {
    achievement
        .id_hex()
        .unwrap_or_else(|| requested.to_string())
}

pub struct LifecycleEngine {
    identity: Arc<dyn IdentityStore>,
    achievements: Arc<dyn AchievementStore>,
    references: Arc<dyn ReferenceStore>,
    notifier: Arc<dyn Notifier>,
    repair: RepairEngine,
    config: EngineConfig,
}

impl LifecycleEngine {
    pub fn new(
        identity: Arc<dyn IdentityStore>,
        achievements: Arc<dyn AchievementStore>,
        references: Arc<dyn ReferenceStore>,
        notifier: Arc<dyn Notifier>,
        config: EngineConfig,
    ) -> Self {
        let repair = RepairEngine::new(achievements.clone(), references.clone(), config);
        Self {
            identity,
            achievements,
            references,
            notifier,
            repair,
            config,
        }
    }

    /// The repair engine sharing this engine's stores
    pub fn repair_engine(&self) -> &RepairEngine {
        &self.repair
    }

    // ========================================================================
    // Store helpers
    // ========================================================================

    async fn load_achievement(&self, achievement_id: &str) -> Result<AchievementDoc> {
        bounded(
            self.config.store_timeout,
            "get_achievement_by_id",
            self.achievements.get_achievement_by_id(achievement_id),
        )
        .await
    }

    async fn save_achievement(&self, achievement: &AchievementDoc) -> Result<()> {
        bounded(
            self.config.store_timeout,
            "update_achievement",
            self.achievements.update_achievement(achievement),
        )
        .await
    }

    async fn save_reference(&self, reference: &ReferenceDoc) -> Result<()> {
        bounded(
            self.config.store_timeout,
            "update_reference",
            self.references.update_reference(reference),
        )
        .await
    }

    async fn student(&self, user_id: &str) -> Result<Student> {
        bounded(
            self.config.store_timeout,
            "get_student_by_user_id",
            self.identity.get_student_by_user_id(user_id),
        )
        .await
    }

    /// Lecturer profile for a user; a caller without one is not authorized
    async fn lecturer(&self, user_id: &str) -> Result<Lecturer> {
        bounded(
            self.config.store_timeout,
            "get_lecturer_by_user_id",
            self.identity.get_lecturer_by_user_id(user_id),
        )
        .await
        .map_err(|e| match e {
            LedgerError::NotFound(_) => {
                LedgerError::Unauthorized(format!("user {} is not a lecturer", user_id))
            }
            other => other,
        })
    }

    /// Best-effort dispatch; failures are logged and swallowed
    async fn dispatch(&self, notification: Notification) {
        let user_id = notification.user_id.clone();
        let kind = notification.kind;
        match bounded(
            self.config.store_timeout,
            "notify",
            self.notifier.notify(notification),
        )
        .await
        {
            Ok(()) => debug!(user_id = %user_id, kind = %kind, "Notification sent"),
            Err(e) => warn!(user_id = %user_id, kind = %kind, error = %e, "Notification failed"),
        }
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Create an achievement and its draft reference
    pub async fn create(
        &self,
        student_id: &str,
        input: NewAchievement,
    ) -> Result<(AchievementDoc, ReferenceDoc)> {
        let content = input.validate()?;
        let student = self.student(student_id).await?;
        let timeout = self.config.store_timeout;

        let achievement = bounded(
            timeout,
            "create_achievement",
            self.achievements
                .create_achievement(AchievementDoc::new(student.user_id.clone(), content)),
        )
        .await?;
        let achievement_id = achievement
            .id_hex()
            .ok_or_else(|| LedgerError::StoreUnavailable("store returned no achievement ID".into()))?;

        let draft = ReferenceDoc::draft(student.user_id.clone(), achievement_id.clone());
        match bounded(timeout, "create_reference", self.references.create_reference(draft)).await {
            Ok(reference) => {
                info!(
                    student_id = %student.user_id,
                    achievement_id = %achievement_id,
                    reference_id = %reference.id_hex().unwrap_or_default(),
                    "Achievement created"
                );
                Ok((achievement, reference))
            }
            Err(e) => {
                warn!(achievement_id = %achievement_id, error = %e, "Reference insert failed, removing achievement");
                if let Err(undo) = bounded(
                    timeout,
                    "delete_achievement",
                    self.achievements.delete_achievement(&achievement_id),
                )
                .await
                {
                    error!(
                        student_id = %student.user_id,
                        achievement_id = %achievement_id,
                        error = %undo,
                        "Compensation failed, achievement left without reference"
                    );
                }
                Err(LedgerError::StoreUnavailable(format!(
                    "could not record reference for achievement {}: {}",
                    achievement_id, e
                )))
            }
        }
    }

    /// Replace the content of a draft achievement
    pub async fn update(
        &self,
        student_id: &str,
        achievement_id: &str,
        input: NewAchievement,
    ) -> Result<AchievementDoc> {
        let content = input.validate()?;
        let mut achievement = self.load_achievement(achievement_id).await?;
        if achievement.student_id != student_id {
            return Err(LedgerError::Unauthorized(format!(
                "achievement {} belongs to another student",
                achievement_id
            )));
        }
        if achievement.is_soft_deleted() {
            return Err(LedgerError::InvalidState(format!(
                "achievement {} is deleted",
                achievement_id
            )));
        }

        let reference = self.repair.resolve_for(&achievement).await?;
        if reference.status != AchievementStatus::Draft {
            return Err(LedgerError::InvalidState(format!(
                "only draft achievements can be edited, status is {}",
                reference.status
            )));
        }

        achievement.apply_content(content);
        achievement.metadata.touch();
        self.save_achievement(&achievement).await?;

        info!(student_id = %student_id, achievement_id = %achievement_id, "Achievement updated");
        Ok(achievement)
    }

    /// Submit a draft achievement for verification
    pub async fn submit(&self, student_id: &str, achievement_id: &str) -> Result<ReferenceDoc> {
        let achievement = self.load_achievement(achievement_id).await?;
        if achievement.student_id != student_id {
            return Err(LedgerError::NotFound(format!("achievement {}", achievement_id)));
        }

        let mut reference = self.repair.resolve_for(&achievement).await?;
        if reference.student_id != student_id {
            return Err(LedgerError::NotFound(format!(
                "reference for achievement {}",
                achievement_id
            )));
        }
        if achievement.is_soft_deleted() {
            return Err(LedgerError::InvalidState(format!(
                "achievement {} is deleted",
                achievement_id
            )));
        }

        reference.status = reference.status.transition_to(AchievementStatus::Submitted)?;
        reference.submitted_at = Some(DateTime::now());
        reference.achievement_id = canonical_id(&achievement, achievement_id);
        reference.metadata.touch();
        self.save_reference(&reference).await?;

        info!(
            student_id = %student_id,
            achievement_id = %achievement_id,
            reference_id = %reference.id_hex().unwrap_or_default(),
            "Achievement submitted"
        );

        if let Err(e) = self.notify_advisor(&achievement, &reference).await {
            warn!(
                student_id = %student_id,
                achievement_id = %achievement_id,
                error = %e,
                "Advisor not notified"
            );
        }

        Ok(reference)
    }

    async fn notify_advisor(&self, achievement: &AchievementDoc, reference: &ReferenceDoc) -> Result<()> {
        let student = self.student(&reference.student_id).await?;
        let advisor_id = student
            .advisor_id
            .as_deref()
            .ok_or_else(|| LedgerError::NotFound(format!("advisor for student {}", student.user_id)))?;
        let advisor = bounded(
            self.config.store_timeout,
            "get_lecturer_by_id",
            self.identity.get_lecturer_by_id(advisor_id),
        )
        .await?;

        self.dispatch(Notification {
            user_id: advisor.user_id,
            kind: NotificationKind::AchievementSubmitted,
            title: "New Achievement Submission".to_string(),
            message: format!(
                "Student {} submitted '{}' for verification",
                student.student_number, achievement.title
            ),
            data: json!({
                "achievement_id": reference.achievement_id,
                "reference_id": reference.id_hex(),
                "student_id": reference.student_id,
            }),
        })
        .await;
        Ok(())
    }

    /// Record an advisor's decision on a submitted reference
    ///
    /// `rejection_note` is required (non-blank) for `Rejected` and must be
    /// absent or blank for `Verified`. Input is checked before any store
    /// call, authorization before state.
    pub async fn decide(
        &self,
        lecturer_id: &str,
        reference_id: &str,
        decision: AchievementStatus,
        rejection_note: Option<&str>,
    ) -> Result<ReferenceDoc> {
        let note = rejection_note.filter(|n| !n.trim().is_empty());
        match (decision, note) {
            (AchievementStatus::Verified, None) | (AchievementStatus::Rejected, Some(_)) => {}
            (AchievementStatus::Verified, Some(_)) => {
                return Err(LedgerError::ValidationFailed(
                    "a rejection note is only allowed when rejecting".into(),
                ))
            }
            (AchievementStatus::Rejected, None) => {
                return Err(LedgerError::ValidationFailed(
                    "a rejection note is required".into(),
                ))
            }
            (other, _) => {
                return Err(LedgerError::ValidationFailed(format!(
                    "decision must be verified or rejected, got {}",
                    other
                )))
            }
        }

        let mut reference = bounded(
            self.config.store_timeout,
            "get_reference_by_id",
            self.references.get_reference_by_id(reference_id),
        )
        .await?;

        let student = self.student(&reference.student_id).await?;
        let lecturer = self.lecturer(lecturer_id).await?;
        if !lecturer.advises(&student) {
            return Err(LedgerError::Unauthorized(format!(
                "lecturer {} is not the advisor of student {}",
                lecturer_id, reference.student_id
            )));
        }

        reference.status = reference.status.transition_to(decision)?;
        reference.verified_by = Some(lecturer_id.to_string());
        reference.verified_at = Some(DateTime::now());
        reference.rejection_note = note.map(str::to_string);
        reference.metadata.touch();
        self.save_reference(&reference).await?;

        info!(
            lecturer_id = %lecturer_id,
            reference_id = %reference_id,
            achievement_id = %reference.achievement_id,
            decision = %decision,
            "Achievement decided"
        );

        if decision == AchievementStatus::Rejected {
            self.dispatch(Notification {
                user_id: reference.student_id.clone(),
                kind: NotificationKind::AchievementRejected,
                title: "Achievement Rejected".to_string(),
                message: format!(
                    "Your achievement was rejected: {}",
                    reference.rejection_note.as_deref().unwrap_or_default()
                ),
                data: json!({
                    "achievement_id": reference.achievement_id,
                    "reference_id": reference_id,
                    "rejection_note": reference.rejection_note,
                }),
            })
            .await;
        }

        Ok(reference)
    }

    /// [`decide`](Self::decide) with the decision given as a status string
    pub async fn decide_str(
        &self,
        lecturer_id: &str,
        reference_id: &str,
        decision: &str,
        rejection_note: Option<&str>,
    ) -> Result<ReferenceDoc> {
        let decision: AchievementStatus = decision.parse()?;
        self.decide(lecturer_id, reference_id, decision, rejection_note)
            .await
    }

    pub async fn verify(&self, lecturer_id: &str, reference_id: &str) -> Result<ReferenceDoc> {
        self.decide(lecturer_id, reference_id, AchievementStatus::Verified, None)
            .await
    }

    pub async fn reject(
        &self,
        lecturer_id: &str,
        reference_id: &str,
        rejection_note: &str,
    ) -> Result<ReferenceDoc> {
        self.decide(
            lecturer_id,
            reference_id,
            AchievementStatus::Rejected,
            Some(rejection_note),
        )
        .await
    }

    /// Soft-delete a draft achievement and close its reference
    pub async fn soft_delete(&self, student_id: &str, achievement_id: &str) -> Result<()> {
        let mut achievement = self.load_achievement(achievement_id).await?;
        if achievement.student_id != student_id {
            return Err(LedgerError::Unauthorized(format!(
                "achievement {} belongs to another student",
                achievement_id
            )));
        }
        if achievement.is_soft_deleted() {
            return Err(LedgerError::InvalidState(format!(
                "achievement {} is already deleted",
                achievement_id
            )));
        }

        let mut reference = self.repair.resolve_for(&achievement).await?;
        reference.status = reference.status.transition_to(AchievementStatus::Deleted)?;

        achievement.metadata.mark_deleted(DateTime::now());
        self.save_achievement(&achievement).await?;

        reference.achievement_id = canonical_id(&achievement, achievement_id);
        reference.metadata.touch();
        if let Err(e) = self.save_reference(&reference).await {
            warn!(
                student_id = %student_id,
                achievement_id = %achievement_id,
                reference_id = %reference.id_hex().unwrap_or_default(),
                error = %e,
                "Achievement deleted but reference still draft"
            );
        }

        info!(student_id = %student_id, achievement_id = %achievement_id, "Achievement deleted");
        Ok(())
    }

    // ========================================================================
    // Read paths
    // ========================================================================

    /// A student's live achievements, oldest first
    pub async fn list_student_achievements(&self, student_id: &str) -> Result<Vec<AchievementDoc>> {
        bounded(
            self.config.store_timeout,
            "list_achievements_by_student",
            self.achievements.list_achievements_by_student(student_id, false),
        )
        .await
    }

    /// Fetch one achievement. Soft-deleted ones are visible to the owner only.
    pub async fn get_achievement(&self, viewer_id: &str, achievement_id: &str) -> Result<AchievementDoc> {
        let achievement = self.load_achievement(achievement_id).await?;
        if achievement.is_soft_deleted() && achievement.student_id != viewer_id {
            return Err(LedgerError::NotFound(format!("achievement {}", achievement_id)));
        }
        Ok(achievement)
    }

    pub async fn list_student_references(&self, student_id: &str) -> Result<Vec<ReferenceDoc>> {
        bounded(
            self.config.store_timeout,
            "list_references_by_student",
            self.references.list_references_by_student(student_id),
        )
        .await
    }

    async fn advisees(&self, lecturer: &Lecturer) -> Result<Vec<Student>> {
        bounded(
            self.config.store_timeout,
            "get_students_by_advisor_id",
            self.identity.get_students_by_advisor_id(&lecturer.id),
        )
        .await
    }

    /// Submitted references of the lecturer's advisees
    pub async fn pending_verifications(&self, lecturer_id: &str) -> Result<Vec<ReferenceDoc>> {
        let lecturer = self.lecturer(lecturer_id).await?;
        let advisees: HashSet<String> = self
            .advisees(&lecturer)
            .await?
            .into_iter()
            .map(|s| s.user_id)
            .collect();

        let submitted = bounded(
            self.config.store_timeout,
            "list_references_by_status",
            self.references
                .list_references_by_status(AchievementStatus::Submitted),
        )
        .await?;

        Ok(submitted
            .into_iter()
            .filter(|r| advisees.contains(&r.student_id))
            .collect())
    }

    /// Every advisee achievement that has a resolvable reference
    pub async fn advisee_achievements(&self, lecturer_id: &str) -> Result<Vec<AdviseeAchievement>> {
        let lecturer = self.lecturer(lecturer_id).await?;
        let mut out = Vec::new();

        for student in self.advisees(&lecturer).await? {
            let achievements = self.list_student_achievements(&student.user_id).await?;
            let references = self.list_student_references(&student.user_id).await?;

            let mut claims: HashMap<&str, Vec<&ReferenceDoc>> = HashMap::new();
            for reference in references.iter().filter(|r| r.is_active()) {
                claims
                    .entry(reference.achievement_id.as_str())
                    .or_default()
                    .push(reference);
            }

            for achievement in achievements {
                let Some(id) = achievement.id_hex() else {
                    continue;
                };
                // Duplicate claims resolve the same way repair splits them
                let Some(reference) = claims
                    .get(id.as_str())
                    .and_then(|claimants| keeper(&achievement, claimants))
                    .cloned()
                else {
                    continue;
                };
                out.push(AdviseeAchievement {
                    student: student.clone(),
                    achievement,
                    reference,
                });
            }
        }

        debug!(lecturer_id = %lecturer_id, count = out.len(), "Listed advisee achievements");
        Ok(out)
    }

    /// An advisor's view of one reference and the achievement behind it
    pub async fn verification_detail(
        &self,
        lecturer_id: &str,
        reference_id: &str,
    ) -> Result<VerificationDetail> {
        let reference = bounded(
            self.config.store_timeout,
            "get_reference_by_id",
            self.references.get_reference_by_id(reference_id),
        )
        .await?;

        let student = self.student(&reference.student_id).await?;
        let lecturer = self.lecturer(lecturer_id).await?;
        if !lecturer.advises(&student) {
            return Err(LedgerError::Unauthorized(format!(
                "lecturer {} is not the advisor of student {}",
                lecturer_id, reference.student_id
            )));
        }

        let achievement = self.load_achievement(&reference.achievement_id).await?;
        if achievement.is_soft_deleted() {
            return Err(LedgerError::NotFound(format!(
                "achievement {}",
                reference.achievement_id
            )));
        }

        Ok(VerificationDetail {
            student,
            achievement,
            reference,
        })
    }
}
