//! Database schemas
//!
//! MongoDB document structures for achievements, references and notifications.

mod achievement;
mod metadata;
mod notification;
mod reference;

pub use achievement::{
    AcademicDetails, AchievementContent, AchievementDetails, AchievementDoc, Attachment, Category,
    CommonDetails, CommunityServiceDetails, CompetitionDetails, CustomField, NewAchievement,
    OrganizationDetails, ResearchDetails, ACHIEVEMENT_COLLECTION,
};
pub use metadata::Metadata;
pub use notification::{NotificationDoc, NOTIFICATION_COLLECTION};
pub use reference::{ReferenceDoc, REFERENCE_COLLECTION};
