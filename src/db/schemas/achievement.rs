//! Achievement document schema
//!
//! Achievement content lives in the document store. Category-specific
//! fields are a tagged enum; untyped request payloads are mapped into the
//! matching variant by [`AchievementDetails::from_payload`].

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::db::mongo::{IntoIndexes, MutId, MutMetadata};
use crate::db::schemas::Metadata;
use crate::types::{LedgerError, Result};

/// Collection name for achievements
pub const ACHIEVEMENT_COLLECTION: &str = "achievements";

/// Achievement category
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Competition,
    Research,
    CommunityService,
    Academic,
    Organization,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Competition => "competition",
            Category::Research => "research",
            Category::CommunityService => "community_service",
            Category::Academic => "academic",
            Category::Organization => "organization",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "competition" => Ok(Category::Competition),
            "research" => Ok(Category::Research),
            "community_service" => Ok(Category::CommunityService),
            "academic" => Ok(Category::Academic),
            "organization" => Ok(Category::Organization),
            other => Err(LedgerError::ValidationFailed(format!(
                "unknown category '{}'",
                other
            ))),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct CompetitionDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub competition_name: Option<String>,
    /// e.g. international, national, regional, local
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub competition_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medal: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ResearchDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publication_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publication_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publication_journal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issn: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct CommunityServiceDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hours: Option<u32>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct AcademicDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certification_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certification_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<DateTime>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct OrganizationDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_start: Option<DateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_end: Option<DateTime>,
}

/// Category-specific detail fields
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AchievementDetails {
    Competition(CompetitionDetails),
    Research(ResearchDetails),
    CommunityService(CommunityServiceDetails),
    Academic(AcademicDetails),
    Organization(OrganizationDetails),
}

impl AchievementDetails {
    pub fn category(&self) -> Category {
        match self {
            AchievementDetails::Competition(_) => Category::Competition,
            AchievementDetails::Research(_) => Category::Research,
            AchievementDetails::CommunityService(_) => Category::CommunityService,
            AchievementDetails::Academic(_) => Category::Academic,
            AchievementDetails::Organization(_) => Category::Organization,
        }
    }

    /// Map an untyped key/value payload into the variant for `category`.
    ///
    /// Keys belonging to other categories are ignored; keys of this
    /// category must carry the right JSON type.
    pub fn from_payload(category: Category, payload: &Map<String, Value>) -> Result<Self> {
        let p = Payload(payload);
        let details = match category {
            Category::Competition => AchievementDetails::Competition(CompetitionDetails {
                competition_name: p.text("competition_name")?,
                competition_level: p.text("competition_level")?,
                rank: p.count("rank")?,
                medal: p.text("medal")?,
            }),
            Category::Research => AchievementDetails::Research(ResearchDetails {
                publication_type: p.text("publication_type")?,
                publication_title: p.text("publication_title")?,
                publication_journal: p.text("publication_journal")?,
                publisher: p.text("publisher")?,
                issn: p.text("issn")?,
            }),
            Category::CommunityService => {
                AchievementDetails::CommunityService(CommunityServiceDetails {
                    activity_name: p.text("activity_name")?,
                    role: p.text("role")?,
                    hours: p.count("hours")?,
                })
            }
            Category::Academic => AchievementDetails::Academic(AcademicDetails {
                certification_name: p.text("certification_name")?,
                issued_by: p.text("issued_by")?,
                certification_number: p.text("certification_number")?,
                valid_until: p.date("valid_until")?,
            }),
            Category::Organization => {
                let details = OrganizationDetails {
                    organization_name: p.text("organization_name")?,
                    position: p.text("position")?,
                    period_start: p.date("period_start")?,
                    period_end: p.date("period_end")?,
                };
                if let (Some(start), Some(end)) = (details.period_start, details.period_end) {
                    if end < start {
                        return Err(LedgerError::ValidationFailed(
                            "period_end precedes period_start".into(),
                        ));
                    }
                }
                AchievementDetails::Organization(details)
            }
        };
        Ok(details)
    }
}

/// Fields any category may carry
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct CommonDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_date: Option<DateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organizer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<u32>,
}

impl CommonDetails {
    pub fn from_payload(payload: &Map<String, Value>) -> Result<Self> {
        let p = Payload(payload);
        Ok(Self {
            event_date: p.date("event_date")?,
            location: p.text("location")?,
            organizer: p.text("organizer")?,
            score: p.count("score")?,
        })
    }
}

/// Typed reader over an untyped payload
struct Payload<'a>(&'a Map<String, Value>);

impl Payload<'_> {
    fn get(&self, key: &str) -> Option<&Value> {
        match self.0.get(key) {
            None | Some(Value::Null) => None,
            Some(v) => Some(v),
        }
    }

    fn text(&self, key: &str) -> Result<Option<String>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
            Some(_) => Err(LedgerError::ValidationFailed(format!(
                "'{}' must be a string",
                key
            ))),
        }
    }

    fn count(&self, key: &str) -> Result<Option<u32>> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => v
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .map(Some)
                .ok_or_else(|| {
                    LedgerError::ValidationFailed(format!(
                        "'{}' must be a non-negative integer",
                        key
                    ))
                }),
        }
    }

    fn date(&self, key: &str) -> Result<Option<DateTime>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => chrono::DateTime::parse_from_rfc3339(s)
                .map(|dt| Some(DateTime::from_chrono(dt.with_timezone(&chrono::Utc))))
                .map_err(|e| {
                    LedgerError::ValidationFailed(format!(
                        "'{}' must be an RFC 3339 timestamp: {}",
                        key, e
                    ))
                }),
            Some(_) => Err(LedgerError::ValidationFailed(format!(
                "'{}' must be an RFC 3339 timestamp",
                key
            ))),
        }
    }
}

/// Free-form name/value pair attached by the student
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CustomField {
    pub name: String,
    pub value: Value,
}

/// Attachment metadata; the file itself lives in external storage
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Attachment {
    pub file_name: String,
    pub file_url: String,
    pub file_type: String,
    pub file_size: i64,
}

/// Untyped achievement input as it arrives from a request
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct NewAchievement {
    pub category: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub details: Map<String, Value>,
    #[serde(default)]
    pub custom_fields: Vec<CustomField>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Validated achievement content, ready to be written
#[derive(Clone, Debug, PartialEq)]
pub struct AchievementContent {
    pub category: Category,
    pub title: String,
    pub description: String,
    pub details: AchievementDetails,
    pub common: CommonDetails,
    pub custom_fields: Vec<CustomField>,
    pub attachments: Vec<Attachment>,
    pub tags: Vec<String>,
}

impl NewAchievement {
    pub fn validate(self) -> Result<AchievementContent> {
        let title = self.title.trim().to_string();
        if title.is_empty() {
            return Err(LedgerError::ValidationFailed("title is required".into()));
        }
        let description = self.description.trim().to_string();
        if description.is_empty() {
            return Err(LedgerError::ValidationFailed(
                "description is required".into(),
            ));
        }

        let category: Category = self.category.parse()?;
        let details = AchievementDetails::from_payload(category, &self.details)?;
        let common = CommonDetails::from_payload(&self.details)?;

        for field in &self.custom_fields {
            if field.name.trim().is_empty() {
                return Err(LedgerError::ValidationFailed(
                    "custom field name is required".into(),
                ));
            }
        }

        for attachment in &self.attachments {
            if attachment.file_name.trim().is_empty() || attachment.file_url.trim().is_empty() {
                return Err(LedgerError::ValidationFailed(
                    "attachment needs a file name and URL".into(),
                ));
            }
            if attachment.file_size < 0 {
                return Err(LedgerError::ValidationFailed(format!(
                    "attachment '{}' has a negative size",
                    attachment.file_name
                )));
            }
        }

        let mut seen = HashSet::new();
        let tags = self
            .tags
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty() && seen.insert(t.clone()))
            .collect();

        Ok(AchievementContent {
            category,
            title,
            description,
            details,
            common,
            custom_fields: self.custom_fields,
            attachments: self.attachments,
            tags,
        })
    }
}

/// Achievement document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AchievementDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at, soft-delete marker)
    #[serde(default)]
    pub metadata: Metadata,

    /// Owning student's user ID
    pub student_id: String,

    pub category: Category,
    pub title: String,
    pub description: String,
    pub details: AchievementDetails,

    #[serde(default)]
    pub common: CommonDetails,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_fields: Vec<CustomField>,

    #[serde(default)]
    pub attachments: Vec<Attachment>,

    #[serde(default)]
    pub tags: Vec<String>,
}

impl AchievementDoc {
    /// Create a new, not yet stored, achievement document
    pub fn new(student_id: String, content: AchievementContent) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            student_id,
            category: content.category,
            title: content.title,
            description: content.description,
            details: content.details,
            common: content.common,
            custom_fields: content.custom_fields,
            attachments: content.attachments,
            tags: content.tags,
        }
    }

    /// Replace all student-editable fields
    pub fn apply_content(&mut self, content: AchievementContent) {
        self.category = content.category;
        self.title = content.title;
        self.description = content.description;
        self.details = content.details;
        self.common = content.common;
        self.custom_fields = content.custom_fields;
        self.attachments = content.attachments;
        self.tags = content.tags;
    }

    /// Hex form of the document ID, the value references point at
    pub fn id_hex(&self) -> Option<String> {
        self._id.map(|id| id.to_hex())
    }

    pub fn is_soft_deleted(&self) -> bool {
        self.metadata.is_soft_deleted()
    }

    pub fn created_millis(&self) -> i64 {
        self.metadata.created_millis()
    }
}

impl IntoIndexes for AchievementDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Per-student listings ordered by creation time
            (
                doc! { "student_id": 1, "metadata.created_at": 1 },
                Some(
                    IndexOptions::builder()
                        .name("student_created_index".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "category": 1 },
                Some(
                    IndexOptions::builder()
                        .name("category_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for AchievementDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

impl MutId for AchievementDoc {
    fn set_id(&mut self, id: ObjectId) {
        self._id = Some(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn input(category: &str, details: Value) -> NewAchievement {
        NewAchievement {
            category: category.to_string(),
            title: "Contest Win".to_string(),
            description: "First place".to_string(),
            details: payload(details),
            ..Default::default()
        }
    }

    #[test]
    fn test_competition_payload() {
        let details = AchievementDetails::from_payload(
            Category::Competition,
            &payload(json!({
                "competition_name": "ICPC Regional",
                "competition_level": "national",
                "rank": 1,
                "medal": "gold",
                "publisher": "ignored"
            })),
        )
        .unwrap();

        match details {
            AchievementDetails::Competition(c) => {
                assert_eq!(c.competition_name.as_deref(), Some("ICPC Regional"));
                assert_eq!(c.rank, Some(1));
                assert_eq!(c.medal.as_deref(), Some("gold"));
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn test_wrong_type_rejected() {
        let err = AchievementDetails::from_payload(
            Category::Competition,
            &payload(json!({ "rank": "first" })),
        )
        .unwrap_err();
        assert!(matches!(err, LedgerError::ValidationFailed(_)));

        let err = AchievementDetails::from_payload(
            Category::CommunityService,
            &payload(json!({ "hours": -3 })),
        )
        .unwrap_err();
        assert!(matches!(err, LedgerError::ValidationFailed(_)));
    }

    #[test]
    fn test_organization_period_order() {
        let err = AchievementDetails::from_payload(
            Category::Organization,
            &payload(json!({
                "period_start": "2024-06-01T00:00:00Z",
                "period_end": "2024-01-01T00:00:00Z"
            })),
        )
        .unwrap_err();
        assert!(matches!(err, LedgerError::ValidationFailed(_)));

        let ok = AchievementDetails::from_payload(
            Category::Organization,
            &payload(json!({
                "organization_name": "Student Council",
                "period_start": "2024-01-01T00:00:00Z",
                "period_end": "2024-06-01T00:00:00Z"
            })),
        )
        .unwrap();
        assert_eq!(ok.category(), Category::Organization);
    }

    #[test]
    fn test_validate_requires_title_and_description() {
        let mut missing_title = input("competition", json!({}));
        missing_title.title = "   ".into();
        assert!(matches!(
            missing_title.validate(),
            Err(LedgerError::ValidationFailed(_))
        ));

        let mut missing_description = input("competition", json!({}));
        missing_description.description = String::new();
        assert!(matches!(
            missing_description.validate(),
            Err(LedgerError::ValidationFailed(_))
        ));
    }

    #[test]
    fn test_validate_unknown_category() {
        let err = input("certification", json!({})).validate().unwrap_err();
        assert!(matches!(err, LedgerError::ValidationFailed(_)));
    }

    #[test]
    fn test_validate_common_fields_and_tags() {
        let mut new = input(
            "research",
            json!({ "publication_title": "On Graphs", "location": "Jakarta", "score": 90 }),
        );
        new.tags = vec![" ai ".into(), "ai".into(), "".into(), "graphs".into()];

        let content = new.validate().unwrap();
        assert_eq!(content.category, Category::Research);
        assert_eq!(content.common.location.as_deref(), Some("Jakarta"));
        assert_eq!(content.common.score, Some(90));
        assert_eq!(content.tags, vec!["ai".to_string(), "graphs".to_string()]);
    }

    #[test]
    fn test_details_serialize_with_kind_tag() {
        let details = AchievementDetails::CommunityService(CommunityServiceDetails {
            activity_name: Some("Beach cleanup".into()),
            role: None,
            hours: Some(12),
        });
        let json = serde_json::to_value(&details).unwrap();
        assert_eq!(json["kind"], "community_service");
        assert_eq!(json["hours"], 12);

        let back: AchievementDetails = serde_json::from_value(json).unwrap();
        assert_eq!(back, details);
    }
}
