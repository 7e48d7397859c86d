//! Identity lookups
//!
//! Users, students, lecturers and advisor relationships live in the
//! relational store and are owned by user management. The ledger only
//! reads them to authorize actions.
//!
//! Note the two kinds of lecturer identifier: `Lecturer::user_id` is the
//! login identity that acts on references, `Lecturer::id` is the profile
//! identifier that `Student::advisor_id` points at.

mod memory;
mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::types::{LedgerError, Result};

pub use memory::MemoryIdentityStore;
pub use sqlite::SqliteIdentityStore;

/// Account role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Lecturer,
    Student,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Lecturer => "lecturer",
            Role::Student => "student",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "lecturer" => Ok(Role::Lecturer),
            "student" => Ok(Role::Student),
            other => Err(LedgerError::ValidationFailed(format!(
                "unknown role '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub full_name: String,
    pub role: Role,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    /// Student profile ID
    pub id: String,
    /// Login identity; achievements and references are keyed by this
    pub user_id: String,
    pub student_number: String,
    pub program_study: String,
    pub academic_year: String,
    /// Lecturer profile ID of the advisor
    pub advisor_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lecturer {
    /// Lecturer profile ID
    pub id: String,
    pub user_id: String,
    pub lecturer_number: String,
    pub department: String,
}

impl Lecturer {
    /// Whether this lecturer is the registered advisor of `student`
    pub fn advises(&self, student: &Student) -> bool {
        student.advisor_id.as_deref() == Some(self.id.as_str())
    }
}

/// Read-only identity lookups. Missing records are `NotFound`.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn get_user_by_id(&self, user_id: &str) -> Result<User>;

    async fn get_student_by_user_id(&self, user_id: &str) -> Result<Student>;

    async fn get_lecturer_by_user_id(&self, user_id: &str) -> Result<Lecturer>;

    async fn get_lecturer_by_id(&self, lecturer_id: &str) -> Result<Lecturer>;

    async fn get_students_by_advisor_id(&self, lecturer_id: &str) -> Result<Vec<Student>>;
}
