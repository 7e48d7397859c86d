//! In-memory identity store

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

use super::{IdentityStore, Lecturer, Role, Student, User};
use crate::types::{LedgerError, Result};

#[derive(Default)]
struct Tables {
    users: HashMap<String, User>,
    students: HashMap<String, Student>,
    lecturers: HashMap<String, Lecturer>,
}

/// Identity store held in process memory, used for tests and local tooling
#[derive(Default)]
pub struct MemoryIdentityStore {
    tables: RwLock<Tables>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a lecturer account and profile, returning the profile
    pub fn add_lecturer(&self, full_name: &str, department: &str) -> Lecturer {
        let user = self.add_user(full_name, Role::Lecturer);
        let lecturer = Lecturer {
            id: Uuid::new_v4().to_string(),
            user_id: user.id,
            lecturer_number: format!("L-{}", &Uuid::new_v4().simple().to_string()[..8]),
            department: department.to_string(),
        };
        self.write()
            .lecturers
            .insert(lecturer.id.clone(), lecturer.clone());
        lecturer
    }

    /// Register a student account and profile, optionally assigned to an advisor
    pub fn add_student(&self, full_name: &str, advisor: Option<&Lecturer>) -> Student {
        let user = self.add_user(full_name, Role::Student);
        let student = Student {
            id: Uuid::new_v4().to_string(),
            user_id: user.id,
            student_number: format!("S-{}", &Uuid::new_v4().simple().to_string()[..8]),
            program_study: "Informatics".to_string(),
            academic_year: "2024".to_string(),
            advisor_id: advisor.map(|l| l.id.clone()),
        };
        self.write()
            .students
            .insert(student.id.clone(), student.clone());
        student
    }

    fn add_user(&self, full_name: &str, role: Role) -> User {
        let user = User {
            id: Uuid::new_v4().to_string(),
            username: full_name.to_lowercase().replace(' ', "."),
            full_name: full_name.to_string(),
            role,
            is_active: true,
        };
        self.write().users.insert(user.id.clone(), user.clone());
        user
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn get_user_by_id(&self, user_id: &str) -> Result<User> {
        self.read()
            .users
            .get(user_id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("user {}", user_id)))
    }

    async fn get_student_by_user_id(&self, user_id: &str) -> Result<Student> {
        self.read()
            .students
            .values()
            .find(|s| s.user_id == user_id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("student for user {}", user_id)))
    }

    async fn get_lecturer_by_user_id(&self, user_id: &str) -> Result<Lecturer> {
        self.read()
            .lecturers
            .values()
            .find(|l| l.user_id == user_id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("lecturer for user {}", user_id)))
    }

    async fn get_lecturer_by_id(&self, lecturer_id: &str) -> Result<Lecturer> {
        self.read()
            .lecturers
            .get(lecturer_id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("lecturer {}", lecturer_id)))
    }

    async fn get_students_by_advisor_id(&self, lecturer_id: &str) -> Result<Vec<Student>> {
        let mut students: Vec<Student> = self
            .read()
            .students
            .values()
            .filter(|s| s.advisor_id.as_deref() == Some(lecturer_id))
            .cloned()
            .collect();
        students.sort_by(|a, b| a.student_number.cmp(&b.student_number));
        Ok(students)
    }
}
