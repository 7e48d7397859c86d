//! SQLite-backed identity store
//!
//! Queries run on the blocking pool; the connection is shared behind a
//! mutex so the store can be handed out as `Arc<dyn IdentityStore>`.

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use super::{IdentityStore, Lecturer, Role, Student, User};
use crate::types::{LedgerError, Result};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    full_name TEXT NOT NULL,
    role TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1
);
CREATE TABLE IF NOT EXISTS lecturers (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL UNIQUE REFERENCES users(id),
    lecturer_number TEXT NOT NULL,
    department TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS students (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL UNIQUE REFERENCES users(id),
    student_number TEXT NOT NULL,
    program_study TEXT NOT NULL,
    academic_year TEXT NOT NULL,
    advisor_id TEXT REFERENCES lecturers(id)
);
CREATE INDEX IF NOT EXISTS students_advisor_idx ON students(advisor_id);
";

/// Identity store over a SQLite database
#[derive(Clone)]
pub struct SqliteIdentityStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteIdentityStore {
    /// Open (or create) the database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        info!(path = %path.display(), "Identity store opened");
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Create the identity tables if they do not exist
    pub fn init_schema(&self) -> Result<()> {
        self.lock()?.execute_batch(SCHEMA)?;
        Ok(())
    }

    pub fn insert_user(&self, user: &User) -> Result<()> {
        self.lock()?.execute(
            "INSERT INTO users (id, username, full_name, role, is_active) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user.id,
                user.username,
                user.full_name,
                user.role.as_str(),
                user.is_active
            ],
        )?;
        Ok(())
    }

    pub fn insert_lecturer(&self, lecturer: &Lecturer) -> Result<()> {
        self.lock()?.execute(
            "INSERT INTO lecturers (id, user_id, lecturer_number, department) VALUES (?1, ?2, ?3, ?4)",
            params![
                lecturer.id,
                lecturer.user_id,
                lecturer.lecturer_number,
                lecturer.department
            ],
        )?;
        Ok(())
    }

    pub fn insert_student(&self, student: &Student) -> Result<()> {
        self.lock()?.execute(
            "INSERT INTO students (id, user_id, student_number, program_study, academic_year, advisor_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                student.id,
                student.user_id,
                student.student_number,
                student.program_study,
                student.academic_year,
                student.advisor_id
            ],
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| LedgerError::StoreUnavailable("identity connection poisoned".into()))
    }

    /// Run a query on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| LedgerError::StoreUnavailable("identity connection poisoned".into()))?;
            f(&guard)
        })
        .await
        .map_err(|e| LedgerError::StoreUnavailable(format!("identity lookup task failed: {}", e)))?
    }
}

fn student_from_row(row: &Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        id: row.get(0)?,
        user_id: row.get(1)?,
        student_number: row.get(2)?,
        program_study: row.get(3)?,
        academic_year: row.get(4)?,
        advisor_id: row.get(5)?,
    })
}

fn lecturer_from_row(row: &Row<'_>) -> rusqlite::Result<Lecturer> {
    Ok(Lecturer {
        id: row.get(0)?,
        user_id: row.get(1)?,
        lecturer_number: row.get(2)?,
        department: row.get(3)?,
    })
}

const STUDENT_COLUMNS: &str =
    "id, user_id, student_number, program_study, academic_year, advisor_id";
const LECTURER_COLUMNS: &str = "id, user_id, lecturer_number, department";

#[async_trait]
impl IdentityStore for SqliteIdentityStore {
    async fn get_user_by_id(&self, user_id: &str) -> Result<User> {
        let id = user_id.to_string();
        debug!(user_id = %id, "Looking up user");
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT id, username, full_name, role, is_active FROM users WHERE id = ?1",
                    [&id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, bool>(4)?,
                        ))
                    },
                )
                .optional()?;

            let (id, username, full_name, role, is_active) =
                row.ok_or_else(|| LedgerError::NotFound(format!("user {}", id)))?;
            let role: Role = role.parse().map_err(|_| {
                LedgerError::StoreUnavailable(format!("user {} has unknown role '{}'", id, role))
            })?;

            Ok(User {
                id,
                username,
                full_name,
                role,
                is_active,
            })
        })
        .await
    }

    async fn get_student_by_user_id(&self, user_id: &str) -> Result<Student> {
        let id = user_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {} FROM students WHERE user_id = ?1", STUDENT_COLUMNS),
                [&id],
                student_from_row,
            )
            .optional()?
            .ok_or_else(|| LedgerError::NotFound(format!("student for user {}", id)))
        })
        .await
    }

    async fn get_lecturer_by_user_id(&self, user_id: &str) -> Result<Lecturer> {
        let id = user_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {} FROM lecturers WHERE user_id = ?1", LECTURER_COLUMNS),
                [&id],
                lecturer_from_row,
            )
            .optional()?
            .ok_or_else(|| LedgerError::NotFound(format!("lecturer for user {}", id)))
        })
        .await
    }

    async fn get_lecturer_by_id(&self, lecturer_id: &str) -> Result<Lecturer> {
        let id = lecturer_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {} FROM lecturers WHERE id = ?1", LECTURER_COLUMNS),
                [&id],
                lecturer_from_row,
            )
            .optional()?
            .ok_or_else(|| LedgerError::NotFound(format!("lecturer {}", id)))
        })
        .await
    }

    async fn get_students_by_advisor_id(&self, lecturer_id: &str) -> Result<Vec<Student>> {
        let id = lecturer_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {} FROM students WHERE advisor_id = ?1 ORDER BY student_number",
                STUDENT_COLUMNS
            ))?;
            let students = stmt
                .query_map([&id], student_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(students)
        })
        .await
    }
}
