//! SQLite identity store against an on-disk database

use achievement_ledger::identity::{IdentityStore, Lecturer, Role, SqliteIdentityStore, Student, User};

fn user(id: &str, role: Role) -> User {
    User {
        id: id.to_string(),
        username: format!("{}.login", id),
        full_name: format!("User {}", id),
        role,
        is_active: true,
    }
}

#[tokio::test]
async fn test_identity_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("identity.db");

    {
        let store = SqliteIdentityStore::open(&path).unwrap();
        store.init_schema().unwrap();
        store.insert_user(&user("u-lecturer", Role::Lecturer)).unwrap();
        store.insert_user(&user("u-student", Role::Student)).unwrap();
        store
            .insert_lecturer(&Lecturer {
                id: "l-1".into(),
                user_id: "u-lecturer".into(),
                lecturer_number: "198001".into(),
                department: "Informatics".into(),
            })
            .unwrap();
        store
            .insert_student(&Student {
                id: "s-1".into(),
                user_id: "u-student".into(),
                student_number: "434231001".into(),
                program_study: "Informatics".into(),
                academic_year: "2023".into(),
                advisor_id: Some("l-1".into()),
            })
            .unwrap();
    }

    let store = SqliteIdentityStore::open(&path).unwrap();
    // Idempotent on an existing database
    store.init_schema().unwrap();

    let lecturer = store.get_lecturer_by_user_id("u-lecturer").await.unwrap();
    let student = store.get_student_by_user_id("u-student").await.unwrap();
    assert!(lecturer.advises(&student));

    let advisees = store.get_students_by_advisor_id(&lecturer.id).await.unwrap();
    assert_eq!(advisees.len(), 1);
    assert_eq!(advisees[0].user_id, "u-student");

    let account = store.get_user_by_id("u-student").await.unwrap();
    assert_eq!(account.role, Role::Student);

    assert!(store
        .get_lecturer_by_id("l-missing")
        .await
        .unwrap_err()
        .is_not_found());
}
