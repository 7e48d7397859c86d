//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use achievement_ledger::db::schemas::NewAchievement;
use achievement_ledger::identity::{Lecturer, MemoryIdentityStore, Student};
use achievement_ledger::notify::{Notification, Notifier};
use achievement_ledger::store::MemoryStore;
use achievement_ledger::{EngineConfig, LedgerError, LifecycleEngine, RepairEngine, Result};

/// Notifier that keeps what it was given, optionally failing every call
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: Notification) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(LedgerError::StoreUnavailable("notifier down".into()));
        }
        self.sent.lock().unwrap().push(notification);
        Ok(())
    }
}

/// A lifecycle engine over in-memory stores with one advisor, one advisee
/// and one unrelated lecturer
pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub identity: Arc<MemoryIdentityStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub engine: LifecycleEngine,
    pub advisor: Lecturer,
    pub other_lecturer: Lecturer,
    pub student: Student,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let identity = Arc::new(MemoryIdentityStore::new());
        let notifier = Arc::new(RecordingNotifier::default());

        let advisor = identity.add_lecturer("Ada Lovelace", "Informatics");
        let other_lecturer = identity.add_lecturer("Alan Turing", "Mathematics");
        let student = identity.add_student("Grace Hopper", Some(&advisor));

        let engine = LifecycleEngine::new(
            identity.clone(),
            store.clone(),
            store.clone(),
            notifier.clone(),
            config,
        );

        Self {
            store,
            identity,
            notifier,
            engine,
            advisor,
            other_lecturer,
            student,
        }
    }

    pub fn repair(&self) -> RepairEngine {
        RepairEngine::new(self.store.clone(), self.store.clone(), EngineConfig::default())
    }

    /// Student user ID, the key achievements and references are stored under
    pub fn sid(&self) -> &str {
        &self.student.user_id
    }

    /// Create an achievement for the fixture student, returning (achievement ID, reference ID)
    pub async fn create(&self, title: &str) -> (String, String) {
        let (achievement, reference) = self
            .engine
            .create(self.sid(), competition(title))
            .await
            .expect("create");
        (achievement.id_hex().unwrap(), reference.id_hex().unwrap())
    }
}

pub fn competition(title: &str) -> NewAchievement {
    let details: Map<String, Value> = json!({
        "competition_name": "ICPC Regional",
        "competition_level": "national",
        "rank": 1,
        "medal": "gold",
        "location": "Jakarta",
    })
    .as_object()
    .cloned()
    .unwrap();

    NewAchievement {
        category: "competition".into(),
        title: title.into(),
        description: "First place in the regional round".into(),
        details,
        tags: vec!["programming".into()],
        ..Default::default()
    }
}

/// Engine config with a short store deadline
pub fn short_timeout() -> EngineConfig {
    EngineConfig {
        store_timeout: Duration::from_millis(50),
        ..EngineConfig::default()
    }
}
