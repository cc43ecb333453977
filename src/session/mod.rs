//! In-memory UI session table with timeout eviction.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::debug;

use crate::cds::object::INVALID_OBJECT_ID;
use crate::error::{Error, Result};

pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(30 * 60);
pub const SESSION_TIMEOUT_CHECK_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// Above this many buffered per-session update ids the set collapses to
/// "all" to bound memory.
pub const MAX_UI_UPDATE_IDS: usize = 10;

#[derive(Debug)]
struct Session {
    created: Instant,
    last_access: Instant,
    timeout: Duration,
    logged_in: bool,
    ui_update_ids: HashSet<i64>,
    update_all: bool,
    vars: HashMap<String, String>,
    prefs: HashMap<String, String>,
}

impl Session {
    fn new(timeout: Duration) -> Self {
        let now = Instant::now();
        Self {
            created: now,
            last_access: now,
            timeout,
            logged_in: false,
            ui_update_ids: HashSet::new(),
            update_all: false,
            vars: HashMap::new(),
            prefs: HashMap::new(),
        }
    }

    fn expired(&self, now: Instant) -> bool {
        now.duration_since(self.last_access) > self.timeout
    }

    fn container_changed(&mut self, object_id: i64) {
        if object_id == INVALID_OBJECT_ID || self.update_all {
            return;
        }
        if self.ui_update_ids.len() >= MAX_UI_UPDATE_IDS {
            self.update_all = true;
            self.ui_update_ids.clear();
        } else {
            self.ui_update_ids.insert(object_id);
        }
    }
}

pub struct SessionManager {
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(HashMap::new()),
        })
    }

    /// Spawn the periodic eviction timer.
    pub fn start_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SESSION_TIMEOUT_CHECK_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                manager.evict_expired();
            }
        })
    }

    pub fn create_session(&self, timeout: Duration) -> String {
        let mut sessions = self.sessions.lock().unwrap();
        // uuid gives 128 random bits; loop for the rare collision.
        let session_id = loop {
            let candidate = uuid::Uuid::new_v4().simple().to_string();
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
        };
        sessions.insert(session_id.clone(), Session::new(timeout));
        debug!("created session {}", session_id);
        session_id
    }

    pub fn remove_session(&self, session_id: &str) {
        self.sessions.lock().unwrap().remove(session_id);
    }

    /// Run a closure against a live session, refreshing its access time.
    /// An unknown or expired id yields `SessionExpired`.
    fn with_session<T>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut Session) -> T,
    ) -> Result<T> {
        let mut sessions = self.sessions.lock().unwrap();
        let now = Instant::now();
        match sessions.get_mut(session_id) {
            Some(session) if session.expired(now) => {
                sessions.remove(session_id);
                Err(Error::SessionExpired)
            }
            Some(session) => {
                session.last_access = now;
                Ok(f(session))
            }
            None => Err(Error::SessionExpired),
        }
    }

    pub fn set_logged_in(&self, session_id: &str) -> Result<()> {
        self.with_session(session_id, |s| s.logged_in = true)
    }

    pub fn is_logged_in(&self, session_id: &str) -> Result<bool> {
        self.with_session(session_id, |s| s.logged_in)
    }

    pub fn session_age(&self, session_id: &str) -> Result<Duration> {
        self.with_session(session_id, |s| s.created.elapsed())
    }

    pub fn put_var(&self, session_id: &str, key: &str, value: &str) -> Result<()> {
        self.with_session(session_id, |s| {
            s.vars.insert(key.to_string(), value.to_string());
        })
    }

    pub fn get_var(&self, session_id: &str, key: &str) -> Result<Option<String>> {
        self.with_session(session_id, |s| s.vars.get(key).cloned())
    }

    pub fn put_pref(&self, session_id: &str, key: &str, value: &str) -> Result<()> {
        self.with_session(session_id, |s| {
            s.prefs.insert(key.to_string(), value.to_string());
        })
    }

    pub fn get_pref(&self, session_id: &str, key: &str) -> Result<Option<String>> {
        self.with_session(session_id, |s| s.prefs.get(key).cloned())
    }

    /// Fan a changed container out to every logged-in session.
    pub fn container_changed_ui(&self, object_id: i64) {
        let mut sessions = self.sessions.lock().unwrap();
        for session in sessions.values_mut() {
            if session.logged_in {
                session.container_changed(object_id);
            }
        }
    }

    pub fn containers_changed_ui(&self, object_ids: &[i64]) {
        let mut sessions = self.sessions.lock().unwrap();
        for session in sessions.values_mut() {
            if session.logged_in {
                for id in object_ids {
                    session.container_changed(*id);
                }
            }
        }
    }

    /// Atomically return and clear the pending update ids of a session:
    /// a CSV of ids, the literal "all", or an empty string.
    pub fn get_ui_update_ids(&self, session_id: &str) -> Result<String> {
        self.with_session(session_id, |s| {
            if s.update_all {
                s.update_all = false;
                return "all".to_string();
            }
            let mut ids: Vec<i64> = s.ui_update_ids.drain().collect();
            ids.sort_unstable();
            ids.iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(",")
        })
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    fn evict_expired(&self) {
        let mut sessions = self.sessions.lock().unwrap();
        let now = Instant::now();
        let before = sessions.len();
        sessions.retain(|_, session| !session.expired(now));
        let evicted = before - sessions.len();
        if evicted > 0 {
            debug!("evicted {} expired sessions", evicted);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_ids_returned_once() {
        let manager = SessionManager::new();
        let id = manager.create_session(DEFAULT_SESSION_TIMEOUT);
        manager.set_logged_in(&id).unwrap();

        manager.container_changed_ui(3);
        manager.container_changed_ui(5);
        manager.container_changed_ui(3);

        assert_eq!(manager.get_ui_update_ids(&id).unwrap(), "3,5");
        assert_eq!(manager.get_ui_update_ids(&id).unwrap(), "");
    }

    #[test]
    fn test_update_set_collapses_to_all() {
        let manager = SessionManager::new();
        let id = manager.create_session(DEFAULT_SESSION_TIMEOUT);
        manager.set_logged_in(&id).unwrap();

        for object_id in 0..(MAX_UI_UPDATE_IDS as i64 + 5) {
            manager.container_changed_ui(object_id + 100);
        }
        assert_eq!(manager.get_ui_update_ids(&id).unwrap(), "all");
        assert_eq!(manager.get_ui_update_ids(&id).unwrap(), "");
    }

    #[test]
    fn test_logged_out_sessions_see_nothing() {
        let manager = SessionManager::new();
        let id = manager.create_session(DEFAULT_SESSION_TIMEOUT);
        manager.container_changed_ui(3);
        assert_eq!(manager.get_ui_update_ids(&id).unwrap(), "");
    }

    #[test]
    fn test_expired_session_rejected_on_access() {
        let manager = SessionManager::new();
        let id = manager.create_session(Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert!(matches!(
            manager.get_ui_update_ids(&id),
            Err(Error::SessionExpired)
        ));
        // The failed access also evicted it.
        assert_eq!(manager.session_count(), 0);
    }

    #[test]
    fn test_unknown_session_rejected() {
        let manager = SessionManager::new();
        assert!(matches!(
            manager.set_logged_in("deadbeef"),
            Err(Error::SessionExpired)
        ));
    }
}
