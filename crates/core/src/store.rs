use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tempfile::{NamedTempFile, PersistError};
use tracing::{error, info};

use crate::audit::{AuditSink, ErrorRecord};
use crate::domain::state::{ensure_current_windows, State};
use crate::errors::StoreError;

/// What a read-only look at the state file found.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StateHealth {
    Missing,
    Valid(Box<State>),
    Corrupt(String),
}

/// Crash-safe persistence for [`State`]. Writes go to a temp file in the same
/// directory and are renamed over the target, so readers see either the old
/// or the new snapshot.
#[derive(Clone)]
pub struct StateStore {
    path: PathBuf,
    audit: Option<Arc<dyn AuditSink>>,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), audit: None }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads state with windows advanced to `now`. A missing file yields fresh
    /// state. A corrupt file is moved aside and replaced by fresh state.
    pub fn load(&self, now: DateTime<Utc>) -> Result<State, StoreError> {
        match self.inspect()? {
            StateHealth::Missing => Ok(State::fresh(now)),
            StateHealth::Valid(state) => Ok(ensure_current_windows(*state, now)),
            StateHealth::Corrupt(detail) => {
                self.quarantine(&detail, now);
                Ok(State::fresh(now))
            }
        }
    }

    /// Reads and validates the state file without modifying anything.
    pub fn inspect(&self) -> Result<StateHealth, StoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(source) if source.kind() == io::ErrorKind::NotFound => {
                return Ok(StateHealth::Missing)
            }
            Err(source) => return Err(StoreError::Read { path: self.path.clone(), source }),
        };

        let parsed = serde_json::from_str::<State>(&raw)
            .map_err(|error| format!("unparseable state: {error}"))
            .and_then(|state| state.check_invariants().map(|()| state));
        Ok(match parsed {
            Ok(state) => StateHealth::Valid(Box::new(state)),
            Err(detail) => StateHealth::Corrupt(detail),
        })
    }

    pub fn save(&self, state: &State) -> Result<(), StoreError> {
        self.save_with(state, |temp, target| temp.persist(target).map(drop))
    }

    /// `save` with the final rename supplied by the caller. A failed rename
    /// drops the temp file and leaves the previous snapshot in place.
    fn save_with(
        &self,
        state: &State,
        persist: impl FnOnce(NamedTempFile, &Path) -> Result<(), PersistError>,
    ) -> Result<(), StoreError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)
            .map_err(|source| StoreError::PrepareDir { dir: dir.clone(), source })?;

        let mut payload = serde_json::to_vec_pretty(state).map_err(StoreError::Serialize)?;
        payload.push(b'\n');

        let mut temp = NamedTempFile::new_in(&dir)
            .map_err(|source| StoreError::Write { dir: dir.clone(), source })?;
        temp.write_all(&payload)
            .and_then(|()| temp.as_file().sync_all())
            .map_err(|source| StoreError::Write { dir: dir.clone(), source })?;
        persist(temp, &self.path)
            .map_err(|error| StoreError::Persist { path: self.path.clone(), source: error.error })?;
        Ok(())
    }

    pub fn clear_counters(&self, now: DateTime<Utc>) -> Result<State, StoreError> {
        self.update(now, |state| state.clear_counters(now))
    }

    pub fn clear_dedup(&self, now: DateTime<Utc>) -> Result<State, StoreError> {
        self.update(now, State::clear_dedup)
    }

    pub fn clear_all(&self, now: DateTime<Utc>) -> Result<State, StoreError> {
        self.update(now, |state| state.clear_all(now))
    }

    fn update(
        &self,
        now: DateTime<Utc>,
        mutate: impl FnOnce(&mut State),
    ) -> Result<State, StoreError> {
        let mut state = self.load(now)?;
        mutate(&mut state);
        self.save(&state)?;
        Ok(state)
    }

    fn quarantine(&self, detail: &str, now: DateTime<Utc>) {
        let mut backup = self.path.clone().into_os_string();
        backup.push(format!(".corrupt.{}", now.format("%Y%m%d_%H%M%S")));
        let backup = PathBuf::from(backup);

        match fs::rename(&self.path, &backup) {
            Ok(()) => error!(
                event_name = "state.corrupt",
                path = %self.path.display(),
                backup = %backup.display(),
                detail,
                "state file was corrupt; moved aside and starting fresh"
            ),
            Err(rename_error) => error!(
                event_name = "state.corrupt",
                path = %self.path.display(),
                detail,
                error = %rename_error,
                "state file was corrupt and could not be moved aside; starting fresh"
            ),
        }

        if let Some(audit) = &self.audit {
            audit.record_error(ErrorRecord::new(
                None,
                "state_corrupt",
                format!("{detail}; backup at {}", backup.display()),
                now,
            ));
        }
        info!(event_name = "state.reset", path = %self.path.display(), "state reset to defaults");
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io;
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use tempfile::{PersistError, TempDir};

    use super::{StateHealth, StateStore};
    use crate::audit::InMemoryAuditSink;
    use crate::domain::event::EventId;
    use crate::domain::state::State;
    use crate::errors::StoreError;

    fn now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 14, 10, 20, 30).unwrap()
    }

    #[test]
    fn missing_file_loads_fresh_state() {
        let dir = TempDir::new().expect("tempdir");
        let store = StateStore::new(dir.path().join("agent_state.json"));
        let state = store.load(now()).expect("load");
        assert_eq!(state, State::fresh(now()));
        assert_eq!(store.inspect().expect("inspect"), StateHealth::Missing);
    }

    #[test]
    fn save_then_load_keeps_counters_and_ledger() {
        let dir = TempDir::new().expect("tempdir");
        let store = StateStore::new(dir.path().join("nested").join("agent_state.json"));

        let mut state = State::fresh(now());
        state.calls_today = 4;
        state.spent_usd = Decimal::new(1234, 4);
        state.mark_replied(EventId::new("evt-1"));
        store.save(&state).expect("save");

        let loaded = store.load(now()).expect("load");
        assert_eq!(loaded, state);

        let leftovers: Vec<_> = fs::read_dir(dir.path().join("nested"))
            .expect("dir listing")
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name() != "agent_state.json")
            .collect();
        assert!(leftovers.is_empty(), "temp files must not linger");
    }

    #[test]
    fn failed_rename_keeps_previous_snapshot_and_no_temp_file() {
        let dir = TempDir::new().expect("tempdir");
        let store = StateStore::new(dir.path().join("agent_state.json"));

        let mut earlier = State::fresh(now());
        earlier.calls_today = 3;
        earlier.mark_replied(EventId::new("evt-1"));
        store.save(&earlier).expect("first save");

        let mut later = earlier.clone();
        later.calls_today = 4;
        later.mark_replied(EventId::new("evt-2"));
        let failure = store
            .save_with(&later, |temp, _target| {
                assert!(temp.path().exists(), "payload is staged before the rename");
                Err(PersistError { error: io::Error::other("disk unplugged"), file: temp })
            })
            .expect_err("rename fails");
        assert!(matches!(failure, StoreError::Persist { .. }));

        assert_eq!(store.load(now()).expect("load"), earlier);
        let entries: Vec<_> = fs::read_dir(dir.path())
            .expect("dir listing")
            .filter_map(Result::ok)
            .map(|entry| entry.file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("agent_state.json")]);
    }

    #[test]
    fn loading_yesterdays_state_rolls_the_day() {
        let dir = TempDir::new().expect("tempdir");
        let store = StateStore::new(dir.path().join("agent_state.json"));
        let yesterday = Utc.with_ymd_and_hms(2026, 7, 13, 23, 0, 0).unwrap();

        let mut state = State::fresh(yesterday);
        state.calls_today = 50;
        state.spent_usd = Decimal::new(5, 1);
        state.burst_used_p1 = 2;
        state.mark_replied(EventId::new("evt-old"));
        store.save(&state).expect("save");

        let loaded = store.load(now()).expect("load");
        assert_eq!(loaded.day_key, "2026-07-14");
        assert_eq!(loaded.calls_today, 0);
        assert_eq!(loaded.spent_usd, Decimal::ZERO);
        assert_eq!(loaded.burst_used_p1, 0);
        assert!(loaded.has_replied(&EventId::new("evt-old")));
    }

    #[test]
    fn corrupt_file_is_backed_up_and_reset() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("agent_state.json");
        fs::write(&path, "{ not json").expect("write corrupt state");

        let audit = InMemoryAuditSink::default();
        let store = StateStore::new(&path).with_audit(Arc::new(audit.clone()));
        let state = store.load(now()).expect("corruption is recovered");
        assert_eq!(state, State::fresh(now()));

        let backup = dir.path().join("agent_state.json.corrupt.20260714_102030");
        assert_eq!(fs::read_to_string(backup).expect("backup kept"), "{ not json");
        assert!(!path.exists());

        let errors = audit.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error_kind, "state_corrupt");
    }

    #[test]
    fn negative_spend_counts_as_corruption() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("agent_state.json");
        fs::write(&path, r#"{"day_key":"2026-07-14","spent_usd":-0.5}"#).expect("write state");

        let store = StateStore::new(&path);
        assert!(matches!(store.inspect().expect("inspect"), StateHealth::Corrupt(_)));
        assert_eq!(store.load(now()).expect("load"), State::fresh(now()));
    }

    #[test]
    fn clear_operations_persist() {
        let dir = TempDir::new().expect("tempdir");
        let store = StateStore::new(dir.path().join("agent_state.json"));

        let mut state = State::fresh(now());
        state.calls_today = 9;
        state.mark_replied(EventId::new("evt-1"));
        store.save(&state).expect("save");

        store.clear_counters(now()).expect("clear counters");
        let reloaded = store.load(now()).expect("load");
        assert_eq!(reloaded.calls_today, 0);
        assert!(reloaded.has_replied(&EventId::new("evt-1")));

        store.clear_dedup(now()).expect("clear dedup");
        assert!(store.load(now()).expect("load").replied_event_ids.is_empty());
    }
}
