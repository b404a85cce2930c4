//! Record store contract and the two bundled implementations.
//!
//! The engine reads broadcasters and events and appends media assets to
//! events; everything else about these records belongs to the application.
//! `JsonStore` persists one pretty-printed JSON file per record under a state
//! directory; `MemoryStore` keeps everything in process.

use crate::model::{Broadcaster, Event, MediaAsset};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use thiserror::Error;
use tracing::warn;

/// Errors raised by record stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: u64 },

    #[error("Store IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid record: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Store lock poisoned")]
    Poisoned,
}

pub trait BroadcasterStore: Send + Sync {
    fn broadcaster(&self, id: u64) -> Result<Option<Broadcaster>, StoreError>;
}

pub trait EventStore: Send + Sync {
    fn event(&self, id: u64) -> Result<Option<Event>, StoreError>;

    /// Events dated `date`, ordered by start time then id.
    fn events_on(&self, date: NaiveDate) -> Result<Vec<Event>, StoreError>;

    /// Append an asset to an event and return the event's full asset list.
    fn append_asset(&self, event_id: u64, asset: MediaAsset)
        -> Result<Vec<MediaAsset>, StoreError>;

    /// Events of `now`'s day that ended in `[now - grace, now)`.
    fn events_ended_within(
        &self,
        now: NaiveDateTime,
        grace: Duration,
    ) -> Result<Vec<Event>, StoreError> {
        Ok(self
            .events_on(now.date())?
            .into_iter()
            .filter(|e| e.ended_within(now, grace))
            .collect())
    }

    /// Auto-start events whose window contains `now`.
    fn auto_start_events_at(&self, now: NaiveDateTime) -> Result<Vec<Event>, StoreError> {
        Ok(self
            .events_on(now.date())?
            .into_iter()
            .filter(|e| e.is_auto_start && e.is_current(now))
            .collect())
    }
}

/// Everything the engine needs from persistence.
pub trait Catalog: BroadcasterStore + EventStore {}

impl<T: BroadcasterStore + EventStore> Catalog for T {}

fn sort_events(events: &mut [Event]) {
    events.sort_by(|a, b| (a.start_time, a.id).cmp(&(b.start_time, b.id)));
}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    broadcasters: RwLock<BTreeMap<u64, Broadcaster>>,
    events: RwLock<BTreeMap<u64, Event>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_broadcaster(&self, broadcaster: Broadcaster) -> Result<(), StoreError> {
        let mut map = self.broadcasters.write().map_err(|_| StoreError::Poisoned)?;
        map.insert(broadcaster.id, broadcaster);
        Ok(())
    }

    pub fn put_event(&self, event: Event) -> Result<(), StoreError> {
        let mut map = self.events.write().map_err(|_| StoreError::Poisoned)?;
        map.insert(event.id, event);
        Ok(())
    }
}

impl BroadcasterStore for MemoryStore {
    fn broadcaster(&self, id: u64) -> Result<Option<Broadcaster>, StoreError> {
        let map = self.broadcasters.read().map_err(|_| StoreError::Poisoned)?;
        Ok(map.get(&id).cloned())
    }
}

impl EventStore for MemoryStore {
    fn event(&self, id: u64) -> Result<Option<Event>, StoreError> {
        let map = self.events.read().map_err(|_| StoreError::Poisoned)?;
        Ok(map.get(&id).cloned())
    }

    fn events_on(&self, date: NaiveDate) -> Result<Vec<Event>, StoreError> {
        let map = self.events.read().map_err(|_| StoreError::Poisoned)?;
        let mut events: Vec<Event> = map
            .values()
            .filter(|e| e.start_date == date)
            .cloned()
            .collect();
        sort_events(&mut events);
        Ok(events)
    }

    fn append_asset(
        &self,
        event_id: u64,
        asset: MediaAsset,
    ) -> Result<Vec<MediaAsset>, StoreError> {
        let mut map = self.events.write().map_err(|_| StoreError::Poisoned)?;
        let event = map.get_mut(&event_id).ok_or(StoreError::NotFound {
            kind: "event",
            id: event_id,
        })?;
        event.assets.push(asset);
        Ok(event.assets.clone())
    }
}

/// Store keeping one JSON file per record.
///
/// Layout: `<state_dir>/broadcasters/<id>.json` and `<state_dir>/events/<id>.json`.
/// Records are re-read on every call so edits made by other processes are
/// always visible.
#[derive(Debug, Clone)]
pub struct JsonStore {
    state_dir: PathBuf,
}

impl JsonStore {
    pub fn new<P: Into<PathBuf>>(state_dir: P) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    fn broadcasters_dir(&self) -> PathBuf {
        self.state_dir.join("broadcasters")
    }

    fn events_dir(&self) -> PathBuf {
        self.state_dir.join("events")
    }

    pub fn put_broadcaster(&self, broadcaster: &Broadcaster) -> Result<(), StoreError> {
        save_record(&self.broadcasters_dir(), broadcaster.id, broadcaster)
    }

    pub fn put_event(&self, event: &Event) -> Result<(), StoreError> {
        save_record(&self.events_dir(), event.id, event)
    }
}

/// Write `<dir>/<id>.json` through a temp file so readers never see a partial record.
fn save_record<T: Serialize>(dir: &Path, id: u64, record: &T) -> Result<(), StoreError> {
    fs::create_dir_all(dir)?;

    let file_path = dir.join(format!("{}.json", id));
    let tmp_path = dir.join(format!(".{}.json.tmp", id));
    let json = serde_json::to_string_pretty(record)?;

    fs::write(&tmp_path, json)?;
    fs::rename(&tmp_path, &file_path)?;
    Ok(())
}

fn load_record<T: DeserializeOwned>(dir: &Path, id: u64) -> Result<Option<T>, StoreError> {
    let path = dir.join(format!("{}.json", id));
    match fs::read_to_string(&path) {
        Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Load every `.json` record in `dir`, skipping files that fail to parse.
fn load_records<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>, StoreError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut records = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }

        let parsed = fs::read_to_string(&path)
            .map_err(StoreError::from)
            .and_then(|content| serde_json::from_str(&content).map_err(StoreError::from));
        match parsed {
            Ok(record) => records.push(record),
            Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable record"),
        }
    }

    Ok(records)
}

impl BroadcasterStore for JsonStore {
    fn broadcaster(&self, id: u64) -> Result<Option<Broadcaster>, StoreError> {
        load_record(&self.broadcasters_dir(), id)
    }
}

impl EventStore for JsonStore {
    fn event(&self, id: u64) -> Result<Option<Event>, StoreError> {
        load_record(&self.events_dir(), id)
    }

    fn events_on(&self, date: NaiveDate) -> Result<Vec<Event>, StoreError> {
        let mut events: Vec<Event> = load_records::<Event>(&self.events_dir())?
            .into_iter()
            .filter(|e| e.start_date == date)
            .collect();
        sort_events(&mut events);
        Ok(events)
    }

    fn append_asset(
        &self,
        event_id: u64,
        asset: MediaAsset,
    ) -> Result<Vec<MediaAsset>, StoreError> {
        let mut event: Event = load_record(&self.events_dir(), event_id)?.ok_or(
            StoreError::NotFound {
                kind: "event",
                id: event_id,
            },
        )?;
        event.assets.push(asset);
        self.put_event(&event)?;
        Ok(event.assets)
    }
}
