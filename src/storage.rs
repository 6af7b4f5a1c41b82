use crate::models::{AppData, EntityId};
use std::{
    collections::BTreeMap,
    future::Future,
    io,
    path::PathBuf,
    sync::{Arc, Mutex},
};
use tokio::fs;
use tracing::{debug, error};

pub const STATE_KEY: &str = "club_sync_v4_data";
pub const SELECTED_MEMBER_KEY: &str = "club_sync_selected_member";

/// Opaque persistent key-value storage.
pub trait KeyValueStore: Send + Sync + 'static {
    fn get(&self, key: &str) -> impl Future<Output = io::Result<Option<Vec<u8>>>> + Send;
    fn set(&self, key: &str, value: Vec<u8>) -> impl Future<Output = io::Result<()>> + Send;
}

/// One JSON file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> io::Result<()> {
        fs::create_dir_all(&self.dir).await?;
        fs::write(self.path_for(key), value).await
    }
}

/// In-process store; clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().get(key).cloned()
    }

    pub fn put(&self, key: &str, value: impl Into<Vec<u8>>) {
        self.lock().insert(key.to_string(), value.into());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(self.raw(key))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> io::Result<()> {
        self.put(key, value);
        Ok(())
    }
}

/// Last-known-good state across restarts. Nothing here ever fails the caller.
#[derive(Debug)]
pub struct CacheStore<S> {
    store: S,
}

impl<S: KeyValueStore> CacheStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn load(&self) -> Option<AppData> {
        let bytes = match self.store.get(STATE_KEY).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(err) => {
                error!("failed to read cached state: {err}");
                return None;
            }
        };

        match serde_json::from_slice(&bytes).and_then(AppData::from_value) {
            Ok(data) => Some(data),
            Err(err) => {
                error!("discarding unreadable cached state: {err}");
                None
            }
        }
    }

    pub async fn save(&self, data: &AppData) {
        let payload = match serde_json::to_vec(data) {
            Ok(payload) => payload,
            Err(err) => {
                error!("failed to encode state for cache: {err}");
                return;
            }
        };
        match self.store.set(STATE_KEY, payload).await {
            Ok(()) => debug!("cached state saved"),
            Err(err) => error!("failed to save cached state: {err}"),
        }
    }

    pub async fn load_selected_member(&self) -> Option<EntityId> {
        match self.store.get(SELECTED_MEMBER_KEY).await {
            Ok(Some(bytes)) => serde_json::from_slice(&bytes)
                .map_err(|err| error!("discarding unreadable selected member: {err}"))
                .ok(),
            Ok(None) => None,
            Err(err) => {
                error!("failed to read selected member: {err}");
                None
            }
        }
    }

    pub async fn save_selected_member(&self, member_id: &EntityId) {
        let payload = match serde_json::to_vec(member_id) {
            Ok(payload) => payload,
            Err(err) => {
                error!("failed to encode selected member: {err}");
                return;
            }
        };
        if let Err(err) = self.store.set(SELECTED_MEMBER_KEY, payload).await {
            error!("failed to save selected member: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_cache_loads_as_absent() {
        let cache = CacheStore::new(MemoryStore::new());
        assert!(cache.load().await.is_none());
        assert!(cache.load_selected_member().await.is_none());
    }

    #[tokio::test]
    async fn corrupt_cache_loads_as_absent() {
        let store = MemoryStore::new();
        store.put(STATE_KEY, "{not json");
        let cache = CacheStore::new(store.clone());
        assert!(cache.load().await.is_none());

        store.put(STATE_KEY, r#"{"periods":[{"id":"p-1","name":"x","startdate":"soon","enddate":"later"}]}"#);
        assert!(cache.load().await.is_none());
    }

    #[tokio::test]
    async fn legacy_cache_is_migrated_and_saved_canonically() {
        let store = MemoryStore::new();
        store.put(
            STATE_KEY,
            r#"{"periods":[{"id":"p-1","name":"Spring","startDate":"2024-04-01","endDate":"2024-09-30"}],
                "members":[{"id":"m-1","name":"Aoi","joinMonth":"2024-05","leaveMonth":""}],
                "events":[],"attendance":{}}"#,
        );
        let cache = CacheStore::new(store.clone());
        let data = cache.load().await.expect("cache should load");
        assert_eq!(data.periods[0].start_date.to_string(), "2024-04-01");
        assert_eq!(data.members[0].join_month.unwrap().to_string(), "2024-05");

        cache.save(&data).await;
        let raw = String::from_utf8(store.raw(STATE_KEY).unwrap()).unwrap();
        assert!(raw.contains("\"startdate\""));
        assert!(!raw.contains("startDate"));
        assert!(!raw.contains("joinMonth"));
    }

    #[tokio::test]
    async fn file_store_round_trips_selected_member() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheStore::new(FileStore::new(dir.path().join("nested")));
        cache.save_selected_member(&EntityId::from("m-7")).await;
        assert_eq!(cache.load_selected_member().await, Some(EntityId::from("m-7")));
        assert!(dir.path().join("nested").join(format!("{SELECTED_MEMBER_KEY}.json")).exists());
    }

    #[tokio::test]
    async fn unwritable_store_does_not_fail_save() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"file in the way").unwrap();
        let cache = CacheStore::new(FileStore::new(blocker.join("cache")));
        cache.save(&AppData::default()).await;
        assert!(cache.load().await.is_none());
    }
}
