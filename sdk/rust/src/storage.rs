//! Where the client keeps checkout state that must survive a reload: the
//! checkout session id (so intent reuse keeps working) and the order draft.

use std::collections::BTreeMap;
use std::sync::Mutex;

pub mod keys {
    pub const SESSION_ID: &str = "rxcheckout:session_id";
    pub const ORDER_DRAFT: &str = "rxcheckout:order_draft";
}

/// Key/value backend used by [`crate::CheckoutClient`].
///
/// Writes are best effort: a backend that cannot persist should keep
/// serving what it has rather than fail the checkout.
pub trait StorageAdapter: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

/// Read a JSON value. Unparseable entries are treated as absent.
pub fn load_json<T: serde::de::DeserializeOwned>(storage: &dyn StorageAdapter, key: &str) -> Option<T> {
    let raw = storage.get(key)?;
    serde_json::from_str(&raw).ok()
}

pub fn store_json<T: serde::Serialize>(storage: &dyn StorageAdapter, key: &str, value: &T) {
    match serde_json::to_string(value) {
        Ok(raw) => storage.set(key, &raw),
        Err(_) => storage.remove(key),
    }
}

type Entries = BTreeMap<String, String>;

/// Process-local storage; state is gone when the client is dropped.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<Entries>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entries<R>(&self, f: impl FnOnce(&mut Entries) -> R) -> Option<R> {
        self.entries.lock().ok().map(|mut guard| f(&mut guard))
    }
}

impl StorageAdapter for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.with_entries(|entries| entries.get(key).cloned()).flatten()
    }

    fn set(&self, key: &str, value: &str) {
        self.with_entries(|entries| entries.insert(key.to_owned(), value.to_owned()));
    }

    fn remove(&self, key: &str) {
        self.with_entries(|entries| entries.remove(key));
    }
}

#[cfg(feature = "native-storage")]
const STATE_FILE: &str = "checkout.json";

/// Storage backed by a single `checkout.json` file.
///
/// Every mutation rewrites the whole file through a sibling temp file and a
/// rename, so a crash mid-write leaves the previous state intact.
#[cfg(feature = "native-storage")]
#[derive(Debug)]
pub struct FileStorage {
    path: std::path::PathBuf,
    entries: Mutex<Entries>,
}

#[cfg(feature = "native-storage")]
impl FileStorage {
    /// Store under the platform data directory for `app_name`.
    pub fn new(app_name: &str) -> Option<Self> {
        let dirs = directories::ProjectDirs::from("", "", app_name)?;
        Self::at_dir(dirs.data_dir())
    }

    pub fn at_dir(dir: &std::path::Path) -> Option<Self> {
        std::fs::create_dir_all(dir).ok()?;
        let path = dir.join(STATE_FILE);
        let entries = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Entries::new(),
            Err(_) => return None,
        };
        Some(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn mutate(&self, f: impl FnOnce(&mut Entries)) {
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        f(&mut entries);
        let Ok(raw) = serde_json::to_vec_pretty(&*entries) else {
            return;
        };
        let tmp = self.path.with_extension("json.tmp");
        if std::fs::write(&tmp, raw).is_ok() {
            let _ = std::fs::rename(&tmp, &self.path);
        }
    }
}

#[cfg(feature = "native-storage")]
impl StorageAdapter for FileStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.mutate(|entries| {
            entries.insert(key.to_owned(), value.to_owned());
        });
    }

    fn remove(&self, key: &str) {
        self.mutate(|entries| {
            entries.remove(key);
        });
    }
}
