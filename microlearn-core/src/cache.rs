use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Display;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use futures_util::future::join_all;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::error::CacheError;
use crate::lesson::{Lesson, LessonId, QuizOutcome};
use crate::records::{
    Collection, ProgressRecord, ProgressSnapshot, QuizResultRecord, Record, UserDataRecord,
    CURRENT_PROGRESS_KEY,
};

pub const DB_NAME: &str = "MicroLearningDB";

#[derive(Debug, Clone)]
enum Backing {
    Disk(PathBuf),
    Memory,
    Unavailable,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableFile {
    #[serde(default)]
    next_id: u64,
    #[serde(default)]
    records: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default)]
struct Table {
    next_id: u64,
    records: BTreeMap<String, Value>,
    // index value -> primary keys
    index: BTreeMap<String, BTreeSet<String>>,
}

fn key_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl Table {
    fn from_file(collection: Collection, file: TableFile) -> Self {
        let mut table = Self {
            next_id: file.next_id,
            ..Self::default()
        };
        for (key, value) in file.records {
            table.insert(collection, key, value);
        }
        table
    }

    fn to_file(&self) -> TableFile {
        TableFile {
            next_id: self.next_id,
            records: self.records.clone(),
        }
    }

    fn insert(&mut self, collection: Collection, key: String, value: Value) {
        self.unindex(collection, &key);
        if let Some(indexed) = collection
            .index_field()
            .and_then(|field| value.get(field))
            .and_then(key_string)
        {
            self.index.entry(indexed).or_default().insert(key.clone());
        }
        self.records.insert(key, value);
    }

    fn remove(&mut self, collection: Collection, key: &str) -> Option<Value> {
        self.unindex(collection, key);
        self.records.remove(key)
    }

    fn unindex(&mut self, collection: Collection, key: &str) {
        let Some(old) = collection
            .index_field()
            .and_then(|field| self.records.get(key)?.get(field))
            .and_then(key_string)
        else {
            return;
        };
        if let Some(keys) = self.index.get_mut(&old) {
            keys.remove(key);
            if keys.is_empty() {
                self.index.remove(&old);
            }
        }
    }

    /// Inserts `value` keyed by the collection's key path, assigning a key
    /// from the counter when the collection auto-increments.
    fn store(
        &mut self,
        collection: Collection,
        mut value: Value,
        overwrite: bool,
    ) -> Result<String, CacheError> {
        let key_path = collection.key_path();
        let missing_key = || CacheError::MissingKey {
            collection: collection.name(),
            key_path,
        };

        let key = match value.get(key_path).and_then(key_string) {
            Some(key) => {
                if let Ok(n) = key.parse::<u64>() {
                    self.next_id = self.next_id.max(n);
                }
                key
            }
            None if collection.auto_increment() => {
                self.next_id += 1;
                let key = self.next_id.to_string();
                value
                    .as_object_mut()
                    .ok_or_else(missing_key)?
                    .insert(key_path.to_owned(), Value::String(key.clone()));
                key
            }
            None => return Err(missing_key()),
        };

        if !overwrite && self.records.contains_key(&key) {
            return Err(CacheError::KeyExists {
                collection: collection.name(),
                key,
            });
        }
        self.insert(collection, key.clone(), value);
        Ok(key)
    }
}

type Tables = HashMap<Collection, Table>;

fn collection_path(dir: &Path, collection: Collection) -> PathBuf {
    dir.join(format!("{}.json", collection.name()))
}

// `Ok(None)` means the collection has never been written. A file that is
// unreadable and has no usable `.json.tmp` sibling is moved aside so the
// records stay recoverable.
async fn load_table(
    dir: &Path,
    collection: Collection,
) -> Result<Option<TableFile>, CacheError> {
    let path = collection_path(dir, collection);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let err = match serde_json::from_slice::<TableFile>(&bytes) {
        Ok(file) => return Ok(Some(file)),
        Err(e) => e,
    };
    warn!(error = %err, path = %path.display(), "failed to parse collection, trying tmp fallback");

    let tmp = path.with_extension("json.tmp");
    if let Ok(tmp_bytes) = tokio::fs::read(&tmp).await {
        if let Ok(file) = serde_json::from_slice::<TableFile>(&tmp_bytes) {
            return Ok(Some(file));
        }
    }

    let preserved = dir.join(format!(
        "{}.json.corrupt-{}",
        collection.name(),
        Utc::now().format("%Y%m%d%H%M%S%3f")
    ));
    tokio::fs::rename(&path, &preserved).await?;
    error!(
        collection = collection.name(),
        preserved = %preserved.display(),
        "collection unreadable, moved aside"
    );
    Err(CacheError::Corrupt {
        collection: collection.name(),
        preserved,
        source: err,
    })
}

async fn persist_table(path: &Path, table: &Table) -> Result<(), CacheError> {
    let bytes = serde_json::to_vec_pretty(&table.to_file())?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Handle to the portal's local database. Clones share the same tables.
#[derive(Debug, Clone)]
pub struct LocalCache {
    backing: Backing,
    tables: Arc<RwLock<Option<Tables>>>,
}

impl LocalCache {
    fn with_backing(backing: Backing) -> Self {
        Self {
            backing,
            tables: Arc::new(RwLock::new(None)),
        }
    }

    pub fn open_dir(dir: impl AsRef<Path>) -> Self {
        Self::with_backing(Backing::Disk(dir.as_ref().to_path_buf()))
    }

    pub fn in_memory() -> Self {
        Self::with_backing(Backing::Memory)
    }

    pub fn unsupported() -> Self {
        Self::with_backing(Backing::Unavailable)
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self.backing, Backing::Unavailable)
    }

    pub fn location(&self) -> Option<&Path> {
        match &self.backing {
            Backing::Disk(dir) => Some(dir),
            _ => None,
        }
    }

    /// Opens the store and creates missing collections. Returns `Ok(false)`
    /// when persistence is unsupported here; opening twice is a no-op.
    pub async fn init(&self) -> Result<bool, CacheError> {
        let mut guard = self.tables.write().await;
        if guard.is_some() {
            return Ok(true);
        }

        let mut tables = Tables::new();
        match &self.backing {
            Backing::Unavailable => {
                warn!("persistent storage unavailable, running without a local cache");
                return Ok(false);
            }
            Backing::Memory => {
                for collection in Collection::ALL {
                    tables.insert(collection, Table::default());
                }
                debug!("in-memory cache opened");
            }
            Backing::Disk(dir) => {
                tokio::fs::create_dir_all(dir).await?;
                for collection in Collection::ALL {
                    let table = match load_table(dir, collection).await? {
                        Some(file) => Table::from_file(collection, file),
                        None => {
                            let table = Table::default();
                            persist_table(&collection_path(dir, collection), &table).await?;
                            debug!(collection = collection.name(), "collection created");
                            table
                        }
                    };
                    tables.insert(collection, table);
                }
                info!(path = %dir.display(), "local cache opened");
            }
        }

        *guard = Some(tables);
        Ok(true)
    }

    async fn ensure_open(&self) -> Result<(), CacheError> {
        if self.tables.read().await.is_some() {
            return Ok(());
        }
        if self.init().await? {
            Ok(())
        } else {
            Err(CacheError::Unsupported)
        }
    }

    async fn read<T>(
        &self,
        collection: Collection,
        f: impl FnOnce(&Table) -> Result<T, CacheError>,
    ) -> Result<T, CacheError> {
        self.ensure_open().await?;
        let guard = self.tables.read().await;
        let tables = guard.as_ref().ok_or(CacheError::Unsupported)?;
        match tables.get(&collection) {
            Some(table) => f(table),
            None => f(&Table::default()),
        }
    }

    // Mutates a copy and only commits it once the collection is on disk.
    async fn write<T>(
        &self,
        collection: Collection,
        f: impl FnOnce(&mut Table) -> Result<T, CacheError>,
    ) -> Result<T, CacheError> {
        self.ensure_open().await?;
        let mut guard = self.tables.write().await;
        let tables = guard.as_mut().ok_or(CacheError::Unsupported)?;
        let table = tables.entry(collection).or_default();

        let mut next = table.clone();
        let out = f(&mut next)?;
        if let Backing::Disk(dir) = &self.backing {
            persist_table(&collection_path(dir, collection), &next).await?;
        }
        *table = next;
        Ok(out)
    }

    /// Inserts a new record; fails with [`CacheError::KeyExists`] when the key
    /// is taken. Returns the record's key.
    pub async fn add<R: Record>(&self, record: &R) -> Result<String, CacheError> {
        let value = serde_json::to_value(record)?;
        self.write(R::COLLECTION, |table| table.store(R::COLLECTION, value, false))
            .await
    }

    pub async fn put<R: Record>(&self, record: &R) -> Result<String, CacheError> {
        let value = serde_json::to_value(record)?;
        self.write(R::COLLECTION, |table| table.store(R::COLLECTION, value, true))
            .await
    }

    pub async fn get<R: Record>(&self, key: impl Display) -> Result<Option<R>, CacheError> {
        let key = key.to_string();
        self.read(R::COLLECTION, |table| {
            table
                .records
                .get(&key)
                .map(|value| serde_json::from_value(value.clone()))
                .transpose()
                .map_err(CacheError::from)
        })
        .await
    }

    pub async fn get_all<R: Record>(&self) -> Result<Vec<R>, CacheError> {
        self.read(R::COLLECTION, |table| {
            table
                .records
                .values()
                .map(|value| serde_json::from_value(value.clone()).map_err(CacheError::from))
                .collect()
        })
        .await
    }

    /// Records whose indexed field equals `value`. Collections without an
    /// index yield nothing.
    pub async fn get_by_index<R: Record>(&self, value: impl Display) -> Result<Vec<R>, CacheError> {
        let value = value.to_string();
        self.read(R::COLLECTION, |table| {
            let Some(keys) = table.index.get(&value) else {
                return Ok(Vec::new());
            };
            keys.iter()
                .filter_map(|key| table.records.get(key))
                .map(|record| serde_json::from_value(record.clone()).map_err(CacheError::from))
                .collect()
        })
        .await
    }

    pub async fn delete<R: Record>(&self, key: impl Display) -> Result<bool, CacheError> {
        let key = key.to_string();
        self.write(R::COLLECTION, |table| {
            Ok(table.remove(R::COLLECTION, &key).is_some())
        })
        .await
    }

    pub async fn clear<R: Record>(&self) -> Result<(), CacheError> {
        self.write(R::COLLECTION, |table| {
            table.records.clear();
            table.index.clear();
            Ok(())
        })
        .await
    }

    /// Upserts every lesson. All writes are issued and awaited; the first
    /// failure (if any) is returned after the rest have completed.
    pub async fn save_lessons(&self, lessons: &[Lesson]) -> Result<usize, CacheError> {
        let results = join_all(lessons.iter().map(|lesson| self.put(lesson))).await;

        let mut saved = 0;
        let mut first_err = None;
        for result in results {
            match result {
                Ok(_) => saved += 1,
                Err(e) => {
                    warn!(error = %e, "failed to cache lesson");
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => {
                debug!(count = saved, "lessons cached");
                Ok(saved)
            }
        }
    }

    pub async fn get_lessons(&self) -> Result<Vec<Lesson>, CacheError> {
        self.get_all::<Lesson>().await
    }

    pub async fn save_progress(&self, snapshot: ProgressSnapshot) -> Result<String, CacheError> {
        self.put(&ProgressRecord::stamp(snapshot)).await
    }

    pub async fn get_progress(&self) -> Result<Vec<ProgressRecord>, CacheError> {
        self.get_all::<ProgressRecord>().await
    }

    pub async fn current_progress(&self) -> Result<Option<ProgressRecord>, CacheError> {
        self.get::<ProgressRecord>(CURRENT_PROGRESS_KEY).await
    }

    pub async fn save_quiz_result(
        &self,
        lesson_id: LessonId,
        result: QuizOutcome,
    ) -> Result<String, CacheError> {
        let record = QuizResultRecord {
            id: None,
            lesson_id,
            result,
            timestamp: chrono::Utc::now(),
        };
        self.add(&record).await
    }

    pub async fn get_quiz_results_by_lesson(
        &self,
        lesson_id: LessonId,
    ) -> Result<Vec<QuizResultRecord>, CacheError> {
        self.get_by_index::<QuizResultRecord>(lesson_id).await
    }

    pub async fn save_user_data<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<(), CacheError> {
        let record = UserDataRecord {
            key: key.to_owned(),
            value: serde_json::to_value(value)?,
            timestamp: chrono::Utc::now(),
        };
        self.put(&record).await.map(|_| ())
    }

    /// The stored value only, without its wrapper record.
    pub async fn get_user_data<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, CacheError> {
        match self.get::<UserDataRecord>(key).await? {
            Some(record) => Ok(Some(serde_json::from_value(record.value)?)),
            None => Ok(None),
        }
    }
}

pub fn default_location() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("microlearn").join(DB_NAME))
}
