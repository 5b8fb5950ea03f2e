//! Transactional document store
//!
//! Three collections of JSON documents, kept in memory and optionally
//! persisted as one JSONL file per collection under `.habit/`.
//!
//! A persisted store may be opened by several handles or processes at once.
//! Every access to the files happens under an exclusive lock on
//! `.habit/lock`, and each handle reloads the files before it starts a
//! transaction and again before it validates a writing commit. A commit first
//! writes every touched collection to a `.tmp` file, then renames a single
//! `commit.pending` marker into place. That rename is the commit point: the
//! marker is replayed on the next load if the process stops before all files
//! are renamed.
//!
//! Transactions are optimistic. Reads go to the latest committed state and are
//! recorded together with the versions they observed; writes are buffered in
//! the transaction. `commit` takes the store lock, re-validates every recorded
//! read, enforces unique keys and then publishes all writes at once. A
//! transaction dropped without commit leaves no trace, and no lock is held
//! between calls.

use crate::config::Config;
use crate::{Context, Error, Result};
use fs4::fs_std::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

pub const DATA_DIR: &str = ".habit";
pub const CONFIG_FILE: &str = "config.toml";
const LOCK_FILE: &str = "lock";
const PENDING_FILE: &str = "commit.pending";

/// Document collections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Users,
    Habits,
    DailyTracks,
}

impl Collection {
    pub const ALL: [Collection; 3] = [
        Collection::Users,
        Collection::Habits,
        Collection::DailyTracks,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Collection::Users => "users",
            Collection::Habits => "habits",
            Collection::DailyTracks => "daily_tracks",
        }
    }

    fn file_name(&self) -> String {
        format!("{}.jsonl", self.name())
    }

    fn tmp_name(&self) -> String {
        format!("{}.jsonl.tmp", self.name())
    }

    /// Top-level string fields that together must be unique
    pub fn unique_key(&self) -> &'static [&'static str] {
        match self {
            Collection::Users => &["username"],
            Collection::Habits => &["user_id", "name"],
            Collection::DailyTracks => &["user_id", "date"],
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Equality match on top-level string fields
pub type Filter<'a> = &'a [(&'a str, &'a str)];

fn matches(doc: &Value, filter: &[(String, String)]) -> bool {
    filter
        .iter()
        .all(|(field, want)| doc.get(field).and_then(Value::as_str) == Some(want.as_str()))
}

fn key_values(collection: Collection, doc: &Value) -> Option<Vec<&str>> {
    collection
        .unique_key()
        .iter()
        .map(|field| doc.get(*field).and_then(Value::as_str))
        .collect()
}

/// A stored document and its bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Record {
    id: String,
    /// Commit that last wrote this document
    version: u64,
    /// Commit that inserted it; orders query results by creation
    seq: u64,
    doc: Value,
}

type Documents = BTreeMap<String, Record>;

#[derive(Debug, Default)]
struct State {
    collections: HashMap<Collection, Documents>,
    last_commit: u64,
}

impl State {
    fn documents(&self, collection: Collection) -> Option<&Documents> {
        self.collections.get(&collection)
    }

    fn version_of(&self, collection: Collection, id: &str) -> Option<u64> {
        self.documents(collection)
            .and_then(|docs| docs.get(id))
            .map(|r| r.version)
    }

    fn query(&self, collection: Collection, filter: &[(String, String)]) -> Vec<&Record> {
        let mut hits: Vec<&Record> = self
            .documents(collection)
            .map(|docs| docs.values().filter(|r| matches(&r.doc, filter)).collect())
            .unwrap_or_default();
        hits.sort_by_key(|r| r.seq);
        hits
    }
}

struct Inner {
    state: Mutex<State>,
    /// `.habit` directory when persisted
    data_dir: Option<PathBuf>,
}

/// Handle to a document store; cheap to clone and share across threads
#[derive(Clone)]
pub struct DocumentStore {
    inner: Arc<Inner>,
}

impl DocumentStore {
    /// A store that lives only in this process
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                data_dir: None,
            }),
        }
    }

    /// Initialize a new persisted store under `root/.habit`
    pub fn init(root: &Path) -> Result<Self> {
        let data_dir = root.join(DATA_DIR);

        if data_dir.exists() {
            return Err(Error::AlreadyInitialized(data_dir.display().to_string()));
        }

        fs::create_dir_all(&data_dir)?;
        fs::write(data_dir.join(CONFIG_FILE), Config::default_with_comments())?;
        for collection in Collection::ALL {
            fs::write(data_dir.join(collection.file_name()), "")?;
        }

        tracing::info!(path = %data_dir.display(), "initialized document store");
        Ok(Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                data_dir: Some(data_dir),
            }),
        })
    }

    /// Open the store found at or above `start`
    pub fn open_from(start: &Path) -> Result<Self> {
        let root = Self::find_root(start)?;
        let data_dir = root.join(DATA_DIR);
        let state = {
            let _held = DirLock::acquire(&data_dir)?;
            load_state(&data_dir)?
        };
        tracing::debug!(
            path = %data_dir.display(),
            last_commit = state.last_commit,
            "opened document store"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                data_dir: Some(data_dir),
            }),
        })
    }

    /// Open the store for the current directory
    pub fn open() -> Result<Self> {
        Self::open_from(&std::env::current_dir()?)
    }

    /// Find the directory containing `.habit`
    pub fn find_root(start: &Path) -> Result<PathBuf> {
        let mut current = start.to_path_buf();
        loop {
            if current.join(DATA_DIR).is_dir() {
                return Ok(current);
            }
            if !current.pop() {
                return Err(Error::NotInitialized);
            }
        }
    }

    /// Path to the `.habit` directory, if persisted
    pub fn data_dir(&self) -> Option<&Path> {
        self.inner.data_dir.as_deref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.inner
            .state
            .lock()
            .map_err(|_| Error::Unavailable("document store lock poisoned".into()))
    }

    /// Start a transaction bound to `ctx`
    pub fn begin(&self, ctx: &Context) -> Result<Transaction> {
        ctx.check()?;
        if let Some(dir) = self.data_dir() {
            let mut state = self.lock()?;
            let _held = DirLock::acquire(dir)?;
            reload(dir, &mut state)?;
        }
        Ok(Transaction {
            store: self.clone(),
            ctx: ctx.clone(),
            reads: Vec::new(),
            writes: BTreeMap::new(),
            finished: false,
        })
    }

    /// Number of committed documents in a collection
    pub fn count(&self, collection: Collection) -> Result<usize> {
        Ok(self.lock()?.documents(collection).map_or(0, |d| d.len()))
    }

    /// Sequence number of the latest commit
    pub fn last_commit(&self) -> Result<u64> {
        Ok(self.lock()?.last_commit)
    }
}

/// Exclusive lock on `.habit/lock`, released on drop
struct DirLock {
    file: File,
}

impl DirLock {
    fn acquire(dir: &Path) -> Result<Self> {
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(dir.join(LOCK_FILE))
            .and_then(|file| {
                file.lock_exclusive()?;
                Ok(Self { file })
            })
            .map_err(|e| Error::Unavailable(format!("failed to lock {}: {e}", dir.display())))
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(error = %e, "failed to release store lock");
        }
    }
}

/// Collections written by one commit, staged as `.tmp` files
#[derive(Debug, Serialize, Deserialize)]
struct PendingCommit {
    version: u64,
    collections: Vec<Collection>,
}

/// Read every collection file. Caller holds the [`DirLock`].
fn load_state(data_dir: &Path) -> Result<State> {
    apply_pending(data_dir).map_err(|e| {
        tracing::error!(error = %e, "failed to replay pending commit");
        Error::Unavailable(format!("failed to replay pending commit: {e}"))
    })?;

    let mut state = State::default();
    for collection in Collection::ALL {
        let path = data_dir.join(collection.file_name());
        let mut documents = Documents::new();

        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let record: Record = serde_json::from_str(&line)?;
                state.last_commit = state.last_commit.max(record.version);
                documents.insert(record.id.clone(), record);
            }
        }

        state.collections.insert(collection, documents);
    }

    Ok(state)
}

/// Replace `state` with what is on disk. The commit counter never goes back.
fn reload(data_dir: &Path, state: &mut State) -> Result<()> {
    let fresh = load_state(data_dir)?;
    let last_commit = state.last_commit.max(fresh.last_commit);
    *state = fresh;
    state.last_commit = last_commit;
    Ok(())
}

fn write_collection(path: &Path, documents: &Documents) -> io::Result<()> {
    let mut ordered: Vec<&Record> = documents.values().collect();
    ordered.sort_by_key(|r| r.seq);

    let mut writer = BufWriter::new(File::create(path)?);
    for record in ordered {
        serde_json::to_writer(&mut writer, record)?;
        writeln!(writer)?;
    }
    writer.flush()?;
    writer.get_ref().sync_all()
}

fn stage_commit(dir: &Path, pending: &PendingCommit, staged: &BTreeMap<Collection, Documents>) -> io::Result<()> {
    for (collection, documents) in staged {
        write_collection(&dir.join(collection.tmp_name()), documents)?;
    }

    let marker_tmp = dir.join(format!("{PENDING_FILE}.tmp"));
    let mut file = File::create(&marker_tmp)?;
    serde_json::to_writer(&mut file, pending)?;
    file.sync_all()?;
    fs::rename(&marker_tmp, dir.join(PENDING_FILE))
}

/// Move the staged files of a recorded commit into place
fn apply_pending(dir: &Path) -> io::Result<()> {
    let marker = dir.join(PENDING_FILE);
    if !marker.exists() {
        return Ok(());
    }

    let pending: PendingCommit = serde_json::from_reader(BufReader::new(File::open(&marker)?))?;
    for collection in &pending.collections {
        let tmp = dir.join(collection.tmp_name());
        if tmp.is_file() {
            fs::rename(&tmp, dir.join(collection.file_name()))?;
        }
    }
    fs::remove_file(&marker)?;
    tracing::debug!(version = pending.version, "applied pending commit");
    Ok(())
}

/// Write a commit to disk. Nothing is visible on disk unless this returns Ok.
fn persist(dir: &Path, version: u64, staged: &BTreeMap<Collection, Documents>) -> Result<()> {
    let pending = PendingCommit {
        version,
        collections: staged.keys().copied().collect(),
    };

    if let Err(e) = stage_commit(dir, &pending, staged) {
        for collection in &pending.collections {
            let _ = fs::remove_file(dir.join(collection.tmp_name()));
        }
        tracing::error!(version, error = %e, "failed to persist commit");
        return Err(Error::Unavailable(format!("failed to persist commit {version}: {e}")));
    }

    // The marker is durable; a failed rename is finished by the next load
    if let Err(e) = apply_pending(dir) {
        tracing::warn!(version, error = %e, "commit recorded but not yet applied");
    }
    Ok(())
}

#[derive(Debug)]
enum ReadEntry {
    Key {
        collection: Collection,
        id: String,
        version: Option<u64>,
    },
    Query {
        collection: Collection,
        filter: Vec<(String, String)>,
        seen: Vec<(String, u64)>,
    },
}

#[derive(Debug, Clone)]
enum Pending {
    Insert(Value),
    Replace(Value),
    Delete,
}

/// An open transaction. Pass it explicitly to every store call that must be
/// part of the same atomic unit.
pub struct Transaction {
    store: DocumentStore,
    ctx: Context,
    reads: Vec<ReadEntry>,
    writes: BTreeMap<(Collection, String), Pending>,
    finished: bool,
}

impl Transaction {
    fn pending(&self, collection: Collection, id: &str) -> Option<&Pending> {
        self.writes.get(&(collection, id.to_string()))
    }

    fn committed(&mut self, collection: Collection, id: &str) -> Result<Option<Value>> {
        let (version, doc) = {
            let state = self.store.lock()?;
            match state.documents(collection).and_then(|d| d.get(id)) {
                Some(record) => (Some(record.version), Some(record.doc.clone())),
                None => (None, None),
            }
        };
        self.reads.push(ReadEntry::Key {
            collection,
            id: id.to_string(),
            version,
        });
        Ok(doc)
    }

    /// Fetch a document by id
    pub fn get(&mut self, collection: Collection, id: &str) -> Result<Option<Value>> {
        self.ctx.check()?;
        match self.pending(collection, id) {
            Some(Pending::Insert(doc) | Pending::Replace(doc)) => Ok(Some(doc.clone())),
            Some(Pending::Delete) => Ok(None),
            None => self.committed(collection, id),
        }
    }

    /// All documents matching `filter`, oldest first, including this
    /// transaction's own writes
    pub fn find(&mut self, collection: Collection, filter: Filter<'_>) -> Result<Vec<(String, Value)>> {
        self.ctx.check()?;
        let filter: Vec<(String, String)> = filter
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let hits: Vec<(String, u64, Value)> = {
            let state = self.store.lock()?;
            state
                .query(collection, &filter)
                .into_iter()
                .map(|r| (r.id.clone(), r.version, r.doc.clone()))
                .collect()
        };

        self.reads.push(ReadEntry::Query {
            collection,
            filter: filter.clone(),
            seen: hits.iter().map(|(id, v, _)| (id.clone(), *v)).collect(),
        });

        let mut results = Vec::with_capacity(hits.len());
        for (id, _, doc) in hits {
            match self.pending(collection, &id) {
                Some(Pending::Delete) => {}
                Some(Pending::Insert(own) | Pending::Replace(own)) => {
                    if matches(own, &filter) {
                        results.push((id, own.clone()));
                    }
                }
                None => results.push((id, doc)),
            }
        }

        for ((coll, id), pending) in &self.writes {
            if *coll != collection || results.iter().any(|(seen, _)| seen == id) {
                continue;
            }
            if let Pending::Insert(doc) | Pending::Replace(doc) = pending {
                if matches(doc, &filter) {
                    results.push((id.clone(), doc.clone()));
                }
            }
        }

        Ok(results)
    }

    /// First document matching `filter`
    pub fn find_one(&mut self, collection: Collection, filter: Filter<'_>) -> Result<Option<(String, Value)>> {
        Ok(self.find(collection, filter)?.into_iter().next())
    }

    /// Insert a new document; `AlreadyExists` if the id is taken
    pub fn insert(&mut self, collection: Collection, id: &str, doc: Value) -> Result<()> {
        self.ctx.check()?;
        let key = (collection, id.to_string());
        match self.writes.get(&key) {
            Some(Pending::Insert(_) | Pending::Replace(_)) => {
                return Err(Error::AlreadyExists(format!("{collection}/{id}")));
            }
            Some(Pending::Delete) => {
                self.writes.insert(key, Pending::Replace(doc));
                return Ok(());
            }
            None => {}
        }

        if self.committed(collection, id)?.is_some() {
            return Err(Error::AlreadyExists(format!("{collection}/{id}")));
        }
        self.writes.insert(key, Pending::Insert(doc));
        Ok(())
    }

    /// Overwrite an existing document; `NotFound` if it is absent
    pub fn update(&mut self, collection: Collection, id: &str, doc: Value) -> Result<()> {
        self.ctx.check()?;
        let key = (collection, id.to_string());
        match self.writes.get(&key) {
            Some(Pending::Insert(_)) => {
                self.writes.insert(key, Pending::Insert(doc));
                return Ok(());
            }
            Some(Pending::Replace(_)) => {
                self.writes.insert(key, Pending::Replace(doc));
                return Ok(());
            }
            Some(Pending::Delete) => return Err(Error::NotFound(format!("{collection}/{id}"))),
            None => {}
        }

        if self.committed(collection, id)?.is_none() {
            return Err(Error::NotFound(format!("{collection}/{id}")));
        }
        self.writes.insert(key, Pending::Replace(doc));
        Ok(())
    }

    /// Delete a document; `NotFound` if it is absent
    pub fn delete(&mut self, collection: Collection, id: &str) -> Result<()> {
        self.ctx.check()?;
        let key = (collection, id.to_string());
        match self.writes.get(&key) {
            Some(Pending::Insert(_)) => {
                self.writes.remove(&key);
                return Ok(());
            }
            Some(Pending::Replace(_)) => {
                self.writes.insert(key, Pending::Delete);
                return Ok(());
            }
            Some(Pending::Delete) => return Err(Error::NotFound(format!("{collection}/{id}"))),
            None => {}
        }

        if self.committed(collection, id)?.is_none() {
            return Err(Error::NotFound(format!("{collection}/{id}")));
        }
        self.writes.insert(key, Pending::Delete);
        Ok(())
    }

    /// Discard all buffered writes
    pub fn rollback(mut self) {
        self.finished = true;
        tracing::debug!(writes = self.writes.len(), "transaction rolled back");
    }

    /// Validate and publish. Returns the commit sequence number.
    ///
    /// `Conflict` if anything this transaction read has changed since,
    /// `AlreadyExists` if a write would break a unique key.
    pub fn commit(mut self) -> Result<u64> {
        self.finished = true;
        self.ctx.check()?;

        let store = self.store.clone();
        let mut state = store.lock()?;
        let _held = match store.data_dir() {
            Some(dir) if !self.writes.is_empty() => {
                let held = DirLock::acquire(dir)?;
                reload(dir, &mut state)?;
                Some(held)
            }
            _ => None,
        };

        for read in &self.reads {
            match read {
                ReadEntry::Key {
                    collection,
                    id,
                    version,
                } => {
                    if state.version_of(*collection, id) != *version {
                        tracing::debug!(%collection, %id, "read validation failed");
                        return Err(Error::Conflict(format!("{collection}/{id} changed concurrently")));
                    }
                }
                ReadEntry::Query {
                    collection,
                    filter,
                    seen,
                } => {
                    let now: Vec<(String, u64)> = state
                        .query(*collection, filter)
                        .into_iter()
                        .map(|r| (r.id.clone(), r.version))
                        .collect();
                    if now != *seen {
                        tracing::debug!(%collection, ?filter, "query validation failed");
                        return Err(Error::Conflict(format!("{collection} changed concurrently")));
                    }
                }
            }
        }

        if self.writes.is_empty() {
            return Ok(state.last_commit);
        }

        let version = state.last_commit + 1;
        let mut staged: BTreeMap<Collection, Documents> = BTreeMap::new();
        for ((collection, id), pending) in std::mem::take(&mut self.writes) {
            let documents = staged
                .entry(collection)
                .or_insert_with(|| state.documents(collection).cloned().unwrap_or_default());
            match pending {
                Pending::Insert(doc) => {
                    documents.insert(
                        id.clone(),
                        Record {
                            id,
                            version,
                            seq: version,
                            doc,
                        },
                    );
                }
                Pending::Replace(doc) => {
                    let seq = documents.get(&id).map_or(version, |r| r.seq);
                    documents.insert(
                        id.clone(),
                        Record {
                            id,
                            version,
                            seq,
                            doc,
                        },
                    );
                }
                Pending::Delete => {
                    documents.remove(&id);
                }
            }
        }

        for (collection, documents) in &staged {
            check_unique(*collection, documents, version)?;
        }

        if let Some(dir) = store.data_dir() {
            persist(dir, version, &staged)?;
        }

        let touched = staged.len();
        state.collections.extend(staged);
        state.last_commit = version;
        tracing::debug!(version, collections = touched, "transaction committed");
        Ok(version)
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished && !self.writes.is_empty() {
            tracing::debug!(
                writes = self.writes.len(),
                "transaction dropped without commit"
            );
        }
    }
}

/// Documents written by commit `version` must not share a unique key with
/// any other document in the collection.
fn check_unique(collection: Collection, documents: &Documents, version: u64) -> Result<()> {
    let mut seen: HashMap<Vec<&str>, &str> = HashMap::new();
    for record in documents.values() {
        let Some(key) = key_values(collection, &record.doc) else {
            continue;
        };
        if let Some(other) = seen.insert(key.clone(), &record.id) {
            let ours = record.version == version || documents.get(other).is_some_and(|r| r.version == version);
            if ours {
                return Err(Error::AlreadyExists(format!(
                    "{collection} with {} = {}",
                    collection.unique_key().join("+"),
                    key.join("+")
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn ctx() -> Context {
        Context::with_timeout(Duration::from_secs(5))
    }

    #[test]
    fn test_read_your_writes() {
        let store = DocumentStore::in_memory();
        let mut tx = store.begin(&ctx()).unwrap();
        tx.insert(Collection::Habits, "h1", json!({"user_id": "u", "name": "Read"}))
            .unwrap();

        assert!(tx.get(Collection::Habits, "h1").unwrap().is_some());
        let found = tx.find(Collection::Habits, &[("user_id", "u")]).unwrap();
        assert_eq!(found.len(), 1);

        // Not visible outside until commit
        assert_eq!(store.count(Collection::Habits).unwrap(), 0);
        tx.commit().unwrap();
        assert_eq!(store.count(Collection::Habits).unwrap(), 1);
    }

    #[test]
    fn test_drop_discards_writes() {
        let store = DocumentStore::in_memory();
        {
            let mut tx = store.begin(&ctx()).unwrap();
            tx.insert(Collection::Users, "u1", json!({"username": "ada"})).unwrap();
        }
        assert_eq!(store.count(Collection::Users).unwrap(), 0);
    }

    #[test]
    fn test_stale_read_conflicts() {
        let store = DocumentStore::in_memory();
        let mut setup = store.begin(&ctx()).unwrap();
        setup.insert(Collection::Users, "u1", json!({"username": "ada", "points": 0})).unwrap();
        setup.commit().unwrap();

        let mut first = store.begin(&ctx()).unwrap();
        let mut second = store.begin(&ctx()).unwrap();
        first.get(Collection::Users, "u1").unwrap();
        second.get(Collection::Users, "u1").unwrap();
        first.update(Collection::Users, "u1", json!({"username": "ada", "points": 3})).unwrap();
        second.update(Collection::Users, "u1", json!({"username": "ada", "points": 3})).unwrap();

        first.commit().unwrap();
        assert!(matches!(second.commit(), Err(Error::Conflict(_))));
    }

    #[test]
    fn test_phantom_insert_conflicts_with_query() {
        let store = DocumentStore::in_memory();
        let mut reader = store.begin(&ctx()).unwrap();
        assert!(reader
            .find_one(Collection::DailyTracks, &[("user_id", "u"), ("date", "2024-01-01")])
            .unwrap()
            .is_none());

        let mut writer = store.begin(&ctx()).unwrap();
        writer
            .insert(Collection::DailyTracks, "t1", json!({"user_id": "u", "date": "2024-01-01"}))
            .unwrap();
        writer.commit().unwrap();

        reader
            .insert(Collection::DailyTracks, "t2", json!({"user_id": "u", "date": "2024-01-01"}))
            .unwrap();
        assert!(matches!(reader.commit(), Err(Error::Conflict(_))));
        assert_eq!(store.count(Collection::DailyTracks).unwrap(), 1);
    }

    #[test]
    fn test_unique_key_enforced_at_commit() {
        let store = DocumentStore::in_memory();
        let mut tx = store.begin(&ctx()).unwrap();
        tx.insert(Collection::Users, "u1", json!({"username": "ada"})).unwrap();
        tx.commit().unwrap();

        // Blind insert without a prior lookup still hits the unique key
        let mut tx = store.begin(&ctx()).unwrap();
        tx.insert(Collection::Users, "u2", json!({"username": "ada"})).unwrap();
        assert!(matches!(tx.commit(), Err(Error::AlreadyExists(_))));
        assert_eq!(store.count(Collection::Users).unwrap(), 1);
    }

    #[test]
    fn test_delete_then_find() {
        let store = DocumentStore::in_memory();
        let mut tx = store.begin(&ctx()).unwrap();
        tx.insert(Collection::Habits, "h1", json!({"user_id": "u", "name": "A"})).unwrap();
        tx.insert(Collection::Habits, "h2", json!({"user_id": "u", "name": "B"})).unwrap();
        tx.commit().unwrap();

        let mut tx = store.begin(&ctx()).unwrap();
        tx.delete(Collection::Habits, "h1").unwrap();
        let left = tx.find(Collection::Habits, &[("user_id", "u")]).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].0, "h2");
        assert!(matches!(tx.delete(Collection::Habits, "h1"), Err(Error::NotFound(_))));
        assert!(matches!(tx.delete(Collection::Habits, "nope"), Err(Error::NotFound(_))));
        tx.commit().unwrap();
        assert_eq!(store.count(Collection::Habits).unwrap(), 1);
    }

    #[test]
    fn test_find_orders_by_creation() {
        let store = DocumentStore::in_memory();
        for (id, name) in [("z", "first"), ("a", "second"), ("m", "third")] {
            let mut tx = store.begin(&ctx()).unwrap();
            tx.insert(Collection::Habits, id, json!({"user_id": "u", "name": name})).unwrap();
            tx.commit().unwrap();
        }

        let mut tx = store.begin(&ctx()).unwrap();
        let ids: Vec<String> = tx
            .find(Collection::Habits, &[("user_id", "u")])
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, ["z", "a", "m"]);
    }

    #[test]
    fn test_expired_context_blocks_commit() {
        let store = DocumentStore::in_memory();
        let short = Context::with_timeout(Duration::from_millis(20));
        let mut tx = store.begin(&short).unwrap();
        tx.insert(Collection::Users, "u1", json!({"username": "ada"})).unwrap();
        std::thread::sleep(Duration::from_millis(40));
        assert!(matches!(tx.commit(), Err(Error::DeadlineExceeded(_))));
        assert_eq!(store.count(Collection::Users).unwrap(), 0);
    }

    #[test]
    fn test_cancelled_context_blocks_reads() {
        let store = DocumentStore::in_memory();
        let ctx = ctx();
        let mut tx = store.begin(&ctx).unwrap();
        ctx.cancel();
        assert!(matches!(tx.get(Collection::Users, "u1"), Err(Error::Cancelled)));
    }

    #[test]
    fn test_persisted_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = DocumentStore::init(dir.path()).unwrap();
        let mut tx = store.begin(&ctx()).unwrap();
        tx.insert(Collection::Users, "u1", json!({"username": "ada"})).unwrap();
        tx.commit().unwrap();

        let nested = dir.path().join("sub");
        fs::create_dir_all(&nested).unwrap();
        let reopened = DocumentStore::open_from(&nested).unwrap();
        assert_eq!(reopened.count(Collection::Users).unwrap(), 1);
        assert_eq!(reopened.last_commit().unwrap(), 1);

        assert!(matches!(
            DocumentStore::init(dir.path()),
            Err(Error::AlreadyInitialized(_))
        ));
    }

    #[test]
    fn test_rollback_discards_writes() {
        let store = DocumentStore::in_memory();
        let mut tx = store.begin(&ctx()).unwrap();
        tx.insert(Collection::Users, "u1", json!({"username": "ada"})).unwrap();
        tx.rollback();
        assert_eq!(store.count(Collection::Users).unwrap(), 0);
        assert_eq!(store.last_commit().unwrap(), 0);
    }

    #[test]
    fn test_handles_on_same_directory_see_each_other() {
        let dir = tempfile::tempdir().unwrap();
        DocumentStore::init(dir.path()).unwrap();
        let first = DocumentStore::open_from(dir.path()).unwrap();
        let second = DocumentStore::open_from(dir.path()).unwrap();

        let mut tx = first.begin(&ctx()).unwrap();
        tx.insert(Collection::Users, "u1", json!({"username": "ada", "points": 0})).unwrap();
        tx.commit().unwrap();

        // A new transaction on the other handle reads the committed file
        let mut tx = second.begin(&ctx()).unwrap();
        assert!(tx.get(Collection::Users, "u1").unwrap().is_some());
        tx.commit().unwrap();

        // Interleaved writers: the later commit is validated against disk
        let mut a = first.begin(&ctx()).unwrap();
        let mut b = second.begin(&ctx()).unwrap();
        a.get(Collection::Users, "u1").unwrap();
        b.get(Collection::Users, "u1").unwrap();
        a.update(Collection::Users, "u1", json!({"username": "ada", "points": 3})).unwrap();
        b.update(Collection::Users, "u1", json!({"username": "ada", "points": 3})).unwrap();
        a.commit().unwrap();
        assert!(matches!(b.commit(), Err(Error::Conflict(_))));

        // A blind insert from a stale handle still hits the unique key on disk
        let mut c = second.begin(&ctx()).unwrap();
        let mut d = first.begin(&ctx()).unwrap();
        c.insert(Collection::DailyTracks, "t1", json!({"user_id": "u1", "date": "2024-01-01"}))
            .unwrap();
        d.insert(Collection::DailyTracks, "t2", json!({"user_id": "u1", "date": "2024-01-01"}))
            .unwrap();
        c.commit().unwrap();
        assert!(matches!(d.commit(), Err(Error::AlreadyExists(_))));

        let reopened = DocumentStore::open_from(dir.path()).unwrap();
        assert_eq!(reopened.count(Collection::DailyTracks).unwrap(), 1);
        let mut tx = reopened.begin(&ctx()).unwrap();
        let user = tx.get(Collection::Users, "u1").unwrap().unwrap();
        assert_eq!(user["points"], 3);
    }

    #[test]
    fn test_failed_persist_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = DocumentStore::init(dir.path()).unwrap();
        let mut tx = store.begin(&ctx()).unwrap();
        tx.insert(Collection::Users, "u1", json!({"username": "ada", "points": 0})).unwrap();
        tx.insert(Collection::DailyTracks, "t1", json!({"user_id": "u1", "date": "2024-01-01"}))
            .unwrap();
        let before = tx.commit().unwrap();

        // A directory where the staged track file should go makes staging fail
        // after users.jsonl.tmp has been written
        let data_dir = dir.path().join(DATA_DIR);
        fs::create_dir(data_dir.join(Collection::DailyTracks.tmp_name())).unwrap();

        let mut tx = store.begin(&ctx()).unwrap();
        tx.update(Collection::Users, "u1", json!({"username": "ada", "points": 3})).unwrap();
        tx.update(
            Collection::DailyTracks,
            "t1",
            json!({"user_id": "u1", "date": "2024-01-01", "done": true}),
        )
        .unwrap();
        assert!(matches!(tx.commit(), Err(Error::Unavailable(_))));
        assert_eq!(store.last_commit().unwrap(), before);
        assert!(!data_dir.join(Collection::Users.tmp_name()).exists());
        assert!(!data_dir.join(PENDING_FILE).exists());

        let reopened = DocumentStore::open_from(dir.path()).unwrap();
        let mut tx = reopened.begin(&ctx()).unwrap();
        assert_eq!(tx.get(Collection::Users, "u1").unwrap().unwrap()["points"], 0);
        assert!(tx.get(Collection::DailyTracks, "t1").unwrap().unwrap().get("done").is_none());
    }

    #[test]
    fn test_recorded_commit_is_replayed_on_open() {
        let dir = tempfile::tempdir().unwrap();
        DocumentStore::init(dir.path()).unwrap();
        let data_dir = dir.path().join(DATA_DIR);

        // Staged files and marker present, renames never happened
        let mut users = Documents::new();
        users.insert(
            "u1".into(),
            Record {
                id: "u1".into(),
                version: 1,
                seq: 1,
                doc: json!({"username": "ada"}),
            },
        );
        let pending = PendingCommit {
            version: 1,
            collections: vec![Collection::Users],
        };
        stage_commit(&data_dir, &pending, &BTreeMap::from([(Collection::Users, users)])).unwrap();

        let store = DocumentStore::open_from(dir.path()).unwrap();
        assert_eq!(store.count(Collection::Users).unwrap(), 1);
        assert_eq!(store.last_commit().unwrap(), 1);
        assert!(!data_dir.join(PENDING_FILE).exists());
    }

    #[test]
    fn test_open_without_init() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            DocumentStore::open_from(dir.path()),
            Err(Error::NotInitialized)
        ));
    }
}
