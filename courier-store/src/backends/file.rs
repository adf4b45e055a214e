use std::{
    io::ErrorKind,
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use courier_common::internal;
use serde::{Serialize, de::DeserializeOwned};
use tokio::fs;

use crate::{
    StoreError, ValidationError,
    record::{AttemptUpdate, DeliveryStatus, QueuedMessage},
    r#trait::{Appended, BackingStore, Selection, StatusBackingStore},
    types::QueueId,
};

const META_EXT: &str = "bin";
const DATA_EXT: &str = "eml";
const STATUS_EXT: &str = "status";
const TMP_PREFIX: &str = ".tmp_";
const DELETED_SUFFIX: &str = ".deleted";

/// Validate a store directory
///
/// Rejects relative paths, `..` components, and system directories.
///
/// # Errors
/// Returns an error if the path is invalid or potentially dangerous
pub fn validate_path(path: &Path) -> Result<(), ValidationError> {
    if path.components().any(|c| c == Component::ParentDir) {
        return Err(ValidationError::InvalidConfiguration(format!(
            "Store path cannot contain '..' components: {}",
            path.display()
        )));
    }

    if !path.is_absolute() {
        return Err(ValidationError::InvalidConfiguration(format!(
            "Store path must be absolute: {}",
            path.display()
        )));
    }

    let sensitive_prefixes = [
        "/etc", "/bin", "/sbin", "/usr/bin", "/usr/sbin", "/boot", "/sys", "/proc", "/dev",
    ];

    if let Some(prefix) = sensitive_prefixes.iter().find(|p| path.starts_with(p)) {
        return Err(ValidationError::InvalidConfiguration(format!(
            "Store path cannot be in system directory {prefix}: {}",
            path.display()
        )));
    }

    Ok(())
}

/// Create the directory if needed and sweep leftovers of interrupted writes
/// and deletes: temporary files, `.deleted` files, and payloads whose
/// metadata never made it into place.
fn prepare_directory(path: &Path) -> crate::Result<()> {
    if !path.try_exists()? {
        internal!("{} does not exist, creating...", path.display());
        std::fs::create_dir_all(path)?;
    } else if !path.is_dir() {
        return Err(ValidationError::NotDirectory(path.display().to_string()).into());
    }

    let mut cleaned = 0;
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }

        let filename = entry.file_name();
        let filename = filename.to_string_lossy();

        let orphaned_payload = QueueId::from_filename(&filename, DATA_EXT)
            .map(|id| path.join(format!("{id}.{META_EXT}")))
            .is_some_and(|meta| !meta.exists());

        if filename.ends_with(DELETED_SUFFIX) || filename.starts_with(TMP_PREFIX) || orphaned_payload {
            std::fs::remove_file(entry.path())?;
            cleaned += 1;
        }
    }

    if cleaned > 0 {
        internal!(
            level = INFO,
            "Cleaned up {cleaned} orphaned files from {}",
            path.display()
        );
    }

    Ok(())
}

fn encode<T: Serialize>(value: &T) -> crate::Result<Vec<u8>> {
    Ok(bincode::serde::encode_to_vec(
        value,
        bincode::config::standard(),
    )?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> crate::Result<T> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
    Ok(value)
}

/// Map a missing file onto `NotFound` for the record it belongs to
fn not_found(id: &QueueId) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |err| {
        if err.kind() == ErrorKind::NotFound {
            StoreError::NotFound(id.clone())
        } else {
            StoreError::Io(err)
        }
    }
}

/// File-based queue table
///
/// Each record is two files named after its [`QueueId`]:
/// - `{id}.bin`: the record metadata, bincode encoded
/// - `{id}.eml`: the raw payload
///
/// The metadata file is what makes a record exist. It is written last on
/// insert and removed first on delete, so a record is never visible without
/// its payload.
///
/// # Atomicity
/// Every write goes to a `.tmp_` file first and is renamed into place, so a
/// crash never leaves a half-written record behind. Deletes rename to a
/// `.deleted` suffix before removing. [`init`](Self::init) sweeps both kinds
/// of leftovers.
#[derive(Debug, Clone)]
pub struct FileBackingStore {
    path: PathBuf,
}

impl FileBackingStore {
    /// # Errors
    /// Returns an error if the path is invalid or potentially dangerous
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, ValidationError> {
        let path = path.into();
        validate_path(&path)?;
        Ok(Self { path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the queue directory if it is missing and clean up after any
    /// interrupted writes or deletes.
    ///
    /// # Errors
    /// - If the directory cannot be created or read
    /// - If the path exists but is not a directory
    pub fn init(&self) -> crate::Result<()> {
        internal!("Initialising queue store at {} ...", self.path.display());
        prepare_directory(&self.path)
    }

    fn file(&self, id: &QueueId, ext: &str) -> PathBuf {
        self.path.join(format!("{id}.{ext}"))
    }

    fn tmp_file(&self, id: &QueueId, ext: &str) -> PathBuf {
        self.path.join(format!("{TMP_PREFIX}{id}.{ext}"))
    }

    async fn read_meta(&self, id: &QueueId) -> crate::Result<QueuedMessage> {
        let bytes = fs::read(self.file(id, META_EXT))
            .await
            .map_err(not_found(id))?;
        decode(&bytes)
    }

    async fn write_meta(&self, record: &QueuedMessage) -> crate::Result<()> {
        let tmp = self.tmp_file(&record.id, META_EXT);
        fs::write(&tmp, encode(record)?).await?;
        fs::rename(&tmp, self.file(&record.id, META_EXT)).await?;
        Ok(())
    }

    async fn read_payload(&self, id: &QueueId) -> crate::Result<Arc<[u8]>> {
        let bytes = fs::read(self.file(id, DATA_EXT))
            .await
            .map_err(not_found(id))?;
        Ok(Arc::from(bytes))
    }

    async fn ids(&self) -> crate::Result<Vec<QueueId>> {
        let mut entries = fs::read_dir(&self.path).await?;
        let mut ids = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let filename = entry.file_name();
            let filename = filename.to_string_lossy();

            if filename.starts_with(TMP_PREFIX) {
                continue;
            }

            if let Some(id) = QueueId::from_filename(&filename, META_EXT) {
                ids.push(id);
            }
        }

        Ok(ids)
    }
}

#[async_trait]
impl BackingStore for FileBackingStore {
    #[tracing::instrument(level = "debug", skip(self, record), fields(id = %record.id))]
    async fn insert(&self, record: &QueuedMessage) -> crate::Result<()> {
        let meta_path = self.file(&record.id, META_EXT);
        if fs::try_exists(&meta_path).await? {
            return Err(StoreError::AlreadyExists(record.id.clone()));
        }

        let data_path = self.file(&record.id, DATA_EXT);
        let tmp_data = self.tmp_file(&record.id, DATA_EXT);
        let tmp_meta = self.tmp_file(&record.id, META_EXT);

        let written = async {
            fs::write(&tmp_data, record.payload.as_ref()).await?;
            fs::write(&tmp_meta, encode(record)?).await?;
            fs::rename(&tmp_data, &data_path).await?;
            // The record exists once its metadata is in place
            fs::rename(&tmp_meta, &meta_path).await?;
            Ok::<_, StoreError>(())
        }
        .await;

        if let Err(err) = written {
            for leftover in [&tmp_data, &tmp_meta, &data_path] {
                if let Err(e) = fs::remove_file(leftover).await
                    && e.kind() != ErrorKind::NotFound
                {
                    tracing::warn!(
                        path = %leftover.display(),
                        error = %e,
                        "Failed to clean up after failed insert"
                    );
                }
            }
            return Err(err);
        }

        internal!(level = DEBUG, "Queued {} to {}", record.id, meta_path.display());

        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self), fields(id = %id))]
    async fn read(&self, id: &QueueId) -> crate::Result<QueuedMessage> {
        let mut record = self.read_meta(id).await?;
        record.payload = self.read_payload(id).await?;
        Ok(record)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn select(&self, selection: &Selection) -> crate::Result<Vec<QueuedMessage>> {
        let mut matching = Vec::new();

        for id in self.ids().await? {
            if selection.exclude.contains(&id) {
                continue;
            }

            // Deleted between the directory scan and now
            let record = match self.read_meta(&id).await {
                Ok(record) => record,
                Err(StoreError::NotFound(_)) => continue,
                Err(err) => return Err(err),
            };

            if selection.criteria.matches(&record) {
                matching.push(record);
            }
        }

        matching.sort_by(Selection::ordering);
        matching.truncate(selection.limit);

        let mut selected = Vec::with_capacity(matching.len());
        for mut record in matching {
            match self.read_payload(&record.id).await {
                Ok(payload) => {
                    record.payload = payload;
                    selected.push(record);
                }
                // Either deleted since the metadata was read, or the payload
                // is lost and the record can never be attempted
                Err(StoreError::NotFound(_)) => {
                    if fs::try_exists(self.file(&record.id, META_EXT)).await? {
                        tracing::warn!(
                            id = %record.id,
                            path = %self.file(&record.id, DATA_EXT).display(),
                            "Queued record has no payload, skipping it"
                        );
                    }
                }
                Err(err) => return Err(err),
            }
        }

        internal!(level = DEBUG, "Selected {} records", selected.len());

        Ok(selected)
    }

    #[tracing::instrument(level = "debug", skip(self, update), fields(id = %id))]
    async fn record_attempt(&self, id: &QueueId, update: &AttemptUpdate) -> crate::Result<()> {
        let mut record = self.read_meta(id).await?;
        record.advance(update)?;
        self.write_meta(&record).await
    }

    #[tracing::instrument(level = "debug", skip(self), fields(id = %id))]
    async fn delete(&self, id: &QueueId) -> crate::Result<()> {
        let meta_path = self.file(id, META_EXT);
        let data_path = self.file(id, DATA_EXT);
        let deleted_meta = self
            .path
            .join(format!("{id}.{META_EXT}{DELETED_SUFFIX}"));
        let deleted_data = self
            .path
            .join(format!("{id}.{DATA_EXT}{DELETED_SUFFIX}"));

        // Metadata first: once it is gone the record no longer exists
        fs::rename(&meta_path, &deleted_meta)
            .await
            .map_err(not_found(id))?;
        fs::rename(&data_path, &deleted_data).await?;

        // Leftovers are swept on the next init
        fs::remove_file(&deleted_meta).await?;
        fs::remove_file(&deleted_data).await?;

        internal!(level = DEBUG, "Deleted {id} from queue");

        Ok(())
    }

    async fn count(&self) -> crate::Result<usize> {
        Ok(self.ids().await?.len())
    }
}

/// File-based status table
///
/// One `{queue_id}.status` file per resolved record. Files are published with
/// a hard link from a temporary file, which fails if the target exists, so
/// appending the same queue id twice keeps the first row and never produces
/// a second one.
#[derive(Debug, Clone)]
pub struct FileStatusStore {
    path: PathBuf,
}

impl FileStatusStore {
    /// # Errors
    /// Returns an error if the path is invalid or potentially dangerous
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, ValidationError> {
        let path = path.into();
        validate_path(&path)?;
        Ok(Self { path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the status directory if it is missing
    ///
    /// # Errors
    /// - If the directory cannot be created or read
    /// - If the path exists but is not a directory
    pub fn init(&self) -> crate::Result<()> {
        internal!("Initialising status store at {} ...", self.path.display());
        prepare_directory(&self.path)
    }

    fn file(&self, id: &QueueId) -> PathBuf {
        self.path.join(format!("{id}.{STATUS_EXT}"))
    }
}

#[async_trait]
impl StatusBackingStore for FileStatusStore {
    #[tracing::instrument(level = "debug", skip(self, status), fields(id = %status.queue_id))]
    async fn append(&self, status: &DeliveryStatus) -> crate::Result<Appended> {
        let target = self.file(&status.queue_id);
        // Unique per call so concurrent appends never share a temp file
        let tmp = self.path.join(format!(
            "{TMP_PREFIX}{}.{}.{STATUS_EXT}",
            status.queue_id,
            ulid::Ulid::new()
        ));

        fs::write(&tmp, encode(status)?).await?;
        let linked = fs::hard_link(&tmp, &target).await;
        fs::remove_file(&tmp).await?;

        match linked {
            Ok(()) => Ok(Appended::Inserted),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                internal!(
                    level = DEBUG,
                    "Status for {} already recorded",
                    status.queue_id
                );
                Ok(Appended::AlreadyRecorded)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn get(&self, queue_id: &QueueId) -> crate::Result<Option<DeliveryStatus>> {
        match fs::read(self.file(queue_id)).await {
            Ok(bytes) => decode(&bytes).map(Some),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn list(&self) -> crate::Result<Vec<DeliveryStatus>> {
        let mut entries = fs::read_dir(&self.path).await?;
        let mut statuses = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let filename = entry.file_name();
            let filename = filename.to_string_lossy();

            if filename.starts_with(TMP_PREFIX) {
                continue;
            }

            if QueueId::from_filename(&filename, STATUS_EXT).is_some() {
                statuses.push(decode::<DeliveryStatus>(&fs::read(entry.path()).await?)?);
            }
        }

        statuses.sort_by(|a, b| {
            a.resolved_at
                .cmp(&b.resolved_at)
                .then_with(|| a.queue_id.cmp(&b.queue_id))
        });

        Ok(statuses)
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use courier_common::Address;

    use super::*;
    use crate::{record::Resolution, r#trait::Criteria};

    fn record(rcpt: &str) -> QueuedMessage {
        QueuedMessage::new(
            "mail",
            "msg-1",
            &Address::new("sender", "example.com"),
            &rcpt.parse().expect("valid address"),
            Arc::from(b"Subject: test\r\n\r\nbody".as_slice()),
        )
    }

    fn store() -> (tempfile::TempDir, FileBackingStore) {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let store = FileBackingStore::new(dir.path().join("queue")).expect("valid path");
        store.init().expect("Failed to init");
        (dir, store)
    }

    #[test]
    fn test_validate_path() {
        assert!(validate_path(Path::new("/var/spool/courier")).is_ok());
        assert!(validate_path(Path::new("relative/queue")).is_err());
        assert!(validate_path(Path::new("/var/spool/../../etc")).is_err());
        assert!(validate_path(Path::new("/etc/courier")).is_err());
        assert!(validate_path(Path::new("/proc/self")).is_err());
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let (_dir, store) = store();
        let record = record("a@example.org");

        store.insert(&record).await.expect("Failed to insert");
        assert!(matches!(
            store.insert(&record).await,
            Err(StoreError::AlreadyExists(_))
        ));

        let read = store.read(&record.id).await.expect("Failed to read");
        assert_eq!(read, record);
        assert_eq!(store.count().await.expect("Failed to count"), 1);

        store.delete(&record.id).await.expect("Failed to delete");
        assert_eq!(store.count().await.expect("Failed to count"), 0);
        assert!(matches!(
            store.read(&record.id).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.delete(&record.id).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_file_store_attempt_keeps_payload() {
        let (_dir, store) = store();
        let record = record("a@example.org");
        store.insert(&record).await.expect("Failed to insert");

        let updated_at = SystemTime::now() - Duration::from_secs(3600);
        store
            .record_attempt(
                &record.id,
                &AttemptUpdate {
                    repeat_count: 1,
                    pending_outcome: "421".to_string(),
                    updated_at,
                },
            )
            .await
            .expect("Failed to update");

        let due = store
            .select(&Selection::new(
                Criteria::DueForRetry {
                    updated_before: SystemTime::now(),
                },
                10,
            ))
            .await
            .expect("Failed to select");
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].repeat_count, 1);
        assert_eq!(due[0].pending_outcome, "421");
        assert_eq!(due[0].payload, record.payload);

        let new = store
            .select(&Selection::new(Criteria::New, 10))
            .await
            .expect("Failed to select");
        assert!(new.is_empty());
    }

    #[tokio::test]
    async fn test_init_sweeps_leftovers() {
        let (dir, store) = store();
        let leftover = dir.path().join("queue").join(".tmp_partial.bin");
        let deleted = dir.path().join("queue").join("01ARZ3NDEKTSV4RRFFQ69G5FAV.bin.deleted");
        std::fs::write(&leftover, b"x").expect("Failed to write");
        std::fs::write(&deleted, b"x").expect("Failed to write");

        store.init().expect("Failed to init");

        assert!(!leftover.exists());
        assert!(!deleted.exists());
    }

    #[tokio::test]
    async fn test_failed_insert_leaves_no_payload_behind() {
        let (dir, store) = store();
        let queue_dir = dir.path().join("queue");
        let record = record("a@example.org");

        // A directory in the way of the metadata temp file fails the write
        let blocker = queue_dir.join(format!("{TMP_PREFIX}{}.{META_EXT}", record.id));
        std::fs::create_dir(&blocker).expect("Failed to create blocker");

        assert!(store.insert(&record).await.is_err());
        assert!(!queue_dir.join(format!("{}.{DATA_EXT}", record.id)).exists());
        assert!(!queue_dir.join(format!("{TMP_PREFIX}{}.{DATA_EXT}", record.id)).exists());

        std::fs::remove_dir(&blocker).expect("Failed to remove blocker");
        store.init().expect("Failed to init");
        assert_eq!(store.count().await.expect("Failed to count"), 0);
        assert_eq!(
            std::fs::read_dir(&queue_dir)
                .expect("Failed to read dir")
                .count(),
            0
        );
    }

    #[tokio::test]
    async fn test_init_sweeps_orphaned_payloads() {
        let (dir, store) = store();
        let queue_dir = dir.path().join("queue");

        let kept = record("a@example.org");
        store.insert(&kept).await.expect("Failed to insert");

        let orphan = queue_dir.join(format!("{}.{DATA_EXT}", QueueId::generate()));
        std::fs::write(&orphan, b"payload").expect("Failed to write");

        store.init().expect("Failed to init");

        assert!(!orphan.exists());
        assert_eq!(store.read(&kept.id).await.expect("Failed to read"), kept);
    }

    #[tokio::test]
    async fn test_select_skips_record_without_payload() {
        let (dir, store) = store();
        let broken = record("a@example.org");
        let intact = record("b@example.org");
        store.insert(&broken).await.expect("Failed to insert");
        store.insert(&intact).await.expect("Failed to insert");

        std::fs::remove_file(
            dir.path()
                .join("queue")
                .join(format!("{}.{DATA_EXT}", broken.id)),
        )
        .expect("Failed to remove payload");

        let selected = store
            .select(&Selection::new(Criteria::New, 10))
            .await
            .expect("Failed to select");
        assert_eq!(selected, vec![intact]);
        assert_eq!(store.count().await.expect("Failed to count"), 2);
    }

    #[tokio::test]
    async fn test_file_status_store_is_append_only() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let statuses = FileStatusStore::new(dir.path().join("status")).expect("valid path");
        statuses.init().expect("Failed to init");

        let mut record = record("a@example.org");
        record.pending_outcome = "250".to_string();
        let status = DeliveryStatus::resolve(&record, Resolution::Delivered, SystemTime::now());

        assert_eq!(
            statuses.append(&status).await.expect("Failed to append"),
            Appended::Inserted
        );

        let mut again = status.clone();
        again.outcome = "550".to_string();
        assert_eq!(
            statuses.append(&again).await.expect("Failed to append"),
            Appended::AlreadyRecorded
        );

        assert_eq!(
            statuses.get(&record.id).await.expect("Failed to get"),
            Some(status)
        );
        assert_eq!(statuses.list().await.expect("Failed to list").len(), 1);
        assert_eq!(
            statuses
                .get(&QueueId::generate())
                .await
                .expect("Failed to get"),
            None
        );
    }
}
