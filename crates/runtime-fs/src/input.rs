//! File-system backed input device: reads messages out of a directory of files.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};

use rand::seq::SliceRandom;
use runtime_core::{
    device_header_keys, AtomicTransactionState, DeviceHeaders, InputDevice, InputDeviceError,
    InputDeviceManager, Message, MessageBundle, NullTransaction, ReadResult, Transaction, TransactionState,
};

use crate::atomic::atomic_move;
use crate::error::FsDeviceError;
use crate::journal::{scan_and_rollback_stale, TransactionJournal};
use crate::manager::FsLayout;
use crate::serializer::{FileSystemSerializer, ZipFileSystemSerializer};

const MIN_BATCH_SIZE: usize = 8;
const MAX_BATCH_SIZE: usize = 300;
const SLEEP_BETWEEN_BATCHES: Duration = Duration::from_secs(1);
const DEFAULT_MAX_POISON_COUNT: u32 = 3;

const STAT_HEADER: &str = "__STAT__";

fn to_io(device: &str, e: FsDeviceError) -> InputDeviceError {
    InputDeviceError::ReadFailed {
        device: device.to_owned(),
        source: Box::new(e),
    }
}

struct FsManagerInner {
    layout: FsLayout,
    serializer: Arc<dyn FileSystemSerializer>,
    journal: TransactionJournal,
    poison_counts: Mutex<std::collections::HashMap<PathBuf, u32>>,
    max_poison_count: u32,
}

impl FsManagerInner {
    fn lock_path_for(&self, dest: &Path) -> PathBuf {
        let filename = dest.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        self.layout.tmp.join(format!("{filename}.lockfile"))
    }

    /// Moves `tmp_path` back to where it came from, counting this as a
    /// poison hit; after [`Self::max_poison_count`] consecutive failures
    /// to commit the same original path, the file is quarantined under a
    /// `POISON` sibling directory instead of being retried forever.
    fn rollback_entry(&self, tmp_path: &str, org_path: &str) {
        let org_path = PathBuf::from(org_path);
        let tmp_path = PathBuf::from(tmp_path);

        let mut counts = self.poison_counts.lock().expect("poison counts lock poisoned");
        let count = counts.entry(org_path.clone()).or_insert(0);
        *count += 1;

        let dest = if *count >= self.max_poison_count {
            counts.remove(&org_path);
            poison_path(&org_path)
        } else {
            org_path.clone()
        };
        drop(counts);

        if let Some(parent) = dest.parent() {
            let _ = fs::create_dir_all(parent);
        }
        let lock = self.lock_path_for(&dest);
        match atomic_move(&tmp_path, &dest, &lock) {
            Ok(true) => {}
            Ok(false) => tracing::warn!(tmp = %tmp_path.display(), dest = %dest.display(), "rollback move was skipped (lock held or source gone)"),
            Err(e) => tracing::error!(error = %e, tmp = %tmp_path.display(), dest = %dest.display(), "failed to roll back file"),
        }
    }
}

fn poison_path(org_path: &Path) -> PathBuf {
    let basename = org_path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let poison_dir = org_path.parent().unwrap_or(Path::new(".")).join("POISON");
    poison_dir.join(format!("{}-{basename}", uuid::Uuid::new_v4().simple()))
}

/// Manages `FileSystemInputDevice`s rooted at a shared [`FsLayout`].
/// Owns the background thread that periodically flushes the transaction
/// journal and rolls back abandoned ones left by other instances.
pub struct FileSystemInputDeviceManager {
    inner: Arc<FsManagerInner>,
    fifo: bool,
    min_file_age: Duration,
    refresh_interval: Duration,
    should_stop: Arc<AtomicBool>,
    journal_thread: Option<JoinHandle<()>>,
}

impl FileSystemInputDeviceManager {
    pub fn new(root_folder: impl Into<PathBuf>) -> Self {
        Self::with_options(root_folder, Options::default())
    }

    pub fn with_options(root_folder: impl Into<PathBuf>, options: Options) -> Self {
        let layout = FsLayout::new(root_folder);
        let journal_path = layout.bookkeeping.join(format!("{}.transactionlog", layout.manager_id));
        let journal = TransactionJournal::load(&journal_path).unwrap_or_else(|e| {
            tracing::error!(error = %e, "could not load transaction journal, starting empty");
            TransactionJournal::load(std::env::temp_dir().join(format!("{}.transactionlog", uuid::Uuid::new_v4())))
                .expect("a fresh journal path is always loadable")
        });

        FileSystemInputDeviceManager {
            inner: Arc::new(FsManagerInner {
                layout,
                serializer: options.serializer,
                journal,
                poison_counts: Mutex::new(std::collections::HashMap::new()),
                max_poison_count: options.max_poison_count,
            }),
            fifo: options.fifo,
            min_file_age: options.min_file_age,
            refresh_interval: options.transaction_log_save_interval,
            should_stop: Arc::new(AtomicBool::new(false)),
            journal_thread: None,
        }
    }

    pub fn layout(&self) -> &FsLayout {
        &self.inner.layout
    }

    pub fn available_device_names(&self) -> Result<Vec<String>, FsDeviceError> {
        self.inner.layout.available_device_names()
    }
}

/// Construction options for [`FileSystemInputDeviceManager`].
pub struct Options {
    pub fifo: bool,
    pub min_file_age: Duration,
    pub max_poison_count: u32,
    pub transaction_log_save_interval: Duration,
    pub serializer: Arc<dyn FileSystemSerializer>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            fifo: true,
            min_file_age: Duration::ZERO,
            max_poison_count: DEFAULT_MAX_POISON_COUNT,
            transaction_log_save_interval: Duration::from_secs(10),
            serializer: Arc::new(ZipFileSystemSerializer),
        }
    }
}

impl InputDeviceManager for FileSystemInputDeviceManager {
    type Device = FileSystemInputDevice;

    fn connect(&mut self) -> Result<(), InputDeviceError> {
        self.inner.layout.create_all().map_err(|e| InputDeviceError::ConnectFailed {
            device: "filesystem-manager".to_owned(),
            source: Box::new(e),
        })?;

        if self.journal_thread.is_some() {
            return Ok(()); // idempotent
        }

        self.should_stop.store(false, Ordering::SeqCst);
        let inner = self.inner.clone();
        let should_stop = self.should_stop.clone();
        let refresh_interval = self.refresh_interval;
        self.journal_thread = Some(thread::spawn(move || {
            while !should_stop.load(Ordering::SeqCst) {
                if let Err(e) = inner.journal.write_log() {
                    tracing::warn!(error = %e, "periodic journal flush failed");
                }
                scan_and_rollback_stale(&inner.layout.bookkeeping, refresh_interval, |tmp, org| {
                    inner.rollback_entry(tmp, org)
                });
                thread::sleep(refresh_interval);
            }
        }));
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), InputDeviceError> {
        self.should_stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.journal_thread.take() {
            let _ = handle.join();
        }
        let inner = self.inner.clone();
        self.inner.journal.rollback_all(move |tmp, org| inner.rollback_entry(tmp, org));
        Ok(())
    }

    fn get_input_device(&mut self, name: &str) -> Result<Self::Device, InputDeviceError> {
        let input_folder = self.inner.layout.create_queue_dir(name).map_err(|e| InputDeviceError::ConnectFailed {
            device: name.to_owned(),
            source: Box::new(e),
        })?;
        Ok(FileSystemInputDevice {
            name: name.to_owned(),
            inner: self.inner.clone(),
            input_folder,
            sorted: self.fifo,
            min_file_age: self.min_file_age,
            black_listed_files: HashSet::new(),
            current_batch_size: MIN_BATCH_SIZE,
            unsorted_generator: None,
        })
    }
}

pub struct FileSystemInputDevice {
    name: String,
    inner: Arc<FsManagerInner>,
    input_folder: PathBuf,
    sorted: bool,
    min_file_age: Duration,
    black_listed_files: HashSet<PathBuf>,
    current_batch_size: usize,
    unsorted_generator: Option<fs::ReadDir>,
}

impl FileSystemInputDevice {
    fn sorted_candidates(&mut self) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(&self.input_folder) else {
            return Vec::new();
        };
        let mut tagged: Vec<(PathBuf, SystemTime)> = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if self.black_listed_files.contains(&path) {
                continue;
            }
            let Ok(metadata) = entry.metadata() else { continue };
            let Ok(mtime) = metadata.modified() else { continue };
            tagged.push((path, mtime));
        }
        tagged.sort_by_key(|(_, mtime)| *mtime);
        tagged.into_iter().map(|(path, _)| path).collect()
    }

    /// Pulls from a persistent `ReadDir` iterator, restarting a fresh
    /// directory scan each time the previous one is exhausted — mirrors
    /// the original continuing-generator design so the device doesn't
    /// re-scan the whole directory on every single poll.
    fn next_unsorted_entry(&mut self) -> Option<PathBuf> {
        loop {
            if self.unsorted_generator.is_none() {
                self.unsorted_generator = fs::read_dir(&self.input_folder).ok();
                self.unsorted_generator.as_ref()?;
            }
            match self.unsorted_generator.as_mut().unwrap().next() {
                Some(Ok(entry)) => return Some(entry.path()),
                Some(Err(_)) => continue,
                None => {
                    self.unsorted_generator = None;
                    return None;
                }
            }
        }
    }

    fn unsorted_batch(&mut self) -> Vec<PathBuf> {
        let mut batch = Vec::new();
        while let Some(path) = self.next_unsorted_entry() {
            if self.black_listed_files.contains(&path) {
                continue;
            }
            if !self.min_file_age.is_zero() {
                let Ok(metadata) = fs::metadata(&path) else { continue };
                let Ok(modified) = metadata.modified() else { continue };
                let Ok(age) = modified.elapsed() else { continue };
                if age < self.min_file_age {
                    continue;
                }
            }
            batch.push(path);
            if batch.len() >= self.current_batch_size {
                break;
            }
        }
        self.current_batch_size = MIN_BATCH_SIZE.max(batch.len().min(self.current_batch_size));
        batch.shuffle(&mut rand::thread_rng());
        batch
    }

    fn increase_batch_size(&mut self) {
        self.current_batch_size = (self.current_batch_size * 2).min(MAX_BATCH_SIZE);
    }

    fn decrease_batch_size(&mut self) {
        self.current_batch_size = MIN_BATCH_SIZE.max(self.current_batch_size / 2);
    }

    fn try_read(&mut self, path: &Path, with_transaction: bool) -> Result<Option<ReadResult>, InputDeviceError> {
        if self.black_listed_files.contains(path) {
            return Ok(None);
        }
        if !path.is_file() {
            self.black_listed_files.insert(path.to_path_buf());
            return Ok(None);
        }

        let headers = match stat_headers(path) {
            Ok(h) => h,
            Err(_) => return Ok(None), // file disappeared before we could stat it
        };

        let tmp_path = self.inner.layout.tmp.join(uuid::Uuid::new_v4().simple().to_string());
        let lock_path = self.inner.lock_path_for(path);
        let moved = atomic_move(path, &tmp_path, &lock_path);
        let moved = match moved {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(error = %e, path = %path.display(), "atomic move failed while reading");
                return Ok(None);
            }
        };
        if !moved {
            return Ok(None);
        }

        let data = fs::read(&tmp_path).map_err(|e| {
            to_io(
                &self.name,
                FsDeviceError::Io {
                    path: tmp_path.clone(),
                    source: e,
                },
            )
        })?;
        let message = self
            .inner
            .serializer
            .deserialize(&data)
            .map_err(|e| to_io(&self.name, e))?;

        let org_path_str = path.to_string_lossy().into_owned();
        let tmp_path_str = tmp_path.to_string_lossy().into_owned();

        let transaction: Box<dyn Transaction> = if with_transaction {
            self.inner.journal.add_transaction(&tmp_path_str, &org_path_str);
            Box::new(FileSystemInputTransaction {
                device_name: self.name.clone(),
                inner: self.inner.clone(),
                org_path: org_path_str,
                tmp_path: tmp_path_str,
                state: AtomicTransactionState::new(),
            })
        } else {
            let _ = fs::remove_file(&tmp_path);
            Box::new(NullTransaction::new())
        };

        let mut bundle = MessageBundle::new(message, headers);
        bundle
            .device_headers
            .insert(device_header_keys::INPUT_DEVICE_NAME, self.name.clone());
        Ok(Some(ReadResult::new(bundle, transaction)))
    }
}

fn stat_headers(path: &Path) -> io::Result<DeviceHeaders> {
    let metadata = fs::metadata(path)?;
    let mut headers = DeviceHeaders::new();
    let filename = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    headers.insert(device_header_keys::FILENAME, filename);
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|m| m.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    headers.insert(STAT_HEADER, serde_json::json!({"mtime": mtime, "size": metadata.len()}));
    Ok(headers)
}

impl InputDevice for FileSystemInputDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, timeout: Duration, with_transaction: bool) -> Result<ReadResult, InputDeviceError> {
        let deadline = Instant::now() + timeout;
        if self.sorted {
            loop {
                for path in self.sorted_candidates() {
                    if let Some(result) = self.try_read(&path, with_transaction)? {
                        return Ok(result);
                    }
                    if Instant::now() >= deadline {
                        return Ok(ReadResult::empty());
                    }
                }
                if Instant::now() >= deadline {
                    return Ok(ReadResult::empty());
                }
                thread::sleep(SLEEP_BETWEEN_BATCHES.min(deadline.saturating_duration_since(Instant::now())));
            }
        } else {
            loop {
                let batch = self.unsorted_batch();
                let got_any = !batch.is_empty();
                for path in batch {
                    if let Some(result) = self.try_read(&path, with_transaction)? {
                        self.decrease_batch_size();
                        return Ok(result);
                    }
                }
                self.increase_batch_size();
                if Instant::now() >= deadline {
                    return Ok(ReadResult::empty());
                }
                if !got_any {
                    thread::sleep(SLEEP_BETWEEN_BATCHES.min(deadline.saturating_duration_since(Instant::now())));
                }
            }
        }
    }
}

struct FileSystemInputTransaction {
    device_name: String,
    inner: Arc<FsManagerInner>,
    org_path: String,
    tmp_path: String,
    state: AtomicTransactionState,
}

impl Transaction for FileSystemInputTransaction {
    fn device_name(&self) -> &str {
        &self.device_name
    }

    fn state(&self) -> TransactionState {
        self.state.state()
    }

    fn commit(&self) -> Result<(), runtime_core::WrongTransactionStateError> {
        let moved = self.state.try_finish(TransactionState::Committed)?;
        if moved {
            let _ = fs::remove_file(&self.tmp_path);
            self.inner
                .poison_counts
                .lock()
                .expect("poison counts lock poisoned")
                .remove(Path::new(&self.org_path));
            self.inner.journal.remove_transaction(&self.tmp_path);
        }
        Ok(())
    }

    fn rollback(&self) -> Result<(), runtime_core::WrongTransactionStateError> {
        let moved = self.state.try_finish(TransactionState::RolledBack)?;
        if moved {
            self.inner.rollback_entry(&self.tmp_path, &self.org_path);
            self.inner.journal.remove_transaction(&self.tmp_path);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runtime_core::OutputDevice;

    use crate::output::FileSystemOutputDeviceManager;
    use runtime_core::OutputDeviceManager;

    fn write_message(root: &Path, queue: &str, payload: &str) {
        let mut out_manager = FileSystemOutputDeviceManager::new(root);
        OutputDeviceManager::connect(&mut out_manager).unwrap();
        let mut device = out_manager.get_output_device(queue).unwrap();
        let bundle = MessageBundle::new(Message::from_bytes(payload.as_bytes().to_vec()), DeviceHeaders::new());
        device.send(bundle).unwrap();
    }

    #[test]
    fn reads_and_commits_a_message() {
        let dir = tempfile::tempdir().unwrap();
        write_message(dir.path(), "q", "hello");

        let mut manager = FileSystemInputDeviceManager::new(dir.path());
        manager.connect().unwrap();
        let mut device = manager.get_input_device("q").unwrap();

        let mut result = device.read(Duration::from_secs(2), true).unwrap();
        let mut bundle = result.bundle.take().unwrap();
        assert_eq!(bundle.message.bytes(), b"hello");
        result.transaction.commit().unwrap();

        manager.disconnect().unwrap();
    }

    #[test]
    fn rollback_requeues_message_for_another_read() {
        let dir = tempfile::tempdir().unwrap();
        write_message(dir.path(), "q", "retry-me");

        let mut manager = FileSystemInputDeviceManager::new(dir.path());
        manager.connect().unwrap();
        let mut device = manager.get_input_device("q").unwrap();

        let first = device.read(Duration::from_secs(2), true).unwrap();
        first.transaction.rollback().unwrap();

        let mut second = device.read(Duration::from_secs(2), true).unwrap();
        let mut bundle = second.bundle.take().unwrap();
        assert_eq!(bundle.message.bytes(), b"retry-me");
        second.transaction.commit().unwrap();

        manager.disconnect().unwrap();
    }

    #[test]
    fn empty_queue_read_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = FileSystemInputDeviceManager::new(dir.path());
        manager.connect().unwrap();
        let mut device = manager.get_input_device("empty").unwrap();

        let result = device.read(Duration::from_millis(50), false).unwrap();
        assert!(result.is_empty());
        manager.disconnect().unwrap();
    }
}
