//! Configuration from local files.
//!
//! Each tracked file has a [`FileHandler`]. The default one parses by extension
//! (`.yaml`/`.yml`, `.toml`, `.json`; anything else is read as YAML) and flattens
//! into dotted keys, with string values going through `${VAR||default}`
//! expansion. [`FileHandler::FileNameAsKey`] instead exposes the whole file
//! under its file name, which suits directories of mounted secrets.
//!
//! When several files define the same key, the file with the lower per-file
//! priority wins, and between equal priorities the file added first wins.
//!
//! `watch` starts a filesystem watcher on the directories holding the tracked
//! files. A change re-reads the file, diffs the merged view before and after, and
//! pushes the difference to the engine as one batch for key and module listeners.

use async_trait::async_trait;
use notify::{
    Event as NotifyEvent, EventKind as NotifyKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use tracing::{debug, info, warn};

use stratum_core::value::flatten;
use stratum_core::{ConfigSource, Event, EventSink, Result, StratumError, Value, populate_events};

use crate::expand::expand_env;

pub const FILE_SOURCE_NAME: &str = "FileSource";
pub const FILE_SOURCE_PRIORITY: i32 = 4;

/// Supported file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Yaml,
    Toml,
    Json,
}

impl FileFormat {
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("toml") => FileFormat::Toml,
            Some("json") => FileFormat::Json,
            _ => FileFormat::Yaml,
        }
    }

    /// Parse `content` and flatten it into dotted keys.
    pub fn parse(self, content: &str) -> std::result::Result<HashMap<String, Value>, String> {
        if content.trim().is_empty() {
            return Ok(HashMap::new());
        }
        let tree: Value = match self {
            FileFormat::Yaml => serde_yaml::from_str(content).map_err(|e| e.to_string())?,
            FileFormat::Toml => toml::from_str(content).map_err(|e| e.to_string())?,
            FileFormat::Json => serde_json::from_str(content).map_err(|e| e.to_string())?,
        };
        Ok(flatten(&tree))
    }
}

/// How a file's content becomes key/values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileHandler {
    /// Parse by extension, flatten to dotted keys, expand `${VAR}` in strings.
    #[default]
    Flatten,
    /// One key, the file name, holding the raw content.
    FileNameAsKey,
}

impl FileHandler {
    fn read(self, path: &Path) -> Result<HashMap<String, Value>> {
        match self {
            FileHandler::Flatten => read_config_file(path),
            FileHandler::FileNameAsKey => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .ok_or_else(|| {
                        StratumError::source_failure(
                            FILE_SOURCE_NAME,
                            format!("{} has no file name", path.display()),
                        )
                    })?;
                let raw = std::fs::read_to_string(path)?;
                Ok(HashMap::from([(name, Value::String(raw))]))
            }
        }
    }
}

impl FromStr for FileHandler {
    type Err = StratumError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "flatten" => Ok(FileHandler::Flatten),
            "file_name_as_key" => Ok(FileHandler::FileNameAsKey),
            other => Err(StratumError::Config(format!("unknown file handler '{other}'"))),
        }
    }
}

/// Read, parse and expand one file.
fn read_config_file(path: &Path) -> Result<HashMap<String, Value>> {
    let raw = std::fs::read_to_string(path)?;
    let mut config = FileFormat::from_path(path).parse(&raw).map_err(|e| {
        StratumError::source_failure(
            FILE_SOURCE_NAME,
            format!("failed to parse {}: {e}", path.display()),
        )
    })?;
    for value in config.values_mut() {
        if let Value::String(s) = value {
            *s = expand_env(s);
        }
    }
    Ok(config)
}

/// Editor swap and backup files.
fn is_scratch_file(path: &Path) -> bool {
    let name = path.to_string_lossy();
    name.ends_with(".swp") || name.ends_with(".swx") || name.ends_with('~')
}

#[derive(Debug)]
struct TrackedFile {
    path: PathBuf,
    priority: u32,
    handler: FileHandler,
}

#[derive(Debug, Default)]
struct FileState {
    files: Vec<TrackedFile>,
    contents: HashMap<PathBuf, HashMap<String, Value>>,
    merged: HashMap<String, Value>,
}

impl FileState {
    fn is_tracked(&self, path: &Path) -> bool {
        self.files.iter().any(|f| f.path == path)
    }

    fn handler_of(&self, path: &Path) -> Option<FileHandler> {
        self.files.iter().find(|f| f.path == path).map(|f| f.handler)
    }

    fn remerge(&mut self) {
        let mut order: Vec<&TrackedFile> = self.files.iter().collect();
        order.sort_by_key(|f| f.priority);

        let mut merged = HashMap::new();
        for file in order {
            let Some(config) = self.contents.get(&file.path) else {
                continue;
            };
            for (key, value) in config {
                merged.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
        self.merged = merged;
    }

    /// Replace one file's contents and return the change to the merged view.
    fn apply(&mut self, path: &Path, config: HashMap<String, Value>) -> Vec<Event> {
        let before = std::mem::take(&mut self.merged);
        self.contents.insert(path.to_path_buf(), config);
        self.remerge();
        populate_events(FILE_SOURCE_NAME, &before, &self.merged)
    }

    fn watch_dirs(&self) -> BTreeSet<PathBuf> {
        self.files
            .iter()
            .filter_map(|f| f.path.parent().map(Path::to_path_buf))
            .collect()
    }
}

/// Local file source.
pub struct FileSource {
    priority: AtomicI32,
    state: Arc<RwLock<FileState>>,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl FileSource {
    pub fn new() -> Self {
        Self {
            priority: AtomicI32::new(FILE_SOURCE_PRIORITY),
            state: Arc::new(RwLock::new(FileState::default())),
            watcher: Mutex::new(None),
        }
    }

    /// Track a file, or every regular file directly inside a directory, with
    /// the default [`FileHandler::Flatten`].
    ///
    /// Files already tracked are skipped. Adding files after the source was
    /// registered does not notify the engine; call `Manager::refresh` for that.
    pub fn add_file(&self, path: impl AsRef<Path>, priority: u32) -> Result<()> {
        self.add_file_with(path, priority, FileHandler::Flatten)
    }

    /// [`FileSource::add_file`] with an explicit handler.
    pub fn add_file_with(
        &self,
        path: impl AsRef<Path>,
        priority: u32,
        handler: FileHandler,
    ) -> Result<()> {
        let path = std::fs::canonicalize(path.as_ref())?;
        let candidates = if path.is_dir() {
            let mut files = Vec::new();
            for entry in std::fs::read_dir(&path)? {
                let entry_path = entry?.path();
                if entry_path.is_file() && !is_scratch_file(&entry_path) {
                    files.push(entry_path);
                }
            }
            files.sort();
            files
        } else {
            vec![path]
        };

        let mut loaded = Vec::with_capacity(candidates.len());
        for file in candidates {
            if self.state.read().is_tracked(&file) {
                debug!(path = %file.display(), "file already tracked");
                continue;
            }
            let config = handler.read(&file)?;
            loaded.push((file, config));
        }

        {
            let mut state = self.state.write();
            for (file, config) in &loaded {
                if state.is_tracked(file) {
                    continue;
                }
                state.files.push(TrackedFile {
                    path: file.clone(),
                    priority,
                    handler,
                });
                state.contents.insert(file.clone(), config.clone());
            }
            state.remerge();
        }

        if let Some(watcher) = self.watcher.lock().as_mut() {
            for (file, _) in &loaded {
                if let Some(dir) = file.parent() {
                    if let Err(e) = watcher.watch(dir, RecursiveMode::NonRecursive) {
                        warn!(path = %dir.display(), error = %e, "add watcher file fail");
                    }
                }
            }
        }

        for (file, config) in &loaded {
            info!(path = %file.display(), keys = config.len(), "file added to file source");
        }
        Ok(())
    }

    /// Paths currently tracked, in the order they were added.
    pub fn files(&self) -> Vec<PathBuf> {
        self.state.read().files.iter().map(|f| f.path.clone()).collect()
    }

    /// Re-read every tracked file and return the change to the merged view.
    ///
    /// Unreadable files keep their previous contents.
    pub fn reload(&self) -> Result<Vec<Event>> {
        let tracked: Vec<(PathBuf, FileHandler)> = self
            .state
            .read()
            .files
            .iter()
            .map(|f| (f.path.clone(), f.handler))
            .collect();
        let mut fresh = Vec::with_capacity(tracked.len());
        for (path, handler) in tracked {
            match handler.read(&path) {
                Ok(config) => fresh.push((path, config)),
                Err(e) => warn!(path = %path.display(), error = %e, "read file error"),
            }
        }

        let mut state = self.state.write();
        let before = std::mem::take(&mut state.merged);
        for (path, config) in fresh {
            state.contents.insert(path, config);
        }
        state.remerge();
        Ok(populate_events(FILE_SOURCE_NAME, &before, &state.merged))
    }
}

impl Default for FileSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Watcher callback body; runs on the watcher's own thread.
fn handle_fs_event(state: &RwLock<FileState>, sink: &EventSink, event: NotifyEvent) {
    match event.kind {
        NotifyKind::Modify(_) | NotifyKind::Create(_) => {}
        NotifyKind::Remove(_) => {
            debug!(paths = ?event.paths, "file removed, keeping its values");
            return;
        }
        _ => return,
    }

    for path in event.paths {
        if is_scratch_file(&path) {
            continue;
        }
        let path = std::fs::canonicalize(&path).unwrap_or(path);
        let Some(handler) = state.read().handler_of(&path) else {
            continue;
        };
        debug!(path = %path.display(), kind = ?event.kind, "file event, reload it");

        let config = match handler.read(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "file has errors, keeping current values"
                );
                continue;
            }
        };
        let events = state.write().apply(&path, config);
        if events.is_empty() {
            continue;
        }
        debug!(count = events.len(), "generated events");
        if let Err(e) = sink.blocking_send_changes(events) {
            warn!(error = %e, "engine stopped accepting file events");
        }
    }
}

#[async_trait]
impl ConfigSource for FileSource {
    fn name(&self) -> &str {
        FILE_SOURCE_NAME
    }

    fn priority(&self) -> i32 {
        self.priority.load(Ordering::Relaxed)
    }

    fn set_priority(&self, priority: i32) {
        self.priority.store(priority, Ordering::Relaxed);
    }

    fn configurations(&self) -> Result<HashMap<String, Value>> {
        Ok(self.state.read().merged.clone())
    }

    fn configuration_by_key(&self, key: &str) -> Result<Value> {
        self.state
            .read()
            .merged
            .get(key)
            .cloned()
            .ok_or_else(|| StratumError::KeyNotExist(key.to_string()))
    }

    async fn refresh(&self) -> Result<()> {
        let events = self.reload()?;
        debug!(count = events.len(), "file source reloaded");
        Ok(())
    }

    async fn watch(&self, sink: EventSink) -> Result<()> {
        let state = Arc::clone(&self.state);
        let mut watcher =
            notify::recommended_watcher(move |res: notify::Result<NotifyEvent>| match res {
                Ok(event) => handle_fs_event(&state, &sink, event),
                Err(e) => warn!(error = %e, "file watcher error"),
            })
            .map_err(|e| {
                StratumError::source_failure(
                    FILE_SOURCE_NAME,
                    format!("failed to create file watcher: {e}"),
                )
            })?;

        let dirs = self.state.read().watch_dirs();
        for dir in dirs {
            watcher
                .watch(&dir, RecursiveMode::NonRecursive)
                .map_err(|e| {
                    StratumError::source_failure(
                        FILE_SOURCE_NAME,
                        format!("failed to watch {}: {e}", dir.display()),
                    )
                })?;
        }

        *self.watcher.lock() = Some(watcher);
        info!("file watcher started");
        Ok(())
    }

    async fn cleanup(&self) -> Result<()> {
        self.watcher.lock().take();
        let mut state = self.state.write();
        state.files.clear();
        state.contents.clear();
        state.merged.clear();
        Ok(())
    }
}
