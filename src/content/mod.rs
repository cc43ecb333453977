//! Content manager: the asynchronous import pipeline.
//!
//! A single worker drains two priority queues of tasks (high priority
//! for interactive adds and removals, low priority for rescans). Task
//! bodies call back into the manager, which owns the autoscan registry,
//! the virtual layout and the accounting counters.

pub mod autoscan;
pub mod layout;
pub mod metadata;
pub mod playlist;
pub mod sniffer;
pub mod task;
pub mod watcher;

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cds::object::{
    CdsObject, CDS_ID_FS_ROOT, CDS_ID_ROOT, INVALID_OBJECT_ID, is_forbidden_cds_id,
    UPNP_CLASS_ITEM,
};
use crate::config::{AppConfig, LayoutKind, ScanLevelConfig, ScanModeConfig};
use crate::database::Storage;
use crate::error::{Error, Result};
use crate::session::SessionManager;
use crate::update::UpdateManager;

use autoscan::{AutoscanDirectory, AutoscanList, ScanLevel, ScanMode, INVALID_SCAN_ID};
use layout::{FallbackLayout, Layout};
use metadata::{MetadataExtractor, TagMetadataExtractor};
use playlist::BuiltinPlaylistParser;
use task::{Task, TaskKind, TaskType};
use watcher::{FilesystemEvent, SubtreeWatcher};

/// Expands a playlist object into further import paths. The builtin
/// M3U/PLS parser ships by default; a scripted engine can replace it.
#[async_trait]
pub trait PlaylistParser: Send + Sync {
    async fn process(&self, obj: &CdsObject) -> Result<Vec<PathBuf>>;
}

#[derive(Default)]
pub struct Accounting {
    pub total_files: AtomicI64,
}

struct Queues {
    queue1: VecDeque<Arc<Task>>,
    queue2: VecDeque<Arc<Task>>,
    current: Option<Arc<Task>>,
}

pub struct ContentManager {
    config: Arc<AppConfig>,
    storage: Arc<dyn Storage>,
    update: Arc<UpdateManager>,
    session: Arc<SessionManager>,

    queues: Mutex<Queues>,
    notify: Notify,
    shutdown_flag: AtomicBool,
    next_task_id: AtomicU32,

    layout: Mutex<Option<Arc<dyn Layout>>>,
    layout_enabled: bool,
    extractor: Box<dyn MetadataExtractor>,
    playlist_parser: Mutex<Option<Arc<dyn PlaylistParser>>>,

    autoscan_timed: Mutex<AutoscanList>,
    autoscan_inotify: Mutex<AutoscanList>,
    watcher: Arc<SubtreeWatcher>,

    accounting: Accounting,
}

impl ContentManager {
    pub fn new(
        config: Arc<AppConfig>,
        storage: Arc<dyn Storage>,
        update: Arc<UpdateManager>,
        session: Arc<SessionManager>,
    ) -> Arc<Self> {
        let layout_enabled = config.import.virtual_layout.kind != LayoutKind::Disabled;
        Arc::new(Self {
            config,
            storage,
            update,
            session,
            queues: Mutex::new(Queues {
                queue1: VecDeque::new(),
                queue2: VecDeque::new(),
                current: None,
            }),
            notify: Notify::new(),
            shutdown_flag: AtomicBool::new(false),
            next_task_id: AtomicU32::new(1),
            layout: Mutex::new(None),
            layout_enabled,
            extractor: Box::new(TagMetadataExtractor),
            playlist_parser: Mutex::new(Some(
                Arc::new(BuiltinPlaylistParser) as Arc<dyn PlaylistParser>
            )),
            autoscan_timed: Mutex::new(AutoscanList::new()),
            autoscan_inotify: Mutex::new(AutoscanList::new()),
            watcher: SubtreeWatcher::new(),
            accounting: Accounting::default(),
        })
    }

    /// Start the task worker and the filesystem event pump.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        if let Some(mut receiver) = self.watcher.take_receiver() {
            let weak = Arc::downgrade(self);
            tokio::spawn(async move {
                while let Some(event) = receiver.recv().await {
                    let Some(manager) = weak.upgrade() else { break };
                    if manager.shutdown_flag.load(Ordering::SeqCst) {
                        break;
                    }
                    manager.handle_filesystem_event(event).await;
                }
            });
        }

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager.worker().await;
            info!("content worker shut down");
        })
    }

    pub fn shutdown(&self) {
        self.shutdown_flag.store(true, Ordering::SeqCst);
        self.watcher.stop();
        self.notify.notify_one();
    }

    pub fn total_files(&self) -> i64 {
        self.accounting.total_files.load(Ordering::SeqCst)
    }

    // -- task machinery ---------------------------------------------------

    fn add_task(&self, task: Arc<Task>, low_priority: bool) {
        let mut queues = self.queues.lock().unwrap();
        if low_priority {
            queues.queue2.push_back(task);
        } else {
            queues.queue1.push_back(task);
        }
        self.notify.notify_one();
    }

    fn make_task(
        &self,
        kind: TaskKind,
        cancellable: bool,
        parent_task_id: u32,
        description: String,
    ) -> Arc<Task> {
        let id = self.next_task_id.fetch_add(1, Ordering::SeqCst);
        Task::with_ids(kind, cancellable, id, parent_task_id, description)
    }

    /// Mark every queued or running task with this id (or parented by
    /// it) invalid.
    pub fn invalidate_task(&self, task_id: u32) {
        let queues = self.queues.lock().unwrap();
        let matches = |t: &Arc<Task>| t.id() == task_id || t.parent_id() == task_id;
        if let Some(current) = queues.current.as_ref() {
            if matches(current) {
                current.invalidate();
            }
        }
        for t in queues.queue1.iter().chain(queues.queue2.iter()) {
            if matches(t) {
                t.invalidate();
            }
        }
    }

    /// Invalidate pending AddFile tasks at or under a path that is about
    /// to be removed, so a racing rescan does not re-add the subtree.
    fn invalidate_add_tasks_under(&self, path: &Path) {
        let queues = self.queues.lock().unwrap();
        let invalidate = |t: &Arc<Task>| {
            if let TaskKind::AddFile { path: task_path, .. } = &t.kind {
                if task_path.starts_with(path) {
                    debug!("invalidating add task for {}", task_path.display());
                    t.invalidate();
                }
            }
        };
        if let Some(current) = queues.current.as_ref() {
            invalidate(current);
        }
        for t in queues.queue1.iter().chain(queues.queue2.iter()) {
            invalidate(t);
        }
    }

    async fn worker(self: Arc<Self>) {
        loop {
            if self.shutdown_flag.load(Ordering::SeqCst) {
                break;
            }
            let task = {
                let mut queues = self.queues.lock().unwrap();
                let task = queues
                    .queue1
                    .pop_front()
                    .or_else(|| queues.queue2.pop_front());
                queues.current = task.clone();
                task
            };

            let Some(task) = task else {
                self.notify.notified().await;
                continue;
            };

            if task.is_valid() {
                debug!("task start: {}", task.description);
                match self.run_task(&task).await {
                    Ok(()) => {}
                    Err(Error::ShuttingDown) => {
                        self.shutdown_flag.store(true, Ordering::SeqCst);
                    }
                    Err(e) => warn!("task \"{}\" failed: {}", task.description, e),
                }
            }

            self.queues.lock().unwrap().current = None;
            self.task_done(&task);
        }
    }

    async fn run_task(self: &Arc<Self>, task: &Arc<Task>) -> Result<()> {
        match task.kind.clone() {
            TaskKind::AddFile {
                path,
                recursive,
                hidden,
            } => {
                self._add_file(&path, recursive, hidden, Some(task)).await?;
                Ok(())
            }
            TaskKind::RemoveObject { object_id, all } => self._remove_object(object_id, all).await,
            TaskKind::RescanDirectory {
                object_id,
                scan_id,
                mode,
            } => self._rescan_directory(object_id, scan_id, mode, task).await,
            TaskKind::LoadAccounting => self._load_accounting().await,
        }
    }

    /// Autoscan task-count bookkeeping: when the last task of a scan
    /// cycle finishes, the timed rescan timer is renewed once.
    fn task_done(self: &Arc<Self>, task: &Arc<Task>) {
        let Some((scan_id, mode)) = task.scan_id() else {
            return;
        };
        let rearm = {
            let list = match mode {
                ScanMode::Timed => &self.autoscan_timed,
                ScanMode::Inotify => &self.autoscan_inotify,
            };
            let mut list = list.lock().unwrap();
            match list.get_mut(scan_id) {
                Some(dir) => {
                    dir.task_count -= 1;
                    if dir.task_count <= 0 {
                        dir.task_count = 0;
                        mode == ScanMode::Timed
                    } else {
                        false
                    }
                }
                None => false,
            }
        };
        if rearm {
            let interval = self
                .autoscan_timed
                .lock()
                .unwrap()
                .get(scan_id)
                .map(|d| d.interval)
                .unwrap_or(Duration::from_secs(1800));
            self.arm_timer(scan_id, interval);
        }
    }

    fn arm_timer(self: &Arc<Self>, scan_id: i32, interval: Duration) {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            if let Some(manager) = weak.upgrade() {
                if !manager.shutdown_flag.load(Ordering::SeqCst) {
                    manager.timer_notify(scan_id);
                }
            }
        });
    }

    /// Timer callback: enqueue the periodic rescan of a timed autoscan.
    pub fn timer_notify(self: &Arc<Self>, scan_id: i32) {
        let dir = self
            .autoscan_timed
            .lock()
            .unwrap()
            .get(scan_id)
            .cloned();
        if let Some(dir) = dir {
            self.rescan_directory(dir.object_id, scan_id, ScanMode::Timed, None, true);
        }
    }

    // -- add file ---------------------------------------------------------

    /// Import a path. With `run_async` the work is queued and
    /// `INVALID_OBJECT_ID` is returned immediately.
    pub async fn add_file(
        self: &Arc<Self>,
        path: &Path,
        recursive: bool,
        run_async: bool,
        hidden: bool,
        low_priority: bool,
        cancellable: bool,
    ) -> Result<i64> {
        self.add_file_internal(path, recursive, run_async, hidden, low_priority, 0, cancellable)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn add_file_internal(
        self: &Arc<Self>,
        path: &Path,
        recursive: bool,
        run_async: bool,
        hidden: bool,
        low_priority: bool,
        parent_task_id: u32,
        cancellable: bool,
    ) -> Result<i64> {
        if run_async {
            let task = self.make_task(
                TaskKind::AddFile {
                    path: path.to_path_buf(),
                    recursive,
                    hidden,
                },
                cancellable,
                parent_task_id,
                format!("Adding: {}", path.display()),
            );
            self.add_task(task, low_priority);
            Ok(INVALID_OBJECT_ID)
        } else {
            self._add_file(path, recursive, hidden, None).await
        }
    }

    async fn _add_file(
        self: &Arc<Self>,
        path: &Path,
        recursive: bool,
        hidden: bool,
        task: Option<&Arc<Task>>,
    ) -> Result<i64> {
        if !hidden {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if name.starts_with('.') {
                    return Ok(INVALID_OBJECT_ID);
                }
            }
        }

        // Never import the active configuration file.
        if path == self.config.config_file() {
            return Ok(INVALID_OBJECT_ID);
        }

        self.init_layout();

        let path_str = path.to_string_lossy();
        let existing = self.storage.find_object_by_path(&path_str).await?;
        let object_id = match existing {
            Some(obj) => obj.id,
            None => {
                let Some(mut obj) = self.create_object_from_file(path).await? else {
                    return Ok(INVALID_OBJECT_ID);
                };
                if obj.is_item() {
                    self.add_object(&mut obj).await?;
                    self.apply_layout(&obj).await?;
                    self.apply_playlist(&obj).await?;
                    obj.id
                } else {
                    // Directory containers materialize when items below
                    // them are imported.
                    INVALID_OBJECT_ID
                }
            }
        };

        if recursive && path.is_dir() {
            self.add_recursive(path, hidden, task).await?;
        }

        Ok(object_id)
    }

    /// Import a directory subtree, depth first, directories before files
    /// inside each directory, each group sorted by name.
    async fn add_recursive(
        self: &Arc<Self>,
        start: &Path,
        hidden: bool,
        task: Option<&Arc<Task>>,
    ) -> Result<()> {
        let mut stack = vec![start.to_path_buf()];
        let config_file = self.config.config_file();

        while let Some(dir) = stack.pop() {
            if self.shutdown_flag.load(Ordering::SeqCst) {
                return Err(Error::ShuttingDown);
            }
            if let Some(task) = task {
                if !task.is_valid() {
                    debug!("add task for {} invalidated, stopping", dir.display());
                    return Ok(());
                }
            }

            let mut read_dir = match tokio::fs::read_dir(&dir).await {
                Ok(rd) => rd,
                Err(e) => {
                    warn!("could not list directory {}: {}", dir.display(), e);
                    continue;
                }
            };

            let mut files = Vec::new();
            let mut dirs = Vec::new();
            while let Ok(Some(entry)) = read_dir.next_entry().await {
                let name = entry.file_name();
                let name = name.to_string_lossy().into_owned();
                if name.starts_with('.') && !hidden {
                    continue;
                }
                let entry_path = entry.path();
                if entry_path == config_file {
                    continue;
                }
                match entry.file_type().await {
                    Ok(ft) if ft.is_dir() => dirs.push(entry_path),
                    Ok(ft) if ft.is_file() => files.push(entry_path),
                    _ => {}
                }
            }
            dirs.sort();
            files.sort();

            for file in files {
                if self.shutdown_flag.load(Ordering::SeqCst) {
                    return Err(Error::ShuttingDown);
                }
                if let Some(task) = task {
                    if !task.is_valid() {
                        return Ok(());
                    }
                }
                let file_str = file.to_string_lossy();
                match self.storage.find_object_by_path(&file_str).await? {
                    Some(_) => {}
                    None => match self.create_object_from_file(&file).await {
                        Ok(Some(mut obj)) if obj.is_item() => {
                            if let Err(e) = self.add_object(&mut obj).await {
                                warn!("skipping {}: {}", file.display(), e);
                                continue;
                            }
                            self.apply_layout(&obj).await?;
                            self.apply_playlist(&obj).await?;
                        }
                        Ok(_) => debug!("file ignored: {}", file.display()),
                        Err(e) => warn!("skipping {}: {}", file.display(), e),
                    },
                }
            }

            stack.extend(dirs);
        }
        Ok(())
    }

    /// Classify a path into a catalog object. Returns `None` when the
    /// file is ignored by configuration.
    pub async fn create_object_from_file(&self, path: &Path) -> Result<Option<CdsObject>> {
        let meta = tokio::fs::metadata(path).await.map_err(|e| {
            Error::other(format!("failed to stat {}: {}", path.display(), e))
        })?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if meta.is_dir() {
            let mut container = CdsObject::new_container();
            container.title = filename;
            container.location = path.to_string_lossy().into_owned();
            return Ok(Some(container));
        }
        if !meta.is_file() {
            return Err(Error::other(format!(
                "skipping {}: not a regular file",
                path.display()
            )));
        }

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        let mime_type = match self.config.extension_to_mimetype(&extension) {
            Some(mime) => mime.to_string(),
            None if self.config.import.ignore_unknown_extensions => {
                debug!("ignoring {}: unknown extension", path.display());
                return Ok(None);
            }
            None => match sniffer::sniff_path(path).await {
                Ok(Some(mime)) => mime.to_string(),
                Ok(None) => {
                    warn!("cannot determine mime type of {}, skipping", path.display());
                    return Ok(None);
                }
                Err(e) => {
                    warn!("could not sniff {}: {}", path.display(), e);
                    return Ok(None);
                }
            },
        };
        let upnp_class = self
            .config
            .mimetype_to_upnpclass(&mime_type)
            .unwrap_or(UPNP_CLASS_ITEM)
            .to_string();

        let mut item = CdsObject::new_item();
        item.title = filename;
        item.location = path.to_string_lossy().into_owned();
        item.class = upnp_class;
        {
            let data = item.as_item_mut().unwrap();
            data.mime_type = mime_type.clone();
        }

        let mut primary = crate::cds::Resource::new(crate::cds::resource::CH_DEFAULT);
        primary.add_attribute(
            crate::cds::resource::RES_ATTR_PROTOCOLINFO,
            crate::cds::resource::protocol_info(&mime_type),
        );
        primary.add_attribute(crate::cds::resource::RES_ATTR_SIZE, meta.len().to_string());
        item.resources.push(primary);

        let content_type = self.config.mimetype_to_contenttype(&mime_type);
        self.extractor.extract(&mut item, content_type);

        Ok(Some(item))
    }

    // -- object mutation --------------------------------------------------

    /// Persist a new object and emit the resulting container updates.
    pub async fn add_object(&self, obj: &mut CdsObject) -> Result<()> {
        if obj.parent_id == INVALID_OBJECT_ID && obj.is_item() && !obj.virt {
            // Physical items hang off the PC Directory tree; make sure
            // the directory chain exists.
            let parent_dir = Path::new(&obj.location)
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_default();
            let (parent_id, changed) = self.storage.ensure_path_existence(&parent_dir).await?;
            obj.parent_id = parent_id;
            if let Some(changed) = changed {
                self.update.container_changed(changed).await?;
                self.session.container_changed_ui(changed);
            }
        }

        obj.validate()?;
        self.storage.add_object(obj).await?;

        // A parent gaining its first child is itself a change visible
        // from the grandparent.
        if obj.parent_id != INVALID_OBJECT_ID
            && self.storage.get_child_count(obj.parent_id).await? == 1
        {
            if let Ok(parent) = self.storage.load_object(obj.parent_id).await {
                self.update.container_changed(parent.parent_id).await?;
            }
        }

        self.update.container_changed(obj.parent_id).await?;
        if obj.is_container() {
            self.session.container_changed_ui(obj.parent_id);
        }

        if !obj.virt && obj.is_item() {
            self.accounting.total_files.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Add a virtual item whose physical backing file must exist in the
    /// catalog (it is imported on demand).
    pub async fn add_virtual_item(self: &Arc<Self>, obj: &mut CdsObject) -> Result<()> {
        obj.validate()?;
        let path = obj.location.clone();
        let physical = self.storage.find_object_by_path(&path).await?;
        let physical_id = match physical {
            Some(physical) => physical.id,
            None => {
                let Some(mut created) = self.create_object_from_file(Path::new(&path)).await?
                else {
                    return Err(Error::other(format!("could not add {}", path)));
                };
                if !created.is_item() {
                    return Err(Error::other(format!("not a file: {}", path)));
                }
                self.add_object(&mut created).await?;
                created.id
            }
        };
        obj.ref_id = Some(physical_id);
        obj.virt = true;
        self.add_object(obj).await
    }

    /// Persist metadata changes to an existing object.
    pub async fn update_object(&self, obj: &CdsObject) -> Result<()> {
        obj.validate()?;
        self.storage.update_object(obj).await?;
        self.update.container_changed(obj.parent_id).await?;
        if obj.is_container() {
            self.session.container_changed_ui(obj.parent_id);
        }
        Ok(())
    }

    /// Convert an item to another item variant, carrying shared fields.
    pub fn convert_object(&self, obj: &CdsObject, new_type: u32) -> Result<CdsObject> {
        let old_type = obj.object_type();
        if old_type == new_type {
            return Ok(obj.clone());
        }
        if !obj.is_item() || new_type & crate::cds::object::OBJECT_TYPE_ITEM == 0 {
            return Err(Error::other(format!(
                "cannot convert object type {} to {}",
                old_type, new_type
            )));
        }
        let mut converted = CdsObject::create(new_type)?;
        obj.copy_to(&mut converted);
        converted.id = obj.id;
        converted.parent_id = obj.parent_id;
        Ok(converted)
    }

    // -- removal ----------------------------------------------------------

    pub async fn remove_object(
        self: &Arc<Self>,
        object_id: i64,
        run_async: bool,
        all: bool,
    ) -> Result<()> {
        if !run_async {
            return self._remove_object(object_id, all).await;
        }

        let obj = match self.storage.load_object(object_id).await {
            Ok(obj) => obj,
            Err(Error::NotFound) => {
                debug!("remove requested for vanished object {}", object_id);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if obj.is_container() && !obj.location.is_empty() && !obj.virt {
            let path = PathBuf::from(&obj.location);

            // Autoscans below the removed tree die with it.
            let removed_timed = self
                .autoscan_timed
                .lock()
                .unwrap()
                .remove_if_subdir(&path);
            for dir in &removed_timed {
                self.storage.remove_autoscan_directory(dir.storage_id).await?;
            }
            let removed_inotify = self
                .autoscan_inotify
                .lock()
                .unwrap()
                .remove_if_subdir(&path);
            for dir in &removed_inotify {
                self.watcher.unmonitor(&dir.location);
                self.storage.remove_autoscan_directory(dir.storage_id).await?;
            }

            self.invalidate_add_tasks_under(&path);
        }

        let task = self.make_task(
            TaskKind::RemoveObject { object_id, all },
            false,
            0,
            format!("Removing: {}", obj.title),
        );
        self.add_task(task, false);
        Ok(())
    }

    async fn _remove_object(&self, object_id: i64, all: bool) -> Result<()> {
        if object_id == CDS_ID_ROOT {
            return Err(Error::InvalidObject("cannot remove root container".into()));
        }
        if object_id == CDS_ID_FS_ROOT {
            return Err(Error::InvalidObject(
                "cannot remove PC-Directory container".into(),
            ));
        }
        if is_forbidden_cds_id(object_id) {
            return Err(Error::InvalidObject(format!(
                "tried to remove illegal object id {}",
                object_id
            )));
        }

        let changed = self.storage.remove_object(object_id, all).await?;
        self.session.containers_changed_ui(&changed.ui);
        self.update.containers_changed(&changed.upnp).await?;
        Ok(())
    }

    // -- layout / playlist ------------------------------------------------

    fn init_layout(&self) {
        if !self.layout_enabled {
            return;
        }
        let mut layout = self.layout.lock().unwrap();
        if layout.is_none() {
            *layout = Some(Arc::new(FallbackLayout) as Arc<dyn Layout>);
        }
    }

    pub fn destroy_layout(&self) {
        *self.layout.lock().unwrap() = None;
    }

    /// Atomic reload: destroy then init behind the same lock.
    pub fn reload_layout(&self) {
        let mut layout = self.layout.lock().unwrap();
        *layout = None;
        if self.layout_enabled {
            *layout = Some(Arc::new(FallbackLayout) as Arc<dyn Layout>);
        }
    }

    pub fn set_playlist_parser(&self, parser: Arc<dyn PlaylistParser>) {
        *self.playlist_parser.lock().unwrap() = Some(parser);
    }

    async fn apply_layout(&self, obj: &CdsObject) -> Result<()> {
        if obj.virt || !obj.is_item() {
            return Ok(());
        }
        let layout = self.layout.lock().unwrap().clone();
        let Some(layout) = layout else {
            return Ok(());
        };

        for mut placement in layout.process(obj)? {
            let (leaf_id, changed) = self
                .storage
                .add_container_chain(&placement.chain, placement.leaf_class.as_deref(), None)
                .await?;
            if let Some(changed) = changed {
                self.update.container_changed(changed).await?;
                self.session.container_changed_ui(changed);
            }

            // Title collisions inside one container merge to the
            // existing object.
            if self
                .storage
                .find_object_by_title(&placement.object.title, leaf_id)
                .await?
                .is_some()
            {
                continue;
            }

            placement.object.parent_id = leaf_id;
            placement.object.validate()?;
            self.storage.add_object(&mut placement.object).await?;
            self.update.container_changed(leaf_id).await?;
        }
        Ok(())
    }

    async fn apply_playlist(self: &Arc<Self>, obj: &CdsObject) -> Result<()> {
        let Some(mime) = obj.mime_type() else {
            return Ok(());
        };
        if self.config.mimetype_to_contenttype(mime) != Some("playlist") {
            return Ok(());
        }
        let parser = self.playlist_parser.lock().unwrap().clone();
        let Some(parser) = parser else {
            debug!("playlist {} found but no parser is configured", obj.title);
            return Ok(());
        };
        for entry in parser.process(obj).await? {
            let task = self.make_task(
                TaskKind::AddFile {
                    path: entry.clone(),
                    recursive: false,
                    hidden: false,
                },
                true,
                0,
                format!("Adding: {}", entry.display()),
            );
            self.add_task(task, true);
        }
        Ok(())
    }

    // -- autoscan ---------------------------------------------------------

    /// Register the autoscans persisted in storage plus the ones from
    /// the configuration file, then kick off their first scan cycle.
    pub async fn autoscan_init(self: &Arc<Self>) -> Result<()> {
        for mode in [ScanMode::Timed, ScanMode::Inotify] {
            for dir in self.storage.get_autoscan_list(mode).await? {
                if let Err(e) = self.register_autoscan(dir).await {
                    warn!("could not restore autoscan: {}", e);
                }
            }
        }

        for entry in &self.config.import.autoscan {
            let mode = match entry.mode {
                ScanModeConfig::Timed => ScanMode::Timed,
                ScanModeConfig::Inotify => ScanMode::Inotify,
            };
            let level = match entry.level {
                ScanLevelConfig::Basic => ScanLevel::Basic,
                ScanLevelConfig::Full => ScanLevel::Full,
            };
            let already = {
                let list = match mode {
                    ScanMode::Timed => &self.autoscan_timed,
                    ScanMode::Inotify => &self.autoscan_inotify,
                };
                list.lock()
                    .unwrap()
                    .get_by_location(&entry.location)
                    .is_some()
            };
            if already {
                continue;
            }
            let mut dir = AutoscanDirectory::new(entry.location.clone(), mode, level);
            dir.recursive = entry.recursive;
            dir.hidden = entry.hidden_files;
            dir.interval = Duration::from_secs(entry.interval);
            dir.persistent = true;
            if let Err(e) = self.set_autoscan_directory(dir).await {
                warn!(
                    "could not set up autoscan for {}: {}",
                    entry.location.display(),
                    e
                );
            }
        }
        Ok(())
    }

    /// Accept a new or changed autoscan directory.
    pub async fn set_autoscan_directory(
        self: &Arc<Self>,
        mut dir: AutoscanDirectory,
    ) -> Result<()> {
        // An autoscan must target a real directory bound to a catalog
        // container; bind it now when the caller left it open.
        if dir.object_id == INVALID_OBJECT_ID {
            if !dir.location.is_dir() {
                return Err(Error::other(format!(
                    "autoscan target is not a directory: {}",
                    dir.location.display()
                )));
            }
            let (object_id, changed) = self.storage.ensure_path_existence(&dir.location).await?;
            dir.object_id = object_id;
            if let Some(changed) = changed {
                self.update.container_changed(changed).await?;
                self.session.container_changed_ui(changed);
            }
        } else {
            let obj = self.storage.load_object(dir.object_id).await?;
            if !obj.is_container() || obj.virt {
                return Err(Error::other(
                    "autoscan can only be set on a physical container",
                ));
            }
            if obj.location.is_empty() {
                return Err(Error::other(
                    "autoscan target has no location information",
                ));
            }
            dir.location = PathBuf::from(obj.location);
        }

        let original = {
            let list = match dir.mode {
                ScanMode::Timed => &self.autoscan_timed,
                ScanMode::Inotify => &self.autoscan_inotify,
            };
            let list = list.lock().unwrap();
            list.get_by_object_id(dir.object_id).cloned()
        };
        if let Some(original) = &original {
            dir.storage_id = original.storage_id;
            // Dropping to a basic scan, or widening to recursive,
            // restarts the modification-time high-water mark.
            if original.level == ScanLevel::Full && dir.level == ScanLevel::Basic {
                dir.reset_lmt();
            } else if !original.recursive && dir.recursive {
                dir.reset_lmt();
            } else {
                dir.last_modified = original.last_modified;
            }
        }

        self.storage.check_overlapping_autoscans(&dir).await?;

        if dir.storage_id < 0 {
            self.storage.add_autoscan_directory(&mut dir).await?;
        } else {
            self.storage.update_autoscan_directory(&dir).await?;
        }

        if let Some(original) = original {
            match original.mode {
                ScanMode::Timed => {
                    self.autoscan_timed.lock().unwrap().remove(original.scan_id);
                }
                ScanMode::Inotify => {
                    self.autoscan_inotify
                        .lock()
                        .unwrap()
                        .remove(original.scan_id);
                    self.watcher.unmonitor(&original.location);
                }
            }
        }

        self.session.container_changed_ui(dir.object_id);
        self.register_autoscan(dir).await
    }

    async fn register_autoscan(self: &Arc<Self>, dir: AutoscanDirectory) -> Result<()> {
        match dir.mode {
            ScanMode::Timed => {
                let object_id = dir.object_id;
                let scan_id = self.autoscan_timed.lock().unwrap().add(dir);
                // First cycle runs immediately; completion re-arms the
                // interval timer.
                self.rescan_directory(object_id, scan_id, ScanMode::Timed, None, true);
            }
            ScanMode::Inotify => {
                let location = dir.location.clone();
                let scan_id = self.autoscan_inotify.lock().unwrap().add(dir);
                self.watcher.monitor(&location)?;
                // One initial sweep picks up changes made while the
                // server was down.
                let object_id = self
                    .autoscan_inotify
                    .lock()
                    .unwrap()
                    .get(scan_id)
                    .map(|d| d.object_id)
                    .unwrap_or(INVALID_OBJECT_ID);
                self.rescan_directory(object_id, scan_id, ScanMode::Inotify, None, true);
            }
        }
        Ok(())
    }

    pub async fn remove_autoscan_directory(self: &Arc<Self>, object_id: i64) -> Result<()> {
        let timed = self
            .autoscan_timed
            .lock()
            .unwrap()
            .get_by_object_id(object_id)
            .cloned();
        if let Some(dir) = timed {
            self.autoscan_timed.lock().unwrap().remove(dir.scan_id);
            self.storage.remove_autoscan_directory(dir.storage_id).await?;
            self.session.container_changed_ui(object_id);
            return Ok(());
        }
        let inotify = self
            .autoscan_inotify
            .lock()
            .unwrap()
            .get_by_object_id(object_id)
            .cloned();
        if let Some(dir) = inotify {
            self.autoscan_inotify.lock().unwrap().remove(dir.scan_id);
            self.watcher.unmonitor(&dir.location);
            self.storage.remove_autoscan_directory(dir.storage_id).await?;
            self.session.container_changed_ui(object_id);
            return Ok(());
        }
        Err(Error::other(
            "can not remove autoscan directory - was not an autoscan",
        ))
    }

    pub fn get_autoscan_directories(&self) -> Vec<AutoscanDirectory> {
        let mut all = self.autoscan_timed.lock().unwrap().array_copy();
        all.extend(self.autoscan_inotify.lock().unwrap().array_copy());
        all
    }

    /// Queue a rescan. `desc_path` names the subtree in the task
    /// description when it differs from the autoscan root.
    pub fn rescan_directory(
        self: &Arc<Self>,
        object_id: i64,
        scan_id: i32,
        mode: ScanMode,
        desc_path: Option<&Path>,
        cancellable: bool,
    ) {
        self.rescan_directory_with_parent(object_id, scan_id, mode, desc_path, cancellable, 0)
    }

    #[allow(clippy::too_many_arguments)]
    fn rescan_directory_with_parent(
        self: &Arc<Self>,
        object_id: i64,
        scan_id: i32,
        mode: ScanMode,
        desc_path: Option<&Path>,
        cancellable: bool,
        parent_task_id: u32,
    ) {
        let list = match mode {
            ScanMode::Timed => &self.autoscan_timed,
            ScanMode::Inotify => &self.autoscan_inotify,
        };
        let description = {
            let mut list = list.lock().unwrap();
            let Some(dir) = list.get_mut(scan_id) else {
                return;
            };
            dir.task_count += 1;
            let level = dir.level.as_str();
            let path = desc_path.unwrap_or(&dir.location);
            format!("Performing {} scan: {}", level, path.display())
        };

        let task = self.make_task(
            TaskKind::RescanDirectory {
                object_id,
                scan_id,
                mode,
            },
            cancellable,
            parent_task_id,
            description,
        );
        self.add_task(task, true);
    }

    async fn _rescan_directory(
        self: &Arc<Self>,
        object_id: i64,
        scan_id: i32,
        mode: ScanMode,
        task: &Arc<Task>,
    ) -> Result<()> {
        if scan_id == INVALID_SCAN_ID {
            return Ok(());
        }
        let list_handle = match mode {
            ScanMode::Timed => &self.autoscan_timed,
            ScanMode::Inotify => &self.autoscan_inotify,
        };
        let Some(adir) = list_handle.lock().unwrap().get(scan_id).cloned() else {
            return Ok(());
        };

        let mut container_id = object_id;
        let mut location = PathBuf::new();

        if container_id != INVALID_OBJECT_ID {
            match self.storage.load_object(container_id).await {
                Ok(obj) if obj.is_container() => {
                    location = PathBuf::from(obj.location);
                }
                _ => {
                    if adir.persistent {
                        container_id = INVALID_OBJECT_ID;
                    } else {
                        self.drop_autoscan(&adir, mode).await?;
                        return Ok(());
                    }
                }
            }
        }

        if container_id == INVALID_OBJECT_ID {
            if !adir.location.is_dir() {
                // Target is gone: persistent autoscans just unbind and
                // wait for it to come back.
                self.unbind_autoscan(&adir, mode).await?;
                if !adir.persistent {
                    self.drop_autoscan(&adir, mode).await?;
                }
                return Ok(());
            }
            let (id, changed) = self.storage.ensure_path_existence(&adir.location).await?;
            container_id = id;
            if let Some(changed) = changed {
                self.update.container_changed(changed).await?;
                self.session.container_changed_ui(changed);
            }
            if let Some(dir) = list_handle.lock().unwrap().get_mut(scan_id) {
                dir.object_id = container_id;
            }
            let mut updated = adir.clone();
            updated.object_id = container_id;
            self.storage.update_autoscan_directory(&updated).await?;
            location = adir.location.clone();
        }

        if location.as_os_str().is_empty() {
            warn!("container {} has no location information", container_id);
            return Ok(());
        }
        debug!("rescanning location: {}", location.display());

        let mut read_dir = match tokio::fs::read_dir(&location).await {
            Ok(rd) => rd,
            Err(e) => {
                warn!("could not open {}: {}", location.display(), e);
                self.remove_object(container_id, false, false).await?;
                self.unbind_autoscan(&adir, mode).await?;
                if !adir.persistent {
                    self.drop_autoscan(&adir, mode).await?;
                }
                return Ok(());
            }
        };

        // Known children; items only for non-recursive autoscans.
        let mut known = self
            .storage
            .get_objects(container_id, !adir.recursive)
            .await?;

        let mut last_modified_max = adir.last_modified;
        let config_file = self.config.config_file();

        let mut files = Vec::new();
        let mut dirs = Vec::new();
        while let Ok(Some(entry)) = read_dir.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') && !adir.hidden {
                continue;
            }
            let entry_path = entry.path();
            match entry.file_type().await {
                Ok(ft) if ft.is_dir() => dirs.push(entry_path),
                Ok(ft) if ft.is_file() => files.push(entry_path),
                _ => {}
            }
        }
        dirs.sort();
        files.sort();

        for path in dirs.into_iter().chain(files.into_iter()) {
            if self.shutdown_flag.load(Ordering::SeqCst) {
                return Err(Error::ShuttingDown);
            }
            if !task.is_valid() {
                return Ok(());
            }

            let meta = match tokio::fs::metadata(&path).await {
                Ok(meta) => meta,
                Err(e) => {
                    warn!("failed to stat {}: {}", path.display(), e);
                    continue;
                }
            };
            let mtime = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);
            let path_str = path.to_string_lossy().into_owned();

            if meta.is_file() {
                if path == config_file {
                    continue;
                }
                match self.storage.find_object_id_by_path(&path_str).await? {
                    Some(existing_id) => {
                        known.remove(&existing_id);
                        if adir.level == ScanLevel::Full && mtime > adir.last_modified {
                            // Remove and re-add so the layout runs again
                            // over the changed file.
                            self._remove_object(existing_id, false).await?;
                            self._add_file(&path, false, adir.hidden, None).await?;
                            if mtime > last_modified_max {
                                last_modified_max = mtime;
                            }
                        }
                    }
                    None => {
                        self._add_file(&path, false, adir.hidden, None).await?;
                        if mtime > last_modified_max {
                            last_modified_max = mtime;
                        }
                    }
                }
            } else if meta.is_dir() && adir.recursive {
                match self.storage.find_object_id_by_path(&path_str).await? {
                    Some(existing_id) => {
                        known.remove(&existing_id);
                        {
                            let mut list = list_handle.lock().unwrap();
                            if let Some(dir) = list.get_mut(scan_id) {
                                dir.task_count += 1;
                            } else {
                                return Ok(());
                            }
                        }
                        let child = self.make_task(
                            TaskKind::RescanDirectory {
                                object_id: existing_id,
                                scan_id,
                                mode,
                            },
                            task.is_cancellable(),
                            task.id(),
                            format!("Performing {} scan: {}", adir.level.as_str(), path.display()),
                        );
                        self.add_task(child, true);
                    }
                    None => {
                        // Guard against a concurrent removal having
                        // invalidated this autoscan.
                        if list_handle.lock().unwrap().get(scan_id).is_none() {
                            return Ok(());
                        }
                        self.add_file_internal(
                            &path,
                            true,
                            true,
                            adir.hidden,
                            true,
                            task.id(),
                            task.is_cancellable(),
                        )
                        .await?;
                    }
                }
            }
        }

        if self.shutdown_flag.load(Ordering::SeqCst) || !task.is_valid() {
            return Ok(());
        }

        // Whatever stayed in the known set vanished from disk.
        if !known.is_empty() {
            let changed = self.storage.remove_objects(&known, true).await?;
            self.session.containers_changed_ui(&changed.ui);
            self.update.containers_changed(&changed.upnp).await?;
        }

        {
            let mut list = list_handle.lock().unwrap();
            if let Some(dir) = list.get_mut(scan_id) {
                dir.update_lmt(last_modified_max);
            }
        }
        let persisted = list_handle.lock().unwrap().get(scan_id).cloned();
        if let Some(persisted) = persisted {
            self.storage.update_autoscan_directory(&persisted).await?;
        }

        Ok(())
    }

    async fn unbind_autoscan(&self, adir: &AutoscanDirectory, mode: ScanMode) -> Result<()> {
        let list = match mode {
            ScanMode::Timed => &self.autoscan_timed,
            ScanMode::Inotify => &self.autoscan_inotify,
        };
        let updated = {
            let mut list = list.lock().unwrap();
            if let Some(dir) = list.get_mut(adir.scan_id) {
                dir.object_id = INVALID_OBJECT_ID;
                Some(dir.clone())
            } else {
                None
            }
        };
        if let Some(updated) = updated {
            self.storage.update_autoscan_directory(&updated).await?;
        }
        Ok(())
    }

    async fn drop_autoscan(&self, adir: &AutoscanDirectory, mode: ScanMode) -> Result<()> {
        let list = match mode {
            ScanMode::Timed => &self.autoscan_timed,
            ScanMode::Inotify => &self.autoscan_inotify,
        };
        list.lock().unwrap().remove(adir.scan_id);
        if mode == ScanMode::Inotify {
            self.watcher.unmonitor(&adir.location);
        }
        self.storage.remove_autoscan_directory(adir.storage_id).await?;
        Ok(())
    }

    // -- filesystem events ------------------------------------------------

    async fn handle_filesystem_event(self: &Arc<Self>, event: FilesystemEvent) {
        let hidden = self.config.import.hidden_files;
        let result = match event {
            FilesystemEvent::Created(path) => {
                let recursive = path.is_dir();
                self.add_file(&path, recursive, true, hidden, false, true)
                    .await
                    .map(|_| ())
            }
            FilesystemEvent::Modified(path) => self.reimport_path(&path).await,
            FilesystemEvent::Deleted(path) => self.remove_path(&path).await,
        };
        if let Err(e) = result {
            warn!("failed to handle filesystem event: {}", e);
        }
    }

    async fn reimport_path(self: &Arc<Self>, path: &Path) -> Result<()> {
        if !path.is_file() {
            return Ok(());
        }
        let path_str = path.to_string_lossy();
        if let Some(existing) = self.storage.find_object_id_by_path(&path_str).await? {
            self._remove_object(existing, false).await?;
        }
        self.add_file(path, false, true, self.config.import.hidden_files, false, true)
            .await
            .map(|_| ())
    }

    async fn remove_path(self: &Arc<Self>, path: &Path) -> Result<()> {
        let path_str = path.to_string_lossy();
        match self.storage.find_object_id_by_path(&path_str).await? {
            Some(object_id) => self.remove_object(object_id, true, true).await,
            None => Ok(()),
        }
    }

    // -- accounting -------------------------------------------------------

    pub async fn load_accounting(self: &Arc<Self>, run_async: bool) -> Result<()> {
        if run_async {
            let task = self.make_task(
                TaskKind::LoadAccounting,
                false,
                0,
                "Initializing statistics".to_string(),
            );
            self.add_task(task, true);
            Ok(())
        } else {
            self._load_accounting().await
        }
    }

    async fn _load_accounting(&self) -> Result<()> {
        let total = self.storage.get_total_files().await?;
        self.accounting.total_files.store(total, Ordering::SeqCst);
        Ok(())
    }

    /// Snapshot of queued tasks for diagnostics.
    pub fn pending_tasks(&self) -> Vec<(u32, TaskType, String)> {
        let queues = self.queues.lock().unwrap();
        queues
            .queue1
            .iter()
            .chain(queues.queue2.iter())
            .map(|t| (t.id(), t.kind.task_type(), t.description.clone()))
            .collect()
    }
}
