//! Autoscan directory descriptors and the in-memory scan registry.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cds::object::INVALID_OBJECT_ID;
use crate::error::{Error, Result};

pub const INVALID_SCAN_ID: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    Timed,
    Inotify,
}

impl ScanMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanMode::Timed => "timed",
            ScanMode::Inotify => "inotify",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "timed" => Ok(ScanMode::Timed),
            "inotify" => Ok(ScanMode::Inotify),
            _ => Err(Error::other(format!("illegal scan mode: {}", s))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanLevel {
    Basic,
    Full,
}

impl ScanLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanLevel::Basic => "basic",
            ScanLevel::Full => "full",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "basic" => Ok(ScanLevel::Basic),
            "full" => Ok(ScanLevel::Full),
            _ => Err(Error::other(format!("illegal scan level: {}", s))),
        }
    }
}

/// A directory that is periodically or reactively re-imported.
#[derive(Debug, Clone)]
pub struct AutoscanDirectory {
    /// Row id in `mt_autoscan`; invalid until persisted.
    pub storage_id: i64,
    /// Catalog container bound to the location.
    pub object_id: i64,
    /// Slot in the in-memory registry; invalid until registered.
    pub scan_id: i32,
    pub location: PathBuf,
    pub mode: ScanMode,
    pub level: ScanLevel,
    pub recursive: bool,
    pub hidden: bool,
    pub interval: Duration,
    /// High-water mark of observed file modification times (unix secs).
    pub last_modified: i64,
    /// Persistent autoscans come from the config file and survive their
    /// target directory disappearing.
    pub persistent: bool,
    /// Outstanding descendant task count for the current scan cycle.
    pub task_count: i32,
}

impl AutoscanDirectory {
    pub fn new(location: PathBuf, mode: ScanMode, level: ScanLevel) -> Self {
        Self {
            storage_id: -1,
            object_id: INVALID_OBJECT_ID,
            scan_id: INVALID_SCAN_ID,
            location,
            mode,
            level,
            recursive: false,
            hidden: false,
            interval: Duration::from_secs(1800),
            last_modified: 0,
            persistent: false,
            task_count: 0,
        }
    }

    pub fn reset_lmt(&mut self) {
        self.last_modified = 0;
    }

    pub fn update_lmt(&mut self, mtime: i64) {
        if mtime > self.last_modified {
            self.last_modified = mtime;
        }
    }
}

/// Registry of active autoscans for one scan mode. Slots keep their index
/// as the scan id so timers can address a scan after list mutation.
#[derive(Debug, Default)]
pub struct AutoscanList {
    slots: Vec<Option<AutoscanDirectory>>,
}

impl AutoscanList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, mut dir: AutoscanDirectory) -> i32 {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                dir.scan_id = i as i32;
                *slot = Some(dir);
                return i as i32;
            }
        }
        let id = self.slots.len() as i32;
        dir.scan_id = id;
        self.slots.push(Some(dir));
        id
    }

    pub fn get(&self, scan_id: i32) -> Option<&AutoscanDirectory> {
        self.slots.get(scan_id as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, scan_id: i32) -> Option<&mut AutoscanDirectory> {
        self.slots.get_mut(scan_id as usize)?.as_mut()
    }

    pub fn get_by_object_id(&self, object_id: i64) -> Option<&AutoscanDirectory> {
        self.slots
            .iter()
            .flatten()
            .find(|d| d.object_id == object_id)
    }

    pub fn get_by_location(&self, location: &Path) -> Option<&AutoscanDirectory> {
        self.slots.iter().flatten().find(|d| d.location == location)
    }

    pub fn remove(&mut self, scan_id: i32) -> Option<AutoscanDirectory> {
        let slot = self.slots.get_mut(scan_id as usize)?;
        let mut dir = slot.take()?;
        dir.scan_id = INVALID_SCAN_ID;
        Some(dir)
    }

    /// Remove and return every autoscan whose location lies at or below
    /// the given path.
    pub fn remove_if_subdir(&mut self, path: &Path) -> Vec<AutoscanDirectory> {
        let mut removed = Vec::new();
        for slot in self.slots.iter_mut() {
            let matches = slot
                .as_ref()
                .map(|d| d.location.starts_with(path))
                .unwrap_or(false);
            if matches {
                let mut dir = slot.take().unwrap();
                dir.scan_id = INVALID_SCAN_ID;
                removed.push(dir);
            }
        }
        removed
    }

    pub fn array_copy(&self) -> Vec<AutoscanDirectory> {
        self.slots.iter().flatten().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dir(path: &str) -> AutoscanDirectory {
        AutoscanDirectory::new(PathBuf::from(path), ScanMode::Timed, ScanLevel::Full)
    }

    #[test]
    fn test_slots_are_reused() {
        let mut list = AutoscanList::new();
        let a = list.add(dir("/media/a"));
        let b = list.add(dir("/media/b"));
        assert_ne!(a, b);
        list.remove(a);
        let c = list.add(dir("/media/c"));
        assert_eq!(a, c);
        assert_eq!(list.get(c).unwrap().location, PathBuf::from("/media/c"));
    }

    #[test]
    fn test_remove_if_subdir() {
        let mut list = AutoscanList::new();
        list.add(dir("/media/music"));
        list.add(dir("/media/music/rock"));
        list.add(dir("/media/photos"));
        let removed = list.remove_if_subdir(Path::new("/media/music"));
        assert_eq!(removed.len(), 2);
        assert_eq!(list.array_copy().len(), 1);
    }

    #[test]
    fn test_lmt_high_water() {
        let mut d = dir("/media/a");
        d.update_lmt(100);
        d.update_lmt(50);
        assert_eq!(d.last_modified, 100);
        d.reset_lmt();
        assert_eq!(d.last_modified, 0);
    }
}
