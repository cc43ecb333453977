//! Storage layer: the persistent catalog behind the ContentDirectory.
//!
//! All catalog mutations go through the [`Storage`] trait. The shipped
//! sqlite3 driver serializes statements through a single pooled
//! connection, which is how the driver's thread affinity is honored
//! behind the shared async surface.

use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;

use crate::cds::CdsObject;
use crate::content::autoscan::{AutoscanDirectory, ScanMode};
use crate::error::Result;

pub mod schema;
pub mod sqlite;

pub use sqlite::SqliteStorage;

/// Browse option bits.
pub const BROWSE_DIRECT_CHILDREN: u32 = 0x01;
pub const BROWSE_ITEMS: u32 = 0x02;
pub const BROWSE_CONTAINERS: u32 = 0x04;
pub const BROWSE_EXACT_CHILDCOUNT: u32 = 0x08;
pub const BROWSE_TRACK_SORT: u32 = 0x10;
pub const BROWSE_HIDE_FS_ROOT: u32 = 0x20;

/// Parameters of a browse query.
#[derive(Debug, Clone)]
pub struct BrowseParam {
    pub object_id: i64,
    pub flags: u32,
    pub starting_index: u32,
    /// 0 means "all".
    pub requested_count: u32,
}

impl BrowseParam {
    pub fn new(object_id: i64, flags: u32) -> Self {
        Self {
            object_id,
            flags,
            starting_index: 0,
            requested_count: 0,
        }
    }

    pub fn direct_children(&self) -> bool {
        self.flags & BROWSE_DIRECT_CHILDREN != 0
    }
}

/// Parent containers whose child set changed during a mutation, split by
/// consumer: `upnp` feeds CDS eventing, `ui` feeds web sessions.
#[derive(Debug, Default, Clone)]
pub struct ChangedContainers {
    pub upnp: Vec<i64>,
    pub ui: Vec<i64>,
}

impl ChangedContainers {
    pub fn is_empty(&self) -> bool {
        self.upnp.is_empty() && self.ui.is_empty()
    }
}

/// Virtual container path separator and escape character. A literal
/// separator or escape inside a component is escaped as `\/` and `\\`.
pub const VIRTUAL_CONTAINER_SEPARATOR: char = '/';
pub const VIRTUAL_CONTAINER_ESCAPE: char = '\\';

/// Escape one title for use as a virtual path component.
pub fn vpath_escape(component: &str) -> String {
    let mut out = String::with_capacity(component.len());
    for c in component.chars() {
        if c == VIRTUAL_CONTAINER_SEPARATOR || c == VIRTUAL_CONTAINER_ESCAPE {
            out.push(VIRTUAL_CONTAINER_ESCAPE);
        }
        out.push(c);
    }
    out
}

/// Split an absolute virtual path into unescaped component titles.
pub fn vpath_split(path: &str) -> Result<Vec<String>> {
    if !path.starts_with(VIRTUAL_CONTAINER_SEPARATOR) {
        return Err(crate::error::Error::other(format!(
            "got non-absolute virtual path: {}",
            path
        )));
    }
    let mut components = Vec::new();
    let mut current = String::new();
    let mut escaped = false;
    for c in path[1..].chars() {
        if escaped {
            current.push(c);
            escaped = false;
        } else if c == VIRTUAL_CONTAINER_ESCAPE {
            escaped = true;
        } else if c == VIRTUAL_CONTAINER_SEPARATOR {
            if !current.is_empty() {
                components.push(std::mem::take(&mut current));
            }
        } else {
            current.push(c);
        }
    }
    if !current.is_empty() {
        components.push(current);
    }
    Ok(components)
}

/// The storage contract of the catalog.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Persist a new object; assigns `obj.id` and returns the id of a
    /// parent container whose child set changed, if any.
    async fn add_object(&self, obj: &mut CdsObject) -> Result<Option<i64>>;

    /// Update a persisted object in place.
    async fn update_object(&self, obj: &CdsObject) -> Result<()>;

    /// Load an object by id; a missing row is an error here.
    async fn load_object(&self, id: i64) -> Result<CdsObject>;

    /// Path lookup; accepts filesystem paths and virtual container
    /// paths. A missing row is routine and yields `None`.
    async fn find_object_by_path(&self, path: &str) -> Result<Option<CdsObject>>;

    async fn find_object_id_by_path(&self, path: &str) -> Result<Option<i64>>;

    /// Title lookup used by the importer to merge duplicates within one
    /// container.
    async fn find_object_by_title(&self, title: &str, parent_id: i64)
        -> Result<Option<CdsObject>>;

    /// Object addressed by an online-service id.
    async fn find_object_by_service_id(&self, service_id: &str) -> Result<Option<CdsObject>>;

    async fn browse(&self, param: &BrowseParam) -> Result<(Vec<CdsObject>, u32)>;

    async fn get_child_count(&self, parent_id: i64) -> Result<i64>;

    /// Remove an object (recursively for containers). With `all_refs`,
    /// virtual items referencing any removed id are removed as well.
    async fn remove_object(&self, id: i64, all_refs: bool) -> Result<ChangedContainers>;

    /// Vectorized removal used by the rescan vanish pass.
    async fn remove_objects(&self, ids: &HashSet<i64>, all_refs: bool)
        -> Result<ChangedContainers>;

    /// Ids of the direct children of a container.
    async fn get_objects(&self, parent_id: i64, items_only: bool) -> Result<HashSet<i64>>;

    /// Walk an escaped `/`-separated virtual path, creating missing
    /// containers. Returns the leaf id and the topmost ancestor whose
    /// child set changed (None when nothing was created). Only the leaf
    /// takes `last_class` and `last_ref_id`.
    async fn add_container_chain(
        &self,
        vpath: &str,
        last_class: Option<&str>,
        last_ref_id: Option<i64>,
    ) -> Result<(i64, Option<i64>)>;

    /// Make sure every component of a filesystem path exists as a
    /// container under the PC Directory root. Returns the leaf id and
    /// the topmost changed ancestor.
    async fn ensure_path_existence(&self, fs_path: &Path) -> Result<(i64, Option<i64>)>;

    async fn set_container_update_id(&self, id: i64, update_id: u32) -> Result<()>;

    async fn get_autoscan_list(&self, mode: ScanMode) -> Result<Vec<AutoscanDirectory>>;

    async fn get_autoscan_directory(&self, object_id: i64) -> Result<Option<AutoscanDirectory>>;

    /// Persist a new autoscan row; assigns `dir.storage_id`.
    async fn add_autoscan_directory(&self, dir: &mut AutoscanDirectory) -> Result<()>;

    async fn update_autoscan_directory(&self, dir: &AutoscanDirectory) -> Result<()>;

    async fn remove_autoscan_directory(&self, storage_id: i64) -> Result<()>;

    /// Reject an autoscan whose path overlaps an existing one on a
    /// directory boundary in either direction.
    async fn check_overlapping_autoscans(&self, dir: &AutoscanDirectory) -> Result<()>;

    /// Number of physical items in the catalog.
    async fn get_total_files(&self) -> Result<i64>;

    async fn get_mime_types(&self) -> Result<Vec<String>>;

    async fn get_internal_setting(&self, key: &str) -> Result<Option<String>>;

    async fn store_internal_setting(&self, key: &str, value: &str) -> Result<()>;

    async fn shutdown(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vpath_escape_round_trip() {
        let title = r"AC/DC \ friends";
        let escaped = vpath_escape(title);
        let path = format!("/Audio/Artists/{}", escaped);
        let parts = vpath_split(&path).unwrap();
        assert_eq!(parts, vec!["Audio", "Artists", title]);
    }

    #[test]
    fn test_vpath_split_escaped_separator() {
        let parts = vpath_split(r"/X/Y\/Z/W").unwrap();
        assert_eq!(parts, vec!["X", "Y/Z", "W"]);
    }

    #[test]
    fn test_vpath_split_requires_absolute() {
        assert!(vpath_split("relative/path").is_err());
    }
}
