//! The typed object graph of the Content Directory: containers, items,
//! active items and external URL items over one common header.

use std::path::Path;

use crate::cds::dictionary::Dictionary;
use crate::cds::resource::Resource;
use crate::error::{Error, Result};

/// Object type bitmask persisted in the `object_type` column.
pub const OBJECT_TYPE_CONTAINER: u32 = 1;
pub const OBJECT_TYPE_ITEM: u32 = 2;
pub const OBJECT_TYPE_ACTIVE_ITEM: u32 = 4;
pub const OBJECT_TYPE_ITEM_EXTERNAL_URL: u32 = 8;

/// Fixed object ids.
pub const CDS_ID_ROOT: i64 = 0;
pub const CDS_ID_FS_ROOT: i64 = 1;
pub const INVALID_OBJECT_ID: i64 = -1;

/// Ids below 2 address the root and the PC Directory and must never be
/// passed to mutating operations.
pub fn is_forbidden_cds_id(id: i64) -> bool {
    id < 2
}

/// Object flag bits persisted in the `flags` column.
pub const OBJECT_FLAG_RESTRICTED: u32 = 0x01;
pub const OBJECT_FLAG_SEARCHABLE: u32 = 0x02;
pub const OBJECT_FLAG_USE_RESOURCE_REF: u32 = 0x04;
pub const OBJECT_FLAG_PROXY_URL: u32 = 0x08;
pub const OBJECT_FLAG_ONLINE_SERVICE: u32 = 0x10;
pub const OBJECT_FLAG_PLAYED: u32 = 0x20;

/// Default upnp:class values.
pub const UPNP_CLASS_CONTAINER: &str = "object.container";
pub const UPNP_CLASS_ITEM: &str = "object.item";
pub const UPNP_CLASS_MUSIC_TRACK: &str = "object.item.audioItem.musicTrack";
pub const UPNP_CLASS_MUSIC_ARTIST: &str = "object.container.person.musicArtist";
pub const UPNP_CLASS_MUSIC_ALBUM: &str = "object.container.album.musicAlbum";
pub const UPNP_CLASS_MUSIC_GENRE: &str = "object.container.genre.musicGenre";
pub const UPNP_CLASS_PLAYLIST_CONTAINER: &str = "object.container.playlistContainer";

/// Metadata property names rendered into DIDL-Lite.
pub const MD_TITLE: &str = "dc:title";
pub const MD_DESCRIPTION: &str = "dc:description";
pub const MD_DATE: &str = "dc:date";
pub const MD_ARTIST: &str = "upnp:artist";
pub const MD_ALBUM: &str = "upnp:album";
pub const MD_GENRE: &str = "upnp:genre";
pub const MD_TRACKNUMBER: &str = "upnp:originalTrackNumber";
pub const MD_ALBUM_ART_URI: &str = "upnp:albumArtURI";

#[derive(Debug, Clone, PartialEq)]
pub struct ContainerData {
    pub searchable: bool,
    pub update_id: u32,
    /// Filled in by browse queries, not persisted directly.
    pub child_count: i64,
}

impl Default for ContainerData {
    fn default() -> Self {
        Self {
            searchable: false,
            update_id: 0,
            child_count: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ItemData {
    pub mime_type: String,
    pub track_number: Option<i32>,
    pub kind: ItemKind,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum ItemKind {
    #[default]
    Plain,
    /// Playback triggers execution of `action`; `state` is an opaque
    /// cookie the action script may rewrite.
    Active {
        action: String,
        state: String,
    },
    ExternalUrl,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ObjectVariant {
    Container(ContainerData),
    Item(ItemData),
}

/// Generic object in the Content Directory.
#[derive(Debug, Clone)]
pub struct CdsObject {
    pub id: i64,
    /// Back-reference from a virtual item to the physical original.
    pub ref_id: Option<i64>,
    pub parent_id: i64,
    pub restricted: bool,
    pub title: String,
    pub class: String,
    /// Filesystem path or URL; empty for virtual items.
    pub location: String,
    pub virt: bool,
    pub flags: u32,
    pub service_id: Option<String>,
    pub metadata: Dictionary,
    pub auxdata: Dictionary,
    pub resources: Vec<Resource>,
    pub variant: ObjectVariant,
}

impl CdsObject {
    fn new(variant: ObjectVariant, class: &str) -> Self {
        Self {
            id: INVALID_OBJECT_ID,
            ref_id: None,
            parent_id: INVALID_OBJECT_ID,
            restricted: true,
            title: String::new(),
            class: class.to_string(),
            location: String::new(),
            virt: false,
            flags: OBJECT_FLAG_RESTRICTED,
            service_id: None,
            metadata: Dictionary::new(),
            auxdata: Dictionary::new(),
            resources: Vec::new(),
            variant,
        }
    }

    pub fn new_container() -> Self {
        Self::new(
            ObjectVariant::Container(ContainerData::default()),
            UPNP_CLASS_CONTAINER,
        )
    }

    pub fn new_item() -> Self {
        Self::new(ObjectVariant::Item(ItemData::default()), UPNP_CLASS_ITEM)
    }

    pub fn new_active_item() -> Self {
        Self::new(
            ObjectVariant::Item(ItemData {
                kind: ItemKind::Active {
                    action: String::new(),
                    state: String::new(),
                },
                ..ItemData::default()
            }),
            UPNP_CLASS_ITEM,
        )
    }

    pub fn new_external_url_item() -> Self {
        Self::new(
            ObjectVariant::Item(ItemData {
                kind: ItemKind::ExternalUrl,
                ..ItemData::default()
            }),
            UPNP_CLASS_ITEM,
        )
    }

    /// Construct an empty object from a persisted type bitmask.
    pub fn create(object_type: u32) -> Result<Self> {
        if object_type & OBJECT_TYPE_CONTAINER != 0 {
            Ok(Self::new_container())
        } else if object_type & OBJECT_TYPE_ACTIVE_ITEM != 0 {
            Ok(Self::new_active_item())
        } else if object_type & OBJECT_TYPE_ITEM_EXTERNAL_URL != 0 {
            Ok(Self::new_external_url_item())
        } else if object_type & OBJECT_TYPE_ITEM != 0 {
            Ok(Self::new_item())
        } else {
            Err(Error::other(format!(
                "unknown object type: {}",
                object_type
            )))
        }
    }

    pub fn object_type(&self) -> u32 {
        match &self.variant {
            ObjectVariant::Container(_) => OBJECT_TYPE_CONTAINER,
            ObjectVariant::Item(item) => match item.kind {
                ItemKind::Plain => OBJECT_TYPE_ITEM,
                ItemKind::Active { .. } => OBJECT_TYPE_ITEM | OBJECT_TYPE_ACTIVE_ITEM,
                ItemKind::ExternalUrl => OBJECT_TYPE_ITEM | OBJECT_TYPE_ITEM_EXTERNAL_URL,
            },
        }
    }

    pub fn is_container(&self) -> bool {
        matches!(self.variant, ObjectVariant::Container(_))
    }

    pub fn is_item(&self) -> bool {
        matches!(self.variant, ObjectVariant::Item(_))
    }

    pub fn is_active_item(&self) -> bool {
        matches!(
            self.variant,
            ObjectVariant::Item(ItemData {
                kind: ItemKind::Active { .. },
                ..
            })
        )
    }

    pub fn is_external_url(&self) -> bool {
        matches!(
            self.variant,
            ObjectVariant::Item(ItemData {
                kind: ItemKind::ExternalUrl,
                ..
            })
        )
    }

    pub fn as_container(&self) -> Option<&ContainerData> {
        match &self.variant {
            ObjectVariant::Container(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_container_mut(&mut self) -> Option<&mut ContainerData> {
        match &mut self.variant {
            ObjectVariant::Container(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_item(&self) -> Option<&ItemData> {
        match &self.variant {
            ObjectVariant::Item(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_item_mut(&mut self) -> Option<&mut ItemData> {
        match &mut self.variant {
            ObjectVariant::Item(i) => Some(i),
            _ => None,
        }
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.as_item().map(|i| i.mime_type.as_str())
    }

    pub fn get_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    pub fn set_flag(&mut self, flag: u32, value: bool) {
        if value {
            self.flags |= flag;
        } else {
            self.flags &= !flag;
        }
    }

    pub fn get_metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key)
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.put(key, value);
    }

    /// Overwrite `target` with this object's visible fields. Identity is
    /// only carried over when present on the source, so a copy onto a
    /// persisted object keeps that object's ids.
    pub fn copy_to(&self, target: &mut CdsObject) {
        if self.id != INVALID_OBJECT_ID {
            target.id = self.id;
        }
        if self.parent_id != INVALID_OBJECT_ID {
            target.parent_id = self.parent_id;
        }
        target.ref_id = self.ref_id.or(target.ref_id);
        target.restricted = self.restricted;
        target.title = self.title.clone();
        target.class = self.class.clone();
        target.location = self.location.clone();
        target.virt = self.virt;
        target.flags = self.flags;
        target.service_id = self.service_id.clone();
        target.metadata = self.metadata.clone();
        target.auxdata = self.auxdata.clone();
        target.resources = self.resources.clone();

        match (&self.variant, &mut target.variant) {
            (ObjectVariant::Container(src), ObjectVariant::Container(dst)) => {
                dst.searchable = src.searchable;
                dst.update_id = src.update_id;
            }
            (ObjectVariant::Item(src), ObjectVariant::Item(dst)) => {
                dst.mime_type = src.mime_type.clone();
                dst.track_number = src.track_number;
                // Active state only crosses when both sides carry it, so
                // a convert keeps the target kind.
                if let (
                    ItemKind::Active { action, state },
                    ItemKind::Active {
                        action: t_action,
                        state: t_state,
                    },
                ) = (&src.kind, &mut dst.kind)
                {
                    *t_action = action.clone();
                    *t_state = state.clone();
                }
            }
            _ => {}
        }
    }

    /// Field comparison. `exact == false` checks only the DIDL-Lite
    /// visible fields; `exact == true` also compares location, virtual
    /// flag, auxdata and the variant internals.
    pub fn equals(&self, other: &CdsObject, exact: bool) -> bool {
        let base = self.id == other.id
            && self.parent_id == other.parent_id
            && self.restricted == other.restricted
            && self.title == other.title
            && self.class == other.class
            && self.resources == other.resources
            && self.metadata.equals(&other.metadata);
        if !base {
            return false;
        }
        if !exact {
            return true;
        }
        if self.location != other.location
            || self.virt != other.virt
            || !self.auxdata.equals(&other.auxdata)
        {
            return false;
        }
        match (&self.variant, &other.variant) {
            (ObjectVariant::Container(a), ObjectVariant::Container(b)) => {
                a.searchable == b.searchable
            }
            (ObjectVariant::Item(a), ObjectVariant::Item(b)) => {
                a.mime_type == b.mime_type && a.kind == b.kind
            }
            _ => false,
        }
    }

    /// Check the minimum required fields before persistence.
    pub fn validate(&self) -> Result<()> {
        if self.parent_id == INVALID_OBJECT_ID {
            return Err(Error::InvalidObject("missing parent id".into()));
        }
        if self.title.is_empty() {
            return Err(Error::InvalidObject("missing dc:title".into()));
        }
        if self.class.is_empty() {
            return Err(Error::InvalidObject("missing upnp:class".into()));
        }
        if let ObjectVariant::Item(item) = &self.variant {
            if item.mime_type.is_empty() {
                return Err(Error::InvalidObject("missing mime type".into()));
            }
            match &item.kind {
                ItemKind::Plain => {
                    if !self.virt && !Path::new(&self.location).exists() {
                        return Err(Error::InvalidObject(format!(
                            "file {} does not exist",
                            self.location
                        )));
                    }
                }
                ItemKind::Active { action, .. } => {
                    if !self.virt && !Path::new(&self.location).exists() {
                        return Err(Error::InvalidObject(format!(
                            "file {} does not exist",
                            self.location
                        )));
                    }
                    if !is_executable(Path::new(action)) {
                        return Err(Error::InvalidObject(format!(
                            "action {} is not an executable file",
                            action
                        )));
                    }
                }
                ItemKind::ExternalUrl => {
                    if self.location.is_empty() {
                        return Err(Error::InvalidObject("missing URL".into()));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_type_bits() {
        assert_eq!(CdsObject::new_container().object_type(), 1);
        assert_eq!(CdsObject::new_item().object_type(), 2);
        assert_eq!(CdsObject::new_active_item().object_type(), 2 | 4);
        assert_eq!(CdsObject::new_external_url_item().object_type(), 2 | 8);
    }

    #[test]
    fn test_create_from_bitmask() {
        assert!(CdsObject::create(1).unwrap().is_container());
        assert!(CdsObject::create(2 | 4).unwrap().is_active_item());
        assert!(CdsObject::create(2 | 8).unwrap().is_external_url());
        assert!(CdsObject::create(0).is_err());
    }

    #[test]
    fn test_validate_rejects_empty_fields() {
        let mut cont = CdsObject::new_container();
        assert!(cont.validate().is_err());
        cont.parent_id = CDS_ID_ROOT;
        cont.title = "Music".into();
        assert!(cont.validate().is_ok());
    }

    #[test]
    fn test_validate_external_url_needs_no_local_path() {
        let mut item = CdsObject::new_external_url_item();
        item.parent_id = CDS_ID_ROOT;
        item.title = "Stream".into();
        item.as_item_mut().unwrap().mime_type = "audio/mpeg".into();
        assert!(item.validate().is_err());
        item.location = "http://example.com/radio.mp3".into();
        assert!(item.validate().is_ok());
    }

    #[test]
    fn test_equals_exact_vs_visible() {
        let mut a = CdsObject::new_item();
        a.parent_id = CDS_ID_FS_ROOT;
        a.title = "t".into();
        a.as_item_mut().unwrap().mime_type = "audio/mpeg".into();
        let mut b = a.clone();
        assert!(a.equals(&b, true));

        b.location = "/tmp/x.mp3".into();
        assert!(a.equals(&b, false));
        assert!(!a.equals(&b, true));

        b = a.clone();
        b.title = "other".into();
        assert!(!a.equals(&b, false));
    }

    #[test]
    fn test_copy_to_preserves_target_identity() {
        let mut src = CdsObject::new_item();
        src.title = "edited".into();
        src.as_item_mut().unwrap().mime_type = "audio/mpeg".into();

        let mut dst = CdsObject::new_item();
        dst.id = 42;
        dst.parent_id = 7;
        src.copy_to(&mut dst);
        assert_eq!(dst.id, 42);
        assert_eq!(dst.parent_id, 7);
        assert_eq!(dst.title, "edited");
    }
}
