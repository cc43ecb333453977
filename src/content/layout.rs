//! Virtual layout: maps a freshly imported item to virtual container
//! chains. The scripted engine plugs in behind the same trait; the
//! builtin fallback organizes by artist, album, genre and media kind.

use crate::cds::object::{
    CdsObject, MD_ALBUM, MD_ARTIST, MD_GENRE, UPNP_CLASS_MUSIC_ALBUM, UPNP_CLASS_MUSIC_GENRE,
};
use crate::database::vpath_escape;
use crate::error::Result;

/// One virtual placement produced by the layout: the target container
/// chain, an optional class for the leaf container, and the virtual
/// object to insert under it.
pub struct VirtualPlacement {
    pub chain: String,
    pub leaf_class: Option<String>,
    pub object: CdsObject,
}

pub trait Layout: Send + Sync {
    fn process(&self, obj: &CdsObject) -> Result<Vec<VirtualPlacement>>;
}

/// Builtin fallback layout.
pub struct FallbackLayout;

impl FallbackLayout {
    fn virtual_reflection(source: &CdsObject) -> CdsObject {
        let mut reflection = source.clone();
        reflection.id = crate::cds::object::INVALID_OBJECT_ID;
        reflection.ref_id = Some(source.id);
        reflection.virt = true;
        reflection
    }

    fn audio_placements(&self, obj: &CdsObject) -> Vec<VirtualPlacement> {
        let artist = obj.get_metadata(MD_ARTIST).unwrap_or("Unknown");
        let album = obj.get_metadata(MD_ALBUM).unwrap_or("Unknown");
        let genre = obj.get_metadata(MD_GENRE).unwrap_or("Unknown");

        vec![
            VirtualPlacement {
                chain: format!("/Audio/Artists/{}/all", vpath_escape(artist)),
                leaf_class: None,
                object: Self::virtual_reflection(obj),
            },
            VirtualPlacement {
                chain: format!("/Audio/Artists/{}/{}", vpath_escape(artist), vpath_escape(album)),
                leaf_class: Some(UPNP_CLASS_MUSIC_ALBUM.to_string()),
                object: Self::virtual_reflection(obj),
            },
            VirtualPlacement {
                chain: format!("/Audio/Albums/{}", vpath_escape(album)),
                leaf_class: Some(UPNP_CLASS_MUSIC_ALBUM.to_string()),
                object: Self::virtual_reflection(obj),
            },
            VirtualPlacement {
                chain: format!("/Audio/Genres/{}", vpath_escape(genre)),
                leaf_class: Some(UPNP_CLASS_MUSIC_GENRE.to_string()),
                object: Self::virtual_reflection(obj),
            },
            VirtualPlacement {
                chain: "/Audio/All Audio".to_string(),
                leaf_class: None,
                object: Self::virtual_reflection(obj),
            },
        ]
    }

    fn video_placements(&self, obj: &CdsObject) -> Vec<VirtualPlacement> {
        vec![VirtualPlacement {
            chain: "/Video/All Video".to_string(),
            leaf_class: None,
            object: Self::virtual_reflection(obj),
        }]
    }

    fn image_placements(&self, obj: &CdsObject) -> Vec<VirtualPlacement> {
        vec![VirtualPlacement {
            chain: "/Photos/All Photos".to_string(),
            leaf_class: None,
            object: Self::virtual_reflection(obj),
        }]
    }
}

impl Layout for FallbackLayout {
    fn process(&self, obj: &CdsObject) -> Result<Vec<VirtualPlacement>> {
        let mime = match obj.mime_type() {
            Some(mime) => mime,
            None => return Ok(Vec::new()),
        };
        let placements = if mime.starts_with("audio/") || mime == "application/ogg" {
            self.audio_placements(obj)
        } else if mime.starts_with("video/") {
            self.video_placements(obj)
        } else if mime.starts_with("image/") {
            self.image_placements(obj)
        } else {
            Vec::new()
        };
        Ok(placements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cds::object::CDS_ID_FS_ROOT;

    fn track(artist: &str, album: &str) -> CdsObject {
        let mut obj = CdsObject::new_item();
        obj.id = 17;
        obj.parent_id = CDS_ID_FS_ROOT;
        obj.title = "T".into();
        obj.as_item_mut().unwrap().mime_type = "audio/mpeg".into();
        obj.set_metadata(MD_ARTIST, artist);
        obj.set_metadata(MD_ALBUM, album);
        obj
    }

    #[test]
    fn test_audio_track_gets_artist_album_genre_chains() {
        let layout = FallbackLayout;
        let placements = layout.process(&track("A", "B")).unwrap();
        let chains: Vec<&str> = placements.iter().map(|p| p.chain.as_str()).collect();
        assert!(chains.contains(&"/Audio/Artists/A/all"));
        assert!(chains.contains(&"/Audio/Albums/B"));
        assert!(chains.contains(&"/Audio/Genres/Unknown"));
        for placement in &placements {
            assert_eq!(placement.object.ref_id, Some(17));
            assert!(placement.object.virt);
        }
    }

    #[test]
    fn test_slash_in_artist_is_escaped() {
        let layout = FallbackLayout;
        let placements = layout.process(&track("AC/DC", "B")).unwrap();
        assert!(placements
            .iter()
            .any(|p| p.chain == r"/Audio/Artists/AC\/DC/all"));
    }

    #[test]
    fn test_unmapped_mime_produces_nothing() {
        let layout = FallbackLayout;
        let mut obj = track("A", "B");
        obj.as_item_mut().unwrap().mime_type = "text/plain".into();
        assert!(layout.process(&obj).unwrap().is_empty());
    }
}
