//! Metadata extraction seam.
//!
//! The importer hands a freshly classified item to an extractor, which
//! fills the metadata dictionary and the attributes of resource 0.
//! Per-format extractors are external collaborators; the shipped
//! implementation reads audio tags and leaves other content types with
//! their filename-derived title.

use std::path::Path;

use tracing::debug;

use crate::cds::object::{CdsObject, MD_ALBUM, MD_ARTIST, MD_DATE, MD_GENRE, MD_TRACKNUMBER};
use crate::cds::resource::{Resource, CH_AUDIO_TAG, RES_ATTR_DURATION};

pub trait MetadataExtractor: Send + Sync {
    /// Fill metadata for the given content type ("mp3", "flac", ...).
    fn extract(&self, obj: &mut CdsObject, content_type: Option<&str>);
}

/// Tag-based extractor for audio content.
pub struct TagMetadataExtractor;

impl MetadataExtractor for TagMetadataExtractor {
    fn extract(&self, obj: &mut CdsObject, content_type: Option<&str>) {
        match content_type {
            Some("mp3") | Some("flac") | Some("ogg") | Some("m4a") => {
                self.extract_audio_tags(obj)
            }
            _ => {}
        }
    }
}

impl TagMetadataExtractor {
    fn extract_audio_tags(&self, obj: &mut CdsObject) {
        let path = Path::new(&obj.location);
        let tag = match audiotags::Tag::new().read_from_path(path) {
            Ok(tag) => tag,
            Err(e) => {
                debug!("no readable tags in {}: {}", obj.location, e);
                return;
            }
        };

        if let Some(title) = tag.title() {
            if !title.trim().is_empty() {
                obj.title = title.trim().to_string();
            }
        }
        if let Some(artist) = tag.artist() {
            obj.set_metadata(MD_ARTIST, artist.trim());
        }
        if let Some(album) = tag.album_title() {
            obj.set_metadata(MD_ALBUM, album.trim());
        }
        if let Some(genre) = tag.genre() {
            obj.set_metadata(MD_GENRE, genre.trim());
        }
        if let Some(year) = tag.year() {
            obj.set_metadata(MD_DATE, format!("{}-01-01", year));
        }
        if let Some(track) = tag.track_number() {
            obj.set_metadata(MD_TRACKNUMBER, track.to_string());
            if let Some(item) = obj.as_item_mut() {
                item.track_number = Some(track as i32);
            }
        }

        if let Some(duration) = tag.duration() {
            let seconds = duration as u64;
            let formatted = format!(
                "{}:{:02}:{:02}",
                seconds / 3600,
                (seconds % 3600) / 60,
                seconds % 60
            );
            let tag_resource = obj
                .resources
                .iter_mut()
                .find(|r| r.handler_type() == CH_AUDIO_TAG);
            match tag_resource {
                Some(res) => res.add_attribute(RES_ATTR_DURATION, formatted),
                None => {
                    if let Some(primary) = obj.resources.first_mut() {
                        primary.add_attribute(RES_ATTR_DURATION, formatted);
                    } else {
                        let mut res = Resource::new(CH_AUDIO_TAG);
                        res.add_attribute(RES_ATTR_DURATION, formatted);
                        obj.resources.push(res);
                    }
                }
            }
        }
    }
}
