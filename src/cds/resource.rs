//! Resource entries attached to catalog items.
//!
//! Resources are persisted as a single column; individual resources are
//! joined with `|` and each one serializes as
//! `handlerType '~' encoded_attributes '~' encoded_parameters`.

use crate::cds::dictionary::Dictionary;
use crate::error::{Error, Result};

pub const RESOURCE_SEP: char = '|';
pub const RESOURCE_PART_SEP: char = '~';

/// Handler that produced a resource. Identifies which extractor is
/// responsible for serving subordinate data (thumbnails etc.).
pub const CH_DEFAULT: i32 = 0;
pub const CH_AUDIO_TAG: i32 = 1;
pub const CH_EXIF: i32 = 2;

/// Well-known resource attribute names.
pub const RES_ATTR_PROTOCOLINFO: &str = "protocolInfo";
pub const RES_ATTR_SIZE: &str = "size";
pub const RES_ATTR_DURATION: &str = "duration";
pub const RES_ATTR_BITRATE: &str = "bitrate";
pub const RES_ATTR_SAMPLEFREQUENCY: &str = "sampleFrequency";
pub const RES_ATTR_NRAUDIOCHANNELS: &str = "nrAudioChannels";
pub const RES_ATTR_RESOLUTION: &str = "resolution";
pub const RES_ATTR_COLORDEPTH: &str = "colorDepth";

/// Default protocolInfo for a directly served resource.
pub fn protocol_info(mime_type: &str) -> String {
    format!("http-get:*:{}:*", mime_type)
}

#[derive(Debug, Clone)]
pub struct Resource {
    handler_type: i32,
    pub attributes: Dictionary,
    pub parameters: Dictionary,
}

impl Resource {
    pub fn new(handler_type: i32) -> Self {
        Self {
            handler_type,
            attributes: Dictionary::new(),
            parameters: Dictionary::new(),
        }
    }

    pub fn handler_type(&self) -> i32 {
        self.handler_type
    }

    pub fn add_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.put(name, value);
    }

    pub fn get_attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name)
    }

    pub fn add_parameter(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.parameters.put(name, value);
    }

    pub fn encode(&self) -> String {
        format!(
            "{}{}{}{}{}",
            self.handler_type,
            RESOURCE_PART_SEP,
            self.attributes.encode(),
            RESOURCE_PART_SEP,
            self.parameters.encode()
        )
    }

    pub fn decode(serial: &str) -> Result<Resource> {
        let parts: Vec<&str> = serial.split(RESOURCE_PART_SEP).collect();
        if parts.len() != 2 && parts.len() != 3 {
            return Err(Error::other(format!(
                "could not parse resource: {}",
                serial
            )));
        }
        let handler_type: i32 = parts[0]
            .parse()
            .map_err(|_| Error::other(format!("bad resource handler type: {}", parts[0])))?;
        let attributes = Dictionary::decode(parts[1]);
        let parameters = if parts.len() == 3 {
            Dictionary::decode(parts[2])
        } else {
            Dictionary::new()
        };
        Ok(Resource {
            handler_type,
            attributes,
            parameters,
        })
    }

    /// Serialize a resource list into the persisted column format.
    pub fn encode_list(resources: &[Resource]) -> String {
        resources
            .iter()
            .map(Resource::encode)
            .collect::<Vec<_>>()
            .join(&RESOURCE_SEP.to_string())
    }

    pub fn decode_list(serial: &str) -> Result<Vec<Resource>> {
        if serial.is_empty() {
            return Ok(Vec::new());
        }
        serial.split(RESOURCE_SEP).map(Resource::decode).collect()
    }
}

impl PartialEq for Resource {
    fn eq(&self, other: &Self) -> bool {
        self.handler_type == other.handler_type
            && self.attributes.equals(&other.attributes)
            && self.parameters.equals(&other.parameters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_round_trip() {
        let mut res = Resource::new(CH_AUDIO_TAG);
        res.add_attribute(RES_ATTR_PROTOCOLINFO, protocol_info("audio/mpeg"));
        res.add_attribute(RES_ATTR_SIZE, "4242");
        res.add_parameter("rct", "th");
        let decoded = Resource::decode(&res.encode()).unwrap();
        assert_eq!(res, decoded);
        assert_eq!(decoded.handler_type(), CH_AUDIO_TAG);
    }

    #[test]
    fn test_resource_without_parameters_decodes() {
        let res = Resource::decode("0~protocolInfo=http-get%3A%2A%3Aaudio%2Fmpeg%3A%2A~").unwrap();
        assert_eq!(res.handler_type(), CH_DEFAULT);
        assert!(res.parameters.is_empty());
    }

    #[test]
    fn test_resource_list_round_trip() {
        let mut primary = Resource::new(CH_DEFAULT);
        primary.add_attribute(RES_ATTR_PROTOCOLINFO, protocol_info("video/mp4"));
        let mut thumb = Resource::new(CH_EXIF);
        thumb.add_attribute(RES_ATTR_RESOLUTION, "160x120");

        let list = vec![primary, thumb];
        let decoded = Resource::decode_list(&Resource::encode_list(&list)).unwrap();
        assert_eq!(list, decoded);
        assert!(Resource::decode_list("").unwrap().is_empty());
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(Resource::decode("nonsense").is_err());
        assert!(Resource::decode("x~a=1~b=2").is_err());
    }
}
