//! DIDL-Lite rendering and the small parser used to apply an active
//! item's script output back onto the catalog object.

use crate::cds::object::{CdsObject, ItemKind, ObjectVariant, MD_DESCRIPTION, MD_TITLE};
use crate::cds::resource::{Resource, RES_ATTR_PROTOCOLINFO};
use crate::web::soap::{tag_text, xml_escape, xml_unescape};

pub const DIDL_LITE_NAMESPACE: &str = "urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/";
pub const DC_NAMESPACE: &str = "http://purl.org/dc/elements/1.1/";
pub const UPNP_NAMESPACE: &str = "urn:schemas-upnp-org:metadata-1-0/upnp/";
pub const SEC_NAMESPACE: &str = "http://www.sec.co.kr/";

/// Rendering context shared by all objects of one response.
pub struct DidlContext {
    /// `http://ip:port` prefix for resource URLs.
    pub base_url: String,
    /// Truncate titles and descriptions beyond this length.
    pub string_limit: Option<usize>,
    /// Emit the `sec` namespace on the root for extended protocol info.
    pub extend_protocolinfo: bool,
}

impl DidlContext {
    fn limited(&self, value: &str) -> String {
        match self.string_limit {
            Some(limit) if value.chars().count() > limit => {
                let cut: String = value.chars().take(limit.saturating_sub(3)).collect();
                format!("{}...", cut)
            }
            _ => value.to_string(),
        }
    }
}

/// Wrap rendered object elements into a DIDL-Lite document.
pub fn render_didl(ctx: &DidlContext, objects: &[CdsObject]) -> String {
    let mut didl = format!(
        r#"<DIDL-Lite xmlns="{}" xmlns:dc="{}" xmlns:upnp="{}""#,
        DIDL_LITE_NAMESPACE, DC_NAMESPACE, UPNP_NAMESPACE
    );
    if ctx.extend_protocolinfo {
        didl.push_str(&format!(r#" xmlns:sec="{}""#, SEC_NAMESPACE));
    }
    didl.push('>');
    for obj in objects {
        didl.push_str(&render_object(ctx, obj));
    }
    didl.push_str("</DIDL-Lite>");
    didl
}

/// Render one catalog object as an `<item>` or `<container>` element.
pub fn render_object(ctx: &DidlContext, obj: &CdsObject) -> String {
    let ref_attr = match obj.ref_id {
        Some(ref_id) => format!(r#" refID="{}""#, ref_id),
        None => String::new(),
    };
    let restricted = if obj.restricted { "1" } else { "0" };

    let mut inner = format!(
        "<dc:title>{}</dc:title>",
        xml_escape(&ctx.limited(&obj.title))
    );
    for (key, value) in obj.metadata.iter() {
        if key == MD_TITLE {
            continue;
        }
        let value = if key == MD_DESCRIPTION {
            ctx.limited(value)
        } else {
            value.to_string()
        };
        inner.push_str(&format!("<{key}>{}</{key}>", xml_escape(&value)));
    }
    inner.push_str(&format!(
        "<upnp:class>{}</upnp:class>",
        xml_escape(&obj.class)
    ));

    match &obj.variant {
        ObjectVariant::Container(cont) => {
            format!(
                r#"<container id="{}" parentID="{}"{} restricted="{}" childCount="{}" searchable="{}">{}</container>"#,
                obj.id,
                obj.parent_id,
                ref_attr,
                restricted,
                cont.child_count,
                if cont.searchable { "1" } else { "0" },
                inner
            )
        }
        ObjectVariant::Item(item) => {
            for (index, resource) in obj.resources.iter().enumerate() {
                inner.push_str(&render_resource(ctx, obj, item, index, resource));
            }
            if let ItemKind::Active { state, .. } = &item.kind {
                if !state.is_empty() {
                    inner.push_str(&format!("<state>{}</state>", xml_escape(state)));
                }
            }
            format!(
                r#"<item id="{}" parentID="{}"{} restricted="{}">{}</item>"#,
                obj.id, obj.parent_id, ref_attr, restricted, inner
            )
        }
    }
}

fn render_resource(
    ctx: &DidlContext,
    obj: &CdsObject,
    item: &crate::cds::object::ItemData,
    index: usize,
    resource: &Resource,
) -> String {
    let mut attrs = String::new();
    let mut protocol_info = None;
    for (name, value) in resource.attributes.iter() {
        if name == RES_ATTR_PROTOCOLINFO {
            protocol_info = Some(value.to_string());
            continue;
        }
        attrs.push_str(&format!(r#" {}="{}""#, name, xml_escape(value)));
    }
    let protocol_info = protocol_info
        .unwrap_or_else(|| crate::cds::resource::protocol_info(&item.mime_type));

    // External URLs serve themselves; everything else goes through the
    // media endpoint, higher indices addressing subordinate resources.
    let url = if matches!(item.kind, ItemKind::ExternalUrl)
        && !obj.get_flag(crate::cds::object::OBJECT_FLAG_PROXY_URL)
    {
        obj.location.clone()
    } else {
        let object_id = obj.ref_id.unwrap_or(obj.id);
        format!(
            "{}/content/media?object_id={}&res_id={}",
            ctx.base_url, object_id, index
        )
    };

    format!(
        r#"<res protocolInfo="{}"{}>{}</res>"#,
        xml_escape(&protocol_info),
        attrs,
        xml_escape(&url)
    )
}

/// Field updates parsed from an active item's script output. Object and
/// parent ids are never taken from the script.
#[derive(Debug, Default, PartialEq)]
pub struct ActiveItemUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub mime_type: Option<String>,
    pub action: Option<String>,
    pub state: Option<String>,
}

impl ActiveItemUpdate {
    pub fn is_empty(&self) -> bool {
        *self == ActiveItemUpdate::default()
    }
}

/// Parse the DIDL-Lite a script wrote to stdout.
pub fn parse_active_item_update(didl: &str) -> ActiveItemUpdate {
    let grab = |name: &str| tag_text(didl, name).map(xml_unescape);
    ActiveItemUpdate {
        title: grab("dc:title"),
        description: grab("dc:description"),
        mime_type: grab("mimetype"),
        action: grab("action"),
        state: grab("state"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cds::object::{CDS_ID_FS_ROOT, MD_ARTIST};

    fn ctx() -> DidlContext {
        DidlContext {
            base_url: "http://192.168.1.10:49152".to_string(),
            string_limit: None,
            extend_protocolinfo: false,
        }
    }

    fn item() -> CdsObject {
        let mut obj = CdsObject::new_item();
        obj.id = 11;
        obj.parent_id = CDS_ID_FS_ROOT;
        obj.title = "Track & Field".into();
        obj.class = "object.item.audioItem.musicTrack".into();
        obj.as_item_mut().unwrap().mime_type = "audio/mpeg".into();
        obj.set_metadata(MD_ARTIST, "A");
        let mut res = Resource::new(crate::cds::resource::CH_DEFAULT);
        res.add_attribute(RES_ATTR_PROTOCOLINFO, "http-get:*:audio/mpeg:*");
        res.add_attribute("size", "1024");
        obj.resources.push(res);
        obj
    }

    #[test]
    fn test_item_rendering() {
        let rendered = render_object(&ctx(), &item());
        assert!(rendered.starts_with(r#"<item id="11" parentID="1" restricted="1">"#));
        assert!(rendered.contains("<dc:title>Track &amp; Field</dc:title>"));
        assert!(rendered.contains("<upnp:artist>A</upnp:artist>"));
        assert!(rendered.contains(
            r#"<res protocolInfo="http-get:*:audio/mpeg:*" size="1024">http://192.168.1.10:49152/content/media?object_id=11&amp;res_id=0</res>"#
        ));
    }

    #[test]
    fn test_virtual_item_carries_ref_and_serves_physical() {
        let mut obj = item();
        obj.id = 40;
        obj.ref_id = Some(11);
        obj.virt = true;
        let rendered = render_object(&ctx(), &obj);
        assert!(rendered.contains(r#"refID="11""#));
        assert!(rendered.contains("object_id=11&amp;res_id=0"));
    }

    #[test]
    fn test_container_rendering() {
        let mut obj = CdsObject::new_container();
        obj.id = 3;
        obj.parent_id = 0;
        obj.title = "Music".into();
        obj.as_container_mut().unwrap().child_count = 5;
        let rendered = render_object(&ctx(), &obj);
        assert!(rendered.contains(r#"childCount="5""#));
        assert!(rendered.contains("<upnp:class>object.container</upnp:class>"));
    }

    #[test]
    fn test_string_limit_truncates_title() {
        let mut context = ctx();
        context.string_limit = Some(10);
        let mut obj = item();
        obj.title = "A very long track title".into();
        let rendered = render_object(&context, &obj);
        assert!(rendered.contains("<dc:title>A very ...</dc:title>"));
    }

    #[test]
    fn test_external_url_served_directly() {
        let mut obj = CdsObject::new_external_url_item();
        obj.id = 9;
        obj.parent_id = 0;
        obj.title = "Radio".into();
        obj.location = "http://example.com/radio.mp3".into();
        obj.as_item_mut().unwrap().mime_type = "audio/mpeg".into();
        let rendered = render_object(&ctx(), &obj);
        assert!(rendered.contains(">http://example.com/radio.mp3</res>"));
    }

    #[test]
    fn test_parse_active_item_update() {
        let didl = r#"<DIDL-Lite><item id="5"><dc:title>New</dc:title><state>on</state></item></DIDL-Lite>"#;
        let update = parse_active_item_update(didl);
        assert_eq!(update.title.as_deref(), Some("New"));
        assert_eq!(update.state.as_deref(), Some("on"));
        assert!(update.mime_type.is_none());
    }

    #[test]
    fn test_didl_document_namespaces() {
        let didl = render_didl(&ctx(), &[item()]);
        assert!(didl.contains(r#"xmlns="urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/""#));
        assert!(didl.contains(r#"xmlns:dc="http://purl.org/dc/elements/1.1/""#));
        assert!(didl.contains(r#"xmlns:upnp="urn:schemas-upnp-org:metadata-1-0/upnp/""#));
    }
}
