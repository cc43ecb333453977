//! SOAP envelope plumbing for the control endpoints.
//!
//! Incoming action bodies are scanned for argument tags; responses and
//! faults are rendered as strings. Service routing happens on the
//! service id carried in the control URL.

use crate::error::UpnpError;

pub const CDS_SERVICE_TYPE: &str = "urn:schemas-upnp-org:service:ContentDirectory:1";
pub const CDS_SERVICE_ID: &str = "ContentDirectory";
pub const CM_SERVICE_TYPE: &str = "urn:schemas-upnp-org:service:ConnectionManager:1";
pub const CM_SERVICE_ID: &str = "ConnectionManager";
pub const MRREG_SERVICE_TYPE: &str = "urn:microsoft.com:service:X_MS_MediaReceiverRegistrar:1";
pub const MRREG_SERVICE_ID: &str = "X_MS_MediaReceiverRegistrar";

/// Internal representation of a transport action request.
#[derive(Debug, Clone)]
pub struct ActionRequest {
    pub action: String,
    pub service_id: String,
    pub udn: String,
    pub body: String,
}

impl ActionRequest {
    /// Extract the text of an argument element, unescaped.
    pub fn argument(&self, name: &str) -> Option<String> {
        tag_text(&self.body, name).map(|raw| xml_unescape(raw))
    }
}

pub fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

pub fn xml_unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Find the text content of the first `<name ...>text</name>` element.
pub fn tag_text<'a>(body: &'a str, name: &str) -> Option<&'a str> {
    let open_plain = format!("<{}>", name);
    let open_attr = format!("<{} ", name);

    let start = if let Some(pos) = body.find(&open_plain) {
        pos + open_plain.len()
    } else if let Some(pos) = body.find(&open_attr) {
        let rest = &body[pos..];
        // Self-closing elements carry no text.
        let tag_end = rest.find('>')?;
        if rest[..tag_end].ends_with('/') {
            return None;
        }
        pos + tag_end + 1
    } else {
        return None;
    };

    let close = format!("</{}>", name);
    let rest = &body[start..];
    let end = rest.find(&close)?;
    Some(&rest[..end])
}

/// Parse the action name out of a SOAPACTION header value, e.g.
/// `"urn:schemas-upnp-org:service:ContentDirectory:1#Browse"`.
pub fn parse_soap_action(header: &str) -> Option<(String, String)> {
    let trimmed = header.trim().trim_matches('"');
    let (service_type, action) = trimmed.split_once('#')?;
    Some((service_type.to_string(), action.to_string()))
}

/// Build a SOAP action response envelope.
pub fn action_response(action: &str, service_type: &str, arguments: &[(&str, String)]) -> String {
    let mut args = String::new();
    for (name, value) in arguments {
        args.push_str(&format!("<{name}>{}</{name}>", xml_escape(value)));
    }
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/">
<s:Body>
<u:{action}Response xmlns:u="{service_type}">{args}</u:{action}Response>
</s:Body>
</s:Envelope>"#
    )
}

/// Build a SOAP fault envelope carrying a UPnP error code.
pub fn fault_response(error: &UpnpError) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/">
<s:Body>
<s:Fault>
<faultcode>s:Client</faultcode>
<faultstring>UPnPError</faultstring>
<detail>
<UPnPError xmlns="urn:schemas-upnp-org:control-1-0">
<errorCode>{}</errorCode>
<errorDescription>{}</errorDescription>
</UPnPError>
</detail>
</s:Fault>
</s:Body>
</s:Envelope>"#,
        error.code,
        xml_escape(&error.message)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const BROWSE_BODY: &str = r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
<s:Body>
<u:Browse xmlns:u="urn:schemas-upnp-org:service:ContentDirectory:1">
<ObjectID>0</ObjectID>
<BrowseFlag>BrowseDirectChildren</BrowseFlag>
<Filter>*</Filter>
<StartingIndex>0</StartingIndex>
<RequestedCount>10</RequestedCount>
<SortCriteria></SortCriteria>
</u:Browse>
</s:Body>
</s:Envelope>"#;

    #[test]
    fn test_tag_text_extracts_arguments() {
        assert_eq!(tag_text(BROWSE_BODY, "ObjectID"), Some("0"));
        assert_eq!(tag_text(BROWSE_BODY, "BrowseFlag"), Some("BrowseDirectChildren"));
        assert_eq!(tag_text(BROWSE_BODY, "RequestedCount"), Some("10"));
        assert_eq!(tag_text(BROWSE_BODY, "SortCriteria"), Some(""));
        assert_eq!(tag_text(BROWSE_BODY, "Nonexistent"), None);
    }

    #[test]
    fn test_parse_soap_action_header() {
        let (service, action) = parse_soap_action(
            "\"urn:schemas-upnp-org:service:ContentDirectory:1#Browse\"",
        )
        .unwrap();
        assert_eq!(service, CDS_SERVICE_TYPE);
        assert_eq!(action, "Browse");
    }

    #[test]
    fn test_escape_round_trip() {
        let original = r#"<res protocolInfo="a&b">'x'</res>"#;
        assert_eq!(xml_unescape(&xml_escape(original)), original);
    }

    #[test]
    fn test_action_response_shape() {
        let response = action_response("GetSystemUpdateID", CDS_SERVICE_TYPE, &[("Id", "7".into())]);
        assert!(response.contains("<u:GetSystemUpdateIDResponse"));
        assert!(response.contains("<Id>7</Id>"));
    }

    #[test]
    fn test_fault_carries_code() {
        let fault = fault_response(&UpnpError::no_such_object("no such object"));
        assert!(fault.contains("<errorCode>701</errorCode>"));
    }
}
