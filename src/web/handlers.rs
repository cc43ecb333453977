//! HTTP endpoints: device description, SCPDs, SOAP control dispatch,
//! GENA subscriptions and media resource serving.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path as UrlPath, Query, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use crate::cds::object::{CdsObject, ItemKind, OBJECT_FLAG_PLAYED};
use crate::error::{Error, UpnpError};
use crate::runtime::Runtime;
use crate::web::didl::{parse_active_item_update, render_object, DidlContext};
use crate::web::soap::{
    fault_response, parse_soap_action, xml_escape, ActionRequest, CDS_SERVICE_ID, CDS_SERVICE_TYPE,
    CM_SERVICE_ID, CM_SERVICE_TYPE, MRREG_SERVICE_ID, MRREG_SERVICE_TYPE,
};

const SOAP_CONTENT_TYPE: &str = "text/xml; charset=utf-8";

pub async fn root_handler() -> &'static str {
    "OpenCDS Media Server"
}

pub async fn description_handler(State(runtime): State<Arc<Runtime>>) -> impl IntoResponse {
    let config = &runtime.config.server;
    let xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
    <specVersion><major>1</major><minor>0</minor></specVersion>
    <device>
        <deviceType>urn:schemas-upnp-org:device:MediaServer:1</deviceType>
        <friendlyName>{name}</friendlyName>
        <manufacturer>OpenCDS</manufacturer>
        <modelName>OpenCDS Media Server</modelName>
        <UDN>{udn}</UDN>
        <serviceList>
            <service>
                <serviceType>{cds_type}</serviceType>
                <serviceId>urn:upnp-org:serviceId:{cds_id}</serviceId>
                <SCPDURL>/ContentDirectory.xml</SCPDURL>
                <controlURL>/control/{cds_id}</controlURL>
                <eventSubURL>/event/{cds_id}</eventSubURL>
            </service>
            <service>
                <serviceType>{cm_type}</serviceType>
                <serviceId>urn:upnp-org:serviceId:{cm_id}</serviceId>
                <SCPDURL>/ConnectionManager.xml</SCPDURL>
                <controlURL>/control/{cm_id}</controlURL>
                <eventSubURL>/event/{cm_id}</eventSubURL>
            </service>
            <service>
                <serviceType>{mrreg_type}</serviceType>
                <serviceId>urn:microsoft.com:serviceId:{mrreg_id}</serviceId>
                <SCPDURL>/MediaReceiverRegistrar.xml</SCPDURL>
                <controlURL>/control/{mrreg_id}</controlURL>
                <eventSubURL>/event/{mrreg_id}</eventSubURL>
            </service>
        </serviceList>
    </device>
</root>"#,
        name = xml_escape(&config.name),
        udn = xml_escape(&config.udn),
        cds_type = CDS_SERVICE_TYPE,
        cds_id = CDS_SERVICE_ID,
        cm_type = CM_SERVICE_TYPE,
        cm_id = CM_SERVICE_ID,
        mrreg_type = MRREG_SERVICE_TYPE,
        mrreg_id = MRREG_SERVICE_ID,
    );
    ([(header::CONTENT_TYPE, SOAP_CONTENT_TYPE)], xml)
}

pub async fn cds_scpd_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, SOAP_CONTENT_TYPE)],
        cds_scpd_xml(),
    )
}

pub async fn cm_scpd_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, SOAP_CONTENT_TYPE)],
        cm_scpd_xml(),
    )
}

pub async fn mrreg_scpd_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, SOAP_CONTENT_TYPE)],
        mrreg_scpd_xml(),
    )
}

/// Control endpoint: translate the SOAP envelope into an internal
/// request, route by service id, and render the response or fault.
pub async fn control_handler(
    State(runtime): State<Arc<Runtime>>,
    UrlPath(service): UrlPath<String>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let soap_action = headers
        .get("SOAPACTION")
        .and_then(|v| v.to_str().ok())
        .and_then(parse_soap_action);
    let Some((service_type, action)) = soap_action else {
        return (StatusCode::BAD_REQUEST, "missing SOAPACTION header").into_response();
    };

    let expected_type = match service.as_str() {
        CDS_SERVICE_ID => CDS_SERVICE_TYPE,
        CM_SERVICE_ID => CM_SERVICE_TYPE,
        MRREG_SERVICE_ID => MRREG_SERVICE_TYPE,
        _ => return (StatusCode::BAD_REQUEST, "unknown service").into_response(),
    };
    if service_type != expected_type {
        return (StatusCode::BAD_REQUEST, "service type mismatch").into_response();
    }

    let request = ActionRequest {
        action,
        service_id: service.clone(),
        udn: runtime.config.server.udn.clone(),
        body,
    };

    let result = match service.as_str() {
        CDS_SERVICE_ID => runtime.cds.process_action(&request).await,
        CM_SERVICE_ID => connection_manager_action(&request),
        MRREG_SERVICE_ID => runtime.mrreg.process_action(&request),
        _ => unreachable!(),
    };

    match result {
        Ok(xml) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, SOAP_CONTENT_TYPE),
                (header::HeaderName::from_static("ext"), ""),
            ],
            xml,
        )
            .into_response(),
        Err(Error::Upnp(e)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, SOAP_CONTENT_TYPE)],
            fault_response(&e),
        )
            .into_response(),
        Err(e) => {
            warn!("action {} failed: {}", request.action, e);
            let fault = UpnpError::action_failed("action failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, SOAP_CONTENT_TYPE)],
                fault_response(&fault),
            )
                .into_response()
        }
    }
}

/// ConnectionManager stub: empty protocol-info lists.
fn connection_manager_action(request: &ActionRequest) -> crate::error::Result<String> {
    use crate::web::soap::action_response;
    match request.action.as_str() {
        "GetProtocolInfo" => Ok(action_response(
            &request.action,
            CM_SERVICE_TYPE,
            &[("Source", String::new()), ("Sink", String::new())],
        )),
        "GetCurrentConnectionIDs" => Ok(action_response(
            &request.action,
            CM_SERVICE_TYPE,
            &[("ConnectionIDs", "0".to_string())],
        )),
        other => Err(UpnpError::invalid_action(format!("unrecognized action: {}", other)).into()),
    }
}

/// GENA subscription endpoint shared by all services.
pub async fn event_handler(
    State(runtime): State<Arc<Runtime>>,
    UrlPath(service): UrlPath<String>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    let method = method.as_str().to_string();
    match method.as_str() {
        "SUBSCRIBE" => {
            if let Some(sid) = headers.get("SID").and_then(|v| v.to_str().ok()) {
                // Renewal.
                debug!("subscription renewal for {}", sid);
                return subscription_ok(sid);
            }
            let Some(callback) = headers.get("CALLBACK").and_then(|v| v.to_str().ok()) else {
                warn!("subscription request missing CALLBACK header");
                return StatusCode::PRECONDITION_FAILED.into_response();
            };
            info!("subscription request for {} from {}", service, callback);
            match service.as_str() {
                CDS_SERVICE_ID => match runtime.cds.subscribe(callback.to_string()).await {
                    Ok(sid) => subscription_ok(&sid),
                    Err(e) => {
                        warn!("subscription failed: {}", e);
                        StatusCode::INTERNAL_SERVER_ERROR.into_response()
                    }
                },
                MRREG_SERVICE_ID => {
                    let sid = format!("uuid:{}", uuid::Uuid::new_v4());
                    let properties = runtime.mrreg.initial_event_properties();
                    send_initial_event(callback.to_string(), sid.clone(), properties);
                    subscription_ok(&sid)
                }
                CM_SERVICE_ID => {
                    let sid = format!("uuid:{}", uuid::Uuid::new_v4());
                    subscription_ok(&sid)
                }
                _ => StatusCode::NOT_FOUND.into_response(),
            }
        }
        "UNSUBSCRIBE" => {
            if let Some(sid) = headers.get("SID").and_then(|v| v.to_str().ok()) {
                if service == CDS_SERVICE_ID {
                    runtime.cds.unsubscribe(sid);
                }
            }
            StatusCode::OK.into_response()
        }
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}

fn subscription_ok(sid: &str) -> Response {
    (
        StatusCode::OK,
        [
            (header::HeaderName::from_static("sid"), sid.to_string()),
            (
                header::HeaderName::from_static("timeout"),
                "Second-1800".to_string(),
            ),
            (header::CONTENT_LENGTH, "0".to_string()),
        ],
        "",
    )
        .into_response()
}

fn send_initial_event(callback: String, sid: String, properties: Vec<(String, String)>) {
    tokio::spawn(async move {
        let mut body = String::from(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<e:propertyset xmlns:e="urn:schemas-upnp-org:event-1-0">"#,
        );
        for (name, value) in &properties {
            body.push_str(&format!(
                "<e:property><{name}>{}</{name}></e:property>",
                xml_escape(value)
            ));
        }
        body.push_str("</e:propertyset>");

        let url = callback.trim_start_matches('<').trim_end_matches('>');
        let client = reqwest::Client::new();
        let result = client
            .request(reqwest::Method::from_bytes(b"NOTIFY").unwrap(), url)
            .header("CONTENT-TYPE", "text/xml; charset=\"utf-8\"")
            .header("NT", "upnp:event")
            .header("NTS", "upnp:propchange")
            .header("SID", sid)
            .header("SEQ", "0")
            .body(body)
            .send()
            .await;
        if let Err(e) = result {
            warn!("failed to send initial event to {}: {}", url, e);
        }
    });
}

#[derive(Debug, Deserialize)]
pub struct MediaQuery {
    pub object_id: i64,
    #[serde(default)]
    pub res_id: usize,
}

/// Media resource endpoint. Resource 0 is the primary content; an
/// active item's action runs before the content is served.
pub async fn serve_media(
    State(runtime): State<Arc<Runtime>>,
    Query(query): Query<MediaQuery>,
    headers: HeaderMap,
) -> Result<Response, Error> {
    let mut obj = runtime.storage.load_object(query.object_id).await?;

    // Virtual reflections serve their physical original.
    if let Some(ref_id) = obj.ref_id {
        if obj.is_item() && !obj.is_external_url() {
            obj = runtime.storage.load_object(ref_id).await?;
        }
    }

    if obj.is_external_url() {
        return Ok(Redirect::temporary(&obj.location).into_response());
    }
    if !obj.is_item() {
        return Err(Error::NotFound);
    }
    if query.res_id >= obj.resources.len().max(1) {
        return Err(Error::NotFound);
    }

    if obj.is_active_item() {
        if let Err(e) = run_active_item(&runtime, &obj).await {
            warn!("active item action failed: {}", e);
        }
        // Re-read: the action may have rewritten the metadata.
        obj = runtime.storage.load_object(obj.id).await?;
    }

    if !obj.get_flag(OBJECT_FLAG_PLAYED) {
        let mut played = obj.clone();
        played.set_flag(OBJECT_FLAG_PLAYED, true);
        if let Err(e) = runtime.storage.update_object(&played).await {
            debug!("could not persist played flag: {}", e);
        }
    }

    serve_file(&obj, &headers).await
}

/// Execute an active item's action with a DIDL-Lite snapshot on stdin
/// and fold its stdout back into the catalog.
async fn run_active_item(runtime: &Arc<Runtime>, obj: &CdsObject) -> crate::error::Result<()> {
    let Some(item) = obj.as_item() else {
        return Ok(());
    };
    let ItemKind::Active { action, .. } = &item.kind else {
        return Ok(());
    };

    let ctx = DidlContext {
        base_url: runtime.base_url(),
        string_limit: None,
        extend_protocolinfo: false,
    };
    let input = render_object(&ctx, obj);

    let mut child = tokio::process::Command::new(action)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::null())
        .spawn()?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(input.as_bytes()).await?;
        drop(stdin);
    }
    let output = tokio::time::timeout(std::time::Duration::from_secs(30), child.wait_with_output())
        .await
        .map_err(|_| Error::other(format!("action {} timed out", action)))??;
    if !output.status.success() {
        return Err(Error::other(format!(
            "action {} exited with {}",
            action, output.status
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let update = parse_active_item_update(&stdout);
    if update.is_empty() {
        return Ok(());
    }

    let mut updated = obj.clone();
    if let Some(title) = update.title {
        updated.title = title;
    }
    if let Some(description) = update.description {
        updated.set_metadata(crate::cds::object::MD_DESCRIPTION, description);
    }
    if let Some(mime_type) = update.mime_type {
        if let Some(data) = updated.as_item_mut() {
            data.mime_type = mime_type;
        }
    }
    if let Some(data) = updated.as_item_mut() {
        if let ItemKind::Active { action, state } = &mut data.kind {
            if let Some(new_action) = update.action {
                *action = new_action;
            }
            if let Some(new_state) = update.state {
                *state = new_state;
            }
        }
    }

    if !obj.equals(&updated, true) {
        updated.validate()?;
        runtime.content.update_object(&updated).await?;
    }
    Ok(())
}

async fn serve_file(obj: &CdsObject, headers: &HeaderMap) -> Result<Response, Error> {
    let mime_type = obj.mime_type().unwrap_or("application/octet-stream").to_string();
    let mut file = File::open(&obj.location).await?;
    let file_size = file.metadata().await?.len();
    if file_size == 0 {
        return Ok((
            StatusCode::OK,
            [(header::CONTENT_TYPE, mime_type)],
            Vec::<u8>::new(),
        )
            .into_response());
    }

    let mut builder = Response::builder()
        .header(header::CONTENT_TYPE, &mime_type)
        .header(header::ACCEPT_RANGES, "bytes");

    let (start, end) = if let Some(range_header) = headers.get(header::RANGE) {
        let range = range_header.to_str().map_err(|_| Error::InvalidRange)?;
        debug!("range request: {}", range);
        parse_range_header(range, file_size)?
    } else {
        (0, file_size - 1)
    };

    let len = end - start + 1;
    let status = if len < file_size {
        builder = builder.header(
            header::CONTENT_RANGE,
            format!("bytes {}-{}/{}", start, end, file_size),
        );
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };
    builder = builder.header(header::CONTENT_LENGTH, len);

    file.seek(std::io::SeekFrom::Start(start)).await?;
    let stream = ReaderStream::with_capacity(file.take(len), 64 * 1024);
    let body = Body::from_stream(stream);

    builder
        .status(status)
        .body(body)
        .map_err(|e| Error::other(e.to_string()))
}

/// Parse a Range header; only the first range of a set is honored.
fn parse_range_header(range_str: &str, file_size: u64) -> Result<(u64, u64), Error> {
    let range_part = range_str.strip_prefix("bytes=").ok_or(Error::InvalidRange)?;
    let first_range = range_part.split(',').next().ok_or(Error::InvalidRange)?;

    let (start_str, end_str) = first_range.split_once('-').ok_or(Error::InvalidRange)?;

    let start = if start_str.is_empty() {
        // Suffix range: the last N bytes.
        let suffix_len: u64 = end_str.parse().map_err(|_| Error::InvalidRange)?;
        file_size.saturating_sub(suffix_len)
    } else {
        start_str.parse().map_err(|_| Error::InvalidRange)?
    };

    let end = if end_str.is_empty() || start_str.is_empty() {
        file_size - 1
    } else {
        let parsed: u64 = end_str.parse().map_err(|_| Error::InvalidRange)?;
        parsed.min(file_size - 1)
    };

    if start > end || start >= file_size {
        return Err(Error::InvalidRange);
    }
    Ok((start, end))
}

fn cds_scpd_xml() -> &'static str {
    r#"<?xml version="1.0" encoding="UTF-8"?>
<scpd xmlns="urn:schemas-upnp-org:service-1-0">
    <specVersion><major>1</major><minor>0</minor></specVersion>
    <actionList>
        <action>
            <name>Browse</name>
            <argumentList>
                <argument><name>ObjectID</name><direction>in</direction><relatedStateVariable>A_ARG_TYPE_ObjectID</relatedStateVariable></argument>
                <argument><name>BrowseFlag</name><direction>in</direction><relatedStateVariable>A_ARG_TYPE_BrowseFlag</relatedStateVariable></argument>
                <argument><name>Filter</name><direction>in</direction><relatedStateVariable>A_ARG_TYPE_Filter</relatedStateVariable></argument>
                <argument><name>StartingIndex</name><direction>in</direction><relatedStateVariable>A_ARG_TYPE_Index</relatedStateVariable></argument>
                <argument><name>RequestedCount</name><direction>in</direction><relatedStateVariable>A_ARG_TYPE_Count</relatedStateVariable></argument>
                <argument><name>SortCriteria</name><direction>in</direction><relatedStateVariable>A_ARG_TYPE_SortCriteria</relatedStateVariable></argument>
                <argument><name>Result</name><direction>out</direction><relatedStateVariable>A_ARG_TYPE_Result</relatedStateVariable></argument>
                <argument><name>NumberReturned</name><direction>out</direction><relatedStateVariable>A_ARG_TYPE_Count</relatedStateVariable></argument>
                <argument><name>TotalMatches</name><direction>out</direction><relatedStateVariable>A_ARG_TYPE_Count</relatedStateVariable></argument>
                <argument><name>UpdateID</name><direction>out</direction><relatedStateVariable>A_ARG_TYPE_UpdateID</relatedStateVariable></argument>
            </argumentList>
        </action>
        <action>
            <name>GetSearchCapabilities</name>
            <argumentList>
                <argument><name>SearchCaps</name><direction>out</direction><relatedStateVariable>SearchCapabilities</relatedStateVariable></argument>
            </argumentList>
        </action>
        <action>
            <name>GetSortCapabilities</name>
            <argumentList>
                <argument><name>SortCaps</name><direction>out</direction><relatedStateVariable>SortCapabilities</relatedStateVariable></argument>
            </argumentList>
        </action>
        <action>
            <name>GetSystemUpdateID</name>
            <argumentList>
                <argument><name>Id</name><direction>out</direction><relatedStateVariable>SystemUpdateID</relatedStateVariable></argument>
            </argumentList>
        </action>
    </actionList>
    <serviceStateTable>
        <stateVariable sendEvents="no"><name>A_ARG_TYPE_ObjectID</name><dataType>string</dataType></stateVariable>
        <stateVariable sendEvents="no"><name>A_ARG_TYPE_BrowseFlag</name><dataType>string</dataType></stateVariable>
        <stateVariable sendEvents="no"><name>A_ARG_TYPE_Filter</name><dataType>string</dataType></stateVariable>
        <stateVariable sendEvents="no"><name>A_ARG_TYPE_Index</name><dataType>ui4</dataType></stateVariable>
        <stateVariable sendEvents="no"><name>A_ARG_TYPE_Count</name><dataType>ui4</dataType></stateVariable>
        <stateVariable sendEvents="no"><name>A_ARG_TYPE_SortCriteria</name><dataType>string</dataType></stateVariable>
        <stateVariable sendEvents="no"><name>A_ARG_TYPE_Result</name><dataType>string</dataType></stateVariable>
        <stateVariable sendEvents="no"><name>A_ARG_TYPE_UpdateID</name><dataType>ui4</dataType></stateVariable>
        <stateVariable sendEvents="no"><name>SearchCapabilities</name><dataType>string</dataType></stateVariable>
        <stateVariable sendEvents="no"><name>SortCapabilities</name><dataType>string</dataType></stateVariable>
        <stateVariable sendEvents="yes"><name>SystemUpdateID</name><dataType>ui4</dataType></stateVariable>
        <stateVariable sendEvents="yes"><name>ContainerUpdateIDs</name><dataType>string</dataType></stateVariable>
    </serviceStateTable>
</scpd>"#
}

fn cm_scpd_xml() -> &'static str {
    r#"<?xml version="1.0" encoding="UTF-8"?>
<scpd xmlns="urn:schemas-upnp-org:service-1-0">
    <specVersion><major>1</major><minor>0</minor></specVersion>
    <actionList>
        <action>
            <name>GetProtocolInfo</name>
            <argumentList>
                <argument><name>Source</name><direction>out</direction><relatedStateVariable>SourceProtocolInfo</relatedStateVariable></argument>
                <argument><name>Sink</name><direction>out</direction><relatedStateVariable>SinkProtocolInfo</relatedStateVariable></argument>
            </argumentList>
        </action>
        <action>
            <name>GetCurrentConnectionIDs</name>
            <argumentList>
                <argument><name>ConnectionIDs</name><direction>out</direction><relatedStateVariable>CurrentConnectionIDs</relatedStateVariable></argument>
            </argumentList>
        </action>
    </actionList>
    <serviceStateTable>
        <stateVariable sendEvents="yes"><name>SourceProtocolInfo</name><dataType>string</dataType></stateVariable>
        <stateVariable sendEvents="yes"><name>SinkProtocolInfo</name><dataType>string</dataType></stateVariable>
        <stateVariable sendEvents="yes"><name>CurrentConnectionIDs</name><dataType>string</dataType></stateVariable>
    </serviceStateTable>
</scpd>"#
}

fn mrreg_scpd_xml() -> &'static str {
    r#"<?xml version="1.0" encoding="UTF-8"?>
<scpd xmlns="urn:schemas-upnp-org:service-1-0">
    <specVersion><major>1</major><minor>0</minor></specVersion>
    <actionList>
        <action>
            <name>IsAuthorized</name>
            <argumentList>
                <argument><name>DeviceID</name><direction>in</direction><relatedStateVariable>A_ARG_TYPE_DeviceID</relatedStateVariable></argument>
                <argument><name>Result</name><direction>out</direction><relatedStateVariable>A_ARG_TYPE_Result</relatedStateVariable></argument>
            </argumentList>
        </action>
        <action>
            <name>IsValidated</name>
            <argumentList>
                <argument><name>DeviceID</name><direction>in</direction><relatedStateVariable>A_ARG_TYPE_DeviceID</relatedStateVariable></argument>
                <argument><name>Result</name><direction>out</direction><relatedStateVariable>A_ARG_TYPE_Result</relatedStateVariable></argument>
            </argumentList>
        </action>
    </actionList>
    <serviceStateTable>
        <stateVariable sendEvents="no"><name>A_ARG_TYPE_DeviceID</name><dataType>string</dataType></stateVariable>
        <stateVariable sendEvents="no"><name>A_ARG_TYPE_Result</name><dataType>int</dataType></stateVariable>
        <stateVariable sendEvents="yes"><name>AuthorizationGrantedUpdateID</name><dataType>ui4</dataType></stateVariable>
        <stateVariable sendEvents="yes"><name>AuthorizationDeniedUpdateID</name><dataType>ui4</dataType></stateVariable>
        <stateVariable sendEvents="yes"><name>ValidationSucceededUpdateID</name><dataType>ui4</dataType></stateVariable>
        <stateVariable sendEvents="yes"><name>ValidationRevokedUpdateID</name><dataType>ui4</dataType></stateVariable>
    </serviceStateTable>
</scpd>"#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_range_header_variants() {
        assert_eq!(parse_range_header("bytes=0-499", 1000).unwrap(), (0, 499));
        assert_eq!(parse_range_header("bytes=500-", 1000).unwrap(), (500, 999));
        assert_eq!(parse_range_header("bytes=-200", 1000).unwrap(), (800, 999));
        assert_eq!(parse_range_header("bytes=0-5000", 1000).unwrap(), (0, 999));
        assert!(parse_range_header("bytes=1000-", 1000).is_err());
        assert!(parse_range_header("chunks=0-1", 1000).is_err());
    }
}
