//! The ContentDirectory service: SOAP action dispatch, SystemUpdateID
//! ownership and GENA event delivery.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::cds::object::{
    CDS_ID_ROOT, OBJECT_FLAG_PLAYED, UPNP_CLASS_MUSIC_ALBUM, UPNP_CLASS_PLAYLIST_CONTAINER,
};
use crate::config::AppConfig;
use crate::database::{
    BrowseParam, Storage, BROWSE_CONTAINERS, BROWSE_DIRECT_CHILDREN, BROWSE_EXACT_CHILDCOUNT,
    BROWSE_HIDE_FS_ROOT, BROWSE_ITEMS, BROWSE_TRACK_SORT,
};
use crate::error::{Result, UpnpError};
use crate::update::UpdateSink;
use crate::web::didl::{render_didl, DidlContext};
use crate::web::soap::{action_response, ActionRequest, CDS_SERVICE_TYPE};

/// One GENA subscription.
#[derive(Debug, Clone)]
struct Subscriber {
    sid: String,
    callback_url: String,
    seq: u32,
}

pub struct ContentDirectoryService {
    config: Arc<AppConfig>,
    storage: Arc<dyn Storage>,
    system_update_id: AtomicU32,
    subscribers: Mutex<Vec<Subscriber>>,
    /// `http://ip:port` prefix for resource URLs, fixed at startup.
    base_url: Mutex<String>,
}

impl ContentDirectoryService {
    pub fn new(config: Arc<AppConfig>, storage: Arc<dyn Storage>) -> Arc<Self> {
        Arc::new(Self {
            config,
            storage,
            system_update_id: AtomicU32::new(0),
            subscribers: Mutex::new(Vec::new()),
            base_url: Mutex::new(String::new()),
        })
    }

    pub fn set_base_url(&self, base_url: String) {
        *self.base_url.lock().unwrap() = base_url;
    }

    pub fn system_update_id(&self) -> u32 {
        self.system_update_id.load(Ordering::SeqCst)
    }

    fn didl_context(&self) -> DidlContext {
        DidlContext {
            base_url: self.base_url.lock().unwrap().clone(),
            string_limit: self.config.server.string_limit,
            extend_protocolinfo: false,
        }
    }

    /// Dispatch one control action and render its response envelope.
    pub async fn process_action(&self, request: &ActionRequest) -> Result<String> {
        debug!("CDS action: {}", request.action);
        match request.action.as_str() {
            "Browse" => self.action_browse(request).await,
            "GetSearchCapabilities" => Ok(action_response(
                &request.action,
                CDS_SERVICE_TYPE,
                &[("SearchCaps", String::new())],
            )),
            "GetSortCapabilities" => Ok(action_response(
                &request.action,
                CDS_SERVICE_TYPE,
                &[("SortCaps", String::new())],
            )),
            "GetSystemUpdateID" => Ok(action_response(
                &request.action,
                CDS_SERVICE_TYPE,
                &[("Id", self.system_update_id().to_string())],
            )),
            other => {
                debug!("unrecognized action {}", other);
                Err(UpnpError::invalid_action(format!("unrecognized action: {}", other)).into())
            }
        }
    }

    async fn action_browse(&self, request: &ActionRequest) -> Result<String> {
        let object_id: i64 = request
            .argument("ObjectID")
            .ok_or_else(|| UpnpError::no_such_object("empty object id"))?
            .parse()
            .map_err(|_| UpnpError::no_such_object("invalid object id"))?;

        let browse_flag = request.argument("BrowseFlag").unwrap_or_default();
        let starting_index: u32 = request
            .argument("StartingIndex")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let requested_count: u32 = request
            .argument("RequestedCount")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        // Filter and SortCriteria are accepted and ignored.

        let mut flags = BROWSE_ITEMS | BROWSE_CONTAINERS | BROWSE_EXACT_CHILDCOUNT;
        match browse_flag.as_str() {
            "BrowseDirectChildren" => flags |= BROWSE_DIRECT_CHILDREN,
            "BrowseMetadata" => {}
            other => {
                return Err(
                    UpnpError::invalid_args(format!("invalid browse flag: {}", other)).into(),
                )
            }
        }

        let parent = self
            .storage
            .load_object(object_id)
            .await
            .map_err(|_| UpnpError::no_such_object("no such object"))?;
        if parent.class == UPNP_CLASS_MUSIC_ALBUM || parent.class == UPNP_CLASS_PLAYLIST_CONTAINER {
            flags |= BROWSE_TRACK_SORT;
        }
        if self.config.server.hide_pc_directory {
            flags |= BROWSE_HIDE_FS_ROOT;
        }

        let mut param = BrowseParam::new(object_id, flags);
        param.starting_index = starting_index;
        param.requested_count = requested_count;

        let (mut objects, total_matches) = self
            .storage
            .browse(&param)
            .await
            .map_err(|_| UpnpError::no_such_object("no such object"))?;

        // Mark played objects in the visible title.
        let mark = &self.config.server.mark_played;
        if mark.enabled {
            for obj in objects.iter_mut() {
                if obj.get_flag(OBJECT_FLAG_PLAYED) {
                    obj.title = if mark.prepend {
                        format!("{}{}", mark.string, obj.title)
                    } else {
                        format!("{}{}", obj.title, mark.string)
                    };
                }
            }
        }

        let number_returned = objects.len();
        let didl = render_didl(&self.didl_context(), &objects);

        Ok(action_response(
            "Browse",
            CDS_SERVICE_TYPE,
            &[
                ("Result", didl),
                ("NumberReturned", number_returned.to_string()),
                ("TotalMatches", total_matches.to_string()),
                ("UpdateID", self.system_update_id().to_string()),
            ],
        ))
    }

    // -- eventing ---------------------------------------------------------

    /// Accept a subscription; returns the SID. The initial event carries
    /// SystemUpdateID and the root container's updateID.
    pub async fn subscribe(&self, callback_url: String) -> Result<String> {
        let sid = format!("uuid:{}", uuid::Uuid::new_v4());
        let root_update_id = self
            .storage
            .load_object(CDS_ID_ROOT)
            .await?
            .as_container()
            .map(|c| c.update_id)
            .unwrap_or(0);

        let properties = [
            ("SystemUpdateID".to_string(), self.system_update_id().to_string()),
            (
                "ContainerUpdateIDs".to_string(),
                format!("0,{}", root_update_id),
            ),
        ];
        let body = property_set(&properties);

        let subscriber = Subscriber {
            sid: sid.clone(),
            callback_url,
            seq: 0,
        };
        notify_subscriber(&subscriber, body);

        self.subscribers.lock().unwrap().push(Subscriber {
            seq: 1,
            ..subscriber
        });
        info!("CDS subscription accepted: {}", sid);
        Ok(sid)
    }

    pub fn unsubscribe(&self, sid: &str) {
        self.subscribers.lock().unwrap().retain(|s| s.sid != sid);
        info!("CDS subscription cancelled: {}", sid);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}

impl UpdateSink for ContentDirectoryService {
    /// One emitted CDS event: SystemUpdateID advances exactly once and
    /// every subscriber gets the coalesced ContainerUpdateIDs payload.
    fn send_updates(&self, payload: &str) {
        let system_update_id = self.system_update_id.fetch_add(1, Ordering::SeqCst) + 1;
        let properties = [
            ("SystemUpdateID".to_string(), system_update_id.to_string()),
            ("ContainerUpdateIDs".to_string(), payload.to_string()),
        ];
        let body = property_set(&properties);

        let mut subscribers = self.subscribers.lock().unwrap();
        for subscriber in subscribers.iter_mut() {
            notify_subscriber(subscriber, body.clone());
            subscriber.seq = subscriber.seq.wrapping_add(1);
        }
    }
}

/// Render a GENA property set document.
fn property_set(properties: &[(String, String)]) -> String {
    let mut body = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<e:propertyset xmlns:e="urn:schemas-upnp-org:event-1-0">"#,
    );
    for (name, value) in properties {
        body.push_str(&format!(
            "<e:property><{name}>{}</{name}></e:property>",
            crate::web::soap::xml_escape(value)
        ));
    }
    body.push_str("</e:propertyset>");
    body
}

/// Deliver one NOTIFY to a subscriber callback, fire and forget.
fn notify_subscriber(subscriber: &Subscriber, body: String) {
    let url = subscriber
        .callback_url
        .trim_start_matches('<')
        .trim_end_matches('>')
        .to_string();
    let sid = subscriber.sid.clone();
    let seq = subscriber.seq;

    tokio::spawn(async move {
        let client = reqwest::Client::new();
        let result = client
            .request(reqwest::Method::from_bytes(b"NOTIFY").unwrap(), &url)
            .header("CONTENT-TYPE", "text/xml; charset=\"utf-8\"")
            .header("NT", "upnp:event")
            .header("NTS", "upnp:propchange")
            .header("SID", &sid)
            .header("SEQ", seq.to_string())
            .body(body)
            .send()
            .await;
        match result {
            Ok(response) => debug!("event notification sent, status: {}", response.status()),
            Err(e) => warn!("failed to send event notification to {}: {}", url, e),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cds::CdsObject;
    use crate::database::SqliteStorage;
    use crate::error::Error;
    use tempfile::tempdir;

    async fn service() -> (Arc<ContentDirectoryService>, Arc<dyn Storage>, i64) {
        let dir = tempdir().unwrap();
        let config = Arc::new(AppConfig::default_with_home(dir.path()));
        let storage = SqliteStorage::open_in_memory().await.unwrap();
        storage.init().await.unwrap();
        let storage: Arc<dyn Storage> = Arc::new(storage);

        let mut cont = CdsObject::new_container();
        cont.parent_id = CDS_ID_ROOT;
        cont.title = "Music".into();
        storage.add_object(&mut cont).await.unwrap();

        let service = ContentDirectoryService::new(config, Arc::clone(&storage));
        service.set_base_url("http://127.0.0.1:49152".into());
        (service, storage, cont.id)
    }

    fn browse_request(object_id: i64, flag: &str) -> ActionRequest {
        ActionRequest {
            action: "Browse".into(),
            service_id: "ContentDirectory".into(),
            udn: String::new(),
            body: format!(
                "<u:Browse><ObjectID>{}</ObjectID><BrowseFlag>{}</BrowseFlag>\
                 <StartingIndex>0</StartingIndex><RequestedCount>0</RequestedCount></u:Browse>",
                object_id, flag
            ),
        }
    }

    #[tokio::test]
    async fn test_browse_direct_children_of_root() {
        let (service, _storage, _id) = service().await;
        let response = service
            .process_action(&browse_request(0, "BrowseDirectChildren"))
            .await
            .unwrap();
        assert!(response.contains("<NumberReturned>2</NumberReturned>"));
        assert!(response.contains("<TotalMatches>2</TotalMatches>"));
        assert!(response.contains("Music"));
        assert!(response.contains("PC Directory"));
    }

    #[tokio::test]
    async fn test_browse_metadata_returns_one() {
        let (service, _storage, id) = service().await;
        let response = service
            .process_action(&browse_request(id, "BrowseMetadata"))
            .await
            .unwrap();
        assert!(response.contains("<NumberReturned>1</NumberReturned>"));
    }

    #[tokio::test]
    async fn test_browse_unknown_object_yields_701() {
        let (service, _storage, _id) = service().await;
        let err = service
            .process_action(&browse_request(9999, "BrowseDirectChildren"))
            .await
            .unwrap_err();
        match err {
            Error::Upnp(e) => assert_eq!(e.code, 701),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_browse_bad_flag_yields_402() {
        let (service, _storage, _id) = service().await;
        let err = service
            .process_action(&browse_request(0, "BrowseEverything"))
            .await
            .unwrap_err();
        match err {
            Error::Upnp(e) => assert_eq!(e.code, 402),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_action_yields_401() {
        let (service, _storage, _id) = service().await;
        let request = ActionRequest {
            action: "DestroyObject".into(),
            service_id: "ContentDirectory".into(),
            udn: String::new(),
            body: String::new(),
        };
        let err = service.process_action(&request).await.unwrap_err();
        match err {
            Error::Upnp(e) => assert_eq!(e.code, 401),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_system_update_id_monotonic_per_event() {
        let (service, _storage, _id) = service().await;
        assert_eq!(service.system_update_id(), 0);
        service.send_updates("3,1");
        service.send_updates("3,2,5,1");
        assert_eq!(service.system_update_id(), 2);
    }
}
