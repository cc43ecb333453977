//! Coalesced ContainerUpdateIDs eventing.
//!
//! Changed containers are buffered and flushed as one event carrying a
//! `id,updateID,...` payload. The worker sleeps until the earlier of two
//! deadlines: BUFFER_INTERVAL after the last idle period (batch while
//! imports are running) and SPEC_INTERVAL after the last emission (the
//! UPnP minimum event interval). An ASAP flush drops the buffer bound
//! but still honors the event-interval minimum.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cds::object::INVALID_OBJECT_ID;
use crate::database::Storage;
use crate::error::Result;

pub const SPEC_INTERVAL: Duration = Duration::from_millis(2000);
pub const BUFFERING_INTERVAL: Duration = Duration::from_millis(3000);
pub const MIN_SLEEP: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FlushLevel {
    None,
    /// Wake the worker; the buffer interval still applies.
    Normal,
    /// Deliver now, subject only to the UPnP minimal event interval.
    Asap,
}

#[derive(Debug, Clone)]
struct UpdateInfo {
    object_id: i64,
    update_id: u32,
}

#[derive(Debug)]
struct UpdateState {
    updates: Vec<UpdateInfo>,
    flush: FlushLevel,
}

/// Consumer of emitted update payloads; implemented by the CDS service,
/// which bumps SystemUpdateID once per event and notifies subscribers.
pub trait UpdateSink: Send + Sync {
    fn send_updates(&self, payload: &str);
}

pub struct UpdateManager {
    state: Mutex<UpdateState>,
    notify: Notify,
    shutdown_flag: AtomicBool,
    storage: Arc<dyn Storage>,
    sink: Arc<dyn UpdateSink>,
}

impl UpdateManager {
    pub fn new(storage: Arc<dyn Storage>, sink: Arc<dyn UpdateSink>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(UpdateState {
                updates: Vec::new(),
                flush: FlushLevel::None,
            }),
            notify: Notify::new(),
            shutdown_flag: AtomicBool::new(false),
            storage,
            sink,
        })
    }

    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager.worker().await;
            info!("update worker shut down");
        })
    }

    /// Queue a container for the next event. The container's updateID is
    /// incremented in storage the first time it becomes pending.
    pub async fn container_changed(&self, object_id: i64) -> Result<()> {
        if object_id == INVALID_OBJECT_ID {
            return Ok(());
        }
        if self.have_update(object_id) {
            return Ok(());
        }

        let mut obj = match self.storage.load_object(object_id).await {
            Ok(obj) => obj,
            Err(crate::error::Error::NotFound) => {
                debug!("ignoring update for vanished object {}", object_id);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let update_id = match obj.as_container_mut() {
            Some(cont) => {
                cont.update_id += 1;
                cont.update_id
            }
            None => return Ok(()),
        };
        self.storage
            .set_container_update_id(object_id, update_id)
            .await?;

        let mut state = self.state.lock().unwrap();
        // A concurrent call may have queued it while storage ran.
        if !state.updates.iter().any(|u| u.object_id == object_id) {
            state.updates.push(UpdateInfo {
                object_id,
                update_id,
            });
            if state.updates.len() == 1 {
                self.notify.notify_one();
            }
        }
        Ok(())
    }

    pub async fn containers_changed(&self, object_ids: &[i64]) -> Result<()> {
        for id in object_ids {
            self.container_changed(*id).await?;
        }
        Ok(())
    }

    /// Ask for earlier delivery of the pending event.
    pub fn flush(&self, level: FlushLevel) {
        let mut state = self.state.lock().unwrap();
        if level > state.flush {
            state.flush = level;
            self.notify.notify_one();
        }
    }

    pub fn shutdown(&self) {
        self.shutdown_flag.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    fn have_update(&self, object_id: i64) -> bool {
        self.state
            .lock()
            .unwrap()
            .updates
            .iter()
            .any(|u| u.object_id == object_id)
    }

    async fn worker(self: Arc<Self>) {
        let mut last_idle = Instant::now();
        let mut last_send = Instant::now();

        while !self.shutdown_flag.load(Ordering::SeqCst) {
            let (pending, flush) = {
                let state = self.state.lock().unwrap();
                (state.updates.len(), state.flush)
            };

            // Nothing to do: sleep until awakened.
            if pending == 0 {
                self.notify.notified().await;
                last_idle = Instant::now();
                continue;
            }

            // Sleep until min(last_idle + BUFFER, last_send + SPEC);
            // an ASAP flush leaves only the SPEC bound standing.
            let now = Instant::now();
            let spec_bound = SPEC_INTERVAL.saturating_sub(now - last_send);
            let sleep = if flush == FlushLevel::Asap {
                spec_bound
            } else {
                spec_bound.min(BUFFERING_INTERVAL.saturating_sub(now - last_idle))
            };

            if sleep >= MIN_SLEEP {
                let _ = tokio::time::timeout(sleep, self.notify.notified()).await;
                continue;
            }

            let updates = {
                let mut state = self.state.lock().unwrap();
                state.flush = FlushLevel::None;
                std::mem::take(&mut state.updates)
            };
            if !updates.is_empty() {
                let payload = render_payload(&updates);
                debug!("sending updates: {}", payload);
                self.sink.send_updates(&payload);
                last_send = Instant::now();
            }
        }

        let leftover = self.state.lock().unwrap().updates.len();
        if leftover > 0 {
            warn!("discarding {} pending container updates at shutdown", leftover);
        }
    }
}

fn render_payload(updates: &[UpdateInfo]) -> String {
    updates
        .iter()
        .map(|u| format!("{},{}", u.object_id, u.update_id))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cds::CdsObject;
    use crate::database::SqliteStorage;
    use std::sync::Mutex as StdMutex;

    struct RecordingSink {
        events: StdMutex<Vec<String>>,
        notify: Notify,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                events: StdMutex::new(Vec::new()),
                notify: Notify::new(),
            })
        }

        async fn wait_for_event(&self) -> String {
            loop {
                if let Some(event) = self.events.lock().unwrap().first().cloned() {
                    return event;
                }
                let _ = tokio::time::timeout(Duration::from_millis(50), self.notify.notified())
                    .await;
            }
        }
    }

    impl UpdateSink for RecordingSink {
        fn send_updates(&self, payload: &str) {
            self.events.lock().unwrap().push(payload.to_string());
            self.notify.notify_one();
        }
    }

    async fn storage_with_container() -> (Arc<dyn Storage>, i64) {
        let storage = SqliteStorage::open_in_memory().await.unwrap();
        storage.init().await.unwrap();
        let storage: Arc<dyn Storage> = Arc::new(storage);
        let mut cont = CdsObject::new_container();
        cont.parent_id = crate::cds::object::CDS_ID_ROOT;
        cont.title = "Music".into();
        storage.add_object(&mut cont).await.unwrap();
        let id = cont.id;
        (storage, id)
    }

    #[tokio::test]
    async fn test_repeated_changes_coalesce_into_one_event() {
        let (storage, id) = storage_with_container().await;
        let sink = RecordingSink::new();
        let manager = UpdateManager::new(Arc::clone(&storage), sink.clone());
        let handle = manager.start();

        for _ in 0..10 {
            manager.container_changed(id).await.unwrap();
        }
        manager.flush(FlushLevel::Asap);

        let event = sink.wait_for_event().await;
        assert_eq!(event, format!("{},1", id));
        assert_eq!(sink.events.lock().unwrap().len(), 1);

        let cont = storage.load_object(id).await.unwrap();
        assert_eq!(cont.as_container().unwrap().update_id, 1);

        manager.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_update_id_advances_across_events() {
        let (storage, id) = storage_with_container().await;
        let sink = RecordingSink::new();
        let manager = UpdateManager::new(Arc::clone(&storage), sink.clone());
        let handle = manager.start();

        manager.container_changed(id).await.unwrap();
        manager.flush(FlushLevel::Asap);
        sink.wait_for_event().await;

        manager.container_changed(id).await.unwrap();
        manager.flush(FlushLevel::Asap);
        loop {
            if sink.events.lock().unwrap().len() >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let events = sink.events.lock().unwrap().clone();
        assert_eq!(events[0], format!("{},1", id));
        assert_eq!(events[1], format!("{},2", id));

        manager.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_non_container_ids_are_ignored() {
        let (storage, _) = storage_with_container().await;
        let sink = RecordingSink::new();
        let manager = UpdateManager::new(storage, sink.clone());

        manager.container_changed(INVALID_OBJECT_ID).await.unwrap();
        manager.container_changed(99999).await.unwrap();
        assert_eq!(manager.state.lock().unwrap().updates.len(), 0);
    }
}
