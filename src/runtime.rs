//! Top-level component graph. All subsystems are constructed here and
//! passed their collaborators explicitly; nothing is process-global.

use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::content::ContentManager;
use crate::database::{SqliteStorage, Storage};
use crate::error::Result;
use crate::session::SessionManager;
use crate::update::{FlushLevel, UpdateManager};
use crate::web::cds::ContentDirectoryService;
use crate::web::mrreg::MediaReceiverRegistrarService;

pub struct Runtime {
    pub config: Arc<AppConfig>,
    pub storage: Arc<dyn Storage>,
    pub session_manager: Arc<SessionManager>,
    pub cds: Arc<ContentDirectoryService>,
    pub mrreg: MediaReceiverRegistrarService,
    pub update_manager: Arc<UpdateManager>,
    pub content: Arc<ContentManager>,
    server_ip: IpAddr,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Runtime {
    /// Build the component graph: storage first, then the services that
    /// feed on it, then the managers that drive them.
    pub async fn new(config: Arc<AppConfig>) -> Result<Arc<Self>> {
        let storage = SqliteStorage::new(&config.database_file()).await?;
        storage.init().await?;
        let storage: Arc<dyn Storage> = Arc::new(storage);

        let session_manager = SessionManager::new();
        let cds = ContentDirectoryService::new(Arc::clone(&config), Arc::clone(&storage));
        let update_manager = UpdateManager::new(
            Arc::clone(&storage),
            Arc::clone(&cds) as Arc<dyn crate::update::UpdateSink>,
        );
        let content = ContentManager::new(
            Arc::clone(&config),
            Arc::clone(&storage),
            Arc::clone(&update_manager),
            Arc::clone(&session_manager),
        );

        let server_ip = match config.server.ip {
            Some(ip) => ip,
            None => detect_server_ip(),
        };

        let runtime = Arc::new(Self {
            config,
            storage,
            session_manager,
            cds,
            mrreg: MediaReceiverRegistrarService::new(),
            update_manager,
            content,
            server_ip,
            handles: Mutex::new(Vec::new()),
        });
        runtime.cds.set_base_url(runtime.base_url());
        Ok(runtime)
    }

    /// Spawn the worker tasks and restore persisted autoscans.
    pub async fn start(&self) -> Result<()> {
        let mut handles = self.handles.lock().unwrap();
        handles.push(self.update_manager.start());
        handles.push(self.content.start());
        handles.push(self.session_manager.start_reaper());
        drop(handles);

        self.content.load_accounting(true).await?;
        self.content.autoscan_init().await?;
        info!("runtime started on {}", self.base_url());
        Ok(())
    }

    pub fn server_ip(&self) -> IpAddr {
        self.server_ip
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.server_ip, self.config.server.port)
    }

    /// Orderly shutdown: stop accepting work, flush pending events,
    /// join the workers, close the database.
    pub async fn shutdown(&self) {
        info!("shutting down");
        self.update_manager.flush(FlushLevel::Asap);
        self.content.shutdown();
        self.update_manager.shutdown();

        let handles: Vec<JoinHandle<()>> = self.handles.lock().unwrap().drain(..).collect();
        for handle in handles {
            handle.abort();
            let _ = handle.await;
        }

        self.storage.shutdown().await;
        info!("shutdown complete");
    }
}

/// Best-effort local address discovery: the routing trick of connecting
/// a datagram socket and reading its local address.
fn detect_server_ip() -> IpAddr {
    let fallback: IpAddr = "127.0.0.1".parse().unwrap();
    let socket = match std::net::UdpSocket::bind("0.0.0.0:0") {
        Ok(socket) => socket,
        Err(_) => return fallback,
    };
    if socket.connect("8.8.8.8:80").is_err() {
        warn!("could not determine a server IP, falling back to 127.0.0.1");
        return fallback;
    }
    socket.local_addr().map(|a| a.ip()).unwrap_or(fallback)
}
