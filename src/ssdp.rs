//! SSDP presence: periodic alive notifications and M-SEARCH responses.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::net::UdpSocket;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::runtime::Runtime;

const SSDP_MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);
const SSDP_PORT: u16 = 1900;

const SERVICE_TYPES: [&str; 5] = [
    "upnp:rootdevice",
    "urn:schemas-upnp-org:device:MediaServer:1",
    "urn:schemas-upnp-org:service:ContentDirectory:1",
    "urn:schemas-upnp-org:service:ConnectionManager:1",
    "urn:microsoft.com:service:X_MS_MediaReceiverRegistrar:1",
];

pub fn run_ssdp_service(runtime: Arc<Runtime>) -> Result<()> {
    let search_runtime = Arc::clone(&runtime);
    tokio::spawn(async move {
        if let Err(e) = ssdp_search_responder(search_runtime).await {
            error!("SSDP search responder failed: {}", e);
        }
    });

    tokio::spawn(async move {
        ssdp_announcer(runtime).await;
    });

    info!("SSDP service started");
    Ok(())
}

async fn ssdp_search_responder(runtime: Arc<Runtime>) -> Result<()> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, SSDP_PORT)).await?;
    socket.join_multicast_v4(SSDP_MULTICAST_ADDR, Ipv4Addr::UNSPECIFIED)?;
    info!("listening for M-SEARCH on {}:{}", SSDP_MULTICAST_ADDR, SSDP_PORT);

    let mut buf = vec![0u8; 2048];
    loop {
        let (len, addr) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                warn!("error receiving SSDP data: {}", e);
                tokio::time::sleep(Duration::from_millis(500)).await;
                continue;
            }
        };
        let request = String::from_utf8_lossy(&buf[..len]);
        if !request.contains("M-SEARCH") {
            continue;
        }
        debug!("received M-SEARCH from {}", addr);

        let mut response_types: Vec<&str> = Vec::new();
        if request.contains("ssdp:all") {
            response_types.extend(SERVICE_TYPES);
        } else {
            for service_type in SERVICE_TYPES {
                if request.contains(service_type) {
                    response_types.push(service_type);
                }
            }
            if response_types.is_empty() && request.contains("ssdp:discover") {
                response_types.push("urn:schemas-upnp-org:device:MediaServer:1");
            }
        }

        for service_type in response_types {
            let response = build_search_response(&runtime, service_type);
            if let Err(e) = socket.send_to(response.as_bytes(), addr).await {
                warn!("failed to send M-SEARCH response to {}: {}", addr, e);
            }
        }
    }
}

async fn ssdp_announcer(runtime: Arc<Runtime>) {
    let alive = runtime.config.server.alive.max(1) as u64;
    let mut ticker = interval(Duration::from_secs(alive));
    loop {
        ticker.tick().await;
        if let Err(e) = send_ssdp_alive(&runtime).await {
            error!("failed to send SSDP NOTIFY: {}", e);
        }
    }
}

async fn send_ssdp_alive(runtime: &Arc<Runtime>) -> Result<()> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    let target = SocketAddr::from((SSDP_MULTICAST_ADDR, SSDP_PORT));
    let udn = &runtime.config.server.udn;
    let location = format!("{}/description.xml", runtime.base_url());

    for service_type in SERVICE_TYPES {
        let usn = if service_type == "upnp:rootdevice" {
            format!("{}::upnp:rootdevice", udn)
        } else {
            format!("{}::{}", udn, service_type)
        };
        let message = format!(
            "NOTIFY * HTTP/1.1\r\n\
             HOST: {}:{}\r\n\
             CACHE-CONTROL: max-age=1800\r\n\
             LOCATION: {}\r\n\
             NT: {}\r\n\
             NTS: ssdp:alive\r\n\
             SERVER: OpenCDS/0.1 UPnP/1.0\r\n\
             USN: {}\r\n\r\n",
            SSDP_MULTICAST_ADDR, SSDP_PORT, location, service_type, usn
        );
        if let Err(e) = socket.send_to(message.as_bytes(), target).await {
            warn!("multicast NOTIFY for {} failed: {}", service_type, e);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    debug!("SSDP alive announcements sent");
    Ok(())
}

fn build_search_response(runtime: &Arc<Runtime>, service_type: &str) -> String {
    let udn = &runtime.config.server.udn;
    let usn = if service_type == "upnp:rootdevice" {
        format!("{}::upnp:rootdevice", udn)
    } else {
        format!("{}::{}", udn, service_type)
    };
    format!(
        "HTTP/1.1 200 OK\r\n\
         CACHE-CONTROL: max-age=1800\r\n\
         EXT:\r\n\
         LOCATION: {}/description.xml\r\n\
         SERVER: OpenCDS/0.1 UPnP/1.0\r\n\
         ST: {}\r\n\
         USN: {}\r\n\r\n",
        runtime.base_url(),
        service_type,
        usn
    )
}
