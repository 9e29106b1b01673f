//! UDP transport: one socket per peer, receive loop, 1 Hz tick task, and the
//! fan-out of core actions to the network and the shell.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use lsnp_core::{LsnpCore, Notification, OutboundAction};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

/// How the peer addresses the rest of the segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Bind a distinct loopback address; "broadcast" stays on loopback.
    Simulate,
    /// Bind the interface address and use the limited broadcast address.
    Broadcast,
}

impl Mode {
    pub fn parse(s: &str) -> Option<Mode> {
        match s {
            "simulate" => Some(Mode::Simulate),
            "broadcast" => Some(Mode::Broadcast),
            _ => None,
        }
    }
}

pub fn now_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Best-effort local interface address, for broadcast mode without `--ip`.
/// The connect never sends a packet; it only selects a route.
pub fn detect_local_ip() -> Ipv4Addr {
    if let Ok(sock) = std::net::UdpSocket::bind(("0.0.0.0", 0)) {
        if sock.connect(("8.8.8.8", 80)).is_ok() {
            if let Ok(addr) = sock.local_addr() {
                if let IpAddr::V4(ip) = addr.ip() {
                    return ip;
                }
            }
        }
    }
    Ipv4Addr::LOCALHOST
}

pub async fn bind_socket(ip: Ipv4Addr, port: u16) -> std::io::Result<UdpSocket> {
    let std_sock = std::net::UdpSocket::bind((ip, port))?;
    std_sock.set_broadcast(true)?;
    std_sock.set_nonblocking(true)?;
    UdpSocket::from_std(std_sock)
}

/// Where `Broadcast` actions go for the given mode.
pub fn broadcast_target(mode: Mode, port: u16) -> SocketAddr {
    let ip = match mode {
        Mode::Broadcast => Ipv4Addr::BROADCAST,
        // Loopback-wide; reaches the other 127.0.0.x bindings in simulation.
        Mode::Simulate => Ipv4Addr::new(127, 255, 255, 255),
    };
    SocketAddr::from((ip, port))
}

/// Perform one batch of core actions: sends are best-effort, notifications
/// go to the shell printer, received files land in the working directory.
pub async fn dispatch(
    socket: &UdpSocket,
    bcast: SocketAddr,
    actions: Vec<OutboundAction>,
    notify_tx: &mpsc::UnboundedSender<Notification>,
) {
    for action in actions {
        match action {
            OutboundAction::Unicast(addr, bytes) => {
                if let Err(err) = socket.send_to(&bytes, addr).await {
                    debug!(%addr, %err, "unicast send failed");
                }
            }
            OutboundAction::Broadcast(bytes) => {
                if let Err(err) = socket.send_to(&bytes, bcast).await {
                    debug!(%bcast, %err, "broadcast send failed");
                }
            }
            OutboundAction::Notify(note) => {
                if let Notification::FileReceived { filename, data, .. } = &note {
                    write_received_file(filename, data).await;
                }
                let _ = notify_tx.send(note);
            }
        }
    }
}

/// Remote filenames are untrusted; only the final path component is kept.
async fn write_received_file(filename: &str, data: &[u8]) {
    let safe = Path::new(filename)
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_owned());
    let path = format!("received_{safe}");
    if let Err(err) = tokio::fs::write(&path, data).await {
        warn!(%path, %err, "could not write received file");
    }
}

/// Blocking receive loop: every datagram goes through the core.
pub async fn run_recv(
    socket: Arc<UdpSocket>,
    core: Arc<Mutex<LsnpCore>>,
    bcast: SocketAddr,
    notify_tx: mpsc::UnboundedSender<Notification>,
) -> std::io::Result<()> {
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let (n, from) = socket.recv_from(&mut buf).await?;
        let actions = {
            let mut core = core.lock().await;
            core.handle_datagram(&buf[..n], from, now_epoch())
        };
        dispatch(&socket, bcast, actions, &notify_tx).await;
    }
}

/// 1 Hz tick task: presence, pruning, and retransmission timers.
pub async fn run_tick(
    socket: Arc<UdpSocket>,
    core: Arc<Mutex<LsnpCore>>,
    bcast: SocketAddr,
    notify_tx: mpsc::UnboundedSender<Notification>,
) {
    loop {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let actions = {
            let mut core = core.lock().await;
            core.tick(now_epoch())
        };
        dispatch(&socket, bcast, actions, &notify_tx).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parsing() {
        assert_eq!(Mode::parse("simulate"), Some(Mode::Simulate));
        assert_eq!(Mode::parse("broadcast"), Some(Mode::Broadcast));
        assert_eq!(Mode::parse("mesh"), None);
    }

    #[test]
    fn broadcast_targets_per_mode() {
        assert_eq!(
            broadcast_target(Mode::Broadcast, 50999).to_string(),
            "255.255.255.255:50999"
        );
        assert_eq!(
            broadcast_target(Mode::Simulate, 50999).to_string(),
            "127.255.255.255:50999"
        );
    }
}
