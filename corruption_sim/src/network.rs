use std::io::{self, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use corruption_schema::{encode_sync_frame, RegionSyncFrame};
use crossbeam_channel::{unbounded, Sender};

/// Broadcasts length-prefixed sync frames to every connected client.
pub struct SyncServer {
    sender: Sender<Vec<u8>>,
    latest_frame: Arc<Mutex<Option<Vec<u8>>>>,
}

impl SyncServer {
    pub fn broadcast(&self, bytes: &[u8]) {
        if let Ok(mut guard) = self.latest_frame.lock() {
            *guard = Some(bytes.to_vec());
        }
        if let Err(err) = self.sender.send(bytes.to_vec()) {
            tracing::error!(target: "corruption::sync", error = %err, "sync.queue_failed");
        }
    }

    pub fn broadcast_frame(&self, frame: &RegionSyncFrame) {
        match encode_sync_frame(frame) {
            Ok(bytes) => self.broadcast(&bytes),
            Err(err) => tracing::warn!(target: "corruption::sync", error = %err, "sync.encode_failed"),
        }
    }
}

pub fn start_sync_server(bind_addr: SocketAddr) -> Option<SyncServer> {
    let listener = match TcpListener::bind(bind_addr) {
        Ok(listener) => listener,
        Err(err) => {
            tracing::warn!(
                target: "corruption::sync",
                bind = %bind_addr,
                error = %err,
                "sync.bind_failed=broadcast_disabled"
            );
            return None;
        }
    };
    if let Err(err) = listener.set_nonblocking(true) {
        tracing::warn!(target: "corruption::sync", error = %err, "sync.nonblocking_failed=broadcast_disabled");
        return None;
    }

    let (sender, receiver) = unbounded::<Vec<u8>>();
    let clients: Arc<Mutex<Vec<TcpStream>>> = Arc::new(Mutex::new(Vec::new()));
    let accept_clients = Arc::clone(&clients);
    let latest_frame: Arc<Mutex<Option<Vec<u8>>>> = Arc::new(Mutex::new(None));
    let accept_latest = Arc::clone(&latest_frame);

    thread::spawn(move || loop {
        match listener.accept() {
            Ok((mut stream, addr)) => {
                tracing::info!(target: "corruption::sync", %addr, "sync.client_connected");
                if let Err(err) = stream.set_nodelay(true) {
                    tracing::warn!(target: "corruption::sync", %addr, error = %err, "sync.nodelay_failed");
                }
                if let Err(err) = stream.set_nonblocking(false) {
                    tracing::warn!(target: "corruption::sync", %addr, error = %err, "sync.blocking_failed");
                }
                let latest = accept_latest.lock().ok().and_then(|guard| guard.clone());
                if let Some(frame) = latest {
                    if let Err(err) = write_frame(&mut stream, &frame) {
                        tracing::warn!(target: "corruption::sync", %addr, error = %err, "sync.initial_frame_failed");
                        continue;
                    }
                }
                if let Ok(mut guard) = accept_clients.lock() {
                    guard.push(stream);
                }
            }
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(err) => {
                tracing::error!(target: "corruption::sync", error = %err, "sync.accept_failed");
                thread::sleep(Duration::from_millis(200));
            }
        }

        while let Ok(frame) = receiver.try_recv() {
            broadcast_frame(&clients, &frame);
        }
    });

    Some(SyncServer {
        sender,
        latest_frame,
    })
}

fn write_frame<W: Write>(stream: &mut W, frame: &[u8]) -> io::Result<()> {
    let len = frame.len() as u32;
    let mut buffer = Vec::with_capacity(4 + frame.len());
    buffer.extend_from_slice(&len.to_le_bytes());
    buffer.extend_from_slice(frame);
    stream.write_all(&buffer)
}

fn broadcast_frame(clients: &Arc<Mutex<Vec<TcpStream>>>, frame: &[u8]) {
    let Ok(mut guard) = clients.lock() else {
        return;
    };
    guard.retain_mut(|stream| match write_frame(stream, frame) {
        Ok(_) => true,
        Err(err) => {
            tracing::warn!(target: "corruption::sync", error = %err, "sync.client_dropped");
            false
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_are_length_prefixed_little_endian() {
        let mut out = Vec::new();
        write_frame(&mut out, b"abc").expect("write");
        assert_eq!(out, vec![3, 0, 0, 0, b'a', b'b', b'c']);
    }
}
