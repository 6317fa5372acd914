//! Local-socket listener serving the management process.
//!
//! One manager connection at a time: while one is attached, later
//! connections are refused and simply see their stream close. Outbound
//! sends are best-effort: with no manager attached they fail fast and the
//! caller applies its fail-open policy.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use interprocess::local_socket::{
    prelude::*, GenericFilePath, ListenerOptions, RecvHalf, SendHalf, Stream, ToFsName,
};

use sensor_core::{EventOutbound, FileIdentity, MuteType, SensorEvent};

use crate::messages::{ControlMessage, SensorMessage};

/// Applies manager pushes to the running sensor.
pub trait ControlHandler: Send + Sync {
    fn reply_auth(&self, event_id: u64, allow: bool);
    fn update_mute_list(&self, mute_type: MuteType, identities: Vec<FileIdentity>);
    fn set_log_level(&self, level: &str);
}

struct Shared {
    sender: Mutex<Option<SendHalf>>,
    connected: AtomicBool,
    shutdown: AtomicBool,
    // Bumped per admitted connection; a reader whose epoch has moved on
    // stops applying control messages and leaves teardown to its successor.
    epoch: AtomicU64,
}

impl Shared {
    fn send_frame(&self, frame: &SensorMessage) -> bool {
        let mut guard = match self.sender.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(sender) = guard.as_mut() else {
            return false;
        };

        let mut line = match serde_json::to_vec(frame) {
            Ok(line) => line,
            Err(err) => {
                tracing::error!(error = %err, "failed to encode outbound frame");
                return false;
            }
        };
        line.push(b'\n');

        if let Err(err) = sender.write_all(&line).and_then(|()| sender.flush()) {
            tracing::warn!(error = %err, "manager connection lost on write");
            *guard = None;
            self.connected.store(false, Ordering::SeqCst);
            return false;
        }
        true
    }
}

/// Listener half owned by the agent; stop it to release the socket.
pub struct ChannelServer {
    path: PathBuf,
    shared: Arc<Shared>,
    accept: Option<JoinHandle<()>>,
}

/// Cheap outbound handle for the dispatcher.
#[derive(Clone)]
pub struct ChannelHandle {
    shared: Arc<Shared>,
}

impl ChannelServer {
    /// Bind the socket and start serving manager connections.
    pub fn start(
        path: impl Into<PathBuf>,
        handler: Arc<dyn ControlHandler>,
    ) -> std::io::Result<Self> {
        let path = path.into();

        // A stale socket file from an unclean exit blocks the bind.
        #[cfg(unix)]
        if path.exists() {
            std::fs::remove_file(&path)?;
        }

        let name = path.as_path().to_fs_name::<GenericFilePath>()?;
        let listener = ListenerOptions::new().name(name).create_sync()?;
        tracing::info!(path = %path.display(), "management channel listening");

        let shared = Arc::new(Shared {
            sender: Mutex::new(None),
            connected: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
        });

        let accept_shared = shared.clone();
        let accept = std::thread::spawn(move || {
            for conn in listener.incoming() {
                if accept_shared.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                match conn {
                    Ok(stream) => {
                        let (recv, send) = stream.split();
                        // Single manager at a time; a newcomer while one is
                        // attached is dropped and sees its stream close.
                        let epoch = {
                            let mut guard = match accept_shared.sender.lock() {
                                Ok(guard) => guard,
                                Err(poisoned) => poisoned.into_inner(),
                            };
                            if guard.is_some() {
                                None
                            } else {
                                *guard = Some(send);
                                accept_shared.connected.store(true, Ordering::SeqCst);
                                Some(accept_shared.epoch.fetch_add(1, Ordering::SeqCst) + 1)
                            }
                        };
                        let Some(epoch) = epoch else {
                            tracing::warn!("refusing manager connection, one is already active");
                            continue;
                        };
                        tracing::info!(epoch, "manager connected");
                        let conn_shared = accept_shared.clone();
                        let conn_handler = handler.clone();
                        std::thread::spawn(move || {
                            serve_connection(recv, conn_shared, conn_handler, epoch);
                        });
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "manager accept failed");
                    }
                }
            }
        });

        Ok(Self {
            path,
            shared,
            accept: Some(accept),
        })
    }

    pub fn handle(&self) -> ChannelHandle {
        ChannelHandle {
            shared: self.shared.clone(),
        }
    }

    /// Stop accepting, drop the active manager, remove the socket file.
    pub fn stop(&mut self) {
        if self.shared.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }

        // Wake the accept loop with a throwaway connection.
        if let Ok(name) = self.path.as_path().to_fs_name::<GenericFilePath>() {
            let _ = Stream::connect(name);
        }
        if let Some(handle) = self.accept.take() {
            let _ = handle.join();
        }

        if let Ok(mut guard) = self.shared.sender.lock() {
            *guard = None;
        }
        self.shared.connected.store(false, Ordering::SeqCst);

        #[cfg(unix)]
        let _ = std::fs::remove_file(&self.path);
    }

    pub fn socket_path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ChannelServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn serve_connection(
    recv: RecvHalf,
    shared: Arc<Shared>,
    handler: Arc<dyn ControlHandler>,
    epoch: u64,
) {
    let mut reader = std::io::BufReader::new(recv);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(error = %err, "manager connection lost on read");
                break;
            }
        }
        if shared.shutdown.load(Ordering::SeqCst)
            || shared.epoch.load(Ordering::SeqCst) != epoch
        {
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<ControlMessage>(trimmed) {
            Ok(message) => dispatch_control(&*handler, message),
            Err(err) => {
                tracing::warn!(error = %err, "discarding malformed control frame");
            }
        }
    }

    // A reader whose epoch has been superseded (the send half was cleared
    // on a write error and a new manager admitted) must not tear down its
    // successor's state.
    let mut guard = match shared.sender.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if shared.epoch.load(Ordering::SeqCst) == epoch {
        *guard = None;
        shared.connected.store(false, Ordering::SeqCst);
        tracing::info!(epoch, "manager disconnected");
    }
}

fn dispatch_control(handler: &dyn ControlHandler, message: ControlMessage) {
    match message {
        ControlMessage::ReplyAuth { event_id, allow } => {
            handler.reply_auth(event_id, allow);
        }
        ControlMessage::UpdateMuteList {
            mute_type,
            identities,
        } => match MuteType::from_wire(mute_type) {
            Some(mute_type) => handler.update_mute_list(mute_type, identities),
            None => {
                tracing::warn!(code = mute_type, "ignoring unknown mute list code");
            }
        },
        ControlMessage::SetLogLevel { level } => {
            handler.set_log_level(&level);
        }
    }
}

impl EventOutbound for ChannelHandle {
    fn send_auth(&self, event: &SensorEvent) -> bool {
        self.shared.send_frame(&SensorMessage::Auth {
            event: event.clone(),
        })
    }

    fn send_notify(&self, event: &SensorEvent) {
        let delivered = self.shared.send_frame(&SensorMessage::Notify {
            event: event.clone(),
        });
        if !delivered {
            tracing::debug!(event_id = event.event_id, "notification dropped, no manager");
        }
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }
}
