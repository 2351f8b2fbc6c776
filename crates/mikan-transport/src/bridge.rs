use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use mikan_core::{
    AccountIdentity, ConnectionState, ConnectionUpdate, DisconnectReason, IpcMessage,
    IpcMessageContent, SessionId, TransportCommand, TransportEvent,
};
use serde_json::Value;
use tokio::process::Command;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::process::ProcessHandle;

const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

pub(crate) type IdentitySlot = Arc<RwLock<Option<AccountIdentity>>>;

#[derive(Debug)]
pub(crate) struct CommandReply {
    success: bool,
    data: Option<Value>,
    error: Option<String>,
}

impl CommandReply {
    fn into_result(self, command: &'static str) -> Result<Option<Value>> {
        if self.success {
            Ok(self.data)
        } else {
            Err(TransportError::Rejected {
                command,
                reason: self.error.unwrap_or_else(|| "no reason given".to_string()),
            })
        }
    }
}

struct Route {
    generation: u64,
    events: mpsc::Sender<TransportEvent>,
    identity: IdentitySlot,
}

/// Where inbound bridge lines go: replies to their waiting request,
/// everything else to the session named in the envelope.
#[derive(Default)]
pub(crate) struct RouteTable {
    routes: RwLock<HashMap<String, Route>>,
    pending: Mutex<HashMap<String, oneshot::Sender<CommandReply>>>,
    generations: AtomicU64,
}

impl RouteTable {
    pub(crate) async fn register(
        &self,
        session_id: &SessionId,
        events: mpsc::Sender<TransportEvent>,
    ) -> (u64, IdentitySlot) {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let identity = IdentitySlot::default();

        let previous = self.routes.write().await.insert(
            session_id.to_string(),
            Route {
                generation,
                events,
                identity: identity.clone(),
            },
        );
        if previous.is_some() {
            debug!(session_id = %session_id, generation, "Replaced bridge route");
        }

        (generation, identity)
    }

    /// Removes the route only if it still belongs to `generation`, so a
    /// stale handle never unhooks its replacement.
    pub(crate) async fn unregister(&self, session_id: &SessionId, generation: u64) -> bool {
        let mut routes = self.routes.write().await;
        let current = routes
            .get(session_id.as_str())
            .is_some_and(|route| route.generation == generation);
        if current {
            routes.remove(session_id.as_str());
        }
        current
    }

    async fn expect_reply(&self, command_id: String) -> oneshot::Receiver<CommandReply> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(command_id, tx);
        rx
    }

    async fn forget_reply(&self, command_id: &str) {
        self.pending.lock().await.remove(command_id);
    }

    pub(crate) async fn dispatch_line(&self, line: &str) {
        let Some(message) = IpcMessage::from_line(line) else {
            warn!(line, "Unparseable bridge line");
            return;
        };

        let event = match message.content {
            IpcMessageContent::Event(event) => event,
            IpcMessageContent::Command(command) => {
                debug!(command = command.name(), "Ignoring command sent by bridge");
                return;
            }
        };

        if let TransportEvent::CommandResult {
            command_id,
            success,
            data,
            error,
        } = event
        {
            match self.pending.lock().await.remove(&command_id) {
                Some(tx) => {
                    let _ = tx.send(CommandReply {
                        success,
                        data,
                        error,
                    });
                }
                None => debug!(command_id = %command_id, "Reply for unknown or expired command"),
            }
            return;
        }

        let Some(session_id) = message.session_id else {
            match event {
                TransportEvent::Error { error } => warn!(error = %error, "Bridge error"),
                _ => debug!("Dropping bridge event without session id"),
            }
            return;
        };

        let (events, identity) = {
            let routes = self.routes.read().await;
            match routes.get(&session_id) {
                Some(route) => (route.events.clone(), route.identity.clone()),
                None => {
                    debug!(session_id = %session_id, "No route for bridge event");
                    return;
                }
            }
        };

        if let TransportEvent::ConnectionUpdate(ConnectionUpdate {
            connection: Some(ConnectionState::Open),
            me: Some(me),
            ..
        }) = &event
        {
            *identity.write().await = Some(me.clone());
        }

        if events.send(event).await.is_err() {
            debug!(session_id = %session_id, "Session channel closed, dropping event");
        }
    }

    /// Fails every outstanding request and reports a closed connection to
    /// every routed session.
    async fn process_exited(&self) {
        self.pending.lock().await.clear();

        let routes: Vec<(String, mpsc::Sender<TransportEvent>)> = self
            .routes
            .read()
            .await
            .iter()
            .map(|(id, route)| (id.clone(), route.events.clone()))
            .collect();

        for (session_id, events) in routes {
            let update = ConnectionUpdate {
                connection: Some(ConnectionState::Close),
                disconnect: Some(DisconnectReason::ConnectionClosed),
                ..Default::default()
            };
            if events
                .send(TransportEvent::ConnectionUpdate(update))
                .await
                .is_err()
            {
                debug!(session_id = %session_id, "Session channel closed before bridge exit notice");
            }
        }
    }
}

/// The bridge child process shared by every session.
pub struct Bridge {
    dir: PathBuf,
    request_timeout: Duration,
    process: Mutex<Option<ProcessHandle>>,
    router: Mutex<Option<JoinHandle<()>>>,
    table: Arc<RouteTable>,
}

impl Bridge {
    pub fn new(dir: impl Into<PathBuf>, request_timeout: Duration) -> Self {
        Self {
            dir: dir.into(),
            request_timeout,
            process: Mutex::new(None),
            router: Mutex::new(None),
            table: Arc::new(RouteTable::default()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn ensure_dependencies(&self) -> Result<()> {
        let package_json = self.dir.join("package.json");
        let node_modules = self.dir.join("node_modules");

        if !package_json.exists() {
            return Err(TransportError::BunInstallFailed(format!(
                "package.json not found in {}",
                self.dir.display()
            )));
        }

        if !node_modules.exists() {
            info!("Installing bridge dependencies with bun");
            self.run_bun_install().await?;
        }

        Ok(())
    }

    async fn run_bun_install(&self) -> Result<()> {
        let output = Command::new("bun")
            .arg("install")
            .current_dir(&self.dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| TransportError::BunInstallFailed(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TransportError::BunInstallFailed(stderr.to_string()));
        }

        info!("bun install completed successfully");
        Ok(())
    }

    /// Spawns the process unless one is already alive.
    pub async fn start(&self) -> Result<()> {
        let mut process = self.process.lock().await;
        if process.as_mut().is_some_and(ProcessHandle::is_alive) {
            return Ok(());
        }

        self.ensure_dependencies().await?;

        info!(dir = %self.dir.display(), "Starting bridge process");
        let (handle, mut lines) = ProcessHandle::spawn(&self.dir, "bun", &["run", "index.ts"])?;

        let table = self.table.clone();
        let router = tokio::spawn(async move {
            while let Some(line) = lines.recv().await {
                table.dispatch_line(&line).await;
            }
            warn!("Bridge process exited");
            table.process_exited().await;
        });

        if let Some(old) = self.router.lock().await.replace(router) {
            old.abort();
        }
        *process = Some(handle);

        info!("Bridge process started");
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        let Some(process) = self.process.lock().await.take() else {
            return Ok(());
        };

        info!("Stopping bridge process");
        if let Some(router) = self.router.lock().await.take() {
            router.abort();
        }

        let shutdown = IpcMessage::new_command(None, TransportCommand::Shutdown);
        let _ = process.send(&shutdown.to_line()).await;

        match process.shutdown(SHUTDOWN_GRACE).await {
            Ok(Some(status)) => info!(%status, "Bridge process stopped"),
            Ok(None) => warn!("Bridge process did not exit in time, killed"),
            Err(e) => warn!(error = %e, "Failed to stop bridge process"),
        }

        self.table.pending.lock().await.clear();
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.process
            .lock()
            .await
            .as_mut()
            .is_some_and(ProcessHandle::is_alive)
    }

    /// Writes a command without waiting for its result.
    pub async fn send(&self, session_id: Option<&SessionId>, command: TransportCommand) -> Result<()> {
        let message = IpcMessage::new_command(session_id.map(SessionId::as_str), command);
        self.write(&message).await
    }

    /// Writes a command and waits for the matching `CommandResult`.
    pub async fn request(
        &self,
        session_id: Option<&SessionId>,
        command: TransportCommand,
    ) -> Result<Option<Value>> {
        let name = command.name();
        let message = IpcMessage::new_command(session_id.map(SessionId::as_str), command);
        let reply = self.table.expect_reply(message.id.clone()).await;

        if let Err(e) = self.write(&message).await {
            self.table.forget_reply(&message.id).await;
            return Err(e);
        }

        match tokio::time::timeout(self.request_timeout, reply).await {
            Ok(Ok(reply)) => reply.into_result(name),
            Ok(Err(_)) => Err(TransportError::ChannelClosed),
            Err(_) => {
                self.table.forget_reply(&message.id).await;
                Err(TransportError::Timeout(name))
            }
        }
    }

    async fn write(&self, message: &IpcMessage) -> Result<()> {
        if let IpcMessageContent::Command(command) = &message.content {
            debug!(
                command = command.name(),
                session_id = message.session_id.as_deref().unwrap_or("-"),
                "Sending bridge command"
            );
        }

        let process = self.process.lock().await;
        let process = process.as_ref().ok_or(TransportError::ProcessNotRunning)?;
        process.send(&message.to_line()).await
    }

    pub(crate) async fn register(
        &self,
        session_id: &SessionId,
        events: mpsc::Sender<TransportEvent>,
    ) -> (u64, IdentitySlot) {
        self.table.register(session_id, events).await
    }

    pub(crate) async fn unregister(&self, session_id: &SessionId, generation: u64) -> bool {
        self.table.unregister(session_id, generation).await
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        if let Some(router) = self.router.get_mut().take() {
            router.abort();
        }
    }
}
