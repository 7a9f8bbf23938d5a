//! Per-agent session state shared by every tool invocation.
//!
//! An [`AgentContext`] lives as long as the agent identity. It owns the
//! sandbox directory, the cancellation token of the current run, the
//! persistent terminal and the tool-event observers.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::events::{ToolCall, ToolEventSink};
use super::terminal::{CommandOutput, ShellConfig, TerminalSession};
use crate::error::{ContextError, TerminalError};

/// Handle returned by [`AgentContext::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub struct AgentContext {
    agent_id: Uuid,
    agents_root: PathBuf,
    shell: ShellConfig,
    sandbox_root: OnceLock<PathBuf>,
    cancellation: Mutex<CancellationToken>,
    stop_requested: AtomicBool,
    run_active: AtomicBool,
    terminal: tokio::sync::Mutex<Option<Arc<TerminalSession>>>,
    // Held for the whole of one framed command so the FIFO never sees two in flight.
    command_gate: tokio::sync::Mutex<()>,
    observers: RwLock<Vec<(SubscriptionId, ToolEventSink)>>,
    next_subscription: AtomicU64,
}

impl AgentContext {
    /// Create a context whose sandbox will be `<agents_root>/<agent_id>`.
    pub fn new(agent_id: Uuid, agents_root: impl Into<PathBuf>) -> Self {
        Self {
            agent_id,
            agents_root: agents_root.into(),
            shell: ShellConfig::default(),
            sandbox_root: OnceLock::new(),
            cancellation: Mutex::new(CancellationToken::new()),
            stop_requested: AtomicBool::new(false),
            run_active: AtomicBool::new(false),
            terminal: tokio::sync::Mutex::new(None),
            command_gate: tokio::sync::Mutex::new(()),
            observers: RwLock::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
        }
    }

    pub fn with_shell(mut self, shell: ShellConfig) -> Self {
        self.shell = shell;
        self
    }

    pub fn agent_id(&self) -> Uuid {
        self.agent_id
    }

    /// Create the sandbox directory on first call; later calls return the same path.
    pub fn init(&self) -> Result<&Path, ContextError> {
        if let Some(root) = self.sandbox_root.get() {
            return Ok(root.as_path());
        }

        let path = self.agents_root.join(self.agent_id.to_string());
        let creation_failed = |source| ContextError::SandboxCreation {
            path: path.clone(),
            source,
        };
        std::fs::create_dir_all(&path).map_err(creation_failed)?;
        let canonical = path.canonicalize().map_err(creation_failed)?;

        let root = self.sandbox_root.get_or_init(|| canonical);
        tracing::info!(agent_id = %self.agent_id, sandbox = %root.display(), "Initialized agent sandbox");
        Ok(root.as_path())
    }

    /// The sandbox root, if `init` has run.
    pub fn sandbox_root(&self) -> Option<&Path> {
        self.sandbox_root.get().map(PathBuf::as_path)
    }

    /// Token of the current run. Cloned, so it stays valid after `reset`.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Cancel the current run.
    pub fn cancel(&self) {
        self.cancellation_token().cancel();
    }

    /// Cancel the current run only if one is in progress.
    ///
    /// Returns whether anything was cancelled. An idle context keeps its token
    /// intact, so the next run is not born cancelled.
    pub fn cancel_active_run(&self) -> bool {
        if !self.is_run_active() {
            return false;
        }
        self.cancel();
        true
    }

    pub fn is_run_active(&self) -> bool {
        self.run_active.load(Ordering::SeqCst)
    }

    pub(crate) fn set_run_active(&self, active: bool) {
        self.run_active.store(active, Ordering::SeqCst);
    }

    /// Mark that the agent asked to stop looping, and end the current run.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.cancel();
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Prepare for the next run.
    ///
    /// Cancels and replaces the token, clears the stop flag, and disposes the
    /// terminal if a cancelled command is still queued in it.
    pub async fn reset(&self) {
        let previous = std::mem::replace(
            &mut *self
                .cancellation
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
            CancellationToken::new(),
        );
        previous.cancel();
        self.stop_requested.store(false, Ordering::SeqCst);

        let stale = self
            .terminal
            .lock()
            .await
            .as_ref()
            .is_some_and(|t| t.pending_commands() > 0);
        if stale {
            tracing::warn!(
                agent_id = %self.agent_id,
                "Terminal still has unfinished commands after the run, restarting it"
            );
            self.dispose_terminal().await;
        }
    }

    pub fn subscribe(&self, sink: ToolEventSink) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, sink));
        id
    }

    /// Returns false if the id was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    /// Deliver a tool-call event to every observer.
    pub fn emit(&self, call: &ToolCall) {
        let observers: Vec<ToolEventSink> = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, sink)| Arc::clone(sink))
            .collect();
        for sink in observers {
            sink(call);
        }
    }

    /// Current terminal, spawning a fresh one if there is none or it died.
    async fn terminal(&self) -> Result<Arc<TerminalSession>, ContextError> {
        let root = self.init()?.to_path_buf();
        let mut slot = self.terminal.lock().await;

        if let Some(existing) = slot.as_ref() {
            if existing.is_alive() {
                return Ok(Arc::clone(existing));
            }
            tracing::warn!(agent_id = %self.agent_id, pid = ?existing.pid(), "Terminal exited, starting a new one");
            existing.dispose().await;
        }

        let session = Arc::new(TerminalSession::spawn(&root, &self.shell).await?);
        *slot = Some(Arc::clone(&session));
        Ok(session)
    }

    /// Run one command in the persistent terminal, waiting for its result.
    ///
    /// Calls are serialised; a call waiting its turn also observes cancellation.
    pub async fn execute_command(&self, command: &str) -> Result<CommandOutput, ContextError> {
        let token = self.cancellation_token();
        let _gate = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(TerminalError::Cancelled.into()),
            gate = self.command_gate.lock() => gate,
        };

        let terminal = self.terminal().await?;
        Ok(terminal.execute(command, &token).await?)
    }

    /// Write raw input to the live terminal without waiting for anything.
    pub async fn send_input(&self, input: &str) -> Result<(), ContextError> {
        let terminal = self
            .terminal
            .lock()
            .await
            .as_ref()
            .filter(|t| t.is_alive())
            .cloned()
            .ok_or(ContextError::NoTerminal)?;
        Ok(terminal.send_input(input).await?)
    }

    /// Kill the terminal, if any. The next command starts a new one.
    pub async fn dispose_terminal(&self) {
        let session = self.terminal.lock().await.take();
        if let Some(session) = session {
            session.dispose().await;
        }
    }

    /// Whether a live terminal is attached.
    pub async fn has_terminal(&self) -> bool {
        self.terminal
            .lock()
            .await
            .as_ref()
            .is_some_and(|t| t.is_alive())
    }
}

impl std::fmt::Debug for AgentContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentContext")
            .field("agent_id", &self.agent_id)
            .field("sandbox_root", &self.sandbox_root.get())
            .field("stop_requested", &self.stop_requested())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scaffold::events::ToolCallStatus;
    use tempfile::TempDir;

    fn context(dir: &TempDir) -> AgentContext {
        AgentContext::new(Uuid::new_v4(), dir.path())
    }

    #[test]
    fn test_init_creates_sandbox_once() {
        let dir = TempDir::new().expect("tempdir");
        let ctx = context(&dir);
        assert!(ctx.sandbox_root().is_none());

        let root = ctx.init().expect("init").to_path_buf();
        assert!(root.is_dir());
        assert!(root.ends_with(ctx.agent_id().to_string()));
        assert_eq!(ctx.init().expect("second init"), root.as_path());
    }

    #[tokio::test]
    async fn test_reset_replaces_token_and_clears_stop() {
        let dir = TempDir::new().expect("tempdir");
        let ctx = context(&dir);

        let before = ctx.cancellation_token();
        ctx.request_stop();
        assert!(ctx.stop_requested());
        assert!(before.is_cancelled());

        ctx.reset().await;
        assert!(!ctx.stop_requested());
        assert!(!ctx.cancellation_token().is_cancelled());
    }

    #[test]
    fn test_cancel_active_run_ignores_idle_context() {
        let dir = TempDir::new().expect("tempdir");
        let ctx = context(&dir);

        assert!(!ctx.cancel_active_run());
        assert!(!ctx.cancellation_token().is_cancelled());

        ctx.set_run_active(true);
        assert!(ctx.cancel_active_run());
        assert!(ctx.cancellation_token().is_cancelled());
    }

    #[test]
    fn test_observers_receive_until_unsubscribed() {
        let dir = TempDir::new().expect("tempdir");
        let ctx = context(&dir);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink_seen = Arc::clone(&seen);
        let id = ctx.subscribe(Arc::new(move |call: &ToolCall| {
            sink_seen.lock().expect("lock").push(call.status);
        }));

        let call = ToolCall {
            id: Uuid::new_v4(),
            name: "stop".to_string(),
            arguments: String::new(),
            status: ToolCallStatus::Running,
            output: None,
        };
        ctx.emit(&call);
        assert!(ctx.unsubscribe(id));
        assert!(!ctx.unsubscribe(id));
        ctx.emit(&call);

        assert_eq!(seen.lock().expect("lock").len(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminal_persists_between_commands() {
        let dir = TempDir::new().expect("tempdir");
        let ctx = context(&dir);
        assert!(!ctx.has_terminal().await);

        ctx.execute_command("mkdir inner && cd inner").await.expect("cd");
        let pwd = ctx.execute_command("pwd").await.expect("pwd");
        assert!(pwd.output.ends_with("inner"));
        assert!(ctx.has_terminal().await);

        ctx.dispose_terminal().await;
        assert!(!ctx.has_terminal().await);
        assert!(matches!(
            ctx.send_input("y").await,
            Err(ContextError::NoTerminal)
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dead_terminal_is_replaced() {
        let dir = TempDir::new().expect("tempdir");
        let ctx = context(&dir);

        let exited = ctx.execute_command("exit").await;
        assert!(matches!(
            exited,
            Err(ContextError::Terminal(TerminalError::ProcessExited))
        ));

        let echo = ctx.execute_command("echo again").await.expect("fresh shell");
        assert_eq!(echo.output, "again");
        ctx.dispose_terminal().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_reset_restarts_terminal_with_stale_command() {
        let dir = TempDir::new().expect("tempdir");
        let ctx = Arc::new(context(&dir));

        let runner = Arc::clone(&ctx);
        let handle = tokio::spawn(async move { runner.execute_command("sleep 5").await });
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        ctx.cancel();

        let result = handle.await.expect("join");
        assert!(matches!(
            result,
            Err(ContextError::Terminal(TerminalError::Cancelled))
        ));

        ctx.reset().await;
        assert!(!ctx.has_terminal().await);

        let echo = ctx.execute_command("echo ok").await.expect("echo");
        assert_eq!(echo.output, "ok");
        ctx.dispose_terminal().await;
    }
}
