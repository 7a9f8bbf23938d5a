//! Persistent shell session with sentinel-framed command correlation.
//!
//! A single shell is kept alive across tool calls. Each command is handed to
//! `eval` as one quoted word and followed by an `echo` of a unique sentinel; a
//! background reader task watches the shell's output and, when a sentinel line
//! arrives, resolves the oldest outstanding command with everything that was
//! printed since the previous sentinel.
//!
//! Quoting keeps comments, trailing `&` and syntax errors inside the command:
//! the sentinel always runs and the shell survives. Completions arrive in
//! submission order. Callers must not issue two `execute` calls concurrently against one
//! session; [`crate::scaffold::AgentContext`] serialises them.

use std::collections::VecDeque;
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::TerminalError;

/// Fixed prefix of every sentinel. The per-command token follows it directly.
pub const SENTINEL_MARKER: &str = "__END_OF_COMMAND__";

/// Number of output lines retained in the session-wide log.
const OUTPUT_LOG_LIMIT: usize = 2000;

/// How long `dispose` waits for the shell to honour `exit`.
const GRACEFUL_EXIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Shell program and start-up settings.
#[derive(Debug, Clone)]
pub struct ShellConfig {
    pub program: String,
    pub args: Vec<String>,
    /// Written to the shell once, right after spawn.
    pub init_script: Option<String>,
    pub env: Vec<(String, String)>,
}

impl Default for ShellConfig {
    #[cfg(not(windows))]
    fn default() -> Self {
        Self {
            program: "bash".to_string(),
            args: vec!["--noprofile".to_string(), "--norc".to_string()],
            // Merge stderr into stdout so both arrive in order on one stream.
            init_script: Some("exec 2>&1".to_string()),
            env: vec![
                ("PS1".to_string(), String::new()),
                ("PS2".to_string(), String::new()),
                ("TERM".to_string(), "dumb".to_string()),
            ],
        }
    }

    #[cfg(windows)]
    fn default() -> Self {
        Self {
            program: "cmd.exe".to_string(),
            args: vec!["/Q".to_string(), "/K".to_string()],
            init_script: None,
            env: Vec::new(),
        }
    }
}

impl ShellConfig {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            init_script: None,
            env: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_init_script(mut self, script: impl Into<String>) -> Self {
        self.init_script = Some(script.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Result of one framed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Combined output, trimmed, sentinel removed.
    pub output: String,
    /// `Some(0)` on success, the shell's status on failure, `None` if unknown.
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        matches!(self.exit_code, None | Some(0))
    }
}

impl fmt::Display for CommandOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.output.is_empty() {
            f.write_str("[No output]")?;
        } else {
            f.write_str(&self.output)?;
        }
        match self.exit_code {
            Some(code) if code != 0 => write!(f, "\n[exit code: {}]", code),
            _ => Ok(()),
        }
    }
}

fn new_sentinel() -> String {
    format!("{}{}", SENTINEL_MARKER, Uuid::new_v4().simple())
}

/// Build the text written to the shell for one command.
///
/// Both branches echo the sentinel so a failing command still completes its
/// slot; the failure branch appends the exit status.
pub fn frame_command(command: &str, sentinel: &str) -> String {
    let command = command.trim_end();

    if cfg!(windows) {
        let command = command.trim_end_matches(';').trim_end();
        format!(
            "{} 2>&1 && echo {} || call echo {}:%^errorlevel%",
            command, sentinel, sentinel
        )
    } else {
        format!(
            "eval '{}' && echo {} || echo {}:$?",
            command.replace('\'', r"'\''"),
            sentinel,
            sentinel
        )
    }
}

/// A sentinel found in an output line.
#[derive(Debug, PartialEq, Eq)]
struct SentinelMatch<'a> {
    /// Text printed before the sentinel on the same line.
    before: &'a str,
    sentinel: &'a str,
    exit_code: i32,
}

/// Match a sentinel that ends the line, optionally followed by `:<status>`.
///
/// A marker anywhere else (an echoed command line, `grep` output) is not a
/// completion.
fn find_sentinel(line: &str) -> Option<SentinelMatch<'_>> {
    let start = line.rfind(SENTINEL_MARKER)?;
    let after_marker = start + SENTINEL_MARKER.len();
    let token_len = line[after_marker..]
        .bytes()
        .take_while(u8::is_ascii_hexdigit)
        .count();
    if token_len == 0 {
        return None;
    }
    let end = after_marker + token_len;

    let exit_code = match line[end..].trim_end() {
        "" => 0,
        rest => rest.strip_prefix(':')?.parse().ok()?,
    };

    Some(SentinelMatch {
        before: &line[..start],
        sentinel: &line[start..end],
        exit_code,
    })
}

struct PendingCommand {
    sentinel: String,
    reply: oneshot::Sender<CommandOutput>,
}

/// Shared state between the foreground `execute` calls and the reader task.
#[derive(Default)]
pub(crate) struct Correlator {
    pending: VecDeque<PendingCommand>,
    current: String,
    log: VecDeque<String>,
    closed: bool,
}

impl Correlator {
    fn enqueue(&mut self, sentinel: String) -> Result<oneshot::Receiver<CommandOutput>, TerminalError> {
        if self.closed {
            return Err(TerminalError::ProcessExited);
        }
        let (reply, receiver) = oneshot::channel();
        self.pending.push_back(PendingCommand { sentinel, reply });
        Ok(receiver)
    }

    fn record(&mut self, line: &str) {
        if self.log.len() == OUTPUT_LOG_LIMIT {
            self.log.pop_front();
        }
        self.log.push_back(line.to_string());
    }

    fn append(&mut self, text: &str) {
        if !self.current.is_empty() {
            self.current.push('\n');
        }
        self.current.push_str(text);
    }

    pub(crate) fn push_line(&mut self, line: &str) {
        self.record(line);

        let Some(found) = find_sentinel(line) else {
            self.append(line);
            return;
        };

        let is_oldest = self
            .pending
            .front()
            .is_some_and(|p| p.sentinel == found.sentinel);
        if !is_oldest {
            tracing::warn!(
                sentinel = found.sentinel,
                pending = self.pending.len(),
                "Sentinel does not belong to the oldest pending command, keeping it as output"
            );
            self.append(line);
            return;
        }

        if !found.before.is_empty() {
            self.append(found.before);
        }
        let output = CommandOutput {
            output: std::mem::take(&mut self.current).trim().to_string(),
            exit_code: Some(found.exit_code),
        };

        if let Some(command) = self.pending.pop_front() {
            if command.reply.send(output).is_err() {
                tracing::debug!(
                    sentinel = %command.sentinel,
                    "Discarding result of a command whose caller stopped waiting"
                );
            }
        }
    }

    /// Mark the shell as gone. Dropping the senders fails every pending wait.
    fn close(&mut self) {
        self.closed = true;
        self.pending.clear();
    }
}

fn lock(state: &Mutex<Correlator>) -> MutexGuard<'_, Correlator> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One live shell process rooted in an agent's sandbox.
pub struct TerminalSession {
    child: tokio::sync::Mutex<Child>,
    stdin: tokio::sync::Mutex<ChildStdin>,
    state: Arc<Mutex<Correlator>>,
    readers: Vec<JoinHandle<()>>,
    pid: Option<u32>,
}

impl TerminalSession {
    /// Start the shell with `working_dir` as its current directory.
    pub async fn spawn(working_dir: &Path, config: &ShellConfig) -> Result<Self, TerminalError> {
        let mut command = Command::new(&config.program);
        command
            .args(&config.args)
            .current_dir(working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &config.env {
            command.env(key, value);
        }
        #[cfg(unix)]
        command.process_group(0);

        let spawn_failed = |message: String| TerminalError::SpawnFailed {
            program: config.program.clone(),
            message,
        };

        let mut child = command.spawn().map_err(|e| spawn_failed(e.to_string()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_failed("Failed to capture stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_failed("Failed to capture stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| spawn_failed("Failed to capture stderr".to_string()))?;

        let pid = child.id();
        let state = Arc::new(Mutex::new(Correlator::default()));
        let readers = vec![
            spawn_reader(stdout, Arc::clone(&state), true),
            spawn_reader(stderr, Arc::clone(&state), false),
        ];

        tracing::info!(
            pid = ?pid,
            program = %config.program,
            cwd = %working_dir.display(),
            "Spawned terminal session"
        );

        let session = Self {
            child: tokio::sync::Mutex::new(child),
            stdin: tokio::sync::Mutex::new(stdin),
            state,
            readers,
            pid,
        };

        if let Some(script) = &config.init_script {
            session.write_line(script).await?;
        }
        Ok(session)
    }

    async fn write_line(&self, line: &str) -> Result<(), TerminalError> {
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Run a command and wait for its sentinel.
    ///
    /// If `cancel` fires first the wait fails with `Cancelled`; the slot stays
    /// queued and is resolved (and discarded) when the shell catches up.
    pub async fn execute(
        &self,
        command: &str,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, TerminalError> {
        let sentinel = new_sentinel();
        let receiver = lock(&self.state).enqueue(sentinel.clone())?;

        tracing::debug!(pid = ?self.pid, sentinel = %sentinel, command, "Executing command");
        self.write_line(&frame_command(command, &sentinel)).await?;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TerminalError::Cancelled),
            result = receiver => result.map_err(|_| TerminalError::ProcessExited),
        }
    }

    /// Forward raw input with no completion tracking.
    pub async fn send_input(&self, input: &str) -> Result<(), TerminalError> {
        if !self.is_alive() {
            return Err(TerminalError::ProcessExited);
        }
        self.write_line(input).await
    }

    /// Whether the shell's output stream is still open.
    pub fn is_alive(&self) -> bool {
        !lock(&self.state).closed
    }

    /// Commands written to the shell whose sentinel has not arrived yet.
    pub fn pending_commands(&self) -> usize {
        lock(&self.state).pending.len()
    }

    /// Most recent output lines, oldest first.
    pub fn output_log(&self) -> Vec<String> {
        lock(&self.state).log.iter().cloned().collect()
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Ask the shell to exit, then kill it and everything it started.
    pub async fn dispose(&self) {
        let _ = self.write_line("exit").await;

        {
            let mut child = self.child.lock().await;
            match timeout(GRACEFUL_EXIT_TIMEOUT, child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::debug!(pid = ?self.pid, %status, "Terminal exited");
                }
                _ => {
                    tracing::debug!(pid = ?self.pid, "Terminal did not exit in time, killing");
                    let _ = child.kill().await;
                }
            }
        }

        if let Some(pid) = self.pid {
            kill_process_tree(pid).await;
        }
        for reader in &self.readers {
            reader.abort();
        }
        lock(&self.state).close();
        tracing::info!(pid = ?self.pid, "Disposed terminal session");
    }
}

impl Drop for TerminalSession {
    fn drop(&mut self) {
        for reader in &self.readers {
            reader.abort();
        }
        if let Ok(mut child) = self.child.try_lock() {
            let _ = child.start_kill();
        }
    }
}

fn spawn_reader<R>(stream: R, state: Arc<Mutex<Correlator>>, closes_session: bool) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\r', '\n']);
                    tracing::trace!(line, "terminal");
                    lock(&state).push_line(line);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read terminal output");
                    break;
                }
            }
        }
        // stderr closes early once the shell redirects it; only stdout EOF ends the session.
        if closes_session {
            lock(&state).close();
        }
    })
}

#[cfg(unix)]
async fn kill_process_tree(pid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // The shell leads its own process group, so this reaches its descendants too.
    unsafe {
        libc::kill(-pgid, libc::SIGKILL);
    }
}

#[cfg(windows)]
async fn kill_process_tree(pid: u32) {
    let _ = Command::new("taskkill")
        .args(["/F", "/T", "/PID", &pid.to_string()])
        .output()
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output_of(receiver: &mut oneshot::Receiver<CommandOutput>) -> CommandOutput {
        receiver.try_recv().expect("slot should be resolved")
    }

    #[test]
    fn test_frame_command_echoes_sentinel_on_both_branches() {
        let framed = frame_command("ls -la ;  ", "__END_OF_COMMAND__abc");
        if cfg!(windows) {
            assert!(framed.starts_with("ls -la 2>&1 && echo __END_OF_COMMAND__abc"));
        } else {
            assert_eq!(
                framed,
                "eval 'ls -la ;' && echo __END_OF_COMMAND__abc || echo __END_OF_COMMAND__abc:$?"
            );
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_frame_command_quotes_the_whole_command() {
        assert_eq!(
            frame_command("echo 'a b' # note", "S"),
            r"eval 'echo '\''a b'\'' # note' && echo S || echo S:$?"
        );
    }

    #[test]
    fn test_find_sentinel() {
        let sentinel = new_sentinel();

        let plain = find_sentinel(&sentinel).expect("match");
        assert_eq!(plain.sentinel, sentinel);
        assert_eq!(plain.before, "");
        assert_eq!(plain.exit_code, 0);

        let line = format!("partial{}:127", sentinel);
        let failed = find_sentinel(&line).expect("match");
        assert_eq!(failed.before, "partial");
        assert_eq!(failed.sentinel, sentinel);
        assert_eq!(failed.exit_code, 127);

        assert!(find_sentinel("ordinary output").is_none());
        assert!(find_sentinel(SENTINEL_MARKER).is_none());
    }

    #[test]
    fn test_find_sentinel_ignores_marker_inside_a_line() {
        let sentinel = new_sentinel();

        let echoed = format!(
            "bash: line 2: `sleep 1 & && echo {0} || echo {0}:$?'",
            sentinel
        );
        assert!(find_sentinel(&echoed).is_none());

        let grepped = format!("terminal.rs: const X = \"{}\";", sentinel);
        assert!(find_sentinel(&grepped).is_none());
    }

    #[test]
    fn test_correlator_resolves_in_fifo_order() {
        let mut state = Correlator::default();
        let first = new_sentinel();
        let second = new_sentinel();
        let mut rx1 = state.enqueue(first.clone()).expect("enqueue");
        let mut rx2 = state.enqueue(second.clone()).expect("enqueue");

        state.push_line("one");
        state.push_line(&first);
        state.push_line("two");
        state.push_line("  ");
        state.push_line(&format!("{}:1", second));

        assert_eq!(
            output_of(&mut rx1),
            CommandOutput {
                output: "one".to_string(),
                exit_code: Some(0)
            }
        );
        let two = output_of(&mut rx2);
        assert_eq!(two.output, "two");
        assert_eq!(two.exit_code, Some(1));
        assert_eq!(state.pending.len(), 0);
        assert!(state.current.is_empty());
    }

    #[test]
    fn test_correlator_keeps_stray_sentinel_as_output() {
        let mut state = Correlator::default();
        let expected = new_sentinel();
        let stray = new_sentinel();
        let mut rx = state.enqueue(expected.clone()).expect("enqueue");

        state.push_line("real");
        state.push_line(&stray);
        assert!(rx.try_recv().is_err());
        assert_eq!(state.pending.len(), 1);

        state.push_line(&expected);
        assert_eq!(output_of(&mut rx).output, format!("real\n{}", stray));
    }

    #[test]
    fn test_correlator_discards_result_for_abandoned_wait() {
        let mut state = Correlator::default();
        let stale = new_sentinel();
        let next = new_sentinel();
        drop(state.enqueue(stale.clone()).expect("enqueue"));
        let mut rx = state.enqueue(next.clone()).expect("enqueue");

        state.push_line("late output");
        state.push_line(&stale);
        state.push_line("fresh output");
        state.push_line(&next);

        assert_eq!(output_of(&mut rx).output, "fresh output");
    }

    #[test]
    fn test_correlator_close_fails_pending_and_rejects_new() {
        let mut state = Correlator::default();
        let mut rx = state.enqueue(new_sentinel()).expect("enqueue");
        state.close();

        assert!(matches!(
            rx.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
        assert!(matches!(
            state.enqueue(new_sentinel()),
            Err(TerminalError::ProcessExited)
        ));
    }

    #[test]
    fn test_output_log_is_bounded() {
        let mut state = Correlator::default();
        for i in 0..OUTPUT_LOG_LIMIT + 5 {
            state.push_line(&format!("line {}", i));
        }
        assert_eq!(state.log.len(), OUTPUT_LOG_LIMIT);
        assert_eq!(state.log.front().map(String::as_str), Some("line 5"));
    }

    #[test]
    fn test_command_output_display() {
        let empty = CommandOutput {
            output: String::new(),
            exit_code: Some(0),
        };
        assert_eq!(empty.to_string(), "[No output]");

        let failed = CommandOutput {
            output: "ls: cannot access 'x'".to_string(),
            exit_code: Some(2),
        };
        assert!(!failed.success());
        assert_eq!(failed.to_string(), "ls: cannot access 'x'\n[exit code: 2]");
    }

    #[cfg(unix)]
    mod shell {
        use super::super::*;
        use tempfile::TempDir;

        async fn session(dir: &TempDir) -> TerminalSession {
            TerminalSession::spawn(dir.path(), &ShellConfig::default())
                .await
                .expect("bash should spawn")
        }

        #[tokio::test]
        async fn test_execute_returns_output_without_sentinel() {
            let dir = TempDir::new().expect("tempdir");
            let terminal = session(&dir).await;
            let token = CancellationToken::new();

            let result = terminal.execute("echo hello", &token).await.expect("execute");
            assert_eq!(result.output, "hello");
            assert!(!result.to_string().contains(SENTINEL_MARKER));

            terminal.dispose().await;
        }

        #[tokio::test]
        async fn test_execute_runs_in_working_dir_and_reports_failures() {
            let dir = TempDir::new().expect("tempdir");
            std::fs::write(dir.path().join("marker.txt"), "x").expect("write");
            let terminal = session(&dir).await;
            let token = CancellationToken::new();

            let listing = terminal.execute("ls", &token).await.expect("ls");
            assert_eq!(listing.output, "marker.txt");

            let missing = terminal
                .execute("ls does-not-exist", &token)
                .await
                .expect("failing command still completes");
            assert!(!missing.success());
            assert!(missing.output.contains("does-not-exist"));

            let empty = terminal.execute("true", &token).await.expect("true");
            assert_eq!(empty.to_string(), "[No output]");

            terminal.dispose().await;
        }

        #[tokio::test]
        async fn test_comments_and_background_jobs_complete() {
            let dir = TempDir::new().expect("tempdir");
            std::fs::write(dir.path().join("marker.txt"), "x").expect("write");
            let terminal = session(&dir).await;
            let token = CancellationToken::new();

            let commented = timeout(
                Duration::from_secs(5),
                terminal.execute("ls # list files", &token),
            )
            .await
            .expect("comment must not swallow the sentinel")
            .expect("execute");
            assert_eq!(commented.output, "marker.txt");

            let background = terminal.execute("sleep 0.1 &", &token).await.expect("execute");
            assert!(background.success(), "{background:?}");

            let quoted = terminal
                .execute("echo \"it's\" 'quoted'", &token)
                .await
                .expect("execute");
            assert_eq!(quoted.output, "it's quoted");

            let after = terminal.execute("echo after", &token).await.expect("execute");
            assert_eq!(after.output, "after");

            terminal.dispose().await;
        }

        #[tokio::test]
        async fn test_syntax_error_fails_command_and_keeps_shell() {
            let dir = TempDir::new().expect("tempdir");
            let terminal = session(&dir).await;
            let token = CancellationToken::new();

            terminal.execute("cd /tmp && export KEEP=1", &token).await.expect("setup");

            let broken = terminal.execute("echo (", &token).await.expect("completes");
            assert!(!broken.success());
            assert!(broken.output.contains("syntax error"), "{}", broken.output);
            assert!(!broken.output.contains(SENTINEL_MARKER));

            let state = terminal
                .execute("echo $PWD $KEEP", &token)
                .await
                .expect("shell survives");
            assert_eq!(state.output, "/tmp 1");

            terminal.dispose().await;
        }

        #[tokio::test]
        async fn test_cancelled_wait_does_not_desync_next_command() {
            let dir = TempDir::new().expect("tempdir");
            let terminal = session(&dir).await;

            let token = CancellationToken::new();
            let canceller = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                canceller.cancel();
            });
            let cancelled = terminal.execute("sleep 0.5; echo late", &token).await;
            assert!(matches!(cancelled, Err(TerminalError::Cancelled)));
            assert_eq!(terminal.pending_commands(), 1);

            let fresh = CancellationToken::new();
            let next = terminal.execute("echo next", &fresh).await.expect("next");
            assert_eq!(next.output, "next");
            assert!(terminal.output_log().iter().any(|l| l == "late"));

            terminal.dispose().await;
        }

        #[tokio::test]
        async fn test_shell_exit_fails_wait_and_marks_dead() {
            let dir = TempDir::new().expect("tempdir");
            let terminal = session(&dir).await;
            let token = CancellationToken::new();

            let result = terminal.execute("exit 3", &token).await;
            assert!(matches!(result, Err(TerminalError::ProcessExited)));
            assert!(!terminal.is_alive());
            assert!(matches!(
                terminal.send_input("anything").await,
                Err(TerminalError::ProcessExited)
            ));
        }

        #[tokio::test]
        async fn test_send_input_feeds_running_command() {
            let dir = TempDir::new().expect("tempdir");
            let terminal = session(&dir).await;
            let token = CancellationToken::new();

            let pending = terminal.execute("read name; echo \"hi $name\"", &token);
            let feed = async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                terminal.send_input("agent").await.expect("send_input");
            };
            let (result, ()) = tokio::join!(pending, feed);

            assert_eq!(result.expect("execute").output, "hi agent");
            terminal.dispose().await;
        }
    }
}
