//! Debuggee process lifecycle.
//!
//! Spawns the debuggee with piped output, forwards stdout/stderr chunks as
//! [`ProcessEvent`]s, and reports exit exactly once. Dropping the supervisor
//! kills the process.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};

const READ_CHUNK: usize = 8 * 1024;
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);
const KILL_TIMEOUT: Duration = Duration::from_millis(500);

/// Everything needed to start a debuggee.
#[derive(Debug, Default)]
pub struct LaunchSpec {
	pub program: PathBuf,
	pub args: Vec<OsString>,
	pub cwd: Option<PathBuf>,
	/// Added on top of the inherited environment.
	pub env: Vec<(String, String)>,
	/// Scratch directory removed when the process is gone (browser profiles).
	pub scratch_dir: Option<TempDir>,
}

impl LaunchSpec {
	pub fn new(program: impl Into<PathBuf>) -> Self {
		Self {
			program: program.into(),
			..Default::default()
		}
	}

	pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
		self.args.push(arg.into());
		self
	}

	pub fn args<I, S>(mut self, args: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<OsString>,
	{
		self.args.extend(args.into_iter().map(Into::into));
		self
	}

	pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
		self.cwd = Some(cwd.into());
		self
	}

	pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.env.push((key.into(), value.into()));
		self
	}

	pub fn scratch_dir(mut self, dir: TempDir) -> Self {
		self.scratch_dir = Some(dir);
		self
	}
}

/// Output and lifecycle notifications from a supervised process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
	Stdout(String),
	Stderr(String),
	/// Emitted once, after all captured output.
	Exited { code: Option<i32> },
}

/// Exit status as observed by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
	pub code: Option<i32>,
}

/// Owns a running debuggee.
#[derive(Debug)]
pub struct ProcessSupervisor {
	program: String,
	pid: Option<u32>,
	kill_tx: Option<oneshot::Sender<()>>,
	exit_rx: watch::Receiver<Option<ProcessExit>>,
	task: Option<JoinHandle<()>>,
	_scratch_dir: Option<TempDir>,
}

impl ProcessSupervisor {
	/// Spawns the process described by `spec`.
	///
	/// # Errors
	///
	/// Returns [`Error::LaunchFailed`] if the program cannot be started.
	pub fn launch(spec: LaunchSpec) -> Result<(Self, mpsc::UnboundedReceiver<ProcessEvent>)> {
		let LaunchSpec {
			program,
			args,
			cwd,
			env,
			scratch_dir,
		} = spec;
		let program_name = program.display().to_string();

		let mut cmd = Command::new(&program);
		cmd.args(&args)
			.envs(env)
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(true);
		if let Some(cwd) = &cwd {
			cmd.current_dir(cwd);
		}

		let mut child = cmd
			.spawn()
			.map_err(|e| Error::LaunchFailed(format!("Failed to spawn {program_name}: {e}")))?;
		let pid = child.id();
		tracing::debug!(program = %program_name, ?pid, ?args, "debuggee spawned");

		let (events_tx, events_rx) = mpsc::unbounded_channel();
		let (kill_tx, kill_rx) = oneshot::channel::<()>();
		let (exit_tx, exit_rx) = watch::channel(None);

		let stdout = child
			.stdout
			.take()
			.map(|out| tokio::spawn(forward_output(out, events_tx.clone(), ProcessEvent::Stdout)));
		let stderr = child
			.stderr
			.take()
			.map(|err| tokio::spawn(forward_output(err, events_tx.clone(), ProcessEvent::Stderr)));

		let name = program_name.clone();
		let task = tokio::spawn(async move {
			let status = tokio::select! {
				status = child.wait() => status,
				_ = kill_rx => {
					// sender dropped or kill requested; either way the process goes
					if let Err(e) = child.start_kill() {
						tracing::debug!(error = %e, "kill failed, process likely gone");
					}
					child.wait().await
				}
			};

			let code = match status {
				Ok(status) => status.code(),
				Err(e) => {
					tracing::warn!(program = %name, error = %e, "failed to wait for debuggee");
					None
				}
			};

			for reader in [stdout, stderr].into_iter().flatten() {
				let _ = tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, reader).await;
			}

			tracing::debug!(program = %name, ?code, "debuggee exited");
			let _ = exit_tx.send(Some(ProcessExit { code }));
			let _ = events_tx.send(ProcessEvent::Exited { code });
		});

		Ok((
			Self {
				program: program_name,
				pid,
				kill_tx: Some(kill_tx),
				exit_rx,
				task: Some(task),
				_scratch_dir: scratch_dir,
			},
			events_rx,
		))
	}

	pub fn pid(&self) -> Option<u32> {
		self.pid
	}

	pub fn program(&self) -> &str {
		&self.program
	}

	/// Returns the exit status if the process is already gone.
	pub fn exit_status(&self) -> Option<ProcessExit> {
		*self.exit_rx.borrow()
	}

	pub fn has_exited(&self) -> bool {
		self.exit_status().is_some()
	}

	/// Resolves when the process exits.
	pub fn wait(&self) -> impl std::future::Future<Output = ProcessExit> + Send + 'static {
		let mut exit_rx = self.exit_rx.clone();
		async move {
			match exit_rx.wait_for(Option::is_some).await {
				Ok(exit) => (*exit).unwrap_or(ProcessExit { code: None }),
				Err(_) => ProcessExit { code: None },
			}
		}
	}

	/// Forcefully terminates the process and waits briefly for it to go away.
	pub async fn kill(mut self) -> Result<()> {
		if let Some(kill_tx) = self.kill_tx.take() {
			let _ = kill_tx.send(());
		}
		if let Some(task) = self.task.take() {
			if tokio::time::timeout(KILL_TIMEOUT, task).await.is_err() {
				return Err(Error::LaunchFailed(format!(
					"{} did not exit within {}ms of kill",
					self.program,
					KILL_TIMEOUT.as_millis()
				)));
			}
		}
		Ok(())
	}
}

impl Drop for ProcessSupervisor {
	fn drop(&mut self) {
		if let Some(kill_tx) = self.kill_tx.take() {
			let _ = kill_tx.send(());
		}
	}
}

async fn forward_output<R>(mut reader: R, events_tx: mpsc::UnboundedSender<ProcessEvent>, wrap: fn(String) -> ProcessEvent)
where
	R: AsyncRead + Unpin,
{
	let mut buf = vec![0u8; READ_CHUNK];
	let mut pending = Vec::new();
	loop {
		match reader.read(&mut buf).await {
			Ok(0) => break,
			Ok(n) => {
				pending.extend_from_slice(&buf[..n]);
				let complete = pending.len() - incomplete_tail(&pending);
				if complete == 0 {
					continue;
				}
				let chunk = String::from_utf8_lossy(&pending[..complete]).into_owned();
				pending.drain(..complete);
				if events_tx.send(wrap(chunk)).is_err() {
					return;
				}
			}
			Err(e) => {
				tracing::debug!(error = %e, "debuggee output closed");
				break;
			}
		}
	}
	if !pending.is_empty() {
		let _ = events_tx.send(wrap(String::from_utf8_lossy(&pending).into_owned()));
	}
}

/// Length of a multi-byte UTF-8 sequence cut off at the end of `bytes`.
fn incomplete_tail(bytes: &[u8]) -> usize {
	for back in 1..=bytes.len().min(3) {
		let byte = bytes[bytes.len() - back];
		if byte & 0xC0 == 0x80 {
			continue;
		}
		let width = match byte {
			0xC0..=0xDF => 2,
			0xE0..=0xEF => 3,
			0xF0..=0xF7 => 4,
			_ => 1,
		};
		return if width > back { back } else { 0 };
	}
	0
}

/// Expands a leading `~` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
	if path == "~" {
		if let Some(home) = dirs::home_dir() {
			return home;
		}
	} else if let Some(rest) = path.strip_prefix("~/") {
		if let Some(home) = dirs::home_dir() {
			return home.join(rest);
		}
	}
	PathBuf::from(path)
}

/// Expands `~` in each entry of a search-path list such as `NODE_PATH`.
pub fn expand_path_list(value: &str) -> String {
	let entries: Vec<PathBuf> = std::env::split_paths(value).map(|p| expand_home(&p.to_string_lossy())).collect();
	match std::env::join_paths(&entries) {
		Ok(joined) => joined.to_string_lossy().into_owned(),
		Err(_) => value.to_string(),
	}
}

/// Directory of `file`, falling back to the current directory.
pub fn parent_dir(file: &Path) -> PathBuf {
	match file.parent() {
		Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
		_ => PathBuf::from("."),
	}
}
