//! エンジンプロセスとの入出力。
//!
//! [`EngineLauncher`] がワーカーを起動し、書き込み側 ([`EngineWorker`]) と
//! エンジン出力行の受信チャネルを返す。出力行はバックグラウンドスレッドが
//! 1 行ずつチャネルへ流し、プロセス終了時はチャネルが切断される。

use std::io::{BufRead, BufReader, BufWriter, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, unbounded};

use crate::config::AdapterConfig;
use crate::error::{AdapterError, Result};

const QUIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Write side of a running engine.
pub trait EngineWorker: Send {
    /// Writes one command line.
    fn post(&mut self, line: &str) -> std::io::Result<()>;

    /// Disposes the engine. Must be safe to call more than once.
    fn terminate(&mut self);
}

/// A freshly started engine: its write side and the stream of its output lines.
pub struct LaunchedWorker {
    pub worker: Box<dyn EngineWorker>,
    pub lines: Receiver<String>,
}

/// Starts engine workers for the adapter.
pub trait EngineLauncher: Send {
    fn launch(&self, config: &AdapterConfig) -> Result<LaunchedWorker>;
}

/// Launches the configured engine binary as a child process.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessLauncher;

impl EngineLauncher for ProcessLauncher {
    fn launch(&self, config: &AdapterConfig) -> Result<LaunchedWorker> {
        let (worker, lines) = ProcessWorker::spawn(config)?;
        Ok(LaunchedWorker {
            worker: Box::new(worker),
            lines,
        })
    }
}

/// 1 本のエンジンプロセスに対する入出力をカプセル化する。
pub struct ProcessWorker {
    child: Child,
    stdin: BufWriter<ChildStdin>,
    quit_timeout: Duration,
    terminated: bool,
}

impl ProcessWorker {
    pub fn spawn(config: &AdapterConfig) -> Result<(Self, Receiver<String>)> {
        let mut cmd = Command::new(&config.engine_path);
        cmd.args(&config.engine_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        // 端末の SIGINT がエンジンへ直接届かないよう別プロセスグループに置く。
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // SAFETY: pre_exec 内では async-signal-safe な setpgid のみを呼ぶ。
            unsafe {
                cmd.pre_exec(|| {
                    if libc::setpgid(0, 0) != 0 {
                        return Err(std::io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        }

        let mut child = cmd.spawn().map_err(|source| AdapterError::Spawn {
            path: config.engine_path.clone(),
            source,
        })?;
        let stdin = child.stdin.take().ok_or(AdapterError::MissingPipe("stdin"))?;
        let stdout = child.stdout.take().ok_or(AdapterError::MissingPipe("stdout"))?;

        let (tx, rx) = unbounded::<String>();
        let pid = child.id();
        thread::Builder::new()
            .name(format!("engine-reader-{pid}"))
            .spawn(move || {
                let reader = BufReader::new(stdout);
                for line in reader.lines() {
                    match line {
                        Ok(l) => {
                            if tx.send(l).is_err() {
                                break;
                            }
                        }
                        Err(_) => break,
                    }
                }
                log::debug!("engine {pid}: stdout closed");
            })?;

        log::info!("spawned engine {} (pid {pid})", config.engine_path.display());
        Ok((
            Self {
                child,
                stdin: BufWriter::new(stdin),
                quit_timeout: config.quit_timeout,
                terminated: false,
            },
            rx,
        ))
    }
}

impl EngineWorker for ProcessWorker {
    fn post(&mut self, line: &str) -> std::io::Result<()> {
        self.stdin.write_all(line.as_bytes())?;
        self.stdin.write_all(b"\n")?;
        self.stdin.flush()
    }

    fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        let _ = self.post("quit");
        let deadline = Instant::now() + self.quit_timeout;
        while Instant::now() < deadline {
            if let Ok(Some(_)) = self.child.try_wait() {
                return;
            }
            thread::sleep(QUIT_POLL_INTERVAL);
        }
        log::warn!("engine {} ignored quit, killing it", self.child.id());
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for ProcessWorker {
    fn drop(&mut self) {
        self.terminate();
    }
}
