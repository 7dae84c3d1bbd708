//! Common test utilities: an in-memory engine that answers from scripts.

#![allow(dead_code)] // These utilities may be used by various test files

use std::collections::VecDeque;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, unbounded};
use rchess_engine::{
    AdapterConfig, AdapterError, BudgetTiers, EngineAdapter, EngineLauncher, EngineWorker,
    Evaluation, LaunchedWorker, SearchBudget, SearchOutcome,
};

pub const T_OUTCOME: Duration = Duration::from_secs(5); // Outcome receive timeout
pub const T_SHORT: Duration = Duration::from_millis(100); // Short wait

pub const START_FEN: &str = rchess_engine::START_FEN;

#[derive(Default)]
struct Inner {
    go_scripts: Mutex<VecDeque<Vec<String>>>,
    stop_scripts: Mutex<VecDeque<Vec<String>>>,
    posted: Mutex<Vec<String>>,
    output: Mutex<Option<Sender<String>>>,
    launches: AtomicUsize,
    failures_left: AtomicUsize,
    terminations: AtomicUsize,
}

/// Launcher whose engines reply to `uci`, `go` and `stop` from queued scripts.
#[derive(Clone, Default)]
pub struct ScriptedLauncher {
    inner: Arc<Inner>,
}

impl ScriptedLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines emitted in reply to the next unanswered `go`.
    pub fn on_go(self, lines: &[&str]) -> Self {
        self.inner
            .go_scripts
            .lock()
            .unwrap()
            .push_back(lines.iter().map(|l| l.to_string()).collect());
        self
    }

    /// Lines emitted in reply to the next `stop`.
    pub fn on_stop(self, lines: &[&str]) -> Self {
        self.inner
            .stop_scripts
            .lock()
            .unwrap()
            .push_back(lines.iter().map(|l| l.to_string()).collect());
        self
    }

    /// The next `n` launches fail as if the binary were missing.
    pub fn failing(self, n: usize) -> Self {
        self.inner.failures_left.store(n, Ordering::SeqCst);
        self
    }

    pub fn posted(&self) -> Vec<String> {
        self.inner.posted.lock().unwrap().clone()
    }

    pub fn count_posted(&self, prefix: &str) -> usize {
        self.posted().iter().filter(|l| l.starts_with(prefix)).count()
    }

    /// Waits until a command starting with `prefix` has been posted `count` times.
    pub fn wait_posted(&self, prefix: &str, count: usize, timeout: Duration) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if self.count_posted(prefix) >= count {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    /// Pushes a line as if the engine printed it.
    pub fn emit(&self, line: &str) {
        if let Some(tx) = self.inner.output.lock().unwrap().as_ref() {
            let _ = tx.send(line.to_string());
        }
    }

    /// Closes the engine's output, as a crashed process would.
    pub fn crash(&self) {
        self.inner.output.lock().unwrap().take();
    }

    pub fn launches(&self) -> usize {
        self.inner.launches.load(Ordering::SeqCst)
    }

    pub fn terminations(&self) -> usize {
        self.inner.terminations.load(Ordering::SeqCst)
    }
}

impl EngineLauncher for ScriptedLauncher {
    fn launch(&self, config: &AdapterConfig) -> Result<LaunchedWorker, AdapterError> {
        self.inner.launches.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .inner
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(AdapterError::Spawn {
                path: PathBuf::from(&config.engine_path),
                source: io::Error::new(io::ErrorKind::NotFound, "scripted launch failure"),
            });
        }
        let (tx, rx) = unbounded();
        *self.inner.output.lock().unwrap() = Some(tx);
        Ok(LaunchedWorker {
            worker: Box::new(ScriptedWorker {
                inner: Arc::clone(&self.inner),
                terminated: false,
            }),
            lines: rx,
        })
    }
}

struct ScriptedWorker {
    inner: Arc<Inner>,
    terminated: bool,
}

impl ScriptedWorker {
    fn reply(&self, lines: &[String]) {
        if let Some(tx) = self.inner.output.lock().unwrap().as_ref() {
            for line in lines {
                let _ = tx.send(line.clone());
            }
        }
    }
}

impl EngineWorker for ScriptedWorker {
    fn post(&mut self, line: &str) -> io::Result<()> {
        if self.inner.output.lock().unwrap().is_none() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "engine gone"));
        }
        self.inner.posted.lock().unwrap().push(line.to_string());
        if line == "uci" {
            self.reply(&[
                "id name Scripted Engine".to_string(),
                "option name Skill Level type spin default 20 min 0 max 20".to_string(),
                "option name Threads type spin default 1 min 1 max 512".to_string(),
                "uciok".to_string(),
            ]);
        } else if line.starts_with("go") {
            let script = self.inner.go_scripts.lock().unwrap().pop_front();
            if let Some(script) = script {
                self.reply(&script);
            }
        } else if line == "stop" {
            let script = self.inner.stop_scripts.lock().unwrap().pop_front();
            if let Some(script) = script {
                self.reply(&script);
            }
        }
        Ok(())
    }

    fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        self.inner.terminations.fetch_add(1, Ordering::SeqCst);
        self.inner.output.lock().unwrap().take();
    }
}

/// Config with short budgets so timeouts fire quickly in tests.
pub fn fast_config() -> AdapterConfig {
    AdapterConfig {
        grace_period: Duration::from_millis(50),
        tiers: BudgetTiers {
            shallow: SearchBudget::new(1, 50),
            medium: SearchBudget::new(2, 100),
            deep: SearchBudget::new(3, 150),
        },
        ..AdapterConfig::default()
    }
}

/// Starts a search and returns channels receiving its evaluations and outcome.
pub fn start_search<L: EngineLauncher>(
    adapter: &mut EngineAdapter<L>,
    fen: &str,
    level: i32,
) -> (Receiver<Evaluation>, Receiver<SearchOutcome>) {
    let (eval_tx, evals) = unbounded();
    let (outcome_tx, outcome) = unbounded();
    adapter.find_best_move(
        fen,
        level,
        move |result| {
            outcome_tx.send(result).unwrap();
        },
        Some(Box::new(move |eval| {
            let _ = eval_tx.send(eval);
        })),
    );
    (evals, outcome)
}
