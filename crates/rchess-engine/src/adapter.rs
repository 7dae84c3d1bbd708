//! Engine adapter: owns one engine session and turns searches into outcomes.
//!
//! Each session runs a dispatcher thread that owns the engine's write side,
//! its output stream and the single in-flight search slot. The caller talks
//! to it through a control channel and never blocks on the engine.
//!
//! Every `go` sent to a UCI engine is answered by exactly one `bestmove`.
//! When a search is retired early (superseded, timed out, new game) the
//! dispatcher sends `stop` and counts the search as stale; lines belonging to
//! stale searches are dropped until their `bestmove` has been seen, so they
//! never reach a newer request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvError, SendError, Sender, at, never, select, unbounded};

use crate::config::AdapterConfig;
use crate::error::{AdapterError, Result};
use crate::protocol::{BestMoveToken, EngineLine, InfoSnapshot, UciCommand};
use crate::strength::{SearchBudget, clamp_strength};
use crate::types::{
    Evaluation, EvaluationCallback, OutcomeCallback, SearchOutcome, SearchRequest, UciMove,
    duration_to_millis,
};
use crate::worker::{EngineLauncher, EngineWorker, LaunchedWorker, ProcessLauncher};

const READY_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Lifecycle of the adapter's engine session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No engine; the next search or `initialize` starts one.
    Uninitialized,
    /// Engine started, handshake sent, `uciok` not seen yet. Searches are accepted.
    Starting,
    /// Handshake acknowledged.
    Ready,
    /// Engine output closed unexpectedly. Searches fail until `terminate`.
    Crashed,
}

#[derive(Default)]
struct SessionShared {
    ready: AtomicBool,
    crashed: AtomicBool,
    engine_name: Mutex<Option<String>>,
    options: Mutex<Vec<String>>,
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::error!("Mutex was poisoned, attempting recovery");
            poisoned.into_inner()
        }
    }
}

enum Control {
    Search(PendingSearch),
    Stop,
    NewGame,
    Shutdown,
}

struct PendingSearch {
    id: u64,
    request: SearchRequest,
    budget: SearchBudget,
    on_outcome: OutcomeCallback,
    on_evaluation: Option<EvaluationCallback>,
}

struct Session {
    control: Sender<Control>,
    shared: Arc<SessionShared>,
    dispatcher: Option<JoinHandle<()>>,
}

pub struct EngineAdapter<L: EngineLauncher = ProcessLauncher> {
    config: AdapterConfig,
    launcher: L,
    session: Option<Session>,
    next_search_id: u64,
}

impl EngineAdapter<ProcessLauncher> {
    /// Adapter driving the engine binary named in `config`.
    pub fn new(config: AdapterConfig) -> Self {
        Self::with_launcher(config, ProcessLauncher)
    }
}

impl<L: EngineLauncher> EngineAdapter<L> {
    pub fn with_launcher(config: AdapterConfig, launcher: L) -> Self {
        Self {
            config,
            launcher,
            session: None,
            next_search_id: 0,
        }
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        match &self.session {
            None => SessionState::Uninitialized,
            Some(s) if s.shared.crashed.load(Ordering::Acquire) => SessionState::Crashed,
            Some(s) if s.shared.ready.load(Ordering::Acquire) => SessionState::Ready,
            Some(_) => SessionState::Starting,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    /// Waits up to `timeout` for `uciok`. Returns `false` on timeout, when
    /// there is no session, or when the engine has crashed.
    pub fn wait_ready(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            match self.state() {
                SessionState::Ready => return true,
                SessionState::Uninitialized | SessionState::Crashed => return false,
                SessionState::Starting => {}
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(READY_POLL_INTERVAL);
        }
    }

    /// `id name` reported during the handshake.
    pub fn engine_name(&self) -> Option<String> {
        self.session.as_ref().and_then(|s| lock_or_recover(&s.shared.engine_name).clone())
    }

    /// Option names the engine advertised during the handshake.
    pub fn advertised_options(&self) -> Vec<String> {
        self.session
            .as_ref()
            .map(|s| lock_or_recover(&s.shared.options).clone())
            .unwrap_or_default()
    }

    /// Starts the engine and sends the handshake. Does nothing when a session
    /// already exists.
    ///
    /// On failure the error is logged and returned, and the adapter stays
    /// uninitialized so that the next call retries.
    pub fn initialize(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Ok(());
        }
        match self.start_session() {
            Ok(session) => {
                self.session = Some(session);
                Ok(())
            }
            Err(e) => {
                log::error!("failed to initialize engine: {e}");
                Err(e)
            }
        }
    }

    fn start_session(&mut self) -> Result<Session> {
        let LaunchedWorker { mut worker, lines } = self.launcher.launch(&self.config)?;

        let mut handshake = vec![UciCommand::Uci];
        handshake.extend(self.config.option_commands());
        for cmd in &handshake {
            let line = cmd.to_string();
            log::debug!("> {line}");
            if let Err(e) = worker.post(&line) {
                worker.terminate();
                return Err(AdapterError::Io(e));
            }
        }

        let shared = Arc::new(SessionShared::default());
        let mut expected_options: Vec<String> =
            self.config.options.keys().cloned().collect();
        expected_options.push(self.config.skill_option.clone());
        let dispatcher = Dispatcher {
            worker,
            shared: Arc::clone(&shared),
            grace: self.config.grace_period,
            skill_option: self.config.skill_option.clone(),
            expected_options,
            active: None,
            stale_searches: 0,
            engine_alive: true,
        };
        let (control, control_rx) = unbounded();
        let handle = thread::Builder::new()
            .name("engine-dispatcher".into())
            .spawn(move || dispatcher.run(control_rx, lines))?;

        Ok(Session {
            control,
            shared,
            dispatcher: Some(handle),
        })
    }

    /// Asks the engine for a move in `position_fen` at `strength_level`.
    ///
    /// `strength_level` is clamped into `0..=20`. The FEN is passed to the
    /// engine as-is. Starts the engine first when there is no session.
    ///
    /// `on_outcome` is called exactly once. `on_evaluation`, when given, is
    /// called for every scored `info` line before that, in engine order.
    /// Callbacks normally run on the dispatcher thread. When the engine cannot
    /// be started or the session is already gone, `on_outcome` runs
    /// synchronously on the caller's thread before this returns, so it must
    /// not take a lock the caller holds. A request still in flight when this
    /// is called again is retired with [`SearchOutcome::Superseded`].
    pub fn find_best_move<F>(
        &mut self,
        position_fen: &str,
        strength_level: i32,
        on_outcome: F,
        on_evaluation: Option<EvaluationCallback>,
    ) where
        F: FnOnce(SearchOutcome) + Send + 'static,
    {
        let level = clamp_strength(strength_level);
        if let Err(e) = self.initialize() {
            on_outcome(SearchOutcome::EngineError(format!("engine unavailable: {e}")));
            return;
        }

        self.next_search_id += 1;
        let pending = PendingSearch {
            id: self.next_search_id,
            request: SearchRequest::new(position_fen, level),
            budget: self.config.tiers.budget_for(level),
            on_outcome: Box::new(on_outcome),
            on_evaluation,
        };
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if let Err(SendError(Control::Search(pending))) =
            session.control.send(Control::Search(pending))
        {
            (pending.on_outcome)(SearchOutcome::EngineError(
                AdapterError::WorkerGone.to_string(),
            ));
        }
    }

    /// Channel-backed variant of [`find_best_move`](Self::find_best_move).
    pub fn search(&mut self, position_fen: &str, strength_level: i32) -> SearchHandle {
        let (eval_tx, evaluations) = unbounded();
        let (outcome_tx, outcome) = crossbeam_channel::bounded(1);
        self.find_best_move(
            position_fen,
            strength_level,
            move |result| {
                let _ = outcome_tx.send(result);
            },
            Some(Box::new(move |eval| {
                let _ = eval_tx.send(eval);
            })),
        );
        SearchHandle {
            evaluations,
            outcome,
        }
    }

    /// Best-effort `stop`. Not awaited; the search still ends with its own outcome.
    pub fn stop(&self) {
        if let Some(session) = &self.session {
            let _ = session.control.send(Control::Stop);
        }
    }

    /// Sends `ucinewgame`, retiring any in-flight search as cancelled.
    pub fn new_game(&self) {
        if let Some(session) = &self.session {
            let _ = session.control.send(Control::NewGame);
        }
    }

    /// Disposes the engine and returns to [`SessionState::Uninitialized`].
    /// A search still in flight ends with [`SearchOutcome::Cancelled`].
    pub fn terminate(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        let _ = session.control.send(Control::Shutdown);
        if let Some(handle) = session.dispatcher.take() {
            if handle.join().is_err() {
                log::error!("engine dispatcher panicked");
            }
        }
        log::info!("engine session terminated");
    }
}

impl<L: EngineLauncher> Drop for EngineAdapter<L> {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Receiving end of [`EngineAdapter::search`].
pub struct SearchHandle {
    evaluations: Receiver<Evaluation>,
    outcome: Receiver<SearchOutcome>,
}

impl SearchHandle {
    pub fn try_evaluation(&self) -> Option<Evaluation> {
        self.evaluations.try_recv().ok()
    }

    /// Blocks for the next evaluation. `None` on timeout or once the search is over.
    pub fn recv_evaluation(&self, timeout: Duration) -> Option<Evaluation> {
        self.evaluations.recv_timeout(timeout).ok()
    }

    /// Evaluations received so far, without blocking.
    pub fn drain_evaluations(&self) -> Vec<Evaluation> {
        self.evaluations.try_iter().collect()
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<SearchOutcome> {
        self.outcome.recv_timeout(timeout).ok()
    }

    pub fn wait(self) -> SearchOutcome {
        self.outcome.recv().unwrap_or_else(|RecvError| {
            SearchOutcome::EngineError(AdapterError::WorkerGone.to_string())
        })
    }
}

struct ActiveSearch {
    id: u64,
    deadline: Instant,
    on_outcome: OutcomeCallback,
    on_evaluation: Option<EvaluationCallback>,
}

impl ActiveSearch {
    fn finish(self, outcome: SearchOutcome) {
        log::debug!("search #{} finished: {}", self.id, outcome.label());
        (self.on_outcome)(outcome);
    }
}

struct Dispatcher {
    worker: Box<dyn EngineWorker>,
    shared: Arc<SessionShared>,
    grace: Duration,
    skill_option: String,
    expected_options: Vec<String>,
    active: Option<ActiveSearch>,
    /// Retired searches whose `bestmove` has not arrived yet.
    stale_searches: u32,
    engine_alive: bool,
}

impl Dispatcher {
    fn run(mut self, control: Receiver<Control>, lines: Receiver<String>) {
        loop {
            let line_rx = if self.engine_alive {
                lines.clone()
            } else {
                never()
            };
            let timer = match &self.active {
                Some(active) => at(active.deadline),
                None => never(),
            };
            let keep_running = select! {
                recv(control) -> msg => self.handle_control(msg),
                recv(line_rx) -> line => {
                    match line {
                        Ok(line) => self.handle_line(&line),
                        Err(_) => self.on_engine_exit(),
                    }
                    true
                },
                recv(timer) -> _ => {
                    self.expire_active();
                    true
                },
            };
            if !keep_running {
                break;
            }
        }
        self.shutdown();
    }

    fn handle_control(&mut self, msg: std::result::Result<Control, RecvError>) -> bool {
        match msg {
            Ok(Control::Search(pending)) => self.start_search(pending),
            Ok(Control::Stop) => {
                if self.engine_alive {
                    self.send(&UciCommand::Stop);
                }
            }
            Ok(Control::NewGame) => {
                self.retire_active(SearchOutcome::Cancelled);
                if self.engine_alive {
                    self.send(&UciCommand::UciNewGame);
                }
            }
            Ok(Control::Shutdown) | Err(RecvError) => return false,
        }
        true
    }

    fn send(&mut self, cmd: &UciCommand) -> bool {
        let line = cmd.to_string();
        log::debug!("> {line}");
        match self.worker.post(&line) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("failed to send `{line}` to engine: {e}");
                false
            }
        }
    }

    /// Retires the in-flight search early and stops the engine's search for it.
    fn retire_active(&mut self, outcome: SearchOutcome) {
        let Some(active) = self.active.take() else {
            return;
        };
        if self.engine_alive {
            self.send(&UciCommand::Stop);
            self.stale_searches += 1;
        }
        active.finish(outcome);
    }

    fn start_search(&mut self, pending: PendingSearch) {
        self.retire_active(SearchOutcome::Superseded);
        if !self.engine_alive {
            (pending.on_outcome)(SearchOutcome::EngineError(
                "engine process is not running".into(),
            ));
            return;
        }

        let PendingSearch {
            id,
            request,
            budget,
            on_outcome,
            on_evaluation,
        } = pending;
        let commands = [
            UciCommand::set_option(&self.skill_option, request.strength_level),
            UciCommand::PositionFen(request.position_fen),
            UciCommand::Go {
                depth: budget.depth,
                movetime_ms: duration_to_millis(budget.move_time),
            },
        ];
        for cmd in &commands {
            if !self.send(cmd) {
                self.mark_crashed();
                on_outcome(SearchOutcome::EngineError(format!(
                    "failed to send `{cmd}` to engine"
                )));
                return;
            }
        }

        log::debug!(
            "search #{id} started (level {}, depth {}, {} ms)",
            request.strength_level,
            budget.depth,
            duration_to_millis(budget.move_time)
        );
        self.active = Some(ActiveSearch {
            id,
            deadline: Instant::now() + budget.move_time + self.grace,
            on_outcome,
            on_evaluation,
        });
    }

    fn handle_line(&mut self, line: &str) {
        log::trace!("< {line}");
        match EngineLine::parse(line) {
            EngineLine::UciOk => self.on_handshake_done(),
            EngineLine::IdName(name) => *lock_or_recover(&self.shared.engine_name) = Some(name),
            EngineLine::OptionName(name) => lock_or_recover(&self.shared.options).push(name),
            EngineLine::Info(info) => self.route_info(info),
            EngineLine::BestMove { best, .. } => self.route_bestmove(best),
            EngineLine::ReadyOk | EngineLine::Other => {}
        }
    }

    fn on_handshake_done(&mut self) {
        self.shared.ready.store(true, Ordering::Release);
        let name = lock_or_recover(&self.shared.engine_name).clone();
        log::info!("engine ready: {}", name.as_deref().unwrap_or("<unnamed>"));

        let advertised = lock_or_recover(&self.shared.options);
        if advertised.is_empty() {
            return;
        }
        for name in &self.expected_options {
            if !advertised.iter().any(|o| o.eq_ignore_ascii_case(name)) {
                log::warn!("engine does not advertise option `{name}`");
            }
        }
    }

    fn route_info(&mut self, info: InfoSnapshot) {
        if self.stale_searches > 0 || !info.is_primary() {
            return;
        }
        let (Some(active), Some(score)) = (self.active.as_mut(), info.score) else {
            return;
        };
        if let Some(on_evaluation) = active.on_evaluation.as_mut() {
            on_evaluation(score);
        }
    }

    fn route_bestmove(&mut self, best: BestMoveToken) {
        if self.stale_searches > 0 {
            self.stale_searches -= 1;
            log::debug!("discarded bestmove of a retired search");
            return;
        }
        let Some(active) = self.active.take() else {
            log::debug!("ignoring unsolicited bestmove");
            return;
        };
        let outcome = match best {
            BestMoveToken::NoMove => SearchOutcome::NoLegalMove,
            BestMoveToken::Token(token) => match token.parse::<UciMove>() {
                Ok(mv) => SearchOutcome::Move(mv),
                Err(e) => SearchOutcome::EngineError(format!("unusable bestmove: {e}")),
            },
        };
        active.finish(outcome);
    }

    fn expire_active(&mut self) {
        if let Some(active) = &self.active {
            log::warn!("search #{} got no bestmove in time, abandoning it", active.id);
        }
        self.retire_active(SearchOutcome::TimedOut);
    }

    fn mark_crashed(&mut self) {
        self.engine_alive = false;
        self.stale_searches = 0;
        self.shared.crashed.store(true, Ordering::Release);
    }

    fn on_engine_exit(&mut self) {
        log::warn!("engine output closed unexpectedly");
        self.mark_crashed();
        if let Some(active) = self.active.take() {
            active.finish(SearchOutcome::EngineError("engine exited unexpectedly".into()));
        }
    }

    fn shutdown(mut self) {
        if let Some(active) = self.active.take() {
            active.finish(SearchOutcome::Cancelled);
        }
        self.worker.terminate();
    }
}
