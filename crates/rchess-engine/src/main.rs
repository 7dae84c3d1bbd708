/// UCI エンジンに 1 局面を考えさせ、評価値の推移と指し手を表示する。
///
/// # 使用例
///
/// - 初期局面を Medium 相当で:
///   `cargo run -p rchess-engine --bin rchess-play -- --engine stockfish --difficulty medium`
///
/// - 黒番視点で評価値を JSONL 出力:
///   `cargo run -p rchess-engine --bin rchess-play -- --fen "<FEN>" --level 18 --player-color b --json`
///
/// - 設定ファイルを使う:
///   `cargo run -p rchess-engine --bin rchess-play -- --config rchess.toml --uci-option Threads=4`
///
/// Ctrl-C 1 回目でエンジンへ `stop` を送り、2 回目で終了する。
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use crossbeam_channel::{select, unbounded};
use serde::Serialize;

use rchess_engine::{
    AdapterConfig, Color, Difficulty, EngineAdapter, Evaluation, START_FEN, SearchOutcome, UciMove,
};

/// `uciok` を待つ上限。超えたら探索は投げるが Start には実行ファイル名を出す。
const READY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(author, version, about = "Ask a UCI chess engine for a move")]
struct Cli {
    /// Position to analyse (FEN). Defaults to the starting position
    #[arg(long)]
    fen: Option<String>,

    /// Strength level 0-20 (clamped)
    #[arg(long, conflicts_with = "difficulty")]
    level: Option<i32>,

    /// Difficulty preset: easy, medium, hard, master, or a level number
    #[arg(long, value_parser = parse_difficulty)]
    difficulty: Option<Difficulty>,

    /// Report evaluations from this side's point of view (w/b). Defaults to the side to move
    #[arg(long, value_parser = parse_color)]
    player_color: Option<Color>,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Engine binary (overrides the configuration file)
    #[arg(long)]
    engine: Option<PathBuf>,

    /// Extra arguments passed to the engine process (comma separated, repeatable)
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    engine_args: Option<Vec<String>>,

    /// UCI options to set (format: "Name=Value", can be specified multiple times)
    #[arg(long = "uci-option", num_args = 1..)]
    uci_options: Option<Vec<String>>,

    /// Grace period added to the move time before a search is abandoned
    #[arg(long)]
    grace_ms: Option<u64>,

    /// Print events as JSON lines
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Enable debug logging (engine traffic)
    #[arg(short, long)]
    debug: bool,
}

fn parse_difficulty(s: &str) -> Result<Difficulty, String> {
    s.parse()
}

fn parse_color(s: &str) -> Result<Color, String> {
    s.parse()
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum PlayEvent<'a> {
    Start {
        engine: String,
        fen: &'a str,
        level: i32,
        perspective: Color,
    },
    Evaluation {
        #[serde(flatten)]
        score: Evaluation,
        display: String,
    },
    Outcome {
        outcome: &'static str,
        #[serde(rename = "move", skip_serializing_if = "Option::is_none")]
        mv: Option<UciMove>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

enum Update {
    Evaluation(Evaluation),
    Outcome(SearchOutcome),
}

fn main() {
    let cli = Cli::parse();
    init_logger(cli.debug);

    if let Err(e) = run(cli) {
        log::error!("{e:#}");
        std::process::exit(1);
    }
}

fn init_logger(debug: bool) {
    use std::io::Write;
    let log_level = if debug { "debug" } else { "warn" };
    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, log_level),
    )
    .format(|buf, record| writeln!(buf, "[{}] {}: {}", record.level(), record.target(), record.args()))
    .target(env_logger::Target::Stderr)
    .init();
}

fn build_config(cli: &Cli) -> Result<AdapterConfig> {
    let mut config = match &cli.config {
        Some(path) => AdapterConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => AdapterConfig::default(),
    };
    if let Some(engine) = &cli.engine {
        config.engine_path = engine.clone();
    }
    if let Some(args) = &cli.engine_args {
        config.engine_args = args.clone();
    }
    if let Some(ms) = cli.grace_ms {
        config.grace_period = Duration::from_millis(ms);
    }
    for opt in cli.uci_options.iter().flatten() {
        let Some((name, value)) = opt.split_once('=') else {
            bail!("invalid --uci-option `{opt}` (expected Name=Value)");
        };
        config
            .options
            .insert(name.trim().to_string(), toml::Value::String(value.trim().to_string()));
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn emit(json: bool, event: &PlayEvent<'_>) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }
    match event {
        PlayEvent::Start {
            engine,
            fen,
            level,
            perspective,
        } => println!("{engine} thinking at level {level} ({perspective:?} perspective): {fen}"),
        PlayEvent::Evaluation { display, .. } => println!("eval {display}"),
        PlayEvent::Outcome { outcome, mv, error } => match (mv, error) {
            (Some(mv), _) => println!("bestmove {mv}"),
            (None, Some(err)) => println!("{outcome}: {err}"),
            (None, None) => println!("{outcome}"),
        },
    }
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let config = build_config(&cli)?;
    let fen = cli.fen.clone().unwrap_or_else(|| START_FEN.to_string());
    let level = match (cli.level, cli.difficulty) {
        (Some(level), _) => level,
        (None, Some(difficulty)) => difficulty.strength(),
        (None, None) => Difficulty::default().strength(),
    };
    let side_to_move = Color::from_fen(&fen).unwrap_or(Color::White);
    let perspective = cli.player_color.unwrap_or(side_to_move);

    let (interrupt_tx, interrupts) = unbounded::<()>();
    ctrlc::set_handler(move || {
        let _ = interrupt_tx.send(());
    })
    .context("failed to install Ctrl-C handler")?;

    let mut adapter = EngineAdapter::new(config);
    adapter.initialize().context("failed to start engine")?;
    if !adapter.wait_ready(READY_TIMEOUT) {
        log::warn!("engine did not acknowledge uci within {READY_TIMEOUT:?}");
    }

    let engine_name = adapter
        .engine_name()
        .unwrap_or_else(|| adapter.config().engine_path.display().to_string());
    emit(
        cli.json,
        &PlayEvent::Start {
            engine: engine_name,
            fen: &fen,
            level: rchess_engine::clamp_strength(level),
            perspective,
        },
    )?;

    let (tx, updates) = unbounded::<Update>();
    let eval_tx = tx.clone();
    adapter.find_best_move(
        &fen,
        level,
        move |outcome| {
            let _ = tx.send(Update::Outcome(outcome));
        },
        Some(Box::new(move |eval| {
            let _ = eval_tx.send(Update::Evaluation(eval));
        })),
    );

    let mut interrupted = false;
    let outcome = loop {
        select! {
            recv(updates) -> update => match update {
                Ok(Update::Evaluation(eval)) => {
                    let score = eval.from_perspective(side_to_move, perspective);
                    emit(cli.json, &PlayEvent::Evaluation { score, display: score.display() })?;
                }
                Ok(Update::Outcome(outcome)) => break outcome,
                Err(_) => bail!("engine adapter dropped the search"),
            },
            recv(interrupts) -> _ => {
                if interrupted {
                    adapter.terminate();
                    bail!("interrupted");
                }
                interrupted = true;
                log::warn!("interrupt received, stopping search (press Ctrl-C again to quit)");
                adapter.stop();
            },
        }
    };

    let (mv, error) = match &outcome {
        SearchOutcome::Move(mv) => (Some(*mv), None),
        SearchOutcome::EngineError(e) => (None, Some(e.clone())),
        _ => (None, None),
    };
    emit(
        cli.json,
        &PlayEvent::Outcome {
            outcome: outcome.label(),
            mv,
            error,
        },
    )?;
    adapter.terminate();

    match outcome {
        SearchOutcome::Move(_) | SearchOutcome::NoLegalMove => Ok(()),
        other => bail!("search did not produce a move: {}", other.label()),
    }
}
