//! UCI wire format: commands sent to the engine and lines read back.

use std::fmt;

use crate::types::{Evaluation, ScoreKind};

/// `bestmove` tokens meaning the side to move has no legal move.
const NO_MOVE_TOKENS: [&str; 2] = ["(none)", "0000"];

/// Commands written to the engine's stdin, one per line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UciCommand {
    Uci,
    IsReady,
    UciNewGame,
    SetOption { name: String, value: Option<String> },
    PositionFen(String),
    Go { depth: u32, movetime_ms: u64 },
    Stop,
    Quit,
}

impl UciCommand {
    pub fn set_option(name: impl Into<String>, value: impl fmt::Display) -> Self {
        UciCommand::SetOption {
            name: name.into(),
            value: Some(value.to_string()),
        }
    }
}

impl fmt::Display for UciCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UciCommand::Uci => write!(f, "uci"),
            UciCommand::IsReady => write!(f, "isready"),
            UciCommand::UciNewGame => write!(f, "ucinewgame"),
            UciCommand::SetOption { name, value } => {
                write!(f, "setoption name {name}")?;
                if let Some(value) = value {
                    write!(f, " value {value}")?;
                }
                Ok(())
            }
            UciCommand::PositionFen(fen) => write!(f, "position fen {fen}"),
            UciCommand::Go { depth, movetime_ms } => {
                write!(f, "go depth {depth} movetime {movetime_ms}")
            }
            UciCommand::Stop => write!(f, "stop"),
            UciCommand::Quit => write!(f, "quit"),
        }
    }
}

/// Terminal `bestmove` token after interpretation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BestMoveToken {
    /// `(none)`, `0000`, or no token at all.
    NoMove,
    Token(String),
}

/// One line of engine output, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineLine {
    UciOk,
    ReadyOk,
    IdName(String),
    OptionName(String),
    Info(InfoSnapshot),
    BestMove {
        best: BestMoveToken,
        ponder: Option<String>,
    },
    /// Anything else; ignored by the adapter.
    Other,
}

impl EngineLine {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        match line {
            "uciok" => return EngineLine::UciOk,
            "readyok" => return EngineLine::ReadyOk,
            _ => {}
        }
        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some("info") => EngineLine::Info(InfoSnapshot::from_line(line)),
            Some("bestmove") => {
                let best = match tokens.next() {
                    Some(tok) if !NO_MOVE_TOKENS.contains(&tok) => {
                        BestMoveToken::Token(tok.to_string())
                    }
                    _ => BestMoveToken::NoMove,
                };
                let ponder = match (tokens.next(), tokens.next()) {
                    (Some("ponder"), Some(mv)) => Some(mv.to_string()),
                    _ => None,
                };
                EngineLine::BestMove { best, ponder }
            }
            Some("id") => match line.strip_prefix("id name ") {
                Some(name) => EngineLine::IdName(name.trim().to_string()),
                None => EngineLine::Other,
            },
            Some("option") => line
                .strip_prefix("option ")
                .and_then(parse_option_name)
                .map_or(EngineLine::Other, EngineLine::OptionName),
            _ => EngineLine::Other,
        }
    }
}

/// info 行から取り出した値。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InfoSnapshot {
    pub depth: Option<u32>,
    pub seldepth: Option<u32>,
    pub multipv: Option<u32>,
    pub nodes: Option<u64>,
    pub time_ms: Option<u64>,
    pub nps: Option<u64>,
    pub score: Option<Evaluation>,
    pub pv: Vec<String>,
}

impl InfoSnapshot {
    /// info 行を解析する。解釈できないトークンは読み飛ばす。
    pub fn from_line(line: &str) -> Self {
        let mut snap = InfoSnapshot::default();
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.first().copied() != Some("info") {
            return snap;
        }
        let mut i = 1;
        while i < tokens.len() {
            let next = tokens.get(i + 1).copied();
            match tokens[i] {
                "depth" => {
                    snap.depth = next.and_then(|t| t.parse().ok());
                    i += 1;
                }
                "seldepth" => {
                    snap.seldepth = next.and_then(|t| t.parse().ok());
                    i += 1;
                }
                "multipv" => {
                    snap.multipv = next.and_then(|t| t.parse().ok());
                    i += 1;
                }
                "nodes" => {
                    snap.nodes = next.and_then(|t| t.parse().ok());
                    i += 1;
                }
                "time" => {
                    snap.time_ms = next.and_then(|t| t.parse().ok());
                    i += 1;
                }
                "nps" => {
                    snap.nps = next.and_then(|t| t.parse().ok());
                    i += 1;
                }
                "score" => {
                    let value = tokens.get(i + 2).and_then(|t| t.parse::<i32>().ok());
                    let kind = match next {
                        Some("cp") => Some(ScoreKind::Centipawn),
                        Some("mate") => Some(ScoreKind::Mate),
                        _ => None,
                    };
                    if let (Some(kind), Some(value)) = (kind, value) {
                        snap.score = Some(Evaluation { kind, value });
                        i += 2;
                    }
                }
                "pv" => {
                    snap.pv = tokens[i + 1..].iter().map(|t| t.to_string()).collect();
                    break;
                }
                // 自由文なので以降は解析しない
                "string" => break,
                _ => {}
            }
            i += 1;
        }
        snap
    }

    /// multipv 未指定または 1 のときだけ主読み筋とみなす。
    pub fn is_primary(&self) -> bool {
        self.multipv.is_none_or(|n| n == 1)
    }
}

pub fn parse_option_name(line: &str) -> Option<String> {
    let mut tokens = line.split_whitespace().peekable();
    while let Some(tok) = tokens.next() {
        if tok == "name" {
            let mut parts = Vec::new();
            while let Some(next) = tokens.next_if(|t| *t != "type") {
                parts.push(next);
            }
            if !parts.is_empty() {
                return Some(parts.join(" "));
            }
        }
    }
    None
}
