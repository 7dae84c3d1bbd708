use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Standard starting position.
pub const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    White,
    Black,
}

impl Color {
    /// Reads the active-colour field of a FEN string.
    pub fn from_fen(fen: &str) -> Option<Self> {
        match fen.split_whitespace().nth(1)? {
            "w" => Some(Color::White),
            "b" => Some(Color::Black),
            _ => None,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }
}

impl FromStr for Color {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "w" | "white" => Ok(Color::White),
            "b" | "black" => Ok(Color::Black),
            other => Err(format!("unknown color: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreKind {
    Centipawn,
    Mate,
}

/// Engine score as reported in an `info` line.
///
/// Centipawn values are in hundredths of a pawn. Mate values are signed
/// moves-to-mate; positive means the side the score is relative to mates.
/// Scores coming out of the engine are relative to the side to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    pub kind: ScoreKind,
    pub value: i32,
}

impl Evaluation {
    pub fn centipawns(value: i32) -> Self {
        Self {
            kind: ScoreKind::Centipawn,
            value,
        }
    }

    pub fn mate(value: i32) -> Self {
        Self {
            kind: ScoreKind::Mate,
            value,
        }
    }

    /// Flips the sign. Saturates so that an engine reporting `i32::MIN` cannot overflow.
    pub fn negate(self) -> Self {
        Self {
            kind: self.kind,
            value: self.value.saturating_neg(),
        }
    }

    /// Re-expresses a side-to-move score from `viewer`'s point of view.
    pub fn from_perspective(self, side_to_move: Color, viewer: Color) -> Self {
        if side_to_move == viewer {
            self
        } else {
            self.negate()
        }
    }

    /// Whether the score favours the side it is relative to. `0.0` counts as not good.
    ///
    /// `mate 0` (side to move is already mated) carries no sign, so it reads
    /// as not good from either side; use [`is_good_for`](Self::is_good_for)
    /// on the raw engine score when that matters.
    pub fn is_good_for_viewer(self) -> bool {
        self.value > 0
    }

    /// Whether a side-to-move score favours `viewer`.
    pub fn is_good_for(self, side_to_move: Color, viewer: Color) -> bool {
        match (self.kind, self.value) {
            (ScoreKind::Mate, 0) => viewer != side_to_move,
            _ => self.from_perspective(side_to_move, viewer).is_good_for_viewer(),
        }
    }

    /// Short label for an evaluation bar: `+0.4`, `-1.2`, `0.0`, `M3`.
    pub fn display(self) -> String {
        match self.kind {
            ScoreKind::Mate => format!("M{}", self.value.unsigned_abs()),
            ScoreKind::Centipawn => {
                let pawns = f64::from(self.value) / 100.0;
                if self.value > 0 {
                    format!("+{pawns:.1}")
                } else if self.value < 0 {
                    format!("{pawns:.1}")
                } else {
                    "0.0".to_string()
                }
            }
        }
    }
}

impl fmt::Display for Evaluation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

/// Board square in algebraic coordinates (`a1`..`h8`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Square {
    file: u8,
    rank: u8,
}

impl Square {
    pub fn new(file: u8, rank: u8) -> Option<Self> {
        (file < 8 && rank < 8).then_some(Self { file, rank })
    }

    pub fn file(self) -> u8 {
        self.file
    }

    pub fn rank(self) -> u8 {
        self.rank
    }

    fn parse(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [f @ b'a'..=b'h', r @ b'1'..=b'8'] => Self::new(f - b'a', r - b'1'),
            _ => None,
        }
    }
}

impl fmt::Display for Square {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", char::from(b'a' + self.file), char::from(b'1' + self.rank))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Promotion {
    Queen,
    Rook,
    Bishop,
    Knight,
}

impl Promotion {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            b'q' => Some(Promotion::Queen),
            b'r' => Some(Promotion::Rook),
            b'b' => Some(Promotion::Bishop),
            b'n' => Some(Promotion::Knight),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Promotion::Queen => 'q',
            Promotion::Rook => 'r',
            Promotion::Bishop => 'b',
            Promotion::Knight => 'n',
        }
    }
}

/// Move in UCI long algebraic form: from-square, to-square, optional promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UciMove {
    pub from: Square,
    pub to: Square,
    pub promotion: Option<Promotion>,
}

impl FromStr for UciMove {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if !(4..=5).contains(&bytes.len()) {
            return Err(format!("invalid move token length: {s}"));
        }
        let from = Square::parse(&bytes[0..2]).ok_or_else(|| format!("invalid from-square: {s}"))?;
        let to = Square::parse(&bytes[2..4]).ok_or_else(|| format!("invalid to-square: {s}"))?;
        let promotion = match bytes.get(4) {
            Some(&b) => {
                Some(Promotion::from_byte(b).ok_or_else(|| format!("invalid promotion: {s}"))?)
            }
            None => None,
        };
        Ok(Self {
            from,
            to,
            promotion,
        })
    }
}

impl fmt::Display for UciMove {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.from, self.to)?;
        if let Some(p) = self.promotion {
            write!(f, "{}", p.as_char())?;
        }
        Ok(())
    }
}

impl Serialize for UciMove {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub position_fen: String,
    pub strength_level: i32,
}

impl SearchRequest {
    pub fn new(position_fen: impl Into<String>, strength_level: i32) -> Self {
        Self {
            position_fen: position_fen.into(),
            strength_level,
        }
    }
}

/// 1 リクエストにつき必ず 1 回だけ届く探索結果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    /// Engine's chosen move.
    Move(UciMove),
    /// `bestmove (none)`: checkmate or stalemate on the board.
    NoLegalMove,
    /// No `bestmove` arrived within the move time plus grace period.
    TimedOut,
    /// A newer request replaced this one before it finished.
    Superseded,
    /// The session was terminated while this request was in flight.
    Cancelled,
    /// The engine could not be started, crashed, or sent an unusable reply.
    EngineError(String),
}

impl SearchOutcome {
    pub fn best_move(&self) -> Option<UciMove> {
        match self {
            SearchOutcome::Move(mv) => Some(*mv),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SearchOutcome::Move(_) => "move",
            SearchOutcome::NoLegalMove => "no_legal_move",
            SearchOutcome::TimedOut => "timed_out",
            SearchOutcome::Superseded => "superseded",
            SearchOutcome::Cancelled => "cancelled",
            SearchOutcome::EngineError(_) => "engine_error",
        }
    }
}

/// 評価値コールバックの型エイリアス
pub type EvaluationCallback = Box<dyn FnMut(Evaluation) + Send + 'static>;

/// 探索結果コールバックの型エイリアス
pub type OutcomeCallback = Box<dyn FnOnce(SearchOutcome) + Send + 'static>;

pub fn duration_to_millis(d: Duration) -> u64 {
    d.as_millis().min(u128::from(u64::MAX)) as u64
}
