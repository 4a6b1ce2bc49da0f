use serde::{Deserialize, Serialize};

use crate::piece::{Board, Piece};
use crate::player::PlayerSummary;

// Every wire record carries a `type` discriminator. The gameplay kinds
// (`score`, `board`, `next_piece`, `hold_piece`) appear in both enums
// with identical field sets: the server forwards them to the opponent
// without looking inside.

#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    Join { username: String },
    Ready { ready: bool },
    SoloStart,
    Score { value: i64 },
    Board { board: Board },
    NextPiece { piece: Piece },
    HoldPiece { piece: Piece },
    InitialPieces { next_piece: Piece, hold_piece: Piece },
}

#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Lobby {
        players: Vec<PlayerSummary>,
    },
    Countdown {
        value: u8,
    },
    Start {
        is_solo: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        opponent_next: Option<Piece>,
        #[serde(skip_serializing_if = "Option::is_none")]
        opponent_hold: Option<Piece>,
    },
    GameCancelled,
    Score {
        value: i64,
    },
    Board {
        board: Board,
    },
    NextPiece {
        piece: Piece,
    },
    HoldPiece {
        piece: Piece,
    },
}
