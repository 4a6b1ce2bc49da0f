use serde::{Deserialize, Serialize};

use crate::piece::Piece;

/// A registered lobby member. Keyed by connection identity, not by
/// name: the protocol does not enforce username uniqueness.
#[derive(Clone, Debug)]
pub struct Player {
    pub name: String,
    pub is_ready: bool,
    // Stashed from `initial_pieces` until match start, then shipped to
    // the opponent inside `start`.
    pub initial_next: Option<Piece>,
    pub initial_hold: Option<Piece>,
}

impl Player {
    pub fn new(name: String) -> Self {
        Player {
            name,
            is_ready: false,
            initial_next: None,
            initial_hold: None,
        }
    }
}

/// One `lobby` broadcast entry.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct PlayerSummary {
    pub name: String,
    pub ready: bool,
}
