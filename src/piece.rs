use serde::{Deserialize, Serialize};

// The server relays boards and pieces verbatim and never inspects cell
// values; these types exist only to pin down the wire shape.

/// Row-major grid of cell values. The reference client uses 10x20, but
/// the server accepts any dimensions.
pub type Board = Vec<Vec<u8>>;

/// A tetromino described by its occupancy grid and board position.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Piece {
    pub shape: Vec<Vec<u8>>,
    pub col: i32,
    pub row: i32,
}
