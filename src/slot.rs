//! Pure slot math: symbols, the 5x3 grid, reel strips, paylines and payouts.

pub mod grid;
pub mod payline;
pub mod paytable;
pub mod reels;
pub mod symbol;

pub use grid::{
    GRID_LEN,
    Grid,
    REEL_COUNT,
    ROW_COUNT,
};
pub use payline::{
    Evaluation,
    PAYLINE_COUNT,
    PAYLINES,
    Payline,
    PaylineEvaluator,
    PaylineMatch,
    WinningPayline,
};
pub use paytable::Paytable;
pub use reels::ReelSet;
pub use symbol::Symbol;
