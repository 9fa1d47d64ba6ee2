use crate::{
    Error,
    Result,
    slot::symbol::Symbol,
};
use itertools::Itertools;
use serde::{
    Deserialize,
    Serialize,
};
use std::fmt;

pub const REEL_COUNT: usize = 5;
pub const ROW_COUNT: usize = 3;
pub const GRID_LEN: usize = REEL_COUNT * ROW_COUNT;

/// A `reels x rows` symbol grid stored column-major: `cells[col][row]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Grid {
    cells: [[Symbol; ROW_COUNT]; REEL_COUNT],
}

impl Grid {
    pub fn from_columns(cells: [[Symbol; ROW_COUNT]; REEL_COUNT]) -> Self {
        Self { cells }
    }

    /// Parses a grid string where position `col * ROW_COUNT + row` holds `grid[col][row]`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != GRID_LEN {
            return Err(Error::InvalidReconstructionInput(format!(
                "grid string must be {GRID_LEN} symbols, got {}",
                bytes.len()
            )));
        }
        let mut cells = [[Symbol::Blank; ROW_COUNT]; REEL_COUNT];
        for (pos, byte) in bytes.iter().enumerate() {
            let symbol = Symbol::from_byte(*byte).ok_or_else(|| {
                Error::InvalidReconstructionInput(format!(
                    "unknown symbol {:?} at position {pos}",
                    *byte as char
                ))
            })?;
            cells[pos / ROW_COUNT][pos % ROW_COUNT] = symbol;
        }
        Ok(Self { cells })
    }

    pub fn symbol(&self, reel: usize, row: usize) -> Symbol {
        self.cells[reel][row]
    }

    pub fn column(&self, reel: usize) -> [Symbol; ROW_COUNT] {
        self.cells[reel]
    }

    pub fn to_bytes(&self) -> [u8; GRID_LEN] {
        let mut out = [0u8; GRID_LEN];
        for (col, column) in self.cells.iter().enumerate() {
            for (row, symbol) in column.iter().enumerate() {
                out[col * ROW_COUNT + row] = symbol.as_byte();
            }
        }
        out
    }

    pub fn grid_string(&self) -> String {
        self.to_bytes().iter().map(|b| *b as char).collect()
    }

    /// Row-major text rendering, one line per row, for logs and the demo binary.
    pub fn rows_display(&self) -> String {
        (0..ROW_COUNT)
            .map(|row| (0..REEL_COUNT).map(|col| self.cells[col][row]).join(" "))
            .join("\n")
    }
}

impl fmt::Display for Grid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.grid_string())
    }
}

impl TryFrom<String> for Grid {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Grid::from_bytes(value.as_bytes())
    }
}

impl From<Grid> for String {
    fn from(grid: Grid) -> Self {
        grid.grid_string()
    }
}
