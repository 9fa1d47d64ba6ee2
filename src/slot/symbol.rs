use serde::{
    Deserialize,
    Serialize,
};
use std::fmt;

/// Reel symbols, encoded on the ledger as single ASCII bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Symbol {
    A,
    B,
    C,
    D,
    Blank,
}

impl Symbol {
    pub const ALL: [Symbol; 5] = [Symbol::A, Symbol::B, Symbol::C, Symbol::D, Symbol::Blank];
    pub const PAYING: [Symbol; 4] = [Symbol::A, Symbol::B, Symbol::C, Symbol::D];

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'A' => Some(Symbol::A),
            b'B' => Some(Symbol::B),
            b'C' => Some(Symbol::C),
            b'D' => Some(Symbol::D),
            b'_' => Some(Symbol::Blank),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Symbol::A => b'A',
            Symbol::B => b'B',
            Symbol::C => b'C',
            Symbol::D => b'D',
            Symbol::Blank => b'_',
        }
    }

    /// Blank cells never form a paying run.
    pub fn is_paying(self) -> bool {
        self != Symbol::Blank
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_byte() as char)
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    #[test]
    fn from_byte__accepts_only_reel_alphabet() {
        for symbol in Symbol::ALL {
            assert_eq!(Symbol::from_byte(symbol.as_byte()), Some(symbol));
        }
        assert_eq!(Symbol::from_byte(b'E'), None);
        assert_eq!(Symbol::from_byte(b'a'), None);
    }
}
