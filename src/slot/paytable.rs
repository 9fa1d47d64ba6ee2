use crate::{
    Error,
    Result,
    slot::symbol::Symbol,
};
use std::collections::HashMap;

pub const MIN_PAYABLE_COUNT: usize = 3;
pub const MAX_PAYABLE_COUNT: usize = 5;

/// Multiplier lookup for `(symbol, run length)`.
///
/// Construction fails unless every paying symbol has an entry for every payable count,
/// so a lookup during evaluation can never miss.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Paytable {
    multipliers: HashMap<(Symbol, usize), u64>,
}

impl Paytable {
    pub fn new(entries: impl IntoIterator<Item = (Symbol, usize, u64)>) -> Result<Self> {
        let mut multipliers = HashMap::new();
        for (symbol, count, multiplier) in entries {
            if !symbol.is_paying() {
                return Err(Error::Config(format!("symbol {symbol} cannot pay")));
            }
            if !(MIN_PAYABLE_COUNT..=MAX_PAYABLE_COUNT).contains(&count) {
                return Err(Error::Config(format!(
                    "payable count {count} for {symbol} outside {MIN_PAYABLE_COUNT}..={MAX_PAYABLE_COUNT}"
                )));
            }
            if multipliers.insert((symbol, count), multiplier).is_some() {
                return Err(Error::Config(format!(
                    "duplicate paytable entry for {symbol} x{count}"
                )));
            }
        }
        for symbol in Symbol::PAYING {
            for count in MIN_PAYABLE_COUNT..=MAX_PAYABLE_COUNT {
                if !multipliers.contains_key(&(symbol, count)) {
                    return Err(Error::Config(format!(
                        "paytable missing entry for {symbol} x{count}"
                    )));
                }
            }
        }
        Ok(Self { multipliers })
    }

    /// The table the slot contract pays out with.
    pub fn canonical() -> Self {
        let multipliers = [
            ((Symbol::A, 3), 200),
            ((Symbol::A, 4), 1_000),
            ((Symbol::A, 5), 10_000),
            ((Symbol::B, 3), 60),
            ((Symbol::B, 4), 200),
            ((Symbol::B, 5), 1_000),
            ((Symbol::C, 3), 30),
            ((Symbol::C, 4), 100),
            ((Symbol::C, 5), 500),
            ((Symbol::D, 3), 10),
            ((Symbol::D, 4), 55),
            ((Symbol::D, 5), 250),
        ]
        .into_iter()
        .collect();
        Self { multipliers }
    }

    /// Zero for blanks and runs shorter than the minimum payable count.
    pub fn multiplier(&self, symbol: Symbol, count: usize) -> u64 {
        if !symbol.is_paying() || count < MIN_PAYABLE_COUNT {
            return 0;
        }
        let count = count.min(MAX_PAYABLE_COUNT);
        self.multipliers.get(&(symbol, count)).copied().unwrap_or(0)
    }

    pub fn max_multiplier(&self) -> u64 {
        self.multipliers.values().copied().max().unwrap_or(0)
    }
}

impl Default for Paytable {
    fn default() -> Self {
        Self::canonical()
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    fn full_entries() -> Vec<(Symbol, usize, u64)> {
        Symbol::PAYING
            .iter()
            .flat_map(|s| (3..=5).map(move |c| (*s, c, c as u64)))
            .collect()
    }

    #[test]
    fn canonical__matches_contract_payouts() {
        let table = Paytable::canonical();
        assert_eq!(table.multiplier(Symbol::A, 5), 10_000);
        assert_eq!(table.multiplier(Symbol::B, 4), 200);
        assert_eq!(table.multiplier(Symbol::C, 3), 30);
        assert_eq!(table.multiplier(Symbol::D, 4), 55);
        assert_eq!(table.max_multiplier(), 10_000);
    }

    #[test]
    fn canonical__passes_totality_check() {
        let entries: Vec<_> = Symbol::PAYING
            .iter()
            .flat_map(|s| (3..=5).map(move |c| (*s, c)))
            .map(|(s, c)| (s, c, Paytable::canonical().multiplier(s, c)))
            .collect();
        assert_eq!(Paytable::new(entries).unwrap(), Paytable::canonical());
    }

    #[test]
    fn multiplier__is_zero_below_minimum_and_for_blank() {
        let table = Paytable::canonical();
        assert_eq!(table.multiplier(Symbol::A, 2), 0);
        assert_eq!(table.multiplier(Symbol::Blank, 5), 0);
    }

    #[test]
    fn new__rejects_missing_entry() {
        // given
        let mut entries = full_entries();
        entries.retain(|(s, c, _)| !(*s == Symbol::C && *c == 4));

        // when
        let result = Paytable::new(entries);

        // then
        assert!(matches!(result, Err(Error::Config(msg)) if msg.contains("C x4")));
    }

    #[test]
    fn new__rejects_blank_and_duplicates() {
        let mut with_blank = full_entries();
        with_blank.push((Symbol::Blank, 3, 1));
        assert!(Paytable::new(with_blank).is_err());

        let mut duplicated = full_entries();
        duplicated.push((Symbol::A, 3, 9));
        assert!(Paytable::new(duplicated).is_err());
    }
}
