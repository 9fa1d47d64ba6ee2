use crate::slot::{
    grid::{
        Grid,
        REEL_COUNT,
    },
    paytable::{
        MIN_PAYABLE_COUNT,
        Paytable,
    },
    symbol::Symbol,
};
use serde::{
    Deserialize,
    Serialize,
};

/// One row index per reel.
pub type Payline = [usize; REEL_COUNT];

pub const PAYLINE_COUNT: usize = 20;

pub const PAYLINES: [Payline; PAYLINE_COUNT] = [
    [1, 1, 1, 1, 1], // middle
    [0, 0, 0, 0, 0], // top
    [2, 2, 2, 2, 2], // bottom
    [0, 1, 2, 1, 0], // v
    [2, 1, 0, 1, 2], // inverted v
    [0, 1, 1, 2, 2], // diagonal down
    [2, 1, 1, 0, 0], // diagonal up
    [0, 0, 1, 0, 0], // zigzag top
    [2, 2, 1, 2, 2], // zigzag bottom
    [0, 1, 2, 2, 1], // staircase down
    [2, 1, 0, 0, 1], // staircase up
    [1, 0, 0, 0, 1],
    [1, 2, 2, 2, 1],
    [0, 2, 0, 2, 0], // top-bottom-top
    [2, 0, 2, 0, 2], // bottom-top-bottom
    [0, 2, 1, 2, 0], // outer rails up
    [2, 0, 1, 0, 2], // outer rails down
    [0, 0, 1, 2, 2], // left hook
    [2, 2, 1, 0, 0], // right hook
    [1, 0, 1, 2, 1], // wave
];

/// Longest run of identical symbols starting at reel 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PaylineMatch {
    pub symbol: Symbol,
    pub count: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WinningPayline {
    pub payline_index: usize,
    pub payline: Payline,
    pub symbol: Symbol,
    pub count: usize,
    pub multiplier: u64,
    pub win_amount: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    pub winning_paylines: Vec<WinningPayline>,
    pub total_winnings: u64,
}

#[derive(Clone, Debug, Default)]
pub struct PaylineEvaluator {
    paytable: Paytable,
}

impl PaylineEvaluator {
    pub fn new(paytable: Paytable) -> Self {
        Self { paytable }
    }

    pub fn paytable(&self) -> &Paytable {
        &self.paytable
    }

    pub fn payline_symbols(grid: &Grid, payline: &Payline) -> [Symbol; REEL_COUNT] {
        let mut symbols = [Symbol::Blank; REEL_COUNT];
        for (reel, row) in payline.iter().enumerate() {
            symbols[reel] = grid.symbol(reel, *row);
        }
        symbols
    }

    pub fn match_payline(grid: &Grid, payline: &Payline) -> PaylineMatch {
        let symbols = Self::payline_symbols(grid, payline);
        let symbol = symbols[0];
        let count = symbols.iter().take_while(|s| **s == symbol).count();
        PaylineMatch { symbol, count }
    }

    /// Scores the first `active_payline_count` canonical paylines independently and sums them.
    pub fn evaluate(
        &self,
        grid: &Grid,
        bet_per_line: u64,
        active_payline_count: usize,
    ) -> Evaluation {
        let winning_paylines: Vec<WinningPayline> = PAYLINES
            .iter()
            .take(active_payline_count)
            .enumerate()
            .filter_map(|(payline_index, payline)| {
                let PaylineMatch { symbol, count } = Self::match_payline(grid, payline);
                if count < MIN_PAYABLE_COUNT {
                    return None;
                }
                let multiplier = self.paytable.multiplier(symbol, count);
                if multiplier == 0 {
                    return None;
                }
                Some(WinningPayline {
                    payline_index,
                    payline: *payline,
                    symbol,
                    count,
                    multiplier,
                    win_amount: bet_per_line.saturating_mul(multiplier),
                })
            })
            .collect();
        let total_winnings = winning_paylines
            .iter()
            .fold(0u64, |acc, w| acc.saturating_add(w.win_amount));
        Evaluation {
            winning_paylines,
            total_winnings,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use proptest::prelude::*;
    use Symbol::*;

    fn evaluator() -> PaylineEvaluator {
        PaylineEvaluator::new(Paytable::canonical())
    }

    #[test]
    fn paylines__cover_every_row_of_a_three_row_grid() {
        assert!(PAYLINES.iter().flatten().all(|row| *row < 3));
        assert_eq!(PAYLINES[1], [0, 0, 0, 0, 0]);
    }

    #[test]
    fn evaluate__two_symbol_run_pays_nothing() {
        // given top row A,A,B,C,D
        let grid = Grid::from_columns([[A, A, A], [A, B, B], [B, B, B], [C, C, C], [D, D, D]]);

        // when only the top line (index 1) is inspected
        let m = PaylineEvaluator::match_payline(&grid, &PAYLINES[1]);

        // then
        assert_eq!(m, PaylineMatch { symbol: A, count: 2 });
        let top_only: Vec<_> = evaluator()
            .evaluate(&grid, 5, 2)
            .winning_paylines
            .into_iter()
            .filter(|w| w.payline_index == 1)
            .collect();
        assert!(top_only.is_empty());
    }

    #[test]
    fn evaluate__three_symbol_run_on_top_row_pays_once() {
        // given top row A,A,A,B,C and nothing else lining up
        let grid = Grid::from_columns([
            [A, B, C],
            [A, C, D],
            [A, D, B],
            [B, Blank, C],
            [C, Blank, D],
        ]);
        let bet_per_line = 7;

        // when
        let evaluation = evaluator().evaluate(&grid, bet_per_line, 20);

        // then
        let expected = WinningPayline {
            payline_index: 1,
            payline: [0, 0, 0, 0, 0],
            symbol: A,
            count: 3,
            multiplier: 200,
            win_amount: bet_per_line * 200,
        };
        assert_eq!(evaluation.winning_paylines, vec![expected]);
        assert_eq!(evaluation.total_winnings, bet_per_line * 200);
    }

    #[test]
    fn evaluate__zero_active_paylines_pays_nothing() {
        let grid = Grid::from_bytes(b"AAAAAAAAAAAAAAA").unwrap();
        assert_eq!(evaluator().evaluate(&grid, 10, 0), Evaluation::default());
    }

    #[test]
    fn evaluate__blank_runs_never_pay() {
        let grid = Grid::from_bytes(b"_______________").unwrap();
        assert_eq!(evaluator().evaluate(&grid, 10, 20).total_winnings, 0);
    }

    #[test]
    fn evaluate__full_grid_of_a_pays_every_active_line_at_five() {
        // given
        let grid = Grid::from_bytes(b"AAAAAAAAAAAAAAA").unwrap();

        // when
        let evaluation = evaluator().evaluate(&grid, 2, 3);

        // then
        assert_eq!(evaluation.winning_paylines.len(), 3);
        assert!(evaluation.winning_paylines.iter().all(|w| w.count == 5));
        assert_eq!(evaluation.total_winnings, 3 * 2 * 10_000);
    }

    #[test]
    fn evaluate__middle_line_run_of_four() {
        // given middle row D,D,D,D,A
        let grid = Grid::from_bytes(b"_D__D__D__D__A_").unwrap();

        // when
        let evaluation = evaluator().evaluate(&grid, 3, 1);

        // then
        assert_eq!(evaluation.winning_paylines.len(), 1);
        assert_eq!(evaluation.winning_paylines[0].count, 4);
        assert_eq!(evaluation.total_winnings, 3 * 55);
    }

    fn arb_grid() -> impl Strategy<Value = Grid> {
        proptest::collection::vec(
            prop_oneof![Just(b'A'), Just(b'B'), Just(b'C'), Just(b'D'), Just(b'_')],
            15,
        )
        .prop_map(|bytes| Grid::from_bytes(&bytes).unwrap())
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
        #[test]
        fn evaluate__total_is_sum_of_independent_lines(
            grid in arb_grid(),
            bet in 1u64..=1_000,
            lines in 0usize..=20,
        ) {
            let evaluator = evaluator();
            let all = evaluator.evaluate(&grid, bet, lines);
            let per_line: u64 = (0..lines)
                .map(|i| {
                    let single = evaluator.evaluate(&grid, bet, i + 1).total_winnings;
                    let before = evaluator.evaluate(&grid, bet, i).total_winnings;
                    single - before
                })
                .sum();
            prop_assert_eq!(all.total_winnings, per_line);
            prop_assert!(all.winning_paylines.iter().all(|w| w.payline_index < lines));
            prop_assert!(all.winning_paylines.iter().all(|w| w.win_amount == bet * w.multiplier));
        }
    }
}
