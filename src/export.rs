use crate::{
    Error,
    Result,
    spin::{
        SpinRecord,
        SpinStatus,
    },
};
use serde::Serialize;

pub const CSV_COLUMNS: [&str; 9] = [
    "date",
    "round",
    "tx_id",
    "bet_per_line",
    "paylines",
    "total_bet",
    "payout",
    "net_result",
    "result",
];

/// One exported line; a pure projection of a terminal spin.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ExportRow {
    pub date: String,
    pub round: Option<u64>,
    pub tx_id: String,
    pub bet_per_line: u64,
    pub paylines: u64,
    pub total_bet: u64,
    pub payout: u64,
    pub net_result: i128,
    pub result: &'static str,
}

impl ExportRow {
    pub fn from_record(record: &SpinRecord) -> Option<Self> {
        let status = record.status();
        if !status.is_terminal() {
            return None;
        }
        let payout = record.payout();
        let total_bet = record.total_bet();
        let result = match status {
            SpinStatus::Failed => "FAILED",
            SpinStatus::Expired => "EXPIRED",
            _ if payout > 0 => "WIN",
            _ => "LOSS",
        };
        // a spin that never reached the ledger cost nothing
        let net_result = match (status, record.tx_id()) {
            (SpinStatus::Completed, _) | (_, Some(_)) => payout as i128 - total_bet as i128,
            _ => 0,
        };
        Some(Self {
            date: record.placed_at().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            round: record.round(),
            tx_id: record.tx_id().unwrap_or_default().to_string(),
            bet_per_line: record.bet_per_line(),
            paylines: record.selected_paylines(),
            total_bet,
            payout,
            net_result,
            result,
        })
    }
}

/// Header plus one row per terminal record, in the order given.
pub fn export_csv(records: &[SpinRecord]) -> Result<String> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(CSV_COLUMNS)?;
    for row in records.iter().filter_map(ExportRow::from_record) {
        writer.serialize(row)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| Error::Export(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| Error::Export(e.to_string()))
}
