use crate::{
    Error,
    Result,
    slot::{
        grid::{
            GRID_LEN,
            REEL_COUNT,
            ROW_COUNT,
        },
        symbol::Symbol,
    },
};
use sha2::{
    Digest,
    Sha256,
};

pub const REEL_LENGTH: usize = 100;

const CANONICAL_STRIPS: [&[u8; REEL_LENGTH]; REEL_COUNT] = [
    b"_CCC__BD___D_____D_____D__DBDDCC_D_C_D__AD_D_CB_C_A_B___B_______DD___D_C_A_____B__C__D______D_______",
    b"C_A_____C__DC_____B__B_CD_B___CD__DAD__C__C______CDD_______C_DA________DDD____CDDD___DB____BD__B____",
    b"___D_D_B_________CD__D__C_C____B__A___CDB__BC_D__D__CD_C_________D___A_DC__B______B_DDDDD_____C_CDA_",
    b"C___C_CDDDDC__D__CCB____D_B__B______D______BD_____A____D_D__AD__D__B___B__C____A____C_D_D___C__CDD__",
    b"_________________CC___DC___DDB_BDADDC______B____C__D___D__CA_______CD__D_D_C_______BD_C_DBA_BDD__CD_",
];

pub fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// The reel strips the ledger samples from, plus the canonical grid derivation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReelSet {
    strips: Vec<Vec<u8>>,
}

impl ReelSet {
    pub fn new(strips: Vec<Vec<u8>>) -> Result<Self> {
        if strips.len() != REEL_COUNT {
            return Err(Error::Config(format!(
                "expected {REEL_COUNT} reels, got {}",
                strips.len()
            )));
        }
        let len = strips[0].len();
        if len < ROW_COUNT + 2 {
            return Err(Error::Config(format!("reel length {len} is too short")));
        }
        for (reel, strip) in strips.iter().enumerate() {
            if strip.len() != len {
                return Err(Error::Config(format!(
                    "reel {reel} has length {}, expected {len}",
                    strip.len()
                )));
            }
            if let Some(pos) = strip.iter().position(|b| Symbol::from_byte(*b).is_none()) {
                return Err(Error::Config(format!(
                    "reel {reel} has an unknown symbol at {pos}"
                )));
            }
        }
        Ok(Self { strips })
    }

    pub fn canonical() -> Self {
        Self {
            strips: CANONICAL_STRIPS.iter().map(|s| s.to_vec()).collect(),
        }
    }

    pub fn reel_length(&self) -> usize {
        self.strips[0].len()
    }

    /// Stops are drawn from `0..reel_length - (window + 1)`.
    fn max_reel_stop(&self) -> u64 {
        (self.reel_length() - (ROW_COUNT + 1)) as u64
    }

    pub fn reel_tops(&self, outcome_hash: &[u8; 32]) -> [usize; REEL_COUNT] {
        let modulus = self.max_reel_stop();
        let mut tops = [0usize; REEL_COUNT];
        for (reel, top) in tops.iter_mut().enumerate() {
            let tag = [b'1' + reel as u8];
            let digest = sha256(&[outcome_hash, &tag]);
            let mut tail = [0u8; 8];
            tail.copy_from_slice(&digest[24..]);
            *top = (u64::from_be_bytes(tail) % modulus) as usize;
        }
        tops
    }

    /// `ROW_COUNT` consecutive symbols from `top`, wrapping around the strip.
    pub fn window(&self, reel: usize, top: usize) -> [u8; ROW_COUNT] {
        let strip = &self.strips[reel];
        let mut out = [0u8; ROW_COUNT];
        for (k, slot) in out.iter_mut().enumerate() {
            *slot = strip[(top + k) % strip.len()];
        }
        out
    }

    /// Grid string for a wager: `sha256(seed || wager_key)` picks a stop per reel.
    pub fn derive_grid_bytes(&self, block_seed: &[u8], wager_key: &[u8]) -> [u8; GRID_LEN] {
        let outcome_hash = sha256(&[block_seed, wager_key]);
        let tops = self.reel_tops(&outcome_hash);
        let mut out = [0u8; GRID_LEN];
        for (reel, top) in tops.iter().enumerate() {
            let window = self.window(reel, *top);
            out[reel * ROW_COUNT..(reel + 1) * ROW_COUNT].copy_from_slice(&window);
        }
        out
    }
}

impl Default for ReelSet {
    fn default() -> Self {
        Self::canonical()
    }
}
