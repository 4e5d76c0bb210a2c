//! Six-digit challenge codes.

use rand::{Rng, rngs::OsRng};

pub const CODE_LEN: usize = 6;

/// Draw a fresh code in `100000..=999999`.
#[must_use]
pub fn generate() -> String {
    OsRng.gen_range(100_000u32..=999_999).to_string()
}

/// Submitted codes that fail this check never reach a store.
#[must_use]
pub fn is_well_formed(code: &str) -> bool {
    code.len() == CODE_LEN && code.bytes().all(|byte| byte.is_ascii_digit())
}
