//! Shared primitives: wallet-address identity and USDC amount handling.
//!
//! Amounts are carried everywhere as integer micro-USDC (the token's own
//! 6-decimal base unit); the HTTP layer converts to and from decimal USDC
//! numbers at the edge.

pub const MICROUSDC_PER_USDC: u64 = 1_000_000;

/// Canonical form for wallet addresses: trimmed and lower-cased.
///
/// All ledger rows persist the canonical form, and every lookup normalizes
/// first, so identity matching is case-insensitive end to end.
pub fn normalize_address(address: &str) -> String {
    address.trim().to_ascii_lowercase()
}

/// Convert a decimal USDC amount (as received from the web client) to
/// micro-USDC. Negative and non-finite inputs clamp to zero; callers that
/// need to reject them validate before converting.
pub fn microusdc_from_usdc(value: f64) -> u64 {
    if !value.is_finite() || value <= 0.0 {
        return 0;
    }
    (value * MICROUSDC_PER_USDC as f64).round() as u64
}

pub fn usdc_from_microusdc(amount: u64) -> f64 {
    amount as f64 / MICROUSDC_PER_USDC as f64
}
