//! Satoshi Arithmetic
//!
//! Integer-only amount handling. Bitcoin amounts are satoshis (`u64`),
//! prices are USD cents per whole BTC (`u64`). No floats anywhere on the
//! entitlement path.
//!
//! ## Conversion
//!
//! ```text
//! usd_cents = sats * price_cents_per_btc / SATS_PER_BTC
//! ```
//!
//! The product is computed in `u128` and must fit back into `u64`;
//! anything larger is an error, never a saturated value.

/// Satoshis in one bitcoin.
pub const SATS_PER_BTC: u64 = 100_000_000;

/// Hard cap on total bitcoin supply, in satoshis (21M BTC).
pub const MAX_SUPPLY_SATS: u64 = 21_000_000 * SATS_PER_BTC;

/// Whether `sats` is a plausible committed amount.
#[inline]
pub fn is_valid_amount(sats: u64) -> bool {
    sats > 0 && sats <= MAX_SUPPLY_SATS
}

/// Convert satoshis to USD cents at `price_cents_per_btc`.
///
/// Returns `None` when the result does not fit in `u64`.
pub fn sats_to_usd_cents(sats: u64, price_cents_per_btc: u64) -> Option<u64> {
    let product = (sats as u128).checked_mul(price_cents_per_btc as u128)?;
    u64::try_from(product / SATS_PER_BTC as u128).ok()
}

/// Format satoshis as a BTC string with 8 decimals (for logs).
pub fn format_btc(sats: u64) -> String {
    format!("{}.{:08}", sats / SATS_PER_BTC, sats % SATS_PER_BTC)
}
