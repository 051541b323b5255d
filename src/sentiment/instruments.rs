use crate::error::AppError;
use serde::Serialize;
use std::collections::BTreeSet;

pub const DEFAULT_SELECTION_SIZE: usize = 5;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentInfo {
    pub symbol: &'static str,
    pub name: &'static str,
}

pub const KNOWN_INSTRUMENTS: [InstrumentInfo; 10] = [
    InstrumentInfo { symbol: "BTC", name: "Bitcoin" },
    InstrumentInfo { symbol: "ETH", name: "Ethereum" },
    InstrumentInfo { symbol: "USDT", name: "Tether" },
    InstrumentInfo { symbol: "XRP", name: "Ripple" },
    InstrumentInfo { symbol: "BNB", name: "Binance" },
    InstrumentInfo { symbol: "SOL", name: "Solana" },
    InstrumentInfo { symbol: "USDC", name: "USD Coin" },
    InstrumentInfo { symbol: "TRX", name: "Tron" },
    InstrumentInfo { symbol: "DOGE", name: "Dogecoin" },
    InstrumentInfo { symbol: "ADA", name: "Cardano" },
];

pub fn default_selection() -> BTreeSet<String> {
    KNOWN_INSTRUMENTS
        .iter()
        .take(DEFAULT_SELECTION_SIZE)
        .map(|info| info.symbol.to_string())
        .collect()
}

pub fn display_name(symbol: &str) -> Option<&'static str> {
    KNOWN_INSTRUMENTS
        .iter()
        .find(|info| info.symbol.eq_ignore_ascii_case(symbol))
        .map(|info| info.name)
}

pub fn is_known(symbol: &str) -> bool {
    display_name(symbol).is_some()
}

pub fn normalize_symbol(raw: &str) -> Result<String, AppError> {
    let symbol = raw.trim().to_ascii_uppercase();
    if symbol.is_empty() || !symbol.chars().all(|ch| ch.is_ascii_alphanumeric()) {
        return Err(AppError::InvalidArgument(format!(
            "instrument symbol must be non-empty alphanumeric ASCII (got '{raw}')"
        )));
    }
    Ok(symbol)
}

/// Normalizes every symbol; an empty selection is valid and means "idle".
pub fn normalize_selection<I, S>(raw: I) -> Result<BTreeSet<String>, AppError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw.into_iter()
        .map(|symbol| normalize_symbol(symbol.as_ref()))
        .collect()
}

/// Keeps the known symbols, silently dropping anything unrecognized.
pub fn filter_known<I, S>(raw: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw.into_iter()
        .filter_map(|symbol| normalize_symbol(symbol.as_ref()).ok())
        .filter(|symbol| is_known(symbol))
        .collect()
}
