use std::borrow::Cow;

/// Provider identifier - mostly static constants ("yfinance", "fmp", ...)
pub type ProviderId = Cow<'static, str>;

/// Normalized request key (ticker, optionally with a `@period` suffix)
pub type DataKey = String;

/// Upper-case and trim a raw key. Returns `None` for blank input.
pub fn normalize_key(raw: &str) -> Option<DataKey> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_uppercase())
}
