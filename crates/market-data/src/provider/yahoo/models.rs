//! Yahoo Finance quoteSummary response models.
//!
//! Only the `price`, `summaryProfile` and `summaryDetail` modules are read;
//! they carry everything a stock info payload needs.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YahooQuoteSummaryResponse {
    pub quote_summary: YahooQuoteSummary,
}

#[derive(Debug, Deserialize)]
pub struct YahooQuoteSummary {
    /// `null` when the symbol is unknown.
    pub result: Option<Vec<YahooQuoteSummaryResult>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YahooQuoteSummaryResult {
    pub price: Option<YahooPriceData>,
    pub summary_profile: Option<YahooSummaryProfile>,
    pub summary_detail: Option<YahooSummaryDetail>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YahooPriceData {
    pub currency: Option<String>,
    pub short_name: Option<String>,
    pub long_name: Option<String>,
    pub market_cap: Option<YahooValue>,
}

/// `{"raw": 123.45, "fmt": "123.45"}`, or `{}` when Yahoo has no value.
#[derive(Debug, Deserialize, Clone)]
pub struct YahooValue {
    pub raw: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YahooSummaryProfile {
    pub sector: Option<String>,
    pub industry: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YahooSummaryDetail {
    pub market_cap: Option<YahooValue>,
    #[serde(rename = "trailingPE")]
    pub trailing_pe: Option<YahooValue>,
    #[serde(rename = "forwardPE")]
    pub forward_pe: Option<YahooValue>,
    pub dividend_yield: Option<YahooValue>,
    pub fifty_two_week_high: Option<YahooValue>,
    pub fifty_two_week_low: Option<YahooValue>,
}

/// Raw number behind an optional Yahoo value.
pub fn raw(value: &Option<YahooValue>) -> Option<f64> {
    value.as_ref().and_then(|v| v.raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_value_null_and_empty() {
        let detail: YahooValue = serde_json::from_str(r#"{"raw": null, "fmt": null}"#).unwrap();
        assert_eq!(detail.raw, None);
        let detail: YahooValue = serde_json::from_str("{}").unwrap();
        assert_eq!(detail.raw, None);
    }

    #[test]
    fn test_deserialize_summary_detail() {
        // Stocks without dividends come back with an empty dividendYield object
        let json = r#"{
            "marketCap": {"raw": 2800000000000, "fmt": "2.8T"},
            "trailingPE": {"raw": 28.5, "fmt": "28.50"},
            "dividendYield": {},
            "fiftyTwoWeekHigh": {"raw": 199.62, "fmt": "199.62"},
            "fiftyTwoWeekLow": {"raw": 124.17, "fmt": "124.17"}
        }"#;
        let detail: YahooSummaryDetail = serde_json::from_str(json).unwrap();
        assert_eq!(raw(&detail.market_cap), Some(2800000000000.0));
        assert_eq!(raw(&detail.trailing_pe), Some(28.5));
        assert_eq!(raw(&detail.forward_pe), None);
        assert_eq!(raw(&detail.dividend_yield), None);
        assert_eq!(raw(&detail.fifty_two_week_low), Some(124.17));
    }

    #[test]
    fn test_deserialize_empty_result() {
        let json = r#"{"quoteSummary": {"result": null, "error": {"code": "Not Found"}}}"#;
        let parsed: YahooQuoteSummaryResponse = serde_json::from_str(json).unwrap();
        assert!(parsed.quote_summary.result.is_none());

        let json = r#"{"quoteSummary": {"result": []}}"#;
        let parsed: YahooQuoteSummaryResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.quote_summary.result.map(|r| r.len()), Some(0));
    }
}
