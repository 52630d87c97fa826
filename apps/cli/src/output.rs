//! Text and JSON rendering for command output.

use serde_json::{json, Value};

use fairvalue_market_data::{
    CacheStats, DataPayload, MarketDataError, ProviderResult, ProviderStatus,
};

pub fn result_json(key: &str, result: &ProviderResult) -> Value {
    let mut value = json!({
        "key": key,
        "source": result.source,
        "cached": result.cached,
        "fetched_at": result.fetched_at.to_rfc3339(),
    });
    match &result.outcome {
        Ok(payload) => value["data"] = json!(payload),
        Err(e) => value["error"] = error_json(e),
    }
    value
}

fn error_json(error: &MarketDataError) -> Value {
    let mut value = json!({
        "kind": error.kind(),
        "message": error.to_string(),
    });
    if let MarketDataError::NoProviderAvailable { diagnostics, .. } = error {
        value["attempts"] = json!(diagnostics.attempts);
    }
    value
}

fn summarize(payload: &DataPayload) -> String {
    match payload {
        DataPayload::Price(p) => match p.change_percent {
            Some(pct) => format!("{} {} ({:+}%)", p.price, p.currency, pct),
            None => format!("{} {}", p.price, p.currency),
        },
        DataPayload::PriceHistory(h) => {
            let mut line = format!(
                "{}: {} closes, last {}",
                h.period,
                h.closes.len(),
                h.current_price
            );
            if let Some(pct) = h.change_1m_pct {
                line.push_str(&format!(", 1m {:+}%", pct));
            }
            if let Some(pct) = h.change_3m_pct {
                line.push_str(&format!(", 3m {:+}%", pct));
            }
            line
        }
        DataPayload::Eps(e) => e
            .entries
            .iter()
            .take(5)
            .map(|entry| format!("{} {}", entry.year, entry.eps))
            .collect::<Vec<_>>()
            .join(", "),
        DataPayload::Dividend(d) => format!(
            "annual {} ({} payments)",
            d.annual_dividend,
            d.payments.len()
        ),
        DataPayload::StockInfo(s) => match &s.sector {
            Some(sector) => format!("{} [{}]", s.company_name, sector),
            None => s.company_name.clone(),
        },
    }
}

pub fn result_line(key: &str, result: &ProviderResult) -> String {
    match &result.outcome {
        Ok(payload) => {
            let cached = if result.cached { " (cached)" } else { "" };
            format!("{}\t{}{}\t{}", key, result.source, cached, summarize(payload))
        }
        Err(e) => format!("{}\tERROR\t{}", key, e),
    }
}

pub fn print_results(rows: &[(String, ProviderResult)], as_json: bool) -> anyhow::Result<()> {
    if as_json {
        let values: Vec<Value> = rows.iter().map(|(k, r)| result_json(k, r)).collect();
        let out = if values.len() == 1 {
            serde_json::to_string_pretty(&values[0])?
        } else {
            serde_json::to_string_pretty(&values)?
        };
        println!("{}", out);
    } else {
        for (key, result) in rows {
            println!("{}", result_line(key, result));
        }
    }
    Ok(())
}

pub fn status_line(status: &ProviderStatus) -> String {
    let availability = match (status.enabled, status.available) {
        (false, _) => "disabled",
        (true, false) => "unavailable",
        (true, true) => "ready",
    };
    format!(
        "{:<10} {:<12} circuit={} ({}/{})  attempts={} ok={} failed={} timeouts={} skipped={}",
        status.name,
        availability,
        status.circuit.state,
        status.circuit.failures_in_window,
        status.circuit.threshold,
        status.stats.attempts,
        status.stats.successes,
        status.stats.failures,
        status.stats.timeouts,
        status.stats.skips,
    )
}

pub fn print_status(statuses: &[ProviderStatus], as_json: bool) -> anyhow::Result<()> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(statuses)?);
    } else {
        for status in statuses {
            println!("{}", status_line(status));
        }
    }
    Ok(())
}

pub fn print_cache_stats(stats: &CacheStats, as_json: bool) -> anyhow::Result<()> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(stats)?);
        return Ok(());
    }
    println!("{} cached entries", stats.total);
    for (data_type, count) in &stats.by_type {
        println!("  {:<14} {}", data_type, count);
    }
    for (source, count) in &stats.by_source {
        println!("  from {:<9} {}", source, count);
    }
    Ok(())
}
