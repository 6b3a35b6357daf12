use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use chrono::{Datelike, NaiveDate};
use tracing::info;

const DATE_FORMAT: &str = "%m/%d/%Y";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct YearlyRate {
    pub year: i32,
    pub rate: f64,
}

pub fn load_series(path: &Path) -> Result<Vec<YearlyRate>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read historical series {}", path.display()))?;
    let series =
        parse_series(&text).with_context(|| format!("invalid historical series {}", path.display()))?;
    info!(path = %path.display(), rows = series.len(), "loaded historical series");
    Ok(series)
}

// Header row first, then `"M/D/YYYY",percent` rows. Percentages become fractions.
pub fn parse_series(text: &str) -> Result<Vec<YearlyRate>> {
    let mut series = Vec::new();
    for (idx, line) in text.lines().enumerate().skip(1) {
        if line.trim().is_empty() {
            continue;
        }
        let row = parse_row(line).with_context(|| format!("line {}", idx + 1))?;
        series.push(row);
    }
    series.sort_by_key(|row| row.year);
    Ok(series)
}

fn parse_row(line: &str) -> Result<YearlyRate> {
    let parts: Vec<&str> = line.split(',').collect();
    if parts.len() < 2 {
        return Err(anyhow!("expected 2+ columns, got {}", parts.len()));
    }
    let date_text = parts[0].trim().trim_matches('"');
    let date = NaiveDate::parse_from_str(date_text, DATE_FORMAT)
        .with_context(|| format!("bad date {date_text:?}"))?;
    let percent: f64 = parts[1]
        .trim()
        .trim_matches('"')
        .parse()
        .with_context(|| format!("bad percentage {:?}", parts[1]))?;
    Ok(YearlyRate {
        year: date.year(),
        rate: percent / 100.0,
    })
}

// Consecutive yearly rates beginning at `start_year`; stops at the first missing year.
pub fn rates_from(series: &[YearlyRate], start_year: i32) -> Vec<f64> {
    let mut rates = Vec::new();
    let mut expected = start_year;
    for row in series.iter().filter(|row| row.year >= start_year) {
        if row.year < expected {
            continue;
        }
        if row.year != expected {
            break;
        }
        rates.push(row.rate);
        expected += 1;
    }
    rates
}
