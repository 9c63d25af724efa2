//! Candle files for seeding the history: a JSON array of candles, or a CSV
//! with a `timestamp,open,high,low,close,volume` header. Timestamps are
//! RFC 3339.

use crate::domain::types::Candle;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

pub fn read_candles(path: &Path) -> Result<Vec<Candle>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let reader = BufReader::new(file);

    let is_csv = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
    let mut candles = if is_csv {
        let mut rdr = csv::Reader::from_reader(reader);
        let mut candles = Vec::new();
        for (line, record) in rdr.deserialize::<Candle>().enumerate() {
            // Header is line 1
            candles.push(record.with_context(|| format!("Invalid candle on line {}", line + 2))?);
        }
        candles
    } else {
        serde_json::from_reader::<_, Vec<Candle>>(reader)
            .with_context(|| format!("Failed to parse candles from {}", path.display()))?
    };

    candles.sort_by_key(|c| c.timestamp);
    Ok(candles)
}
