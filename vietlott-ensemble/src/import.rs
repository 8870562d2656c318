use std::io::Read;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;

use vietlott_db::models::{Draw, Session, Variant};

pub const HEADER: [&str; 6] = ["draw_id", "draw_date", "session", "numbers", "special", "jackpot_amount"];

/// Rows parsed from one CSV file, plus the ones that could not be read.
#[derive(Debug, Default)]
pub struct CsvBatch {
    pub draws: Vec<Draw>,
    pub errors: Vec<String>,
}

fn optional(field: &str) -> Option<&str> {
    let field = field.trim();
    (!field.is_empty()).then_some(field)
}

pub fn parse_record(variant: Variant, record: &csv::StringRecord) -> Result<Draw> {
    let get = |idx: usize| -> Result<String> {
        record
            .get(idx)
            .map(|s| s.trim().to_string())
            .with_context(|| format!("missing field '{}'", HEADER[idx]))
    };

    let draw_id = get(0)?;
    if draw_id.is_empty() {
        bail!("empty draw_id");
    }
    let raw_date = get(1)?;
    let draw_date = NaiveDate::parse_from_str(&raw_date, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(&raw_date, "%d/%m/%Y"))
        .with_context(|| format!("invalid draw_date '{raw_date}'"))?;
    let session = optional(record.get(2).unwrap_or_default()).map(str::parse::<Session>).transpose()?;
    let numbers = get(3)?
        .split_whitespace()
        .map(|n| n.parse::<u8>().with_context(|| format!("invalid number '{n}'")))
        .collect::<Result<Vec<u8>>>()?;
    let special = optional(record.get(4).unwrap_or_default())
        .map(|s| s.parse::<u8>().with_context(|| format!("invalid special '{s}'")))
        .transpose()?;
    let jackpot_amount = optional(record.get(5).unwrap_or_default())
        .map(|s| s.parse::<i64>().with_context(|| format!("invalid jackpot_amount '{s}'")))
        .transpose()?;

    Ok(Draw { variant, draw_id, draw_date, session, numbers, special, jackpot_amount })
}

/// Parse every row; malformed rows are reported in `errors` and skipped.
/// Range and cardinality checks happen at ingestion.
pub fn read_draws<R: Read>(variant: Variant, reader: R, mut on_row: impl FnMut()) -> Result<CsvBatch> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).trim(csv::Trim::All).from_reader(reader);
    let mut batch = CsvBatch::default();
    for (i, record) in reader.records().enumerate() {
        let line = i + 2;
        match record.context("unreadable row").and_then(|r| parse_record(variant, &r)) {
            Ok(draw) => batch.draws.push(draw),
            Err(e) => batch.errors.push(format!("line {line}: {e:#}")),
        }
        on_row();
    }
    Ok(batch)
}
