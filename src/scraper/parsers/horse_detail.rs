//! Horse detail page parser: profile text, injury records, past runs.
//!
//! Operates only on content already fetched; a page that failed to load
//! is the retry controller's concern, not this parser's.

use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use super::clean_text;
use crate::error::Result;
use crate::scraper::headers::{ColumnMap, HeaderMapper};
use crate::types::{HorseDetail, InjuryRecord, PastRunRecord};

/// Canonical fields of the past performance table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PastRunField {
    RaceDate,
    Venue,
    Distance,
    Barrier,
    Weight,
    Jockey,
    Position,
    Time,
    Equipment,
    Rating,
    Odds,
    TrackCondition,
    RaceClass,
    DistanceToWinner,
    RunningPosition,
    BarrierWeight,
    Trainer,
}

/// Canonical fields of the injury/veterinary table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InjuryField {
    Date,
    Description,
}

fn past_run_mapper() -> HeaderMapper<PastRunField> {
    HeaderMapper::new(vec![
        (PastRunField::RaceDate, &["日期", "賽事日期", "Date"]),
        (PastRunField::Venue, &["馬場", "跑道", "賽道", "場地", "Venue"]),
        (PastRunField::Distance, &["途程", "Distance"]),
        (PastRunField::Barrier, &["檔位", "Barrier"]),
        (PastRunField::Weight, &["實際負磅", "負磅", "Weight"]),
        (PastRunField::Jockey, &["騎師", "Jockey"]),
        (PastRunField::Position, &["名次", "Position"]),
        (PastRunField::Time, &["完成時間", "時間", "Time"]),
        (PastRunField::Equipment, &["配備", "Equipment"]),
        (PastRunField::Rating, &["評分", "Rating"]),
        (PastRunField::Odds, &["獨贏賠率", "獨贏", "Odds"]),
        (PastRunField::TrackCondition, &["場地狀況", "Track Condition"]),
        (PastRunField::RaceClass, &["賽事班次", "Class"]),
        (PastRunField::DistanceToWinner, &["頭馬距離", "Distance to Winner"]),
        (PastRunField::RunningPosition, &["沿途走位", "Running Position"]),
        (PastRunField::BarrierWeight, &["排位體重", "Barrier Weight"]),
        (PastRunField::Trainer, &["練馬師", "Trainer"]),
    ])
}

fn injury_mapper() -> HeaderMapper<InjuryField> {
    HeaderMapper::new(vec![
        (InjuryField::Date, &["日期", "Date"]),
        (InjuryField::Description, &["詳情", "描述", "傷病", "Description"]),
    ])
}

/// Past-run tables must map at least this many headers; the detail page
/// carries several small tables that share one or two column names.
const MIN_PAST_RUN_HEADERS: usize = 4;

/// Only the most recent runs are kept, as on the printed card.
const MAX_PAST_RUNS: usize = 6;

/// Profile rows are short "label: value" pairs.
const MAX_PROFILE_KEY_CHARS: usize = 10;

/// Parser for horse detail pages
pub struct HorseDetailParser;

impl HorseDetailParser {
    /// Parse one detail page into profile text, injuries, and past runs.
    ///
    /// A missing or empty past-run table is not an error: first-time
    /// starters legitimately have no race history.
    pub fn parse(html: &str) -> Result<HorseDetail> {
        let document = Html::parse_document(html);
        let table_selector = Selector::parse("table").unwrap();
        let row_selector = Selector::parse("tr").unwrap();

        let runs_mapper = past_run_mapper();
        let injuries_mapper = injury_mapper();

        let mut detail = HorseDetail::default();
        let mut profile_parts: Vec<String> = Vec::new();

        for table in document.select(&table_selector) {
            let rows: Vec<ElementRef> = table.select(&row_selector).collect();
            let Some(header_row) = rows.first() else {
                continue;
            };
            let headers = cell_texts(header_row);

            let runs_columns = runs_mapper.map_columns(&headers)?;
            if detail.past_runs.is_empty() && runs_columns.len() >= MIN_PAST_RUN_HEADERS {
                detail.past_runs = parse_past_runs(&rows[1..], &runs_columns);
                continue;
            }

            let injury_columns = injuries_mapper.map_columns(&headers)?;
            if detail.injuries.is_empty()
                && injury_columns.get(InjuryField::Date).is_some()
                && injury_columns.get(InjuryField::Description).is_some()
            {
                detail.injuries = parse_injuries(&rows[1..], &injury_columns);
                continue;
            }

            collect_profile_rows(&rows, &mut profile_parts);
        }

        detail.profile = profile_parts.join(" | ");
        debug!(
            past_runs = detail.past_runs.len(),
            injuries = detail.injuries.len(),
            profile_chars = detail.profile.len(),
            "detail page parsed"
        );
        Ok(detail)
    }
}

fn parse_past_runs(rows: &[ElementRef], columns: &ColumnMap<PastRunField>) -> Vec<PastRunRecord> {
    let mut runs = Vec::new();
    for row in rows.iter().take(MAX_PAST_RUNS) {
        let cells = cell_texts(row);
        let run = PastRunRecord {
            race_date: columns.cell(&cells, PastRunField::RaceDate).to_string(),
            venue: columns.cell(&cells, PastRunField::Venue).to_string(),
            distance: columns.cell(&cells, PastRunField::Distance).to_string(),
            barrier: columns.cell(&cells, PastRunField::Barrier).to_string(),
            weight: columns.cell(&cells, PastRunField::Weight).to_string(),
            jockey: columns.cell(&cells, PastRunField::Jockey).to_string(),
            position: columns.cell(&cells, PastRunField::Position).to_string(),
            time: columns.cell(&cells, PastRunField::Time).to_string(),
            equipment: columns.cell(&cells, PastRunField::Equipment).to_string(),
            rating: columns.cell(&cells, PastRunField::Rating).to_string(),
            odds: columns.cell(&cells, PastRunField::Odds).to_string(),
            track_condition: columns
                .cell(&cells, PastRunField::TrackCondition)
                .to_string(),
            race_class: columns.cell(&cells, PastRunField::RaceClass).to_string(),
            distance_to_winner: columns
                .cell(&cells, PastRunField::DistanceToWinner)
                .to_string(),
            running_position: columns
                .cell(&cells, PastRunField::RunningPosition)
                .to_string(),
            barrier_weight: columns
                .cell(&cells, PastRunField::BarrierWeight)
                .to_string(),
            trainer: columns.cell(&cells, PastRunField::Trainer).to_string(),
        };
        // Separator and footer rows carry no identifying data.
        if run.race_date.is_empty() && run.position.is_empty() && run.jockey.is_empty() {
            continue;
        }
        runs.push(run);
    }
    runs
}

fn parse_injuries(rows: &[ElementRef], columns: &ColumnMap<InjuryField>) -> Vec<InjuryRecord> {
    let mut injuries = Vec::new();
    for row in rows {
        let cells = cell_texts(row);
        let record = InjuryRecord {
            date: columns.cell(&cells, InjuryField::Date).to_string(),
            description: columns.cell(&cells, InjuryField::Description).to_string(),
        };
        if record.date.is_empty() && record.description.is_empty() {
            continue;
        }
        injuries.push(record);
    }
    injuries
}

/// Collect "label: value" pairs from two-cell info rows.
fn collect_profile_rows(rows: &[ElementRef], parts: &mut Vec<String>) {
    for row in rows {
        let cells = cell_texts(row);
        if cells.len() != 2 {
            continue;
        }
        let key = &cells[0];
        let value = &cells[1];
        if key.is_empty() || value.is_empty() || key.chars().count() >= MAX_PROFILE_KEY_CHARS {
            continue;
        }
        parts.push(format!("{key}: {value}"));
    }
}

fn cell_texts(row: &ElementRef) -> Vec<String> {
    let cell_selector = Selector::parse("td, th").unwrap();
    row.select(&cell_selector)
        .map(|cell| clean_text(&cell.text().collect::<String>()))
        .collect()
}
