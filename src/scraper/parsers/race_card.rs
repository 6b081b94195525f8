//! Race card parser: one ordered stub per table row.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

use super::clean_text;
use crate::error::{Result, ScrapeError};
use crate::scraper::headers::{ColumnMap, HeaderMapper};
use crate::types::HorseStub;

/// Canonical fields of the race card table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListingField {
    Number,
    Name,
    BarrierWeight,
    Weight,
    Rating,
    Age,
    RecentRuns,
    Trainer,
    Priority,
    Equipment,
    Jockey,
    Allowance,
    WinOdds,
    PlaceOdds,
    HorseCode,
    IntlRating,
}

/// Header spellings observed on live race card renders.
fn listing_mapper() -> HeaderMapper<ListingField> {
    HeaderMapper::new(vec![
        (ListingField::Number, &["編號", "馬號"]),
        (ListingField::Name, &["馬名"]),
        (ListingField::BarrierWeight, &["排位體重"]),
        (ListingField::Weight, &["負磅"]),
        (ListingField::Rating, &["評分", "當前評分"]),
        (ListingField::Age, &["馬齡"]),
        (ListingField::RecentRuns, &["6次近績", "最近6輪"]),
        (ListingField::Trainer, &["練馬師"]),
        (ListingField::Priority, &["優先參賽次序", "練馬師喜好"]),
        (ListingField::Equipment, &["配備"]),
        (ListingField::Jockey, &["騎師"]),
        (ListingField::Allowance, &["讓磅"]),
        (ListingField::WinOdds, &["獨贏"]),
        (ListingField::PlaceOdds, &["位置"]),
        (ListingField::HorseCode, &["馬匹編號"]),
        (ListingField::IntlRating, &["國際評分"]),
    ])
}

/// Require this many mapped headers before trusting a table as the race
/// card; the pages carry several unrelated layout tables.
const MIN_MAPPED_HEADERS: usize = 3;

/// Parser for race card pages
pub struct RaceCardParser;

impl RaceCardParser {
    /// Parse the race card into listing-ordered stubs.
    ///
    /// Rows without a horse identifier cannot be correlated to a detail
    /// page and are dropped with a warning; a card with zero usable rows
    /// is fatal to the session.
    pub fn parse(html: &str) -> Result<Vec<HorseStub>> {
        let document = Html::parse_document(html);
        let mapper = listing_mapper();

        let table_selector = Selector::parse("table").unwrap();
        let row_selector = Selector::parse("tr").unwrap();

        for table in document.select(&table_selector) {
            let rows: Vec<ElementRef> = table.select(&row_selector).collect();
            let Some(header_row) = rows.first() else {
                continue;
            };

            let headers = cell_texts(header_row);
            let columns = mapper.map_columns(&headers)?;
            if columns.len() < MIN_MAPPED_HEADERS {
                continue;
            }
            debug!(mapped = columns.len(), "found race card table");

            let mut stubs = Vec::new();
            let mut dropped = 0usize;
            for (row_index, row) in rows.iter().enumerate().skip(1) {
                match Self::parse_row(row, &columns) {
                    Some(stub) => {
                        debug!(row = row_index, horse = %stub.name, "extracted stub");
                        stubs.push(stub);
                    }
                    None => {
                        dropped += 1;
                        warn!(row = row_index, "dropping row without horse identifier");
                    }
                }
            }

            if stubs.is_empty() {
                warn!(dropped, "race card table yielded no usable rows");
                return Err(ScrapeError::EmptyListing);
            }
            debug!(extracted = stubs.len(), dropped, "race card parsed");
            return Ok(stubs);
        }

        warn!("no table matched the expected race card headers");
        Err(ScrapeError::EmptyListing)
    }

    fn parse_row(row: &ElementRef, columns: &ColumnMap<ListingField>) -> Option<HorseStub> {
        let cells = cell_texts(row);
        if cells.is_empty() {
            return None;
        }

        let detail_url = find_detail_link(row);
        // A row without an identifier is unusable: there is no detail
        // page to correlate it with.
        let horse_id = detail_url.as_deref().and_then(extract_horse_id)?;

        let mut stub = HorseStub {
            number: columns.cell(&cells, ListingField::Number).to_string(),
            horse_id,
            name: columns.cell(&cells, ListingField::Name).to_string(),
            horse_code: columns.cell(&cells, ListingField::HorseCode).to_string(),
            recent_runs: columns.cell(&cells, ListingField::RecentRuns).to_string(),
            barrier: columns.cell(&cells, ListingField::BarrierWeight).to_string(),
            weight: columns.cell(&cells, ListingField::Weight).to_string(),
            jockey: columns.cell(&cells, ListingField::Jockey).to_string(),
            trainer: columns.cell(&cells, ListingField::Trainer).to_string(),
            win_odds: columns.cell(&cells, ListingField::WinOdds).to_string(),
            place_odds: columns.cell(&cells, ListingField::PlaceOdds).to_string(),
            rating: columns.cell(&cells, ListingField::Rating).to_string(),
            intl_rating: columns.cell(&cells, ListingField::IntlRating).to_string(),
            equipment: columns.cell(&cells, ListingField::Equipment).to_string(),
            allowance: columns.cell(&cells, ListingField::Allowance).to_string(),
            trainer_preference: columns.cell(&cells, ListingField::Priority).to_string(),
            age: columns.cell(&cells, ListingField::Age).to_string(),
            detail_url,
        };
        if stub.trainer_preference.is_empty() {
            stub.trainer_preference = "1".to_string();
        }
        Some(stub)
    }
}

/// Text of each cell in a row, whitespace-normalized.
fn cell_texts(row: &ElementRef) -> Vec<String> {
    let cell_selector = Selector::parse("td, th").unwrap();
    row.select(&cell_selector)
        .map(|cell| clean_text(&cell.text().collect::<String>()))
        .collect()
}

/// First detail-page link in the row, made absolute.
fn find_detail_link(row: &ElementRef) -> Option<String> {
    let link_selector = Selector::parse("a[href]").unwrap();
    for link in row.select(&link_selector) {
        let href = link.value().attr("href")?;
        if href.contains("Horse.aspx") || href.contains("HorseId") || href.contains("/horse/") {
            return Some(crate::scraper::absolutize(href));
        }
    }
    None
}

/// Extract the stable horse identifier from a detail URL.
///
/// `Horse.aspx?HorseId=HK_2024_K106` yields `K106` (the last segment).
pub fn extract_horse_id(url: &str) -> Option<String> {
    let id_re = Regex::new(r"HorseId=([A-Za-z0-9_]+)").unwrap();
    if let Some(caps) = id_re.captures(url) {
        let full = &caps[1];
        return Some(full.rsplit('_').next().unwrap_or(full).to_string());
    }

    let path_re = Regex::new(r"/horse/(\d+)").unwrap();
    if let Some(caps) = path_re.captures(url) {
        return Some(caps[1].to_string());
    }

    None
}
