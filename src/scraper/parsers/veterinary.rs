//! Veterinary database parser.
//!
//! HKJC does not publish injury records on the horse detail pages; they
//! live on one shared veterinary database page covering every horse.
//! The session fetches that page once and correlates records to
//! entrants by horse name.

use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use tracing::debug;

use super::clean_text;
use crate::error::Result;
use crate::scraper::headers::HeaderMapper;
use crate::types::InjuryRecord;

/// Canonical fields of the veterinary records table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VetField {
    Brand,
    Name,
    Date,
    Description,
}

fn vet_mapper() -> HeaderMapper<VetField> {
    HeaderMapper::new(vec![
        (VetField::Brand, &["烙印編號"]),
        (VetField::Name, &["馬名"]),
        (VetField::Date, &["日期", "Date"]),
        (VetField::Description, &["詳情", "描述", "Description"]),
    ])
}

/// Parser for the veterinary database page
pub struct VeterinaryParser;

impl VeterinaryParser {
    /// Parse the database table into injury records keyed by horse name.
    ///
    /// A page without the expected table yields an empty map: missing
    /// injury data degrades the records, it does not fail the session.
    pub fn parse(html: &str) -> Result<HashMap<String, Vec<InjuryRecord>>> {
        let document = Html::parse_document(html);
        let table_selector = Selector::parse("table").unwrap();
        let row_selector = Selector::parse("tr").unwrap();
        let mapper = vet_mapper();

        for table in document.select(&table_selector) {
            let rows: Vec<ElementRef> = table.select(&row_selector).collect();
            let Some(header_row) = rows.first() else {
                continue;
            };
            let columns = mapper.map_columns(&cell_texts(header_row))?;
            if columns.get(VetField::Name).is_none()
                || columns.get(VetField::Date).is_none()
                || columns.get(VetField::Description).is_none()
            {
                continue;
            }

            let mut by_name: HashMap<String, Vec<InjuryRecord>> = HashMap::new();
            let mut current: Option<String> = None;
            for row in &rows[1..] {
                let cells = cell_texts(row);
                let name = columns.cell(&cells, VetField::Name);

                if !name.is_empty() {
                    let date = columns.cell(&cells, VetField::Date);
                    let description = columns.cell(&cells, VetField::Description);
                    if date.is_empty() || description.is_empty() {
                        current = None;
                        continue;
                    }
                    by_name
                        .entry(name.to_string())
                        .or_default()
                        .push(InjuryRecord {
                            date: date.to_string(),
                            description: description.to_string(),
                        });
                    current = Some(name.to_string());
                    continue;
                }

                // Rowspan collapse shifts a horse's follow-up rows left:
                // the date lands in the brand column and the description
                // in the date column.
                let Some(horse) = &current else {
                    continue;
                };
                let date = columns.cell(&cells, VetField::Brand);
                let description = columns.cell(&cells, VetField::Date);
                if looks_like_date(date) && !description.is_empty() {
                    by_name
                        .entry(horse.clone())
                        .or_default()
                        .push(InjuryRecord {
                            date: date.to_string(),
                            description: description.to_string(),
                        });
                } else {
                    current = None;
                }
            }

            debug!(horses = by_name.len(), "veterinary records parsed");
            return Ok(by_name);
        }

        debug!("no veterinary records table found");
        Ok(HashMap::new())
    }
}

fn looks_like_date(text: &str) -> bool {
    !text.is_empty() && (text.contains('/') || text.chars().all(|c| c.is_ascii_digit()))
}

fn cell_texts(row: &ElementRef) -> Vec<String> {
    let cell_selector = Selector::parse("td, th").unwrap();
    row.select(&cell_selector)
        .map(|cell| clean_text(&cell.text().collect::<String>()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const VET_TABLE: &str = "<table>\
        <tr><th>烙印編號</th><th>馬名</th><th>日期</th><th>詳情</th><th>通過日期</th></tr>\
        <tr><td>K106</td><td>友得盈</td><td>02/05/2025</td><td>右前腿跛行</td><td>20/05/2025</td></tr>\
        <tr><td>11/01/2024</td><td></td><td>賽後流鼻血</td><td>28/01/2024</td><td></td></tr>\
        <tr><td>J221</td><td>電訊飛駒</td><td>09/03/2025</td><td>左前腿不良於行</td><td>-</td></tr>\
        </table>";

    #[test]
    fn test_records_keyed_by_horse_name() {
        let map = VeterinaryParser::parse(&format!("<html>{VET_TABLE}</html>")).unwrap();
        assert_eq!(map.len(), 2);

        let first = &map["友得盈"];
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].date, "02/05/2025");
        assert_eq!(first[0].description, "右前腿跛行");
        // Continuation row attributed to the horse above it.
        assert_eq!(first[1].date, "11/01/2024");
        assert_eq!(first[1].description, "賽後流鼻血");

        let second = &map["電訊飛駒"];
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].description, "左前腿不良於行");
    }

    #[test]
    fn test_unlisted_horse_has_no_records() {
        let map = VeterinaryParser::parse(&format!("<html>{VET_TABLE}</html>")).unwrap();
        assert!(map.get("勝利專家").is_none());
    }

    #[test]
    fn test_missing_table_yields_empty_map() {
        let map = VeterinaryParser::parse("<html><body>暫無記錄</body></html>").unwrap();
        assert!(map.is_empty());

        // An unrelated table is not mistaken for the records table.
        let map = VeterinaryParser::parse(
            "<html><table><tr><th>日期</th><th>場次</th></tr></table></html>",
        )
        .unwrap();
        assert!(map.is_empty());
    }
}
