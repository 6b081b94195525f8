//! Web scraper module for racing.hkjc.com
//!
//! Provides the fetch capability seam, politeness throttling, header
//! mapping, and HTML parsing.

pub mod browser;
pub mod headers;
pub mod parsers;
pub mod rate_limiter;

pub use browser::Browser;
pub use rate_limiter::RateLimiter;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::RaceQuery;

/// Base URL for racing.hkjc.com
pub const BASE_URL: &str = "https://racing.hkjc.com";

/// Veterinary database page listing injury records for all horses.
pub const VETERINARY_URL: &str =
    "https://racing.hkjc.com/racing/information/Chinese/VeterinaryRecords/OveDatabase.aspx";

/// Build race card URL for a query
pub fn race_card_url(query: &RaceQuery) -> String {
    format!(
        "{}/racing/information/Chinese/racing/RaceCard.aspx?RaceDate={}&Racecourse={}&RaceNo={}",
        BASE_URL,
        query.date.format("%Y/%m/%d"),
        query.course.code(),
        query.race_number
    )
}

/// Make a page-relative href absolute.
pub fn absolutize(href: &str) -> String {
    if href.starts_with('/') {
        format!("{BASE_URL}{href}")
    } else {
        href.to_string()
    }
}

/// The page-fetching capability the pipeline consumes.
///
/// Implementations load a URL, wait for it to render, and return the
/// content. The pipeline never constructs links beyond the race card
/// URL, the veterinary database URL, and the detail URLs taken from
/// listing rows.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Racecourse;
    use chrono::NaiveDate;

    #[test]
    fn test_race_card_url() {
        let query = RaceQuery::new(
            NaiveDate::from_ymd_opt(2025, 9, 17).unwrap(),
            Racecourse::HV,
            4,
        );
        assert_eq!(
            race_card_url(&query),
            "https://racing.hkjc.com/racing/information/Chinese/racing/RaceCard.aspx\
             ?RaceDate=2025/09/17&Racecourse=HV&RaceNo=4"
        );
    }

    #[test]
    fn test_absolutize() {
        assert_eq!(
            absolutize("/racing/information/Horse.aspx?HorseId=HK_2024_K106"),
            "https://racing.hkjc.com/racing/information/Horse.aspx?HorseId=HK_2024_K106"
        );
        assert_eq!(absolutize("https://example.com/x"), "https://example.com/x");
    }
}
