//! Data model for race card scraping.
//!
//! Serialized field names follow the HKJC Chinese vocabulary verbatim so
//! the output schema stays byte-compatible for downstream consumers.
//! Missing optional values are empty strings, never absent keys.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Racecourse code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum Racecourse {
    /// Sha Tin
    ST,
    /// Happy Valley
    HV,
}

impl Racecourse {
    pub fn code(&self) -> &'static str {
        match self {
            Racecourse::ST => "ST",
            Racecourse::HV => "HV",
        }
    }

    /// Course name as printed on the race card.
    pub fn course_name(&self) -> &'static str {
        match self {
            Racecourse::ST => "沙田",
            Racecourse::HV => "跑馬地",
        }
    }
}

impl fmt::Display for Racecourse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Identifies one scrape session. Immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaceQuery {
    pub date: NaiveDate,
    pub course: Racecourse,
    pub race_number: u8,
}

impl RaceQuery {
    pub fn new(date: NaiveDate, course: Racecourse, race_number: u8) -> Self {
        Self {
            date,
            course,
            race_number,
        }
    }

    /// Stable key for checkpoint lookup. Same query always resumes the
    /// same checkpoint; distinct queries never collide.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!(
            "{}|{}|{}",
            self.date, self.course, self.race_number
        ));
        let digest = hasher.finalize();
        digest[..8].iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Display for RaceQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} R{}",
            self.date.format("%Y/%m/%d"),
            self.course,
            self.race_number
        )
    }
}

/// One injury/health record from the veterinary table. Page order is
/// preserved, not re-sorted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InjuryRecord {
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub description: String,
}

/// One past performance record, most recent first as presented.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PastRunRecord {
    #[serde(default)]
    pub race_date: String,
    #[serde(default)]
    pub venue: String,
    #[serde(default)]
    pub distance: String,
    #[serde(default)]
    pub barrier: String,
    #[serde(default)]
    pub weight: String,
    #[serde(default)]
    pub jockey: String,
    #[serde(default)]
    pub position: String,
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub equipment: String,
    #[serde(default)]
    pub rating: String,
    #[serde(default)]
    pub odds: String,
    #[serde(default)]
    pub track_condition: String,
    #[serde(default)]
    pub race_class: String,
    #[serde(default)]
    pub distance_to_winner: String,
    #[serde(default)]
    pub running_position: String,
    #[serde(default)]
    pub barrier_weight: String,
    #[serde(default)]
    pub trainer: String,
}

/// Topline fields for one race card row, plus the link needed to fetch
/// the detail page. Immutable once produced by the listing extractor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HorseStub {
    pub number: String,
    pub horse_id: String,
    pub name: String,
    pub horse_code: String,
    pub recent_runs: String,
    pub barrier: String,
    pub weight: String,
    pub jockey: String,
    pub trainer: String,
    pub win_odds: String,
    pub place_odds: String,
    pub rating: String,
    pub intl_rating: String,
    pub equipment: String,
    pub allowance: String,
    pub trainer_preference: String,
    pub age: String,
    pub detail_url: Option<String>,
}

/// Everything extracted from one horse's detail page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HorseDetail {
    pub profile: String,
    pub injuries: Vec<InjuryRecord>,
    pub past_runs: Vec<PastRunRecord>,
}

///// Assembled record: stub fields + detail page data. Matches the HKJC
/// output schema exactly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HorseRecord {
    #[serde(rename = "馬號", default)]
    pub number: String,
    #[serde(rename = "馬匹ID", default)]
    pub horse_id: String,
    #[serde(rename = "馬名", default)]
    pub name: String,
    #[serde(rename = "馬匹編號", default)]
    pub horse_code: String,
    #[serde(rename = "最近6輪", default)]
    pub recent_runs: String,
    #[serde(rename = "排位", default)]
    pub barrier: String,
    #[serde(rename = "負磅", default)]
    pub weight: String,
    #[serde(rename = "騎師", default)]
    pub jockey: String,
    #[serde(rename = "練馬師", default)]
    pub trainer: String,
    #[serde(rename = "獨贏", default)]
    pub win_odds: String,
    #[serde(rename = "位置", default)]
    pub place_odds: String,
    #[serde(rename = "當前評分", default)]
    pub rating: String,
    #[serde(rename = "國際評分", default)]
    pub intl_rating: String,
    #[serde(rename = "配備", default)]
    pub equipment: String,
    #[serde(rename = "讓磅", default)]
    pub allowance: String,
    #[serde(rename = "練馬師喜好", default)]
    pub trainer_preference: String,
    #[serde(rename = "馬齡", default)]
    pub age: String,
    #[serde(rename = "傷病記錄", default)]
    pub injuries: Vec<InjuryRecord>,
    #[serde(rename = "往績紀錄", default)]
    pub past_runs: Vec<PastRunRecord>,
    #[serde(rename = "馬匹基本資料", default)]
    pub profile: String,
    /// Set when the detail page permanently failed and the record was
    /// kept as an empty-detail placeholder.
    #[serde(
        rename = "detail_error",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub detail_error: Option<String>,
}

impl HorseRecord {
    /// Merge topline and detail page data into the final record.
    pub fn assemble(stub: &HorseStub, detail: HorseDetail) -> Self {
        Self {
            injuries: detail.injuries,
            past_runs: detail.past_runs,
            profile: detail.profile,
            ..Self::from_stub(stub)
        }
    }

    /// Record with stub fields only and empty detail sections.
    pub fn from_stub(stub: &HorseStub) -> Self {
        Self {
            number: stub.number.clone(),
            horse_id: stub.horse_id.clone(),
            name: stub.name.clone(),
            horse_code: stub.horse_code.clone(),
            recent_runs: stub.recent_runs.clone(),
            barrier: stub.barrier.clone(),
            weight: stub.weight.clone(),
            jockey: stub.jockey.clone(),
            trainer: stub.trainer.clone(),
            win_odds: stub.win_odds.clone(),
            place_odds: stub.place_odds.clone(),
            rating: stub.rating.clone(),
            intl_rating: stub.intl_rating.clone(),
            equipment: stub.equipment.clone(),
            allowance: stub.allowance.clone(),
            trainer_preference: stub.trainer_preference.clone(),
            age: stub.age.clone(),
            ..Default::default()
        }
    }

    /// Placeholder for a horse whose detail page permanently failed.
    pub fn placeholder(stub: &HorseStub, error: &str) -> Self {
        Self {
            detail_error: Some(error.to_string()),
            ..Self::from_stub(stub)
        }
    }
}

/// Session metadata attached to the final document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeInfo {
    pub date: NaiveDate,
    pub course: Racecourse,
    pub course_name: String,
    pub race_number: u8,
    pub scraped_at: DateTime<Utc>,
    pub total_horses: usize,
}

/// Final document, written exactly once per successful session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeResult {
    pub scrape_info: ScrapeInfo,
    pub horses: Vec<HorseRecord>,
}

impl ScrapeResult {
    pub fn new(query: &RaceQuery, horses: Vec<HorseRecord>) -> Self {
        Self {
            scrape_info: ScrapeInfo {
                date: query.date,
                course: query.course,
                course_name: query.course.course_name().to_string(),
                race_number: query.race_number,
                scraped_at: Utc::now(),
                total_horses: horses.len(),
            },
            horses,
        }
    }
}
