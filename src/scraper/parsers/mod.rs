//! HTML parsers for HKJC pages.
//!
//! All parsers are pure functions of already-fetched content.

pub mod horse_detail;
pub mod race_card;
pub mod veterinary;

pub use horse_detail::HorseDetailParser;
pub use race_card::RaceCardParser;
pub use veterinary::VeterinaryParser;

/// Normalize cell text: full-width spaces replaced, whitespace runs
/// collapsed, ends trimmed. Case is preserved.
pub fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
