//! Identity types for FRESHET entities

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Refresh attempt identifier using UUIDv7 for timestamp-sortable IDs.
/// UUIDv7 embeds a Unix timestamp, so attempts sort naturally by claim time.
pub type AttemptId = Uuid;

/// Generate a new UUIDv7 AttemptId (timestamp-sortable).
pub fn new_attempt_id() -> AttemptId {
    Uuid::now_v7()
}

// ============================================================================
// DATA DOMAIN
// ============================================================================

/// The upstream data feed an entity belongs to.
///
/// Each domain has its own fetch-and-parse provider and its own activity
/// facts, but all domains share the same freshness and refresh machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataDomain {
    /// SEC insider-transaction filings (Form 4 and friends)
    InsiderFilings,
    /// Senate LDA lobbying disclosures
    LobbyingDisclosures,
    /// Federal award spending (USAspending)
    FederalAwards,
    /// Upcoming IPO calendar
    IpoCalendar,
    /// Earnings report calendar
    EarningsCalendar,
    /// Macro economic event calendar
    EconomicCalendar,
    /// Social feed items (rolling window)
    SocialSentiment,
}

impl DataDomain {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            DataDomain::InsiderFilings => "insider_filings",
            DataDomain::LobbyingDisclosures => "lobbying_disclosures",
            DataDomain::FederalAwards => "federal_awards",
            DataDomain::IpoCalendar => "ipo_calendar",
            DataDomain::EarningsCalendar => "earnings_calendar",
            DataDomain::EconomicCalendar => "economic_calendar",
            DataDomain::SocialSentiment => "social_sentiment",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, DataDomainParseError> {
        match normalize_token(s).as_str() {
            "insiderfilings" => Ok(DataDomain::InsiderFilings),
            "lobbyingdisclosures" => Ok(DataDomain::LobbyingDisclosures),
            "federalawards" => Ok(DataDomain::FederalAwards),
            "ipocalendar" => Ok(DataDomain::IpoCalendar),
            "earningscalendar" => Ok(DataDomain::EarningsCalendar),
            "economiccalendar" => Ok(DataDomain::EconomicCalendar),
            "socialsentiment" => Ok(DataDomain::SocialSentiment),
            _ => Err(DataDomainParseError(s.to_string())),
        }
    }
}

impl fmt::Display for DataDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for DataDomain {
    type Err = DataDomainParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid data domain string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDomainParseError(pub String);

impl fmt::Display for DataDomainParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid data domain: {}", self.0)
    }
}

impl std::error::Error for DataDomainParseError {}

impl From<DataDomainParseError> for ValidationError {
    fn from(err: DataDomainParseError) -> Self {
        ValidationError::UnknownDomain { token: err.0 }
    }
}

fn normalize_token(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

// ============================================================================
// TIME PARTITION
// ============================================================================

/// Time partition for a cached record.
///
/// Insider sentiment is cached one row per symbol per month; calendars and
/// feeds use a single rolling window. The string key form is stable and is
/// embedded in storage keys, so changing it invalidates persisted data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Period {
    /// One calendar month (e.g. symbol+month sentiment rows).
    Month { year: i32, month: u32 },
    /// One calendar year.
    Year { year: i32 },
    /// Unpartitioned rolling window (calendars, feeds).
    Rolling,
}

impl Period {
    /// Checked month constructor.
    pub fn month(year: i32, month: u32) -> Result<Self, ValidationError> {
        if !(1..=12).contains(&month) {
            return Err(ValidationError::UnknownPeriod {
                token: format!("{}-{:02}", year, month),
            });
        }
        Ok(Period::Month { year, month })
    }

    /// The month partition containing the given date.
    pub fn month_of(date: NaiveDate) -> Self {
        Period::Month {
            year: date.year(),
            month: date.month(),
        }
    }

    /// Stable string key form used in storage keys ("2026-08", "2026", "rolling").
    pub fn storage_key(&self) -> String {
        match self {
            Period::Month { year, month } => format!("{:04}-{:02}", year, month),
            Period::Year { year } => format!("{:04}", year),
            Period::Rolling => "rolling".to_string(),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.storage_key())
    }
}

impl FromStr for Period {
    type Err = PeriodParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("rolling") {
            return Ok(Period::Rolling);
        }
        if let Some((year_str, month_str)) = trimmed.split_once('-') {
            let year: i32 = year_str
                .parse()
                .map_err(|_| PeriodParseError(s.to_string()))?;
            let month: u32 = month_str
                .parse()
                .map_err(|_| PeriodParseError(s.to_string()))?;
            return Period::month(year, month).map_err(|_| PeriodParseError(s.to_string()));
        }
        let year: i32 = trimmed
            .parse()
            .map_err(|_| PeriodParseError(s.to_string()))?;
        Ok(Period::Year { year })
    }
}

/// Error when parsing an invalid period string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodParseError(pub String);

impl fmt::Display for PeriodParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid period: {}", self.0)
    }
}

impl std::error::Error for PeriodParseError {}

impl From<PeriodParseError> for ValidationError {
    fn from(err: PeriodParseError) -> Self {
        ValidationError::UnknownPeriod { token: err.0 }
    }
}

// ============================================================================
// ENTITY KEY
// ============================================================================

/// The unit of caching: a data domain plus a normalized entity identifier
/// (market symbol, registrant id, or a feed name).
///
/// Construction normalizes the identifier (trimmed, uppercased) and rejects
/// empty strings and separator characters, so two spellings of the same
/// symbol can never map to different cache rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    domain: DataDomain,
    entity: String,
}

impl EntityKey {
    /// Create a new entity key, normalizing and validating the identifier.
    pub fn new(domain: DataDomain, entity: &str) -> Result<Self, ValidationError> {
        let normalized = entity.trim().to_ascii_uppercase();
        if normalized.is_empty() {
            return Err(ValidationError::EmptyEntity);
        }
        for c in normalized.chars() {
            if c == ':' || c == '\n' || c.is_whitespace() {
                return Err(ValidationError::InvalidEntityCharacter { character: c });
            }
        }
        Ok(Self {
            domain,
            entity: normalized,
        })
    }

    /// The data domain this key belongs to.
    pub fn domain(&self) -> DataDomain {
        self.domain
    }

    /// The normalized entity identifier.
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Stable storage token, e.g. `insider_filings:AAPL`.
    pub fn storage_token(&self) -> String {
        format!("{}:{}", self.domain.as_db_str(), self.entity)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.storage_token())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_domain_db_round_trip() {
        let domains = [
            DataDomain::InsiderFilings,
            DataDomain::LobbyingDisclosures,
            DataDomain::FederalAwards,
            DataDomain::IpoCalendar,
            DataDomain::EarningsCalendar,
            DataDomain::EconomicCalendar,
            DataDomain::SocialSentiment,
        ];
        for domain in domains {
            let parsed = DataDomain::from_db_str(domain.as_db_str()).expect("round trip");
            assert_eq!(parsed, domain);
        }
    }

    #[test]
    fn test_data_domain_parse_tolerates_separators() {
        assert_eq!(
            DataDomain::from_db_str("Insider-Filings").expect("parse"),
            DataDomain::InsiderFilings
        );
        assert_eq!(
            "EARNINGS_CALENDAR".parse::<DataDomain>().expect("parse"),
            DataDomain::EarningsCalendar
        );
    }

    #[test]
    fn test_data_domain_parse_rejects_unknown() {
        let err = DataDomain::from_db_str("weather").unwrap_err();
        assert!(err.to_string().contains("weather"));
    }

    #[test]
    fn test_period_storage_key_forms() {
        assert_eq!(
            Period::Month {
                year: 2026,
                month: 8
            }
            .storage_key(),
            "2026-08"
        );
        assert_eq!(Period::Year { year: 2026 }.storage_key(), "2026");
        assert_eq!(Period::Rolling.storage_key(), "rolling");
    }

    #[test]
    fn test_period_parse_round_trip() {
        for period in [
            Period::Month {
                year: 2026,
                month: 1,
            },
            Period::Year { year: 2024 },
            Period::Rolling,
        ] {
            let parsed: Period = period.storage_key().parse().expect("round trip");
            assert_eq!(parsed, period);
        }
    }

    #[test]
    fn test_period_rejects_bad_month() {
        assert!(Period::month(2026, 0).is_err());
        assert!(Period::month(2026, 13).is_err());
        assert!("2026-13".parse::<Period>().is_err());
    }

    #[test]
    fn test_period_month_of() {
        let date = NaiveDate::from_ymd_opt(2026, 8, 25).expect("valid date");
        assert_eq!(
            Period::month_of(date),
            Period::Month {
                year: 2026,
                month: 8
            }
        );
    }

    #[test]
    fn test_entity_key_normalizes() {
        let key = EntityKey::new(DataDomain::InsiderFilings, "  aapl ").expect("valid key");
        assert_eq!(key.entity(), "AAPL");
        assert_eq!(key.storage_token(), "insider_filings:AAPL");
    }

    #[test]
    fn test_entity_key_rejects_empty() {
        let err = EntityKey::new(DataDomain::InsiderFilings, "   ").unwrap_err();
        assert!(matches!(err, ValidationError::EmptyEntity));
    }

    #[test]
    fn test_entity_key_rejects_separator() {
        let err = EntityKey::new(DataDomain::InsiderFilings, "AA:PL").unwrap_err();
        assert!(matches!(
            err,
            ValidationError::InvalidEntityCharacter { character: ':' }
        ));
    }

    #[test]
    fn test_parse_errors_convert_to_validation() {
        let err: ValidationError = DataDomain::from_db_str("weather").unwrap_err().into();
        assert_eq!(
            err,
            ValidationError::UnknownDomain {
                token: "weather".to_string()
            }
        );

        let err: ValidationError = "2026-13".parse::<Period>().unwrap_err().into();
        assert_eq!(
            err,
            ValidationError::UnknownPeriod {
                token: "2026-13".to_string()
            }
        );
    }

    #[test]
    fn test_attempt_ids_sort_by_creation() {
        let a = new_attempt_id();
        let b = new_attempt_id();
        assert!(a <= b);
    }
}
