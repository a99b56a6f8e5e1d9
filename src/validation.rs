//! Input parsing and validation shared by the back-office and storefront handlers.
//!
//! Dates travel as `YYYY-MM-DD`, times as `HH:MM`, phones are normalized to
//! E.164 with Brazil as the default region.

use chrono::{NaiveDate, NaiveTime};
use phonenumber::country::Id as CountryId;
use phonenumber::Mode;
use regex::Regex;
use std::sync::OnceLock;

use crate::errors::AppError;

/// Longest range accepted by list and dashboard queries.
pub const MAX_RANGE_DAYS: i64 = 366;

pub fn parse_date(raw: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
        AppError::BadRequest(format!("Invalid date '{}'. Expected YYYY-MM-DD", raw))
    })
}

pub fn parse_time(raw: &str) -> Result<NaiveTime, AppError> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .map_err(|_| AppError::BadRequest(format!("Invalid time '{}'. Expected HH:MM", raw)))
}

/// Parses an inclusive `start..=end` date range.
pub fn parse_date_range(start: &str, end: &str) -> Result<(NaiveDate, NaiveDate), AppError> {
    let start = parse_date(start)?;
    let end = parse_date(end)?;
    validate_range(start, end)?;
    Ok((start, end))
}

pub fn validate_range(start: NaiveDate, end: NaiveDate) -> Result<(), AppError> {
    if end < start {
        return Err(AppError::BadRequest(
            "end_date must be on or after start_date".to_string(),
        ));
    }
    if (end - start).num_days() > MAX_RANGE_DAYS {
        return Err(AppError::BadRequest(format!(
            "Date range cannot exceed {} days",
            MAX_RANGE_DAYS
        )));
    }
    Ok(())
}

/// Validates and normalizes a phone number to E.164 (`+5511987654321`).
///
/// Numbers without a country code are read as Brazilian.
pub fn normalize_phone(raw: &str) -> Result<String, AppError> {
    let trimmed = raw.trim();
    if trimmed.len() < 8 {
        return Err(AppError::BadRequest(format!(
            "Phone number '{}' is too short",
            raw
        )));
    }

    let number = phonenumber::parse(Some(CountryId::BR), trimmed).map_err(|e| {
        tracing::debug!("Failed to parse phone '{}': {:?}", raw, e);
        AppError::BadRequest(format!("Invalid phone number '{}'", raw))
    })?;

    if !phonenumber::is_valid(&number) {
        return Err(AppError::BadRequest(format!(
            "Invalid phone number '{}'",
            raw
        )));
    }

    Ok(number.format().mode(Mode::E164).to_string())
}

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| {
        Regex::new(
            r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)+$",
        )
        .expect("email regex is valid")
    })
}

fn slug_regex() -> &'static Regex {
    static SLUG: OnceLock<Regex> = OnceLock::new();
    SLUG.get_or_init(|| Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").expect("slug regex is valid"))
}

pub fn is_valid_email(email: &str) -> bool {
    email.len() >= 5 && email.len() <= 254 && email_regex().is_match(email)
}

pub fn is_valid_slug(slug: &str) -> bool {
    (3..=63).contains(&slug.len()) && slug_regex().is_match(slug)
}

/// Trims an optional email and rejects malformed values.
pub fn normalize_email(email: Option<&str>) -> Result<Option<String>, AppError> {
    match email.map(str::trim).filter(|e| !e.is_empty()) {
        None => Ok(None),
        Some(e) if is_valid_email(e) => Ok(Some(e.to_lowercase())),
        Some(e) => Err(AppError::BadRequest(format!("Invalid email '{}'", e))),
    }
}

/// Rejects blank names and trims surrounding whitespace.
pub fn require_name(field: &str, value: &str) -> Result<String, AppError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::BadRequest(format!("{} cannot be empty", field)));
    }
    if trimmed.chars().count() > 200 {
        return Err(AppError::BadRequest(format!(
            "{} cannot exceed 200 characters",
            field
        )));
    }
    Ok(trimmed.to_string())
}
