use crate::config::KeyConfig;
use chrono::Month;
use thiserror::Error;

/// The five identifying fields of a GPS data lookup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LookupRequest {
    /// Account identifier
    pub user_id: String,
    /// Device identifier
    pub vehicle_id: String,
    pub year: String,
    /// Two-digit month number, "01" through "12"
    pub month: String,
    pub day: String,
}

#[derive(Copy, Clone, Debug, Eq, Error, PartialEq)]
#[error("invalid month format; expected 01 through 12")]
pub struct InvalidMonth;

#[derive(Copy, Clone, Debug, Eq, Error, PartialEq)]
pub enum KeyError {
    #[error(transparent)]
    InvalidMonth(#[from] InvalidMonth),
    /// A caller-supplied segment contains the key delimiter, which would let
    /// two different lookups address the same object
    #[error("{field} must not contain '/'")]
    DelimiterInSegment { field: &'static str },
}

/// Convert a two-digit month number into its English name (`"04"` -> `"April"`)
pub fn month_name(month: &str) -> Result<&'static str, InvalidMonth> {
    if month.len() != 2 || !month.bytes().all(|b| b.is_ascii_digit()) {
        return Err(InvalidMonth);
    }
    let number = month.parse::<u8>().map_err(|_| InvalidMonth)?;
    let month = Month::try_from(number).map_err(|_| InvalidMonth)?;
    Ok(month.name())
}

/// Build the object key for a lookup
///
/// Segments are joined with `/` in fixed order, with the month spelled out:
/// `{prefix}/{dataset}/{environment}/{user_id}/{vehicle_id}/{year}/{Month}/{day}/{filename}`
///
/// The month is checked first; then every caller-supplied segment must be
/// free of `/` so that distinct lookups never share a key.
pub fn build_key(layout: &KeyConfig, request: &LookupRequest) -> Result<String, KeyError> {
    let month = month_name(&request.month)?;
    for (field, value) in [
        ("user_id", &request.user_id),
        ("vehicle_id", &request.vehicle_id),
        ("year", &request.year),
        ("day", &request.day),
    ] {
        if value.contains('/') {
            return Err(KeyError::DelimiterInSegment { field });
        }
    }
    let segments = [
        layout.prefix.as_str(),
        layout.dataset.as_str(),
        layout.environment.as_str(),
        request.user_id.as_str(),
        request.vehicle_id.as_str(),
        request.year.as_str(),
        month,
        request.day.as_str(),
        layout.filename.as_str(),
    ];
    Ok(segments.join("/"))
}
