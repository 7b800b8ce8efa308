/// Parsing of the human-typed size and age expressions that feed a [`Query`].
///
/// [`Query`]: super::Query
use crate::error::{IndexError, Result};
use crate::model::size::parse_size;
use chrono::{DateTime, Duration, Utc};

/// `parse_size` with a typed error, for request validation.
pub fn parse_size_filter(input: &str) -> Result<u64> {
    parse_size(input).ok_or_else(|| IndexError::InvalidQuery(format!("invalid size: {input:?}")))
}

/// Turn a relative age such as `"3d"`, `"2w"`, `"6m"` or `"1y"` into the
/// cutoff timestamp `now - age`.
///
/// Months count as 30 days and years as 365.
pub fn parse_age(input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let text = input.trim().to_ascii_lowercase();
    let invalid = || IndexError::InvalidQuery(format!("invalid age: {input:?}"));

    let split = text.len().checked_sub(1).ok_or_else(invalid)?;
    if !text.is_char_boundary(split) {
        return Err(invalid());
    }
    let (count, unit) = text.split_at(split);
    let count: i64 = count.trim().parse().map_err(|_| invalid())?;
    if count < 0 {
        return Err(invalid());
    }
    let days_per_unit = match unit {
        "d" => 1,
        "w" => 7,
        "m" => 30,
        "y" => 365,
        _ => return Err(invalid()),
    };
    let age = count
        .checked_mul(days_per_unit)
        .and_then(Duration::try_days)
        .ok_or_else(invalid)?;
    now.checked_sub_signed(age).ok_or_else(invalid)
}
