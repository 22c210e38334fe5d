use serde::{Deserialize, Deserializer};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Maps an absent or `null` wire value to the field type's default. Pair with
/// `#[serde(default, deserialize_with = "null_default")]`.
pub fn null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

pub fn parse_datetime(value: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(value.trim(), &Rfc3339).ok()
}

/// Canonical RFC 3339 in UTC so stored timestamps compare lexically.
pub fn normalize_datetime(value: Option<&str>) -> Option<String> {
    let raw = value?.trim();
    if raw.is_empty() {
        return None;
    }
    parse_datetime(raw)
        .map(|ts| ts.to_offset(time::UtcOffset::UTC))
        .and_then(|ts| ts.format(&Rfc3339).ok())
}
