//! Micro-parsers for the upstream title conventions. These are the single
//! most fragile extraction points in the pipeline, so each one is a small
//! fallible function with its delimiter assumptions written down, instead of
//! ad-hoc slicing at the call sites.

use crate::errors::ServiceError;
use lazy_static::lazy_static;
use regex::Regex;

/// Extracts the street name from an official bus-stop title.
///
/// Expected shape: `"(NNNN) Street Name Líneas: 21, 38"`. The closing
/// parenthesis after the post number is required; the `"Lí"` marker that
/// opens the line list is treated as a terminator when present. A title
/// without the parenthesis, or with nothing between the delimiters, is
/// reported as `Malformed` rather than yielding a garbage street.
pub fn street_from_bus_title(title: &str) -> Result<String, ServiceError> {
    let after_post = title
        .split_once(')')
        .map(|(_, rest)| rest)
        .ok_or_else(|| {
            ServiceError::Malformed(format!("bus title missing ')' delimiter: '{title}'"))
        })?;
    let street = match after_post.split_once("Lí") {
        Some((street, _)) => street,
        None => after_post,
    };
    let street = street.trim();
    if street.is_empty() {
        return Err(ServiceError::Malformed(format!(
            "bus title has no street between delimiters: '{title}'"
        )));
    }
    Ok(street.to_string())
}

/// Extracts the street name from a bike-share station title.
///
/// Expected shape: `"NNN - Street Name"`. Titles without the dash (or with
/// nothing after it) are returned whole; the station number prefix is the
/// only part ever dropped.
pub fn street_from_bizi_title(title: &str) -> String {
    match title.split_once('-') {
        Some((_, street)) if !street.trim().is_empty() => street.trim().to_string(),
        _ => title.trim().to_string(),
    }
}

lazy_static! {
    static ref STOP_STUB: Regex = Regex::new(r"^\s*(\d+)\s*-\s*(.+?)\s*$").unwrap();
}

/// Parses a geographic placemark name following the `"post number - street"`
/// convention into a `(post id, street)` stub. Names whose extracted id is
/// non-numeric are malformed source data and yield `None`.
pub fn station_stub_from_placemark(name: &str) -> Option<(String, String)> {
    let captures = STOP_STUB.captures(name)?;
    Some((captures[1].to_string(), captures[2].to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_title_street_between_post_and_lines() {
        let street =
            street_from_bus_title("(1201) Paseo Pamplona Líneas: 33, 52").unwrap();
        assert_eq!(street, "Paseo Pamplona");
    }

    #[test]
    fn bus_title_without_line_list_uses_remainder() {
        let street = street_from_bus_title("(1201) Paseo Pamplona").unwrap();
        assert_eq!(street, "Paseo Pamplona");
    }

    #[test]
    fn bus_title_missing_parenthesis_is_malformed() {
        let err = street_from_bus_title("1201 Paseo Pamplona").unwrap_err();
        assert!(matches!(err, ServiceError::Malformed(_)));
    }

    #[test]
    fn bus_title_with_empty_street_is_malformed() {
        let err = street_from_bus_title("(1201) Líneas: 33").unwrap_err();
        assert!(matches!(err, ServiceError::Malformed(_)));
    }

    #[test]
    fn bizi_title_drops_the_station_number() {
        assert_eq!(street_from_bizi_title("130 - Plaza España"), "Plaza España");
    }

    #[test]
    fn bizi_title_keeps_later_dashes() {
        assert_eq!(
            street_from_bizi_title("7 - Actur - Rey Fernando"),
            "Actur - Rey Fernando"
        );
    }

    #[test]
    fn bizi_title_without_dash_is_returned_whole() {
        assert_eq!(street_from_bizi_title("Plaza España"), "Plaza España");
    }

    #[test]
    fn placemark_stub_extracts_id_and_street() {
        assert_eq!(
            station_stub_from_placemark("  2216 - Calle Mayor 15 "),
            Some(("2216".to_string(), "Calle Mayor 15".to_string()))
        );
    }

    #[test]
    fn placemark_with_non_numeric_id_is_discarded() {
        assert_eq!(station_stub_from_placemark("Cochera - Calle Mayor"), None);
        assert_eq!(station_stub_from_placemark("sin numero"), None);
    }
}
