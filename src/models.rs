use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StationType {
    Bus,
    Tram,
    Bizi,
}

impl StationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StationType::Bus => "bus",
            StationType::Tram => "tram",
            StationType::Bizi => "bizi",
        }
    }

    // old backup records predate the `type` discriminator
    fn default_for_backup() -> StationType {
        StationType::Bus
    }
}

/// Which upstream produced the fresh portion of a response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Api,
    Web,
    Backup,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Api => "api",
            Source::Web => "web",
            Source::Backup => "backup",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrivalTime {
    pub line: String,
    pub destination: String,
    pub time: String,
}

/// One shared shape for bus, tram and bike-share stations; `type` discriminates.
///
/// `street` and `coordinates` are sticky: a value already present in the
/// backup record is preferred over a freshly extracted one. `times` is
/// recomputed on every fetch and never merged from backup.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Station {
    pub id: String,
    #[serde(rename = "type", default = "StationType::default_for_backup")]
    pub station_type: StationType,
    #[serde(default)]
    pub street: Option<String>,
    #[serde(default, deserialize_with = "lines_or_legacy_string")]
    pub lines: Vec<String>,
    #[serde(default)]
    pub times: Vec<ArrivalTime>,
    #[serde(default, deserialize_with = "coordinate_strings")]
    pub coordinates: Vec<String>,
    #[serde(default)]
    pub source: Option<Source>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
    // live bike-share fields, absent for bus and tram
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bikes: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_docks: Option<i64>,
}

impl Station {
    pub fn skeleton(id: &str, station_type: StationType) -> Station {
        Station {
            id: id.to_string(),
            station_type,
            street: None,
            lines: Vec::new(),
            times: Vec::new(),
            coordinates: Vec::new(),
            source: None,
            source_url: None,
            last_updated: None,
            state: None,
            bikes: None,
            open_docks: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Line {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub stations: Vec<String>,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cinema {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Stable error payload shape, mirrored across every operation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub status_code: u16,
    pub error: String,
    pub message: String,
}

pub type StationsResponse = BTreeMap<String, Station>;
pub type LinesResponse = BTreeMap<String, Line>;
pub type CinemasResponse = BTreeMap<String, Cinema>;

/// Accepts the current array form as well as legacy backups that stored the
/// line set as one comma-joined string.
fn lines_or_legacy_string<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum LinesCompat {
        Many(Vec<String>),
        Legacy(String),
    }

    Ok(match Option::<LinesCompat>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(LinesCompat::Many(lines)) => lines,
        Some(LinesCompat::Legacy(joined)) => joined
            .split(',')
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect(),
    })
}

/// Coordinates are numeric strings on the wire, but older backups and the
/// official API both emit plain numbers.
fn coordinate_strings<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Coordinate {
        Text(String),
        Number(f64),
    }

    Ok(Option::<Vec<Coordinate>>::deserialize(deserializer)?
        .unwrap_or_default()
        .into_iter()
        .map(|coordinate| match coordinate {
            Coordinate::Text(text) => text,
            Coordinate::Number(number) => number.to_string(),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_comma_joined_lines_are_split() {
        let station: Station =
            serde_json::from_str(r#"{"id":"123","type":"bus","lines":"L1, L2"}"#).unwrap();
        assert_eq!(station.lines, vec!["L1", "L2"]);
    }

    #[test]
    fn single_legacy_line_string_becomes_one_element() {
        let station: Station =
            serde_json::from_str(r#"{"id":"123","type":"bus","lines":"21"}"#).unwrap();
        assert_eq!(station.lines, vec!["21"]);
    }

    #[test]
    fn numeric_coordinates_become_strings() {
        let station: Station =
            serde_json::from_str(r#"{"id":"123","type":"bizi","coordinates":[-0.8773, 41.6561]}"#)
                .unwrap();
        assert_eq!(station.coordinates, vec!["-0.8773", "41.6561"]);
    }

    #[test]
    fn backup_without_type_still_parses() {
        let station: Station = serde_json::from_str(r#"{"id":"123"}"#).unwrap();
        assert_eq!(station.station_type, StationType::Bus);
        assert!(station.lines.is_empty());
    }
}
