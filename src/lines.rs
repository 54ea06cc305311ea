//! Line resolution: display names come from the operator's live line
//! catalog, the physical stop sequence from the per-line geographic
//! documents. A line that fell out of the catalog is soft-deleted with
//! `hidden`, never removed. Resolving a line also upserts the station stubs
//! it encounters, which is how line -> station membership gets rebuilt.

use crate::backup_store::BackupStore;
use crate::errors::ServiceError;
use crate::models::{Line, LinesResponse, Source, Station, StationType, StationsResponse};
use crate::normalize::{LOWER_REST, capitalize_each_word, fix_encoding};
use crate::reconcile::fetch_failure_to_error;
use crate::ttl_cache::TtlCache;
use crate::upstream::{self, CatalogLine, Transport};
use futures::future::join_all;
use itertools::Itertools;
use log::{error, warn};

pub const CATALOG_CACHE_KEY: &str = "bus/lines/available";
pub const LINES_CACHE_KEY: &str = "bus/lines";

fn normalize_line_label(label: &str) -> String {
    label
        .split(" - ")
        .map(|part| capitalize_each_word(&fix_encoding(part.trim()), LOWER_REST))
        .join(" - ")
}

/// The live line catalog, scraped from the operator's line selector.
pub async fn fetch_lines_catalog(
    transport: &Transport,
    cache: &TtlCache<Vec<CatalogLine>>,
) -> Result<Vec<CatalogLine>, ServiceError> {
    if let Some(hit) = cache.get(CATALOG_CACHE_KEY) {
        return Ok(hit);
    }
    let response = transport
        .get(upstream::BUS_LINES_CATALOG_URL)
        .await
        .map_err(|err| fetch_failure_to_error(&err, "bus/lines"))?;
    let catalog = upstream::extract_lines_catalog(&response.body);
    if catalog.is_empty() {
        // markup changes land here; hidden-line fallbacks still apply
        warn!("line catalog scrape produced no entries");
    }
    cache.set(CATALOG_CACHE_KEY, catalog.clone(), None);
    Ok(catalog)
}

/// `resolveLine`: name from the catalog (or backup, or the raw id when the
/// line went hidden), stop sequence from the outbound/return geometry pair,
/// cross-referenced against stored stations so a bare stub never regresses
/// a richer record.
pub async fn resolve_line(
    transport: &Transport,
    backup: &BackupStore,
    catalog: &[CatalogLine],
    id: &str,
) -> Result<Line, ServiceError> {
    let found = catalog
        .iter()
        .find(|line| line.value.eq_ignore_ascii_case(id));
    let prior = match backup.find_line(id).await {
        Ok(prior) => prior,
        Err(err) => {
            warn!("backup lookup for line {id} failed: {err}");
            None
        }
    };

    let name = match found {
        Some(entry) => Some(normalize_line_label(&entry.label)),
        None => prior
            .as_ref()
            .and_then(|line| line.name.clone())
            .or_else(|| Some(id.to_string())),
    };

    let (outbound_url, return_url) = upstream::line_kml_urls(id);
    let (outbound, inbound) = futures::join!(
        transport.get(&outbound_url),
        transport.get(&return_url)
    );

    let mut stubs: Vec<(String, String)> = Vec::new();
    for (direction_url, fetched) in [(&outbound_url, outbound), (&return_url, inbound)] {
        match fetched {
            Ok(response) => stubs.extend(upstream::extract_kml_station_stubs(&response.body)),
            Err(err) => warn!("line {id} geometry fetch {direction_url} failed: {err}"),
        }
    }

    // outbound order first, return stops appended once
    let mut station_ids: Vec<String> = Vec::new();
    for (stub_id, _) in &stubs {
        if !station_ids.contains(stub_id) {
            station_ids.push(stub_id.clone());
        }
    }

    for (stub_id, raw_street) in &stubs {
        let station = stub_station(backup, id, stub_id, raw_street, &outbound_url).await;
        if let Err(err) = backup.upsert_station(&station).await {
            warn!("station stub upsert for bus/{stub_id} failed: {err}");
        }
    }

    // an empty geometry pass must not wipe a previously known sequence
    if station_ids.is_empty() {
        if let Some(prior_line) = &prior {
            station_ids = prior_line.stations.clone();
        }
    }

    let line = Line {
        id: id.to_string(),
        number: Some(found.map(|entry| entry.value.clone()).unwrap_or_else(|| id.to_string())),
        name,
        stations: station_ids,
        hidden: found.is_none(),
        last_updated: Some(crate::iso_timestamp_now()),
    };

    if let Err(err) = backup.upsert_line(&line).await {
        warn!("backup upsert for line {id} failed: {err}");
    }
    Ok(line)
}

/// Builds the station record a geometry stub maps to, preferring the richer
/// stored record's sticky fields and accumulating line membership.
async fn stub_station(
    backup: &BackupStore,
    line_id: &str,
    stub_id: &str,
    raw_street: &str,
    source_url: &str,
) -> Station {
    let street = capitalize_each_word(&fix_encoding(raw_street), LOWER_REST);
    let existing = match backup.find_station(StationType::Bus, stub_id).await {
        Ok(existing) => existing,
        Err(err) => {
            warn!("backup lookup for stub bus/{stub_id} failed: {err}");
            None
        }
    };
    match existing {
        Some(mut known) => {
            if known.street.is_none() {
                known.street = Some(street);
            }
            if !known.lines.contains(&line_id.to_string()) {
                known.lines.push(line_id.to_string());
                known.lines.sort();
            }
            known
        }
        None => {
            let mut station = Station::skeleton(stub_id, StationType::Bus);
            station.street = Some(street);
            station.lines = vec![line_id.to_string()];
            station.source = Some(Source::Api);
            station.source_url = Some(source_url.to_string());
            station.last_updated = Some(crate::iso_timestamp_now());
            station
        }
    }
}

/// Full line map for clients, straight from the backup store.
pub async fn lines_map(
    backup: &BackupStore,
    cache: &TtlCache<LinesResponse>,
) -> Result<LinesResponse, ServiceError> {
    if let Some(hit) = cache.get(LINES_CACHE_KEY) {
        return Ok(hit);
    }
    let map = backup.find_all_lines().await?;
    cache.set(LINES_CACHE_KEY, map.clone(), None);
    Ok(map)
}

pub async fn line_by_id(
    backup: &BackupStore,
    cache: &TtlCache<Line>,
    id: &str,
) -> Result<Line, ServiceError> {
    let cache_key = format!("bus/lines/{id}");
    if let Some(hit) = cache.get(&cache_key) {
        return Ok(hit);
    }
    let line = backup
        .find_line(id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(id.to_string()))?;
    cache.set(&cache_key, line.clone(), None);
    Ok(line)
}

/// Administrative refresh: one catalog scrape, then a concurrent
/// `resolve_line` sweep over the union of live and stored lines. Per-line
/// failures are isolated; the rebuilt map is re-read, cached and returned.
pub async fn lines_update(
    transport: &Transport,
    backup: &BackupStore,
    catalog_cache: &TtlCache<Vec<CatalogLine>>,
    lines_cache: &TtlCache<LinesResponse>,
) -> Result<LinesResponse, ServiceError> {
    let catalog = fetch_lines_catalog(transport, catalog_cache).await?;
    let prior = backup.find_all_lines().await?;

    let mut ids: Vec<String> = catalog.iter().map(|line| line.value.clone()).collect();
    for id in prior.keys() {
        if !ids.iter().any(|known| known.eq_ignore_ascii_case(id)) {
            ids.push(id.clone());
        }
    }

    let outcomes = join_all(
        ids.iter()
            .map(|id| resolve_line(transport, backup, &catalog, id)),
    )
    .await;
    for (id, outcome) in ids.iter().zip(outcomes) {
        if let Err(err) = outcome {
            error!("line {id} update failed: {err}");
        }
    }

    let refreshed = backup.find_all_lines().await?;
    lines_cache.set(LINES_CACHE_KEY, refreshed.clone(), None);
    Ok(refreshed)
}

/// Administrative refresh of the bus station map: a geometry sweep over the
/// live catalog (which upserts every stub it finds), then the rebuilt map.
pub async fn bus_stations_update(
    transport: &Transport,
    backup: &BackupStore,
    catalog_cache: &TtlCache<Vec<CatalogLine>>,
    stations_cache: &TtlCache<StationsResponse>,
) -> Result<StationsResponse, ServiceError> {
    let catalog = fetch_lines_catalog(transport, catalog_cache).await?;
    let ids: Vec<String> = catalog.iter().map(|line| line.value.clone()).collect();
    let outcomes = join_all(
        ids.iter()
            .map(|id| resolve_line(transport, backup, &catalog, id)),
    )
    .await;
    for (id, outcome) in ids.iter().zip(outcomes) {
        if let Err(err) = outcome {
            error!("station sweep for line {id} failed: {err}");
        }
    }

    let map = backup.find_all_stations(StationType::Bus).await?;
    stations_cache.set("bus/stations", map.clone(), None);
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup_store::MemoryBackupStore;
    use crate::upstream::{FetchError, StubTransport};

    const CATALOG_HTML: &str = r#"
        <select id="linea-lineas-horarios">
            <option value="default">Selecciona</option>
            <option value="21">21 - Paraíso - San José</option>
            <option value="33">33 - Vía Hispanidad</option>
        </select>"#;

    const KML_IDA: &str = r#"
        <kml><Document>
            <Placemark><name>108 - Paseo Independencia</name></Placemark>
            <Placemark><name>2216 - Calle Mayor</name></Placemark>
        </Document></kml>"#;

    const KML_VUELTA: &str = r#"
        <kml><Document>
            <Placemark><name>2216 - Calle Mayor</name></Placemark>
            <Placemark><name>301 - Coso</name></Placemark>
        </Document></kml>"#;

    #[tokio::test]
    async fn resolves_a_catalog_line_with_ordered_unique_stops() {
        let transport = Transport::Stub(
            StubTransport::default()
                .ok("lineas/21-ida.kml", KML_IDA)
                .ok("lineas/21-vuelta.kml", KML_VUELTA),
        );
        let backup = MemoryBackupStore::default().into_store();
        let catalog = upstream::extract_lines_catalog(CATALOG_HTML);

        let line = resolve_line(&transport, &backup, &catalog, "21")
            .await
            .unwrap();
        assert_eq!(line.name.as_deref(), Some("Paraíso - San José"));
        assert!(!line.hidden);
        assert_eq!(line.stations, vec!["108", "2216", "301"]);

        // the pass upserts the stubs it saw
        let stub = backup
            .find_station(StationType::Bus, "108")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stub.street.as_deref(), Some("Paseo Independencia"));
        assert_eq!(stub.lines, vec!["21"]);
    }

    #[tokio::test]
    async fn catalog_absence_marks_the_line_hidden() {
        let transport = Transport::Stub(
            StubTransport::default()
                .fail("lineas/N5-ida.kml", FetchError::Status {
                    status: 404,
                    message: "gone".to_string(),
                })
                .fail("lineas/N5-vuelta.kml", FetchError::Status {
                    status: 404,
                    message: "gone".to_string(),
                }),
        );
        let backup = MemoryBackupStore::default().into_store();
        let prior = Line {
            id: "N5".to_string(),
            number: Some("N5".to_string()),
            name: Some("Búho Las Fuentes".to_string()),
            stations: vec!["108".to_string()],
            hidden: false,
            last_updated: None,
        };
        backup.upsert_line(&prior).await.unwrap();
        let catalog = upstream::extract_lines_catalog(CATALOG_HTML);

        let line = resolve_line(&transport, &backup, &catalog, "N5")
            .await
            .unwrap();
        assert!(line.hidden);
        // name and sequence fall back to the stored record
        assert_eq!(line.name.as_deref(), Some("Búho Las Fuentes"));
        assert_eq!(line.stations, vec!["108"]);
    }

    #[tokio::test]
    async fn hidden_line_without_backup_falls_back_to_the_raw_id() {
        let transport = Transport::Stub(StubTransport::default());
        let backup = MemoryBackupStore::default().into_store();

        let line = resolve_line(&transport, &backup, &[], "99")
            .await
            .unwrap();
        assert!(line.hidden);
        assert_eq!(line.name.as_deref(), Some("99"));
        assert!(line.stations.is_empty());
    }

    #[tokio::test]
    async fn stub_pass_does_not_regress_richer_station_records() {
        let transport = Transport::Stub(
            StubTransport::default()
                .ok("lineas/21-ida.kml", KML_IDA)
                .fail(
                    "lineas/21-vuelta.kml",
                    FetchError::Network("unreachable".to_string()),
                ),
        );
        let backup = MemoryBackupStore::default().into_store();
        let mut rich = Station::skeleton("108", StationType::Bus);
        rich.street = Some("Paseo de la Independencia".to_string());
        rich.coordinates = vec!["-0.87".to_string(), "41.65".to_string()];
        rich.lines = vec!["38".to_string()];
        backup.upsert_station(&rich).await.unwrap();
        let catalog = upstream::extract_lines_catalog(CATALOG_HTML);

        resolve_line(&transport, &backup, &catalog, "21")
            .await
            .unwrap();

        let kept = backup
            .find_station(StationType::Bus, "108")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(kept.street.as_deref(), Some("Paseo de la Independencia"));
        assert_eq!(kept.coordinates, vec!["-0.87", "41.65"]);
        assert_eq!(kept.lines, vec!["21", "38"]);
    }

    #[tokio::test]
    async fn line_by_id_misses_are_not_found() {
        let backup = MemoryBackupStore::default().into_store();
        let cache = TtlCache::default();
        let err = line_by_id(&backup, &cache, "Ci1").await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn lines_update_covers_catalog_and_stored_lines() {
        let transport = Transport::Stub(
            StubTransport::default()
                .ok("lineas-y-horarios", CATALOG_HTML)
                .ok("-ida.kml", KML_IDA)
                .ok("-vuelta.kml", KML_VUELTA),
        );
        let backup = MemoryBackupStore::default().into_store();
        let stored_only = Line {
            id: "N5".to_string(),
            number: Some("N5".to_string()),
            name: Some("Búho Las Fuentes".to_string()),
            stations: Vec::new(),
            hidden: false,
            last_updated: None,
        };
        backup.upsert_line(&stored_only).await.unwrap();
        let catalog_cache = TtlCache::default();
        let lines_cache = TtlCache::default();

        let map = lines_update(&transport, &backup, &catalog_cache, &lines_cache)
            .await
            .unwrap();
        assert_eq!(map.len(), 3);
        assert!(!map.get("21").unwrap().hidden);
        assert!(!map.get("33").unwrap().hidden);
        assert!(map.get("N5").unwrap().hidden);
        assert_eq!(lines_cache.get(LINES_CACHE_KEY).map(|m| m.len()), Some(3));
    }
}
