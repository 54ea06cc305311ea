//! Bike-share station resolution: the same reconciliation pipeline as bus
//! and tram, minus line/time derivation, plus the live availability fields.

use crate::backup_store::BackupStore;
use crate::errors::ServiceError;
use crate::models::{Source, Station, StationType, StationsResponse};
use crate::reconcile::{
    ResolveContext, annotate_backup, backup_seed, fetch_failure_to_error, station_cache_key,
};
use crate::ttl_cache::{STATION_DETAIL_TTL, TtlCache};
use crate::upstream::{self, ApiBiziStation, Transport};
use log::warn;

fn build_station(id: &str, payload: &ApiBiziStation, url: &str) -> Station {
    let mut record = Station::skeleton(id, StationType::Bizi);
    record.street = Some(payload.normalized_street());
    record.coordinates = payload.coordinate_strings();
    record.state = payload.estado.clone();
    record.bikes = payload.bicis_disponibles;
    record.open_docks = payload.anclajes_disponibles;
    record.source = Some(Source::Api);
    record.source_url = Some(
        payload
            .about
            .clone()
            .unwrap_or_else(|| url.to_string()),
    );
    record.last_updated = payload.last_updated.clone();
    record
}

/// The stored form of a bike-share station, stripped of live availability.
fn durable_subset(record: &Station) -> Station {
    let mut durable = record.clone();
    durable.state = None;
    durable.bikes = None;
    durable.open_docks = None;
    durable
}

pub async fn resolve_bizi_station(
    ctx: &ResolveContext<'_>,
    id: &str,
    source: Option<Source>,
) -> Result<Station, ServiceError> {
    let requested = source.unwrap_or(Source::Api);
    let cache_key = station_cache_key(StationType::Bizi, id, requested);
    if let Some(hit) = ctx.station_cache.get(&cache_key) {
        return Ok(hit);
    }

    let backup = backup_seed(ctx.backup, StationType::Bizi, id).await;

    if requested == Source::Backup {
        return match backup {
            Some(record) => Ok(annotate_backup(record, ctx.backup, StationType::Bizi, id)),
            None => Err(ServiceError::NotFound(id.to_string())),
        };
    }

    let url = upstream::bizi_api_station_url(id);
    let response = match ctx.transport.get(&url).await {
        Ok(response) => response,
        Err(err) => {
            return match backup {
                Some(record) => {
                    warn!("bizi/{id} fetch from {url} failed ({err}); serving backup");
                    Ok(annotate_backup(record, ctx.backup, StationType::Bizi, id))
                }
                None => Err(fetch_failure_to_error(&err, id)),
            };
        }
    };

    let payload: ApiBiziStation = match serde_json::from_str(&response.body) {
        Ok(payload) => payload,
        Err(err) => {
            let defect = format!("bike station payload did not parse: {err}");
            return match backup {
                Some(record) => {
                    warn!("bizi/{id} payload from {url} was malformed ({defect}); serving backup");
                    Ok(annotate_backup(record, ctx.backup, StationType::Bizi, id))
                }
                None => Err(ServiceError::Malformed(defect)),
            };
        }
    };

    let mut record = build_station(id, &payload, &url);
    // sticky fields: the previously captured street and position win
    if let Some(seed) = backup {
        if seed.street.is_some() {
            record.street = seed.street;
        }
        if !seed.coordinates.is_empty() {
            record.coordinates = seed.coordinates;
        }
    }

    if let Err(err) = ctx.backup.upsert_station(&durable_subset(&record)).await {
        warn!("backup upsert for bizi/{id} failed: {err}");
    }
    ctx.station_cache
        .set(&cache_key, record.clone(), Some(STATION_DETAIL_TTL));
    Ok(record)
}

/// Administrative refresh: pages through the official catalog with the
/// `start`/`rows` cursor, upserting every station and rebuilding the cached
/// map. Bypasses the cache on the way in by construction.
pub async fn bizi_stations_update(
    transport: &Transport,
    backup: &BackupStore,
    stations_cache: &TtlCache<StationsResponse>,
) -> Result<StationsResponse, ServiceError> {
    let mut all = StationsResponse::new();
    let mut start = 0_u64;
    let rows = 50_u64;

    loop {
        let url = upstream::bizi_api_list_url(start, rows);
        let response = transport
            .get(&url)
            .await
            .map_err(|err| fetch_failure_to_error(&err, "bizi/stations"))?;
        let page: upstream::ApiBiziList = serde_json::from_str(&response.body)
            .map_err(|err| {
                ServiceError::Malformed(format!("bike catalog page did not parse: {err}"))
            })?;

        for payload in &page.result {
            let Some(id) = payload.id.clone() else {
                warn!("bike catalog entry without id skipped ('{}')", payload.title);
                continue;
            };
            let record = build_station(&id, payload, &url);
            if let Err(err) = backup.upsert_station(&durable_subset(&record)).await {
                warn!("backup upsert for bizi/{id} failed: {err}");
            }
            all.insert(id, record);
        }

        if start + rows >= page.total_count {
            break;
        }
        start += rows;
    }

    stations_cache.set("bizi/stations", all.clone(), None);
    Ok(all)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup_store::MemoryBackupStore;
    use crate::upstream::{FetchError, StubTransport};

    const STATION_BODY: &str = r#"{
        "id": "130",
        "title": "130 - Plaza Espaa",
        "estado": "IN_SERVICE",
        "bicisDisponibles": 8,
        "anclajesDisponibles": 14,
        "geometry": { "coordinates": [-0.8786, 41.6488] },
        "lastUpdated": "2024-05-01T10:00:00Z"
    }"#;

    #[tokio::test]
    async fn resolves_and_normalizes_a_bike_station() {
        let transport =
            Transport::Stub(StubTransport::default().ok("estacion-bicicleta/130", STATION_BODY));
        let backup = MemoryBackupStore::default().into_store();
        let cache = TtlCache::default();
        let ctx = ResolveContext {
            transport: &transport,
            backup: &backup,
            station_cache: &cache,
        };

        let station = resolve_bizi_station(&ctx, "130", None).await.unwrap();
        assert_eq!(station.street.as_deref(), Some("Plaza España"));
        assert_eq!(station.bikes, Some(8));
        assert_eq!(station.open_docks, Some(14));
        assert_eq!(station.station_type, StationType::Bizi);

        // availability is live data and must not reach the store
        let stored = backup
            .find_station(StationType::Bizi, "130")
            .await
            .unwrap()
            .unwrap();
        assert!(stored.bikes.is_none());
        assert_eq!(stored.street.as_deref(), Some("Plaza España"));
    }

    #[tokio::test]
    async fn sticky_street_wins_over_fresh_title() {
        let transport =
            Transport::Stub(StubTransport::default().ok("estacion-bicicleta/130", STATION_BODY));
        let store = MemoryBackupStore::default().into_store();
        let mut prior = Station::skeleton("130", StationType::Bizi);
        prior.street = Some("Plaza de España".to_string());
        store.upsert_station(&prior).await.unwrap();
        let cache = TtlCache::default();
        let ctx = ResolveContext {
            transport: &transport,
            backup: &store,
            station_cache: &cache,
        };

        let station = resolve_bizi_station(&ctx, "130", None).await.unwrap();
        assert_eq!(station.street.as_deref(), Some("Plaza de España"));
        // live fields still come through fresh
        assert_eq!(station.bikes, Some(8));
    }

    #[tokio::test]
    async fn outage_with_backup_serves_the_stored_record() {
        let transport = Transport::Stub(StubTransport::default().fail(
            "estacion-bicicleta/130",
            FetchError::Network("connection refused".to_string()),
        ));
        let store = MemoryBackupStore::default().into_store();
        let mut prior = Station::skeleton("130", StationType::Bizi);
        prior.street = Some("Plaza de España".to_string());
        store.upsert_station(&prior).await.unwrap();
        let cache = TtlCache::default();
        let ctx = ResolveContext {
            transport: &transport,
            backup: &store,
            station_cache: &cache,
        };

        let station = resolve_bizi_station(&ctx, "130", None).await.unwrap();
        assert_eq!(station.source, Some(Source::Backup));
    }

    #[tokio::test]
    async fn stations_update_pages_through_the_catalog() {
        // the cursor advances by the requested page size, so a total beyond
        // one page forces a second request
        let first_page = r#"{
            "totalCount": 52, "start": 0, "rows": 50,
            "result": [
                { "id": "1", "title": "1 - Calle Mayor" },
                { "id": "2", "title": "2 - Paseo Independencia" }
            ]
        }"#;
        let second_page = r#"{
            "totalCount": 52, "start": 50, "rows": 50,
            "result": [ { "id": "3", "title": "3 - Calle San Jorge" } ]
        }"#;
        let transport = Transport::Stub(
            StubTransport::default()
                .ok("start=0", first_page)
                .ok("start=50", second_page),
        );
        let backup = MemoryBackupStore::default().into_store();
        let cache = TtlCache::default();

        let map = bizi_stations_update(&transport, &backup, &cache)
            .await
            .unwrap();
        assert_eq!(map.len(), 3);
        assert_eq!(map.get("3").unwrap().street.as_deref(), Some("Calle San Jorge"));
        assert!(
            backup
                .find_station(StationType::Bizi, "2")
                .await
                .unwrap()
                .is_some()
        );
    }
}
