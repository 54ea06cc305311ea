//! The station reconciliation pipeline: cache check, backup lookup, upstream
//! fetch, sticky-field merge, text normalization, derived line/time lists,
//! best-effort persistence. Each resolution is independent and idempotent;
//! re-running it against unchanged upstream state yields the same record.

use crate::backup_store::BackupStore;
use crate::errors::ServiceError;
use crate::models::{ArrivalTime, Source, Station, StationType, StationsResponse};
use crate::ttl_cache::{STATION_DETAIL_TTL, TtlCache};
use crate::upstream::{self, FetchError, FreshStation, Transport};
use lazy_static::lazy_static;
use log::warn;
use regex::Regex;

pub struct ResolveContext<'a> {
    pub transport: &'a Transport,
    pub backup: &'a BackupStore,
    pub station_cache: &'a TtlCache<Station>,
}

lazy_static! {
    static ref LEADING_MINUTES: Regex = Regex::new(r"^\d+").unwrap();
}

/// Sort weight for free-text arrival estimates: vehicles already at the stop
/// first, numeric countdowns by their minute value, unrecognized phrases
/// near the end, "no estimate" last. Ties keep input order (stable sort).
pub fn time_sort_weight(time: &str) -> i64 {
    let normalized = time.trim().to_lowercase();
    if normalized.contains("parada") {
        return 0;
    }
    if let Some(digits) = LEADING_MINUTES.find(&normalized) {
        if let Ok(minutes) = digits.as_str().parse::<i64>() {
            return minutes;
        }
    }
    if normalized.contains("estimación") {
        return 9999;
    }
    999
}

pub fn sort_times(times: &mut [ArrivalTime]) {
    times.sort_by_key(|entry| time_sort_weight(&entry.time));
}

/// Accumulates every line label seen in the arrival list into the (possibly
/// backup-seeded) line set, then sorts lexicographically.
pub fn union_lines(lines: &mut Vec<String>, times: &[ArrivalTime]) {
    for entry in times {
        if !lines.contains(&entry.line) {
            lines.push(entry.line.clone());
        }
    }
    lines.sort();
}

/// Backup absence is a regular state, and a failing backup read must not
/// break a resolution that can still go to the live source.
pub(crate) async fn backup_seed(
    backup: &BackupStore,
    station_type: StationType,
    id: &str,
) -> Option<Station> {
    match backup.find_station(station_type, id).await {
        Ok(record) => record,
        Err(err) => {
            warn!(
                "backup lookup for {}/{} failed: {}",
                station_type.as_str(),
                id,
                err
            );
            None
        }
    }
}

pub(crate) fn annotate_backup(
    mut record: Station,
    backup: &BackupStore,
    station_type: StationType,
    id: &str,
) -> Station {
    record.source = Some(Source::Backup);
    record.source_url = Some(backup.station_source_url(station_type, id));
    record
}

/// Error surfaced when a fetch fails and nothing can mask it.
pub(crate) fn fetch_failure_to_error(err: &FetchError, id: &str) -> ServiceError {
    match err {
        FetchError::Timeout(_) => ServiceError::Timeout(err.to_string()),
        FetchError::Status { status: 404, .. } => ServiceError::NotFound(id.to_string()),
        FetchError::Status { .. } => ServiceError::Internal(err.to_string()),
        FetchError::Network(_) => ServiceError::SourceUnavailable(err.to_string()),
    }
}

/// Merge + derive steps shared by the bus and tram pipelines.
pub(crate) fn assemble_station(
    station_type: StationType,
    id: &str,
    source: Source,
    url: &str,
    backup: Option<Station>,
    fresh: FreshStation,
) -> Result<Station, ServiceError> {
    let had_backup = backup.is_some();
    let mut record = Station::skeleton(id, station_type);
    if let Some(seed) = backup {
        record.street = seed.street;
        record.coordinates = seed.coordinates;
        record.lines = seed.lines;
    }
    // sticky fields: a street or position we already know survives a bad
    // fresh extraction
    if record.street.is_none() {
        record.street = fresh.street;
    }
    if record.coordinates.is_empty() {
        record.coordinates = fresh.coordinates;
    }
    if !had_backup {
        if let Some(defect) = fresh.malformed {
            return Err(ServiceError::Malformed(defect));
        }
    }
    record.times = fresh.times;
    union_lines(&mut record.lines, &record.times);
    sort_times(&mut record.times);
    record.source = Some(source);
    record.source_url = Some(url.to_string());
    record.last_updated = match source {
        // the scrape carries no upstream timestamp
        Source::Web => Some(crate::iso_timestamp_now()),
        _ => fresh.last_updated,
    };
    Ok(record)
}

/// Write-through of the reconciled record. Both writes are resilience aids,
/// not correctness requirements, so failures are logged and swallowed.
pub(crate) async fn persist(ctx: &ResolveContext<'_>, record: &Station, cache_key: &str) {
    if let Err(err) = ctx.backup.upsert_station(record).await {
        warn!(
            "backup upsert for {}/{} failed: {}",
            record.station_type.as_str(),
            record.id,
            err
        );
    }
    ctx.station_cache
        .set(cache_key, record.clone(), Some(STATION_DETAIL_TTL));
}

pub fn station_cache_key(station_type: StationType, id: &str, source: Source) -> String {
    format!("{}/stations/{id}/{}", station_type.as_str(), source.as_str())
}

/// `resolve(id, source)` for bus stops. `source` defaults to the official
/// API; `web` takes the scrape path; `backup` short-circuits to the stored
/// record with no fetch and no persist.
pub async fn resolve_bus_station(
    ctx: &ResolveContext<'_>,
    id: &str,
    source: Option<Source>,
) -> Result<Station, ServiceError> {
    let requested = source.unwrap_or(Source::Api);
    let cache_key = station_cache_key(StationType::Bus, id, requested);
    if let Some(hit) = ctx.station_cache.get(&cache_key) {
        return Ok(hit);
    }

    let backup = backup_seed(ctx.backup, StationType::Bus, id).await;

    if requested == Source::Backup {
        return match backup {
            Some(record) => Ok(annotate_backup(record, ctx.backup, StationType::Bus, id)),
            None => Err(ServiceError::NotFound(id.to_string())),
        };
    }

    let url = match requested {
        Source::Web => upstream::bus_web_station_url(id),
        _ => upstream::bus_api_station_url(id),
    };

    let extracted = match ctx.transport.get(&url).await {
        Ok(response) => match requested {
            Source::Web => upstream::extract_web_transit_stop(&response.body),
            _ => upstream::extract_api_transit_stop(&response.body),
        },
        Err(err) => {
            return match backup {
                Some(record) => {
                    warn!("bus/{id} fetch from {url} failed ({err}); serving backup");
                    Ok(annotate_backup(record, ctx.backup, StationType::Bus, id))
                }
                None => Err(fetch_failure_to_error(&err, id)),
            };
        }
    };

    let fresh = match extracted {
        Ok(fresh) => fresh,
        Err(defect) => {
            return match backup {
                Some(record) => {
                    warn!("bus/{id} payload from {url} was malformed ({defect}); serving backup");
                    Ok(annotate_backup(record, ctx.backup, StationType::Bus, id))
                }
                None => Err(ServiceError::Malformed(defect)),
            };
        }
    };

    let record = assemble_station(StationType::Bus, id, requested, &url, backup, fresh)?;
    persist(ctx, &record, &cache_key).await;
    Ok(record)
}

/// Full station map for one transport type, straight from the backup store.
pub async fn stations_map(
    backup: &BackupStore,
    cache: &TtlCache<StationsResponse>,
    station_type: StationType,
) -> Result<StationsResponse, ServiceError> {
    let cache_key = format!("{}/stations", station_type.as_str());
    if let Some(hit) = cache.get(&cache_key) {
        return Ok(hit);
    }
    let mut map = backup.find_all_stations(station_type).await?;
    if station_type == StationType::Bizi {
        // live availability is never served from storage
        for station in map.values_mut() {
            station.state = None;
            station.bikes = None;
            station.open_docks = None;
        }
    }
    cache.set(&cache_key, map.clone(), None);
    Ok(map)
}
