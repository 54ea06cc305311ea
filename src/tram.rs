//! Tram stop resolution. The tram feed publishes one document per travel
//! direction, so a resolution fetches both concurrently and combines the
//! arrival lists by concatenation before the shared sort. One failed
//! direction degrades to empty times for that direction; both failing is an
//! upstream failure like any other.

use crate::errors::ServiceError;
use crate::models::{Source, Station, StationType};
use crate::reconcile::{
    ResolveContext, annotate_backup, assemble_station, backup_seed, fetch_failure_to_error,
    persist, station_cache_key,
};
use crate::upstream::{self, FreshStation};
use log::warn;

pub async fn resolve_tram_station(
    ctx: &ResolveContext<'_>,
    id: &str,
    source: Option<Source>,
) -> Result<Station, ServiceError> {
    let requested = source.unwrap_or(Source::Api);
    let cache_key = station_cache_key(StationType::Tram, id, requested);
    if let Some(hit) = ctx.station_cache.get(&cache_key) {
        return Ok(hit);
    }

    let backup = backup_seed(ctx.backup, StationType::Tram, id).await;

    if requested == Source::Backup {
        return match backup {
            Some(record) => Ok(annotate_backup(record, ctx.backup, StationType::Tram, id)),
            None => Err(ServiceError::NotFound(id.to_string())),
        };
    }

    let (outbound_url, return_url) = upstream::tram_direction_urls(id);
    let (outbound, inbound) = futures::join!(
        ctx.transport.get(&outbound_url),
        ctx.transport.get(&return_url)
    );

    if outbound.is_err() && inbound.is_err() {
        let err = outbound.unwrap_err();
        return match backup {
            Some(record) => {
                warn!("tram/{id} fetch failed in both directions ({err}); serving backup");
                Ok(annotate_backup(record, ctx.backup, StationType::Tram, id))
            }
            None => Err(fetch_failure_to_error(&err, id)),
        };
    }

    let mut fresh = FreshStation::default();
    for (direction_url, fetched) in [(&outbound_url, outbound), (&return_url, inbound)] {
        let response = match fetched {
            Ok(response) => response,
            Err(err) => {
                warn!("tram/{id} direction fetch {direction_url} failed ({err}); dropping it");
                continue;
            }
        };
        match upstream::extract_api_transit_stop(&response.body) {
            Ok(direction) => {
                fresh.times.extend(direction.times);
                if fresh.street.is_none() {
                    fresh.street = direction.street;
                }
                if fresh.coordinates.is_empty() {
                    fresh.coordinates = direction.coordinates;
                }
                if fresh.last_updated.is_none() {
                    fresh.last_updated = direction.last_updated;
                }
                if fresh.malformed.is_none() {
                    fresh.malformed = direction.malformed;
                }
            }
            Err(defect) => {
                warn!("tram/{id} payload from {direction_url} was malformed ({defect}); dropping it");
            }
        }
    }

    let record = assemble_station(
        StationType::Tram,
        id,
        requested,
        &outbound_url,
        backup,
        fresh,
    )?;
    persist(ctx, &record, &cache_key).await;
    Ok(record)
}
