//! Durable backup of reconciled records: an HTTP JSON document store
//! (Firebase-RTDB style paths, `GET`/`PUT {base}/{path}.json`). Every write
//! is a complete replacement of the record, so concurrent resolutions race
//! only on a last-write-wins basis and no locking is needed.

use crate::errors::ServiceError;
use crate::models::{Line, LinesResponse, Station, StationType, StationsResponse};
use serde::Serialize;
use serde::de::DeserializeOwned;

pub enum BackupStore {
    Http(HttpBackupStore),
    #[cfg(test)]
    Memory(MemoryBackupStore),
}

fn station_path(station_type: StationType, id: &str) -> String {
    match station_type {
        // bus posts keep their historical operator prefix in storage
        StationType::Bus => format!("bus/stations/tuzsa-{id}"),
        StationType::Tram => format!("tram/stations/{id}"),
        StationType::Bizi => format!("bizi/stations/{id}"),
    }
}

impl BackupStore {
    pub async fn find_station(
        &self,
        station_type: StationType,
        id: &str,
    ) -> Result<Option<Station>, ServiceError> {
        match self {
            BackupStore::Http(store) => store.get_json(&station_path(station_type, id)).await,
            #[cfg(test)]
            BackupStore::Memory(store) => {
                Ok(store
                .stations
                .get(&station_path(station_type, id))
                .map(|entry| entry.value().clone()))
            }
        }
    }

    pub async fn find_all_stations(
        &self,
        station_type: StationType,
    ) -> Result<StationsResponse, ServiceError> {
        match self {
            BackupStore::Http(store) => Ok(store
                .get_json::<StationsResponse>(&format!("{}/stations", station_type.as_str()))
                .await?
                .unwrap_or_default()),
            #[cfg(test)]
            BackupStore::Memory(store) => {
                let prefix = format!("{}/stations/", station_type.as_str());
                Ok(store
                    .stations
                    .iter()
                    .filter(|entry| entry.key().starts_with(&prefix))
                    .map(|entry| (entry.value().id.clone(), entry.value().clone()))
                    .collect())
            }
        }
    }

    pub async fn upsert_station(&self, station: &Station) -> Result<(), ServiceError> {
        let path = station_path(station.station_type, &station.id);
        match self {
            BackupStore::Http(store) => store.put_json(&path, station).await,
            #[cfg(test)]
            BackupStore::Memory(store) => {
                store.stations.insert(path, station.clone());
                Ok(())
            }
        }
    }

    pub async fn find_line(&self, id: &str) -> Result<Option<Line>, ServiceError> {
        match self {
            BackupStore::Http(store) => store.get_json(&format!("bus/lines/{id}")).await,
            #[cfg(test)]
            BackupStore::Memory(store) => Ok(store.lines.get(id).map(|entry| entry.value().clone())),
        }
    }

    pub async fn find_all_lines(&self) -> Result<LinesResponse, ServiceError> {
        match self {
            BackupStore::Http(store) => Ok(store
                .get_json::<LinesResponse>("bus/lines")
                .await?
                .unwrap_or_default()),
            #[cfg(test)]
            BackupStore::Memory(store) => Ok(store
                .lines
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect()),
        }
    }

    pub async fn upsert_line(&self, line: &Line) -> Result<(), ServiceError> {
        match self {
            BackupStore::Http(store) => {
                store.put_json(&format!("bus/lines/{}", line.id), line).await
            }
            #[cfg(test)]
            BackupStore::Memory(store) => {
                store.lines.insert(line.id.clone(), line.clone());
                Ok(())
            }
        }
    }

    /// Provenance URL reported on records served from backup.
    pub fn station_source_url(&self, station_type: StationType, id: &str) -> String {
        let path = station_path(station_type, id);
        match self {
            BackupStore::Http(store) => store.url(&path),
            #[cfg(test)]
            BackupStore::Memory(_) => format!("memory://{path}"),
        }
    }
}

pub struct HttpBackupStore {
    base: String,
    client: reqwest::Client,
}

impl HttpBackupStore {
    pub fn new(base: impl Into<String>, client: reqwest::Client) -> HttpBackupStore {
        let base = base.into().trim_end_matches('/').to_string();
        HttpBackupStore { base, client }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}.json", self.base, path)
    }

    /// A missing document comes back as a literal `null` body, which is a
    /// regular absence, not an error.
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, ServiceError> {
        let url = self.url(path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| ServiceError::Internal(format!("backup read {url} failed: {err}")))?;
        if !response.status().is_success() {
            return Err(ServiceError::Internal(format!(
                "backup read {url} returned status {}",
                response.status()
            )));
        }
        let body = response
            .text()
            .await
            .map_err(|err| ServiceError::Internal(format!("backup read {url} failed: {err}")))?;
        serde_json::from_str::<Option<T>>(&body).map_err(|err| {
            ServiceError::Internal(format!("backup record at {url} did not parse: {err}"))
        })
    }

    async fn put_json<T: Serialize>(&self, path: &str, value: &T) -> Result<(), ServiceError> {
        let url = self.url(path);
        let response = self
            .client
            .put(&url)
            .json(value)
            .send()
            .await
            .map_err(|err| ServiceError::Internal(format!("backup write {url} failed: {err}")))?;
        if !response.status().is_success() {
            return Err(ServiceError::Internal(format!(
                "backup write {url} returned status {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
#[derive(Default)]
pub struct MemoryBackupStore {
    pub stations: dashmap::DashMap<String, Station>,
    pub lines: dashmap::DashMap<String, Line>,
}

#[cfg(test)]
impl MemoryBackupStore {
    pub fn into_store(self) -> BackupStore {
        BackupStore::Memory(self)
    }
}
