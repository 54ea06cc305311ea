//! Upstream sources and their extraction rules. Each source has its own
//! payload shape, so the parsing lives here next to the URL that produces it
//! and the reconciler only ever sees the common `FreshStation` form.

use crate::models::ArrivalTime;
use crate::normalize::{LOWER_REST, capitalize, capitalize_each_word, fix_encoding};
use crate::titles;
use itertools::Itertools;
use lazy_static::lazy_static;
use scraper::{Html, Selector};
use serde_derive::Deserialize;
use std::time::Duration;
use thiserror::Error;

pub const BUS_API_URL: &str = "https://www.zaragoza.es/sede/servicio/urbanismo-infraestructuras/transporte-urbano/poste-autobus/tuzsa-";
pub const BUS_WEB_URL: &str =
    "https://zaragoza-pasobus.avanzagrupo.com/frm_esquemaparadatime.php?poste=";
pub const BUS_LINES_CATALOG_URL: &str = "https://zaragoza.avanzagrupo.com/lineas-y-horarios/";
pub const BIZI_API_URL: &str =
    "https://www.zaragoza.es/sede/servicio/urbanismo-infraestructuras/estacion-bicicleta";
pub const TRAM_API_URL: &str =
    "https://www.zaragoza.es/sede/servicio/urbanismo-infraestructuras/transporte-urbano/parada-tranvia/";
pub const LINE_KML_URL: &str = "https://www.zaragoza.es/contenidos/transporte/lineas/";

pub fn bus_api_station_url(id: &str) -> String {
    format!("{BUS_API_URL}{id}.json?srsname=wgs84")
}

pub fn bus_web_station_url(id: &str) -> String {
    format!("{BUS_WEB_URL}{id}")
}

pub fn bizi_api_station_url(id: &str) -> String {
    format!("{BIZI_API_URL}/{id}.json")
}

pub fn bizi_api_list_url(start: u64, rows: u64) -> String {
    format!("{BIZI_API_URL}.json?start={start}&rows={rows}&srsname=wgs84")
}

/// The tram feed publishes one document per travel direction.
pub fn tram_direction_urls(id: &str) -> (String, String) {
    (
        format!("{TRAM_API_URL}{id}-1.json?srsname=wgs84"),
        format!("{TRAM_API_URL}{id}-2.json?srsname=wgs84"),
    )
}

/// Outbound and return geometry documents for one line.
pub fn line_kml_urls(id: &str) -> (String, String) {
    (
        format!("{LINE_KML_URL}{id}-ida.kml"),
        format!("{LINE_KML_URL}{id}-vuelta.kml"),
    )
}

#[derive(Clone, Debug, Error)]
pub enum FetchError {
    #[error("request to {0} timed out")]
    Timeout(String),
    #[error("{message}")]
    Status { status: u16, message: String },
    #[error("{0}")]
    Network(String),
}

#[derive(Clone, Debug)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
}

pub fn make_reqwest_client(timeout: Duration) -> reqwest::Client {
    reqwest::ClientBuilder::new()
        .use_rustls_tls()
        .user_agent("zgzpls-backend")
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(5))
        .deflate(true)
        .gzip(true)
        .brotli(true)
        .cookie_store(true)
        .build()
        .expect("reqwest client")
}

/// The caller-facing `get(url) -> {status, body}` capability. Failures are
/// never fatal to a resolution by themselves; the reconciler decides whether
/// a backup can mask them. The stub variant lets tests script per-URL
/// results, including timeouts, without sockets.
pub enum Transport {
    Http(reqwest::Client),
    #[cfg(test)]
    Stub(StubTransport),
}

impl Transport {
    pub async fn get(&self, url: &str) -> Result<FetchResponse, FetchError> {
        match self {
            Transport::Http(client) => {
                let response = client
                    .get(url)
                    .send()
                    .await
                    .map_err(|err| classify_reqwest_error(url, err))?;
                let status = response.status().as_u16();
                let body = response
                    .text()
                    .await
                    .map_err(|err| classify_reqwest_error(url, err))?;
                if !(200..300).contains(&status) {
                    return Err(FetchError::Status {
                        status,
                        message: upstream_message(&body).unwrap_or_else(|| {
                            format!("upstream returned status {status} for {url}")
                        }),
                    });
                }
                Ok(FetchResponse { status, body })
            }
            #[cfg(test)]
            Transport::Stub(stub) => stub.get(url),
        }
    }
}

fn classify_reqwest_error(url: &str, err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout(url.to_string())
    } else {
        FetchError::Network(err.to_string())
    }
}

// official error documents carry a human-readable `mensaje` field
fn upstream_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("mensaje")
        .and_then(|mensaje| mensaje.as_str())
        .map(|mensaje| mensaje.to_string())
}

#[cfg(test)]
#[derive(Default)]
pub struct StubTransport {
    routes: Vec<(String, Result<FetchResponse, FetchError>)>,
}

#[cfg(test)]
impl StubTransport {
    pub fn ok(mut self, url_part: &str, body: &str) -> StubTransport {
        self.routes.push((
            url_part.to_string(),
            Ok(FetchResponse {
                status: 200,
                body: body.to_string(),
            }),
        ));
        self
    }

    pub fn fail(mut self, url_part: &str, error: FetchError) -> StubTransport {
        self.routes.push((url_part.to_string(), Err(error)));
        self
    }

    fn get(&self, url: &str) -> Result<FetchResponse, FetchError> {
        for (part, result) in &self.routes {
            if url.contains(part.as_str()) {
                return result.clone();
            }
        }
        Err(FetchError::Network(format!("no stub route for {url}")))
    }
}

// ---------------------------------------------------------------------------
// payload shapes, one tagged variant per source

#[derive(Debug, Default, Deserialize)]
pub struct ApiGeometry {
    #[serde(default)]
    pub coordinates: Vec<serde_json::Value>,
}

impl ApiGeometry {
    fn coordinate_strings(&self) -> Vec<String> {
        self.coordinates
            .iter()
            .filter_map(|coordinate| match coordinate {
                serde_json::Value::Number(number) => Some(number.to_string()),
                serde_json::Value::String(text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }
}

/// Official bus/tram stop document: a composed `title`, point geometry and
/// the next two estimated arrivals per destination.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiTransitStop {
    pub title: String,
    #[serde(default)]
    pub last_updated: Option<String>,
    #[serde(default)]
    pub geometry: ApiGeometry,
    #[serde(default)]
    pub destinos: Vec<ApiDestination>,
}

#[derive(Debug, Deserialize)]
pub struct ApiDestination {
    pub linea: String,
    pub destino: String,
    #[serde(default)]
    pub primero: Option<String>,
    #[serde(default)]
    pub segundo: Option<String>,
}

/// Official bike-share station document.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiBiziStation {
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub estado: Option<String>,
    #[serde(default)]
    pub bicis_disponibles: Option<i64>,
    #[serde(default)]
    pub anclajes_disponibles: Option<i64>,
    #[serde(default)]
    pub geometry: ApiGeometry,
    #[serde(default)]
    pub last_updated: Option<String>,
    #[serde(default)]
    pub about: Option<String>,
}

impl ApiBiziStation {
    pub fn coordinate_strings(&self) -> Vec<String> {
        self.geometry.coordinate_strings()
    }

    pub fn normalized_street(&self) -> String {
        capitalize_each_word(
            &fix_encoding(&titles::street_from_bizi_title(&self.title)),
            LOWER_REST,
        )
    }
}

/// Paged bike-share catalog response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiBiziList {
    pub total_count: u64,
    #[serde(default)]
    pub result: Vec<ApiBiziStation>,
}

/// The normalized fresh portion of a station resolution, common to every
/// source. `malformed` records a defect in a single field group (the street
/// extraction) that a backup value may mask.
#[derive(Debug, Default)]
pub struct FreshStation {
    pub street: Option<String>,
    pub coordinates: Vec<String>,
    pub times: Vec<ArrivalTime>,
    pub last_updated: Option<String>,
    pub malformed: Option<String>,
}

/// strips the stray edge punctuation the upstream feeds leave behind
fn strip_edge_punct(text: &str) -> &str {
    text.trim()
        .trim_matches(|character: char| character == ',' || character == '.')
        .trim()
}

/// `"3 minutos."` becomes `"3 min."`; anything else is a status phrase and
/// is repaired and capitalized as free text.
pub fn normalize_time_text(raw: &str) -> String {
    let cleaned = strip_edge_punct(raw);
    if cleaned.contains("minutos") {
        format!("{} min.", strip_edge_punct(&cleaned.replace(" minutos", "")))
    } else {
        capitalize(&fix_encoding(cleaned), LOWER_REST)
    }
}

/// Destinations are " - "-joined route endpoints; each side is normalized
/// independently so the separator survives the casing pass.
pub fn normalize_destination(raw: &str) -> String {
    strip_edge_punct(raw)
        .split(" - ")
        .map(|part| capitalize_each_word(&fix_encoding(part.trim()), LOWER_REST))
        .join(" - ")
}

/// Extraction for the official JSON stop document (bus, and per-direction tram).
pub fn extract_api_transit_stop(body: &str) -> Result<FreshStation, String> {
    let payload: ApiTransitStop = serde_json::from_str(body)
        .map_err(|err| format!("official stop payload did not parse: {err}"))?;

    let (street, malformed) = match titles::street_from_bus_title(&payload.title) {
        Ok(raw) => (
            Some(capitalize_each_word(&fix_encoding(&raw), LOWER_REST)),
            None,
        ),
        Err(err) => (None, Some(err.to_string())),
    };

    let mut times = Vec::new();
    for destination in &payload.destinos {
        for slot in [&destination.primero, &destination.segundo] {
            let Some(raw_time) = slot else { continue };
            times.push(ArrivalTime {
                line: capitalize(&fix_encoding(&destination.linea), LOWER_REST),
                destination: normalize_destination(&destination.destino),
                time: normalize_time_text(raw_time),
            });
        }
    }

    Ok(FreshStation {
        street,
        coordinates: payload.geometry.coordinate_strings(),
        times,
        last_updated: payload.last_updated,
        malformed,
    })
}

lazy_static! {
    static ref TABLE: Selector = Selector::parse("table").unwrap();
    static ref ROW: Selector = Selector::parse("tr").unwrap();
    static ref DIGITAL_CELL: Selector = Selector::parse("td.digital").unwrap();
    static ref CATALOG_OPTION: Selector =
        Selector::parse("select#linea-lineas-horarios option").unwrap();
    static ref PLACEMARK_NAME: Selector = Selector::parse("placemark name").unwrap();
}

fn element_text(element: &scraper::ElementRef) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// Extraction for the operator's scraped arrivals page: the second table on
/// the page, one row per arrival, `td.digital` cells for line, destination
/// and estimate. The scrape carries no street or geometry, so those groups
/// stay empty and the merge fills them from backup.
pub fn extract_web_transit_stop(body: &str) -> Result<FreshStation, String> {
    let document = Html::parse_document(body);
    let mut times = Vec::new();

    if let Some(table) = document.select(&TABLE).nth(1) {
        for row in table.select(&ROW) {
            let cells = row.select(&DIGITAL_CELL).collect_vec();
            if cells.len() < 3 {
                continue;
            }
            let line = capitalize(&fix_encoding(&element_text(&cells[0])), LOWER_REST);
            if line.is_empty() {
                continue;
            }
            times.push(ArrivalTime {
                line,
                destination: normalize_destination(&element_text(&cells[1])),
                time: normalize_time_text(&element_text(&cells[2])),
            });
        }
    }

    Ok(FreshStation {
        times,
        ..FreshStation::default()
    })
}

#[derive(Clone, Debug)]
pub struct CatalogLine {
    pub value: String,
    pub label: String,
}

/// Extracts the live line catalog from the operator page's line selector.
/// Option labels look like `"21 - Paraíso - San José"`; the leading number
/// duplicates the option value and is dropped.
pub fn extract_lines_catalog(html: &str) -> Vec<CatalogLine> {
    let document = Html::parse_document(html);
    let mut lines = Vec::new();
    for option in document.select(&CATALOG_OPTION) {
        let Some(value) = option.value().attr("value") else {
            continue;
        };
        if value.is_empty() || value == "default" {
            continue;
        }
        let label = element_text(&option)
            .split(" - ")
            .skip(1)
            .join(" - ");
        lines.push(CatalogLine {
            value: value.to_string(),
            label,
        });
    }
    lines
}

/// Pulls `"post number - street"` stubs out of a line geometry document.
/// The lenient HTML parser is deliberate: the upstream KML is frequently
/// truncated mid-element and a strict XML reader would reject the usable
/// prefix.
pub fn extract_kml_station_stubs(kml: &str) -> Vec<(String, String)> {
    let document = Html::parse_document(kml);
    document
        .select(&PLACEMARK_NAME)
        .filter_map(|name| titles::station_stub_from_placemark(&element_text(&name)))
        .collect()
}
