// Copyright: Zgzpls Contributors
// Zaragoza public transport and cinema aggregation service
// Removal of the attribution is not allowed, as covered under the AGPL license

use actix_web::http::StatusCode;
use actix_web::{App, HttpResponse, HttpServer, Responder, web};
use log::info;
use serde::Deserialize;
use std::time::Duration;
use zgzpls::backup_store::{BackupStore, HttpBackupStore};
use zgzpls::errors::ServiceError;
use zgzpls::models::{
    Line, LinesResponse, Source, Station, StationType, StationsResponse,
};
use zgzpls::reconcile::{self, ResolveContext};
use zgzpls::ttl_cache::{DEFAULT_TTL, TtlCache};
use zgzpls::upstream::{CatalogLine, Transport, make_reqwest_client};
use zgzpls::{bizi, cinema, lines, tram};

struct AppData {
    transport: Transport,
    backup: BackupStore,
    station_cache: TtlCache<Station>,
    stations_cache: TtlCache<StationsResponse>,
    line_cache: TtlCache<Line>,
    lines_cache: TtlCache<LinesResponse>,
    catalog_cache: TtlCache<Vec<CatalogLine>>,
}

impl AppData {
    fn resolve_ctx(&self) -> ResolveContext<'_> {
        ResolveContext {
            transport: &self.transport,
            backup: &self.backup,
            station_cache: &self.station_cache,
        }
    }
}

fn error_response(err: &ServiceError) -> HttpResponse {
    let body = err.to_response();
    let status =
        StatusCode::from_u16(body.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    HttpResponse::build(status).json(body)
}

fn respond<T: serde::Serialize>(result: Result<T, ServiceError>) -> HttpResponse {
    match result {
        Ok(value) => HttpResponse::Ok().json(value),
        Err(err) => error_response(&err),
    }
}

#[derive(Deserialize)]
struct SourceQuery {
    source: Option<String>,
}

fn parse_source(query: &SourceQuery, id: &str) -> Result<Option<Source>, ServiceError> {
    match query.source.as_deref() {
        None => Ok(None),
        Some("api") => Ok(Some(Source::Api)),
        Some("web") => Ok(Some(Source::Web)),
        Some("backup") => Ok(Some(Source::Backup)),
        // an unknown source can never resolve the resource
        Some(_) => Err(ServiceError::NotFound(id.to_string())),
    }
}

async fn index() -> impl Responder {
    HttpResponse::Ok()
        .insert_header(("Content-Type", "text/plain"))
        .body("Hello World from the Zgzpls Cierzo HTTP endpoint!")
}

async fn robots() -> impl Responder {
    let banned_bots = vec![
        "CCBot",
        "ChatGPT-User",
        "GPTBot",
        "Google-Extended",
        "anthropic-ai",
        "ClaudeBot",
        "Omgilibot",
        "Omgili",
        "FacebookBot",
        "Diffbot",
        "Bytespider",
        "ImagesiftBot",
        "cohere-ai",
    ];

    let robots_banned_bots = banned_bots
        .into_iter()
        .map(|bot| format!("User-agent: {}\nDisallow: /", bot))
        .collect::<Vec<String>>()
        .join("\n\n");

    HttpResponse::Ok()
        .insert_header(("Content-Type", "text/plain"))
        .insert_header(("Cache-Control", "no-cache"))
        .body(robots_banned_bots)
}

// bus

#[actix_web::get("/bus/stations/update")]
async fn bus_stations_update(data: web::Data<AppData>) -> impl Responder {
    respond(
        lines::bus_stations_update(
            &data.transport,
            &data.backup,
            &data.catalog_cache,
            &data.stations_cache,
        )
        .await,
    )
}

#[actix_web::get("/bus/stations")]
async fn bus_stations(data: web::Data<AppData>) -> impl Responder {
    respond(
        reconcile::stations_map(&data.backup, &data.stations_cache, StationType::Bus).await,
    )
}

#[actix_web::get("/bus/stations/{id}")]
async fn bus_station(
    path: web::Path<String>,
    query: web::Query<SourceQuery>,
    data: web::Data<AppData>,
) -> impl Responder {
    let id = path.into_inner();
    let source = match parse_source(&query, &id) {
        Ok(source) => source,
        Err(err) => return error_response(&err),
    };
    respond(reconcile::resolve_bus_station(&data.resolve_ctx(), &id, source).await)
}

#[actix_web::get("/bus/lines/update")]
async fn bus_lines_update(data: web::Data<AppData>) -> impl Responder {
    respond(
        lines::lines_update(
            &data.transport,
            &data.backup,
            &data.catalog_cache,
            &data.lines_cache,
        )
        .await,
    )
}

#[actix_web::get("/bus/lines")]
async fn bus_lines(data: web::Data<AppData>) -> impl Responder {
    respond(lines::lines_map(&data.backup, &data.lines_cache).await)
}

#[actix_web::get("/bus/lines/{id}")]
async fn bus_line(path: web::Path<String>, data: web::Data<AppData>) -> impl Responder {
    let id = path.into_inner();
    respond(lines::line_by_id(&data.backup, &data.line_cache, &id).await)
}

// tram

#[actix_web::get("/tram/stations/update")]
async fn tram_stations_update() -> impl Responder {
    // no bulk tram source exists yet
    error_response(&ServiceError::NotImplemented(
        "bulk tram station refresh".to_string(),
    ))
}

#[actix_web::get("/tram/stations")]
async fn tram_stations(data: web::Data<AppData>) -> impl Responder {
    respond(
        reconcile::stations_map(&data.backup, &data.stations_cache, StationType::Tram).await,
    )
}

#[actix_web::get("/tram/stations/{id}")]
async fn tram_station(
    path: web::Path<String>,
    query: web::Query<SourceQuery>,
    data: web::Data<AppData>,
) -> impl Responder {
    let id = path.into_inner();
    let source = match parse_source(&query, &id) {
        Ok(source) => source,
        Err(err) => return error_response(&err),
    };
    respond(tram::resolve_tram_station(&data.resolve_ctx(), &id, source).await)
}

// bizi

#[actix_web::get("/bizi/stations/update")]
async fn bizi_stations_update(data: web::Data<AppData>) -> impl Responder {
    respond(
        bizi::bizi_stations_update(&data.transport, &data.backup, &data.stations_cache).await,
    )
}

#[actix_web::get("/bizi/stations")]
async fn bizi_stations(data: web::Data<AppData>) -> impl Responder {
    respond(
        reconcile::stations_map(&data.backup, &data.stations_cache, StationType::Bizi).await,
    )
}

#[actix_web::get("/bizi/stations/{id}")]
async fn bizi_station(
    path: web::Path<String>,
    query: web::Query<SourceQuery>,
    data: web::Data<AppData>,
) -> impl Responder {
    let id = path.into_inner();
    let source = match parse_source(&query, &id) {
        Ok(source) => source,
        Err(err) => return error_response(&err),
    };
    respond(bizi::resolve_bizi_station(&data.resolve_ctx(), &id, source).await)
}

// cinemas

#[actix_web::get("/cinemas")]
async fn cinemas() -> impl Responder {
    HttpResponse::Ok().json(cinema::cinemas())
}

#[actix_web::get("/cinemas/{id}")]
async fn cinema_by_id(path: web::Path<String>) -> impl Responder {
    respond(cinema::cinema_by_id(&path.into_inner()))
}

#[actix_web::get("/cinemas/{id}/sessions")]
async fn cinema_sessions(path: web::Path<String>) -> impl Responder {
    respond(cinema::cinema_sessions(&path.into_inner()))
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();

    let bind_addr = env_or("ZGZPLS_BIND_ADDR", "0.0.0.0:3001");
    let backup_url = env_or("ZGZPLS_BACKUP_URL", "https://zgzpls.firebaseio.com");
    let upstream_timeout: u64 = env_or("ZGZPLS_UPSTREAM_TIMEOUT_SECS", "10")
        .parse()
        .unwrap_or(10);

    let client = make_reqwest_client(Duration::from_secs(upstream_timeout));
    let data = web::Data::new(AppData {
        transport: Transport::Http(client.clone()),
        backup: BackupStore::Http(HttpBackupStore::new(backup_url, client)),
        station_cache: TtlCache::new(DEFAULT_TTL),
        stations_cache: TtlCache::new(DEFAULT_TTL),
        line_cache: TtlCache::new(DEFAULT_TTL),
        lines_cache: TtlCache::new(DEFAULT_TTL),
        catalog_cache: TtlCache::new(DEFAULT_TTL),
    });

    info!("cierzo listening on {}", bind_addr);

    HttpServer::new(move || {
        App::new()
            .wrap(actix_cors::Cors::permissive())
            .app_data(data.clone())
            .route("/", web::get().to(index))
            .route("/robots.txt", web::get().to(robots))
            // fixed segments must register before the {id} matchers
            .service(bus_stations_update)
            .service(bus_stations)
            .service(bus_lines_update)
            .service(bus_lines)
            .service(bus_line)
            .service(bus_station)
            .service(tram_stations_update)
            .service(tram_stations)
            .service(tram_station)
            .service(bizi_stations_update)
            .service(bizi_stations)
            .service(bizi_station)
            .service(cinemas)
            .service(cinema_by_id)
            .service(cinema_sessions)
    })
    .bind(bind_addr)?
    .run()
    .await
}
