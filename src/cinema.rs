use crate::errors::ServiceError;
use crate::models::{Cinema, CinemasResponse};
use lazy_static::lazy_static;

fn cinema(
    id: &str,
    name: &str,
    address: &str,
    source: &str,
) -> (String, Cinema) {
    (
        id.to_string(),
        Cinema {
            id: id.to_string(),
            name: name.to_string(),
            address: Some(address.to_string()),
            location: Some("Zaragoza".to_string()),
            source: Some(source.to_string()),
        },
    )
}

lazy_static! {
    static ref CATALOG: CinemasResponse = CinemasResponse::from([
        cinema(
            "palafox",
            "Cines Palafox",
            "Paseo de la Independencia, 12, 50004 Zaragoza",
            "https://www.cinespalafox.com/cartelera-cines-palafox.html",
        ),
        cinema(
            "aragonia",
            "Aragonia",
            "Avenida de Juan Pablo II, 43, 50009 Zaragoza",
            "https://www.cinespalafox.com/cartelera-cines-aragonia.html",
        ),
        cinema(
            "cervantes",
            "Sala Cervantes",
            "Calle Marqués de Casa Jiménez, 2, 50004 Zaragoza",
            "https://www.cinespalafox.com/cartelera-cine-cervantes.html",
        ),
        cinema(
            "grancasa",
            "Cinesa Grancasa",
            "Calle de María Zambrano, 35, 50018 Zaragoza",
            "https://www.cinesa.es/Cines/Horarios/611/50011",
        ),
        cinema(
            "venecia",
            "Cinesa Puerto Venecia 3D",
            "Tr.ª Jardines Reales, 7, 50021 Zaragoza",
            "https://www.cinesa.es/Cines/Horarios/1100/50011",
        ),
    ]);
}

pub fn cinemas() -> CinemasResponse {
    CATALOG.clone()
}

pub fn cinema_by_id(id: &str) -> Result<Cinema, ServiceError> {
    CATALOG
        .get(id)
        .cloned()
        .ok_or_else(|| ServiceError::NotFound(id.to_string()))
}

pub fn cinema_sessions(id: &str) -> Result<(), ServiceError> {
    // listings scraping lives outside this service
    Err(ServiceError::NotImplemented(format!(
        "get sessions for cinema '{id}'"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_lookup_by_id() {
        let cinema = cinema_by_id("palafox").unwrap();
        assert_eq!(cinema.name, "Cines Palafox");
        assert_eq!(cinema.location.as_deref(), Some("Zaragoza"));
    }

    #[test]
    fn unknown_cinema_is_not_found() {
        assert!(matches!(
            cinema_by_id("monumental").unwrap_err(),
            ServiceError::NotFound(_)
        ));
    }

    #[test]
    fn sessions_are_not_implemented() {
        let err = cinema_sessions("palafox").unwrap_err();
        assert_eq!(err.status_code(), 501);
    }
}
