//! Coordinate reference systems understood by the adapters.
//!
//! Only geographic WGS84 and spherical Web Mercator are supported; anything
//! else is rejected when an adapter is configured.

use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use geo::Coord;

const EARTH_RADIUS_M: f64 = 6_378_137.0;
const MAX_MERCATOR_LAT: f64 = 85.051_128_779_806_59;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Crs {
    /// EPSG:4326, longitude/latitude in degrees.
    #[default]
    Wgs84,
    /// EPSG:3857, meters.
    WebMercator,
}

impl Crs {
    pub fn epsg(self) -> u32 {
        match self {
            Crs::Wgs84 => 4326,
            Crs::WebMercator => 3857,
        }
    }

    /// Guesses the CRS from the WKT held in a shapefile `.prj` sidecar.
    pub fn from_prj(wkt: &str) -> Option<Self> {
        let upper = wkt.to_ascii_uppercase();
        if upper.contains("MERCATOR_AUXILIARY_SPHERE")
            || upper.contains("PSEUDO-MERCATOR")
            || upper.contains("PSEUDO_MERCATOR")
            || upper.contains("WEB_MERCATOR")
        {
            Some(Crs::WebMercator)
        } else if upper.starts_with("GEOGCS") && upper.contains("WGS") && upper.contains("84") {
            Some(Crs::Wgs84)
        } else {
            None
        }
    }

    /// Moves a coordinate from `self` into `target`.
    pub fn transform(self, target: Crs, coord: Coord<f64>) -> Result<Coord<f64>, String> {
        match (self, target) {
            (Crs::Wgs84, Crs::WebMercator) => to_mercator(coord),
            (Crs::WebMercator, Crs::Wgs84) => Ok(from_mercator(coord)),
            _ => Ok(coord),
        }
    }

    pub fn transform_all(
        self,
        target: Crs,
        coords: &[Coord<f64>],
    ) -> Result<Vec<Coord<f64>>, String> {
        coords.iter().map(|c| self.transform(target, *c)).collect()
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

impl FromStr for Crs {
    type Err = String;

    /// Accepts `EPSG:4326`, `epsg:3857`, bare codes, OGC URNs and the CRS84 alias.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let upper = trimmed.to_ascii_uppercase();
        if upper.ends_with("CRS84") {
            return Ok(Crs::Wgs84);
        }
        let code = upper
            .rsplit(|c: char| c == ':' || c == '/')
            .next()
            .unwrap_or_default();
        match code {
            "4326" => Ok(Crs::Wgs84),
            "3857" | "900913" | "102100" => Ok(Crs::WebMercator),
            _ => Err(format!("unsupported coordinate reference system `{trimmed}`")),
        }
    }
}

fn to_mercator(coord: Coord<f64>) -> Result<Coord<f64>, String> {
    if !(-180.0..=180.0).contains(&coord.x) || !(-90.0..=90.0).contains(&coord.y) {
        return Err(format!(
            "({}, {}) is outside the geographic coordinate range",
            coord.x, coord.y
        ));
    }
    let lat = coord.y.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT);
    let x = EARTH_RADIUS_M * coord.x.to_radians();
    let y = EARTH_RADIUS_M * (PI / 4.0 + lat.to_radians() / 2.0).tan().ln();
    Ok(Coord { x, y })
}

fn from_mercator(coord: Coord<f64>) -> Coord<f64> {
    let lon = (coord.x / EARTH_RADIUS_M).to_degrees();
    let lat = (2.0 * (coord.y / EARTH_RADIUS_M).exp().atan() - PI / 2.0).to_degrees();
    Coord { x: lon, y: lat }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_identifiers() {
        assert_eq!("EPSG:4326".parse::<Crs>().unwrap(), Crs::Wgs84);
        assert_eq!("epsg:3857".parse::<Crs>().unwrap(), Crs::WebMercator);
        assert_eq!(
            "urn:ogc:def:crs:OGC:1.3:CRS84".parse::<Crs>().unwrap(),
            Crs::Wgs84
        );
        assert_eq!(
            "urn:ogc:def:crs:EPSG::3857".parse::<Crs>().unwrap(),
            Crs::WebMercator
        );
        assert!("EPSG:27700".parse::<Crs>().is_err());
    }

    #[test]
    fn test_display_round_trips() {
        assert_eq!(Crs::WebMercator.to_string(), "EPSG:3857");
        assert_eq!(Crs::Wgs84.to_string().parse::<Crs>().unwrap(), Crs::Wgs84);
    }

    #[test]
    fn test_mercator_round_trip() {
        let tokyo = Coord { x: 139.6917, y: 35.6895 };
        let projected = Crs::Wgs84.transform(Crs::WebMercator, tokyo).unwrap();
        assert!((projected.x - 15_550_408.9).abs() < 1.0);
        let back = Crs::WebMercator.transform(Crs::Wgs84, projected).unwrap();
        assert!((back.x - tokyo.x).abs() < 1e-9);
        assert!((back.y - tokyo.y).abs() < 1e-9);
    }

    #[test]
    fn test_out_of_range_geographic_rejected() {
        let bad = Coord { x: 500_000.0, y: 4_000_000.0 };
        assert!(Crs::Wgs84.transform(Crs::WebMercator, bad).is_err());
    }

    #[test]
    fn test_prj_detection() {
        let wgs = concat!(
            r#"GEOGCS["GCS_WGS_1984","#,
            r#"DATUM["D_WGS_1984",SPHEROID["WGS_1984",6378137,298.257223563]]]"#
        );
        let merc = r#"PROJCS["WGS_1984_Web_Mercator_Auxiliary_Sphere",GEOGCS["GCS_WGS_1984"]]"#;
        assert_eq!(Crs::from_prj(wgs), Some(Crs::Wgs84));
        assert_eq!(Crs::from_prj(merc), Some(Crs::WebMercator));
        assert_eq!(Crs::from_prj(r#"PROJCS["OSGB 1936 / British National Grid"]"#), None);
    }
}
