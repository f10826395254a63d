use crate::codec;
use crate::config::COMMENT_LOOKBEHIND_CHARS;
use anyhow::{Context, Result};
use rustc_hash::FxHashMap;
use std::path::Path;
use tracing::info;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Article vs category lookup key for the coordinate contract; categories
/// never carry coordinates.
pub enum WikiEntity<'a> {
    Article(&'a str),
    Category(&'a str),
}

/// title -> (lat, lon) for articles whose dump page carried a displayed,
/// Earth-bound `coord` template.
#[derive(Default)]
pub struct CoordinateTable {
    map: FxHashMap<String, (f64, f64)>,
}

impl CoordinateTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, title: String, lat: f64, lon: f64) {
        self.map.insert(title, (lat, lon));
    }

    pub fn get(&self, title: &str) -> Option<(f64, f64)> {
        self.map.get(title).copied()
    }

    pub fn coordinates(&self, entity: &WikiEntity) -> Option<(f64, f64)> {
        match entity {
            WikiEntity::Article(title) => self.get(title),
            WikiEntity::Category(_) => None,
        }
    }

    /// Direct hit, else one redirect hop.
    pub fn resolve(
        &self,
        title: &str,
        redirects: &FxHashMap<String, String>,
    ) -> Option<(&str, (f64, f64))> {
        if let Some((key, coords)) = self.map.get_key_value(title) {
            return Some((key.as_str(), *coords));
        }
        let target = redirects.get(title)?;
        let (key, coords) = self.map.get_key_value(target)?;
        Some((key.as_str(), *coords))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, (f64, f64))> {
        self.map.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Layout: `N:int`; `N x (title, lat:double, lon:double)`, title order.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut titles: Vec<&String> = self.map.keys().collect();
        titles.sort_unstable();
        codec::write_atomic(path, |w| {
            codec::write_u32(w, titles.len() as u32)?;
            for title in &titles {
                let (lat, lon) = self.map[*title];
                codec::write_str(w, title)?;
                codec::write_f64(w, lat)?;
                codec::write_f64(w, lon)?;
            }
            Ok(())
        })
        .with_context(|| format!("Failed to save coordinates: {:?}", path))?;
        info!(entries = titles.len(), path = ?path, "Coordinates saved");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let mut r = codec::open_reader(path)?;
        let n = codec::checked_len(codec::read_u32(&mut r)?, 24)?;
        let mut map = FxHashMap::with_capacity_and_hasher(n, Default::default());
        for _ in 0..n {
            let title = codec::read_str(&mut r)?;
            let lat = codec::read_f64(&mut r)?;
            let lon = codec::read_f64(&mut r)?;
            map.insert(title, (lat, lon));
        }
        Ok(CoordinateTable { map })
    }
}

/// Great-circle distance in kilometers.
pub fn haversine_km(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (lat1, lon1) = (a.0.to_radians(), a.1.to_radians());
    let (lat2, lon2) = (b.0.to_radians(), b.1.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

/// First well-formed, displayed, Earth-bound `{{coord ...}}` template in the
/// raw (still XML-escaped) record body. Scans bytes so offsets stay valid
/// for non-ASCII text.
pub fn parse_coordinates(body: &str) -> Option<(f64, f64)> {
    let bytes = body.as_bytes();
    let mut search_from = 0;
    while let Some(rel) = memchr::memmem::find(&bytes[search_from..], b"{{") {
        let start = search_from + rel;
        search_from = start + 2;
        if start + 7 > bytes.len() || !bytes[start + 2..start + 7].eq_ignore_ascii_case(b"coord")
        {
            continue;
        }

        let Some(close_rel) = memchr::memmem::find(&bytes[start..], b"}}") else {
            return None;
        };
        let block = &body[start + 2..start + close_rel];

        if is_commented(bytes, start) {
            continue;
        }
        if let Some(candidate) = parse_block(block) {
            return Some(candidate);
        }
    }
    None
}

/// An opening HTML comment just before the template voids it.
fn is_commented(bytes: &[u8], template_start: usize) -> bool {
    let window_start = template_start.saturating_sub(COMMENT_LOOKBEHIND_CHARS + "&lt;!--".len());
    memchr::memmem::find(&bytes[window_start..template_start], b"&lt;!--").is_some()
}

fn parse_block(block: &str) -> Option<(f64, f64)> {
    let lower = block.to_lowercase();
    if !has_displayed_title(&lower) {
        return None;
    }
    if let Some(globe) = named_value(&lower, "globe=") {
        if !globe.starts_with("earth") {
            return None;
        }
    }

    // Positional tokens end at the first named parameter.
    let tokens: Vec<&str> = block
        .split('|')
        .skip(1)
        .map(str::trim)
        .take_while(|part| !part.contains('='))
        .filter(|part| !part.is_empty())
        .collect();

    let has_markers = tokens
        .iter()
        .any(|t| matches!(t.to_ascii_uppercase().as_str(), "N" | "S" | "E" | "W"));
    let (lat, lon) = if has_markers {
        parse_dms(&tokens)?
    } else {
        parse_decimal_pair(&tokens)?
    };

    (lat.is_finite()
        && lon.is_finite()
        && (-90.0..=90.0).contains(&lat)
        && (-180.0..=180.0).contains(&lon))
    .then_some((lat, lon))
}

fn has_displayed_title(lower_block: &str) -> bool {
    let Some(display) = named_value(lower_block, "display=") else {
        return false;
    };
    display
        .split(|c| matches!(c, ',' | ';' | ':' | '.'))
        .take(4)
        .map(str::trim)
        .any(|token| token == "title" || token == "it")
}

fn named_value<'a>(lower_block: &'a str, key: &str) -> Option<&'a str> {
    let pos = lower_block.find(key)? + key.len();
    let rest = &lower_block[pos..];
    Some(rest[..rest.find('|').unwrap_or(rest.len())].trim())
}

/// Degree/minute/second form: 1-3 numeric parts, a N/S marker, 1-3 numeric
/// parts, an E/W marker.
fn parse_dms(tokens: &[&str]) -> Option<(f64, f64)> {
    let mut parts: Vec<f64> = Vec::with_capacity(3);
    let mut lat: Option<f64> = None;
    for token in tokens {
        match token.to_ascii_uppercase().as_str() {
            "N" | "S" if lat.is_none() => {
                let sign = if token.eq_ignore_ascii_case("S") { -1.0 } else { 1.0 };
                lat = Some(sign * dms_degrees(&parts)?);
                parts.clear();
            }
            "E" | "W" => {
                let lat = lat?;
                let sign = if token.eq_ignore_ascii_case("W") { -1.0 } else { 1.0 };
                return Some((lat, sign * dms_degrees(&parts)?));
            }
            _ => {
                if parts.len() == 3 {
                    return None;
                }
                parts.push(token.parse().ok()?);
            }
        }
    }
    None
}

fn dms_degrees(parts: &[f64]) -> Option<f64> {
    match parts {
        [d] => Some(*d),
        [d, m] => Some(d + m / 60.0),
        [d, m, s] => Some(d + m / 60.0 + s / 3600.0),
        _ => None,
    }
}

fn parse_decimal_pair(tokens: &[&str]) -> Option<(f64, f64)> {
    match tokens {
        [lat, lon, ..] => Some((lat.parse().ok()?, lon.parse().ok()?)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn dms_form_converts_to_decimal_degrees() {
        let body = "{{coord|38|53|14.31|N|77|1|19.98|W|display=inline,title}}";
        let (lat, lon) = parse_coordinates(body).unwrap();
        assert!((lat - (38.0 + 53.0 / 60.0 + 14.31 / 3600.0)).abs() < 1e-9);
        assert!((lon + (77.0 + 1.0 / 60.0 + 19.98 / 3600.0)).abs() < 1e-9);
    }

    #[test]
    fn decimal_form_with_hemisphere_markers() {
        let body = "{{Coord|44.532447|N|10.864137|E|display=title}}";
        let (lat, lon) = parse_coordinates(body).unwrap();
        assert!((lat - 44.532447).abs() < 1e-9);
        assert!((lon - 10.864137).abs() < 1e-9);
    }

    #[test]
    fn signed_decimal_pair() {
        let body = "{{coord|-33.865|151.2094|display=title}}";
        let (lat, lon) = parse_coordinates(body).unwrap();
        assert!((lat + 33.865).abs() < 1e-9);
        assert!((lon - 151.2094).abs() < 1e-9);
    }

    #[test]
    fn commented_template_rejected() {
        let body = "text &lt;!-- {{coord|10|0|N|20|0|E|display=title}} --&gt; more";
        assert!(parse_coordinates(body).is_none());
    }

    #[test]
    fn inline_only_display_rejected() {
        let body = "{{coord|10|0|N|20|0|E|display=inline}}";
        assert!(parse_coordinates(body).is_none());
    }

    #[test]
    fn missing_display_rejected() {
        let body = "{{coord|10|0|N|20|0|E}}";
        assert!(parse_coordinates(body).is_none());
    }

    #[test]
    fn non_earth_globe_rejected() {
        let body = "{{coord|10|0|N|20|0|E|globe=mars|display=title}}";
        assert!(parse_coordinates(body).is_none());
    }

    #[test]
    fn first_well_formed_candidate_wins() {
        let body = "{{coord|garbage|display=title}} {{coord|10|20|display=title}} {{coord|30|40|display=title}}";
        let (lat, lon) = parse_coordinates(body).unwrap();
        assert_eq!((lat, lon), (10.0, 20.0));
    }

    #[test]
    fn commented_candidate_does_not_block_later_one() {
        let body =
            "&lt;!-- {{coord|1|2|display=title}} --&gt; {{coord|10|20|display=title}}";
        assert_eq!(parse_coordinates(body), Some((10.0, 20.0)));
    }

    #[test]
    fn out_of_range_rejected() {
        assert!(parse_coordinates("{{coord|91|0|display=title}}").is_none());
        assert!(parse_coordinates("{{coord|45|181|display=title}}").is_none());
    }

    #[test]
    fn display_it_accepted() {
        let body = "{{coord|44.5|11.3|display=it}}";
        assert_eq!(parse_coordinates(body), Some((44.5, 11.3)));
    }

    #[test]
    fn haversine_known_distance() {
        let paris = (48.8566, 2.3522);
        let london = (51.5074, -0.1278);
        let d = haversine_km(paris, london);
        assert!((d - 343.5).abs() < 5.0);
        assert_eq!(haversine_km(paris, paris), 0.0);
    }

    #[test]
    fn table_resolve_follows_redirect() {
        let mut table = CoordinateTable::new();
        table.insert("Paris".to_string(), 48.8566, 2.3522);

        let mut redirects = FxHashMap::default();
        redirects.insert("City_of_Light".to_string(), "Paris".to_string());

        assert!(table.resolve("Paris", &redirects).is_some());
        let (key, _) = table.resolve("City_of_Light", &redirects).unwrap();
        assert_eq!(key, "Paris");
        assert!(table.resolve("Atlantis", &redirects).is_none());
    }

    #[test]
    fn entity_lookup_contract() {
        let mut table = CoordinateTable::new();
        table.insert("Paris".to_string(), 48.8566, 2.3522);
        assert!(table.coordinates(&WikiEntity::Article("Paris")).is_some());
        assert!(table.coordinates(&WikiEntity::Category("Paris")).is_none());
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("coordinates.bin");

        let mut table = CoordinateTable::new();
        table.insert("Paris".to_string(), 48.8566, 2.3522);
        table.insert("Berlin".to_string(), 52.52, 13.405);
        table.save(&path).unwrap();

        let loaded = CoordinateTable::load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.get("Berlin"), Some((52.52, 13.405)));
    }
}
