//! Region boundaries: geocoding, parsing and on-disk caching.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use geo::{Geometry, MultiPolygon};
use geojson::GeoJson;
use std::path::Path;
use tracing::{debug, info};

use crate::fetch::{HttpClient, fetch_bytes};

/// Resolves a free-form region name into its boundary as GeoJSON text.
#[async_trait]
pub trait BoundaryApi: Send + Sync {
    async fn fetch_boundary(&self, region: &str) -> Result<String>;
}

/// [`BoundaryApi`] backed by a Nominatim search endpoint.
///
/// The public instance allows one request per second; the pipeline issues
/// one request per city and caches the result.
pub struct NominatimClient<C> {
    client: C,
    base_url: String,
}

impl<C: HttpClient> NominatimClient<C> {
    pub fn new(client: C, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn search_url(&self, region: &str) -> Result<reqwest::Url> {
        let url = reqwest::Url::parse_with_params(
            &self.base_url,
            &[
                ("q", region),
                ("format", "geojson"),
                ("polygon_geojson", "1"),
                ("limit", "1"),
            ],
        )?;
        Ok(url)
    }
}

#[async_trait]
impl<C: HttpClient> BoundaryApi for NominatimClient<C> {
    async fn fetch_boundary(&self, region: &str) -> Result<String> {
        let url = self.search_url(region)?;
        debug!(%url, "Querying Nominatim");

        let bytes = fetch_bytes(&self.client, url.as_str())
            .await
            .with_context(|| format!("boundary request for {region:?} failed"))?;
        Ok(String::from_utf8(bytes)?)
    }
}

/// Extracts the first polygonal geometry from a GeoJSON document.
pub fn parse_boundary(text: &str) -> Result<MultiPolygon<f64>> {
    let geojson: GeoJson = text.parse()?;

    let geometries = match geojson {
        GeoJson::Geometry(g) => vec![g],
        GeoJson::Feature(f) => f.geometry.into_iter().collect(),
        GeoJson::FeatureCollection(fc) => {
            fc.features.into_iter().filter_map(|f| f.geometry).collect()
        }
    };

    for geometry in geometries {
        match Geometry::<f64>::try_from(geometry)? {
            Geometry::MultiPolygon(mp) => return Ok(mp),
            Geometry::Polygon(p) => return Ok(MultiPolygon(vec![p])),
            _ => continue,
        }
    }

    bail!("GeoJSON contains no Polygon or MultiPolygon")
}

/// Reads the boundary from `cache` when present, otherwise geocodes `region`
/// and writes the response to `cache`.
#[tracing::instrument(skip(api, cache))]
pub async fn load_or_fetch_boundary<A: BoundaryApi + ?Sized>(
    api: &A,
    region: &str,
    cache: Option<&Path>,
) -> Result<MultiPolygon<f64>> {
    if let Some(path) = cache.filter(|p| p.exists()) {
        debug!(path = %path.display(), "Using cached boundary");
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read boundary {}", path.display()))?;
        return parse_boundary(&text).with_context(|| format!("in {}", path.display()));
    }

    info!("Fetching region boundary");
    let text = api.fetch_boundary(region).await?;
    let boundary =
        parse_boundary(&text).with_context(|| format!("no usable boundary for {region:?}"))?;

    if let Some(path) = cache {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, &text)
            .with_context(|| format!("failed to cache boundary {}", path.display()))?;
    }

    Ok(boundary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SQUARE: &str = r#"{"type":"FeatureCollection","features":[{"type":"Feature",
        "properties":{"display_name":"Pisa"},
        "geometry":{"type":"Polygon","coordinates":[[[10.3,43.6],[10.5,43.6],[10.5,43.8],[10.3,43.8],[10.3,43.6]]]}}]}"#;

    struct CountingApi(AtomicUsize);

    #[async_trait]
    impl BoundaryApi for CountingApi {
        async fn fetch_boundary(&self, _region: &str) -> Result<String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(SQUARE.to_string())
        }
    }

    #[test]
    fn test_parse_feature_collection_polygon() {
        let mp = parse_boundary(SQUARE).unwrap();
        assert_eq!(mp.0.len(), 1);
        assert_eq!(mp.0[0].exterior().0.len(), 5);
    }

    #[test]
    fn test_parse_bare_multipolygon() {
        let text = r#"{"type":"MultiPolygon","coordinates":[
            [[[0,0],[1,0],[1,1],[0,0]]],
            [[[2,2],[3,2],[3,3],[2,2]]]]}"#;
        assert_eq!(parse_boundary(text).unwrap().0.len(), 2);
    }

    #[test]
    fn test_parse_rejects_point_only() {
        let text = r#"{"type":"Feature","properties":{},"geometry":{"type":"Point","coordinates":[10.4,43.7]}}"#;
        assert!(parse_boundary(text).is_err());
    }

    #[test]
    fn test_parse_rejects_empty_collection() {
        assert!(parse_boundary(r#"{"type":"FeatureCollection","features":[]}"#).is_err());
    }

    #[test]
    fn test_search_url_encodes_region() {
        let client = NominatimClient::new(
            crate::fetch::BasicClient::new().unwrap(),
            "https://nominatim.example.org/search",
        );
        let url = client.search_url("Pisa, Italy").unwrap();
        let query = url.query().unwrap();

        assert!(query.contains("q=Pisa%2C+Italy"));
        assert!(query.contains("polygon_geojson=1"));
        assert!(query.contains("format=geojson"));
    }

    #[tokio::test]
    async fn test_boundary_cached_after_first_fetch() {
        let path = std::env::temp_dir().join("weekly_emissions_test_boundary_cache.geojson");
        let _ = std::fs::remove_file(&path);

        let api = CountingApi(AtomicUsize::new(0));
        let first = load_or_fetch_boundary(&api, "Pisa, Italy", Some(&path)).await.unwrap();
        let second = load_or_fetch_boundary(&api, "Pisa, Italy", Some(&path)).await.unwrap();

        assert_eq!(api.0.load(Ordering::SeqCst), 1);
        assert_eq!(first, second);

        std::fs::remove_file(&path).unwrap();
    }
}
