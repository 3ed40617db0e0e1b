use crate::crawl::{CrawlPlan, CrawlSettings};
use crate::grid::SearchArea;
use crate::scrapers::client::RetryPolicy;
use crate::scrapers::types::{Advertiser, Range, SearchFilters};
use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Which decomposition the crawl uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlMode {
    Grid,
    District,
}

impl FromStr for CrawlMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "grid" => Ok(CrawlMode::Grid),
            "district" | "districts" => Ok(CrawlMode::District),
            other => anyhow::bail!("unknown crawl mode '{}' (expected grid or district)", other),
        }
    }
}

impl std::fmt::Display for CrawlMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CrawlMode::Grid => "grid",
            CrawlMode::District => "district",
        })
    }
}

pub struct Config {
    pub base_url: String,
    pub city_id: String,
    pub mode: CrawlMode,
    pub polygon_path: Option<PathBuf>,
    pub cell_size_km: f64,
    pub max_subdivision_depth: u32,
    pub verify_exact: bool,
    pub request_delay: Duration,
    pub retry: RetryPolicy,
    pub timeout: Duration,
    pub filters: SearchFilters,
    pub output_path: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; unset keys take their defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let parse = |key: &str| -> Result<Option<f64>> { parse_opt(key, get(key)) };

        let range = |min_key: &str, max_key: &str| -> Result<Option<Range>> {
            match (parse(min_key)?, parse(max_key)?) {
                (Some(min), Some(max)) if min <= max => Ok(Some(Range { min, max })),
                (Some(_), Some(_)) => anyhow::bail!("{} must not exceed {}", min_key, max_key),
                (None, None) => Ok(None),
                _ => anyhow::bail!("{} and {} must be set together", min_key, max_key),
            }
        };

        let filters = SearchFilters {
            size: range("MIN_SIZE", "MAX_SIZE")?,
            price: range("MIN_PRICE", "MAX_PRICE")?,
            elevator: parse_opt("ELEVATOR", get("ELEVATOR"))?,
            parking: parse_opt("PARKING", get("PARKING"))?,
            balcony: parse_opt("BALCONY", get("BALCONY"))?,
            advertiser: parse_opt::<Advertiser>("ADVERTISER", get("ADVERTISER"))?,
        };

        Ok(Self {
            base_url: get("DIVAR_BASE_URL").unwrap_or_else(|| "https://api.divar.ir".to_string()),
            city_id: get("DIVAR_CITY_ID").unwrap_or_else(|| "1".to_string()),
            mode: parse_opt("CRAWL_MODE", get("CRAWL_MODE"))?.unwrap_or(CrawlMode::Grid),
            polygon_path: get("POLYGON_PATH").map(PathBuf::from),
            cell_size_km: cell_size_km(parse_opt("CELL_SIZE_KM", get("CELL_SIZE_KM"))?)?,
            max_subdivision_depth: parse_opt("MAX_SUBDIVISION_DEPTH", get("MAX_SUBDIVISION_DEPTH"))?.unwrap_or(3),
            verify_exact: parse_opt("VERIFY_EXACT", get("VERIFY_EXACT"))?.unwrap_or(false),
            request_delay: Duration::from_millis(
                parse_opt("REQUEST_DELAY_MS", get("REQUEST_DELAY_MS"))?.unwrap_or(1000),
            ),
            retry: RetryPolicy {
                retries: parse_opt("HTTP_RETRIES", get("HTTP_RETRIES"))?.unwrap_or(5),
                delay: Duration::from_millis(
                    parse_opt("HTTP_RETRY_DELAY_MS", get("HTTP_RETRY_DELAY_MS"))?.unwrap_or(30_000),
                ),
            },
            timeout: Duration::from_secs(parse_opt("HTTP_TIMEOUT_SECS", get("HTTP_TIMEOUT_SECS"))?.unwrap_or(30)),
            filters,
            output_path: get("OUTPUT_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("houses.json")),
        })
    }

    pub fn settings(&self) -> CrawlSettings {
        CrawlSettings {
            request_delay: self.request_delay,
            max_subdivision_depth: self.max_subdivision_depth,
        }
    }

    /// Resolves the crawl plan, reading the polygon file in grid mode
    pub async fn plan(&self) -> Result<CrawlPlan> {
        match self.mode {
            CrawlMode::District => Ok(CrawlPlan::Districts {
                city_id: self.city_id.clone(),
                verify_exact: self.verify_exact,
            }),
            CrawlMode::Grid => {
                let path = self
                    .polygon_path
                    .as_ref()
                    .context("POLYGON_PATH is required in grid mode")?;
                let raw = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("Failed to read polygon {}", path.display()))?;
                let area: SearchArea = serde_json::from_str(&raw)
                    .with_context(|| format!("{} is not a GeoJSON Polygon or MultiPolygon", path.display()))?;
                Ok(CrawlPlan::Grid {
                    area,
                    cell_side_km: self.cell_size_km,
                })
            }
        }
    }
}

/// Smallest grid cell accepted from the environment, in kilometers
pub const MIN_CELL_SIZE_KM: f64 = 0.05;

fn cell_size_km(value: Option<f64>) -> Result<f64> {
    match value {
        None => Ok(0.8),
        Some(km) if km.is_finite() && km >= MIN_CELL_SIZE_KM => Ok(km),
        Some(km) => anyhow::bail!("CELL_SIZE_KM must be at least {} (got {})", MIN_CELL_SIZE_KM, km),
    }
}

fn parse_opt<T>(key: &str, value: Option<String>) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .map(|v| {
            v.trim()
                .parse::<T>()
                .map_err(|e| anyhow::anyhow!("invalid {}='{}': {}", key, v, e))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(move |key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.base_url, "https://api.divar.ir");
        assert_eq!(cfg.city_id, "1");
        assert_eq!(cfg.mode, CrawlMode::Grid);
        assert_eq!(cfg.cell_size_km, 0.8);
        assert_eq!(cfg.request_delay, Duration::from_secs(1));
        assert_eq!(cfg.retry.retries, 5);
        assert_eq!(cfg.filters, SearchFilters::default());
        assert_eq!(cfg.output_path, PathBuf::from("houses.json"));
    }

    #[test]
    fn filters_come_from_env() {
        let cfg = config(&[
            ("CRAWL_MODE", "district"),
            ("MIN_SIZE", "30"),
            ("MAX_SIZE", "120"),
            ("ELEVATOR", "true"),
            ("ADVERTISER", "person"),
            ("VERIFY_EXACT", "true"),
        ])
        .unwrap();
        assert_eq!(cfg.mode, CrawlMode::District);
        assert!(cfg.verify_exact);
        assert_eq!(cfg.filters.size, Some(Range { min: 30.0, max: 120.0 }));
        assert_eq!(cfg.filters.elevator, Some(true));
        assert_eq!(cfg.filters.advertiser, Some(Advertiser::Person));
        assert_eq!(cfg.filters.price, None);
    }

    #[test]
    fn malformed_values_name_the_variable() {
        let err = config(&[("CELL_SIZE_KM", "wide")]).err().unwrap();
        assert!(err.to_string().contains("CELL_SIZE_KM"));

        let err = config(&[("MIN_PRICE", "10")]).err().unwrap();
        assert!(err.to_string().contains("MAX_PRICE"));
    }

    #[test]
    fn tiny_cell_size_is_rejected() {
        for raw in ["0", "-1", "1e-9", "0.01", "NaN"] {
            let err = config(&[("CELL_SIZE_KM", raw)]).err().unwrap();
            assert!(err.to_string().contains("CELL_SIZE_KM"), "{}", raw);
        }
        assert_eq!(config(&[("CELL_SIZE_KM", "0.05")]).unwrap().cell_size_km, MIN_CELL_SIZE_KM);
    }

    #[tokio::test]
    async fn grid_mode_requires_polygon() {
        let cfg = config(&[]).unwrap();
        assert!(cfg.plan().await.is_err());
    }
}
