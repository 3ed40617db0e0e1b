use crate::error::CrawlError;
use crate::grid::{generate_grid, SearchArea};
use crate::models::{BoundingBox, District, House};
use crate::scrapers::area::fetch_area;
use crate::scrapers::districts::{enumerate_districts, fetch_district};
use crate::scrapers::fields::extract_fields;
use crate::scrapers::traits::DivarApi;
use crate::scrapers::types::SearchFilters;
use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashSet;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DETAIL_PATH: &str = "/v8/posts-v2/web";

/// Where a crawl currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlStage {
    Idle,
    ComputingGrid,
    EnumeratingDistricts,
    Fetching,
    Verifying,
    Done,
    Failed,
}

impl std::fmt::Display for CrawlStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            CrawlStage::Idle => "idle",
            CrawlStage::ComputingGrid => "computing grid",
            CrawlStage::EnumeratingDistricts => "enumerating districts",
            CrawlStage::Fetching => "fetching",
            CrawlStage::Verifying => "verifying",
            CrawlStage::Done => "done",
            CrawlStage::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Snapshot handed to the progress callback
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    pub stage: CrawlStage,
    pub completed: usize,
    pub total: usize,
    /// Overall fraction in `[0, 1]`, weighted across stages
    pub fraction: f64,
    pub label: String,
}

/// How a crawl decomposes the city
#[derive(Debug, Clone)]
pub enum CrawlPlan {
    Grid { area: SearchArea, cell_side_km: f64 },
    Districts { city_id: String, verify_exact: bool },
}

#[derive(Debug, Clone)]
pub struct CrawlSettings {
    /// Pause between successive cell queries and detail fetches
    pub request_delay: Duration,
    /// How many times a dense cell may be quartered
    pub max_subdivision_depth: u32,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            request_delay: Duration::from_secs(1),
            max_subdivision_depth: 3,
        }
    }
}

/// Accumulated, token-deduplicated result set
#[derive(Debug, Default)]
struct ResultSet {
    houses: Vec<House>,
    tokens: HashSet<String>,
}

impl ResultSet {
    fn merge(&mut self, delta: Vec<House>) -> usize {
        let before = self.houses.len();
        for house in delta {
            if self.tokens.insert(house.token.clone()) {
                self.houses.push(house);
            }
        }
        self.houses.len() - before
    }

    /// Swaps in the verified record for the same token
    fn replace(&mut self, house: House) -> bool {
        match self.houses.iter_mut().find(|h| h.token == house.token) {
            Some(slot) => {
                *slot = house;
                true
            }
            None => false,
        }
    }
}

/// Drives one crawl end-to-end over a [`DivarApi`]
pub struct Crawler<'a> {
    api: &'a dyn DivarApi,
    settings: CrawlSettings,
    cancel: CancellationToken,
    rng: StdRng,
}

impl<'a> Crawler<'a> {
    pub fn new(api: &'a dyn DivarApi, settings: CrawlSettings, cancel: CancellationToken) -> Self {
        Self {
            api,
            settings,
            cancel,
            rng: StdRng::from_entropy(),
        }
    }

    /// Fixed RNG for reproducible district sampling
    #[cfg(test)]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub async fn run(
        &mut self,
        plan: &CrawlPlan,
        filters: &SearchFilters,
        on_progress: &mut dyn FnMut(&Progress, &[House]),
    ) -> Result<Vec<House>, CrawlError> {
        let mut results = ResultSet::default();
        info!(stage = %CrawlStage::Idle, ?filters, "Starting crawl");
        let outcome = match plan {
            CrawlPlan::Grid { area, cell_side_km } => {
                self.crawl_grid(area, *cell_side_km, filters, &mut results, on_progress)
                    .await
            }
            CrawlPlan::Districts {
                city_id,
                verify_exact,
            } => {
                self.crawl_districts(city_id, *verify_exact, filters, &mut results, on_progress)
                    .await
            }
        };

        match outcome {
            Ok(()) => {
                info!(houses = results.houses.len(), "Crawl finished");
                let done = Progress {
                    stage: CrawlStage::Done,
                    completed: 1,
                    total: 1,
                    fraction: 1.0,
                    label: "Done".to_string(),
                };
                on_progress(&done, &results.houses);
                Ok(results.houses)
            }
            Err(err) => {
                warn!(error = %err, houses = results.houses.len(), "Crawl failed");
                let failed = Progress {
                    stage: CrawlStage::Failed,
                    completed: 0,
                    total: 0,
                    fraction: 0.0,
                    label: err.to_string(),
                };
                on_progress(&failed, &results.houses);
                Err(err)
            }
        }
    }

    fn check_cancelled(&self) -> Result<(), CrawlError> {
        if self.cancel.is_cancelled() {
            Err(CrawlError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Pacing sleep that gives up as soon as the crawl is cancelled
    async fn pause(&self) -> Result<(), CrawlError> {
        if self.settings.request_delay.is_zero() {
            return self.check_cancelled();
        }
        tokio::select! {
            _ = self.cancel.cancelled() => Err(CrawlError::Cancelled),
            _ = tokio::time::sleep(self.settings.request_delay) => Ok(()),
        }
    }

    async fn crawl_grid(
        &mut self,
        area: &SearchArea,
        cell_side_km: f64,
        filters: &SearchFilters,
        results: &mut ResultSet,
        on_progress: &mut dyn FnMut(&Progress, &[House]),
    ) -> Result<(), CrawlError> {
        info!(stage = %CrawlStage::ComputingGrid, cell_side_km, "Crawl stage");
        let cells = generate_grid(area, cell_side_km);
        let total = cells.len();
        info!(stage = %CrawlStage::Fetching, cells = total, "Crawl stage");

        let start = Progress {
            stage: CrawlStage::Fetching,
            completed: 0,
            total,
            fraction: 0.0,
            label: "Start fetching...".to_string(),
        };
        on_progress(&start, &results.houses);

        for (index, cell) in cells.iter().enumerate() {
            if index > 0 {
                self.pause().await?;
            }
            self.fetch_cell(cell, filters, results).await?;

            let completed = index + 1;
            let progress = Progress {
                stage: CrawlStage::Fetching,
                completed,
                total,
                fraction: completed as f64 / total as f64,
                label: format!("Fetching {}/{} bounding boxes...", completed, total),
            };
            on_progress(&progress, &results.houses);
        }
        Ok(())
    }

    /// Queries one cell, quartering it while upstream reports clusters
    async fn fetch_cell(
        &self,
        cell: &BoundingBox,
        filters: &SearchFilters,
        results: &mut ResultSet,
    ) -> Result<(), CrawlError> {
        let mut pending = vec![(*cell, 0u32)];
        let mut first = true;

        while let Some((bbox, depth)) = pending.pop() {
            if !first {
                self.pause().await?;
            }
            first = false;
            self.check_cancelled()?;

            match fetch_area(self.api, &bbox, filters, &results.tokens).await {
                Ok(delta) => {
                    let added = results.merge(delta);
                    debug!(%bbox, added, "Fetched cell");
                }
                Err(err) if CrawlError::is_too_dense(&err) && depth < self.settings.max_subdivision_depth => {
                    warn!(%bbox, depth, "Cell too dense, splitting into quadrants");
                    pending.extend(bbox.quadrants().into_iter().map(|q| (q, depth + 1)));
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    async fn crawl_districts(
        &mut self,
        city_id: &str,
        verify_exact: bool,
        filters: &SearchFilters,
        results: &mut ResultSet,
        on_progress: &mut dyn FnMut(&Progress, &[House]),
    ) -> Result<(), CrawlError> {
        let stages = if verify_exact { 3 } else { 2 };
        let weighted = |stage: usize, completed: usize, total: usize| {
            let within = if total == 0 { 1.0 } else { completed as f64 / total as f64 };
            (stage as f64 + within) / stages as f64
        };

        info!(stage = %CrawlStage::EnumeratingDistricts, city_id, "Crawl stage");
        let start = Progress {
            stage: CrawlStage::EnumeratingDistricts,
            completed: 0,
            total: 1,
            fraction: 0.0,
            label: "Fetching districts...".to_string(),
        };
        on_progress(&start, &results.houses);

        let cancel = self.cancel.clone();
        let districts = enumerate_districts(
            self.api,
            city_id,
            || {
                if cancel.is_cancelled() {
                    Err(CrawlError::Cancelled.into())
                } else {
                    Ok(())
                }
            },
            |completed, total| {
                let progress = Progress {
                    stage: CrawlStage::EnumeratingDistricts,
                    completed,
                    total,
                    fraction: weighted(0, completed, total),
                    label: format!("Fetching districts {}/{}...", completed, total),
                };
                on_progress(&progress, &results.houses);
            },
        )
        .await?;

        info!(stage = %CrawlStage::Fetching, districts = districts.len(), "Crawl stage");
        self.fetch_districts(&districts, filters, results, on_progress, |c, t| weighted(1, c, t))
            .await?;

        if verify_exact {
            info!(stage = %CrawlStage::Verifying, houses = results.houses.len(), "Crawl stage");
            self.verify(results, on_progress, |c, t| weighted(2, c, t)).await?;
        }
        Ok(())
    }

    async fn fetch_districts(
        &mut self,
        districts: &[District],
        filters: &SearchFilters,
        results: &mut ResultSet,
        on_progress: &mut dyn FnMut(&Progress, &[House]),
        weighted: impl Fn(usize, usize) -> f64,
    ) -> Result<(), CrawlError> {
        let total = districts.len();
        for (index, district) in districts.iter().enumerate() {
            self.check_cancelled()?;
            let delta = fetch_district(self.api, district, filters, &results.tokens, &mut self.rng).await?;
            let added = results.merge(delta);
            debug!(district = %district.value, added, "Fetched district");

            let completed = index + 1;
            let progress = Progress {
                stage: CrawlStage::Fetching,
                completed,
                total,
                fraction: weighted(completed, total),
                label: format!("Fetching district {}/{} ({})...", completed, total, district.title),
            };
            on_progress(&progress, &results.houses);
        }
        Ok(())
    }

    /// Replaces approximate Houses with exact ones from their detail pages.
    /// A failed lookup keeps the approximate record.
    async fn verify(
        &self,
        results: &mut ResultSet,
        on_progress: &mut dyn FnMut(&Progress, &[House]),
        weighted: impl Fn(usize, usize) -> f64,
    ) -> Result<(), CrawlError> {
        let pending: Vec<String> = results
            .houses
            .iter()
            .filter(|h| h.location.exact == Some(false))
            .map(|h| h.token.clone())
            .collect();
        let total = pending.len();

        for (index, token) in pending.iter().enumerate() {
            self.pause().await?;
            match self.fetch_exact(token).await {
                Ok(house) => {
                    results.replace(house);
                }
                Err(err) => {
                    warn!(token = %token, error = %err, "Verification failed, keeping approximate listing");
                }
            }

            let completed = index + 1;
            let progress = Progress {
                stage: CrawlStage::Verifying,
                completed,
                total,
                fraction: weighted(completed, total),
                label: format!("Verifying {}/{} listings...", completed, total),
            };
            on_progress(&progress, &results.houses);
        }
        Ok(())
    }

    async fn fetch_exact(&self, token: &str) -> Result<House> {
        let response = self
            .api
            .get(&format!("{}/{}", DETAIL_PATH, token))
            .await
            .with_context(|| format!("Failed to fetch listing {}", token))?;

        extract_fields(&response)
            .details()
            .to_house(token)
            .with_context(|| format!("Listing {} lacks location, size or price", token))
    }
}
