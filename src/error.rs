use crate::models::BoundingBox;
use thiserror::Error;

/// Terminal failure of a crawl
#[derive(Debug, Error)]
pub enum CrawlError {
    /// Upstream answered with clusters instead of individual pins
    #[error("region {bbox} is too dense ({clusters} clusters); use a smaller cell size")]
    RegionTooDense { bbox: BoundingBox, clusters: usize },

    #[error("no bounding box returned for district {district}")]
    MissingDistrictBbox { district: String },

    #[error("crawl cancelled")]
    Cancelled,

    #[error(transparent)]
    Upstream(anyhow::Error),
}

impl From<anyhow::Error> for CrawlError {
    /// Recovers typed variants raised inside fetchers
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<CrawlError>() {
            Ok(typed) => typed,
            Err(other) => CrawlError::Upstream(other),
        }
    }
}

impl CrawlError {
    pub fn is_too_dense(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<CrawlError>(),
            Some(CrawlError::RegionTooDense { .. })
        )
    }
}
