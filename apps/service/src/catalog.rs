//! Read-only catalog collaborator.
//!
//! The catalog is the platform content database (`db.json`): series with
//! individually priced chapters. The agent loads it fresh once per tick and
//! never mutates it; the reader/front-end owns the file.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::types::microusdc_from_usdc;

/// Fallback chapter price when the catalog omits one (0.01 USDC, matching
/// what the reader charges for unpriced premium chapters).
const DEFAULT_CHAPTER_PRICE_MICROUSDC: u64 = 10_000;

#[derive(Debug, Clone)]
pub struct CatalogChapter {
    pub chapter_id: String,
    pub title: String,
    pub price_microusdc: u64,
    pub free: bool,
}

#[derive(Debug, Clone)]
pub struct CatalogSeries {
    pub series_id: String,
    pub title: String,
    pub chapters: Vec<CatalogChapter>,
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog read failed: {0}")]
    Read(String),
    #[error("catalog parse failed: {0}")]
    Parse(String),
}

#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn load(&self) -> Result<Vec<CatalogSeries>, CatalogError>;
}

pub fn file(path: PathBuf) -> Arc<dyn CatalogSource> {
    Arc::new(FileCatalog { path })
}

pub fn fixed(series: Vec<CatalogSeries>) -> Arc<dyn CatalogSource> {
    Arc::new(FixedCatalog { series })
}

struct FileCatalog {
    path: PathBuf,
}

#[async_trait]
impl CatalogSource for FileCatalog {
    async fn load(&self) -> Result<Vec<CatalogSeries>, CatalogError> {
        let raw = std::fs::read_to_string(&self.path)
            .map_err(|error| CatalogError::Read(format!("{}: {error}", self.path.display())))?;
        parse_catalog(&raw)
    }
}

/// Static catalog for tests and local harnesses.
struct FixedCatalog {
    series: Vec<CatalogSeries>,
}

#[async_trait]
impl CatalogSource for FixedCatalog {
    async fn load(&self) -> Result<Vec<CatalogSeries>, CatalogError> {
        Ok(self.series.clone())
    }
}

#[derive(Deserialize)]
struct CatalogFile {
    #[serde(default)]
    series: Vec<RawSeries>,
}

#[derive(Deserialize)]
struct RawSeries {
    id: Value,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    chapters: Vec<RawChapter>,
}

#[derive(Deserialize)]
struct RawChapter {
    id: Value,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    price: Option<f64>,
    #[serde(default)]
    free: bool,
}

fn parse_catalog(raw: &str) -> Result<Vec<CatalogSeries>, CatalogError> {
    let file: CatalogFile =
        serde_json::from_str(raw).map_err(|error| CatalogError::Parse(error.to_string()))?;
    Ok(file
        .series
        .into_iter()
        .map(|series| {
            let series_id = id_text(&series.id);
            CatalogSeries {
                title: series.title.unwrap_or_else(|| format!("Series {series_id}")),
                chapters: series
                    .chapters
                    .into_iter()
                    .map(|chapter| {
                        let chapter_id = id_text(&chapter.id);
                        CatalogChapter {
                            title: chapter
                                .title
                                .unwrap_or_else(|| format!("Chapter {chapter_id}")),
                            price_microusdc: chapter
                                .price
                                .map(microusdc_from_usdc)
                                .unwrap_or(DEFAULT_CHAPTER_PRICE_MICROUSDC),
                            free: chapter.free,
                            chapter_id,
                        }
                    })
                    .collect(),
                series_id,
            }
        })
        .collect())
}

// Series and chapter ids appear as numbers in the content database but are
// carried as strings in every ledger row; normalize at the boundary.
fn id_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.trim().to_string(),
        other => other.to_string(),
    }
}
