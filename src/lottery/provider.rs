use anyhow::Result;
use async_trait::async_trait;

use crate::db::models::Draw;

/// An official draw as reported upstream, plus the announced next concurso
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedDraw {
    pub draw: Draw,
    pub next_draw: i64,
    pub next_draw_date: String,
}

/// Trait that every lottery result source must implement.
#[async_trait]
pub trait DrawSource: Send + Sync {
    /// Most recent published draw.
    async fn fetch_latest(&self) -> Result<FetchedDraw>;

    /// A specific, already published draw.
    async fn fetch_draw(&self, number: i64) -> Result<FetchedDraw>;

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}
