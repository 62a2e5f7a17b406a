//! Query side of a view.

use async_trait::async_trait;
use serde::Serialize;

/// Rows a view serves to readers.
#[async_trait]
pub trait ReadModel: Send + Sync {
    type Row: Clone + Serialize + Send;

    fn name(&self) -> &'static str;

    async fn count(&self) -> usize;

    /// Every row, in no particular order.
    async fn rows(&self) -> Vec<Self::Row>;
}
