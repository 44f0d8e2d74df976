//! Catalog producer interface.
//!
//! The catalog is the paginated source of items. Scans and page advances are
//! request/response; anything the catalog reports on its own (a page was
//! processed, the last page was reached, a runtime error, the catalog context
//! was closed) arrives as a [`CatalogSignal`](crate::pipeline::events::CatalogSignal)
//! through the orchestrator's event sender.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CatalogError;
use crate::pipeline::types::{CatalogRef, Item};

/// Items found on one catalog page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discovery {
    pub items: Vec<Item>,
    /// Whether another page exists after this one.
    pub has_more: bool,
}

#[async_trait]
pub trait Catalog: Send + Sync {
    /// Report the items on the catalog's current page.
    async fn scan(&self, catalog: &CatalogRef) -> Result<Discovery, CatalogError>;

    /// Move to the next page and report its items. `None` means there is no
    /// next page.
    async fn advance_page(&self, catalog: &CatalogRef) -> Result<Option<Discovery>, CatalogError>;
}
