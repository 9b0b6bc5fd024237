use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type ProductId = u64;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub label: String,
    pub unit_price_cents: u64,
}

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("failed to read catalog {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse catalog {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("no product for label '{0}'")]
    UnknownLabel(String),
}

/// Maps detected labels to sellable products.
pub trait ProductCatalog: Send {
    /// Returns the product for `label`, creating one if the catalog allows it.
    fn find_or_create(&mut self, label: &str) -> Result<Product, CatalogError>;
}
