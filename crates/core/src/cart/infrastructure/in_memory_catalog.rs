use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use crate::cart::domain::product_catalog::{CatalogError, Product, ProductCatalog, ProductId};

/// Catalog held in memory, seeded from a `label -> unit price (cents)` map.
///
/// Labels the seed does not know become zero-priced products on first
/// sight, so a newly trained label still lands in the cart.
pub struct InMemoryProductCatalog {
    products: HashMap<String, Product>,
    next_id: ProductId,
}

impl InMemoryProductCatalog {
    pub fn new() -> Self {
        Self {
            products: HashMap::new(),
            next_id: 1,
        }
    }

    /// Ids are assigned in label order.
    pub fn seeded(prices: BTreeMap<String, u64>) -> Self {
        let mut catalog = Self::new();
        for (label, price) in prices {
            catalog.insert(&label, price);
        }
        catalog
    }

    /// Loads a JSON object such as `{"Botella": 150, "Lata": 90}`.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let json = fs::read_to_string(path).map_err(|e| CatalogError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let prices: BTreeMap<String, u64> =
            serde_json::from_str(&json).map_err(|e| CatalogError::Parse {
                path: path.to_path_buf(),
                source: e,
            })?;
        log::info!("Loaded {} catalog products from {}", prices.len(), path.display());
        Ok(Self::seeded(prices))
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    fn insert(&mut self, label: &str, unit_price_cents: u64) -> Product {
        let product = Product {
            id: self.next_id,
            label: label.to_string(),
            unit_price_cents,
        };
        self.next_id += 1;
        self.products.insert(label.to_string(), product.clone());
        product
    }
}

impl Default for InMemoryProductCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl ProductCatalog for InMemoryProductCatalog {
    fn find_or_create(&mut self, label: &str) -> Result<Product, CatalogError> {
        if let Some(product) = self.products.get(label) {
            return Ok(product.clone());
        }
        log::warn!("No catalog price for '{label}', adding at 0");
        Ok(self.insert(label, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_seeded_ids_follow_label_order() {
        let prices = BTreeMap::from([("Lata".to_string(), 90), ("Botella".to_string(), 150)]);
        let mut catalog = InMemoryProductCatalog::seeded(prices);

        let botella = catalog.find_or_create("Botella").unwrap();
        let lata = catalog.find_or_create("Lata").unwrap();

        assert_eq!((botella.id, botella.unit_price_cents), (1, 150));
        assert_eq!((lata.id, lata.unit_price_cents), (2, 90));
    }

    #[test]
    fn test_unknown_label_created_once() {
        let mut catalog = InMemoryProductCatalog::new();

        let first = catalog.find_or_create("Caja").unwrap();
        let again = catalog.find_or_create("Caja").unwrap();

        assert_eq!(first, again);
        assert_eq!(first.unit_price_cents, 0);
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_load_from_json() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("catalog.json");
        fs::write(&path, r#"{"Botella": 150, "Lata": 90}"#).unwrap();

        let mut catalog = InMemoryProductCatalog::load(&path).unwrap();

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.find_or_create("Lata").unwrap().unit_price_cents, 90);
    }

    #[test]
    fn test_load_rejects_malformed_json() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("catalog.json");
        fs::write(&path, r#"{"Botella": "cheap"}"#).unwrap();

        assert!(matches!(
            InMemoryProductCatalog::load(&path),
            Err(CatalogError::Parse { .. })
        ));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            InMemoryProductCatalog::load(Path::new("/nonexistent/catalog.json")),
            Err(CatalogError::Read { .. })
        ));
    }
}
