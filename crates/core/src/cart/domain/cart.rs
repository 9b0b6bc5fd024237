use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::product_catalog::{CatalogError, Product, ProductId};

#[derive(Error, Debug)]
pub enum CartError {
    #[error("cart is full ({units}/{capacity} units)")]
    CartFull { units: u32, capacity: u32 },
    #[error("catalog lookup failed: {0}")]
    Catalog(#[from] CatalogError),
    #[error("product {0} is not in the cart")]
    UnknownProduct(ProductId),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: ProductId,
    pub label: String,
    pub quantity: u32,
    pub unit_price_cents: u64,
}

impl CartItem {
    /// Saturates at `u64::MAX`.
    pub fn subtotal_cents(&self) -> u64 {
        self.unit_price_cents.saturating_mul(u64::from(self.quantity))
    }
}

/// Explicit edit requested by the cashier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CartEdit {
    /// Zero removes the line.
    SetQuantity { product_id: ProductId, quantity: u32 },
    Remove { product_id: ProductId },
    Clear,
}

/// Ordered cart lines, one per product, bounded by total units.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Cart {
    items: Vec<CartItem>,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    pub fn get(&self, product_id: ProductId) -> Option<&CartItem> {
        self.items.iter().find(|item| item.product_id == product_id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn total_units(&self) -> u32 {
        self.items.iter().map(|item| item.quantity).sum()
    }

    pub fn total_cents(&self) -> u64 {
        self.items
            .iter()
            .map(CartItem::subtotal_cents)
            .fold(0, u64::saturating_add)
    }

    /// Adds one unit of `product`, appending a new line if needed.
    pub fn increment_or_insert(
        &mut self,
        product: &Product,
        max_units: u32,
    ) -> Result<CartItem, CartError> {
        self.ensure_room(1, max_units)?;
        if let Some(item) = self
            .items
            .iter_mut()
            .find(|item| item.product_id == product.id)
        {
            item.quantity += 1;
            return Ok(item.clone());
        }
        let item = CartItem {
            product_id: product.id,
            label: product.label.clone(),
            quantity: 1,
            unit_price_cents: product.unit_price_cents,
        };
        self.items.push(item.clone());
        Ok(item)
    }

    /// Sets a line's quantity. Returns `None` when the line was removed.
    pub fn set_quantity(
        &mut self,
        product_id: ProductId,
        quantity: u32,
        max_units: u32,
    ) -> Result<Option<CartItem>, CartError> {
        let current = self
            .get(product_id)
            .map(|item| item.quantity)
            .ok_or(CartError::UnknownProduct(product_id))?;
        if quantity == 0 {
            self.remove(product_id);
            return Ok(None);
        }
        if quantity > current {
            self.ensure_room(quantity - current, max_units)?;
        }
        let Some(item) = self
            .items
            .iter_mut()
            .find(|item| item.product_id == product_id)
        else {
            return Err(CartError::UnknownProduct(product_id));
        };
        item.quantity = quantity;
        Ok(Some(item.clone()))
    }

    pub fn remove(&mut self, product_id: ProductId) -> Option<CartItem> {
        let index = self
            .items
            .iter()
            .position(|item| item.product_id == product_id)?;
        Some(self.items.remove(index))
    }

    pub fn clear(&mut self) -> Vec<CartItem> {
        std::mem::take(&mut self.items)
    }

    fn ensure_room(&self, extra: u32, max_units: u32) -> Result<(), CartError> {
        let units = self.total_units();
        if units.saturating_add(extra) > max_units {
            return Err(CartError::CartFull {
                units,
                capacity: max_units,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn product(id: ProductId, label: &str, price: u64) -> Product {
        Product {
            id,
            label: label.to_string(),
            unit_price_cents: price,
        }
    }

    #[test]
    fn test_insert_then_increment() {
        let mut cart = Cart::new();
        let botella = product(1, "Botella", 150);

        let first = cart.increment_or_insert(&botella, 50).unwrap();
        let second = cart.increment_or_insert(&botella, 50).unwrap();

        assert_eq!(first.quantity, 1);
        assert_eq!(second.quantity, 2);
        assert_eq!(cart.len(), 1);
        assert_eq!(cart.total_cents(), 300);
    }

    #[test]
    fn test_totals_saturate_on_huge_prices() {
        let mut cart = Cart::new();
        let gold = product(1, "Lingote", u64::MAX / 2);
        cart.increment_or_insert(&gold, 50).unwrap();
        cart.increment_or_insert(&gold, 50).unwrap();
        cart.increment_or_insert(&gold, 50).unwrap();
        cart.increment_or_insert(&product(2, "Lata", 90), 50).unwrap();

        assert_eq!(cart.items()[0].subtotal_cents(), u64::MAX);
        assert_eq!(cart.total_cents(), u64::MAX);
    }

    #[test]
    fn test_insertion_order_preserved() {
        let mut cart = Cart::new();
        cart.increment_or_insert(&product(2, "Lata", 90), 50).unwrap();
        cart.increment_or_insert(&product(1, "Botella", 150), 50).unwrap();
        cart.increment_or_insert(&product(2, "Lata", 90), 50).unwrap();

        let labels: Vec<_> = cart.items().iter().map(|i| i.label.as_str()).collect();
        assert_eq!(labels, vec!["Lata", "Botella"]);
        assert_eq!(cart.total_units(), 3);
    }

    #[test]
    fn test_cart_full_rejects_increment() {
        let mut cart = Cart::new();
        let botella = product(1, "Botella", 150);
        cart.increment_or_insert(&botella, 2).unwrap();
        cart.increment_or_insert(&botella, 2).unwrap();

        let result = cart.increment_or_insert(&product(2, "Lata", 90), 2);

        assert!(matches!(
            result,
            Err(CartError::CartFull {
                units: 2,
                capacity: 2
            })
        ));
        assert_eq!(cart.total_units(), 2);
    }

    #[rstest]
    #[case(3, Some(3))]
    #[case(1, Some(1))]
    #[case(0, None)]
    fn test_set_quantity(#[case] quantity: u32, #[case] expected: Option<u32>) {
        let mut cart = Cart::new();
        let botella = product(1, "Botella", 150);
        cart.increment_or_insert(&botella, 50).unwrap();
        cart.increment_or_insert(&botella, 50).unwrap();

        let result = cart.set_quantity(1, quantity, 50).unwrap();

        assert_eq!(result.map(|item| item.quantity), expected);
        assert_eq!(cart.get(1).map(|item| item.quantity), expected);
    }

    #[test]
    fn test_set_quantity_respects_capacity() {
        let mut cart = Cart::new();
        cart.increment_or_insert(&product(1, "Botella", 150), 5).unwrap();
        cart.increment_or_insert(&product(2, "Lata", 90), 5).unwrap();

        assert!(matches!(
            cart.set_quantity(1, 5, 5),
            Err(CartError::CartFull { .. })
        ));
        assert_eq!(cart.set_quantity(1, 4, 5).unwrap().unwrap().quantity, 4);
    }

    #[test]
    fn test_set_quantity_unknown_product() {
        let mut cart = Cart::new();
        assert!(matches!(
            cart.set_quantity(9, 1, 50),
            Err(CartError::UnknownProduct(9))
        ));
    }

    #[test]
    fn test_remove_and_clear() {
        let mut cart = Cart::new();
        cart.increment_or_insert(&product(1, "Botella", 150), 50).unwrap();
        cart.increment_or_insert(&product(2, "Lata", 90), 50).unwrap();

        assert_eq!(cart.remove(1).unwrap().label, "Botella");
        assert!(cart.remove(1).is_none());
        assert_eq!(cart.clear().len(), 1);
        assert!(cart.is_empty());
    }
}
