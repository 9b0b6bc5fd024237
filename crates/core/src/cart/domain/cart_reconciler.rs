use std::time::Duration;

use crate::detection::domain::confirmed_detection::ConfirmedDetection;

use super::cart::{Cart, CartEdit, CartError, CartItem};
use super::cart_mutation_sink::{CartDelta, CartMutationSink};
use super::product_catalog::ProductCatalog;

/// Applies confirmed detections and cashier edits to the cart.
///
/// Detections only ever add one unit; removals come exclusively from
/// explicit edits. Every applied change is forwarded to the mutation sink.
pub struct CartReconciler {
    catalog: Box<dyn ProductCatalog>,
    sink: Box<dyn CartMutationSink>,
    cart: Cart,
    max_cart_items: u32,
}

impl CartReconciler {
    pub fn new(
        catalog: Box<dyn ProductCatalog>,
        sink: Box<dyn CartMutationSink>,
        max_cart_items: u32,
    ) -> Self {
        Self {
            catalog,
            sink,
            cart: Cart::new(),
            max_cart_items,
        }
    }

    pub fn cart(&self) -> &Cart {
        &self.cart
    }

    pub fn items(&self) -> Vec<CartItem> {
        self.cart.items().to_vec()
    }

    pub fn max_cart_items(&self) -> u32 {
        self.max_cart_items
    }

    pub fn set_max_cart_items(&mut self, max_cart_items: u32) {
        self.max_cart_items = max_cart_items;
    }

    pub fn apply_confirmed_detection(
        &mut self,
        detection: &ConfirmedDetection,
    ) -> Result<CartItem, CartError> {
        let product = self.catalog.find_or_create(&detection.product_label)?;
        let item = self.cart.increment_or_insert(&product, self.max_cart_items)?;
        log::info!(
            "Cart: {} x{} ({:.0}% at {}ms)",
            item.label,
            item.quantity,
            detection.confidence,
            detection.timestamp.as_millis()
        );
        self.forward(&item, 1, detection.timestamp);
        Ok(item)
    }

    pub fn apply_edit(&mut self, edit: &CartEdit, at: Duration) -> Result<(), CartError> {
        match *edit {
            CartEdit::SetQuantity {
                product_id,
                quantity,
            } => self.set_quantity(product_id, quantity, at),
            CartEdit::Remove { product_id } => self.remove(product_id, at),
            CartEdit::Clear => {
                self.clear(at);
                Ok(())
            }
        }
    }

    pub fn set_quantity(
        &mut self,
        product_id: u64,
        quantity: u32,
        at: Duration,
    ) -> Result<(), CartError> {
        let previous = self
            .cart
            .get(product_id)
            .cloned()
            .ok_or(CartError::UnknownProduct(product_id))?;
        match self.cart.set_quantity(product_id, quantity, self.max_cart_items)? {
            Some(item) => {
                let change = i64::from(item.quantity) - i64::from(previous.quantity);
                if change != 0 {
                    self.forward(&item, change, at);
                }
            }
            None => self.forward_removal(&previous, at),
        }
        Ok(())
    }

    pub fn remove(&mut self, product_id: u64, at: Duration) -> Result<(), CartError> {
        let removed = self
            .cart
            .remove(product_id)
            .ok_or(CartError::UnknownProduct(product_id))?;
        self.forward_removal(&removed, at);
        Ok(())
    }

    pub fn clear(&mut self, at: Duration) {
        for removed in self.cart.clear() {
            self.forward_removal(&removed, at);
        }
    }

    fn forward_removal(&mut self, removed: &CartItem, at: Duration) {
        let gone = CartItem {
            quantity: 0,
            ..removed.clone()
        };
        self.forward(&gone, -i64::from(removed.quantity), at);
    }

    fn forward(&mut self, item: &CartItem, quantity_change: i64, at: Duration) {
        let delta = CartDelta {
            product_id: item.product_id,
            label: item.label.clone(),
            quantity_change,
            new_quantity: item.quantity,
            at,
        };
        if let Err(e) = self.sink.forward(&delta) {
            log::warn!("Failed to forward cart delta for '{}': {e}", delta.label);
        }
    }
}
