use std::time::Duration;

use serde::Serialize;

use super::product_catalog::ProductId;

/// One change to a cart line, forwarded to inventory movement tracking.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CartDelta {
    pub product_id: ProductId,
    pub label: String,
    pub quantity_change: i64,
    pub new_quantity: u32,
    pub at: Duration,
}

/// Receives cart deltas after they have been applied.
///
/// Failures are reported back but never roll the cart back.
pub trait CartMutationSink: Send {
    fn forward(&mut self, delta: &CartDelta) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

pub struct NullCartMutationSink;

impl CartMutationSink for NullCartMutationSink {
    fn forward(&mut self, _delta: &CartDelta) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }
}
