use crate::cart::domain::cart_mutation_sink::{CartDelta, CartMutationSink};

/// Reports deltas to the `log` facade only.
pub struct LoggingMutationSink;

impl CartMutationSink for LoggingMutationSink {
    fn forward(&mut self, delta: &CartDelta) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        log::info!(
            "Inventory movement: {} {:+} -> {}",
            delta.label,
            delta.quantity_change,
            delta.new_quantity
        );
        Ok(())
    }
}
