//! Built-in compute units for Invoke routes.

mod orders;
mod products;

pub use orders::OrdersFunction;
pub use products::ProductsFunction;

use crate::backend::FunctionRegistry;
use std::sync::Arc;

/// Registry with the `products` and `orders` functions.
pub fn builtin_registry() -> FunctionRegistry {
    let mut registry = FunctionRegistry::new();
    registry.register("products", Arc::new(ProductsFunction));
    registry.register("orders", Arc::new(OrdersFunction::new()));
    registry
}
