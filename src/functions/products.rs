use crate::backend::{InvokeEnvelope, InvokeResponse, InvokeTarget};
use crate::error::InvokeError;
use async_trait::async_trait;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct Product {
    pub id: &'static str,
    pub name: &'static str,
    pub price: f64,
    pub category: &'static str,
}

const CATALOG: [Product; 3] = [
    Product {
        id: "p-001",
        name: "Laptop",
        price: 999.99,
        category: "Electronics",
    },
    Product {
        id: "p-002",
        name: "Headphones",
        price: 149.99,
        category: "Electronics",
    },
    Product {
        id: "p-003",
        name: "Coffee Mug",
        price: 12.99,
        category: "Kitchen",
    },
];

/// Static product catalog.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProductsFunction;

#[async_trait]
impl InvokeTarget for ProductsFunction {
    async fn invoke(&self, envelope: InvokeEnvelope) -> Result<InvokeResponse, InvokeError> {
        tracing::debug!(request_id = %envelope.request_id, "{} /products invoked", envelope.http_method);
        let body = serde_json::to_string(&CATALOG).map_err(|e| InvokeError::Failed(e.to_string()))?;
        Ok(InvokeResponse::json(200, body))
    }
}
