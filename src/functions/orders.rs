use crate::backend::{InvokeEnvelope, InvokeResponse, InvokeTarget};
use crate::error::InvokeError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use uuid::Uuid;

/// Order list and creation. Orders live only as long as the process.
#[derive(Debug, Default)]
pub struct OrdersFunction {
    orders: Mutex<Vec<Map<String, Value>>>,
}

impl OrdersFunction {
    pub fn new() -> Self {
        Self::default()
    }

    fn list(&self) -> Result<InvokeResponse, InvokeError> {
        let orders = self.orders.lock();
        let body = serde_json::to_string(&*orders).map_err(|e| InvokeError::Failed(e.to_string()))?;
        Ok(InvokeResponse::json(200, body))
    }

    fn create(&self, body: Option<&str>) -> Result<InvokeResponse, InvokeError> {
        let Some(body) = body.filter(|b| !b.trim().is_empty()) else {
            return Ok(InvokeResponse::json(
                400,
                json!({ "error": "Request body is required" }).to_string(),
            ));
        };

        let mut order = match serde_json::from_str::<Value>(body) {
            Ok(Value::Object(order)) => order,
            _ => {
                return Ok(InvokeResponse::json(
                    400,
                    json!({ "error": "Request body must be a JSON object" }).to_string(),
                ))
            }
        };

        let order_id = Uuid::new_v4().to_string();
        order.insert("orderId".to_string(), Value::String(order_id.clone()));
        order.insert("status".to_string(), Value::String("PENDING".to_string()));

        let body = serde_json::to_string(&order).map_err(|e| InvokeError::Failed(e.to_string()))?;
        self.orders.lock().push(order);
        tracing::info!(order_id = %order_id, "Created order");

        Ok(InvokeResponse::json(201, body))
    }
}

#[async_trait]
impl InvokeTarget for OrdersFunction {
    async fn invoke(&self, envelope: InvokeEnvelope) -> Result<InvokeResponse, InvokeError> {
        tracing::debug!(request_id = %envelope.request_id, "{} /orders invoked", envelope.http_method);

        match envelope.http_method.as_str() {
            "GET" => self.list(),
            "POST" => self.create(envelope.body.as_deref()),
            other => Ok(InvokeResponse::json(
                405,
                json!({ "error": format!("Method not allowed: {}", other) }).to_string(),
            )),
        }
    }
}
