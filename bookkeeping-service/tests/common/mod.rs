#![allow(dead_code)]

use bookkeeping_service::config::BookkeepingConfig;
use bookkeeping_service::services::MemoryStore;
use bookkeeping_service::startup::Application;
use reqwest::{Client, Response};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::sync::Arc;

pub const TEST_USER_ID: &str = "test_user_123";

pub struct TestApp {
    pub address: String,
    pub port: u16,
    /// Backing store, kept for failure injection.
    pub store: MemoryStore,
    pub client: Client,
}

impl TestApp {
    pub async fn spawn() -> Self {
        let store = MemoryStore::new();
        let app =
            Application::build_with_store(BookkeepingConfig::for_tests(), Arc::new(store.clone()))
                .await
                .expect("Failed to build test application");

        let port = app.port();
        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for the server to answer
        let client = Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(20)).await;
        }

        TestApp {
            address,
            port,
            store,
            client,
        }
    }

    pub async fn get(&self, path: &str) -> Response {
        self.client
            .get(format!("{}{}", self.address, path))
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn post(&self, path: &str, body: &Value) -> Response {
        self.client
            .post(format!("{}{}", self.address, path))
            .header("X-User-ID", TEST_USER_ID)
            .json(body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn delete(&self, path: &str) -> Response {
        self.client
            .delete(format!("{}{}", self.address, path))
            .header("X-User-ID", TEST_USER_ID)
            .send()
            .await
            .expect("Failed to execute request")
    }

    /// Purchase `quantity` units at `buy_price`; returns the bon id and lot id.
    pub async fn purchase(&self, quantity: i64, buy_price: &str) -> (String, String) {
        let response = self
            .post(
                "/documents",
                &json!({
                    "class": "buy",
                    "counterpart_id": "supplier-1",
                    "lines": [{
                        "kind": "product",
                        "product_id": "widget",
                        "unit_price": buy_price,
                        "sell_price": "15",
                        "quantity": quantity
                    }]
                }),
            )
            .await;
        assert_eq!(response.status().as_u16(), 201);
        let body: Value = response.json().await.expect("Failed to parse JSON");
        let id = body["id"].as_str().expect("missing id").to_string();
        let lot_id = format!("{}-L1", id);
        (id, lot_id)
    }

    /// Sell `quantity` units from `lot_id` at 15 each.
    pub async fn sell(&self, lot_id: &str, quantity: i64) -> Response {
        self.post(
            "/documents",
            &json!({
                "class": "sell",
                "counterpart_id": "client-1",
                "lines": [{
                    "kind": "product",
                    "lot_id": lot_id,
                    "unit_price": "15",
                    "quantity": quantity
                }]
            }),
        )
        .await
    }

    pub async fn remaining(&self, lot_id: &str) -> i64 {
        let body: Value = self
            .get(&format!("/lots/{}", lot_id))
            .await
            .json()
            .await
            .expect("Failed to parse JSON");
        body["remaining_quantity"].as_i64().expect("missing remaining_quantity")
    }
}

pub fn decimal(value: &Value) -> Decimal {
    match value {
        Value::String(s) => s.parse().expect("invalid decimal"),
        other => other.to_string().parse().expect("invalid decimal"),
    }
}
