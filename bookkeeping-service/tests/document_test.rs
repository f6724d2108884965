mod common;

use common::{decimal, TestApp, TEST_USER_ID};
use rust_decimal::Decimal;
use serde_json::{json, Value};

#[tokio::test]
async fn purchase_creates_lot_with_full_quantity() {
    let app = TestApp::spawn().await;

    let (bon_id, lot_id) = app.purchase(10, "10").await;
    assert!(bon_id.starts_with("BUY"));

    let lot: Value = app.get(&format!("/lots/{}", lot_id)).await.json().await.unwrap();
    assert_eq!(lot["document_id"], bon_id.as_str());
    assert_eq!(lot["original_quantity"], 10);
    assert_eq!(lot["remaining_quantity"], 10);
    assert_eq!(lot["active"], true);
    assert_eq!(decimal(&lot["sell_price"]), Decimal::from(15));
}

#[tokio::test]
async fn sale_reserves_quantity_and_issues_bill_number() {
    let app = TestApp::spawn().await;
    let (_, lot_id) = app.purchase(10, "10").await;

    let response = app.sell(&lot_id, 6).await;
    assert_eq!(response.status().as_u16(), 201);

    let body: Value = response.json().await.unwrap();
    let sale_id = body["id"].as_str().unwrap().to_string();
    assert!(sale_id.starts_with("SELL"));
    assert_eq!(decimal(&body["total"]), Decimal::from(90));
    assert_eq!(body["bill_no"], 1);
    assert!(body["bill_no_display"].as_str().unwrap().starts_with("00001/"));
    assert_eq!(app.remaining(&lot_id).await, 4);

    let document: Value = app.get(&format!("/documents/{}", sale_id)).await.json().await.unwrap();
    assert_eq!(document["class"], "sell");
    assert_eq!(document["created_by"], TEST_USER_ID);
    assert_eq!(document["lines"].as_array().unwrap().len(), 1);
    assert_eq!(document["lines"][0]["lot_id"], lot_id.as_str());
    assert_eq!(decimal(&document["lines"][0]["buy_price"]), Decimal::from(10));
}

#[tokio::test]
async fn sale_ids_follow_each_other() {
    let app = TestApp::spawn().await;
    let (_, lot_id) = app.purchase(10, "10").await;

    let first: Value = app.sell(&lot_id, 1).await.json().await.unwrap();
    let second: Value = app.sell(&lot_id, 1).await.json().await.unwrap();

    let first = first["id"].as_str().unwrap();
    let second = second["id"].as_str().unwrap();
    assert_eq!(&first[..first.len() - 2], &second[..second.len() - 2]);
    assert!(first.ends_with("01"));
    assert!(second.ends_with("02"));
}

#[tokio::test]
async fn overselling_is_refused_without_side_effects() {
    let app = TestApp::spawn().await;
    let (_, lot_id) = app.purchase(3, "10").await;

    let response = app.sell(&lot_id, 5).await;
    assert_eq!(response.status().as_u16(), 409);
    assert_eq!(app.remaining(&lot_id).await, 3);

    // No id was burned on the refused sale.
    let body: Value = app.sell(&lot_id, 3).await.json().await.unwrap();
    assert!(body["id"].as_str().unwrap().ends_with("01"));
}

#[tokio::test]
async fn payment_takes_declared_amount() {
    let app = TestApp::spawn().await;

    let response = app
        .post(
            "/documents",
            &json!({"class": "payment", "counterpart_id": "client-1", "amount": "125.50"}),
        )
        .await;
    assert_eq!(response.status().as_u16(), 201);

    let body: Value = response.json().await.unwrap();
    assert!(body["id"].as_str().unwrap().starts_with("PAY"));
    assert_eq!(decimal(&body["total"]), "125.50".parse::<Decimal>().unwrap());
    assert!(body.get("bill_no").is_none());
}

#[tokio::test]
async fn payment_without_amount_is_bad_request() {
    let app = TestApp::spawn().await;

    let response = app
        .post("/documents", &json!({"class": "payment", "counterpart_id": "client-1"}))
        .await;
    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn invalid_body_is_rejected_by_validation() {
    let app = TestApp::spawn().await;

    let response = app
        .post(
            "/documents",
            &json!({
                "class": "sell",
                "counterpart_id": "",
                "lines": [{"kind": "product", "lot_id": "x", "unit_price": "1", "quantity": 0}]
            }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 422);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Validation error");
}

#[tokio::test]
async fn mutations_require_user_header() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .post(format!("{}/documents", app.address))
        .json(&json!({"class": "payment", "counterpart_id": "c", "amount": "1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);
}

#[tokio::test]
async fn deleting_a_sale_restocks_its_lot() {
    let app = TestApp::spawn().await;
    let (_, lot_id) = app.purchase(10, "10").await;
    let sale: Value = app.sell(&lot_id, 4).await.json().await.unwrap();
    let sale_id = sale["id"].as_str().unwrap();
    assert_eq!(app.remaining(&lot_id).await, 6);

    let response = app.delete(&format!("/documents/{}", sale_id)).await;
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["deleted"], true);

    assert_eq!(app.remaining(&lot_id).await, 10);
    assert_eq!(app.get(&format!("/documents/{}", sale_id)).await.status().as_u16(), 404);

    // Idempotent
    let again: Value = app.delete(&format!("/documents/{}", sale_id)).await.json().await.unwrap();
    assert_eq!(again["deleted"], false);
    assert_eq!(app.remaining(&lot_id).await, 10);
}

#[tokio::test]
async fn purchase_with_sold_lot_cannot_be_deleted() {
    let app = TestApp::spawn().await;
    let (bon_id, lot_id) = app.purchase(10, "10").await;
    assert_eq!(app.sell(&lot_id, 1).await.status().as_u16(), 201);

    let response = app.delete(&format!("/documents/{}", bon_id)).await;
    assert_eq!(response.status().as_u16(), 409);
    assert_eq!(app.get(&format!("/lots/{}", lot_id)).await.status().as_u16(), 200);
}

#[tokio::test]
async fn storage_outage_is_reported_as_unavailable() {
    let app = TestApp::spawn().await;
    let (_, lot_id) = app.purchase(10, "10").await;

    app.store.fail_next("increment_counter", 1);
    let response = app.sell(&lot_id, 2).await;
    assert_eq!(response.status().as_u16(), 503);

    // The reservation was released again.
    assert_eq!(app.remaining(&lot_id).await, 10);
}

#[tokio::test]
async fn failed_rollback_reports_the_step() {
    let app = TestApp::spawn().await;
    let (_, lot_id) = app.purchase(10, "10").await;

    app.store.fail_next("insert_line_items", 1);
    app.store.fail_next("delete_document", 1);
    let response = app.sell(&lot_id, 2).await;
    assert_eq!(response.status().as_u16(), 500);

    let body: Value = response.json().await.unwrap();
    assert!(body["details"].as_str().unwrap().contains("delete_document"));
}

#[tokio::test]
async fn out_of_range_amounts_are_rejected_without_touching_lots() {
    let app = TestApp::spawn().await;
    let (_, lot_id) = app.purchase(10, "10").await;

    let sale = |unit_price: &str, quantity: i64| {
        json!({
            "class": "sell",
            "counterpart_id": "client-1",
            "lines": [{
                "kind": "product",
                "lot_id": lot_id,
                "unit_price": unit_price,
                "quantity": quantity
            }]
        })
    };

    let response = app
        .post("/documents", &sale("79228162514264337593543950335", 10))
        .await;
    assert_eq!(response.status().as_u16(), 422);

    let response = app
        .post("/documents", &sale("1000000000000", 100_000_000_000_000_000))
        .await;
    assert_eq!(response.status().as_u16(), 400);

    assert_eq!(app.remaining(&lot_id).await, 10);
}

#[tokio::test]
async fn concurrent_sales_are_numbered_distinctly() {
    let app = TestApp::spawn().await;
    let (_, lot_id) = app.purchase(10, "10").await;

    let (first, second) = tokio::join!(app.sell(&lot_id, 2), app.sell(&lot_id, 3));
    assert_eq!(first.status().as_u16(), 201);
    assert_eq!(second.status().as_u16(), 201);

    let first: Value = first.json().await.unwrap();
    let second: Value = second.json().await.unwrap();
    assert_ne!(first["id"], second["id"]);
    assert_ne!(first["bill_no"], second["bill_no"]);
    for body in [&first, &second] {
        let id = body["id"].as_str().unwrap();
        assert_eq!(app.get(&format!("/documents/{}", id)).await.status().as_u16(), 200);
    }
    assert_eq!(app.remaining(&lot_id).await, 5);
}
