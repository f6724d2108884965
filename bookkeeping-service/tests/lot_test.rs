mod common;

use common::TestApp;
use serde_json::{json, Value};

#[tokio::test]
async fn unknown_lot_is_not_found() {
    let app = TestApp::spawn().await;
    assert_eq!(app.get("/lots/BUY000001-L1").await.status().as_u16(), 404);
}

#[tokio::test]
async fn unreferenced_lot_can_be_deleted() {
    let app = TestApp::spawn().await;
    let (_, lot_id) = app.purchase(4, "10").await;

    let response = app.delete(&format!("/lots/{}", lot_id)).await;
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["deleted"], true);

    assert_eq!(app.get(&format!("/lots/{}", lot_id)).await.status().as_u16(), 404);
}

#[tokio::test]
async fn sold_lot_can_only_be_deactivated() {
    let app = TestApp::spawn().await;
    let (_, lot_id) = app.purchase(4, "10").await;
    assert_eq!(app.sell(&lot_id, 1).await.status().as_u16(), 201);

    let response = app.delete(&format!("/lots/{}", lot_id)).await;
    assert_eq!(response.status().as_u16(), 409);

    let response = app.post(&format!("/lots/{}/deactivate", lot_id), &json!({})).await;
    assert_eq!(response.status().as_u16(), 200);

    // An inactive lot cannot be sold from.
    assert_eq!(app.sell(&lot_id, 1).await.status().as_u16(), 409);
    assert_eq!(app.remaining(&lot_id).await, 3);
}
