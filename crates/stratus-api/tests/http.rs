//! Router tests driven through `tower::ServiceExt::oneshot`.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use stratus_api::http::build_router;
use stratus_core::{LifecycleManager, ManagerConfig, ResourceStore};
use stratus_hypervisor::SimulatedHypervisor;
use tower::ServiceExt;

fn router() -> Router {
    let manager = LifecycleManager::new(
        ResourceStore::in_memory(),
        Arc::new(SimulatedHypervisor::new()),
        ManagerConfig::default(),
    )
    .unwrap();
    build_router(Arc::new(manager))
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let body = match body {
        Some(value) => Body::from(value.to_string()),
        None => Body::empty(),
    };
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(body)
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn create_vpc(router: &Router, cidr: &str) -> String {
    let (status, vpc) = send(
        router,
        "POST",
        "/vpcs",
        Some(json!({"name": "autovpc", "cidrBlock": cidr})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    vpc["id"].as_str().unwrap().to_string()
}

async fn create_subnet(router: &Router, vpc_id: &str, cidr: &str) -> (StatusCode, Value) {
    send(
        router,
        "POST",
        "/subnets",
        Some(json!({"name": "autosubnet", "cidrBlock": cidr, "vpcId": vpc_id})),
    )
    .await
}

#[tokio::test]
async fn test_health() {
    let router = router();
    create_vpc(&router, "10.0.0.0/16").await;

    let (status, body) = send(&router, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "stratus-api");
    assert_eq!(body["resources"]["vpcs"], 1);
    assert_eq!(body["resources"]["instances"], 0);
}

#[tokio::test]
async fn test_vpc_crud() {
    let router = router();
    let (status, vpc) = send(
        &router,
        "POST",
        "/vpcs",
        Some(json!({"name": "autovpc", "description": "test", "cidrBlock": "10.0.0.0/16", "tags": {"env": "dev"}})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(vpc["state"], "Active");
    assert_eq!(vpc["cidrBlock"], "10.0.0.0/16");
    assert_eq!(vpc["tags"]["env"], "dev");
    let id = vpc["id"].as_str().unwrap();
    assert!(id.starts_with("vpc-"));

    let (status, list) = send(&router, "GET", "/vpcs", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["vpcs"].as_array().unwrap().len(), 1);

    let (status, updated) = send(
        &router,
        "PUT",
        &format!("/vpcs/{id}"),
        Some(json!({"name": "renamed"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["name"], "renamed");
    assert_eq!(updated["description"], "test");

    let (status, fetched) = send(&router, "GET", &format!("/vpcs/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["name"], "renamed");

    let (status, body) = send(&router, "DELETE", &format!("/vpcs/{id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);

    let (status, body) = send(&router, "GET", &format!("/vpcs/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NotFoundError");
}

#[tokio::test]
async fn test_validation_lists_fields() {
    let router = router();
    let (status, body) = send(&router, "POST", "/vpcs", Some(json!({"description": 7}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "ValidationError");

    let fields: Vec<&str> = body["error"]["fields"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["field"].as_str().unwrap())
        .collect();
    assert_eq!(fields, ["name", "description", "cidrBlock"]);
}

#[tokio::test]
async fn test_cidr_immutable() {
    let router = router();
    let id = create_vpc(&router, "10.0.0.0/16").await;
    let (status, body) = send(
        &router,
        "PUT",
        &format!("/vpcs/{id}"),
        Some(json!({"cidrBlock": "10.1.0.0/16"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["fields"][0]["field"], "cidrBlock");
}

#[tokio::test]
async fn test_update_subnet() {
    let router = router();
    let vpc_id = create_vpc(&router, "10.0.0.0/16").await;
    let (_, subnet) = create_subnet(&router, &vpc_id, "10.0.1.0/24").await;
    let id = subnet["id"].as_str().unwrap();

    let (status, updated) = send(
        &router,
        "PUT",
        &format!("/subnets/{id}"),
        Some(json!({"name": "frontend", "tags": {"tier": "web"}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["name"], "frontend");
    assert_eq!(updated["tags"]["tier"], "web");
    assert_eq!(updated["cidrBlock"], "10.0.1.0/24");

    let (status, fetched) = send(&router, "GET", &format!("/api/v1/subnets/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["name"], "frontend");

    let (status, body) = send(&router, "PUT", "/subnets/subnet-missing", Some(json!({"name": "x"}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NotFoundError");
}

#[tokio::test]
async fn test_subnet_placement_immutable() {
    let router = router();
    let vpc_id = create_vpc(&router, "10.0.0.0/16").await;
    let other = create_vpc(&router, "10.1.0.0/16").await;
    let (_, subnet) = create_subnet(&router, &vpc_id, "10.0.1.0/24").await;
    let id = subnet["id"].as_str().unwrap();

    let (status, body) = send(
        &router,
        "PUT",
        &format!("/subnets/{id}"),
        Some(json!({"cidrBlock": "10.0.2.0/24"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["fields"][0]["field"], "cidrBlock");

    let (status, body) = send(
        &router,
        "PUT",
        &format!("/subnets/{id}"),
        Some(json!({"vpcId": other})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["fields"][0]["field"], "vpcId");

    let (_, fetched) = send(&router, "GET", &format!("/subnets/{id}"), None).await;
    assert_eq!(fetched["vpcId"], vpc_id.as_str());
    assert_eq!(fetched["cidrBlock"], "10.0.1.0/24");
}

#[tokio::test]
async fn test_subnet_overlap_conflict() {
    let router = router();
    let vpc_id = create_vpc(&router, "10.0.0.0/16").await;

    let (status, first) = create_subnet(&router, &vpc_id, "10.0.1.0/24").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["vpcId"], vpc_id.as_str());

    let (status, body) = create_subnet(&router, &vpc_id, "10.0.1.128/25").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "OverlapError");
    assert_eq!(body["error"]["conflictsWith"], first["id"]);

    let (status, body) = create_subnet(&router, &vpc_id, "192.168.0.0/24").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["fields"][0]["field"], "cidrBlock");

    let (status, body) = create_subnet(&router, "vpc-missing", "10.0.2.0/24").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NotFoundError");
}

#[tokio::test]
async fn test_delete_vpc_with_subnet() {
    let router = router();
    let vpc_id = create_vpc(&router, "10.0.0.0/16").await;
    let (_, subnet) = create_subnet(&router, &vpc_id, "10.0.1.0/24").await;

    let (status, body) = send(&router, "DELETE", &format!("/vpcs/{vpc_id}"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "DependencyError");
    assert_eq!(body["error"]["dependents"], json!([subnet["id"]]));

    let subnet_id = subnet["id"].as_str().unwrap();
    let (status, _) = send(&router, "DELETE", &format!("/subnets/{subnet_id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&router, "DELETE", &format!("/vpcs/{vpc_id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_subnet_filter() {
    let router = router();
    let a = create_vpc(&router, "10.0.0.0/16").await;
    let b = create_vpc(&router, "10.1.0.0/16").await;
    create_subnet(&router, &a, "10.0.1.0/24").await;
    create_subnet(&router, &b, "10.1.1.0/24").await;

    let (_, all) = send(&router, "GET", "/subnets", None).await;
    assert_eq!(all["subnets"].as_array().unwrap().len(), 2);

    let (status, filtered) = send(&router, "GET", &format!("/subnets?vpcId={a}"), None).await;
    assert_eq!(status, StatusCode::OK);
    let subnets = filtered["subnets"].as_array().unwrap();
    assert_eq!(subnets.len(), 1);
    assert_eq!(subnets[0]["vpcId"], a.as_str());
}

#[tokio::test]
async fn test_api_v1_mirror() {
    let router = router();
    let (status, vpc) = send(
        &router,
        "POST",
        "/api/v1/vpcs",
        Some(json!({"name": "v1", "cidrBlock": "172.16.0.0/12"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, list) = send(&router, "GET", "/vpcs", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["vpcs"][0]["id"], vpc["id"]);
}

#[tokio::test]
async fn test_launch_instance_accepted() {
    let router = router();
    let vpc_id = create_vpc(&router, "10.0.0.0/16").await;
    let (_, subnet) = create_subnet(&router, &vpc_id, "10.0.1.0/24").await;
    let (status, image) = send(
        &router,
        "POST",
        "/images",
        Some(json!({"location": "https://images.example.com/cirros.img", "operatingSystem": "cirros"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, instance) = send(
        &router,
        "POST",
        "/instances",
        Some(json!({
            "subnetId": subnet["id"],
            "imageId": image["id"],
            "instanceType": "t4.micro"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(instance["state"], "Pending");
    assert_eq!(instance["instanceType"], "t4.micro");
    assert_eq!(instance["privateIpAddress"], "10.0.1.2");
    assert_eq!(instance["vpcId"], vpc_id.as_str());

    let id = instance["id"].as_str().unwrap();
    let (status, _) = send(&router, "DELETE", &format!("/instances/{id}"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let image_id = image["id"].as_str().unwrap();
    let (status, body) = send(&router, "DELETE", &format!("/images/{image_id}"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["dependents"], json!([id]));
}

#[tokio::test]
async fn test_unknown_instance_type() {
    let router = router();
    let (status, body) = send(
        &router,
        "POST",
        "/instances",
        Some(json!({"subnetId": "subnet-1", "imageId": "image-1", "instanceType": "m5.large"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["fields"][0]["field"], "instanceType");
}

#[tokio::test]
async fn test_malformed_body() {
    let router = router();
    let request = Request::builder()
        .method("POST")
        .uri("/vpcs")
        .body(Body::from("{not json"))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"]["fields"][0]["field"], "body");
}
