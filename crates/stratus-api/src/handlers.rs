//! Route handlers.
//!
//! Every handler shares one [`LifecycleManager`] through axum state and
//! returns [`ApiError`] on failure.

use crate::error::ApiError;
use crate::types::{
    parse_create_image, parse_create_instance, parse_create_subnet, parse_create_vpc,
    parse_update_subnet, parse_update_vpc, HealthResponse, ImageList, InstanceFilter,
    InstanceList, SubnetFilter, SubnetList, VpcList,
};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use stratus_core::{Image, Instance, LifecycleManager, ResourceId, Subnet, Vpc};

pub type AppState = Arc<LifecycleManager>;

type ApiResult<T> = Result<T, ApiError>;

// ============================================================================
// Health
// ============================================================================

pub async fn health(State(manager): State<AppState>) -> Json<HealthResponse> {
    tracing::trace!("Health check request");
    let resources = manager
        .counts()
        .into_iter()
        .map(|(kind, count)| (kind.plural(), count))
        .collect();
    Json(HealthResponse {
        status: "healthy",
        service: "stratus-api",
        resources,
    })
}

// ============================================================================
// VPCs
// ============================================================================

pub async fn create_vpc(
    State(manager): State<AppState>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Vpc>)> {
    let params = parse_create_vpc(&body)?;
    let vpc = manager.create_vpc(params).await?;
    Ok((StatusCode::CREATED, Json(vpc)))
}

pub async fn list_vpcs(State(manager): State<AppState>) -> Json<VpcList> {
    Json(VpcList {
        vpcs: manager.list_vpcs().collect(),
    })
}

pub async fn get_vpc(
    State(manager): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vpc>> {
    Ok(Json(manager.get_vpc(&ResourceId::from(id))?))
}

pub async fn update_vpc(
    State(manager): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Vpc>> {
    let update = parse_update_vpc(&body)?;
    Ok(Json(manager.update_vpc(&ResourceId::from(id), update).await?))
}

pub async fn delete_vpc(
    State(manager): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    manager.delete_vpc(&ResourceId::from(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Subnets
// ============================================================================

pub async fn create_subnet(
    State(manager): State<AppState>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Subnet>)> {
    let params = parse_create_subnet(&body)?;
    let subnet = manager.create_subnet(params).await?;
    Ok((StatusCode::CREATED, Json(subnet)))
}

pub async fn list_subnets(
    State(manager): State<AppState>,
    Query(filter): Query<SubnetFilter>,
) -> Json<SubnetList> {
    let vpc_id = filter.vpc_id.map(ResourceId::from);
    Json(SubnetList {
        subnets: manager.list_subnets(vpc_id).collect(),
    })
}

pub async fn get_subnet(
    State(manager): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Subnet>> {
    Ok(Json(manager.get_subnet(&ResourceId::from(id))?))
}

pub async fn update_subnet(
    State(manager): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Subnet>> {
    let update = parse_update_subnet(&body)?;
    Ok(Json(manager.update_subnet(&ResourceId::from(id), update).await?))
}

pub async fn delete_subnet(
    State(manager): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    manager.delete_subnet(&ResourceId::from(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Images
// ============================================================================

pub async fn create_image(
    State(manager): State<AppState>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Image>)> {
    let params = parse_create_image(&body)?;
    let image = manager.create_image(params).await?;
    Ok((StatusCode::CREATED, Json(image)))
}

pub async fn list_images(State(manager): State<AppState>) -> Json<ImageList> {
    Json(ImageList {
        images: manager.list_images().collect(),
    })
}

pub async fn get_image(
    State(manager): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Image>> {
    Ok(Json(manager.get_image(&ResourceId::from(id))?))
}

pub async fn delete_image(
    State(manager): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    manager.delete_image(&ResourceId::from(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Instances
// ============================================================================

/// Launch is asynchronous: the record comes back `Pending` with `202`.
pub async fn create_instance(
    State(manager): State<AppState>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let params = parse_create_instance(&body)?;
    let instance = manager.create_instance(params).await?;
    Ok((StatusCode::ACCEPTED, Json(instance)))
}

pub async fn list_instances(
    State(manager): State<AppState>,
    Query(filter): Query<InstanceFilter>,
) -> Json<InstanceList> {
    let subnet_id = filter.subnet_id.map(ResourceId::from);
    Json(InstanceList {
        instances: manager.list_instances(subnet_id).collect(),
    })
}

pub async fn get_instance(
    State(manager): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Instance>> {
    Ok(Json(manager.get_instance(&ResourceId::from(id))?))
}

pub async fn delete_instance(
    State(manager): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    manager.delete_instance(&ResourceId::from(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}
