//! services/app/src/web/rest.rs
//!
//! Contains the Axum handlers for the `/api` routes and the master definition
//! for the OpenAPI specification. Each handler forwards to the backend with the
//! caller's token and hands the backend's answer straight back.

use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use marketplace_core::domain::Validate;
use marketplace_core::{
    Category, ChatMessage, Item, ItemUpdate, NewItem, ReadReceipt, RemoteNotification,
    UserProfile,
};
use serde::Deserialize;
use tracing::info;
use utoipa::OpenApi;
use uuid::Uuid;

use crate::web::{error::ErrorBody, middleware::AccessToken, state::AppState, ApiError};

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        list_items,
        create_item,
        get_item,
        update_item,
        delete_item,
        list_categories,
        list_subcategories,
        get_user_profile,
        get_chat_history,
        list_notifications,
        mark_notifications_read,
    ),
    components(
        schemas(ErrorBody, NewItem, ItemUpdate, ReadReceipt)
    ),
    tags(
        (name = "Marketplace API", description = "Proxy routes in front of the marketplace backend.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// Query Parameters
//=========================================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemQuery {
    pub category_id: Option<i64>,
}

type ApiResult<T> = Result<T, ApiError>;

//=========================================================================================
// Items
//=========================================================================================

/// List items, optionally filtered by category.
#[utoipa::path(
    get,
    path = "/api/items",
    params(("categoryId" = Option<i64>, Query, description = "Only items in this category.")),
    responses(
        (status = 200, description = "The items"),
        (status = 401, description = "Missing or rejected bearer token", body = ErrorBody),
        (status = 500, description = "Backend failure", body = ErrorBody)
    )
)]
pub async fn list_items(
    State(state): State<Arc<AppState>>,
    Extension(AccessToken(token)): Extension<AccessToken>,
    query: Result<Query<ItemQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<Item>>> {
    let Query(query) = query?;
    let items = state.backend.list_items(&token, query.category_id).await?;
    Ok(Json(items))
}

/// Create a new listing.
#[utoipa::path(
    post,
    path = "/api/items",
    request_body = NewItem,
    responses(
        (status = 201, description = "Item created"),
        (status = 400, description = "Invalid item", body = ErrorBody),
        (status = 401, description = "Missing or rejected bearer token", body = ErrorBody)
    )
)]
pub async fn create_item(
    State(state): State<Arc<AppState>>,
    Extension(AccessToken(token)): Extension<AccessToken>,
    payload: Result<Json<NewItem>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(item) = payload?;
    item.validate()?;
    let created = state.backend.create_item(&token, &item).await?;
    info!("Created item {}", created.id);
    Ok((StatusCode::CREATED, Json(created)))
}

#[utoipa::path(
    get,
    path = "/api/items/{id}",
    params(("id" = i64, Path, description = "Item id")),
    responses(
        (status = 200, description = "The item"),
        (status = 404, description = "No such item", body = ErrorBody)
    )
)]
pub async fn get_item(
    State(state): State<Arc<AppState>>,
    Extension(AccessToken(token)): Extension<AccessToken>,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<Item>> {
    let Path(id) = id?;
    Ok(Json(state.backend.get_item(&token, id).await?))
}

#[utoipa::path(
    put,
    path = "/api/items/{id}",
    params(("id" = i64, Path, description = "Item id")),
    request_body = ItemUpdate,
    responses(
        (status = 200, description = "The updated item"),
        (status = 404, description = "No such item", body = ErrorBody)
    )
)]
pub async fn update_item(
    State(state): State<Arc<AppState>>,
    Extension(AccessToken(token)): Extension<AccessToken>,
    id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<ItemUpdate>, JsonRejection>,
) -> ApiResult<Json<Item>> {
    let Path(id) = id?;
    let Json(update) = payload?;
    Ok(Json(state.backend.update_item(&token, id, &update).await?))
}

#[utoipa::path(
    delete,
    path = "/api/items/{id}",
    params(("id" = i64, Path, description = "Item id")),
    responses(
        (status = 204, description = "Item deleted"),
        (status = 404, description = "No such item", body = ErrorBody)
    )
)]
pub async fn delete_item(
    State(state): State<Arc<AppState>>,
    Extension(AccessToken(token)): Extension<AccessToken>,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult<StatusCode> {
    let Path(id) = id?;
    state.backend.delete_item(&token, id).await?;
    info!("Deleted item {}", id);
    Ok(StatusCode::NO_CONTENT)
}

//=========================================================================================
// Categories
//=========================================================================================

#[utoipa::path(
    get,
    path = "/api/categories",
    responses((status = 200, description = "Top-level categories"))
)]
pub async fn list_categories(
    State(state): State<Arc<AppState>>,
    Extension(AccessToken(token)): Extension<AccessToken>,
) -> ApiResult<Json<Vec<Category>>> {
    Ok(Json(state.backend.list_categories(&token).await?))
}

#[utoipa::path(
    get,
    path = "/api/categories/{id}/children",
    params(("id" = i64, Path, description = "Parent category id")),
    responses((status = 200, description = "Direct subcategories"))
)]
pub async fn list_subcategories(
    State(state): State<Arc<AppState>>,
    Extension(AccessToken(token)): Extension<AccessToken>,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<Vec<Category>>> {
    let Path(id) = id?;
    Ok(Json(state.backend.list_subcategories(&token, id).await?))
}

//=========================================================================================
// Users, Chat & Notifications
//=========================================================================================

#[utoipa::path(
    get,
    path = "/api/users/{id}",
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 200, description = "The user's public profile"),
        (status = 404, description = "No such user", body = ErrorBody)
    )
)]
pub async fn get_user_profile(
    State(state): State<Arc<AppState>>,
    Extension(AccessToken(token)): Extension<AccessToken>,
    id: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Json<UserProfile>> {
    let Path(id) = id?;
    Ok(Json(state.backend.get_user_profile(&token, id).await?))
}

#[utoipa::path(
    get,
    path = "/api/conversations/{id}/messages",
    params(("id" = i64, Path, description = "Conversation id")),
    responses((status = 200, description = "Messages, oldest first"))
)]
pub async fn get_chat_history(
    State(state): State<Arc<AppState>>,
    Extension(AccessToken(token)): Extension<AccessToken>,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<Vec<ChatMessage>>> {
    let Path(id) = id?;
    Ok(Json(state.backend.get_chat_history(&token, id).await?))
}

#[utoipa::path(
    get,
    path = "/api/notifications",
    responses((status = 200, description = "The caller's notifications"))
)]
pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    Extension(AccessToken(token)): Extension<AccessToken>,
) -> ApiResult<Json<Vec<RemoteNotification>>> {
    Ok(Json(state.backend.list_notifications(&token).await?))
}

/// Mark every notification about one entity from one sender as read.
#[utoipa::path(
    post,
    path = "/api/notifications/read",
    request_body = ReadReceipt,
    responses(
        (status = 204, description = "Marked as read"),
        (status = 400, description = "Malformed receipt", body = ErrorBody)
    )
)]
pub async fn mark_notifications_read(
    State(state): State<Arc<AppState>>,
    Extension(AccessToken(token)): Extension<AccessToken>,
    payload: Result<Json<ReadReceipt>, JsonRejection>,
) -> ApiResult<StatusCode> {
    let Json(receipt) = payload?;
    state.backend.mark_notifications_read(&token, &receipt).await?;
    Ok(StatusCode::NO_CONTENT)
}
