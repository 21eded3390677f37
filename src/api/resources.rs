use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{optional_text, require_text, AppState, AuthUser};
use crate::domain::{NewResource, Page, Paged, Resource};
use crate::error::AppError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDto {
    pub id: i64,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub category: String,
    pub url: String,
    pub uploaded_by: i64,
    pub created_at: i64,
}

impl From<&Resource> for ResourceDto {
    fn from(r: &Resource) -> Self {
        ResourceDto {
            id: r.id,
            title: r.title.clone(),
            description: r.description.clone(),
            category: r.category.clone(),
            url: r.url.clone(),
            uploaded_by: r.uploaded_by,
            created_at: r.created_at.as_ms(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcesQuery {
    pub search: Option<String>,
    pub category: Option<String>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateResourceRequest {
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub url: String,
}

pub async fn list_resources(
    Query(params): Query<ResourcesQuery>,
    State(state): State<AppState>,
    _auth: AuthUser,
) -> Result<Json<Paged<ResourceDto>>, AppError> {
    let page = Page::new(params.page, params.page_size);
    let category = optional_text(params.category);
    let resources = state
        .repo
        .list_resources(params.search.as_deref(), category.as_deref(), page)
        .await?;
    Ok(Json(resources.map(|r| ResourceDto::from(&r))))
}

pub async fn create_resource(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<CreateResourceRequest>,
) -> Result<(StatusCode, Json<ResourceDto>), AppError> {
    auth.require_approver()?;
    let title = require_text(&body.title, "title")?;
    let url = require_text(&body.url, "url")?;
    if !(url.starts_with("https://") || url.starts_with("http://") || url.starts_with('/')) {
        return Err(AppError::BadRequest(
            "url must be an http(s) link or an absolute path".to_string(),
        ));
    }

    let resource = state
        .repo
        .insert_resource(&NewResource {
            title,
            description: optional_text(body.description),
            category: optional_text(body.category).unwrap_or_else(|| "general".to_string()),
            url,
            uploaded_by: auth.id(),
        })
        .await?;
    state
        .audit
        .record(
            auth.id(),
            "resource.create",
            "resource",
            resource.id,
            json!({ "title": resource.title, "category": resource.category }),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(ResourceDto::from(&resource))))
}

pub async fn delete_resource(
    Path(id): Path<i64>,
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<StatusCode, AppError> {
    auth.require_approver()?;
    if !state.repo.soft_delete_resource(id).await? {
        return Err(AppError::NotFound(format!("resource {} not found", id)));
    }
    state
        .audit
        .record(auth.id(), "resource.delete", "resource", id, json!({}))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
