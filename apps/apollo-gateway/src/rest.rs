use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Uri};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::Value;

use crate::app::AppState;
use crate::error::GatewayError;

#[derive(Debug, Serialize)]
pub struct OperationResponse {
    pub success: bool,
    pub operation: String,
    pub data: Value,
}

/// Routes mounted under `/api`. Discovery (`GET /api/tools`) is mounted separately.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/people/enrich", post(people_enrich))
        .route("/organizations/enrich", get(organization_enrich))
        .route("/people/search", post(people_search))
        .route("/organizations/search", post(organization_search))
        .route("/organizations/{id}/job-postings", get(organization_job_postings))
        .route("/people/{id}/email", get(person_email))
        .route("/companies/employees", post(employees_of_company))
        .route("/tools/{name}", post(call_by_name))
}

pub async fn list_tools(State(st): State<AppState>) -> Json<OperationResponse> {
    Json(OperationResponse {
        success: true,
        operation: "list_tools".to_string(),
        data: serde_json::json!({ "tools": st.tools.specs() }),
    })
}

async fn people_enrich(
    State(st): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
    body: String,
) -> Result<Json<OperationResponse>, GatewayError> {
    run(&st, &headers, &uri, "people_enrichment", parse_body(&body)?).await
}

async fn organization_enrich(
    State(st): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
    Query(q): Query<HashMap<String, String>>,
) -> Result<Json<OperationResponse>, GatewayError> {
    let mut args = serde_json::Map::new();
    if let Some(domain) = q.get("domain") {
        args.insert("domain".to_string(), Value::String(domain.clone()));
    }
    run(&st, &headers, &uri, "organization_enrichment", Value::Object(args)).await
}

async fn people_search(
    State(st): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
    body: String,
) -> Result<Json<OperationResponse>, GatewayError> {
    run(&st, &headers, &uri, "people_search", parse_body(&body)?).await
}

async fn organization_search(
    State(st): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
    body: String,
) -> Result<Json<OperationResponse>, GatewayError> {
    run(&st, &headers, &uri, "organization_search", parse_body(&body)?).await
}

async fn organization_job_postings(
    State(st): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
    Path(id): Path<String>,
) -> Result<Json<OperationResponse>, GatewayError> {
    let args = serde_json::json!({ "organization_id": id });
    run(&st, &headers, &uri, "organization_job_postings", args).await
}

async fn person_email(
    State(st): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
    Path(id): Path<String>,
) -> Result<Json<OperationResponse>, GatewayError> {
    let args = serde_json::json!({ "apollo_id": id });
    run(&st, &headers, &uri, "get_person_email", args).await
}

async fn employees_of_company(
    State(st): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
    body: String,
) -> Result<Json<OperationResponse>, GatewayError> {
    run(&st, &headers, &uri, "employees_of_company", parse_body(&body)?).await
}

async fn call_by_name(
    State(st): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
    Path(name): Path<String>,
    body: String,
) -> Result<Json<OperationResponse>, GatewayError> {
    run(&st, &headers, &uri, &name, parse_body(&body)?).await
}

/// Unknown operation, then credential, then argument checks; the backend is
/// only reached once all three pass.
async fn run(
    st: &AppState,
    headers: &HeaderMap,
    uri: &Uri,
    name: &str,
    args: Value,
) -> Result<Json<OperationResponse>, GatewayError> {
    let tool = st
        .tools
        .get(name)
        .ok_or_else(|| GatewayError::UnknownOperation(name.to_string()))?;
    let client = st.client_for(headers, uri, Some(&args))?;
    tool.validate_args(&args)?;
    let data = tool.execute(&client, args).await?;
    Ok(Json(OperationResponse {
        success: true,
        operation: tool.spec.name.to_string(),
        data,
    }))
}

fn parse_body(body: &str) -> Result<Value, GatewayError> {
    if body.trim().is_empty() {
        return Ok(Value::Object(serde_json::Map::new()));
    }
    let v: Value = serde_json::from_str(body)
        .map_err(|e| GatewayError::validation(format!("invalid JSON body: {e}"), &[]))?;
    if !v.is_object() {
        return Err(GatewayError::validation(
            "request body must be a JSON object",
            &[],
        ));
    }
    Ok(v)
}
