use axum::http::HeaderMap;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::{
    auth::{require_supabase_user, SupabaseUser},
    db::db_pool,
    error::{AppError, AppResult},
    models::{ApprovalStatus, Role},
    repository::table_service::{create_row, get_row},
    state::AppState,
};

/// Per-request authorization context: who is calling and what they may see.
/// Built from the verified token plus the caller's profile row, cached for
/// a short TTL and evicted on sign-out or when an admin changes the status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Viewer {
    pub user_id: String,
    pub email: Option<String>,
    pub full_name: String,
    pub role: Role,
    pub status: ApprovalStatus,
}

impl Viewer {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Admins and approved clients may use the dashboard.
    pub fn ensure_active(&self) -> AppResult<()> {
        match (self.role, self.status) {
            (Role::Admin, _) | (Role::Client, ApprovalStatus::Approved) => Ok(()),
            (Role::Client, ApprovalStatus::Pending) => Err(AppError::Forbidden(
                "Forbidden: your account is awaiting approval.".to_string(),
            )),
            (Role::Client, ApprovalStatus::Rejected) => Err(AppError::Forbidden(
                "Forbidden: your account was not approved.".to_string(),
            )),
        }
    }

    pub fn ensure_admin(&self) -> AppResult<()> {
        if self.is_admin() {
            return Ok(());
        }
        Err(AppError::Forbidden(
            "Forbidden: admin access required.".to_string(),
        ))
    }

    /// Owner whose rows a request reads. Only admins may look at another
    /// owner's data; without an explicit owner everyone sees their own.
    pub fn owner_scope(&self, requested: Option<&str>) -> AppResult<String> {
        let requested = requested.map(str::trim).filter(|value| !value.is_empty());
        match requested {
            None => Ok(self.user_id.clone()),
            Some(owner_id) if owner_id == self.user_id || self.is_admin() => {
                Ok(owner_id.to_string())
            }
            Some(_) => Err(AppError::Forbidden(
                "Forbidden: cannot read another owner's data.".to_string(),
            )),
        }
    }

    pub fn can_read_owner(&self, owner_id: &str) -> bool {
        self.is_admin() || self.user_id == owner_id
    }

    pub fn can_write_owner(&self, owner_id: &str) -> bool {
        self.user_id == owner_id
    }

    fn from_profile(row: &Value) -> AppResult<Self> {
        let user_id = value_str(row, "id");
        if user_id.is_empty() {
            return Err(AppError::Internal("Profile row is missing an id.".to_string()));
        }
        let role = match value_str(row, "role").as_str() {
            "admin" => Role::Admin,
            _ => Role::Client,
        };
        let status = ApprovalStatus::parse(&value_str(row, "status")).unwrap_or(ApprovalStatus::Pending);
        let email = Some(value_str(row, "email")).filter(|value| !value.is_empty());

        Ok(Self {
            user_id,
            email,
            full_name: value_str(row, "full_name"),
            role,
            status,
        })
    }
}

/// Authenticates the request and resolves the caller's context.
pub async fn require_viewer(state: &AppState, headers: &HeaderMap) -> AppResult<Viewer> {
    let user = require_supabase_user(state, headers).await?;
    if let Some(viewer) = state.viewer_cache.get(&user.id).await {
        return Ok(viewer);
    }

    let viewer = load_or_create_viewer(state, &user).await?;
    state
        .viewer_cache
        .insert(user.id.clone(), viewer.clone())
        .await;
    Ok(viewer)
}

/// `require_viewer` plus the approval gate.
pub async fn require_active_viewer(state: &AppState, headers: &HeaderMap) -> AppResult<Viewer> {
    let viewer = require_viewer(state, headers).await?;
    viewer.ensure_active()?;
    Ok(viewer)
}

pub async fn require_admin(state: &AppState, headers: &HeaderMap) -> AppResult<Viewer> {
    let viewer = require_viewer(state, headers).await?;
    viewer.ensure_admin()?;
    Ok(viewer)
}

/// Drops the cached context so the next request re-reads the profile.
pub async fn end_session(state: &AppState, user_id: &str) {
    state.viewer_cache.invalidate(user_id).await;
}

async fn load_or_create_viewer(state: &AppState, user: &SupabaseUser) -> AppResult<Viewer> {
    if user.id.trim().is_empty() {
        return Err(AppError::Unauthorized(
            "Unauthorized: missing user.".to_string(),
        ));
    }
    let pool = db_pool(state)?;

    match get_row(pool, "profiles", &user.id, "id").await {
        Ok(row) => return Viewer::from_profile(&row),
        Err(AppError::NotFound(_)) => {}
        Err(error) => return Err(error),
    }

    let mut record = Map::new();
    record.insert("id".to_string(), Value::String(user.id.clone()));
    if let Some(email) = user.email.as_deref() {
        record.insert("email".to_string(), Value::String(email.to_string()));
    }
    record.insert(
        "full_name".to_string(),
        Value::String(resolve_full_name(user)),
    );
    record.insert("role".to_string(), json!(Role::Client.as_str()));
    record.insert("status".to_string(), json!(ApprovalStatus::Pending.as_str()));

    let row = match create_row(pool, "profiles", &record).await {
        Ok(row) => {
            tracing::info!(user_id = %user.id, "Created pending client profile");
            row
        }
        // Another request created the profile first.
        Err(AppError::Conflict(_)) => get_row(pool, "profiles", &user.id, "id").await?,
        Err(error) => return Err(error),
    };
    Viewer::from_profile(&row)
}

fn resolve_full_name(user: &SupabaseUser) -> String {
    let from_metadata = user
        .user_metadata
        .as_ref()
        .and_then(Value::as_object)
        .and_then(|metadata| {
            ["full_name", "name", "fullName"]
                .iter()
                .find_map(|key| metadata.get(*key).and_then(Value::as_str))
        })
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned);

    if let Some(value) = from_metadata {
        return value;
    }

    user.email
        .as_deref()
        .and_then(|email| email.split('@').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| "User".to_string())
}

fn value_str(row: &Value, key: &str) -> String {
    row.as_object()
        .and_then(|obj| obj.get(key))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_default()
}
