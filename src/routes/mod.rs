use axum::{routing::get, Router};

use crate::state::AppState;

pub mod admin;
pub mod bookings;
pub mod dashboard;
pub mod health;
pub mod identity;
pub mod properties;

pub fn v1_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .merge(identity::router())
        .merge(properties::router())
        .merge(bookings::router())
        .merge(dashboard::router())
        .merge(admin::router())
}

#[cfg(test)]
mod tests {
    use super::v1_router;
    use crate::{
        access::Viewer,
        config::AppConfig,
        models::{ApprovalStatus, Role},
        state::AppState,
    };
    use axum::{
        body::{to_bytes, Body},
        http::{header::AUTHORIZATION, Request, StatusCode},
        Router,
    };
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const SECRET: &str = "test-secret";
    const USER_ID: &str = "550e8400-e29b-41d4-a716-446655440000";

    fn test_state() -> AppState {
        let mut config = AppConfig::from_env();
        config.supabase_db_url = None;
        config.supabase_jwt_secret = Some(SECRET.to_string());
        config.dev_auth_overrides_enabled = false;
        AppState::build(config).expect("state builds")
    }

    fn app(state: &AppState) -> Router {
        v1_router().with_state(state.clone())
    }

    fn bearer() -> String {
        let token = encode(
            &Header::default(),
            &json!({
                "sub": USER_ID,
                "aud": "authenticated",
                "exp": chrono::Utc::now().timestamp() + 600,
            }),
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .expect("token encodes");
        format!("Bearer {token}")
    }

    async fn seed_viewer(state: &AppState, role: Role, status: ApprovalStatus) {
        state
            .viewer_cache
            .insert(
                USER_ID.to_string(),
                Viewer {
                    user_id: USER_ID.to_string(),
                    email: Some("owner@example.com".to_string()),
                    full_name: "Owner".to_string(),
                    role,
                    status,
                },
            )
            .await;
    }

    async fn send(state: &AppState, method: &str, uri: &str, auth: bool) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if auth {
            request = request.header(AUTHORIZATION, bearer());
        }
        let response = app(state)
            .oneshot(request.body(Body::empty()).expect("request builds"))
            .await
            .expect("router responds");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body reads");
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn health_reports_missing_database_as_degraded() {
        let state = test_state();
        let (status, body) = send(&state, "GET", "/health", false).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], json!("degraded"));
        assert_eq!(body["db"], json!("not_configured"));
    }

    #[tokio::test]
    async fn data_routes_require_a_token() {
        let state = test_state();
        for uri in ["/dashboard/overview", "/bookings", "/properties", "/me"] {
            let (status, body) = send(&state, "GET", uri, false).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri}");
            assert_eq!(body["error"], json!("unauthorized"), "{uri}");
        }
    }

    #[tokio::test]
    async fn pending_clients_are_held_at_the_gate() {
        let state = test_state();
        seed_viewer(&state, Role::Client, ApprovalStatus::Pending).await;

        let (status, _) = send(&state, "GET", "/dashboard/overview", true).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send(&state, "GET", "/me", true).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["active"], json!(false));
        assert_eq!(body["data"]["status"], json!("pending"));
    }

    #[tokio::test]
    async fn overview_validates_period_before_touching_data() {
        let state = test_state();
        seed_viewer(&state, Role::Client, ApprovalStatus::Approved).await;

        let (status, _) = send(&state, "GET", "/dashboard/overview?period_days=0", true).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = send(&state, "GET", "/dashboard/overview?period_days=400", true).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&state, "GET", "/dashboard/overview?period_days=30", true).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn clients_cannot_widen_owner_scope_or_reach_admin_routes() {
        let state = test_state();
        seed_viewer(&state, Role::Client, ApprovalStatus::Approved).await;

        let (status, _) = send(
            &state,
            "GET",
            "/dashboard/overview?owner_id=6ba7b810-9dad-11d1-80b4-00c04fd430c8",
            true,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send(&state, "GET", "/admin/clients", true).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn static_booking_routes_win_over_id_route() {
        let state = test_state();
        seed_viewer(&state, Role::Client, ApprovalStatus::Approved).await;

        // Both reach the data layer, which is not configured here.
        let (status, _) = send(&state, "GET", "/bookings/tags", true).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        let (status, _) = send(&state, "GET", "/bookings/export.csv", true).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);

        let (status, _) = send(&state, "GET", "/bookings/not-a-uuid", true).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn sign_out_evicts_cached_context() {
        let state = test_state();
        seed_viewer(&state, Role::Admin, ApprovalStatus::Approved).await;
        assert!(state.viewer_cache.get(USER_ID).await.is_some());

        let (status, body) = send(&state, "POST", "/session/sign-out", true).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["signed_out"], json!(true));
        assert!(state.viewer_cache.get(USER_ID).await.is_none());
    }
}
