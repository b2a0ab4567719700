use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE, SET_COOKIE},
        HeaderMap, HeaderValue, Method, StatusCode,
    },
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use parley_shared::constants::{MAX_MESSAGE_TEXT, MIN_PASSWORD_LEN, SESSION_COOKIE};
use parley_shared::protocol::PresenceSnapshot;
use parley_shared::{Message, PublicUser, UserId};
use parley_store::{Database, StoreError, User};

use crate::auth::{
    claim_from_headers, hash_password, verify_password, AuthResolver, AuthUser, SessionTokens,
    TokenAuthResolver,
};
use crate::config::ServerConfig;
use crate::delivery::Delivery;
use crate::error::ServerError;
use crate::gateway::{ws_upgrade, Gateway, GatewaySettings};
use crate::persistence::{Db, PersistError, SqliteMessageStore};
use crate::presence::PresenceBroadcaster;
use crate::sessions::SessionStore;

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub tokens: Arc<SessionTokens>,
    pub auth: Arc<dyn AuthResolver>,
    pub sessions: Arc<SessionStore>,
    pub gateway: Arc<Gateway>,
    pub delivery: Arc<Delivery>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Wire every service around an opened database.
    pub fn new(config: ServerConfig, database: Database) -> Self {
        let signing_key = match config.session_signing_key {
            Some(seed) => SigningKey::from_bytes(&seed),
            None => {
                warn!("SESSION_SIGNING_KEY not set, sessions will not survive a restart");
                SigningKey::generate(&mut OsRng)
            }
        };

        let db = Db::new(database);
        let tokens = Arc::new(SessionTokens::new(signing_key, config.token_ttl));
        let auth: Arc<dyn AuthResolver> =
            Arc::new(TokenAuthResolver::new(Arc::clone(&tokens), db.clone()));
        let sessions = Arc::new(SessionStore::new());
        let presence = Arc::new(PresenceBroadcaster::new(Arc::clone(&sessions)));
        let gateway = Arc::new(Gateway::new(
            Arc::clone(&sessions),
            Arc::clone(&presence),
            Arc::clone(&auth),
            GatewaySettings::from(&config),
        ));
        let delivery = Arc::new(Delivery::new(
            Arc::clone(&sessions),
            Arc::new(SqliteMessageStore::new(db.clone())),
            Arc::clone(&presence),
        ));

        Self {
            db,
            tokens,
            auth,
            sessions,
            gateway,
            delivery,
            config: Arc::new(config),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/health", get(health_check))
        .route("/api/auth/signup", post(signup))
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/update-profile", put(update_profile))
        .route("/api/auth/check", get(check_auth))
        .route("/api/messages/users", get(list_users))
        .route("/api/messages/{id}", get(conversation))
        .route("/api/messages/send/{id}", post(send_message))
        .route("/api/presence", get(online_now))
        .route("/api/ws", get(ws_upgrade));

    if let Some(dir) = &state.config.static_dir {
        let index = ServeFile::new(dir.join("index.html"));
        router = router.fallback_service(ServeDir::new(dir).fallback(index));
    }

    router
        .layer(cors_layer(&state.config.cors_origin))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origin: &str) -> CorsLayer {
    let methods = [Method::GET, Method::POST, Method::PUT, Method::OPTIONS];
    match HeaderValue::from_str(origin) {
        Ok(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_credentials(true)
            .allow_methods(methods)
            .allow_headers([CONTENT_TYPE, AUTHORIZATION]),
        Err(_) => {
            warn!(origin, "Invalid CORS_ORIGIN, allowing any origin without credentials");
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(methods)
                .allow_headers(Any)
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignupRequest {
    #[serde(default)]
    full_name: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

#[derive(Deserialize)]
struct LoginRequest {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateProfileRequest {
    profile_pic: Option<String>,
}

#[derive(Deserialize)]
struct SendMessageRequest {
    text: Option<String>,
    image: Option<String>,
}

#[derive(Serialize)]
struct AuthResponse {
    #[serde(flatten)]
    user: PublicUser,
    token: String,
}

#[derive(Serialize)]
struct UserListEntry {
    #[serde(flatten)]
    user: PublicUser,
    online: bool,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ─── Auth ───

async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> Result<Response, ServerError> {
    if req.full_name.trim().is_empty() || req.email.trim().is_empty() || req.password.is_empty() {
        return Err(ServerError::BadRequest("All fields are required".into()));
    }
    if req.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ServerError::BadRequest(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    if !req.email.contains('@') {
        return Err(ServerError::BadRequest("Invalid email".into()));
    }

    let hash = hash_password(req.password).await?;
    let user = User::new(&req.email, &req.full_name, hash);
    let public = user.to_public();
    state.db.call(move |db| db.insert_user(&user)).await?;

    info!(user = %public.id, "Account created");
    session_response(&state, StatusCode::CREATED, public)
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Response, ServerError> {
    let email = req.email;
    let user = match state.db.call(move |db| db.get_user_by_email(&email)).await {
        Ok(user) => user,
        Err(PersistError::Store(StoreError::NotFound)) => {
            return Err(ServerError::InvalidCredentials)
        }
        Err(e) => return Err(e.into()),
    };

    if !verify_password(req.password, user.password_hash.clone()).await? {
        return Err(ServerError::InvalidCredentials);
    }

    info!(user = %user.id, "Logged in");
    session_response(&state, StatusCode::OK, user.to_public())
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, ServerError> {
    if let Some(claim) = claim_from_headers(&headers) {
        if let Ok(user) = state.auth.resolve(&claim).await {
            state.gateway.disconnect_user(user);
            info!(user = %user, "Logged out");
        }
    }

    let cookie = session_cookie("", 0)?;
    Ok((
        [(SET_COOKIE, cookie)],
        Json(serde_json::json!({ "message": "Logged out successfully" })),
    )
        .into_response())
}

async fn update_profile(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<PublicUser>, ServerError> {
    let pic = req
        .profile_pic
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ServerError::BadRequest("Profile pic is required".into()))?;

    let user = state
        .db
        .call(move |db| db.update_profile_pic(me, &pic))
        .await?;
    Ok(Json(user.to_public()))
}

async fn check_auth(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
) -> Result<Json<PublicUser>, ServerError> {
    let user = state.db.call(move |db| db.get_user(me)).await?;
    Ok(Json(user.to_public()))
}

fn session_response(
    state: &AppState,
    status: StatusCode,
    user: PublicUser,
) -> Result<Response, ServerError> {
    let token = state.tokens.issue(user.id);
    let cookie = session_cookie(&token, state.tokens.ttl().num_seconds())?;
    Ok((status, [(SET_COOKIE, cookie)], Json(AuthResponse { user, token })).into_response())
}

fn session_cookie(token: &str, max_age_secs: i64) -> Result<HeaderValue, ServerError> {
    HeaderValue::from_str(&format!(
        "{SESSION_COOKIE}={token}; HttpOnly; SameSite=Strict; Path=/; Max-Age={max_age_secs}"
    ))
    .map_err(|e| ServerError::Internal(format!("Bad cookie value: {e}")))
}

// ─── Messages ───

async fn list_users(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
) -> Result<Json<Vec<UserListEntry>>, ServerError> {
    let users = state.db.call(move |db| db.list_users_except(me)).await?;
    let entries = users
        .into_iter()
        .map(|user| UserListEntry {
            online: state.sessions.is_online(user.id),
            user: user.to_public(),
        })
        .collect();
    Ok(Json(entries))
}

async fn conversation(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    Path(other): Path<Uuid>,
) -> Result<Json<Vec<Message>>, ServerError> {
    let history = state
        .delivery
        .store()
        .fetch_history(me, UserId(other))
        .await?;
    Ok(Json(history))
}

async fn send_message(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    Path(receiver): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<Message>), ServerError> {
    let receiver = UserId(receiver);
    let message = Message::new(me, receiver, req.text, req.image);
    if !message.has_content() {
        return Err(ServerError::BadRequest("Message must have text or an image".into()));
    }
    if message.text.as_ref().is_some_and(|t| t.len() > MAX_MESSAGE_TEXT) {
        return Err(ServerError::BadRequest("Message text is too long".into()));
    }

    if !state.db.call(move |db| db.user_exists(receiver)).await? {
        return Err(ServerError::NotFound("User not found".into()));
    }

    state.delivery.send(&message).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn online_now(State(state): State<AppState>, _me: AuthUser) -> Json<PresenceSnapshot> {
    Json(PresenceSnapshot {
        online_identities: state.sessions.online_identities(),
    })
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
