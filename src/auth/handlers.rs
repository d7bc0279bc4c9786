use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tracing::{error, instrument};

use crate::{
    auth::{
        dto::{
            AuthResponse, LoginRequest, MessageResponse, PublicUser, RefreshResponse,
            RegisterRequest, TokenRequest,
        },
        errors::AuthError,
        extractors::AuthUser,
        services::Registration,
    },
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh-token", post(refresh_token))
        .route("/auth/logout", post(logout))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/users/me", get(get_me))
}

/// Which endpoint produced an error; decides the status and the 500 wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthAction {
    Register,
    Login,
    Refresh,
    Logout,
}

impl AuthAction {
    fn failure_message(self) -> &'static str {
        match self {
            AuthAction::Register => "Registration failed",
            AuthAction::Login => "Login failed",
            AuthAction::Refresh => "Token refresh failed",
            AuthAction::Logout => "Logout failed",
        }
    }
}

/// The only place that maps session outcomes onto HTTP statuses.
#[derive(Debug)]
pub struct ApiError {
    action: AuthAction,
    error: AuthError,
}

impl ApiError {
    pub fn on(action: AuthAction) -> impl Fn(AuthError) -> ApiError {
        move |error| ApiError { action, error }
    }

    fn status_and_message(&self) -> (StatusCode, String) {
        match &self.error {
            AuthError::DuplicateAccount => (
                StatusCode::BAD_REQUEST,
                "User with this email already exists".into(),
            ),
            AuthError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AuthError::InvalidCredentials => {
                (StatusCode::UNAUTHORIZED, "Invalid credentials".into())
            }
            AuthError::MissingToken => {
                let status = if self.action == AuthAction::Refresh {
                    StatusCode::UNAUTHORIZED
                } else {
                    StatusCode::BAD_REQUEST
                };
                (status, "Refresh token required".into())
            }
            AuthError::InvalidRefreshToken => {
                (StatusCode::FORBIDDEN, "Invalid refresh token".into())
            }
            AuthError::Storage(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                self.action.failure_message().into(),
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let AuthError::Storage(e) = &self.error {
            error!(action = ?self.action, error = ?e, "auth request failed");
        }
        let (status, message) = self.status_and_message();
        (status, Json(MessageResponse { message })).into_response()
    }
}

fn join_failed(action: AuthAction) -> impl Fn(tokio::task::JoinError) -> ApiError {
    move |e| ApiError {
        action,
        error: AuthError::Storage(anyhow::Error::new(e).context("session task aborted")),
    }
}

// Register and login run on their own task: a client hanging up must not
// cancel the flow between the user insert and the ledger write.

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    payload: Option<Json<RegisterRequest>>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    let req = payload.map(|Json(p)| p).unwrap_or_default();
    let registration = Registration {
        email: req.email,
        password: req.password,
        first_name: req.first_name,
        last_name: req.last_name,
        phone: req.phone,
        instrument: req.instrument,
    };

    let sessions = state.sessions.clone();
    let session = tokio::spawn(async move { sessions.register(registration).await })
        .await
        .map_err(join_failed(AuthAction::Register))?
        .map_err(ApiError::on(AuthAction::Register))?;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            message: "User registered successfully",
            user: session.user.into(),
            access_token: session.access_token,
            refresh_token: session.refresh_token,
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    payload: Option<Json<LoginRequest>>,
) -> Result<Json<AuthResponse>, ApiError> {
    let LoginRequest { email, password } = payload.map(|Json(p)| p).unwrap_or_default();

    let sessions = state.sessions.clone();
    let session = tokio::spawn(async move { sessions.login(&email, &password).await })
        .await
        .map_err(join_failed(AuthAction::Login))?
        .map_err(ApiError::on(AuthAction::Login))?;

    Ok(Json(AuthResponse {
        message: "Login successful",
        user: session.user.into(),
        access_token: session.access_token,
        refresh_token: session.refresh_token,
    }))
}

#[instrument(skip(state, payload))]
pub async fn refresh_token(
    State(state): State<AppState>,
    payload: Option<Json<TokenRequest>>,
) -> Result<Json<RefreshResponse>, ApiError> {
    let presented = payload.and_then(|Json(p)| p.refresh_token);
    let access_token = state
        .sessions
        .refresh(presented.as_deref())
        .await
        .map_err(ApiError::on(AuthAction::Refresh))?;
    Ok(Json(RefreshResponse { access_token }))
}

#[instrument(skip(state, payload))]
pub async fn logout(
    State(state): State<AppState>,
    payload: Option<Json<TokenRequest>>,
) -> Result<Json<MessageResponse>, ApiError> {
    let presented = payload.and_then(|Json(p)| p.refresh_token);
    state
        .sessions
        .logout(presented.as_deref())
        .await
        .map_err(ApiError::on(AuthAction::Logout))?;
    Ok(Json(MessageResponse {
        message: "Logged out successfully".into(),
    }))
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<PublicUser>, (StatusCode, Json<MessageResponse>)> {
    match state.sessions.profile(user_id).await {
        Ok(Some(user)) => Ok(Json(user.into())),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Json(MessageResponse {
                message: "User not found".into(),
            }),
        )),
        Err(e) => {
            error!(error = %e, user_id = %user_id, "profile lookup failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(MessageResponse {
                    message: "Failed to load profile".into(),
                }),
            ))
        }
    }
}
