use actix_web::{web, HttpRequest, HttpResponse, HttpResponseBuilder, ResponseError};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth::cookies::{self, SessionCookies};
use crate::auth::service::Authenticated;
use crate::auth::tokens::AccessClaims;
use crate::db::models::Group;
use crate::error::{AppError, AuthError};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub confirm_password: String,
    pub captcha_response: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PasswordChangeRequest {
    pub current_password: String,
    pub new_password: String,
    pub confirm_password: String,
}

/// Identity exposed to clients of an authenticated session.
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    pub username: String,
    pub external_id: Uuid,
    pub groups: Vec<Group>,
}

impl From<&AccessClaims> for AuthResponse {
    fn from(claims: &AccessClaims) -> Self {
        Self {
            username: claims.username.clone(),
            external_id: claims.external_id,
            groups: claims.groups.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub username: String,
    pub external_id: Uuid,
}

/// Mount the auth routes under `/auth`.
pub fn configure(cfg: &mut web::ServiceConfig, registration_enabled: bool) {
    let mut scope = web::scope("/auth")
        .route("/", web::get().to(home))
        .route("/login", web::post().to(login))
        .route("/refresh", web::post().to(refresh))
        .route("/password", web::post().to(change_password))
        .route("/logout", web::get().to(logout))
        .route("/logout", web::post().to(logout))
        .route("/logout-all", web::get().to(logout_all))
        .route("/logout-all", web::post().to(logout_all));

    if registration_enabled {
        scope = scope.route("/register", web::post().to(register));
    }
    cfg.service(scope);
}

/// Error response that also clears the session cookies when the failure
/// ended the session.
fn failure(state: &AppState, err: AppError) -> HttpResponse {
    if err.status_code().is_server_error() {
        error!("Request failed: {}", err);
    }

    let mut response = err.to_response(state.config.debug);
    if err.is_session_failure() {
        cookies::attach(&mut response, state.cookies.cleared_cookies());
    }
    response
}

fn with_rotation(state: &AppState, authenticated: &Authenticated) -> HttpResponseBuilder {
    let mut builder = HttpResponse::Ok();
    if let Some(session) = authenticated.rotated() {
        state.cookies.set_session(&mut builder, session);
    }
    builder
}

async fn authenticate(req: &HttpRequest, state: &AppState) -> Result<Authenticated, AppError> {
    let cookies = SessionCookies::from_request(req);
    state
        .auth_service
        .authenticate(cookies.access.as_deref(), cookies.renewal.as_deref())
        .await
}

pub async fn home(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    match authenticate(&req, &state).await {
        Ok(authenticated) => {
            with_rotation(&state, &authenticated).json(AuthResponse::from(authenticated.claims()))
        }
        Err(e) => failure(&state, e),
    }
}

pub async fn login(req: web::Json<LoginRequest>, state: web::Data<AppState>) -> HttpResponse {
    info!("Received login request for username: {}", req.username);
    match state.auth_service.login(&req.username, &req.password).await {
        Ok(session) => {
            let mut builder = HttpResponse::Ok();
            state.cookies.set_session(&mut builder, &session);
            builder.json(AuthResponse::from(session.claims()))
        }
        Err(e) => {
            warn!("Login failed for username: {}: {}", req.username, e);
            failure(&state, e)
        }
    }
}

pub async fn register(req: web::Json<RegisterRequest>, state: web::Data<AppState>) -> HttpResponse {
    info!("Received registration request for username: {}", req.username);

    if let Some(captcha) = &state.captcha {
        let response = req.captcha_response.as_deref().unwrap_or_default();
        if let Err(e) = captcha.verify(response).await {
            warn!("Captcha check failed for username: {}: {}", req.username, e);
            return failure(&state, e);
        }
    }

    match state
        .auth_service
        .register(&req.username, &req.password, &req.confirm_password)
        .await
    {
        Ok(user) => HttpResponse::Created().json(RegisterResponse {
            username: user.username,
            external_id: user.external_id,
        }),
        Err(e) => {
            warn!("Registration failed for username: {}: {}", req.username, e);
            failure(&state, e)
        }
    }
}

pub async fn refresh(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    let cookies = SessionCookies::from_request(&req);
    let Some(renewal) = cookies.renewal.as_deref() else {
        return failure(&state, AuthError::MissingToken.into());
    };

    match state.auth_service.refresh(renewal).await {
        Ok(session) => {
            let mut builder = HttpResponse::Ok();
            state.cookies.set_session(&mut builder, &session);
            builder.json(AuthResponse::from(session.claims()))
        }
        Err(e) => failure(&state, e),
    }
}

pub async fn change_password(
    req: HttpRequest,
    body: web::Json<PasswordChangeRequest>,
    state: web::Data<AppState>,
) -> HttpResponse {
    let authenticated = match authenticate(&req, &state).await {
        Ok(authenticated) => authenticated,
        Err(e) => return failure(&state, e),
    };

    let result = state
        .auth_service
        .change_password(
            authenticated.claims(),
            &body.current_password,
            &body.new_password,
            &body.confirm_password,
        )
        .await;

    match result {
        Ok(reissued) => {
            let mut builder = HttpResponse::Ok();
            if let Some(session) = reissued.as_ref().or(authenticated.rotated()) {
                state.cookies.set_session(&mut builder, session);
            }
            builder.json(serde_json::json!({ "message": "Password changed" }))
        }
        Err(e) => {
            // Keep any rotation that already happened so the client is not
            // left holding a superseded renewal token.
            let mut response = failure(&state, e);
            if let Some(session) = authenticated.rotated() {
                cookies::attach(&mut response, state.cookies.session_cookies(session));
            }
            response
        }
    }
}

pub async fn logout(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    let cookies = SessionCookies::from_request(&req);
    let result = state.auth_service.logout(cookies.renewal.as_deref()).await;
    ended(&state, result, "Logged out")
}

pub async fn logout_all(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    let cookies = SessionCookies::from_request(&req);
    let result = state.auth_service.logout_all(cookies.renewal.as_deref()).await;
    ended(&state, result, "Logged out all sessions")
}

fn ended(state: &AppState, result: Result<(), AppError>, message: &str) -> HttpResponse {
    match result {
        Ok(()) => {
            let mut builder = HttpResponse::Ok();
            state.cookies.clear_session(&mut builder);
            builder.json(serde_json::json!({ "message": message }))
        }
        Err(e) => {
            let cleared = e.is_session_failure();
            let mut response = failure(state, e);
            if !cleared {
                cookies::attach(&mut response, state.cookies.cleared_cookies());
            }
            response
        }
    }
}
