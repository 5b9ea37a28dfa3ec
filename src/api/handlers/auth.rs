//! Registration and login.

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::api::{client_ip, ApiResponse};
use crate::auth::{hash_password, verify_password, TokenSigner};
use crate::error::{AppError, AppResult};
use crate::models::{NewUser, PublicUser, User};
use crate::ratelimit::Bucket;
use crate::services::AppServices;

/// Account password bounds, checked before hashing.
const PASSWORD_MIN: usize = 8;
const PASSWORD_MAX: usize = 128;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub display_name: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub token: String,
    pub user: PublicUser,
}

fn check_password(password: &str) -> AppResult<()> {
    let len = password.chars().count();
    if !(PASSWORD_MIN..=PASSWORD_MAX).contains(&len) {
        return Err(AppError::Validation(format!(
            "password must be {PASSWORD_MIN}-{PASSWORD_MAX} characters"
        )));
    }
    Ok(())
}

fn auth_response(signer: &TokenSigner, user: &User) -> AppResult<AuthResponse> {
    Ok(AuthResponse {
        token: signer.issue(user)?,
        user: PublicUser::from(user),
    })
}

/// `POST /api/auth/register`
pub async fn register(
    State(services): State<AppServices>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<RegisterRequest>,
) -> AppResult<ApiResponse<AuthResponse>> {
    let ip = client_ip(&headers, addr);
    services
        .ratelimiter
        .acquire(Bucket::Register, &ip)
        .await?
        .enforce()?;

    check_password(&body.password)?;
    let new_user = NewUser::new(&body.email, &body.display_name, hash_password(&body.password)?)?;
    let user = services.repository.create_user(new_user).await?;

    tracing::info!(user_id = %user.id, "account registered");
    Ok(ApiResponse::ok(auth_response(&services.signer, &user)?))
}

/// `POST /api/auth/login`
pub async fn login(
    State(services): State<AppServices>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> AppResult<ApiResponse<AuthResponse>> {
    let ip = client_ip(&headers, addr);
    services
        .ratelimiter
        .acquire(Bucket::Login, &ip)
        .await?
        .enforce()?;

    let user = services
        .repository
        .find_user_by_email(&body.email)
        .await?
        .filter(|user| verify_password(&body.password, &user.password_hash))
        .ok_or(AppError::Unauthorized)?;

    // Only failed attempts count against the login ceiling.
    services.ratelimiter.forgive(Bucket::Login, &ip).await?;

    Ok(ApiResponse::ok(auth_response(&services.signer, &user)?))
}
