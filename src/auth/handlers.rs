use axum::{
    extract::{FromRef, State},
    http::header::{self, HeaderName},
    response::AppendHeaders,
    Json,
};
use lazy_static::lazy_static;
use regex::Regex;
use time::{Duration, OffsetDateTime};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::{
        dto::{
            AuthResponse, ForgotPasswordRequest, LoginRequest, MeResponse, MessageResponse,
            RegisterRequest, ResetPasswordRequest, VerifyEmailRequest,
        },
        jwt::{AuthUser, JwtKeys},
        password::{hash_password, verify_password, Verification},
        session::{clear_session_cookie, session_cookie},
        user::NewUser,
    },
    error::AuthError,
    state::AppState,
};

const MIN_PASSWORD_LEN: usize = 8;
const RESET_TOKEN_TTL: Duration = Duration::minutes(30);

type SetCookie = AppendHeaders<[(HeaderName, String); 1]>;

fn set_cookie(value: String) -> SetCookie {
    AppendHeaders([(header::SET_COOKIE, value)])
}

fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn check_password_policy(password: &str) -> Result<(), AuthError> {
    if password.len() < MIN_PASSWORD_LEN {
        return Err(AuthError::Validation("Password too short".into()));
    }
    Ok(())
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(mut payload): Json<RegisterRequest>,
) -> Result<(SetCookie, Json<AuthResponse>), AuthError> {
    payload.email = payload.email.trim().to_lowercase();
    let name = payload.name.trim().to_string();

    // All input checks happen before any store access.
    if name.is_empty() {
        return Err(AuthError::Validation("Name is required".into()));
    }
    if !is_valid_email(&payload.email) {
        warn!(email = %payload.email, "invalid email");
        return Err(AuthError::Validation("Invalid email".into()));
    }
    check_password_policy(&payload.password)?;

    if state.users.find_by_email(&payload.email).await?.is_some() {
        warn!(email = %payload.email, "email already registered");
        return Err(AuthError::EmailTaken);
    }

    let hash = hash_password(&payload.password)?;
    let user = state
        .users
        .create(NewUser {
            email: payload.email,
            name,
            password_hash: hash,
            verification_token: Some(Uuid::new_v4().to_string()),
        })
        .await?;

    // Persist first, sign last: no token is ever issued for a user that
    // failed to persist.
    let keys = JwtKeys::from_ref(&state);
    let (token, _expires_at) = keys.sign(user.id, &user.email)?;

    info!(user_id = user.id, email = %user.email, "user registered");
    Ok((
        set_cookie(session_cookie(&token, keys.ttl)),
        Json(AuthResponse {
            token,
            email: user.email,
            name: user.name,
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(mut payload): Json<LoginRequest>,
) -> Result<(SetCookie, Json<AuthResponse>), AuthError> {
    payload.email = payload.email.trim().to_lowercase();

    if !is_valid_email(&payload.email) {
        warn!(email = %payload.email, "invalid email");
        return Err(AuthError::Validation("Invalid email".into()));
    }

    // Unknown email and wrong password share one generic rejection so the
    // response never confirms whether an account exists.
    let user = match state.users.find_by_email(&payload.email).await? {
        Some(u) => u,
        None => {
            warn!(email = %payload.email, "login unknown email");
            return Err(AuthError::InvalidCredentials);
        }
    };

    match verify_password(&payload.password, &user.password_hash)? {
        Verification::Invalid => {
            warn!(email = %payload.email, user_id = user.id, "login invalid password");
            return Err(AuthError::InvalidCredentials);
        }
        Verification::ValidNeedsRehash => {
            // Opportunistic upgrade of a legacy hash; a failed save must not
            // fail the login.
            let mut upgraded = user.clone();
            upgraded.password_hash = hash_password(&payload.password)?;
            if let Err(e) = state.users.save(&upgraded).await {
                warn!(error = %e, user_id = user.id, "password rehash save failed");
            }
        }
        Verification::Valid => {}
    }

    let keys = JwtKeys::from_ref(&state);
    let (token, _expires_at) = keys.sign(user.id, &user.email)?;

    info!(user_id = user.id, email = %user.email, "user logged in");
    Ok((
        set_cookie(session_cookie(&token, keys.ttl)),
        Json(AuthResponse {
            token,
            email: user.email,
            name: user.name,
        }),
    ))
}

/// Sessions are stateless, so logout only tells the client to drop the
/// cookie. Always succeeds.
pub async fn logout() -> (SetCookie, Json<MessageResponse>) {
    (
        set_cookie(clear_session_cookie()),
        Json(MessageResponse {
            message: "Logged out".into(),
        }),
    )
}

/// Answers from the validated claims alone, without a store round-trip.
pub async fn me(AuthUser(claims): AuthUser) -> Json<MeResponse> {
    Json(MeResponse {
        user_id: claims.sub,
        email: claims.email,
    })
}

#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(mut payload): Json<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    payload.email = payload.email.trim().to_lowercase();

    if !is_valid_email(&payload.email) {
        return Err(AuthError::Validation("Invalid email".into()));
    }

    // The response is identical whether or not the account exists.
    if let Some(mut user) = state.users.find_by_email(&payload.email).await? {
        user.reset_token = Some(Uuid::new_v4().to_string());
        user.reset_token_expires_at = Some(OffsetDateTime::now_utc() + RESET_TOKEN_TTL);
        state.users.save(&user).await?;
        info!(user_id = user.id, "password reset token issued");
    }

    Ok(Json(MessageResponse {
        message: "If the address is registered, a reset link has been issued".into(),
    }))
}

#[instrument(skip(state, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    check_password_policy(&payload.password)?;

    let mut user = state
        .users
        .find_by_reset_token(&payload.token)
        .await?
        .ok_or(AuthError::InvalidToken)?;

    // Expiry is checked against the stored timestamp, not mere presence.
    let now = OffsetDateTime::now_utc();
    match user.reset_token_expires_at {
        Some(expires_at) if expires_at > now => {}
        _ => {
            warn!(user_id = user.id, "expired password reset token");
            return Err(AuthError::InvalidToken);
        }
    }

    user.password_hash = hash_password(&payload.password)?;
    user.reset_token = None;
    user.reset_token_expires_at = None;
    state.users.save(&user).await?;

    info!(user_id = user.id, "password reset completed");
    Ok(Json(MessageResponse {
        message: "Password updated".into(),
    }))
}

#[instrument(skip(state, payload))]
pub async fn verify_email(
    State(state): State<AppState>,
    Json(payload): Json<VerifyEmailRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    let mut user = state
        .users
        .find_by_verification_token(&payload.token)
        .await?
        .ok_or(AuthError::InvalidToken)?;

    user.email_verified = true;
    user.verification_token = None;
    state.users.save(&user).await?;

    info!(user_id = user.id, "email verified");
    Ok(Json(MessageResponse {
        message: "Email verified".into(),
    }))
}

#[instrument(skip(state))]
pub async fn delete_account(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> Result<(SetCookie, Json<MessageResponse>), AuthError> {
    state.users.delete(claims.sub).await?;
    info!(user_id = claims.sub, "account deleted");
    Ok((
        set_cookie(clear_session_cookie()),
        Json(MessageResponse {
            message: "Account deleted".into(),
        }),
    ))
}
