use cookie::{Cookie, SameSite};
use time::Duration;

/// Name of the session cookie carrying the JWT.
pub const SESSION_COOKIE: &str = "access_token";

/// Builds the `Set-Cookie` value issued alongside a fresh token. The cookie
/// lives exactly as long as the token does.
pub fn session_cookie(token: &str, ttl: Duration) -> String {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Strict)
        .max_age(ttl)
        .build()
        .to_string()
}

/// Builds the `Set-Cookie` value that instructs the client to discard the
/// session cookie.
pub fn clear_session_cookie() -> String {
    Cookie::build((SESSION_COOKIE, ""))
        .path("/")
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Strict)
        .max_age(Duration::ZERO)
        .build()
        .to_string()
}
