use axum::http::HeaderMap;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use std::time::Duration as StdDuration;
use time::Duration;

pub const ACCESS_TOKEN_COOKIE: &str = "accessToken";
pub const REFRESH_TOKEN_COOKIE: &str = "refreshToken";

/// Create a session token cookie.
///
/// `SameSite=None` lets the separately hosted web client send it with
/// credentialed requests; browsers only honor that together with `Secure`.
pub fn token_cookie(
    name: &'static str,
    token: &str,
    ttl: StdDuration,
    secure: bool,
) -> Cookie<'static> {
    let max_age = Duration::seconds(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX));

    Cookie::build((name, token.to_string()))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::None)
        .path("/")
        .max_age(max_age)
        .build()
}

/// Create removal cookie for a session token.
pub fn clear_token_cookie(name: &'static str, secure: bool) -> Cookie<'static> {
    Cookie::build((name, ""))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::None)
        .path("/")
        .max_age(Duration::ZERO)
        .build()
}

/// Read a cookie value from raw request headers.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    CookieJar::from_headers(headers)
        .get(name)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}
