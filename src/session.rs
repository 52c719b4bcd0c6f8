//! Cookies: the signed locale session and the admin token cookie.

use crate::i18n::Language;
use crate::security::{sign_value, verify_signed_value};
use axum::http::{header, HeaderMap, HeaderValue};
use cookie::{Cookie, SameSite};
use tracing::debug;

pub const LOCALE_COOKIE: &str = "locale";

/// Value of cookie `name` from the request's `Cookie` headers.
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(Cookie::split_parse)
        .filter_map(Result::ok)
        .find(|cookie| cookie.name() == name)
        .map(|cookie| cookie.value().to_string())
}

/// Locale stored in the signed session cookie. A missing or tampered cookie
/// yields `None`; the code itself is validated by the resolver.
pub fn session_locale(headers: &HeaderMap, secret: &str) -> Option<String> {
    let signed = read_cookie(headers, LOCALE_COOKIE)?;
    match verify_signed_value(secret, &signed) {
        Some(code) => Some(code.to_string()),
        None => {
            debug!("Ignoring locale cookie with a bad signature");
            None
        }
    }
}

/// `Set-Cookie` value persisting `language` for `max_age_secs`.
pub fn locale_cookie(language: Language, secret: &str, max_age_secs: i64) -> HeaderValue {
    let cookie = Cookie::build((LOCALE_COOKIE, sign_value(secret, language.code())))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(cookie::time::Duration::seconds(max_age_secs))
        .build();
    to_header(&cookie)
}

/// `Set-Cookie` value carrying the admin token.
pub fn admin_cookie(token: &str, max_age_secs: i64) -> HeaderValue {
    let cookie = Cookie::build((crate::auth::ADMIN_COOKIE, token.to_string()))
        .path("/admin")
        .http_only(true)
        .same_site(SameSite::Strict)
        .max_age(cookie::time::Duration::seconds(max_age_secs))
        .build();
    to_header(&cookie)
}

fn to_header(cookie: &Cookie<'_>) -> HeaderValue {
    // Names and hex/JWT values are plain ASCII
    HeaderValue::from_str(&cookie.to_string()).unwrap_or_else(|_| HeaderValue::from_static(""))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with(cookie_header: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_str(cookie_header).unwrap());
        headers
    }

    #[test]
    fn test_read_cookie_among_several() {
        let headers = request_with("theme=dark; admin_token=abc; locale=x");
        assert_eq!(read_cookie(&headers, "admin_token").as_deref(), Some("abc"));
        assert_eq!(read_cookie(&headers, "missing"), None);
    }

    #[test]
    fn test_locale_cookie_round_trip() {
        let set_cookie = locale_cookie(Language::LATVIAN, "secret", 3600);
        let set_cookie = set_cookie.to_str().unwrap();
        assert!(set_cookie.contains("HttpOnly"));
        assert!(set_cookie.contains("Max-Age=3600"));

        // The browser echoes back only name=value
        let pair = set_cookie.split(';').next().unwrap();
        let headers = request_with(pair);
        assert_eq!(session_locale(&headers, "secret").as_deref(), Some("lv"));
        assert_eq!(session_locale(&headers, "other-secret"), None);
    }

    #[test]
    fn test_unsigned_locale_cookie_is_ignored() {
        let headers = request_with("locale=en");
        assert_eq!(session_locale(&headers, "secret"), None);
    }

    #[test]
    fn test_admin_cookie_is_scoped() {
        let value = admin_cookie("tok", 60);
        let value = value.to_str().unwrap();
        assert!(value.starts_with("admin_token=tok"));
        assert!(value.contains("Path=/admin"));
        assert!(value.contains("SameSite=Strict"));
    }
}
