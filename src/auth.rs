// nllb-sidecar: HMAC bearer auth (spec.md §6)
//
// Authorization: Bearer HMAC-SHA256:<unix_ts>:<hex_sig>
// sig = HMAC-SHA256(api_key, timestamp_str), hex-encoded.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::Response;

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::state::AppState;

const CLOCK_SKEW_WINDOW_S: i64 = 30;
const SCHEME_PREFIX: &str = "HMAC-SHA256:";

type HmacSha256 = Hmac<Sha256>;

/// Parses and verifies a `Bearer HMAC-SHA256:<ts>:<sig>` header value
/// against `api_key`. Returns `true` only if the timestamp is within the
/// clock skew window and the signature matches via constant-time
/// comparison.
pub fn verify_hmac_auth(header_value: &str, api_key: &[u8], now_unix: i64) -> bool {
    let Some(token) = header_value.strip_prefix("Bearer ") else {
        return false;
    };
    let Some(rest) = token.strip_prefix(SCHEME_PREFIX) else {
        return false;
    };
    let mut parts = rest.splitn(2, ':');
    let Some(ts_str) = parts.next() else {
        return false;
    };
    let Some(sig_hex) = parts.next() else {
        return false;
    };

    let Ok(ts) = ts_str.parse::<i64>() else {
        return false;
    };
    if (now_unix - ts).abs() > CLOCK_SKEW_WINDOW_S {
        return false;
    }

    let Ok(mut mac) = HmacSha256::new_from_slice(api_key) else {
        return false;
    };
    mac.update(ts_str.as_bytes());
    let expected = mac.finalize().into_bytes();
    let expected_hex = hex::encode(expected);

    constant_time_eq(expected_hex.as_bytes(), sig_hex.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// `true` if the request carries a valid bearer token for `api_key`.
/// When no API key is configured, auth is considered absent (never
/// satisfied) rather than bypassed — matching the original server,
/// which always requires `NLLB_API_KEY` to be set for the authenticated
/// surface to exist at all.
pub fn is_authenticated(headers: &HeaderMap, api_key: Option<&str>) -> bool {
    let Some(api_key) = api_key else {
        return false;
    };
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| verify_hmac_auth(v, api_key.as_bytes(), now_unix()))
        .unwrap_or(false)
}

/// Middleware for routes that always require authentication
/// (`/translate`, `/benchmark`, `DELETE /benchmark/cache`).
pub async fn require_auth(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: axum::extract::Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if is_authenticated(&headers, state.config.api_key.as_deref()) {
        Ok(next.run(request).await)
    } else {
        Err(StatusCode::UNAUTHORIZED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(api_key: &str, ts: i64) -> String {
        let mut mac = HmacSha256::new_from_slice(api_key.as_bytes()).unwrap();
        mac.update(ts.to_string().as_bytes());
        format!("Bearer HMAC-SHA256:{ts}:{}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn valid_signature_within_skew_passes() {
        let header = sign("secret", 1000);
        assert!(verify_hmac_auth(&header, b"secret", 1005));
    }

    #[test]
    fn signature_outside_skew_window_fails() {
        let header = sign("secret", 1000);
        assert!(!verify_hmac_auth(&header, b"secret", 1031));
    }

    #[test]
    fn wrong_key_fails() {
        let header = sign("secret", 1000);
        assert!(!verify_hmac_auth(&header, b"other", 1000));
    }

    #[test]
    fn malformed_header_fails() {
        assert!(!verify_hmac_auth("Bearer garbage", b"secret", 1000));
        assert!(!verify_hmac_auth("HMAC-SHA256:1000:abc", b"secret", 1000));
    }
}
