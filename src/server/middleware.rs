//! Middleware: обёртки над Handler.
//!
//! Порядок (внешний первым): recovery → logging → cors → basic_auth → routes.
//! Каждая обёртка принимает следующий Handler и возвращает новый.

use base64::Engine;
use log::{error, info, warn};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use super::{routes, ApiRequest, ApiResponse};
use crate::config::ServerConfig;
use crate::metrics;
use crate::store::Store;
use crate::util::panic_message;

pub type Handler = Arc<dyn Fn(&ApiRequest) -> ApiResponse + Send + Sync>;

const AUTH_REALM: &str = r#"Basic realm="quivermarks", charset="UTF-8""#;

static REQUEST_SEQ: AtomicU64 = AtomicU64::new(0);

/// Следующий `req-N` (счётчик на процесс, с 1).
pub fn next_request_id() -> String {
    format!("req-{}", REQUEST_SEQ.fetch_add(1, Ordering::Relaxed) + 1)
}

/// Полная цепочка для сервера поверх `store`.
pub fn build(store: Arc<Store>, cfg: &ServerConfig) -> Handler {
    let router: Handler = Arc::new(move |req: &ApiRequest| routes::route(&store, req));

    let mut h = router;
    if let Some(pw) = cfg.auth_password.clone().filter(|p| !p.is_empty()) {
        h = basic_auth(h, pw);
    }
    h = cors(h, cfg.cors_origins.clone());
    h = logging(h);
    recovery(h)
}

/// Паника в обработчике → 500 `Internal server error`.
pub fn recovery(next: Handler) -> Handler {
    Arc::new(move |req: &ApiRequest| {
        match catch_unwind(AssertUnwindSafe(|| next(req))) {
            Ok(resp) => resp,
            Err(payload) => {
                let msg = panic_message(&*payload);
                error!(
                    "panic recovered: request_id={}, method={}, path={}: {}",
                    req.request_id,
                    req.method,
                    req.path(),
                    msg
                );
                metrics::record_response(500);
                ApiResponse::error(500, "Internal server error")
            }
        }
    })
}

pub fn logging(next: Handler) -> Handler {
    Arc::new(move |req: &ApiRequest| {
        let start = Instant::now();
        metrics::record_request();
        info!(
            "request started: request_id={}, method={}, path={}, remote={}",
            req.request_id,
            req.method,
            req.path(),
            req.remote
                .map(|a| a.to_string())
                .unwrap_or_else(|| "-".to_string())
        );

        let mut resp = next(req);
        if !req.request_id.is_empty() {
            resp.set_header("X-Request-Id", &req.request_id);
        }

        metrics::record_response(resp.status);
        info!(
            "request completed: request_id={}, method={}, path={}, status={}, duration_ms={}",
            req.request_id,
            req.method,
            req.path(),
            resp.status,
            start.elapsed().as_millis()
        );
        resp
    })
}

/// CORS-заголовки; OPTIONS отвечается 204 без вызова `next`.
/// Пустой список или ["*"] — любой origin.
pub fn cors(next: Handler, origins: Vec<String>) -> Handler {
    let any = origins.is_empty() || (origins.len() == 1 && origins[0] == "*");
    Arc::new(move |req: &ApiRequest| {
        let allow_origin = if any {
            Some("*".to_string())
        } else {
            req.header("Origin")
                .filter(|o| origins.iter().any(|allowed| allowed.as_str() == *o))
                .map(str::to_string)
        };

        let mut resp = if req.method == "OPTIONS" {
            ApiResponse::new(204)
        } else {
            next(req)
        };

        if let Some(origin) = allow_origin {
            resp.set_header("Access-Control-Allow-Origin", &origin);
            resp.set_header("Access-Control-Allow-Methods", "GET, POST, PUT, DELETE, OPTIONS");
            resp.set_header("Access-Control-Allow-Headers", "Content-Type, Authorization");
            resp.set_header("Access-Control-Max-Age", "86400");
        }
        resp
    })
}

/// HTTP Basic: любое имя пользователя + настроенный пароль. /health без проверки.
pub fn basic_auth(next: Handler, password: String) -> Handler {
    Arc::new(move |req: &ApiRequest| {
        if req.path() == "/health" {
            return next(req);
        }
        match check_basic(req.header("Authorization"), &password) {
            Ok(()) => next(req),
            Err(reason) => {
                warn!(
                    "authentication failed: request_id={}, path={}: {}",
                    req.request_id,
                    req.path(),
                    reason
                );
                metrics::record_auth_failure();
                ApiResponse::error(401, "Authentication required")
                    .with_header("WWW-Authenticate", AUTH_REALM)
            }
        }
    })
}

fn check_basic(header: Option<&str>, password: &str) -> Result<(), &'static str> {
    let header = header.ok_or("missing authorization header")?;
    let encoded = header
        .strip_prefix("Basic ")
        .ok_or("invalid authorization format")?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|_| "failed to decode authorization")?;
    let decoded = String::from_utf8(decoded).map_err(|_| "invalid credentials format")?;
    let (_user, given) = decoded
        .split_once(':')
        .ok_or("invalid credentials format")?;
    if !constant_time_eq(given.as_bytes(), password.as_bytes()) {
        return Err("wrong password");
    }
    Ok(())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_handler() -> Handler {
        Arc::new(|_req: &ApiRequest| ApiResponse::json(200, &serde_json::json!({"ok": true})))
    }

    fn basic(user: &str, pw: &str) -> String {
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pw}"))
        )
    }

    #[test]
    fn recovery_turns_panic_into_500() {
        let h = recovery(Arc::new(|_req: &ApiRequest| -> ApiResponse { panic!("handler blew up") }));
        let resp = h(&ApiRequest::new("GET", "/bookmarks"));
        assert_eq!(resp.status, 500);
        assert!(String::from_utf8_lossy(&resp.body).contains("Internal server error"));
    }

    #[test]
    fn auth_checks_password_and_skips_health() {
        let h = basic_auth(ok_handler(), "s3cret".to_string());

        let resp = h(&ApiRequest::new("GET", "/bookmarks"));
        assert_eq!(resp.status, 401);
        assert_eq!(resp.header("WWW-Authenticate"), Some(AUTH_REALM));

        let wrong = ApiRequest::new("GET", "/bookmarks").with_header("Authorization", &basic("me", "nope"));
        assert_eq!(h(&wrong).status, 401);

        let garbage = ApiRequest::new("GET", "/bookmarks").with_header("Authorization", "Basic !!!");
        assert_eq!(h(&garbage).status, 401);

        let good = ApiRequest::new("GET", "/bookmarks").with_header("authorization", &basic("anyone", "s3cret"));
        assert_eq!(h(&good).status, 200);

        assert_eq!(h(&ApiRequest::new("GET", "/health")).status, 200);
    }

    #[test]
    fn cors_preflight_and_origin_match() {
        let h = cors(ok_handler(), vec!["https://a.example".to_string()]);

        let pre = ApiRequest::new("OPTIONS", "/bookmarks").with_header("Origin", "https://a.example");
        let resp = h(&pre);
        assert_eq!(resp.status, 204);
        assert_eq!(resp.header("Access-Control-Allow-Origin"), Some("https://a.example"));
        assert_eq!(resp.header("Access-Control-Max-Age"), Some("86400"));

        let other = ApiRequest::new("GET", "/bookmarks").with_header("Origin", "https://evil.example");
        let resp = h(&other);
        assert_eq!(resp.status, 200);
        assert!(resp.header("Access-Control-Allow-Origin").is_none());

        let any = cors(ok_handler(), vec!["*".to_string()]);
        let resp = any(&ApiRequest::new("GET", "/"));
        assert_eq!(resp.header("Access-Control-Allow-Origin"), Some("*"));
    }

    #[test]
    fn logging_echoes_request_id() {
        let h = logging(ok_handler());
        let id = next_request_id();
        assert!(id.starts_with("req-"));
        let resp = h(&ApiRequest::new("GET", "/x").with_request_id(id.clone()));
        assert_eq!(resp.header("X-Request-Id"), Some(id.as_str()));
    }

    #[test]
    fn constant_time_eq_basics() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }
}
