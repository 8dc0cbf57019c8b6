//! HTTP слой: транспорт-независимые запрос/ответ, маршруты, middleware
//! и привязка к tiny_http.
//!
//! routes/middleware работают только с ApiRequest/ApiResponse, поэтому
//! тестируются без сокетов; http.rs переводит их из/в tiny_http.

pub mod http;
pub mod middleware;
pub mod routes;

use std::net::SocketAddr;

pub use middleware::Handler;

#[derive(Debug, Clone, Default)]
pub struct ApiRequest {
    /// `req-N`, уникален в пределах процесса (выдаёт http-слой).
    pub request_id: String,
    pub method: String,
    /// Путь вместе с query, как пришёл в request line.
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub remote: Option<SocketAddr>,
}

impl ApiRequest {
    pub fn new(method: &str, url: &str) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            url: url.to_string(),
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = id.into();
        self
    }

    /// Путь без query string.
    pub fn path(&self) -> &str {
        match self.url.split_once('?') {
            Some((p, _)) => p,
            None => &self.url,
        }
    }

    /// Значение заголовка, имя без учёта регистра.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        // Value всегда сериализуется
        let body = serde_json::to_vec(value).unwrap_or_default();
        Self::new(status)
            .with_header("Content-Type", "application/json")
            .with_body(body)
    }

    /// `{"error": msg}`
    pub fn error(status: u16, msg: impl Into<String>) -> Self {
        Self::json(status, &serde_json::json!({ "error": msg.into() }))
    }

    pub fn text(status: u16, content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        Self::new(status)
            .with_header("Content-Type", content_type)
            .with_body(body)
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.set_header(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Заменить заголовок, если он уже есть.
    pub fn set_header(&mut self, name: &str, value: &str) {
        if let Some(slot) = self
            .headers
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
        {
            slot.1 = value.to_string();
        } else {
            self.headers.push((name.to_string(), value.to_string()));
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}
