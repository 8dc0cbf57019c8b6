//! Маршрутизация запросов к Store.
//!
//! GET    /bookmarks        — list
//! GET    /bookmarks/{id}   — get
//! POST   /bookmarks        — add   (201, {"id":n})
//! PUT    /bookmarks/{id}   — update ({"id":n})
//! DELETE /bookmarks/{id}   — delete ({"id":n})
//! GET    /health           — {"status":"healthy"}
//! GET    /metrics          — Prometheus text
//!
//! Неизвестный путь — 404, известный путь с чужим методом — 405.

use log::{error, info};
use serde_json::json;

use super::{ApiRequest, ApiResponse};
use crate::error::StoreError;
use crate::metrics::{self, StoreGauges};
use crate::record::{Bookmark, BookmarkId};
use crate::store::Store;

const ALLOW_COLLECTION: &str = "GET, POST";
const ALLOW_ITEM: &str = "GET, PUT, DELETE";
const ALLOW_GET: &str = "GET";

pub fn route(store: &Store, req: &ApiRequest) -> ApiResponse {
    let segments: Vec<&str> = req.path().split('/').filter(|s| !s.is_empty()).collect();
    let method = req.method.as_str();

    match segments.as_slice() {
        ["bookmarks"] => match method {
            "GET" => list(store),
            "POST" => create(store, req),
            _ => method_not_allowed(ALLOW_COLLECTION),
        },
        ["bookmarks", raw_id] => {
            if !matches!(method, "GET" | "PUT" | "DELETE") {
                return method_not_allowed(ALLOW_ITEM);
            }
            let Some(id) = parse_id(raw_id) else {
                return ApiResponse::error(400, "Invalid bookmark ID");
            };
            match method {
                "GET" => fetch(store, id),
                "PUT" => replace(store, id, req),
                _ => remove(store, id),
            }
        }
        ["health"] => match method {
            "GET" => ApiResponse::json(200, &json!({ "status": "healthy" })),
            _ => method_not_allowed(ALLOW_GET),
        },
        ["metrics"] => match method {
            "GET" => {
                let gauges = StoreGauges {
                    records: store.len() as u64,
                    id_counter: store.id_counter(),
                };
                ApiResponse::text(
                    200,
                    "text/plain; version=0.0.4",
                    metrics::render_prometheus(gauges),
                )
            }
            _ => method_not_allowed(ALLOW_GET),
        },
        _ => ApiResponse::error(404, "Not found"),
    }
}

// id выдаются с 1
fn parse_id(raw: &str) -> Option<BookmarkId> {
    raw.parse::<BookmarkId>().ok().filter(|id| *id > 0)
}

fn method_not_allowed(allow: &str) -> ApiResponse {
    ApiResponse::error(405, "Method not allowed").with_header("Allow", allow)
}

fn store_error(e: &StoreError) -> ApiResponse {
    match e {
        StoreError::NotFound(_) => ApiResponse::error(404, "Bookmark not found"),
        StoreError::Validation(msg) => ApiResponse::error(400, msg.clone()),
        other => {
            error!("store error: {}", other);
            ApiResponse::error(500, "Internal server error")
        }
    }
}

fn decode_body(req: &ApiRequest) -> Result<Bookmark, ApiResponse> {
    serde_json::from_slice::<Bookmark>(&req.body)
        .map_err(|_| ApiResponse::error(400, "Invalid request payload"))
}

fn list(store: &Store) -> ApiResponse {
    match serde_json::to_value(store.list()) {
        Ok(v) => ApiResponse::json(200, &v),
        Err(e) => {
            error!("encode bookmark list: {}", e);
            ApiResponse::error(500, "Internal server error")
        }
    }
}

fn fetch(store: &Store, id: BookmarkId) -> ApiResponse {
    match store.get(id) {
        Ok(b) => match serde_json::to_value(&b) {
            Ok(v) => ApiResponse::json(200, &v),
            Err(e) => {
                error!("encode bookmark {}: {}", id, e);
                ApiResponse::error(500, "Internal server error")
            }
        },
        Err(e) => store_error(&e),
    }
}

fn create(store: &Store, req: &ApiRequest) -> ApiResponse {
    let mut b = match decode_body(req) {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    if let Err(e) = b.validate() {
        return store_error(&e);
    }
    b.prepare_for_insert();
    let title = b.title.clone();
    let id = store.add(b);
    info!("bookmark added: id={}, name={:?}", id, title);
    ApiResponse::json(201, &json!({ "id": id }))
}

fn replace(store: &Store, id: BookmarkId, req: &ApiRequest) -> ApiResponse {
    let mut b = match decode_body(req) {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    if let Err(e) = b.validate() {
        return store_error(&e);
    }
    let previous = match store.get(id) {
        Ok(p) => p,
        Err(e) => return store_error(&e),
    };
    b.prepare_for_update(&previous);
    // запись могли удалить между get и update: тогда update вернёт NotFound
    if let Err(e) = store.update(id, b) {
        return store_error(&e);
    }
    info!("bookmark updated: id={}", id);
    ApiResponse::json(200, &json!({ "id": id }))
}

fn remove(store: &Store, id: BookmarkId) -> ApiResponse {
    if let Err(e) = store.delete(id) {
        return store_error(&e);
    }
    info!("bookmark deleted: id={}", id);
    ApiResponse::json(200, &json!({ "id": id }))
}
