//! tiny_http glue: пул воркеров над одним Server.
//!
//! Каждый воркер крутит recv_timeout(ACCEPT_POLL) и выходит, как только
//! флаг `accepting` сброшен или Server уже освобождён. Взятый запрос
//! считается «в полёте», пока ответ не записан.
//!
//! Воркер держит Server только через Weak и поднимает его до Arc лишь на
//! время одного recv_timeout: владелец Server (Coordinator) единственный,
//! его drop закрывает listener даже при зависшем обработчике.

use anyhow::{anyhow, Result};
use log::{debug, warn};
use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tiny_http::{Header, Request, Response, Server};

use super::middleware::next_request_id;
use super::{ApiRequest, ApiResponse, Handler};
use crate::lifecycle::InFlight;
use crate::metrics;

/// Лимит тела запроса (1 MiB).
pub const MAX_BODY_BYTES: usize = 1 << 20;

const ACCEPT_POLL: Duration = Duration::from_millis(100);

pub fn bind(addr: &str) -> Result<Server> {
    Server::http(addr).map_err(|e| anyhow!("bind http at {}: {}", addr, e))
}

/// Запустить `n` воркеров. Возвращает их JoinHandle.
pub fn spawn_workers(
    server: &Arc<Server>,
    handler: Handler,
    n: usize,
    accepting: Arc<AtomicBool>,
    inflight: Arc<InFlight>,
) -> Result<Vec<JoinHandle<()>>> {
    let mut handles = Vec::with_capacity(n);
    for i in 0..n {
        let listener = Arc::downgrade(server);
        let handler = handler.clone();
        let accepting = accepting.clone();
        let inflight = inflight.clone();
        let h = thread::Builder::new()
            .name(format!("qm-http-{}", i))
            .spawn(move || worker_loop(&listener, &handler, &accepting, &inflight))
            .map_err(|e| anyhow!("spawn http worker {}: {}", i, e))?;
        handles.push(h);
    }
    Ok(handles)
}

fn worker_loop(listener: &Weak<Server>, handler: &Handler, accepting: &AtomicBool, inflight: &InFlight) {
    debug!("http worker started");
    while accepting.load(Ordering::Acquire) {
        let Some(server) = listener.upgrade() else {
            break;
        };
        let polled = server.recv_timeout(ACCEPT_POLL);
        // запрос обслуживается без strong-ссылки на Server
        drop(server);
        match polled {
            Ok(Some(rq)) => {
                let _guard = inflight.enter();
                serve_one(rq, handler);
            }
            Ok(None) => {}
            Err(e) => warn!("http recv error: {}", e),
        }
    }
    debug!("http worker stopped");
}

fn serve_one(mut rq: Request, handler: &Handler) {
    let resp = match read_request(&mut rq) {
        Ok(api) => handler(&api),
        Err(resp) => {
            metrics::record_request();
            metrics::record_response(resp.status);
            resp
        }
    };
    if let Err(e) = rq.respond(into_tiny(resp)) {
        debug!("write response: {}", e);
    }
}

fn read_request(rq: &mut Request) -> std::result::Result<ApiRequest, ApiResponse> {
    let mut body = Vec::new();
    rq.as_reader()
        .take(MAX_BODY_BYTES as u64 + 1)
        .read_to_end(&mut body)
        .map_err(|e| {
            debug!("read request body: {}", e);
            ApiResponse::error(400, "Invalid request payload")
        })?;
    if body.len() > MAX_BODY_BYTES {
        warn!("request body over {} bytes rejected: {}", MAX_BODY_BYTES, rq.url());
        return Err(ApiResponse::error(413, "Request body too large"));
    }

    Ok(ApiRequest {
        request_id: next_request_id(),
        method: rq.method().as_str().to_ascii_uppercase(),
        url: rq.url().to_string(),
        headers: rq
            .headers()
            .iter()
            .map(|h| (h.field.to_string(), h.value.to_string()))
            .collect(),
        body,
        remote: rq.remote_addr().copied(),
    })
}

fn into_tiny(resp: ApiResponse) -> Response<Cursor<Vec<u8>>> {
    let mut out = Response::from_data(resp.body).with_status_code(resp.status);
    for (k, v) in &resp.headers {
        match Header::from_bytes(k.as_bytes(), v.as_bytes()) {
            Ok(h) => out.add_header(h),
            Err(()) => warn!("dropping invalid response header {:?}", k),
        }
    }
    out
}
