use std::convert::Infallible;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use hyper::header::{AUTHORIZATION, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{body, Body, Request, Response, Server, StatusCode};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::oneshot;

/// One request as the dispatcher saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub authorization: Option<String>,
    /// `Value::Null` when the body is not JSON.
    pub body: Value,
}

type Requests = Arc<Mutex<Vec<RecordedRequest>>>;

/// Storage dispatcher stand-in that answers every request with a fixed status
/// and body. The client under test is blocking, so the server runs on its own
/// runtime and the tests stay synchronous.
pub struct MockDispatcher {
    url: String,
    requests: Requests,
    shutdown: Option<oneshot::Sender<()>>,
    runtime: Runtime,
}

impl MockDispatcher {
    pub fn start(status: StatusCode, reply: &'static str) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .context("failed to build mock dispatcher runtime")?;
        let requests = Requests::default();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let recorded = requests.clone();
        let url = runtime.block_on(async move {
            let listener = TcpListener::bind("127.0.0.1:0")
                .await
                .context("failed to bind mock dispatcher listener")?;
            let addr = listener
                .local_addr()
                .context("failed to read mock listener address")?;
            let std_listener = listener
                .into_std()
                .context("failed to convert mock listener")?;
            std_listener
                .set_nonblocking(true)
                .context("failed to set mock listener non-blocking")?;

            let make_service = make_service_fn(move |_| {
                let recorded = recorded.clone();
                async move {
                    Ok::<_, Infallible>(service_fn(move |req| {
                        serve_request(recorded.clone(), status, reply, req)
                    }))
                }
            });

            let server = Server::from_tcp(std_listener)
                .context("failed to build mock HTTP server")?
                .serve(make_service);
            let graceful = server.with_graceful_shutdown(async move {
                shutdown_rx.await.ok();
            });
            tokio::spawn(async move {
                if let Err(err) = graceful.await {
                    eprintln!("mock dispatcher stopped: {err}");
                }
            });
            Ok::<_, anyhow::Error>(format!("http://{addr}"))
        })?;

        Ok(MockDispatcher {
            url,
            requests,
            shutdown: Some(shutdown_tx),
            runtime,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("mock dispatcher poisoned").clone()
    }
}

impl Drop for MockDispatcher {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            tx.send(()).ok();
        }
        // Let the server observe the signal before the runtime goes away.
        self.runtime.block_on(tokio::task::yield_now());
    }
}

async fn serve_request(
    requests: Requests,
    status: StatusCode,
    reply: &'static str,
    req: Request<Body>,
) -> Result<Response<Body>, Infallible> {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let authorization = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let bytes = match body::to_bytes(req.into_body()).await {
        Ok(bytes) => bytes,
        Err(err) => {
            let mut response = Response::new(Body::from(format!("failed to read body: {err}")));
            *response.status_mut() = StatusCode::BAD_REQUEST;
            return Ok(response);
        }
    };
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

    requests
        .lock()
        .expect("mock dispatcher poisoned")
        .push(RecordedRequest {
            method,
            path,
            authorization,
            body,
        });

    let mut response = Response::new(Body::from(reply));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    Ok(response)
}
