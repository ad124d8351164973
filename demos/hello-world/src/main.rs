//! Hello World behind the Moesif middleware
//!
//! Run with: MOESIF_APPLICATION_ID=<your id> cargo run -p hello-world
//!
//! Then visit: http://127.0.0.1:8080

use bytes::Bytes;
use http::{header, Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use moesif_middleware::{MoesifConfig, MoesifMiddleware};
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower::{service_fn, ServiceBuilder};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn json_response(status: StatusCode, body: serde_json::Value) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, header::HeaderValue::from_static("application/json"));
    response
}

async fn app(req: Request<Full<Bytes>>) -> Result<Response<Full<Bytes>>, Infallible> {
    let path = req.uri().path();
    let response = match path {
        "/" => json_response(StatusCode::OK, json!({"message": "Hello, World!"})),
        "/health" => Response::new(Full::new(Bytes::from_static(b"OK"))),
        _ => match path.strip_prefix("/users/").and_then(|id| id.parse::<i64>().ok()) {
            Some(id) => json_response(StatusCode::OK, json!({"id": id, "name": format!("User {id}")})),
            None => json_response(StatusCode::NOT_FOUND, json!({"error": "not found"})),
        },
    };
    Ok(response)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let moesif = MoesifMiddleware::new(MoesifConfig::from_env()?)?;

    let addr: SocketAddr = "127.0.0.1:8080".parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("Server running on http://{}", addr);

    loop {
        let (stream, remote_addr) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = tokio::signal::ctrl_c() => break,
        };

        let service = ServiceBuilder::new()
            .map_request(move |mut req: Request<Incoming>| {
                req.extensions_mut().insert(remote_addr);
                req
            })
            .layer(moesif.layer())
            .service(service_fn(app));

        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            if let Err(err) = http1::Builder::new()
                .serve_connection(io, TowerToHyperService::new(service))
                .await
            {
                error!("Connection error: {}", err);
            }
        });
    }

    info!("Shutting down, flushing queued events");
    moesif.shutdown().await;
    Ok(())
}
