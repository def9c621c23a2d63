use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use clap::Parser;
use http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    CONTENT_TYPE,
};
use http_body_util::{BodyExt, Full, combinators::BoxBody};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use quilt::{FederationGateway, GatewayConfig, GraphQLRequest};

#[derive(Parser, Debug)]
#[command(version, about = "GraphQL federation gateway")]
struct Args {
    /// Supergraph configuration file
    #[arg(long, default_value = "./supergraph.yaml")]
    config: PathBuf,

    /// Address to listen on, overrides the configuration file
    #[arg(long)]
    listen: Option<SocketAddr>,
}

// Create a response body from a string
fn full<T: Into<Bytes>>(value: T) -> BoxBody<Bytes, hyper::Error> {
    Full::new(value.into())
        .map_err(|never| match never {})
        .boxed()
}

fn json_response(status: StatusCode, body: &Value) -> Response<BoxBody<Bytes, hyper::Error>> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .header(ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .body(full(body.to_string()))
        .unwrap_or_else(|_| internal_server_error())
}

fn errors(message: impl ToString) -> Value {
    json!({ "errors": [{ "message": message.to_string() }] })
}

async fn handle_request(
    req: Request<Incoming>,
    gateway: Arc<FederationGateway>,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, Infallible> {
    let result = match (req.method(), req.uri().path()) {
        (&Method::POST, "/graphql") => {
            let body_bytes = match req.collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(err) => {
                    return Ok(json_response(
                        StatusCode::BAD_REQUEST,
                        &errors(format!("failed to read request body: {err}")),
                    ));
                }
            };

            match serde_json::from_slice::<GraphQLRequest>(&body_bytes) {
                Ok(graphql_req) => {
                    // Dropping the request future cancels every sub-query still in flight.
                    let ctx = CancellationToken::new();
                    let _cancel_on_drop = ctx.clone().drop_guard();

                    match gateway.process_request(&ctx, graphql_req).await {
                        Ok(data) => json_response(StatusCode::OK, &json!({ "data": data })),
                        Err(err) => {
                            warn!(error = %err, "request failed");
                            json_response(StatusCode::OK, &errors(err))
                        }
                    }
                }
                Err(err) => json_response(
                    StatusCode::BAD_REQUEST,
                    &errors(format!("invalid JSON request: {err}")),
                ),
            }
        }

        (&Method::OPTIONS, _) => Response::builder()
            .header(ACCESS_CONTROL_ALLOW_ORIGIN, "*")
            .header(ACCESS_CONTROL_ALLOW_METHODS, "POST, OPTIONS")
            .header(ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type")
            .body(full(""))
            .unwrap_or_else(|_| internal_server_error()),

        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .header(ACCESS_CONTROL_ALLOW_ORIGIN, "*")
            .body(full("Not Found"))
            .unwrap_or_else(|_| internal_server_error()),
    };

    Ok(result)
}

fn internal_server_error() -> Response<BoxBody<Bytes, hyper::Error>> {
    let mut response = Response::new(full("Internal Server Error"));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}

#[derive(Clone)]
// An Executor that uses the tokio runtime.
pub struct TokioExecutor;

impl<F> hyper::rt::Executor<F> for TokioExecutor
where
    F: std::future::Future + Send + 'static,
    F::Output: Send + 'static,
{
    fn execute(&self, fut: F) {
        tokio::task::spawn(fut);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = GatewayConfig::load(&args.config)?;
    let addr = args.listen.unwrap_or(config.listen);

    let gateway = match FederationGateway::from_config(&CancellationToken::new(), &config).await {
        Ok(gateway) => Arc::new(gateway),
        Err(err) => {
            error!(error = %err, "failed to start gateway");
            return Err(err.into());
        }
    };

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "federation gateway listening on /graphql");

    loop {
        let (stream, peer) = listener.accept().await?;
        let io = TokioIo::new(stream);

        let gateway_clone = Arc::clone(&gateway);

        let executor = TokioExecutor;

        tokio::task::spawn(async move {
            let service = service_fn(move |req| {
                let gateway = gateway_clone.clone();
                handle_request(req, gateway)
            });

            match hyper_util::server::conn::auto::Builder::new(executor)
                .serve_connection(io, service)
                .await
            {
                Ok(_) => debug!(%peer, "connection closed"),
                Err(err) => warn!(%peer, error = %err, "error processing connection"),
            }
        });
    }
}
