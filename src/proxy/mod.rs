mod forwarder;
mod websocket;

use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::{Context, Result};
use hyper::client::HttpConnector;
use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Client, Request, Response, StatusCode};
use hyper_tls::HttpsConnector;
use log::{error, info};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

use crate::endpoint::{Endpoint, Protocol};
use crate::tls::CertificateBundle;

/// Immutable per-process proxy state shared by every connection.
pub struct ProxyContext {
    pub source: Endpoint,
    pub listen_protocol: Protocol,
    pub client: Client<HttpsConnector<HttpConnector>>,
}

impl ProxyContext {
    fn new(source: Endpoint, listen_protocol: Protocol) -> Result<Self> {
        Ok(Self {
            source,
            listen_protocol,
            client: insecure_client()?,
        })
    }
}

/// Upstream client that accepts any certificate: the backend is a dev
/// server, often speaking https with a self-signed cert of its own.
fn insecure_client() -> Result<Client<HttpsConnector<HttpConnector>>> {
    let tls = native_tls::TlsConnector::builder()
        .danger_accept_invalid_certs(true)
        .danger_accept_invalid_hostnames(true)
        .build()
        .context("failed to build upstream TLS connector")?;
    let mut http = HttpConnector::new();
    http.enforce_http(false);
    let https = HttpsConnector::from((http, tokio_native_tls::TlsConnector::from(tls)));
    Ok(Client::builder().build(https))
}

/// Bind the listener described by `target` and forward everything to
/// `source` until the process is interrupted.
pub async fn run(source: Endpoint, target: Endpoint, ssl: Option<CertificateBundle>) -> Result<()> {
    let ctx = Arc::new(ProxyContext::new(source, target.protocol)?);
    let addr = resolve_bind_addr(&target).await?;

    let serve = async {
        match ssl {
            Some(bundle) => serve_https(ctx, addr, bundle).await,
            None => serve_http(ctx, addr).await,
        }
    };

    tokio::select! {
        result = serve => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted; shutting down");
            Ok(())
        }
    }
}

async fn resolve_bind_addr(target: &Endpoint) -> Result<SocketAddr> {
    tokio::net::lookup_host((target.bind_host(), target.port))
        .await
        .with_context(|| format!("failed to resolve listen address {}", target.authority()))?
        .next()
        .with_context(|| format!("listen address {} resolved to nothing", target.authority()))
}

async fn handle(
    ctx: Arc<ProxyContext>,
    client_ip: IpAddr,
    req: Request<Body>,
) -> Result<Response<Body>, Infallible> {
    match forwarder::forward(ctx, client_ip, req).await {
        Ok(response) => Ok(response),
        Err(e) => {
            error!("Request handling error from {client_ip}: {e:#}");
            Ok(Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Body::empty())
                .unwrap_or_default())
        }
    }
}

async fn serve_http(ctx: Arc<ProxyContext>, addr: SocketAddr) -> Result<()> {
    let make_svc = make_service_fn(move |conn: &AddrStream| {
        let remote_addr = conn.remote_addr().ip();
        let ctx = ctx.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                handle(ctx.clone(), remote_addr, req)
            }))
        }
    });

    let server = hyper::Server::try_bind(&addr)
        .with_context(|| format!("failed to bind {addr}"))?
        .serve(make_svc);
    info!("Listening on http://{addr} [press Control-C to exit]");
    server.await.context("proxy server error")?;
    Ok(())
}

async fn serve_https(ctx: Arc<ProxyContext>, addr: SocketAddr, ssl: CertificateBundle) -> Result<()> {
    let acceptor = TlsAcceptor::from(ssl.server_config()?);
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Listening on https://{addr} [press Control-C to exit]");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("Accept error on {addr}: {e}");
                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                continue;
            }
        };
        let acceptor = acceptor.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let tls_stream = match acceptor.accept(stream).await {
                Ok(tls_stream) => tls_stream,
                Err(e) => {
                    error!("TLS handshake failed for {peer}: {e}");
                    return;
                }
            };
            let client_ip = peer.ip();
            let service = service_fn(move |req| handle(ctx.clone(), client_ip, req));
            let mut http = hyper::server::conn::Http::new();
            http.http1_only(true);
            http.http1_keep_alive(true);
            if let Err(e) = http.serve_connection(tls_stream, service).with_upgrades().await {
                error!("HTTPS connection error from {peer}: {e}");
            }
        });
    }
}
