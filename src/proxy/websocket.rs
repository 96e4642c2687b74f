use std::net::IpAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use hyper::http::Version;
use hyper::upgrade;
use hyper::{Body, Request, Response, StatusCode, header};
use log::{debug, error};

use super::ProxyContext;

/// Check if the request is a WebSocket upgrade request.
pub fn is_websocket(req: &Request<Body>) -> bool {
    let has_upgrade_ws = req
        .headers()
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);
    let has_connection_upgrade = req
        .headers()
        .get(header::CONNECTION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase().contains("upgrade"))
        .unwrap_or(false);
    has_upgrade_ws && has_connection_upgrade
}

/// Relay the WebSocket handshake to the source endpoint and, on 101,
/// bridge the two upgraded streams.
pub async fn proxy(
    ctx: Arc<ProxyContext>,
    client_ip: IpAddr,
    req: Request<Body>,
) -> Result<Response<Body>> {
    let suffix = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let upstream_uri = format!("{}{}", ctx.source, suffix);

    // Handshake request to upstream; upgrades require HTTP/1.1.
    let mut builder = Request::builder()
        .method(req.method())
        .version(Version::HTTP_11)
        .uri(&upstream_uri);
    for (name, value) in req.headers() {
        if name == header::HOST {
            continue;
        }
        builder = builder.header(name, value);
    }
    builder = builder.header(header::HOST, ctx.source.authority());

    const XFF: &str = "x-forwarded-for";
    builder = match req.headers().get(XFF).and_then(|v| v.to_str().ok()) {
        Some(existing) => builder.header(XFF, format!("{existing}, {client_ip}")),
        None => builder.header(XFF, client_ip.to_string()),
    };

    let upstream_req = builder
        .body(Body::empty())
        .context("failed to build upstream handshake request")?;
    debug!("WS handshake from {client_ip} -> {upstream_uri}");

    let upstream_res = match ctx.client.request(upstream_req).await {
        Ok(res) => res,
        Err(e) => {
            error!("WS upstream request error for {upstream_uri}: {e}");
            return Ok(Response::builder()
                .status(StatusCode::BAD_GATEWAY)
                .header("Content-Type", "text/plain")
                .body(Body::from("Bad Gateway"))?);
        }
    };

    let status = upstream_res.status();
    if status != StatusCode::SWITCHING_PROTOCOLS {
        // Handshake refused; relay the backend's answer as-is.
        debug!("WS upstream answered {status} instead of 101 for {upstream_uri}");
        return Ok(upstream_res);
    }

    // Mirror the key 101 headers back to the client.
    let mut resp_builder = Response::builder().status(StatusCode::SWITCHING_PROTOCOLS);
    for name in [
        header::UPGRADE,
        header::CONNECTION,
        header::SEC_WEBSOCKET_ACCEPT,
        header::SEC_WEBSOCKET_PROTOCOL,
        header::SEC_WEBSOCKET_EXTENSIONS,
    ] {
        if let Some(value) = upstream_res.headers().get(&name) {
            resp_builder = resp_builder.header(name, value.clone());
        }
    }
    let response = resp_builder.body(Body::empty())?;

    // Bridge the upgraded streams once both sides have switched.
    tokio::spawn(async move {
        let mut upgraded_client = match upgrade::on(req).await {
            Ok(upgraded) => upgraded,
            Err(e) => {
                error!("WS client upgrade failed for {upstream_uri}: {e}");
                return;
            }
        };
        let mut upgraded_upstream = match upgrade::on(upstream_res).await {
            Ok(upgraded) => upgraded,
            Err(e) => {
                error!("WS upstream upgrade failed for {upstream_uri}: {e}");
                return;
            }
        };
        if let Err(e) =
            tokio::io::copy_bidirectional(&mut upgraded_client, &mut upgraded_upstream).await
        {
            error!("WS tunnel IO error for {upstream_uri}: {e}");
        }
    });

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upgrade_request(upgrade: Option<&str>, connection: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri("/socket");
        if let Some(value) = upgrade {
            builder = builder.header(header::UPGRADE, value);
        }
        if let Some(value) = connection {
            builder = builder.header(header::CONNECTION, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn detects_websocket_upgrade() {
        assert!(is_websocket(&upgrade_request(
            Some("websocket"),
            Some("Upgrade")
        )));
        assert!(is_websocket(&upgrade_request(
            Some("WebSocket"),
            Some("keep-alive, Upgrade")
        )));
    }

    #[test]
    fn plain_requests_are_not_websocket() {
        assert!(!is_websocket(&upgrade_request(None, None)));
        assert!(!is_websocket(&upgrade_request(Some("websocket"), None)));
        assert!(!is_websocket(&upgrade_request(None, Some("Upgrade"))));
        assert!(!is_websocket(&upgrade_request(
            Some("h2c"),
            Some("Upgrade")
        )));
    }
}
