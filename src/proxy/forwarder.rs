use std::net::IpAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use hyper::header::{self, HeaderValue};
use hyper::{Body, HeaderMap, Request, Response, StatusCode, Uri};
use log::{debug, error};

use super::{ProxyContext, websocket};
use crate::endpoint::{Endpoint, Protocol};

/// Hop-by-hop headers, stripped before a request is replayed upstream.
const HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

const XFF: &str = "x-forwarded-for";

/// Forward one inbound request to the source endpoint. Plain-http
/// upstreams go through `hyper_reverse_proxy`; https upstreams and
/// WebSocket upgrades go through the shared client.
pub async fn forward(
    ctx: Arc<ProxyContext>,
    client_ip: IpAddr,
    req: Request<Body>,
) -> Result<Response<Body>> {
    let original_host = req
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    if websocket::is_websocket(&req) {
        return websocket::proxy(ctx, client_ip, req).await;
    }

    let mut req = req;
    set_forwarding_headers(&mut req, &ctx, original_host.as_deref())?;

    let mut response = match ctx.source.protocol {
        Protocol::Http => {
            match hyper_reverse_proxy::call(client_ip, &ctx.source.to_string(), req).await {
                Ok(response) => response,
                Err(e) => {
                    error!("Proxy error forwarding to {}: {e:?}", ctx.source);
                    return bad_gateway();
                }
            }
        }
        Protocol::Https => match forward_https(&ctx, client_ip, req).await {
            Ok(response) => response,
            Err(e) => {
                error!("Proxy error forwarding to {}: {e:#}", ctx.source);
                return bad_gateway();
            }
        },
    };

    rewrite_redirect(
        &mut response,
        &ctx.source,
        ctx.listen_protocol,
        original_host.as_deref(),
    );
    Ok(response)
}

/// Change-origin rewrite: upstream sees its own authority as Host,
/// with the original request recorded in the x-forwarded headers.
fn set_forwarding_headers(
    req: &mut Request<Body>,
    ctx: &ProxyContext,
    original_host: Option<&str>,
) -> Result<()> {
    let authority = HeaderValue::from_str(&ctx.source.authority())
        .context("source authority is not a valid header value")?;
    let headers = req.headers_mut();
    headers.insert(header::HOST, authority);
    if let Some(host) = original_host {
        if let Ok(value) = HeaderValue::from_str(host) {
            headers.insert("x-forwarded-host", value);
        }
    }
    headers.insert(
        "x-forwarded-proto",
        HeaderValue::from_static(ctx.listen_protocol.as_str()),
    );
    Ok(())
}

/// Manual replay for https upstreams, certificate checks disabled.
async fn forward_https(
    ctx: &ProxyContext,
    client_ip: IpAddr,
    mut req: Request<Body>,
) -> Result<Response<Body>> {
    let path = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let uri: Uri = format!("{}{}", ctx.source, path)
        .parse()
        .context("failed to build upstream URI")?;
    *req.uri_mut() = uri;

    for name in HOP_HEADERS {
        req.headers_mut().remove(name);
    }
    append_forwarded_for(req.headers_mut(), client_ip);

    debug!("Forwarding {} {} upstream", req.method(), req.uri());
    let mut response = ctx
        .client
        .request(req)
        .await
        .context("upstream request failed")?;
    for name in HOP_HEADERS {
        response.headers_mut().remove(name);
    }
    Ok(response)
}

fn append_forwarded_for(headers: &mut HeaderMap, client_ip: IpAddr) {
    let value = match headers.get(XFF).and_then(|v| v.to_str().ok()) {
        Some(existing) => format!("{existing}, {client_ip}"),
        None => client_ip.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(XFF, value);
    }
}

/// Point backend redirects back at the proxy: a `Location` whose
/// authority is the upstream source gets the original request's host
/// and the listener's scheme instead.
fn rewrite_redirect(
    response: &mut Response<Body>,
    source: &Endpoint,
    listen_protocol: Protocol,
    original_host: Option<&str>,
) {
    if !response.status().is_redirection() {
        return;
    }
    let Some(host) = original_host else { return };
    let Some(location) = response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
    else {
        return;
    };
    let Ok(uri) = location.parse::<Uri>() else {
        return;
    };
    let Some(authority) = uri.authority() else {
        // Relative redirects already stay on the proxy.
        return;
    };

    let port = authority.port_u16().unwrap_or_else(|| match uri.scheme_str() {
        Some("https") => Protocol::Https.default_port(),
        _ => Protocol::Http.default_port(),
    });
    if authority.host() != source.host || port != source.port {
        return;
    }

    let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("");
    let rewritten = format!("{listen_protocol}://{host}{path}");
    if let Ok(value) = HeaderValue::from_str(&rewritten) {
        response.headers_mut().insert(header::LOCATION, value);
    }
}

fn bad_gateway() -> Result<Response<Body>> {
    Ok(Response::builder()
        .status(StatusCode::BAD_GATEWAY)
        .header("Content-Type", "text/plain")
        .body(Body::from("Bad Gateway"))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> Endpoint {
        Endpoint {
            protocol: Protocol::Http,
            host: "localhost".to_string(),
            port: 51123,
        }
    }

    fn redirect(location: &str) -> Response<Body> {
        Response::builder()
            .status(StatusCode::MOVED_PERMANENTLY)
            .header(header::LOCATION, location)
            .body(Body::empty())
            .unwrap()
    }

    fn location(response: &Response<Body>) -> &str {
        response
            .headers()
            .get(header::LOCATION)
            .unwrap()
            .to_str()
            .unwrap()
    }

    #[test]
    fn rewrites_location_pointing_at_source() {
        let mut response = redirect("http://localhost:51123/login?next=/");
        rewrite_redirect(
            &mut response,
            &source(),
            Protocol::Http,
            Some("192.168.0.100:3000"),
        );
        assert_eq!(location(&response), "http://192.168.0.100:3000/login?next=/");
    }

    #[test]
    fn rewritten_scheme_follows_the_listener() {
        let mut response = redirect("http://localhost:51123/");
        rewrite_redirect(&mut response, &source(), Protocol::Https, Some("lan.dev:8443"));
        assert_eq!(location(&response), "https://lan.dev:8443/");
    }

    #[test]
    fn matches_scheme_default_port() {
        let mut response = redirect("https://backend.internal/admin");
        let source = Endpoint {
            protocol: Protocol::Https,
            host: "backend.internal".to_string(),
            port: 443,
        };
        rewrite_redirect(&mut response, &source, Protocol::Https, Some("lan.dev:8443"));
        assert_eq!(location(&response), "https://lan.dev:8443/admin");
    }

    #[test]
    fn leaves_foreign_location_alone() {
        let mut response = redirect("http://elsewhere.example:80/");
        rewrite_redirect(&mut response, &source(), Protocol::Http, Some("lan.dev:3000"));
        assert_eq!(location(&response), "http://elsewhere.example:80/");
    }

    #[test]
    fn leaves_relative_location_alone() {
        let mut response = redirect("/login");
        rewrite_redirect(&mut response, &source(), Protocol::Http, Some("lan.dev:3000"));
        assert_eq!(location(&response), "/login");
    }

    #[test]
    fn leaves_non_redirect_alone() {
        let mut response = Response::builder()
            .status(StatusCode::OK)
            .header(header::LOCATION, "http://localhost:51123/")
            .body(Body::empty())
            .unwrap();
        rewrite_redirect(&mut response, &source(), Protocol::Http, Some("lan.dev:3000"));
        assert_eq!(location(&response), "http://localhost:51123/");
    }

    #[test]
    fn forwarded_for_inserts_and_appends() {
        let mut headers = HeaderMap::new();
        let ip: IpAddr = "10.0.0.9".parse().unwrap();

        append_forwarded_for(&mut headers, ip);
        assert_eq!(headers.get(XFF).unwrap(), "10.0.0.9");

        append_forwarded_for(&mut headers, "10.0.0.10".parse().unwrap());
        assert_eq!(headers.get(XFF).unwrap(), "10.0.0.9, 10.0.0.10");
    }
}
