// crates/portico-rpc/src/router.rs
//
// Protocol router: decides, from request heads only, whether a request is a
// native RPC call, a REST call for the gateway, or a static asset fetch.

use http::{Request, Version};

/// Content-type prefix of native RPC requests.
pub const GRPC_CONTENT_TYPE: &str = "application/grpc";

/// Path of the API description document.
pub const SWAGGER_JSON_PATH: &str = "/swagger.json";

/// Prefix under which the documentation UI is served.
pub const SWAGGER_UI_PREFIX: &str = "/swagger-ui/";

/// Where an inbound request is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteDecision {
    NativeRpc,
    RestTranscode,
    StaticAsset,
}

/// Classify by protocol version and content type.
///
/// Only HTTP/2 requests whose content type starts with `application/grpc`
/// are native RPC; everything else goes to the gateway.
pub fn route(version: Version, content_type: Option<&str>) -> RouteDecision {
    let grpc_framed = content_type
        .map(|value| value.starts_with(GRPC_CONTENT_TYPE))
        .unwrap_or(false);
    if version == Version::HTTP_2 && grpc_framed {
        RouteDecision::NativeRpc
    } else {
        RouteDecision::RestTranscode
    }
}

/// Classify a request from its head, never touching the body.
///
/// Non-RPC requests under the documentation paths are static assets.
pub fn classify<B>(request: &Request<B>) -> RouteDecision {
    let content_type = request
        .headers()
        .get(http::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok());
    match route(request.version(), content_type) {
        RouteDecision::NativeRpc => RouteDecision::NativeRpc,
        _ if is_asset_path(request.uri().path()) => RouteDecision::StaticAsset,
        decision => decision,
    }
}

fn is_asset_path(path: &str) -> bool {
    path == SWAGGER_JSON_PATH || path.starts_with(SWAGGER_UI_PREFIX)
}
