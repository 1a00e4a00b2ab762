// crates/portico-rpc/src/gateway.rs
//
// REST-to-RPC transcoding gateway.
//
// A static route table maps `{verb, path pattern}` onto an RPC method, its
// call shape, and a body binding. Each matched request becomes a `Call`
// carrying forwarded headers, a deadline, and a cancellation token, and is
// issued through an `Invoker`: a TLS `RpcClient` in production, the
// in-process `RpcCore` in tests.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{header, HeaderMap, HeaderValue, Method, Request, Response, StatusCode};
use http_body::Body as HttpBody;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use portico_core::call::{collect_stream, stream_from_iter, Call, CallShape};
use portico_core::error::{ErrorKind, RpcError};
use portico_core::metadata::{self, Metadata};
use portico_core::traits::Invoker;

use crate::convert;
use crate::handlers::{echo, greet, math, user};

/// Header prefix for arbitrary metadata forwarded by REST callers.
pub const METADATA_HEADER_PREFIX: &str = "grpc-metadata-";

/// Body binding that makes the whole JSON body the request message.
pub const BIND_WHOLE_BODY: &str = "*";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Gateway limits, forwarding rules, and route table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Largest accepted request body.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Cap on messages per client- or server-streaming REST call.
    #[serde(default = "default_max_stream_messages")]
    pub max_stream_messages: usize,
    /// Deadline applied when the caller sends no `grpc-timeout`.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    /// Request headers copied into call metadata.
    #[serde(default = "default_forward_headers")]
    pub forward_headers: Vec<String>,
    #[serde(default = "default_routes")]
    pub routes: Vec<RestBinding>,
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

fn default_max_stream_messages() -> usize {
    1024
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_forward_headers() -> Vec<String> {
    vec![
        metadata::AUTHORIZATION.to_string(),
        metadata::REQUEST_ID.to_string(),
        metadata::GRPC_TIMEOUT.to_string(),
    ]
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: default_max_body_bytes(),
            max_stream_messages: default_max_stream_messages(),
            default_timeout_ms: default_timeout_ms(),
            forward_headers: default_forward_headers(),
            routes: default_routes(),
        }
    }
}

impl GatewayConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

/// One REST route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestBinding {
    /// HTTP verb, e.g. `GET`.
    pub verb: String,
    /// Path pattern with `{field}` segments, e.g. `/v1/users/{username}`.
    pub path: String,
    /// Fully qualified RPC method path.
    pub method: String,
    #[serde(default = "default_shape")]
    pub shape: CallShape,
    /// `None` ignores the body, `"*"` binds the whole body, anything else
    /// names the field the body is placed under.
    #[serde(default)]
    pub body: Option<String>,
}

fn default_shape() -> CallShape {
    CallShape::Unary
}

impl RestBinding {
    pub fn new(verb: &str, path: &str, method: &str) -> Self {
        Self {
            verb: verb.to_string(),
            path: path.to_string(),
            method: method.to_string(),
            shape: CallShape::Unary,
            body: None,
        }
    }

    pub fn shape(mut self, shape: CallShape) -> Self {
        self.shape = shape;
        self
    }

    pub fn body(mut self, binding: &str) -> Self {
        self.body = Some(binding.to_string());
        self
    }
}

/// Routes shipped for the bundled services.
pub fn default_routes() -> Vec<RestBinding> {
    vec![
        RestBinding::new("POST", "/v1/echo", echo::UNARY_ECHO).body(BIND_WHOLE_BODY),
        RestBinding::new("POST", "/v1/echo/server-stream", echo::SERVER_STREAMING_ECHO)
            .shape(CallShape::ServerStreaming)
            .body(BIND_WHOLE_BODY),
        RestBinding::new("POST", "/v1/echo/client-stream", echo::CLIENT_STREAMING_ECHO)
            .shape(CallShape::ClientStreaming)
            .body(BIND_WHOLE_BODY),
        RestBinding::new("GET", "/v1/echo/{message}", echo::UNARY_ECHO),
        RestBinding::new("POST", "/v1/math/sum", math::SUM).body(BIND_WHOLE_BODY),
        RestBinding::new("GET", "/v1/math/prime-factors/{num}", math::PRIME_FACTORS)
            .shape(CallShape::ServerStreaming),
        RestBinding::new("POST", "/v1/math/average", math::AVERAGE)
            .shape(CallShape::ClientStreaming)
            .body(BIND_WHOLE_BODY),
        RestBinding::new("POST", "/v1/greeter/hello", greet::SAY_HELLO).body(BIND_WHOLE_BODY),
        RestBinding::new("GET", "/v1/greeter/hello/{name}", greet::SAY_HELLO),
        RestBinding::new("POST", "/v1/users", user::CREATE).body("user"),
        RestBinding::new("GET", "/v1/users/{username}", user::GET),
    ]
}

/// A route table entry that cannot be served.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("invalid HTTP verb {0:?}")]
    InvalidVerb(String),

    #[error("invalid path pattern {0:?}: {1}")]
    InvalidPath(String, String),

    #[error("{0}: bidirectional streaming is not supported over REST")]
    UnsupportedShape(String),
}

// ---------------------------------------------------------------------------
// Route matching
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Field(String),
}

#[derive(Debug, Clone)]
struct CompiledRoute {
    verb: Method,
    segments: Vec<Segment>,
    binding: RestBinding,
}

impl CompiledRoute {
    fn compile(binding: RestBinding) -> Result<Self, RouteError> {
        let verb = Method::from_bytes(binding.verb.to_ascii_uppercase().as_bytes())
            .map_err(|_| RouteError::InvalidVerb(binding.verb.clone()))?;
        if binding.shape == CallShape::Bidirectional {
            return Err(RouteError::UnsupportedShape(binding.method.clone()));
        }
        if !binding.path.starts_with('/') {
            return Err(RouteError::InvalidPath(
                binding.path.clone(),
                "must start with '/'".to_string(),
            ));
        }

        let mut segments = Vec::new();
        for part in split_path(&binding.path) {
            let segment = match part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                Some("") => {
                    return Err(RouteError::InvalidPath(
                        binding.path.clone(),
                        "empty field name".to_string(),
                    ))
                }
                Some(field) => Segment::Field(field.to_string()),
                None if part.contains('{') || part.contains('}') => {
                    return Err(RouteError::InvalidPath(
                        binding.path.clone(),
                        format!("unbalanced braces in segment {:?}", part),
                    ))
                }
                None => Segment::Literal(part.to_string()),
            };
            segments.push(segment);
        }

        Ok(Self {
            verb,
            segments,
            binding,
        })
    }

    /// Match a request, returning the captured path fields still
    /// percent-encoded.
    fn matches(&self, verb: &Method, path: &str) -> Option<Vec<(String, String)>> {
        if *verb != self.verb {
            return None;
        }
        let parts: Vec<&str> = split_path(path).collect();
        if parts.len() != self.segments.len() {
            return None;
        }
        let mut captured = Vec::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(literal) if literal == part => {}
                Segment::Literal(_) => return None,
                Segment::Field(field) => {
                    captured.push((field.clone(), part.to_string()));
                }
            }
        }
        Some(captured)
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|part| !part.is_empty())
}

/// Decode `%XX` escapes; `+` becomes a space in query strings.
fn percent_decode(input: &str, plus_as_space: bool) -> Option<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = input.get(i + 1..i + 3)?;
                if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
                    return None;
                }
                out.push(u8::from_str_radix(hex, 16).ok()?);
                i += 3;
            }
            b'+' if plus_as_space => {
                out.push(b' ');
                i += 1;
            }
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }
    String::from_utf8(out).ok()
}

fn decode_path_fields(fields: Vec<(String, String)>) -> Result<Vec<(String, String)>, RpcError> {
    fields
        .into_iter()
        .map(|(field, raw)| match percent_decode(&raw, false) {
            Some(value) => Ok((field, value)),
            None => Err(RpcError::InvalidArgument(format!(
                "malformed path parameter {:?}",
                raw
            ))),
        })
        .collect()
}

fn parse_query(query: Option<&str>) -> Result<Vec<(String, String)>, RpcError> {
    let Some(query) = query else {
        return Ok(Vec::new());
    };
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            match (percent_decode(key, true), percent_decode(value, true)) {
                (Some(key), Some(value)) => Ok((key, value)),
                _ => Err(RpcError::InvalidArgument(format!(
                    "malformed query parameter {:?}",
                    pair
                ))),
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Message binding
// ---------------------------------------------------------------------------

/// Set a string field, following dotted paths into nested objects.
fn set_field(message: &mut Value, path: &str, value: String) -> Result<(), RpcError> {
    let mut current = message;
    let mut parts = path.split('.').peekable();
    while let Some(part) = parts.next() {
        if current.is_null() {
            *current = Value::Object(Map::new());
        }
        let Value::Object(object) = current else {
            return Err(RpcError::InvalidArgument(format!(
                "cannot bind field {:?} into a non-object message",
                path
            )));
        };
        if parts.peek().is_none() {
            object.insert(part.to_string(), Value::String(value));
            return Ok(());
        }
        current = object.entry(part.to_string()).or_insert(Value::Null);
    }
    Ok(())
}

fn parse_json(body: &[u8]) -> Result<Option<Value>, RpcError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(body)
        .map(Some)
        .map_err(|e| RpcError::InvalidArgument(format!("failed to parse JSON body: {}", e)))
}

/// Build one request message from a body value plus path and query fields.
///
/// Path fields win over query fields; query parameters are ignored when the
/// whole body is the message.
fn bind_message(
    binding: Option<&str>,
    body: Option<Value>,
    path_fields: &[(String, String)],
    query: &[(String, String)],
) -> Result<Value, RpcError> {
    let mut message = match (binding, body) {
        (None, _) | (Some(_), None) => Value::Object(Map::new()),
        (Some(BIND_WHOLE_BODY), Some(body)) => body,
        (Some(field), Some(body)) => {
            let mut message = Value::Object(Map::new());
            if let Value::Object(object) = &mut message {
                object.insert(field.to_string(), body);
            }
            message
        }
    };

    if binding != Some(BIND_WHOLE_BODY) {
        for (key, value) in query {
            set_field(&mut message, key, value.clone())?;
        }
    }
    for (key, value) in path_fields {
        set_field(&mut message, key, value.clone())?;
    }
    Ok(message)
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// Why a REST request was refused.
#[derive(Debug)]
enum Rejection {
    NoRoute(Method, String),
    BodyTooLarge(usize),
    Rpc(RpcError),
}

impl From<RpcError> for Rejection {
    fn from(e: RpcError) -> Self {
        Rejection::Rpc(e)
    }
}

/// REST front door for an RPC endpoint.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    config: GatewayConfig,
    routes: Vec<CompiledRoute>,
    upstream: Arc<dyn Invoker>,
}

impl Gateway {
    /// Compile the route table and bind it to an upstream invoker.
    pub fn new(config: GatewayConfig, upstream: Arc<dyn Invoker>) -> Result<Self, RouteError> {
        let routes = config
            .routes
            .iter()
            .cloned()
            .map(CompiledRoute::compile)
            .collect::<Result<Vec<_>, _>>()?;
        tracing::debug!("Gateway compiled {} REST routes", routes.len());
        Ok(Self {
            inner: Arc::new(GatewayInner {
                config,
                routes,
                upstream,
            }),
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    pub fn routes(&self) -> impl Iterator<Item = &RestBinding> {
        self.inner.routes.iter().map(|route| &route.binding)
    }

    /// Transcode one REST request into an RPC call and its reply into JSON.
    pub async fn handle<B>(&self, request: Request<B>) -> Response<Full<Bytes>>
    where
        B: HttpBody,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        match self.transcode(request).await {
            Ok(value) => json_response(StatusCode::OK, &value),
            Err(rejection) => {
                tracing::debug!("Gateway request refused: {:?}", rejection);
                rejection_response(rejection)
            }
        }
    }

    async fn transcode<B>(&self, request: Request<B>) -> Result<Value, Rejection>
    where
        B: HttpBody,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let (parts, body) = request.into_parts();
        let path = parts.uri.path();
        let (route, raw_fields) = self
            .inner
            .routes
            .iter()
            .find_map(|route| route.matches(&parts.method, path).map(|fields| (route, fields)))
            .ok_or_else(|| Rejection::NoRoute(parts.method.clone(), path.to_string()))?;
        let binding = &route.binding;
        let path_fields = decode_path_fields(raw_fields)?;

        let metadata = self.forwarded_metadata(&parts.headers);
        let timeout = match parts.headers.get(metadata::GRPC_TIMEOUT) {
            Some(value) => value
                .to_str()
                .ok()
                .and_then(metadata::parse_grpc_timeout)
                .ok_or_else(|| {
                    RpcError::InvalidArgument("invalid grpc-timeout header".to_string())
                })?,
            None => self.inner.config.default_timeout(),
        };
        let query = parse_query(parts.uri.query())?;
        let body = read_body(body, self.inner.config.max_body_bytes).await?;
        let body = match binding.body {
            Some(_) => parse_json(&body)?,
            None => None,
        };

        let call = match binding.shape {
            CallShape::ServerStreaming => Call::server_streaming(
                binding.method.clone(),
                bind_message(binding.body.as_deref(), body, &path_fields, &query)?,
            ),
            CallShape::ClientStreaming => {
                let elements = match body {
                    Some(Value::Array(elements)) => elements,
                    None => Vec::new(),
                    Some(_) => {
                        return Err(RpcError::InvalidArgument(
                            "client-streaming body must be a JSON array".to_string(),
                        )
                        .into())
                    }
                };
                if elements.len() > self.inner.config.max_stream_messages {
                    return Err(RpcError::ResourceExhausted(format!(
                        "request stream exceeded {} messages",
                        self.inner.config.max_stream_messages
                    ))
                    .into());
                }
                let messages = elements
                    .into_iter()
                    .map(|element| {
                        bind_message(binding.body.as_deref(), Some(element), &path_fields, &query)
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Call::client_streaming(binding.method.clone(), stream_from_iter(messages))
            }
            _ => Call::unary(
                binding.method.clone(),
                bind_message(binding.body.as_deref(), body, &path_fields, &query)?,
            ),
        };

        // Dropping this future (client went away) cancels the outbound call.
        let cancel = CancellationToken::new();
        let _cancel_on_drop = cancel.clone().drop_guard();
        let call = call
            .with_metadata(metadata)
            .with_timeout(timeout)
            .with_cancel(cancel);

        let reply = self.inner.upstream.invoke(call).await?;
        let value = if binding.shape.server_streams() {
            let messages = collect_stream(
                reply.into_stream(),
                Some(self.inner.config.max_stream_messages),
            )
            .await?;
            Value::Array(messages)
        } else {
            reply.into_unary()?
        };
        Ok(value)
    }

    /// Copy allow-listed headers and `grpc-metadata-*` headers into metadata.
    /// `grpc-timeout` becomes the call deadline instead.
    fn forwarded_metadata(&self, headers: &HeaderMap) -> Metadata {
        let mut metadata = Metadata::new();
        for name in &self.inner.config.forward_headers {
            if name.eq_ignore_ascii_case(metadata::GRPC_TIMEOUT) {
                continue;
            }
            for value in headers.get_all(name.as_str()) {
                if let Ok(value) = value.to_str() {
                    metadata.append(name, value);
                }
            }
        }
        for (name, value) in headers {
            let Some(key) = name.as_str().strip_prefix(METADATA_HEADER_PREFIX) else {
                continue;
            };
            if key.is_empty() {
                continue;
            }
            if let Ok(value) = value.to_str() {
                metadata.append(key, value);
            }
        }
        metadata
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("routes", &self.inner.routes.len())
            .field("max_body_bytes", &self.inner.config.max_body_bytes)
            .finish()
    }
}

async fn read_body<B>(body: B, limit: usize) -> Result<Bytes, Rejection>
where
    B: HttpBody,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            Err(Rejection::BodyTooLarge(limit))
        }
        Err(e) => Err(RpcError::InvalidArgument(format!("failed to read request body: {}", e)).into()),
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// HTTP status for an RPC outcome.
pub fn http_status(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
        ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// JSON error body: `{"code", "kind", "message"}`, plus `"reason"` for
/// refused credentials.
pub fn error_body(err: &RpcError) -> Value {
    let mut body = json!({
        "code": convert::grpc_code(err.kind()) as i32,
        "kind": err.kind().as_str(),
        "message": err.message(),
    });
    if let (Some(auth), Value::Object(object)) = (err.auth(), &mut body) {
        object.insert("reason".to_string(), Value::String(auth.tag().to_string()));
    }
    body
}

fn rejection_response(rejection: Rejection) -> Response<Full<Bytes>> {
    match rejection {
        Rejection::Rpc(err) => json_response(http_status(err.kind()), &error_body(&err)),
        Rejection::NoRoute(method, path) => {
            let err = RpcError::NotFound(format!("no route for {} {}", method, path));
            json_response(StatusCode::NOT_FOUND, &error_body(&err))
        }
        Rejection::BodyTooLarge(limit) => {
            let err = RpcError::ResourceExhausted(format!(
                "request body exceeds {} bytes",
                limit
            ));
            json_response(StatusCode::PAYLOAD_TOO_LARGE, &error_body(&err))
        }
    }
}

fn json_response(status: StatusCode, value: &Value) -> Response<Full<Bytes>> {
    let body = serde_json::to_vec(value).unwrap_or_default();
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}
