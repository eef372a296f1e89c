/// Authentication for Privileged Tools
///
/// Tools that change registry or configuration state are only dispatched
/// after the request has been authenticated and the caller authorized for
/// that specific tool. The protocol handler talks to an `AuthMiddleware`;
/// two implementations ship with the server:
/// - `JwtAuth`: HS256 bearer tokens carrying a permission list
/// - `AnonymousAuth`: accepts everyone, for local single-user setups
///
/// Tokens are read from the transport (`Authorization: Bearer ...` over HTTP)
/// or, failing that, from `params._meta.authorization` in the request itself.

use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::{Result, ToolError, codes};
use crate::core::protocol::{MCPRequest, MCPResponse};

/// Permission granting every tool.
pub const ADMIN_PERMISSION: &str = "admin";
/// Permission granting every tool, scoped form.
pub const ALL_TOOLS_PERMISSION: &str = "tools:*";

/// Transport-level facts about a request that are not part of the JSON body.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub bearer_token: Option<String>,
}

impl RequestContext {
    /// Context from a raw `Authorization` header value.
    pub fn from_authorization(header: Option<&str>) -> Self {
        Self {
            bearer_token: header.and_then(strip_bearer).map(str::to_string),
        }
    }
}

/// Claims carried by an authenticated caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenPayload {
    pub sub: String,
    pub exp: usize,
    pub iat: usize,
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl TokenPayload {
    pub fn allows(&self, tool_name: &str) -> bool {
        self.permissions
            .iter()
            .any(|p| p == tool_name || p == ALL_TOOLS_PERMISSION || p == ADMIN_PERMISSION)
    }
}

/// External authentication and authorization collaborator.
pub trait AuthMiddleware: Send + Sync {
    /// Identify the caller, or `None` when the request carries no valid
    /// credentials.
    fn authenticate_request(
        &self,
        request: &MCPRequest,
        ctx: &RequestContext,
    ) -> Option<TokenPayload>;

    fn authorize_tool_access(&self, payload: &TokenPayload, tool_name: &str) -> bool;

    fn create_error_response(&self, message: &str, id: Option<Value>) -> MCPResponse {
        MCPResponse::error(id, codes::UNAUTHORIZED, message)
    }
}

fn strip_bearer(value: &str) -> Option<&str> {
    let value = value.trim_start();
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .unwrap_or(value)
        .trim();
    if token.is_empty() { None } else { Some(token) }
}

/// Token from the transport, else from `params._meta.authorization`.
fn request_token(request: &MCPRequest, ctx: &RequestContext) -> Option<String> {
    if let Some(token) = &ctx.bearer_token {
        return Some(token.clone());
    }
    request
        .params
        .as_ref()?
        .get("_meta")?
        .get("authorization")?
        .as_str()
        .and_then(strip_bearer)
        .map(str::to_string)
}

/// HS256 JWT authentication.
pub struct JwtAuth {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtAuth {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
        }
    }

    /// Mint a token for `subject` valid for `ttl_seconds`.
    pub fn issue_token(
        &self,
        subject: &str,
        permissions: Vec<String>,
        ttl_seconds: i64,
    ) -> Result<String> {
        let now = chrono::Utc::now().timestamp();
        let claims = TokenPayload {
            sub: subject.to_string(),
            iat: now as usize,
            exp: (now + ttl_seconds).max(0) as usize,
            permissions,
        };
        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| ToolError::Config(format!("failed to sign token: {e}")))
    }

    pub fn validate_token(&self, token: &str) -> Option<TokenPayload> {
        match decode::<TokenPayload>(token, &self.decoding, &self.validation) {
            Ok(data) => Some(data.claims),
            Err(e) => {
                tracing::debug!(error = %e, "Rejected bearer token");
                None
            }
        }
    }
}

impl AuthMiddleware for JwtAuth {
    fn authenticate_request(
        &self,
        request: &MCPRequest,
        ctx: &RequestContext,
    ) -> Option<TokenPayload> {
        let token = request_token(request, ctx)?;
        self.validate_token(&token)
    }

    fn authorize_tool_access(&self, payload: &TokenPayload, tool_name: &str) -> bool {
        payload.allows(tool_name)
    }
}

/// Accepts every caller as `anonymous` with full access.
pub struct AnonymousAuth;

impl AuthMiddleware for AnonymousAuth {
    fn authenticate_request(
        &self,
        _request: &MCPRequest,
        _ctx: &RequestContext,
    ) -> Option<TokenPayload> {
        Some(TokenPayload {
            sub: "anonymous".to_string(),
            exp: usize::MAX,
            iat: 0,
            permissions: vec![ADMIN_PERMISSION.to_string()],
        })
    }

    fn authorize_tool_access(&self, _payload: &TokenPayload, _tool_name: &str) -> bool {
        true
    }
}
