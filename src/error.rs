use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Throttle layer that rejected a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ThrottleScope {
    Stage,
    Method,
    Plan,
}

impl ThrottleScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThrottleScope::Stage => "stage",
            ThrottleScope::Method => "method",
            ThrottleScope::Plan => "plan",
        }
    }
}

/// Coarse error classification reported to clients and in the access log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorType {
    InvalidApiKey,
    Throttled,
    QuotaExceeded,
    NotFound,
    MethodNotAllowed,
    BadRequest,
    BackendError,
    BackendTimeout,
    ClientClosed,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::InvalidApiKey => "INVALID_API_KEY",
            ErrorType::Throttled => "THROTTLED",
            ErrorType::QuotaExceeded => "QUOTA_EXCEEDED",
            ErrorType::NotFound => "NOT_FOUND",
            ErrorType::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            ErrorType::BadRequest => "BAD_REQUEST",
            ErrorType::BackendError => "BACKEND_ERROR",
            ErrorType::BackendTimeout => "BACKEND_TIMEOUT",
            ErrorType::ClientClosed => "CLIENT_CLOSED",
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            ErrorType::InvalidApiKey => 403,
            ErrorType::Throttled | ErrorType::QuotaExceeded => 429,
            ErrorType::NotFound => 404,
            ErrorType::MethodNotAllowed => 405,
            ErrorType::BadRequest => 400,
            ErrorType::BackendError => 502,
            ErrorType::BackendTimeout => 504,
            ErrorType::ClientClosed => 499,
        }
    }
}

/// Per-request rejection, raised by the first layer that observes it.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("Missing API key")]
    MissingApiKey,

    #[error("Invalid API key")]
    InvalidApiKey,

    #[error("Rate limit exceeded at {} scope", .scope.as_str())]
    Throttled {
        scope: ThrottleScope,
        /// Time until the tripped bucket holds a token again.
        retry_after: Duration,
    },

    #[error("Quota exceeded for usage plan '{plan}'")]
    QuotaExceeded {
        plan: String,
        retry_after: Duration,
    },

    #[error("No route for path {0}")]
    RouteNotFound(String),

    #[error("Method {method} not allowed on {path}")]
    MethodNotAllowed {
        method: String,
        path: String,
        allowed: Vec<String>,
    },

    #[error("{0}")]
    BadRequest(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Backend did not respond within {}ms", .0.as_millis())]
    BackendTimeout(Duration),
}

impl GatewayError {
    /// Fine-grained outcome code; distinguishes the throttle layer that tripped.
    pub fn outcome(&self) -> &'static str {
        match self {
            GatewayError::MissingApiKey | GatewayError::InvalidApiKey => "FORBIDDEN_NO_KEY",
            GatewayError::Throttled { scope, .. } => match scope {
                ThrottleScope::Stage => "THROTTLED_STAGE",
                ThrottleScope::Method => "THROTTLED_METHOD",
                ThrottleScope::Plan => "THROTTLED_PLAN",
            },
            GatewayError::QuotaExceeded { .. } => "QUOTA_EXCEEDED",
            GatewayError::RouteNotFound(_) => "ROUTE_NOT_FOUND",
            GatewayError::MethodNotAllowed { .. } => "METHOD_NOT_ALLOWED",
            GatewayError::BadRequest(_) => "BAD_REQUEST",
            GatewayError::BackendUnavailable(_) => "BACKEND_ERROR",
            GatewayError::BackendTimeout(_) => "BACKEND_TIMEOUT",
        }
    }

    pub fn error_type(&self) -> ErrorType {
        match self {
            GatewayError::MissingApiKey | GatewayError::InvalidApiKey => ErrorType::InvalidApiKey,
            GatewayError::Throttled { .. } => ErrorType::Throttled,
            GatewayError::QuotaExceeded { .. } => ErrorType::QuotaExceeded,
            GatewayError::RouteNotFound(_) => ErrorType::NotFound,
            GatewayError::MethodNotAllowed { .. } => ErrorType::MethodNotAllowed,
            GatewayError::BadRequest(_) => ErrorType::BadRequest,
            GatewayError::BackendUnavailable(_) => ErrorType::BackendError,
            GatewayError::BackendTimeout(_) => ErrorType::BackendTimeout,
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Error reported by an Invoke compute unit. Always surfaced as `BACKEND_ERROR`.
#[derive(Debug, Clone, Error)]
pub enum InvokeError {
    #[error("function '{0}' is unavailable")]
    Unavailable(String),

    #[error("function failed: {0}")]
    Failed(String),
}

impl From<InvokeError> for GatewayError {
    fn from(err: InvokeError) -> Self {
        GatewayError::BackendUnavailable(err.to_string())
    }
}

/// Fatal policy or startup error. Never raised while serving requests.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read policy file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse policy document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid policy document: {0}")]
    Invalid(#[from] validator::ValidationErrors),

    #[error("duplicate route definition {verb} {path}")]
    DuplicateRoute { path: String, verb: String },

    #[error("route {path} uses unsupported verb '{verb}'")]
    UnsupportedVerb { path: String, verb: String },

    #[error("route {0} is under the reserved /_gateway prefix")]
    ReservedPath(String),

    #[error("duplicate API key id '{0}'")]
    DuplicateApiKey(String),

    #[error("API key '{0}' shares its value with another key")]
    DuplicateApiKeyValue(String),

    #[error("duplicate usage plan '{0}'")]
    DuplicatePlan(String),

    #[error("usage plan '{plan}' references unknown API key '{key}'")]
    UnknownApiKey { plan: String, key: String },

    #[error("usage plan '{0}' references no API keys")]
    PlanWithoutKeys(String),

    #[error("API key '{0}' is not referenced by any usage plan")]
    KeyWithoutPlan(String),

    #[error("API key '{key}' is referenced by multiple usage plans: {plans:?}")]
    KeyInMultiplePlans { key: String, plans: Vec<String> },

    #[error("route {route} references unknown function '{function}'")]
    UnknownFunction { route: String, function: String },

    #[error("route {route} has invalid upstream address '{address}': {reason}")]
    InvalidUpstream {
        route: String,
        address: String,
        reason: String,
    },

    #[error("invalid gateway setting: {0}")]
    InvalidSetting(String),
}
