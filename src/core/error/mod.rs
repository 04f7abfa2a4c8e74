use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigMissingKey,
    ConfigInvalidJson,
    ConfigInvalidValue,

    ValidationMissingArgument,
    ValidationInvalidArgument,

    ProviderRequestFailed,
    ProviderAuthFailed,
    ProviderNotFound,
    ProviderNetworkNotFound,

    PipelineModuleNotFound,
    PipelineFunctionNotFound,

    CompileFailed,

    InternalIoError,
    InternalJsonError,
    InternalUnexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigMissingKey => "config.missing_key",
            ErrorCode::ConfigInvalidJson => "config.invalid_json",
            ErrorCode::ConfigInvalidValue => "config.invalid_value",

            ErrorCode::ValidationMissingArgument => "validation.missing_argument",
            ErrorCode::ValidationInvalidArgument => "validation.invalid_argument",

            ErrorCode::ProviderRequestFailed => "provider.request_failed",
            ErrorCode::ProviderAuthFailed => "provider.auth_failed",
            ErrorCode::ProviderNotFound => "provider.not_found",
            ErrorCode::ProviderNetworkNotFound => "provider.network_not_found",

            ErrorCode::PipelineModuleNotFound => "pipeline.module_not_found",
            ErrorCode::PipelineFunctionNotFound => "pipeline.function_not_found",

            ErrorCode::CompileFailed => "compile.failed",

            ErrorCode::InternalIoError => "internal.io_error",
            ErrorCode::InternalJsonError => "internal.json_error",
            ErrorCode::InternalUnexpected => "internal.unexpected",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMissingKeyDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidJsonDetails {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidValueDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub problem: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingArgumentDetails {
    pub args: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidArgumentDetails {
    pub field: String,
    pub problem: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tried: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderRequestDetails {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkNotFoundDetails {
    pub instance: String,
    pub problem: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineLookupDetails {
    pub id: String,
    pub available: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalIoErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalJsonErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    pub hints: Vec<Hint>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

fn to_details<T: Serialize>(details: T) -> Value {
    serde_json::to_value(details).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
            hints: Vec::new(),
        }
    }

    pub fn config_missing_key(key: impl Into<String>, path: Option<String>) -> Self {
        let key = key.into();
        let message = format!("Missing required configuration key '{}'", key);
        Self::new(
            ErrorCode::ConfigMissingKey,
            message,
            to_details(ConfigMissingKeyDetails { key, path }),
        )
    }

    pub fn config_invalid_json(path: impl Into<String>, error: serde_json::Error) -> Self {
        Self::new(
            ErrorCode::ConfigInvalidJson,
            "Configuration file is not valid JSON",
            to_details(ConfigInvalidJsonDetails {
                path: path.into(),
                error: error.to_string(),
            }),
        )
    }

    pub fn config_invalid_value(
        key: impl Into<String>,
        value: Option<String>,
        problem: impl Into<String>,
    ) -> Self {
        let problem = problem.into();
        Self::new(
            ErrorCode::ConfigInvalidValue,
            problem.clone(),
            to_details(ConfigInvalidValueDetails {
                key: key.into(),
                value,
                problem,
            }),
        )
    }

    pub fn validation_missing_argument(args: Vec<String>) -> Self {
        let message = format!("Missing required argument(s): {}", args.join(", "));
        Self::new(
            ErrorCode::ValidationMissingArgument,
            message,
            to_details(MissingArgumentDetails { args }),
        )
        .with_hint("Pass the flag(s) on the command line or set them in the --config file")
    }

    pub fn validation_invalid_argument(
        field: impl Into<String>,
        problem: impl Into<String>,
        id: Option<String>,
        tried: Option<Vec<String>>,
    ) -> Self {
        let problem = problem.into();
        Self::new(
            ErrorCode::ValidationInvalidArgument,
            problem.clone(),
            to_details(InvalidArgumentDetails {
                field: field.into(),
                problem,
                id,
                tried,
            }),
        )
    }

    pub fn provider_request_failed(url: impl Into<String>, error: impl Into<String>) -> Self {
        let error = error.into();
        Self::new(
            ErrorCode::ProviderRequestFailed,
            format!("Cloud API request failed: {}", error),
            to_details(ProviderRequestDetails {
                url: url.into(),
                status: None,
                body: None,
                error: Some(error),
            }),
        )
    }

    /// Maps a non-success HTTP status to the matching provider error code.
    pub fn provider_status(url: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        let (code, message) = match status {
            401 | 403 => (
                ErrorCode::ProviderAuthFailed,
                format!("Cloud API rejected credentials (HTTP {})", status),
            ),
            404 => (
                ErrorCode::ProviderNotFound,
                "Cloud resource not found (HTTP 404)".to_string(),
            ),
            _ => (
                ErrorCode::ProviderRequestFailed,
                format!("Cloud API error: HTTP {}", status),
            ),
        };

        let err = Self::new(
            code,
            message,
            to_details(ProviderRequestDetails {
                url: url.into(),
                status: Some(status),
                body: Some(body.into()),
                error: None,
            }),
        );

        match code {
            ErrorCode::ProviderAuthFailed => err.with_hint(
                "Run 'gcloud auth login' or pass --access_token with a token for this project",
            ),
            ErrorCode::ProviderNotFound => {
                err.with_hint("Check the project id, Filestore instance id and location")
            }
            _ => err,
        }
    }

    pub fn provider_auth_failed(problem: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ProviderAuthFailed,
            problem,
            Value::Object(serde_json::Map::new()),
        )
        .with_hint("Set GOOGLE_OAUTH_ACCESS_TOKEN, pass --access_token, or install and log in to gcloud")
    }

    pub fn network_not_found(instance: impl Into<String>, problem: impl Into<String>) -> Self {
        let problem = problem.into();
        Self::new(
            ErrorCode::ProviderNetworkNotFound,
            format!("No network found: {}", problem),
            to_details(NetworkNotFoundDetails {
                instance: instance.into(),
                problem,
            }),
        )
    }

    pub fn pipeline_module_not_found(id: impl Into<String>, available: Vec<String>) -> Self {
        let id = id.into();
        Self::new(
            ErrorCode::PipelineModuleNotFound,
            format!("Pipeline module '{}' is not registered", id),
            to_details(PipelineLookupDetails { id, available }),
        )
        .with_hint("Run 'afpipe pipelines' to see registered pipeline functions")
    }

    pub fn pipeline_function_not_found(id: impl Into<String>, available: Vec<String>) -> Self {
        let id = id.into();
        Self::new(
            ErrorCode::PipelineFunctionNotFound,
            format!("Pipeline function '{}' is not registered", id),
            to_details(PipelineLookupDetails { id, available }),
        )
        .with_hint("Run 'afpipe pipelines' to see registered pipeline functions")
    }

    pub fn compile_failed(problem: impl Into<String>) -> Self {
        let problem = problem.into();
        Self::new(
            ErrorCode::CompileFailed,
            format!("Pipeline compilation failed: {}", problem),
            serde_json::json!({ "problem": problem }),
        )
    }

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        Self::new(
            ErrorCode::InternalIoError,
            "IO error",
            to_details(InternalIoErrorDetails {
                error: error.into(),
                context,
            }),
        )
    }

    pub fn internal_json(error: impl Into<String>, context: Option<String>) -> Self {
        Self::new(
            ErrorCode::InternalJsonError,
            "JSON error",
            to_details(InternalJsonErrorDetails {
                error: error.into(),
                context,
            }),
        )
    }

    pub fn internal_unexpected(error: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InternalUnexpected,
            "Unexpected error",
            serde_json::json!({ "error": error.into() }),
        )
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }
}
