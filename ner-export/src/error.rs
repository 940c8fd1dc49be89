use backtrace::Backtrace;
use hf_hub::api::sync::ApiError;
use std::fmt;

#[derive(Debug)]
pub struct WrappedError {
    pub error: Box<dyn std::error::Error + Send + Sync>,
    pub backtrace: Backtrace,
}

impl fmt::Display for WrappedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl std::error::Error for WrappedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.error.as_ref())
    }
}

// `ner-export` main error type
#[derive(thiserror::Error, Debug)]
pub enum Error {
    // -----------------------------------
    // Repository errors
    // -----------------------------------
    #[error("Repository '{0}' not found.")]
    RepositoryNotFound(String),
    #[error("File '{file}' not found in '{repo}'.")]
    FileNotFound { repo: String, file: String },

    // -----------------------------------
    // Load model errors
    // -----------------------------------
    #[error("Model weights not found in the repo.")]
    ModelWeightsNotFound,
    #[error("Model configuration is missing. Check the repository contains a `config.json` file.")]
    MissingModelConfig,
    #[error("Model type '{0}' is not supported for token classification.")]
    ModelNotImplemented(String),

    // -----------------------------------
    // Label map errors
    // -----------------------------------
    #[error("Label map is missing the label for index {index} (expected {num_labels} labels).")]
    IncompleteLabelMap { index: usize, num_labels: usize },
    #[error("Could not parse label map: {0}")]
    LabelMapParse(String),

    // -----------------------------------
    // Load tokenizer errors
    // -----------------------------------
    #[error("Tokenizer configuration is missing. Check the repository contains a `tokenizer_config.json` file.")]
    TokenizerMissingConfig,
    #[error("Tokenizer build error: {0}")]
    TokenizerBuildError(String),
    #[error("Missing the special token `{0}`.")]
    MissingSpecialToken(String),
    #[error("Missing the id of the special token `{0}`.")]
    MissingSpecialTokenId(String),
    #[error("Tokenizer encoding error: {0}.")]
    TokenizerEncodingError(String),

    // -----------------------------------
    // `forward` method errors
    // -----------------------------------
    #[error("Forward param {0} cannot be `None`.")]
    MissingForwardParam(String),

    // -----------------------------------
    // Traced model errors
    // -----------------------------------
    #[error("Traced model is missing the tensor `{0}`.")]
    MissingTracedTensor(String),
    #[error("Traced model output differs from the reference logits by {diff} (tolerance {tolerance}).")]
    TraceMismatch { diff: f32, tolerance: f32 },

    #[error("{0}")]
    Msg(String),

    // Wrapped errors from other crates
    #[error(transparent)]
    Wrapped(#[from] WrappedError),
}

impl Error {
    pub fn wrap(e: impl std::error::Error + Send + Sync + 'static) -> Self {
        Error::Wrapped(WrappedError {
            error: Box::new(e),
            backtrace: Backtrace::new(),
        })
    }

    pub fn msg<T: std::fmt::Display>(msg: T) -> Self {
        Error::Msg(msg.to_string())
    }
}

impl From<candle_core::Error> for Error {
    fn from(e: candle_core::Error) -> Self {
        Error::wrap(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::wrap(e)
    }
}

impl From<ApiError> for Error {
    fn from(e: ApiError) -> Self {
        Error::wrap(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::wrap(e)
    }
}

#[macro_export]
macro_rules! bail {
    ($msg:expr) => {
        return Err($crate::error::Error::msg($msg))
    };
}
