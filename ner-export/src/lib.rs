pub mod error;
pub mod utils;

pub use error::Error;
pub use utils::from_pretrained::{get_repo, FromPretrainedParameters, RepoSource};

/// A type alias for `Result<T, Error>` for the `ner-export` crate.
pub type Result<T> = std::result::Result<T, Error>;
