use hf_hub::{
    api::sync::{ApiBuilder, ApiRepo},
    Repo, RepoType,
};

use crate::{Error, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};

pub const MODEL_CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone)]
pub struct FromPretrainedParameters {
    pub revision: String,
    pub auth_token: Option<String>,
}

impl Default for FromPretrainedParameters {
    fn default() -> Self {
        Self {
            revision: "main".into(),
            auth_token: None,
        }
    }
}

/// Where the files of a pretrained model live: a Hugging Face Hub repository or a local
/// directory with the same layout (e.g. a previous export).
pub enum RepoSource {
    Hub { repo_id: String, api: ApiRepo },
    Local(PathBuf),
}

impl RepoSource {
    /// Gets the local path of a file of the repository, downloading it first if the source is
    /// the Hugging Face Hub.
    ///
    /// # Arguments
    ///
    /// * `file_name` - The name of the file inside the repository.
    ///
    /// # Returns
    ///
    /// The path to the file in the local filesystem.
    pub fn get(&self, file_name: &str) -> Result<PathBuf> {
        match self {
            RepoSource::Hub { api, .. } => Ok(api.get(file_name)?),
            RepoSource::Local(dir) => {
                let path = dir.join(file_name);
                if path.is_file() {
                    Ok(path)
                } else {
                    Err(Error::FileNotFound {
                        repo: dir.display().to_string(),
                        file: file_name.to_string(),
                    })
                }
            }
        }
    }

    /// The identifier of the source, as given by the user.
    pub fn id(&self) -> String {
        match self {
            RepoSource::Hub { repo_id, .. } => repo_id.clone(),
            RepoSource::Local(dir) => dir.display().to_string(),
        }
    }
}

/// Gets a [`RepoSource`] for the provided identifier. If the identifier points to an existing
/// directory, the files are read from it. Otherwise, it's treated as a Hugging Face Hub
/// repository ID and it will check if the repository exists.
///
/// # Arguments
///
/// * `repo_id` - The repository ID or a path to a local directory.
/// * `params` - The parameters to use when creating the API instance.
///
/// # Returns
///
/// The repository source.
pub fn get_repo(repo_id: &str, params: Option<FromPretrainedParameters>) -> Result<RepoSource> {
    let local = Path::new(repo_id);
    if local.is_dir() {
        return Ok(RepoSource::Local(local.to_path_buf()));
    }

    let params = params.unwrap_or_default();
    let repo = Repo::with_revision(repo_id.to_string(), RepoType::Model, params.revision);
    let mut builder = ApiBuilder::new();
    if let Some(token) = params.auth_token {
        builder = builder.with_token(Some(token));
    }
    let api = builder.build()?.repo(repo);

    if api.info().is_err() && api.get(MODEL_CONFIG_FILE).is_err() {
        return Err(Error::RepositoryNotFound(repo_id.to_string()));
    }

    Ok(RepoSource::Hub {
        repo_id: repo_id.to_string(),
        api,
    })
}

/// Loads the model configuration from the provided file path.
///
/// # Arguments
///
/// * `file_path` - The path to the `config.json` file containing the model configuration.
///
/// # Returns
///
/// The loaded model configuration.
pub fn load_model_config(file_path: PathBuf) -> Result<serde_json::Value> {
    let model_config = fs::read_to_string(file_path)?;
    let model_config = serde_json::from_str(&model_config)?;
    Ok(model_config)
}

#[cfg(test)]
mod tests {
    use super::{get_repo, load_model_config, RepoSource, MODEL_CONFIG_FILE};
    use crate::Error;

    #[test]
    fn test_local_directory_source() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MODEL_CONFIG_FILE), r#"{"model_type": "bert"}"#).unwrap();

        let repo = get_repo(dir.path().to_str().unwrap(), None).unwrap();
        assert!(matches!(repo, RepoSource::Local(_)));

        let config = load_model_config(repo.get(MODEL_CONFIG_FILE).unwrap()).unwrap();
        assert_eq!(config["model_type"], "bert");
    }

    #[test]
    fn test_local_directory_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let repo = get_repo(dir.path().to_str().unwrap(), None).unwrap();
        let err = repo.get("vocab.txt").unwrap_err();
        assert!(matches!(err, Error::FileNotFound { ref file, .. } if file == "vocab.txt"));
    }
}
