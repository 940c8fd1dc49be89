use std::{
    collections::{HashMap, HashSet},
    fs,
    path::PathBuf,
};

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use serde::{Deserialize, Serialize};

use ner_export::{
    get_repo,
    utils::{load_model_config, FromPretrainedParameters, MODEL_CONFIG_FILE},
    Error, RepoSource, Result,
};

use crate::utils::var_builder::CompatibilityTensorRetrievalBackend;

const MODEL_SAFETENSORS_INDEX_FILE: &str = "model.safetensors.index.json";
const MODEL_SAFETENSORS_FILE: &str = "model.safetensors";
const MODEL_PYTORCH_FILE: &str = "pytorch_model.bin";

/// An struct holding all the information required to load a model from the Hugging Face Hub or
/// a local directory.
pub struct ModelInfo {
    /// The model configuration loaded from the `config.json` file.
    config: Option<serde_json::Value>,
    /// The paths to the model weights files.
    weights_file_paths: Vec<PathBuf>,
    /// A flag indicating whether the model weights are stored in PyTorch format.
    from_pth: bool,
}

impl ModelInfo {
    /// Loads the model weights from the provided paths into a `VarBuilder`.
    ///
    /// # Arguments
    ///
    /// - `model_name` - The prefix of the tensors of the base model (e.g. `bert`).
    /// - `dtype` - The data type of the model weights.
    /// - `device` - The device on which the model weights should be loaded.
    ///
    /// # Returns
    ///
    /// A `VarBuilder` containing the model weights.
    pub fn get_var_builder(
        &self,
        model_name: &str,
        dtype: DType,
        device: &Device,
    ) -> Result<VarBuilder<'static>> {
        let backend = match self.from_pth {
            true => CompatibilityTensorRetrievalBackend::from_pth(
                &self.weights_file_paths[0],
                model_name.to_string(),
            )?,
            false => unsafe {
                CompatibilityTensorRetrievalBackend::from_mmaped_safetensors(
                    &self.weights_file_paths,
                    model_name.to_string(),
                )?
            },
        };
        Ok(VarBuilder::from_backend(
            Box::new(backend),
            dtype,
            device.clone(),
        ))
    }

    /// Reads every tensor of the weights files into memory, converting the floating point ones
    /// to `dtype`.
    ///
    /// # Arguments
    ///
    /// - `dtype` - The data type floating point tensors are converted to.
    /// - `device` - The device on which the tensors should be loaded.
    ///
    /// # Returns
    ///
    /// A map from tensor name to tensor.
    pub fn load_tensors(&self, dtype: DType, device: &Device) -> Result<HashMap<String, Tensor>> {
        let mut tensors = HashMap::new();
        for path in &self.weights_file_paths {
            let file_tensors: Vec<(String, Tensor)> = if self.from_pth {
                candle_core::pickle::read_all(path)?
            } else {
                candle_core::safetensors::load(path, device)?
                    .into_iter()
                    .collect()
            };
            for (name, tensor) in file_tensors {
                let tensor = tensor.to_device(device)?;
                let tensor = if tensor.dtype().is_float() {
                    tensor.to_dtype(dtype)?
                } else {
                    tensor
                };
                tensors.insert(name, tensor);
            }
        }
        Ok(tensors)
    }

    /// Gets a reference to the model configuration.
    pub fn get_config(&self) -> Option<&serde_json::Value> {
        self.config.as_ref()
    }

    /// Gets the model configuration or fails if the repository didn't have one.
    pub fn require_config(&self) -> Result<&serde_json::Value> {
        self.get_config().ok_or(Error::MissingModelConfig)
    }

    pub fn get_weights_file_paths(&self) -> &[PathBuf] {
        &self.weights_file_paths
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SafetensorsMetadata {
    total_size: usize,
}

/// Representation of the `model.safetensors.index.json` file which contains the metadata and
/// weight map of the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SafetensorsIndex {
    /// Metadata of the model.
    metadata: SafetensorsMetadata,
    /// A map of the model weights, where the key is the layer name and the value is the file path
    /// to the `safetensors` file containing the weights of that layer.
    weight_map: HashMap<String, String>,
}

impl SafetensorsIndex {
    /// Gets the sorted list of `safetensors` files required to load the model.
    fn get_safetensors_files(&self) -> Vec<String> {
        let mut files: Vec<String> = self
            .weight_map
            .values()
            .cloned()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        files.sort();
        files
    }
}

/// Loads the model weights from the repository. It tries to first load the weights from the
/// `model.safetensors.index.json` file (and the corresponding `safetensors` files), then from
/// the `model.safetensors` file, and finally from the `pytorch_model.bin` file.
///
/// # Arguments
///
/// * `repo` - The repository source.
///
/// # Returns
///
/// A tuple containing the paths to the model weights files and a flag indicating whether the
/// weights are stored in PyTorch format.
fn load_model_weights(repo: &RepoSource) -> Result<(Vec<PathBuf>, bool)> {
    if let Ok(model_safetensors_index_file_path) = repo.get(MODEL_SAFETENSORS_INDEX_FILE) {
        let safetensors_index = fs::read_to_string(model_safetensors_index_file_path)?;
        let safetensors_index: SafetensorsIndex = serde_json::from_str(&safetensors_index)?;
        let safetensors_files = safetensors_index
            .get_safetensors_files()
            .iter()
            .map(|file_name| repo.get(file_name))
            .collect::<Result<Vec<_>>>()?;
        return Ok((safetensors_files, false));
    }

    if let Ok(model_safetensor_file_path) = repo.get(MODEL_SAFETENSORS_FILE) {
        return Ok((vec![model_safetensor_file_path], false));
    }

    if let Ok(model_pytorch_file_path) = repo.get(MODEL_PYTORCH_FILE) {
        return Ok((vec![model_pytorch_file_path], true));
    }

    Err(Error::ModelWeightsNotFound)
}

/// Resolves the configuration and weights files required to load a model.
///
/// # Arguments
///
/// * `repo_id`: The Hugging Face Hub model repository id or a local directory.
/// * `params`: Optional parameters to specify the revision and auth token.
///
/// # Returns
///
/// A `ModelInfo` struct containing all the information required to load the model.
pub fn from_pretrained<I: AsRef<str>>(
    repo_id: I,
    params: Option<FromPretrainedParameters>,
) -> Result<ModelInfo> {
    let repo = get_repo(repo_id.as_ref(), params)?;
    tracing::debug!("Resolving model files from '{}'", repo.id());

    let config = match repo.get(MODEL_CONFIG_FILE) {
        Ok(model_config_file_path) => Some(load_model_config(model_config_file_path)?),
        Err(_) => None,
    };

    let (weights_file_paths, from_pth) = load_model_weights(&repo)?;

    Ok(ModelInfo {
        config,
        weights_file_paths,
        from_pth,
    })
}
