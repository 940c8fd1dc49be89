use std::collections::HashMap;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use ner_export::{utils::FromPretrainedParameters, Error, Result};

use crate::config::PretrainedConfig;
use crate::from_pretrained::{from_pretrained, ModelInfo};
use crate::models::bert::{BertForTokenClassification, BERT_DTYPE, BERT_MODEL_NAME};
use crate::utils::var_builder::CompatibilityTensorRetrievalBackend;

/// Parameters for the `forward` method of a `PreTrainedModel`.
pub struct ForwardParams<'a> {
    pub input_ids: Option<&'a Tensor>,
    pub attention_mask: Option<&'a Tensor>,
    pub token_type_ids: Option<&'a Tensor>,
}

impl<'a> ForwardParams<'a> {
    pub fn new(
        input_ids: Option<&'a Tensor>,
        attention_mask: Option<&'a Tensor>,
        token_type_ids: Option<&'a Tensor>,
    ) -> Self {
        Self {
            input_ids,
            attention_mask,
            token_type_ids,
        }
    }

    pub fn get_input_ids(&self) -> Option<&'a Tensor> {
        self.input_ids
    }

    pub fn get_attention_mask(&self) -> Option<&'a Tensor> {
        self.attention_mask
    }

    pub fn get_token_type_ids(&self) -> Option<&'a Tensor> {
        self.token_type_ids
    }
}

impl<'a> Default for ForwardParams<'a> {
    fn default() -> Self {
        Self::new(None, None, None)
    }
}

#[cfg(feature = "tokenizers")]
impl<'a> From<&'a ner_export_tokenizers::BatchEncoding> for ForwardParams<'a> {
    fn from(encodings: &'a ner_export_tokenizers::BatchEncoding) -> Self {
        Self::new(
            Some(encodings.get_input_ids()),
            Some(encodings.get_attention_mask()),
            Some(encodings.get_token_type_ids()),
        )
    }
}

/// Trait for a pre-trained model.
pub trait PreTrainedModel {
    fn load(vb: VarBuilder, config: serde_json::Value) -> Result<Self>
    where
        Self: Sized;
    fn config(&self) -> &PretrainedConfig;
    fn forward(&self, params: ForwardParams) -> Result<Tensor>;
}

/// Gets the `model_type` field of a model configuration.
fn get_model_type(config: &serde_json::Value) -> Result<&str> {
    config["model_type"]
        .as_str()
        .ok_or_else(|| Error::ModelNotImplemented("<missing model_type>".to_string()))
}

/// Implement `from_pretrained` method for a model struct.
#[macro_export]
macro_rules! impl_from_pretrained_method {
    ($model_struct:ident, $default_dtype:expr, $model_name:expr) => {
        impl $model_struct {
            /// Loads a model from the Hugging Face Hub or a local directory.
            ///
            /// # Arguments
            ///
            /// * `repo_id` - The repository id of the model to load.
            /// * `device` - The device to run the model on.
            /// * `dtype` - The numeric type in which the model parameters should be loaded.
            /// * `params` - Optional parameters to specify the revision and auth token.
            ///
            /// # Returns
            ///
            /// The loaded model.
            pub fn from_pretrained<S: AsRef<str>>(
                repo_id: S,
                device: &Device,
                dtype: Option<DType>,
                params: Option<FromPretrainedParameters>,
            ) -> Result<Self> {
                let model_info = from_pretrained(repo_id, params)?;
                let config = model_info.require_config()?.clone();
                let dtype = dtype.unwrap_or($default_dtype);
                let vb = model_info.get_var_builder($model_name, dtype, device)?;
                Self::load(vb, config)
            }
        }
    };
}

/// Implement the loading methods for an `AutoModel` struct.
#[macro_export]
macro_rules! impl_auto_model_from_pretrained_method {
    ($auto_model_struct:ident, $(($model_type:expr, $model_struct:ident, $default_dtype:expr, $model_name:expr)), *) => {
        impl $auto_model_struct {
            /// Loads a model from the Hugging Face Hub or a local directory.
            ///
            /// # Arguments
            ///
            /// * `repo_id` - The repository id of the model to load.
            /// * `device` - The device to run the model on.
            /// * `dtype` - The numeric type in which the model parameters should be loaded.
            /// * `params` - Optional parameters to specify the revision and auth token.
            ///
            /// # Returns
            ///
            /// The loaded model.
            pub fn from_pretrained<S: AsRef<str>>(
                repo_id: S,
                device: &Device,
                dtype: Option<DType>,
                params: Option<FromPretrainedParameters>,
            ) -> Result<Box<dyn PreTrainedModel>> {
                let model_info = from_pretrained(repo_id, params)?;
                Self::from_model_info(&model_info, device, dtype)
            }

            /// Loads a model from already resolved model files.
            pub fn from_model_info(
                model_info: &ModelInfo,
                device: &Device,
                dtype: Option<DType>,
            ) -> Result<Box<dyn PreTrainedModel>> {
                let config = model_info.require_config()?.clone();
                match get_model_type(&config)? {
                    $(
                        $model_type => {
                            let dtype = dtype.unwrap_or($default_dtype);
                            let vb = model_info.get_var_builder($model_name, dtype, device)?;
                            Ok(Box::new($model_struct::load(vb, config)?))
                        },
                    )*
                    model_type => Err(Error::ModelNotImplemented(model_type.to_string())),
                }
            }

            /// Loads a model from tensors already in memory.
            pub fn from_tensors(
                tensors: HashMap<String, Tensor>,
                config: serde_json::Value,
                device: &Device,
            ) -> Result<Box<dyn PreTrainedModel>> {
                match get_model_type(&config)? {
                    $(
                        $model_type => {
                            let backend = CompatibilityTensorRetrievalBackend::from_tensors(
                                tensors,
                                $model_name.to_string(),
                            );
                            let vb = VarBuilder::from_backend(
                                Box::new(backend),
                                $default_dtype,
                                device.clone(),
                            );
                            Ok(Box::new($model_struct::load(vb, config)?))
                        },
                    )*
                    model_type => Err(Error::ModelNotImplemented(model_type.to_string())),
                }
            }
        }
    };
}

/// Alows to automatically load a `PreTrainedModel` for token classification from a Hugging Face
/// Hub repository.
#[derive(Debug)]
pub struct AutoModelForTokenClassification {}

impl_auto_model_from_pretrained_method!(
    AutoModelForTokenClassification,
    (
        "bert",
        BertForTokenClassification,
        BERT_DTYPE,
        BERT_MODEL_NAME
    )
);

impl_from_pretrained_method!(BertForTokenClassification, BERT_DTYPE, BERT_MODEL_NAME);
