//! Tracing of token classification models into a self-contained artifact.
//!
//! A traced model is a single `safetensors` file bundling the weights of the logits-only model,
//! its `config.json`, the example input the model was traced with and the logits the original
//! model produced for it. It can be loaded back and run without resolving any repository.

use std::{collections::HashMap, path::Path};

use candle_core::{DType, Device, Tensor};
use ner_export::{Error, Result};

use crate::config::PretrainedConfig;
use crate::from_pretrained::ModelInfo;
use crate::model::{AutoModelForTokenClassification, ForwardParams, PreTrainedModel};

pub const TRACED_MODEL_FILE: &str = "traced_model.pt";

const TRACE_PREFIX: &str = "trace.";
const TRACE_CONFIG: &str = "trace.config";
const TRACE_INPUT_IDS: &str = "trace.input_ids";
const TRACE_ATTENTION_MASK: &str = "trace.attention_mask";
const TRACE_LOGITS: &str = "trace.logits";

/// Wraps a token classification model so its only inputs are the input ids and the attention
/// mask, and its only output are the logits.
pub struct LogitsOnly {
    model: Box<dyn PreTrainedModel>,
}

impl LogitsOnly {
    pub fn new(model: Box<dyn PreTrainedModel>) -> Self {
        Self { model }
    }

    pub fn config(&self) -> &PretrainedConfig {
        self.model.config()
    }

    /// Computes the logits with shape `(batch_size, seq_len, num_labels)`. Token type ids are
    /// all zeros.
    pub fn forward(&self, input_ids: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
        let token_type_ids = input_ids.zeros_like()?;
        self.model.forward(ForwardParams::new(
            Some(input_ids),
            Some(attention_mask),
            Some(&token_type_ids),
        ))
    }
}

/// A model traced with a fixed example input.
pub struct TracedModel {
    model: LogitsOnly,
    config: serde_json::Value,
    weights: HashMap<String, Tensor>,
    example_input_ids: Tensor,
    example_attention_mask: Tensor,
    reference_logits: Tensor,
}

impl TracedModel {
    /// Traces the token classification model described by `model_info` with the example input.
    /// The weights are loaded once, in `f32`, and kept so the traced model can be saved.
    ///
    /// # Arguments
    ///
    /// * `model_info` - The resolved model files.
    /// * `input_ids` - The example input ids, with shape `(1, seq_len)`.
    /// * `attention_mask` - The example attention mask, with the same shape.
    /// * `device` - The device to load the model on.
    ///
    /// # Returns
    ///
    /// The traced model.
    pub fn trace(
        model_info: &ModelInfo,
        input_ids: &Tensor,
        attention_mask: &Tensor,
        device: &Device,
    ) -> Result<Self> {
        let config = model_info.require_config()?.clone();
        let weights = model_info.load_tensors(DType::F32, device)?;
        let model = AutoModelForTokenClassification::from_tensors(
            weights.clone(),
            config.clone(),
            device,
        )?;
        let model = LogitsOnly::new(model);

        let input_ids = input_ids.to_device(device)?;
        let attention_mask = attention_mask.to_dtype(DType::U8)?.to_device(device)?;
        let reference_logits = model.forward(&input_ids, &attention_mask)?;
        tracing::debug!(
            "Traced model with example input of shape {:?}, logits shape {:?}",
            input_ids.dims(),
            reference_logits.dims()
        );

        Ok(Self {
            model,
            config,
            weights,
            example_input_ids: input_ids,
            example_attention_mask: attention_mask,
            reference_logits,
        })
    }

    /// Saves the traced model into a single `safetensors` file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let cpu = Device::Cpu;
        let mut tensors: HashMap<String, Tensor> = HashMap::with_capacity(self.weights.len() + 4);
        for (name, tensor) in &self.weights {
            tensors.insert(name.clone(), tensor.to_device(&cpu)?);
        }
        let config = serde_json::to_vec(&self.config)?;
        let config_len = config.len();
        tensors.insert(
            TRACE_CONFIG.to_string(),
            Tensor::from_vec(config, config_len, &cpu)?,
        );
        tensors.insert(
            TRACE_INPUT_IDS.to_string(),
            self.example_input_ids.to_device(&cpu)?,
        );
        tensors.insert(
            TRACE_ATTENTION_MASK.to_string(),
            self.example_attention_mask.to_device(&cpu)?,
        );
        tensors.insert(
            TRACE_LOGITS.to_string(),
            self.reference_logits.to_device(&cpu)?,
        );
        candle_core::safetensors::save(&tensors, path)?;
        Ok(())
    }

    /// Loads a traced model saved with [`TracedModel::save`].
    pub fn load<P: AsRef<Path>>(path: P, device: &Device) -> Result<Self> {
        let mut weights = candle_core::safetensors::load(path, device)?;
        let mut take = |name: &str| {
            weights
                .remove(name)
                .ok_or_else(|| Error::MissingTracedTensor(name.to_string()))
        };
        let config_bytes = take(TRACE_CONFIG)?.to_vec1::<u8>()?;
        let example_input_ids = take(TRACE_INPUT_IDS)?;
        let example_attention_mask = take(TRACE_ATTENTION_MASK)?;
        let reference_logits = take(TRACE_LOGITS)?;
        weights.retain(|name, _| !name.starts_with(TRACE_PREFIX));

        let config: serde_json::Value = serde_json::from_slice(&config_bytes)?;
        let model = AutoModelForTokenClassification::from_tensors(
            weights.clone(),
            config.clone(),
            device,
        )?;

        Ok(Self {
            model: LogitsOnly::new(model),
            config,
            weights,
            example_input_ids,
            example_attention_mask,
            reference_logits,
        })
    }

    /// Computes the logits for the input. The traced model is specialized to the sequence length
    /// of the example input, other lengths are accepted but logged.
    pub fn forward(&self, input_ids: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
        let (_, seq_len) = input_ids.dims2()?;
        if seq_len != self.trace_seq_len() {
            tracing::debug!(
                "Running traced model with sequence length {} (traced with {})",
                seq_len,
                self.trace_seq_len()
            );
        }
        self.model.forward(input_ids, attention_mask)
    }

    /// Reruns the model on the example input and compares the result with the logits recorded
    /// at trace time.
    ///
    /// # Arguments
    ///
    /// * `tolerance` - Maximum absolute difference allowed between any pair of logits.
    ///
    /// # Returns
    ///
    /// The maximum absolute difference found.
    pub fn verify(&self, tolerance: f32) -> Result<f32> {
        let logits = self.forward(&self.example_input_ids, &self.example_attention_mask)?;
        let diff = (logits - &self.reference_logits)?
            .abs()?
            .flatten_all()?
            .max(0)?
            .to_scalar::<f32>()?;
        if diff.is_nan() || diff > tolerance {
            return Err(Error::TraceMismatch { diff, tolerance });
        }
        Ok(diff)
    }

    pub fn config(&self) -> &PretrainedConfig {
        self.model.config()
    }

    pub fn trace_seq_len(&self) -> usize {
        self.example_input_ids.dims().last().copied().unwrap_or(0)
    }

    pub fn get_example_input_ids(&self) -> &Tensor {
        &self.example_input_ids
    }

    pub fn get_example_attention_mask(&self) -> &Tensor {
        &self.example_attention_mask
    }

    pub fn get_reference_logits(&self) -> &Tensor {
        &self.reference_logits
    }
}
