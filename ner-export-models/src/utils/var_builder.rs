use std::collections::HashMap;

use candle_core::{DType, Device, Shape, Tensor};
use candle_nn::{var_builder::SimpleBackend, Init};

/// A backend for retrieving tensors that ensures compatibility with old tensor naming conventions.
/// This backend is able to handle the following cases:
///
/// 1. The model prefix is missing from the tensor name.
/// 2. Tensors are named as `beta` and `gamma` instead of `weight` and `bias`.
///
/// This struct wraps a `SimpleBackend` implementation and provides an additional
/// `model_name` field to support model-specific tensor retrieval operations.
pub struct CompatibilityTensorRetrievalBackend {
    inner: Box<dyn SimpleBackend>,
    model_name: String,
}

impl CompatibilityTensorRetrievalBackend {
    pub fn new(inner: Box<dyn SimpleBackend>, model_name: String) -> Self {
        Self { inner, model_name }
    }

    /// Create a new `CompatibilityTensorRetrievalBackend` from a `PthTensors` instance that reads
    /// tensors from a `.pth` file.
    pub fn from_pth<P: AsRef<std::path::Path>>(
        p: P,
        model_name: String,
    ) -> candle_core::Result<Self> {
        let pth = candle_core::pickle::PthTensors::new(p, None)?;
        Ok(Self::new(Box::new(pth), model_name))
    }

    /// Create a new `CompatibilityTensorRetrievalBackend` from a `MmapedSafetensors` instance that
    /// reads tensors from one or more `.safetensors` files.
    ///
    /// # Safety
    ///
    /// The files are memory mapped and must not be modified while the backend is alive.
    pub unsafe fn from_mmaped_safetensors<P: AsRef<std::path::Path>>(
        paths: &[P],
        model_name: String,
    ) -> candle_core::Result<Self> {
        let tensors = candle_core::safetensors::MmapedSafetensors::multi(paths)?;
        Ok(Self::new(Box::new(tensors), model_name))
    }

    /// Create a new `CompatibilityTensorRetrievalBackend` from tensors already in memory, such as
    /// the weights bundled in a traced model.
    pub fn from_tensors(tensors: HashMap<String, Tensor>, model_name: String) -> Self {
        Self::new(Box::new(tensors), model_name)
    }

    fn rename(&self, name: &str) -> String {
        if self.inner.contains_tensor(name) {
            return name.to_string();
        }

        let without_prefix = name
            .strip_prefix(&self.model_name)
            .and_then(|rest| rest.strip_prefix('.'))
            .unwrap_or(name);

        let replace_weight_bias = |s: &str| s.replace("weight", "gamma").replace("bias", "beta");

        let possible_names = [
            without_prefix.to_string(),
            replace_weight_bias(name),
            replace_weight_bias(without_prefix),
        ];

        for possible_name in possible_names.iter() {
            if self.inner.contains_tensor(possible_name) {
                return possible_name.to_string();
            }
        }

        name.to_string()
    }
}

impl SimpleBackend for CompatibilityTensorRetrievalBackend {
    fn get(
        &self,
        s: Shape,
        name: &str,
        h: Init,
        dtype: DType,
        dev: &Device,
    ) -> candle_core::Result<Tensor> {
        let renamed = self.rename(name);
        self.inner.get(s, &renamed, h, dtype, dev)
    }

    fn contains_tensor(&self, name: &str) -> bool {
        let renamed = self.rename(name);
        self.inner.contains_tensor(&renamed)
    }
}

#[cfg(test)]
mod tests {
    use super::CompatibilityTensorRetrievalBackend;
    use candle_core::{Device, Tensor};
    use candle_nn::var_builder::SimpleBackend;
    use std::collections::HashMap;

    fn backend(names: &[&str]) -> CompatibilityTensorRetrievalBackend {
        let tensors = names
            .iter()
            .map(|name| {
                (
                    name.to_string(),
                    Tensor::zeros(2, candle_core::DType::F32, &Device::Cpu).unwrap(),
                )
            })
            .collect::<HashMap<_, _>>();
        CompatibilityTensorRetrievalBackend::from_tensors(tensors, "bert".to_string())
    }

    #[test]
    fn test_missing_model_prefix() {
        let backend = backend(&["embeddings.word_embeddings.weight"]);
        assert!(backend.contains_tensor("bert.embeddings.word_embeddings.weight"));
    }

    #[test]
    fn test_gamma_beta_names() {
        let backend = backend(&["bert.embeddings.LayerNorm.gamma"]);
        assert!(backend.contains_tensor("bert.embeddings.LayerNorm.weight"));
        assert!(!backend.contains_tensor("bert.embeddings.LayerNorm.bias"));
    }
}
