use candle_core::{DType, Module, Tensor, D};
use candle_nn::{embedding, layer_norm, linear, ops::softmax, Embedding, LayerNorm, Linear, VarBuilder};
use ner_export::{Error, Result};

use super::config::{BertConfig, HiddenAct};
use crate::config::PretrainedConfig;
use crate::model::{ForwardParams, PreTrainedModel};
use crate::utils::attn_mask::get_extended_attention_mask;

pub const BERT_DTYPE: DType = DType::F32;

/// The prefix of the base model tensors in BERT checkpoints.
pub const BERT_MODEL_NAME: &str = "bert";

struct HiddenActLayer {
    act: HiddenAct,
}

impl HiddenActLayer {
    fn new(act: HiddenAct) -> Self {
        Self { act }
    }
}

impl Module for HiddenActLayer {
    fn forward(&self, hidden_states: &Tensor) -> candle_core::Result<Tensor> {
        match self.act {
            HiddenAct::Gelu => hidden_states.gelu_erf(),
            HiddenAct::Relu => hidden_states.relu(),
        }
    }
}

struct BertEmbeddings {
    word_embeddings: Embedding,
    position_embeddings: Embedding,
    token_type_embeddings: Embedding,
    layer_norm: LayerNorm,
}

impl BertEmbeddings {
    fn load(vb: VarBuilder, config: &BertConfig) -> Result<Self> {
        let word_embeddings = embedding(
            config.vocab_size,
            config.hidden_size,
            vb.pp("word_embeddings"),
        )?;
        let position_embeddings = embedding(
            config.max_position_embeddings,
            config.hidden_size,
            vb.pp("position_embeddings"),
        )?;
        let token_type_embeddings = embedding(
            config.type_vocab_size,
            config.hidden_size,
            vb.pp("token_type_embeddings"),
        )?;
        let layer_norm = layer_norm(
            config.hidden_size,
            config.layer_norm_eps,
            vb.pp("LayerNorm"),
        )?;
        Ok(Self {
            word_embeddings,
            position_embeddings,
            token_type_embeddings,
            layer_norm,
        })
    }

    fn forward(&self, input_ids: &Tensor, token_type_ids: &Tensor) -> Result<Tensor> {
        let (_bsize, seq_len) = input_ids.dims2()?;
        let input_embeddings = self.word_embeddings.forward(input_ids)?;
        let token_type_embeddings = self.token_type_embeddings.forward(token_type_ids)?;
        let embeddings = (&input_embeddings + token_type_embeddings)?;
        let position_ids = Tensor::arange(0u32, seq_len as u32, input_ids.device())?;
        let embeddings =
            embeddings.broadcast_add(&self.position_embeddings.forward(&position_ids)?)?;
        Ok(self.layer_norm.forward(&embeddings)?)
    }
}

struct BertSelfAttention {
    query: Linear,
    key: Linear,
    value: Linear,
    num_attention_heads: usize,
    attention_head_size: usize,
}

impl BertSelfAttention {
    fn load(vb: VarBuilder, config: &BertConfig) -> Result<Self> {
        let attention_head_size = config.hidden_size / config.num_attention_heads;
        let all_head_size = config.num_attention_heads * attention_head_size;
        let hidden_size = config.hidden_size;
        let query = linear(hidden_size, all_head_size, vb.pp("query"))?;
        let key = linear(hidden_size, all_head_size, vb.pp("key"))?;
        let value = linear(hidden_size, all_head_size, vb.pp("value"))?;
        Ok(Self {
            query,
            key,
            value,
            num_attention_heads: config.num_attention_heads,
            attention_head_size,
        })
    }

    fn transpose_for_scores(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let (b_sz, seq_len, _) = xs.dims3()?;
        xs.reshape((
            b_sz,
            seq_len,
            self.num_attention_heads,
            self.attention_head_size,
        ))?
        .transpose(1, 2)?
        .contiguous()
    }

    /// `attention_mask` is the extended mask, broadcastable to the attention scores.
    fn forward(&self, hidden_states: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
        let query_layer = self.transpose_for_scores(&self.query.forward(hidden_states)?)?;
        let key_layer = self.transpose_for_scores(&self.key.forward(hidden_states)?)?;
        let value_layer = self.transpose_for_scores(&self.value.forward(hidden_states)?)?;

        let attention_scores = query_layer.matmul(&key_layer.t()?)?;
        let attention_scores = (attention_scores / (self.attention_head_size as f64).sqrt())?;
        let attention_scores = attention_scores.broadcast_add(attention_mask)?;
        let attention_probs = softmax(&attention_scores, D::Minus1)?;

        let context_layer = attention_probs.matmul(&value_layer)?;
        let context_layer = context_layer.transpose(1, 2)?.contiguous()?;
        Ok(context_layer.flatten_from(D::Minus2)?)
    }
}

/// Dense projection followed by a residual connection and layer normalization. Used both after
/// the self attention and after the intermediate layer.
struct BertResidualOutput {
    dense: Linear,
    layer_norm: LayerNorm,
}

impl BertResidualOutput {
    fn load(vb: VarBuilder, in_dim: usize, config: &BertConfig) -> Result<Self> {
        let dense = linear(in_dim, config.hidden_size, vb.pp("dense"))?;
        let layer_norm = layer_norm(
            config.hidden_size,
            config.layer_norm_eps,
            vb.pp("LayerNorm"),
        )?;
        Ok(Self { dense, layer_norm })
    }

    fn forward(&self, hidden_states: &Tensor, input_tensor: &Tensor) -> Result<Tensor> {
        let hidden_states = self.dense.forward(hidden_states)?;
        Ok(self.layer_norm.forward(&(hidden_states + input_tensor)?)?)
    }
}

struct BertLayer {
    self_attention: BertSelfAttention,
    attention_output: BertResidualOutput,
    intermediate: Linear,
    intermediate_act: HiddenActLayer,
    output: BertResidualOutput,
}

impl BertLayer {
    fn load(vb: VarBuilder, config: &BertConfig) -> Result<Self> {
        let self_attention = BertSelfAttention::load(vb.pp("attention.self"), config)?;
        let attention_output =
            BertResidualOutput::load(vb.pp("attention.output"), config.hidden_size, config)?;
        let intermediate = linear(
            config.hidden_size,
            config.intermediate_size,
            vb.pp("intermediate.dense"),
        )?;
        let output = BertResidualOutput::load(vb.pp("output"), config.intermediate_size, config)?;
        Ok(Self {
            self_attention,
            attention_output,
            intermediate,
            intermediate_act: HiddenActLayer::new(config.hidden_act),
            output,
        })
    }

    fn forward(&self, hidden_states: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
        let self_outputs = self.self_attention.forward(hidden_states, attention_mask)?;
        let attention_output = self
            .attention_output
            .forward(&self_outputs, hidden_states)?;
        let intermediate_output = self
            .intermediate_act
            .forward(&self.intermediate.forward(&attention_output)?)?;
        self.output.forward(&intermediate_output, &attention_output)
    }
}

/// The BERT encoder stack, without the pooler (token classification checkpoints are saved
/// without it).
pub struct Bert {
    embeddings: BertEmbeddings,
    layers: Vec<BertLayer>,
}

impl Bert {
    pub fn load(vb: VarBuilder, config: &BertConfig) -> Result<Self> {
        let embeddings = BertEmbeddings::load(vb.pp("embeddings"), config)?;
        let layers = (0..config.num_hidden_layers)
            .map(|index| BertLayer::load(vb.pp(format!("encoder.layer.{index}")), config))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { embeddings, layers })
    }

    /// Runs the encoder and returns the hidden states of every position, with shape
    /// `(batch_size, seq_len, hidden_size)`.
    pub fn forward_return_sequence(
        &self,
        input_ids: &Tensor,
        attention_mask: Option<&Tensor>,
        token_type_ids: Option<&Tensor>,
    ) -> Result<Tensor> {
        let token_type_ids = match token_type_ids {
            Some(token_type_ids) => token_type_ids.clone(),
            None => input_ids.zeros_like()?,
        };
        let attention_mask = match attention_mask {
            Some(attention_mask) => attention_mask.clone(),
            None => input_ids.ones_like()?,
        };
        let hidden_states = self.embeddings.forward(input_ids, &token_type_ids)?;
        let extended_attention_mask =
            get_extended_attention_mask(&attention_mask, hidden_states.dtype())?;
        let mut hidden_states = hidden_states;
        for layer in self.layers.iter() {
            hidden_states = layer.forward(&hidden_states, &extended_attention_mask)?;
        }
        Ok(hidden_states)
    }
}

/// BERT with a linear classification head on top of every token hidden state.
pub struct BertForTokenClassification {
    model: Bert,
    classifier: Linear,
    config: BertConfig,
}

impl BertForTokenClassification {
    pub fn get_bert_config(&self) -> &BertConfig {
        &self.config
    }
}

impl PreTrainedModel for BertForTokenClassification {
    fn load(vb: VarBuilder, config: serde_json::Value) -> Result<Self> {
        let config: BertConfig = serde_json::from_value(config)?;
        let model = Bert::load(vb.pp(BERT_MODEL_NAME), &config)?;
        let classifier = linear(
            config.hidden_size,
            config.pretrained_config.num_labels(),
            vb.pp("classifier"),
        )?;

        Ok(Self {
            model,
            classifier,
            config,
        })
    }

    fn forward(&self, params: ForwardParams) -> Result<Tensor> {
        let input_ids = params
            .get_input_ids()
            .ok_or(Error::MissingForwardParam("input_ids".to_string()))?;
        let sequence_output = self.model.forward_return_sequence(
            input_ids,
            params.get_attention_mask(),
            params.get_token_type_ids(),
        )?;
        Ok(self.classifier.forward(&sequence_output)?)
    }

    fn config(&self) -> &PretrainedConfig {
        &self.config.pretrained_config
    }
}

#[cfg(test)]
mod tests {
    use super::BertForTokenClassification;
    use crate::model::{ForwardParams, PreTrainedModel};
    use candle_core::{DType, Device, IndexOp, Tensor};
    use candle_nn::{VarBuilder, VarMap};

    fn tiny_config() -> serde_json::Value {
        serde_json::json!({
            "model_type": "bert",
            "vocab_size": 16,
            "hidden_size": 8,
            "num_hidden_layers": 2,
            "num_attention_heads": 2,
            "intermediate_size": 16,
            "hidden_act": "gelu",
            "max_position_embeddings": 32,
            "type_vocab_size": 2,
            "layer_norm_eps": 1e-12,
            "id2label": {"0": "O", "1": "B-PER", "2": "I-PER"}
        })
    }

    fn tiny_model() -> BertForTokenClassification {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        BertForTokenClassification::load(vb, tiny_config()).unwrap()
    }

    #[test]
    fn test_logits_shape() {
        let model = tiny_model();
        let input_ids = Tensor::new(&[[1u32, 5, 6, 2]], &Device::Cpu).unwrap();
        let logits = model
            .forward(ForwardParams::new(Some(&input_ids), None, None))
            .unwrap();
        assert_eq!(logits.dims(), &[1, 4, 3]);
    }

    #[test]
    fn test_padding_is_masked() {
        let model = tiny_model();
        let input_ids = Tensor::new(&[[1u32, 5, 6, 2]], &Device::Cpu).unwrap();
        let padded_ids = Tensor::new(&[[1u32, 5, 6, 2, 0, 0]], &Device::Cpu).unwrap();
        let padded_mask = Tensor::new(&[[1u8, 1, 1, 1, 0, 0]], &Device::Cpu).unwrap();

        let logits = model
            .forward(ForwardParams::new(Some(&input_ids), None, None))
            .unwrap();
        let padded_logits = model
            .forward(ForwardParams::new(
                Some(&padded_ids),
                Some(&padded_mask),
                None,
            ))
            .unwrap()
            .i((.., 0..4, ..))
            .unwrap();

        let diff = (logits - padded_logits)
            .unwrap()
            .abs()
            .unwrap()
            .flatten_all()
            .unwrap()
            .max(0)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        assert!(diff < 1e-5, "padding changed the logits by {diff}");
    }
}
