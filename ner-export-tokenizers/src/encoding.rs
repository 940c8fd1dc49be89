use candle_core::{Device, Tensor};
use ner_export::Result;
use tokenizers::Encoding;

/// The encoding of a batch of sequences, ready to be passed to a model.
#[derive(Debug)]
pub struct BatchEncoding {
    input_ids: Tensor,
    token_type_ids: Tensor,
    attention_mask: Tensor,
    encodings: Vec<Encoding>,
}

impl BatchEncoding {
    pub fn new(
        input_ids: Tensor,
        token_type_ids: Tensor,
        attention_mask: Tensor,
        encodings: Vec<Encoding>,
    ) -> Self {
        BatchEncoding {
            input_ids,
            token_type_ids,
            attention_mask,
            encodings,
        }
    }

    pub fn get_input_ids(&self) -> &Tensor {
        &self.input_ids
    }

    pub fn get_token_type_ids(&self) -> &Tensor {
        &self.token_type_ids
    }

    pub fn get_attention_mask(&self) -> &Tensor {
        &self.attention_mask
    }

    pub fn get_encodings(&self) -> &[Encoding] {
        &self.encodings
    }

    /// The padded sequence length of the batch.
    pub fn seq_len(&self) -> usize {
        self.input_ids.dims().last().copied().unwrap_or(0)
    }

    pub fn to_device(&mut self, device: &Device) -> Result<()> {
        self.input_ids = self.input_ids.to_device(device)?;
        self.token_type_ids = self.token_type_ids.to_device(device)?;
        self.attention_mask = self.attention_mask.to_device(device)?;
        Ok(())
    }
}
