pub mod config;
pub mod from_pretrained;
pub mod model;
pub mod models;
pub mod traced;
pub mod utils;

pub use config::PretrainedConfig;
pub use from_pretrained::{from_pretrained, ModelInfo};
pub use model::{AutoModelForTokenClassification, ForwardParams, PreTrainedModel};
pub use traced::{LogitsOnly, TracedModel, TRACED_MODEL_FILE};

// BERT
pub use models::bert::{Bert, BertConfig, BertForTokenClassification};
