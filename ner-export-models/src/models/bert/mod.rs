pub mod config;
pub mod modeling;

pub use config::BertConfig;
pub use modeling::{Bert, BertForTokenClassification, BERT_DTYPE, BERT_MODEL_NAME};
