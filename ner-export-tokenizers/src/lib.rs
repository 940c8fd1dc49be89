pub mod config;
pub mod encoding;
pub mod from_pretrained;
pub mod tokenizer;
pub mod tokenizers;

pub use config::TokenizerConfig;
pub use encoding::BatchEncoding;
pub use tokenizer::{AutoTokenizer, Padding, Tokenizer, TokenizerBuilder};
pub use tokenizers::bert::{BertTokenizer, BertTokenizerBuilder};
