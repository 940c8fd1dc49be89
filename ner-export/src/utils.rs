pub mod from_pretrained;

pub use from_pretrained::{load_model_config, FromPretrainedParameters, MODEL_CONFIG_FILE};
