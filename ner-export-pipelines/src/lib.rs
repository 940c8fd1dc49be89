pub mod check;
pub mod classifier;
pub mod entities;
pub mod export;
pub mod label_map;
pub mod predict;

#[cfg(test)]
mod testing;

pub use check::{CheckOutput, InferenceCheck, DEFAULT_CHECK_TEXT};
pub use classifier::{PretrainedClassifier, TokenClassifier, TokenizedText};
pub use entities::{
    extract_entities, AggregationStrategy, Entity, EntityExtractor, TokenClassificationOptions,
};
pub use export::{
    ExportOptions, ExportReport, Exporter, DEFAULT_MAX_LENGTH, DEFAULT_MODEL_ID,
    DEFAULT_OUTPUT_DIR,
};
pub use label_map::{LabelMap, LABEL_MAP_FILE};
pub use predict::ExportedModel;
