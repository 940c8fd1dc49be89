#[cfg(feature = "accelerate")]
extern crate accelerate_src;

#[cfg(feature = "mkl")]
extern crate intel_mkl_src;

mod cli;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command};
use ner_export_models::{TracedModel, TRACED_MODEL_FILE};
use ner_export_pipelines::{
    ExportOptions, ExportedModel, Exporter, InferenceCheck, PretrainedClassifier,
    TokenClassificationOptions,
};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = Cli::parse();

    let default_level = if args.verbose() { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let device = args.device()?;
    tracing::debug!("Running on {:?}", device);

    match args.command() {
        Command::Export(export_args) => {
            let options = ExportOptions {
                model_id: export_args.model.model.clone(),
                output_dir: export_args.output_dir.clone(),
                text: export_args.model.text.clone(),
                max_length: export_args.model.max_length,
                params: Some(args.from_pretrained_parameters(&export_args.model.revision)),
            };
            let report = Exporter::new(options, &device).run()?;
            for file in &report.files {
                println!("{}", file.display());
            }
            println!("Model exported successfully!");
        }
        Command::Check(check_args) => {
            let mut classifier = PretrainedClassifier::new(
                &check_args.model.model,
                &device,
                Some(args.from_pretrained_parameters(&check_args.model.revision)),
                Some(check_args.model.max_length),
            )?;
            let output = InferenceCheck::new(check_args.model.text.as_str()).run(&mut classifier)?;
            println!("{:?}", output.tokens);
            println!("{:?}", output.labels);
        }
        Command::Predict(predict_args) => {
            let mut model = ExportedModel::load(&predict_args.exported_dir, &device)?
                .with_max_length(predict_args.max_length);
            let options = TokenClassificationOptions {
                aggregation_strategy: predict_args.aggregation.into(),
                ..Default::default()
            };
            for text in &predict_args.texts {
                let entities = model.predict(text, Some(options.clone()))?;
                println!("{}", text);
                println!("Found entities:");
                for entity in &entities {
                    println!(
                        "  {}: {} ({:.4}, {}..{})",
                        entity.get_word(),
                        entity.get_entity(),
                        entity.get_score(),
                        entity.get_start(),
                        entity.get_end()
                    );
                }
            }
        }
        Command::Verify(verify_args) => {
            let traced =
                TracedModel::load(verify_args.exported_dir.join(TRACED_MODEL_FILE), &device)?;
            let diff = traced.verify(verify_args.tolerance)?;
            println!(
                "Traced model reproduces its reference logits (max abs difference {:e}, tolerance {:e})",
                diff, verify_args.tolerance
            );
        }
    }

    Ok(())
}
