use std::{path::PathBuf, str::FromStr};

use anyhow::{anyhow, Result};
use candle_core::Device;
use clap::{Args, Parser, Subcommand};
use ner_export::FromPretrainedParameters;
use ner_export_pipelines::{
    AggregationStrategy, DEFAULT_CHECK_TEXT, DEFAULT_MAX_LENGTH, DEFAULT_MODEL_ID,
    DEFAULT_OUTPUT_DIR,
};

#[derive(Debug, Parser)]
#[command(name = "ner-export", version, about, long_about = None)]
pub(crate) struct Cli {
    #[command(subcommand)]
    command: Command,

    /// The device to run the model on (`cpu`, `metal` or `cuda:N`).
    #[arg(short, long, global = true, value_parser = parse_device, default_value = "cpu")]
    device: DeviceOption,

    /// The Hugging Face Hub token used to download gated or private models.
    #[arg(long, global = true, env = "HF_TOKEN", hide_env_values = true)]
    hf_token: Option<String>,

    /// Log debug messages.
    #[arg(short, long, global = true)]
    verbose: bool,
}

impl Cli {
    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    /// Get the [`candle_core::Device`] corresponding to the selected device option.
    ///
    /// # Errors
    ///
    /// Returns an error if the requested device is not available.
    pub fn device(&self) -> Result<Device> {
        match self.device {
            DeviceOption::Cuda(device_id) if cfg!(feature = "cuda") => {
                Ok(Device::new_cuda(device_id)?)
            }
            DeviceOption::Metal if cfg!(feature = "metal") => Ok(Device::new_metal(0)?),
            DeviceOption::Cpu => Ok(Device::Cpu),
            _ => Err(anyhow!("Requested device is not available")),
        }
    }

    /// Get the parameters used to resolve a model from the Hugging Face Hub.
    pub fn from_pretrained_parameters(&self, revision: &str) -> FromPretrainedParameters {
        FromPretrainedParameters {
            revision: revision.to_string(),
            auth_token: self.hf_token.clone(),
        }
    }
}

#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Export the tokenizer, the label map and the traced model into a directory.
    Export(ExportArgs),
    /// Run the model on a sentence and print its tokens and the predicted labels.
    Check(CheckArgs),
    /// Find the entities of sentences with an exported model.
    Predict(PredictArgs),
    /// Check an exported model still reproduces the logits recorded when it was traced.
    Verify(VerifyArgs),
}

#[derive(Debug, Args)]
pub(crate) struct ModelArgs {
    /// The Hugging Face Hub repository id of the model, or a local directory.
    #[arg(short, long, default_value = DEFAULT_MODEL_ID)]
    pub model: String,

    /// The revision of the model repository.
    #[arg(long, default_value = "main")]
    pub revision: String,

    /// The example sentence.
    #[arg(short, long, default_value = DEFAULT_CHECK_TEXT)]
    pub text: String,

    /// The maximum number of tokens of the encoded sentence.
    #[arg(long, default_value_t = DEFAULT_MAX_LENGTH)]
    pub max_length: usize,
}

#[derive(Debug, Args)]
pub(crate) struct ExportArgs {
    #[command(flatten)]
    pub model: ModelArgs,

    /// The directory the artifacts are written to.
    #[arg(short, long, default_value = DEFAULT_OUTPUT_DIR)]
    pub output_dir: PathBuf,
}

#[derive(Debug, Args)]
pub(crate) struct CheckArgs {
    #[command(flatten)]
    pub model: ModelArgs,
}

#[derive(Debug, Args)]
pub(crate) struct PredictArgs {
    /// The directory the model was exported to.
    #[arg(short, long, default_value = DEFAULT_OUTPUT_DIR)]
    pub exported_dir: PathBuf,

    /// How the token predictions are grouped into entities.
    #[arg(short, long, value_enum, default_value_t = AggregationOption::Simple)]
    pub aggregation: AggregationOption,

    /// The maximum number of tokens of an encoded sentence.
    #[arg(long, default_value_t = DEFAULT_MAX_LENGTH)]
    pub max_length: usize,

    /// The sentences to find entities in.
    #[arg(default_value = DEFAULT_CHECK_TEXT)]
    pub texts: Vec<String>,
}

#[derive(Debug, Args)]
pub(crate) struct VerifyArgs {
    /// The directory the model was exported to.
    #[arg(short, long, default_value = DEFAULT_OUTPUT_DIR)]
    pub exported_dir: PathBuf,

    /// The maximum absolute difference allowed with the reference logits.
    #[arg(long, default_value_t = 1e-4)]
    pub tolerance: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum AggregationOption {
    None,
    Simple,
    First,
    Average,
    Max,
}

impl From<AggregationOption> for AggregationStrategy {
    fn from(option: AggregationOption) -> Self {
        match option {
            AggregationOption::None => AggregationStrategy::None,
            AggregationOption::Simple => AggregationStrategy::Simple,
            AggregationOption::First => AggregationStrategy::First,
            AggregationOption::Average => AggregationStrategy::Average,
            AggregationOption::Max => AggregationStrategy::Max,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DeviceOption {
    Cpu,
    Metal,
    Cuda(usize),
}

impl FromStr for DeviceOption {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cpu" => Ok(DeviceOption::Cpu),
            "metal" => Ok(DeviceOption::Metal),
            s => match s.strip_prefix("cuda:") {
                Some(id) => Ok(DeviceOption::Cuda(id.parse::<usize>()?)),
                None => Err(anyhow!("Invalid device option: {}", s)),
            },
        }
    }
}

fn parse_device(s: &str) -> Result<DeviceOption, anyhow::Error> {
    DeviceOption::from_str(s)
}

#[cfg(test)]
mod tests {
    use super::{AggregationOption, Cli, Command, DeviceOption};
    use clap::Parser;
    use std::path::PathBuf;

    #[test]
    fn test_export_defaults() {
        let cli = Cli::try_parse_from(["ner-export", "export"]).unwrap();
        assert_eq!(cli.device, DeviceOption::Cpu);
        match cli.command() {
            Command::Export(args) => {
                assert_eq!(args.model.model, "dslim/bert-base-NER");
                assert_eq!(args.model.revision, "main");
                assert_eq!(args.model.max_length, 128);
                assert_eq!(args.model.text, "John works at Microsoft in Seattle");
                assert_eq!(args.output_dir, PathBuf::from("exported_model"));
            }
            command => panic!("unexpected command {command:?}"),
        }
    }

    #[test]
    fn test_check_with_local_model() {
        let cli = Cli::try_parse_from([
            "ner-export",
            "check",
            "--model",
            "./my-model",
            "--text",
            "Ada lives in London",
            "-v",
        ])
        .unwrap();
        assert!(cli.verbose());
        match cli.command() {
            Command::Check(args) => {
                assert_eq!(args.model.model, "./my-model");
                assert_eq!(args.model.text, "Ada lives in London");
            }
            command => panic!("unexpected command {command:?}"),
        }
    }

    #[test]
    fn test_predict_texts_and_aggregation() {
        let cli = Cli::try_parse_from([
            "ner-export",
            "predict",
            "--aggregation",
            "max",
            "--exported-dir",
            "out",
            "John lives in Berlin",
            "Ada works at Google",
        ])
        .unwrap();
        match cli.command() {
            Command::Predict(args) => {
                assert_eq!(args.aggregation, AggregationOption::Max);
                assert_eq!(args.exported_dir, PathBuf::from("out"));
                assert_eq!(args.max_length, 128);
                assert_eq!(args.texts.len(), 2);
            }
            command => panic!("unexpected command {command:?}"),
        }
    }

    #[test]
    fn test_predict_default_text() {
        let cli = Cli::try_parse_from(["ner-export", "predict"]).unwrap();
        match cli.command() {
            Command::Predict(args) => {
                assert_eq!(args.aggregation, AggregationOption::Simple);
                assert_eq!(args.texts, vec!["John works at Microsoft in Seattle"]);
            }
            command => panic!("unexpected command {command:?}"),
        }
    }

    #[test]
    fn test_verify_tolerance() {
        let cli = Cli::try_parse_from(["ner-export", "verify", "--tolerance", "0.01"]).unwrap();
        match cli.command() {
            Command::Verify(args) => assert_eq!(args.tolerance, 0.01),
            command => panic!("unexpected command {command:?}"),
        }
    }

    #[test]
    fn test_device_options() {
        let cli = Cli::try_parse_from(["ner-export", "--device", "cuda:1", "export"]).unwrap();
        assert_eq!(cli.device, DeviceOption::Cuda(1));

        let cli = Cli::try_parse_from(["ner-export", "verify", "-d", "metal"]).unwrap();
        assert_eq!(cli.device, DeviceOption::Metal);

        assert!(Cli::try_parse_from(["ner-export", "--device", "tpu", "export"]).is_err());
        assert!(Cli::try_parse_from(["ner-export", "--device", "cuda:x", "export"]).is_err());
    }

    #[test]
    fn test_cpu_device_is_always_available() {
        let cli = Cli::try_parse_from(["ner-export", "export"]).unwrap();
        assert!(cli.device().unwrap().is_cpu());
    }
}
