use clap::Parser;
use std::path::{Path, PathBuf};

use crate::errors::{ReasonSegError, Result};
use crate::inference::PromptTokens;
use crate::projector::MaskLayout;

#[derive(Parser, Clone, Debug)]
#[command(version, about, long_about = None)]
pub struct Config {
    pub input_dir: PathBuf,

    #[arg(default_value = "output")]
    pub output_dir: PathBuf,

    #[arg(short, long)]
    pub model_path: PathBuf,

    /// JSON array with the tokenized prompt, containing exactly one image placeholder (-200)
    #[arg(long)]
    pub input_ids: PathBuf,

    /// Hugging Face style preprocessor_config.json of the vision encoder
    #[arg(long)]
    pub clip_config: Option<PathBuf>,

    /// Canvas size of the segmentation path
    #[arg(long, default_value_t = 1024)]
    pub image_size: u32,

    #[arg(long, default_value_t = 512)]
    pub max_new_tokens: usize,

    /// Frame in which the model returns its mask
    #[arg(long, value_enum, default_value_t = MaskLayout::PrePad)]
    pub mask_layout: MaskLayout,

    /// Number of images decoded and encoded ahead of inference
    #[arg(short, long, default_value_t = 1)]
    pub batch_size: usize,

    #[arg(short, long, default_value_t = 0)]
    pub device_id: i32,

    /// Abort on the first failing image instead of skipping it
    #[arg(long)]
    pub fail_fast: bool,

    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.image_size == 0 {
            return Err(ReasonSegError::validation("image_size", "must be greater than zero"));
        }
        if self.batch_size == 0 {
            return Err(ReasonSegError::validation("batch_size", "must be greater than zero"));
        }
        if self.max_new_tokens == 0 {
            return Err(ReasonSegError::validation(
                "max_new_tokens",
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Tracing filter matching the `-v` count.
    pub const fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

/// Reads a prompt token id sequence from a JSON array file.
pub fn load_prompt_tokens(path: &Path) -> Result<PromptTokens> {
    let json = std::fs::read_to_string(path).map_err(|e| ReasonSegError::FileSystem {
        path: path.to_path_buf(),
        operation: "read prompt token ids".to_string(),
        source: e,
    })?;
    let ids: Vec<i64> = serde_json::from_str(&json)?;
    PromptTokens::new(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_cli_defaults() {
        let config = Config::parse_from([
            "reason-seg",
            "input",
            "--model-path",
            "model.onnx",
            "--input-ids",
            "prompt.json",
        ]);
        assert_eq!(config.output_dir, PathBuf::from("output"));
        assert_eq!(config.image_size, 1024);
        assert_eq!(config.max_new_tokens, 512);
        assert_eq!(config.mask_layout, MaskLayout::PrePad);
        assert_eq!(config.batch_size, 1);
        assert!(!config.fail_fast);
        assert_eq!(config.log_filter(), "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cli_overrides() {
        let config = Config::parse_from([
            "reason-seg",
            "input",
            "out",
            "-m",
            "model.onnx",
            "--input-ids",
            "prompt.json",
            "--mask-layout",
            "canvas",
            "--batch-size",
            "0",
            "-vv",
        ]);
        assert_eq!(config.mask_layout, MaskLayout::Canvas);
        assert_eq!(config.log_filter(), "trace");
        assert!(matches!(
            config.validate(),
            Err(ReasonSegError::Validation { .. })
        ));
    }

    #[test]
    fn test_load_prompt_tokens() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("prompt.json");
        std::fs::write(&path, "[1, 319, -200, 13]")?;
        assert_eq!(load_prompt_tokens(&path)?.as_slice(), &[1, 319, -200, 13]);

        std::fs::write(&path, "[1, 319, 13]")?;
        assert!(load_prompt_tokens(&path).is_err());
        Ok(())
    }
}
