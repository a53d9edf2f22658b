//! Runtime settings, read from the environment.
//!
//! The command line only carries the image path, so everything else that shapes the
//! pipeline (which model, where its weights live, which device runs it) comes from
//! `EXTRACT_VECTOR_*` variables. Unset or empty variables fall back to the defaults below.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::Error;

pub const MODEL_VAR: &str = "EXTRACT_VECTOR_MODEL";
pub const MODEL_DIR_VAR: &str = "EXTRACT_VECTOR_MODEL_DIR";
pub const DEVICE_VAR: &str = "EXTRACT_VECTOR_DEVICE";
pub const THREADS_VAR: &str = "EXTRACT_VECTOR_THREADS";

pub const DEFAULT_MODEL: &str = "dinov2-base";
pub const DEFAULT_INTRA_THREADS: usize = 4;

/// Models are published under this namespace in the model hub; we accept it but don't need it.
const MODEL_NAMESPACE: &str = "facebook/";

/// DINOv2 emits one CLS token plus one token per 14x14 patch of the 224x224 crop.
pub const DINOV2_TOKEN_COUNT: usize = 1 + (224 / 14) * (224 / 14);

/// A pretrained model, addressed by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec
{
    name: String,
}

impl ModelSpec
{
    pub fn parse(name: &str) -> Self
    {
        let name = name.trim();
        let name = name.strip_prefix(MODEL_NAMESPACE).unwrap_or(name);
        ModelSpec { name: name.to_string() }
    }

    pub fn name(&self) -> &str
    {
        &self.name
    }

    /// The file holding the ONNX export of this model inside a model repository.
    pub fn file_name(&self) -> String
    {
        format!("{}.onnx", self.name)
    }

    /// Width of each output token, for the models we know.
    pub fn hidden_size(&self) -> Option<usize>
    {
        match self.name.as_str() {
            "dinov2-small" => Some(384),
            "dinov2-base" => Some(768),
            "dinov2-large" => Some(1024),
            "dinov2-giant" => Some(1536),
            _ => None,
        }
    }

    /// Length of the flattened feature vector, for the models we know.
    pub fn feature_len(&self) -> Option<usize>
    {
        self.hidden_size().map(|hidden| hidden * DINOV2_TOKEN_COUNT)
    }
}

impl Default for ModelSpec
{
    fn default() -> Self
    {
        ModelSpec::parse(DEFAULT_MODEL)
    }
}

impl fmt::Display for ModelSpec
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        write!(f, "{}", self.name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DevicePreference
{
    /// Use CUDA when it is available, the CPU otherwise.
    #[default]
    Auto,
    Cpu,
    /// Fail pipeline construction if CUDA is not available.
    Cuda,
}

impl FromStr for DevicePreference
{
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(DevicePreference::Auto),
            "cpu" => Ok(DevicePreference::Cpu),
            "cuda" | "gpu" => Ok(DevicePreference::Cuda),
            _ => Err("expected auto, cpu or cuda".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config
{
    pub model: ModelSpec,
    /// Model repositories, searched in order.
    pub model_dirs: Vec<PathBuf>,
    pub device: DevicePreference,
    pub intra_threads: usize,
}

impl Config
{
    pub fn from_env() -> Result<Self, Error>
    {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Builds the config from any variable source; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |var: &str| lookup(var).filter(|value| !value.trim().is_empty());

        let model = lookup(MODEL_VAR)
            .map(|name| ModelSpec::parse(&name))
            .unwrap_or_default();

        let device = match lookup(DEVICE_VAR) {
            Some(value) => value.parse().map_err(|reason| Error::Config { var: DEVICE_VAR, value, reason })?,
            None => DevicePreference::default(),
        };

        let intra_threads = match lookup(THREADS_VAR) {
            Some(value) => parse_thread_count(&value).map_err(|reason| Error::Config { var: THREADS_VAR, value, reason })?,
            None => DEFAULT_INTRA_THREADS,
        };

        let mut model_dirs = Vec::new();
        if let Some(dir) = lookup(MODEL_DIR_VAR) {
            model_dirs.push(PathBuf::from(dir));
        }
        model_dirs.extend(default_model_dirs());

        Ok(Config { model, model_dirs, device, intra_threads })
    }

    /// Finds the model file in the first repository that has it.
    pub fn locate_model(&self) -> anyhow::Result<PathBuf>
    {
        let file_name = self.model.file_name();
        self.model_dirs.iter()
            .map(|dir| dir.join(&file_name))
            .find(|path| path.is_file())
            .ok_or_else(|| {
                let searched = self.model_dirs.iter()
                    .map(|dir| dir.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                anyhow::anyhow!("model {} not found; searched [{}]", file_name, searched)
            })
    }
}

fn parse_thread_count(value: &str) -> Result<usize, String>
{
    match value.trim().parse::<usize>() {
        Ok(0) => Err("thread count must be at least 1".to_string()),
        Ok(count) => Ok(count),
        Err(e) => Err(e.to_string()),
    }
}

/// The per-user data directory, then the models shipped next to the crate.
fn default_model_dirs() -> Vec<PathBuf>
{
    let mut repositories = Vec::new();
    if let Some(data_dir) = dirs::data_dir() {
        repositories.push(data_dir.join("extract-vector").join("models"));
    }
    repositories.push(Path::new(env!("CARGO_MANIFEST_DIR")).join("models"));
    repositories
}
