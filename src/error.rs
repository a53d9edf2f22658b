use std::io::Write;
use std::path::PathBuf;

use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Usage(String),
    #[error("Failed to load pipeline: invalid value {value:?} for {var}: {reason}")]
    Config {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("Failed to load pipeline: {0:#}")]
    Pipeline(anyhow::Error),
    #[error("Error opening image {}: {source}", .path.display())]
    ImageOpen {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("Failed to extract features: {0:#}")]
    Inference(anyhow::Error),
    #[error("Failed to write feature vector: {0}")]
    Output(#[from] serde_json::Error),
}

impl serde::Serialize for Error {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
      S: serde::ser::Serializer,
    {
      serializer.serialize_str(self.to_string().as_ref())
    }
}

/// The object printed to stderr when a run fails, e.g. `{"error":"Usage: extract_vector <image_path>"}`.
#[derive(Serialize, Debug)]
pub struct ErrorReport<'a> {
    pub error: &'a Error,
}

impl Error {
    /// Writes this error as a single-line JSON report.
    pub fn report<W: Write>(&self, mut writer: W) -> std::io::Result<()>
    {
        serde_json::to_writer(&mut writer, &ErrorReport { error: self })?;
        writeln!(writer)
    }
}
