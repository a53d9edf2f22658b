//! The command-line driver: validate the single image argument, then build the
//! pipeline, load the image, extract its features and print them, stopping at the
//! first failure.

use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};

use clap::{CommandFactory, Parser};
use log::{debug, info};

use crate::config::Config;
use crate::error::Error;
use crate::pipeline::{FeatureExtractor, Pipeline};
use crate::preprocessing;

pub const BIN_NAME: &str = "extract_vector";

#[derive(Debug, Parser)]
#[command(name = BIN_NAME, version, about = "Prints the DINOv2 feature vector of an image as a JSON array")]
struct Args
{
    /// The image to encode
    #[arg(allow_hyphen_values = true)]
    image_path: PathBuf,
}

/// What the command line asked for.
#[derive(Debug, PartialEq, Eq)]
pub enum Invocation
{
    Extract(PathBuf),
    /// `--help` or `--version`; the text goes to stdout as-is.
    Info(String),
}

pub fn usage() -> String
{
    format!("Usage: {} <image_path>", BIN_NAME)
}

/// Parses the full argument list, including the program name.
/// Exactly one argument must follow the program name; a path may start with `-`.
pub fn parse_args<I, T>(args: I) -> Result<Invocation, Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
    if args.len() != 2 {
        debug!("Expected exactly one argument, got {}", args.len().saturating_sub(1));
        return Err(Error::Usage(usage()));
    }

    // Checked by hand: the path accepts leading hyphens, which would swallow `-h`.
    match args[1].to_str() {
        Some("-h") | Some("--help") => return Ok(Invocation::Info(Args::command().render_help().to_string())),
        Some("-V") | Some("--version") => return Ok(Invocation::Info(Args::command().render_version())),
        _ => {},
    }

    match Args::try_parse_from(args) {
        Ok(args) => Ok(Invocation::Extract(args.image_path)),
        Err(e) => {
            debug!("Rejected arguments: {}", e.render());
            Err(Error::Usage(usage()))
        },
    }
}

/// Runs one invocation, writing results to stdout.
pub fn run<I, T>(args: I) -> Result<(), Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let image_path = match parse_args(args)? {
        Invocation::Info(text) => {
            print!("{}", text);
            return Ok(());
        },
        Invocation::Extract(path) => path,
    };

    let config = Config::from_env()?;
    let pipeline = Pipeline::new(&config)?;
    info!("Pipeline ready: {} on {}", pipeline.model(), pipeline.device());

    let stdout = std::io::stdout();
    encode_image(&pipeline, &image_path, stdout.lock())?;
    Ok(())
}

/// Loads the image, extracts its features and prints them.
/// Returns whether anything was printed; nothing is written if a step fails.
pub fn encode_image<E, W>(extractor: &E, image_path: &Path, writer: W) -> Result<bool, Error>
where
    E: FeatureExtractor,
    W: Write,
{
    let image = preprocessing::load_image(image_path)?;
    debug!("Loaded {:?} ({}x{})", image_path, image.width(), image.height());

    let features = extractor.extract(&image)?;
    write_features(&features, writer)
}

/// Prints the features as one JSON line. Returns false, printing nothing, for an empty vector.
pub fn write_features<W: Write>(features: &[f32], mut writer: W) -> Result<bool, Error>
{
    if features.is_empty() {
        info!("Feature extraction produced no values; nothing to print");
        return Ok(false);
    }

    serde_json::to_writer(&mut writer, features)?;
    writeln!(writer).and_then(|_| writer.flush()).map_err(serde_json::Error::io)?;
    Ok(true)
}
