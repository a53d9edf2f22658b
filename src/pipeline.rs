use image::DynamicImage;
use log::{debug, info, warn};
use ndarray::{ArrayViewD, Axis};
use ort::{self, inputs, GraphOptimizationLevel};

use crate::config::{Config, ModelSpec};
use crate::device::{self, Device};
use crate::error::Error;
use crate::preprocessing;

/// Turns a decoded image into its feature vector.
pub trait FeatureExtractor
{
    fn extract(&self, image: &DynamicImage) -> Result<Vec<f32>, Error>;
}

/// An image feature-extraction pipeline: DINOv2 preprocessing in front of an ONNX Runtime session.
///
/// The session runs an ONNX export of the model whose first output is the last hidden state,
/// shaped `(batch, tokens, hidden)`. For `dinov2-base` that is `(1, 257, 768)`.
///
/// Built once per process; construction is by far the slowest step.
pub struct Pipeline
{
    session: ort::Session,
    model: ModelSpec,
    device: Device,
}

impl Pipeline
{
    pub fn new(config: &Config) -> Result<Self, Error>
    {
        Self::build(config).map_err(Error::Pipeline)
    }

    fn build(config: &Config) -> anyhow::Result<Self>
    {
        let model_path = config.locate_model()?;
        let selected = device::select(config.device)?;
        info!("Loading {} from {:?} on {}", config.model, model_path, selected);

        let now = std::time::Instant::now();
        let (session, device) = device::commit_with_fallback(config.device, selected, |device| {
            let session = ort::Session::builder()?
                .with_optimization_level(GraphOptimizationLevel::Level3)?
                .with_intra_threads(config.intra_threads)?
                .with_execution_providers(device.execution_providers())?
                .commit_from_file(&model_path)?;
            Ok(session)
        })?;
        info!("Pipeline construction on {} took {:?}", device, now.elapsed());

        if session.outputs.is_empty() {
            anyhow::bail!("model {:?} declares no outputs", model_path);
        }
        debug!("Model inputs: {:?}", session.inputs.iter().map(|input| &input.name).collect::<Vec<_>>());
        debug!("Model outputs: {:?}", session.outputs.iter().map(|output| &output.name).collect::<Vec<_>>());

        Ok(Pipeline { session, model: config.model.clone(), device })
    }

    pub fn model(&self) -> &ModelSpec
    {
        &self.model
    }

    pub fn device(&self) -> Device
    {
        self.device
    }

    fn forward(&self, image: &DynamicImage) -> anyhow::Result<Vec<f32>>
    {
        let input = preprocessing::image_to_model_input(image)?;

        // Checked non-empty at construction.
        let output_name = self.session.outputs[0].name.as_str();

        let now = std::time::Instant::now();
        let outputs = self.session.run(inputs![input]?)?;
        debug!("Inference took {:?}", now.elapsed());

        let output = outputs[output_name].try_extract_tensor::<f32>()?;
        debug!("Output {:?} has shape {:?}", output_name, output.shape());

        let features = flatten_first_item(output);
        ensure_finite(&features)?;

        if let Some(expected) = self.model.feature_len() {
            if features.len() != expected {
                warn!("{} produced {} features, expected {}", self.model, features.len(), expected);
            }
        }

        Ok(features)
    }
}

impl FeatureExtractor for Pipeline
{
    /// Runs one forward pass and returns the first output for the image, flattened.
    fn extract(&self, image: &DynamicImage) -> Result<Vec<f32>, Error>
    {
        self.forward(image).map_err(Error::Inference)
    }
}

/// JSON has no NaN or infinity; serde_json would print them as `null`.
pub fn ensure_finite(features: &[f32]) -> anyhow::Result<()>
{
    match features.iter().position(|value| !value.is_finite()) {
        Some(index) => anyhow::bail!("model output has non-finite value {} at index {}", features[index], index),
        None => Ok(()),
    }
}

/// Takes the first item along the batch axis and flattens it in row-major order.
/// A scalar or an empty batch yields an empty vector.
pub fn flatten_first_item(tensor: ArrayViewD<f32>) -> Vec<f32>
{
    if tensor.ndim() == 0 || tensor.len_of(Axis(0)) == 0 {
        return Vec::new();
    }
    tensor.index_axis(Axis(0), 0).iter().copied().collect()
}
