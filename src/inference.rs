use std::path::Path;

use image::DynamicImage;
use ndarray::Array4;
use tract_onnx::prelude::*;

use crate::config::ModelConfig;
use crate::error::{AppError, Result};
use crate::manifest::LabelManifest;
use crate::prediction::Prediction;
use crate::preprocess::Preprocessor;

/// Anything that turns a batched input tensor into a raw output vector.
pub trait Classifier: Send + Sync {
    fn run(&self, input: Array4<f32>) -> Result<Vec<f32>>;
}

/// ONNX classifier executed with tract. The input shape is fixed at load
/// time so the plan can be fully optimized.
pub struct OnnxClassifier {
    plan: SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>,
}

impl OnnxClassifier {
    pub fn load(path: &Path, input_shape: [usize; 4]) -> Result<Self> {
        let load_err = |reason: String| AppError::ModelLoad {
            path: path.display().to_string(),
            reason,
        };

        let plan = tract_onnx::onnx()
            .model_for_path(path)
            .map_err(|e| load_err(format!("cannot parse model: {e}")))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(
                    input_shape[0],
                    input_shape[1],
                    input_shape[2],
                    input_shape[3]
                )),
            )
            .map_err(|e| load_err(format!("input shape rejected: {e}")))?
            .into_optimized()
            .map_err(|e| load_err(format!("optimization failed: {e}")))?
            .into_runnable()
            .map_err(|e| load_err(format!("cannot build plan: {e}")))?;

        Ok(Self { plan })
    }
}

impl Classifier for OnnxClassifier {
    fn run(&self, input: Array4<f32>) -> Result<Vec<f32>> {
        let shape = input.shape().to_vec();
        let data = input.into_raw_vec();
        let tensor = Tensor::from_shape(&shape, &data)
            .map_err(|e| AppError::Inference(format!("cannot build input tensor: {e}")))?;

        let outputs = self
            .plan
            .run(tvec!(tensor.into()))
            .map_err(|e| AppError::Inference(e.to_string()))?;

        let first = outputs
            .first()
            .ok_or_else(|| AppError::MalformedOutput("model produced no outputs".into()))?;
        let view = first
            .to_array_view::<f32>()
            .map_err(|e| AppError::MalformedOutput(e.to_string()))?;
        Ok(view.iter().copied().collect())
    }
}

/// Image in, prediction out. Owns the classifier together with the label
/// manifest that says how to read its output.
pub struct InferenceAdapter {
    classifier: Box<dyn Classifier>,
    manifest: LabelManifest,
    preprocessor: Preprocessor,
}

impl InferenceAdapter {
    pub fn new(
        classifier: Box<dyn Classifier>,
        manifest: LabelManifest,
        preprocessor: Preprocessor,
    ) -> Self {
        Self {
            classifier,
            manifest,
            preprocessor,
        }
    }

    /// Load the manifest first so an ambiguous class order is reported
    /// before any model parsing work.
    pub fn load(cfg: &ModelConfig) -> Result<Self> {
        let manifest =
            LabelManifest::load(&cfg.manifest_path, &cfg.authentic_label, &cfg.replica_label)?;
        let preprocessor = Preprocessor {
            input_size: manifest.input_size,
            resize: cfg.resize,
            normalization: cfg.normalization,
            layout: cfg.layout,
        };
        let classifier = OnnxClassifier::load(&cfg.model_path, preprocessor.shape())?;

        tracing::info!(
            model = %cfg.model_path.display(),
            labels = ?manifest.labels,
            input_size = manifest.input_size,
            "model loaded"
        );
        Ok(Self::new(Box::new(classifier), manifest, preprocessor))
    }

    pub fn manifest(&self) -> &LabelManifest {
        &self.manifest
    }

    pub fn predict_bytes(&self, bytes: &[u8]) -> Result<Prediction> {
        let img = Preprocessor::decode(bytes)?;
        self.predict_image(&img)
    }

    pub fn predict_image(&self, img: &DynamicImage) -> Result<Prediction> {
        let input = self.preprocessor.to_tensor(img);
        let output = self.classifier.run(input)?;
        tracing::debug!(?output, "raw model output");

        if output.len() != self.manifest.class_count() {
            return Err(AppError::MalformedOutput(format!(
                "model emitted {} values but the manifest declares {} labels",
                output.len(),
                self.manifest.class_count()
            )));
        }
        Prediction::from_output(&output, self.manifest.authentic_index)
    }
}
