// Wake word classifier adapter
// Wraps a loaded model behind a trait seam; inference before load fails loudly

use crate::features::FeatureMatrix;
use crate::{debug, info, trace};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::{Path, PathBuf};

/// Errors from loading or running the classifier
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClassifierError {
    /// Inference attempted before a model was loaded
    #[error("Wake word model is not loaded")]
    ModelNotReady,
    /// Model asset missing or corrupt
    #[error("Failed to load wake word model: {0}")]
    ModelLoadFailed(String),
    /// The runtime rejected the forward pass
    #[error("Wake word inference failed: {0}")]
    InferenceFailed(String),
    /// The model produced no usable confidence value
    #[error("Wake word model returned invalid output: {0}")]
    InvalidOutput(String),
}

/// A loaded model mapping a feature matrix to a raw confidence
pub trait WakeWordModel: Send {
    fn predict(&mut self, features: &FeatureMatrix) -> Result<f32, ClassifierError>;
}

/// Produces a model on demand; called once per engine start
pub trait ModelLoader: Send + Sync {
    fn load(&self) -> Result<Box<dyn WakeWordModel>, ClassifierError>;

    /// Human-readable description for logs
    fn describe(&self) -> String {
        "custom model".to_string()
    }
}

impl<F> ModelLoader for F
where
    F: Fn() -> Result<Box<dyn WakeWordModel>, ClassifierError> + Send + Sync,
{
    fn load(&self) -> Result<Box<dyn WakeWordModel>, ClassifierError> {
        self()
    }
}

/// Holds at most one loaded model and validates its output
#[derive(Default)]
pub struct WakeWordClassifier {
    model: Option<Box<dyn WakeWordModel>>,
}

impl WakeWordClassifier {
    pub fn new() -> Self {
        Self { model: None }
    }

    /// Load a model through `loader`, replacing any current one
    ///
    /// On failure the classifier is left unloaded.
    pub fn load(&mut self, loader: &dyn ModelLoader) -> Result<(), ClassifierError> {
        self.model = None;
        let model = loader.load()?;
        self.install(model);
        Ok(())
    }

    /// Adopt an already loaded model
    pub fn install(&mut self, model: Box<dyn WakeWordModel>) {
        self.model = Some(model);
        debug!("[classifier] Model installed");
    }

    /// Release the model; later inference fails with `ModelNotReady`
    pub fn unload(&mut self) {
        if self.model.take().is_some() {
            debug!("[classifier] Model unloaded");
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    /// Run one forward pass, returning a confidence in [0, 1]
    pub fn infer(&mut self, features: &FeatureMatrix) -> Result<f32, ClassifierError> {
        let model = self.model.as_mut().ok_or(ClassifierError::ModelNotReady)?;
        let raw = model.predict(features)?;
        if raw.is_nan() {
            return Err(ClassifierError::InvalidOutput("confidence is NaN".to_string()));
        }
        let confidence = raw.clamp(0.0, 1.0);
        trace!("[classifier] confidence={:.4}", confidence);
        Ok(confidence)
    }
}

impl std::fmt::Debug for WakeWordClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WakeWordClassifier")
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

/// ONNX Runtime session taking a `(1, bands, frames)` float tensor
pub struct OnnxWakeWordModel {
    session: Session,
}

impl OnnxWakeWordModel {
    pub fn from_file(path: &Path) -> Result<Self, ClassifierError> {
        if !path.is_file() {
            return Err(ClassifierError::ModelLoadFailed(format!(
                "model file not found: {}",
                path.display()
            )));
        }

        let session = Session::builder()
            .map_err(load_failed)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(load_failed)?
            .with_intra_threads(1)
            .map_err(load_failed)?
            .with_inter_threads(1)
            .map_err(load_failed)?
            .commit_from_file(path)
            .map_err(load_failed)?;

        info!("[classifier] Loaded ONNX model from {}", path.display());
        Ok(Self { session })
    }
}

impl WakeWordModel for OnnxWakeWordModel {
    fn predict(&mut self, features: &FeatureMatrix) -> Result<f32, ClassifierError> {
        let input = features.to_input_array().map_err(inference_failed)?;
        let tensor = Tensor::from_array(input).map_err(inference_failed)?;

        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .map_err(inference_failed)?;

        let output = outputs[0]
            .try_extract_array::<f32>()
            .map_err(|e| ClassifierError::InvalidOutput(e.to_string()))?;

        // First scalar of the first output, whatever its rank
        output
            .iter()
            .next()
            .copied()
            .ok_or_else(|| ClassifierError::InvalidOutput("empty output tensor".to_string()))
    }
}

fn load_failed(err: impl std::fmt::Display) -> ClassifierError {
    ClassifierError::ModelLoadFailed(err.to_string())
}

fn inference_failed(err: impl std::fmt::Display) -> ClassifierError {
    ClassifierError::InferenceFailed(err.to_string())
}

/// Loads an [`OnnxWakeWordModel`] from a file path
#[derive(Debug, Clone)]
pub struct OnnxModelLoader {
    path: PathBuf,
}

impl OnnxModelLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ModelLoader for OnnxModelLoader {
    fn load(&self) -> Result<Box<dyn WakeWordModel>, ClassifierError> {
        Ok(Box::new(OnnxWakeWordModel::from_file(&self.path)?))
    }

    fn describe(&self) -> String {
        format!("ONNX model at {}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedModel(f32);

    impl WakeWordModel for FixedModel {
        fn predict(&mut self, _features: &FeatureMatrix) -> Result<f32, ClassifierError> {
            Ok(self.0)
        }
    }

    fn fixed_loader(value: f32) -> impl ModelLoader {
        move || -> Result<Box<dyn WakeWordModel>, ClassifierError> {
            Ok(Box::new(FixedModel(value)))
        }
    }

    fn features() -> FeatureMatrix {
        FeatureMatrix::zeros(16, 96)
    }

    #[test]
    fn test_infer_before_load_is_model_not_ready() {
        let mut classifier = WakeWordClassifier::new();
        assert!(!classifier.is_loaded());
        assert_eq!(
            classifier.infer(&features()),
            Err(ClassifierError::ModelNotReady)
        );
    }

    #[test]
    fn test_load_then_infer() {
        let mut classifier = WakeWordClassifier::new();
        classifier.load(&fixed_loader(0.8)).unwrap();
        assert!(classifier.is_loaded());
        assert_eq!(classifier.infer(&features()), Ok(0.8));
        // Reused across calls
        assert_eq!(classifier.infer(&features()), Ok(0.8));
    }

    #[test]
    fn test_unload_returns_to_not_ready() {
        let mut classifier = WakeWordClassifier::new();
        classifier.install(Box::new(FixedModel(0.3)));
        classifier.unload();
        assert_eq!(
            classifier.infer(&features()),
            Err(ClassifierError::ModelNotReady)
        );
        // Unloading twice is harmless
        classifier.unload();
    }

    #[test]
    fn test_failed_load_leaves_classifier_unloaded() {
        let mut classifier = WakeWordClassifier::new();
        classifier.install(Box::new(FixedModel(0.3)));

        let failing = || -> Result<Box<dyn WakeWordModel>, ClassifierError> {
            Err(ClassifierError::ModelLoadFailed("corrupt".to_string()))
        };
        let err = classifier.load(&failing).unwrap_err();
        assert_eq!(err, ClassifierError::ModelLoadFailed("corrupt".to_string()));
        assert!(!classifier.is_loaded());
    }

    #[test]
    fn test_output_is_clamped_to_unit_range() {
        let mut classifier = WakeWordClassifier::new();
        classifier.install(Box::new(FixedModel(1.7)));
        assert_eq!(classifier.infer(&features()), Ok(1.0));

        classifier.install(Box::new(FixedModel(-0.2)));
        assert_eq!(classifier.infer(&features()), Ok(0.0));
    }

    #[test]
    fn test_nan_output_is_invalid() {
        let mut classifier = WakeWordClassifier::new();
        classifier.install(Box::new(FixedModel(f32::NAN)));
        assert!(matches!(
            classifier.infer(&features()),
            Err(ClassifierError::InvalidOutput(_))
        ));
    }

    #[test]
    fn test_onnx_loader_reports_missing_file() {
        let loader = OnnxModelLoader::new("/nonexistent/wakeword.onnx");
        assert!(loader.describe().contains("wakeword.onnx"));
        match loader.load() {
            Err(ClassifierError::ModelLoadFailed(msg)) => assert!(msg.contains("not found")),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("loading a missing file should fail"),
        }
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            ClassifierError::ModelNotReady.to_string(),
            "Wake word model is not loaded"
        );
        assert!(ClassifierError::InferenceFailed("boom".into())
            .to_string()
            .contains("boom"));
    }
}
