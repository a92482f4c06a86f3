use super::preprocess::Preprocessor;
use super::types::{Mask, ModelVariant, OracleOptions, SegmentationOracle};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use image::RgbImage;
use ndarray::{Array1, ArrayD, IxDyn};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::{Path, PathBuf};

/// RobustVideoMatting segmentation model
///
/// This model uses recurrent connections to maintain temporal consistency.
/// Hidden states (r1-r4) are carried between frames for smooth results,
/// which is why one instance must only ever see one video stream.
pub struct RobustVideoMatting {
    model_path: PathBuf,
    session: Option<Session>,
    preprocessor: Preprocessor,

    // Recurrent hidden states, fed back on the next frame
    recurrent: Option<[ArrayD<f32>; 4]>,

    // Downsample ratio for hidden states
    downsample_ratio: f32,
}

impl RobustVideoMatting {
    /// Create an RVM oracle for an ONNX file.
    ///
    /// The model is loaded by [`SegmentationOracle::configure`], so a missing
    /// or broken file is reported when the session starts.
    pub fn new<P: AsRef<Path>>(model_path: P) -> Self {
        let (width, height) = input_size(ModelVariant::default());
        Self {
            model_path: model_path.as_ref().to_path_buf(),
            session: None,
            preprocessor: Preprocessor::new(width, height),
            recurrent: None,
            downsample_ratio: 0.25,
        }
    }

    fn load_session(&self) -> Result<Session> {
        let path = &self.model_path;
        tracing::info!("Loading RVM model from {}", path.display());

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(path)
            .with_context(|| format!("Failed to load model from {}", path.display()))?;

        tracing::info!("RVM model loaded successfully");
        Ok(session)
    }
}

/// Model input size for a variant
///
/// Both sides stay multiples of 64 so the downsampled feature maps divide
/// evenly through the encoder.
fn input_size(variant: ModelVariant) -> (u32, u32) {
    match variant {
        ModelVariant::General => (512, 512),
        ModelVariant::Landscape => (640, 384),
    }
}

fn initial_state() -> [ArrayD<f32>; 4] {
    // RVM accepts 1x1x1x1 zeros for the first frame and broadcasts them
    std::array::from_fn(|_| ArrayD::zeros(IxDyn(&[1, 1, 1, 1])))
}

#[async_trait]
impl SegmentationOracle for RobustVideoMatting {
    async fn configure(&mut self, options: &OracleOptions) -> Result<()> {
        let (width, height) = input_size(options.model_variant);
        tracing::debug!(
            "Configuring RVM: variant={:?}, input={}x{}",
            options.model_variant,
            width,
            height
        );
        self.preprocessor = Preprocessor::new(width, height);

        if self.session.is_none() {
            self.session = Some(self.load_session()?);
        }
        self.recurrent = None;
        Ok(())
    }

    async fn submit(&mut self, frame: &RgbImage) -> Result<Mask> {
        let _span = tracing::debug_span!("rvm_segment").entered();

        let Some(session) = self.session.as_mut() else {
            bail!("RVM model is not loaded");
        };
        let recurrent = self.recurrent.get_or_insert_with(initial_state);

        let input_tensor = self.preprocessor.preprocess(frame);
        let ratio = Array1::from_elem(1, self.downsample_ratio);

        // RVM expects: src, r1i, r2i, r3i, r4i, downsample_ratio
        let infer_span = tracing::debug_span!("inference").entered();
        let outputs = session
            .run(ort::inputs![
                TensorRef::from_array_view(input_tensor.view())?,
                TensorRef::from_array_view(recurrent[0].view())?,
                TensorRef::from_array_view(recurrent[1].view())?,
                TensorRef::from_array_view(recurrent[2].view())?,
                TensorRef::from_array_view(recurrent[3].view())?,
                TensorRef::from_array_view(ratio.view())?
            ])
            .context("Failed to run inference")?;
        drop(infer_span);

        // Outputs: fgr, pha, r1o..r4o. Only the alpha and the states are used.
        let pha = outputs["pha"].try_extract_array::<f32>()?;
        let shape = pha.shape().to_vec();
        if shape.len() != 4 {
            bail!("Unexpected alpha shape {:?}", shape);
        }
        let (matte_height, matte_width) = (shape[2] as u32, shape[3] as u32);
        let matte = Mask::new(matte_width, matte_height, pha.iter().copied().collect())?;

        let mut next_state = initial_state();
        for (slot, name) in next_state.iter_mut().zip(["r1o", "r2o", "r3o", "r4o"]) {
            *slot = outputs[name].try_extract_array::<f32>()?.to_owned();
        }
        *recurrent = next_state;

        // Back to the frame's own resolution
        let (frame_width, frame_height) = frame.dimensions();
        Ok(matte.resized(frame_width, frame_height))
    }

    async fn close(&mut self) -> Result<()> {
        tracing::info!("Releasing RVM session");
        self.session = None;
        self.recurrent = None;
        Ok(())
    }
}
