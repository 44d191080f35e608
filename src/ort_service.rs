use crate::{
    config::{ModelConfig, Validatable},
    detection::{BoundingBox, Detection},
    error::DetectHumanError,
    model_service::ModelService,
};
use image::{
    imageops::{self, FilterType},
    RgbImage,
};
use ndarray::{s, Array, ArrayD, ArrayViewD, Axis, Ix2, Ix4};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};

const DEFAULT_OUTPUT_NAME: &str = "output0";

/// Clears poisoning left by a panicked run and hands the session out again.
fn lock_session<T>(session: &Mutex<T>) -> MutexGuard<'_, T> {
    if session.is_poisoned() {
        tracing::warn!("Recovering poisoned session lock");
        session.clear_poison();
    }
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Resizes to the square network input and lays the channels out as NCHW in `[0, 1]`.
fn transform_image(image: &RgbImage, input_size: u32) -> Array<f32, Ix4> {
    let resized = imageops::resize(image, input_size, input_size, FilterType::CatmullRom);
    let size = input_size as usize;

    let mut input = Array::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let x = x as usize;
        let y = y as usize;
        let [r, g, b] = pixel.0;
        input[[0, 0, y, x]] = (r as f32) / 255.;
        input[[0, 1, y, x]] = (g as f32) / 255.;
        input[[0, 2, y, x]] = (b as f32) / 255.;
    }

    input
}

/// Decodes a YOLOv8 head of shape `[1, 4 + classes, candidates]`.
///
/// Each candidate column holds the box center, width and height in network input
/// pixels followed by one score per class. Boxes are rescaled to the original image.
fn parse_predictions(
    output: ArrayViewD<f32>,
    image_width: u32,
    image_height: u32,
    input_size: u32,
    min_probability: f32,
) -> Result<Vec<Detection>, DetectHumanError> {
    let shape = output.shape();
    if shape.len() != 3 || shape[0] != 1 || shape[1] < 5 {
        return Err(DetectHumanError::InferenceFailed(format!(
            "unexpected output shape {:?}, expected [1, 4 + classes, candidates]",
            shape
        )));
    }

    let predictions = output
        .index_axis(Axis(0), 0)
        .into_dimensionality::<Ix2>()
        .map_err(|e| DetectHumanError::InferenceFailed(format!("invalid output: {}", e)))?;

    let x_scale = image_width as f32 / input_size as f32;
    let y_scale = image_height as f32 / input_size as f32;

    let mut detections = Vec::new();
    for candidate in predictions.axis_iter(Axis(1)) {
        let best = candidate
            .slice(s![4..])
            .iter()
            .copied()
            .enumerate()
            .reduce(|accum, item| if item.1 > accum.1 { item } else { accum });

        let Some((class_id, confidence)) = best else {
            continue;
        };
        if confidence.is_nan() || confidence < min_probability {
            continue;
        }

        detections.push(Detection {
            class_id,
            confidence,
            bbox: BoundingBox::from_center(
                candidate[0] * x_scale,
                candidate[1] * y_scale,
                candidate[2] * x_scale,
                candidate[3] * y_scale,
            ),
        });
    }

    Ok(detections)
}

/// Greedy per-class suppression, highest confidence first.
fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        let suppressed = kept.iter().any(|selected| {
            selected.class_id == candidate.class_id
                && selected.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }

    kept
}

#[cfg(feature = "tensorrt")]
fn init_environment() -> Result<(), ort::Error> {
    use ort::execution_providers::TensorRTExecutionProvider;

    ort::init()
        .with_name("human_detection")
        .with_execution_providers([TensorRTExecutionProvider::default()
            .with_engine_cache(true)
            .build()])
        .commit()?;
    Ok(())
}

#[cfg(not(feature = "tensorrt"))]
fn init_environment() -> Result<(), ort::Error> {
    ort::init().with_name("human_detection").commit()?;
    Ok(())
}

/// Pool of ONNX Runtime sessions over the same model.
///
/// Each session sits behind its own mutex and requests are spread round-robin,
/// so at most `num_instances` inferences run at the same time.
#[derive(Clone)]
pub struct OrtModelService {
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
    output_name: String,
    input_size: u32,
    min_probability: f32,
    iou_threshold: f32,
}

impl OrtModelService {
    pub fn new(model_config: &ModelConfig) -> Result<Self, ort::Error> {
        init_environment()?;

        let model_path = model_config.get_path();
        let num_instances = model_config.num_instances.max(1);
        let sessions = (0..num_instances)
            .map(|_| {
                Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(&model_path)
            })
            .collect::<Result<Vec<_>, ort::Error>>()?;

        let output_name = sessions
            .first()
            .and_then(|session| session.outputs.first())
            .map(|output| output.name.clone())
            .unwrap_or_else(|| DEFAULT_OUTPUT_NAME.to_string());

        tracing::info!(
            "Created {} ONNX sessions from {:?} (output: {})",
            num_instances,
            model_path,
            output_name
        );

        Ok(Self {
            sessions: Arc::new(
                sessions
                    .into_iter()
                    .map(|session| Arc::new(Mutex::new(session)))
                    .collect(),
            ),
            counter: Arc::new(AtomicUsize::new(0)),
            output_name,
            input_size: model_config.input_size,
            min_probability: model_config.min_probability,
            iou_threshold: model_config.iou_threshold,
        })
    }

    fn run_inference(&self, input: &Array<f32, Ix4>) -> Result<ArrayD<f32>, DetectHumanError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let mut session = lock_session(&self.sessions[index]);

        tracing::debug!("Handling request with session {}", index);
        let tensor_ref = TensorRef::from_array_view(input.view())?;
        let outputs = session.run(ort::inputs![tensor_ref])?;

        let (shape, data) = outputs[self.output_name.as_str()].try_extract_tensor::<f32>()?;

        let array = ArrayD::from_shape_vec(shape.to_ixdyn(), data.to_vec()).map_err(|e| {
            DetectHumanError::InferenceFailed(format!("invalid tensor shape: {}", e))
        })?;

        Ok(array)
    }
}

impl ModelService for OrtModelService {
    fn predict(&self, image: &RgbImage) -> Result<Vec<Detection>, DetectHumanError> {
        let (image_width, image_height) = image.dimensions();
        if image_width == 0 || image_height == 0 {
            return Err(DetectHumanError::InferenceFailed(format!(
                "cannot run detection on a {}x{} image",
                image_width, image_height
            )));
        }

        let input = transform_image(image, self.input_size);
        let output = self.run_inference(&input)?;

        let candidates = parse_predictions(
            output.view(),
            image_width,
            image_height,
            self.input_size,
            self.min_probability,
        )?;
        let candidate_count = candidates.len();
        let detections = non_max_suppression(candidates, self.iou_threshold);

        tracing::debug!(
            "{} candidates above {:.2}, {} after suppression",
            candidate_count,
            self.min_probability,
            detections.len()
        );

        Ok(detections)
    }
}
