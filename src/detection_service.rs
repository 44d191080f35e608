use crate::{
    annotate::annotate_persons,
    error::DetectHumanError,
    image_codec::{decode_image, encode_base64, encode_jpeg},
    labels::ClassLabels,
    model_service::ModelService,
};
use axum::body::Bytes;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionResponse {
    pub image: String,
    #[serde(rename = "personFound")]
    pub person_found: usize,
}

/// Decode, detect, annotate and encode one image.
#[derive(Debug, Clone)]
pub struct DetectionService<M: ModelService> {
    model_service: Arc<M>,
    labels: Arc<ClassLabels>,
}

impl<M: ModelService> DetectionService<M> {
    pub fn new(model_service: M, labels: ClassLabels) -> Self {
        Self {
            model_service: Arc::new(model_service),
            labels: Arc::new(labels),
        }
    }

    /// Runs the whole pipeline on the blocking pool.
    pub async fn detect(&self, image_data: Bytes) -> Result<DetectionResponse, DetectHumanError> {
        let service = self.clone();
        tokio::task::spawn_blocking(move || service.detect_blocking(&image_data)).await?
    }

    pub fn detect_blocking(&self, image_data: &[u8]) -> Result<DetectionResponse, DetectHumanError> {
        let mut image = decode_image(image_data)?;
        tracing::debug!("Decoded {}x{} image", image.width(), image.height());

        let detections = self.model_service.predict(&image)?;
        for (i, detection) in detections.iter().enumerate() {
            tracing::debug!(
                "Detection {}: class_id={}, label={:?}, confidence={:.3}, bbox=({:.1}, {:.1}, {:.1}, {:.1})",
                i,
                detection.class_id,
                self.labels.get(detection.class_id),
                detection.confidence,
                detection.bbox.x1,
                detection.bbox.y1,
                detection.bbox.x2,
                detection.bbox.y2
            );
        }

        let person_found = annotate_persons(&mut image, &detections, &self.labels);
        let jpeg = encode_jpeg(&image)?;

        tracing::info!(
            "Found {} person(s) among {} detections",
            person_found,
            detections.len()
        );

        Ok(DetectionResponse {
            image: encode_base64(&jpeg),
            person_found,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::detection::{BoundingBox, Detection};
    use base64::{engine::general_purpose::STANDARD, Engine};
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    #[derive(Clone)]
    pub(crate) struct MockModelService {
        pub detections: Vec<Detection>,
    }

    impl ModelService for MockModelService {
        fn predict(&self, _image: &RgbImage) -> Result<Vec<Detection>, DetectHumanError> {
            Ok(self.detections.clone())
        }
    }

    #[derive(Clone)]
    struct FailingModelService;

    impl ModelService for FailingModelService {
        fn predict(&self, _image: &RgbImage) -> Result<Vec<Detection>, DetectHumanError> {
            Err(DetectHumanError::InferenceFailed(
                "unexpected input shape".to_string(),
            ))
        }
    }

    pub(crate) fn detection(class_id: usize, x1: f32, y1: f32, x2: f32, y2: f32) -> Detection {
        Detection {
            class_id,
            confidence: 0.8,
            bbox: BoundingBox::new(x1, y1, x2, y2),
        }
    }

    pub(crate) fn png_image(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 3 % 256) as u8, (y * 5 % 256) as u8, 128])
        });
        let mut image_data = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut image_data), ImageFormat::Png)
            .unwrap();
        image_data
    }

    fn decode_response_image(response: &DetectionResponse) -> DynamicImage {
        let jpeg = STANDARD.decode(&response.image).unwrap();
        assert_eq!(image::guess_format(&jpeg).unwrap(), ImageFormat::Jpeg);
        image::load_from_memory(&jpeg).unwrap()
    }

    #[tokio::test]
    async fn test_counts_only_persons() {
        let model = MockModelService {
            detections: vec![
                detection(0, 5., 5., 40., 60.),
                detection(16, 10., 10., 30., 30.),
                detection(0, 50., 10., 90., 70.),
                detection(2, 0., 0., 99., 79.),
                detection(0, 20., 20., 25., 25.),
            ],
        };
        let service = DetectionService::new(model, ClassLabels::coco());

        let response = service.detect(Bytes::from(png_image(100, 80))).await.unwrap();

        assert_eq!(response.person_found, 3);
    }

    #[tokio::test]
    async fn test_round_trip_keeps_dimensions() {
        let model = MockModelService {
            detections: vec![detection(0, 5., 5., 40., 60.)],
        };
        let service = DetectionService::new(model, ClassLabels::coco());

        let response = service.detect(Bytes::from(png_image(120, 90))).await.unwrap();

        let annotated = decode_response_image(&response);
        assert_eq!((annotated.width(), annotated.height()), (120, 90));
    }

    #[tokio::test]
    async fn test_no_detections_returns_unmodified_image() {
        let input = png_image(64, 64);
        let model = MockModelService { detections: vec![] };
        let service = DetectionService::new(model, ClassLabels::coco());

        let response = service.detect(Bytes::from(input.clone())).await.unwrap();

        let expected = encode_base64(&encode_jpeg(&decode_image(&input).unwrap()).unwrap());
        assert_eq!(response.person_found, 0);
        assert_eq!(response.image, expected);
    }

    #[tokio::test]
    async fn test_identical_input_gives_identical_output() {
        let model = MockModelService {
            detections: vec![detection(0, 1., 1., 30., 30.), detection(3, 2., 2., 9., 9.)],
        };
        let service = DetectionService::new(model, ClassLabels::coco());
        let input = Bytes::from(png_image(48, 48));

        let first = service.detect(input.clone()).await.unwrap();
        let second = service.detect(input).await.unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_malformed_input_is_a_decode_error() {
        let model = MockModelService {
            detections: vec![detection(0, 1., 1., 30., 30.)],
        };
        let service = DetectionService::new(model, ClassLabels::coco());

        let err = service
            .detect(Bytes::from_static(&[0x13, 0x37, 0xde, 0xad, 0xbe, 0xef]))
            .await
            .unwrap_err();

        assert!(matches!(err, DetectHumanError::DecodeFailed(_)));
    }

    #[tokio::test]
    async fn test_inference_error_propagates() {
        let service = DetectionService::new(FailingModelService, ClassLabels::coco());

        let err = service
            .detect(Bytes::from(png_image(16, 16)))
            .await
            .unwrap_err();

        assert!(matches!(err, DetectHumanError::InferenceFailed(_)));
        assert_eq!(err.to_string(), "inference failed: unexpected input shape");
    }

    #[test]
    fn test_response_serializes_camel_case_count() {
        let response = DetectionResponse {
            image: "abc".to_string(),
            person_found: 2,
        };

        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json, serde_json::json!({ "image": "abc", "personFound": 2 }));
    }
}
