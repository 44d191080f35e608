use crate::{detection::Detection, error::DetectHumanError};
use image::RgbImage;

/// A loaded detector. Calls are blocking and may come from several threads at once.
pub trait ModelService: Send + Sync + Clone + 'static {
    fn predict(&self, image: &RgbImage) -> Result<Vec<Detection>, DetectHumanError>;
}
