use crate::{detection_service::DetectionService, model_service::ModelService};

#[derive(Clone)]
pub struct SharedState<M: ModelService> {
    pub detection_service: DetectionService<M>,
}

impl<M: ModelService> SharedState<M> {
    pub fn new(detection_service: DetectionService<M>) -> Self {
        Self { detection_service }
    }
}
