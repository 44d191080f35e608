/// Box corners in pixel coordinates of the decoded image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn from_center(xc: f32, yc: f32, w: f32, h: f32) -> Self {
        Self {
            x1: xc - w / 2.,
            y1: yc - h / 2.,
            x2: xc + w / 2.,
            y2: yc + h / 2.,
        }
    }

    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.) * (self.y2 - self.y1).max(0.)
    }

    pub fn intersection(&self, other: &BoundingBox) -> f32 {
        let w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.);
        let h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.);
        w * h
    }

    pub fn union(&self, other: &BoundingBox) -> f32 {
        self.area() + other.area() - self.intersection(other)
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let union = self.union(other);
        if union <= 0. {
            return 0.;
        }
        self.intersection(other) / union
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub class_id: usize,
    pub confidence: f32,
    pub bbox: BoundingBox,
}
