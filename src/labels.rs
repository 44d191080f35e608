use std::{
    fs::File,
    io::{self, BufRead},
    path::Path,
};

const COCO_LABELS: [&str; 80] = [
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "couch",
    "potted plant",
    "bed",
    "dining table",
    "toilet",
    "tv",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];

/// Class index to name table shared by every request.
#[derive(Debug, Clone)]
pub struct ClassLabels {
    names: Vec<String>,
}

impl ClassLabels {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn coco() -> Self {
        Self::new(COCO_LABELS.iter().map(|name| name.to_string()).collect())
    }

    pub fn from_file(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(io::BufReader::new(file))
    }

    /// One class name per line; blank lines are skipped.
    pub fn from_reader<R: BufRead>(reader: R) -> io::Result<Self> {
        let mut names = Vec::new();
        for line_result in reader.lines() {
            let line = line_result?;
            let name = line.trim();
            if !name.is_empty() {
                names.push(name.to_string());
            }
        }

        if names.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "labels file contains no class names",
            ));
        }

        Ok(Self::new(names))
    }

    pub fn get(&self, class_id: usize) -> Option<&str> {
        self.names.get(class_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
