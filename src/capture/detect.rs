//! Parsing of the IMX500 MobileNet-SSD output tensor that rpicam-vid
//! writes to its metadata file, one JSON record per frame.
//!
//! Tensor layout (100 detection slots):
//!   [0..400)   bounding boxes, 4 values each: y1, x1, y2, x2
//!   [400..500) confidence scores in [0, 1]
//!   [500..600) class ids, terminated by 100.0

use serde_json::Value;

use crate::capture::frame::Detection;
use crate::DetectConfig;

pub const COCO_CLASSES: &[&str] = &[
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
    "",
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
    "",
    "backpack",
    "umbrella",
    "",
    "",
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
    "",
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
    "",
    "dining table",
    "",
    "",
    "toilet",
    "",
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
    "",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];

const NUM_DETECTIONS: usize = 100;
const BBOX_START: usize = 0;
const CONF_START: usize = NUM_DETECTIONS * 4;
const CLASS_START: usize = CONF_START + NUM_DETECTIONS;
const TENSOR_MIN_LEN: usize = CLASS_START + NUM_DETECTIONS;
/// Sentinel class id marking the end of valid slots
const END_MARKER: f64 = 100.0;
const PERSON_CLASS_ID: u32 = 0;

/// Pull the detections out of one metadata record. Returns `None` when the
/// record carries no usable tensor (firmware still loading, non-numeric
/// entries, truncated write).
pub fn detections_from_record(record: &Value, cfg: &DetectConfig) -> Option<Vec<Detection>> {
    let tensor = record.get("CnnOutputTensor")?.as_array()?;
    if tensor.len() < TENSOR_MIN_LEN {
        return None;
    }
    let values: Vec<f64> = tensor.iter().filter_map(Value::as_f64).collect();
    if values.len() != tensor.len() {
        return None;
    }
    Some(extract_detections(&values, cfg))
}

/// Parse a chunk of the metadata file as appended by rpicam-vid: one JSON
/// object per line inside a streamed array, lines ending in commas.
/// Malformed lines are skipped. Returns one detection list per frame record.
pub fn parse_metadata_chunk(content: &str, cfg: &DetectConfig) -> Vec<Vec<Detection>> {
    let mut out = Vec::new();
    for line in content.lines() {
        let line = line.trim().trim_end_matches(',');
        if line.is_empty() || line == "[" || line == "]" {
            continue;
        }
        let Ok(record) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        if let Some(detections) = detections_from_record(&record, cfg) {
            out.push(detections);
        }
    }
    out
}

/// Person detections from one raw tensor, filtered by confidence, bbox
/// validity, and minimum size/area.
pub fn extract_detections(tensor: &[f64], cfg: &DetectConfig) -> Vec<Detection> {
    let mut detections = Vec::new();
    if tensor.len() < TENSOR_MIN_LEN {
        return detections;
    }

    for i in 0..NUM_DETECTIONS {
        let class_val = tensor[CLASS_START + i];
        if class_val == END_MARKER {
            break;
        }
        let class_id = class_val as u32;
        // The post-process graph is tuned for person detection only
        if class_id != PERSON_CLASS_ID {
            continue;
        }

        let confidence = tensor[CONF_START + i] as f32;
        if confidence < cfg.min_confidence {
            continue;
        }

        let b = &tensor[BBOX_START + i * 4..BBOX_START + i * 4 + 4];
        let (y1, x1, y2, x2) = (b[0] as f32, b[1] as f32, b[2] as f32, b[3] as f32);
        if ![x1, y1, x2, y2].iter().all(|v| (0.0..=1.0).contains(v)) {
            continue;
        }
        if x2 <= x1 || y2 <= y1 {
            continue;
        }

        let (w, h) = (x2 - x1, y2 - y1);
        if w < cfg.min_box_width || h < cfg.min_box_height {
            continue;
        }
        if w * h < cfg.min_box_area {
            continue;
        }

        detections.push(Detection {
            label: COCO_CLASSES[class_id as usize].to_string(),
            class_id,
            confidence: round_to(confidence, 100.0),
            bbox: [
                round_to(x1, 1000.0),
                round_to(y1, 1000.0),
                round_to(x2, 1000.0),
                round_to(y2, 1000.0),
            ],
        });
    }

    detections
}

fn round_to(v: f32, scale: f32) -> f32 {
    (v * scale).round() / scale
}

/// Suppresses single-frame false positives: detections are only reported
/// once a person has been present in N consecutive frames.
#[derive(Debug)]
pub struct TemporalFilter {
    consecutive: u32,
    min_consecutive: u32,
}

impl TemporalFilter {
    pub fn new(min_consecutive: u32) -> Self {
        Self {
            consecutive: 0,
            min_consecutive,
        }
    }

    pub fn observe(&mut self, detections: Vec<Detection>) -> Vec<Detection> {
        if detections.is_empty() {
            self.consecutive = 0;
            return detections;
        }
        self.consecutive += 1;
        if self.consecutive >= self.min_consecutive {
            detections
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;

    fn cfg() -> DetectConfig {
        Config::default().detect
    }

    /// Tensor with a single slot: a person box covering (x1,y1)-(x2,y2)
    fn tensor_with_person(x1: f64, y1: f64, x2: f64, y2: f64, conf: f64) -> Vec<f64> {
        let mut t = vec![0.0; TENSOR_MIN_LEN];
        t[BBOX_START] = y1;
        t[BBOX_START + 1] = x1;
        t[BBOX_START + 2] = y2;
        t[BBOX_START + 3] = x2;
        t[CONF_START] = conf;
        t[CLASS_START] = 0.0;
        t[CLASS_START + 1] = END_MARKER;
        t
    }

    #[test]
    fn extracts_a_person_sized_box() {
        let t = tensor_with_person(0.2, 0.1, 0.5, 0.9, 0.82);
        let dets = extract_detections(&t, &cfg());
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].label, "person");
        assert_eq!(dets[0].confidence, 0.82);
        assert_eq!(dets[0].bbox, [0.2, 0.1, 0.5, 0.9]);
    }

    #[test]
    fn drops_boxes_below_minimum_size() {
        // Tall enough but far too narrow
        let t = tensor_with_person(0.50, 0.1, 0.52, 0.9, 0.9);
        assert!(extract_detections(&t, &cfg()).is_empty());
        // Wide but too short
        let t = tensor_with_person(0.1, 0.50, 0.9, 0.55, 0.9);
        assert!(extract_detections(&t, &cfg()).is_empty());
    }

    #[test]
    fn drops_low_confidence_and_inverted_boxes() {
        let t = tensor_with_person(0.2, 0.1, 0.5, 0.9, 0.05);
        assert!(extract_detections(&t, &cfg()).is_empty());
        let t = tensor_with_person(0.5, 0.9, 0.2, 0.1, 0.9);
        assert!(extract_detections(&t, &cfg()).is_empty());
    }

    #[test]
    fn end_marker_stops_the_scan() {
        let mut t = vec![0.0; TENSOR_MIN_LEN];
        t[CLASS_START] = END_MARKER;
        // Garbage after the marker must not be read
        t[CLASS_START + 1] = 0.0;
        t[CONF_START + 1] = 1.0;
        assert!(extract_detections(&t, &cfg()).is_empty());
    }

    #[test]
    fn short_tensor_is_ignored() {
        assert!(extract_detections(&[0.0; 10], &cfg()).is_empty());
    }

    #[test]
    fn record_without_tensor_is_none() {
        let record = serde_json::json!({"SensorTimestamp": 12345});
        assert!(detections_from_record(&record, &cfg()).is_none());
    }

    #[test]
    fn chunk_parsing_skips_malformed_lines() {
        let t = tensor_with_person(0.2, 0.1, 0.5, 0.9, 0.8);
        let record = serde_json::json!({ "CnnOutputTensor": t });
        let content = format!("[\n{record},\nnot json\n{record}\n]\n");
        let parsed = parse_metadata_chunk(&content, &cfg());
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].len(), 1);
    }

    #[test]
    fn temporal_filter_requires_consecutive_frames() {
        let det = Detection {
            label: "person".into(),
            class_id: 0,
            confidence: 0.8,
            bbox: [0.1, 0.1, 0.5, 0.9],
        };
        let mut filter = TemporalFilter::new(3);
        assert!(filter.observe(vec![det.clone()]).is_empty());
        assert!(filter.observe(vec![det.clone()]).is_empty());
        assert_eq!(filter.observe(vec![det.clone()]).len(), 1);
        // A gap resets the streak
        assert!(filter.observe(Vec::new()).is_empty());
        assert!(filter.observe(vec![det]).is_empty());
    }
}
