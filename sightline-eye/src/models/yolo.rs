//! YOLOv8 object detector on ONNX Runtime

use crate::error::{PerceptionError, Result};
use crate::frame::Frame;
use crate::models::{ObjectDetector, RawDetection};
use crate::utils::rgb_to_chw_tensor;
use ort::session::Session;
use ort::value::Tensor;
use parking_lot::Mutex;
use std::path::Path;
use tracing::{debug, info};

/// COCO class names (80 classes)
pub const COCO_CLASSES: &[&str] = &[
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat",
    "dog", "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack",
    "umbrella", "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball",
    "kite", "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket",
    "bottle", "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple",
    "sandwich", "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair",
    "couch", "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse",
    "remote", "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator",
    "book", "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

fn model_error(context: &str, e: impl std::fmt::Display) -> PerceptionError {
    PerceptionError::Model(format!("{}: {}", context, e))
}

/// YOLOv8 detector. `run` needs exclusive access to the session.
pub struct YoloDetector {
    session: Mutex<Session>,
    input_size: u32,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl YoloDetector {
    pub fn new(model_path: &Path) -> Result<Self> {
        let session = Session::builder()
            .map_err(|e| model_error("Failed to create session builder", e))?
            .commit_from_file(model_path)
            .map_err(|e| model_error("Failed to load YOLO model", e))?;

        info!("YOLO model loaded from {:?}", model_path);
        Ok(Self {
            session: Mutex::new(session),
            input_size: 640,
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
        })
    }

    pub fn with_thresholds(mut self, confidence: f32, iou: f32) -> Self {
        self.confidence_threshold = confidence;
        self.iou_threshold = iou;
        self
    }
}

impl ObjectDetector for YoloDetector {
    fn name(&self) -> &'static str {
        "yolov8"
    }

    fn detect(&self, frame: &Frame) -> Result<Vec<RawDetection>> {
        let size = self.input_size;
        let input = rgb_to_chw_tensor(frame.image(), size, size)?;
        let tensor = Tensor::from_array(([1usize, 3, size as usize, size as usize], input))
            .map_err(|e| model_error("Failed to create input tensor", e))?;

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![tensor])
            .map_err(|e| PerceptionError::Detection(format!("YOLO inference failed: {}", e)))?;
        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| model_error("Failed to extract output tensor", e))?;

        let dims: Vec<usize> = shape.iter().map(|d| (*d).max(0) as usize).collect();
        debug!("YOLO output shape: {:?}", dims);
        let candidates = decode_output(
            data,
            &dims,
            self.confidence_threshold,
            frame.width() as f32 / size as f32,
            frame.height() as f32 / size as f32,
        )?;
        Ok(apply_nms(candidates, self.iou_threshold))
    }
}

/// Decode a `[1, 4 + classes, N]` YOLOv8 output into frame-space `xyxy` boxes
fn decode_output(
    data: &[f32],
    dims: &[usize],
    confidence_threshold: f32,
    scale_x: f32,
    scale_y: f32,
) -> Result<Vec<RawDetection>> {
    let (rows, anchors) = match dims {
        [1, rows, anchors] if *rows > 4 => (*rows, *anchors),
        _ => return Err(PerceptionError::Model(format!("unexpected YOLO output shape {:?}", dims))),
    };
    if data.len() < rows * anchors {
        return Err(PerceptionError::Model("YOLO output shorter than its shape".to_string()));
    }

    let classes = (rows - 4).min(COCO_CLASSES.len());
    let at = |row: usize, i: usize| data[row * anchors + i];

    let mut detections = Vec::new();
    for i in 0..anchors {
        let (class_id, score) = (0..classes)
            .map(|c| (c, at(4 + c, i)))
            .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });
        if !score.is_finite() || score < confidence_threshold {
            continue;
        }

        let (cx, cy, w, h) = (at(0, i), at(1, i), at(2, i), at(3, i));
        detections.push(RawDetection {
            label: COCO_CLASSES[class_id].to_string(),
            confidence: score,
            bbox: [
                (cx - w / 2.0) * scale_x,
                (cy - h / 2.0) * scale_y,
                (cx + w / 2.0) * scale_x,
                (cy + h / 2.0) * scale_y,
            ],
        });
    }
    Ok(detections)
}

/// Per-class non-maximum suppression, highest confidence first
fn apply_nms(mut detections: Vec<RawDetection>, iou_threshold: f32) -> Vec<RawDetection> {
    detections.retain(|d| d.confidence.is_finite());
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut suppressed = vec![false; detections.len()];
    let mut keep = Vec::new();
    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }
        for j in (i + 1)..detections.len() {
            if !suppressed[j]
                && detections[i].label == detections[j].label
                && compute_iou(&detections[i].bbox, &detections[j].bbox) > iou_threshold
            {
                suppressed[j] = true;
            }
        }
        keep.push(detections[i].clone());
    }
    keep
}

fn compute_iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let inter_w = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let inter_h = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter = inter_w * inter_h;
    let union = (a[2] - a[0]) * (a[3] - a[1]) + (b[2] - b[0]) * (b[3] - b[1]) - inter;
    if union <= 0.0 || !union.is_finite() {
        return 0.0;
    }
    (inter / union).clamp(0.0, 1.0)
}
