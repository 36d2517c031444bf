use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Model identifier and version sent with every inference call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRef {
    pub id: String,
    pub version: String,
}

impl ModelRef {
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
        }
    }
}

impl std::fmt::Display for ModelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.id, self.version)
    }
}

/// Pixel-space bounding box, inclusive corners.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub xmin: i32,
    pub ymin: i32,
    pub xmax: i32,
    pub ymax: i32,
}

impl BoundingBox {
    pub fn new(xmin: i32, ymin: i32, xmax: i32, ymax: i32) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }
}

/// One object reported by the inference engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class: String,
    pub score: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(class: impl Into<String>, score: f32, bbox: BoundingBox) -> Self {
        Self {
            class: class.into(),
            score,
            bbox,
        }
    }

    /// Reject detections that violate the box ordering or score range.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.score) {
            return Err(anyhow!(
                "detection '{}' has score {} outside [0, 1]",
                self.class,
                self.score
            ));
        }
        let b = self.bbox;
        if b.xmin > b.xmax || b.ymin > b.ymax {
            return Err(anyhow!(
                "detection '{}' has inverted box ({}, {}, {}, {})",
                self.class,
                b.xmin,
                b.ymin,
                b.xmax,
                b.ymax
            ));
        }
        Ok(())
    }
}

/// Result of one inference call.
///
/// `outputs: None` means the engine returned no result fields at all; the cycle
/// is skipped. `Some(vec![])` is a valid, empty detection list.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InferenceResponse {
    pub outputs: Option<Vec<Detection>>,
}

impl InferenceResponse {
    pub fn empty() -> Self {
        Self { outputs: None }
    }

    pub fn with_detections(detections: Vec<Detection>) -> Self {
        Self {
            outputs: Some(detections),
        }
    }
}
