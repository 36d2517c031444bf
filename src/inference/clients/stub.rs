use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::classes::ClassTable;
use crate::inference::client::InferenceClient;
use crate::inference::result::{BoundingBox, Detection, InferenceResponse, ModelRef};

/// Stub client for demos. Emits 0-2 random detections per frame from the class table.
///
/// No engine is contacted; the encoded frame is ignored. Boxes are drawn inside the
/// configured frame dimensions so overlays land on screen.
pub struct StubClient {
    classes: ClassTable,
    width: u32,
    height: u32,
    rng: StdRng,
}

impl StubClient {
    pub fn new(classes: ClassTable, width: u32, height: u32, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            classes,
            width: width.max(2),
            height: height.max(2),
            rng,
        }
    }

    fn random_box(&mut self) -> BoundingBox {
        let w = self.width as i32;
        let h = self.height as i32;
        let xmin = self.rng.gen_range(0..w - 1);
        let ymin = self.rng.gen_range(0..h - 1);
        let xmax = self.rng.gen_range(xmin + 1..w);
        let ymax = self.rng.gen_range(ymin + 1..h);
        BoundingBox::new(xmin, ymin, xmax, ymax)
    }
}

impl InferenceClient for StubClient {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn infer(&mut self, _model: &ModelRef, _encoded_frame: &[u8]) -> Result<InferenceResponse> {
        if self.classes.is_empty() {
            return Ok(InferenceResponse::with_detections(Vec::new()));
        }
        let count = self.rng.gen_range(0..=2);
        let mut detections = Vec::with_capacity(count);
        for _ in 0..count {
            let index = self.rng.gen_range(0..self.classes.len());
            let class = self.classes.get(index).unwrap_or_default().to_string();
            let score = self.rng.gen_range(0.25f32..=0.99);
            let bbox = self.random_box();
            detections.push(Detection::new(class, score, bbox));
        }
        Ok(InferenceResponse::with_detections(detections))
    }
}
