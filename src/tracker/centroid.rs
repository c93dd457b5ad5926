//! Greedy nearest-neighbour tracker

use super::{BoundingBox, MatchGate, TrackedObject, Tracker, TrackerConfig, TriggerLine};
use std::collections::BTreeMap;

/// Candidate pairing of a tracked object with a detection
struct Candidate {
    cost: f32,
    object_id: u64,
    detection: usize,
}

/// Centroid tracker with a deterministic greedy assignment.
///
/// All gated (object, detection) pairs are sorted by cost, ties broken by object id
/// then detection index, and taken in order while both sides are still free.
pub struct CentroidTracker {
    config: TrackerConfig,
    objects: BTreeMap<u64, TrackedObject>,
    /// Never rewound, so ids stay unique across resets
    next_id: u64,
    total_counted: u64,
}

impl CentroidTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            objects: BTreeMap::new(),
            next_id: 0,
            total_counted: 0,
        }
    }

    fn cost(&self, object: &TrackedObject, detection: &BoundingBox) -> Option<f32> {
        match self.config.gate {
            MatchGate::Distance(max) => {
                let d = object.centroid.distance(&detection.centroid());
                (d < max).then_some(d)
            }
            MatchGate::Overlap(min) => {
                let iou = object.bbox.iou(detection);
                (iou >= min).then_some(1.0 - iou)
            }
        }
    }

    fn candidates(&self, detections: &[BoundingBox]) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        for object in self.objects.values() {
            for (index, detection) in detections.iter().enumerate() {
                if let Some(cost) = self.cost(object, detection) {
                    candidates.push(Candidate {
                        cost,
                        object_id: object.id,
                        detection: index,
                    });
                }
            }
        }
        candidates.sort_by(|a, b| {
            a.cost
                .total_cmp(&b.cost)
                .then(a.object_id.cmp(&b.object_id))
                .then(a.detection.cmp(&b.detection))
        });
        candidates
    }
}

impl Tracker for CentroidTracker {
    fn update(&mut self, detections: &[BoundingBox]) -> u32 {
        let candidates = self.candidates(detections);
        let trigger = self.config.trigger;

        let mut detection_taken = vec![false; detections.len()];
        let mut matched: Vec<u64> = Vec::new();
        let mut delta = 0u32;

        for candidate in candidates {
            if detection_taken[candidate.detection] || matched.contains(&candidate.object_id) {
                continue;
            }
            let Some(object) = self.objects.get_mut(&candidate.object_id) else {
                continue;
            };
            let detection = detections[candidate.detection];

            object.previous_centroid = object.centroid;
            object.centroid = detection.centroid();
            object.bbox = detection;
            object.age_since_seen = 0;

            if !object.counted && trigger.crossed(object.previous_centroid, object.centroid) {
                object.counted = true;
                delta += 1;
                tracing::trace!(object_id = object.id, "Object crossed trigger line");
            }

            detection_taken[candidate.detection] = true;
            matched.push(candidate.object_id);
        }

        // Unmatched objects age and are evicted past the limit
        let max_disappeared = self.config.max_disappeared;
        self.objects.retain(|id, object| {
            if matched.contains(id) {
                return true;
            }
            object.age_since_seen += 1;
            object.age_since_seen <= max_disappeared
        });

        // Unmatched detections start new objects
        for (index, detection) in detections.iter().enumerate() {
            if detection_taken[index] {
                continue;
            }
            let id = self.next_id;
            self.next_id += 1;
            let centroid = detection.centroid();
            self.objects.insert(
                id,
                TrackedObject {
                    id,
                    centroid,
                    previous_centroid: centroid,
                    bbox: *detection,
                    age_since_seen: 0,
                    counted: false,
                },
            );
        }

        self.total_counted += u64::from(delta);
        delta
    }

    fn reset(&mut self) {
        self.objects.clear();
        self.total_counted = 0;
        tracing::debug!(next_id = self.next_id, "Tracker reset");
    }

    fn objects(&self) -> Vec<&TrackedObject> {
        self.objects.values().collect()
    }

    fn total_counted(&self) -> u64 {
        self.total_counted
    }

    fn trigger_line(&self) -> TriggerLine {
        self.config.trigger
    }
}
