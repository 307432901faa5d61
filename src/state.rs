//! Cached robot joint state
//!
//! The cache bridges two unrelated commands: the telemetry query that reports
//! the current axis counts, and the later interactive command that programs a
//! position from them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, RwLock};

/// Number of addressable axes on the controller
pub const AXIS_COUNT: usize = 5;

/// A fully populated set of axis counts; axis 1 is slot 0
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointVector([f64; AXIS_COUNT]);

impl JointVector {
    pub fn new(values: [f64; AXIS_COUNT]) -> Self {
        Self(values)
    }

    /// Build from per-axis slots; `None` unless every slot is filled
    pub fn from_slots(slots: [Option<f64>; AXIS_COUNT]) -> Option<Self> {
        let mut values = [0.0; AXIS_COUNT];
        for (value, slot) in values.iter_mut().zip(slots) {
            *value = slot?;
        }
        Some(Self(values))
    }

    /// Value for a 1-based axis number
    pub fn axis(&self, axis: usize) -> Option<f64> {
        axis.checked_sub(1).and_then(|i| self.0.get(i)).copied()
    }

    pub fn values(&self) -> [f64; AXIS_COUNT] {
        self.0
    }
}

impl fmt::Display for JointVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|v| v.to_string()).collect();
        write!(f, "[{}]", parts.join(", "))
    }
}

/// Shared handle to the last fully parsed joint vector
///
/// Clones share the same slot. The stored value is either unset or a complete
/// [`JointVector`]; partial readings never reach it.
#[derive(Debug, Clone, Default)]
pub struct RobotStateCache {
    joints: Arc<RwLock<Option<JointVector>>>,
}

impl RobotStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<JointVector> {
        *self.joints.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set(&self, joints: JointVector) {
        *self.joints.write().unwrap_or_else(|e| e.into_inner()) = Some(joints);
    }
}
