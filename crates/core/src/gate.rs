//! Per-category confidence policy.
//!
//! `nsfw` is held to a raised floor, `sfw` to a floor slightly below the user
//! threshold, every other category to the user threshold itself. Admission is
//! strict: a confidence equal to the effective threshold is rejected.

use crate::config::GateConfig;
use crate::models::{NSFW_CATEGORY, SFW_CATEGORY};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceGate {
    user_threshold: f32,
    policy: GateConfig,
}

impl ConfidenceGate {
    pub fn new(user_threshold: f32, policy: GateConfig) -> Self {
        Self {
            user_threshold,
            policy,
        }
    }

    pub fn user_threshold(&self) -> f32 {
        self.user_threshold
    }

    pub fn effective_threshold(&self, category: &str) -> f32 {
        match category {
            NSFW_CATEGORY => self.policy.nsfw_floor.max(self.user_threshold),
            SFW_CATEGORY => self
                .policy
                .sfw_floor
                .max(self.user_threshold - self.policy.sfw_offset),
            _ => self.user_threshold,
        }
    }

    pub fn admits(&self, category: &str, confidence: f32) -> bool {
        confidence > self.effective_threshold(category)
    }
}
