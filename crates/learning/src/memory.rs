//! Bounded experience memory.

use morphos_core::LearningExperience;
use std::collections::VecDeque;

/// Most recent experiences, oldest dropped first.
#[derive(Debug)]
pub struct ExperienceMemory {
    experiences: VecDeque<LearningExperience>,
    capacity: usize,
}

impl ExperienceMemory {
    /// Create an empty memory.
    pub fn new(capacity: usize) -> Self {
        Self {
            experiences: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Store an experience; returns how many were dropped to make room.
    pub fn push(&mut self, experience: LearningExperience) -> usize {
        self.experiences.push_back(experience);
        let mut dropped = 0;
        while self.experiences.len() > self.capacity {
            self.experiences.pop_front();
            dropped += 1;
        }
        dropped
    }

    /// Number of experiences held.
    pub fn len(&self) -> usize {
        self.experiences.len()
    }

    /// Whether the memory is empty.
    pub fn is_empty(&self) -> bool {
        self.experiences.is_empty()
    }

    /// All experiences, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &LearningExperience> {
        self.experiences.iter()
    }

    /// Distinct outcome types, in order of first appearance.
    pub fn outcome_types(&self) -> Vec<String> {
        let mut types: Vec<String> = Vec::new();
        for experience in &self.experiences {
            if !types.contains(&experience.outcome_type) {
                types.push(experience.outcome_type.clone());
            }
        }
        types
    }

    /// Share of successful experiences (0.0 when empty).
    pub fn success_rate(&self) -> f64 {
        if self.experiences.is_empty() {
            return 0.0;
        }
        let successes = self.experiences.iter().filter(|e| e.success).count();
        successes as f64 / self.experiences.len() as f64
    }
}
