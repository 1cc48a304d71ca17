//! Bounded history of recent on-map positions

use std::collections::VecDeque;

use crate::core::types::ScreenPosition;

/// Most recent positions, oldest first. Never holds more than `capacity`.
#[derive(Clone, Debug)]
pub struct TrailHistory {
    positions: VecDeque<ScreenPosition>,
    capacity: usize,
}

impl TrailHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            positions: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a position, returning the evicted oldest one if full
    pub fn push(&mut self, position: ScreenPosition) -> Option<ScreenPosition> {
        let evicted = if self.positions.len() >= self.capacity {
            self.positions.pop_front()
        } else {
            None
        };
        self.positions.push_back(position);
        evicted
    }

    pub fn clear(&mut self) {
        self.positions.clear();
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn last(&self) -> Option<&ScreenPosition> {
        self.positions.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScreenPosition> {
        self.positions.iter()
    }

    pub fn to_vec(&self) -> Vec<ScreenPosition> {
        self.positions.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::WorldSample;

    fn position(x: f64) -> ScreenPosition {
        ScreenPosition {
            pixel_x: x,
            pixel_y: 0.0,
            heading: None,
            map_key: "woods".to_string(),
            source_sample: WorldSample::new(x, 0.0, 0.0),
        }
    }

    #[test]
    fn test_trail_evicts_oldest() {
        let mut trail = TrailHistory::new(3);
        for i in 0..3 {
            assert!(trail.push(position(i as f64)).is_none());
        }
        let evicted = trail.push(position(3.0)).unwrap();
        assert_eq!(evicted.pixel_x, 0.0);

        let xs: Vec<f64> = trail.iter().map(|p| p.pixel_x).collect();
        assert_eq!(xs, vec![1.0, 2.0, 3.0]);
        assert_eq!(trail.last().unwrap().pixel_x, 3.0);
    }

    #[test]
    fn test_trail_never_exceeds_capacity() {
        let mut trail = TrailHistory::new(500);
        for i in 0..1200 {
            trail.push(position(i as f64));
            assert!(trail.len() <= 500);
        }
        assert_eq!(trail.len(), 500);
        assert_eq!(trail.iter().next().unwrap().pixel_x, 700.0);
    }

    #[test]
    fn test_zero_capacity_keeps_one() {
        let mut trail = TrailHistory::new(0);
        trail.push(position(1.0));
        trail.push(position(2.0));
        assert_eq!(trail.capacity(), 1);
        assert_eq!(trail.to_vec().len(), 1);
    }

    #[test]
    fn test_clear() {
        let mut trail = TrailHistory::new(4);
        trail.push(position(1.0));
        trail.clear();
        assert!(trail.is_empty());
        assert!(trail.last().is_none());
    }
}
