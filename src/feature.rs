use std::collections::BTreeMap;

use crate::my_types::*;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Feature {
    pub point: Vector2d,
    pub id: TrackId,
}

/// Positions of one feature, one per frame since it was detected.
#[derive(Clone, Debug)]
pub struct Trajectory {
    detected: Vector2d,
    /// Tracked positions after the detection, oldest first
    followed: Vec<Vector2d>,
    /// Frame the feature was detected in
    pub first_frame: usize,
}

impl Trajectory {
    pub fn new(point: Vector2d, first_frame: usize) -> Self {
        Trajectory {
            detected: point,
            followed: vec![],
            first_frame,
        }
    }

    /// Most recent position
    pub fn tip(&self) -> Vector2d {
        *self.followed.last().unwrap_or(&self.detected)
    }

    fn push(&mut self, point: Vector2d) {
        self.followed.push(point);
    }

    pub fn len(&self) -> usize {
        1 + self.followed.len()
    }
}

/// The live trajectories, keyed by an id that is never reused.
#[derive(Debug, Default)]
pub struct TrajectoryStore {
    tracks: BTreeMap<TrackId, Trajectory>,
    next_id: usize,
}

impl TrajectoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new trajectory and return its id.
    pub fn insert(&mut self, point: Vector2d, frame_number: usize) -> TrackId {
        let id = TrackId(self.next_id);
        self.next_id += 1;
        self.tracks.insert(id, Trajectory::new(point, frame_number));
        id
    }

    /// Current tips in id order.
    pub fn tips(&self) -> Vec<Feature> {
        self.tracks
            .iter()
            .map(|(id, track)| Feature {
                point: track.tip(),
                id: *id,
            })
            .collect()
    }

    pub fn tip_points(&self) -> Vec<Vector2d> {
        self.tracks.values().map(Trajectory::tip).collect()
    }

    /// Extend every listed trajectory with its new position, or drop it
    /// when there is none.
    pub fn apply(&mut self, ids: &[TrackId], positions: &[Option<Vector2d>]) {
        assert_eq!(ids.len(), positions.len());
        for (id, position) in ids.iter().zip(positions) {
            match position {
                Some(point) => {
                    if let Some(track) = self.tracks.get_mut(id) {
                        track.push(*point);
                    }
                }
                None => {
                    self.tracks.remove(id);
                }
            }
        }
    }

    pub fn remove_all(&mut self, ids: &[TrackId]) {
        for id in ids {
            self.tracks.remove(id);
        }
    }

    pub fn get(&self, id: TrackId) -> Option<&Trajectory> {
        self.tracks.get(&id)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_tips() {
        let mut store = TrajectoryStore::new();
        let a = store.insert(Vector2d::new(1., 2.), 0);
        let b = store.insert(Vector2d::new(3., 4.), 0);
        assert_ne!(a, b);
        let tips = store.tips();
        assert_eq!(tips.len(), 2);
        assert_eq!(tips[0], Feature { point: Vector2d::new(1., 2.), id: a });
    }

    #[test]
    fn test_apply_appends_and_drops() {
        let mut store = TrajectoryStore::new();
        let a = store.insert(Vector2d::new(1., 1.), 0);
        let b = store.insert(Vector2d::new(5., 5.), 0);
        store.apply(&[a, b], &[Some(Vector2d::new(2., 1.)), None]);

        assert_eq!(store.len(), 1);
        assert!(store.get(b).is_none());
        let track = store.get(a).unwrap();
        assert_eq!(track.len(), 2);
        assert_eq!(track.tip(), Vector2d::new(2., 1.));
    }

    #[test]
    fn test_tip_is_latest_position() {
        let mut track = Trajectory::new(Vector2d::new(4., 4.), 2);
        assert_eq!(track.tip(), Vector2d::new(4., 4.));
        assert_eq!(track.len(), 1);
        track.push(Vector2d::new(5., 4.));
        track.push(Vector2d::new(6., 5.));
        assert_eq!(track.tip(), Vector2d::new(6., 5.));
        assert_eq!(track.len(), 3);
    }

    #[test]
    fn test_ids_not_reused() {
        let mut store = TrajectoryStore::new();
        let a = store.insert(Vector2d::new(1., 1.), 0);
        store.remove_all(&[a]);
        assert!(store.is_empty());
        let b = store.insert(Vector2d::new(1., 1.), 1);
        assert!(b > a);
        assert_eq!(store.get(b).unwrap().first_frame, 1);
    }
}
