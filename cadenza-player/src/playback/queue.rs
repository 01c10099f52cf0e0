//! Play queue with a non-destructive shuffle view
//!
//! The queue keeps the order it was given (`original`) and, while shuffle is
//! on, a permutation of indices into it. Turning shuffle off drops the
//! permutation, so toggling twice always yields the original order again.
//! Working in indices keeps duplicate track ids distinct.

use cadenza_common::events::TrackId;
use rand::seq::SliceRandom;
use rand::Rng;

#[derive(Debug, Clone, Default)]
pub struct PlayQueue {
    original: Vec<TrackId>,
    /// Shuffled view: positions into `original`
    permutation: Option<Vec<usize>>,
    /// Index into the effective order
    current: Option<usize>,
}

impl PlayQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the queue and position it at `start_index` (of `tracks`)
    ///
    /// Returns `None` and leaves the queue untouched when `tracks` is empty or
    /// the index is out of range. An active shuffle is rebuilt around the new
    /// start track.
    pub fn replace<R: Rng + ?Sized>(
        &mut self,
        tracks: Vec<TrackId>,
        start_index: usize,
        rng: &mut R,
    ) -> Option<TrackId> {
        if start_index >= tracks.len() {
            return None;
        }
        let shuffled = self.is_shuffled();
        self.original = tracks;
        self.permutation = None;
        self.current = Some(start_index);
        if shuffled {
            self.shuffle(rng);
        }
        self.current_track()
    }

    pub fn is_shuffled(&self) -> bool {
        self.permutation.is_some()
    }

    /// Build a shuffled view with the current track first
    pub fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let head = self.current.map(|i| self.original_position(i));
        let mut rest: Vec<usize> = (0..self.original.len())
            .filter(|&i| Some(i) != head)
            .collect();
        rest.shuffle(rng);

        let mut permutation = Vec::with_capacity(self.original.len());
        permutation.extend(head);
        permutation.extend(rest);

        if head.is_some() {
            self.current = Some(0);
        }
        self.permutation = Some(permutation);
    }

    /// Drop the shuffled view, keeping the current entry current
    pub fn unshuffle(&mut self) {
        if let Some(current) = self.current {
            self.current = Some(self.original_position(current));
        }
        self.permutation = None;
    }

    /// Turn the shuffle view on or off
    pub fn set_shuffle<R: Rng + ?Sized>(&mut self, enabled: bool, rng: &mut R) {
        match (enabled, self.is_shuffled()) {
            (true, false) => self.shuffle(rng),
            (false, true) => self.unshuffle(),
            _ => {}
        }
    }

    /// Position in `original` of the entry at effective index `index`
    fn original_position(&self, index: usize) -> usize {
        match &self.permutation {
            Some(p) => p[index],
            None => index,
        }
    }

    pub fn original(&self) -> &[TrackId] {
        &self.original
    }

    /// Queue in playback order
    pub fn effective(&self) -> Vec<TrackId> {
        match &self.permutation {
            Some(p) => p.iter().map(|&i| self.original[i]).collect(),
            None => self.original.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.original.len()
    }

    pub fn is_empty(&self) -> bool {
        self.original.is_empty()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn current_track(&self) -> Option<TrackId> {
        self.current.map(|i| self.original[self.original_position(i)])
    }

    pub fn track_at(&self, index: usize) -> Option<TrackId> {
        (index < self.len()).then(|| self.original[self.original_position(index)])
    }

    /// Make `index` (effective order) current
    pub fn jump(&mut self, index: usize) -> Option<TrackId> {
        if index >= self.len() {
            return None;
        }
        self.current = Some(index);
        self.current_track()
    }

    /// Effective index of the first occurrence of `id`
    pub fn position_of(&self, id: TrackId) -> Option<usize> {
        (0..self.len()).find(|&i| self.track_at(i) == Some(id))
    }

    /// Index after the current one; wraps to the start only when `wrap` is set
    ///
    /// With nothing current, the first entry is next.
    pub fn next_index(&self, wrap: bool) -> Option<usize> {
        if self.is_empty() {
            return None;
        }
        match self.current {
            None => Some(0),
            Some(i) if i + 1 < self.len() => Some(i + 1),
            Some(_) if wrap => Some(0),
            Some(_) => None,
        }
    }

    /// Index before the current one; wraps to the end only when `wrap` is set
    pub fn previous_index(&self, wrap: bool) -> Option<usize> {
        match self.current {
            Some(i) if i > 0 => Some(i - 1),
            Some(_) if wrap => Some(self.len() - 1),
            _ => None,
        }
    }

    /// Append a track
    ///
    /// In shuffle mode it is appended to the shuffled view as well.
    pub fn enqueue(&mut self, id: TrackId) {
        self.original.push(id);
        if let Some(p) = &mut self.permutation {
            p.push(self.original.len() - 1);
        }
    }

    /// Remove every occurrence of `id`
    ///
    /// Returns true when the current entry was among the removed ones. The
    /// current index then points at the entry that followed it, or is cleared
    /// when it was last.
    pub fn remove(&mut self, id: TrackId) -> bool {
        let mut removed_current = false;
        let mut index = self.len();
        while index > 0 {
            index -= 1;
            if self.track_at(index) != Some(id) {
                continue;
            }

            let original_index = self.original_position(index);
            self.original.remove(original_index);
            if let Some(p) = &mut self.permutation {
                p.remove(index);
                for slot in p.iter_mut() {
                    if *slot > original_index {
                        *slot -= 1;
                    }
                }
            }

            match self.current {
                Some(c) if c == index => removed_current = true,
                Some(c) if c > index => self.current = Some(c - 1),
                _ => {}
            }
        }

        if let Some(c) = self.current {
            if c >= self.len() {
                self.current = None;
            }
        }
        removed_current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    fn queue_of(ids: &[TrackId], start: usize) -> PlayQueue {
        let mut q = PlayQueue::new();
        q.replace(ids.to_vec(), start, &mut rng());
        q
    }

    #[test]
    fn test_replace_rejects_bad_input() {
        let mut q = queue_of(&[1, 2], 0);
        assert_eq!(q.replace(vec![], 0, &mut rng()), None);
        assert_eq!(q.replace(vec![5, 6], 2, &mut rng()), None);
        assert_eq!(q.original(), &[1, 2]);
    }

    #[test]
    fn test_shuffle_keeps_current_first() {
        let mut q = queue_of(&[10, 20, 30, 40, 50, 60], 3);
        q.set_shuffle(true, &mut rng());

        assert_eq!(q.current_index(), Some(0));
        assert_eq!(q.current_track(), Some(40));
        let mut sorted = q.effective();
        sorted.sort();
        assert_eq!(sorted, vec![10, 20, 30, 40, 50, 60]);
        assert_eq!(q.original(), &[10, 20, 30, 40, 50, 60]);
    }

    #[test]
    fn test_shuffle_round_trip_restores_order_and_current() {
        let mut q = queue_of(&[1, 2, 3, 4, 5, 6, 7, 8], 5);
        let mut r = rng();
        q.set_shuffle(true, &mut r);
        q.jump(3);
        let now_playing = q.current_track();
        q.set_shuffle(false, &mut r);

        assert_eq!(q.effective(), vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(q.current_track(), now_playing);
    }

    #[test]
    fn test_next_and_previous_wrapping() {
        let mut q = queue_of(&[1, 2, 3], 2);
        assert_eq!(q.next_index(false), None);
        assert_eq!(q.next_index(true), Some(0));

        q.jump(0);
        assert_eq!(q.previous_index(false), None);
        assert_eq!(q.previous_index(true), Some(2));
    }

    #[test]
    fn test_enqueue_in_shuffle_mode() {
        let mut q = queue_of(&[1, 2, 3], 0);
        q.set_shuffle(true, &mut rng());
        q.enqueue(9);

        assert_eq!(q.effective().last(), Some(&9));
        q.set_shuffle(false, &mut rng());
        assert_eq!(q.effective(), vec![1, 2, 3, 9]);
    }

    #[test]
    fn test_remove_current_points_at_follower() {
        let mut q = queue_of(&[1, 2, 3, 4], 1);
        assert!(q.remove(2));
        assert_eq!(q.current_track(), Some(3));
        assert_eq!(q.effective(), vec![1, 3, 4]);
    }

    #[test]
    fn test_remove_before_current_shifts_index() {
        let mut q = queue_of(&[1, 2, 3, 4], 2);
        assert!(!q.remove(1));
        assert_eq!(q.current_track(), Some(3));
        assert_eq!(q.current_index(), Some(1));
    }

    #[test]
    fn test_remove_last_current_clears_position() {
        let mut q = queue_of(&[1, 2], 1);
        assert!(q.remove(2));
        assert_eq!(q.current_index(), None);
    }

    #[test]
    fn test_remove_while_shuffled_keeps_view_consistent() {
        let mut q = queue_of(&[1, 2, 3, 4, 5], 0);
        q.set_shuffle(true, &mut rng());
        q.remove(3);

        let mut sorted = q.effective();
        sorted.sort();
        assert_eq!(sorted, vec![1, 2, 4, 5]);
        q.set_shuffle(false, &mut rng());
        assert_eq!(q.effective(), vec![1, 2, 4, 5]);
    }
}
