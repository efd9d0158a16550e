//! Fixed pool of compute slots.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;

/// One unit of admitted concurrency.
///
/// The memory and cpu fields are capacity hints populated at startup;
/// placement does not consult them.
#[derive(Debug, Clone, Serialize)]
pub struct Slot {
    pub slot_id: String,
    pub is_available: bool,
    pub current_job: Option<String>,
    pub allocated_at: Option<DateTime<Utc>>,
    pub memory_limit_mb: u32,
    pub cpu_cores: f64,
}

/// The fixed set of slots handed out by the scheduler.
///
/// Slot identity is stable for the process lifetime. `reserve` is
/// all-or-nothing and `release` is idempotent, so the conservation
/// invariant (available + assigned = total) holds at every step.
pub struct SlotPool {
    slots: Vec<Slot>,
}

impl SlotPool {
    pub fn new(total: usize) -> Self {
        let mut rng = rand::rng();
        let slots = (0..total)
            .map(|i| Slot {
                slot_id: format!("slot_{i:03}"),
                is_available: true,
                current_job: None,
                allocated_at: None,
                memory_limit_mb: rng.random_range(512..=2048),
                cpu_cores: rng.random_range(0.5..=2.0),
            })
            .collect();
        Self { slots }
    }

    pub fn total(&self) -> usize {
        self.slots.len()
    }

    pub fn count_available(&self) -> usize {
        self.slots.iter().filter(|s| s.is_available).count()
    }

    /// Reserve `n` slots for a job. Either all `n` become unavailable
    /// atomically, or no state changes and `None` is returned.
    pub fn reserve(&mut self, n: usize, job_id: &str) -> Option<Vec<String>> {
        let indices: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_available)
            .map(|(i, _)| i)
            .take(n)
            .collect();
        if indices.len() < n {
            return None;
        }

        let now = Utc::now();
        let mut ids = Vec::with_capacity(n);
        for i in indices {
            let slot = &mut self.slots[i];
            slot.is_available = false;
            slot.current_job = Some(job_id.to_string());
            slot.allocated_at = Some(now);
            ids.push(slot.slot_id.clone());
        }
        Some(ids)
    }

    /// Return slots to the pool. Unknown or already-released ids are
    /// ignored.
    pub fn release(&mut self, ids: &[String]) {
        for slot in &mut self.slots {
            if ids.contains(&slot.slot_id) {
                slot.is_available = true;
                slot.current_job = None;
                slot.allocated_at = None;
            }
        }
    }

    pub fn snapshot(&self) -> Vec<Slot> {
        self.slots.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_is_all_or_nothing() {
        let mut pool = SlotPool::new(4);
        assert_eq!(pool.count_available(), 4);

        let ids = pool.reserve(3, "job-a").expect("3 of 4 should fit");
        assert_eq!(ids.len(), 3);
        assert_eq!(pool.count_available(), 1);

        // Asking for more than remain changes nothing.
        assert!(pool.reserve(2, "job-b").is_none());
        assert_eq!(pool.count_available(), 1);
    }

    #[test]
    fn release_is_idempotent() {
        let mut pool = SlotPool::new(2);
        let ids = pool.reserve(2, "job-a").unwrap();

        pool.release(&ids);
        assert_eq!(pool.count_available(), 2);
        pool.release(&ids);
        assert_eq!(pool.count_available(), 2);

        pool.release(&["slot_999".to_string()]);
        assert_eq!(pool.count_available(), 2);
    }

    #[test]
    fn reserved_slots_track_their_job() {
        let mut pool = SlotPool::new(2);
        let ids = pool.reserve(1, "job-a").unwrap();

        let snapshot = pool.snapshot();
        let reserved = snapshot.iter().find(|s| s.slot_id == ids[0]).unwrap();
        assert!(!reserved.is_available);
        assert_eq!(reserved.current_job.as_deref(), Some("job-a"));
        assert!(reserved.allocated_at.is_some());

        pool.release(&ids);
        let snapshot = pool.snapshot();
        let released = snapshot.iter().find(|s| s.slot_id == ids[0]).unwrap();
        assert!(released.is_available);
        assert!(released.current_job.is_none());
    }

    #[test]
    fn slot_identity_is_stable() {
        let mut pool = SlotPool::new(3);
        let before: Vec<String> = pool.snapshot().iter().map(|s| s.slot_id.clone()).collect();
        let ids = pool.reserve(3, "job-a").unwrap();
        pool.release(&ids);
        let after: Vec<String> = pool.snapshot().iter().map(|s| s.slot_id.clone()).collect();
        assert_eq!(before, after);
    }
}
