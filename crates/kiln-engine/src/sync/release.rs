use std::collections::VecDeque;

use crate::sync::fence::FenceSync;

struct Pending<T> {
    item: T,
    target_fence: u64,
}

/// Holds owned resources until the GPU can no longer be reading them.
///
/// Items are stamped with the fence value of the frame that enqueued them and
/// are dropped once that value has completed. Stamps never decrease in enqueue
/// order, so release stops at the first item that is not yet safe.
pub struct DeferredReleaseQueue<T> {
    queue: VecDeque<Pending<T>>,
    last_target: u64,
}

impl<T> Default for DeferredReleaseQueue<T> {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            last_target: 0,
        }
    }
}

impl<T> DeferredReleaseQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes ownership of `item` until the current frame's fence completes.
    pub fn enqueue(&mut self, item: T, fence: &FenceSync) {
        self.enqueue_at(item, fence.target_fence());
    }

    pub fn enqueue_at(&mut self, item: T, target_fence: u64) {
        debug_assert!(
            target_fence >= self.last_target,
            "release stamps must not decrease ({target_fence} after {})",
            self.last_target
        );
        self.last_target = self.last_target.max(target_fence);
        self.queue.push_back(Pending { item, target_fence });
    }

    /// Drops every item whose fence has completed. Returns how many were dropped.
    pub fn release_garbage(&mut self, completed_fence: u64) -> usize {
        self.drain_completed(completed_fence, drop)
    }

    /// Like [`release_garbage`](Self::release_garbage) but hands each item to `sink`.
    pub fn drain_completed(&mut self, completed_fence: u64, mut sink: impl FnMut(T)) -> usize {
        let mut released = 0;
        while let Some(head) = self.queue.front() {
            if head.target_fence > completed_fence {
                break;
            }
            if let Some(pending) = self.queue.pop_front() {
                sink(pending.item);
                released += 1;
            }
        }
        if released > 0 {
            log::trace!("released {released} deferred items at fence {completed_fence}");
        }
        released
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Fence value of the oldest pending item.
    pub fn oldest_target(&self) -> Option<u64> {
        self.queue.front().map(|p| p.target_fence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn releases_in_enqueue_order_once_fence_completes() {
        let mut queue = DeferredReleaseQueue::new();
        queue.enqueue_at("a", 1);
        queue.enqueue_at("b", 2);
        queue.enqueue_at("c", 2);
        queue.enqueue_at("d", 4);

        let mut out = Vec::new();
        assert_eq!(queue.drain_completed(0, |i| out.push(i)), 0);
        assert_eq!(queue.drain_completed(2, |i| out.push(i)), 3);
        assert_eq!(out, vec!["a", "b", "c"]);
        assert_eq!(queue.oldest_target(), Some(4));
        assert_eq!(queue.release_garbage(3), 0);
        assert_eq!(queue.release_garbage(10), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn release_drops_owned_items() {
        use std::sync::Arc;
        let tracked = Arc::new(());
        let mut queue = DeferredReleaseQueue::new();
        queue.enqueue_at(tracked.clone(), 5);
        assert_eq!(Arc::strong_count(&tracked), 2);
        queue.release_garbage(4);
        assert_eq!(Arc::strong_count(&tracked), 2);
        queue.release_garbage(5);
        assert_eq!(Arc::strong_count(&tracked), 1);
    }

    /// xorshift64*; deterministic so failures reproduce.
    struct Rng(u64);

    impl Rng {
        fn next(&mut self) -> u64 {
            self.0 ^= self.0 >> 12;
            self.0 ^= self.0 << 25;
            self.0 ^= self.0 >> 27;
            self.0.wrapping_mul(0x2545_f491_4f6c_dd1d)
        }
    }

    #[test]
    fn random_interleavings_never_release_early() {
        for seed in 1..=64u64 {
            let mut rng = Rng(seed.wrapping_mul(0x9e37_79b9_7f4a_7c15));
            let mut queue = DeferredReleaseQueue::new();
            let mut target = 1u64;
            let mut completed = 0u64;
            let mut next_id = 0u64;
            let mut released = Vec::new();

            for _ in 0..500 {
                match rng.next() % 3 {
                    0 => {
                        queue.enqueue_at((next_id, target), target);
                        next_id += 1;
                    }
                    1 => target += 1,
                    _ => {
                        // The GPU never runs ahead of what was signaled.
                        completed = (completed + rng.next() % 3).min(target.saturating_sub(1));
                        queue.drain_completed(completed, |(id, stamp)| {
                            assert!(stamp <= completed, "item {id} stamped {stamp} released at {completed}");
                            released.push(id);
                        });
                    }
                }
            }
            queue.drain_completed(u64::MAX, |(id, _)| released.push(id));
            let expected: Vec<u64> = (0..next_id).collect();
            assert_eq!(released, expected, "seed {seed}: release order differs from enqueue order");
        }
    }
}
