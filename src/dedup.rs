use rustc_hash::FxHashSet;
use std::collections::VecDeque;

/// true iff `a` is newer than `b` on the 16-bit id circle (half-range comparison)
pub(crate) fn id_newer(a: u16, b: u16) -> bool {
    a.wrapping_sub(b) as i16 > 0
}

/// Duplicate suppression for inbound acknowledged datagrams.
///
/// Holds the raw ids of recently seen reliable / hello / ping datagrams. Ids are aged
///  out once they fall more than half the id circle (2^15 positions) behind the newest
///  observed id, and the window is additionally bounded to `capacity` entries, so memory
///  stays O(capacity) no matter what the remote sends.
pub(crate) struct DedupWindow {
    capacity: usize,
    seen: FxHashSet<u16>,
    insertion_order: VecDeque<u16>,
    newest: Option<u16>,
}

impl DedupWindow {
    pub fn new(capacity: usize) -> DedupWindow {
        DedupWindow {
            capacity,
            seen: FxHashSet::default(),
            insertion_order: VecDeque::new(),
            newest: None,
        }
    }

    /// Record an inbound id. Returns true iff the id was already in the window,
    ///  i.e. the datagram is a duplicate and must not be delivered.
    pub fn observe(&mut self, id: u16) -> bool {
        if self.seen.contains(&id) {
            return true;
        }

        self.seen.insert(id);
        self.insertion_order.push_back(id);

        match self.newest {
            Some(newest) if !id_newer(id, newest) => {}
            _ => self.newest = Some(id),
        }

        self.age_out();
        false
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    fn age_out(&mut self) {
        let newest = match self.newest {
            Some(newest) => newest,
            None => return,
        };

        // ids more than half the circle behind the newest can no longer be confused
        //  with fresh ids and are dropped eagerly
        while let Some(&oldest) = self.insertion_order.front() {
            let behind = newest.wrapping_sub(oldest);
            if behind > 0x8000 {
                self.insertion_order.pop_front();
                self.seen.remove(&oldest);
            } else {
                break;
            }
        }

        while self.insertion_order.len() > self.capacity {
            if let Some(oldest) = self.insertion_order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::adjacent(2, 1, true)]
    #[case::adjacent_reverse(1, 2, false)]
    #[case::equal(7, 7, false)]
    #[case::wraparound(2, 0xfffe, true)]
    #[case::wraparound_reverse(0xfffe, 2, false)]
    fn test_id_newer(#[case] a: u16, #[case] b: u16, #[case] expected: bool) {
        assert_eq!(id_newer(a, b), expected);
    }

    #[test]
    fn test_duplicate_detection() {
        let mut window = DedupWindow::new(16);

        assert!(!window.observe(5));
        assert!(window.observe(5));
        assert!(!window.observe(6));
        assert!(window.observe(5));
        assert!(window.observe(6));
    }

    #[test]
    fn test_capacity_bound() {
        let mut window = DedupWindow::new(4);

        for id in 0..100u16 {
            window.observe(id);
            assert!(window.len() <= 4);
        }

        // the most recent ids are still suppressed, the evicted ones are not
        assert!(window.observe(99));
        assert!(!window.observe(42));
    }

    #[test]
    fn test_half_circle_aging() {
        let mut window = DedupWindow::new(1024);

        window.observe(100);
        // a jump of more than 2^15 ids moves 100 out of the half circle
        window.observe(100u16.wrapping_add(0x8001));

        assert_eq!(window.len(), 1);
        assert!(!window.observe(100));
    }

    #[test]
    fn test_wraparound_ids_kept_within_half_circle() {
        let mut window = DedupWindow::new(1024);

        window.observe(0xfffe);
        window.observe(0xffff);
        window.observe(0);
        window.observe(1);

        assert!(window.observe(0xfffe));
        assert!(window.observe(0));
    }

    #[test]
    fn test_out_of_order_arrival_does_not_regress_newest() {
        let mut window = DedupWindow::new(1024);

        window.observe(1000);
        window.observe(990); // late arrival, newest stays 1000

        assert_eq!(window.newest, Some(1000));
        assert!(window.observe(990));
    }
}
