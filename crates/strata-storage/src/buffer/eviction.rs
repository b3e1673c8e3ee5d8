//! Priority-LRU eviction partitions.
//!
//! Idle slots live in one of K independent partitions; slot `n` always
//! belongs to partition `n % K`. Each partition keeps five intrusive lists
//! over an arena indexed by slot number:
//!
//! ```text
//!   ordinary order            victim area
//! ┌───────┐ ┌───────┐   ┌────────────┐ ┌───────────────┐ ┌──────────────┐
//! │  hot  │→│ cold  │ → │ next flush │→│ current flush │ │ clean victim │
//! └───────┘ └───────┘   │  (dirty)   │ │(dirty,claimed)│ │  (reusable)  │
//!                       └────────────┘ └───────────────┘ └──────────────┘
//! ```
//!
//! Every list is ordered most-recently-used at the head, least-recently-used
//! at the tail. Aging moves the tails of cold (then hot) into the victim area
//! until it holds at least the configured minimum, and keeps cold at its
//! configured share of the ordinary population.

use super::slot::{Slot, SlotId};
use super::PartitionStats;

/// The five lists of a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum ListKind {
    Hot,
    Cold,
    NextFlush,
    CurrentFlush,
    CleanVictim,
}

impl ListKind {
    const COUNT: usize = 5;

    #[inline]
    fn index(self) -> usize {
        match self {
            ListKind::Hot => 0,
            ListKind::Cold => 1,
            ListKind::NextFlush => 2,
            ListKind::CurrentFlush => 3,
            ListKind::CleanVictim => 4,
        }
    }

    #[inline]
    pub fn is_victim_area(self) -> bool {
        matches!(
            self,
            ListKind::NextFlush | ListKind::CurrentFlush | ListKind::CleanVictim
        )
    }
}

/// Where a released slot is inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InsertClass {
    /// Head of the hot list.
    Hot,
    /// Head of the cold list.
    Cold,
    /// Tail of the cold list; first in line for aging.
    LastUse,
    /// Straight into the victim area.
    Victim,
    /// Back into the list the slot was unlinked from.
    Restore(Option<ListKind>),
}

#[derive(Debug, Default, Clone, Copy)]
struct Link {
    prev: Option<SlotId>,
    next: Option<SlotId>,
    list: Option<ListKind>,
}

#[derive(Debug, Default, Clone, Copy)]
struct ListEnds {
    head: Option<SlotId>,
    tail: Option<SlotId>,
    len: usize,
}

/// One eviction partition.
#[derive(Debug)]
pub(crate) struct Partition {
    id: usize,
    stride: usize,
    links: Vec<Link>,
    lists: [ListEnds; ListKind::COUNT],
    victim_min: usize,
    cold_percent: usize,
    preflush_threshold: usize,
}

impl Partition {
    /// Creates partition `id` of `stride` for a pool of `num_slots`.
    ///
    /// Every owned slot starts unbound in the clean-victim list.
    pub fn new(
        id: usize,
        stride: usize,
        num_slots: usize,
        cold_percent: u8,
        victim_percent: u8,
        preflush_threshold: usize,
    ) -> Self {
        let owned = (num_slots + stride - 1 - id) / stride;
        let mut partition = Self {
            id,
            stride,
            links: vec![Link::default(); owned],
            lists: [ListEnds::default(); ListKind::COUNT],
            victim_min: (owned * usize::from(victim_percent) / 100).max(1),
            cold_percent: usize::from(cold_percent),
            preflush_threshold,
        };
        for local in 0..owned {
            let slot = partition.slot_at(local);
            partition.push_back(ListKind::CleanVictim, slot);
        }
        partition
    }

    /// Returns the number of slots this partition owns.
    #[inline]
    pub fn owned(&self) -> usize {
        self.links.len()
    }

    #[inline]
    pub fn len(&self, kind: ListKind) -> usize {
        self.lists[kind.index()].len
    }

    /// Returns the list `slot` is currently linked into.
    #[inline]
    #[cfg(test)]
    pub fn list_of(&self, slot: SlotId) -> Option<ListKind> {
        self.links[self.local(slot)].list
    }

    /// Returns the number of slots in the victim area.
    pub fn victim_len(&self) -> usize {
        self.len(ListKind::NextFlush) + self.len(ListKind::CurrentFlush) + self.len(ListKind::CleanVictim)
    }

    /// Reinserts an idle slot and ages the partition.
    ///
    /// Returns true if the next-flush batch has grown past the preflush
    /// threshold.
    pub fn insert(&mut self, slot: SlotId, class: InsertClass, slots: &[Slot]) -> bool {
        let dirty = slots[slot.index()].is_dirty();
        let victim = if dirty {
            ListKind::NextFlush
        } else {
            ListKind::CleanVictim
        };
        match class {
            InsertClass::Hot | InsertClass::Restore(None) => self.push_front(ListKind::Hot, slot),
            InsertClass::Cold => self.push_front(ListKind::Cold, slot),
            InsertClass::LastUse => self.push_back(ListKind::Cold, slot),
            InsertClass::Victim => self.push_front(victim, slot),
            InsertClass::Restore(Some(kind)) if !kind.is_victim_area() => self.push_front(kind, slot),
            InsertClass::Restore(Some(ListKind::CurrentFlush)) if dirty => {
                self.push_front(ListKind::CurrentFlush, slot);
            }
            InsertClass::Restore(Some(_)) => self.push_front(victim, slot),
        }
        self.age(slots);
        self.preflush_due()
    }

    /// Unlinks a slot that is being reached.
    pub fn remove(&mut self, slot: SlotId) -> Option<ListKind> {
        self.unlink(slot)
    }

    /// Pops the least-recently-used victim.
    ///
    /// Searches the clean victims first, then (unless `must_be_clean`) the
    /// current and the next flush batches. Aging refills the victim area
    /// afterwards.
    pub fn find_victim(&mut self, must_be_clean: bool, slots: &[Slot]) -> Option<(SlotId, ListKind)> {
        let order: &[ListKind] = if must_be_clean {
            &[ListKind::CleanVictim]
        } else {
            &[ListKind::CleanVictim, ListKind::CurrentFlush, ListKind::NextFlush]
        };
        if self.victim_len() == 0 {
            self.age(slots);
        }
        for &kind in order {
            if let Some(slot) = self.pop_back(kind) {
                self.age(slots);
                return Some((slot, kind));
            }
        }
        None
    }

    /// Puts back a victim that could not be claimed.
    ///
    /// It goes to the head of its list so the next search tries another
    /// candidate first.
    pub fn return_victim(&mut self, slot: SlotId, kind: ListKind) {
        self.push_front(kind, slot);
    }

    /// Claims up to `max` next-flush slots for a preflush writer.
    pub fn harvest(&mut self, max: usize, slots: &[Slot]) -> Vec<SlotId> {
        let mut claimed = Vec::with_capacity(max.min(self.len(ListKind::NextFlush)));
        while claimed.len() < max {
            let Some(slot) = self.pop_back(ListKind::NextFlush) else {
                break;
            };
            slots[slot.index()].set_preflush_pending(true);
            self.push_front(ListKind::CurrentFlush, slot);
            claimed.push(slot);
        }
        claimed
    }

    /// Returns a snapshot of the list lengths.
    pub fn stats(&self) -> PartitionStats {
        PartitionStats {
            partition: self.id,
            owned: self.owned(),
            hot: self.len(ListKind::Hot),
            cold: self.len(ListKind::Cold),
            next_flush: self.len(ListKind::NextFlush),
            current_flush: self.len(ListKind::CurrentFlush),
            clean_victims: self.len(ListKind::CleanVictim),
        }
    }

    fn preflush_due(&self) -> bool {
        self.preflush_threshold > 0 && self.len(ListKind::NextFlush) >= self.preflush_threshold
    }

    /// Refills the victim area and rebalances hot against cold.
    fn age(&mut self, slots: &[Slot]) {
        while self.victim_len() < self.victim_min {
            let Some(slot) = self
                .pop_back(ListKind::Cold)
                .or_else(|| self.pop_back(ListKind::Hot))
            else {
                break;
            };
            let kind = if slots[slot.index()].is_dirty() {
                ListKind::NextFlush
            } else {
                ListKind::CleanVictim
            };
            self.push_front(kind, slot);
        }

        let ordinary = self.len(ListKind::Hot) + self.len(ListKind::Cold);
        let cold_target = ordinary * self.cold_percent / 100;
        while self.len(ListKind::Cold) < cold_target {
            let Some(slot) = self.pop_back(ListKind::Hot) else {
                break;
            };
            self.push_front(ListKind::Cold, slot);
        }
    }

    #[inline]
    fn local(&self, slot: SlotId) -> usize {
        debug_assert_eq!(slot.index() % self.stride, self.id, "slot {slot} not owned by partition {}", self.id);
        slot.index() / self.stride
    }

    #[inline]
    fn slot_at(&self, local: usize) -> SlotId {
        // Slot counts are validated to fit in u32.
        SlotId::new((local * self.stride + self.id) as u32)
    }

    fn push_front(&mut self, kind: ListKind, slot: SlotId) {
        let local = self.local(slot);
        assert!(self.links[local].list.is_none(), "slot {slot} is already linked");
        let ends = &mut self.lists[kind.index()];
        let old_head = ends.head;
        ends.head = Some(slot);
        if ends.tail.is_none() {
            ends.tail = Some(slot);
        }
        ends.len += 1;
        self.links[local] = Link {
            prev: None,
            next: old_head,
            list: Some(kind),
        };
        if let Some(next) = old_head {
            let next = self.local(next);
            self.links[next].prev = Some(slot);
        }
    }

    fn push_back(&mut self, kind: ListKind, slot: SlotId) {
        let local = self.local(slot);
        assert!(self.links[local].list.is_none(), "slot {slot} is already linked");
        let ends = &mut self.lists[kind.index()];
        let old_tail = ends.tail;
        ends.tail = Some(slot);
        if ends.head.is_none() {
            ends.head = Some(slot);
        }
        ends.len += 1;
        self.links[local] = Link {
            prev: old_tail,
            next: None,
            list: Some(kind),
        };
        if let Some(prev) = old_tail {
            let prev = self.local(prev);
            self.links[prev].next = Some(slot);
        }
    }

    fn pop_back(&mut self, kind: ListKind) -> Option<SlotId> {
        let tail = self.lists[kind.index()].tail?;
        self.unlink(tail);
        Some(tail)
    }

    fn unlink(&mut self, slot: SlotId) -> Option<ListKind> {
        let local = self.local(slot);
        let link = self.links[local];
        let kind = link.list?;

        match link.prev {
            Some(prev) => {
                let prev = self.local(prev);
                self.links[prev].next = link.next;
            }
            None => self.lists[kind.index()].head = link.next,
        }
        match link.next {
            Some(next) => {
                let next = self.local(next);
                self.links[next].prev = link.prev;
            }
            None => self.lists[kind.index()].tail = link.prev,
        }
        self.lists[kind.index()].len -= 1;
        self.links[local] = Link::default();
        Some(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slots(n: u32) -> Vec<Slot> {
        (0..n).map(|i| Slot::new(SlotId::new(i), 16)).collect()
    }

    fn ids(partition: &Partition, kind: ListKind) -> Vec<u32> {
        let mut out = Vec::new();
        let mut cursor = partition.lists[kind.index()].head;
        while let Some(slot) = cursor {
            out.push(slot.as_u32());
            cursor = partition.links[partition.local(slot)].next;
        }
        out
    }

    #[test]
    fn test_partition_owns_strided_slots() {
        let p = Partition::new(1, 3, 10, 30, 10, 0);
        assert_eq!(p.owned(), 3);
        assert_eq!(ids(&p, ListKind::CleanVictim), vec![1, 4, 7]);
    }

    #[test]
    fn test_find_victim_lru_order() {
        let slots = slots(4);
        let mut p = Partition::new(0, 1, 4, 0, 100, 0);
        assert_eq!(p.find_victim(true, &slots), Some((SlotId::new(3), ListKind::CleanVictim)));
        assert_eq!(p.find_victim(true, &slots), Some((SlotId::new(2), ListKind::CleanVictim)));
    }

    #[test]
    fn test_clean_victims_preferred_over_dirty() {
        let slots = slots(4);
        let mut p = Partition::new(0, 1, 4, 0, 100, 0);
        let all: Vec<SlotId> = (0..4).map(|_| p.find_victim(false, &slots).unwrap().0).collect();

        slots[all[0].index()].set_dirty(true);
        p.insert(all[0], InsertClass::Victim, &slots);
        p.insert(all[1], InsertClass::Victim, &slots);
        assert_eq!(ids(&p, ListKind::NextFlush), vec![all[0].as_u32()]);
        assert_eq!(ids(&p, ListKind::CleanVictim), vec![all[1].as_u32()]);

        assert_eq!(p.find_victim(false, &slots), Some((all[1], ListKind::CleanVictim)));
        assert_eq!(p.find_victim(true, &slots), None);
        assert_eq!(p.find_victim(false, &slots), Some((all[0], ListKind::NextFlush)));
    }

    #[test]
    fn test_aging_fills_victim_area() {
        let slots = slots(10);
        let mut p = Partition::new(0, 1, 10, 0, 20, 0);
        let taken: Vec<SlotId> = (0..10).map(|_| p.find_victim(true, &slots).unwrap().0).collect();
        assert_eq!(p.victim_len(), 0);

        slots[taken[0].index()].set_dirty(true);
        for slot in &taken {
            p.insert(*slot, InsertClass::Hot, &slots);
        }
        // victim_min is 2: the two oldest hot slots were aged out.
        assert_eq!(p.victim_len(), 2);
        assert_eq!(p.list_of(taken[0]), Some(ListKind::NextFlush));
        assert_eq!(p.list_of(taken[1]), Some(ListKind::CleanVictim));
        assert_eq!(p.len(ListKind::Hot), 8);
    }

    #[test]
    fn test_rebalance_cold_share() {
        let slots = slots(10);
        let mut p = Partition::new(0, 1, 10, 50, 10, 0);
        let taken: Vec<SlotId> = (0..10).map(|_| p.find_victim(true, &slots).unwrap().0).collect();
        for slot in &taken {
            p.insert(*slot, InsertClass::Hot, &slots);
        }
        let ordinary = p.len(ListKind::Hot) + p.len(ListKind::Cold);
        assert_eq!(ordinary, 9);
        assert_eq!(p.len(ListKind::Cold), 4);
        // The oldest hot slots were demoted.
        assert_eq!(p.list_of(taken[1]), Some(ListKind::Cold));
        assert_eq!(p.list_of(taken[9]), Some(ListKind::Hot));
    }

    #[test]
    fn test_last_use_ages_first() {
        let slots = slots(4);
        let mut p = Partition::new(0, 1, 4, 0, 25, 0);
        let taken: Vec<SlotId> = (0..4).map(|_| p.find_victim(true, &slots).unwrap().0).collect();
        p.insert(taken[0], InsertClass::Hot, &slots);
        p.insert(taken[1], InsertClass::Hot, &slots);
        assert_eq!(p.list_of(taken[0]), Some(ListKind::CleanVictim));

        p.insert(taken[2], InsertClass::LastUse, &slots);
        assert_eq!(p.list_of(taken[2]), Some(ListKind::Cold));
        let (victim, _) = p.find_victim(true, &slots).unwrap();
        assert_eq!(victim, taken[0]);
        // Refill took the last-use slot before any hot one.
        assert_eq!(p.list_of(taken[2]), Some(ListKind::CleanVictim));
        assert_eq!(p.list_of(taken[1]), Some(ListKind::Hot));
    }

    #[test]
    fn test_restore_follows_dirtiness() {
        let slots = slots(2);
        let mut p = Partition::new(0, 1, 2, 0, 100, 0);
        let a = p.find_victim(true, &slots).unwrap().0;
        let b = p.find_victim(true, &slots).unwrap().0;

        p.insert(a, InsertClass::Restore(Some(ListKind::NextFlush)), &slots);
        assert_eq!(p.list_of(a), Some(ListKind::CleanVictim));

        slots[b.index()].set_dirty(true);
        p.insert(b, InsertClass::Restore(Some(ListKind::CurrentFlush)), &slots);
        assert_eq!(p.list_of(b), Some(ListKind::CurrentFlush));
    }

    #[test]
    fn test_harvest_and_preflush_trigger() {
        let slots = slots(4);
        let mut p = Partition::new(0, 1, 4, 0, 100, 2);
        let taken: Vec<SlotId> = (0..4).map(|_| p.find_victim(true, &slots).unwrap().0).collect();
        for slot in &taken {
            slots[slot.index()].set_dirty(true);
        }
        assert!(!p.insert(taken[0], InsertClass::Victim, &slots));
        assert!(p.insert(taken[1], InsertClass::Victim, &slots));

        let claimed = p.harvest(8, &slots);
        assert_eq!(claimed, vec![taken[0], taken[1]]);
        assert!(slots[taken[0].index()].is_preflush_pending());
        assert_eq!(p.len(ListKind::NextFlush), 0);
        assert_eq!(p.len(ListKind::CurrentFlush), 2);
    }

    #[test]
    fn test_remove_and_stats() {
        let mut p = Partition::new(0, 1, 3, 0, 10, 0);
        assert_eq!(p.remove(SlotId::new(1)), Some(ListKind::CleanVictim));
        assert_eq!(p.remove(SlotId::new(1)), None);
        assert_eq!(ids(&p, ListKind::CleanVictim), vec![0, 2]);

        p.return_victim(SlotId::new(1), ListKind::CleanVictim);
        let stats = p.stats();
        assert_eq!(stats.clean_victims, 3);
        assert_eq!(stats.owned, 3);
    }
}
