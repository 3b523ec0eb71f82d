use std::collections::{HashMap, HashSet, VecDeque};

use vigil_schema::StreamItem;

/// Where freshly admitted items land. The opposite end is evicted once
/// capacity is exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOrder {
    /// Real-time view: newest first, oldest evicted from the tail.
    Head,
    /// Chronological view: appended at the tail, oldest evicted from the head.
    Tail,
}

/// Ordered, capacity-bounded, id-deduplicated collection. The seen-set
/// always mirrors the set of buffered ids.
#[derive(Debug)]
pub struct BoundedBuffer<T> {
    items: VecDeque<T>,
    seen: HashSet<String>,
    capacity: usize,
    order: InsertOrder,
}

impl<T: StreamItem> BoundedBuffer<T> {
    pub fn new(capacity: usize, order: InsertOrder) -> Self {
        assert!(capacity > 0, "buffer capacity must be non-zero");
        Self {
            items: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
            capacity,
            order,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    /// Insert `item` unless its id is already buffered. Returns whether the
    /// item was actually admitted; a duplicate performs no mutation at all.
    pub fn admit(&mut self, item: T) -> bool {
        if self.seen.contains(item.item_id()) {
            return false;
        }
        self.seen.insert(item.item_id().to_string());
        match self.order {
            InsertOrder::Head => self.items.push_front(item),
            InsertOrder::Tail => self.items.push_back(item),
        }
        if self.items.len() > self.capacity {
            let evicted = match self.order {
                InsertOrder::Head => self.items.pop_back(),
                InsertOrder::Tail => self.items.pop_front(),
            };
            if let Some(evicted) = evicted {
                self.seen.remove(evicted.item_id());
            }
        }
        true
    }

    /// Replace the whole buffer with an authoritative snapshot. The input is
    /// deduplicated by id (first position kept, last payload wins), then
    /// truncated to capacity on the eviction end before the seen-set is
    /// rebuilt.
    pub fn bulk_replace(&mut self, items: Vec<T>) {
        let mut position: HashMap<String, usize> = HashMap::with_capacity(items.len());
        let mut deduped: Vec<Option<T>> = Vec::with_capacity(items.len());
        for item in items {
            match position.get(item.item_id()) {
                Some(&idx) => deduped[idx] = Some(item),
                None => {
                    position.insert(item.item_id().to_string(), deduped.len());
                    deduped.push(Some(item));
                }
            }
        }
        let mut list: Vec<T> = deduped.into_iter().flatten().collect();
        if list.len() > self.capacity {
            match self.order {
                InsertOrder::Head => list.truncate(self.capacity),
                InsertOrder::Tail => {
                    let excess = list.len() - self.capacity;
                    list.drain(..excess);
                }
            }
        }
        self.seen = list.iter().map(|i| i.item_id().to_string()).collect();
        self.items = list.into();
    }

    /// Remove one item by id, if present.
    pub fn remove(&mut self, id: &str) -> Option<T> {
        if !self.seen.remove(id) {
            return None;
        }
        let idx = self.items.iter().position(|i| i.item_id() == id)?;
        self.items.remove(idx)
    }

    pub fn ids(&self) -> &HashSet<String> {
        &self.seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        id: String,
        tag: u32,
    }

    impl StreamItem for Item {
        fn item_id(&self) -> &str {
            &self.id
        }
    }

    fn item(id: &str, tag: u32) -> Item {
        Item {
            id: id.to_string(),
            tag,
        }
    }

    fn check_invariants(buf: &BoundedBuffer<Item>) {
        assert_eq!(buf.len(), buf.ids().len());
        for it in buf.iter() {
            assert!(buf.contains(&it.id));
        }
        assert!(buf.len() <= buf.capacity());
    }

    #[test]
    fn admit_is_idempotent() {
        let mut buf = BoundedBuffer::new(10, InsertOrder::Head);
        assert!(buf.admit(item("a", 1)));
        assert!(!buf.admit(item("a", 2)));
        assert_eq!(buf.len(), 1);
        // first admission's payload is kept
        assert_eq!(buf.iter().next().unwrap().tag, 1);
        check_invariants(&buf);
    }

    #[test]
    fn head_order_evicts_tail() {
        let mut buf = BoundedBuffer::new(3, InsertOrder::Head);
        for i in 0..4 {
            buf.admit(item(&format!("i{i}"), i));
        }
        assert_eq!(buf.len(), 3);
        assert!(!buf.contains("i0"), "oldest must be evicted");
        let front: Vec<u32> = buf.iter().map(|i| i.tag).collect();
        assert_eq!(front, vec![3, 2, 1]);
        check_invariants(&buf);
    }

    #[test]
    fn tail_order_evicts_head() {
        let mut buf = BoundedBuffer::new(3, InsertOrder::Tail);
        for i in 0..5 {
            buf.admit(item(&format!("i{i}"), i));
        }
        assert!(!buf.contains("i0"));
        assert!(!buf.contains("i1"));
        let tags: Vec<u32> = buf.iter().map(|i| i.tag).collect();
        assert_eq!(tags, vec![2, 3, 4]);
        check_invariants(&buf);
    }

    #[test]
    fn seen_set_matches_items_for_any_admit_sequence() {
        let mut buf = BoundedBuffer::new(5, InsertOrder::Head);
        let sequence = ["a", "b", "a", "c", "b", "d", "e", "f", "a", "g"];
        for (n, id) in sequence.iter().enumerate() {
            buf.admit(item(id, n as u32));
            check_invariants(&buf);
        }
        assert_eq!(buf.len(), 5);
    }

    #[test]
    fn bulk_replace_dedupes_last_payload_wins() {
        let mut buf = BoundedBuffer::new(10, InsertOrder::Head);
        buf.admit(item("old", 0));
        buf.bulk_replace(vec![item("x", 1), item("y", 2), item("x", 3)]);
        assert_eq!(buf.len(), 2);
        assert!(!buf.contains("old"));
        let tags: Vec<u32> = buf.iter().map(|i| i.tag).collect();
        assert_eq!(tags, vec![3, 2]);
        check_invariants(&buf);
    }

    #[test]
    fn bulk_replace_truncates_to_capacity() {
        let mut buf = BoundedBuffer::new(3, InsertOrder::Head);
        buf.bulk_replace((0..6).map(|i| item(&format!("i{i}"), i)).collect());
        assert_eq!(buf.len(), 3);
        // head order keeps the front of the snapshot
        assert!(buf.contains("i0") && buf.contains("i2"));
        assert!(!buf.contains("i5"));

        let mut tail = BoundedBuffer::new(3, InsertOrder::Tail);
        tail.bulk_replace((0..6).map(|i| item(&format!("i{i}"), i)).collect());
        assert!(!tail.contains("i0"));
        assert!(tail.contains("i5"));
        check_invariants(&buf);
        check_invariants(&tail);
    }

    #[test]
    fn remove_clears_seen_entry() {
        let mut buf = BoundedBuffer::new(4, InsertOrder::Head);
        buf.admit(item("a", 1));
        buf.admit(item("b", 2));
        let removed = buf.remove("a").unwrap();
        assert_eq!(removed.tag, 1);
        assert!(buf.remove("a").is_none());
        assert!(!buf.contains("a"));
        check_invariants(&buf);
    }
}
