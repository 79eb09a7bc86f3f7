//! Fixed-capacity caller→callee table.
//!
//! Callers are hashed into from-buckets; each bucket heads a singly linked
//! chain of records keyed by callee address. Records come from an arena whose
//! capacity is fixed at construction. Nothing here allocates after `try_new`.

use std::num::NonZeroU32;

/// Largest call count an arc can hold. The artifact stores counts as a signed
/// `long`, so this is the largest value every supported width represents.
pub const ARC_COUNT_MAX: u32 = i32::MAX as u32;

/// Index of a live arc record. Slot 0 of the arena is reserved so that a zero
/// head or link can mean "none".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArcIndex(NonZeroU32);

impl ArcIndex {
    fn slot(self) -> usize {
        self.0.get() as usize
    }

    fn raw(self) -> u32 {
        self.0.get()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ArcRecord {
    selfpc: u64,
    count: u32,
    /// Next record in the chain, 0 at the tail.
    link: u32,
}

/// Bump allocator over a preallocated record array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArcArena {
    records: Vec<ArcRecord>,
    /// Number of records handed out so far.
    high_water: u32,
    capacity: u32,
}

impl ArcArena {
    pub fn try_new(capacity: u32) -> Option<Self> {
        let slots = capacity as usize + 1;
        let mut records = Vec::new();
        records.try_reserve_exact(slots).ok()?;
        records.resize(slots, ArcRecord::default());
        Some(Self {
            records,
            high_water: 0,
            capacity,
        })
    }

    /// Hand out the next free record, or `None` once `capacity` records are live.
    pub fn allocate(&mut self) -> Option<ArcIndex> {
        if self.high_water >= self.capacity {
            return None;
        }
        self.high_water += 1;
        NonZeroU32::new(self.high_water).map(ArcIndex)
    }

    pub fn len(&self) -> usize {
        self.high_water as usize
    }

    pub fn is_empty(&self) -> bool {
        self.high_water == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }
}

/// Result of recording one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// An existing arc was incremented.
    Counted,
    /// A new arc was created.
    Inserted,
    /// The caller slot does not exist in this table.
    OutOfRange,
    /// The arena is full; nothing was changed.
    Overflow,
}

/// One arc as seen by the serializer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArcEntry {
    pub from_index: usize,
    pub selfpc: u64,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArcTable {
    /// Chain head per from-bucket, 0 when empty.
    froms: Box<[u32]>,
    arena: ArcArena,
}

impl ArcTable {
    pub fn try_new(from_buckets: usize, capacity: u32) -> Option<Self> {
        let mut froms = Vec::new();
        froms.try_reserve_exact(from_buckets).ok()?;
        froms.resize(from_buckets, 0u32);
        Some(Self {
            froms: froms.into_boxed_slice(),
            arena: ArcArena::try_new(capacity)?,
        })
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.arena.capacity()
    }

    pub fn from_buckets(&self) -> usize {
        self.froms.len()
    }

    /// Count one call from the caller hashed to `from` into `selfpc`.
    ///
    /// A match at the chain head is the common case. A match further down is
    /// moved to the head so a repeated call finds it immediately.
    pub fn record(&mut self, from: usize, selfpc: u64) -> RecordOutcome {
        let Some(&head) = self.froms.get(from) else {
            return RecordOutcome::OutOfRange;
        };
        if head == 0 {
            return self.insert_at_head(from, selfpc);
        }

        let mut top = head as usize;
        if self.arena.records[top].selfpc == selfpc {
            bump(&mut self.arena.records[top]);
            return RecordOutcome::Counted;
        }

        loop {
            let next = self.arena.records[top].link;
            if next == 0 {
                return self.insert_at_head(from, selfpc);
            }
            let prev = top;
            top = next as usize;
            if self.arena.records[top].selfpc == selfpc {
                bump(&mut self.arena.records[top]);
                self.arena.records[prev].link = self.arena.records[top].link;
                self.arena.records[top].link = self.froms[from];
                self.froms[from] = next;
                return RecordOutcome::Counted;
            }
        }
    }

    fn insert_at_head(&mut self, from: usize, selfpc: u64) -> RecordOutcome {
        let Some(index) = self.arena.allocate() else {
            return RecordOutcome::Overflow;
        };
        self.arena.records[index.slot()] = ArcRecord {
            selfpc,
            count: 1,
            link: self.froms[from],
        };
        self.froms[from] = index.raw();
        RecordOutcome::Inserted
    }

    /// Arcs in from-bucket order, then chain order (head first).
    pub fn iter(&self) -> Arcs<'_> {
        Arcs {
            table: self,
            next_from: 0,
            from_index: 0,
            cursor: 0,
        }
    }

    /// Current count for an arc, if it exists. Does not reorder the chain.
    pub fn count(&self, from: usize, selfpc: u64) -> Option<u32> {
        let mut cursor = *self.froms.get(from)?;
        while cursor != 0 {
            let record = &self.arena.records[cursor as usize];
            if record.selfpc == selfpc {
                return Some(record.count);
            }
            cursor = record.link;
        }
        None
    }
}

#[inline]
fn bump(record: &mut ArcRecord) {
    if record.count < ARC_COUNT_MAX {
        record.count += 1;
    }
}

pub struct Arcs<'a> {
    table: &'a ArcTable,
    next_from: usize,
    from_index: usize,
    cursor: u32,
}

impl Iterator for Arcs<'_> {
    type Item = ArcEntry;

    fn next(&mut self) -> Option<ArcEntry> {
        while self.cursor == 0 {
            let head = *self.table.froms.get(self.next_from)?;
            self.from_index = self.next_from;
            self.next_from += 1;
            self.cursor = head;
        }
        let record = &self.table.arena.records[self.cursor as usize];
        self.cursor = record.link;
        Some(ArcEntry {
            from_index: self.from_index,
            selfpc: record.selfpc,
            count: record.count,
        })
    }
}
