use std::fmt;

/// What happened to a region of JIT-emitted code.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum JitCodeEventKind {
    CodeAdded,
    CodeMoved,
    CodeRemoved,
}

/// A notification from the managed runtime about JIT-emitted code.
#[derive(Debug, Copy, Clone)]
pub struct JitCodeEvent<'a> {
    pub kind: JitCodeEventKind,
    /// The name the runtime gave the code object. Not necessarily UTF-8.
    pub name: &'a [u8],
    pub start: usize,
    pub len: usize,
}

/// One region of JIT-emitted code.
#[derive(Clone, PartialEq, Eq)]
pub struct CodeRange {
    start: usize,
    end: usize,
    name: String,
    seq: u64,
}

impl CodeRange {
    /// First address of the code.
    #[inline]
    pub fn start(&self) -> usize {
        self.start
    }

    /// Last address covered by the range.
    ///
    /// This is `start + len`: the address just past the final instruction
    /// counts as inside, since a call as the last instruction leaves
    /// exactly that return address on the stack.
    #[inline]
    pub fn end(&self) -> usize {
        self.end
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `[start, end]`, both ends inclusive.
    #[inline]
    pub fn contains(&self, address: usize) -> bool {
        self.start <= address && address <= self.end
    }

    #[inline]
    fn overlaps(&self, start: usize, end: usize) -> bool {
        self.start <= end && start <= self.end
    }
}

impl fmt::Debug for CodeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}..={:#x} {}", self.start, self.end, self.name)
    }
}

/// Address ranges of JIT-emitted code and their names.
///
/// Ranges are kept sorted by start address. As long as no two ranges
/// overlap, which is what the runtime hands us, `find` is a binary search.
/// Once an overlapping range is added the registry falls back to scanning
/// every candidate, and the most recently added range wins.
#[derive(Debug, Default)]
pub struct CodeRegistry {
    ranges: Vec<CodeRange>,
    next_seq: u64,
    overlapping: bool,
}

impl CodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Records the code announced by `event`. Only [JitCodeEventKind::CodeAdded]
    /// is of interest.
    pub fn on_code_event(&mut self, event: &JitCodeEvent<'_>) {
        if event.kind == JitCodeEventKind::CodeAdded {
            self.add(event.name, event.start, event.start.saturating_add(event.len));
        }
    }

    /// Records `[start, end]` under `name`.
    ///
    /// Returns `false` if memory for the range could not be reserved, in
    /// which case the range is dropped and lookups inside it miss.
    pub fn add(&mut self, name: &[u8], start: usize, end: usize) -> bool {
        let mut owned = String::new();
        if owned.try_reserve_exact(name.len()).is_err() || self.ranges.try_reserve(1).is_err() {
            return false;
        }
        owned.push_str(&String::from_utf8_lossy(name));

        let index = self.ranges.partition_point(|r| r.start <= start);
        if !self.overlapping {
            let prev = index.checked_sub(1).map(|i| &self.ranges[i]);
            let next = self.ranges.get(index);
            self.overlapping = prev.into_iter().chain(next).any(|r| r.overlaps(start, end));
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.ranges.insert(
            index,
            CodeRange {
                start,
                end,
                name: owned,
                seq,
            },
        );
        true
    }

    /// Returns the range containing `address`, if any.
    pub fn find(&self, address: usize) -> Option<&CodeRange> {
        let candidates = &self.ranges[..self.ranges.partition_point(|r| r.start <= address)];
        if !self.overlapping {
            return candidates.last().filter(|r| r.contains(address));
        }
        candidates.iter().filter(|r| r.contains(address)).max_by_key(|r| r.seq)
    }

    /// Drops every range.
    pub fn clear(&mut self) {
        self.ranges = Vec::new();
        self.next_seq = 0;
        self.overlapping = false;
    }

    pub fn iter(&self) -> impl Iterator<Item = &CodeRange> {
        self.ranges.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(ranges: &[(usize, usize, &str)]) -> CodeRegistry {
        let mut r = CodeRegistry::new();
        for &(start, end, name) in ranges {
            assert!(r.add(name.as_bytes(), start, end));
        }
        r
    }

    #[test]
    fn test_find() {
        let r = registry(&[(100, 200, "f"), (300, 400, "g")]);
        assert_eq!(r.find(150).map(CodeRange::name), Some("f"));
        assert_eq!(r.find(250), None);
        assert_eq!(r.find(399).map(CodeRange::name), Some("g"));
        assert_eq!(r.find(99), None);
        assert_eq!(r.find(401), None);
    }

    #[test]
    fn test_find_bounds_inclusive() {
        let r = registry(&[(100, 200, "f")]);
        assert_eq!(r.find(100).map(CodeRange::name), Some("f"));
        assert_eq!(r.find(200).map(CodeRange::name), Some("f"));
    }

    #[test]
    fn test_find_unsorted_insertion() {
        let r = registry(&[(500, 600, "c"), (100, 200, "a"), (300, 400, "b")]);
        assert_eq!(r.find(550).map(CodeRange::name), Some("c"));
        assert_eq!(r.find(150).map(CodeRange::name), Some("a"));
        assert_eq!(r.find(350).map(CodeRange::name), Some("b"));
        let starts: Vec<usize> = r.iter().map(CodeRange::start).collect();
        assert_eq!(starts, vec![100, 300, 500]);
    }

    #[test]
    fn test_find_overlap_most_recent_wins() {
        let r = registry(&[(100, 1000, "outer"), (200, 300, "inner")]);
        assert_eq!(r.find(250).map(CodeRange::name), Some("inner"));
        assert_eq!(r.find(500).map(CodeRange::name), Some("outer"));

        let r = registry(&[(200, 300, "inner"), (100, 1000, "outer")]);
        assert_eq!(r.find(250).map(CodeRange::name), Some("outer"));
    }

    #[test]
    fn test_code_events() {
        let mut r = CodeRegistry::new();
        r.on_code_event(&JitCodeEvent {
            kind: JitCodeEventKind::CodeAdded,
            name: b"LazyCompile:~foo a.js:1",
            start: 0x1000,
            len: 0x80,
        });
        r.on_code_event(&JitCodeEvent {
            kind: JitCodeEventKind::CodeRemoved,
            name: b"",
            start: 0x2000,
            len: 0x80,
        });
        assert_eq!(r.len(), 1);
        let code = r.find(0x1080).unwrap();
        assert_eq!(code.name(), "LazyCompile:~foo a.js:1");
        assert_eq!((code.start(), code.end()), (0x1000, 0x1080));
        assert_eq!(r.find(0x2000), None);
    }

    #[test]
    fn test_non_utf8_name() {
        let r = {
            let mut r = CodeRegistry::new();
            r.add(b"f\xffo", 0, 10);
            r
        };
        assert_eq!(r.find(5).map(CodeRange::name), Some("f\u{fffd}o"));
    }

    #[test]
    fn test_clear() {
        let mut r = registry(&[(100, 200, "f")]);
        r.clear();
        assert!(r.is_empty());
        assert_eq!(r.find(150), None);
        assert!(r.add(b"g", 100, 200));
        assert_eq!(r.find(150).map(CodeRange::name), Some("g"));
    }
}
