use crate::constants::*;
use crate::error::{MemsimError, Result};

/// Bit-per-frame set of free frames (bit set = frame is free)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreeFrameSet {
    words: Vec<u64>,
    len: usize,
}

impl FreeFrameSet {
    const BITS: usize = u64::BITS as usize;

    /// Create a set of `len` frames, all free
    pub fn new(len: usize) -> Self {
        let mut words = vec![u64::MAX; len.div_ceil(Self::BITS)];
        // clear the padding bits past `len` in the last word
        let tail = len % Self::BITS;
        if tail != 0 {
            if let Some(last) = words.last_mut() {
                *last = (1u64 << tail) - 1;
            }
        }
        FreeFrameSet { words, len }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_free(&self, frame: FrameNumber) -> bool {
        frame < self.len && self.words[frame / Self::BITS] & (1 << (frame % Self::BITS)) != 0
    }

    /// Mark a free frame as used
    pub fn reserve(&mut self, frame: FrameNumber) -> Result<()> {
        if !self.is_free(frame) {
            return Err(MemsimError::invariant(format!(
                "reserve of frame {} which is not free",
                frame
            )));
        }
        self.words[frame / Self::BITS] &= !(1 << (frame % Self::BITS));
        Ok(())
    }

    /// Mark a used frame as free
    pub fn free(&mut self, frame: FrameNumber) -> Result<()> {
        if frame >= self.len || self.is_free(frame) {
            return Err(MemsimError::invariant(format!(
                "free of frame {} which is already free",
                frame
            )));
        }
        self.words[frame / Self::BITS] |= 1 << (frame % Self::BITS);
        Ok(())
    }

    /// Lowest-numbered free frame, if any
    pub fn find_free(&self) -> Option<FrameNumber> {
        self.words
            .iter()
            .enumerate()
            .find(|(_, w)| **w != 0)
            .map(|(i, w)| i * Self::BITS + w.trailing_zeros() as usize)
    }

    pub fn free_count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }
}

/// Metadata for one physical frame
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameDescriptor {
    pub owner: Option<SimPid>,
    pub page: Option<PageNumber>,
    pub referenced: bool,
    pub dirty: bool,
}

impl FrameDescriptor {
    #[inline]
    pub fn is_free(&self) -> bool {
        self.owner.is_none()
    }
}

/// The global frame table, its free set, and the second-chance clock hand
///
/// Invariant: `free.is_free(f)` iff `frames[f].owner.is_none()`, except
/// between `try_reserve` and `assign` inside a single dispatcher step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameTable {
    frames: Vec<FrameDescriptor>,
    free: FreeFrameSet,
    hand: usize,
}

impl FrameTable {
    pub fn new(num_frames: usize) -> Self {
        FrameTable {
            frames: vec![FrameDescriptor::default(); num_frames],
            free: FreeFrameSet::new(num_frames),
            hand: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    #[inline]
    pub fn get(&self, frame: FrameNumber) -> Option<&FrameDescriptor> {
        self.frames.get(frame)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FrameDescriptor> {
        self.frames.iter()
    }

    pub fn free_set(&self) -> &FreeFrameSet {
        &self.free
    }

    /// Position of the clock hand for the next sweep
    pub fn hand(&self) -> usize {
        self.hand
    }

    pub fn free_count(&self) -> usize {
        self.free.free_count()
    }

    pub fn owned_count(&self) -> usize {
        self.frames.iter().filter(|f| !f.is_free()).count()
    }

    /// Take any free frame, or `None` when memory is full
    pub fn try_reserve(&mut self) -> Option<FrameNumber> {
        let frame = self.free.find_free()?;
        self.free.reserve(frame).ok()?;
        Some(frame)
    }

    /// Reserve a specific frame, e.g. a victim that was just released
    pub fn reserve(&mut self, frame: FrameNumber) -> Result<()> {
        self.free.reserve(frame)
    }

    /// Record `owner`'s `page` as resident in a reserved frame
    ///
    /// A freshly loaded page starts referenced and clean.
    pub fn assign(&mut self, frame: FrameNumber, owner: SimPid, page: PageNumber) -> Result<()> {
        if self.free.is_free(frame) {
            return Err(MemsimError::invariant(format!(
                "assign to frame {} without reserving it",
                frame
            )));
        }
        let desc = self.descriptor_mut(frame)?;
        if let Some(prev) = desc.owner {
            return Err(MemsimError::invariant(format!(
                "frame {} already owned by P{}",
                frame, prev
            )));
        }
        *desc = FrameDescriptor {
            owner: Some(owner),
            page: Some(page),
            referenced: true,
            dirty: false,
        };
        Ok(())
    }

    /// Free a frame, returning the (process, page) that owned it
    ///
    /// The caller must invalidate that page table entry.
    pub fn release(&mut self, frame: FrameNumber) -> Result<Option<(SimPid, PageNumber)>> {
        self.free.free(frame)?;
        let desc = std::mem::take(self.descriptor_mut(frame)?);
        Ok(desc.owner.zip(desc.page))
    }

    /// Set the reference bit, and the dirty bit for writes
    pub fn touch(&mut self, frame: FrameNumber, write: bool) -> Result<()> {
        let desc = self.descriptor_mut(frame)?;
        if desc.is_free() {
            return Err(MemsimError::invariant(format!("access to free frame {}", frame)));
        }
        desc.referenced = true;
        if write {
            desc.dirty = true;
        }
        Ok(())
    }

    /// Second-chance (clock) victim selection
    ///
    /// Frames under the hand with the reference bit set get it cleared and
    /// are skipped; the first owned frame with a clear bit is the victim and
    /// the hand is left on the frame after it. Free frames are never chosen.
    pub fn select_victim(&mut self) -> Result<FrameNumber> {
        if self.frames.is_empty() || self.free.free_count() == self.frames.len() {
            return Err(MemsimError::invariant("victim selection with no owned frames"));
        }

        let n = self.frames.len();
        loop {
            let desc = &mut self.frames[self.hand];
            if !desc.is_free() {
                if !desc.referenced {
                    let victim = self.hand;
                    self.hand = (self.hand + 1) % n;
                    return Ok(victim);
                }
                desc.referenced = false;
            }
            self.hand = (self.hand + 1) % n;
        }
    }

    fn descriptor_mut(&mut self, frame: FrameNumber) -> Result<&mut FrameDescriptor> {
        self.frames
            .get_mut(frame)
            .ok_or_else(|| MemsimError::invariant(format!("frame {} out of range", frame)))
    }
}

impl Default for FrameTable {
    fn default() -> Self {
        Self::new(NUM_FRAMES)
    }
}
