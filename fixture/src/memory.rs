//! Swappable allocation capability with overrun and leak detection.
//!
//! Tests that exercise allocation go through [`TestContext::alloc`] and
//! friends, which forward to the context's [`Allocator`]. The default
//! [`GuardedAllocator`] lays each block out as
//!
//! ```text
//! [ header: requested size | padding ][ payload ... ][ "END\0" ]
//! ```
//!
//! and checks the trailing sentinel on every release and resize.
//!
//! [`TestContext::alloc`]: crate::context::TestContext::alloc

#![allow(unsafe_code)]

use std::alloc::{self, Layout};
use std::collections::{HashMap, HashSet};
use std::ptr::{self, NonNull};

use tracing::{debug, warn};

/// Bytes written immediately after every guarded payload.
pub const SENTINEL: &[u8; 4] = b"END\0";

/// Header size; also the payload alignment.
const HEADER: usize = 16;
const ALIGN: usize = 16;

/// Diagnostic raised by an allocator operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryFault {
    /// The sentinel after a block's payload was overwritten.
    Overrun,
    /// The pointer was not handed out by this allocator, or was already released.
    NotOwned,
    /// Blocks were still live when the test ended.
    Leak(usize),
}

/// Allocation interface the test context forwards to.
///
/// # Safety
///
/// A block returned by `allocate` (or by `resize`) must point to at least the
/// requested number of writable bytes and stay valid until it is released,
/// resized or reclaimed by `begin_test`/`end_test`. The provided
/// `zero_allocate` writes through the block on that guarantee.
pub unsafe trait Allocator {
    /// Allocate `size` bytes. `None` means a simulated failure.
    fn allocate(&mut self, size: usize) -> Option<NonNull<u8>>;

    /// Allocate `count * size` zeroed bytes.
    fn zero_allocate(&mut self, count: usize, size: usize) -> Option<NonNull<u8>> {
        let total = count.checked_mul(size)?;
        let block = self.allocate(total)?;
        // SAFETY: `allocate` returned a block of at least `total` bytes.
        unsafe { ptr::write_bytes(block.as_ptr(), 0, total) };
        Some(block)
    }

    /// Grow or shrink a block. `Ok(None)` means no block is returned.
    fn resize(
        &mut self,
        block: Option<NonNull<u8>>,
        size: usize,
    ) -> Result<Option<NonNull<u8>>, MemoryFault>;

    /// Return a block. A faulted release still frees the block when owned.
    fn release(&mut self, block: NonNull<u8>) -> Result<(), MemoryFault>;

    /// Number of blocks currently live.
    fn live_blocks(&self) -> usize;

    /// Reset per-test state before a test starts.
    fn begin_test(&mut self) {}

    /// Check per-test state after a test finishes.
    fn end_test(&mut self) -> Result<(), MemoryFault> {
        Ok(())
    }

    /// Make allocation fail after `countdown` more successful calls.
    fn fail_after(&mut self, _countdown: usize) {}
}

/// Allocator that guards every block with a trailing sentinel and tracks
/// live blocks per test.
#[derive(Debug, Default)]
pub struct GuardedAllocator {
    live: HashSet<usize>,
    countdown: Option<usize>,
}

impl GuardedAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    fn layout_for(size: usize) -> Option<Layout> {
        let total = size.checked_add(HEADER)?.checked_add(SENTINEL.len())?;
        Layout::from_size_align(total, ALIGN).ok()
    }

    /// Requested size stored in the header of an owned block.
    fn stored_size(&self, block: NonNull<u8>) -> usize {
        // SAFETY: callers only pass blocks found in `live`, whose header sits
        // HEADER bytes before the payload and starts with the size.
        unsafe { block.as_ptr().sub(HEADER).cast::<usize>().read() }
    }

    fn is_overrun(&self, block: NonNull<u8>) -> bool {
        let size = self.stored_size(block);
        // SAFETY: the sentinel occupies the four bytes after the payload.
        let tail = unsafe { std::slice::from_raw_parts(block.as_ptr().add(size), SENTINEL.len()) };
        tail != SENTINEL
    }

    /// Free an owned block without checking its sentinel.
    fn free_block(&mut self, block: NonNull<u8>) {
        let size = self.stored_size(block);
        self.live.remove(&(block.as_ptr() as usize));
        if let Some(layout) = Self::layout_for(size) {
            // SAFETY: the block was allocated with exactly this layout.
            unsafe { alloc::dealloc(block.as_ptr().sub(HEADER), layout) };
        }
    }

    fn owns(&self, block: NonNull<u8>) -> bool {
        self.live.contains(&(block.as_ptr() as usize))
    }

    /// Free every live block, returning how many there were.
    fn reclaim(&mut self) -> usize {
        let stale: Vec<usize> = self.live.iter().copied().collect();
        for address in &stale {
            if let Some(block) = NonNull::new(*address as *mut u8) {
                self.free_block(block);
            }
        }
        stale.len()
    }
}

// SAFETY: blocks are allocated with room for the payload plus header and
// sentinel, and are only freed by release, resize or reclaim.
unsafe impl Allocator for GuardedAllocator {
    fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        let layout = Self::layout_for(size)?;
        if let Some(remaining) = self.countdown {
            if remaining == 0 {
                debug!(size, "simulated allocation failure");
                self.countdown = None;
                return None;
            }
            self.countdown = Some(remaining - 1);
        }
        // SAFETY: layout has a non-zero size (header and sentinel).
        let base = unsafe { alloc::alloc(layout) };
        if base.is_null() {
            alloc::handle_alloc_error(layout);
        }
        // SAFETY: base points to HEADER + size + 4 writable bytes aligned to 16.
        let payload = unsafe {
            base.cast::<usize>().write(size);
            let payload = base.add(HEADER);
            ptr::copy_nonoverlapping(SENTINEL.as_ptr(), payload.add(size), SENTINEL.len());
            payload
        };
        self.live.insert(payload as usize);
        NonNull::new(payload)
    }

    fn resize(
        &mut self,
        block: Option<NonNull<u8>>,
        size: usize,
    ) -> Result<Option<NonNull<u8>>, MemoryFault> {
        let Some(block) = block else {
            return Ok(self.allocate(size));
        };
        if !self.owns(block) {
            return Err(MemoryFault::NotOwned);
        }
        if self.is_overrun(block) {
            self.free_block(block);
            return Err(MemoryFault::Overrun);
        }
        if size == 0 {
            self.free_block(block);
            return Ok(None);
        }
        let capacity = self.stored_size(block);
        if capacity >= size {
            return Ok(Some(block));
        }
        let Some(grown) = self.allocate(size) else {
            return Ok(None);
        };
        // SAFETY: both blocks are live and distinct; the old one holds
        // `capacity` bytes and the new one at least `size > capacity`.
        unsafe { ptr::copy_nonoverlapping(block.as_ptr(), grown.as_ptr(), capacity) };
        self.free_block(block);
        Ok(Some(grown))
    }

    fn release(&mut self, block: NonNull<u8>) -> Result<(), MemoryFault> {
        if !self.owns(block) {
            return Err(MemoryFault::NotOwned);
        }
        let overrun = self.is_overrun(block);
        self.free_block(block);
        if overrun {
            let address = block.as_ptr() as usize;
            warn!(address, "buffer overrun on release");
            return Err(MemoryFault::Overrun);
        }
        Ok(())
    }

    fn live_blocks(&self) -> usize {
        self.live.len()
    }

    fn begin_test(&mut self) {
        let stale = self.reclaim();
        if stale > 0 {
            debug!(stale, "reclaimed blocks left by previous test");
        }
        self.countdown = None;
    }

    fn end_test(&mut self) -> Result<(), MemoryFault> {
        self.countdown = None;
        match self.reclaim() {
            0 => Ok(()),
            leaked => {
                warn!(leaked, "test ended with live allocations");
                Err(MemoryFault::Leak(leaked))
            }
        }
    }

    fn fail_after(&mut self, countdown: usize) {
        self.countdown = Some(countdown);
    }
}

impl Drop for GuardedAllocator {
    fn drop(&mut self) {
        self.reclaim();
    }
}

/// Plain allocator with ownership tracking but no sentinel or leak check.
#[derive(Debug, Default)]
pub struct SystemAllocator {
    live: HashMap<usize, Layout>,
}

impl SystemAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    fn layout_for(size: usize) -> Option<Layout> {
        Layout::from_size_align(size.max(1), ALIGN).ok()
    }
}

// SAFETY: blocks come from `alloc::alloc`/`alloc::realloc` with at least the
// requested size and are only freed by release or resize.
unsafe impl Allocator for SystemAllocator {
    fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        let layout = Self::layout_for(size)?;
        // SAFETY: layout size is at least one byte.
        let block = unsafe { alloc::alloc(layout) };
        if block.is_null() {
            alloc::handle_alloc_error(layout);
        }
        self.live.insert(block as usize, layout);
        NonNull::new(block)
    }

    fn resize(
        &mut self,
        block: Option<NonNull<u8>>,
        size: usize,
    ) -> Result<Option<NonNull<u8>>, MemoryFault> {
        let Some(block) = block else {
            return Ok(self.allocate(size));
        };
        if size == 0 {
            self.release(block)?;
            return Ok(None);
        }
        let layout = self
            .live
            .remove(&(block.as_ptr() as usize))
            .ok_or(MemoryFault::NotOwned)?;
        let Some(new_layout) = Self::layout_for(size) else {
            self.live.insert(block.as_ptr() as usize, layout);
            return Ok(None);
        };
        // SAFETY: `block` was allocated with `layout`; the new size is non-zero
        // and was validated by `Layout::from_size_align`.
        let grown = unsafe { alloc::realloc(block.as_ptr(), layout, new_layout.size()) };
        if grown.is_null() {
            alloc::handle_alloc_error(new_layout);
        }
        self.live.insert(grown as usize, new_layout);
        Ok(NonNull::new(grown))
    }

    fn release(&mut self, block: NonNull<u8>) -> Result<(), MemoryFault> {
        let layout = self
            .live
            .remove(&(block.as_ptr() as usize))
            .ok_or(MemoryFault::NotOwned)?;
        // SAFETY: `block` was allocated with `layout` and is no longer tracked.
        unsafe { alloc::dealloc(block.as_ptr(), layout) };
        Ok(())
    }

    fn live_blocks(&self) -> usize {
        self.live.len()
    }
}

impl Drop for SystemAllocator {
    fn drop(&mut self) {
        for (address, layout) in self.live.drain() {
            // SAFETY: every tracked entry is a live block with its layout.
            unsafe { alloc::dealloc(address as *mut u8, layout) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(block: NonNull<u8>, offset: usize, byte: u8) {
        unsafe { block.as_ptr().add(offset).write(byte) };
    }

    fn read(block: NonNull<u8>, offset: usize) -> u8 {
        unsafe { block.as_ptr().add(offset).read() }
    }

    #[test]
    fn filling_payload_exactly_is_not_an_overrun() {
        let mut heap = GuardedAllocator::new();
        let block = heap.allocate(8).expect("block");
        for offset in 0..8 {
            write(block, offset, 0xAA);
        }
        assert_eq!(heap.release(block), Ok(()));
        assert_eq!(heap.live_blocks(), 0);
    }

    #[test]
    fn writing_one_past_payload_is_an_overrun() {
        let mut heap = GuardedAllocator::new();
        let block = heap.allocate(8).expect("block");
        write(block, 8, b'X');
        assert_eq!(heap.release(block), Err(MemoryFault::Overrun));
        assert_eq!(heap.live_blocks(), 0, "overrun block is still freed");
    }

    #[test]
    fn double_release_is_reported_not_freed() {
        let mut heap = GuardedAllocator::new();
        let block = heap.allocate(4).expect("block");
        assert_eq!(heap.release(block), Ok(()));
        assert_eq!(heap.release(block), Err(MemoryFault::NotOwned));
    }

    #[test]
    fn unreleased_block_is_a_leak() {
        let mut heap = GuardedAllocator::new();
        heap.begin_test();
        let _block = heap.allocate(16).expect("block");
        assert_eq!(heap.end_test(), Err(MemoryFault::Leak(1)));
        assert_eq!(heap.live_blocks(), 0);
        assert_eq!(heap.end_test(), Ok(()));
    }

    #[test]
    fn begin_test_reclaims_stale_blocks() {
        let mut heap = GuardedAllocator::new();
        heap.allocate(3).expect("block");
        heap.allocate(5).expect("block");
        heap.begin_test();
        assert_eq!(heap.live_blocks(), 0);
    }

    #[test]
    fn countdown_fails_once_then_disables() {
        let mut heap = GuardedAllocator::new();
        heap.fail_after(2);
        let first = heap.allocate(1).expect("first");
        let second = heap.allocate(1).expect("second");
        assert!(heap.allocate(1).is_none());
        let fourth = heap.allocate(1).expect("countdown disabled");
        for block in [first, second, fourth] {
            heap.release(block).expect("release");
        }
    }

    #[test]
    fn oversized_request_keeps_countdown() {
        let mut heap = GuardedAllocator::new();
        heap.fail_after(1);
        assert!(heap.allocate(usize::MAX).is_none());
        let block = heap.allocate(1).expect("countdown step still available");
        assert!(heap.allocate(1).is_none(), "simulated failure still pending");
        heap.release(block).expect("release");
    }

    /// Delegating allocator relying on the provided `zero_allocate`.
    struct Counting {
        inner: GuardedAllocator,
        calls: usize,
    }

    // SAFETY: every block comes from the inner guarded allocator.
    unsafe impl Allocator for Counting {
        fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
            self.calls += 1;
            self.inner.allocate(size)
        }

        fn resize(
            &mut self,
            block: Option<NonNull<u8>>,
            size: usize,
        ) -> Result<Option<NonNull<u8>>, MemoryFault> {
            self.inner.resize(block, size)
        }

        fn release(&mut self, block: NonNull<u8>) -> Result<(), MemoryFault> {
            self.inner.release(block)
        }

        fn live_blocks(&self) -> usize {
            self.inner.live_blocks()
        }
    }

    #[test]
    fn provided_zero_allocate_goes_through_allocate() {
        let mut heap = Counting {
            inner: GuardedAllocator::new(),
            calls: 0,
        };
        let block = heap.allocate(8).expect("block");
        for offset in 0..8 {
            write(block, offset, 0xEE);
        }
        heap.release(block).expect("release");
        let zeroed = heap.zero_allocate(2, 4).expect("block");
        assert_eq!(heap.calls, 2);
        assert!((0..8).all(|offset| read(zeroed, offset) == 0));
        heap.release(zeroed).expect("release");
    }

    #[test]
    fn begin_test_cancels_countdown() {
        let mut heap = GuardedAllocator::new();
        heap.fail_after(0);
        heap.begin_test();
        let block = heap.allocate(1).expect("countdown cancelled");
        heap.release(block).expect("release");
    }

    #[test]
    fn zero_allocate_clears_payload() {
        let mut heap = GuardedAllocator::new();
        let block = heap.zero_allocate(4, 4).expect("block");
        assert!((0..16).all(|offset| read(block, offset) == 0));
        heap.release(block).expect("release");
        assert!(heap.zero_allocate(usize::MAX, 2).is_none());
    }

    #[test]
    fn resize_from_none_allocates() {
        let mut heap = GuardedAllocator::new();
        let block = heap.resize(None, 8).expect("resize").expect("block");
        assert_eq!(heap.live_blocks(), 1);
        heap.release(block).expect("release");
    }

    #[test]
    fn resize_within_capacity_keeps_block() {
        let mut heap = GuardedAllocator::new();
        let block = heap.allocate(16).expect("block");
        let same = heap.resize(Some(block), 8).expect("resize");
        assert_eq!(same, Some(block));
        heap.release(block).expect("release");
    }

    #[test]
    fn resize_growth_copies_payload() {
        let mut heap = GuardedAllocator::new();
        let block = heap.allocate(2).expect("block");
        write(block, 0, 7);
        write(block, 1, 9);
        let grown = heap.resize(Some(block), 64).expect("resize").expect("block");
        assert_eq!((read(grown, 0), read(grown, 1)), (7, 9));
        assert_eq!(heap.live_blocks(), 1);
        heap.release(grown).expect("release");
    }

    #[test]
    fn resize_to_zero_releases() {
        let mut heap = GuardedAllocator::new();
        let block = heap.allocate(8).expect("block");
        assert_eq!(heap.resize(Some(block), 0), Ok(None));
        assert_eq!(heap.live_blocks(), 0);
    }

    #[test]
    fn resize_of_overrun_block_releases_and_reports() {
        let mut heap = GuardedAllocator::new();
        let block = heap.allocate(4).expect("block");
        write(block, 4, 0);
        assert_eq!(heap.resize(Some(block), 32), Err(MemoryFault::Overrun));
        assert_eq!(heap.live_blocks(), 0);
    }

    #[test]
    fn system_allocator_tracks_ownership() {
        let mut heap = SystemAllocator::new();
        let block = heap.allocate(0).expect("block");
        let grown = heap.resize(Some(block), 128).expect("resize").expect("block");
        assert_eq!(heap.live_blocks(), 1);
        assert_eq!(heap.release(grown), Ok(()));
        assert_eq!(heap.release(grown), Err(MemoryFault::NotOwned));
        heap.allocate(4).expect("block");
        assert_eq!(heap.end_test(), Ok(()), "no leak accounting");
    }
}
