//! Timestamp-indexed jitter buffer (spec §4.2).
//!
//! One [`PacketManager`] handles a single direction of one RTP stream: the
//! inbound manager is addressed by RTP timestamp, the outbound manager by a
//! locally incremented byte offset (see [`PacketManager::write_sequential`]).

use std::collections::BTreeMap;

/// Silence byte for the 8-bit biased linear PCM domain this system moves
/// audio in (spec §4.2, §8).
pub const SILENCE: u8 = 0x80;

/// Backwards jumps larger than this reset the buffer outright instead of
/// replaying history (spec §4.2; flagged in §9 as potentially O(n^2) for
/// pathological reorder storms, kept as specified).
const REBUILD_RESET_THRESHOLD: u32 = 100_000;

/// A write-once-per-offset jitter buffer that always returns exactly the
/// requested number of bytes on read, padding short reads with silence.
#[derive(Debug, Default)]
pub struct PacketManager {
    /// Absolute offset each buffered byte's slot 0 corresponds to.
    stored_base: Option<u32>,
    /// Linear backing store relative to `stored_base`.
    buffer: Vec<u8>,
    /// Read cursor, relative to `stored_base`.
    cursor: usize,
    /// Every frame ever written, for buffer rebuilds.
    history: BTreeMap<u32, Vec<u8>>,
    /// Running total of bytes written via `write_sequential`.
    next_offset: u32,
}

impl PacketManager {
    pub fn new() -> PacketManager {
        PacketManager::default()
    }

    /// Write `data` at absolute offset `offset` (RTP timestamp for an
    /// inbound manager).
    pub fn write(&mut self, offset: u32, data: &[u8]) {
        if data.is_empty() {
            return;
        }

        let base = match self.stored_base {
            None => {
                self.stored_base = Some(offset);
                offset
            }
            Some(base) if offset < base => {
                let jump = base - offset;
                if jump > REBUILD_RESET_THRESHOLD {
                    self.history.clear();
                    self.buffer.clear();
                    self.cursor = 0;
                    self.stored_base = Some(offset);
                    offset
                } else {
                    self.rebuild_from(offset);
                    offset
                }
            }
            Some(base) => base,
        };

        self.history.insert(offset, data.to_vec());
        let rel = (offset - base) as usize;
        self.place(rel, data);
    }

    /// Write `data` at the next sequential offset, tracking the running
    /// total internally (outbound manager usage, spec §4.2).
    pub fn write_sequential(&mut self, data: &[u8]) -> u32 {
        let offset = self.next_offset;
        self.write(offset, data);
        self.next_offset = self.next_offset.wrapping_add(data.len() as u32);
        offset
    }

    /// Read exactly `length` bytes, padding short reads with
    /// [`SILENCE`].
    pub fn read(&mut self, length: usize) -> Vec<u8> {
        let end = self.cursor + length;
        if self.buffer.len() < end {
            self.buffer.resize(end, SILENCE);
        }
        let out = self.buffer[self.cursor..end].to_vec();
        self.cursor = end;
        out
    }

    /// Whether the most recent `read` returned only silence (used by
    /// callers implementing the 10ms poll-and-retry behavior of spec
    /// §4.3's blocking `read`).
    pub fn is_silence(data: &[u8]) -> bool {
        data.iter().all(|&b| b == SILENCE)
    }

    fn place(&mut self, rel: usize, data: &[u8]) {
        let end = rel + data.len();
        if self.buffer.len() < end {
            self.buffer.resize(end, SILENCE);
        }
        self.buffer[rel..end].copy_from_slice(data);
    }

    /// Replay all stored history (plus whatever is about to be written,
    /// which the caller inserts afterward) into a fresh buffer based at
    /// `new_base`, preserving the read cursor's position in absolute
    /// terms (spec §4.2: "restored").
    fn rebuild_from(&mut self, new_base: u32) {
        let old_base = self.stored_base.unwrap_or(new_base);
        let absolute_cursor = old_base as i64 + self.cursor as i64;

        self.buffer.clear();
        self.stored_base = Some(new_base);

        for (&offset, frame) in &self.history {
            let rel = offset.wrapping_sub(new_base) as usize;
            let end = rel + frame.len();
            if self.buffer.len() < end {
                self.buffer.resize(end, SILENCE);
            }
            self.buffer[rel..end].copy_from_slice(frame);
        }

        let new_cursor = absolute_cursor - new_base as i64;
        self.cursor = new_cursor.max(0) as usize;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_pads_short_buffer_with_silence() {
        let mut mgr = PacketManager::new();
        let out = mgr.read(10);
        assert_eq!(out, vec![SILENCE; 10]);
    }

    #[test]
    fn write_then_read_returns_written_bytes() {
        let mut mgr = PacketManager::new();
        mgr.write(0, &[1, 2, 3, 4]);
        assert_eq!(mgr.read(4), vec![1, 2, 3, 4]);
    }

    #[test]
    fn sequential_write_tracks_running_offset() {
        let mut mgr = PacketManager::new();
        let o1 = mgr.write_sequential(&[0u8; 160]);
        let o2 = mgr.write_sequential(&[0u8; 160]);
        assert_eq!(o1, 0);
        assert_eq!(o2, 160);
    }

    #[test]
    fn small_backwards_jump_rebuilds_instead_of_resetting() {
        let mut mgr = PacketManager::new();
        mgr.write(1000, &[9; 4]);
        mgr.write(1000 - 500, &[7; 4]);
        // both frames should still be reachable after rebuild
        assert_eq!(mgr.history.len(), 2);
    }

    #[test]
    fn large_backwards_jump_resets_history() {
        let mut mgr = PacketManager::new();
        mgr.write(500_000, &[9; 4]);
        mgr.write(0, &[7; 4]);
        assert_eq!(mgr.history.len(), 1);
        assert_eq!(mgr.history.get(&0), Some(&vec![7u8; 4]));
    }

    #[test]
    fn read_always_returns_exact_length() {
        let mut mgr = PacketManager::new();
        mgr.write(0, &[1, 2, 3]);
        for n in [0usize, 1, 3, 5, 100] {
            assert_eq!(mgr.read(n).len(), n);
        }
    }
}
