// src/io/serial/framer.rs
//
// Event framer for the downstream serial protocol.
//
// Wire format, repeated:
//   0xAD 0xDE <len:1> <checksum:1, XOR of payload> <len bytes of payload>
//
// The framer keeps its state across `feed` calls so an event may be split over
// any number of serial reads. Payload bytes are written straight into the
// caller's accumulator and removed again if the checksum fails.

// =============================================================================
// Constants
// =============================================================================

pub const EVENT_MARK0: u8 = 0xAD;
pub const EVENT_MARK1: u8 = 0xDE;

/// Marker, length and checksum bytes in front of every payload.
pub const EVENT_HEADER_LEN: usize = 4;

// =============================================================================
// Types
// =============================================================================

/// Position of the framer within the current event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramerState {
    LookingMark0,
    LookingMark1,
    LookingEventLen,
    LookingChecksum,
    LookingEvent,
}

impl Default for FramerState {
    fn default() -> Self {
        FramerState::LookingMark0
    }
}

/// Counters produced by a single `feed` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedStats {
    /// Events that completed with a valid checksum
    pub frames: usize,
    /// Events discarded for a checksum mismatch
    pub checksum_errors: usize,
    /// Bytes discarded while looking for a marker. Each byte is counted once,
    /// by the call that discards it: a 0xAD not followed by 0xDE counts both
    /// bytes even when the 0xAD arrived in an earlier call. The header of an
    /// event that fails its checksum is not counted; its payload bytes are,
    /// if the rescan after the mismatch discards them.
    pub dropped: usize,
}

impl FeedStats {
    pub fn merge(&mut self, other: FeedStats) {
        self.frames += other.frames;
        self.checksum_errors += other.checksum_errors;
        self.dropped += other.dropped;
    }
}

/// Streaming parser for the 0xAD 0xDE event protocol.
#[derive(Debug, Default)]
pub struct EventFramer {
    state: FramerState,
    /// Payload length announced by the current header
    expected_len: u8,
    /// Checksum announced by the current header
    expected_checksum: u8,
    /// XOR of the payload bytes seen so far
    running_checksum: u8,
    /// Payload bytes seen so far
    consumed: usize,
}

impl EventFramer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> FramerState {
        self.state
    }

    /// Bytes of the unfinished event sitting at the tail of the accumulator.
    pub fn pending_len(&self) -> usize {
        if self.state == FramerState::LookingEvent {
            self.consumed
        } else {
            0
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Parse one chunk of serial input, appending validated payload bytes to `acc`.
    ///
    /// On a checksum mismatch the payload is truncated off `acc` and scanning
    /// restarts at the first byte of that payload, so a marker hidden inside a
    /// corrupt event is still found. Payload bytes that arrived in an earlier
    /// chunk can no longer be re-scanned; the restart is clamped to the start
    /// of this chunk.
    pub fn feed(&mut self, chunk: &[u8], acc: &mut Vec<u8>) -> FeedStats {
        let mut stats = FeedStats::default();
        let mut index = 0;

        while index < chunk.len() {
            let byte = chunk[index];
            index += 1;

            match self.state {
                FramerState::LookingMark0 => {
                    if byte == EVENT_MARK0 {
                        self.state = FramerState::LookingMark1;
                    } else {
                        stats.dropped += 1;
                    }
                }
                FramerState::LookingMark1 => {
                    if byte == EVENT_MARK1 {
                        self.state = FramerState::LookingEventLen;
                    } else {
                        // The 0xAD that got us here is noise too
                        stats.dropped += 2;
                        self.state = FramerState::LookingMark0;
                    }
                }
                FramerState::LookingEventLen => {
                    self.expected_len = byte;
                    self.state = FramerState::LookingChecksum;
                }
                FramerState::LookingChecksum => {
                    self.expected_checksum = byte;
                    self.running_checksum = 0;
                    self.consumed = 0;
                    if self.expected_len == 0 {
                        self.complete_event(&mut stats);
                    } else {
                        self.state = FramerState::LookingEvent;
                    }
                }
                FramerState::LookingEvent => {
                    acc.push(byte);
                    self.consumed += 1;
                    self.running_checksum ^= byte;

                    if self.consumed == self.expected_len as usize {
                        let len = self.consumed;
                        if !self.complete_event(&mut stats) {
                            acc.truncate(acc.len() - len);
                            // `index` is one past the last payload byte
                            index = (index - 1).saturating_sub(len - 1);
                        }
                    }
                }
            }
        }

        stats
    }

    /// Close out the current event. Returns whether its checksum matched.
    fn complete_event(&mut self, stats: &mut FeedStats) -> bool {
        let valid = self.running_checksum == self.expected_checksum;
        if valid {
            stats.frames += 1;
        } else {
            stats.checksum_errors += 1;
            twarn!(
                "[ser2tcp] Checksum mismatch on {} byte event (expected {:02X}, got {:02X}), discarded",
                self.expected_len,
                self.expected_checksum,
                self.running_checksum
            );
        }

        self.state = FramerState::LookingMark0;
        self.consumed = 0;
        self.running_checksum = 0;
        valid
    }
}

/// Wrap a payload in an event header, as the device does.
/// Returns `None` for payloads longer than 255 bytes.
pub fn encode_event(payload: &[u8]) -> Option<Vec<u8>> {
    let len = u8::try_from(payload.len()).ok()?;

    let mut out = Vec::with_capacity(EVENT_HEADER_LEN + payload.len());
    out.push(EVENT_MARK0);
    out.push(EVENT_MARK1);
    out.push(len);
    out.push(crate::checksums::xor_checksum(payload));
    out.extend_from_slice(payload);
    Some(out)
}

// =============================================================================
// Tests
// =============================================================================
