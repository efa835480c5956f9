// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The inbound command vocabulary (spec.md §6).
//!
//! Unknown verbs or malformed arguments never reach this type — the HTTP
//! boundary (out of scope here) is responsible for rejecting them before
//! handing the core a [`Command`].

use serde::{Deserialize, Serialize};

/// Maximum code-point length for broadcast/say payloads.
pub const MESSAGE_MAX_CODE_POINTS: usize = 256;

/// A single inbound command for one process.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Move one tile in keypad direction `1..9`; `5` is a no-op.
    Move {
        /// Keypad digit, `1..=9`.
        digit: u8,
    },
    /// Sprint up to three tiles in keypad direction `1..9`, subject to
    /// cooldown (spec.md §4.3).
    Buffer {
        /// Keypad digit, `1..=9`.
        digit: u8,
    },
    /// Explicit no-op.
    Idle,
    /// Broadcast to every process's event queue and spectators, immediately.
    Broadcast {
        /// Truncated to [`MESSAGE_MAX_CODE_POINTS`] code points upstream.
        text: String,
    },
    /// Local, immediate chat — delivered only within the sender's current
    /// adjacency cluster.
    Say {
        /// Truncated to [`MESSAGE_MAX_CODE_POINTS`] code points upstream.
        text: String,
    },
}

impl Command {
    /// True for the commands that go straight to the broadcast/say ledgers
    /// rather than the per-process buffered-command register (spec.md
    /// §4.7: "For BROADCAST or SAY, append to the ledger immediately; do
    /// not touch the buffered slot").
    #[must_use]
    pub fn is_immediate(&self) -> bool {
        matches!(self, Self::Broadcast { .. } | Self::Say { .. })
    }
}

/// The single-slot, last-write-wins buffered command register for one
/// process. The intake path (external to this crate) writes into it under
/// `submit`; the orchestrator reads and clears it once per tick.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BufferedCommand {
    slot: Option<MovementVerb>,
}

/// The subset of [`Command`] that can occupy the buffered-command register:
/// everything except the immediate broadcast/say verbs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MovementVerb {
    /// `MOVE d`.
    Move(u8),
    /// `BUFFER d`.
    Buffer(u8),
    /// `IDLE`, or any invalid input resolved silently to idle (spec.md §7).
    Idle,
}

impl BufferedCommand {
    /// Writes a new value into the register, overwriting whatever was
    /// there (last-write-wins).
    pub fn write(&mut self, verb: MovementVerb) {
        self.slot = Some(verb);
    }

    /// Reads and clears the register, defaulting to [`MovementVerb::Idle`]
    /// when nothing was buffered this tick.
    pub fn take(&mut self) -> MovementVerb {
        self.slot.take().unwrap_or(MovementVerb::Idle)
    }

    /// Reads the register without clearing it, for replay snapshots taken
    /// between ticks (spec.md §4.9: "buffered verb+arg"). `None` if nothing
    /// has been submitted since the last tick consumed it.
    #[must_use]
    pub fn peek(&self) -> Option<MovementVerb> {
        self.slot
    }
}

impl From<Command> for Option<MovementVerb> {
    fn from(cmd: Command) -> Self {
        match cmd {
            Command::Move { digit } => Some(MovementVerb::Move(digit)),
            Command::Buffer { digit } => Some(MovementVerb::Buffer(digit)),
            Command::Idle => Some(MovementVerb::Idle),
            Command::Broadcast { .. } | Command::Say { .. } => None,
        }
    }
}
