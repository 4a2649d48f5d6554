//! Decides which frame to fetch next.
//!
//! In history mode every round visits each airport once (in code order) and
//! takes that airport's oldest pending frame across all of its cameras, so a
//! large backlog at one airport never delays another by more than one frame.
//! Current snapshots sort after every history frame of their airport.
//!
//! "Pending" is always recomputed from the archive tree, so an abandoned
//! selection can simply be rebuilt on the next run.

use std::collections::VecDeque;

use crate::storage::{ArchiveStore, CameraTarget, FrameRef};

/// One frame to fetch, and where it belongs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchInstruction {
    pub airport_code: String,
    pub camera: CameraTarget,
    pub frame: FrameRef,
}

/// Every frame a single airport could contribute to this run.
#[derive(Debug, Clone, Default)]
pub struct AirportCandidates {
    pub airport_code: String,
    pub frames: Vec<(CameraTarget, FrameRef)>,
}

impl AirportCandidates {
    pub fn new(airport_code: &str) -> Self {
        Self {
            airport_code: airport_code.to_uppercase(),
            frames: Vec::new(),
        }
    }

    pub fn push(&mut self, camera: CameraTarget, frame: FrameRef) {
        self.frames.push((camera, frame));
    }

    /// Drops frames whose canonical path already exists.
    pub fn retain_pending(&mut self, store: &ArchiveStore) {
        self.frames
            .retain(|(camera, frame)| !store.contains(camera, frame));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMode {
    /// Oldest pending frame per airport per round.
    RoundRobin,
    /// Current snapshots only: each airport's cameras once, airport by airport.
    CurrentOnly,
}

#[derive(Debug, Clone)]
pub struct FrameSelector {
    queues: Vec<VecDeque<FetchInstruction>>,
    mode: SelectionMode,
}

impl FrameSelector {
    pub fn new(mut airports: Vec<AirportCandidates>, mode: SelectionMode) -> Self {
        airports.sort_by(|a, b| a.airport_code.cmp(&b.airport_code));

        let queues = airports
            .into_iter()
            .map(|airport| {
                let mut frames = airport.frames;
                frames.sort_by(|(cam_a, frame_a), (cam_b, frame_b)| {
                    frame_order_key(frame_a)
                        .cmp(&frame_order_key(frame_b))
                        .then_with(|| cam_a.identity().cmp(&cam_b.identity()))
                });
                frames
                    .into_iter()
                    .map(|(camera, frame)| FetchInstruction {
                        airport_code: airport.airport_code.clone(),
                        camera,
                        frame,
                    })
                    .collect::<VecDeque<_>>()
            })
            .filter(|queue| !queue.is_empty())
            .collect();

        Self { queues, mode }
    }

    pub fn round_robin(airports: Vec<AirportCandidates>) -> Self {
        Self::new(airports, SelectionMode::RoundRobin)
    }

    pub fn current_only(airports: Vec<AirportCandidates>) -> Self {
        Self::new(airports, SelectionMode::CurrentOnly)
    }

    pub fn pending_count(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }

    pub fn airport_count(&self) -> usize {
        self.queues.len()
    }

    pub fn into_selection(self) -> Selection {
        let cursor = self.queues.len();
        Selection {
            queues: self.queues,
            mode: self.mode,
            cursor,
            round: 0,
        }
    }
}

impl IntoIterator for FrameSelector {
    type Item = FetchInstruction;
    type IntoIter = Selection;

    fn into_iter(self) -> Selection {
        self.into_selection()
    }
}

/// History frames oldest first, then current snapshots.
fn frame_order_key(frame: &FrameRef) -> (bool, i64) {
    match frame.history_timestamp() {
        Some(ts) => (false, ts),
        None => (true, frame.captured_at().timestamp()),
    }
}

/// Lazy fetch order. Dropping it mid-way abandons the remaining work.
#[derive(Debug)]
pub struct Selection {
    queues: Vec<VecDeque<FetchInstruction>>,
    mode: SelectionMode,
    cursor: usize,
    round: usize,
}

impl Selection {
    /// Rounds started so far (1-based once anything has been yielded).
    pub fn round(&self) -> usize {
        self.round
    }

    pub fn remaining(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }

    fn next_round_robin(&mut self) -> Option<FetchInstruction> {
        if self.queues.iter().all(VecDeque::is_empty) {
            return None;
        }
        loop {
            if self.cursor >= self.queues.len() {
                self.cursor = 0;
                self.round += 1;
            }
            let index = self.cursor;
            self.cursor += 1;
            if let Some(instruction) = self.queues[index].pop_front() {
                return Some(instruction);
            }
        }
    }

    fn next_sequential(&mut self) -> Option<FetchInstruction> {
        self.round = self.round.max(1);
        self.queues
            .iter_mut()
            .find(|queue| !queue.is_empty())
            .and_then(VecDeque::pop_front)
    }
}

impl Iterator for Selection {
    type Item = FetchInstruction;

    fn next(&mut self) -> Option<FetchInstruction> {
        match self.mode {
            SelectionMode::RoundRobin => self.next_round_robin(),
            SelectionMode::CurrentOnly => self.next_sequential(),
        }
    }
}
