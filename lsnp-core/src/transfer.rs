//! Chunked file transfer over unreliable datagrams: offer, accept, then a
//! windowed push of chunks with per-chunk acknowledgement and retransmission.

use std::collections::HashMap;

use crate::protocol::UserId;

pub const DEFAULT_CHUNK_SIZE: u32 = 1024;
/// Unacked chunks a sender keeps in flight at once.
pub const SEND_WINDOW: usize = 8;
/// Per-chunk retransmit timeout, in ticks.
pub const CHUNK_TIMEOUT_TICKS: u64 = 1;
pub const MAX_CHUNK_RETRIES: u32 = 5;
/// A transfer with no progress for this long is cancelled on both sides.
pub const INACTIVITY_TICKS: u64 = 60;

/// Random 64-bit transfer identifier, hex encoded.
pub fn new_file_id() -> String {
    format!("{:016x}", rand::random::<u64>())
}

/// Chunks needed to carry `file_size` bytes.
pub fn total_chunks(file_size: u64, chunk_size: u32) -> u32 {
    if chunk_size == 0 {
        return 0;
    }
    file_size.div_ceil(chunk_size as u64) as u32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Offered,
    Transferring,
}

#[derive(Debug, Clone, Copy)]
struct ChunkAttempt {
    sent_tick: u64,
    retries: u32,
}

#[derive(Debug)]
pub struct OutgoingTransfer {
    pub file_id: String,
    pub to: UserId,
    pub filename: String,
    data: Vec<u8>,
    pub chunk_size: u32,
    pub total_chunks: u32,
    pub status: TransferStatus,
    next_seq: u32,
    acked: Vec<bool>,
    acked_count: u32,
    in_flight: HashMap<u32, ChunkAttempt>,
    last_activity: u64,
}

impl OutgoingTransfer {
    pub fn file_size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn chunk_payload(&self, seq: u32) -> Option<&[u8]> {
        if seq >= self.total_chunks {
            return None;
        }
        let start = seq as usize * self.chunk_size as usize;
        let end = (start + self.chunk_size as usize).min(self.data.len());
        Some(&self.data[start..end])
    }

    /// Move unsent chunks into the window. Returns the seqs to transmit now.
    fn fill_window(&mut self, tick: u64) -> Vec<u32> {
        let mut out = Vec::new();
        while self.in_flight.len() < SEND_WINDOW && self.next_seq < self.total_chunks {
            let seq = self.next_seq;
            self.next_seq += 1;
            self.in_flight.insert(
                seq,
                ChunkAttempt {
                    sent_tick: tick,
                    retries: 0,
                },
            );
            out.push(seq);
        }
        out
    }
}

#[derive(Debug)]
pub struct IncomingTransfer {
    pub file_id: String,
    pub from: UserId,
    pub filename: String,
    pub file_size: u64,
    pub chunk_size: u32,
    pub total_chunks: u32,
    pub status: TransferStatus,
    chunks: Vec<Option<Vec<u8>>>,
    received: u32,
    last_activity: u64,
}

impl IncomingTransfer {
    fn assemble(&mut self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.file_size as usize);
        for chunk in &mut self.chunks {
            if let Some(bytes) = chunk.take() {
                out.extend_from_slice(&bytes);
            }
        }
        out
    }
}

/// Sender-side reaction to an inbound FILE_ACCEPT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptOutcome {
    /// Begin streaming: transmit these seqs.
    Start(Vec<u32>),
    /// Zero-chunk file; nothing to stream, complete immediately.
    Empty { filename: String },
    /// No matching offer from us to that peer.
    Ignored,
}

/// Sender-side reaction to an inbound ACK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    /// Window advanced; transmit these newly unblocked seqs.
    SendMore(Vec<u32>),
    /// Final chunk acknowledged; transfer done and forgotten.
    Finished { filename: String, to: UserId },
    Ignored,
}

/// Receiver-side reaction to an inbound FILE_CHUNK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Stored (or duplicate); acknowledge it.
    Ack,
    /// Last missing chunk arrived: acknowledge, then hand the bytes up.
    AckAndComplete { filename: String, data: Vec<u8> },
    /// Out-of-range seq or unknown transfer; drop silently.
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    RetriesExhausted,
    Inactive,
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelReason::RetriesExhausted => f.write_str("retries exhausted"),
            CancelReason::Inactive => f.write_str("inactivity timeout"),
        }
    }
}

/// Timer-driven work produced by [`TransferManager::tick`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickAction {
    ResendChunk {
        file_id: String,
        to: UserId,
        seq: u32,
    },
    CancelOutgoing {
        file_id: String,
        to: UserId,
        filename: String,
        reason: CancelReason,
    },
    CancelIncoming {
        file_id: String,
        from: UserId,
        filename: String,
        reason: CancelReason,
    },
}

/// All active transfers, both directions, keyed by file id.
#[derive(Debug, Default)]
pub struct TransferManager {
    outgoing: HashMap<String, OutgoingTransfer>,
    incoming: HashMap<String, IncomingTransfer>,
}

impl TransferManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an outbound offer. The file is held in memory for the whole
    /// transfer; offers are small-file sized by design.
    pub fn start_outgoing(
        &mut self,
        file_id: &str,
        to: &str,
        filename: &str,
        data: Vec<u8>,
        chunk_size: u32,
        tick: u64,
    ) -> &OutgoingTransfer {
        let total = total_chunks(data.len() as u64, chunk_size);
        self.outgoing.insert(
            file_id.to_owned(),
            OutgoingTransfer {
                file_id: file_id.to_owned(),
                to: to.to_owned(),
                filename: filename.to_owned(),
                data,
                chunk_size,
                total_chunks: total,
                status: TransferStatus::Offered,
                next_seq: 0,
                acked: vec![false; total as usize],
                acked_count: 0,
                in_flight: HashMap::new(),
                last_activity: tick,
            },
        );
        &self.outgoing[file_id]
    }

    pub fn on_accept(&mut self, file_id: &str, from: &str, tick: u64) -> AcceptOutcome {
        let Some(transfer) = self.outgoing.get_mut(file_id) else {
            return AcceptOutcome::Ignored;
        };
        if transfer.to != from {
            return AcceptOutcome::Ignored;
        }
        transfer.last_activity = tick;
        if transfer.total_chunks == 0 {
            let filename = transfer.filename.clone();
            self.outgoing.remove(file_id);
            return AcceptOutcome::Empty { filename };
        }
        if transfer.status == TransferStatus::Transferring {
            // Duplicate accept; the window is already running.
            return AcceptOutcome::Ignored;
        }
        transfer.status = TransferStatus::Transferring;
        AcceptOutcome::Start(transfer.fill_window(tick))
    }

    /// Payload and destination for one of our own chunks, for frame building.
    pub fn chunk(&self, file_id: &str, seq: u32) -> Option<(&str, &[u8])> {
        let transfer = self.outgoing.get(file_id)?;
        let payload = transfer.chunk_payload(seq)?;
        Some((transfer.to.as_str(), payload))
    }

    pub fn on_ack(&mut self, file_id: &str, from: &str, seq: u32, tick: u64) -> AckOutcome {
        let Some(transfer) = self.outgoing.get_mut(file_id) else {
            return AckOutcome::Ignored;
        };
        if transfer.to != from || seq >= transfer.total_chunks {
            return AckOutcome::Ignored;
        }
        transfer.last_activity = tick;
        transfer.in_flight.remove(&seq);
        if !transfer.acked[seq as usize] {
            transfer.acked[seq as usize] = true;
            transfer.acked_count += 1;
        }
        if transfer.acked_count == transfer.total_chunks {
            let done = self.outgoing.remove(file_id).expect("transfer present");
            return AckOutcome::Finished {
                filename: done.filename,
                to: done.to,
            };
        }
        let more = transfer.fill_window(tick);
        if more.is_empty() {
            AckOutcome::Ignored
        } else {
            AckOutcome::SendMore(more)
        }
    }

    /// Inbound FILE_OFFER. Returns false for a duplicate or inconsistent
    /// offer, which is then dropped.
    #[allow(clippy::too_many_arguments)]
    pub fn on_offer(
        &mut self,
        from: &str,
        file_id: &str,
        filename: &str,
        file_size: u64,
        chunk_size: u32,
        total: u32,
        tick: u64,
    ) -> bool {
        if self.incoming.contains_key(file_id) {
            return false;
        }
        if total != total_chunks(file_size, chunk_size) {
            return false;
        }
        self.incoming.insert(
            file_id.to_owned(),
            IncomingTransfer {
                file_id: file_id.to_owned(),
                from: from.to_owned(),
                filename: filename.to_owned(),
                file_size,
                chunk_size,
                total_chunks: total,
                status: TransferStatus::Offered,
                chunks: (0..total).map(|_| None).collect(),
                received: 0,
                last_activity: tick,
            },
        );
        true
    }

    /// Local accept command. Returns the offering peer so the caller can
    /// address the FILE_ACCEPT.
    pub fn accept_local(&mut self, file_id: &str, tick: u64) -> Option<UserId> {
        let transfer = self.incoming.get_mut(file_id)?;
        transfer.status = TransferStatus::Transferring;
        transfer.last_activity = tick;
        Some(transfer.from.clone())
    }

    pub fn on_chunk(
        &mut self,
        file_id: &str,
        from: &str,
        seq: u32,
        data: Vec<u8>,
        tick: u64,
    ) -> ChunkOutcome {
        let Some(transfer) = self.incoming.get_mut(file_id) else {
            return ChunkOutcome::Invalid;
        };
        if transfer.from != from || seq >= transfer.total_chunks {
            return ChunkOutcome::Invalid;
        }
        transfer.last_activity = tick;
        transfer.status = TransferStatus::Transferring;
        let slot = &mut transfer.chunks[seq as usize];
        if slot.is_none() {
            *slot = Some(data);
            transfer.received += 1;
        }
        if transfer.received == transfer.total_chunks {
            let mut done = self.incoming.remove(file_id).expect("transfer present");
            return ChunkOutcome::AckAndComplete {
                filename: done.filename.clone(),
                data: done.assemble(),
            };
        }
        ChunkOutcome::Ack
    }

    /// Inbound FILE_COMPLETE. Only meaningful for the zero-chunk case; with
    /// chunks, completion already happened on the last FILE_CHUNK.
    pub fn on_complete(&mut self, file_id: &str, from: &str) -> Option<(String, Vec<u8>)> {
        let transfer = self.incoming.get(file_id)?;
        if transfer.from != from || transfer.received != transfer.total_chunks {
            return None;
        }
        let mut done = self.incoming.remove(file_id).expect("transfer present");
        Some((done.filename.clone(), done.assemble()))
    }

    /// Explicit cancel, either direction.
    pub fn cancel(&mut self, file_id: &str) -> bool {
        self.outgoing.remove(file_id).is_some() | self.incoming.remove(file_id).is_some()
    }

    pub fn outgoing_ids(&self) -> impl Iterator<Item = &str> {
        self.outgoing.keys().map(String::as_str)
    }

    pub fn incoming_ids(&self) -> impl Iterator<Item = &str> {
        self.incoming.keys().map(String::as_str)
    }

    /// Drive retransmission and inactivity timeouts. One call per tick.
    pub fn tick(&mut self, tick: u64) -> Vec<TickAction> {
        let mut actions = Vec::new();

        let mut dead_outgoing = Vec::new();
        for transfer in self.outgoing.values_mut() {
            if tick.saturating_sub(transfer.last_activity) >= INACTIVITY_TICKS {
                dead_outgoing.push((transfer.file_id.clone(), CancelReason::Inactive));
                continue;
            }
            if transfer.status != TransferStatus::Transferring {
                continue;
            }
            let mut exhausted = false;
            let mut overdue: Vec<u32> = transfer
                .in_flight
                .iter()
                .filter(|(_, a)| tick.saturating_sub(a.sent_tick) >= CHUNK_TIMEOUT_TICKS)
                .map(|(&seq, _)| seq)
                .collect();
            overdue.sort_unstable();
            for seq in overdue {
                let attempt = transfer.in_flight.get_mut(&seq).expect("in flight");
                if attempt.retries >= MAX_CHUNK_RETRIES {
                    exhausted = true;
                    break;
                }
                attempt.retries += 1;
                attempt.sent_tick = tick;
                actions.push(TickAction::ResendChunk {
                    file_id: transfer.file_id.clone(),
                    to: transfer.to.clone(),
                    seq,
                });
            }
            if exhausted {
                dead_outgoing.push((transfer.file_id.clone(), CancelReason::RetriesExhausted));
            }
        }
        for (file_id, reason) in dead_outgoing {
            let transfer = self.outgoing.remove(&file_id).expect("transfer present");
            // Pending retransmissions die with the transfer.
            actions.retain(
                |a| !matches!(a, TickAction::ResendChunk { file_id: id, .. } if *id == file_id),
            );
            actions.push(TickAction::CancelOutgoing {
                file_id,
                to: transfer.to,
                filename: transfer.filename,
                reason,
            });
        }

        let dead_incoming: Vec<String> = self
            .incoming
            .values()
            .filter(|t| tick.saturating_sub(t.last_activity) >= INACTIVITY_TICKS)
            .map(|t| t.file_id.clone())
            .collect();
        for file_id in dead_incoming {
            let transfer = self.incoming.remove(&file_id).expect("transfer present");
            actions.push(TickAction::CancelIncoming {
                file_id,
                from: transfer.from,
                filename: transfer.filename,
                reason: CancelReason::Inactive,
            });
        }

        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: &str = "alice@127.0.0.1";
    const BOB: &str = "bob@127.0.0.2";

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| i as u8).collect()
    }

    #[test]
    fn total_chunks_rounds_up() {
        assert_eq!(total_chunks(0, 1024), 0);
        assert_eq!(total_chunks(1, 1024), 1);
        assert_eq!(total_chunks(1024, 1024), 1);
        assert_eq!(total_chunks(1025, 1024), 2);
    }

    #[test]
    fn file_id_is_16_hex_chars() {
        let id = new_file_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn accept_opens_window() {
        let mut tm = TransferManager::new();
        tm.start_outgoing("f1", BOB, "big.bin", payload(4096 * 3), 1024, 0);
        match tm.on_accept("f1", BOB, 1) {
            AcceptOutcome::Start(seqs) => {
                assert_eq!(seqs, (0..SEND_WINDOW as u32).collect::<Vec<_>>());
            }
            other => panic!("expected Start, got {other:?}"),
        }
        // Accept from the wrong peer does nothing.
        tm.start_outgoing("f2", BOB, "b.bin", payload(10), 1024, 0);
        assert_eq!(tm.on_accept("f2", ALICE, 1), AcceptOutcome::Ignored);
    }

    #[test]
    fn ack_advances_window_and_finishes() {
        let mut tm = TransferManager::new();
        let data = payload(1024 * 10);
        tm.start_outgoing("f1", BOB, "big.bin", data, 1024, 0);
        let AcceptOutcome::Start(mut pending) = tm.on_accept("f1", BOB, 0) else {
            panic!("expected Start");
        };
        let mut finished = false;
        while let Some(seq) = pending.first().copied() {
            pending.remove(0);
            match tm.on_ack("f1", BOB, seq, 1) {
                AckOutcome::SendMore(more) => pending.extend(more),
                AckOutcome::Finished { filename, to } => {
                    assert_eq!(filename, "big.bin");
                    assert_eq!(to, BOB);
                    finished = true;
                }
                AckOutcome::Ignored => {}
            }
        }
        assert!(finished);
        assert_eq!(tm.outgoing_ids().count(), 0);
    }

    #[test]
    fn receiver_reassembles_in_order() {
        let mut tm = TransferManager::new();
        let data = payload(2500);
        let total = total_chunks(2500, 1024);
        assert!(tm.on_offer(ALICE, "f1", "notes.txt", 2500, 1024, total, 0));
        assert_eq!(tm.accept_local("f1", 0), Some(ALICE.to_string()));
        // Deliver chunks out of order.
        assert_eq!(
            tm.on_chunk("f1", ALICE, 2, data[2048..].to_vec(), 1),
            ChunkOutcome::Ack
        );
        assert_eq!(
            tm.on_chunk("f1", ALICE, 0, data[..1024].to_vec(), 1),
            ChunkOutcome::Ack
        );
        match tm.on_chunk("f1", ALICE, 1, data[1024..2048].to_vec(), 1) {
            ChunkOutcome::AckAndComplete { filename, data: got } => {
                assert_eq!(filename, "notes.txt");
                assert_eq!(got, data);
            }
            other => panic!("expected completion, got {other:?}"),
        }
        assert_eq!(tm.incoming_ids().count(), 0);
    }

    #[test]
    fn duplicate_chunk_applied_once_but_acked() {
        let mut tm = TransferManager::new();
        tm.on_offer(ALICE, "f1", "t.txt", 2048, 1024, 2, 0);
        tm.accept_local("f1", 0);
        assert_eq!(
            tm.on_chunk("f1", ALICE, 0, vec![1; 1024], 1),
            ChunkOutcome::Ack
        );
        // Same seq again with different bytes: re-acked, payload ignored.
        assert_eq!(
            tm.on_chunk("f1", ALICE, 0, vec![9; 1024], 2),
            ChunkOutcome::Ack
        );
        match tm.on_chunk("f1", ALICE, 1, vec![2; 1024], 3) {
            ChunkOutcome::AckAndComplete { data, .. } => {
                assert_eq!(&data[..1024], &[1u8; 1024][..]);
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[test]
    fn out_of_range_seq_rejected() {
        let mut tm = TransferManager::new();
        tm.on_offer(ALICE, "f1", "t.txt", 2048, 1024, 2, 0);
        assert_eq!(
            tm.on_chunk("f1", ALICE, 2, vec![0; 1024], 1),
            ChunkOutcome::Invalid
        );
    }

    #[test]
    fn inconsistent_offer_rejected() {
        let mut tm = TransferManager::new();
        assert!(!tm.on_offer(ALICE, "f1", "t.txt", 2048, 1024, 7, 0));
    }

    #[test]
    fn timeout_resends_then_cancels() {
        let mut tm = TransferManager::new();
        tm.start_outgoing("f1", BOB, "t.txt", payload(100), 1024, 0);
        tm.on_accept("f1", BOB, 0);
        let mut resends = 0;
        let mut cancelled = false;
        for tick in 1..=20 {
            for action in tm.tick(tick) {
                match action {
                    TickAction::ResendChunk { seq, .. } => {
                        assert_eq!(seq, 0);
                        resends += 1;
                    }
                    TickAction::CancelOutgoing { reason, .. } => {
                        assert_eq!(reason, CancelReason::RetriesExhausted);
                        cancelled = true;
                    }
                    other => panic!("unexpected {other:?}"),
                }
            }
            if cancelled {
                break;
            }
        }
        assert_eq!(resends, MAX_CHUNK_RETRIES);
        assert!(cancelled);
        assert_eq!(tm.outgoing_ids().count(), 0);
    }

    #[test]
    fn idle_offer_cancelled_both_sides() {
        let mut tm = TransferManager::new();
        tm.start_outgoing("f1", BOB, "t.txt", payload(100), 1024, 0);
        tm.on_offer(ALICE, "f2", "u.txt", 100, 1024, 1, 0);
        let actions = tm.tick(INACTIVITY_TICKS);
        assert!(actions
            .iter()
            .any(|a| matches!(a, TickAction::CancelOutgoing { file_id, .. } if file_id == "f1")));
        assert!(actions
            .iter()
            .any(|a| matches!(a, TickAction::CancelIncoming { file_id, .. } if file_id == "f2")));
    }

    #[test]
    fn zero_byte_file_completes_on_accept() {
        let mut tm = TransferManager::new();
        tm.start_outgoing("f1", BOB, "empty.txt", Vec::new(), 1024, 0);
        assert_eq!(
            tm.on_accept("f1", BOB, 0),
            AcceptOutcome::Empty {
                filename: "empty.txt".into()
            }
        );
        // Receiver side: complete arrives with nothing outstanding.
        tm.on_offer(ALICE, "f2", "empty.txt", 0, 1024, 0, 0);
        tm.accept_local("f2", 0);
        let (filename, data) = tm.on_complete("f2", ALICE).unwrap();
        assert_eq!(filename, "empty.txt");
        assert!(data.is_empty());
    }

    #[test]
    fn explicit_cancel_forgets_transfer() {
        let mut tm = TransferManager::new();
        tm.start_outgoing("f1", BOB, "t.txt", payload(100), 1024, 0);
        assert!(tm.cancel("f1"));
        assert!(!tm.cancel("f1"));
    }
}
