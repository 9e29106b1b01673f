//! Tic-tac-toe sessions: two players, strict turn and sequence validation,
//! move retransmission until the opponent's reciprocal move is observed.

use std::collections::HashMap;

use crate::protocol::{GameOutcome, UserId};

/// Move retransmit interval, in ticks.
pub const MOVE_RETRY_TICKS: u64 = 2;
pub const MAX_MOVE_RETRIES: u32 = 3;
/// A session with no progress for this long is abandoned.
pub const GAME_INACTIVITY_TICKS: u64 = 60;

const WIN_LINES: [[usize; 3]; 8] = [
    [0, 1, 2],
    [3, 4, 5],
    [6, 7, 8],
    [0, 3, 6],
    [1, 4, 7],
    [2, 5, 8],
    [0, 4, 8],
    [2, 4, 6],
];

/// Random 64-bit game identifier, hex encoded.
pub fn new_game_id() -> String {
    format!("{:016x}", rand::random::<u64>())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mark {
    X,
    O,
}

impl Mark {
    pub fn other(self) -> Mark {
        match self {
            Mark::X => Mark::O,
            Mark::O => Mark::X,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Mark::X => 'X',
            Mark::O => 'O',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameStatus {
    PendingAccept,
    Active,
    WonX,
    WonO,
    Draw,
    Abandoned,
}

#[derive(Debug, Clone, Copy)]
struct PendingMove {
    position: u8,
    seq: u32,
    sent_tick: u64,
    retries: u32,
}

/// A finished game, detached from the session map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedGame {
    pub game_id: String,
    pub outcome: GameOutcome,
    pub player_x: UserId,
    pub player_o: UserId,
}

impl FinishedGame {
    /// One-line outcome text, e.g. `alice@127.0.0.1 wins!`.
    pub fn describe(&self) -> String {
        match self.outcome {
            GameOutcome::WonX => format!("{} wins!", self.player_x),
            GameOutcome::WonO => format!("{} wins!", self.player_o),
            GameOutcome::Draw => "It's a draw.".to_owned(),
        }
    }
}

#[derive(Debug)]
pub struct GameSession {
    pub game_id: String,
    pub player_x: UserId,
    pub player_o: UserId,
    board: [Option<Mark>; 9],
    turn: Mark,
    next_move_seq: u32,
    pub status: GameStatus,
    local_mark: Mark,
    pending: Option<PendingMove>,
    last_activity: u64,
}

impl GameSession {
    fn new(
        game_id: &str,
        player_x: &str,
        player_o: &str,
        local_mark: Mark,
        tick: u64,
    ) -> Self {
        Self {
            game_id: game_id.to_owned(),
            player_x: player_x.to_owned(),
            player_o: player_o.to_owned(),
            board: [None; 9],
            turn: Mark::X,
            next_move_seq: 0,
            status: GameStatus::PendingAccept,
            local_mark,
            pending: None,
            last_activity: tick,
        }
    }

    pub fn opponent(&self) -> &str {
        match self.local_mark {
            Mark::X => &self.player_o,
            Mark::O => &self.player_x,
        }
    }

    fn player(&self, mark: Mark) -> &str {
        match mark {
            Mark::X => &self.player_x,
            Mark::O => &self.player_o,
        }
    }

    fn evaluate(&self) -> Option<GameOutcome> {
        for line in WIN_LINES {
            if let Some(mark) = self.board[line[0]] {
                if self.board[line[1]] == Some(mark) && self.board[line[2]] == Some(mark) {
                    return Some(match mark {
                        Mark::X => GameOutcome::WonX,
                        Mark::O => GameOutcome::WonO,
                    });
                }
            }
        }
        if self.board.iter().all(Option::is_some) {
            return Some(GameOutcome::Draw);
        }
        None
    }

    /// Claim a cell for the player on turn and advance the session. The
    /// caller has already validated sender, cell, and sequence.
    fn apply(&mut self, position: u8) -> Option<GameOutcome> {
        self.board[position as usize] = Some(self.turn);
        self.next_move_seq += 1;
        let outcome = self.evaluate();
        match outcome {
            Some(GameOutcome::WonX) => self.status = GameStatus::WonX,
            Some(GameOutcome::WonO) => self.status = GameStatus::WonO,
            Some(GameOutcome::Draw) => self.status = GameStatus::Draw,
            None => self.turn = self.turn.other(),
        }
        outcome
    }

    /// Three-row text rendering for the shell.
    pub fn render(&self) -> String {
        let cell = |i: usize| self.board[i].map(Mark::as_char).unwrap_or('.');
        format!(
            "{} {} {}\n{} {} {}\n{} {} {}",
            cell(0),
            cell(1),
            cell(2),
            cell(3),
            cell(4),
            cell(5),
            cell(6),
            cell(7),
            cell(8)
        )
    }

    fn finished(&self, outcome: GameOutcome) -> FinishedGame {
        FinishedGame {
            game_id: self.game_id.clone(),
            outcome,
            player_x: self.player_x.clone(),
            player_o: self.player_o.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GameError {
    #[error("unknown game {0}")]
    Unknown(String),
    #[error("game is not active")]
    NotActive,
    #[error("not your turn")]
    NotYourTurn,
    #[error("cell already taken")]
    CellTaken,
    #[error("position must be 0..=8")]
    BadPosition,
    #[error("unexpected move sequence")]
    BadSequence,
    #[error("that invitation was not addressed to you")]
    NotInvited,
}

/// A locally played move, ready to go on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalMove {
    pub seq: u32,
    pub opponent: UserId,
    pub outcome: Option<FinishedGame>,
    pub board: String,
}

/// Result of an inbound TICTACTOE_MOVE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteMove {
    Applied {
        by: UserId,
        position: u8,
        outcome: Option<FinishedGame>,
        board: String,
    },
    /// Already-processed seq: retransmit our own pending move, if any.
    Duplicate {
        resend: Option<(UserId, u8, u32)>,
    },
    Rejected(GameError),
    Unknown,
}

/// Timer-driven work produced by [`GameManager::tick`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameTickAction {
    ResendMove {
        game_id: String,
        to: UserId,
        position: u8,
        seq: u32,
    },
    Abandon {
        game_id: String,
        opponent: UserId,
    },
}

/// Concurrent sessions keyed by game id. Finished games leave the map.
#[derive(Debug, Default)]
pub struct GameManager {
    games: HashMap<String, GameSession>,
}

impl GameManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Local invite: we are X, the opponent is O.
    pub fn invite_local(&mut self, game_id: &str, self_id: &str, opponent: &str, tick: u64) {
        self.games.insert(
            game_id.to_owned(),
            GameSession::new(game_id, self_id, opponent, Mark::X, tick),
        );
    }

    /// Inbound invite: the inviter is X, we are O.
    pub fn on_invite(&mut self, game_id: &str, from: &str, self_id: &str, tick: u64) -> bool {
        if self.games.contains_key(game_id) {
            return false;
        }
        self.games.insert(
            game_id.to_owned(),
            GameSession::new(game_id, from, self_id, Mark::O, tick),
        );
        true
    }

    /// Local accept of a pending invitation. Returns the inviter to address
    /// the TICTACTOE_ACCEPT to.
    pub fn accept_local(&mut self, game_id: &str, tick: u64) -> Result<UserId, GameError> {
        let game = self
            .games
            .get_mut(game_id)
            .ok_or_else(|| GameError::Unknown(game_id.to_owned()))?;
        if game.local_mark != Mark::O || game.status != GameStatus::PendingAccept {
            return Err(GameError::NotInvited);
        }
        game.status = GameStatus::Active;
        game.last_activity = tick;
        Ok(game.player_x.clone())
    }

    pub fn on_accept(&mut self, game_id: &str, from: &str, tick: u64) -> bool {
        let Some(game) = self.games.get_mut(game_id) else {
            return false;
        };
        if game.status != GameStatus::PendingAccept || game.player_o != from {
            return false;
        }
        game.status = GameStatus::Active;
        game.last_activity = tick;
        true
    }

    pub fn play_local(
        &mut self,
        game_id: &str,
        self_id: &str,
        position: u8,
        tick: u64,
    ) -> Result<LocalMove, GameError> {
        if position > 8 {
            return Err(GameError::BadPosition);
        }
        let game = self
            .games
            .get_mut(game_id)
            .ok_or_else(|| GameError::Unknown(game_id.to_owned()))?;
        if game.status != GameStatus::Active {
            return Err(GameError::NotActive);
        }
        if game.player(game.turn) != self_id {
            return Err(GameError::NotYourTurn);
        }
        if game.board[position as usize].is_some() {
            return Err(GameError::CellTaken);
        }
        let seq = game.next_move_seq;
        let outcome = game.apply(position);
        let board = game.render();
        let opponent = game.opponent().to_owned();
        match outcome {
            Some(outcome) => {
                // Terminal: retransmission stops with the session.
                let done = game.finished(outcome);
                self.games.remove(game_id);
                Ok(LocalMove {
                    seq,
                    opponent,
                    outcome: Some(done),
                    board,
                })
            }
            None => {
                game.pending = Some(PendingMove {
                    position,
                    seq,
                    sent_tick: tick,
                    retries: 0,
                });
                game.last_activity = tick;
                Ok(LocalMove {
                    seq,
                    opponent,
                    outcome: None,
                    board,
                })
            }
        }
    }

    pub fn on_move(
        &mut self,
        game_id: &str,
        from: &str,
        position: u8,
        seq: u32,
        tick: u64,
    ) -> RemoteMove {
        let Some(game) = self.games.get_mut(game_id) else {
            return RemoteMove::Unknown;
        };
        // A first move from the invited peer doubles as acceptance when the
        // TICTACTOE_ACCEPT was lost.
        if game.status == GameStatus::PendingAccept
            && game.local_mark == Mark::X
            && game.player_o == from
        {
            game.status = GameStatus::Active;
        }
        if game.status != GameStatus::Active {
            return RemoteMove::Rejected(GameError::NotActive);
        }
        if seq < game.next_move_seq {
            let resend = game
                .pending
                .map(|p| (game.opponent().to_owned(), p.position, p.seq));
            return RemoteMove::Duplicate { resend };
        }
        if seq > game.next_move_seq {
            return RemoteMove::Rejected(GameError::BadSequence);
        }
        if game.player(game.turn) != from {
            return RemoteMove::Rejected(GameError::NotYourTurn);
        }
        if game.board[position as usize].is_some() {
            return RemoteMove::Rejected(GameError::CellTaken);
        }
        // Reciprocal move observed: our previous move no longer needs resending.
        game.pending = None;
        game.last_activity = tick;
        let outcome = game.apply(position);
        let board = game.render();
        match outcome {
            Some(outcome) => {
                let done = game.finished(outcome);
                self.games.remove(game_id);
                RemoteMove::Applied {
                    by: from.to_owned(),
                    position,
                    outcome: Some(done),
                    board,
                }
            }
            None => RemoteMove::Applied {
                by: from.to_owned(),
                position,
                outcome: None,
                board,
            },
        }
    }

    /// Inbound TICTACTOE_RESULT: the opponent declared the game over.
    pub fn on_result(
        &mut self,
        game_id: &str,
        from: &str,
        outcome: GameOutcome,
    ) -> Option<FinishedGame> {
        let game = self.games.get(game_id)?;
        if game.opponent() != from {
            return None;
        }
        let game = self.games.remove(game_id).expect("session present");
        Some(game.finished(outcome))
    }

    pub fn get(&self, game_id: &str) -> Option<&GameSession> {
        self.games.get(game_id)
    }

    pub fn active_ids(&self) -> impl Iterator<Item = &str> {
        self.games.keys().map(String::as_str)
    }

    /// Drive move retransmission and inactivity abandonment.
    pub fn tick(&mut self, tick: u64) -> Vec<GameTickAction> {
        let mut actions = Vec::new();
        let mut dead = Vec::new();
        for game in self.games.values_mut() {
            if tick.saturating_sub(game.last_activity) >= GAME_INACTIVITY_TICKS {
                dead.push(game.game_id.clone());
                continue;
            }
            let Some(pending) = &mut game.pending else {
                continue;
            };
            if tick.saturating_sub(pending.sent_tick) < MOVE_RETRY_TICKS {
                continue;
            }
            if pending.retries >= MAX_MOVE_RETRIES {
                dead.push(game.game_id.clone());
                continue;
            }
            pending.retries += 1;
            pending.sent_tick = tick;
            let (position, seq) = (pending.position, pending.seq);
            actions.push(GameTickAction::ResendMove {
                game_id: game.game_id.clone(),
                to: game.opponent().to_owned(),
                position,
                seq,
            });
        }
        for game_id in dead {
            let mut game = self.games.remove(&game_id).expect("session present");
            game.status = GameStatus::Abandoned;
            actions.push(GameTickAction::Abandon {
                game_id,
                opponent: game.opponent().to_owned(),
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

    fn active_pair() -> (GameManager, GameManager) {
        let mut a = GameManager::new();
        let mut b = GameManager::new();
        a.invite_local("g1", ALICE, BOB, 0);
        assert!(b.on_invite("g1", ALICE, BOB, 0));
        assert_eq!(b.accept_local("g1", 0), Ok(ALICE.to_string()));
        assert!(a.on_accept("g1", BOB, 0));
        (a, b)
    }

    #[test]
    fn x_wins_top_row() {
        let (mut a, mut b) = active_pair();
        // X=0, O=4, X=1, O=5, X=2 per the classic opening.
        let moves = [(0u8, true), (4, false), (1, true), (5, false), (2, true)];
        let mut seq = 0;
        for (pos, alice_moves) in moves {
            let (mover, mover_id, other) = if alice_moves {
                (&mut a, ALICE, &mut b)
            } else {
                (&mut b, BOB, &mut a)
            };
            let lm = mover.play_local("g1", mover_id, pos, 0).unwrap();
            assert_eq!(lm.seq, seq);
            match other.on_move("g1", mover_id, pos, seq, 0) {
                RemoteMove::Applied { outcome, .. } => {
                    if pos == 2 {
                        let done = outcome.expect("terminal");
                        assert_eq!(done.outcome, GameOutcome::WonX);
                        assert_eq!(done.describe(), format!("{ALICE} wins!"));
                    } else {
                        assert!(outcome.is_none());
                    }
                }
                other => panic!("expected Applied, got {other:?}"),
            }
            seq += 1;
        }
        // Terminal sessions leave both active maps.
        assert_eq!(a.active_ids().count(), 0);
        assert_eq!(b.active_ids().count(), 0);
    }

    #[test]
    fn draw_detected() {
        let (mut a, mut b) = active_pair();
        // X O X / X O O / O X X leaves no winner.
        let script = [(0, true), (1, false), (2, true), (4, false), (3, true),
                      (5, false), (7, true), (6, false), (8, true)];
        let mut last = None;
        for (i, (pos, alice_moves)) in script.into_iter().enumerate() {
            let (mover, mover_id, other) = if alice_moves {
                (&mut a, ALICE, &mut b)
            } else {
                (&mut b, BOB, &mut a)
            };
            let lm = mover.play_local("g1", mover_id, pos, 0).unwrap();
            last = lm.outcome.clone();
            other.on_move("g1", mover_id, pos, i as u32, 0);
        }
        assert_eq!(last.unwrap().outcome, GameOutcome::Draw);
    }

    #[test]
    fn rejects_out_of_turn_and_taken_cells() {
        let (mut a, mut b) = active_pair();
        // O tries to open the game.
        assert_eq!(
            b.play_local("g1", BOB, 0, 0),
            Err(GameError::NotYourTurn)
        );
        a.play_local("g1", ALICE, 4, 0).unwrap();
        b.on_move("g1", ALICE, 4, 0, 0);
        // Same cell again.
        assert_eq!(b.play_local("g1", BOB, 4, 0), Err(GameError::CellTaken));
        assert_eq!(b.play_local("g1", BOB, 9, 0), Err(GameError::BadPosition));
    }

    #[test]
    fn move_seq_must_be_exact() {
        let (mut a, mut b) = active_pair();
        a.play_local("g1", ALICE, 0, 0).unwrap();
        // Future seq is rejected, exact seq applies.
        assert!(matches!(
            b.on_move("g1", ALICE, 0, 5, 0),
            RemoteMove::Rejected(_)
        ));
        assert!(matches!(
            b.on_move("g1", ALICE, 0, 0, 0),
            RemoteMove::Applied { .. }
        ));
    }

    #[test]
    fn duplicate_move_answered_with_pending() {
        let (mut a, mut b) = active_pair();
        a.play_local("g1", ALICE, 0, 0).unwrap();
        b.on_move("g1", ALICE, 0, 0, 0);
        b.play_local("g1", BOB, 4, 0).unwrap();
        // Alice's retransmit of seq 0 reaches Bob again: Bob re-offers his
        // own pending move instead of reapplying.
        match b.on_move("g1", ALICE, 0, 0, 1) {
            RemoteMove::Duplicate { resend } => {
                assert_eq!(resend, Some((ALICE.to_string(), 4, 1)));
            }
            other => panic!("expected Duplicate, got {other:?}"),
        }
    }

    #[test]
    fn lost_accept_first_move_activates() {
        let mut a = GameManager::new();
        a.invite_local("g1", ALICE, BOB, 0);
        // No on_accept: Bob's ACCEPT was lost, his move arrives first.
        // Still PendingAccept, but Bob cannot move first anyway (X opens),
        // so it is Alice's move that matters after implicit activation.
        match a.on_move("g1", BOB, 0, 0, 0) {
            RemoteMove::Rejected(GameError::NotYourTurn) => {}
            other => panic!("expected NotYourTurn, got {other:?}"),
        }
        // The session is active now.
        assert!(a.play_local("g1", ALICE, 0, 0).is_ok());
    }

    #[test]
    fn result_finishes_session() {
        let (mut a, _b) = active_pair();
        let done = a.on_result("g1", BOB, GameOutcome::WonO).unwrap();
        assert_eq!(done.outcome, GameOutcome::WonO);
        assert_eq!(done.describe(), format!("{BOB} wins!"));
        assert_eq!(a.active_ids().count(), 0);
        // From a stranger it is ignored.
        let (mut a2, _b2) = active_pair();
        assert!(a2.on_result("g1", "mallory@9.9.9.9", GameOutcome::WonO).is_none());
    }

    #[test]
    fn pending_move_retransmits_then_abandons() {
        let (mut a, _b) = active_pair();
        a.play_local("g1", ALICE, 0, 0).unwrap();
        let mut resends = 0;
        let mut abandoned = false;
        for tick in 1..=12 {
            for action in a.tick(tick) {
                match action {
                    GameTickAction::ResendMove { position, seq, .. } => {
                        assert_eq!((position, seq), (0, 0));
                        resends += 1;
                    }
                    GameTickAction::Abandon { game_id, opponent } => {
                        assert_eq!(game_id, "g1");
                        assert_eq!(opponent, BOB);
                        abandoned = true;
                    }
                }
            }
            if abandoned {
                break;
            }
        }
        assert_eq!(resends, MAX_MOVE_RETRIES);
        assert!(abandoned);
        assert_eq!(a.active_ids().count(), 0);
    }

    #[test]
    fn idle_invitation_expires() {
        let mut b = GameManager::new();
        b.on_invite("g1", ALICE, BOB, 0);
        let actions = b.tick(GAME_INACTIVITY_TICKS);
        assert!(matches!(&actions[..], [GameTickAction::Abandon { .. }]));
    }
}
