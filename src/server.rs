use std::collections::{hash_map, HashMap};
use std::sync::mpsc::SyncSender;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use itertools::Itertools;
use log::{debug, info, warn};

use crate::event::{ClientEvent, ServerEvent};
use crate::piece::Piece;
use crate::player::{Player, PlayerSummary};

pub const COUNTDOWN_START_VALUE: u8 = 3;
pub const COUNTDOWN_TICK_INTERVAL: Duration = Duration::from_secs(1);

// Capacity of each client's outbound queue. A client that cannot drain
// this many events is considered gone.
pub const CLIENT_QUEUE_CAPACITY: usize = 256;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ClientId(u64);

/// Generation counter scoping countdown ticks to one match lifecycle.
/// A tick carrying a stale seq is ignored, which is what guarantees
/// that a countdown never completes after the match it belonged to was
/// invalidated.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct MatchSeq(u64);

#[derive(Debug)]
pub enum IncomingEvent {
    Network(ClientId, ClientEvent),
    Disconnected(ClientId),
    CountdownTick(MatchSeq),
}

pub struct Client {
    events_tx: SyncSender<ServerEvent>,
    logging_id: String,
    join_order: usize,
}

pub struct Clients {
    map: HashMap<ClientId, Client>,
    next_join_order: usize,
}

impl Clients {
    pub fn new() -> Self {
        Clients { map: HashMap::new(), next_join_order: 0 }
    }

    pub fn add_client(&mut self, events_tx: SyncSender<ServerEvent>, logging_id: String) -> ClientId {
        let client = Client {
            events_tx,
            logging_id,
            join_order: self.next_join_order,
        };
        self.next_join_order += 1;
        loop {
            let id = ClientId(rand::random());
            match self.map.entry(id) {
                hash_map::Entry::Occupied(_) => {}
                hash_map::Entry::Vacant(e) => {
                    e.insert(client);
                    return id;
                }
            }
        }
    }

    // Idempotent: the reader thread, the writer thread and the degraded-send
    // path may all race to remove the same client; only the first wins.
    pub fn remove_client(&mut self, id: ClientId) -> Option<String> {
        self.map.remove(&id).map(|client| client.logging_id)
    }
}

/// Cancellation token for one countdown instance. The timer thread
/// parks on the condvar between ticks so that cancellation wakes it
/// immediately instead of after the remainder of the second.
pub struct CountdownCancel {
    cancelled: Mutex<bool>,
    bell: Condvar,
}

impl CountdownCancel {
    fn new() -> Self {
        CountdownCancel { cancelled: Mutex::new(false), bell: Condvar::new() }
    }

    pub fn cancel(&self) {
        let mut cancelled = self.cancelled.lock().unwrap();
        *cancelled = true;
        self.bell.notify_all();
    }

    // Returns true if the full interval elapsed, false if cancelled first.
    pub fn wait_tick(&self, interval: Duration) -> bool {
        let deadline = Instant::now() + interval;
        let mut cancelled = self.cancelled.lock().unwrap();
        loop {
            if *cancelled {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            let (guard, _) = self.bell.wait_timeout(cancelled, deadline - now).unwrap();
            cancelled = guard;
        }
    }
}

enum MatchState {
    Idle,
    Counting {
        seq: MatchSeq,
        participants: [ClientId; 2],
        ticks_remaining: u8,
        cancel: Arc<CountdownCancel>,
    },
    InProgress {
        participants: Vec<ClientId>,
    },
}

pub struct ServerState {
    clients: Arc<Mutex<Clients>>,
    players: HashMap<ClientId, Player>,
    match_state: MatchState,
    next_match_seq: u64,
    events_tx: SyncSender<IncomingEvent>,
    countdown_timer_enabled: bool,
}

impl ServerState {
    pub fn new(clients: Arc<Mutex<Clients>>, events_tx: SyncSender<IncomingEvent>) -> Self {
        ServerState {
            clients,
            players: HashMap::new(),
            match_state: MatchState::Idle,
            next_match_seq: 0,
            events_tx,
            countdown_timer_enabled: true,
        }
    }

    /// The seq of the currently running countdown, if any.
    pub fn countdown_seq(&self) -> Option<MatchSeq> {
        match self.match_state {
            MatchState::Counting { seq, .. } => Some(seq),
            _ => None,
        }
    }

    // Tests drive countdown ticks by hand for determinism.
    #[allow(non_snake_case)]
    pub fn TEST_disable_countdown_timer(&mut self) {
        self.countdown_timer_enabled = false;
    }

    /// The single linearization point: every registry mutation, quorum
    /// check, countdown transition and relay decision happens here, on
    /// the coordinator thread.
    pub fn apply_event(&mut self, event: IncomingEvent) {
        let clients = Arc::clone(&self.clients);
        let mut clients = clients.lock().unwrap();
        let mut degraded = Vec::new();

        match event {
            IncomingEvent::Network(client_id, event) => match event {
                ClientEvent::Join { username } => {
                    self.on_join(&clients, client_id, username, &mut degraded);
                }
                ClientEvent::Ready { ready } => {
                    self.on_ready(&clients, client_id, ready, &mut degraded);
                }
                ClientEvent::SoloStart => {
                    self.on_solo_start(&clients, client_id, &mut degraded);
                }
                ClientEvent::InitialPieces { next_piece, hold_piece } => {
                    self.on_initial_pieces(client_id, next_piece, hold_piece);
                }
                ClientEvent::Score { value } => {
                    self.relay(&clients, client_id, ServerEvent::Score { value }, &mut degraded);
                }
                ClientEvent::Board { board } => {
                    self.relay(&clients, client_id, ServerEvent::Board { board }, &mut degraded);
                }
                ClientEvent::NextPiece { piece } => {
                    self.relay(&clients, client_id, ServerEvent::NextPiece { piece }, &mut degraded);
                }
                ClientEvent::HoldPiece { piece } => {
                    self.relay(&clients, client_id, ServerEvent::HoldPiece { piece }, &mut degraded);
                }
            },
            IncomingEvent::Disconnected(client_id) => {
                self.on_disconnect(&clients, client_id, &mut degraded);
            }
            IncomingEvent::CountdownTick(seq) => {
                self.on_countdown_tick(&clients, seq, &mut degraded);
            }
        }

        loop {
            if let MatchState::Idle = self.match_state {
                self.maybe_start_countdown(&clients, &mut degraded);
            }
            if degraded.is_empty() {
                break;
            }
            // A connection whose outbound queue broke or overflowed is
            // treated as disconnected; that in turn may degrade others
            // or free the match slot for a waiting ready pair.
            while let Some(id) = degraded.pop() {
                if let Some(logging_id) = clients.remove_client(id) {
                    warn!("Client {} degraded, dropping connection", logging_id);
                }
                self.on_disconnect(&clients, id, &mut degraded);
            }
        }
    }

    fn on_join(
        &mut self, clients: &Clients, client_id: ClientId, username: String,
        degraded: &mut Vec<ClientId>,
    ) {
        if username.is_empty() {
            warn!("Join with empty username ignored");
            return;
        }
        if self.players.contains_key(&client_id) {
            warn!("Client attempted to join twice as {:?}; ignoring", username);
            return;
        }
        if !clients.map.contains_key(&client_id) {
            debug!("Join from already disconnected client; ignoring");
            return;
        }
        info!("Player {} joined", username);
        self.players.insert(client_id, Player::new(username));
        self.broadcast_lobby(clients, degraded);
    }

    fn on_ready(
        &mut self, clients: &Clients, client_id: ClientId, ready: bool,
        degraded: &mut Vec<ClientId>,
    ) {
        match self.players.get_mut(&client_id) {
            Some(player) => {
                player.is_ready = ready;
                debug!("Player {} is now {}", player.name, if ready { "ready" } else { "not ready" });
            }
            None => {
                warn!("Ready update from unregistered connection; ignoring");
                return;
            }
        }
        self.broadcast_lobby(clients, degraded);
    }

    fn on_solo_start(
        &mut self, clients: &Clients, client_id: ClientId, degraded: &mut Vec<ClientId>,
    ) {
        let Some(player) = self.players.get(&client_id) else {
            warn!("Solo start from unregistered connection; ignoring");
            return;
        };
        match self.match_state {
            MatchState::Idle => {}
            _ => {
                debug!("Solo start while the match slot is busy; ignoring");
                return;
            }
        }
        info!("Player {} started a solo game", player.name);
        self.match_state = MatchState::InProgress { participants: vec![client_id] };
        send_to(
            clients,
            client_id,
            ServerEvent::Start { is_solo: true, opponent_next: None, opponent_hold: None },
            degraded,
        );
    }

    fn on_initial_pieces(&mut self, client_id: ClientId, next_piece: Piece, hold_piece: Piece) {
        if let MatchState::InProgress { ref participants } = self.match_state {
            if participants.contains(&client_id) {
                debug!("Initial pieces after match start; ignoring");
                return;
            }
        }
        match self.players.get_mut(&client_id) {
            Some(player) => {
                player.initial_next = Some(next_piece);
                player.initial_hold = Some(hold_piece);
            }
            None => warn!("Initial pieces from unregistered connection; ignoring"),
        }
    }

    fn relay(
        &mut self, clients: &Clients, client_id: ClientId, event: ServerEvent,
        degraded: &mut Vec<ClientId>,
    ) {
        match self.match_state {
            MatchState::InProgress { ref participants } if participants.contains(&client_id) => {
                // Forward to the other participant only; solo matches
                // have nobody to forward to.
                if let Some(&other) = participants.iter().find(|&&id| id != client_id) {
                    send_to(clients, other, event, degraded);
                }
            }
            _ => {
                debug!("Gameplay message outside of an active match; dropping");
            }
        }
    }

    fn on_disconnect(
        &mut self, clients: &Clients, client_id: ClientId, degraded: &mut Vec<ClientId>,
    ) {
        let Some(player) = self.players.remove(&client_id) else {
            // Reader and writer threads both report disconnects, and a
            // degraded send may have finalized the client already.
            debug!("Disconnect for a connection that is not registered; ignoring");
            return;
        };
        info!("Player {} left", player.name);
        self.invalidate_match(clients, client_id, degraded);
        self.broadcast_lobby(clients, degraded);
    }

    fn invalidate_match(
        &mut self, clients: &Clients, client_id: ClientId, degraded: &mut Vec<ClientId>,
    ) {
        let survivors: Vec<ClientId> = match self.match_state {
            MatchState::Counting { ref participants, ref cancel, .. }
                if participants.contains(&client_id) =>
            {
                cancel.cancel();
                participants.iter().copied().filter(|&id| id != client_id).collect()
            }
            MatchState::InProgress { ref participants } if participants.contains(&client_id) => {
                participants.iter().copied().filter(|&id| id != client_id).collect()
            }
            _ => return,
        };
        info!("Match cancelled by disconnect");
        self.match_state = MatchState::Idle;
        for id in survivors {
            send_to(clients, id, ServerEvent::GameCancelled, degraded);
        }
    }

    fn on_countdown_tick(
        &mut self, clients: &Clients, seq: MatchSeq, degraded: &mut Vec<ClientId>,
    ) {
        let (participants, ticks_remaining) = match self.match_state {
            MatchState::Counting { seq: current, participants, ref mut ticks_remaining, .. }
                if current == seq =>
            {
                *ticks_remaining -= 1;
                (participants, *ticks_remaining)
            }
            _ => {
                debug!("Stale countdown tick {:?}; ignoring", seq);
                return;
            }
        };
        if ticks_remaining > 0 {
            for id in participants {
                send_to(clients, id, ServerEvent::Countdown { value: ticks_remaining }, degraded);
            }
        } else {
            self.start_match(clients, participants, degraded);
        }
    }

    fn start_match(
        &mut self, clients: &Clients, participants: [ClientId; 2], degraded: &mut Vec<ClientId>,
    ) {
        info!("Match started");
        self.match_state = MatchState::InProgress { participants: participants.to_vec() };
        let [a, b] = participants;
        for (me, opponent) in [(a, b), (b, a)] {
            let (opponent_next, opponent_hold) = match self.players.get(&opponent) {
                Some(player) => (player.initial_next.clone(), player.initial_hold.clone()),
                None => (None, None),
            };
            send_to(
                clients,
                me,
                ServerEvent::Start { is_solo: false, opponent_next, opponent_hold },
                degraded,
            );
        }
    }

    fn maybe_start_countdown(&mut self, clients: &Clients, degraded: &mut Vec<ClientId>) {
        let ready: Vec<ClientId> = self
            .players
            .iter()
            .filter(|(_, player)| player.is_ready)
            .map(|(&id, _)| id)
            .sorted_by_key(|id| clients.map.get(id).map_or(usize::MAX, |c| c.join_order))
            .collect();
        if ready.len() != 2 {
            return;
        }
        let participants = [ready[0], ready[1]];
        self.next_match_seq += 1;
        let seq = MatchSeq(self.next_match_seq);
        let cancel = Arc::new(CountdownCancel::new());
        info!("Ready quorum met, starting countdown");
        self.match_state = MatchState::Counting {
            seq,
            participants,
            ticks_remaining: COUNTDOWN_START_VALUE,
            cancel: Arc::clone(&cancel),
        };
        for id in participants {
            send_to(clients, id, ServerEvent::Countdown { value: COUNTDOWN_START_VALUE }, degraded);
        }
        if self.countdown_timer_enabled {
            spawn_countdown_timer(seq, cancel, self.events_tx.clone());
        }
    }

    fn broadcast_lobby(&self, clients: &Clients, degraded: &mut Vec<ClientId>) {
        let players = self.lobby_snapshot(clients);
        for &id in clients.map.keys() {
            send_to(clients, id, ServerEvent::Lobby { players: players.clone() }, degraded);
        }
    }

    fn lobby_snapshot(&self, clients: &Clients) -> Vec<PlayerSummary> {
        self.players
            .iter()
            .filter_map(|(id, player)| clients.map.get(id).map(|c| (c.join_order, player)))
            .sorted_by_key(|&(join_order, _)| join_order)
            .map(|(_, player)| PlayerSummary { name: player.name.clone(), ready: player.is_ready })
            .collect()
    }
}

// Delivery is best-effort and must never block the coordinator: the
// outbound queues are bounded and a full or closed queue marks the
// recipient degraded instead of stalling everyone else.
fn send_to(clients: &Clients, id: ClientId, event: ServerEvent, degraded: &mut Vec<ClientId>) {
    let Some(client) = clients.map.get(&id) else {
        return;
    };
    if client.events_tx.try_send(event).is_err() && !degraded.contains(&id) {
        degraded.push(id);
    }
}

fn spawn_countdown_timer(
    seq: MatchSeq, cancel: Arc<CountdownCancel>, events_tx: SyncSender<IncomingEvent>,
) {
    thread::spawn(move || {
        for _ in 0..COUNTDOWN_START_VALUE {
            if !cancel.wait_tick(COUNTDOWN_TICK_INTERVAL) {
                return;
            }
            if events_tx.send(IncomingEvent::CountdownTick(seq)).is_err() {
                return;
            }
        }
    });
}
