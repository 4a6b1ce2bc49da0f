// In-process harness: clients hold the receiving end of their own
// outbound queue and events are applied to `ServerState` directly, so
// the tests are deterministic and need no sockets. The countdown timer
// thread is disabled; ticks are injected through `tick_countdown`.

use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex};

use tetroduel::event::{ClientEvent, ServerEvent};
use tetroduel::piece::Piece;
use tetroduel::player::PlayerSummary;
use tetroduel::server::{
    ClientId, Clients, IncomingEvent, ServerState, CLIENT_QUEUE_CAPACITY,
};

pub struct Server {
    clients: Arc<Mutex<Clients>>,
    state: ServerState,
    _incoming_rx: Receiver<IncomingEvent>,
}

impl Server {
    pub fn new() -> Self {
        let clients = Arc::new(Mutex::new(Clients::new()));
        let (tx, rx): (SyncSender<IncomingEvent>, _) = mpsc::sync_channel(100);
        let mut state = ServerState::new(Arc::clone(&clients), tx);
        state.TEST_disable_countdown_timer();
        Server { clients, state, _incoming_rx: rx }
    }

    pub fn connect(&mut self, name: &str) -> TestClient {
        self.connect_with_queue_capacity(name, CLIENT_QUEUE_CAPACITY)
    }

    pub fn connect_with_queue_capacity(&mut self, name: &str, capacity: usize) -> TestClient {
        let (tx, rx) = mpsc::sync_channel(capacity);
        let id = self.clients.lock().unwrap().add_client(tx, name.to_owned());
        self.state.apply_event(IncomingEvent::Network(id, ClientEvent::Join {
            username: name.to_owned(),
        }));
        TestClient { id, events_rx: rx }
    }

    pub fn send(&mut self, client: &TestClient, event: ClientEvent) {
        self.state.apply_event(IncomingEvent::Network(client.id, event));
    }

    pub fn disconnect(&mut self, client: &TestClient) {
        self.clients.lock().unwrap().remove_client(client.id);
        self.state.apply_event(IncomingEvent::Disconnected(client.id));
    }

    pub fn countdown_in_progress(&self) -> bool {
        self.state.countdown_seq().is_some()
    }

    /// Delivers one countdown tick for the current countdown.
    pub fn tick_countdown(&mut self) {
        let seq = self.state.countdown_seq().expect("no countdown in progress");
        self.state.apply_event(IncomingEvent::CountdownTick(seq));
    }

    /// Injects a tick for a countdown that may no longer be current.
    pub fn tick_countdown_raw(&mut self, seq: tetroduel::server::MatchSeq) {
        self.state.apply_event(IncomingEvent::CountdownTick(seq));
    }

    pub fn countdown_seq(&self) -> Option<tetroduel::server::MatchSeq> {
        self.state.countdown_seq()
    }
}

pub struct TestClient {
    id: ClientId,
    events_rx: Receiver<ServerEvent>,
}

impl TestClient {
    pub fn drain(&self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events_rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[allow(dead_code)]
    pub fn next_event(&self) -> Option<ServerEvent> {
        self.events_rx.try_recv().ok()
    }

    /// The players list of the most recent `lobby` broadcast, skipping
    /// everything else received so far.
    #[allow(dead_code)]
    pub fn last_lobby(&self) -> Option<Vec<PlayerSummary>> {
        self.drain().into_iter().rev().find_map(|event| match event {
            ServerEvent::Lobby { players } => Some(players),
            _ => None,
        })
    }
}

#[allow(dead_code)]
pub fn summaries(players: &[(&str, bool)]) -> Vec<PlayerSummary> {
    players
        .iter()
        .map(|&(name, ready)| PlayerSummary { name: name.to_owned(), ready })
        .collect()
}

#[allow(dead_code)]
pub fn lobby(players: &[(&str, bool)]) -> ServerEvent {
    ServerEvent::Lobby { players: summaries(players) }
}

#[allow(dead_code)]
pub fn sample_piece(fill: u8) -> Piece {
    Piece {
        shape: vec![vec![fill, fill], vec![fill, fill]],
        col: 4,
        row: 0,
    }
}
