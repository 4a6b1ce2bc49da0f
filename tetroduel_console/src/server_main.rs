use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::mpsc::{self, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::Context;
use log::{info, warn};
use tetroduel::event::ClientEvent;
use tetroduel::network::{self, CommunicationError};
use tetroduel::server::{ClientId, Clients, IncomingEvent, ServerState, CLIENT_QUEUE_CAPACITY};

use crate::server_config::ServerConfig;

const INCOMING_QUEUE_CAPACITY: usize = 1024;

pub fn run(config: ServerConfig) -> anyhow::Result<()> {
    let (tx, rx) = mpsc::sync_channel(INCOMING_QUEUE_CAPACITY);
    let clients = Arc::new(Mutex::new(Clients::new()));

    let coordinator_clients = Arc::clone(&clients);
    let coordinator_tx = tx.clone();
    thread::spawn(move || {
        let mut server_state = ServerState::new(coordinator_clients, coordinator_tx);
        for event in rx {
            server_state.apply_event(event);
        }
        panic!("Unexpected end of events stream");
    });

    ctrlc::set_handler(|| {
        info!("Shutting down");
        std::process::exit(0);
    })
    .context("Failed to install Ctrl-C handler")?;

    let listener = TcpListener::bind(&config.address)
        .with_context(|| format!("Failed to bind {}", config.address))?;
    info!("Listening on {}...", listener.local_addr()?);
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let tx = tx.clone();
                let clients = Arc::clone(&clients);
                thread::spawn(move || handle_connection(stream, tx, clients));
            }
            Err(err) => {
                warn!("Cannot establish connection: {}", err);
            }
        }
    }
    unreachable!("TcpListener::incoming never returns None");
}

// Runs on the reader thread. Registration happens only after a valid
// join frame; everything before that is an anonymous connection that
// can be dropped without touching the registry.
fn handle_connection(
    stream: TcpStream, tx: SyncSender<IncomingEvent>, clients: Arc<Mutex<Clients>>,
) {
    let peer_addr = match stream.peer_addr() {
        Ok(addr) => addr.to_string(),
        Err(_) => "<unknown>".to_owned(),
    };
    let mut in_stream = match stream.try_clone() {
        Ok(stream) => stream,
        Err(err) => {
            warn!("Failed to clone stream for {}: {}", peer_addr, err);
            return;
        }
    };
    let mut out_stream = stream;

    let join = match network::read_obj::<ClientEvent>(&mut in_stream) {
        Ok(ClientEvent::Join { username }) if !username.is_empty() => {
            ClientEvent::Join { username }
        }
        Ok(_) => {
            warn!("Client {} did not open with a valid join; closing", peer_addr);
            return;
        }
        Err(CommunicationError::ConnectionClosed) => {
            info!("Client {} disconnected before joining", peer_addr);
            return;
        }
        Err(err) => {
            warn!("Client {} failed the join handshake: {}; closing", peer_addr, err);
            return;
        }
    };
    info!("Client connected: {}", peer_addr);

    let (client_tx, client_rx) = mpsc::sync_channel(CLIENT_QUEUE_CAPACITY);
    let client_id = clients.lock().unwrap().add_client(client_tx, peer_addr.clone());
    if tx.send(IncomingEvent::Network(client_id, join)).is_err() {
        return;
    }

    // Server -> client
    let writer_clients = Arc::clone(&clients);
    let writer_tx = tx.clone();
    let writer_addr = peer_addr.clone();
    thread::spawn(move || {
        for event in client_rx {
            if let Err(err) = network::write_obj(&mut out_stream, &event) {
                if writer_clients.lock().unwrap().remove_client(client_id).is_some() {
                    warn!("Client {} disconnected due to write error: {}", writer_addr, err);
                }
                let _ = writer_tx.send(IncomingEvent::Disconnected(client_id));
                break;
            }
        }
        // Either a write failed or the coordinator degraded this client
        // and dropped the queue sender. Shut the socket down so the
        // reader loop exits as well.
        let _ = out_stream.shutdown(Shutdown::Both);
    });

    // Client -> server
    loop {
        let payload = match network::read_str(&mut in_stream) {
            Ok(payload) => payload,
            Err(err) => {
                finalize_connection(&clients, &tx, client_id, &peer_addr, &err);
                return;
            }
        };
        match serde_json::from_str::<ClientEvent>(&payload) {
            Ok(event) => {
                if tx.send(IncomingEvent::Network(client_id, event)).is_err() {
                    return;
                }
            }
            Err(err) => {
                // Well-formed JSON of an unrecognized kind is dropped and the
                // connection stays open; undecodable input closes it.
                if serde_json::from_str::<serde_json::Value>(&payload).is_ok() {
                    warn!("Client {} sent an unrecognized message; dropping it", peer_addr);
                } else {
                    finalize_connection(
                        &clients,
                        &tx,
                        client_id,
                        &peer_addr,
                        &CommunicationError::Serde(err),
                    );
                    return;
                }
            }
        }
    }
}

fn finalize_connection(
    clients: &Mutex<Clients>, tx: &SyncSender<IncomingEvent>, client_id: ClientId,
    peer_addr: &str, err: &CommunicationError,
) {
    if clients.lock().unwrap().remove_client(client_id).is_some() {
        match err {
            CommunicationError::ConnectionClosed => info!("Client {} disconnected", peer_addr),
            err => warn!("Client {} disconnected due to read error: {}", peer_addr, err),
        }
    }
    let _ = tx.send(IncomingEvent::Disconnected(client_id));
}
