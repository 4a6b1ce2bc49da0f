use std::io::{self, BufRead};
use std::net::TcpStream;
use std::thread;

use anyhow::Context;
use tetroduel::event::{ClientEvent, ServerEvent};
use tetroduel::network::{self, CommunicationError};

// Minimal console client for poking at a server by hand: joins under
// the given name, then maps stdin lines to protocol events and prints
// everything the server sends.
pub fn run(server_address: &str, player_name: &str) -> anyhow::Result<()> {
    let stream = TcpStream::connect(server_address)
        .with_context(|| format!("Cannot connect to {}", server_address))?;
    let mut in_stream = stream.try_clone()?;
    let mut out_stream = stream;

    network::write_obj(&mut out_stream, &ClientEvent::Join {
        username: player_name.to_owned(),
    })?;
    println!("Joined {} as {}. Commands: ready, unready, solo, quit.", server_address, player_name);

    thread::spawn(move || loop {
        match network::read_obj::<ServerEvent>(&mut in_stream) {
            Ok(event) => print_event(&event),
            Err(CommunicationError::ConnectionClosed) => {
                println!("Server closed the connection.");
                std::process::exit(0);
            }
            Err(err) => {
                eprintln!("Connection error: {}", err);
                std::process::exit(1);
            }
        }
    });

    for line in io::stdin().lock().lines() {
        let line = line?;
        let event = match line.trim() {
            "" => continue,
            "ready" => ClientEvent::Ready { ready: true },
            "unready" => ClientEvent::Ready { ready: false },
            "solo" => ClientEvent::SoloStart,
            "quit" | "exit" => break,
            other => {
                println!("Unknown command: {}", other);
                continue;
            }
        };
        network::write_obj(&mut out_stream, &event)?;
    }
    Ok(())
}

fn print_event(event: &ServerEvent) {
    match event {
        ServerEvent::Lobby { players } => {
            println!("Lobby:");
            for player in players {
                println!("  {} - {}", player.name, if player.ready { "ready" } else { "not ready" });
            }
        }
        ServerEvent::Countdown { value } => println!("Starting in {}...", value),
        ServerEvent::Start { is_solo, .. } => {
            println!("Go!{}", if *is_solo { " (solo)" } else { "" })
        }
        ServerEvent::GameCancelled => println!("Game cancelled: opponent left."),
        ServerEvent::Score { value } => println!("Opponent score: {}", value),
        ServerEvent::Board { .. } => println!("Opponent board updated."),
        ServerEvent::NextPiece { .. } => println!("Opponent drew a piece."),
        ServerEvent::HoldPiece { .. } => println!("Opponent held a piece."),
    }
}
