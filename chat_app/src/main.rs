// rsa_chat/chat_app/src/main.rs
//
// Interactive TCP front end for chat_core: prompts for a role and keys,
// wires the protocol to a socket, and turns protocol events into lines on
// the terminal.

use std::io::{self, Write};
use std::path::PathBuf;

use chat_core::{
    generate_keypair, recv_loop, ChatError, ChatEvent, Connection, KeyPair, Role, Session,
    StoredKeys, DEFAULT_KEY_LENGTH,
};
use inquire::{Select, Text};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

fn io_err(err: impl std::fmt::Display) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err.to_string())
}

fn stored_keys_path() -> PathBuf {
    std::env::var("LOCALAPPDATA")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("storedKeys.json")
}

fn load_stored_keys() -> Result<KeyPair, ChatError> {
    let path = stored_keys_path();
    let data = std::fs::read_to_string(&path)
        .map_err(|err| ChatError::NoStoredKey(format!("{}: {}", path.display(), err)))?;
    StoredKeys::from_json(&data)?.to_keypair()
}

fn store_keys(pair: &KeyPair) {
    let stored = StoredKeys::from_keypair(pair);
    match stored.to_json() {
        Ok(json) => {
            if let Err(err) = std::fs::write(stored_keys_path(), json) {
                eprintln!("Could not store keys: {}", err);
            }
        }
        Err(err) => eprintln!("Could not serialize keys: {}", err),
    }
}

fn initialize_keys() -> io::Result<KeyPair> {
    let choice = Select::new(
        "How do you want to initialize your RSA keys?",
        vec!["Load stored keys", "Generate new keys"],
    )
    .prompt()
    .map_err(io_err)?;

    if choice == "Load stored keys" {
        match load_stored_keys() {
            Ok(pair) => {
                println!("Stored keys loaded.");
                return Ok(pair);
            }
            Err(err) => println!("{}. Generating new keys...", err),
        }
    }

    println!(
        "Generating a {}-bit keypair, this can take a moment...",
        DEFAULT_KEY_LENGTH
    );
    let pair = generate_keypair(DEFAULT_KEY_LENGTH).map_err(io_err)?;
    store_keys(&pair);
    println!("New keys generated and stored.");
    Ok(pair)
}

async fn open_stream(role: Role, port: u16) -> io::Result<TcpStream> {
    match role {
        Role::Listener => {
            let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
            println!("Listening on port {}...", port);
            let (stream, addr) = listener.accept().await?;
            println!("Connected to {}", addr);
            Ok(stream)
        }
        Role::Initiator => {
            let host = Text::new("Server IP:")
                .with_initial_value("127.0.0.1")
                .prompt()
                .map_err(io_err)?;
            let stream = TcpStream::connect((host.as_str(), port)).await?;
            println!("Connected to server {}:{}", host, port);
            Ok(stream)
        }
    }
}

fn print_event(event: &ChatEvent) {
    match event {
        ChatEvent::Chat { nickname, text } => println!("\r{}: {}", nickname, text),
        ChatEvent::SignatureInvalid { nickname } => {
            println!("\rSignature verification failed for message from {}.", nickname)
        }
        ChatEvent::ProtocolError { detail } => println!("\rProtocol error: {}", detail),
        ChatEvent::RemoteKeyReceived => println!("\rReceived public key."),
        ChatEvent::TransportClosed { detail } => match detail {
            Some(detail) => println!("\rConnection lost: {}", detail),
            None => println!("\rPeer disconnected."),
        },
    }
}

#[tokio::main]
async fn main() -> io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    clearscreen::clear().unwrap_or_else(|err| eprintln!("Could not clear screen: {}", err));
    println!("--- RSA Chat ---");

    let key_pair = initialize_keys()?;

    let role = match Select::new("Host or connect?", vec!["Host", "Connect"])
        .prompt()
        .map_err(io_err)?
    {
        "Host" => Role::Listener,
        _ => Role::Initiator,
    };
    let port: u16 = Text::new("Port:")
        .with_initial_value("5000")
        .prompt()
        .map_err(io_err)?
        .trim()
        .parse()
        .map_err(|err| io_err(format!("invalid port: {}", err)))?;
    let nickname = {
        let name = Text::new("Nickname:")
            .with_initial_value("Anonymous")
            .prompt()
            .map_err(io_err)?;
        let name = name.trim().to_string();
        if name.is_empty() {
            "Anonymous".to_string()
        } else {
            name
        }
    };

    let stream = open_stream(role, port).await?;
    let (read_half, write_half) = stream.into_split();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let session = Session::with_key_pair(role, key_pair).shared();
    let conn = Connection::new(session, write_half, tx);

    tokio::spawn(recv_loop(read_half, conn.clone()));
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let closed = matches!(event, ChatEvent::TransportClosed { .. });
            print_event(&event);
            if closed {
                break;
            }
            print!("You: ");
            let _ = io::stdout().flush();
        }
    });

    conn.announce_key()
        .await
        .map_err(io_err)?;
    println!("Public key sent. Type messages below; /exit to quit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("You: ");
        io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if text.eq_ignore_ascii_case("/exit") {
            break;
        }
        match conn.send_chat(&nickname, text).await {
            Ok(()) => {}
            Err(ChatError::NotReady) => println!("Encryption keys not exchanged."),
            Err(err) => {
                println!("Sending error: {}", err);
                break;
            }
        }
    }

    println!("Disconnected.");
    Ok(())
}
