//! Process entry point: parses the fixed `<udp-port> <own-id>
//! <peer-id>...` argv grammar, wires up the real UDP transport, and runs
//! the event loop. Everything interesting lives in the library; this is
//! the thin external collaborator the core spec treats as out of scope.

use std::net::SocketAddr;
use std::process;

use log::error;

use rusty_raft_kv::{Config, Replica, UdpTransport};

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("usage: {} <udp-port> <own-id> <peer-id>...", args[0]);
        process::exit(1);
    }

    let port: u16 = match args[1].parse() {
        Ok(p) => p,
        Err(e) => {
            eprintln!("invalid port {:?}: {}", args[1], e);
            process::exit(1);
        }
    };
    let own_id = args[2].clone();
    let peers: Vec<String> = args[3..].to_vec();

    let relay_addr: SocketAddr = ([127, 0, 0, 1], port).into();
    let transport = match UdpTransport::connect(relay_addr) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("failed to bind UDP socket: {}", e);
            process::exit(1);
        }
    };

    let config = Config::new(own_id, peers);
    let mut replica = Replica::new(config, transport);

    if let Err(e) = replica.announce() {
        error!("failed to send startup announcement: {}", e);
    }

    match replica.run() {
        Ok(()) => process::exit(0),
        Err(e) => {
            error!("fatal: {}", e);
            process::exit(1);
        }
    }
}
