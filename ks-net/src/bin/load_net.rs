use std::process::exit;

use itertools::Itertools;

use ks_net::network::Network;

fn main() {
    let args = std::env::args().collect_vec();
    if args.len() != 3 {
        eprintln!("Usage: load_net <net.json> <net.bin>");
        exit(1);
    }

    let mut network = Network::new();
    if let Err(e) = network.load(&args[1], &args[2]) {
        eprintln!("Failed to load network: {}", e);
        exit(1);
    }

    println!("{}", network);
}
