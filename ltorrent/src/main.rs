use clap::Parser;
use ltorrent::{config::cfg::Cfg, engine::Engine, metainfo::parser::TorrentParser};
use std::path::PathBuf;

#[derive(Parser, Debug)]
struct Args {
    /// Torrent file to download; repeat for several torrents
    #[arg(short, long, required = true)]
    file: Vec<String>,
    #[arg(short, long)]
    config: String,
}

fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config = Cfg::new(args.config.trim()).expect("Config file not found or incomplete");

    let mut torrents = Vec::new();
    for file in &args.file {
        let path = PathBuf::from(file.trim());
        let torrent = TorrentParser::parse(&path).expect("could not parse the torrent file");
        torrents.push(torrent);
    }

    let engine = Engine::new(torrents, config);
    println!("Initializing download ...");
    engine.run().expect("Failed to run the download engine");
}
