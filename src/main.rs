use clap::Parser;
use mcp_shark::SharkError;
use mcp_shark::cli::{self, Cli, Command};
use mcp_shark::config::{load_config, resolve_db_path};
use std::io::Read;
use std::process::ExitCode;

fn run() -> Result<(), SharkError> {
    let cli = Cli::parse();
    let config = load_config()?;
    let db_path = resolve_db_path(cli.db.as_deref(), &config);

    match cli.command {
        Command::Init => cli::handle_init(&db_path),
        Command::Record => {
            let mut input = String::new();
            std::io::stdin().read_to_string(&mut input)?;
            cli::handle_record(&db_path, &input)
        }
        Command::Packets(args) => cli::handle_packets(&db_path, args),
        Command::Requests(args) => cli::handle_requests(&db_path, args),
        Command::Conversations(args) => cli::handle_conversations(&db_path, args),
        Command::Sessions(args) => cli::handle_sessions(&db_path, args),
        Command::Session(args) => cli::handle_session(&db_path, args),
        Command::Stats(args) => cli::handle_stats(&db_path, args),
        Command::Reap(args) => cli::handle_reap(&db_path, args, &config),
        Command::Serve => mcp_shark::serve::handle_serve(&db_path, &config),
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("mcp-shark: {e}");
            ExitCode::from(1)
        }
    }
}
