use std::net::Ipv4Addr;
use std::path::PathBuf;

use clap::Parser;
use dotenv::dotenv;
use meshsock::{client, setup_tracing, AppResult, Endpoint, EndpointConfig};
use tracing::info;

#[derive(Parser)]
#[command(version)]
pub struct CommandLine {
    /// path to config file
    #[arg(short, long)]
    pub conf: Option<String>,
    /// directory for log files
    #[arg(long, default_value = "./logs")]
    pub log_dir: String,
    #[command(subcommand)]
    pub command: Option<Command>,
    /// log level (v: info, vv: debug, vvv: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Parser)]
pub enum Command {
    /// run the echo endpoint (default)
    Serve,
    /// send one message and print the reply
    Send {
        /// endpoint address, defaults to network.ip
        #[arg(long)]
        host: Option<Ipv4Addr>,
        /// endpoint port, defaults to network.port
        #[arg(long)]
        port: Option<u16>,
        /// read the reply as a fixed-length record instead of up to the delimiter
        #[arg(long)]
        raw: bool,
        message: String,
    },
    PrintConfig,
}

fn main() -> AppResult<()> {
    dotenv().ok();
    let commandline: CommandLine = CommandLine::parse();

    let _tracing_guard = setup_tracing(&commandline.log_dir, commandline.verbose)?;

    let config_path = commandline.conf.as_ref().map_or_else(
        || {
            let mut path = PathBuf::from("./");
            path.push("conf.toml");
            path
        },
        PathBuf::from,
    );
    let config = EndpointConfig::load_or_default(config_path);

    match commandline.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let endpoint = Endpoint::bind(config)?;
            endpoint.run()?;
        }
        Command::Send {
            host,
            port,
            raw,
            message,
        } => {
            let host = match host {
                Some(host) => host,
                None => config.network.ipv4()?,
            };
            let port = port.unwrap_or(config.network.port);
            let delimiter = config.stream.delimiter.as_bytes();
            let reply = if raw {
                let mut frame = message.clone().into_bytes();
                frame.extend_from_slice(delimiter);
                client::fetch_record(host, port, &frame, frame.len(), config.stream.buffer_size)?
            } else {
                client::request(host, port, message.as_bytes(), delimiter)?
            };
            info!("reply of {} bytes", reply.len());
            println!("{}", String::from_utf8_lossy(&reply));
        }
        Command::PrintConfig => {
            println!("{:#?}", config);
        }
    }

    Ok(())
}
