/*
 * Copyright (C) 2025 the staticd developers
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use clap::Parser;
use log::{error, Level, LevelFilter, Log, Metadata, Record};
use signal_hook::consts::{SIGINT, SIGTERM};
use staticd::http::HttpServer;
use staticd::router::Router;
use staticd::server::Config;
use std::error::Error;
use std::path::PathBuf;
use std::process;
use std::sync::OnceLock;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

/// Console logger in the shape of the server's own output: a level tag
/// first, then a second-resolution local timestamp, then the message.
/// Warnings and errors go to stderr, everything else to stdout.
struct SimpleLogger {
    local_offset: UtcOffset,
}

impl Log for SimpleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Trace
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let now = OffsetDateTime::now_utc().to_offset(self.local_offset);

        let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

        let ts = now.format(&format).unwrap_or_default();

        let lname = match record.level() {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        };

        if record.level() <= Level::Warn {
            eprintln!("[{}] {} {}", lname, ts, record.args());
        } else {
            println!("[{}] {} {}", lname, ts, record.args());
        }
    }

    fn flush(&self) {}
}

fn init_logger() {
    static LOGGER: OnceLock<SimpleLogger> = OnceLock::new();

    let logger = LOGGER.get_or_init(|| SimpleLogger {
        local_offset: UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC),
    });

    log::set_logger(logger).unwrap();
    log::set_max_level(LevelFilter::Info);
}

#[derive(Parser, Debug)]
#[command(name = "staticd", version, about = "Non-blocking static file HTTP server")]
struct CliArgs {
    /// Port to listen on
    #[arg(short = 'p', long = "port", value_name = "p", default_value_t = 8080)]
    port: u16,

    /// Connection idle timeout in seconds (0 disables eviction)
    #[arg(
        short = 't',
        long = "conn_timeout",
        value_name = "t",
        default_value_t = 60
    )]
    conn_timeout: u64,

    /// Disable directory browsing
    #[arg(short = 'b', long = "no-browse")]
    no_browse: bool,

    /// Directory to serve files from
    #[arg(value_name = "web_root_path", default_value = "./")]
    path: PathBuf,
}

fn run(args: CliArgs) -> Result<(), Box<dyn Error>> {
    let router = Router::new(&args.path, !args.no_browse)
        .map_err(|e| format!("could not resolve web root path: {}", e))?;

    let config = Config {
        port: args.port,
        conn_timeout: args.conn_timeout,
    };

    let mut server =
        HttpServer::new(&config, router).map_err(|e| format!("failed to start server: {}", e))?;

    let stop = server.stop_handle();
    signal_hook::flag::register(SIGINT, stop.clone())?;
    signal_hook::flag::register(SIGTERM, stop)?;

    server.run();

    Ok(())
}

fn main() {
    let args = CliArgs::parse();

    init_logger();

    if let Err(e) = run(args) {
        error!("{}", e);
        process::exit(1);
    }
}
