use std::io::{BufWriter, ErrorKind, Write};
use std::path::PathBuf;

use anyhow::Context;
use chrono::{DateTime, Utc};
use gcp_clf::gcp::{fetch_logs, tail_logs, FetchOptions, HttpConnector, RetryPolicy};
use gcp_clf::{cancel, logger, Config, Error, RequestEntry};
use structopt::StructOpt;

fn parse_time(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|t| t.with_timezone(&Utc))
}

/// Write one log line, `Ok(false)` once the reader went away.
fn write_line(out: &mut impl Write, entry: &RequestEntry) -> anyhow::Result<bool> {
    match writeln!(out, "{}", entry) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::BrokenPipe => Ok(false),
        Err(err) => Err(err).context("write log line"),
    }
}

#[derive(Debug, StructOpt)]
#[structopt(about = "Export Firebase Hosting request logs in the Combined Log Format")]
struct Opt {
    /// Load environment variables from this file instead of `.env`
    #[structopt(parse(from_os_str), long = "env-file")]
    env_file: Option<PathBuf>,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Print the request logs of a site within a time range
    Logs {
        /// Firebase Hosting site, also billed for the read quota
        site: String,

        /// RFC 3339, defaults to no lower bound
        #[structopt(long = "start-time", parse(try_from_str = parse_time))]
        start_time: Option<DateTime<Utc>>,

        /// RFC 3339, defaults to no upper bound
        #[structopt(long = "end-time", parse(try_from_str = parse_time))]
        end_time: Option<DateTime<Utc>>,
    },
    /// Print new request logs of a site as they come in
    Stream {
        /// Firebase Hosting site, also billed for the read quota
        site: String,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let opt = Opt::from_args();

    let env_file = match opt.env_file.as_ref() {
        Some(path) => Some(
            dotenv::from_path(path)
                .with_context(|| format!("load env file {}", path.to_string_lossy()))
                .map(|_| path.clone())?,
        ),
        None => dotenv::dotenv().ok(),
    };

    let config = Config::from_env().context("load config")?;
    logger::init(config.log_level).context("initialize logger")?;
    if let Some(path) = env_file {
        log::info!("loaded env from {}", path.to_string_lossy());
    }

    let (handle, cancel) = cancel::channel();
    let stop = handle.clone();
    let _ = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("received ctrl+c signal");
            handle.cancel();
        }
    });

    let retry = RetryPolicy::new(config.max_retries);
    let connector = HttpConnector::new(config);

    let result = match opt.cmd {
        Command::Logs {
            site,
            start_time,
            end_time,
        } => {
            let opts = FetchOptions {
                start: start_time,
                end: end_time,
            };
            match fetch_logs(&connector, &site, &opts, &retry, cancel).await {
                Ok(logs) => {
                    let stdout = std::io::stdout();
                    let mut out = BufWriter::new(stdout.lock());
                    for entry in &logs {
                        if !write_line(&mut out, entry)? {
                            log::info!("stdout was closed");
                            return Ok(());
                        }
                    }
                    match out.flush() {
                        Err(err) if err.kind() != ErrorKind::BrokenPipe => {
                            return Err(err).context("flush stdout")
                        }
                        _ => Ok(()),
                    }
                }
                Err(err) => Err(err),
            }
        }
        Command::Stream { site } => {
            let stdout = std::io::stdout();
            let mut write_result = Ok(true);
            let result = tail_logs(
                &connector,
                &site,
                |entry| {
                    if !matches!(write_result, Ok(true)) {
                        return;
                    }
                    write_result = write_line(&mut stdout.lock(), &entry);
                    if !matches!(write_result, Ok(true)) {
                        stop.cancel();
                    }
                },
                cancel,
            )
            .await;

            match write_result {
                Ok(true) => result,
                Ok(false) => {
                    log::info!("stdout was closed");
                    return Ok(());
                }
                Err(err) => return Err(err),
            }
        }
    };

    match result {
        Ok(()) => Ok(()),
        Err(Error::Cancelled) => {
            log::info!("cancelled");
            Ok(())
        }
        Err(err) => Err(err).context("get logs"),
    }
}
