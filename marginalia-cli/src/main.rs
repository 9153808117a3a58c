//! Marginalia: shared scripture annotations with live updates.
//!
//! ```text
//! marginalia broker               run the fan-out broker with an in-memory store
//!                                 fed from stdin, one JSON request per line
//! marginalia render DOC ANNS      print the overlay segments of a document
//! marginalia watch                connect as a reader and print live events
//! marginalia health               probe the broker's /health endpoint
//! marginalia demo                 two readers annotating against a local broker
//! ```
//!
//! Logging goes through `env_logger`; set `RUST_LOG=debug` for detail.

mod demo;
mod feed;
mod render;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use marginalia_collab::{
    health_check, Broker, BrokerConfig, ClientConfig, LiveClient, LiveEvent, MemoryStore,
    ReadOnlyStore, DEFAULT_PROBE_TIMEOUT,
};
use marginalia_core::{Author, CollectionMode};

#[derive(Debug, Parser)]
#[command(
    name = "marginalia",
    version,
    about = "Shared scripture annotations with live updates"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the WebSocket broker and an in-memory store.
    ///
    /// Submit, comment and like requests are read from standard input, one
    /// JSON object per line, then stored and published to every reader.
    Broker {
        #[arg(long, env = "MARGINALIA_BIND", default_value = "127.0.0.1:9090")]
        bind: String,

        /// Frames buffered per reader before it starts losing them.
        #[arg(long, default_value_t = 256)]
        capacity: usize,
    },

    /// Print the overlay segments of a document.
    Render {
        /// Document JSON: {"key", "kind", "segments": [{"id", "text"}]}.
        document: PathBuf,

        /// Annotation JSON array.
        annotations: Option<PathBuf>,

        /// Live selection as START:END.
        #[arg(long)]
        selection: Option<String>,

        /// Emit verse-number markers as their own segments.
        #[arg(long)]
        markers: bool,
    },

    /// Connect as a reader and print live events until interrupted.
    Watch {
        #[arg(long, env = "MARGINALIA_URL", default_value = "ws://127.0.0.1:9090/")]
        url: String,

        #[arg(long, env = "MARGINALIA_USER_ID")]
        user_id: String,

        #[arg(long, env = "MARGINALIA_USER_NAME")]
        user_name: Option<String>,

        /// Newest-first ordering instead of document order.
        #[arg(long)]
        feed: bool,
    },

    /// Probe the health endpoint derived from a stream URL.
    Health {
        #[arg(long, env = "MARGINALIA_URL", default_value = "ws://127.0.0.1:9090/")]
        url: String,

        /// Give up after this many milliseconds.
        #[arg(long, default_value_t = DEFAULT_PROBE_TIMEOUT.as_millis() as u64)]
        timeout_ms: u64,
    },

    /// Run an end-to-end scenario against a local broker.
    Demo,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Broker { bind, capacity } => {
            let broker = Broker::new(BrokerConfig {
                bind_addr: bind.clone(),
                broadcast_capacity: capacity,
            });
            let store = MemoryStore::with_publisher(broker.group());
            info!("Starting broker on {bind}, reading requests from stdin");

            let requests = async {
                let stdin = tokio::io::BufReader::new(tokio::io::stdin());
                match feed::pump(stdin, &store).await {
                    Ok(applied) => info!("Request feed closed after {applied} request(s)"),
                    Err(e) => warn!("Request feed failed: {e:#}"),
                }
                std::future::pending::<()>().await
            };

            tokio::select! {
                res = broker.run() => res.with_context(|| format!("broker on {bind}"))?,
                () = requests => {}
                _ = tokio::signal::ctrl_c() => {
                    let readers = broker.group().reader_count().await;
                    info!("Shutting down, closing {readers} connection(s)");
                    broker.disconnect_all();
                }
            }
        }

        Command::Render {
            document,
            annotations,
            selection,
            markers,
        } => {
            let doc = render::load_document(&document)?;
            let annotations = match annotations {
                Some(path) => render::load_annotations(&path)?,
                None => Vec::new(),
            };
            let selection = selection.as_deref().map(render::parse_range).transpose()?;
            for segment in render::overlay(&doc, &annotations, selection, markers) {
                println!("{}", render::format_segment(&segment));
            }
        }

        Command::Watch {
            url,
            user_id,
            user_name,
            feed,
        } => {
            let name = user_name.unwrap_or_else(|| user_id.clone());
            let mode = if feed {
                CollectionMode::Feed
            } else {
                CollectionMode::Document
            };
            let config = ClientConfig::new(url, Author::new(user_id, name)).with_mode(mode);
            let mut client = LiveClient::spawn(config, Arc::new(ReadOnlyStore));
            let mut events = client
                .take_event_rx()
                .context("event receiver already taken")?;
            client.connect().await?;

            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Some(event) => print_event(&event),
                        None => break,
                    },
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            client.close().await;
        }

        Command::Health { url, timeout_ms } => {
            if health_check(&url, Duration::from_millis(timeout_ms)).await {
                println!("ok");
            } else {
                println!("unreachable");
                std::process::exit(1);
            }
        }

        Command::Demo => demo::run().await?,
    }

    Ok(())
}

fn print_event(event: &LiveEvent) {
    match event {
        LiveEvent::StateChanged(state) => println!("state: {state:?}"),
        LiveEvent::AnnotationUpserted {
            annotation_id,
            inserted,
        } => {
            let verb = if *inserted { "new" } else { "updated" };
            println!("{verb} annotation {annotation_id}");
        }
        LiveEvent::CommentAdded {
            annotation_id,
            comment,
        } => println!(
            "comment on {annotation_id} by {}: {}",
            comment.author_name, comment.content
        ),
        LiveEvent::LikeChanged {
            annotation_id,
            likes,
        } => println!("{annotation_id} now has {likes} like(s)"),
        LiveEvent::Notification(n) => println!(
            "{} annotated {} ({:?}): {}",
            n.author_name, n.document_key, n.kind, n.excerpt
        ),
        LiveEvent::ReconnectScheduled { attempt, delay } => {
            println!("reconnecting in {delay:?} (attempt {attempt})")
        }
        LiveEvent::Warning(message) => eprintln!("warning: {message}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_render_arguments() {
        let cli = Cli::try_parse_from([
            "marginalia",
            "render",
            "doc.json",
            "anns.json",
            "--selection",
            "5:14",
            "--markers",
        ])
        .unwrap();
        match cli.command {
            Command::Render {
                annotations,
                selection,
                markers,
                ..
            } => {
                assert_eq!(annotations, Some(PathBuf::from("anns.json")));
                assert_eq!(selection.as_deref(), Some("5:14"));
                assert!(markers);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_watch_requires_user() {
        let parsed =
            Cli::try_parse_from(["marginalia", "watch", "--user-id", "ada", "--feed"]).unwrap();
        assert!(matches!(
            parsed.command,
            Command::Watch { ref user_id, feed: true, .. } if user_id == "ada"
        ));
    }

    #[test]
    fn test_health_timeout_defaults_to_probe_timeout() {
        let parsed = Cli::try_parse_from(["marginalia", "health"]).unwrap();
        assert!(matches!(
            parsed.command,
            Command::Health { timeout_ms: 5000, .. }
        ));
        let parsed = Cli::try_parse_from(["marginalia", "health", "--timeout-ms", "250"]).unwrap();
        assert!(matches!(parsed.command, Command::Health { timeout_ms: 250, .. }));
    }
}
