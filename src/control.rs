//! The control channel.
//!
//! A line-oriented TCP protocol for the command-line client: one command
//! per connection, one text reply, then the server closes. Mutations go
//! through the same Store the DNS and HTTP tasks read, and invalidate the
//! answer cache where needed so the next query observes the change.

use std::sync::Arc;

use hickory_proto::rr::RecordType;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::blocklist::ListCompiler;
use crate::cache::AnswerKey;
use crate::config::parse_duration;
use crate::error::Result;
use crate::store::{canonical, Store};

/// The control command dispatcher.
pub struct ControlServer {
    store: Arc<Store>,
    compiler: Arc<ListCompiler>,
}

impl ControlServer {
    #[must_use]
    pub fn new(store: Arc<Store>, compiler: Arc<ListCompiler>) -> Self {
        Self { store, compiler }
    }

    /// Serve control connections until the listener fails fatally.
    pub async fn run(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!(addr = %listener.local_addr()?, "control listener started");

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!(error = %err, "control accept failed");
                    continue;
                }
            };

            let server = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(err) = server.serve_connection(stream).await {
                    debug!(peer = %peer, error = %err, "control connection ended with error");
                }
            });
        }
    }

    async fn serve_connection(&self, stream: TcpStream) -> std::io::Result<()> {
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).await?;

        let reply = self.dispatch(line.trim()).await;

        let mut stream = reader.into_inner();
        stream.write_all(reply.as_bytes()).await?;
        stream.write_all(b"\n").await?;
        stream.shutdown().await
    }

    /// Execute one command line and return the reply text.
    pub async fn dispatch(&self, line: &str) -> String {
        let words: Vec<&str> = line.split_whitespace().collect();

        match words.as_slice() {
            ["host", "add", names @ ..] if !names.is_empty() => {
                for name in names {
                    self.store.hosts.add(name);
                    self.invalidate(name);
                }
                format!("added {} hosts", names.len())
            }
            ["host", "rm", names @ ..] if !names.is_empty() => {
                for name in names {
                    self.store.hosts.remove(name);
                    self.invalidate(name);
                }
                format!("removed {} hosts", names.len())
            }
            ["regexp", "add", patterns @ ..] if !patterns.is_empty() => {
                let mut errors = Vec::new();
                for pattern in patterns {
                    if let Err(err) = self.store.regexps.add(pattern) {
                        errors.push(format!("{pattern}: {err}"));
                    }
                }
                if errors.is_empty() {
                    format!("added {} regexps", patterns.len())
                } else {
                    format!("errors:\n{}", errors.join("\n"))
                }
            }
            ["regexp", "rm", patterns @ ..] if !patterns.is_empty() => {
                for pattern in patterns {
                    self.store.regexps.remove(pattern);
                }
                format!("removed {} regexps", patterns.len())
            }
            ["override", host, duration] => match parse_duration(duration) {
                Ok(secs) => match canonical(host) {
                    Some(name) => {
                        self.store.overrides.allow(&name, secs);
                        self.invalidate(&name);
                        format!("overriding {name} for {secs}s")
                    }
                    None => "bad host".to_string(),
                },
                Err(err) => err.to_string(),
            },
            ["reload"] => match self.compiler.refresh(&self.store).await {
                Ok(()) => format!("reloaded; blocking {} hosts", self.store.hosts.len()),
                Err(err) => format!("reload failed: {err}"),
            },
            ["compile"] => match self.compiler.write_snapshot(&self.store).await {
                Ok(()) => format!("compiled {} hosts", self.store.hosts.len()),
                Err(err) => format!("compile failed: {err}"),
            },
            ["status"] => format!(
                "hosts: {}\nregexps: {}\nsurrogates: {}\noverrides: {}\ncached answers: {}",
                self.store.hosts.len(),
                self.store.regexps.len(),
                self.store.surrogates.len(),
                self.store.overrides.len(),
                self.store.answers.entry_count(),
            ),
            _ => format!("unknown command: {line}"),
        }
    }

    /// Drop cached answers for a host so the next query sees the new state.
    fn invalidate(&self, host: &str) {
        if let Some(name) = canonical(host) {
            self.store.answers.remove([
                AnswerKey::new(RecordType::A, name.clone()),
                AnswerKey::new(RecordType::AAAA, name),
            ]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use hickory_proto::op::ResponseCode;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    use crate::config::Config;

    fn setup() -> (Arc<Store>, Arc<ControlServer>, TempDir) {
        let temp = TempDir::new().unwrap();
        let config = Config::parse(&format!("cache-dir {}", temp.path().display())).unwrap();
        let store = Arc::new(Store::new(Duration::from_secs(300)));
        let compiler = Arc::new(ListCompiler::new(Arc::new(config)).unwrap());
        let server = Arc::new(ControlServer::new(Arc::clone(&store), compiler));
        (store, server, temp)
    }

    #[tokio::test]
    async fn should_add_and_remove_hosts() {
        let (store, server, _temp) = setup();

        let reply = server.dispatch("host add tracker.example ads.example").await;
        assert_eq!(reply, "added 2 hosts");
        assert!(store.hosts.contains("tracker.example"));

        let reply = server.dispatch("host rm tracker.example").await;
        assert_eq!(reply, "removed 1 hosts");
        assert!(!store.hosts.contains("tracker.example"));
        assert!(store.hosts.contains("ads.example"));
    }

    #[tokio::test]
    async fn should_invalidate_cached_answers_on_host_add() {
        let (store, server, _temp) = setup();
        store.answers.put(
            AnswerKey::new(RecordType::A, "tracker.example"),
            ResponseCode::NoError,
            vec![],
            Duration::from_secs(60),
        );

        server.dispatch("host add tracker.example").await;

        assert!(store
            .answers
            .get(&AnswerKey::new(RecordType::A, "tracker.example"))
            .is_none());
    }

    #[tokio::test]
    async fn should_manage_regexps() {
        let (store, server, _temp) = setup();

        let reply = server.dispatch("regexp add ^ads\\.").await;
        assert_eq!(reply, "added 1 regexps");
        assert!(store.regexps.matches("ads.example"));

        let reply = server.dispatch("regexp add (unclosed").await;
        assert!(reply.starts_with("errors:"));

        server.dispatch("regexp rm ^ads\\.").await;
        assert!(!store.regexps.matches("ads.example"));
    }

    #[tokio::test]
    async fn should_set_overrides() {
        let (store, server, _temp) = setup();

        let reply = server.dispatch("override www.tracker.example 1h").await;
        assert_eq!(reply, "overriding tracker.example for 3600s");
        assert!(store.overrides.is_allowed("tracker.example"));

        let reply = server.dispatch("override tracker.example soon").await;
        assert!(reply.contains("invalid duration"));
    }

    #[tokio::test]
    async fn should_report_status() {
        let (store, server, _temp) = setup();
        store.hosts.add("tracker.example");

        let reply = server.dispatch("status").await;
        assert!(reply.contains("hosts: 1"));
        assert!(reply.contains("regexps: 0"));
    }

    #[tokio::test]
    async fn should_answer_unknown_commands() {
        let (_store, server, _temp) = setup();
        let reply = server.dispatch("frobnicate all the things").await;
        assert_eq!(reply, "unknown command: frobnicate all the things");
    }

    #[tokio::test]
    async fn should_write_snapshot_on_compile() {
        let (store, server, temp) = setup();
        store.hosts.add("tracker.example");

        let reply = server.dispatch("compile").await;
        assert_eq!(reply, "compiled 1 hosts");
        assert_eq!(
            std::fs::read_to_string(temp.path().join("compiled")).unwrap(),
            "tracker.example\n"
        );
    }

    #[tokio::test]
    async fn should_serve_one_command_per_connection() {
        let (store, server, _temp) = setup();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(server.run(listener));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"host add tracker.example\n").await.unwrap();

        let mut reply = String::new();
        stream.read_to_string(&mut reply).await.unwrap();

        assert_eq!(reply.trim(), "added 1 hosts");
        assert!(store.hosts.contains("tracker.example"));
    }
}
