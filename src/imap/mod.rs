//! IMAP connector (LOGIN over TLS) using async-imap 0.11 with tokio-rustls.
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use futures::StreamExt;
use rustls_native_certs::load_native_certs;
use tokio::net::TcpStream;
use tokio_rustls::rustls::{ClientConfig, RootCertStore, ServerName};
use tokio_rustls::TlsConnector;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};
use tracing::{debug, info};

use crate::config::ImapSettings;
use crate::errors::{AppError, AppResult};
use crate::types::Uid;

type TlsSession = async_imap::Session<Compat<tokio_rustls::client::TlsStream<TcpStream>>>;

/// The mailbox commands the engine issues. One value is one authenticated
/// connection with the configured folder selected; it is not safe for
/// interleaved use and is only ever driven by the worker that owns it.
#[async_trait]
pub trait MailboxSession: Send {
    /// `UID SEARCH SINCE <date>`; day granularity, inclusive.
    async fn search_since(&mut self, since: NaiveDate) -> AppResult<Vec<Uid>>;

    /// `UID FETCH <uid> RFC822.HEADER`. `None` when the server returned no
    /// such message.
    async fn fetch_header(&mut self, uid: Uid) -> AppResult<Option<Vec<u8>>>;

    /// `UID FETCH <uid> RFC822`.
    async fn fetch_message(&mut self, uid: Uid) -> AppResult<Option<Vec<u8>>>;

    /// UIDVALIDITY reported when the folder was selected.
    fn uid_validity(&self) -> Option<u32>;

    async fn logout(&mut self) -> AppResult<()>;
}

/// Opens new authenticated sessions for the worker pool.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn connect(&self) -> AppResult<Box<dyn MailboxSession>>;
}

/// Formats a cutoff the way IMAP SEARCH expects it (`01-Feb-2025`). chrono's
/// month names are English regardless of the process locale.
pub fn imap_date(date: NaiveDate) -> String {
    date.format("%d-%b-%Y").to_string()
}

pub struct ImapConnector {
    settings: ImapSettings,
    tls: TlsConnector,
}

impl ImapConnector {
    pub fn new(settings: ImapSettings) -> AppResult<Self> {
        // Create TLS config with native root certificates
        let mut root_store = RootCertStore::empty();
        let certs = load_native_certs()
            .map_err(|e| AppError::Config(format!("failed to load native certs: {e}")))?;
        for cert in certs {
            root_store
                .add(&tokio_rustls::rustls::Certificate(cert.0))
                .map_err(|e| AppError::Config(format!("failed to add cert to root store: {e}")))?;
        }

        let config = ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        Ok(Self {
            settings,
            tls: TlsConnector::from(Arc::new(config)),
        })
    }
}

#[async_trait]
impl SessionFactory for ImapConnector {
    async fn connect(&self) -> AppResult<Box<dyn MailboxSession>> {
        let host = self.settings.host.as_str();
        let port = self.settings.port;

        let connect = async {
            let tcp = TcpStream::connect((host, port))
                .await
                .map_err(|e| AppError::Connection(format!("connecting to {host}:{port}: {e}")))?;

            let server_name = ServerName::try_from(host)
                .map_err(|e| AppError::Config(format!("invalid DNS name {host}: {e}")))?;
            let tls_stream = self
                .tls
                .connect(server_name, tcp)
                .await
                .map_err(|e| AppError::Connection(format!("starting TLS for IMAP: {e}")))?;

            // Convert tokio AsyncRead/AsyncWrite to futures AsyncRead/AsyncWrite
            let mut client = async_imap::Client::new(tls_stream.compat());

            client
                .read_response()
                .await
                .map_err(|e| AppError::Connection(format!("reading IMAP greeting: {e}")))?
                .ok_or_else(|| {
                    AppError::Connection("unexpected end of stream, expected greeting".into())
                })?;

            let mut session = client
                .login(&self.settings.username, &self.settings.password)
                .await
                .map_err(|(err, _client)| login_error(err))?;

            let mailbox = session
                .select(&self.settings.folder)
                .await
                .map_err(|e| imap_error(e, &format!("SELECT {}", self.settings.folder)))?;

            info!(
                host = %host,
                folder = %self.settings.folder,
                exists = mailbox.exists,
                uidvalidity = ?mailbox.uid_validity,
                "IMAP session ready"
            );

            Ok::<_, AppError>(ImapMailbox {
                session,
                uid_validity: mailbox.uid_validity,
            })
        };

        let mailbox = tokio::time::timeout(self.settings.timeout, connect)
            .await
            .map_err(|_| AppError::Timeout(format!("connecting to {host}:{port}")))??;

        Ok(Box::new(mailbox))
    }
}

pub struct ImapMailbox {
    session: TlsSession,
    uid_validity: Option<u32>,
}

impl ImapMailbox {
    async fn fetch_one(&mut self, uid: Uid, query: &str) -> AppResult<Option<Vec<u8>>> {
        let mut stream = self
            .session
            .uid_fetch(uid.to_string(), query)
            .await
            .map_err(|e| imap_error(e, &format!("UID FETCH {uid} {query}")))?;

        // Drain the whole response so the session is clean for the next command.
        let mut payload = None;
        while let Some(item) = stream.next().await {
            let fetch = item.map_err(|e| imap_error(e, &format!("UID FETCH {uid} {query}")))?;
            if fetch.uid.is_some_and(|u| u != uid) {
                continue;
            }
            let bytes = match query {
                "RFC822.HEADER" => fetch.header(),
                _ => fetch.body(),
            };
            if let Some(bytes) = bytes {
                payload = Some(bytes.to_vec());
            }
        }

        Ok(payload)
    }
}

#[async_trait]
impl MailboxSession for ImapMailbox {
    async fn search_since(&mut self, since: NaiveDate) -> AppResult<Vec<Uid>> {
        let query = format!("SINCE {}", imap_date(since));
        let found = self
            .session
            .uid_search(&query)
            .await
            .map_err(|e| imap_error(e, &format!("UID SEARCH {query}")))?;

        let mut uids: Vec<Uid> = found.into_iter().collect();
        uids.sort_unstable();
        debug!(query = %query, matches = uids.len(), "UID SEARCH completed");
        Ok(uids)
    }

    async fn fetch_header(&mut self, uid: Uid) -> AppResult<Option<Vec<u8>>> {
        self.fetch_one(uid, "RFC822.HEADER").await
    }

    async fn fetch_message(&mut self, uid: Uid) -> AppResult<Option<Vec<u8>>> {
        self.fetch_one(uid, "RFC822").await
    }

    fn uid_validity(&self) -> Option<u32> {
        self.uid_validity
    }

    async fn logout(&mut self) -> AppResult<()> {
        self.session
            .logout()
            .await
            .map_err(|e| imap_error(e, "LOGOUT"))
    }
}

fn login_error(err: async_imap::error::Error) -> AppError {
    use async_imap::error::Error;
    match err {
        Error::No(msg) | Error::Bad(msg) => AppError::Authentication(msg),
        other => AppError::Connection(format!("LOGIN: {other}")),
    }
}

fn imap_error(err: async_imap::error::Error, command: &str) -> AppError {
    use async_imap::error::Error;
    match err {
        Error::No(msg) | Error::Bad(msg) => AppError::Protocol(format!("{command}: {msg}")),
        other => AppError::Connection(format!("{command}: {other}")),
    }
}
