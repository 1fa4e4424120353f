//! Client-facing MySQL listener.
//!
//! Every accepted connection gets its own [`Session`]. Both backends are
//! opened before the handshake, so a client is only greeted once its session
//! can serve statements.

use crate::auth::{generate_salt, ProxyCredentials};
use crate::relay::{decode_param, param_columns, prepared_columns, relay_error, write_outcome};
use crate::session::{Session, SessionConfig, SessionError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use opensrv_mysql::{
    AsyncMysqlIntermediary, AsyncMysqlShim, ErrorKind, InitWriter, ParamParser, QueryResultWriter,
    StatementMetaWriter,
};
use shadow_core::{Backend, Outcome, Role};
use shadow_mysql_backend::{BackendEndpoint, MySqlBackend};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWrite;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};

/// Creates the backend pair for a new session.
pub trait BackendFactory: Send + Sync + 'static {
    fn create(&self, role: Role) -> Box<dyn Backend>;
}

/// Connects sessions to two MySQL-protocol servers.
#[derive(Debug, Clone)]
pub struct MySqlBackendFactory {
    pub reference: BackendEndpoint,
    pub candidate: BackendEndpoint,
    pub connect_timeout: Duration,
}

impl BackendFactory for MySqlBackendFactory {
    fn create(&self, role: Role) -> Box<dyn Backend> {
        let endpoint = match role {
            Role::Reference => self.reference.clone(),
            Role::Candidate => self.candidate.clone(),
        };
        Box::new(MySqlBackend::new(endpoint, self.connect_timeout))
    }
}

/// Protocol handler for one client connection.
///
/// The session is shared with the connection task, which finalizes it once
/// the client is gone.
pub struct ShadowShim {
    session: Arc<Mutex<Session>>,
    credentials: ProxyCredentials,
    salt: [u8; 20],
    connection_id: u32,
}

impl ShadowShim {
    pub fn new(session: Arc<Mutex<Session>>, credentials: ProxyCredentials, connection_id: u32) -> Self {
        Self {
            session,
            credentials,
            salt: generate_salt(),
            connection_id,
        }
    }
}

/// Errors that end the client connection.
fn disconnect(err: SessionError) -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, err.to_string())
}

fn ensure_alive(session: &Session) -> io::Result<()> {
    if session.is_terminated() {
        return Err(io::Error::new(
            io::ErrorKind::ConnectionAborted,
            format!("Session {} terminated", session.id()),
        ));
    }
    Ok(())
}

#[async_trait]
impl<W: AsyncWrite + Send + Unpin> AsyncMysqlShim<W> for ShadowShim {
    type Error = io::Error;

    fn connect_id(&self) -> u32 {
        self.connection_id
    }

    fn salt(&self) -> [u8; 20] {
        self.salt
    }

    async fn authenticate(
        &self,
        auth_plugin: &str,
        username: &[u8],
        salt: &[u8],
        auth_data: &[u8],
    ) -> bool {
        let accepted = self.credentials.verify(auth_plugin, username, salt, auth_data);
        if !accepted {
            warn!(
                "Session {}: authentication failed for user '{}' ({})",
                self.connection_id,
                String::from_utf8_lossy(username),
                auth_plugin
            );
        }
        accepted
    }

    async fn on_prepare<'a>(
        &'a mut self,
        query: &'a str,
        info: StatementMetaWriter<'a, W>,
    ) -> io::Result<()> {
        let mut session = self.session.lock().await;
        let (id, outcome) = session.prepare(query).await.map_err(disconnect)?;
        ensure_alive(&session)?;
        match outcome {
            Outcome::Prepared(shape) => {
                let params = param_columns(&shape);
                let columns = prepared_columns(&shape);
                info.reply(id, &params, &columns).await
            }
            Outcome::Failure(failure) => {
                let (kind, message) = relay_error(&failure);
                info.error(kind, message.as_bytes()).await
            }
            Outcome::Rows(_) => {
                info.error(
                    ErrorKind::ER_UNKNOWN_ERROR,
                    b"Prepare returned a result set".as_slice(),
                )
                .await
            }
        }
    }

    async fn on_execute<'a>(
        &'a mut self,
        id: u32,
        params: ParamParser<'a>,
        results: QueryResultWriter<'a, W>,
    ) -> io::Result<()> {
        let mut values = Vec::new();
        for param in params {
            match decode_param(param.value.into_inner(), param.coltype) {
                Ok(value) => values.push(value),
                Err(e) => {
                    return results
                        .error(ErrorKind::ER_UNKNOWN_ERROR, e.to_string().as_bytes())
                        .await
                }
            }
        }

        let mut session = self.session.lock().await;
        let outcome = session
            .execute_prepared(id, &values)
            .await
            .map_err(disconnect)?;
        ensure_alive(&session)?;
        write_outcome(&outcome, results).await
    }

    async fn on_close<'a>(&'a mut self, stmt: u32)
    where
        W: 'async_trait,
    {
        self.session.lock().await.close_prepared(stmt).await;
    }

    async fn on_query<'a>(
        &'a mut self,
        query: &'a str,
        results: QueryResultWriter<'a, W>,
    ) -> io::Result<()> {
        let mut session = self.session.lock().await;
        let outcome = session.handle_query(query).await.map_err(disconnect)?;
        ensure_alive(&session)?;
        write_outcome(&outcome, results).await
    }

    async fn on_init<'a>(&'a mut self, database: &'a str, writer: InitWriter<'a, W>) -> io::Result<()> {
        let mut session = self.session.lock().await;
        let outcome = session.use_database(database).await.map_err(disconnect)?;
        ensure_alive(&session)?;
        match outcome.as_failure() {
            Some(failure) => {
                let (kind, message) = relay_error(failure);
                writer.error(kind, message.as_bytes()).await
            }
            None => writer.ok().await,
        }
    }
}

/// Accepts client connections and runs one session per connection.
pub struct Proxy {
    factory: Arc<dyn BackendFactory>,
    credentials: ProxyCredentials,
    config: SessionConfig,
    next_session_id: AtomicU32,
}

impl Proxy {
    pub fn new(
        factory: Arc<dyn BackendFactory>,
        credentials: ProxyCredentials,
        config: SessionConfig,
    ) -> Self {
        Self {
            factory,
            credentials,
            config,
            next_session_id: AtomicU32::new(1),
        }
    }

    /// Serve clients until `shutdown` fires. Sessions already running are
    /// left to finish on their own tasks.
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        let local = listener
            .local_addr()
            .context("Failed to read listener address")?;
        info!("Listening for MySQL clients on {}", local);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Received shutdown signal, no longer accepting clients");
                    break;
                }
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!("Failed to accept client connection: {}", e);
                            continue;
                        }
                    };
                    let proxy = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = proxy.handle_connection(stream, peer).await {
                            error!("{:#}", e);
                        }
                    });
                }
            }
        }
        Ok(())
    }

    /// Run one client connection from backend connect to session close.
    pub async fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) -> Result<()> {
        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        debug!("Session {}: accepted client {}", id, peer);

        let mut session = Session::new(
            id,
            self.factory.create(Role::Reference),
            self.factory.create(Role::Candidate),
            &self.config,
        );
        // Dropping the stream un-greeted rejects the client
        session
            .initialize()
            .await
            .with_context(|| format!("Session {id}: rejected client {peer}"))?;
        info!("Session {}: client {} connected", id, peer);

        let session = Arc::new(Mutex::new(session));
        let shim = ShadowShim::new(Arc::clone(&session), self.credentials.clone(), id);
        let (reader, writer) = stream.into_split();
        let served = AsyncMysqlIntermediary::run_on(shim, reader, writer).await;

        let finalized = session.lock().await.finalize().await;
        info!("Session {}: client {} disconnected", id, peer);

        if let Err(e) = served {
            debug!("Session {}: connection ended with: {}", id, e);
        }
        finalized.with_context(|| format!("Session {id}: failed to close backends"))
    }
}

