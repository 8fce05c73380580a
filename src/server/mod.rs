//! Protocol server: turns request blocks into wound fops and replies.
//!
//! The [`ServerBuilder`] provides a fluent API for configuring the volume
//! graph and limits. A [`Server`] hands out one [`Connection`] per client
//! and can drive connections over any tokio byte stream.
//!
//! # Example
//!
//! ```ignore
//! use glusterfs_core::Server;
//!
//! #[tokio::main]
//! async fn main() -> glusterfs_core::error::Result<()> {
//!     let server = Server::builder()
//!         .volume_name("brick")
//!         .subvolume(posix.clone())
//!         .build()?;
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:6996").await?;
//!     server.listen(listener).await
//! }
//! ```

mod connection;
mod fd_table;
mod mgmt;
mod table;

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;

pub use connection::Connection;
pub use fd_table::{FdTable, DEFAULT_MAX_FDS};
pub use table::{
    encode_groups, keys, marshal_reply, status_dict, DispatchTable, FopHandler, Handler,
    Unmarshal,
};

use crate::error::{GlusterError, Result};
use crate::protocol::DEFAULT_MAX_PAYLOAD_SIZE;
use crate::stack::{CallPool, PoolConfig};
use crate::transport::{serve_connection, ReplySink};
use crate::xlator::Xlator;

/// Default time allowed to flush replies after the peer disconnects.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Default volume name.
pub const DEFAULT_VOLUME_NAME: &str = "server";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Name of the server translator owning every root frame.
    pub volume_name: String,
    /// Volume specification returned by GETSPEC.
    pub spec: Option<String>,
    /// Largest accepted request payload.
    pub max_payload_size: u32,
    /// Refuse fops until the client binds a subvolume with SETVOLUME.
    pub require_handshake: bool,
    /// Open fds allowed per connection.
    pub max_fds: usize,
    /// How long a closing connection waits for queued replies to flush.
    pub drain_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            volume_name: DEFAULT_VOLUME_NAME.to_string(),
            spec: None,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            require_handshake: false,
            max_fds: DEFAULT_MAX_FDS,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

/// Root translator of every request stack.
struct ServerXlator {
    name: String,
    children: Vec<Arc<dyn Xlator>>,
}

impl Xlator for ServerXlator {
    fn name(&self) -> &str {
        &self.name
    }

    fn children(&self) -> &[Arc<dyn Xlator>] {
        &self.children
    }
}

/// State shared by every connection of a server.
pub(crate) struct Shared {
    pub(crate) pool: Arc<CallPool>,
    pub(crate) table: DispatchTable,
    pub(crate) this: Arc<dyn Xlator>,
    pub(crate) subvolumes: Vec<Arc<dyn Xlator>>,
    pub(crate) config: ServerConfig,
}

/// Builder for configuring and creating a [`Server`].
pub struct ServerBuilder {
    subvolumes: Vec<Arc<dyn Xlator>>,
    pool: Option<Arc<CallPool>>,
    pool_config: PoolConfig,
    table: DispatchTable,
    config: ServerConfig,
}

impl ServerBuilder {
    /// Create a new server builder.
    pub fn new() -> Self {
        Self {
            subvolumes: Vec::new(),
            pool: None,
            pool_config: PoolConfig::default(),
            table: DispatchTable::standard(),
            config: ServerConfig::default(),
        }
    }

    /// Export a subvolume. The first one is bound by default.
    pub fn subvolume(mut self, xlator: Arc<dyn Xlator>) -> Self {
        self.subvolumes.push(xlator);
        self
    }

    /// Use an existing call pool instead of creating one.
    pub fn pool(mut self, pool: Arc<CallPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Limits for the call pool created by `build`.
    ///
    /// Ignored when a pool is supplied with [`pool`](Self::pool).
    pub fn pool_config(mut self, config: PoolConfig) -> Self {
        self.pool_config = config;
        self
    }

    /// Set the server translator name.
    ///
    /// Default: "server"
    pub fn volume_name(mut self, name: impl Into<String>) -> Self {
        self.config.volume_name = name.into();
        self
    }

    /// Set the volume specification returned by GETSPEC.
    pub fn spec(mut self, spec: impl Into<String>) -> Self {
        self.config.spec = Some(spec.into());
        self
    }

    /// Set the largest accepted request payload.
    ///
    /// Default: 16MB
    pub fn max_payload_size(mut self, size: u32) -> Self {
        self.config.max_payload_size = size;
        self
    }

    /// Require SETVOLUME before any fop.
    pub fn require_handshake(mut self, required: bool) -> Self {
        self.config.require_handshake = required;
        self
    }

    /// Set the open fd limit per connection.
    pub fn max_fds(mut self, limit: usize) -> Self {
        self.config.max_fds = limit;
        self
    }

    /// Set how long a closing connection waits for queued replies.
    ///
    /// Default: 5s
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.config.drain_timeout = timeout;
        self
    }

    /// Replace the dispatch table.
    pub fn table(mut self, table: DispatchTable) -> Self {
        self.table = table;
        self
    }

    /// Build the server.
    ///
    /// Fails when no subvolume has been exported.
    pub fn build(self) -> Result<Server> {
        if self.subvolumes.is_empty() {
            return Err(GlusterError::Config("no subvolume exported".to_string()));
        }
        if self.config.volume_name.is_empty() {
            return Err(GlusterError::Config("empty volume name".to_string()));
        }

        let pool = self
            .pool
            .unwrap_or_else(|| CallPool::with_config(self.pool_config));
        let this: Arc<dyn Xlator> = Arc::new(ServerXlator {
            name: self.config.volume_name.clone(),
            children: self.subvolumes.clone(),
        });

        tracing::debug!(
            "server {} exporting {} subvolume(s)",
            self.config.volume_name,
            self.subvolumes.len()
        );

        Ok(Server {
            shared: Arc::new(Shared {
                pool,
                table: self.table,
                this,
                subvolumes: self.subvolumes,
                config: self.config,
            }),
        })
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A configured protocol server.
///
/// Cheap to clone; clones share the pool and dispatch table.
#[derive(Clone)]
pub struct Server {
    shared: Arc<Shared>,
}

impl Server {
    /// Create a new server builder.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Open a connection whose replies go to `sink`.
    pub fn connection(&self, sink: Arc<dyn ReplySink>) -> Connection {
        Connection::new(self.shared.clone(), sink)
    }

    /// The call pool every request stack is created in.
    pub fn pool(&self) -> &Arc<CallPool> {
        &self.shared.pool
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// Serve one client over `stream` until it disconnects.
    pub async fn serve<S>(&self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        serve_connection(self, stream).await
    }

    /// Accept clients on `listener` forever, serving each on its own task.
    pub async fn listen(&self, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, peer) = listener.accept().await?;
            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!("{}: cannot set TCP_NODELAY: {}", peer, e);
            }
            tracing::info!("accepted connection from {}", peer);

            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.serve(stream).await {
                    tracing::warn!("{}: {}", peer, e);
                }
                tracing::info!("connection from {} closed", peer);
            });
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.shared.config)
            .field("pool", &self.shared.pool)
            .field("ops", &self.shared.table.len())
            .finish()
    }
}
