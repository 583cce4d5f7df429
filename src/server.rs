//! Wires the TCP acceptor, UDP discovery responder, and Master together
//! into one running server.

use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;

use crossbeam_channel::unbounded;
use tracing::info;

use crate::config::ServerConfig;
use crate::discovery::DiscoveryResponder;
use crate::error::{ServerError, ServerResult};
use crate::master::Master;
use crate::net::Acceptor;
use crate::permissions::PermissionTable;
use crate::users::load_user_table;
use crate::worker::SharedContext;

pub struct Server {
    master: Arc<Master>,
    acceptor: Acceptor,
    discovery: DiscoveryResponder,
    tcp_port: u16,
}

impl Server {
    /// Loads the user list, binds the TCP and UDP sockets, and starts
    /// every background thread. Returns once everything is listening;
    /// `run()` is what actually blocks.
    pub fn start(config: &ServerConfig) -> ServerResult<Self> {
        let share_root = config.share_root()?;
        let users = Arc::new(load_user_table(&config.user_list_path)?);
        let permissions = Arc::new(PermissionTable::default());
        let shared = Arc::new(SharedContext {
            permissions: permissions.clone(),
            share_root,
            max_transfer_size: config.max_transfer_size,
            max_packet_size: config.max_packet_size,
        });

        let bind_addr: SocketAddr = config
            .bind_address
            .parse()
            .map_err(|_| ServerError::Config(format!("invalid bind_address `{}`", config.bind_address)))?;
        let listener = TcpListener::bind(bind_addr).map_err(|source| ServerError::BindFailed {
            addr: bind_addr,
            source,
        })?;
        let tcp_port = listener
            .local_addr()
            .map_err(|e| ServerError::io(e, "reading bound tcp port"))?
            .port();

        let (accepted_tx, accepted_rx) = unbounded();
        let acceptor = Acceptor::spawn(listener, accepted_tx);
        let master = Arc::new(Master::new(users, permissions, shared, accepted_rx));

        let discovery = DiscoveryResponder::spawn(
            config.discovery_port,
            config.server_name.clone(),
            config.advertise_ip.clone(),
            tcp_port,
        )
        .map_err(|e| ServerError::io(e, "starting discovery responder"))?;

        info!(
            %bind_addr,
            tcp_port,
            discovery_port = config.discovery_port,
            server_name = %config.server_name,
            "server started"
        );

        Ok(Server {
            master,
            acceptor,
            discovery,
            tcp_port,
        })
    }

    pub fn master(&self) -> &Arc<Master> {
        &self.master
    }

    /// The TCP port actually bound — useful when `bind_address` asked for
    /// an ephemeral port (`:0`), as tests do.
    pub fn tcp_port(&self) -> u16 {
        self.tcp_port
    }

    /// The UDP port the discovery responder actually bound.
    pub fn discovery_port(&self) -> u16 {
        self.discovery.local_port()
    }

    /// Runs Master's tick loop on the calling thread until `stop()` is
    /// called from elsewhere (another thread, a signal handler).
    pub fn run(&self) {
        self.master.run();
    }

    /// Stops the coordinator and the discovery responder. The TCP
    /// acceptor thread is left blocked in `accept()` — there is no
    /// portable way to unblock it short of closing the listening socket
    /// from another thread, and on process exit it is torn down with
    /// everything else, so a full teardown is left to the process
    /// boundary rather than plumbed through here.
    pub fn stop(&mut self) {
        self.master.stop();
        self.discovery.stop();
    }
}
