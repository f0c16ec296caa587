use std::{
    collections::HashMap,
    io::{self, ErrorKind},
    net::{Shutdown, SocketAddr, TcpListener, TcpStream},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    thread,
    time::Duration,
};

use log::{debug, info, warn};
use tokio::runtime::{Builder, Handle, Runtime};

use crate::{
    backend::SearchBackend, config::ServerConfig, dispatch::Dispatcher, session::ClientId,
};

use super::{
    MessageKind, ProtocolTransport, ThreadPool, codec::PduHeader, transport::TransportError,
};

/// How long the accept loop sleeps when no connection is waiting.
const ACCEPT_POLL: Duration = Duration::from_millis(50);

type Connections = Arc<Mutex<HashMap<ClientId, TcpStream>>>;

/// Stops a running [`SearchServer`] from another thread.
#[derive(Debug, Clone)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct SearchServer {
    // Dropped first: workers still use the runtime while they wind down.
    pool: ThreadPool,
    listener: TcpListener,
    dispatcher: Dispatcher,
    runtime: Runtime,
    connections: Connections,
    next_client: AtomicU32,
    shutdown: ShutdownHandle,
}

impl SearchServer {
    /// Binds the configured address. Connections are accepted by
    /// [`SearchServer::listen`].
    pub fn new(config: ServerConfig, backend: Arc<dyn SearchBackend>) -> io::Result<Self> {
        let listener = TcpListener::bind(config.address)?;
        listener.set_nonblocking(true)?;
        let runtime = Builder::new_multi_thread().enable_all().build()?;
        let pool = ThreadPool::new(config.workers);

        Ok(Self {
            pool,
            listener,
            dispatcher: Dispatcher::new(backend, config),
            runtime,
            connections: Arc::new(Mutex::new(HashMap::new())),
            next_client: AtomicU32::new(1),
            shutdown: ShutdownHandle(Arc::new(AtomicBool::new(false))),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Accepts connections until the shutdown handle is triggered, then closes
    /// every open connection and waits for the workers to finish.
    pub fn listen(self) -> Result<(), TransportError> {
        info!("listening at {}", self.local_addr()?);

        while !self.shutdown.is_triggered() {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = self.accept(stream, peer) {
                        warn!("failed to set up connection from {peer}: {e}");
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
                Err(e) => warn!("broken connection: {e:?}"),
            }
        }

        info!("shutting down");
        if let Ok(connections) = self.connections.lock() {
            for stream in connections.values() {
                let _ = stream.shutdown(Shutdown::Both);
            }
        }
        Ok(())
    }

    fn accept(&self, stream: TcpStream, peer: SocketAddr) -> io::Result<()> {
        stream.set_nonblocking(false)?;
        let client = ClientId::new(self.next_client.fetch_add(1, Ordering::Relaxed));
        info!("client {client} connected from {peer}");

        if let Ok(mut connections) = self.connections.lock() {
            connections.insert(client, stream.try_clone()?);
        }

        let dispatcher = self.dispatcher.clone();
        let handle = self.runtime.handle().clone();
        let connections = Arc::clone(&self.connections);
        self.pool.execute(move || {
            if let Err(e) = handle_connection(stream, client, &dispatcher, &handle) {
                warn!("client {client}: {e}");
            }
            handle.block_on(dispatcher.drop_client(client));
            if let Ok(mut connections) = connections.lock() {
                connections.remove(&client);
            }
            info!("client {client} disconnected");
        });
        Ok(())
    }
}

fn handle_connection(
    stream: TcpStream,
    client: ClientId,
    dispatcher: &Dispatcher,
    runtime: &Handle,
) -> Result<(), TransportError> {
    let mut transport = ProtocolTransport::new(stream);

    while let Some(pdu) = transport.read_pdu()? {
        let disconnect = PduHeader::parse(&pdu)
            .is_ok_and(|header| header.msg == MessageKind::Disconnect.code());

        match runtime.block_on(dispatcher.dispatch(client, &pdu)) {
            Some(reply) => transport.write_pdu(&reply)?,
            None => debug!("client {client}: no reply"),
        }
        if disconnect {
            break;
        }
    }
    Ok(())
}
