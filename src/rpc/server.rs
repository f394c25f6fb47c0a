//! Threads serving inbound requests: one listener feeding a pool of handlers.

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, trace};

use crate::common::RequestSpecific;
use crate::Result;

use super::socket::KrpcSocket;
use super::Rpc;

type InboundRequest = (u16, RequestSpecific, SocketAddr);

#[derive(Debug)]
pub(crate) struct Server {
    listener: JoinHandle<()>,
    handlers: Vec<JoinHandle<()>>,
}

impl Server {
    /// Start serving requests on `socket` until `rpc` starts dying.
    pub fn start(rpc: Arc<Rpc>, socket: KrpcSocket) -> Result<Server> {
        let socket = Arc::new(socket);
        let (sender, receiver) = flume::unbounded::<InboundRequest>();

        let handlers = (0..rpc.config().handler_threads.max(1))
            .map(|i| {
                let rpc = rpc.clone();
                let socket = socket.clone();
                let receiver = receiver.clone();

                thread::Builder::new()
                    .name(format!("chunkdht handler {i}"))
                    .spawn(move || {
                        // Ends once the listener drops the sender.
                        while let Ok((transaction_id, request, from)) = receiver.recv() {
                            rpc.handle_request(&socket, from, transaction_id, request);
                        }
                    })
            })
            .collect::<std::io::Result<Vec<_>>>()?;

        let listener = thread::Builder::new()
            .name("chunkdht listener".to_string())
            .spawn(move || {
                debug!(address = ?socket.local_addr(), "Listening");

                while !rpc.is_dying() {
                    if let Some(inbound) = socket.recv_request() {
                        if sender.send(inbound).is_err() {
                            break;
                        }
                    }
                }

                trace!(address = ?socket.local_addr(), "Listener stopped");
            })?;

        Ok(Server { listener, handlers })
    }

    /// Wait for the listener and every handler to finish.
    pub fn join(self) {
        let _ = self.listener.join();

        for handler in self.handlers {
            let _ = handler.join();
        }
    }
}
