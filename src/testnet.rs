//! Local networks of sessions for tests and demos.

use std::thread;

use crate::rpc::socket::KrpcSocket;
use crate::session::{Session, SessionBuilder};
use crate::Result;

#[derive(Debug)]
/// A local network of [Session]s listening on `127.0.0.1`.
pub struct Testnet {
    /// Endpoint of the first session, for more sessions to join through.
    pub bootstrap: String,
    pub nodes: Vec<Session>,
}

impl Testnet {
    /// Start `count` sessions one after the other, each joining through the first.
    pub fn new(count: usize) -> Result<Testnet> {
        Testnet::new_with(&SessionBuilder::default(), count)
    }

    /// Same as [Self::new] with every session configured by `builder`.
    pub fn new_with(builder: &SessionBuilder, count: usize) -> Result<Testnet> {
        let mut nodes: Vec<Session> = Vec::with_capacity(count);
        let mut bootstrap = String::new();

        for i in 0..count {
            let session = if i == 0 {
                let socket = KrpcSocket::bind("127.0.0.1:0")?;
                let endpoint = socket.local_addr().to_string();

                bootstrap.clone_from(&endpoint);
                builder.startup_on(socket, endpoint.clone(), &endpoint)?
            } else {
                builder.startup("127.0.0.1:0", &bootstrap)?
            };

            nodes.push(session);
        }

        Ok(Testnet { bootstrap, nodes })
    }

    /// Start `count` sessions at once, session `i` joining through session `i + 1`.
    ///
    /// Every socket is bound before any session starts, so each bootstrap peer is
    /// already reachable, if not yet answering.
    pub fn ring(count: usize) -> Result<Testnet> {
        Testnet::ring_with(&SessionBuilder::default(), count)
    }

    /// Same as [Self::ring] with every session configured by `builder`.
    pub fn ring_with(builder: &SessionBuilder, count: usize) -> Result<Testnet> {
        let sockets = (0..count)
            .map(|_| KrpcSocket::bind("127.0.0.1:0"))
            .collect::<Result<Vec<_>>>()?;

        let endpoints: Vec<String> = sockets
            .iter()
            .map(|socket| socket.local_addr().to_string())
            .collect();

        let results: Vec<Result<Session>> = thread::scope(|scope| {
            let handles: Vec<_> = sockets
                .into_iter()
                .enumerate()
                .map(|(i, socket)| {
                    let endpoint = endpoints[i].clone();
                    let bootstrap = &endpoints[(i + 1) % count];

                    scope.spawn(move || builder.startup_on(socket, endpoint, bootstrap))
                })
                .collect();

            handles
                .into_iter()
                .map(|handle| match handle.join() {
                    Ok(result) => result,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        });

        let nodes = results.into_iter().collect::<Result<Vec<_>>>()?;

        Ok(Testnet {
            bootstrap: endpoints.first().cloned().unwrap_or_default(),
            nodes,
        })
    }

    /// Tear down every session, handing off chunks if `republish` is set.
    pub fn teardown(self, republish: bool) {
        for session in self.nodes {
            session.teardown(republish);
        }
    }
}
