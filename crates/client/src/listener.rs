//! TCP listener receiving suspension pushes from the authority.

use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

use warden_core::{now_millis, types::PolicyId, Error, Result};
use warden_notifier::{decode_event, read_frame};

use crate::cache::SuspensionCache;

/// Names of the policies this enforcement point governs, by id.
pub type PolicyNames = DashMap<PolicyId, String>;

/// Running push listener.
pub struct EventListener {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl EventListener {
    /// Bind `host:port` and start writing pushed suspensions into `cache`.
    /// Port 0 binds an ephemeral port; see [`EventListener::local_addr`].
    pub async fn bind(
        host: &str,
        port: u16,
        cache: Arc<SuspensionCache>,
        names: Arc<PolicyNames>,
    ) -> Result<Self> {
        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|e| Error::transport(format!("cannot bind push listener on {}:{}: {}", host, port, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| Error::transport(format!("push listener has no address: {}", e)))?;

        let (shutdown, mut stop) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut connections = JoinSet::new();

            loop {
                tokio::select! {
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            tracing::trace!(peer = %peer, "Push connection accepted");
                            connections.spawn(receive(stream, peer, cache.clone(), names.clone()));
                        }
                        Err(e) => tracing::warn!(error = %e, "Push accept failed"),
                    },
                    Some(_) = connections.join_next(), if !connections.is_empty() => {}
                    _ = stop.changed() => break,
                }
            }

            connections.shutdown().await;
            tracing::debug!("Push listener stopped");
        });

        tracing::info!(addr = %local_addr, "Push listener started");
        Ok(Self {
            local_addr,
            shutdown,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting pushes, drop open connections and release the port.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Push listener task failed");
        }
    }
}

async fn receive(mut stream: TcpStream, peer: SocketAddr, cache: Arc<SuspensionCache>, names: Arc<PolicyNames>) {
    loop {
        let frame = match read_frame(&mut stream).await {
            Ok(Some(frame)) => frame,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(peer = %peer, error = %e, "Bad push frame");
                return;
            }
        };

        let event = match decode_event(&frame) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(peer = %peer, error = %e, "Undecodable suspension event");
                continue;
            }
        };

        match names.get(&event.policy_id) {
            Some(name) => {
                cache.apply(&event.infraction, name.value(), now_millis());
                tracing::info!(
                    policy = %name.value(),
                    user = %event.user_name,
                    expires = ?event.infraction.expiration_timestamp,
                    "Suspension pushed"
                );
            }
            None => tracing::debug!(policy_id = event.policy_id, "Push for a policy not enforced here"),
        }
    }
}
