//! JSON-lines dashboard feed.
//!
//! Each connected client gets its own hub subscription and receives one
//! serialized [`BroadcastMessage`] per line. A client that stops reading
//! falls behind its queue and is dropped by the hub; the write error
//! then ends its task here.

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use timeclock_broadcast::BroadcastHub;

pub async fn serve(addr: String, hub: BroadcastHub) {
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            warn!("Feed listener failed to bind {}: {}", addr, e);
            return;
        }
    };

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                info!(%peer, "Feed client connected");
                tokio::spawn(serve_client(stream, hub.clone()));
            }
            Err(e) => {
                warn!("Feed accept failed: {}", e);
            }
        }
    }
}

async fn serve_client(mut stream: TcpStream, hub: BroadcastHub) {
    let mut subscriber = hub.subscribe();
    let id = subscriber.id();

    while let Some(message) = subscriber.recv().await {
        let mut line = match serde_json::to_vec(&message) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Feed message not serializable");
                continue;
            }
        };
        line.push(b'\n');

        if let Err(e) = stream.write_all(&line).await {
            debug!(subscriber = %id, "Feed client gone: {}", e);
            break;
        }
    }

    hub.unsubscribe(id);
    debug!(subscriber = %id, "Feed client task ended");
}
