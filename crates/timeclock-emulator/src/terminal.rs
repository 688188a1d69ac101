use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio_util::codec::Framed;
use tracing::{debug, trace, warn};

use timeclock_core::DeviceId;
use timeclock_protocol::{
    AttendanceNotification, CommandCode, Message, MessageBuilder, TerminalCodec, log_batch_fields,
};

/// Errors from emulator startup
#[derive(Debug, Error)]
pub enum EmulatorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Scripted behavior of the emulated terminal
#[derive(Debug, Clone, Default)]
pub struct EmulatorBehavior {
    /// Expected `AUTH` secret; `None` accepts any handshake.
    pub secret: Option<String>,

    /// When set, inbound commands are swallowed without a response,
    /// which drives command timeouts in the client under test.
    pub mute: bool,

    /// Historical records served to `SYNC` requests.
    pub records: Vec<AttendanceNotification>,
}

enum Script {
    Emit(AttendanceNotification),
    DropConnection,
    SetMute(bool),
}

/// Control handle for a running emulator
#[derive(Clone)]
pub struct TerminalHandle {
    script_tx: mpsc::UnboundedSender<Script>,
    connected_rx: watch::Receiver<bool>,
}

impl TerminalHandle {
    /// Push an unsolicited attendance event to the connected client.
    pub fn emit_event(&self, note: AttendanceNotification) {
        let _ = self.script_tx.send(Script::Emit(note));
    }

    /// Drop the current connection without a goodbye.
    pub fn drop_connection(&self) {
        let _ = self.script_tx.send(Script::DropConnection);
    }

    /// Toggle command muting at runtime.
    pub fn set_mute(&self, mute: bool) {
        let _ = self.script_tx.send(Script::SetMute(mute));
    }

    /// Wait until a client is connected (or disconnected, per `want`).
    pub async fn wait_connected(&self, want: bool) {
        let mut rx = self.connected_rx.clone();
        loop {
            if *rx.borrow_and_update() == want {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// One emulated terminal endpoint
///
/// Accepts one client connection at a time; when the client disconnects
/// the listener simply accepts the next one, which is exactly what a
/// reconnecting registry expects to find.
pub struct EmulatedTerminal {
    local_addr: SocketAddr,
}

impl EmulatedTerminal {
    /// Bind on an ephemeral local port and start serving.
    pub async fn start(
        device_id: DeviceId,
        behavior: EmulatorBehavior,
    ) -> Result<(Self, TerminalHandle), EmulatorError> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let local_addr = listener.local_addr()?;

        let (script_tx, script_rx) = mpsc::unbounded_channel();
        let (connected_tx, connected_rx) = watch::channel(false);

        tokio::spawn(serve(listener, device_id, behavior, script_rx, connected_tx));

        Ok((
            Self { local_addr },
            TerminalHandle {
                script_tx,
                connected_rx,
            },
        ))
    }

    /// Address clients should connect to.
    pub fn addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Address in `host:port` form for registry configuration.
    pub fn host_port(&self) -> (String, u16) {
        (self.local_addr.ip().to_string(), self.local_addr.port())
    }
}

async fn serve(
    listener: TcpListener,
    device_id: DeviceId,
    behavior: EmulatorBehavior,
    mut script_rx: mpsc::UnboundedReceiver<Script>,
    connected_tx: watch::Sender<bool>,
) {
    let mut mute = behavior.mute;

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Emulator accept failed: {}", e);
                return;
            }
        };
        debug!(%peer, "Emulator accepted client");
        let mut framed = Framed::new(stream, TerminalCodec::new());
        connected_tx.send_replace(true);

        loop {
            tokio::select! {
                frame = framed.next() => match frame {
                    Some(Ok(message)) => {
                        trace!(command = %message.command, "Emulator received");
                        if mute {
                            continue;
                        }
                        if let Some(response) = respond(device_id, &behavior, &message) {
                            if framed.send(response).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        debug!("Emulator decode error: {}", e);
                    }
                    None => break,
                },
                script = script_rx.recv() => match script {
                    Some(Script::Emit(note)) => {
                        let event = event_message(device_id, &note);
                        if framed.send(event).await.is_err() {
                            break;
                        }
                    }
                    Some(Script::DropConnection) => {
                        debug!("Emulator dropping connection on request");
                        break;
                    }
                    Some(Script::SetMute(value)) => mute = value,
                    None => return,
                },
            }
        }

        drop(framed);
        connected_tx.send_replace(false);
    }
}

fn event_message(device_id: DeviceId, note: &AttendanceNotification) -> Message {
    let kind = note
        .kind
        .map(|k| k.to_wire().to_string())
        .unwrap_or_default();
    MessageBuilder::new(device_id, CommandCode::EventReport)
        .fields(vec![
            note.subject_id.to_string(),
            note.timestamp.format(),
            note.method.to_wire().to_string(),
            kind,
        ])
        .and_then(MessageBuilder::build)
        .expect("emulator event fields are delimiter-free")
}

fn respond(
    device_id: DeviceId,
    behavior: &EmulatorBehavior,
    request: &Message,
) -> Option<Message> {
    let sequence = request.sequence;
    let reply = |command: CommandCode, fields: Vec<String>| {
        MessageBuilder::new(device_id, command)
            .sequence(sequence)
            .fields(fields)
            .and_then(MessageBuilder::build)
            .ok()
    };

    match request.command {
        CommandCode::Ping => reply(CommandCode::Ack, vec![]),
        CommandCode::Auth => {
            let presented = request.field(0).unwrap_or_default();
            match &behavior.secret {
                Some(secret) if secret != presented => {
                    reply(CommandCode::Error, vec!["bad secret".to_string()])
                }
                _ => reply(CommandCode::Ack, vec![]),
            }
        }
        CommandCode::QueryStatus => {
            reply(CommandCode::Ack, vec![device_id.to_string(), "online".to_string()])
        }
        CommandCode::SyncRequest => {
            let records = filter_range(&behavior.records, request);
            reply(CommandCode::LogBatch, log_batch_fields(&records))
        }
        _ => reply(CommandCode::Error, vec!["unsupported".to_string()]),
    }
}

fn filter_range(
    records: &[AttendanceNotification],
    request: &Message,
) -> Vec<AttendanceNotification> {
    use timeclock_core::WireTimestamp;

    let start = request.field(0).and_then(|s| WireTimestamp::parse(s).ok());
    let end = request.field(1).and_then(|s| WireTimestamp::parse(s).ok());

    records
        .iter()
        .filter(|record| {
            let ts = record.timestamp.inner();
            start.is_none_or(|s| ts >= s.inner()) && end.is_none_or(|e| ts <= e.inner())
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use timeclock_core::{AuthMethod, SubjectId, WireTimestamp};
    use timeclock_protocol::Sequence;

    fn note(subject: &str, ts: &str) -> AttendanceNotification {
        AttendanceNotification {
            subject_id: SubjectId::new(subject).unwrap(),
            timestamp: WireTimestamp::parse(ts).unwrap(),
            method: AuthMethod::Fingerprint,
            kind: None,
        }
    }

    #[test]
    fn test_sync_range_filter() {
        let records = vec![
            note("EMP001", "2026-08-01 08:00:00"),
            note("EMP001", "2026-08-05 08:00:00"),
            note("EMP001", "2026-08-09 08:00:00"),
        ];
        let request = MessageBuilder::new(DeviceId::new(1).unwrap(), CommandCode::SyncRequest)
            .sequence(Sequence::new(1).unwrap())
            .fields(vec![
                "2026-08-02 00:00:00".to_string(),
                "2026-08-08 00:00:00".to_string(),
            ])
            .unwrap()
            .build()
            .unwrap();

        let filtered = filter_range(&records, &request);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].timestamp.format(), "2026-08-05 08:00:00");
    }

    #[test]
    fn test_auth_response() {
        let device_id = DeviceId::new(1).unwrap();
        let behavior = EmulatorBehavior {
            secret: Some("commkey".to_string()),
            ..EmulatorBehavior::default()
        };

        let good = MessageBuilder::new(device_id, CommandCode::Auth)
            .sequence(Sequence::new(1).unwrap())
            .field("commkey")
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(
            respond(device_id, &behavior, &good).unwrap().command,
            CommandCode::Ack
        );

        let bad = MessageBuilder::new(device_id, CommandCode::Auth)
            .sequence(Sequence::new(2).unwrap())
            .field("wrong")
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(
            respond(device_id, &behavior, &bad).unwrap().command,
            CommandCode::Error
        );
    }
}
