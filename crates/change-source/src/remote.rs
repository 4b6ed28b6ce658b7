//! Remote half of the change feed: turns [`remote_api::RemoteEvents`] into
//! [`RemoteSignal`]s the unifier forwards as-is (§4.5). A remote push never
//! carries a real local path, so unlike the local watcher it never produces
//! a [`FileChangeEvent`] directly — the orchestrator resolves a note id to
//! a path (or discovers there is none yet) through reconciliation.

use remote_api::{RemoteEvents, WsEvent};

/// One remote-originated notification `ChangeSource` forwards to subscribers.
#[derive(Debug, Clone)]
pub enum RemoteSignal {
    /// A note changed server-side; the mapped local file (if any) is stale.
    NoteUpdated { note_id: String },
    /// A note was tombstoned server-side.
    NoteDeleted { note_id: String },
    Conflict { note_id: String, path: Option<String> },
    ReconnectFailed,
}

/// Maps one [`WsEvent`] to a [`RemoteSignal`], if it is one the unifier
/// cares about.
pub fn classify(event: WsEvent) -> Option<RemoteSignal> {
    match event {
        WsEvent::NoteUpdate { note } => Some(RemoteSignal::NoteUpdated { note_id: note.id }),
        WsEvent::NoteDelete { note_id } => Some(RemoteSignal::NoteDeleted { note_id }),
        WsEvent::Conflict { note_id, path } => Some(RemoteSignal::Conflict { note_id, path }),
        WsEvent::ReconnectFailed => Some(RemoteSignal::ReconnectFailed),
        WsEvent::Ack { .. }
        | WsEvent::Ping
        | WsEvent::Pong
        | WsEvent::SyncRequest
        | WsEvent::SyncResponse { .. } => None,
    }
}

/// Pumps events from `events` forever, handing each classified signal to
/// the caller-supplied sink. Exits when the underlying feed errors, which
/// callers treat as "reconnect loop gave up".
pub async fn pump(mut events: Box<dyn RemoteEvents>, mut on_signal: impl FnMut(RemoteSignal)) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if let Some(signal) = classify(event) {
                    on_signal(signal);
                }
            }
            Err(_) => {
                on_signal(RemoteSignal::ReconnectFailed);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_core::{EncryptionAlgo, Note, NoteKind};

    fn note() -> Note {
        Note {
            id: "n1".into(),
            workspace_id: "w1".into(),
            parent_id: None,
            kind: NoteKind::File,
            encrypted_title: String::new(),
            encrypted_content: String::new(),
            nonce: None,
            encryption_algo: EncryptionAlgo::Aes256GcmEmbedded,
            created_at: "t".into(),
            updated_at: "t".into(),
            version: 1,
            content_hash: "h".into(),
            is_deleted: false,
            last_edit_device: None,
        }
    }

    #[test]
    fn note_update_classifies_as_note_updated_signal() {
        let signal = classify(WsEvent::NoteUpdate { note: note() });
        assert!(matches!(signal, Some(RemoteSignal::NoteUpdated { note_id }) if note_id == "n1"));
    }

    #[test]
    fn ping_and_pong_produce_no_signal() {
        assert!(classify(WsEvent::Ping).is_none());
        assert!(classify(WsEvent::Pong).is_none());
    }
}
