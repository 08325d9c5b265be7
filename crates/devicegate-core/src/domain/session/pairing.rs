//! Pairing code consumption
//!
//! While a session has no linked identity, `connect` opens the client's
//! pairing channel and hands it to a task spawned here. Each code replaces the
//! cached one on the handle; only the latest code can be scanned.
//!
//! When the channel ends without a scan the connect attempt is abandoned: the
//! socket is closed and the session moves to `error`, so `connect` can be
//! called again for a fresh set of codes.

use std::sync::Arc;

use qrcode::QrCode;
use qrcode::render::unicode;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::dispatcher::{audit, persist};
use super::event::SessionEvent;
use super::handle::SessionHandle;
use super::repository_trait::SessionRepositoryTrait;
use super::session::SessionStatus;
use crate::error::Error;
use crate::protocol::{PairingEvent, ProtocolError};

/// Spawn the task draining a pairing channel into the handle's code cache
pub fn spawn(
    handle: Arc<SessionHandle>,
    store: Arc<dyn SessionRepositoryTrait>,
    mut codes: mpsc::Receiver<PairingEvent>,
    cancel: CancellationToken,
    print_qr: bool,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = codes.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            if cancel.is_cancelled() {
                break;
            }

            match event {
                PairingEvent::Code(code) => {
                    debug!(session_id = %handle.id(), "New pairing code issued");
                    if !handle.offer_qr(code.clone(), &cancel).await {
                        break;
                    }
                    if print_qr {
                        print_code(&handle.display_key(), &code);
                    }
                }
                PairingEvent::Success { address } => {
                    info!(session_id = %handle.id(), address = %address, "Pairing channel confirmed device");
                }
                PairingEvent::Timeout => {
                    warn!(session_id = %handle.id(), "Pairing timed out without a scan");
                    abandon(&handle, store.as_ref(), &cancel, "timed out without a scan").await;
                    break;
                }
                PairingEvent::Error(e) => {
                    warn!(session_id = %handle.id(), error = %e, "Pairing failed");
                    abandon(&handle, store.as_ref(), &cancel, &e).await;
                    break;
                }
            }
        }
        debug!(session_id = %handle.id(), "Pairing task finished");
    })
}

/// Give up on the connect attempt that opened this pairing channel
async fn abandon(
    handle: &SessionHandle,
    store: &dyn SessionRepositoryTrait,
    cancel: &CancellationToken,
    reason: &str,
) {
    handle.clear_qr().await;

    let snapshot = {
        let mut state = handle.state().write().await;
        // Only the attempt still in flight is ours to settle
        if cancel.is_cancelled() || state.status != SessionStatus::Connecting {
            return;
        }
        state.set_status(SessionStatus::Error);
        state.clone()
    };

    handle.client().disconnect().await;

    let error = Error::Protocol(ProtocolError::Pairing(reason.to_string()));
    persist(store, &snapshot).await;
    audit(
        store,
        SessionEvent::error(handle.id(), &error.to_string(), Some(error.code())),
    )
    .await;
}

/// Render a pairing code as a terminal QR block
pub fn render_qr(code: &str) -> Option<String> {
    let qr = QrCode::new(code.as_bytes()).ok()?;
    Some(
        qr.render::<unicode::Dense1x2>()
            .dark_color(unicode::Dense1x2::Light)
            .light_color(unicode::Dense1x2::Dark)
            .quiet_zone(true)
            .build(),
    )
}

fn print_code(key: &str, code: &str) {
    match render_qr(code) {
        Some(block) => println!("Scan to pair session '{}':\n{}", key, block),
        None => println!("Pairing code for session '{}': {}", key, code),
    }
}
