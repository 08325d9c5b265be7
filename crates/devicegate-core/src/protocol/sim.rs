//! In-process simulated protocol engine
//!
//! Behaves like a real engine from the session layer's point of view:
//! unpaired clients hand out rotating pairing codes, paired clients emit
//! `Connected` on connect, and remote logouts invalidate the identity. The
//! operator side of pairing (scanning a code) is driven explicitly through
//! [`SimulatedClient::complete_pairing`].

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use rand::RngCore;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    ClientEvent, ClientFactory, EventHandler, MessagePayload, PairingEvent, ProtocolClient,
    ProtocolError, SendReceipt,
};
use crate::domain::session::DeviceIdentity;

/// Default delay between two pairing codes
pub const DEFAULT_CODE_INTERVAL: Duration = Duration::from_secs(20);

/// Codes handed out before the pairing channel times out
pub const DEFAULT_MAX_CODES: usize = 6;

const PAIRING_CHANNEL_CAPACITY: usize = 8;

type PairingSender = Arc<Mutex<Option<mpsc::Sender<PairingEvent>>>>;

/// Simulated client for one session
pub struct SimulatedClient {
    session_id: Uuid,
    identity: Mutex<DeviceIdentity>,
    connected: AtomicBool,
    fail_connect: AtomicBool,
    connect_calls: AtomicUsize,
    handlers: RwLock<Vec<EventHandler>>,
    pairing_tx: PairingSender,
    code_interval: Duration,
    max_codes: usize,
    message_counter: AtomicU64,
    sent: Mutex<Vec<(String, MessagePayload)>>,
}

impl SimulatedClient {
    /// Create a client with default pairing timings
    pub fn new(session_id: Uuid, identity: DeviceIdentity) -> Self {
        Self::with_timing(session_id, identity, DEFAULT_CODE_INTERVAL, DEFAULT_MAX_CODES)
    }

    /// Create a client with custom pairing code rotation
    pub fn with_timing(
        session_id: Uuid,
        identity: DeviceIdentity,
        code_interval: Duration,
        max_codes: usize,
    ) -> Self {
        Self {
            session_id,
            identity: Mutex::new(identity),
            connected: AtomicBool::new(false),
            fail_connect: AtomicBool::new(false),
            connect_calls: AtomicUsize::new(0),
            handlers: RwLock::new(Vec::new()),
            pairing_tx: Arc::new(Mutex::new(None)),
            code_interval,
            max_codes: max_codes.max(1),
            message_counter: AtomicU64::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Session this client was built for
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Make subsequent `connect` calls fail (or succeed again)
    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Number of `connect` calls observed
    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    /// Messages accepted by `send`
    pub fn sent_messages(&self) -> Vec<(String, MessagePayload)> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Whether a pairing channel is currently open
    pub fn is_pairing(&self) -> bool {
        self.pairing_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Deliver an event to every subscriber, as the engine's reader loop would
    pub fn emit(&self, event: ClientEvent) {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        for handler in handlers.iter() {
            handler(event.clone());
        }
    }

    /// Push a fresh code on the open pairing channel
    pub fn rotate_code(&self) -> bool {
        let code = self.pairing_code();
        let guard = self.pairing_tx.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(tx) => tx.try_send(PairingEvent::Code(code)).is_ok(),
            None => false,
        }
    }

    /// Simulate the user's device scanning the current code
    pub fn complete_pairing(&self, address: impl Into<String>) {
        let address = address.into();
        {
            let mut identity = self.identity.lock().unwrap_or_else(PoisonError::into_inner);
            identity.address = Some(address.clone());
        }

        let tx = self
            .pairing_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = tx {
            let _ = tx.try_send(PairingEvent::Success {
                address: address.clone(),
            });
        }

        info!(session_id = %self.session_id, address = %address, "Simulated pairing completed");
        self.emit(ClientEvent::PairSuccess { address });
        if self.is_connected() {
            self.emit(ClientEvent::Connected);
        }
    }

    /// Simulate the account unlinking this device
    pub fn remote_logout(&self, reason: Option<String>) {
        {
            let mut identity = self.identity.lock().unwrap_or_else(PoisonError::into_inner);
            *identity = DeviceIdentity::fresh();
        }
        self.connected.store(false, Ordering::SeqCst);
        self.close_pairing();
        self.emit(ClientEvent::LoggedOut { reason });
    }

    fn close_pairing(&self) {
        self.pairing_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn pairing_code(&self) -> String {
        pairing_code(&self.identity.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Render a pairing code as `ref,noise,identity,adv` with base64 parts
fn pairing_code(identity: &DeviceIdentity) -> String {
    let mut reference = [0u8; 18];
    rand::thread_rng().fill_bytes(&mut reference);
    format!(
        "2@{},{},{},{}",
        BASE64.encode(reference),
        BASE64.encode(&identity.noise_key),
        BASE64.encode(identity.identity_public_key()),
        BASE64.encode(&identity.adv_secret),
    )
}

#[async_trait]
impl ProtocolClient for SimulatedClient {
    async fn connect(&self) -> Result<(), ProtocolError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(ProtocolError::Connect("simulated connection failure".to_string()));
        }
        if self.connected.swap(true, Ordering::SeqCst) {
            return Err(ProtocolError::AlreadyConnected);
        }

        debug!(session_id = %self.session_id, "Simulated socket opened");
        if self.is_authenticated() {
            self.emit(ClientEvent::Connected);
        }
        Ok(())
    }

    async fn disconnect(&self) {
        self.close_pairing();
        if self.connected.swap(false, Ordering::SeqCst) {
            debug!(session_id = %self.session_id, "Simulated socket closed");
            self.emit(ClientEvent::Disconnected);
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_authenticated(&self) -> bool {
        self.identity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_paired()
    }

    fn identity(&self) -> DeviceIdentity {
        self.identity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn open_pairing_channel(&self) -> Result<mpsc::Receiver<PairingEvent>, ProtocolError> {
        if self.is_authenticated() {
            return Err(ProtocolError::PairingUnavailable(
                "client is already paired".to_string(),
            ));
        }

        let (tx, rx) = mpsc::channel(PAIRING_CHANNEL_CAPACITY);
        let _ = tx.try_send(PairingEvent::Code(self.pairing_code()));
        *self.pairing_tx.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);

        // Rotation ends as soon as the sender slot is emptied by pairing,
        // disconnect or logout.
        let slot = Arc::clone(&self.pairing_tx);
        let interval = self.code_interval;
        let max_codes = self.max_codes;
        let identity = self.identity();
        tokio::spawn(async move {
            let mut issued = 1;
            loop {
                tokio::time::sleep(interval).await;
                let current = slot.lock().unwrap_or_else(PoisonError::into_inner).clone();
                let Some(tx) = current else {
                    break;
                };
                if issued >= max_codes {
                    slot.lock().unwrap_or_else(PoisonError::into_inner).take();
                    let _ = tx.send(PairingEvent::Timeout).await;
                    break;
                }
                if tx.send(PairingEvent::Code(pairing_code(&identity))).await.is_err() {
                    break;
                }
                issued += 1;
            }
        });

        Ok(rx)
    }

    fn subscribe(&self, handler: EventHandler) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    async fn send(&self, target: &str, payload: MessagePayload) -> Result<SendReceipt, ProtocolError> {
        if !self.is_connected() {
            return Err(ProtocolError::NotConnected);
        }
        if !self.is_authenticated() {
            return Err(ProtocolError::NotLoggedIn);
        }

        let n = self.message_counter.fetch_add(1, Ordering::SeqCst);
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((target.to_string(), payload));

        Ok(SendReceipt {
            message_id: format!("SIM{:016X}", n),
            target: target.to_string(),
            timestamp: Utc::now(),
        })
    }
}

/// Factory handing out [`SimulatedClient`]s and keeping them addressable
pub struct SimulatedFactory {
    clients: Mutex<HashMap<Uuid, Arc<SimulatedClient>>>,
    failing: Mutex<HashSet<Uuid>>,
    code_interval: Duration,
    max_codes: usize,
}

impl SimulatedFactory {
    /// Factory with default pairing timings
    pub fn new() -> Self {
        Self::with_timing(DEFAULT_CODE_INTERVAL, DEFAULT_MAX_CODES)
    }

    /// Factory with custom pairing code rotation
    pub fn with_timing(code_interval: Duration, max_codes: usize) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            code_interval,
            max_codes,
        }
    }

    /// Client most recently built for a session
    pub fn client(&self, session_id: Uuid) -> Option<Arc<SimulatedClient>> {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&session_id)
            .cloned()
    }

    /// Make clients built for `session_id` fail to connect
    pub fn fail_connect_for(&self, session_id: Uuid) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id);
        if let Some(client) = self.client(session_id) {
            client.set_fail_connect(true);
        }
    }

    /// Sum of connect calls over every client built so far
    pub fn total_connect_calls(&self) -> usize {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|c| c.connect_calls())
            .sum()
    }
}

impl Default for SimulatedFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientFactory for SimulatedFactory {
    fn build(&self, session_id: Uuid, identity: DeviceIdentity) -> Arc<dyn ProtocolClient> {
        let client = Arc::new(SimulatedClient::with_timing(
            session_id,
            identity,
            self.code_interval,
            self.max_codes,
        ));
        if self
            .failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&session_id)
        {
            client.set_fail_connect(true);
        }
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id, Arc::clone(&client));
        client
    }
}
