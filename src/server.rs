//! The process-wide singleton: owns the accessory tree, the accessory identity, the pairing
//! store, the mDNS publisher, and the set of live sessions. `Server::init` is the crate's entire
//! bootstrap surface — a single call taking a [`Config`] and handing back a listener-ready value.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use serde_json::json;

use crate::config::{AccessoryCategory, Config};
use crate::dispatcher::{self, characteristic_value_to_json, Dispatcher};
use crate::error::{Error, Result, TransportError};
use crate::event::{CharacteristicEvent, EventBus};
use crate::http::Response;
use crate::identity;
use crate::mdns::{MdnsPublisher, TxtRecord};
use crate::model::{AccessoryModel, SessionId};
use crate::session::{DisconnectFlag, Session};

/// Cooperative per-session socket read timeout.
const SESSION_READ_TIMEOUT: Duration = Duration::from_secs(10);
const HAP_SERVICE_TYPE: &str = "_hap._tcp";
const MDNS_TTL: u32 = 60;

/// Everything needed to force-disconnect a live session from another task: RemovePairing and
/// `/reset` both walk this registry rather than holding a back-pointer into the session itself.
struct SessionEntry {
    disconnect: DisconnectFlag,
    controller_id: Option<Vec<u8>>,
}

/// Owns every piece of process-wide state. Created once by [`Server::init`] and shared behind an
/// `Arc` with every spawned session task.
pub struct Server {
    pub dispatcher: Dispatcher,
    mdns: Arc<dyn MdnsPublisher>,
    name: String,
    category: AccessoryCategory,
    port: u16,
    config_number: AtomicU32,
    sessions: Mutex<HashMap<SessionId, SessionEntry>>,
    next_session_id: AtomicU64,
}

impl Server {
    /// Load or generate the accessory's long-term identity, resolve the setup code, and publish
    /// the initial mDNS advertisement.
    ///
    /// # Errors
    /// Returns whatever [`crate::identity::IdentityStore::save`] returns if persisting a freshly
    /// generated identity fails.
    pub async fn init(config: Config) -> Result<Arc<Self>> {
        let identity = identity::load_or_generate(config.identity_store.as_ref()).await?;
        let setup_code = config.setup_code.resolve();

        let dispatcher = Dispatcher {
            accessories: Mutex::new(AccessoryModel::new(config.accessories)),
            pairing_store: config.pairing_store,
            accessory_id: identity.id,
            accessory_identity: identity.keypair,
            setup_in_flight: Mutex::new(None),
            setup_code_provider: Box::new(move || setup_code.clone()),
            event_bus: EventBus::default(),
            resource_handler: config.resource_handler,
        };

        let server = Arc::new(Self {
            dispatcher,
            mdns: config.mdns,
            name: config.name,
            category: config.category,
            port: config.port,
            config_number: AtomicU32::new(config.config_number),
            sessions: Mutex::new(HashMap::new()),
            next_session_id: AtomicU64::new(1),
        });

        server.publish_mdns().await;
        Ok(server)
    }

    async fn publish_mdns(&self) {
        let paired = self.dispatcher.pairing_store.is_paired().await;
        let txt = TxtRecord::build(
            &self.dispatcher.accessory_id,
            self.config_number.load(Ordering::Relaxed),
            self.category,
            paired,
        );
        if let Err(err) = self.mdns.publish(&self.name, &txt, self.port, MDNS_TTL).await {
            warn!(?err, "mDNS publish failed");
        }
    }

    /// Bind a verified session's controller identity into the registry, so a later
    /// RemovePairing/`/reset` can find and disconnect it.
    pub async fn bind_session_controller(&self, session: SessionId, controller_id: Vec<u8>) {
        if let Some(entry) = self.sessions.lock().await.get_mut(&session) {
            entry.controller_id = Some(controller_id);
        }
    }

    /// Force-disconnect every live session bound to `controller_id`.
    pub async fn disconnect_controller(&self, controller_id: &[u8]) {
        for entry in self.sessions.lock().await.values() {
            if entry.controller_id.as_deref() == Some(controller_id) {
                entry.disconnect.set();
            }
        }
    }

    /// Bind a listener and accept connections until it errs, spawning one task per session.
    ///
    /// # Errors
    /// Returns [`Error::Transport`] if `accept` fails.
    pub async fn serve(self: &Arc<Self>, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, addr) = listener
                .accept()
                .await
                .map_err(|_| Error::Transport(TransportError::Closed))?;
            let server = Arc::clone(self);
            info!(%addr, "accepted connection");
            tokio::spawn(async move {
                server.run_session(stream).await;
            });
        }
    }

    async fn run_session(self: Arc<Self>, stream: TcpStream) {
        let id = SessionId(self.next_session_id.fetch_add(1, Ordering::Relaxed));
        let mut session = Session::new(id, &self.dispatcher.event_bus);
        self.sessions.lock().await.insert(
            id,
            SessionEntry {
                disconnect: session.disconnect.clone(),
                controller_id: None,
            },
        );

        if let Err(err) = self.session_loop(&mut session, stream).await {
            debug!(session = id.0, error = %err, "session closed");
        }

        self.dispatcher.accessories.lock().await.unsubscribe_session(id);
        self.dispatcher.event_bus.unregister(id);
        self.sessions.lock().await.remove(&id);
    }

    async fn session_loop(&self, session: &mut Session, mut stream: TcpStream) -> Result<()> {
        let mut read_buf = [0u8; 4096];
        loop {
            if session.disconnect.is_set() {
                return Ok(());
            }

            tokio::select! {
                biased;

                event = session.events.recv(), if session.is_verified() => {
                    let Some(event) = event else { continue };
                    let response = event_response(&event);
                    let ciphertext = session.encrypt(&response.to_bytes())?;
                    stream
                        .write_all(&ciphertext)
                        .await
                        .map_err(|_| Error::Transport(TransportError::Closed))?;
                }

                read = tokio::time::timeout(SESSION_READ_TIMEOUT, stream.read(&mut read_buf)) => {
                    let n = read
                        .map_err(|_| Error::Transport(TransportError::Timeout))?
                        .map_err(|_| Error::Transport(TransportError::Closed))?;
                    if n == 0 {
                        return Ok(());
                    }
                    if session.is_verified() {
                        session.feed_ciphertext(&read_buf[..n])?;
                    } else {
                        session.feed_plaintext(&read_buf[..n]);
                    }

                    while let Some(request) = session.try_take_request()? {
                        let response = dispatcher::route(self, session, &request).await;
                        let bytes = response.to_bytes();
                        let out = if session.is_verified() { session.encrypt(&bytes)? } else { bytes };
                        stream
                            .write_all(&out)
                            .await
                            .map_err(|_| Error::Transport(TransportError::Closed))?;
                        // Pair-Verify's M4 reply above went out in plaintext; only now does the
                        // record layer it announced become active for subsequent frames.
                        session.activate_pending_record_layer();

                        if session.disconnect.is_set() {
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}

/// Build the `EVENT/1.0` frame body for one characteristic change.
fn event_response(event: &CharacteristicEvent) -> Response {
    let body = json!({
        "characteristics": [{
            "aid": event.aid,
            "iid": event.iid,
            "value": characteristic_value_to_json(&event.value),
        }]
    });
    Response::event(body.to_string().into_bytes())
}
