//! Routes decoded HAP requests to the pairing machines and accessory model, and shapes their
//! replies. One [`Dispatcher`] is shared read-only state; all per-connection mutable state
//! (pairing machines in flight, verified/admin status) lives in [`crate::session::Session`].

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::config::{ResourceHandler, IDENTIFY_TYPE};
use crate::error::Error;
use crate::event::{CharacteristicEvent, EventBus};
use crate::http::{HttpMethod, Request, Response};
use crate::model::{AccessoryModel, CharacteristicValue, Format, HapStatus, SessionId};
use crate::pairing::{PairSetupMachine, PairSetupOutcome, PairVerifyMachine, PairVerifyOutcome};
use crate::store::{Pairing, PairingPermissions, PairingStore};
use crate::tlv::{Tag, TlvError, TlvSet};

/// Shared, read-mostly server state the dispatcher routes against.
pub struct Dispatcher {
    pub accessories: Mutex<AccessoryModel>,
    pub pairing_store: Arc<dyn PairingStore>,
    pub accessory_id: String,
    pub accessory_identity: crate::crypto::Ed25519Identity,
    /// Guards against two concurrent Pair-Setup attempts: a single mutex-held token rather than
    /// an ad hoc global flag.
    pub setup_in_flight: Mutex<Option<()>>,
    pub setup_code_provider: Box<dyn Fn() -> String + Send + Sync>,
    pub event_bus: EventBus,
    pub resource_handler: Option<Arc<dyn ResourceHandler>>,
}

/// What a PUT to `/pair-setup` or `/pair-verify` produced, beyond the TLV8 reply bytes.
pub enum SessionEffect {
    None,
    PairSetupComplete,
    PairVerifyComplete { shared_secret: Vec<u8>, controller_id: Vec<u8> },
}

impl Dispatcher {
    /// Handle `POST /pair-setup`. The caller is responsible for creating a fresh
    /// [`PairSetupMachine`] on M1 and holding it across subsequent calls within the session.
    ///
    /// # Errors
    /// Returns [`Error::Busy`] if another Pair-Setup is already in flight.
    pub async fn pair_setup(
        &self,
        machine: &mut Option<PairSetupMachine>,
        request_tlv: &TlvSet,
    ) -> Result<(Response, SessionEffect), Error> {
        let state = request_tlv.u8_required(Tag::State)?;
        if state == 1 {
            if self.pairing_store.is_paired().await {
                let mut reply = TlvSet::new();
                reply.set_state(2);
                reply.set_error(TlvError::Unavailable);
                return Ok((Response::tlv8("HTTP/1.1 200 OK", reply.encode()), SessionEffect::None));
            }

            let mut guard = self.setup_in_flight.lock().await;
            if guard.is_some() {
                let mut reply = TlvSet::new();
                reply.set_state(2);
                reply.set_error(TlvError::Busy);
                return Ok((Response::tlv8("HTTP/1.1 200 OK", reply.encode()), SessionEffect::None));
            }
            *guard = Some(());
            *machine = Some(PairSetupMachine::new(
                self.accessory_id.clone().into_bytes(),
                self.accessory_identity.clone(),
                (self.setup_code_provider)(),
            ));
        }

        let Some(m) = machine.as_mut() else {
            return Err(Error::Protocol("pair-setup message received before M1"));
        };

        let result = m.process(request_tlv);
        match result {
            Ok((reply, outcome)) => {
                let effect = if let Some(PairSetupOutcome {
                    controller_id,
                    controller_public_key,
                }) = outcome
                {
                    self.pairing_store
                        .add(Pairing {
                            controller_id,
                            public_key: controller_public_key,
                            permissions: PairingPermissions::Admin,
                        })
                        .await?;
                    *self.setup_in_flight.lock().await = None;
                    *machine = None;
                    SessionEffect::PairSetupComplete
                } else {
                    SessionEffect::None
                };
                Ok((Response::tlv8("HTTP/1.1 200 OK", reply.encode()), effect))
            }
            Err(err) => {
                *self.setup_in_flight.lock().await = None;
                *machine = None;
                Err(err)
            }
        }
    }

    /// Handle `POST /pair-verify`.
    pub async fn pair_verify(
        &self,
        machine: &mut Option<PairVerifyMachine>,
        request_tlv: &TlvSet,
    ) -> Result<(Response, SessionEffect), Error> {
        let state = request_tlv.u8_required(Tag::State)?;
        if state == 1 {
            *machine = Some(PairVerifyMachine::new(
                self.accessory_id.clone().into_bytes(),
                self.accessory_identity.clone(),
            ));
        }

        let Some(m) = machine.as_mut() else {
            return Err(Error::Protocol("pair-verify message received before M1"));
        };

        // The controller id the machine needs to verify against lives inside the encrypted
        // sub-TLV, so we hand it every admitted pairing and let it pick the matching one. With
        // typically few paired controllers, fetching the whole list per M3 is cheap.
        let lookup = MultiLookup {
            pairings: self.pairing_store.list().await,
        };

        match m.process(request_tlv, &lookup) {
            Ok((reply, outcome)) => {
                let effect = match outcome {
                    Some(PairVerifyOutcome { shared_secret, controller_id }) => {
                        SessionEffect::PairVerifyComplete { shared_secret, controller_id }
                    }
                    None => SessionEffect::None,
                };
                Ok((Response::tlv8("HTTP/1.1 200 OK", reply.encode()), effect))
            }
            Err(err) => {
                *machine = None;
                Err(err)
            }
        }
    }

    /// Handle `GET /accessories`.
    pub async fn get_accessories(&self) -> Response {
        let model = self.accessories.lock().await;
        let body = render_accessories(&model);
        Response::json("HTTP/1.1 200 OK", serde_json::to_vec(&body).expect("accessory tree serializes"))
    }

    /// Handle `GET /characteristics?id=aid.iid,aid.iid,...[&meta=1][&perms=1][&type=1][&ev=1]`.
    ///
    /// The four optional flags each add extra fields to every successful result: `meta` adds
    /// format/unit/range metadata, `perms` adds the permission-string array, `type` adds the
    /// characteristic's type UUID, and `ev` adds whether `session` itself is currently
    /// subscribed.
    pub async fn get_characteristics(&self, session: SessionId, request: &Request) -> Response {
        let Some(ids) = request.query.get("id") else {
            return Response::json(
                "HTTP/1.1 400 Bad Request",
                json!({ "status": HapStatus::InvalidValue as i32 }).to_string().into_bytes(),
            );
        };
        let flag = |name: &str| request.query.get(name).map(String::as_str) == Some("1");
        let (want_meta, want_perms, want_type, want_ev) =
            (flag("meta"), flag("perms"), flag("type"), flag("ev"));

        let model = self.accessories.lock().await;
        let mut results = Vec::new();
        let mut any_error = false;
        for pair in ids.split(',') {
            let Some((aid_str, iid_str)) = pair.split_once('.') else {
                any_error = true;
                continue;
            };
            let (Ok(aid), Ok(iid)) = (aid_str.parse::<u64>(), iid_str.parse::<u64>()) else {
                any_error = true;
                continue;
            };
            match model.find_by_id(aid, iid) {
                Some(characteristic) => match characteristic.read() {
                    Ok(value) => {
                        let mut entry = json!({
                            "aid": aid,
                            "iid": iid,
                            "value": characteristic_value_to_json(&value),
                        });
                        let obj = entry.as_object_mut().expect("entry is always an object");
                        if want_meta {
                            obj.insert("format".into(), json!(format_string(characteristic.format)));
                            if let Some(unit) = &characteristic.unit {
                                obj.insert("unit".into(), json!(unit));
                            }
                            if let Some(min) = characteristic.constraints.min_value {
                                obj.insert("minValue".into(), json!(min));
                            }
                            if let Some(max) = characteristic.constraints.max_value {
                                obj.insert("maxValue".into(), json!(max));
                            }
                            if let Some(step) = characteristic.constraints.min_step {
                                obj.insert("minStep".into(), json!(step));
                            }
                            if let Some(max_len) = characteristic.constraints.max_len {
                                obj.insert("maxLen".into(), json!(max_len));
                            }
                            if let Some(max_data_len) = characteristic.constraints.max_data_len {
                                obj.insert("maxDataLen".into(), json!(max_data_len));
                            }
                            if let Some(valid_values) = &characteristic.constraints.valid_values {
                                obj.insert("valid-values".into(), json!(valid_values));
                            }
                        }
                        if want_perms {
                            obj.insert("perms".into(), json!(permission_strings(characteristic.permissions)));
                        }
                        if want_type {
                            obj.insert("type".into(), json!(characteristic.type_uri));
                        }
                        if want_ev {
                            obj.insert("ev".into(), json!(characteristic.subscribers.is_subscribed(session)));
                        }
                        results.push(entry);
                    }
                    Err(err) => {
                        any_error = true;
                        results.push(json!({ "aid": aid, "iid": iid, "status": HapStatus::from(&err) as i32 }));
                    }
                },
                None => {
                    any_error = true;
                    results.push(json!({ "aid": aid, "iid": iid, "status": HapStatus::NoResource as i32 }));
                }
            }
        }

        if any_error {
            for result in &mut results {
                let obj = result.as_object_mut().expect("result is always an object");
                obj.entry("status").or_insert(json!(HapStatus::Success as i32));
            }
        }

        let status_line = if any_error { "HTTP/1.1 207 Multi-Status" } else { "HTTP/1.1 200 OK" };
        Response::json(status_line, json!({ "characteristics": results }).to_string().into_bytes())
    }

    /// Handle `PUT /characteristics`, enforcing `session` admin/regular status only where the
    /// spec's permission model requires it (event subscription and value writes both require
    /// `paired_write`/`notify`; neither requires admin specifically).
    pub async fn put_characteristics(&self, session: SessionId, request: &Request) -> Response {
        let Ok(body): Result<Value, _> = serde_json::from_slice(&request.body) else {
            return Response::no_content();
        };
        let Some(writes) = body.get("characteristics").and_then(Value::as_array) else {
            return Response::no_content();
        };

        let mut model = self.accessories.lock().await;
        let mut results = Vec::new();
        let mut any_error = false;

        for write in writes {
            let aid = write.get("aid").and_then(Value::as_u64);
            let iid = write.get("iid").and_then(Value::as_u64);
            let (Some(aid), Some(iid)) = (aid, iid) else {
                any_error = true;
                results.push(json!({
                    "aid": write.get("aid").cloned().unwrap_or(Value::Null),
                    "iid": write.get("iid").cloned().unwrap_or(Value::Null),
                    "status": HapStatus::InvalidValue as i32,
                }));
                continue;
            };

            let Some(characteristic) = model.find_by_id_mut(aid, iid) else {
                any_error = true;
                results.push(json!({ "aid": aid, "iid": iid, "status": HapStatus::NoResource as i32 }));
                continue;
            };

            let outcome = if let Some(value) = write.get("value") {
                json_to_characteristic_value(characteristic.format, value)
                    .map_err(|_| Error::Range(crate::error::RangeError::WrongType))
                    .and_then(|v| characteristic.write(&v))
            } else if let Some(subscribe) = write.get("ev").and_then(Value::as_bool) {
                characteristic.set_subscribed(session, subscribe)
            } else {
                Ok(())
            };

            match outcome {
                Ok(()) => {
                    if write.get("value").is_some() {
                        self.event_bus.publish(
                            &characteristic.subscribers,
                            CharacteristicEvent {
                                aid,
                                iid,
                                value: characteristic.handler.get(),
                            },
                        );
                    }
                    results.push(json!({ "aid": aid, "iid": iid, "status": HapStatus::Success as i32 }));
                }
                Err(err) => {
                    any_error = true;
                    results.push(json!({ "aid": aid, "iid": iid, "status": HapStatus::from(&err) as i32 }));
                }
            }
        }

        if any_error {
            Response::json(
                "HTTP/1.1 207 Multi-Status",
                json!({ "characteristics": results }).to_string().into_bytes(),
            )
        } else {
            Response::no_content()
        }
    }

    /// Handle `POST /pairings` (AddPairing / RemovePairing / ListPairings).
    ///
    /// On a successful RemovePairing, also returns the removed controller's identifier so the
    /// caller can force-disconnect every live session bound to it. Mirrors the original server's
    /// id-then-free ordering: the removed pairing's identifier is read out before the store entry
    /// is dropped, never after.
    pub async fn pairings(&self, requester_is_admin: bool, request_tlv: &TlvSet) -> (Response, Option<Vec<u8>>) {
        let (reply, removed) = match self.handle_pairings(requester_is_admin, request_tlv).await {
            Ok((reply, removed)) => (reply, removed),
            Err(err) => {
                let mut reply = TlvSet::new();
                reply.set_state(2);
                reply.set_error(TlvError::from(&err));
                (reply, None)
            }
        };
        (Response::tlv8("HTTP/1.1 200 OK", reply.encode()), removed)
    }

    async fn handle_pairings(&self, requester_is_admin: bool, request_tlv: &TlvSet) -> Result<(TlvSet, Option<Vec<u8>>), Error> {
        if !requester_is_admin {
            return Err(Error::Permission(crate::error::PermissionError::InsufficientPrivileges));
        }
        let method = request_tlv.u8_required(Tag::Method)?;
        let mut reply = TlvSet::new();
        reply.set_state(2);
        let mut removed = None;

        match method {
            // AddPairing
            3 => {
                let controller_id = request_tlv.bytes_required(Tag::Identifier)?.to_vec();
                let public_key_raw = request_tlv.bytes_required(Tag::PublicKey)?;
                let public_key: [u8; 32] = public_key_raw
                    .try_into()
                    .map_err(|_| Error::Protocol("AddPairing public key must be 32 bytes"))?;
                let permissions_byte = request_tlv.u8_required(Tag::Permissions)?;
                let permissions = if permissions_byte == 1 {
                    PairingPermissions::Admin
                } else {
                    PairingPermissions::Regular
                };

                match self.pairing_store.get(&controller_id).await {
                    // Already known: the public key must match exactly, or this is an attempt to
                    // re-key an existing identifier under a new identity, which is rejected.
                    Some(existing) if existing.public_key == public_key => {}
                    Some(_) => return Err(Error::Internal("AddPairing public key mismatch for existing identifier")),
                    None if !self.pairing_store.can_add_pairing().await => return Err(Error::MaxPeers),
                    None => {}
                }

                self.pairing_store
                    .add(Pairing {
                        controller_id,
                        public_key,
                        permissions,
                    })
                    .await?;
            }
            // RemovePairing
            4 => {
                let controller_id = request_tlv.bytes_required(Tag::Identifier)?.to_vec();
                self.pairing_store.remove(&controller_id).await?;
                removed = Some(controller_id);
            }
            // ListPairings
            5 => {
                for pairing in self.pairing_store.list().await {
                    reply.push_record();
                    reply.set_bytes(Tag::Identifier, pairing.controller_id);
                    reply.set_bytes(Tag::PublicKey, pairing.public_key.to_vec());
                    let permissions_byte = match pairing.permissions {
                        PairingPermissions::Admin => 1,
                        PairingPermissions::Regular => 0,
                    };
                    reply.set_u64(Tag::Permissions, permissions_byte);
                }
            }
            _ => return Err(Error::Protocol("unrecognized pairings method")),
        }

        Ok((reply, removed))
    }

    /// Handle `POST /identify`. Only reachable before the accessory has any pairing; runs the
    /// Identify characteristic through the same write dispatch as any other characteristic set,
    /// so application code can't distinguish the two call paths.
    pub async fn identify(&self) -> Response {
        if self.pairing_store.is_paired().await {
            return Response::json(
                "HTTP/1.1 400 Bad Request",
                json!({ "status": HapStatus::InsufficientPrivileges as i32 }).to_string().into_bytes(),
            );
        }
        let mut model = self.accessories.lock().await;
        let identified = model
            .first_accessory_mut()
            .and_then(|accessory| accessory.find_characteristic_by_type_mut(IDENTIFY_TYPE))
            .map(|characteristic| characteristic.write(&CharacteristicValue::Bool(true)));
        match identified {
            Some(Ok(())) | None => Response::no_content(),
            Some(Err(err)) => Response::json(
                "HTTP/1.1 400 Bad Request",
                json!({ "status": HapStatus::from(&err) as i32 }).to_string().into_bytes(),
            ),
        }
    }

    /// Handle `POST /resource`, forwarding the opaque request body to the application-supplied
    /// snapshot callback.
    pub async fn resource(&self, request: &Request) -> Response {
        let Some(handler) = &self.resource_handler else {
            return Response::json(
                "HTTP/1.1 404 Not Found",
                json!({ "status": HapStatus::NoResource as i32 }).to_string().into_bytes(),
            );
        };
        match handler.snapshot(&request.body).await {
            Ok(bytes) => Response::resource(bytes),
            Err(err) => Response::json(
                "HTTP/1.1 400 Bad Request",
                json!({ "status": HapStatus::from(&err) as i32 }).to_string().into_bytes(),
            ),
        }
    }

    /// Handle `POST /reset`: wipe every pairing, returning the removed controller identifiers so
    /// the caller can force-disconnect every live session.
    pub async fn reset(&self) -> Vec<Vec<u8>> {
        let pairings = self.pairing_store.list().await;
        let mut removed = Vec::with_capacity(pairings.len());
        for pairing in pairings {
            if self.pairing_store.remove(&pairing.controller_id).await.is_ok() {
                removed.push(pairing.controller_id);
            }
        }
        removed
    }
}

struct MultiLookup {
    pairings: Vec<Pairing>,
}

impl crate::pairing::ControllerLookup for MultiLookup {
    fn lookup(&self, controller_id: &[u8]) -> Option<[u8; 32]> {
        self.pairings
            .iter()
            .find(|p| p.controller_id == controller_id)
            .map(|p| p.public_key)
    }
}

fn render_accessories(model: &AccessoryModel) -> Value {
    let accessories: Vec<Value> = model
        .accessories()
        .iter()
        .map(|accessory| {
            let services: Vec<Value> = accessory
                .services
                .iter()
                .map(|service| {
                    let characteristics: Vec<Value> = service
                        .characteristics
                        .iter()
                        .map(|characteristic| {
                            json!({
                                "iid": characteristic.iid,
                                "type": characteristic.type_uri,
                                "value": characteristic_value_to_json(&characteristic.handler.get()),
                                "perms": permission_strings(characteristic.permissions),
                                "format": format_string(characteristic.format),
                            })
                        })
                        .collect();
                    json!({
                        "iid": service.iid,
                        "type": service.type_uri,
                        "hidden": service.hidden,
                        "primary": service.primary,
                        "characteristics": characteristics,
                    })
                })
                .collect();
            json!({ "aid": accessory.aid, "services": services })
        })
        .collect();
    json!({ "accessories": accessories })
}

fn permission_strings(permissions: crate::model::Permissions) -> Vec<&'static str> {
    use crate::model::Permissions as P;
    let mut out = Vec::new();
    if permissions.contains(P::PAIRED_READ) {
        out.push("pr");
    }
    if permissions.contains(P::PAIRED_WRITE) {
        out.push("pw");
    }
    if permissions.contains(P::NOTIFY) {
        out.push("ev");
    }
    if permissions.contains(P::ADDITIONAL_AUTH) {
        out.push("aa");
    }
    if permissions.contains(P::TIMED_WRITE) {
        out.push("tw");
    }
    if permissions.contains(P::HIDDEN) {
        out.push("hd");
    }
    out
}

fn format_string(format: Format) -> &'static str {
    match format {
        Format::Bool => "bool",
        Format::UInt8 => "uint8",
        Format::UInt16 => "uint16",
        Format::UInt32 => "uint32",
        Format::UInt64 => "uint64",
        Format::Int => "int",
        Format::Float => "float",
        Format::String => "string",
        Format::Tlv8 => "tlv8",
        Format::Data => "data",
    }
}

pub(crate) fn characteristic_value_to_json(value: &CharacteristicValue) -> Value {
    match value {
        CharacteristicValue::Bool(b) => json!(b),
        CharacteristicValue::UInt(n) => json!(n),
        CharacteristicValue::Int(n) => json!(n),
        CharacteristicValue::Float(n) => json!(n),
        CharacteristicValue::String(s) => json!(s),
        CharacteristicValue::Bytes(b) => json!(base64_encode(b)),
    }
}

fn json_to_characteristic_value(format: Format, value: &Value) -> Result<CharacteristicValue, Error> {
    match format {
        // HAP controllers write booleans as either JSON true/false or numeric 0/1.
        Format::Bool => value
            .as_bool()
            .or_else(|| value.as_u64().and_then(|n| match n {
                0 => Some(false),
                1 => Some(true),
                _ => None,
            }))
            .map(CharacteristicValue::Bool)
            .ok_or(Error::Protocol("expected a boolean characteristic value")),
        Format::UInt8 | Format::UInt16 | Format::UInt32 | Format::UInt64 => value
            .as_u64()
            .map(CharacteristicValue::UInt)
            .ok_or(Error::Protocol("expected an unsigned integer characteristic value")),
        Format::Int => value
            .as_i64()
            .map(CharacteristicValue::Int)
            .ok_or(Error::Protocol("expected an integer characteristic value")),
        Format::Float => value
            .as_f64()
            .map(CharacteristicValue::Float)
            .ok_or(Error::Protocol("expected a numeric characteristic value")),
        Format::String => value
            .as_str()
            .map(|s| CharacteristicValue::String(s.to_string()))
            .ok_or(Error::Protocol("expected a string characteristic value")),
        Format::Tlv8 | Format::Data => value
            .as_str()
            .and_then(|s| base64_decode(s).ok())
            .map(CharacteristicValue::Bytes)
            .ok_or(Error::Protocol("expected a base64 characteristic value")),
    }
}

/// HAP encodes `data`/`tlv8` characteristic values as base64 in JSON. The crate
/// otherwise has no use for a general base64 dependency, so this is a minimal standalone codec.
fn base64_encode(bytes: &[u8]) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = String::with_capacity((bytes.len() + 2) / 3 * 4);
    for chunk in bytes.chunks(3) {
        let b0 = chunk[0];
        let b1 = *chunk.get(1).unwrap_or(&0);
        let b2 = *chunk.get(2).unwrap_or(&0);
        out.push(ALPHABET[(b0 >> 2) as usize] as char);
        out.push(ALPHABET[(((b0 & 0x03) << 4) | (b1 >> 4)) as usize] as char);
        out.push(if chunk.len() > 1 {
            ALPHABET[(((b1 & 0x0F) << 2) | (b2 >> 6)) as usize] as char
        } else {
            '='
        });
        out.push(if chunk.len() > 2 {
            ALPHABET[(b2 & 0x3F) as usize] as char
        } else {
            '='
        });
    }
    out
}

fn base64_decode(input: &str) -> Result<Vec<u8>, Error> {
    fn value(c: u8) -> Option<u8> {
        match c {
            b'A'..=b'Z' => Some(c - b'A'),
            b'a'..=b'z' => Some(c - b'a' + 26),
            b'0'..=b'9' => Some(c - b'0' + 52),
            b'+' => Some(62),
            b'/' => Some(63),
            _ => None,
        }
    }

    let input = input.trim_end_matches('=');
    let mut out = Vec::with_capacity(input.len() / 4 * 3);
    let mut buffer = 0u32;
    let mut bits = 0u32;
    for byte in input.bytes() {
        let v = value(byte).ok_or(Error::Protocol("invalid base64 input"))?;
        buffer = (buffer << 6) | u32::from(v);
        bits += 6;
        if bits >= 8 {
            bits -= 8;
            out.push((buffer >> bits) as u8);
        }
    }
    Ok(out)
}

/// Route an already-decrypted request to the appropriate handler, consulting `session` for the
/// admission checks common to every endpoint except `/pair-setup`, `/pair-verify`, and (pre-pair)
/// `/identify`. Takes the whole [`crate::server::Server`] rather than just its `Dispatcher` so
/// that Pair-Verify completion and pairing removal/reset can reach the session registry.
pub async fn route(server: &crate::server::Server, session: &mut crate::session::Session, request: &Request) -> Response {
    let dispatcher = &server.dispatcher;
    match (request.method, request.path.as_str()) {
        (HttpMethod::Post, "/pair-setup") => {
            let Ok(tlv) = TlvSet::decode(&request.body) else {
                return Response::no_content();
            };
            match dispatcher.pair_setup(&mut session.pair_setup_machine, &tlv).await {
                Ok((response, effect)) => {
                    if matches!(effect, SessionEffect::PairSetupComplete) {
                        session.paired = true;
                    }
                    response
                }
                Err(_) => Response::no_content(),
            }
        }
        (HttpMethod::Post, "/pair-verify") => {
            let Ok(tlv) = TlvSet::decode(&request.body) else {
                return Response::no_content();
            };
            match dispatcher.pair_verify(&mut session.pair_verify_machine, &tlv).await {
                Ok((response, SessionEffect::PairVerifyComplete { shared_secret, controller_id })) => {
                    session.establish_record_layer(&shared_secret, controller_id.clone());
                    session.is_admin = matches!(
                        dispatcher.pairing_store.get(&controller_id).await.map(|p| p.permissions),
                        Some(PairingPermissions::Admin)
                    );
                    server.bind_session_controller(session.id, controller_id).await;
                    response
                }
                Ok((response, _)) => response,
                Err(_) => Response::no_content(),
            }
        }
        (HttpMethod::Post, "/identify") if !dispatcher.pairing_store.is_paired().await => dispatcher.identify().await,
        _ if !session.is_verified() => Response::json(
            "HTTP/1.1 470 Connection Authorization Required",
            json!({ "status": HapStatus::InsufficientPrivileges as i32 }).to_string().into_bytes(),
        ),
        (HttpMethod::Get, "/accessories") => dispatcher.get_accessories().await,
        (HttpMethod::Get, "/characteristics") => dispatcher.get_characteristics(session.id, request).await,
        (HttpMethod::Put, "/characteristics") => dispatcher.put_characteristics(session.id, request).await,
        (HttpMethod::Post, "/pairings") => {
            let Ok(tlv) = TlvSet::decode(&request.body) else {
                return Response::no_content();
            };
            let (response, removed) = dispatcher.pairings(session.is_admin, &tlv).await;
            if let Some(controller_id) = removed {
                server.disconnect_controller(&controller_id).await;
            }
            response
        }
        (HttpMethod::Post, "/resource") => dispatcher.resource(request).await,
        (HttpMethod::Post, "/reset") => {
            for controller_id in dispatcher.reset().await {
                server.disconnect_controller(&controller_id).await;
            }
            Response::no_content()
        }
        _ => Response::json(
            "HTTP/1.1 404 Not Found",
            json!({ "status": HapStatus::NoResource as i32 }).to_string().into_bytes(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::srp::SRP_IDENTITY;
    use crate::crypto::{chacha20poly1305_encrypt, hkdf_sha512, literal_nonce, Ed25519Identity};
    use crate::model::AccessoryModel;
    use crate::store::MemoryPairingStore;
    use rand::RngCore;
    use sha2::Sha512;
    use srp::client::{srp_private_key, SrpClient};
    use srp::groups::G_3072;

    #[test]
    fn base64_round_trips() {
        let data = b"hap characteristic data";
        let encoded = base64_encode(data);
        let decoded = base64_decode(&encoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn bool_characteristic_values_accept_numeric_zero_and_one() {
        assert_eq!(
            json_to_characteristic_value(Format::Bool, &json!(1)).unwrap(),
            CharacteristicValue::Bool(true)
        );
        assert_eq!(
            json_to_characteristic_value(Format::Bool, &json!(0)).unwrap(),
            CharacteristicValue::Bool(false)
        );
        assert_eq!(
            json_to_characteristic_value(Format::Bool, &json!(true)).unwrap(),
            CharacteristicValue::Bool(true)
        );
        assert!(json_to_characteristic_value(Format::Bool, &json!(2)).is_err());
    }

    fn test_dispatcher() -> Dispatcher {
        Dispatcher {
            accessories: Mutex::new(AccessoryModel::new(Vec::new())),
            pairing_store: Arc::new(MemoryPairingStore::default()),
            accessory_id: "11:22:33:44:55:66".to_string(),
            accessory_identity: Ed25519Identity::generate(),
            setup_in_flight: Mutex::new(None),
            setup_code_provider: Box::new(|| "031-45-154".to_string()),
            event_bus: EventBus::default(),
            resource_handler: None,
        }
    }

    // S1: a full first-time Pair-Setup admits exactly one admin pairing, and a subsequent
    // Pair-Setup attempt against the now-paired accessory is rejected as Unavailable.
    #[tokio::test]
    async fn first_time_pair_setup_admits_one_pairing_then_rejects_a_second_attempt() {
        let dispatcher = test_dispatcher();
        let mut machine = None;

        let mut m1 = TlvSet::new();
        m1.set_state(1);
        m1.set_u64(Tag::Method, 0);
        let (reply_m2, _) = dispatcher.pair_setup(&mut machine, &m1).await.unwrap();
        let salt = reply_m2.bytes(Tag::Salt).unwrap().to_vec();
        let b_pub = reply_m2.bytes(Tag::PublicKey).unwrap().to_vec();

        let client = SrpClient::<Sha512>::new(&G_3072);
        let mut a_priv = vec![0u8; 64];
        rand::thread_rng().fill_bytes(&mut a_priv);
        let a_pub = client.compute_public_ephemeral(&a_priv);
        let private_key = srp_private_key::<Sha512>(SRP_IDENTITY, b"031-45-154", &salt);
        let verifier = client
            .process_reply(&a_priv, SRP_IDENTITY, &private_key, &salt, &a_pub, &b_pub)
            .unwrap();

        let mut m3 = TlvSet::new();
        m3.set_state(3);
        m3.set_bytes(Tag::PublicKey, a_pub);
        m3.set_bytes(Tag::Proof, verifier.proof().to_vec());
        let (reply_m4, _) = dispatcher.pair_setup(&mut machine, &m3).await.unwrap();
        assert!(verifier.verify_server(reply_m4.bytes(Tag::Proof).unwrap()).is_ok());

        let premaster = verifier.key().to_vec();
        let session_key = hkdf_sha512(b"Pair-Setup-Encrypt-Salt", &premaster, b"Pair-Setup-Encrypt-Info", 32);
        let session_key_array: [u8; 32] = session_key.as_slice().try_into().unwrap();

        let controller_identity = Ed25519Identity::generate();
        let controller_id = b"ABCD-ID".to_vec();
        let controller_public_key = controller_identity.public_key_bytes();

        let x = hkdf_sha512(b"Pair-Setup-Controller-Sign-Salt", &premaster, b"Pair-Setup-Controller-Sign-Info", 32);
        let mut sign_material = x;
        sign_material.extend_from_slice(&controller_id);
        sign_material.extend_from_slice(&controller_public_key);
        let signature = controller_identity.sign(&sign_material);

        let mut inner = TlvSet::new();
        inner.set_bytes(Tag::Identifier, controller_id.clone());
        inner.set_bytes(Tag::PublicKey, controller_public_key.to_vec());
        inner.set_bytes(Tag::Signature, signature.to_vec());
        let encrypted = chacha20poly1305_encrypt(&session_key_array, &literal_nonce(b"PS-Msg05"), &[], &inner.encode());

        let mut m5 = TlvSet::new();
        m5.set_state(5);
        m5.set_bytes(Tag::EncryptedData, encrypted);
        let (reply_m6, effect) = dispatcher.pair_setup(&mut machine, &m5).await.unwrap();
        assert_eq!(reply_m6.u64(Tag::State).unwrap(), Some(6));
        assert!(matches!(effect, SessionEffect::PairSetupComplete));

        assert!(dispatcher.pairing_store.is_paired().await);
        let pairings = dispatcher.pairing_store.list().await;
        assert_eq!(pairings.len(), 1);
        assert_eq!(pairings[0].controller_id, controller_id);
        assert_eq!(pairings[0].permissions, PairingPermissions::Admin);

        let mut second_machine = None;
        let mut retry_m1 = TlvSet::new();
        retry_m1.set_state(1);
        retry_m1.set_u64(Tag::Method, 0);
        let (retry_reply, retry_effect) = dispatcher.pair_setup(&mut second_machine, &retry_m1).await.unwrap();
        assert_eq!(retry_reply.u64(Tag::Error).unwrap(), Some(TlvError::Unavailable as u64));
        assert!(matches!(retry_effect, SessionEffect::None));
    }

    fn add_pairing_tlv(controller_id: &[u8], public_key: [u8; 32], admin: bool) -> TlvSet {
        let mut tlv = TlvSet::new();
        tlv.set_state(1);
        tlv.set_u64(Tag::Method, 3);
        tlv.set_bytes(Tag::Identifier, controller_id.to_vec());
        tlv.set_bytes(Tag::PublicKey, public_key.to_vec());
        tlv.set_u64(Tag::Permissions, u64::from(admin));
        tlv
    }

    #[tokio::test]
    async fn add_pairing_with_matching_key_updates_permissions() {
        let dispatcher = test_dispatcher();
        let key = Ed25519Identity::generate().public_key_bytes();
        dispatcher
            .pairing_store
            .add(Pairing { controller_id: b"c1".to_vec(), public_key: key, permissions: PairingPermissions::Regular })
            .await
            .unwrap();

        let (response, _) = dispatcher.pairings(true, &add_pairing_tlv(b"c1", key, true)).await;
        let reply = TlvSet::decode(&response_body(&response)).unwrap();
        assert!(reply.bytes(Tag::Error).is_none());
        assert_eq!(
            dispatcher.pairing_store.get(b"c1").await.unwrap().permissions,
            PairingPermissions::Admin
        );
    }

    #[tokio::test]
    async fn add_pairing_with_mismatched_key_for_existing_identifier_fails() {
        let dispatcher = test_dispatcher();
        let original_key = Ed25519Identity::generate().public_key_bytes();
        let different_key = Ed25519Identity::generate().public_key_bytes();
        dispatcher
            .pairing_store
            .add(Pairing { controller_id: b"c1".to_vec(), public_key: original_key, permissions: PairingPermissions::Regular })
            .await
            .unwrap();

        let (response, _) = dispatcher.pairings(true, &add_pairing_tlv(b"c1", different_key, true)).await;
        let reply = TlvSet::decode(&response_body(&response)).unwrap();
        assert_eq!(reply.u64(Tag::Error).unwrap(), Some(TlvError::Unknown as u64));
        assert_eq!(
            dispatcher.pairing_store.get(b"c1").await.unwrap().public_key,
            original_key
        );
    }

    #[tokio::test]
    async fn add_pairing_non_admin_requester_is_rejected() {
        let dispatcher = test_dispatcher();
        let key = Ed25519Identity::generate().public_key_bytes();
        let (response, _) = dispatcher.pairings(false, &add_pairing_tlv(b"c1", key, false)).await;
        let reply = TlvSet::decode(&response_body(&response)).unwrap();
        assert_eq!(reply.u64(Tag::Error).unwrap(), Some(TlvError::Unknown as u64));
        assert!(dispatcher.pairing_store.get(b"c1").await.is_none());
    }

    #[tokio::test]
    async fn put_characteristics_multi_status_reports_success_for_every_entry() {
        let dispatcher = Dispatcher {
            accessories: Mutex::new(AccessoryModel::new(vec![crate::model::Accessory {
                aid: 1,
                services: vec![crate::model::Service {
                    iid: 1,
                    type_uri: "0000003E-0000-1000-8000-0026BB765291".into(),
                    hidden: false,
                    primary: true,
                    characteristics: vec![crate::model::Characteristic {
                        iid: 2,
                        type_uri: "light-on".into(),
                        format: Format::Bool,
                        permissions: crate::model::Permissions::PAIRED_WRITE,
                        constraints: crate::model::Constraints::default(),
                        unit: None,
                        handler: crate::model::CharacteristicHandler::static_bool(false),
                        subscribers: crate::model::SubscriberRegistry::default(),
                    }],
                }],
            }])),
            ..test_dispatcher()
        };

        let body = json!({
            "characteristics": [
                { "aid": 1, "iid": 2, "value": true },
                { "aid": 1, "iid": 99, "value": true },
            ]
        })
        .to_string()
        .into_bytes();
        let request = Request::parse(
            format!(
                "PUT /characteristics HTTP/1.1\r\nContent-Length: {}\r\n\r\n{}",
                body.len(),
                String::from_utf8(body).unwrap()
            )
            .as_bytes(),
        )
        .unwrap();

        let response = dispatcher.put_characteristics(SessionId(1), &request).await;
        let parsed: Value = serde_json::from_slice(&response_body(&response)).unwrap();
        let entries = parsed["characteristics"].as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["status"], HapStatus::Success as i32);
        assert_eq!(entries[1]["status"], HapStatus::NoResource as i32);
    }

    #[tokio::test]
    async fn put_characteristics_reports_an_entry_for_a_write_missing_aid_or_iid() {
        let dispatcher = test_dispatcher();
        let body = json!({
            "characteristics": [
                { "iid": 2, "value": true },
                { "aid": 1, "value": true },
            ]
        })
        .to_string()
        .into_bytes();
        let request = Request::parse(
            format!(
                "PUT /characteristics HTTP/1.1\r\nContent-Length: {}\r\n\r\n{}",
                body.len(),
                String::from_utf8(body).unwrap()
            )
            .as_bytes(),
        )
        .unwrap();

        let response = dispatcher.put_characteristics(SessionId(1), &request).await;
        let parsed: Value = serde_json::from_slice(&response_body(&response)).unwrap();
        let entries = parsed["characteristics"].as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e["status"] == HapStatus::InvalidValue as i32));
        assert_eq!(entries[0]["aid"], Value::Null);
        assert_eq!(entries[0]["iid"], 2);
        assert_eq!(entries[1]["aid"], 1);
        assert_eq!(entries[1]["iid"], Value::Null);
    }

    fn get_request(query: &str) -> Request {
        let raw = format!("GET /characteristics?{query} HTTP/1.1\r\nHost: x\r\n\r\n");
        Request::parse(raw.as_bytes()).unwrap()
    }

    #[tokio::test]
    async fn get_characteristics_honors_meta_perms_type_and_ev_flags() {
        let dispatcher = Dispatcher {
            accessories: Mutex::new(AccessoryModel::new(vec![crate::model::Accessory {
                aid: 1,
                services: vec![crate::model::Service {
                    iid: 1,
                    type_uri: "0000003E-0000-1000-8000-0026BB765291".into(),
                    hidden: false,
                    primary: true,
                    characteristics: vec![crate::model::Characteristic {
                        iid: 2,
                        type_uri: "00000025-0000-1000-8000-0026BB765291".into(),
                        format: Format::Bool,
                        permissions: crate::model::Permissions::PAIRED_READ | crate::model::Permissions::NOTIFY,
                        constraints: crate::model::Constraints::default(),
                        unit: None,
                        handler: crate::model::CharacteristicHandler::static_bool(true),
                        subscribers: crate::model::SubscriberRegistry::default(),
                    }],
                }],
            }])),
            ..test_dispatcher()
        };
        let session = SessionId(1);
        dispatcher
            .accessories
            .lock()
            .await
            .find_by_id_mut(1, 2)
            .unwrap()
            .set_subscribed(session, true)
            .unwrap();

        let response = dispatcher
            .get_characteristics(session, &get_request("id=1.2&meta=1&perms=1&type=1&ev=1"))
            .await;
        let body: Value = serde_json::from_slice(&response_body(&response)).unwrap();
        let entry = &body["characteristics"][0];
        assert_eq!(entry["format"], "bool");
        assert_eq!(entry["type"], "00000025-0000-1000-8000-0026BB765291");
        assert_eq!(entry["ev"], true);
        assert!(entry["perms"].as_array().unwrap().contains(&json!("pr")));

        let plain = dispatcher.get_characteristics(session, &get_request("id=1.2")).await;
        let plain_body: Value = serde_json::from_slice(&response_body(&plain)).unwrap();
        let plain_entry = &plain_body["characteristics"][0];
        assert!(plain_entry.get("format").is_none());
        assert!(plain_entry.get("ev").is_none());
    }

    fn response_body(response: &Response) -> Vec<u8> {
        let bytes = response.to_bytes();
        let split = bytes.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
        bytes[split..].to_vec()
    }
}
