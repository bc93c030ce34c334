//! TerminalSession: per-connection protocol state and the APDU dispatcher.
//!
//! One session exists per TCP connection and is owned by that connection's
//! read loop, so its fields need no locking.  Other tasks observe it only
//! through the [`SessionSnapshot`] the read loop publishes after each batch.

use std::sync::Arc;
use std::time::SystemTime;

use jt808_core::protocol::{
    ids, Apdu, LocationReport, LoginRequest, Message, PhoneNumber, PlatformAck, ProtocolError,
    RegisterAck, TerminalAck, RESULT_FAILED, RESULT_OK,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::application::ports::{DeviceDirectory, DeviceRecord, GpsSample, TelemetrySink};

/// Outcome of dispatching one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Send this message back to the terminal.
    Reply(Message),
    /// The terminal acknowledged a firmware segment; no reply is sent.
    SegmentAck(TerminalAck),
    /// Nothing to send.
    Silent,
}

/// Read-only view of a session for listings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub address: String,
    pub phone: Option<PhoneNumber>,
    pub imei: String,
    pub iccid: String,
    pub vin: String,
    pub firmware_version: String,
    pub login_time: Option<SystemTime>,
    pub verified: bool,
}

impl SessionSnapshot {
    /// An empty snapshot for a freshly accepted connection.
    pub fn connected(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    /// Phone digits, or `"-"` before the first frame.
    pub fn phone_digits(&self) -> String {
        self.phone.map_or_else(|| "-".to_string(), |p| p.digits())
    }
}

/// Protocol state for one live terminal connection.
pub struct TerminalSession {
    address: String,
    phone: Option<PhoneNumber>,
    sequence: u16,
    imei: String,
    auth_key: String,
    vehicle_vin: String,
    iccid: String,
    firmware_version: String,
    login_time: Option<SystemTime>,
    verified: bool,
    directory: Arc<dyn DeviceDirectory>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl TerminalSession {
    pub fn new(
        address: impl Into<String>,
        directory: Arc<dyn DeviceDirectory>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            address: address.into(),
            phone: None,
            sequence: 0,
            imei: String::new(),
            auth_key: String::new(),
            vehicle_vin: String::new(),
            iccid: String::new(),
            firmware_version: String::new(),
            login_time: None,
            verified: false,
            directory,
            telemetry,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Phone captured from the first frame.
    pub fn phone(&self) -> Option<PhoneNumber> {
        self.phone
    }

    /// Last inbound sequence number.
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    pub fn imei(&self) -> &str {
        &self.imei
    }

    pub fn auth_key(&self) -> &str {
        &self.auth_key
    }

    pub fn firmware_version(&self) -> &str {
        &self.firmware_version
    }

    /// `true` once a login presented the provisioned auth key.
    pub fn is_verified(&self) -> bool {
        self.verified
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            address: self.address.clone(),
            phone: self.phone,
            imei: self.imei.clone(),
            iccid: self.iccid.clone(),
            vin: self.vehicle_vin.clone(),
            firmware_version: self.firmware_version.clone(),
            login_time: self.login_time,
            verified: self.verified,
        }
    }

    /// Updates bookkeeping from the header, then dispatches on the APDU.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedApdu`] when the body is too short for
    /// its message id.  The header bookkeeping has already happened by then.
    pub async fn handle_message(&mut self, msg: &Message) -> Result<Dispatch, ProtocolError> {
        self.observe_header(msg);

        match Apdu::parse(msg)? {
            Apdu::TerminalAck(ack) => Ok(self.on_terminal_ack(ack)),
            Apdu::Register => Ok(self.on_register().await),
            Apdu::Login(login) => Ok(self.on_login(login).await),
            Apdu::Heartbeat => {
                debug!("session {}: heartbeat", self.address);
                Ok(Dispatch::Reply(self.common_ack(ids::HEARTBEAT, RESULT_OK)))
            }
            Apdu::Location(report) => Ok(self.on_location(report).await),
            Apdu::Unrecognized(id) => {
                debug!("session {}: ignoring message 0x{id:04X}", self.address);
                Ok(Dispatch::Silent)
            }
        }
    }

    // ── Handlers ──────────────────────────────────────────────────────────────

    fn observe_header(&mut self, msg: &Message) {
        let phone = msg.header.phone;
        match self.phone {
            None => {
                info!("session {}: terminal phone {phone}", self.address);
                self.phone = Some(phone);
            }
            Some(current) if current != phone => {
                warn!(
                    "session {}: frame from phone {phone}, session bound to {current}",
                    self.address
                );
            }
            Some(_) => {}
        }
        self.sequence = msg.header.sequence;
    }

    fn on_terminal_ack(&self, ack: TerminalAck) -> Dispatch {
        if ack.reply_id == ids::FIRMWARE_UPDATE {
            debug!(
                "session {}: firmware segment ack (seq {}, result {})",
                self.address, ack.reply_sequence, ack.result
            );
            Dispatch::SegmentAck(ack)
        } else {
            debug!(
                "session {}: terminal ack for 0x{:04X}",
                self.address, ack.reply_id
            );
            Dispatch::Silent
        }
    }

    async fn on_register(&mut self) -> Dispatch {
        let phone = self.bound_phone();
        let Some(record) = self.directory.lookup_by_phone(&phone).await else {
            info!("session {}: register from unprovisioned phone {phone}", self.address);
            return Dispatch::Silent;
        };

        self.adopt_record_metadata(&record);
        let body = RegisterAck {
            reply_sequence: self.sequence,
            result: RESULT_OK,
            auth_key: record.auth_key,
        }
        .encode();
        info!("session {}: registered phone {phone}", self.address);
        Dispatch::Reply(self.reply(ids::REGISTER_ACK, body))
    }

    async fn on_login(&mut self, login: LoginRequest) -> Dispatch {
        let phone = self.bound_phone();
        let record = self.directory.lookup_by_phone(&phone).await;
        if let Some(expected) = record.as_ref().filter(|r| r.imei_conflicts(&login.imei)) {
            warn!(
                "session {}: phone {phone} logged in with imei {} but {} is provisioned",
                self.address,
                login.imei,
                expected.imei.as_deref().unwrap_or_default()
            );
        }
        let result = match record {
            Some(record) if record.auth_key == login.auth_key => {
                self.adopt_record_metadata(&record);
                self.verified = true;
                RESULT_OK
            }
            Some(_) => {
                warn!("session {}: auth key mismatch for phone {phone}", self.address);
                self.verified = false;
                RESULT_FAILED
            }
            None => {
                self.verified = false;
                RESULT_OK
            }
        };

        self.auth_key = login.auth_key;
        self.imei = login.imei;
        self.firmware_version = login.firmware_version;
        self.login_time = Some(SystemTime::now());
        info!(
            "session {}: login imei={} version={} verified={}",
            self.address, self.imei, self.firmware_version, self.verified
        );

        Dispatch::Reply(self.common_ack(ids::LOGIN, result))
    }

    async fn on_location(&mut self, report: LocationReport) -> Dispatch {
        let sample = GpsSample {
            imei: self.imei.clone(),
            received_at: SystemTime::now(),
            warn_flags: report.warn_flags,
            state_flags: report.state_flags,
            latitude: report.latitude,
            longitude: report.longitude,
            altitude: report.altitude,
            speed: report.speed,
            heading: report.heading,
            ignition_on: report.ignition_on(),
            gps_valid: report.gps_valid(),
        };
        if let Err(e) = self.telemetry.record_gps_sample(&sample).await {
            warn!("session {}: telemetry sink failed: {e}", self.address);
        }
        Dispatch::Reply(self.common_ack(ids::GPS_INFO, RESULT_OK))
    }

    // ── Reply builders ────────────────────────────────────────────────────────

    fn common_ack(&self, reply_id: u16, result: u8) -> Message {
        let body = PlatformAck {
            reply_sequence: self.sequence,
            reply_id,
            result,
        }
        .encode();
        self.reply(ids::PLATFORM_ACK, body)
    }

    fn reply(&self, message_id: u16, body: Vec<u8>) -> Message {
        Message::platform(message_id, self.bound_phone(), self.sequence, body)
    }

    fn bound_phone(&self) -> PhoneNumber {
        self.phone.unwrap_or_default()
    }

    fn adopt_record_metadata(&mut self, record: &DeviceRecord) {
        if let Some(vin) = &record.vin {
            self.vehicle_vin.clone_from(vin);
        }
        if let Some(iccid) = &record.iccid {
            self.iccid.clone_from(iccid);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
