use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use webproc_frame::Channel;

use crate::control::{Hello, HelloAck};
use crate::error::{HandshakeError, MessageError};
use crate::message::{
    tag_name, Message, FLAG_REPLY_EXPECTED, HELLO, HELLO_ACK, MESSAGE_HEADER_SIZE,
};

const MAX_PROTOCOL_LEN: usize = 32;
const MAX_CAPABILITIES: usize = 64;
const MAX_CAPABILITY_LEN: usize = 64;

/// Protocol name both sides must agree on.
pub const DEFAULT_PROTOCOL_NAME: &str = "webproc";

/// Frame ceiling while the handshake runs.
pub const DEFAULT_MAX_HANDSHAKE_PAYLOAD: usize = 16 * 1024;

type Result<T> = std::result::Result<T, HandshakeError>;

/// Inclusive range of protocol versions a side can speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionRange {
    pub min: u16,
    pub max: u16,
}

impl VersionRange {
    pub const fn new(min: u16, max: u16) -> Self {
        Self { min, max }
    }

    pub const fn exact(version: u16) -> Self {
        Self::new(version, version)
    }

    pub fn contains(&self, version: u16) -> bool {
        self.min <= version && version <= self.max
    }

    /// The highest version both ranges contain, if any.
    ///
    /// For two sides advertising `v1 <= v2` as their highest versions this is
    /// `v1`, provided `v1` is still within the other side's range.
    pub fn negotiate(&self, peer: &VersionRange) -> Option<u16> {
        let version = self.max.min(peer.max);
        (version >= self.min.max(peer.min)).then_some(version)
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.min == self.max {
            write!(f, "{}", self.min)
        } else {
            write!(f, "{}..={}", self.min, self.max)
        }
    }
}

/// Which side opens the conversation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Role {
    /// Sends `HELLO` and waits for `HELLO_ACK`.
    Initiator,
    /// Waits for `HELLO` and answers it. The web process default.
    #[default]
    Responder,
}

/// Handshake progress. Moves forward exactly once per channel.
///
/// The initiator walks every state. The responder goes from
/// `Uninitialized` straight to `VersionAcked` once it has accepted a `HELLO`
/// and sent its answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Uninitialized,
    VersionSent,
    VersionAcked,
    Ready,
    Failed,
}

/// Configuration for handshake negotiation.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    pub role: Role,
    pub protocol_name: String,
    /// Versions this side speaks.
    pub versions: VersionRange,
    /// Capabilities this side offers. The result carries the common subset.
    pub capabilities: Vec<String>,
    /// Deadline for the awaited handshake message.
    pub timeout: Duration,
    /// Frame ceiling in force while the handshake runs.
    pub max_handshake_payload: usize,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            role: Role::default(),
            protocol_name: DEFAULT_PROTOCOL_NAME.to_string(),
            versions: VersionRange::exact(1),
            capabilities: Vec::new(),
            timeout: Duration::from_secs(5),
            max_handshake_payload: DEFAULT_MAX_HANDSHAKE_PAYLOAD,
        }
    }
}

/// Result of a successful handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResult {
    pub role: Role,
    /// Negotiated protocol version.
    pub version: u16,
    /// What the peer advertised.
    pub peer_versions: VersionRange,
    /// Capabilities both sides advertised, in local order.
    pub capabilities: Vec<String>,
}

/// A single-use handshake over a [`Channel`].
#[derive(Debug)]
pub struct Handshake {
    config: HandshakeConfig,
    state: HandshakeState,
}

impl Handshake {
    pub fn new(config: HandshakeConfig) -> Self {
        Self {
            config,
            state: HandshakeState::Uninitialized,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn config(&self) -> &HandshakeConfig {
        &self.config
    }

    /// Run the handshake for the configured role.
    ///
    /// On failure the state becomes `Failed` and the channel is closed.
    /// A second call returns `HandshakeError::AlreadyCompleted` and leaves the
    /// channel untouched.
    pub fn run(&mut self, channel: &Channel) -> Result<HandshakeResult> {
        if self.state != HandshakeState::Uninitialized {
            return Err(HandshakeError::AlreadyCompleted);
        }

        let result = validate_config(&self.config).and_then(|()| {
            let _ceiling = FrameCeiling::lower(channel, self.config.max_handshake_payload);
            match self.config.role {
                Role::Initiator => self.initiate(channel),
                Role::Responder => self.respond(channel),
            }
        });

        match result {
            Ok(result) => {
                self.transition(HandshakeState::Ready);
                info!(
                    role = ?result.role,
                    version = result.version,
                    capabilities = ?result.capabilities,
                    "handshake complete"
                );
                Ok(result)
            }
            Err(err) => {
                self.transition(HandshakeState::Failed);
                warn!(role = ?self.config.role, error = %err, "handshake failed");
                channel.close();
                Err(err)
            }
        }
    }

    fn initiate(&mut self, channel: &Channel) -> Result<HandshakeResult> {
        let hello = Hello {
            protocol: self.config.protocol_name.clone(),
            min_version: self.config.versions.min,
            max_version: self.config.versions.max,
            capabilities: self.config.capabilities.clone(),
        };
        let mut request = Message::json(HELLO, &hello)?;
        request.flags |= FLAG_REPLY_EXPECTED;
        let deadline = Instant::now() + self.config.timeout;
        channel.send(&request.encode())?;
        self.transition(HandshakeState::VersionSent);

        let reply = self.await_message(channel, HELLO_ACK, deadline)?;
        let ack: HelloAck = reply.parse_json()?;
        let local = self.config.versions;
        let peer = VersionRange::new(ack.min_version, ack.max_version);

        if ack.protocol != self.config.protocol_name {
            return Err(HandshakeError::Protocol(format!(
                "unknown protocol '{}' (expected '{}')",
                ack.protocol, self.config.protocol_name
            )));
        }
        if !ack.accepted {
            debug!(reason = ?ack.reason, "peer rejected hello");
            return Err(HandshakeError::VersionMismatch { local, peer });
        }
        if !local.contains(ack.version) {
            return Err(HandshakeError::VersionMismatch { local, peer });
        }
        self.transition(HandshakeState::VersionAcked);

        Ok(HandshakeResult {
            role: Role::Initiator,
            version: ack.version,
            peer_versions: peer,
            capabilities: intersect(&self.config.capabilities, &ack.capabilities),
        })
    }

    fn respond(&mut self, channel: &Channel) -> Result<HandshakeResult> {
        let deadline = Instant::now() + self.config.timeout;
        let request = self.await_message(channel, HELLO, deadline)?;
        let hello: Hello = request.parse_json()?;
        let local = self.config.versions;
        let peer = VersionRange::new(hello.min_version, hello.max_version);

        let mut ack = HelloAck {
            protocol: self.config.protocol_name.clone(),
            accepted: false,
            version: 0,
            min_version: local.min,
            max_version: local.max,
            capabilities: Vec::new(),
            reason: None,
        };

        if hello.protocol != self.config.protocol_name {
            ack.reason = Some(format!("unknown protocol '{}'", hello.protocol));
            send_ack(channel, &request, &ack)?;
            return Err(HandshakeError::Protocol(format!(
                "unknown protocol '{}' (expected '{}')",
                hello.protocol, self.config.protocol_name
            )));
        }

        // Always answer, so a mismatched initiator learns why instead of timing out.
        let Some(version) = local.negotiate(&peer) else {
            ack.reason = Some(format!("no common version (local {local}, peer {peer})"));
            send_ack(channel, &request, &ack)?;
            return Err(HandshakeError::VersionMismatch { local, peer });
        };

        let capabilities = intersect(&self.config.capabilities, &hello.capabilities);
        ack.accepted = true;
        ack.version = version;
        ack.capabilities = capabilities.clone();
        send_ack(channel, &request, &ack)?;
        self.transition(HandshakeState::VersionAcked);

        Ok(HandshakeResult {
            role: Role::Responder,
            version,
            peer_versions: peer,
            capabilities,
        })
    }

    fn await_message(
        &self,
        channel: &Channel,
        expected: u16,
        deadline: Instant,
    ) -> Result<Message> {
        let payload = match channel.receive_deadline(deadline) {
            Ok(payload) => payload,
            Err(err) if err.is_timeout() => {
                return Err(HandshakeError::Timeout(self.config.timeout))
            }
            Err(err) => return Err(err.into()),
        };

        let message = Message::decode(payload)?;
        if message.tag != expected {
            return Err(HandshakeError::Protocol(format!(
                "expected {}, got tag {}",
                tag_name(expected).unwrap_or("handshake message"),
                message.tag
            )));
        }
        Ok(message)
    }

    fn transition(&mut self, next: HandshakeState) {
        debug!(from = ?self.state, to = ?next, "handshake state");
        self.state = next;
    }
}

/// Run a one-off handshake with `config`.
pub fn handshake(channel: &Channel, config: HandshakeConfig) -> Result<HandshakeResult> {
    Handshake::new(config).run(channel)
}

fn send_ack(channel: &Channel, request: &Message, ack: &HelloAck) -> Result<()> {
    let body = serde_json::to_vec(ack).map_err(MessageError::from)?;
    channel.send(&request.reply(HELLO_ACK, body).encode())?;
    Ok(())
}

/// Lowers the channel's frame ceiling for the duration of the handshake.
struct FrameCeiling<'a> {
    channel: &'a Channel,
    previous: usize,
}

impl<'a> FrameCeiling<'a> {
    fn lower(channel: &'a Channel, limit: usize) -> Self {
        let previous = channel.max_frame_size();
        channel.set_max_frame_size(limit.min(previous));
        Self { channel, previous }
    }
}

impl Drop for FrameCeiling<'_> {
    fn drop(&mut self) {
        self.channel.set_max_frame_size(self.previous);
    }
}

fn intersect(local: &[String], peer: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for capability in local {
        if peer.contains(capability) && !out.contains(capability) {
            out.push(capability.clone());
        }
    }
    out
}

fn validate_config(config: &HandshakeConfig) -> Result<()> {
    let invalid = |msg: String| Err(HandshakeError::InvalidConfig(msg));

    if config.protocol_name.is_empty() || config.protocol_name.len() > MAX_PROTOCOL_LEN {
        return invalid(format!(
            "protocol name length {} (must be 1..={MAX_PROTOCOL_LEN})",
            config.protocol_name.len()
        ));
    }
    if config.versions.min > config.versions.max {
        return invalid(format!(
            "empty version range {}..={}",
            config.versions.min, config.versions.max
        ));
    }
    if config.capabilities.len() > MAX_CAPABILITIES {
        return invalid(format!(
            "too many capabilities: {} (max {MAX_CAPABILITIES})",
            config.capabilities.len()
        ));
    }
    if let Some(bad) = config
        .capabilities
        .iter()
        .find(|c| c.is_empty() || c.len() > MAX_CAPABILITY_LEN)
    {
        return invalid(format!("invalid capability name '{bad}'"));
    }
    if config.timeout.is_zero() {
        return invalid("timeout must be non-zero".to_string());
    }
    if config.max_handshake_payload < MESSAGE_HEADER_SIZE {
        return invalid(format!(
            "max handshake payload {} is smaller than a message header",
            config.max_handshake_payload
        ));
    }
    Ok(())
}
