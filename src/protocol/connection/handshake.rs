use zerocopy::byteorder::little_endian::{U16 as U16LE, U32 as U32LE};
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::constant::{
    CAPABILITIES_ALWAYS_ENABLED, CAPABILITIES_CONFIGURABLE, CapabilityFlags, ServerStatusFlags,
};
use crate::error::{Error, Result};
use crate::protocol::primitive::*;
use crate::protocol::response::ErrPayloadBytes;

const MAX_PACKET_SIZE: u32 = 16777216;

/// utf8mb4_general_ci
const CLIENT_CHARSET: u8 = 45;

const NATIVE_PASSWORD: &[u8] = b"mysql_native_password";
const CACHING_SHA2_PASSWORD: &[u8] = b"caching_sha2_password";

#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
struct HandshakeFixedFields {
    connection_id: U32LE,
    auth_data_part1: [u8; 8],
    filler: u8,
    capability_flags_lower: U16LE,
    charset: u8,
    status_flags: U16LE,
    capability_flags_upper: U16LE,
    auth_data_len: u8,
}

#[derive(Debug, Clone)]
pub struct InitialHandshake {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    pub auth_plugin_data: Vec<u8>,
    pub capability_flags: CapabilityFlags,
    pub charset: u8,
    pub status_flags: ServerStatusFlags,
    pub auth_plugin_name: Vec<u8>,
}

/// Read initial handshake packet (protocol version 10) from server
pub fn read_initial_handshake(payload: &[u8]) -> Result<InitialHandshake> {
    let (protocol_version, data) = read_int_1(payload)?;

    if protocol_version == 0xFF {
        Err(ErrPayloadBytes(payload))?
    }
    if protocol_version != 10 {
        return Err(Error::InvalidPacket);
    }

    let (server_version, data) = read_string_null(data)?;

    let (fixed, rest) =
        HandshakeFixedFields::ref_from_prefix(data).map_err(|_| Error::UnexpectedEof)?;

    let cap_bits = (u32::from(fixed.capability_flags_upper.get()) << 16)
        | u32::from(fixed.capability_flags_lower.get());
    let capability_flags = CapabilityFlags::from_bits_retain(cap_bits);

    let (_reserved, rest) = read_string_fix(rest, 10)?;

    let auth_data_2_len = usize::from(fixed.auth_data_len).saturating_sub(9).max(12);
    let (auth_data_2, rest) = read_string_fix(rest, auth_data_2_len)?;
    let (_reserved, rest) = read_int_1(rest)?;

    let mut auth_plugin_data = Vec::with_capacity(8 + auth_data_2.len());
    auth_plugin_data.extend_from_slice(&fixed.auth_data_part1);
    auth_plugin_data.extend_from_slice(auth_data_2);

    // pre-4.1 style servers do not send a plugin name
    let auth_plugin_name = if rest.is_empty() {
        NATIVE_PASSWORD.to_vec()
    } else {
        match read_string_null(rest) {
            Ok((name, _rest)) => name.to_vec(),
            Err(_) => rest.to_vec(),
        }
    };

    Ok(InitialHandshake {
        protocol_version,
        server_version: String::from_utf8_lossy(server_version).into_owned(),
        connection_id: fixed.connection_id.get(),
        auth_plugin_data,
        capability_flags,
        charset: fixed.charset,
        status_flags: ServerStatusFlags::from_bits_truncate(fixed.status_flags.get()),
        auth_plugin_name,
    })
}

/// Handshake response packet sent by client (HandshakeResponse41)
#[derive(Debug, Clone)]
pub struct HandshakeResponse41<'a> {
    pub capability_flags: CapabilityFlags,
    pub max_packet_size: u32,
    pub charset: u8,
    pub username: &'a str,
    pub auth_response: &'a [u8],
    pub database: Option<&'a str>,
    pub auth_plugin_name: &'a [u8],
}

/// Write handshake response packet (HandshakeResponse41)
pub fn write_handshake_response(out: &mut Vec<u8>, response: &HandshakeResponse41<'_>) {
    write_int_4(out, response.capability_flags.bits());
    write_int_4(out, response.max_packet_size);
    write_int_1(out, response.charset);
    out.extend_from_slice(&[0u8; 23]);

    write_string_null(out, response.username);

    if response
        .capability_flags
        .contains(CapabilityFlags::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA)
    {
        write_bytes_lenenc(out, response.auth_response);
    } else {
        // auth responses are 20 or 32 bytes, well below the 1-byte limit
        write_int_1(out, response.auth_response.len() as u8);
        out.extend_from_slice(response.auth_response);
    }

    if let Some(db) = response.database
        && response
            .capability_flags
            .contains(CapabilityFlags::CLIENT_CONNECT_WITH_DB)
    {
        write_string_null(out, db);
    }

    if response
        .capability_flags
        .contains(CapabilityFlags::CLIENT_PLUGIN_AUTH)
    {
        out.extend_from_slice(response.auth_plugin_name);
        out.push(0);
    }
}

/// Auth switch request from server
#[derive(Debug, Clone)]
pub struct AuthSwitchRequest<'a> {
    pub plugin_name: &'a [u8],
    pub plugin_data: &'a [u8],
}

/// Read auth switch request (0xFE with length >= 9)
pub fn read_auth_switch_request(payload: &[u8]) -> Result<AuthSwitchRequest<'_>> {
    let (header, data) = read_int_1(payload)?;
    if header != 0xFE {
        return Err(Error::InvalidPacket);
    }

    let (plugin_name, data) = read_string_null(data)?;
    let plugin_data = data.strip_suffix(&[0u8]).unwrap_or(data);

    Ok(AuthSwitchRequest {
        plugin_name,
        plugin_data,
    })
}

// ============================================================================
// Authentication Plugins
// ============================================================================

/// mysql_native_password authentication
///
/// Formula: SHA1(password) XOR SHA1(challenge + SHA1(SHA1(password)))
pub fn auth_mysql_native_password(password: &str, challenge: &[u8]) -> Vec<u8> {
    use sha1::{Digest, Sha1};

    if password.is_empty() {
        return Vec::new();
    }

    let stage1_hash = Sha1::digest(password.as_bytes());
    let stage2_hash = Sha1::digest(stage1_hash);

    let mut hasher = Sha1::new();
    hasher.update(challenge);
    hasher.update(stage2_hash);
    let token_hash = hasher.finalize();

    stage1_hash
        .iter()
        .zip(token_hash.iter())
        .map(|(a, b)| a ^ b)
        .collect()
}

/// caching_sha2_password authentication - initial response
///
/// Formula: XOR(SHA256(password), SHA256(SHA256(SHA256(password)), challenge))
pub fn auth_caching_sha2_password(password: &str, challenge: &[u8]) -> Vec<u8> {
    use sha2::{Digest, Sha256};

    if password.is_empty() {
        return Vec::new();
    }

    let stage1 = Sha256::digest(password.as_bytes());
    let stage2 = Sha256::digest(stage1);

    let mut hasher = Sha256::new();
    hasher.update(stage2);
    hasher.update(challenge);
    let scramble = hasher.finalize();

    stage1
        .iter()
        .zip(scramble.iter())
        .map(|(a, b)| a ^ b)
        .collect()
}

fn auth_response(plugin: &[u8], password: &str, challenge: &[u8]) -> Result<Vec<u8>> {
    // the challenge is sent with a trailing NUL byte
    let challenge = challenge.get(..20).unwrap_or(challenge);
    match plugin {
        NATIVE_PASSWORD => Ok(auth_mysql_native_password(password, challenge)),
        CACHING_SHA2_PASSWORD => Ok(auth_caching_sha2_password(password, challenge)),
        plugin => Err(Error::UnsupportedAuthPlugin(
            String::from_utf8_lossy(plugin).into_owned(),
        )),
    }
}

// ============================================================================
// State Machine API for Handshake
// ============================================================================

/// Configuration for handshake
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    pub username: String,
    pub password: String,
    pub database: Option<String>,
    pub capabilities: CapabilityFlags,
}

/// Result of driving the handshake state machine
pub enum HandshakeResult {
    /// Initial handshake received - write response to server
    InitialHandshake {
        handshake_response: Vec<u8>,
        initial_handshake: InitialHandshake,
    },
    /// Write this packet to the server, then read next response
    Write(Vec<u8>),
    /// Nothing to write, read next response
    NeedPacket,
    /// Handshake complete, connection established
    Connected { capability_flags: CapabilityFlags },
}

/// State machine for MySQL handshake
///
/// Pure parsing and packet generation state machine without I/O dependencies.
pub enum Handshake {
    /// Waiting for initial handshake from server
    Start { config: HandshakeConfig },
    /// Sent an auth response, waiting for OK, ERR, auth switch or more auth data
    WaitingAuthResult {
        password: String,
        capability_flags: CapabilityFlags,
        switched: bool,
    },
    /// Connected (terminal state)
    Connected,
}

impl Handshake {
    pub fn new(
        username: String,
        password: String,
        database: Option<String>,
        capabilities: CapabilityFlags,
    ) -> Self {
        Self::Start {
            config: HandshakeConfig {
                username,
                password,
                database,
                capabilities,
            },
        }
    }

    /// Drive the state machine with the next payload
    pub fn drive(&mut self, payload: &[u8]) -> Result<HandshakeResult> {
        match std::mem::replace(self, Self::Connected) {
            Self::Start { config } => {
                let handshake = read_initial_handshake(payload)?;

                let mut client_caps =
                    CAPABILITIES_ALWAYS_ENABLED | (config.capabilities & CAPABILITIES_CONFIGURABLE);
                if config.database.is_some() {
                    client_caps |= CapabilityFlags::CLIENT_CONNECT_WITH_DB;
                }
                let negotiated_caps = client_caps & handshake.capability_flags;
                if !negotiated_caps.contains(CapabilityFlags::CLIENT_PROTOCOL_41) {
                    return Err(Error::BadConfigError(
                        "server does not support protocol 4.1".to_string(),
                    ));
                }

                let auth_response = auth_response(
                    &handshake.auth_plugin_name,
                    &config.password,
                    &handshake.auth_plugin_data,
                )?;

                let response = HandshakeResponse41 {
                    capability_flags: negotiated_caps,
                    max_packet_size: MAX_PACKET_SIZE,
                    charset: CLIENT_CHARSET,
                    username: &config.username,
                    auth_response: &auth_response,
                    database: config.database.as_deref(),
                    auth_plugin_name: &handshake.auth_plugin_name,
                };

                let mut handshake_response = Vec::new();
                write_handshake_response(&mut handshake_response, &response);

                *self = Self::WaitingAuthResult {
                    password: config.password,
                    capability_flags: negotiated_caps,
                    switched: false,
                };

                Ok(HandshakeResult::InitialHandshake {
                    handshake_response,
                    initial_handshake: handshake,
                })
            }

            Self::WaitingAuthResult {
                password,
                capability_flags,
                switched,
            } => match payload.first() {
                Some(0x00) => Ok(HandshakeResult::Connected { capability_flags }),
                Some(0xFF) => Err(ErrPayloadBytes(payload).into()),
                // AuthMoreData of caching_sha2_password
                Some(0x01) => match payload.get(1) {
                    Some(0x03) => {
                        // fast auth succeeded, an OK packet follows
                        *self = Self::WaitingAuthResult {
                            password,
                            capability_flags,
                            switched,
                        };
                        Ok(HandshakeResult::NeedPacket)
                    }
                    Some(0x04) => Err(Error::UnsupportedAuthPlugin(
                        "caching_sha2_password full auth (requires TLS or RSA)".to_string(),
                    )),
                    _ => Err(Error::InvalidPacket),
                },
                Some(0xFE) if !switched => {
                    let auth_switch = read_auth_switch_request(payload)?;
                    let response = auth_response(
                        auth_switch.plugin_name,
                        &password,
                        auth_switch.plugin_data,
                    )?;

                    *self = Self::WaitingAuthResult {
                        password,
                        capability_flags,
                        switched: true,
                    };
                    Ok(HandshakeResult::Write(response))
                }
                _ => Err(Error::InvalidPacket),
            },

            // Should not receive more data after connected
            Self::Connected => Err(Error::InvalidPacket),
        }
    }
}
