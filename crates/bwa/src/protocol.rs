//! BWA message framing and payload layouts.
//!
//! Frame: `0x7E | len | type[3] | payload | crc | 0x7E`. `len` counts the
//! length byte, the three type bytes, the payload and the checksum.

use tracing::trace;

use crate::{Error, Result};

pub const DEFAULT_PORT: u16 = 4257;
pub const DELIMITER: u8 = 0x7E;

const CLIENT_PREFIX: [u8; 2] = [0x0A, 0xBF];
const MIN_LEN: usize = 5;

// Message types (third type byte)
pub const MSG_CONFIG_REQUEST: u8 = 0x04;
pub const MSG_TOGGLE_ITEM: u8 = 0x11;
pub const MSG_STATUS_UPDATE: u8 = 0x13;
pub const MSG_SET_TEMPERATURE: u8 = 0x20;
pub const MSG_PANEL_REQUEST: u8 = 0x22;
pub const MSG_PANEL_CONFIG: u8 = 0x2E;

// Toggle item codes
pub const ITEM_PUMP1: u8 = 0x04;
pub const ITEM_BLOWER: u8 = 0x0C;
pub const ITEM_LIGHT1: u8 = 0x11;

pub const PUMP_COUNT: usize = 6;
pub const LIGHT_COUNT: usize = 2;

/// CRC-8, polynomial 0x07, initial value 0x02, final XOR 0x02.
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc: u8 = 0x02;
    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 { (crc << 1) ^ 0x07 } else { crc << 1 };
        }
    }
    crc ^ 0x02
}

pub fn encode_frame(kind: [u8; 3], payload: &[u8]) -> Vec<u8> {
    let len = payload.len() + MIN_LEN;
    let mut frame = Vec::with_capacity(len + 2);
    frame.push(DELIMITER);
    frame.push(len as u8);
    frame.extend_from_slice(&kind);
    frame.extend_from_slice(payload);
    let crc = crc8(&frame[1..]);
    frame.push(crc);
    frame.push(DELIMITER);
    frame
}

fn client_frame(msg: u8, payload: &[u8]) -> Vec<u8> {
    encode_frame([CLIENT_PREFIX[0], CLIENT_PREFIX[1], msg], payload)
}

pub fn panel_request(a: u8, b: u8) -> Vec<u8> {
    client_frame(MSG_PANEL_REQUEST, &[a, 0x00, b])
}

pub fn toggle_item(item: u8) -> Vec<u8> {
    client_frame(MSG_TOGGLE_ITEM, &[item, 0x00])
}

pub fn set_temperature(raw: u8) -> Vec<u8> {
    client_frame(MSG_SET_TEMPERATURE, &[raw])
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: [u8; 3],
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn message_type(&self) -> u8 {
        self.kind[2]
    }
}

/// Incremental decoder over the TCP byte stream. Garbage between frames and
/// frames with a bad checksum are skipped.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn next_frame(&mut self) -> Option<Frame> {
        loop {
            let Some(start) = self.buf.iter().position(|&b| b == DELIMITER) else {
                // Nothing here can start a frame.
                self.buf.clear();
                return None;
            };
            self.buf.drain(..start);
            if self.buf.len() < 2 {
                return None;
            }
            let len = self.buf[1] as usize;
            if len < MIN_LEN || self.buf[1] == DELIMITER {
                // Back-to-back delimiters or a corrupt length; resync.
                self.buf.drain(..1);
                continue;
            }
            if self.buf.len() < len + 2 {
                return None;
            }
            if self.buf[len + 1] != DELIMITER {
                self.buf.drain(..1);
                continue;
            }
            let frame: Vec<u8> = self.buf.drain(..len + 2).collect();
            let expected = crc8(&frame[1..len]);
            if frame[len] != expected {
                trace!(got = frame[len], expected, "dropping frame with bad checksum");
                continue;
            }
            return Some(Frame {
                kind: [frame[2], frame[3], frame[4]],
                payload: frame[5..len].to_vec(),
            });
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TempScale {
    #[default]
    Fahrenheit,
    Celsius,
}

impl TempScale {
    pub fn decode(&self, raw: u8) -> f64 {
        match self {
            TempScale::Fahrenheit => raw as f64,
            TempScale::Celsius => raw as f64 / 2.0,
        }
    }

    pub fn encode(&self, temp: f64) -> Result<u8> {
        let raw = match self {
            TempScale::Fahrenheit => temp.round(),
            TempScale::Celsius => (temp * 2.0).round(),
        };
        if !(0.0..=254.0).contains(&raw) {
            return Err(Error::Protocol(format!("temperature {temp} out of range")));
        }
        Ok(raw as u8)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeatMode {
    #[default]
    Ready,
    Rest,
    ReadyInRest,
}

impl HeatMode {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            1 => HeatMode::Rest,
            2 | 3 => HeatMode::ReadyInRest,
            _ => HeatMode::Ready,
        }
    }
}

/// Periodic status pushed by the spa (message 0x13).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpaStatus {
    /// `None` while the panel has no reading (raw 0xFF).
    pub current_temp: Option<f64>,
    pub target_temp: f64,
    pub hour: u8,
    pub minute: u8,
    pub heat_mode: HeatMode,
    pub temp_scale: TempScale,
    pub clock_24h: bool,
    pub heating: bool,
    pub high_range: bool,
    pub pumps: [u8; PUMP_COUNT],
    pub circulation_pump: bool,
    pub blower: u8,
    pub lights: [bool; LIGHT_COUNT],
    pub mister: bool,
    pub aux: [bool; 2],
}

const STATUS_MIN_PAYLOAD: usize = 21;

pub fn parse_status(payload: &[u8]) -> Result<SpaStatus> {
    if payload.len() < STATUS_MIN_PAYLOAD {
        return Err(Error::Protocol(format!(
            "status payload too short: {} bytes",
            payload.len()
        )));
    }
    let p = payload;
    let temp_scale = if p[9] & 0x01 != 0 { TempScale::Celsius } else { TempScale::Fahrenheit };
    let current_temp = match p[2] {
        0xFF => None,
        raw => Some(temp_scale.decode(raw)),
    };
    let pumps = [
        p[11] & 0x03,
        (p[11] >> 2) & 0x03,
        (p[11] >> 4) & 0x03,
        (p[11] >> 6) & 0x03,
        p[12] & 0x03,
        (p[12] >> 2) & 0x03,
    ];
    Ok(SpaStatus {
        current_temp,
        target_temp: temp_scale.decode(p[20]),
        hour: p[3],
        minute: p[4],
        heat_mode: HeatMode::from_bits(p[5]),
        temp_scale,
        clock_24h: p[9] & 0x02 != 0,
        heating: p[10] & 0x30 != 0,
        high_range: p[10] & 0x04 != 0,
        pumps,
        circulation_pump: p[13] & 0x02 != 0,
        blower: (p[13] >> 2) & 0x03,
        lights: [p[14] & 0x03 != 0, p[14] & 0x0C != 0],
        mister: p[15] & 0x01 != 0,
        aux: [p[15] & 0x08 != 0, p[15] & 0x10 != 0],
    })
}

/// Installed equipment reported in answer to a panel request (message 0x2E).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PanelConfig {
    /// Number of speeds per pump; 0 means not installed.
    pub pumps: [u8; PUMP_COUNT],
    pub lights: [bool; LIGHT_COUNT],
    pub circulation_pump: bool,
    pub blower: u8,
    pub mister: bool,
    pub aux: [bool; 2],
}

const CONFIG_MIN_PAYLOAD: usize = 5;

pub fn parse_panel_config(payload: &[u8]) -> Result<PanelConfig> {
    if payload.len() < CONFIG_MIN_PAYLOAD {
        return Err(Error::Protocol(format!(
            "panel config payload too short: {} bytes",
            payload.len()
        )));
    }
    let p = payload;
    Ok(PanelConfig {
        pumps: [
            p[0] & 0x03,
            (p[0] >> 2) & 0x03,
            (p[0] >> 4) & 0x03,
            (p[0] >> 6) & 0x03,
            p[1] & 0x03,
            (p[1] >> 6) & 0x03,
        ],
        lights: [p[2] & 0x03 != 0, p[2] & 0xC0 != 0],
        circulation_pump: p[3] & 0x80 != 0,
        blower: p[3] & 0x03,
        mister: p[4] & 0x30 != 0,
        aux: [p[4] & 0x01 != 0, p[4] & 0x02 != 0],
    })
}
