//! Wire format between the driver and an engine process: JSON envelopes
//! framed with a 4-byte big-endian length prefix.

use std::io::{self, Read, Write};
use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::actions::Action;
use crate::telemetry::DataRequestSet;

/// Upper bound on a single frame; anything larger is treated as corruption.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineRequest {
    LoadState { path: PathBuf },
    RegisterDataRequests { requests: DataRequestSet },
    ProcessAction { action: Action },
    AdvanceTime { seconds: f64 },
    SimulationTime,
    Shutdown,
}

impl EngineRequest {
    pub fn name(&self) -> &'static str {
        match self {
            EngineRequest::LoadState { .. } => "load_state",
            EngineRequest::RegisterDataRequests { .. } => "register_data_requests",
            EngineRequest::ProcessAction { .. } => "process_action",
            EngineRequest::AdvanceTime { .. } => "advance_time",
            EngineRequest::SimulationTime => "simulation_time",
            EngineRequest::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineResponse {
    Ok,
    Time { seconds: f64 },
    Error { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub id: u64,
    pub payload: EngineRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub id: u64,
    pub payload: EngineResponse,
}

/// Serialize `payload` and write it as one length-prefixed frame.
pub fn write_message<W: Write, T: Serialize>(writer: &mut W, payload: &T) -> io::Result<()> {
    let bytes = serde_json::to_vec(payload)?;
    let len = u32::try_from(bytes.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "frame too large"))?;

    let mut framed = Vec::with_capacity(4 + bytes.len());
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(&bytes);
    writer.write_all(&framed)?;
    writer.flush()
}

/// Read one length-prefixed frame and decode it.
pub fn read_message<R: Read, T: DeserializeOwned>(reader: &mut R) -> io::Result<T> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let msg_len = u32::from_be_bytes(len_buf) as usize;
    if msg_len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {msg_len} bytes exceeds limit"),
        ));
    }
    let mut msg_buf = vec![0u8; msg_len];
    reader.read_exact(&mut msg_buf)?;
    Ok(serde_json::from_slice(&msg_buf)?)
}
