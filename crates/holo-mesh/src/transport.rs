//! JSON-lines framing for the process worker.
//!
//! One message per line, in both directions. The pumps bridge a byte stream
//! and a crossbeam channel so the worker and the coordinator only ever see
//! typed messages.

use std::io::{BufRead, Write};

use crossbeam_channel::{Receiver, Sender};
use log::warn;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::MeshError;

/// Write one message followed by a newline and flush.
pub fn write_message<W: Write, T: Serialize>(writer: &mut W, message: &T) -> Result<(), MeshError> {
    serde_json::to_writer(&mut *writer, message)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

/// Read the next message. Blank lines are skipped; `None` at end of stream.
pub fn read_message<R: BufRead, T: DeserializeOwned>(reader: &mut R) -> Result<Option<T>, MeshError> {
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        if !line.trim().is_empty() {
            return Ok(Some(serde_json::from_str(line.trim())?));
        }
    }
}

/// Forward messages from `reader` into `tx` until end of stream, an I/O
/// error, or the receiving side hanging up. Malformed lines are logged and
/// skipped.
pub fn pump_reader<R: BufRead, T: DeserializeOwned>(mut reader: R, tx: Sender<T>) {
    loop {
        match read_message(&mut reader) {
            Ok(Some(message)) => {
                if tx.send(message).is_err() {
                    return;
                }
            }
            Ok(None) => return,
            Err(MeshError::Json(e)) => warn!("Skipping malformed message: {}", e),
            Err(e) => {
                warn!("Message stream failed: {}", e);
                return;
            }
        }
    }
}

/// Write every message received on `rx` until all senders are dropped.
pub fn pump_writer<W: Write, T: Serialize>(mut writer: W, rx: Receiver<T>) -> Result<(), MeshError> {
    for message in rx {
        write_message(&mut writer, &message)?;
    }
    Ok(())
}
