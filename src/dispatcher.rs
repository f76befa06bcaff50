//! Command dispatcher (spec.md §4.E).
//!
//! Decodes the guest's MMIO command buffer into one of the five opcodes,
//! validates buffer lengths before touching the engine, and marshals the
//! result back into a reply buffer plus status code. This generalizes the
//! `BUFFER_TOO_SMALL`-with-required-size pattern the teacher's
//! `varstore_shim::get_variable` already used, uniformly across every
//! opcode rather than only `GetVariable` (SPEC_FULL.md §4.E).
//!
//! All strings carried in the command buffer are UCS-2; this is the only
//! module that converts between UCS-2 code units and raw little-endian
//! bytes for wire framing (the authenticator's own UCS-2 encoding, in
//! [`crate::ucs2`], is for message reconstruction, not wire framing).

use crate::attribute::EfiAttribute;
use crate::codec::ByteCursor;
use crate::error::EngineError;
use crate::persistence::Blobstore;
use crate::engine::Engine;
use crate::status::EfiStatus;
use crate::ucs2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    GetVariable,
    GetNextVariableName,
    SetVariable,
    QueryVariableInfo,
    ExitBootServices,
}

impl Opcode {
    fn from_u32(value: u32) -> Result<Opcode, EngineError> {
        match value {
            1 => Ok(Opcode::GetVariable),
            2 => Ok(Opcode::GetNextVariableName),
            3 => Ok(Opcode::SetVariable),
            4 => Ok(Opcode::QueryVariableInfo),
            5 => Ok(Opcode::ExitBootServices),
            _ => Err(EngineError::Unsupported("unknown dispatcher opcode")),
        }
    }
}

/// The dispatcher's reply: a status code plus whatever out-of-band data
/// (attributes, a name, query results) the opcode produces. The MMIO
/// transport serializes this into the shared command buffer; this struct
/// stays transport-agnostic.
#[derive(Debug, Default)]
pub struct Reply {
    pub status: EfiStatus,
    pub attributes: Option<EfiAttribute>,
    pub data: Vec<u8>,
    pub name: Option<Vec<u16>>,
    pub guid: Option<[u8; 16]>,
    pub required_size: Option<u64>,
    pub query: Option<(u64, u64, u64)>,
}

fn reply_for(status: EfiStatus) -> Reply {
    Reply {
        status,
        ..Default::default()
    }
}

fn status_of(err: &EngineError) -> EfiStatus {
    err.to_status()
}

/// Dispatches one decoded request. The command header is:
/// `opcode(u32) | guid(16B) | name_len(u32, code units) | name_bytes |
/// attrs(u32) | max_out_size(u32) | body...`, matching the "SMM
/// Communicate header plus command-specific body" framing of spec.md
/// §4.E.
pub fn dispatch<B: Blobstore>(engine: &mut Engine<B>, command: &[u8]) -> Reply {
    match dispatch_inner(engine, command) {
        Ok(reply) => reply,
        Err(err) => {
            if let EngineError::BufferTooSmall { required } = err {
                Reply {
                    status: EfiStatus::BufferTooSmall,
                    required_size: Some(required as u64),
                    ..Default::default()
                }
            } else {
                reply_for(status_of(&err))
            }
        }
    }
}

fn read_header<'a>(
    cursor: &mut ByteCursor<'a>,
) -> Result<(Opcode, [u8; 16], Vec<u16>, EfiAttribute, u32), EngineError> {
    let opcode = Opcode::from_u32(cursor.take_u32_le()?)?;
    let guid = cursor.take_guid()?;
    let name_len = cursor.take_u32_le()? as usize;
    let name_bytes = cursor.take(name_len * 2)?;
    let name = ucs2::from_le_bytes(name_bytes);
    let attrs_bits = cursor.take_u32_le()?;
    let attrs = EfiAttribute::from_bits(attrs_bits)
        .ok_or(EngineError::InvalidParameter("unrecognized attribute bits"))?;
    let max_out_size = cursor.take_u32_le()?;
    Ok((opcode, guid, name, attrs, max_out_size))
}

fn dispatch_inner<B: Blobstore>(engine: &mut Engine<B>, command: &[u8]) -> Result<Reply, EngineError> {
    let mut cursor = ByteCursor::new(command);
    let (opcode, guid, name, attrs, max_out_size) = read_header(&mut cursor)?;

    match opcode {
        Opcode::GetVariable => {
            let (record_attrs, data) = engine.get_variable(&name, &guid)?;
            if data.len() > max_out_size as usize {
                return Err(EngineError::BufferTooSmall { required: data.len() });
            }
            Ok(Reply {
                status: EfiStatus::Success,
                attributes: Some(record_attrs.storage_identity() & !EfiAttribute::APPEND_WRITE),
                data: data.to_vec(),
                ..Default::default()
            })
        }
        Opcode::GetNextVariableName => {
            let prev = if name.is_empty() {
                None
            } else {
                Some((name.as_slice(), &guid))
            };
            let (next_name, next_guid) = engine.get_next_variable(prev)?;
            let wire_len = next_name.len() * 2;
            if wire_len > max_out_size as usize {
                return Err(EngineError::BufferTooSmall { required: wire_len });
            }
            Ok(Reply {
                status: EfiStatus::Success,
                name: Some(next_name),
                guid: Some(next_guid),
                ..Default::default()
            })
        }
        Opcode::SetVariable => {
            let body = cursor.rest();
            engine.set_variable(&name, &guid, attrs, body)?;
            Ok(reply_for(EfiStatus::Success))
        }
        Opcode::QueryVariableInfo => {
            let query = engine.query_variable_info(attrs);
            Ok(Reply {
                status: EfiStatus::Success,
                query: Some(query),
                ..Default::default()
            })
        }
        Opcode::ExitBootServices => {
            engine.exit_boot_services();
            Ok(reply_for(EfiStatus::Success))
        }
    }
}
