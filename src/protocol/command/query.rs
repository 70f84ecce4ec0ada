use crate::constant::{CommandByte, ServerStatusFlags};
use crate::error::{Error, Result};
use crate::protocol::packet::MAX_PACKET_PAYLOAD;
use crate::protocol::primitive::*;
use crate::protocol::response::{ErrPayloadBytes, OkPayload, OkPayloadBytes, read_eof_packet};

/// Write COM_QUERY command
pub fn write_query(out: &mut Vec<u8>, sql: &str) {
    write_int_1(out, CommandByte::Query as u8);
    out.extend_from_slice(sql.as_bytes());
}

/// Query response variants
#[derive(Debug)]
pub enum QueryResponse<'a> {
    Ok(OkPayloadBytes<'a>),
    ResultSet { column_count: u64 },
}

/// Read the first packet of a COM_QUERY response
/// This can be:
/// - 0xFF: ERR packet (error occurred)
/// - 0x00: OK packet (query succeeded without result set)
/// - 0xFB: LOCAL INFILE packet (not supported)
/// - Otherwise: Result set (first byte is column count as length-encoded integer)
pub fn read_query_response(payload: &[u8]) -> Result<QueryResponse<'_>> {
    match payload.first() {
        None => Err(Error::InvalidPacket),
        Some(0xFF) => Err(ErrPayloadBytes(payload).into()),
        Some(0x00) => Ok(QueryResponse::Ok(OkPayloadBytes(payload))),
        Some(0xFB) => Err(Error::BadUsageError(
            "LOCAL INFILE queries are not supported".to_string(),
        )),
        Some(_) => {
            let (column_count, _rest) = read_int_lenenc(payload)?;
            Ok(QueryResponse::ResultSet { column_count })
        }
    }
}

/// One packet of the row section of a text result set
#[derive(Debug)]
pub enum RowPacket<'a> {
    /// A text protocol row
    Row(&'a [u8]),
    /// End of rows, with the status flags of the terminating packet
    End(ServerStatusFlags),
    /// The server aborted the result set
    Err(ErrPayloadBytes<'a>),
}

/// Classify a packet read after the column definitions
///
/// A valid row's first item is NULL (0xFB) or string<lenenc>.
/// string<lenenc> cannot start with 0xFF, hence 0xFF always means ERR.
/// string<lenenc> starting with 0xFE has a length of at least 2^24, so such a row fills at least
/// one full packet. A shorter payload starting with 0xFE is the terminating EOF/OK packet.
pub fn read_row_packet(payload: &[u8], deprecate_eof: bool) -> Result<RowPacket<'_>> {
    match payload.first() {
        None => Err(Error::InvalidPacket),
        Some(0xFF) => Ok(RowPacket::Err(ErrPayloadBytes(payload))),
        Some(0xFE) if payload.len() < MAX_PACKET_PAYLOAD => {
            let status_flags = if deprecate_eof {
                OkPayload::try_from(OkPayloadBytes(payload))?.status_flags
            } else {
                read_eof_packet(payload)?.status_flags()
            };
            Ok(RowPacket::End(status_flags))
        }
        Some(_) => Ok(RowPacket::Row(payload)),
    }
}
