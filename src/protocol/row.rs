use crate::error::{Error, Result};
use crate::protocol::primitive::read_string_lenenc;

/// NULL marker of the text protocol
const NULL_MARKER: u8 = 0xFB;

/// Read the column value starting at `offset` of a text protocol row packet.
///
/// Returns the value (`None` for NULL) and the offset of the next column.
/// Every column is either the 0xFB NULL marker or a string<lenenc>, whatever its declared type.
pub fn read_text_value(packet: &[u8], offset: usize) -> Result<(Option<&[u8]>, usize)> {
    let data = packet.get(offset..).ok_or(Error::UnexpectedEof)?;
    match data.first() {
        None => Err(Error::UnexpectedEof),
        Some(&NULL_MARKER) => Ok((None, offset + 1)),
        Some(_) => {
            let (value, rest) = read_string_lenenc(data)?;
            Ok((Some(value), packet.len() - rest.len()))
        }
    }
}
