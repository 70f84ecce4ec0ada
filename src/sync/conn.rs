use std::io::{Read, Write};

use zerocopy::{FromZeros, IntoBytes};

use crate::col::Column;
use crate::constant::{CapabilityFlags, ServerStatusFlags};
use crate::cursor::{Cursor, RowSource};
use crate::error::{Error, Result, eyre};
use crate::opts::Opts;
use crate::protocol::command::ColumnDefinitionBytes;
use crate::protocol::command::query::{
    QueryResponse, RowPacket, read_query_response, read_row_packet, write_query,
};
use crate::protocol::command::utility::{
    write_init_db, write_ping, write_quit, write_reset_connection,
};
use crate::protocol::connection::{Handshake, HandshakeResult};
use crate::protocol::packet::{MAX_PACKET_PAYLOAD, PacketHeader};
use crate::protocol::response::{ErrPayloadBytes, OkPayload, OkPayloadBytes, read_eof_packet};

use super::stream::Stream;

/// LOCAL INFILE request header
const LOCAL_INFILE: u8 = 0xFB;

/// What the server sends next, seen from the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    /// Nothing. A command can be sent.
    Idle,
    /// Rows of a result set whose column definitions were already read
    Rows,
    /// The response of the next statement of a multi-statement query or a procedure call
    MoreResults,
    /// Position in the byte stream is unknown after a transport or framing failure
    Broken,
}

impl Pending {
    fn after(status_flags: ServerStatusFlags) -> Self {
        if status_flags.contains(ServerStatusFlags::SERVER_MORE_RESULTS_EXISTS) {
            Self::MoreResults
        } else {
            Self::Idle
        }
    }
}

enum Response {
    Ok(OkPayload),
    ResultSet(Vec<Column>),
}

/// A blocking MySQL connection speaking the text protocol.
///
/// The connection carries one in-order byte stream, so it serves one response at a time.
/// [`query`](Conn::query) returns a [`Cursor`] that borrows the connection mutably, which rules
/// out a second command while the cursor is alive. A cursor dropped before its last row leaves
/// the rows on the wire; the next command reads and discards them before sending.
///
/// A transport failure breaks the connection for good: every later command fails with
/// [`Error::ConnectionBroken`].
pub struct Conn {
    stream: Stream,
    read_buffer: Vec<u8>,
    /// Layout: [4-byte header space][payload that is possibly larger than 16MB]
    write_buffer: Vec<u8>,
    server_version: String,
    connection_id: u32,
    capability_flags: CapabilityFlags,
    status_flags: ServerStatusFlags,
    pending: Pending,
}

impl Conn {
    /// Create a new MySQL connection from connection options or a `mysql://` URL
    pub fn new<O: TryInto<Opts>>(opts: O) -> Result<Self>
    where
        Error: From<O::Error>,
    {
        let opts: Opts = opts.try_into()?;
        let stream = Stream::connect(&opts)?;
        Self::new_with_stream(stream, &opts)
    }

    /// Create a new MySQL connection over an already connected socket.
    ///
    /// `opts.host`, `opts.port` and `opts.socket` are ignored.
    #[tracing::instrument(skip_all)]
    pub fn new_with_stream(stream: impl Into<Stream>, opts: &Opts) -> Result<Self> {
        let mut conn = Self {
            stream: stream.into(),
            read_buffer: Vec::new(),
            write_buffer: vec![0; 4],
            server_version: String::new(),
            connection_id: 0,
            capability_flags: CapabilityFlags::empty(),
            status_flags: ServerStatusFlags::empty(),
            pending: Pending::Idle,
        };

        conn.handshake(opts)?;

        if let Some(init_command) = &opts.init_command {
            conn.query_drop(init_command)?;
        }

        Ok(conn)
    }

    fn handshake(&mut self, opts: &Opts) -> Result<()> {
        let mut handshake = Handshake::new(
            opts.user.clone(),
            opts.password.clone(),
            opts.db.clone(),
            opts.capabilities,
        );

        loop {
            let sequence_id = read_payload(&mut self.stream, &mut self.read_buffer)?;

            let packet = match handshake.drive(&self.read_buffer)? {
                HandshakeResult::InitialHandshake {
                    handshake_response,
                    initial_handshake,
                } => {
                    tracing::debug!(
                        server_version = %initial_handshake.server_version,
                        connection_id = initial_handshake.connection_id,
                        "received initial handshake"
                    );
                    self.server_version = initial_handshake.server_version;
                    self.connection_id = initial_handshake.connection_id;
                    self.status_flags = initial_handshake.status_flags;
                    handshake_response
                }
                HandshakeResult::Write(packet) => packet,
                HandshakeResult::NeedPacket => continue,
                HandshakeResult::Connected { capability_flags } => {
                    self.capability_flags = capability_flags;
                    return Ok(());
                }
            };

            self.new_write_buffer().extend_from_slice(&packet);
            write_payload(
                &mut self.stream,
                &mut self.write_buffer,
                sequence_id.wrapping_add(1),
            )?;
        }
    }

    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    /// Get the connection ID assigned by the server
    pub fn connection_id(&self) -> u64 {
        u64::from(self.connection_id)
    }

    /// Get the negotiated capability flags
    pub fn capability_flags(&self) -> CapabilityFlags {
        self.capability_flags
    }

    /// Server status flags of the last OK or EOF packet
    pub fn status_flags(&self) -> ServerStatusFlags {
        self.status_flags
    }

    pub fn in_transaction(&self) -> bool {
        self.status_flags
            .contains(ServerStatusFlags::SERVER_STATUS_IN_TRANS)
    }

    /// Whether an earlier transport failure made the connection unusable
    pub fn is_broken(&self) -> bool {
        self.pending == Pending::Broken
    }

    fn deprecate_eof(&self) -> bool {
        self.capability_flags
            .contains(CapabilityFlags::CLIENT_DEPRECATE_EOF)
    }

    /// Run a text protocol query and return a cursor over its rows.
    ///
    /// A statement that returns no rows yields a cursor whose first `advance` is `false`.
    /// A server error is returned here; errors met while reading rows are latched on the cursor.
    ///
    /// Only the first result set is exposed. Further result sets of a multi-statement query or
    /// a procedure call are discarded by the next command.
    #[tracing::instrument(skip_all)]
    pub fn query(&mut self, sql: &str) -> Result<Cursor<TextRows<'_>>> {
        self.send_query(sql)?;
        let rows = match self.read_response()? {
            Response::Ok(_) => TextRows {
                conn: self,
                columns: Vec::new(),
                ended: true,
            },
            Response::ResultSet(columns) => TextRows {
                conn: self,
                columns,
                ended: false,
            },
        };
        Ok(Cursor::new(rows))
    }

    /// Run a statement that returns no rows and return the server's acknowledgment.
    ///
    /// If the statement returns rows anyway, they are read and discarded and
    /// [`Error::BadUsageError`] is returned.
    #[tracing::instrument(skip_all)]
    pub fn exec(&mut self, sql: &str) -> Result<OkPayload> {
        self.send_query(sql)?;
        match self.read_response()? {
            Response::Ok(ok) => Ok(ok),
            Response::ResultSet(_) => {
                self.drain()?;
                Err(Error::BadUsageError(
                    "exec received a result set, use query for statements that return rows"
                        .to_string(),
                ))
            }
        }
    }

    /// Run a query and discard its rows, returning a server error met while reading them
    #[tracing::instrument(skip_all)]
    pub fn query_drop(&mut self, sql: &str) -> Result<()> {
        self.send_query(sql)?;
        if let Response::ResultSet(_) = self.read_response()? {
            self.discard_rows()?;
        }
        Ok(())
    }

    /// Send a ping to the server to check if the connection is alive
    #[tracing::instrument(skip_all)]
    pub fn ping(&mut self) -> Result<()> {
        write_ping(self.start_command()?);
        self.send()?;
        self.read_ok().map(drop)
    }

    /// Change the default database
    #[tracing::instrument(skip_all)]
    pub fn select_db(&mut self, database: &str) -> Result<()> {
        write_init_db(self.start_command()?, database);
        self.send()?;
        self.read_ok().map(drop)
    }

    /// Reset the session state (variables, temporary tables, open transaction)
    #[tracing::instrument(skip_all)]
    pub fn reset(&mut self) -> Result<()> {
        write_reset_connection(self.start_command()?);
        self.send()?;
        self.read_ok().map(drop)
    }

    /// Send COM_QUIT and close the connection
    pub fn close(mut self) -> Result<()> {
        if self.is_broken() {
            return Ok(());
        }
        write_quit(self.new_write_buffer());
        self.send()
    }

    /// Clear the write buffer, reserve 4 bytes for the header, and return mutable access.
    fn new_write_buffer(&mut self) -> &mut Vec<u8> {
        self.write_buffer.clear();
        self.write_buffer.extend_from_slice(&[0u8; 4]);
        &mut self.write_buffer
    }

    /// Discard leftovers of earlier commands and return the buffer for the next command
    fn start_command(&mut self) -> Result<&mut Vec<u8>> {
        self.drain()?;
        Ok(self.new_write_buffer())
    }

    fn send_query(&mut self, sql: &str) -> Result<()> {
        write_query(self.start_command()?, sql);
        self.send()
    }

    fn send(&mut self) -> Result<()> {
        write_payload(&mut self.stream, &mut self.write_buffer, 0).map_err(|e| self.fail(e))
    }

    fn read(&mut self) -> Result<u8> {
        read_payload(&mut self.stream, &mut self.read_buffer).map_err(|e| self.fail(e))
    }

    /// Record a failed response. An ERR packet completes the response; anything else leaves the
    /// connection at an unknown position of the byte stream.
    fn fail(&mut self, err: Error) -> Error {
        if matches!(err, Error::ServerError(_)) {
            self.pending = Pending::Idle;
        } else if self.pending != Pending::Broken {
            tracing::debug!(error = %err, "connection broken");
            self.pending = Pending::Broken;
        }
        err
    }

    /// Read and discard whatever the server still owes for earlier commands
    #[tracing::instrument(skip_all)]
    fn drain(&mut self) -> Result<()> {
        loop {
            let result = match self.pending {
                Pending::Idle => return Ok(()),
                Pending::Broken => return Err(Error::ConnectionBroken),
                Pending::Rows => self.discard_rows().map(|count| {
                    tracing::debug!(count, "discarded rows of an unfinished result set");
                }),
                Pending::MoreResults => self.read_response().map(drop),
            };

            if let Err(err) = result {
                if self.pending == Pending::Broken {
                    return Err(err);
                }
                tracing::debug!(error = %err, "discarded response ended with a server error");
            }
        }
    }

    /// Read the response to COM_QUERY up to the first row
    fn read_response(&mut self) -> Result<Response> {
        let sequence_id = self.read()?;
        if self.read_buffer.first() == Some(&LOCAL_INFILE) {
            return Err(self.reject_local_infile(sequence_id));
        }

        let column_count = match read_query_response(&self.read_buffer) {
            Ok(QueryResponse::Ok(ok)) => {
                let ok = OkPayload::try_from(ok);
                let ok = ok.map_err(|e| self.fail(e))?;
                self.status_flags = ok.status_flags;
                self.pending = Pending::after(ok.status_flags);
                return Ok(Response::Ok(ok));
            }
            Ok(QueryResponse::ResultSet { column_count }) => column_count,
            Err(err) => return Err(self.fail(err)),
        };

        let column_count =
            usize::try_from(column_count).map_err(|_| self.fail(Error::InvalidPacket))?;
        let mut columns = Vec::with_capacity(column_count);
        for _ in 0..column_count {
            self.read()?;
            let column = Column::try_from(ColumnDefinitionBytes(&self.read_buffer));
            columns.push(column.map_err(|e| self.fail(e))?);
        }

        if !self.deprecate_eof() {
            self.read()?;
            let eof = read_eof_packet(&self.read_buffer).map(drop);
            eof.map_err(|e| self.fail(e))?;
        }

        self.pending = Pending::Rows;
        Ok(Response::ResultSet(columns))
    }

    /// Answer a LOCAL INFILE request with an empty file and read the closing OK or ERR
    fn reject_local_infile(&mut self, sequence_id: u8) -> Error {
        self.new_write_buffer();
        let sent = write_payload(
            &mut self.stream,
            &mut self.write_buffer,
            sequence_id.wrapping_add(1),
        );
        if let Err(err) = sent {
            return self.fail(err);
        }
        if let Err(err) = self.read_ok() {
            if self.is_broken() {
                return err;
            }
        }
        Error::BadUsageError("LOCAL INFILE requests are not supported".to_string())
    }

    /// Read an OK packet, or the ERR packet replacing it
    fn read_ok(&mut self) -> Result<OkPayload> {
        self.read()?;
        let ok = match self.read_buffer.first() {
            Some(0xFF) => Err(Error::from(ErrPayloadBytes(&self.read_buffer))),
            _ => OkPayload::try_from(OkPayloadBytes(&self.read_buffer)),
        };
        let ok = ok.map_err(|e| self.fail(e))?;
        self.status_flags = ok.status_flags;
        self.pending = Pending::after(ok.status_flags);
        Ok(ok)
    }

    /// Read the next packet of the current result set into `packet`.
    ///
    /// Returns `Ok(false)` at the end of rows. An ERR packet in place of a row is returned as
    /// [`Error::ServerError`].
    fn next_row(&mut self, packet: &mut Vec<u8>) -> Result<bool> {
        if self.pending != Pending::Rows {
            return Err(Error::LibraryBug(eyre!(
                "row requested while the connection is {:?}",
                self.pending
            )));
        }

        read_payload(&mut self.stream, packet).map_err(|e| self.fail(e))?;

        let end = match read_row_packet(packet, self.deprecate_eof()) {
            Ok(RowPacket::Row(_)) => return Ok(true),
            Ok(RowPacket::End(status_flags)) => Ok(status_flags),
            Ok(RowPacket::Err(err)) => Err(Error::from(err)),
            Err(err) => Err(err),
        };
        let status_flags = end.map_err(|e| self.fail(e))?;
        self.status_flags = status_flags;
        self.pending = Pending::after(status_flags);
        Ok(false)
    }

    /// Read and drop the remaining rows of the current result set
    fn discard_rows(&mut self) -> Result<usize> {
        let mut packet = std::mem::take(&mut self.read_buffer);
        let mut count = 0;
        let result = loop {
            match self.next_row(&mut packet) {
                Ok(true) => count += 1,
                Ok(false) => break Ok(count),
                Err(err) => break Err(err),
            }
        };
        self.read_buffer = packet;
        result
    }
}

/// Rows of a text protocol result set, read straight off the connection
pub struct TextRows<'conn> {
    conn: &'conn mut Conn,
    columns: Vec<Column>,
    ended: bool,
}

impl RowSource for TextRows<'_> {
    fn next_row(&mut self, packet: &mut Vec<u8>) -> Result<bool> {
        if self.ended {
            return Ok(false);
        }
        let result = self.conn.next_row(packet);
        if !matches!(result, Ok(true)) {
            self.ended = true;
        }
        result
    }

    fn columns(&self) -> &[Column] {
        &self.columns
    }
}

/// Read a complete MySQL payload, concatenating packets if they span multiple 16MB chunks
/// Returns the sequence_id of the last packet read.
#[tracing::instrument(skip_all)]
fn read_payload<R: Read>(reader: &mut R, buffer: &mut Vec<u8>) -> Result<u8> {
    buffer.clear();

    let mut header = PacketHeader::new_zeroed();
    reader.read_exact(header.as_mut_bytes())?;

    let mut length = header.length();
    let mut sequence_id = header.sequence_id;

    buffer.resize(length, 0);
    reader.read_exact(buffer)?;

    while length == MAX_PACKET_PAYLOAD {
        reader.read_exact(header.as_mut_bytes())?;

        length = header.length();
        sequence_id = header.sequence_id;

        let start = buffer.len();
        buffer.resize(start + length, 0);
        reader.read_exact(&mut buffer[start..])?;
    }

    Ok(sequence_id)
}

/// Write the payload that follows the 4 reserved bytes of `buffer`, splitting it into 16MB
/// packets if necessary
#[tracing::instrument(skip_all)]
fn write_payload<W: Write>(writer: &mut W, buffer: &mut [u8], sequence_id: u8) -> Result<()> {
    let Some((header, payload)) = buffer.split_first_chunk_mut::<4>() else {
        return Err(Error::LibraryBug(eyre!(
            "write buffer has no space reserved for the header"
        )));
    };

    if payload.len() < MAX_PACKET_PAYLOAD {
        header.copy_from_slice(PacketHeader::encode(payload.len(), sequence_id).as_bytes());
        writer.write_all(buffer)?;
    } else {
        // a payload of exactly a multiple of 16MB ends with an empty packet
        let mut sequence_id = sequence_id;
        let mut remaining: &[u8] = payload;
        loop {
            let (chunk, rest) = remaining.split_at(remaining.len().min(MAX_PACKET_PAYLOAD));
            writer.write_all(PacketHeader::encode(chunk.len(), sequence_id).as_bytes())?;
            writer.write_all(chunk)?;
            sequence_id = sequence_id.wrapping_add(1);
            remaining = rest;
            if chunk.len() < MAX_PACKET_PAYLOAD {
                break;
            }
        }
    }

    writer.flush()?;
    Ok(())
}
