//! Forward-only cursor over the rows of a text protocol result set.
//!
//! Columns are decoded lazily, one at a time, straight from the row packet:
//!
//! ```no_run
//! # fn main() -> mysql_cursor::error::Result<()> {
//! let mut conn = mysql_cursor::sync::Conn::new("mysql://root@localhost/shop")?;
//! let mut rows = conn.query("SELECT id, nick, score FROM people")?;
//! while rows.advance() {
//!     let id = rows.i64();
//!     let nick = rows.nullable_string();
//!     let score = rows.f64();
//!     println!("{id} {nick:?} {score}");
//! }
//! if let Some(err) = rows.last_error() {
//!     eprintln!("reading people failed: {err}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Errors never interrupt an accessor call. The first error, from the row stream or from a
//! conversion, is kept and returned by [`Cursor::last_error`]; later errors are dropped.
//! A loop that stops early without an error in `last_error` has seen every row.

use std::ops::Range;

use crate::col::Column;
use crate::error::{Error, Result};
use crate::protocol::row::read_text_value;
use crate::text::FromText;

/// Supplies the raw row packets of one result set, in server order.
pub trait RowSource {
    /// Replace the content of `packet` with the next row.
    ///
    /// Returns `Ok(false)` once the result set has no more rows. After `Ok(false)` or an error
    /// the source is not called again.
    fn next_row(&mut self, packet: &mut Vec<u8>) -> Result<bool>;

    /// Column definitions of the result set, if the source knows them
    fn columns(&self) -> &[Column] {
        &[]
    }
}

impl<S: RowSource + ?Sized> RowSource for &mut S {
    fn next_row(&mut self, packet: &mut Vec<u8>) -> Result<bool> {
        (**self).next_row(packet)
    }

    fn columns(&self) -> &[Column] {
        (**self).columns()
    }
}

impl<S: RowSource + ?Sized> RowSource for Box<S> {
    fn next_row(&mut self, packet: &mut Vec<u8>) -> Result<bool> {
        (**self).next_row(packet)
    }

    fn columns(&self) -> &[Column] {
        (**self).columns()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorState {
    /// `advance` has not been called yet
    BeforeFirstRow,
    /// `packet` holds a row; `offset` is where its next unread column starts
    OnRow { offset: usize },
    /// The source reported the end of rows or failed. Terminal.
    Ended,
}

/// Sequential reader of a result set.
///
/// Call [`advance`](Cursor::advance) before reading the first row and keep calling it until it
/// returns `false`, then check [`last_error`](Cursor::last_error).
///
/// Each accessor consumes the next column of the current row. Columns must be read in result set
/// order; there is no random access and no rewind.
///
/// `T()`-style accessors ([`i64`](Cursor::i64), [`string`](Cursor::string), ...) return the zero
/// value for NULL and for a failed conversion alike. Use the `nullable_*` form to tell them apart:
/// it returns `None` for NULL and `Some(zero)` when the conversion failed.
pub struct Cursor<S> {
    source: S,
    packet: Vec<u8>,
    state: CursorState,
    error: Option<Error>,
}

impl<S: RowSource> Cursor<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            packet: Vec::new(),
            state: CursorState::BeforeFirstRow,
            error: None,
        }
    }

    /// Move to the next row.
    ///
    /// Returns `false` when the rows are exhausted, when the row source failed, or when an error
    /// is already latched. Once it has returned `false` because the source ended, it returns
    /// `false` forever.
    pub fn advance(&mut self) -> bool {
        if self.state == CursorState::Ended || self.error.is_some() {
            return false;
        }

        match self.source.next_row(&mut self.packet) {
            Ok(true) => {
                self.state = CursorState::OnRow { offset: 0 };
                true
            }
            Ok(false) => {
                self.end();
                false
            }
            Err(err) => {
                self.latch(err);
                self.end();
                false
            }
        }
    }

    /// The first error met while reading, if any. Check it after `advance` returned `false`.
    pub fn last_error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// Take the latched error out of the cursor.
    ///
    /// The cursor stays stopped: `advance` keeps returning `false`.
    pub fn into_error(self) -> Option<Error> {
        self.error
    }

    /// Whether the row source has reported the end of rows or failed
    pub fn is_ended(&self) -> bool {
        self.state == CursorState::Ended
    }

    pub fn columns(&self) -> &[Column] {
        self.source.columns()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    fn end(&mut self) {
        self.state = CursorState::Ended;
        self.packet = Vec::new();
    }

    fn latch(&mut self, err: Error) {
        if self.error.is_none() {
            tracing::trace!(error = %err, "cursor latched an error");
            self.error = Some(err);
        } else {
            tracing::trace!(error = %err, "cursor dropped an error, one is already latched");
        }
    }

    /// Consume the next column of the current row. `Ok(None)` is NULL.
    fn next_column(&mut self) -> Result<Option<Range<usize>>> {
        let offset = match self.state {
            CursorState::OnRow { offset } => offset,
            CursorState::BeforeFirstRow => {
                return Err(Error::BadUsageError(
                    "column read before the first advance".to_string(),
                ));
            }
            CursorState::Ended => {
                return Err(Error::BadUsageError(
                    "column read after the last row".to_string(),
                ));
            }
        };

        let (value, next) = read_text_value(&self.packet, offset)?;
        let range = value.map(|value| next - value.len()..next);
        self.state = CursorState::OnRow { offset: next };
        Ok(range)
    }

    /// Read the next column as raw bytes. `None` is NULL.
    pub fn nullable_bytes(&mut self) -> Option<&[u8]> {
        match self.next_column() {
            Ok(range) => range.map(|range| &self.packet[range]),
            Err(err) => {
                self.latch(err);
                Some(&[])
            }
        }
    }

    /// Read the next column as raw bytes. NULL reads as an empty slice.
    pub fn bytes(&mut self) -> &[u8] {
        self.nullable_bytes().unwrap_or_default()
    }

    /// Read the next column as `T`. `None` is NULL.
    ///
    /// A value that does not parse as `T` latches a conversion error and reads as
    /// `Some(T::default())`.
    pub fn nullable<T: FromText>(&mut self) -> Option<T> {
        let range = match self.next_column() {
            Ok(Some(range)) => range,
            Ok(None) => return None,
            Err(err) => {
                self.latch(err);
                return Some(T::default());
            }
        };

        match T::from_text(&self.packet[range]) {
            Ok(value) => Some(value),
            Err(err) => {
                self.latch(err);
                Some(T::default())
            }
        }
    }

    /// Read the next column as `T`. NULL and conversion failures read as `T::default()`.
    pub fn get<T: FromText>(&mut self) -> T {
        self.nullable().unwrap_or_default()
    }

    /// Skip the next column
    pub fn skip(&mut self) {
        if let Err(err) = self.next_column() {
            self.latch(err);
        }
    }
}

macro_rules! typed_accessors {
    ($($(#[$doc:meta])* $name:ident, $nullable:ident => $t:ty;)*) => {
        impl<S: RowSource> Cursor<S> {
            $(
                $(#[$doc])*
                pub fn $name(&mut self) -> $t {
                    self.get()
                }

                $(#[$doc])*
                ///
                /// `None` is NULL.
                pub fn $nullable(&mut self) -> Option<$t> {
                    self.nullable()
                }
            )*
        }
    };
}

typed_accessors! {
    /// Read the next column as a UTF-8 string. Invalid sequences are replaced, never an error.
    string, nullable_string => String;
    /// Read the next column as a platform-width integer
    isize, nullable_isize => isize;
    i8, nullable_i8 => i8;
    i16, nullable_i16 => i16;
    i32, nullable_i32 => i32;
    i64, nullable_i64 => i64;
    u8, nullable_u8 => u8;
    u16, nullable_u16 => u16;
    u32, nullable_u32 => u32;
    u64, nullable_u64 => u64;
    f32, nullable_f32 => f32;
    f64, nullable_f64 => f64;
    /// Read the next column as a boolean (`1`/`0`, `true`/`false`, `t`/`f`, ...)
    bool, nullable_bool => bool;
}
