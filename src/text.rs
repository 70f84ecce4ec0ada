//! Conversion of text protocol column values into Rust scalars.
//!
//! The text protocol sends every non-NULL value as a string, whatever the declared column type:
//! integers and floats as ASCII decimal, booleans as `0`/`1`, strings and blobs as raw bytes.

use std::num::{ParseFloatError, ParseIntError};
use std::str::FromStr;

use simdutf8::basic::from_utf8;

use crate::error::{Error, Result};

/// Types that can be parsed from the text representation of a non-NULL column value.
///
/// `Default` provides the value returned for NULL and for a failed conversion.
pub trait FromText: Sized + Default {
    fn from_text(text: &[u8]) -> Result<Self>;
}

fn conversion_error<T>(text: &[u8], reason: impl ToString) -> Error {
    Error::ConversionError {
        value: String::from_utf8_lossy(text).into_owned(),
        target: std::any::type_name::<T>(),
        reason: reason.to_string(),
    }
}

fn ascii<T>(text: &[u8]) -> Result<&str> {
    from_utf8(text).map_err(|e| conversion_error::<T>(text, e))
}

fn parse_int<T>(text: &[u8]) -> Result<T>
where
    T: FromStr<Err = ParseIntError>,
{
    ascii::<T>(text)?
        .parse()
        .map_err(|e| conversion_error::<T>(text, e))
}

macro_rules! impl_from_text_int {
    ($($t:ty),*) => {
        $(
            impl FromText for $t {
                fn from_text(text: &[u8]) -> Result<Self> {
                    parse_int(text)
                }
            }
        )*
    };
}

impl_from_text_int!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

/// A finite literal that does not fit the width parses to infinity; that is a range error.
/// Spelled out `inf`/`infinity` literals are kept.
fn parse_float<T>(text: &[u8], is_infinite: impl Fn(&T) -> bool) -> Result<T>
where
    T: FromStr<Err = ParseFloatError>,
{
    let s = ascii::<T>(text)?;
    let value: T = s.parse().map_err(|e| conversion_error::<T>(text, e))?;
    if is_infinite(&value) && !s.to_ascii_lowercase().contains("inf") {
        return Err(conversion_error::<T>(text, "value out of range"));
    }
    Ok(value)
}

impl FromText for f32 {
    fn from_text(text: &[u8]) -> Result<Self> {
        parse_float(text, |v: &f32| v.is_infinite())
    }
}

impl FromText for f64 {
    fn from_text(text: &[u8]) -> Result<Self> {
        parse_float(text, |v: &f64| v.is_infinite())
    }
}

impl FromText for bool {
    fn from_text(text: &[u8]) -> Result<Self> {
        match text {
            b"1" | b"t" | b"T" | b"TRUE" | b"true" | b"True" => Ok(true),
            b"0" | b"f" | b"F" | b"FALSE" | b"false" | b"False" => Ok(false),
            _ => Err(conversion_error::<bool>(text, "invalid boolean literal")),
        }
    }
}

impl FromText for String {
    /// Never fails. Invalid UTF-8 is replaced with U+FFFD.
    fn from_text(text: &[u8]) -> Result<Self> {
        Ok(match from_utf8(text) {
            Ok(s) => s.to_owned(),
            Err(_) => String::from_utf8_lossy(text).into_owned(),
        })
    }
}

impl FromText for Vec<u8> {
    fn from_text(text: &[u8]) -> Result<Self> {
        Ok(text.to_vec())
    }
}
