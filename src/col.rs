use crate::constant::{ColumnFlags, ColumnType};
use crate::error::Result;
use crate::protocol::command::{ColumnDefinition, ColumnDefinitionBytes};

/// Binary charset number; columns with it hold bytes rather than text
pub const BINARY_CHARSET: u16 = 63;

/// Column definition from MySQL protocol, detached from the packet buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub schema: String,
    pub table: String,
    pub org_table: String,
    pub name: String,
    pub org_name: String,
    pub charset: u16,
    pub column_length: u32,
    pub column_type: ColumnType,
    pub flags: ColumnFlags,
    pub decimals: u8,
}

impl Column {
    pub fn is_unsigned(&self) -> bool {
        self.flags.contains(ColumnFlags::UNSIGNED_FLAG)
    }

    pub fn is_nullable(&self) -> bool {
        !self.flags.contains(ColumnFlags::NOT_NULL_FLAG)
    }

    pub fn is_binary(&self) -> bool {
        self.charset == BINARY_CHARSET
    }
}

impl TryFrom<ColumnDefinitionBytes<'_>> for Column {
    type Error = crate::error::Error;

    fn try_from(bytes: ColumnDefinitionBytes<'_>) -> Result<Self> {
        let def = ColumnDefinition::try_from(bytes)?;
        let text = |bytes: &[u8]| String::from_utf8_lossy(bytes).into_owned();
        Ok(Self {
            schema: text(def.schema),
            table: text(def.table_alias),
            org_table: text(def.table_original),
            name: text(def.name_alias),
            org_name: text(def.name_original),
            charset: def.tail.charset(),
            column_length: def.tail.column_length(),
            column_type: def.tail.column_type()?,
            flags: def.tail.flags(),
            decimals: def.tail.decimals(),
        })
    }
}
