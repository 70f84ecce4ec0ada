mod handshake;

pub use handshake::AuthSwitchRequest;
pub use handshake::Handshake;
pub use handshake::HandshakeConfig;
pub use handshake::HandshakeResponse41;
pub use handshake::HandshakeResult;
pub use handshake::InitialHandshake;
pub use handshake::{
    auth_caching_sha2_password, auth_mysql_native_password, read_initial_handshake,
};
