use std::io::{BufReader, Read, Write};
use std::net::TcpStream;
#[cfg(unix)]
use std::os::unix::net::UnixStream;

use crate::error::{Error, Result};
use crate::opts::Opts;

/// Transport of a [`Conn`](super::Conn). Reads are buffered, writes go straight to the socket.
#[derive(Debug)]
pub enum Stream {
    Tcp(BufReader<TcpStream>),
    #[cfg(unix)]
    Unix(BufReader<UnixStream>),
}

impl Stream {
    pub fn tcp(stream: TcpStream) -> Self {
        Self::Tcp(BufReader::new(stream))
    }

    #[cfg(unix)]
    pub fn unix(stream: UnixStream) -> Self {
        Self::Unix(BufReader::new(stream))
    }

    /// Open the socket described by `opts`: the unix socket if set, TCP otherwise
    pub fn connect(opts: &Opts) -> Result<Self> {
        if let Some(socket) = &opts.socket {
            #[cfg(unix)]
            return Ok(Self::unix(UnixStream::connect(socket)?));
            #[cfg(not(unix))]
            return Err(Error::BadConfigError(format!(
                "Unix socket {socket} is not supported on this platform"
            )));
        }

        if opts.host.is_empty() {
            return Err(Error::BadConfigError(
                "Missing host in connection options".to_string(),
            ));
        }

        let addr = format!("{}:{}", opts.host, opts.port);
        let stream = TcpStream::connect(&addr)?;
        stream.set_nodelay(opts.tcp_nodelay)?;
        Ok(Self::tcp(stream))
    }
}

impl From<TcpStream> for Stream {
    fn from(stream: TcpStream) -> Self {
        Self::tcp(stream)
    }
}

#[cfg(unix)]
impl From<UnixStream> for Stream {
    fn from(stream: UnixStream) -> Self {
        Self::unix(stream)
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::Tcp(r) => r.read(buf),
            #[cfg(unix)]
            Self::Unix(r) => r.read(buf),
        }
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        match self {
            Self::Tcp(r) => r.read_exact(buf),
            #[cfg(unix)]
            Self::Unix(r) => r.read_exact(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Self::Tcp(r) => r.get_mut().write(buf),
            #[cfg(unix)]
            Self::Unix(r) => r.get_mut().write(buf),
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            Self::Tcp(r) => r.get_mut().write_all(buf),
            #[cfg(unix)]
            Self::Unix(r) => r.get_mut().write_all(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Self::Tcp(r) => r.get_mut().flush(),
            #[cfg(unix)]
            Self::Unix(r) => r.get_mut().flush(),
        }
    }
}
