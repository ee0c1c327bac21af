use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

use crate::error::{Result, TransportError};
use crate::io::IoTransport;

/// TCP connector for devices bridged onto the network (serial servers,
/// gateways).
pub struct TcpLink;

impl TcpLink {
    /// Connect and apply read/write timeouts to the socket.
    ///
    /// `read_timeout` is the frame layer's terminator timeout: a read that
    /// waits longer than this returns empty.
    pub fn connect(
        addr: impl ToSocketAddrs + std::fmt::Display,
        read_timeout: Option<Duration>,
        write_timeout: Option<Duration>,
    ) -> Result<IoTransport<TcpStream>> {
        let endpoint = addr.to_string();
        let connect_err = |source| TransportError::Connect {
            endpoint: endpoint.clone(),
            source,
        };

        let stream = TcpStream::connect(&addr).map_err(connect_err)?;
        stream.set_nodelay(true).map_err(connect_err)?;
        stream.set_read_timeout(read_timeout).map_err(connect_err)?;
        stream.set_write_timeout(write_timeout).map_err(connect_err)?;

        debug!(%endpoint, "connected tcp link");
        Ok(IoTransport::named(stream, "tcp"))
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;

    use super::*;
    use crate::io::ByteTransport;

    #[test]
    fn connect_and_exchange_bytes() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 1];
            stream.read_exact(&mut buf).unwrap();
            stream.write_all(&buf).unwrap();
        });

        let mut link =
            TcpLink::connect(addr, Some(Duration::from_secs(2)), None).expect("tcp should connect");
        link.write(&[0xFF]).unwrap();
        assert_eq!(link.read(1).unwrap().as_ref(), &[0xFF]);

        server.join().unwrap();
    }

    #[test]
    fn connect_refused_reports_endpoint() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = TcpLink::connect(addr, None, None).unwrap_err();
        match err {
            TransportError::Connect { endpoint, .. } => assert_eq!(endpoint, addr.to_string()),
            other => panic!("unexpected error: {other}"),
        }
    }
}
