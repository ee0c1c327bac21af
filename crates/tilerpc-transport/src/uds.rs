use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::io::IoTransport;

/// Unix domain socket endpoint, used to reach emulated devices and local
/// serial bridges.
///
/// The listener removes a stale socket file before binding and, on drop,
/// removes the file it created (only if the path still refers to it).
pub struct UnixDomainSocket {
    listener: UnixListener,
    path: PathBuf,
    created_inode: (u64, u64),
}

impl UnixDomainSocket {
    /// Default permission mode for created socket paths.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;
    /// `sockaddr_un.sun_path` capacity.
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    const MAX_PATH_LEN: usize = 104;

    /// Bind and listen on a filesystem-path socket with the default mode.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Self::bind_with_mode(path, Self::DEFAULT_SOCKET_MODE)
    }

    /// Bind and listen with an explicit permission mode.
    pub fn bind_with_mode(path: impl AsRef<Path>, mode: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let len = path.as_os_str().len();
        if len >= Self::MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len,
                max: Self::MAX_PATH_LEN,
            });
        }

        let bind_err = |source| TransportError::Bind {
            path: path.clone(),
            source,
        };

        if let Ok(existing) = std::fs::symlink_metadata(&path) {
            if !existing.file_type().is_socket() {
                return Err(bind_err(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "existing path is not a unix socket",
                )));
            }
            debug!(?path, "removing stale socket");
            std::fs::remove_file(&path).map_err(bind_err)?;
        }

        let listener = UnixListener::bind(&path).map_err(bind_err)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
            .map_err(bind_err)?;
        let created = std::fs::symlink_metadata(&path).map_err(bind_err)?;

        info!(?path, "listening on unix domain socket");
        Ok(Self {
            listener,
            path,
            created_inode: (created.dev(), created.ino()),
        })
    }

    /// Accept the next connection (blocking) with the given read timeout.
    pub fn accept(&self, read_timeout: Option<Duration>) -> Result<IoTransport<UnixStream>> {
        let (stream, _addr) = self.listener.accept().map_err(TransportError::Accept)?;
        stream.set_read_timeout(read_timeout)?;
        debug!(path = ?self.path, "accepted connection");
        Ok(IoTransport::named(stream, "unix"))
    }

    /// Connect to a listening socket and apply read/write timeouts.
    pub fn connect(
        path: impl AsRef<Path>,
        read_timeout: Option<Duration>,
        write_timeout: Option<Duration>,
    ) -> Result<IoTransport<UnixStream>> {
        let path = path.as_ref();
        let connect_err = |source| TransportError::Connect {
            endpoint: path.display().to_string(),
            source,
        };

        let stream = UnixStream::connect(path).map_err(connect_err)?;
        stream.set_read_timeout(read_timeout).map_err(connect_err)?;
        stream.set_write_timeout(write_timeout).map_err(connect_err)?;

        debug!(?path, "connected to unix domain socket");
        Ok(IoTransport::named(stream, "unix"))
    }

    /// The path this socket is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UnixDomainSocket {
    fn drop(&mut self) {
        let Ok(metadata) = std::fs::symlink_metadata(&self.path) else {
            return;
        };
        let (dev, ino) = self.created_inode;
        if metadata.file_type().is_socket() && metadata.dev() == dev && metadata.ino() == ino {
            debug!(path = ?self.path, "cleaning up socket file");
            let _ = std::fs::remove_file(&self.path);
        } else {
            debug!(path = ?self.path, "socket path identity changed; skipping cleanup");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::ByteTransport;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("tilerpc-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn bind_accept_connect() {
        let dir = temp_dir("uds-basic");
        let sock_path = dir.join("link.sock");

        let listener = UnixDomainSocket::bind(&sock_path).unwrap();
        assert!(sock_path.exists());

        let path_clone = sock_path.clone();
        let client = std::thread::spawn(move || {
            let mut link = UnixDomainSocket::connect(&path_clone, None, None).unwrap();
            link.write(b"rpc 8 0 4\n").unwrap();
        });

        let mut server = listener.accept(Some(Duration::from_secs(2))).unwrap();
        let mut received = Vec::new();
        while received.len() < 10 {
            let chunk = server.read(16).unwrap();
            assert!(!chunk.is_empty(), "read timed out");
            received.extend_from_slice(&chunk);
        }
        assert_eq!(received, b"rpc 8 0 4\n");
        client.join().unwrap();

        drop(listener);
        assert!(!sock_path.exists(), "socket file should be removed on drop");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn path_too_long() {
        let long_path = "/tmp/".to_string() + &"a".repeat(200) + ".sock";
        let result = UnixDomainSocket::bind(&long_path);
        assert!(matches!(result, Err(TransportError::PathTooLong { .. })));
    }

    #[test]
    fn default_permissions_are_owner_only() {
        let dir = temp_dir("uds-perms");
        let sock_path = dir.join("perm.sock");

        let listener = UnixDomainSocket::bind(&sock_path).unwrap();
        let mode = std::fs::metadata(&sock_path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);

        drop(listener);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn refuses_to_replace_regular_file() {
        let dir = temp_dir("uds-file");
        let sock_path = dir.join("not-a-socket.sock");
        std::fs::write(&sock_path, b"regular-file").unwrap();

        let result = UnixDomainSocket::bind(&sock_path);
        assert!(matches!(result, Err(TransportError::Bind { .. })));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn connect_to_missing_socket_fails() {
        let dir = temp_dir("uds-missing");
        let result = UnixDomainSocket::connect(dir.join("absent.sock"), None, None);
        assert!(matches!(result, Err(TransportError::Connect { .. })));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
