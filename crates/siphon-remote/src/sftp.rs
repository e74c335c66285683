//! libssh2-backed implementation of the remote filesystem seam.

use std::io::{self, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::Path;

use ssh2::{Session, Sftp};
use tracing::{debug, trace};

use siphon_core::{AuthMethod, ConnectionConfig, Connector, RemoteFs, SyncError};

/// Opens SFTP sessions to one device.
#[derive(Debug, Clone)]
pub struct SftpConnector {
    config: ConnectionConfig,
}

impl SftpConnector {
    /// Create a connector for a validated configuration.
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }

    /// Connection settings in use.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    fn resolve(&self) -> Result<Vec<SocketAddr>, SyncError> {
        let connect_error = |source: io::Error| SyncError::Connect {
            host: self.config.host.clone(),
            source,
        };

        let addrs: Vec<SocketAddr> = (self.config.host.as_str(), self.config.port)
            .to_socket_addrs()
            .map_err(connect_error)?
            .collect();
        if addrs.is_empty() {
            return Err(connect_error(io::Error::new(
                io::ErrorKind::NotFound,
                "host did not resolve to any address",
            )));
        }
        Ok(addrs)
    }

    fn open_tcp(&self) -> Result<TcpStream, SyncError> {
        let mut last_err = None;
        for addr in self.resolve()? {
            match TcpStream::connect_timeout(&addr, self.config.timeout) {
                Ok(stream) => return Ok(stream),
                Err(err) => {
                    trace!(%addr, error = %err, "tcp connect failed");
                    last_err = Some(err);
                }
            }
        }
        Err(SyncError::Connect {
            host: self.config.host.clone(),
            source: last_err
                .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no address tried")),
        })
    }

    fn authenticate(&self, session: &Session) -> Result<(), SyncError> {
        let username = self.config.username.as_str();
        let result = match self.config.auth {
            AuthMethod::Password(ref password) => session.userauth_password(username, password),
            AuthMethod::KeyFile {
                ref path,
                ref passphrase,
            } => session.userauth_pubkey_file(username, None, path, passphrase.as_deref()),
            AuthMethod::Agent => session.userauth_agent(username),
        };

        let auth_error = |message: String| SyncError::Authentication {
            host: self.config.host.clone(),
            username: username.to_string(),
            message,
        };
        result.map_err(|e| auth_error(e.message().to_string()))?;
        if !session.authenticated() {
            return Err(auth_error("server did not accept the credentials".to_string()));
        }
        Ok(())
    }
}

impl Connector for SftpConnector {
    type Session = SftpSession;

    fn endpoint(&self) -> String {
        self.config.endpoint()
    }

    fn connect(&self) -> Result<SftpSession, SyncError> {
        let host = self.config.host.clone();
        let ssh_error = |e: ssh2::Error| SyncError::Ssh {
            host: host.clone(),
            message: e.to_string(),
        };

        let tcp = self.open_tcp()?;
        let mut session = Session::new().map_err(ssh_error)?;
        session.set_tcp_stream(tcp);
        session.set_timeout(u32::try_from(self.config.timeout.as_millis()).unwrap_or(u32::MAX));
        session.handshake().map_err(ssh_error)?;

        self.authenticate(&session)?;
        let sftp = session.sftp().map_err(ssh_error)?;

        debug!(endpoint = %self.endpoint(), user = %self.config.username, "sftp session opened");
        Ok(SftpSession { session, sftp })
    }
}

/// An authenticated SSH session with its SFTP channel.
pub struct SftpSession {
    session: Session,
    sftp: Sftp,
}

impl Drop for SftpSession {
    fn drop(&mut self) {
        let _ = self.session.disconnect(None, "closing", None);
    }
}

fn remote_err(path: &str, err: ssh2::Error) -> SyncError {
    SyncError::remote(path, err.message())
}

impl RemoteFs for SftpSession {
    fn read_dir(&self, path: &str) -> Result<Vec<String>, SyncError> {
        let entries = self
            .sftp
            .readdir(Path::new(path))
            .map_err(|e| remote_err(path, e))?;

        Ok(entries
            .into_iter()
            .filter_map(|(entry, _)| {
                entry
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
            })
            .filter(|name| name != "." && name != "..")
            .collect())
    }

    fn file_size(&self, path: &str) -> Result<u64, SyncError> {
        let stat = self
            .sftp
            .stat(Path::new(path))
            .map_err(|e| remote_err(path, e))?;
        if stat.is_dir() {
            return Err(SyncError::remote(path, "is a directory"));
        }
        Ok(stat.size.unwrap_or(0))
    }

    fn download(&self, path: &str, writer: &mut dyn Write) -> Result<u64, SyncError> {
        let mut file = self
            .sftp
            .open(Path::new(path))
            .map_err(|e| remote_err(path, e))?;
        io::copy(&mut file, writer).map_err(|e| SyncError::remote(path, e))
    }

    fn remove_file(&self, path: &str) -> Result<(), SyncError> {
        self.sftp
            .unlink(Path::new(path))
            .map_err(|e| remote_err(path, e))
    }

    fn remove_dir(&self, path: &str) -> Result<(), SyncError> {
        self.sftp
            .rmdir(Path::new(path))
            .map_err(|e| remote_err(path, e))
    }

    fn real_path(&self, path: &str) -> Result<String, SyncError> {
        self.sftp
            .realpath(Path::new(path))
            .map(|p| p.to_string_lossy().into_owned())
            .map_err(|e| remote_err(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::time::Duration;

    fn config(host: &str, port: u16) -> ConnectionConfig {
        ConnectionConfig::builder()
            .host(host)
            .port(port)
            .username("pi")
            .auth(AuthMethod::Password("secret".to_string()))
            .timeout(Duration::from_millis(500))
            .build()
            .unwrap()
    }

    #[test]
    fn test_endpoint() {
        let connector = SftpConnector::new(config("192.168.1.40", 2222));
        assert_eq!(connector.endpoint(), "192.168.1.40:2222");
    }

    #[test]
    fn test_refused_connection_is_connect_error() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let connector = SftpConnector::new(config("127.0.0.1", port));

        let err = connector.connect().err().unwrap();
        assert!(matches!(err, SyncError::Connect { .. }));
        assert!(err.is_connection_level());
    }

    #[test]
    fn test_non_ssh_server_is_ssh_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let _ = stream.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n");
            }
        });

        let connector = SftpConnector::new(config("127.0.0.1", port));
        let err = connector.connect().err().unwrap();
        assert!(matches!(err, SyncError::Ssh { .. }));
        assert!(!err.is_authentication());
        let _ = server.join();
    }
}
