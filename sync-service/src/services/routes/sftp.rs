use super::{BuiltPackage, DeliveryRoute, RouteError};
use crate::config::SftpConfig;
use async_trait::async_trait;
use secrecy::ExposeSecret;
use ssh2::Session;
use std::io::Write;
use std::net::TcpStream;
use std::path::Path;

/// Uploads the package over SFTP to
/// `<inbound_dir>/<tenant_id>/<file_name>`. The ssh2 session is blocking,
/// so each delivery runs on the blocking thread pool.
pub struct SftpRoute {
    config: SftpConfig,
}

impl SftpRoute {
    pub fn new(config: SftpConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl DeliveryRoute for SftpRoute {
    async fn deliver(&self, package: &BuiltPackage) -> Result<String, RouteError> {
        let config = self.config.clone();
        let job = package.clone();

        let location = tokio::task::spawn_blocking(move || upload(&config, &job))
            .await
            .map_err(|e| RouteError::Io(format!("SFTP upload task failed: {}", e)))??;

        tracing::info!(
            tenant_id = %package.tenant_id,
            submission_id = %package.submission_id,
            location = %location,
            "Package uploaded over SFTP"
        );
        Ok(location)
    }
}

fn upload(config: &SftpConfig, package: &BuiltPackage) -> Result<String, RouteError> {
    let addr = format!("{}:{}", config.host, config.port);
    let tcp = TcpStream::connect(&addr)
        .map_err(|e| RouteError::Connection(format!("connecting to {}: {}", addr, e)))?;

    let mut session = Session::new()
        .map_err(|e| RouteError::Connection(format!("creating SSH session: {}", e)))?;
    session.set_tcp_stream(tcp);
    session
        .handshake()
        .map_err(|e| RouteError::Connection(format!("SSH handshake with {}: {}", addr, e)))?;

    session
        .userauth_password(&config.user, config.password.expose_secret())
        .map_err(|e| RouteError::Authentication(format!("SFTP auth for {}: {}", config.user, e)))?;
    if !session.authenticated() {
        return Err(RouteError::Authentication(format!(
            "SFTP auth rejected for {}",
            config.user
        )));
    }

    let sftp = session
        .sftp()
        .map_err(|e| RouteError::Connection(format!("opening SFTP channel: {}", e)))?;

    let remote_dir = format!("{}/{}", config.inbound_dir, package.tenant_id);
    make_remote_dirs(&sftp, &remote_dir);

    let remote_path = format!("{}/{}", remote_dir, package.file_name);
    let mut file = sftp
        .create(Path::new(&remote_path))
        .map_err(|e| RouteError::Io(format!("creating {}: {}", remote_path, e)))?;
    file.write_all(&package.content)
        .map_err(|e| RouteError::Io(format!("writing {}: {}", remote_path, e)))?;

    Ok(format!("sftp://{}{}", config.host, remote_path))
}

/// Best-effort recursive directory create; existing directories and
/// concurrent creates are ignored.
fn make_remote_dirs(sftp: &ssh2::Sftp, remote_dir: &str) {
    let mut current = String::new();
    for part in remote_dir.split('/').filter(|p| !p.is_empty() && *p != ".") {
        current.push('/');
        current.push_str(part);
        let path = Path::new(&current);
        if sftp.stat(path).is_err() {
            let _ = sftp.mkdir(path, 0o755);
        }
    }
}
