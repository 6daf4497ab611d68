//! Remote publisher.
//!
//! Pushes a generated image over SFTP into a namespaced directory on the
//! web host and returns the logical URL path that gets written back to
//! the database. One session per call; handles are dropped on every exit
//! path. Any failure leaves the local file untouched and yields `None`.

use anyhow::{Context, Result, bail, ensure};
use log::{error, info};
use ssh2::Session;
use std::fs::File;
use std::io::{self, Read};
use std::net::TcpStream;
use std::path::Path;

use crate::config::AppConfig;
use crate::pipeline::Publisher;

pub struct SftpPublisher {
    host: String,
    port: u16,
    user: String,
    password: String,
    server_image_path: String,
    image_url_base: String,
}

impl SftpPublisher {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            host: config.ssh_host.clone(),
            port: config.ssh_port,
            user: config.ssh_user.clone(),
            password: config.ssh_password.clone(),
            server_image_path: config.server_image_path.clone(),
            image_url_base: config.image_url_base.clone(),
        }
    }

    fn open_session(&self) -> Result<Session> {
        info!("connecting to {}@{}:{}", self.user, self.host, self.port);

        let tcp = TcpStream::connect((self.host.as_str(), self.port)).context(format!(
            "failed to connect to {}:{}",
            self.host, self.port
        ))?;

        let mut session = Session::new().context("failed to create SSH session")?;
        session.set_tcp_stream(tcp);
        session.handshake().context("SSH handshake failed")?;
        session
            .userauth_password(&self.user, &self.password)
            .context(format!("SSH authentication failed for {}", self.user))?;

        Ok(session)
    }

    /// Upload a local file to `<server_image_path>/<namespace>/<filename>.png`
    /// and return the logical `<image_url_base>/<namespace>/<filename>.png`.
    pub fn upload_file(
        &self,
        local_path: &Path,
        namespace: &str,
        filename: &str,
    ) -> Option<String> {
        if !local_path.exists() {
            error!("local file not found: {local_path:?}");
            return None;
        }

        match self.try_upload(local_path, namespace, filename) {
            Ok(url_path) => {
                info!("uploaded {local_path:?} -> {url_path}");
                Some(url_path)
            }
            Err(error) => {
                error!("upload failed for {local_path:?}: {error:#}");
                None
            }
        }
    }

    fn try_upload(&self, local_path: &Path, namespace: &str, filename: &str) -> Result<String> {
        let session = self.open_session()?;
        let sftp = session.sftp().context("failed to open SFTP channel")?;

        let remote_dir = format!("{}/{}", self.server_image_path, namespace);
        let remote_file = format!("{remote_dir}/{filename}.png");

        // A failed stat is the signal to create the directory.
        if sftp.stat(Path::new(&remote_dir)).is_err() {
            info!("creating remote directory {remote_dir}");
            self.create_remote_directory(&session, &remote_dir)?;
        }

        let mut local_file = File::open(local_path)
            .context(format!("failed to open local file {local_path:?}"))?;
        let mut remote = sftp
            .create(Path::new(&remote_file))
            .context(format!("failed to create remote file {remote_file}"))?;
        io::copy(&mut local_file, &mut remote)
            .context(format!("failed to transfer {local_path:?} to {remote_file}"))?;

        Ok(format!(
            "{}/{}/{}.png",
            self.image_url_base, namespace, filename
        ))
    }

    fn create_remote_directory(&self, session: &Session, remote_dir: &str) -> Result<()> {
        let exit_status = self.exec(session, &format!("mkdir -p {remote_dir}"))?.1;
        ensure!(
            exit_status == 0,
            "mkdir -p {} exited with status {}",
            remote_dir,
            exit_status
        );

        // Normalize permissions so the web server can read the directory.
        self.exec(session, &format!("chmod 755 {remote_dir}"))?;
        Ok(())
    }

    fn exec(&self, session: &Session, command: &str) -> Result<(String, i32)> {
        let mut channel = session
            .channel_session()
            .context("failed to open exec channel")?;
        channel
            .exec(command)
            .context(format!("failed to execute: {command}"))?;

        let mut output = String::new();
        channel
            .read_to_string(&mut output)
            .context("failed to read command output")?;
        channel.wait_close().context("failed to close exec channel")?;

        let exit_status = channel
            .exit_status()
            .context("failed to read command exit status")?;
        Ok((output, exit_status))
    }

    /// Diagnostic round trip; not used by the pipeline.
    pub fn test_connection(&self) -> bool {
        match self.try_test_connection() {
            Ok(()) => {
                info!("SSH connection test passed");
                true
            }
            Err(error) => {
                error!("SSH connection test failed: {error:#}");
                false
            }
        }
    }

    fn try_test_connection(&self) -> Result<()> {
        let session = self.open_session()?;
        let (output, exit_status) = self.exec(&session, "echo connection-ok")?;
        if exit_status != 0 || output.trim() != "connection-ok" {
            bail!("unexpected echo response: {:?}", output.trim());
        }
        Ok(())
    }
}

impl Publisher for SftpPublisher {
    fn upload_file(&self, local_path: &Path, namespace: &str, filename: &str) -> Option<String> {
        SftpPublisher::upload_file(self, local_path, namespace, filename)
    }
}
