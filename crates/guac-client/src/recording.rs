//! Session recording: tee the broadcast output into a uniquely-named,
//! advisory-locked file whose contents are the raw instruction stream.

use crate::client::Client;
use bitflags::bitflags;
use guac_proto::protocol::{send_key, send_mouse, send_touch};
use guac_proto::socket::BufferedSocket;
use guac_proto::{current_timestamp, GuacSocket, TeeSocket};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Highest numeric suffix tried before giving up on a recording name.
pub const RECORDING_MAX_SUFFIX: u32 = 255;

bitflags! {
    /// What the recording should contain.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RecordingFlags: u32 {
        /// Tee all broadcast output into the recording.
        const OUTPUT = 1;
        /// Log mouse events as in-band `mouse` instructions.
        const MOUSE = 2;
        /// Log touch events as in-band `touch` instructions.
        const TOUCH = 4;
        /// Log key events as in-band `key` instructions.
        const KEYS = 8;
    }
}

pub struct Recording {
    socket: Arc<dyn GuacSocket>,
    flags: RecordingFlags,
    path: PathBuf,
}

impl Recording {
    /// Opens `dir/name` (falling back to `name.1` … `name.255` on
    /// collision) with create-new semantics and an exclusive advisory lock,
    /// then replaces the session's broadcast socket with a tee when output
    /// is included. The lock marks the recording as in progress for
    /// replay tools.
    pub fn create(
        client: &Arc<Client>,
        dir: &Path,
        name: &str,
        create_path: bool,
        flags: RecordingFlags,
    ) -> io::Result<Recording> {
        if create_path {
            match fs::create_dir(dir) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e),
            }
        }

        let (file, path) = open_unique(dir, name)?;
        lock_exclusive(&file)?;

        let recording_socket: Arc<dyn GuacSocket> = Arc::new(BufferedSocket::new(file));
        if flags.contains(RecordingFlags::OUTPUT) {
            let original = client.socket();
            client.set_socket(Arc::new(TeeSocket::new(
                original,
                Arc::clone(&recording_socket),
            )));
        }

        info!(
            target: "client.recording",
            session = %client.id,
            path = %path.display(),
            "session recording started"
        );

        Ok(Recording {
            socket: recording_socket,
            flags,
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records a mouse event, if mouse events are included.
    pub fn report_mouse(&self, x: i32, y: i32, button_mask: i32) {
        if self.flags.contains(RecordingFlags::MOUSE) {
            self.write(|socket| send_mouse(socket, x, y, button_mask, current_timestamp()));
        }
    }

    /// Records a touch event, if touch events are included.
    #[allow(clippy::too_many_arguments)]
    pub fn report_touch(
        &self,
        id: i32,
        x: i32,
        y: i32,
        x_radius: i32,
        y_radius: i32,
        angle: f64,
        force: f64,
    ) {
        if self.flags.contains(RecordingFlags::TOUCH) {
            self.write(|socket| {
                send_touch(
                    socket,
                    id,
                    x,
                    y,
                    x_radius,
                    y_radius,
                    angle,
                    force,
                    current_timestamp(),
                )
            });
        }
    }

    /// Records a key event, if key events are included.
    pub fn report_key(&self, keysym: i32, pressed: bool) {
        if self.flags.contains(RecordingFlags::KEYS) {
            self.write(|socket| send_key(socket, keysym, pressed, current_timestamp()));
        }
    }

    /// Flushes the recording file.
    pub fn flush(&self) {
        let _ = self.socket.flush();
    }

    fn write(
        &self,
        f: impl FnOnce(&dyn GuacSocket) -> Result<(), guac_proto::ProtocolError>,
    ) {
        if let Err(e) = f(self.socket.as_ref()) {
            debug!(target: "client.recording", error = %e, "recording write failed");
        }
    }
}

/// Opens the first non-existing file among `name`, `name.1` … `name.255`.
fn open_unique(dir: &Path, name: &str) -> io::Result<(File, PathBuf)> {
    let base = dir.join(name);
    match File::create_new(&base) {
        Ok(file) => return Ok((file, base)),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
        Err(e) => return Err(e),
    }
    for suffix in 1..=RECORDING_MAX_SUFFIX {
        let candidate = dir.join(format!("{name}.{suffix}"));
        match File::create_new(&candidate) {
            Ok(file) => return Ok((file, candidate)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        "all recording name suffixes in use",
    ))
}

#[cfg(unix)]
fn lock_exclusive(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
fn lock_exclusive(_file: &File) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Client, NoopSessionHandler};

    fn test_client() -> Arc<Client> {
        Client::new(Arc::new(NoopSessionHandler), Vec::new())
    }

    #[test]
    fn recording_name_falls_back_on_collision() {
        let dir = tempfile::tempdir().unwrap();
        let client = test_client();

        let first = Recording::create(
            &client,
            dir.path(),
            "session",
            false,
            RecordingFlags::OUTPUT,
        )
        .unwrap();
        assert!(first.path().ends_with("session"));

        let second = Recording::create(
            &client,
            dir.path(),
            "session",
            false,
            RecordingFlags::OUTPUT,
        )
        .unwrap();
        assert!(second.path().ends_with("session.1"));
    }

    #[test]
    fn create_path_makes_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("recordings");
        let client = test_client();
        let recording =
            Recording::create(&client, &nested, "session", true, RecordingFlags::all()).unwrap();
        assert!(nested.is_dir());
        recording.report_key(0xFF0D, true);
        recording.flush();
        let contents = std::fs::read_to_string(recording.path()).unwrap();
        assert!(contents.starts_with("3.key,"));
    }
}
