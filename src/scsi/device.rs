//! Linux sg pass-through device.
//!
//! Every exchange is a blocking write of `sg_header` + command bytes
//! followed by a blocking read of `sg_header` + reply bytes, with
//! `select(2)` bounding both directions. The header returned with the
//! reply carries the 16-byte sense for the command, which is cached
//! verbatim for the interpreter.

use crate::error::{Result, TransportFault};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

use super::constants::{DEFAULT_COMMAND_TIMEOUT_SECS, SG_HEADER_LEN, SG_MAX_SENSE};
use super::ffi::SgHeader;
use super::Transport;

pub struct SgDevice {
    #[cfg(unix)]
    file: File,
    device_path: String,
    pack_id: i32,
    timeout: Duration,
    last_sense: [u8; SG_MAX_SENSE],
}

impl SgDevice {
    /// Open an sg character device (e.g. `/dev/sg1`) for exclusive use.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let device_path = path.as_ref().display().to_string();
        debug!("Opening tape device: {}", device_path);

        #[cfg(unix)]
        {
            let file = File::options().read(true).write(true).open(path.as_ref())?;
            Ok(Self {
                file,
                device_path,
                pack_id: 1,
                timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
                last_sense: [0u8; SG_MAX_SENSE],
            })
        }

        #[cfg(not(unix))]
        {
            Err(crate::error::RustOnStreamError::unsupported(
                "non-Unix platform",
            ))
        }
    }

    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    /// Override the per-command reply timeout (default 90s).
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Block until the descriptor is ready in the requested direction.
    /// Returns false on timeout; EINTR restarts the wait.
    #[cfg(unix)]
    fn wait_fd(&self, for_read: bool) -> Result<bool> {
        use std::os::unix::io::AsRawFd;

        let fd = self.file.as_raw_fd();
        loop {
            let mut tv = libc::timeval {
                tv_sec: self.timeout.as_secs() as libc::time_t,
                tv_usec: self.timeout.subsec_micros() as libc::suseconds_t,
            };
            let rc = unsafe {
                let mut fds: libc::fd_set = std::mem::zeroed();
                libc::FD_ZERO(&mut fds);
                libc::FD_SET(fd, &mut fds);
                if for_read {
                    libc::select(
                        fd + 1,
                        &mut fds,
                        std::ptr::null_mut(),
                        std::ptr::null_mut(),
                        &mut tv,
                    )
                } else {
                    libc::select(
                        fd + 1,
                        std::ptr::null_mut(),
                        &mut fds,
                        std::ptr::null_mut(),
                        &mut tv,
                    )
                }
            };

            if rc > 0 {
                return Ok(true);
            }
            if rc == 0 {
                return Ok(false);
            }
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EINTR) {
                return Err(err.into());
            }
        }
    }
}

#[cfg(unix)]
impl Transport for SgDevice {
    fn execute(&mut self, command: &[u8], reply_len: usize) -> Result<Vec<u8>> {
        let header = SgHeader {
            reply_len: (SG_HEADER_LEN + reply_len) as i32,
            pack_id: self.pack_id,
            twelve_byte: command.len() == 12,
            ..Default::default()
        };
        self.pack_id = self.pack_id.wrapping_add(1);

        let mut outgoing = Vec::with_capacity(SG_HEADER_LEN + command.len());
        outgoing.extend_from_slice(&header.to_bytes());
        outgoing.extend_from_slice(command);

        if !self.wait_fd(false)? {
            warn!("{}: device never became writable", self.device_path);
            return Err(TransportFault::WriteTimeout.into());
        }

        let written = (&self.file)
            .write(&outgoing)
            .map_err(|_| TransportFault::WriteError)?;
        if written < outgoing.len() {
            warn!(
                "{}: short command write, asked {} got {}",
                self.device_path,
                outgoing.len(),
                written
            );
            return Err(TransportFault::WriteError.into());
        }

        if !self.wait_fd(true)? {
            warn!("{}: no reply within {:?}", self.device_path, self.timeout);
            return Err(TransportFault::ReadTimeout.into());
        }

        let mut incoming = vec![0u8; SG_HEADER_LEN + reply_len];
        let received = (&self.file)
            .read(&mut incoming)
            .map_err(|_| TransportFault::ReadError)?;
        if received < SG_HEADER_LEN {
            return Err(TransportFault::ShortRead.into());
        }

        let reply_header = SgHeader::from_bytes(&incoming[..SG_HEADER_LEN]);
        self.last_sense = reply_header.sense_buffer;

        incoming.truncate(received);
        incoming.drain(..SG_HEADER_LEN);
        Ok(incoming)
    }

    fn last_sense(&self) -> [u8; SG_MAX_SENSE] {
        self.last_sense
    }
}

#[cfg(not(unix))]
impl Transport for SgDevice {
    fn execute(&mut self, _command: &[u8], _reply_len: usize) -> Result<Vec<u8>> {
        Err(crate::error::RustOnStreamError::unsupported(
            "non-Unix platform",
        ))
    }

    fn last_sense(&self) -> [u8; SG_MAX_SENSE] {
        self.last_sense
    }
}
