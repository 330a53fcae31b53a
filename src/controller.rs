//! Runtime control of the daemon: a local sequenced-packet command socket,
//! plus the external shell hooks fired around calibration.

use std::io;
use std::mem::MaybeUninit;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::{debug, error, info, warn};
use socket2::Socket;

use crate::calibration_store::{CalibrationStore, ImageOutcome};
use crate::processor::{CalibrationListener, Processor};
use crate::stream_server::{bind_listener, StreamError};

#[derive(Debug, PartialEq, Eq)]
pub enum ControlAction {
    Continue,
    Shutdown,
}

/// Polled between ticks; may mutate the processor and use the calibration
/// store on behalf of a remote peer.
pub trait Controller {
    fn dispatch(&mut self, processor: &mut Processor, store: &CalibrationStore) -> ControlAction;
}

struct Peer {
    socket: Socket,
    awaiting_calibration: bool,
}

/// One-datagram-per-command control socket.
///
/// Verbs: `start`, `stop`, `calibrate`, `saveCalibrationData`,
/// `loadCalibrationData`, `generateCalibrationImage <w> <h>`, `shutdown`.
/// Every command gets one reply datagram; `calibrate` replies `1` or `0`
/// once the calibration tick has run.
pub struct SocketController {
    path: PathBuf,
    listener: Socket,
    peers: Vec<Peer>,
}

impl SocketController {
    pub fn bind(path: PathBuf) -> Result<Self, StreamError> {
        let listener = bind_listener(&path)?;
        Ok(SocketController {
            path,
            listener,
            peers: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn accept_pending(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((socket, _)) => {
                    if let Err(e) = socket.set_nonblocking(true) {
                        warn!("control peer setup failed: {e}");
                        continue;
                    }
                    debug!("control peer connected on \"{}\"", self.path.display());
                    self.peers.push(Peer {
                        socket,
                        awaiting_calibration: false,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    error!("control accept failed: {e}");
                    break;
                }
            }
        }
    }
}

fn reply(peer: &Peer, message: &str) -> bool {
    match peer.socket.send_with_flags(message.as_bytes(), libc::MSG_NOSIGNAL) {
        Ok(_) => true,
        Err(e) => {
            debug!("control reply failed: {e}");
            false
        }
    }
}

fn receive(peer: &Peer) -> Option<Result<String, ()>> {
    let mut buf = [MaybeUninit::<u8>::uninit(); 512];
    match peer.socket.recv(&mut buf) {
        Ok(0) => Some(Err(())),
        Ok(n) => {
            let bytes: Vec<u8> = buf[..n]
                .iter()
                .map(|b| unsafe { b.assume_init() })
                .collect();
            Some(Ok(String::from_utf8_lossy(&bytes).trim().to_string()))
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => None,
        Err(_) => Some(Err(())),
    }
}

impl Controller for SocketController {
    fn dispatch(&mut self, processor: &mut Processor, store: &CalibrationStore) -> ControlAction {
        self.accept_pending();

        let mut action = ControlAction::Continue;
        let mut i = 0;
        while i < self.peers.len() {
            let mut drop_peer = false;

            // deliver a deferred calibration verdict once the tick ran
            if self.peers[i].awaiting_calibration && !processor.is_calibrating() {
                let verdict = if processor.calibration_succeeded() {
                    "1"
                } else {
                    "0"
                };
                drop_peer = !reply(&self.peers[i], verdict);
                self.peers[i].awaiting_calibration = false;
            }

            if !drop_peer {
                match receive(&self.peers[i]) {
                    None => {}
                    Some(Err(())) => drop_peer = true,
                    Some(Ok(command)) => {
                        info!("control command: \"{command}\"");
                        let mut parts = command.split_whitespace();
                        match parts.next() {
                            Some("start") => {
                                processor.start();
                                drop_peer = !reply(&self.peers[i], "ok");
                            }
                            Some("stop") => {
                                processor.stop();
                                drop_peer = !reply(&self.peers[i], "ok");
                            }
                            Some("calibrate") => {
                                if processor.start_calibration() {
                                    self.peers[i].awaiting_calibration = true;
                                } else {
                                    drop_peer = !reply(&self.peers[i], "0");
                                }
                            }
                            Some("saveCalibrationData") => {
                                let message = match store.save(processor.unprojector()) {
                                    Ok(()) => "ok".to_string(),
                                    Err(e) => {
                                        warn!("saving calibration failed: {e}");
                                        format!("failed: {e}")
                                    }
                                };
                                drop_peer = !reply(&self.peers[i], &message);
                            }
                            Some("loadCalibrationData") => {
                                let message = if store.load(processor.unprojector_mut()) {
                                    "ok"
                                } else {
                                    "failed"
                                };
                                drop_peer = !reply(&self.peers[i], message);
                            }
                            Some("generateCalibrationImage") => {
                                let width = parts.next().and_then(|v| v.parse::<u32>().ok());
                                let height = parts.next().and_then(|v| v.parse::<u32>().ok());
                                let message = match (width, height) {
                                    (Some(width), Some(height)) => {
                                        match store.generate_image(processor.unprojector(), width, height)
                                        {
                                            Ok(ImageOutcome::Written(path)) => {
                                                format!("ok {}", path.display())
                                            }
                                            Ok(ImageOutcome::Skipped(path)) => {
                                                format!("skipped {}", path.display())
                                            }
                                            Err(e) => format!("failed: {e}"),
                                        }
                                    }
                                    _ => "failed: expected generateCalibrationImage <width> <height>"
                                        .to_string(),
                                };
                                drop_peer = !reply(&self.peers[i], &message);
                            }
                            Some("shutdown") => {
                                reply(&self.peers[i], "ok");
                                action = ControlAction::Shutdown;
                            }
                            Some(other) => {
                                drop_peer =
                                    !reply(&self.peers[i], &format!("unknown command: {other}"));
                            }
                            None => {}
                        }
                    }
                }
            }

            if drop_peer {
                self.peers.swap_remove(i);
            } else {
                i += 1;
            }
        }
        action
    }
}

impl Drop for SocketController {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Runs the configured shell commands around calibration; the end hook gets
/// the result appended as `1` or `0`.
pub struct HookListener {
    begin_command: Option<String>,
    end_command: Option<String>,
}

impl HookListener {
    pub fn new(begin_command: Option<String>, end_command: Option<String>) -> Self {
        HookListener {
            begin_command,
            end_command,
        }
    }
}

fn run_hook(command: &str) {
    match Command::new("sh").arg("-c").arg(command).status() {
        Ok(status) if status.success() => {}
        Ok(status) => warn!("hook \"{command}\" exited with {status}"),
        Err(e) => warn!("hook \"{command}\" could not run: {e}"),
    }
}

impl CalibrationListener for HookListener {
    fn calibration_begin(&mut self) {
        if let Some(command) = &self.begin_command {
            run_hook(command);
        }
    }

    fn calibration_end(&mut self, success: bool) {
        if let Some(command) = &self.end_command {
            run_hook(&format!("{command} {}", if success { "1" } else { "0" }));
        }
    }
}
