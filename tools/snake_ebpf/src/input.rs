// SPDX-License-Identifier: GPL-2.0
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Keyboard feed.
//!
//! A dedicated thread blocks on the reader and hands tokens to the control
//! loop through a one-slot inbox. If the loop has not taken the previous
//! token yet the new one is dropped; the reader never waits on the loop.

use std::io::BufReader;
use std::io::Read;
use std::thread;

use anyhow::Context;
use anyhow::Result;
use crossbeam::channel::bounded;
use crossbeam::channel::Receiver;
use crossbeam::channel::Sender;
use crossbeam::channel::TrySendError;
use log::{debug, trace};

const ESC: u8 = 0x1b;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputToken {
    Up,
    Down,
    Left,
    Right,
    Quit,
    /// Any other key, lowercased.
    Key(char),
}

impl InputToken {
    fn from_key(b: u8) -> Self {
        match b.to_ascii_lowercase() {
            b'w' => InputToken::Up,
            b's' => InputToken::Down,
            b'a' => InputToken::Left,
            b'd' => InputToken::Right,
            b'q' => InputToken::Quit,
            other => InputToken::Key(other as char),
        }
    }
}

/// Byte-at-a-time decoder for WASD/q and ANSI arrow sequences (`ESC [ A..D`).
#[derive(Debug, Default)]
pub struct Decoder {
    state: DecodeState,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    #[default]
    Ground,
    Escape,
    Csi,
}

impl Decoder {
    pub fn feed(&mut self, b: u8) -> Option<InputToken> {
        match (self.state, b) {
            (DecodeState::Ground, ESC) => {
                self.state = DecodeState::Escape;
                None
            }
            (DecodeState::Ground, b'\n' | b'\r') => None,
            (DecodeState::Ground, _) => Some(InputToken::from_key(b)),
            (DecodeState::Escape, b'[') => {
                self.state = DecodeState::Csi;
                None
            }
            (DecodeState::Escape, ESC) => None,
            (DecodeState::Escape, _) => {
                // lone ESC followed by a normal key
                self.state = DecodeState::Ground;
                Some(InputToken::from_key(b))
            }
            (DecodeState::Csi, _) => {
                self.state = DecodeState::Ground;
                match b {
                    b'A' => Some(InputToken::Up),
                    b'B' => Some(InputToken::Down),
                    b'C' => Some(InputToken::Right),
                    b'D' => Some(InputToken::Left),
                    _ => None,
                }
            }
        }
    }
}

/// Hand `token` to the inbox without blocking. Returns false if it was dropped.
pub fn offer(tx: &Sender<InputToken>, token: InputToken) -> bool {
    match tx.try_send(token) {
        Ok(()) => true,
        Err(TrySendError::Full(t)) => {
            trace!("input inbox full, dropping {:?}", t);
            false
        }
        Err(TrySendError::Disconnected(_)) => false,
    }
}

/// Spawn the reader thread. The receiver disconnects when `reader` hits EOF
/// or an error.
pub fn spawn_feed<R: Read + Send + 'static>(reader: R) -> Result<Receiver<InputToken>> {
    let (tx, rx) = bounded(1);
    thread::Builder::new()
        .name("input-feed".to_string())
        .spawn(move || {
            let mut decoder = Decoder::default();
            for byte in BufReader::new(reader).bytes() {
                let Ok(b) = byte else { break };
                if let Some(token) = decoder.feed(b) {
                    offer(&tx, token);
                }
            }
            debug!("input feed closed");
        })
        .context("failed to spawn input thread")?;
    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn decode(bytes: &[u8]) -> Vec<InputToken> {
        let mut d = Decoder::default();
        bytes.iter().filter_map(|&b| d.feed(b)).collect()
    }

    #[test]
    fn wasd_and_quit_case_insensitive() {
        assert_eq!(
            decode(b"wAsDQx"),
            vec![
                InputToken::Up,
                InputToken::Left,
                InputToken::Down,
                InputToken::Right,
                InputToken::Quit,
                InputToken::Key('x'),
            ]
        );
    }

    #[test]
    fn arrow_sequences() {
        assert_eq!(
            decode(b"\x1b[A\x1b[B\x1b[C\x1b[D"),
            vec![
                InputToken::Up,
                InputToken::Down,
                InputToken::Right,
                InputToken::Left,
            ]
        );
    }

    #[test]
    fn unknown_csi_and_newlines_are_ignored() {
        assert_eq!(decode(b"\x1b[Z\nq"), vec![InputToken::Quit]);
        assert_eq!(decode(b"\x1bw"), vec![InputToken::Up]);
    }

    #[test]
    fn full_inbox_drops_instead_of_blocking() {
        let (tx, rx) = bounded(1);
        assert!(offer(&tx, InputToken::Up));
        assert!(!offer(&tx, InputToken::Down));
        assert_eq!(rx.try_recv().unwrap(), InputToken::Up);
        assert!(rx.try_recv().is_err());
        assert!(offer(&tx, InputToken::Left));
    }

    #[test]
    fn feed_disconnects_at_eof() {
        let rx = spawn_feed(std::io::Cursor::new(b"q".to_vec())).unwrap();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(1)).unwrap(),
            InputToken::Quit
        );
        assert!(rx.recv_timeout(Duration::from_secs(1)).is_err());
    }
}
