// SPDX-FileCopyrightText: Copyright (c) 2023-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Resumable fixed-size block transfers

use crate::codec::FrameError;

/// Tracks one fixed-size transfer across multiple codec calls.
///
/// A completed block resets itself on the next call, so the framer
/// can reuse a single instance for consecutive fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Block {
    cursor: usize,
    complete: bool,
}

impl Default for Block {
    fn default() -> Self {
        Self {
            cursor: 0,
            complete: true,
        }
    }
}

impl Block {
    /// Advances the transfer by whatever `io` manages to move.
    ///
    /// `io` receives the current offset and returns the number of
    /// bytes transferred from there. Returns `true` once the whole
    /// block of `size` bytes is done.
    pub(crate) fn run<F>(&mut self, size: usize, mut io: F) -> Result<bool, FrameError>
    where
        F: FnMut(usize) -> Result<usize, FrameError>,
    {
        if self.complete {
            self.complete = false;
            self.cursor = 0;
        }
        if self.cursor < size {
            self.cursor += io(self.cursor)?;
        }
        if self.cursor >= size {
            self.complete = true;
        }
        Ok(self.complete)
    }
}
