// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::Error;
use std::{fs, path::PathBuf};

/// Writes each captured buffer verbatim to `<dir>/frameNN`.
///
/// The index is zero-padded to two digits; from frame 100 on the names simply
/// grow (`frame100`), so lexical order breaks past 99 frames.
#[derive(Debug, Clone)]
pub struct RawDump {
    dir: PathBuf,
}

impl RawDump {
    /// Use `dir` for raw frames, creating it when missing.
    pub fn new<P: Into<PathBuf>>(dir: P) -> Result<Self, Error> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(RawDump { dir })
    }

    pub fn path_for(&self, frame: u32) -> PathBuf {
        self.dir.join(format!("frame{:02}", frame))
    }

    /// Write the full mapped buffer of `frame`.
    pub fn write(&self, frame: u32, data: &[u8]) -> Result<(), Error> {
        let path = self.path_for(frame);
        fs::write(&path, data)?;
        log::trace!("saved {} bytes to {}", data.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{env, path::Path};

    fn scratch(name: &str) -> PathBuf {
        env::temp_dir().join(format!("cedarcam-dump-{}-{}", name, std::process::id()))
    }

    #[test]
    fn test_frame_names() {
        let dump = RawDump {
            dir: PathBuf::from("/tmp/frames"),
        };
        assert_eq!(dump.path_for(0), Path::new("/tmp/frames/frame00"));
        assert_eq!(dump.path_for(7), Path::new("/tmp/frames/frame07"));
        assert_eq!(dump.path_for(42), Path::new("/tmp/frames/frame42"));
        assert_eq!(dump.path_for(123), Path::new("/tmp/frames/frame123"));
    }

    #[test]
    fn test_write_full_buffer() {
        let dir = scratch("write");
        let dump = RawDump::new(&dir).unwrap();
        let data: Vec<u8> = (0..=255).cycle().take(4096).collect();
        dump.write(3, &data).unwrap();
        assert_eq!(fs::read(dir.join("frame03")).unwrap(), data);
        fs::remove_dir_all(&dir).unwrap();
    }
}
