/*
 Copyright (c) 2025 pcmrate contributors

 This file is part of pcmrate

 pcmrate is free software: you can redistribute it and/or modify it
 under the terms of the GNU General Public License as published by the
 Free Software Foundation, either version 3 of the License, or
 (at your option) any later version.

 pcmrate is distributed in the hope that it will be useful, but
 WITHOUT ANY WARRANTY; without even the implied warranty of
 MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 GNU General Public License for more details.
 You should have received a copy of the GNU General Public License
 along with pcmrate. If not, see <https://www.gnu.org/licenses/>.
*/

use std::error::Error;
use std::io::{self, Write};
use std::path::PathBuf;

use log::info;

use crate::audio_file::{AudioFile, AudioFileFormat};

pub struct OutputContext {
    pub output: char, // 's' = stdout, 'w' = wave, 'a' = aiff
    pub rate: u32,
    pub channels: u32,
    pub path: Option<PathBuf>,

    int_file: Option<AudioFile<i16>>,
    stdout_buf: Vec<u8>,
}

impl OutputContext {
    pub fn new(
        out_type: char,
        out_rate: u32,
        out_path: Option<PathBuf>,
    ) -> Result<Self, Box<dyn Error>> {
        if out_rate == 0 {
            return Err("Output sample rate must be positive".into());
        }

        let output = out_type.to_ascii_lowercase();
        if !['s', 'w', 'a'].contains(&output) {
            return Err("Unrecognized output type".into());
        }

        if output == 's' && out_path.is_some() {
            return Err("Cannot specify output path when outputting to stdout".into());
        }

        if let Some(p) = &out_path {
            if !p.exists() {
                return Err(format!(
                    "Specified output path does not exist: {}",
                    p.display()
                )
                .into());
            }
        }

        Ok(Self {
            output,
            rate: out_rate,
            channels: 0,
            path: out_path,
            int_file: None,
            stdout_buf: Vec::new(),
        })
    }

    pub fn init(&mut self, channels: u32) {
        self.channels = channels;
        if self.output != 's' {
            self.int_file = Some(AudioFile::new(self.rate, channels as usize));
        }
    }

    /// Sinks one interleaved block: raw little-endian to stdout, or
    /// accumulated for a file save.
    pub fn write_block(&mut self, samples: &[i16]) -> Result<(), Box<dyn Error>> {
        if samples.is_empty() {
            return Ok(());
        }

        if self.output == 's' {
            self.stdout_buf.clear();
            self.stdout_buf.reserve(samples.len() * 2);
            for &s in samples {
                self.stdout_buf.extend_from_slice(&s.to_le_bytes());
            }
            io::stdout().write_all(&self.stdout_buf)?;
            io::stdout().flush()?;
            return Ok(());
        }

        if let Some(file) = &mut self.int_file {
            file.push_interleaved(samples);
        }
        Ok(())
    }

    /// Saves accumulated samples, forcibly overwriting any existing file
    /// at the target path. No-op for stdout output.
    pub fn save_file(&self, out_path: &PathBuf) -> Result<(), String> {
        let format = match self.output {
            'w' => AudioFileFormat::Wave,
            'a' => AudioFileFormat::Aiff,
            _ => return Ok(()),
        };

        let path = out_path.as_path();
        if path.exists() {
            std::fs::remove_file(path).map_err(|e| {
                format!(
                    "Failed to remove existing file '{}': {}",
                    out_path.to_string_lossy(),
                    e
                )
            })?;
        }

        let file = self.int_file.as_ref().ok_or("No file initialized")?;
        file.save(out_path, format).map_err(|e| e.to_string())?;
        file.print_summary();

        info!("Wrote to file: {}", out_path.to_string_lossy());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_stdout_with_path() {
        let err = OutputContext::new('s', 48000, Some(PathBuf::from(".")));
        assert!(err.is_err());
    }

    #[test]
    fn rejects_unknown_sink() {
        assert!(OutputContext::new('z', 48000, None).is_err());
        assert!(OutputContext::new('w', 0, None).is_err());
    }

    #[test]
    fn accepts_known_sinks() {
        for t in ['s', 'W', 'a'] {
            assert!(OutputContext::new(t, 48000, None).is_ok());
        }
    }
}
