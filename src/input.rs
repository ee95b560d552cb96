use std::error::Error;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use log::debug;

pub struct WavHeader {
    pub sample_rate: u32,
    pub channels: u32,
    pub data_pos: u64,
    pub data_len: u64,
}

pub struct InputContext {
    pub std_in: bool,
    pub input: String,
    pub file_path: Option<PathBuf>,
    pub parent_path: Option<PathBuf>,
    pub sample_rate: u32,
    pub channels: u32,
    /// PCM payload size in bytes, when known up front.
    pub data_len: Option<u64>,

    reader: Box<dyn Read>,
    remaining: Option<u64>,
    byte_buf: Vec<u8>,
}

impl InputContext {
    /// Opens `input_file` ("-" for stdin). Raw input is interpreted as
    /// signed 16-bit little-endian PCM at `sample_rate`/`channels`; a
    /// `.wav` file overrides both from its header.
    pub fn new(
        input_file: String,
        sample_rate: u32,
        channels: u32,
    ) -> Result<Self, Box<dyn Error>> {
        if sample_rate == 0 {
            return Err("Input sample rate must be positive".into());
        }
        if !(1..=2).contains(&channels) {
            return Err("Only 1 or 2 channels are supported".into());
        }

        if input_file == "-" {
            return Ok(Self {
                std_in: true,
                input: input_file,
                file_path: None,
                parent_path: None,
                sample_rate,
                channels,
                data_len: None,
                reader: Box::new(io::stdin()),
                remaining: None,
                byte_buf: Vec::new(),
            });
        }

        let path = PathBuf::from(&input_file);
        let parent_path = path.parent().unwrap_or(Path::new("")).to_path_buf();

        let mut file = File::open(&input_file)
            .map_err(|e| format!("Cannot open input file '{}': {}", input_file, e))?;
        let file_len = file.metadata().map(|m| m.len()).unwrap_or(0);
        debug!("Opened input file: {} ({} bytes)", input_file, file_len);

        let is_wav = input_file.to_ascii_lowercase().ends_with(".wav");

        let (sample_rate, channels, data_len) = if is_wav {
            let header = parse_wav_header(&mut file)?;
            if !(1..=2).contains(&header.channels) {
                return Err("Only mono and stereo WAV input is supported".into());
            }
            debug!(
                "WAV: {} Hz, {} channels, data at {} ({} bytes)",
                header.sample_rate, header.channels, header.data_pos, header.data_len
            );
            file.seek(SeekFrom::Start(header.data_pos))?;
            (header.sample_rate, header.channels, header.data_len)
        } else {
            (sample_rate, channels, file_len)
        };

        Ok(Self {
            std_in: false,
            input: input_file,
            file_path: Some(path),
            parent_path: Some(parent_path),
            sample_rate,
            channels,
            data_len: Some(data_len),
            reader: Box::new(file),
            remaining: Some(data_len),
            byte_buf: Vec::new(),
        })
    }

    /// Reads up to `samples.len() / channels` frames. Returns the frame
    /// count, 0 at end of stream. A trailing partial frame is dropped.
    pub fn read_block(&mut self, samples: &mut [i16]) -> io::Result<usize> {
        let mut want = samples.len() * 2;
        if let Some(rem) = self.remaining {
            want = want.min(rem as usize);
        }
        self.byte_buf.resize(want, 0);

        let mut filled = 0;
        while filled < want {
            let n = self.reader.read(&mut self.byte_buf[filled..want])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if let Some(rem) = self.remaining.as_mut() {
            *rem -= filled as u64;
        }

        let frame_bytes = 2 * self.channels as usize;
        let frames = filled / frame_bytes;
        for k in 0..frames * self.channels as usize {
            samples[k] = i16::from_le_bytes([self.byte_buf[2 * k], self.byte_buf[2 * k + 1]]);
        }
        Ok(frames)
    }

    pub fn display_name(&self) -> String {
        if self.std_in {
            "stdin".to_string()
        } else {
            self.file_path
                .as_ref()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.input.clone())
        }
    }
}

/// Walks the RIFF chunk list up to the data chunk. Only 16-bit PCM is
/// accepted.
pub fn parse_wav_header(file: &mut File) -> Result<WavHeader, Box<dyn Error>> {
    let mut riff = [0u8; 12];
    file.read_exact(&mut riff)
        .map_err(|_| "Truncated WAV header")?;
    if &riff[0..4] != b"RIFF" || &riff[8..12] != b"WAVE" {
        return Err("Not a RIFF/WAVE file".into());
    }

    let mut fmt: Option<(u32, u16)> = None;
    loop {
        let mut chunk = [0u8; 8];
        file.read_exact(&mut chunk)
            .map_err(|_| "WAV file has no data chunk")?;
        let size = u32::from_le_bytes(chunk[4..8].try_into().unwrap()) as u64;

        match &chunk[0..4] {
            b"fmt " => {
                if size < 16 {
                    return Err("Malformed fmt chunk".into());
                }
                let mut body = [0u8; 16];
                file.read_exact(&mut body)?;
                let format_tag = u16::from_le_bytes(body[0..2].try_into().unwrap());
                let channels = u16::from_le_bytes(body[2..4].try_into().unwrap());
                let sample_rate = u32::from_le_bytes(body[4..8].try_into().unwrap());
                let bits = u16::from_le_bytes(body[14..16].try_into().unwrap());

                if format_tag != 1 {
                    return Err("Only PCM WAV input is supported".into());
                }
                if bits != 16 {
                    return Err("Only 16-bit WAV input is supported".into());
                }
                fmt = Some((sample_rate, channels));

                // skip any fmt extension, plus the odd-size pad byte
                let rest = (size - 16) + (size & 1);
                if rest > 0 {
                    file.seek(SeekFrom::Current(rest as i64))?;
                }
            }
            b"data" => {
                let (sample_rate, channels) =
                    fmt.ok_or("WAV data chunk appears before fmt chunk")?;
                let data_pos = file.stream_position()?;
                return Ok(WavHeader {
                    sample_rate,
                    channels: channels as u32,
                    data_pos,
                    data_len: size,
                });
            }
            _ => {
                file.seek(SeekFrom::Current((size + (size & 1)) as i64))?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_file::{AudioFile, AudioFileFormat};

    fn temp_path(name: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("pcmrate_test_{}_{}", std::process::id(), name));
        p
    }

    #[test]
    fn wav_writer_roundtrips_through_reader() {
        let path = temp_path("roundtrip.wav");
        let pcm: Vec<i16> = (0..1000).map(|i| (i * 13 % 1789) as i16 - 894).collect();

        let mut file: AudioFile<i16> = AudioFile::new(44100, 2);
        file.push_interleaved(&pcm);
        file.save(&path, AudioFileFormat::Wave).unwrap();

        let mut ctx = InputContext::new(path.to_string_lossy().into_owned(), 8000, 1).unwrap();
        // header wins over the raw-input hints
        assert_eq!(ctx.sample_rate, 44100);
        assert_eq!(ctx.channels, 2);
        assert_eq!(ctx.data_len, Some(2000));

        let mut block = vec![0i16; 2048];
        let mut read_back: Vec<i16> = Vec::new();
        loop {
            let frames = ctx.read_block(&mut block).unwrap();
            if frames == 0 {
                break;
            }
            read_back.extend_from_slice(&block[..frames * 2]);
        }
        assert_eq!(read_back, pcm);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn raw_input_uses_caller_format() {
        let path = temp_path("raw.pcm");
        let bytes: Vec<u8> = (0..64u8).collect();
        std::fs::write(&path, &bytes).unwrap();

        let ctx = InputContext::new(path.to_string_lossy().into_owned(), 22050, 1).unwrap();
        assert_eq!(ctx.sample_rate, 22050);
        assert_eq!(ctx.channels, 1);
        assert_eq!(ctx.data_len, Some(64));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn rejects_non_wav_bytes_with_wav_extension() {
        let path = temp_path("bogus.wav");
        std::fs::write(&path, b"definitely not a wav file").unwrap();

        let err = InputContext::new(path.to_string_lossy().into_owned(), 44100, 2);
        assert!(err.is_err());

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn rejects_invalid_raw_parameters() {
        assert!(InputContext::new("-".into(), 0, 2).is_err());
        assert!(InputContext::new("-".into(), 44100, 3).is_err());
    }
}
