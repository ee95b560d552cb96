use std::error::Error;
use std::path::PathBuf;
use std::time::Instant;

use indicatif::ProgressBar;
use log::{info, warn};

use crate::dither::DitherType;
use crate::input::InputContext;
use crate::output::OutputContext;
use crate::resampler::Resampler;

pub struct ConversionContext {
    in_ctx: InputContext,
    out_ctx: OutputContext,
    resampler: Resampler,
    append_rate: bool,
}

impl ConversionContext {
    pub fn new(
        in_ctx: InputContext,
        mut out_ctx: OutputContext,
        level_db: f64,
        dither: DitherType,
        append_rate: bool,
    ) -> Result<Self, Box<dyn Error>> {
        let gain = 10f64.powf(level_db / 20.0) as f32;

        let mut resampler = Resampler::with_gain(
            in_ctx.sample_rate,
            out_ctx.rate,
            in_ctx.channels,
            gain,
        );
        if dither == DitherType::Tpdf {
            resampler.set_dither(dither);
        }

        out_ctx.init(in_ctx.channels);

        Ok(Self {
            in_ctx,
            out_ctx,
            resampler,
            append_rate,
        })
    }

    /// Streams the whole input through the resampler in
    /// resampler-blocking-sized reads. Returns (input, output) frame
    /// totals.
    pub fn do_conversion(
        &mut self,
        progress: Option<&ProgressBar>,
    ) -> Result<(u64, u64), Box<dyn Error>> {
        let channels = self.resampler.channels();
        let in_block = self.resampler.input_block();
        let mut in_buf = vec![0i16; in_block * channels];
        let mut out_buf =
            vec![0i16; (self.resampler.max_output(in_block) + 2) * channels];

        let bytes_total = self.in_ctx.data_len;
        let mut bytes_done: u64 = 0;
        let mut in_frames: u64 = 0;
        let mut out_frames: u64 = 0;
        let started = Instant::now();

        info!(
            "{}: {} Hz -> {} Hz, {} channel(s), {} mode",
            self.in_ctx.display_name(),
            self.in_ctx.sample_rate,
            self.out_ctx.rate,
            channels,
            if self.resampler.is_rational() { "rational" } else { "irrational" }
        );

        loop {
            let frames = self.in_ctx.read_block(&mut in_buf)?;
            if frames == 0 {
                break;
            }

            let produced =
                self.resampler
                    .render(&in_buf[..frames * channels], &mut out_buf, frames);
            self.out_ctx.write_block(&out_buf[..produced * channels])?;

            in_frames += frames as u64;
            out_frames += produced as u64;
            bytes_done += (frames * channels * 2) as u64;

            if let (Some(pb), Some(total)) = (progress, bytes_total) {
                pb.set_position((bytes_done * 100 / total.max(1)).min(100));
            }
        }

        if let Some(pb) = progress {
            pb.set_position(100);
        }

        if self.out_ctx.output != 's' {
            let out_path = self.output_path();
            self.out_ctx.save_file(&out_path)?;
        }

        let clipped = self.resampler.clipped_samples();
        if clipped > 0 {
            warn!(
                "{}: {} samples clipped at the 16-bit boundary",
                self.in_ctx.display_name(),
                clipped
            );
        }

        info!(
            "{}: {} -> {} frames ({:.1} s of audio) in {:.2?}",
            self.in_ctx.display_name(),
            in_frames,
            out_frames,
            out_frames as f64 / self.out_ctx.rate as f64,
            started.elapsed()
        );

        Ok((in_frames, out_frames))
    }

    // <basename>[<rate suffix>].<ext>, next to the input unless an
    // output directory was given
    fn output_path(&self) -> PathBuf {
        let ext = if self.out_ctx.output == 'a' { "aif" } else { "wav" };
        let stem = match &self.in_ctx.file_path {
            Some(p) => p
                .file_stem()
                .unwrap_or_default()
                .to_string_lossy()
                .into_owned(),
            None => "output".to_string(),
        };
        let name = if self.append_rate {
            format!("{}{}.{}", stem, rate_suffix(self.out_ctx.rate), ext)
        } else {
            format!("{}.{}", stem, ext)
        };

        let dir = if let Some(p) = &self.out_ctx.path {
            p.clone()
        } else if let Some(parent) = &self.in_ctx.parent_path {
            parent.clone()
        } else {
            PathBuf::from(".")
        };
        dir.join(name)
    }
}

/// Abbreviated rate tag for file names, e.g. `_96K` or `_88_2K`.
pub fn rate_suffix(rate: u32) -> String {
    let k = rate / 1000;
    let rem = rate % 1000;
    if rem == 0 {
        format!("_{}K", k)
    } else {
        format!("_{}_{}K", k, rem / 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_suffixes() {
        assert_eq!(rate_suffix(96000), "_96K");
        assert_eq!(rate_suffix(48000), "_48K");
        assert_eq!(rate_suffix(88200), "_88_2K");
        assert_eq!(rate_suffix(44100), "_44_1K");
    }
}
