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
use std::path::PathBuf;
use std::thread::available_parallelism;
use std::time::Instant;

use clap::Parser;
use colored::Colorize;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use indicatif_log_bridge::LogWrapper;
use log::{info, warn};
use rayon::iter::{IntoParallelIterator, ParallelIterator};

use pcmrate::{
    ColorLogger, ConversionContext, DitherType, InputContext, OutputContext, PcmError,
    TermResult,
};

#[derive(Parser, Debug)]
#[command(
    name = "pcmrate",
    about = "Resample 16-bit PCM audio between sample rates",
    version
)]
struct Cli {
    /// Input sample rate in Hz for raw (headerless) input.
    /// WAV input overrides this with the header rate.
    #[arg(short = 'i', long = "inrate", default_value = "44100")]
    input_rate: u32,

    /// Output sample rate in Hz
    #[arg(short = 'r', long = "rate", default_value = "48000")]
    output_rate: u32,

    /// Number of channels for raw input
    #[arg(short = 'c', long = "channels", default_value = "2")]
    channels: u32,

    /// Dither type: T (TPDF), X (none)
    #[arg(short = 'd', long = "dither", default_value = "X")]
    dither_type: char,

    /// Output type: S (stdout, raw s16le), W (wave), A (aiff).
    /// W or A writes <basename>.[wav|aif] next to the input, or
    /// output.[wav|aif] if reading from stdin
    #[arg(short = 'o', long = "output", default_value = "S")]
    output: char,

    /// Output directory path. Directory must already exist.
    /// [default: same as input file]
    #[arg(short = 'p', long = "path", default_value = None)]
    path: Option<PathBuf>,

    /// Volume level adjustment in dB. Can be negative with the
    /// long form, e.g. --level=-3
    #[arg(short = 'l', long = "level", default_value = "0.0")]
    level: f64,

    /// Append abbreviated output rate to the file name
    /// (e.g., _96K, _88_2K)
    #[arg(short = 'a', long = "append")]
    append_rate: bool,

    /// Print diagnostic messages
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Suppress all messages
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,

    /// Input files (use - for stdin; stdin is raw s16le)
    #[arg(name = "FILES")]
    files: Vec<String>,
}

fn main() -> TermResult {
    match run() {
        Ok(()) => TermResult(Ok(())),
        Err(e) => TermResult(Err(e.into())),
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let logger = ColorLogger::new(cli.quiet, cli.verbose);
    let level = logger.level_filter();
    let multi = MultiProgress::new();
    LogWrapper::new(multi.clone(), logger).try_init()?;
    log::set_max_level(level);

    let dither = DitherType::from_char(cli.dither_type)?;

    let avail_par = available_parallelism().map(|n| n.get()).unwrap_or(1);
    let thread_count = (avail_par / 2).max(1);

    // build_global can only be called once; ignore error if already set
    if let Err(e) = rayon::ThreadPoolBuilder::new()
        .num_threads(thread_count)
        .build_global()
    {
        warn!(
            "Rayon pool initialization error ({} threads). Details: {:?}",
            thread_count, e
        );
    }

    let mut inputs = if cli.files.is_empty() {
        vec!["-".to_string()]
    } else {
        cli.files.clone()
    };
    inputs.sort();
    inputs.dedup();

    let wall_start = Instant::now();
    let mut total_inputs = 0;

    // Handle stdin once, then drop it from the file list
    if inputs.iter().any(|p| p == "-") {
        convert_stdin(&cli, dither)?;
        total_inputs += 1;
        inputs.retain(|p| p != "-");
    }

    let paths: Vec<String> = inputs
        .into_iter()
        .filter(|input| {
            if input.contains('*') {
                warn!(
                    "Unexpanded glob pattern detected in input: \"{}\". Skipping.",
                    input
                );
                false
            } else {
                true
            }
        })
        .collect();
    total_inputs += paths.len();

    // Parallelize per input using Rayon; short-circuit on first error
    paths
        .into_par_iter()
        .try_for_each(|path| convert_file(path, &cli, dither, &multi))
        .map_err(|e| -> Box<dyn Error> { Box::new(PcmError::Message(e)) })?;

    let total_secs = wall_start.elapsed().as_secs();
    let h = total_secs / 3600;
    let m = (total_secs % 3600) / 60;
    let s = total_secs % 60;
    info!(
        "Converted {} inputs in {:02}:{:02}:{:02}",
        total_inputs, h, m, s
    );

    Ok(())
}

fn convert_file(
    path: String,
    cli: &Cli,
    dither: DitherType,
    multi: &MultiProgress,
) -> Result<(), String> {
    let file_name = PathBuf::from(&path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.clone());

    let in_ctx = InputContext::new(path, cli.input_rate, cli.channels)
        .map_err(|e| format!("{}: {}", file_name, e))?;
    let out_ctx = OutputContext::new(cli.output, cli.output_rate, cli.path.clone())
        .map_err(|e| e.to_string())?;
    let mut conv =
        ConversionContext::new(in_ctx, out_ctx, cli.level, dither, cli.append_rate)
            .map_err(|e| e.to_string())?;

    let style = ProgressStyle::with_template("{prefix} {bar:20.cyan/blue} {percent}{msg}")
        .map_err(|e| e.to_string())?;

    let pg = multi
        .add(ProgressBar::new(100))
        .with_style(style)
        .with_prefix(format!("{} {}", "[Converting]".bold(), file_name.bold()))
        .with_message("%");

    conv.do_conversion(Some(&pg))
        .map_err(|e| format!("Error processing {}: {}", file_name, e))?;
    pg.finish();

    Ok(())
}

fn convert_stdin(cli: &Cli, dither: DitherType) -> Result<(), Box<dyn Error>> {
    let in_ctx = InputContext::new("-".to_string(), cli.input_rate, cli.channels)?;
    let out_ctx = OutputContext::new(cli.output, cli.output_rate, cli.path.clone())?;
    let mut conv = ConversionContext::new(in_ctx, out_ctx, cli.level, dither, cli.append_rate)?;
    conv.do_conversion(None)?;
    Ok(())
}
