use core::fmt;
use std::process::{ExitCode, Termination};

use log::error;

pub mod audio_file;
pub mod color_logger;
pub mod conversion_context;
pub mod convolve;
pub mod dither;
pub mod filters;
pub mod input;
pub mod interp;
pub mod output;
pub mod resampler;

pub use color_logger::ColorLogger;
pub use conversion_context::ConversionContext;
pub use dither::{Dither, DitherType};
pub use input::InputContext;
pub use output::OutputContext;
pub use resampler::Resampler;

#[derive(Debug)]
pub enum PcmError {
    Message(String),
}

impl std::fmt::Display for PcmError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PcmError::Message(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for PcmError {}

pub type PcmResult<T> = Result<T, PcmError>;

pub struct TermResult(pub PcmResult<()>);

impl Termination for TermResult {
    fn report(self) -> ExitCode {
        match self.0 {
            Ok(_) => ExitCode::SUCCESS,
            Err(err) => {
                error!("{}", err);
                ExitCode::FAILURE
            }
        }
    }
}

// Convert boxed dynamic errors into PcmError
impl From<Box<dyn std::error::Error>> for PcmError {
    fn from(err: Box<dyn std::error::Error>) -> Self {
        PcmError::Message(err.to_string())
    }
}

impl From<String> for PcmError {
    fn from(msg: String) -> Self {
        PcmError::Message(msg)
    }
}
