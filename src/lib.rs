#![warn(clippy::pedantic)]
// Noisy doc/signature lints
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
// format!("{}", x) is used throughout
#![allow(clippy::uninlined_format_args)]
// Timestamps and byte counts are cast between integer widths on purpose
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod pipeline;
pub mod session;
pub mod sidecar;
pub(crate) mod utils;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
