//! bode-httpd CLI arguments.
//!
//! This module contains the definition of the CLI arguments for the bode-httpd
//! application.

use crate::signals::SIGNAL_LENGTH;
use clap::Parser;
use std::net::SocketAddr;

/// bode-httpd CLI arguments.
#[derive(Parser, Debug, Clone, PartialEq)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// Listen address for the HTTP server
    #[clap(long, default_value = "0.0.0.0:8000")]
    pub listen: SocketAddr,
    /// Number of samples per published signal (power of two)
    #[clap(long, default_value_t = SIGNAL_LENGTH)]
    pub signal_length: usize,
    /// Interval between polls of an armed acquisition, in milliseconds
    #[clap(long, default_value_t = 10)]
    pub poll_interval_ms: u64,
    /// Cutoff frequency of the simulated device under test, in Hz
    #[clap(long, default_value_t = 10e3)]
    pub dut_cutoff: f64,
}
