//! bode-httpd is the control plane of an FPGA based oscilloscope, signal
//! generator, Bode plotter and PID controller. It keeps the instrument
//! parameter table, translates parameter updates into reconfigurations of the
//! FPGA subsystems, runs the acquisition worker, and provides a RESTful API to
//! the remote UI. Signals are streamed to clients in real time using
//! WebSockets.

#![warn(missing_docs)]

pub mod app;
pub mod args;
pub mod bode;
pub mod dispatch;
pub mod dsp;
pub mod error;
pub mod fpga;
pub mod httpd;
pub mod measure;
pub mod params;
pub mod signals;
pub mod units;
pub mod worker;
