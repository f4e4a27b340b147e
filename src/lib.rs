//! # msp-tool - MultiWii Serial Protocol client for flight controllers
//!
//! Talks MSP to Betaflight, Cleanflight and INAV boards over a USB/UART serial
//! link: identifies the board, narrates what it reports, survives the board
//! being unplugged or rebooted, simulates an RC receiver from the keyboard and
//! rebuilds/reflashes firmware through DFU.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use msp_tool::config::Config;
//! use msp_tool::fc::{FcOptions, FlightController};
//! use msp_tool::transport::SerialConnector;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::load_or_default("msp-tool.toml").await?;
//!     config.serial.port = "/dev/ttyACM0".to_string();
//!
//!     let connector = Arc::new(SerialConnector::new(config.serial.read_timeout()));
//!     let (fc, mut notices) = FlightController::connect(FcOptions::from_config(&config), connector)?;
//!     tokio::spawn(async move {
//!         while let Some(line) = notices.recv().await {
//!             println!("{}", line);
//!         }
//!     });
//!     fc.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`msp`] - wire framing, checksums and typed payload coding
//! - [`transport`] - serial port abstraction and a scripted stand-in
//! - [`fc`] - the session: connection, board state, dispatch, flashing
//! - [`rx`] - keyboard driven RC stick simulator
//! - [`config`] - TOML configuration
//!
//! ```text
//! ┌──────────────────┐   keys   ┌──────────────┐
//! │ FlightController │ ◄─────── │ StickSimulator│
//! └──────────────────┘          └──────────────┘
//!     │ frames   ▲ effects
//! ┌────────────┐ ┌────────────┐
//! │ Connection │ │ BoardState │
//! └────────────┘ └────────────┘
//!     │
//! ┌────────────┐
//! │ Transport  │ ← serial port
//! └────────────┘
//! ```

pub mod config;
pub mod fc;
pub mod logutil;
pub mod metrics;
pub mod msp;
pub mod rx;
pub mod transport;
