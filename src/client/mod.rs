// ABOUTME: Modem client module: session facade, configuration and error types
// ABOUTME: Exports the components a host application needs to run a modem session

//! Modem Client Module
//!
//! This module provides the high-level session facade over the command
//! engine:
//!
//! * **Deterministic startup** - open wait, `AT` handshake, SIM unlock,
//!   notification routing and PDU mode in a fixed order
//! * **Background workers** - outgoing spooler, incoming reassembly, delivery
//!   correlation and registration polling all run as tokio tasks
//! * **Cloneable handle** - [`Sim800Client`] is a cheap handle; clone it
//!   freely across tasks
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sim800::{Sim800Client, Sim800Config};
//!
//! # async fn example(
//! #     link: impl sim800::SerialLink,
//! #     serial: tokio::sync::mpsc::Receiver<sim800::SerialEvent>,
//! #     codec: Arc<impl sim800::PduCodec>,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let config = Sim800Config::new().with_pin("1234");
//! let client = Sim800Client::spawn(link, serial, codec, config);
//!
//! client.wait_for_network().await;
//! let composite_id = client.send_sms("+15550001111", "Hello!", true).await?;
//! println!("sent as {composite_id:?}");
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod error;
pub mod session;

pub use builder::Sim800Config;
pub use error::{Sim800Error, Sim800Result};
pub use session::{ClientState, Sim800Client};
