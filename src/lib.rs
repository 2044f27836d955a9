//! An embedded mesh networking stack.
//!
//! `wicker` turns a handful of small radio nodes with a connectionless datagram link (MAC-addressed
//! unicast and broadcast, fixed MTU, best-effort delivery) into a mesh: peers discover each other,
//! acknowledge and retransmit packets, learn source-routed paths to nodes several hops away, and
//! remember those paths across reboots.
//!
//! # Using the stack
//!
//! Wicker is runtime- and hardware-agnostic: it needs no RTOS and talks to the radio, the clock,
//! the non-volatile store and the random number generator through traits that are implemented once
//! per platform:
//!
//! * A millisecond [`time::Timer`].
//! * A [`mesh::Radio`] wrapping the datagram driver (ESP-NOW-class).
//! * A [`store::Store`] over a few hundred bytes of EEPROM or emulated flash.
//! * A `rand_core` RNG for packet ids.
//!
//! The types are bundled in a [`config::Config`] implementation and handed to a
//! [`mesh::node::Node`], which is then driven from the application's main loop. See the [`mesh`]
//! module for the protocol itself.

#![no_std]

#[cfg(test)]
#[macro_use]
extern crate std;

#[macro_use]
mod log;
mod error;
mod utils;

pub mod bytes;
pub mod config;
pub mod mesh;
pub mod store;
pub mod time;

pub use self::error::Error;
