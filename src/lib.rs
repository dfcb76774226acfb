//! # joystick-bridge
//!
//! Samples a Linux joystick device and republishes every button and axis
//! change as a JSON message on one broker topic.
//!
//! ```text
//! /dev/input/jsN ──► controller ──► bus::message ──► bus::ProducerSession ──► broker
//!                    (read, classify)  (encode)        (enqueue, deliver)
//!                          ▲
//!                     pipeline (rate limit, shutdown)
//! ```
//!
//! - [`controller`] - device reads and event classification
//! - [`bus`] - wire format and publishers
//! - [`pipeline`] - the sampling loop
//! - [`config`] - configuration file loading

pub mod bus;
pub mod config;
pub mod controller;
pub mod pipeline;
