//! A pure Rust client for the PulseAudio native protocol.
//!
//! The [`proto`] module implements the framed, tagged wire format and the
//! message catalog. The [`Client`] type layers a full-duplex streaming
//! engine on top: playback streams pull audio from a [`SampleSource`] as
//! the server requests it, and record streams push captured audio into a
//! [`SampleSink`].

#![warn(
    anonymous_parameters,
    missing_debug_implementations,
    nonstandard_style,
    rust_2018_idioms,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_pub,
    unused_extern_crates,
    unused_qualifications
)]

pub mod proto;

mod client;

pub use client::*;
