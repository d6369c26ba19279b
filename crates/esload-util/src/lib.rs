#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Filesystem helpers for esload.
//!
//! Everything here returns `std::io::Result`; callers add context and logging.

pub mod fs;
