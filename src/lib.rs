//! Temporal convolutional networks for video prediction.
//!
//! Models are plain burn modules: build them from their `*Config` with
//! `init(&device)`, or import weights exported as `.npy` dumps through
//! [`model::load`].

pub mod backend;
pub mod helper;
pub mod load;
pub mod model;
