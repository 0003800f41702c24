//! # Protocol Envelopes
//!
//! Prost bindings for the kRPC message envelopes (`proto/krpc.proto`).
//!
//! The generated file is checked in so that building the crate does not need `protoc`.
//! Regenerate it with `cargo run -p jeb_core --features gen-proto --bin generate-protocol`.
#[allow(clippy::all)]
mod generated {
    pub mod krpc {
        include!("proto/generated/krpc.rs");
    }
}

pub use generated::krpc::*;
