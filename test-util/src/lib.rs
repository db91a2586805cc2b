//! Utilities for integration tests.
//!
//! The `test-util` crate re-exports the in-memory source and channel fakes
//! from `notiflow`, and adds a loopback push server plus a session rig used
//! by the integration and behaviour suites in the main crate.

pub mod push_server;
pub mod rig;

pub use notiflow::test_helpers::{
    FakeChannel,
    FakeSource,
    SourceCall,
    SourceOp,
    eventually,
    fixed_time,
    read_record,
    record,
    records,
};
pub use push_server::{PushConnection, PushServer, frames};
pub use rig::SessionRig;
