//! End-to-end suites running real mesh nodes on loopback sockets.

mod discovery_behaviour;
mod stream_tests;
mod support;
