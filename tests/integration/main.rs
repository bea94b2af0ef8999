//! Integration tests with a mock upstream

mod client;
mod mock_server;
mod relay;
