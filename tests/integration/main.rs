// tests/integration/main.rs

mod http_remote;
mod session;
