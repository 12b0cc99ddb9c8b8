//! Shared fixtures for the Clinic Quota Hub benches and end-to-end tests.

pub mod bench_support;
