//! Docker-backed implementation of `obtura_core::runtime::ContainerRuntime`.
//!
//! One adapter, `DockerRuntime`, wraps `bollard` to run a long-lived
//! service container with a health probe.

pub mod docker;

pub use docker::DockerRuntime;
