//! beanworker-core
//!
//! Building blocks for beanstalkd workers: reserve jobs, turn their bodies
//! into calls of one callable, delete what succeeded and bury the rest.
//!
//! # Modules
//! - **domain**: jobs, tubes, outcomes and per-job errors
//! - **contract**: callables, their signatures and the argument contract derived from them
//! - **ports**: broker and decoder abstractions
//! - **impls**: beanstalkd client, in-memory broker, YAML/JSON decoders
//! - **app**: runner, builder and configuration
//! - **observability**: logging setup

pub mod app;
pub mod contract;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;
