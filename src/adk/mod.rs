// SPDX-License-Identifier: MIT

pub mod agent;
pub mod config;
pub mod context;
pub mod emitter;
pub mod error;
pub mod memory;
pub mod model;
pub mod retry;
pub mod schema;
pub mod signal;
pub mod template;
pub mod tool;
