// SPDX-License-Identifier: MIT

//! Agent orchestration core: typed event emitter, cancellable run
//! contexts, ReAct and tool-calling agents, and a step workflow engine.

pub mod adk;
pub mod weave;
