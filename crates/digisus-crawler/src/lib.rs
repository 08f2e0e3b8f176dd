// Copyright 2026 DigiSUS Crawler Contributors
// SPDX-License-Identifier: Apache-2.0

//! DigiSUS crawler library: faceted traversal of the DigiSUS transparency
//! portal and download of its current planning documents.
//!
//! This library crate exposes the core modules for integration testing.

pub mod catalog;
pub mod cli;
pub mod config;
pub mod crawler;
pub mod progress;
pub mod renderer;
pub mod resolver;
pub mod session;
pub mod sink;
pub mod table;
pub mod target;
