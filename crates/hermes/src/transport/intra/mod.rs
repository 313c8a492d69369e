// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Same-process transport: direct calls through a channel registry.

mod registry;

pub use registry::{IntraRegistry, IntraToken};
