// Copyright (c) 2024 Contributors to the Eclipse Foundation
//
// See the NOTICE file(s) distributed with this work for additional
// information regarding copyright ownership.
//
// This program and the accompanying materials are made available under the
// terms of the Apache License Version 2.0 which is available at
// https://www.apache.org/licenses/LICENSE-2.0
//
// SPDX-License-Identifier: Apache-2.0

//! Deployment-dependent log formatting (§4.8 step 3): colored
//! human-readable for `LOCAL`, plain text for `TESTING`, JSON otherwise.
//! Library code never force-installs a global subscriber; only
//! [`crate::Connector::startup`] calls [`init`], and only once (repeated
//! calls are harmless no-ops thanks to `try_init`).

use tracing_subscriber::EnvFilter;

use crate::connector::Deployment;
use crate::env::{self, MICROBUS_LOG_DEBUG};

fn env_filter() -> EnvFilter {
    let debug = env::get(MICROBUS_LOG_DEBUG).as_deref() == Some("true");
    let default_directive = if debug { "debug" } else { "info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}

/// Installs a global `tracing` subscriber appropriate for `deployment`.
/// A failed install (a subscriber is already set, e.g. by a test harness)
/// is not an error — it just means someone else already did this.
pub fn init(deployment: Deployment) {
    let filter = env_filter();
    let result = match deployment {
        Deployment::Local => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(true)
            .with_target(false)
            .try_init(),
        Deployment::Testing => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_target(true)
            .try_init(),
        Deployment::Lab | Deployment::Prod => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(true)
            .try_init(),
    };
    if result.is_err() {
        tracing::debug!(target: "logging", "tracing subscriber already installed, skipping");
    }
}
