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

//! `connector`: turns a subject-addressed pub/sub transport into a
//! request/response RPC mesh between peer microservices.
//!
//! The [`Connector`](connector::Connector) is the single object a service
//! embeds. Everything else in this crate is a focused subsystem it wires
//! together: subject encoding (`codec`), route storage and dispatch
//! (`subscription`), oversize-payload handling (`fragment`), outbound
//! calls (`publisher`), inbound request handling (`handler`),
//! nearest-responder preference (`locality`), the startup/shutdown state
//! machine (`lifecycle`), declared properties (`config`), periodic jobs
//! (`ticker`), embedded assets and strings (`resources`), metrics/tracing
//! (`telemetry`), the fixed `:888` management endpoints (`control`), and
//! the wire format shared by every subsystem (`frame`). `transport` is the
//! seam to the pub/sub bus itself, which this crate treats as an external
//! collaborator.

pub mod codec;
pub mod config;
pub mod connector;
pub mod control;
pub mod correlator;
pub mod env;
pub mod error;
pub mod fragment;
pub mod frame;
pub mod handler;
pub mod lifecycle;
pub mod locality;
pub mod logging;
pub mod publisher;
pub mod resources;
pub mod subscription;
pub mod telemetry;
pub mod ticker;
pub mod transport;

pub use connector::{ChangedPredicate, Connector, ConnectorOptions, Deployment};
pub use error::{ConnectorError, ConnectorResult, HandlerError};
pub use frame::Frame;
pub use handler::{Handler, HandlerResponse, RequestContext};
pub use publisher::PublishRequest;
pub use transport::Transport;
