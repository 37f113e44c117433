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

use connector::codec::{encode_request_subject, encode_subscription_subject};
use connector::fragment::split_frame;
use connector::frame::Frame;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn bench_encode_subscription_subject(c: &mut Criterion) {
    c.bench_function("encode_subscription_subject", |b| {
        b.iter(|| {
            encode_subscription_subject(
                black_box("prod"),
                black_box("GET"),
                black_box("www.example.com"),
                black_box("0"),
                black_box("/users/{id}/orders/{oid}"),
            )
        });
    });
}

fn bench_encode_request_subject(c: &mut Criterion) {
    c.bench_function("encode_request_subject", |b| {
        b.iter(|| {
            encode_request_subject(
                black_box("prod"),
                black_box("GET"),
                black_box("www.example.com"),
                black_box("443"),
                black_box("/users/42/orders/99"),
            )
        });
    });
}

fn bench_split_frame(c: &mut Criterion) {
    let mut frame = Frame::new_request("POST", "https://beta/big");
    frame.body = vec![7u8; 256 * 1024];

    c.bench_function("split_frame_256kb_into_64kb_fragments", |b| {
        b.iter(|| split_frame(black_box(&frame), black_box(64 * 1024)));
    });
}

criterion_group!(
    benches,
    bench_encode_subscription_subject,
    bench_encode_request_subject,
    bench_split_frame
);
criterion_main!(benches);
