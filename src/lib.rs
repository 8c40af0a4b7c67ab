// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

pub mod channel;
pub mod config;
pub mod connection;
pub mod consumer;
pub mod container;
pub mod entity;
pub mod errors;
pub mod exchange;
pub mod processor;
pub mod publisher;
pub mod queue;
