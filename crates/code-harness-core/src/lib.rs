//! # Code Harness Core
//!
//! Retrieval logic for code-aware question answering: the data model,
//! the chunker that turns parsed source and documents into retrieval units,
//! the query analyzer, the store abstraction, and the hybrid retriever.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or network clients.
//! Parsers, stores, embedding and generation backends are supplied by the
//! caller through the traits in [`parse`], [`store`], [`embedding`] and
//! [`generation`].

pub mod chunk;
pub mod context;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod models;
pub mod parse;
pub mod query;
pub mod retrieve;
pub mod search;
pub mod session;
pub mod store;
