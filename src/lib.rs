//! # Code Harness
//!
//! Ask natural-language questions about a codebase and get answers grounded
//! in retrieved code fragments.
//!
//! This crate is the application layer around [`code_harness_core`]: it
//! walks a source tree, parses Java with tree-sitter, stores retrieval units
//! in SQLite, talks to embedding and generation services over HTTP, and
//! exposes everything through the `chx` CLI and a small HTTP API.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────┐   ┌──────────┐
//! │ Source tree │──▶│ Parse+Chunk+Embed │──▶│  SQLite  │
//! │ java/json/md│   │   (two phases)    │   │ units+vec│
//! └─────────────┘   └──────────────────┘   └────┬─────┘
//!                                               │
//!                      ┌────────────────────────┤
//!                      ▼                        ▼
//!                 ┌──────────┐            ┌──────────┐
//!                 │   CLI    │            │   HTTP   │
//!                 │  (chx)   │            │ /api/... │
//!                 └──────────┘            └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! chx init                            # write chx.toml, create database
//! chx index                           # parse, chunk, embed, store
//! chx query "how is an order priced?"
//! chx lookup OrderService
//! chx serve                           # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`index`] | Indexing pipeline |
//! | [`java_parser`] | Tree-sitter Java parser |
//! | [`sqlite_store`] | SQLite-backed store |
//! | [`embedding`] | Embedding providers |
//! | [`generation`] | Text generation providers |
//! | [`ask`] | Query, chat, lookup, and deps commands |
//! | [`stats`] | Index statistics |
//! | [`server`] | HTTP server |
//! | [`progress`] | Progress reporting |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod ask;
pub mod config;
pub mod db;
pub mod embedding;
pub mod generation;
pub mod index;
pub mod java_parser;
pub mod migrate;
pub mod progress;
pub mod server;
pub mod sqlite_store;
pub mod stats;
