//! Skalogram: a feed of uploaded images rendered as colored ASCII art, with voting.
//!
//! The [`pipeline::PostService`] sits between three ports: a metadata store
//! ([`domain::PostRepository`]), an object store ([`domain::ObjectStorage`])
//! and a render cache ([`domain::RenderCache`]). Concrete backends are picked
//! once in [`startup::build_state`].

pub mod aws_clients;
pub mod cache;
pub mod config;
pub mod domain;
pub mod errors;
pub mod handlers;
pub mod ledger;
pub mod models;
pub mod object_address;
pub mod pipeline;
pub mod render;
pub mod repositories;
pub mod routes;
pub mod startup;
pub mod storage;
pub mod templates;

use pipeline::PostService;

/// AppState holds shared resources for the web server.
#[derive(Clone)]
pub struct AppState {
    pub posts: PostService,
    pub max_upload_bytes: usize,
}
