//! §3 data model: one submodule per entity, each a thin repository over its
//! Postgres table. Runtime-checked `sqlx::query`/`query_as` throughout (see
//! DESIGN.md) rather than the compile-time `query!` macros.

pub mod event;
pub mod feed_entry;
pub mod feed_record;
pub mod feed_to_fetch;
pub mod known_feed;
pub mod known_feed_identity;
pub mod known_feed_stats;
pub mod polling_marker;
pub mod subscription;
