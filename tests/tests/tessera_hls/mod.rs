//! End-to-end scenarios of the segment pipeline.

mod abr_startup;
mod live_merge;
mod multi_instance;
mod seek_discard;
