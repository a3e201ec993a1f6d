//! Integration tests for streamplay
//!
//! Tests are organized by component:
//! - backend_registry_test: backend selection, activation and listener rewiring
//! - player_registry_test: logical players, active player changes, disposal
//! - event_hub_test: player and stream event fan-out, seek/volume controls
//! - subtitle_sync_test: subtitle resolution, custom picks, stale results
//! - autoplay_test: next episode arming, countdown and coordinator flow
//! - subtitles_test: Stremio subtitle provider (search, download, cache, SRT)
//! - cli_test: argument parsing, exit codes and JSON output
//!
//! Shared fakes live in `common/`.

// Note: Each test file is a separate integration test crate
// Tests are run individually by cargo, not via mod.rs
