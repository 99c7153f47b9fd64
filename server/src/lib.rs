//! # Dedicated Server Library
//!
//! The authoritative server for the stickman-combat game. Clients that would
//! normally relay through the proprietary peer-to-peer overlay connect here
//! instead; the server terminates the datagram protocol, groups clients into
//! lobbies, drives each lobby's match lifecycle, and is the source of truth
//! for readiness, damage, deaths, map rotation and weapon spawning.
//!
//! ## Module organization
//!
//! - [`network`] — socket ownership, ingest workers, first-contact routing,
//!   the lobby registry and the TCP status acceptor.
//! - [`lobby`] — the per-lobby state machine: membership, ready/match
//!   lifecycle, damage resolution, winner detection, map changes and the
//!   spawn-id allocators.
//! - [`client`] / [`player`] — per-connection and per-slot session state.
//! - [`level`] — map identification, wire serialization and decoded
//!   placement data.
//! - [`gamemode`] — weapon pools, spawn cadence and gun-game progression.
//! - [`commands`] — the thin `/` chat command shell.
//! - [`steam`] — the username lookup and workshop download collaborators.
//! - [`status`] — the read-only JSON status served over TCP.

pub mod client;
pub mod commands;
pub mod config;
pub mod filter;
pub mod gamemode;
pub mod level;
pub mod lobby;
pub mod network;
pub mod player;
pub mod status;
pub mod steam;
