//! # Portero
//!
//! `portero` is a single-use identity verification gate. A client signs in
//! against a third-party identity provider (OAuth2 authorization-code flow),
//! the service cross-checks the claimed identity against fraud heuristics
//! (network-origin classification, prior-use deduplication) and, on success,
//! grants the client a privileged role in an external group-management system
//! while recording an audit trail.
//!
//! ## Flow
//!
//! 1. `GET /auth` issues a one-time state token and serves a page embedding
//!    the provider authorization URL.
//! 2. The provider redirects back to `GET /callback?code=&state=`.
//! 3. The verifier consumes the token, classifies the caller's network
//!    origin, checks the origin against prior verifications, exchanges the
//!    code, fetches the identity, persists the record, grants the role and
//!    emits the audit notification.
//!
//! Token consumption is a strict one-shot: a blocked or failed attempt burns
//! its token and the client has to start over from `/auth`.
//!
//! ## Storage
//!
//! Completed verifications are persisted in `PostgreSQL`, keyed by identity
//! id with upsert semantics, and indexed by origin for the dedup lookup. The
//! schema lives in `db/schema.sql`.

pub mod cli;
pub mod portero;
