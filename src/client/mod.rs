//! User-space client library surface: translates library calls into
//! control-protocol operations, drives the OS mapping/wait primitives, and
//! provides rollback-on-partial-failure convenience flows (`claim_and_map`,
//! `claim_and_open`, and their inverses).

pub mod eventsrc;
pub mod memregion;

pub use eventsrc::OpenEventSrc;
pub use memregion::MappedRegion;
