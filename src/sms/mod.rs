// ABOUTME: SMS session layer: outgoing spooler, delivery correlation and incoming reassembly

pub mod types;

pub(crate) mod delivery;
pub(crate) mod inbox;
pub(crate) mod outbox;
